//! Alert tone: a linear fade-in/sustain/fade-out envelope over a
//! pitch- and amplitude-modulated "UFO" tone.

use std::f64::consts::TAU;
use std::sync::Arc;
use std::time::Duration;

use peeper_settings::SoundSettings;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::debug;

use crate::output::{ActuatorOutput, Tone};

/// Linear attack/hold/release gain curve.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SoundEnvelope {
    /// Attack.
    pub fade_in: Duration,
    /// Hold at full gain.
    pub sustain: Duration,
    /// Release.
    pub fade_out: Duration,
    /// Output update granularity.
    pub step: Duration,
}

impl SoundEnvelope {
    /// Envelope from the sound settings section.
    pub fn from_settings(settings: &SoundSettings) -> Self {
        Self {
            fade_in: Duration::from_millis(settings.fade_in_ms),
            sustain: Duration::from_millis(settings.sustain_ms),
            fade_out: Duration::from_millis(settings.fade_out_ms),
            step: Duration::from_millis(settings.step_ms.max(1)),
        }
    }

    /// Fixed length of one sound.
    pub fn total(&self) -> Duration {
        self.fade_in + self.sustain + self.fade_out
    }

    /// Gain in [0.0, 1.0] at `elapsed` since the sound started.
    pub fn gain_at(&self, elapsed: Duration) -> f64 {
        if elapsed < self.fade_in {
            return elapsed.as_secs_f64() / self.fade_in.as_secs_f64();
        }
        let released = self.fade_in + self.sustain;
        if elapsed < released {
            return 1.0;
        }
        if elapsed < self.total() {
            let into = (elapsed - released).as_secs_f64();
            return 1.0 - into / self.fade_out.as_secs_f64();
        }
        0.0
    }
}

/// Tone generator: pitch swings `base ± depth` at `lfo_rate`, amplitude
/// dips by up to `volume_depth` in step with it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UfoTone {
    /// Center pitch in Hz.
    pub base_freq: f64,
    /// Pitch swing in Hz.
    pub freq_depth: f64,
    /// Modulation rate in Hz.
    pub lfo_rate: f64,
    /// Amplitude modulation depth in [0.0, 1.0].
    pub volume_depth: f64,
    /// Overall loudness in [0.0, 1.0].
    pub volume: f64,
}

impl UfoTone {
    /// Tone from the sound settings section.
    pub fn from_settings(settings: &SoundSettings) -> Self {
        Self {
            base_freq: settings.base_freq,
            freq_depth: settings.freq_depth,
            lfo_rate: settings.lfo_rate,
            volume_depth: settings.volume_depth,
            volume: settings.volume,
        }
    }

    /// Instantaneous tone at `elapsed`, scaled by envelope `gain`.
    pub fn sample(&self, elapsed: Duration, gain: f64) -> Tone {
        let lfo = (TAU * self.lfo_rate * elapsed.as_secs_f64()).sin();
        let modulation = 1.0 - self.volume_depth * (1.0 - lfo) / 2.0;
        Tone {
            frequency_hz: (self.base_freq + self.freq_depth * lfo).max(0.0),
            amplitude: peeper_core::clamp_unit(self.volume * gain * modulation),
        }
    }
}

/// Play one sound to completion, then silence the output.
///
/// Runs for exactly [`SoundEnvelope::total`]; nothing cancels it.
pub async fn play_sound(envelope: SoundEnvelope, tone: UfoTone, output: Arc<dyn ActuatorOutput>) {
    let total = envelope.total();
    debug!(total_ms = total.as_millis() as u64, "sound started");
    let start = Instant::now();
    let mut ticker = time::interval(envelope.step);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let _ = ticker.tick().await;
        let elapsed = start.elapsed();
        if elapsed >= total {
            break;
        }
        output.set_tone(Some(tone.sample(elapsed, envelope.gain_at(elapsed))));
    }

    output.set_tone(None);
    debug!("sound finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{OutputEvent, RecordingOutput};

    fn envelope() -> SoundEnvelope {
        SoundEnvelope::from_settings(&SoundSettings::default())
    }

    #[test]
    fn envelope_shape() {
        let env = envelope();
        assert_eq!(env.total(), Duration::from_millis(3_100));
        assert!(env.gain_at(Duration::ZERO).abs() < 1e-9);
        assert!((env.gain_at(Duration::from_millis(50)) - 0.5).abs() < 1e-9);
        assert!((env.gain_at(Duration::from_millis(1_000)) - 1.0).abs() < 1e-9);
        assert!((env.gain_at(Duration::from_millis(2_600)) - 0.5).abs() < 1e-9);
        assert!(env.gain_at(Duration::from_millis(3_100)).abs() < 1e-9);
        assert!(env.gain_at(Duration::from_secs(10)).abs() < 1e-9);
    }

    #[test]
    fn zero_length_phases() {
        let env = SoundEnvelope {
            fade_in: Duration::ZERO,
            sustain: Duration::from_millis(10),
            fade_out: Duration::ZERO,
            step: Duration::from_millis(1),
        };
        assert!((env.gain_at(Duration::ZERO) - 1.0).abs() < 1e-9);
        assert!(env.gain_at(Duration::from_millis(10)).abs() < 1e-9);
    }

    #[test]
    fn tone_stays_within_bounds() {
        let tone = UfoTone::from_settings(&SoundSettings::default());
        for ms in (0..3_000).step_by(7) {
            let t = tone.sample(Duration::from_millis(ms), 1.0);
            assert!(t.frequency_hz >= 300.0 - 1e-6 && t.frequency_hz <= 900.0 + 1e-6);
            assert!(t.amplitude >= 0.7 - 1e-6 && t.amplitude <= 1.0 + 1e-6);
        }
        let silent = tone.sample(Duration::from_millis(123), 0.0);
        assert!(silent.amplitude.abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn sound_runs_for_the_envelope_then_silences() {
        let out = Arc::new(RecordingOutput::new());
        let env = SoundEnvelope {
            step: Duration::from_millis(100),
            ..envelope()
        };
        let start = Instant::now();
        play_sound(env, UfoTone::from_settings(&SoundSettings::default()), out.clone()).await;

        assert!(start.elapsed() >= Duration::from_millis(3_100));
        assert!(start.elapsed() < Duration::from_millis(3_300));
        // Ticks at 0, 100, ..., 3000 ms are audible.
        assert_eq!(out.tone_updates(), 31);
        assert_eq!(out.events().last(), Some(&OutputEvent::Tone(None)));
    }
}
