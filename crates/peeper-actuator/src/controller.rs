//! Signal → duty, color, and debounced sound.
//!
//! The controller is owned by the single task that consumes signals. The
//! only state shared with anything else is the `sound_playing` flag, which
//! the sound task clears when it finishes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use metrics::counter;
use peeper_core::{Signal, clamp_unit};
use peeper_settings::SoundSettings;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::metrics::SOUNDS_STARTED_TOTAL;
use crate::output::{ActuatorOutput, Rgb};
use crate::sound::{SoundEnvelope, UfoTone, play_sound};

/// Mutable actuator state, persisted across signals.
#[derive(Debug, Default)]
pub struct ActuatorState {
    /// Last duty written.
    pub current_duty: f64,
    /// When the last sound started.
    pub last_sound_time: Option<Instant>,
    sound_playing: Arc<AtomicBool>,
}

impl ActuatorState {
    /// Whether a sound task is running.
    pub fn sound_playing(&self) -> bool {
        self.sound_playing.load(Ordering::Acquire)
    }
}

/// Effects of one signal.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Actuation {
    /// Duty written.
    pub duty: f64,
    /// Color written.
    pub color: Rgb,
    /// Whether a sound task was started.
    pub sound_started: bool,
}

/// Applies signals to an [`ActuatorOutput`].
pub struct ActuatorController {
    state: ActuatorState,
    output: Arc<dyn ActuatorOutput>,
    threshold: f64,
    cooldown: Duration,
    envelope: SoundEnvelope,
    tone: UfoTone,
}

impl ActuatorController {
    /// Controller driving `output` with the given sound policy.
    pub fn new(settings: &SoundSettings, output: Arc<dyn ActuatorOutput>) -> Self {
        Self {
            state: ActuatorState::default(),
            output,
            threshold: settings.threshold,
            cooldown: settings.cooldown(),
            envelope: SoundEnvelope::from_settings(settings),
            tone: UfoTone::from_settings(settings),
        }
    }

    /// Current state.
    pub fn state(&self) -> &ActuatorState {
        &self.state
    }

    /// Write duty and its color without evaluating the sound trigger.
    pub fn set_duty(&mut self, duty: f64) -> Rgb {
        let duty = clamp_unit(duty);
        let color = Rgb::from_duty(duty);
        self.state.current_duty = duty;
        self.output.set_duty(duty);
        self.output.set_color(color);
        color
    }

    /// Apply one signal: duty and color always, sound when the trigger
    /// holds. Never waits for a sound to finish.
    pub fn apply(&mut self, signal: &Signal) -> Actuation {
        let color = self.set_duty(signal.value);
        let duty = self.state.current_duty;
        debug!(duty, alert = signal.alert_active, "signal applied");

        let sound_started = self.maybe_start_sound(duty);
        Actuation {
            duty,
            color,
            sound_started,
        }
    }

    fn maybe_start_sound(&mut self, duty: f64) -> bool {
        if duty <= self.threshold {
            return false;
        }
        let now = Instant::now();
        if let Some(last) = self.state.last_sound_time {
            if now.duration_since(last) < self.cooldown {
                debug!("sound suppressed: cooldown");
                return false;
            }
        }
        if self
            .state
            .sound_playing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("sound suppressed: already playing");
            return false;
        }

        self.state.last_sound_time = Some(now);
        counter!(SOUNDS_STARTED_TOTAL).increment(1);
        info!(duty, "alert sound triggered");

        let playing = Arc::clone(&self.state.sound_playing);
        let output = Arc::clone(&self.output);
        let (envelope, tone) = (self.envelope, self.tone);
        drop(tokio::spawn(async move {
            play_sound(envelope, tone, output).await;
            playing.store(false, Ordering::Release);
        }));
        true
    }
}
