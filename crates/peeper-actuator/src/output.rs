//! Output sinks.
//!
//! Register-level PWM/GPIO/audio I/O lives outside this crate; a host
//! implements [`ActuatorOutput`] for its hardware.

use parking_lot::Mutex;
use tracing::{debug, trace};

/// Full-scale value for 16-bit PWM registers.
pub const PWM_FULL_SCALE: u16 = u16::MAX;

/// LED color, each channel a fraction in [0.0, 1.0].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rgb {
    /// Red channel.
    pub red: f64,
    /// Green channel.
    pub green: f64,
    /// Blue channel.
    pub blue: f64,
}

impl Rgb {
    /// Linear green (duty 0) → red (duty 1).
    pub fn from_duty(duty: f64) -> Self {
        let duty = peeper_core::clamp_unit(duty);
        Self {
            red: duty,
            green: 1.0 - duty,
            blue: 0.0,
        }
    }

    /// Channels scaled to 16-bit PWM values.
    pub fn to_pwm(self) -> [u16; 3] {
        [to_pwm(self.red), to_pwm(self.green), to_pwm(self.blue)]
    }
}

/// Scale a [0.0, 1.0] fraction to a 16-bit PWM value.
pub fn to_pwm(fraction: f64) -> u16 {
    (peeper_core::clamp_unit(fraction) * f64::from(PWM_FULL_SCALE)) as u16
}

/// One instantaneous tone setting.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Tone {
    /// Pitch in Hz.
    pub frequency_hz: f64,
    /// Loudness in [0.0, 1.0].
    pub amplitude: f64,
}

/// Physical outputs driven by the controller.
pub trait ActuatorOutput: Send + Sync {
    /// Main PWM duty in [0.0, 1.0].
    fn set_duty(&self, duty: f64);
    /// LED color.
    fn set_color(&self, color: Rgb);
    /// Tone on (`Some`) or silence (`None`).
    fn set_tone(&self, tone: Option<Tone>);
}

/// Logs every output change instead of touching hardware.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingOutput;

impl ActuatorOutput for TracingOutput {
    fn set_duty(&self, duty: f64) {
        debug!(duty, pwm = to_pwm(duty), "duty");
    }

    fn set_color(&self, color: Rgb) {
        let [red, green, blue] = color.to_pwm();
        debug!(red, green, blue, "color");
    }

    fn set_tone(&self, tone: Option<Tone>) {
        match tone {
            Some(t) => trace!(frequency_hz = t.frequency_hz, amplitude = t.amplitude, "tone"),
            None => debug!("tone off"),
        }
    }
}

/// A call made on a [`RecordingOutput`].
#[derive(Clone, Debug, PartialEq)]
pub enum OutputEvent {
    /// `set_duty`.
    Duty(f64),
    /// `set_color`.
    Color(Rgb),
    /// `set_tone`.
    Tone(Option<Tone>),
}

/// Keeps every call in memory; for dry runs and tests.
#[derive(Debug, Default)]
pub struct RecordingOutput {
    events: Mutex<Vec<OutputEvent>>,
}

impl RecordingOutput {
    /// Empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every event so far.
    pub fn events(&self) -> Vec<OutputEvent> {
        self.events.lock().clone()
    }

    /// Every duty written, in order.
    pub fn duties(&self) -> Vec<f64> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                OutputEvent::Duty(d) => Some(*d),
                _ => None,
            })
            .collect()
    }

    /// Most recent color.
    pub fn last_color(&self) -> Option<Rgb> {
        self.events.lock().iter().rev().find_map(|e| match e {
            OutputEvent::Color(c) => Some(*c),
            _ => None,
        })
    }

    /// Number of audible tone updates.
    pub fn tone_updates(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, OutputEvent::Tone(Some(_))))
            .count()
    }
}

impl ActuatorOutput for RecordingOutput {
    fn set_duty(&self, duty: f64) {
        self.events.lock().push(OutputEvent::Duty(duty));
    }

    fn set_color(&self, color: Rgb) {
        self.events.lock().push(OutputEvent::Color(color));
    }

    fn set_tone(&self, tone: Option<Tone>) {
        self.events.lock().push(OutputEvent::Tone(tone));
    }
}
