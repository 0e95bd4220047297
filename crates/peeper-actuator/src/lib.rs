//! # peeper-actuator
//!
//! Actuator side of the relay. Signals arrive over a reconnecting
//! WebSocket link and drive a duty cycle, a green→red color, and a
//! debounced alert tone.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `output` | Sink trait for duty/color/tone plus tracing and recording sinks |
//! | `controller` | Actuator state and the per-signal mapping |
//! | `sound` | Tone envelope and the bounded sound task |
//! | `ramp` | Power-on duty sweep |
//! | `client` | Connect, consume, reconnect after a fixed delay |

#![deny(unsafe_code)]

pub mod client;
pub mod controller;
pub mod metrics;
pub mod output;
pub mod ramp;
pub mod sound;

pub use client::{ActuatorClient, SessionEnd};
pub use controller::{Actuation, ActuatorController, ActuatorState};
pub use output::{ActuatorOutput, OutputEvent, RecordingOutput, Rgb, Tone, TracingOutput};
pub use ramp::run_startup_ramp;
pub use sound::{SoundEnvelope, UfoTone, play_sound};
