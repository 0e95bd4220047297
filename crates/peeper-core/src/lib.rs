//! # peeper-core
//!
//! The detection pipeline, independent of transport:
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `snapshot` | Per-label counts and confidences for one detection line |
//! | `parser` | Recognizes detection lines and builds snapshots |
//! | `policy` | Priority rules turning a snapshot into a [`Signal`] |
//! | `signal` | The immutable actuation value + alert flag |
//! | `message` | Wire shapes: structured record or legacy text |
//! | `error` | Decode failures |

#![deny(unsafe_code)]

pub mod error;
pub mod message;
pub mod parser;
pub mod policy;
pub mod signal;
pub mod snapshot;

pub use error::{CoreError, Result};
pub use message::{DetectionRecord, Message, TargetPair};
pub use parser::DetectionParser;
pub use policy::{CUP, PERSON, SignalPolicy, clamp_unit};
pub use signal::Signal;
pub use snapshot::{DetectionSnapshot, ObjectStats};
