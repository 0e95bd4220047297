//! # peeper-server
//!
//! Vision-host side of the relay.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `peer` | Peer identity and the send seam the broadcaster drives |
//! | `broadcast` | Latest-signal holder with one send loop per peer |
//! | `ingest` | Detection lines → snapshot → signal → broadcaster |
//! | `server` | TCP accept loop and per-peer lifecycle |
//! | `metrics` | Metric name constants |

#![deny(unsafe_code)]

pub mod broadcast;
pub mod error;
pub mod ingest;
pub mod metrics;
pub mod peer;
pub mod server;

pub use broadcast::{Broadcaster, Latest};
pub use error::{Result, ServerError};
pub use ingest::{IngestStats, run_ingest};
pub use peer::{Peer, PeerConnection, PeerId};
pub use server::{ServerHandle, bind};
