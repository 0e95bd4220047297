//! # peeper-ws
//!
//! The slice of RFC 6455 the relay needs: unfragmented text frames,
//! ping/pong and close, over any `AsyncRead + AsyncWrite` transport.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `frame` | Frame encoding/decoding, payload masking |
//! | `handshake` | HTTP/1.1 Upgrade exchange, client and server side |
//! | `connection` | Role-aware text messaging, control frames, close state machine |
//! | `keepalive` | Idle-ping liveness check for an open connection |

#![deny(unsafe_code)]

pub mod connection;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod keepalive;

pub use connection::{Connection, ConnectionConfig, ConnectionState, Role};
pub use error::{Result, WsError};
pub use frame::{Frame, Opcode, apply_mask, decode_frame, encode_frame, encode_frame_with_key};
pub use handshake::{ClientRequest, UpgradeRequest, accept_key};
pub use keepalive::{KeepaliveResult, run_keepalive};
