//! # tether-proto
//!
//! Wire protocol for the tether bridge: the versioned binary envelope
//! exchanged between the bridge, game clients, and orchestrators.
//!
//! The protocol stack is organized in layers:
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │          Envelope payloads              │  Protobuf (envelope)
//! ├─────────────────────────────────────────┤
//! │          Envelope header                │  version / seq / ack / clocks
//! ├─────────────────────────────────────────┤
//! │            Framing                      │  Length-prefixed
//! ├─────────────────────────────────────────┤
//! │          TLS transport                  │  Mutual TLS
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Module Overview
//!
//! - [`error`]: Protocol error types ([`ProtocolError`]) and wire constants
//! - [`envelope`]: Envelope and payload message types
//! - [`capability`]: Capability sets and server-authoritative intersection
//! - [`framing`]: Length-prefixed envelope codec ([`EnvelopeCodec`])
//!
//! # Wire Format
//!
//! Every message is a length-prefixed protobuf `Envelope`:
//!
//! ```text
//! +----------------------------+------------------+
//! | Length (4 bytes, BE)       | Envelope bytes   |
//! +----------------------------+------------------+
//! ```
//!
//! The frame length is validated against the configured ceiling before any
//! allocation. Envelopes carry `protocol_version = 1` and exactly one
//! payload variant.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod capability;
pub mod envelope;
pub mod error;
pub mod framing;

pub use capability::CapabilitySet;
pub use envelope::{
    ActionAck, ActionRequest, ActionResult, ActionStatus, ActionType, BaritoneGoto, Capability,
    Dimension, Envelope, ErrorCode, ErrorFrame, Hello, HelloAck, PeerRole, TelemetryFrame,
    TimeSyncRequest, TimeSyncResponse, action_request,
};
pub use error::{
    DEFAULT_MAX_FRAME_BYTES, MAX_FRAME_BYTES, PROTOCOL_VERSION, ProtocolError, ProtocolResult,
};
pub use framing::EnvelopeCodec;
