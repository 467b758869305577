//! Per-actor messenger sessions.
//!
//! The orchestrator owns one connection per registered actor: pairing,
//! reconnect-with-backoff, teardown, and a persisted index of session
//! metadata. The wire protocol itself lives behind the [`MessengerClient`]
//! trait; the production implementation speaks JSON over a websocket to the
//! messenger sidecar.

pub mod client;
pub mod error;
pub mod index;
pub mod orchestrator;
pub mod sidecar;

pub use {
    client::{ConnectionEvent, DisconnectCause, EventReceiver, MessengerClient, MessengerConnection},
    error::{Error, Result},
    index::{SessionRecord, SessionStatus},
    orchestrator::{PairingSender, PairingUpdate, SessionOrchestrator},
    sidecar::SidecarClient,
};
