//! Messenger-network collaborator interface.
//!
//! The gateway depends only on these signatures plus a disconnect cause that
//! distinguishes a permanent logout from every other failure.

use std::{path::Path, sync::Arc};

use {async_trait::async_trait, tokio::sync::mpsc};

use crate::error::Result;

/// Why a connection closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectCause {
    /// The credentials were invalidated on the network side. Terminal: the
    /// session must not reconnect with them.
    LoggedOut,
    /// Anything else (network drop, server restart, ...). Recoverable.
    Transport(String),
}

impl DisconnectCause {
    #[must_use]
    pub fn is_logged_out(&self) -> bool {
        matches!(self, Self::LoggedOut)
    }
}

/// Asynchronous lifecycle events emitted by a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The connection is ready and the stored credentials are not registered;
    /// a pairing code should be requested.
    PairingRequired,
    /// The connection is open and usable.
    Open,
    /// The connection closed.
    Closed(DisconnectCause),
}

/// Receiver for a connection's lifecycle events.
pub type EventReceiver = mpsc::UnboundedReceiver<ConnectionEvent>;

/// A live connection to the messaging network.
#[async_trait]
pub trait MessengerConnection: Send + Sync {
    /// Request a pairing code for `number`. Only meaningful after a
    /// [`ConnectionEvent::PairingRequired`].
    async fn request_pairing_code(&self, number: &str) -> Result<String>;

    /// Send a text payload to a recipient on the network.
    async fn send_text(&self, recipient: &str, text: &str) -> Result<()>;

    /// Invalidate the stored credentials on the network side.
    async fn logout(&self) -> Result<()>;
}

/// Factory for messenger connections.
#[async_trait]
pub trait MessengerClient: Send + Sync {
    /// Open a connection using the credentials stored under `credential_dir`.
    async fn connect(
        &self,
        credential_dir: &Path,
    ) -> Result<(Arc<dyn MessengerConnection>, EventReceiver)>;

    /// Whether `credential_dir` already holds registered credentials.
    fn is_registered(&self, credential_dir: &Path) -> bool;
}
