//! Messenger sidecar client.
//!
//! Production [`MessengerClient`] implementation: one websocket per session
//! to the messenger sidecar process, JSON frames both ways. Lifecycle frames
//! become [`ConnectionEvent`]s; request/response frames (pairing code, send)
//! are correlated by id.

use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    async_trait::async_trait,
    futures::{SinkExt, StreamExt, stream::SplitSink},
    serde::{Deserialize, Serialize},
    tokio::{
        net::TcpStream,
        sync::{mpsc, oneshot},
    },
    tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message},
    tracing::{debug, warn},
};

use crate::{
    client::{ConnectionEvent, DisconnectCause, EventReceiver, MessengerClient, MessengerConnection},
    error::{Error, Result},
};

/// Default sidecar websocket endpoint.
pub const DEFAULT_SIDECAR_URL: &str = "ws://127.0.0.1:3020";

const CONNECT_RETRY_ATTEMPTS: usize = 10;
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(500);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Credential marker file written by the sidecar once pairing completes.
const CREDS_FILE: &str = "creds.json";

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame {
    Login { credential_dir: String },
    PairingCode { id: String, number: String },
    SendText { id: String, recipient: String, text: String },
    Logout,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum SidecarFrame {
    PairingRequired,
    Open,
    Closed {
        #[serde(default)]
        cause: String,
    },
    Ack {
        id: String,
        ok: bool,
        #[serde(default)]
        code: Option<String>,
        #[serde(default)]
        error: Option<String>,
    },
}

struct Ack {
    ok: bool,
    code: Option<String>,
    error: Option<String>,
}

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<Ack>>>>;

/// Connects sessions through the messenger sidecar.
pub struct SidecarClient {
    url: String,
}

impl SidecarClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    async fn connect_with_retry(&self) -> Result<WebSocketStream<MaybeTlsStream<TcpStream>>> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match connect_async(self.url.as_str()).await {
                Ok((ws, _)) => return Ok(ws),
                Err(e) if attempt < CONNECT_RETRY_ATTEMPTS => {
                    debug!(url = %self.url, attempt, error = %e, "sidecar connect failed, retrying");
                    tokio::time::sleep(CONNECT_RETRY_DELAY).await;
                },
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[async_trait]
impl MessengerClient for SidecarClient {
    async fn connect(
        &self,
        credential_dir: &Path,
    ) -> Result<(Arc<dyn MessengerConnection>, EventReceiver)> {
        let ws = self.connect_with_retry().await?;
        let (mut sink, mut stream) = ws.split();

        let login = ClientFrame::Login {
            credential_dir: credential_dir.to_string_lossy().into_owned(),
        };
        sink.send(Message::Text(serde_json::to_string(&login)?.into()))
            .await?;

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let reader_pending = Arc::clone(&pending);
        tokio::spawn(async move {
            let mut close_emitted = false;
            while let Some(message) = stream.next().await {
                let text = match message {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => continue,
                };
                let frame: SidecarFrame = match serde_json::from_str(text.as_str()) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(error = %e, "malformed sidecar frame");
                        continue;
                    },
                };
                match frame {
                    SidecarFrame::PairingRequired => {
                        let _ = event_tx.send(ConnectionEvent::PairingRequired);
                    },
                    SidecarFrame::Open => {
                        let _ = event_tx.send(ConnectionEvent::Open);
                    },
                    SidecarFrame::Closed { cause } => {
                        close_emitted = true;
                        let _ = event_tx.send(ConnectionEvent::Closed(parse_cause(&cause)));
                    },
                    SidecarFrame::Ack { id, ok, code, error } => {
                        let sender = {
                            let mut pending =
                                reader_pending.lock().unwrap_or_else(|e| e.into_inner());
                            pending.remove(&id)
                        };
                        match sender {
                            Some(tx) => {
                                let _ = tx.send(Ack { ok, code, error });
                            },
                            None => debug!(id, "ack for unknown request"),
                        }
                    },
                }
            }
            // The socket dropped without a lifecycle frame: surface it as a
            // recoverable close so the orchestrator schedules a reconnect.
            if !close_emitted {
                let _ = event_tx.send(ConnectionEvent::Closed(DisconnectCause::Transport(
                    "sidecar stream ended".into(),
                )));
            }
            // Fail any requests still in flight.
            let mut pending = reader_pending.lock().unwrap_or_else(|e| e.into_inner());
            pending.clear();
        });

        let connection = SidecarConnection {
            sink: tokio::sync::Mutex::new(sink),
            pending,
        };
        Ok((Arc::new(connection), event_rx))
    }

    fn is_registered(&self, credential_dir: &Path) -> bool {
        credential_dir.join(CREDS_FILE).exists()
    }
}

struct SidecarConnection {
    sink: tokio::sync::Mutex<WsSink>,
    pending: PendingMap,
}

impl SidecarConnection {
    async fn send_frame(&self, frame: &ClientFrame) -> Result<()> {
        let text = serde_json::to_string(frame)?;
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(text.into())).await?;
        Ok(())
    }

    async fn request(&self, id: String, frame: ClientFrame) -> Result<Ack> {
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending.insert(id.clone(), tx);
        }
        if let Err(e) = self.send_frame(&frame).await {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(ack)) => Ok(ack),
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => {
                let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
                pending.remove(&id);
                Err(Error::Timeout)
            },
        }
    }
}

#[async_trait]
impl MessengerConnection for SidecarConnection {
    async fn request_pairing_code(&self, number: &str) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let frame = ClientFrame::PairingCode {
            id: id.clone(),
            number: number.to_string(),
        };
        let ack = self.request(id, frame).await?;
        if !ack.ok {
            return Err(Error::Pairing(
                ack.error.unwrap_or_else(|| "rejected".into()),
            ));
        }
        ack.code
            .ok_or_else(|| Error::Pairing("no code in response".into()))
    }

    async fn send_text(&self, recipient: &str, text: &str) -> Result<()> {
        let id = uuid::Uuid::new_v4().to_string();
        let frame = ClientFrame::SendText {
            id: id.clone(),
            recipient: recipient.to_string(),
            text: text.to_string(),
        };
        let ack = self.request(id, frame).await?;
        if !ack.ok {
            return Err(Error::SendRejected(
                ack.error.unwrap_or_else(|| "rejected".into()),
            ));
        }
        Ok(())
    }

    async fn logout(&self) -> Result<()> {
        self.send_frame(&ClientFrame::Logout).await
    }
}

fn parse_cause(cause: &str) -> DisconnectCause {
    if cause == "logged_out" {
        DisconnectCause::LoggedOut
    } else {
        DisconnectCause::Transport(cause.to_string())
    }
}
