use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, mpsc};

use crate::error::TransportError;

/// Why the messaging network dropped the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    LoggedOut,
    Replaced,
    ConnectionLost,
    Unknown,
}

impl DisconnectReason {
    pub fn is_logged_out(&self) -> bool {
        matches!(self, Self::LoggedOut)
    }

    fn from_wire(reason: &str) -> Self {
        match reason {
            "logged_out" => Self::LoggedOut,
            "replaced" => Self::Replaced,
            "connection_lost" => Self::ConnectionLost,
            _ => Self::Unknown,
        }
    }
}

/// One inbound chat message as the transport reports it.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub conversation: String,
    pub is_group: bool,
    pub sender: String,
    pub sender_name: Option<String>,
    pub text: String,
}

/// Events the connection object emits, in the order the network produced
/// them.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    PairingCode(String),
    Open,
    Closed(DisconnectReason),
    Message(InboundMessage),
    CredentialsUpdate { name: String, data: Value },
}

/// Handle for talking back into the connected session.
#[async_trait]
pub trait TransportHandle: Send + Sync {
    async fn send_text(&self, conversation: &str, text: &str) -> Result<(), TransportError>;
    async fn logout(&self) -> Result<(), TransportError>;
}

/// A connected session: the event stream plus the outbound handle.
pub struct Session {
    pub events: mpsc::Receiver<TransportEvent>,
    pub handle: Arc<dyn TransportHandle>,
}

/// Connection factory for the messaging network.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, credentials_dir: &Path) -> Result<Session, TransportError>;
}

/// Wire format of bridge stdout, one JSON object per line.
#[derive(Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum WireEvent {
    Qr {
        code: String,
    },
    Open,
    Close {
        reason: String,
    },
    Message {
        chat: String,
        #[serde(default)]
        group: bool,
        sender: String,
        #[serde(default)]
        sender_name: Option<String>,
        text: String,
    },
    Creds {
        name: String,
        data: Value,
    },
}

/// Wire format of bridge stdin.
#[derive(Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum WireAction<'a> {
    Send { chat: &'a str, text: &'a str },
    Logout,
}

/// Transport implementation driving an external bridge process that owns
/// the actual network protocol and authentication. The bridge emits events
/// as JSON lines on stdout and accepts actions as JSON lines on stdin; it
/// receives the credentials directory as its last argument and manages the
/// files in it, reporting updates through `creds` events.
pub struct BridgeTransport {
    command: String,
}

impl BridgeTransport {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl Transport for BridgeTransport {
    async fn connect(&self, credentials_dir: &Path) -> Result<Session, TransportError> {
        let mut parts = self.command.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| TransportError::Protocol("empty bridge command".to_string()))?;

        let mut child = Command::new(program)
            .args(parts)
            .arg(credentials_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;

        let stdout = child.stdout.take().ok_or_else(|| {
            TransportError::Protocol("bridge stdout was not captured".to_string())
        })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::Protocol("bridge stdin was not captured".to_string()))?;

        let (tx, events) = mpsc::channel(64);
        tokio::spawn(read_events(stdout, tx, child));

        Ok(Session {
            events,
            handle: Arc::new(BridgeHandle {
                stdin: Mutex::new(stdin),
            }),
        })
    }
}

async fn read_events(stdout: ChildStdout, tx: mpsc::Sender<TransportEvent>, mut child: Child) {
    let mut lines = BufReader::new(stdout).lines();
    let mut closed = false;

    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let event = match serde_json::from_str::<WireEvent>(line) {
            Ok(event) => event,
            Err(e) => {
                log::warn!("ignoring malformed bridge event {:?}: {}", line, e);
                continue;
            }
        };
        let event = match event {
            WireEvent::Qr { code } => TransportEvent::PairingCode(code),
            WireEvent::Open => TransportEvent::Open,
            WireEvent::Close { reason } => {
                closed = true;
                TransportEvent::Closed(DisconnectReason::from_wire(&reason))
            }
            WireEvent::Message {
                chat,
                group,
                sender,
                sender_name,
                text,
            } => TransportEvent::Message(InboundMessage {
                conversation: chat,
                is_group: group,
                sender,
                sender_name,
                text,
            }),
            WireEvent::Creds { name, data } => TransportEvent::CredentialsUpdate { name, data },
        };
        if tx.send(event).await.is_err() {
            break;
        }
    }

    // Bridge stdout ended without a close event: the connection is gone.
    if !closed {
        let _ = tx
            .send(TransportEvent::Closed(DisconnectReason::ConnectionLost))
            .await;
    }
    if tx.is_closed() {
        let _ = child.kill().await;
    }
    let _ = child.wait().await;
}

struct BridgeHandle {
    stdin: Mutex<ChildStdin>,
}

impl BridgeHandle {
    async fn write(&self, action: &WireAction<'_>) -> Result<(), TransportError> {
        let mut line =
            serde_json::to_string(action).map_err(|e| TransportError::Protocol(e.to_string()))?;
        line.push('\n');
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl TransportHandle for BridgeHandle {
    async fn send_text(&self, conversation: &str, text: &str) -> Result<(), TransportError> {
        self.write(&WireAction::Send {
            chat: conversation,
            text,
        })
        .await
    }

    async fn logout(&self) -> Result<(), TransportError> {
        self.write(&WireAction::Logout).await
    }
}
