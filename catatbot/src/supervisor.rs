use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use teloxide::Bot;
use teloxide::prelude::Requester;
use teloxide::types::ChatId;
use tokio::sync::{Mutex, mpsc};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use crate::config::{LOGOUT_WAIT_SECONDS, MAX_RECONNECT_ATTEMPTS, RECONNECT_DELAY_SECONDS};
use crate::creds::CredentialStore;
use crate::error::FatalError;
use crate::interpreter::Interpreter;
use crate::transport::{
    DisconnectReason, InboundMessage, Session, Transport, TransportEvent, TransportHandle,
};

/// Connection lifecycle as shown on the status page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Pairing,
    Connected,
    Closing,
}

impl ConnectionStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Disconnected => "terputus",
            Self::Pairing => "menunggu pairing",
            Self::Connected => "terhubung",
            Self::Closing => "menutup",
        }
    }
}

/// Bounded retry settings for re-establishing the session.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_RECONNECT_ATTEMPTS,
            delay: Duration::from_secs(RECONNECT_DELAY_SECONDS),
        }
    }
}

/// State the supervisor publishes for the HTTP surface: the latest pairing
/// code and the connection status. There is no code history; each pairing
/// event overwrites the previous value.
#[derive(Clone, Default)]
pub struct LinkState {
    pairing_code: Arc<Mutex<Option<String>>>,
    status: Arc<Mutex<Option<ConnectionStatus>>>,
}

impl LinkState {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn pairing_code(&self) -> Option<String> {
        self.pairing_code.lock().await.clone()
    }

    pub async fn status(&self) -> ConnectionStatus {
        self.status
            .lock()
            .await
            .unwrap_or(ConnectionStatus::Disconnected)
    }

    pub(crate) async fn set_code(&self, code: Option<String>) {
        *self.pairing_code.lock().await = code;
    }

    pub(crate) async fn set_status(&self, status: ConnectionStatus) {
        *self.status.lock().await = Some(status);
    }
}

/// Best-effort pairing-code push to a Telegram chat, so somebody notices
/// the bot needs a new scan without watching the status page.
#[derive(Clone)]
pub struct PairingNotifier {
    bot: Bot,
    chat_id: ChatId,
    pairing_url: String,
}

impl PairingNotifier {
    pub fn new(token: &str, chat_id: i64, pairing_url: String) -> Self {
        Self {
            bot: Bot::new(token),
            chat_id: ChatId(chat_id),
            pairing_url,
        }
    }

    async fn notify(&self) {
        let text = format!(
            "Kode pairing baru tersedia. Silakan scan di: {}",
            self.pairing_url
        );
        if let Err(e) = self.bot.send_message(self.chat_id, text).await {
            log::warn!("failed to push pairing notification: {}", e);
        }
    }
}

enum SessionEnd {
    Closed(DisconnectReason),
    Shutdown,
}

/// Owns the messaging session lifecycle: connect, pairing, credential
/// persistence, bounded reconnection and graceful logout.
pub struct Supervisor {
    transport: Arc<dyn Transport>,
    creds: CredentialStore,
    interpreter: Arc<Interpreter>,
    link: LinkState,
    notifier: Option<PairingNotifier>,
    policy: ReconnectPolicy,
}

impl Supervisor {
    pub fn new(
        transport: Arc<dyn Transport>,
        creds: CredentialStore,
        interpreter: Arc<Interpreter>,
        link: LinkState,
        notifier: Option<PairingNotifier>,
        policy: ReconnectPolicy,
    ) -> Self {
        Self {
            transport,
            creds,
            interpreter,
            link,
            notifier,
            policy,
        }
    }

    /// Run the connection lifecycle until shutdown is requested or the
    /// retry budget is exhausted. Exhaustion is fatal: the caller exits and
    /// the external process manager restarts from scratch.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), FatalError> {
        if self.creds.has_credentials().await {
            log::info!("found persisted session credentials, resuming");
        } else {
            log::info!("no session credentials yet, a pairing code will be issued");
        }

        let mut failures: u32 = 0;
        loop {
            if shutdown.is_cancelled() {
                return Ok(());
            }
            self.link.set_status(ConnectionStatus::Pairing).await;

            match self.transport.connect(self.creds.dir()).await {
                Ok(session) => {
                    let (end, opened) = self.drive_session(session, &shutdown).await;
                    match end {
                        SessionEnd::Shutdown => return Ok(()),
                        SessionEnd::Closed(reason) => {
                            self.link.set_status(ConnectionStatus::Disconnected).await;
                            log::warn!("connection closed: {:?}", reason);
                            if reason.is_logged_out() {
                                log::info!("device logged out, clearing stored credentials");
                                if let Err(e) = self.creds.clear().await {
                                    log::error!("failed to clear credentials: {}", e);
                                }
                            }
                            if opened {
                                failures = 0;
                            } else {
                                // Pairing or handshake died before the
                                // session ever opened; that burns a retry.
                                failures += 1;
                                if failures >= self.policy.max_attempts {
                                    self.link.set_status(ConnectionStatus::Disconnected).await;
                                    return Err(FatalError::ReconnectExhausted(failures));
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    failures += 1;
                    log::error!(
                        "connection attempt failed ({}/{}): {}",
                        failures,
                        self.policy.max_attempts,
                        e
                    );
                    if failures >= self.policy.max_attempts {
                        self.link.set_status(ConnectionStatus::Disconnected).await;
                        return Err(FatalError::ReconnectExhausted(failures));
                    }
                }
            }

            log::info!("reconnecting in {:?}", self.policy.delay);
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                _ = sleep(self.policy.delay) => {}
            }
        }
    }

    /// Consume one session's events until it closes or shutdown arrives.
    /// Returns how it ended and whether the connection ever opened.
    async fn drive_session(
        &self,
        mut session: Session,
        shutdown: &CancellationToken,
    ) -> (SessionEnd, bool) {
        let mut opened = false;
        let mut dispatcher = Dispatcher::new(self.interpreter.clone(), session.handle.clone());

        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => {
                    self.link.set_status(ConnectionStatus::Closing).await;
                    self.graceful_logout(session.handle.as_ref()).await;
                    return (SessionEnd::Shutdown, opened);
                }
                event = session.events.recv() => event,
            };
            let Some(event) = event else {
                return (SessionEnd::Closed(DisconnectReason::ConnectionLost), opened);
            };

            match event {
                TransportEvent::PairingCode(code) => {
                    log::info!("new pairing code issued, scan it from the status page");
                    self.link.set_code(Some(code)).await;
                    self.link.set_status(ConnectionStatus::Pairing).await;
                    if let Some(notifier) = &self.notifier {
                        let notifier = notifier.clone();
                        tokio::spawn(async move { notifier.notify().await });
                    }
                }
                TransportEvent::Open => {
                    log::info!("messaging session connected");
                    opened = true;
                    self.link.set_code(None).await;
                    self.link.set_status(ConnectionStatus::Connected).await;
                }
                TransportEvent::Closed(reason) => {
                    return (SessionEnd::Closed(reason), opened);
                }
                TransportEvent::CredentialsUpdate { name, data } => {
                    // Flushed here, before the next event is taken, so a
                    // crash never costs the pairing.
                    if let Err(e) = self.creds.save(&name, &data).await {
                        log::error!("failed to persist credential {:?}: {}", name, e);
                    }
                }
                TransportEvent::Message(message) => {
                    dispatcher.dispatch(message).await;
                }
            }
        }
    }

    async fn graceful_logout(&self, handle: &dyn TransportHandle) {
        log::info!("shutting down, logging out of the messaging session");
        match timeout(Duration::from_secs(LOGOUT_WAIT_SECONDS), handle.logout()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::warn!("logout failed: {}", e),
            Err(_) => log::warn!("logout timed out"),
        }
    }
}

/// Fans inbound messages out to one worker task per conversation, so a
/// suspended reply in one chat never stalls the others while each
/// conversation keeps strictly sequential handling.
struct Dispatcher {
    interpreter: Arc<Interpreter>,
    handle: Arc<dyn TransportHandle>,
    workers: HashMap<String, mpsc::Sender<InboundMessage>>,
}

impl Dispatcher {
    fn new(interpreter: Arc<Interpreter>, handle: Arc<dyn TransportHandle>) -> Self {
        Self {
            interpreter,
            handle,
            workers: HashMap::new(),
        }
    }

    async fn dispatch(&mut self, message: InboundMessage) {
        let conversation = message.conversation.clone();
        let message = match self.workers.get(&conversation) {
            Some(tx) => match tx.send(message).await {
                Ok(()) => return,
                Err(rejected) => rejected.0,
            },
            None => message,
        };

        let (tx, mut rx) = mpsc::channel::<InboundMessage>(32);
        let interpreter = self.interpreter.clone();
        let handle = self.handle.clone();
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if let Some(reply) = interpreter.handle_message(&message).await {
                    if let Err(e) = handle.send_text(&message.conversation, &reply).await {
                        log::error!("failed to send reply to {}: {}", message.conversation, e);
                    }
                }
            }
        });
        if tx.send(message).await.is_err() {
            log::error!("conversation worker for {} rejected its first message", conversation);
        }
        self.workers.insert(conversation, tx);
    }
}
