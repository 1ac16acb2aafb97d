use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::ipc::crypto::{
    derive_handshake_key, generate_session_key, generate_session_token, SessionCrypto, KEY_LEN,
};
use crate::ipc::frame::{read_frame, read_short_string, write_frame, write_short_string};
use crate::ipc::IpcError;
use crate::metrics::AgentMetrics;
use crate::record::TimelineListener;
use crate::timeline::TimelineEvent;

const EVENT_CHANNEL_CAPACITY: usize = 256;
const RATE_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct IpcServerConfig {
    /// Named local socket the debugger UI connects to.
    pub socket_path: PathBuf,
    /// Messages a connection may send per minute before it is closed.
    pub max_messages_per_minute: u32,
}

impl IpcServerConfig {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            max_messages_per_minute: 1_000,
        }
    }
}

/// Streams timeline events, encrypted, to authenticated debugger clients.
///
/// Handshake: the client sends the session token; the server answers with
/// the session key encrypted under SHA-256(token), then the literal "OK".
/// All later traffic is AES-256-GCM frames under the session key.
pub struct IpcServer {
    config: IpcServerConfig,
    token: String,
    session_key: [u8; KEY_LEN],
    events: broadcast::Sender<TimelineEvent>,
    shutdown_tx: watch::Sender<bool>,
    metrics: Arc<AgentMetrics>,
}

impl IpcServer {
    pub fn new(config: IpcServerConfig, metrics: Arc<AgentMetrics>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            token: generate_session_token(),
            session_key: generate_session_key(),
            events,
            shutdown_tx,
            metrics,
        }
    }

    /// The session token, for the in-process host API only. Never logged.
    pub fn auth_token(&self) -> &str {
        &self.token
    }

    /// Queues an event for every connected client.
    pub fn publish(&self, event: TimelineEvent) {
        // No receivers is fine; the UI may not be attached.
        let _ = self.events.send(event);
    }

    /// A recorder listener that forwards every emitted event to this server.
    pub fn timeline_listener(&self) -> Arc<dyn TimelineListener> {
        Arc::new(BroadcastListener {
            tx: self.events.clone(),
        })
    }

    /// Binds the socket and starts accepting connections in a background
    /// task. In-flight connections close on their next read after `stop`.
    pub fn start(&self) -> Result<JoinHandle<()>, IpcError> {
        let path = self.config.socket_path.clone();
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let listener = UnixListener::bind(&path)?;
        tracing::info!(path = %path.display(), "ipc server listening");

        let token = self.token.clone();
        let session_key = self.session_key;
        let events = self.events.clone();
        let metrics = self.metrics.clone();
        let limit = self.config.max_messages_per_minute;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    accept = listener.accept() => {
                        match accept {
                            Ok((stream, _addr)) => {
                                let conn = Connection {
                                    token: token.clone(),
                                    session_key,
                                    events: events.subscribe(),
                                    metrics: metrics.clone(),
                                    limit,
                                    shutdown_rx: shutdown_rx.clone(),
                                };
                                tokio::spawn(async move {
                                    if let Err(err) = conn.run(stream).await {
                                        tracing::debug!(error = %err, "ipc connection closed");
                                    }
                                });
                            }
                            Err(err) => {
                                tracing::error!(error = %err, "ipc accept failed");
                            }
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::info!("ipc server shutting down");
                            break;
                        }
                    }
                }
            }
        }))
    }

    /// Flips the running flag; the accept loop and every connection observe
    /// it on their next wakeup.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

struct BroadcastListener {
    tx: broadcast::Sender<TimelineEvent>,
}

impl TimelineListener for BroadcastListener {
    fn on_event(&self, event: &TimelineEvent) {
        let _ = self.tx.send(event.clone());
    }
}

struct Connection {
    token: String,
    session_key: [u8; KEY_LEN],
    events: broadcast::Receiver<TimelineEvent>,
    metrics: Arc<AgentMetrics>,
    limit: u32,
    shutdown_rx: watch::Receiver<bool>,
}

impl Connection {
    async fn run(mut self, stream: UnixStream) -> Result<(), IpcError> {
        let (mut reader, mut writer) = stream.into_split();

        self.handshake(&mut reader, &mut writer).await?;

        // One encrypt and one decrypt cipher per connection, reused for
        // every frame.
        let encrypt = SessionCrypto::new(&self.session_key);
        let decrypt = SessionCrypto::new(&self.session_key);

        // Outbound events flow from their own task so a slow inbound read
        // never tears a frame apart.
        let mut events = self.events;
        let mut writer_shutdown = self.shutdown_rx.clone();
        let writer_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = events.recv() => {
                        match event {
                            Ok(event) => {
                                if forward_event(&mut writer, &encrypt, &event).await.is_err() {
                                    break;
                                }
                            }
                            Err(broadcast::error::RecvError::Lagged(missed)) => {
                                tracing::debug!(missed, "ipc client lagging; events skipped");
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                    _ = writer_shutdown.changed() => {
                        if *writer_shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        let mut window_start = Instant::now();
        let mut window_count: u32 = 0;
        let result = loop {
            tokio::select! {
                frame = read_frame(&mut reader) => {
                    let frame = match frame {
                        Ok(frame) => frame,
                        Err(err) => break Err(err),
                    };
                    if Instant::now().duration_since(window_start) >= RATE_WINDOW {
                        window_start = Instant::now();
                        window_count = 0;
                    }
                    window_count += 1;
                    if window_count > self.limit {
                        self.metrics.incr_rate_limit_closes();
                        tracing::warn!("ipc connection exceeded rate limit; closing");
                        break Err(IpcError::RateLimitExceeded);
                    }
                    // Client messages are opaque to the agent; decrypting
                    // validates authenticity, then they are dropped.
                    if let Err(err) = decrypt.open(&frame) {
                        break Err(err);
                    }
                }
                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        break Ok(());
                    }
                }
            }
        };

        writer_task.abort();
        result
    }

    /// Phase 1 and 2 of the wire protocol. A token mismatch closes the
    /// connection before any key material is written.
    async fn handshake(
        &self,
        reader: &mut OwnedReadHalf,
        writer: &mut OwnedWriteHalf,
    ) -> Result<(), IpcError> {
        let presented = read_short_string(reader).await?;
        if !token_matches(&self.token, &presented) {
            self.metrics.incr_auth_failures();
            tracing::warn!("ipc handshake rejected");
            return Err(IpcError::AuthenticationFailed);
        }

        let handshake_crypto = SessionCrypto::new(&derive_handshake_key(&self.token));
        let sealed_key = handshake_crypto.seal(&self.session_key)?;
        write_frame(writer, &sealed_key).await?;
        write_short_string(writer, "OK").await?;
        Ok(())
    }
}

async fn forward_event(
    writer: &mut OwnedWriteHalf,
    crypto: &SessionCrypto,
    event: &TimelineEvent,
) -> Result<(), IpcError> {
    let json = serde_json::to_vec(event)
        .map_err(|err| IpcError::InvalidFrame(format!("event serialization: {err}")))?;
    let sealed = crypto.seal(&json)?;
    write_frame(writer, &sealed).await
}

/// Constant-time token comparison over fixed-width digests, so neither
/// content nor length leaks through timing.
fn token_matches(expected: &str, presented: &str) -> bool {
    let a = Sha256::digest(expected.as_bytes());
    let b = Sha256::digest(presented.as_bytes());
    a.ct_eq(&b).into()
}
