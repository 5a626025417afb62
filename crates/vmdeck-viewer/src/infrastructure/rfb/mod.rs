//! RFB client session over TCP.
//!
//! Architecture:
//! - `RfbSession` owns the connection state as a tagged [`Phase`]; every
//!   operation matches on the current phase instead of checking optional
//!   fields.
//! - `connect` runs the handshake under a timeout, then splits the socket.
//!   The read half moves into a spawned update loop; the write half sits
//!   behind an async mutex shared by the loop and input injection, so
//!   multi-field writes never interleave.
//! - Decoded frames are handed over through a `watch` channel: a single
//!   slot where a new frame replaces any frame nobody has looked at yet.
//! - `disconnect` marks the session closed and signals the loop, which
//!   drops the read half and exits.

mod handshake;
mod update_loop;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::time;
use tracing::{debug, info, warn};
use vmdeck_core::protocol::{encode_client_message, ClientMessage, ProtocolVersion};
use vmdeck_core::{CursorShape, Framebuffer, ProtocolError};

use crate::application::forward_input::InputSink;
use update_loop::UpdateLoop;

/// Errors raised by an RFB session.
#[derive(Debug, Error)]
pub enum RfbError {
    /// The TCP connection could not be opened.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    /// Connect plus handshake took longer than the configured limit.
    #[error("handshake did not complete within {0:?}")]
    Timeout(Duration),
    /// The server sent bytes this client cannot parse or accept.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    /// The server offered no security types and sent this reason.
    #[error("server rejected the connection: {0}")]
    Rejected(String),
    /// The server does not offer the "None" security type.
    #[error("no supported security type offered (server offered {0:?})")]
    NoSupportedSecurity(Vec<u8>),
    /// The server reported a failed security result.
    #[error("security handshake failed: {0}")]
    SecurityFailed(String),
    /// An I/O error occurred on the established connection.
    #[error("connection I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The session is not connected.
    #[error("session is not connected")]
    NotConnected,
    /// The session was closed while the handshake was in progress.
    #[error("session closed during handshake")]
    Closed,
    /// `connect` was called on a session that has already been used.
    #[error("session has already been started")]
    AlreadyStarted,
}

/// Tunables for a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Upper bound for TCP connect plus the whole handshake.
    pub handshake_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(5),
        }
    }
}

/// What the server told us during the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesktopInfo {
    pub version: ProtocolVersion,
    pub width: u16,
    pub height: u16,
    pub name: String,
}

/// Observable connection state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    /// Handshake or read-loop failure, with the reason.
    Failed(String),
    Closed,
}

/// Resources that exist only while connected.
struct Link {
    writer: Arc<AsyncMutex<OwnedWriteHalf>>,
    shutdown: watch::Sender<bool>,
}

enum Phase {
    Idle,
    Connecting,
    Connected(Link),
    Failed(String),
    Closed,
}

/// State shared between the session handle and its update loop.
pub(crate) struct Shared {
    config: SessionConfig,
    phase: Mutex<Phase>,
    /// Last pointer position sent, packed as `x << 16 | y`.
    pointer: AtomicU32,
    frames: watch::Sender<Option<Arc<Framebuffer>>>,
}

impl Shared {
    fn new(config: SessionConfig) -> Self {
        let (frames, _) = watch::channel(None);
        Self {
            config,
            phase: Mutex::new(Phase::Idle),
            pointer: AtomicU32::new(0),
            frames,
        }
    }

    fn phase(&self) -> MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> SessionState {
        match &*self.phase() {
            Phase::Idle => SessionState::Idle,
            Phase::Connecting => SessionState::Connecting,
            Phase::Connected(_) => SessionState::Connected,
            Phase::Failed(reason) => SessionState::Failed(reason.clone()),
            Phase::Closed => SessionState::Closed,
        }
    }

    /// Moves to Failed unless the session was already closed on purpose.
    fn fail(&self, reason: String) {
        let mut phase = self.phase();
        if matches!(*phase, Phase::Closed) {
            return;
        }
        warn!(%reason, "rfb session failed");
        *phase = Phase::Failed(reason);
    }

    fn set_pointer(&self, x: u16, y: u16) {
        self.pointer
            .store(((x as u32) << 16) | y as u32, Ordering::Relaxed);
    }

    fn pointer(&self) -> (u16, u16) {
        let packed = self.pointer.load(Ordering::Relaxed);
        ((packed >> 16) as u16, packed as u16)
    }

    fn publish(&self, frame: Framebuffer) {
        self.frames.send_replace(Some(Arc::new(frame)));
    }

    fn subscribe(&self) -> watch::Receiver<Option<Arc<Framebuffer>>> {
        self.frames.subscribe()
    }
}

/// A single-use client session against one RFB server.
pub struct RfbSession {
    shared: Arc<Shared>,
}

impl RfbSession {
    /// Creates an idle session.
    pub fn new(config: SessionConfig) -> Self {
        Self {
            shared: Arc::new(Shared::new(config)),
        }
    }

    /// Current connection state.
    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Receiver for the latest composited frame.
    ///
    /// Holds `None` until the handshake has completed.
    pub fn frames(&self) -> watch::Receiver<Option<Arc<Framebuffer>>> {
        self.shared.subscribe()
    }

    /// Connects to `host:port`, performs the handshake and starts the
    /// update loop.
    ///
    /// # Errors
    ///
    /// Any handshake failure moves the session to Failed and is returned.
    /// Calling `connect` on a session that is not idle returns
    /// [`RfbError::AlreadyStarted`].
    pub async fn connect(&self, host: &str, port: u16) -> Result<DesktopInfo, RfbError> {
        {
            let mut phase = self.shared.phase();
            if !matches!(*phase, Phase::Idle) {
                return Err(RfbError::AlreadyStarted);
            }
            *phase = Phase::Connecting;
        }

        let limit = self.shared.config.handshake_timeout;
        let opened = match time::timeout(limit, open(host, port)).await {
            Ok(result) => result,
            Err(_) => Err(RfbError::Timeout(limit)),
        };
        let (stream, desktop) = match opened {
            Ok(opened) => opened,
            Err(e) => {
                self.shared.fail(e.to_string());
                return Err(e);
            }
        };

        let (reader, writer) = stream.into_split();
        let writer = Arc::new(AsyncMutex::new(writer));
        let (shutdown, shutdown_rx) = watch::channel(false);
        {
            let mut phase = self.shared.phase();
            if !matches!(*phase, Phase::Connecting) {
                return Err(RfbError::Closed);
            }
            *phase = Phase::Connected(Link {
                writer: Arc::clone(&writer),
                shutdown,
            });
        }

        let framebuffer = Framebuffer::new(desktop.width, desktop.height);
        self.shared.publish(framebuffer.clone());
        let update_loop = UpdateLoop {
            reader,
            writer,
            shared: Arc::clone(&self.shared),
            framebuffer,
            cursor: CursorShape::default_arrow(),
        };
        tokio::spawn(update_loop.run(shutdown_rx));

        info!(host, port, "rfb session connected");
        Ok(desktop)
    }

    /// Sends a key press or release.
    ///
    /// A failed write is logged and returned but leaves the session state
    /// untouched; only the read loop decides that a session has failed.
    pub async fn send_key(&self, keysym: u32, down: bool) -> Result<(), RfbError> {
        self.send(ClientMessage::KeyEvent { down, keysym }).await
    }

    /// Sends a pointer event and records `(x, y)` for cursor compositing.
    pub async fn send_pointer(&self, x: u16, y: u16, button_mask: u8) -> Result<(), RfbError> {
        self.shared.set_pointer(x, y);
        self.send(ClientMessage::PointerEvent { button_mask, x, y })
            .await
    }

    async fn send(&self, msg: ClientMessage) -> Result<(), RfbError> {
        let writer = match &*self.shared.phase() {
            Phase::Connected(link) => Arc::clone(&link.writer),
            _ => return Err(RfbError::NotConnected),
        };
        let bytes = encode_client_message(&msg);
        let mut writer = writer.lock().await;
        if let Err(e) = writer.write_all(&bytes).await {
            warn!(error = %e, "failed to send input event");
            return Err(e.into());
        }
        Ok(())
    }

    /// Closes the session.
    ///
    /// The update loop observes the shutdown signal and exits, dropping the
    /// read half; the write half is shut down here.  A failed session keeps
    /// its failure reason.  Idempotent.
    pub async fn disconnect(&self) {
        let previous = {
            let mut phase = self.shared.phase();
            if matches!(*phase, Phase::Failed(_)) {
                return;
            }
            std::mem::replace(&mut *phase, Phase::Closed)
        };
        if let Phase::Connected(link) = previous {
            link.shutdown.send_replace(true);
            if let Err(e) = link.writer.lock().await.shutdown().await {
                debug!(error = %e, "socket shutdown failed");
            }
            info!("rfb session closed");
        }
    }
}

impl Drop for RfbSession {
    fn drop(&mut self) {
        let mut phase = self.shared.phase();
        if let Phase::Connected(link) = &*phase {
            link.shutdown.send_replace(true);
        }
        if matches!(*phase, Phase::Connected(_) | Phase::Connecting) {
            *phase = Phase::Closed;
        }
    }
}

#[async_trait]
impl InputSink for RfbSession {
    async fn key(&self, keysym: u32, down: bool) {
        // Failures are already logged by `send`.
        let _ = self.send_key(keysym, down).await;
    }

    async fn pointer(&self, x: u16, y: u16, button_mask: u8) {
        let _ = self.send_pointer(x, y, button_mask).await;
    }
}

async fn open(host: &str, port: u16) -> Result<(TcpStream, DesktopInfo), RfbError> {
    let mut stream = TcpStream::connect((host, port))
        .await
        .map_err(|source| RfbError::Connect {
            addr: format!("{host}:{port}"),
            source,
        })?;
    let desktop = handshake::perform(&mut stream).await?;
    Ok((stream, desktop))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_config_default_timeout_is_five_seconds() {
        assert_eq!(
            SessionConfig::default().handshake_timeout,
            Duration::from_secs(5)
        );
    }

    #[test]
    fn test_new_session_is_idle_without_frame() {
        // Arrange / Act
        let session = RfbSession::new(SessionConfig::default());

        // Assert
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.frames().borrow().is_none());
    }

    #[test]
    fn test_pointer_position_round_trips_through_packing() {
        let shared = Shared::new(SessionConfig::default());

        shared.set_pointer(0xABCD, 0x1234);

        assert_eq!(shared.pointer(), (0xABCD, 0x1234));
    }

    #[test]
    fn test_fail_does_not_override_closed() {
        let shared = Shared::new(SessionConfig::default());
        *shared.phase() = Phase::Closed;

        shared.fail("eof".to_string());

        assert_eq!(shared.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_send_key_before_connect_is_rejected() {
        let session = RfbSession::new(SessionConfig::default());

        let result = session.send_key(0x61, true).await;

        assert!(matches!(result, Err(RfbError::NotConnected)));
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_fails_session() {
        // Arrange: bind then drop a listener so the port refuses connections
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);
        let session = RfbSession::new(SessionConfig::default());

        // Act
        let result = session.connect("127.0.0.1", port).await;

        // Assert
        assert!(matches!(result, Err(RfbError::Connect { .. })));
        assert!(matches!(session.state(), SessionState::Failed(_)));
    }

    #[tokio::test]
    async fn test_disconnect_keeps_failure_reason() {
        let session = RfbSession::new(SessionConfig::default());
        session.shared.fail("server went away".to_string());

        session.disconnect().await;

        assert_eq!(
            session.state(),
            SessionState::Failed("server went away".to_string())
        );
    }

    #[tokio::test]
    async fn test_connect_twice_is_rejected() {
        let session = RfbSession::new(SessionConfig::default());
        *session.shared.phase() = Phase::Closed;

        let result = session.connect("127.0.0.1", 5900).await;

        assert!(matches!(result, Err(RfbError::AlreadyStarted)));
    }
}
