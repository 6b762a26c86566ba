//! `LiveServer` builder and accept loop.
//!
//! The network entry point for live play. It ties together the layers:
//! transport → protocol → identity → [`Duelhall`] (lobby + registry).

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use duelhall_identity::Authenticator;
use duelhall_lobby::Clock;
use duelhall_protocol::{Codec, JsonCodec};
use duelhall_store::{EphemeralStore, Store};
use duelhall_transport::{Transport, WebSocketTransport};

use crate::handler::handle_connection;
use crate::{DEFAULT_BIND, Duelhall, DuelhallError};

/// The current protocol version. Clients must send this in their
/// handshake or be rejected.
pub const PROTOCOL_VERSION: u32 = 1;

/// Shared state passed to each connection handler task.
pub(crate) struct ServerState<S: Store, E: EphemeralStore, C: Clock, A, K> {
    pub(crate) app: Duelhall<S, E, C>,
    pub(crate) auth: A,
    pub(crate) codec: K,
    pub(crate) handshake_timeout: Duration,
    pub(crate) read_timeout: Duration,
}

/// Builder for configuring and starting a [`LiveServer`].
///
/// # Example
///
/// ```rust,ignore
/// let server = LiveServerBuilder::new()
///     .bind("0.0.0.0:8080")
///     .build(app, JwtAuthenticator::new(secret))
///     .await?;
/// server.run().await
/// ```
pub struct LiveServerBuilder {
    bind_addr: String,
    handshake_timeout: Duration,
    read_timeout: Duration,
}

impl LiveServerBuilder {
    pub fn new() -> Self {
        Self {
            bind_addr: DEFAULT_BIND.to_string(),
            handshake_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(60),
        }
    }

    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    /// How long a new connection may take to send its handshake.
    ///
    /// Default: 5 seconds.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// A connection that sends nothing (not even a heartbeat) for this
    /// long is treated as disconnected.
    ///
    /// Default: 60 seconds.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Binds the listener. Uses `JsonCodec` and `WebSocketTransport`.
    pub async fn build<S, E, C, A>(
        self,
        app: Duelhall<S, E, C>,
        auth: A,
    ) -> Result<LiveServer<S, E, C, A, JsonCodec>, DuelhallError>
    where
        S: Store,
        E: EphemeralStore,
        C: Clock,
        A: Authenticator,
    {
        let transport = WebSocketTransport::bind(&self.bind_addr).await?;
        let state = Arc::new(ServerState {
            app,
            auth,
            codec: JsonCodec,
            handshake_timeout: self.handshake_timeout,
            read_timeout: self.read_timeout,
        });
        Ok(LiveServer { transport, state })
    }
}

impl Default for LiveServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound live server. Call [`run`](Self::run) to start accepting.
pub struct LiveServer<S: Store, E: EphemeralStore, C: Clock, A, K> {
    transport: WebSocketTransport,
    state: Arc<ServerState<S, E, C, A, K>>,
}

impl<S, E, C, A, K> LiveServer<S, E, C, A, K>
where
    S: Store,
    E: EphemeralStore,
    C: Clock,
    A: Authenticator,
    K: Codec,
{
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    /// Accepts connections until the process ends.
    pub async fn run(self) -> Result<(), DuelhallError> {
        self.run_until(std::future::pending()).await
    }

    /// Accepts connections until `shutdown` resolves, then closes every
    /// live session with `SessionClosed { status: shutdown }`.
    pub async fn run_until(
        mut self,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), DuelhallError> {
        tracing::info!(addr = ?self.local_addr().ok(), "live server running");
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.transport.accept() => match accepted {
                    Ok(conn) => {
                        let state = Arc::clone(&self.state);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(conn, state).await {
                                tracing::debug!(error = %e, "connection ended with error");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "accept failed");
                    }
                },
            }
        }

        let closed = self.state.app.registry().shutdown().await;
        tracing::info!(sessions = closed.len(), "live server stopped");
        Ok(())
    }
}
