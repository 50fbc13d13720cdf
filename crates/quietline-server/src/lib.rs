//! Quietline relay server.
//!
//! Forwards end-to-end encrypted chat messages between connected users and
//! holds them in anonymous inboxes for users who are offline. The server never
//! sees plaintext and cannot tell which inbox belongs to which conversation.
//!
//! # Architecture
//!
//! ```text
//!              ┌────────────── ServerState ──────────────┐
//!  live ──────►│ Router ──► ConnectionRegistry (16 shards)│──► Deliver
//!  stream      │   │                                     │
//!              │   └──► InboxRelay ◄── RelayService ◄────│◄── RPC streams
//!              │          │ KeyedLocks     │             │
//!              │          ▼                ▼             │
//!              │        Storage ◄──── UserDirectory      │
//!              └─────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`ServerState`]: every component, constructed once and shared
//! - [`Server`]: QUIC runtime that feeds connections into the state
//! - [`QuinnTransport`]: QUIC endpoint via the quinn library
//! - [`Storage`]: persistence, [`MemoryStorage`] for tests and
//!   [`RedbStorage`] for deployments

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod directory;
mod error;
pub mod registry;
pub mod relay;
pub mod router;
pub mod service;
mod state;
pub mod storage;
mod transport;

use std::{path::PathBuf, sync::Arc, time::Duration};

use bytes::BytesMut;
pub use directory::UserDirectory;
pub use error::ServerError;
use quietline_core::SystemEnv;
use quietline_proto::{ErrorPayload, Frame, Payload, payloads::session::Hello};
use quinn::{RecvStream, SendStream};
pub use registry::{ConnectionRegistry, LiveConnection};
pub use relay::{InboxRelay, KeyedLocks, RelayError};
pub use router::{RouteOutcome, Router};
pub use service::RelayService;
pub use state::ServerState;
pub use storage::{MemoryStorage, RedbStorage, Storage, StorageError};
use tokio::sync::mpsc;
pub use transport::{QuinnConnection, QuinnTransport, read_frame, write_frame};

/// How long a rejected client gets to read the error before the server
/// closes the connection.
const REJECT_LINGER: Duration = Duration::from_secs(5);

/// Server configuration for the production runtime.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to (e.g., "0.0.0.0:4433")
    pub bind_address: String,
    /// Path to TLS certificate (PEM format)
    pub cert_path: Option<String>,
    /// Path to TLS private key (PEM format)
    pub key_path: Option<String>,
    /// redb database file; in-memory storage when absent
    pub db_path: Option<PathBuf>,
    /// Maximum concurrent live connections
    pub max_connections: usize,
    /// Frames buffered per live connection before direct delivery falls back
    /// to the inbox
    pub outbound_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:4433".to_string(),
            cert_path: None,
            key_path: None,
            db_path: None,
            max_connections: 10_000,
            outbound_capacity: 256,
        }
    }
}

/// Production quietline server.
///
/// Wraps [`ServerState`] with Quinn QUIC transport and the system environment.
pub struct Server<S: Storage> {
    state: Arc<ServerState<S, SystemEnv>>,
    transport: QuinnTransport,
    config: Arc<ServerConfig>,
}

impl<S: Storage> Server<S> {
    /// Create and bind a new server over `storage`.
    pub fn bind(config: ServerConfig, storage: S) -> Result<Self, ServerError> {
        if config.outbound_capacity == 0 {
            return Err(ServerError::Config("outbound capacity must be at least 1".to_string()));
        }

        let transport = QuinnTransport::bind(
            &config.bind_address,
            config.cert_path.as_deref(),
            config.key_path.as_deref(),
        )?;
        let state = Arc::new(ServerState::new(storage, SystemEnv::new()));

        Ok(Self { state, transport, config: Arc::new(config) })
    }

    /// Shared state, for inspection.
    pub fn state(&self) -> &Arc<ServerState<S, SystemEnv>> {
        &self.state
    }

    /// Local address the server is bound to.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr, ServerError> {
        self.transport.local_addr()
    }

    /// Run the server, accepting connections until the endpoint closes.
    pub async fn run(self) -> Result<(), ServerError> {
        tracing::info!(addr = %self.transport.local_addr()?, "server starting");

        while let Some(accepted) = self.transport.accept().await {
            let conn = match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    continue;
                },
            };

            let state = Arc::clone(&self.state);
            let config = Arc::clone(&self.config);
            tokio::spawn(async move {
                let remote = conn.remote_addr();
                if let Err(e) = handle_connection(conn, state, config).await {
                    tracing::debug!(%remote, error = %e, "connection ended with error");
                }
            });
        }

        tracing::info!("endpoint closed");
        Ok(())
    }
}

/// Handle a single QUIC connection.
///
/// The first bidirectional stream is the live stream. It opens with `Hello`,
/// which the server answers with a `Challenge` the client must sign before
/// it is let in. Every later stream is one relay call.
async fn handle_connection<S: Storage>(
    conn: QuinnConnection,
    state: Arc<ServerState<S, SystemEnv>>,
    config: Arc<ServerConfig>,
) -> Result<(), ServerError> {
    let (mut send, mut recv) = conn.accept_bi().await?;
    let mut buf = BytesMut::new();

    let Some(first) = read_frame(&mut recv, &mut buf).await? else {
        return Ok(());
    };

    let hello = match Payload::from_frame(&first) {
        Ok(Payload::Hello(hello)) => hello,
        Ok(other) => {
            let msg = format!("expected Hello, got {}", other.name());
            reject(&conn, &mut send, ErrorPayload::unauthorized(msg.clone())).await;
            return Err(ServerError::Protocol(msg));
        },
        Err(e) => {
            reject(&conn, &mut send, ErrorPayload::bad_request(e.to_string())).await;
            return Err(e.into());
        },
    };

    if state.registry().len() >= config.max_connections
        && !state.registry().is_online(&hello.username)
    {
        let full = ErrorPayload::new(ErrorPayload::INTERNAL, "server at capacity");
        reject(&conn, &mut send, full).await;
        tracing::warn!(username = %hello.username, "connection refused: at capacity");
        return Ok(());
    }

    let challenge = match state.challenge(&hello) {
        Ok(challenge) => challenge,
        Err(e) => {
            reject(&conn, &mut send, e.to_payload()).await;
            tracing::info!(username = %hello.username, error = %e, "hello refused");
            return Ok(());
        },
    };
    write_frame(&mut send, &Payload::Challenge(challenge.clone()).into_frame()?).await?;

    let Some(answer) = read_frame(&mut recv, &mut buf).await? else {
        return Ok(());
    };
    let response = match Payload::from_frame(&answer) {
        Ok(Payload::ChallengeResponse(response)) => response,
        Ok(other) => {
            let msg = format!("expected ChallengeResponse, got {}", other.name());
            reject(&conn, &mut send, ErrorPayload::unauthorized(msg.clone())).await;
            return Err(ServerError::Protocol(msg));
        },
        Err(e) => {
            reject(&conn, &mut send, ErrorPayload::bad_request(e.to_string())).await;
            return Err(e.into());
        },
    };

    let reply = match state.authenticate(&hello, &challenge, &response).await {
        Ok(reply) => reply,
        Err(e) => {
            reject(&conn, &mut send, e.to_payload()).await;
            tracing::info!(username = %hello.username, error = %e, "login refused");
            return Ok(());
        },
    };

    write_frame(&mut send, &Payload::HelloReply(reply).into_frame()?).await?;

    let Hello { username, .. } = hello;
    let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_capacity);
    let connection_id = state.attach(&username, outbound_tx.clone());
    tracing::info!(%username, remote = %conn.remote_addr(), "user online");

    let writer = tokio::spawn(write_loop(send, outbound_rx));
    let rpcs = tokio::spawn(accept_rpcs(conn.clone(), Arc::clone(&state), username.clone()));

    let result = live_loop(&state, &username, &mut recv, buf, &outbound_tx).await;

    state.detach(&username, connection_id);
    rpcs.abort();
    writer.abort();
    conn.close(0u32.into(), b"live stream closed");
    tracing::info!(%username, "user offline");

    result
}

/// Answer the login with an error and give the client time to read it
/// before the connection is dropped.
async fn reject(conn: &QuinnConnection, send: &mut SendStream, error: ErrorPayload) {
    let sent = match Payload::Error(error).into_frame() {
        Ok(frame) => write_frame(send, &frame).await,
        Err(e) => Err(e.into()),
    };
    if let Err(e) = sent {
        tracing::debug!(error = %e, "failed to send rejection");
    }
    let _ = send.finish();

    if tokio::time::timeout(REJECT_LINGER, conn.closed()).await.is_err() {
        conn.close(1u32.into(), b"rejected");
    }
}

/// Route every frame on the live stream until the client finishes it.
async fn live_loop<S: Storage>(
    state: &ServerState<S, SystemEnv>,
    username: &str,
    recv: &mut RecvStream,
    mut buf: BytesMut,
    outbound: &mpsc::Sender<Frame>,
) -> Result<(), ServerError> {
    while let Some(frame) = read_frame(recv, &mut buf).await? {
        let payload = match Payload::from_frame(&frame) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(username, error = %e, "undecodable live frame");
                answer_error(outbound, ErrorPayload::bad_request(e.to_string()));
                continue;
            },
        };

        match state.router().route(username, payload).await {
            Ok(outcome) => tracing::trace!(username, ?outcome, "routed"),
            Err(e) => {
                tracing::warn!(username, error = %e, "live frame rejected");
                answer_error(outbound, e.to_payload());
            },
        }
    }

    Ok(())
}

/// Best-effort error on the live stream. Dropped if the queue is full.
fn answer_error(outbound: &mpsc::Sender<Frame>, error: ErrorPayload) {
    if let Ok(frame) = Payload::Error(error).into_frame() {
        let _ = outbound.try_send(frame);
    }
}

async fn write_loop(mut send: SendStream, mut outbound: mpsc::Receiver<Frame>) {
    while let Some(frame) = outbound.recv().await {
        if let Err(e) = write_frame(&mut send, &frame).await {
            tracing::debug!(error = %e, "live stream write failed");
            return;
        }
    }
    let _ = send.finish();
}

async fn accept_rpcs<S: Storage>(
    conn: QuinnConnection,
    state: Arc<ServerState<S, SystemEnv>>,
    username: String,
) {
    loop {
        let (send, recv) = match conn.accept_bi().await {
            Ok(streams) => streams,
            Err(e) => {
                tracing::debug!(%username, error = %e, "rpc accept ended");
                return;
            },
        };

        let state = Arc::clone(&state);
        let username = username.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_rpc(&state, &username, send, recv).await {
                tracing::debug!(%username, error = %e, "rpc stream failed");
            }
        });
    }
}

/// Answer the single request carried by an RPC stream.
async fn serve_rpc<S: Storage>(
    state: &ServerState<S, SystemEnv>,
    username: &str,
    mut send: SendStream,
    mut recv: RecvStream,
) -> Result<(), ServerError> {
    let bytes = recv
        .read_to_end(Frame::LENGTH_SIZE + Frame::MAX_SIZE)
        .await
        .map_err(|e| ServerError::Transport(format!("rpc read failed: {e}")))?;

    let response = match Frame::decode(&bytes) {
        Ok(frame) => state.service().handle_frame(username, &frame).await,
        Err(e) => Payload::Error(ErrorPayload::bad_request(e.to_string())),
    };

    write_frame(&mut send, &response.into_frame()?).await?;
    send.finish().map_err(|e| ServerError::Transport(format!("rpc finish failed: {e}")))?;
    Ok(())
}
