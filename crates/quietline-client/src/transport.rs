//! QUIC transport for the client.
//!
//! [`connect`] opens the live duplex stream, answers the server's login
//! challenge with a signature from the local identity and bridges the stream to a pair of frame channels. [`QuicRelay`] runs each
//! relay call on its own bidirectional stream: one request frame, one
//! response frame.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::BytesMut;
use quietline_core::{ChatError, LocalIdentity};
use quietline_proto::{
    ALPN_PROTOCOL, ChatNotification, Frame, InboxId, Payload, PublicIdentity, SealedToken,
    StoredMessage,
    payloads::{
        relay::{FetchMessages, FetchToken, NotifyInbox, ResolveUser, SearchUsers},
        session::{ChallengeResponse, Hello},
    },
};
use quinn::{Connection, Endpoint, RecvStream, SendStream};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::{
    config::ClientConfig,
    relay_api::{RelayApi, error_from_status},
};

const READ_CHUNK: usize = 16 * 1024;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Stream error.
    #[error("stream error: {0}")]
    Stream(String),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Server refused the handshake.
    #[error("handshake rejected ({status}): {message}")]
    Rejected {
        /// Status code from the server
        status: u16,
        /// Server message
        message: String,
    },
}

impl From<TransportError> for ChatError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Rejected { status, message } => {
                error_from_status(&quietline_proto::ErrorPayload::new(status, message))
            },
            TransportError::Protocol(msg) => ChatError::BadFormat(msg),
            TransportError::Connection(msg) | TransportError::Stream(msg) => {
                ChatError::TransientIo(msg)
            },
        }
    }
}

/// Handle to an authenticated connection.
///
/// Frames written to `to_server` go out on the live stream; frames read from
/// it arrive on `from_server`. `relay` issues relay calls over the same
/// connection.
pub struct ConnectedClient {
    /// Send frames on the live stream.
    pub to_server: mpsc::Sender<Frame>,
    /// Frames received on the live stream.
    pub from_server: mpsc::Receiver<Frame>,
    /// Relay calls over this connection.
    pub relay: QuicRelay,
    /// Server wall clock reported in the handshake.
    pub server_time: u64,
    abort_handles: Vec<tokio::task::AbortHandle>,
}

impl ConnectedClient {
    /// Stop the connection.
    pub fn stop(&self) {
        for handle in &self.abort_handles {
            handle.abort();
        }
        self.relay.connection.close(0u32.into(), b"client stopped");
    }
}

/// Connect to a quietline server and log in as `identity`.
///
/// # Errors
///
/// - `Connection` if the QUIC handshake fails
/// - `Rejected` if the server refuses the login
pub async fn connect(
    server_addr: &str,
    identity: &LocalIdentity,
    config: &ClientConfig,
) -> Result<ConnectedClient, TransportError> {
    let addr: SocketAddr = server_addr
        .parse()
        .map_err(|e| TransportError::Connection(format!("invalid address: {e}")))?;

    let bind: SocketAddr = SocketAddr::from(([0, 0, 0, 0], 0));
    let mut endpoint = Endpoint::client(bind)
        .map_err(|e| TransportError::Connection(format!("endpoint creation failed: {e}")))?;
    endpoint.set_default_client_config(insecure_client_config()?);

    let connection = endpoint
        .connect(addr, "localhost")
        .map_err(|e| TransportError::Connection(format!("connect failed: {e}")))?
        .await
        .map_err(|e| TransportError::Connection(format!("connection failed: {e}")))?;

    let (mut send, mut recv) = connection
        .open_bi()
        .await
        .map_err(|e| TransportError::Connection(format!("live stream open failed: {e}")))?;

    let username = identity.username().to_string();
    let hello = Hello { username: username.clone(), identity: identity.public() };
    write_frame(&mut send, Payload::Hello(hello)).await?;

    let mut buf = BytesMut::with_capacity(READ_CHUNK);
    let challenge = match handshake_reply(&mut recv, &mut buf).await? {
        Payload::Challenge(challenge) => challenge,
        other => {
            let msg = format!("expected Challenge, got {}", other.name());
            return Err(TransportError::Protocol(msg));
        },
    };
    let signature = identity.sign_login(&challenge.nonce).to_vec();
    write_frame(&mut send, Payload::ChallengeResponse(ChallengeResponse { signature })).await?;

    let server_time = match handshake_reply(&mut recv, &mut buf).await? {
        Payload::HelloReply(reply) => reply.server_time,
        other => {
            let msg = format!("expected HelloReply, got {}", other.name());
            return Err(TransportError::Protocol(msg));
        },
    };

    tracing::info!(username = %username, server = %addr, "connected");

    let (to_server_tx, to_server_rx) = mpsc::channel::<Frame>(config.outbound_capacity);
    let (from_server_tx, from_server_rx) = mpsc::channel::<Frame>(config.outbound_capacity);

    let writer = tokio::spawn(write_loop(send, to_server_rx));
    let reader = tokio::spawn(read_loop(recv, buf, from_server_tx));

    Ok(ConnectedClient {
        to_server: to_server_tx,
        from_server: from_server_rx,
        relay: QuicRelay { connection },
        server_time,
        abort_handles: vec![writer.abort_handle(), reader.abort_handle()],
    })
}

/// Next handshake frame, with an `Error` answer turned into `Rejected`.
async fn handshake_reply(
    recv: &mut RecvStream,
    buf: &mut BytesMut,
) -> Result<Payload, TransportError> {
    let frame = read_frame(recv, buf)
        .await?
        .ok_or_else(|| TransportError::Stream("stream closed during handshake".to_string()))?;

    match Payload::from_frame(&frame) {
        Ok(Payload::Error(e)) => {
            Err(TransportError::Rejected { status: e.status, message: e.message })
        },
        Ok(payload) => Ok(payload),
        Err(e) => Err(TransportError::Protocol(e.to_string())),
    }
}

async fn write_loop(mut send: SendStream, mut to_server: mpsc::Receiver<Frame>) {
    while let Some(frame) = to_server.recv().await {
        let bytes = match frame.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "dropping unencodable frame");
                continue;
            },
        };

        if let Err(e) = send.write_all(&bytes).await {
            tracing::warn!(error = %e, "live stream write failed");
            return;
        }
    }

    // Channel closed: finish the stream cleanly
    let _ = send.finish();
}

async fn read_loop(mut recv: RecvStream, mut buf: BytesMut, from_server: mpsc::Sender<Frame>) {
    loop {
        match read_frame(&mut recv, &mut buf).await {
            Ok(Some(frame)) => {
                if from_server.send(frame).await.is_err() {
                    return;
                }
            },
            Ok(None) => {
                tracing::debug!("live stream finished by server");
                return;
            },
            Err(e) => {
                tracing::warn!(error = %e, "live stream read failed");
                return;
            },
        }
    }
}

/// Read one frame, buffering partial input in `buf`.
///
/// Returns `None` when the stream ends on a frame boundary.
async fn read_frame(
    recv: &mut RecvStream,
    buf: &mut BytesMut,
) -> Result<Option<Frame>, TransportError> {
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        if let Some(frame) =
            Frame::decode_from(buf).map_err(|e| TransportError::Protocol(e.to_string()))?
        {
            return Ok(Some(frame));
        }

        match recv.read(&mut chunk).await {
            Ok(Some(n)) => buf.extend_from_slice(&chunk[..n]),
            Ok(None) if buf.is_empty() => return Ok(None),
            Ok(None) => {
                return Err(TransportError::Stream("stream ended mid-frame".to_string()));
            },
            Err(e) => return Err(TransportError::Stream(e.to_string())),
        }
    }
}

async fn write_frame(send: &mut SendStream, payload: Payload) -> Result<(), TransportError> {
    let frame = payload.into_frame().map_err(|e| TransportError::Protocol(e.to_string()))?;
    let bytes = frame.to_bytes().map_err(|e| TransportError::Protocol(e.to_string()))?;

    send.write_all(&bytes).await.map_err(|e| TransportError::Stream(format!("write failed: {e}")))
}

/// Relay client over QUIC.
#[derive(Debug, Clone)]
pub struct QuicRelay {
    connection: Connection,
}

impl QuicRelay {
    /// Issue one request and wait for its response.
    async fn call(&self, request: Payload) -> Result<Payload, ChatError> {
        let name = request.name();
        let (mut send, mut recv) = self
            .connection
            .open_bi()
            .await
            .map_err(|e| ChatError::TransientIo(format!("open stream for {name}: {e}")))?;

        write_frame(&mut send, request).await?;
        send.finish().map_err(|e| ChatError::TransientIo(format!("finish {name}: {e}")))?;

        let bytes = recv
            .read_to_end(Frame::LENGTH_SIZE + Frame::MAX_SIZE)
            .await
            .map_err(|e| ChatError::TransientIo(format!("read {name} response: {e}")))?;

        match Payload::from_frame(&Frame::decode(&bytes)?)? {
            Payload::Error(e) => Err(error_from_status(&e)),
            reply => Ok(reply),
        }
    }
}

fn unexpected(reply: &Payload) -> ChatError {
    ChatError::BadFormat(format!("unexpected relay reply: {}", reply.name()))
}

#[async_trait]
impl RelayApi for QuicRelay {
    async fn create_inbox(&self) -> Result<InboxId, ChatError> {
        match self.call(Payload::CreateInbox).await? {
            Payload::InboxCreated(created) => Ok(created.inbox_id),
            other => Err(unexpected(&other)),
        }
    }

    async fn notify_inbox(&self, notify: NotifyInbox) -> Result<(), ChatError> {
        match self.call(Payload::NotifyInbox(notify)).await? {
            Payload::Ack => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    async fn fetch_new_chats(&self) -> Result<Vec<ChatNotification>, ChatError> {
        match self.call(Payload::FetchNewChats).await? {
            Payload::NewChats(new) => Ok(new.chats),
            other => Err(unexpected(&other)),
        }
    }

    async fn fetch_token(&self, inbox: InboxId) -> Result<Option<SealedToken>, ChatError> {
        match self.call(Payload::FetchToken(FetchToken { inbox_id: inbox })).await? {
            Payload::Token(token) => Ok(token.token),
            other => Err(unexpected(&other)),
        }
    }

    async fn fetch_messages(
        &self,
        inbox: InboxId,
        token: Vec<u8>,
    ) -> Result<Vec<StoredMessage>, ChatError> {
        let request = Payload::FetchMessages(FetchMessages { inbox_id: inbox, token });
        match self.call(request).await? {
            Payload::Messages(messages) => Ok(messages.messages),
            other => Err(unexpected(&other)),
        }
    }

    async fn resolve_user(&self, username: &str) -> Result<PublicIdentity, ChatError> {
        let request = Payload::ResolveUser(ResolveUser { username: username.to_string() });
        match self.call(request).await? {
            Payload::UserInfo(info) => Ok(info.identity),
            other => Err(unexpected(&other)),
        }
    }

    async fn search_users(
        &self,
        query: &str,
        page: u32,
        size: u32,
    ) -> Result<Vec<String>, ChatError> {
        let request = Payload::SearchUsers(SearchUsers { query: query.to_string(), page, size });
        match self.call(request).await? {
            Payload::UserList(list) => Ok(list.usernames),
            other => Err(unexpected(&other)),
        }
    }
}

/// Client config that accepts any server certificate.
///
/// Development only; certificate issuance is left to the deployment.
fn insecure_client_config() -> Result<quinn::ClientConfig, TransportError> {
    let mut crypto = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(InsecureCertVerifier))
        .with_no_client_auth();

    crypto.alpn_protocols = vec![ALPN_PROTOCOL.to_vec()];

    let quic = quinn::crypto::rustls::QuicClientConfig::try_from(crypto)
        .map_err(|e| TransportError::Connection(format!("tls config: {e}")))?;
    let mut config = quinn::ClientConfig::new(Arc::new(quic));

    let idle = Duration::from_secs(60)
        .try_into()
        .map_err(|e| TransportError::Connection(format!("idle timeout: {e}")))?;
    let mut transport = quinn::TransportConfig::default();
    transport.max_idle_timeout(Some(idle));
    config.transport_config(Arc::new(transport));

    Ok(config)
}

/// Certificate verifier that accepts any certificate.
#[derive(Debug)]
struct InsecureCertVerifier;

impl rustls::client::danger::ServerCertVerifier for InsecureCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::ED25519,
        ]
    }
}
