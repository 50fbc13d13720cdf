//! Shared server state.
//!
//! Built once at startup and handed to every connection. Holds no global
//! lock: the registry is sharded and the relay locks per inbox and per
//! recipient.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use quietline_core::{Environment, PeerIdentity};
use quietline_proto::{
    Frame,
    payloads::session::{Challenge, ChallengeResponse, Hello, HelloReply},
};
use tokio::sync::mpsc;

use crate::{
    directory::UserDirectory,
    registry::{ConnectionRegistry, LiveConnection},
    relay::{InboxRelay, RelayError},
    router::Router,
    service::RelayService,
    storage::Storage,
};

/// Bytes of server randomness a client signs to log in.
pub const LOGIN_NONCE_SIZE: usize = 32;

/// Registry, relay, directory, router and RPC service over one storage
/// backend.
pub struct ServerState<S: Storage, E: Environment> {
    env: E,
    registry: Arc<ConnectionRegistry>,
    relay: Arc<InboxRelay<S, E>>,
    directory: Arc<UserDirectory<S>>,
    router: Router<S, E>,
    service: RelayService<S, E>,
    next_connection_id: AtomicU64,
}

impl<S: Storage, E: Environment> ServerState<S, E> {
    /// Wire up every component over `storage`.
    pub fn new(storage: S, env: E) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let relay = Arc::new(InboxRelay::new(storage.clone(), env.clone()));
        let directory = Arc::new(UserDirectory::new(storage));

        let router =
            Router::new(Arc::clone(&registry), Arc::clone(&relay), Arc::clone(&directory));
        let service = RelayService::new(Arc::clone(&relay), Arc::clone(&directory));

        Self {
            env,
            registry,
            relay,
            directory,
            router,
            service,
            next_connection_id: AtomicU64::new(1),
        }
    }

    /// Live connections.
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Inbox relay.
    pub fn relay(&self) -> &InboxRelay<S, E> {
        &self.relay
    }

    /// User directory.
    pub fn directory(&self) -> &UserDirectory<S> {
        &self.directory
    }

    /// Live-stream router.
    pub fn router(&self) -> &Router<S, E> {
        &self.router
    }

    /// Relay RPC service.
    pub fn service(&self) -> &RelayService<S, E> {
        &self.service
    }

    /// Answer a `Hello` with a fresh login challenge.
    ///
    /// # Errors
    ///
    /// - `BadRequest` for a malformed username or identity
    /// - `Conflict` if the username is pinned to another identity
    pub fn challenge(&self, hello: &Hello) -> Result<Challenge, RelayError> {
        self.directory.check(&hello.username, &hello.identity)?;
        PeerIdentity::from_public(&hello.username, &hello.identity)
            .map_err(|e| RelayError::BadRequest(e.to_string()))?;

        Ok(Challenge { nonce: self.env.random_array::<LOGIN_NONCE_SIZE>().to_vec() })
    }

    /// Verify the client's signature over `challenge`, then pin or check the
    /// identity in the directory.
    ///
    /// # Errors
    ///
    /// - `BadRequest` for a malformed username or identity
    /// - `Unauthorized` if the signature does not verify
    /// - `Conflict` if the username is pinned to another identity
    pub async fn authenticate(
        &self,
        hello: &Hello,
        challenge: &Challenge,
        response: &ChallengeResponse,
    ) -> Result<HelloReply, RelayError> {
        let peer = PeerIdentity::from_public(&hello.username, &hello.identity)
            .map_err(|e| RelayError::BadRequest(e.to_string()))?;
        if peer.verify_login(&challenge.nonce, &response.signature).is_err() {
            tracing::warn!(username = %hello.username, "login signature rejected");
            return Err(RelayError::Unauthorized("login signature does not verify".to_string()));
        }

        self.directory.register(&hello.username, &hello.identity).await?;

        Ok(HelloReply {
            username: hello.username.clone(),
            server_time: self.env.wall_clock_secs(),
        })
    }

    /// Register `outbound` as the live stream of `username`.
    ///
    /// A connection already registered for the same user is replaced. Returns
    /// the id to pass to [`Self::detach`].
    pub fn attach(&self, username: &str, outbound: mpsc::Sender<Frame>) -> u64 {
        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);

        if let Some(old) = self.registry.register(username, LiveConnection { id, outbound }) {
            tracing::info!(username, old = old.id, new = id, "live connection replaced");
        }
        id
    }

    /// Remove the live stream registered by [`Self::attach`], unless a newer
    /// connection has replaced it.
    pub fn detach(&self, username: &str, id: u64) {
        if self.registry.unregister(username, id) {
            tracing::debug!(username, id, "live connection removed");
        }
    }
}
