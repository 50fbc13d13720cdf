//! Live-stream routing.
//!
//! A `Send` goes straight to the receiver's live stream when it is connected
//! and its queue has room. Otherwise it is queued in the inbox under a token
//! sealed to the receiver. The router never waits on a receiver.

use std::sync::Arc;

use quietline_core::Environment;
use quietline_crypto::KemPublicKey;
use quietline_proto::{Deliver, Payload, SendMessage, StoredMessage};

use crate::{
    directory::UserDirectory,
    registry::ConnectionRegistry,
    relay::{InboxRelay, RelayError},
    storage::Storage,
};

/// What happened to a live-stream frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Forwarded to the receiver's live stream
    Delivered,
    /// Stored in the inbox for later retrieval
    Queued,
    /// Heartbeat, nothing to do
    Absorbed,
}

/// Routes live-stream frames from authenticated users.
pub struct Router<S: Storage, E: Environment> {
    registry: Arc<ConnectionRegistry>,
    relay: Arc<InboxRelay<S, E>>,
    directory: Arc<UserDirectory<S>>,
}

impl<S: Storage, E: Environment> Router<S, E> {
    /// Create a router over the shared registry, relay and directory.
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        relay: Arc<InboxRelay<S, E>>,
        directory: Arc<UserDirectory<S>>,
    ) -> Self {
        Self { registry, relay, directory }
    }

    /// Route one payload received on `sender`'s live stream.
    ///
    /// # Errors
    ///
    /// - `BadRequest` for anything but `Send` or `Heartbeat`
    /// - `NotFound` if the receiver or inbox is unknown
    pub async fn route(&self, sender: &str, payload: Payload) -> Result<RouteOutcome, RelayError> {
        match payload {
            Payload::Send(send) => self.route_send(send).await,
            Payload::Heartbeat => Ok(RouteOutcome::Absorbed),
            other => Err(RelayError::BadRequest(format!(
                "{} is not allowed on the live stream of {sender}",
                other.name()
            ))),
        }
    }

    async fn route_send(&self, send: SendMessage) -> Result<RouteOutcome, RelayError> {
        if let Some(outbound) = self.registry.outbound(&send.receiver) {
            let deliver = Deliver {
                serial: send.serial,
                inbox_id: send.inbox_id,
                ciphertext: send.ciphertext.clone(),
            };
            let frame = Payload::Deliver(deliver)
                .into_frame()
                .map_err(|e| RelayError::BadRequest(e.to_string()))?;

            if outbound.try_send(frame).is_ok() {
                return Ok(RouteOutcome::Delivered);
            }
        }

        let identity = self.directory.resolve(&send.receiver)?;
        let kem_key = KemPublicKey::from_bytes(&identity.kem_key)
            .map_err(|e| RelayError::BadRequest(e.to_string()))?;

        let message = StoredMessage { serial: send.serial, ciphertext: send.ciphertext };
        self.relay.enqueue(send.inbox_id, &kem_key, &message).await?;

        Ok(RouteOutcome::Queued)
    }
}

#[cfg(test)]
mod tests {
    use quietline_core::{LocalIdentity, testing::SeededEnv};
    use quietline_crypto::IdentityKeys;
    use quietline_proto::InboxId;
    use tokio::sync::mpsc;

    use super::*;
    use crate::{registry::LiveConnection, storage::MemoryStorage};

    struct Fixture {
        router: Router<MemoryStorage, SeededEnv>,
        registry: Arc<ConnectionRegistry>,
        relay: Arc<InboxRelay<MemoryStorage, SeededEnv>>,
        inbox: InboxId,
    }

    async fn fixture() -> Fixture {
        let storage = MemoryStorage::new();
        let registry = Arc::new(ConnectionRegistry::new());
        let relay = Arc::new(InboxRelay::new(storage.clone(), SeededEnv::new(3)));
        let directory = Arc::new(UserDirectory::new(storage));

        let bob = LocalIdentity::new("bob", IdentityKeys::from_seeds([5; 32], [6; 32]));
        directory.register("bob", &bob.public()).await.unwrap();
        let inbox = relay.create_inbox().await.unwrap();

        let router = Router::new(Arc::clone(&registry), Arc::clone(&relay), directory);
        Fixture { router, registry, relay, inbox }
    }

    fn send(inbox: InboxId, serial: u64) -> Payload {
        Payload::Send(SendMessage {
            serial,
            receiver: "bob".to_string(),
            inbox_id: inbox,
            ciphertext: vec![0xCC; 48],
        })
    }

    #[tokio::test]
    async fn online_receiver_gets_deliver() {
        let f = fixture().await;
        let (outbound, mut rx) = mpsc::channel(4);
        f.registry.register("bob", LiveConnection { id: 1, outbound });

        let outcome = f.router.route("alice", send(f.inbox, 9)).await.unwrap();
        assert_eq!(outcome, RouteOutcome::Delivered);

        let frame = rx.recv().await.unwrap();
        match Payload::from_frame(&frame).unwrap() {
            Payload::Deliver(d) => {
                assert_eq!(d.serial, 9);
                assert_eq!(d.inbox_id, f.inbox);
            },
            other => panic!("expected Deliver, got {}", other.name()),
        }
        assert_eq!(f.relay.storage().total_message_count(), 0);
    }

    #[tokio::test]
    async fn offline_receiver_is_queued() {
        let f = fixture().await;

        let outcome = f.router.route("alice", send(f.inbox, 1)).await.unwrap();
        assert_eq!(outcome, RouteOutcome::Queued);
        assert_eq!(f.relay.storage().total_message_count(), 1);
        assert!(f.relay.get_token(f.inbox).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn full_receiver_falls_back_to_inbox() {
        let f = fixture().await;
        let (outbound, _rx) = mpsc::channel(1);
        f.registry.register("bob", LiveConnection { id: 1, outbound });

        let first = f.router.route("alice", send(f.inbox, 1)).await.unwrap();
        let second = f.router.route("alice", send(f.inbox, 2)).await.unwrap();
        assert_eq!(first, RouteOutcome::Delivered);
        assert_eq!(second, RouteOutcome::Queued);
        assert_eq!(f.relay.storage().total_message_count(), 1);
    }

    #[tokio::test]
    async fn heartbeat_absorbed_and_other_payloads_rejected() {
        let f = fixture().await;

        let outcome = f.router.route("alice", Payload::Heartbeat).await.unwrap();
        assert_eq!(outcome, RouteOutcome::Absorbed);
        assert!(matches!(
            f.router.route("alice", Payload::CreateInbox).await,
            Err(RelayError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn unknown_receiver_is_not_found() {
        let f = fixture().await;
        let payload = Payload::Send(SendMessage {
            serial: 0,
            receiver: "mallory".to_string(),
            inbox_id: f.inbox,
            ciphertext: vec![],
        });

        assert!(matches!(f.router.route("alice", payload).await, Err(RelayError::NotFound(_))));
    }
}
