//! Property-based tests for `InboxRelay`
//!
//! Token checks, FIFO order and notification consumption must hold for any
//! queue contents and any wrong token, not just the ones a scenario test
//! happens to pick.

use std::{collections::HashSet, future::Future, sync::Arc};

use proptest::prelude::*;
use quietline_core::{LocalIdentity, open_inbox_token, testing::SeededEnv};
use quietline_crypto::IdentityKeys;
use quietline_proto::{ChatNotification, StoredMessage};
use quietline_server::{InboxRelay, MemoryStorage, RelayError};

fn block_on<F: Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(future)
}

fn recipient() -> LocalIdentity {
    LocalIdentity::new("bob", IdentityKeys::from_seeds([1; 32], [2; 32]))
}

fn notification(tag: u8) -> ChatNotification {
    ChatNotification {
        enc_sender: vec![tag],
        enc_inbox_code: vec![tag],
        enc_signature: vec![tag],
        enc_serial: vec![tag],
        kem_ciphertext: vec![tag],
    }
}

fn messages_strategy() -> impl Strategy<Value = Vec<StoredMessage>> {
    prop::collection::vec(
        (any::<u64>(), prop::collection::vec(any::<u8>(), 0..64))
            .prop_map(|(serial, ciphertext)| StoredMessage { serial, ciphertext }),
        1..12,
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Property: a wrong token never reveals or disturbs the queue
    #[test]
    fn prop_wrong_token_is_unauthorized(
        seed in any::<u64>(),
        messages in messages_strategy(),
        guess in prop::collection::vec(any::<u8>(), 0..48),
    ) {
        block_on(async {
            let bob = recipient();
            let relay = InboxRelay::new(MemoryStorage::new(), SeededEnv::new(seed));
            let inbox = relay.create_inbox().await.unwrap();
            for message in &messages {
                relay.enqueue(inbox, bob.kem().public_key(), message).await.unwrap();
            }

            let sealed = relay.get_token(inbox).await.unwrap().unwrap();
            let token = open_inbox_token(&sealed, bob.kem()).unwrap();
            prop_assume!(guess != token);

            let result = relay.drain(inbox, &guess).await;
            prop_assert!(matches!(result, Err(RelayError::Unauthorized(_))));

            // ORACLE: queue and token exactly as before the failed attempt
            prop_assert_eq!(relay.storage().total_message_count(), messages.len());
            prop_assert_eq!(relay.get_token(inbox).await.unwrap(), Some(sealed));
            Ok::<(), TestCaseError>(())
        })?;
    }

    /// Property: the right token returns the queue in enqueue order
    #[test]
    fn prop_right_token_returns_fifo(seed in any::<u64>(), messages in messages_strategy()) {
        block_on(async {
            let bob = recipient();
            let relay = InboxRelay::new(MemoryStorage::new(), SeededEnv::new(seed));
            let inbox = relay.create_inbox().await.unwrap();
            for message in &messages {
                relay.enqueue(inbox, bob.kem().public_key(), message).await.unwrap();
            }

            let sealed = relay.get_token(inbox).await.unwrap().unwrap();
            let token = open_inbox_token(&sealed, bob.kem()).unwrap();

            prop_assert_eq!(relay.drain(inbox, &token).await.unwrap(), messages);
            prop_assert_eq!(relay.storage().total_message_count(), 0);

            // Retired: the same token no longer opens the inbox
            prop_assert!(matches!(
                relay.drain(inbox, &token).await,
                Err(RelayError::Unauthorized(_))
            ));
            Ok::<(), TestCaseError>(())
        })?;
    }

    /// Property: one token stays live until the queue is drained
    #[test]
    fn prop_enqueue_reuses_live_token(seed in any::<u64>(), count in 2usize..8) {
        block_on(async {
            let bob = recipient();
            let relay = InboxRelay::new(MemoryStorage::new(), SeededEnv::new(seed));
            let inbox = relay.create_inbox().await.unwrap();

            let mut sealed = HashSet::new();
            for serial in 0..count as u64 {
                let message = StoredMessage { serial, ciphertext: vec![] };
                relay.enqueue(inbox, bob.kem().public_key(), &message).await.unwrap();
                let token = relay.get_token(inbox).await.unwrap().unwrap();
                sealed.insert(token.enc_token);
            }

            prop_assert_eq!(sealed.len(), 1);
            Ok::<(), TestCaseError>(())
        })?;
    }

    /// Property: after take, a second take is empty
    #[test]
    fn prop_notifications_consumed_once(count in 0u8..10) {
        block_on(async {
            let relay = InboxRelay::new(MemoryStorage::new(), SeededEnv::new(0));
            for tag in 0..count {
                relay.notify_inbox("bob", &notification(tag)).await.unwrap();
            }
            relay.notify_inbox("carol", &notification(99)).await.unwrap();

            let first = relay.take_new_chats("bob").await.unwrap();
            let expected: Vec<_> = (0..count).map(notification).collect();
            prop_assert_eq!(first, expected);
            prop_assert!(relay.take_new_chats("bob").await.unwrap().is_empty());

            // Other recipients are untouched
            prop_assert_eq!(relay.take_new_chats("carol").await.unwrap().len(), 1);
            Ok::<(), TestCaseError>(())
        })?;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_enqueue_and_drain_lose_nothing() {
    const SENDERS: u64 = 4;
    const PER_SENDER: u64 = 25;

    let bob = recipient();
    let relay = Arc::new(InboxRelay::new(MemoryStorage::new(), SeededEnv::new(7)));
    let inbox = relay.create_inbox().await.unwrap();
    let kem = bob.kem().public_key().clone();

    let mut senders = Vec::new();
    for sender in 0..SENDERS {
        let relay = Arc::clone(&relay);
        let kem = kem.clone();
        senders.push(tokio::spawn(async move {
            for i in 0..PER_SENDER {
                let message = StoredMessage { serial: sender * 1000 + i, ciphertext: vec![] };
                relay.enqueue(inbox, &kem, &message).await.unwrap();
                tokio::task::yield_now().await;
            }
        }));
    }

    let drain_once = |relay: Arc<InboxRelay<MemoryStorage, SeededEnv>>| {
        let bob = recipient();
        async move {
            let Some(sealed) = relay.get_token(inbox).await.unwrap() else {
                return Vec::new();
            };
            let token = open_inbox_token(&sealed, bob.kem()).unwrap();
            relay.drain(inbox, &token).await.unwrap()
        }
    };

    let mut received = Vec::new();
    while senders.iter().any(|s| !s.is_finished()) {
        received.extend(drain_once(Arc::clone(&relay)).await);
        tokio::task::yield_now().await;
    }
    for sender in senders {
        sender.await.unwrap();
    }
    received.extend(drain_once(Arc::clone(&relay)).await);

    // ORACLE: every enqueued serial comes out exactly once
    let serials: Vec<u64> = received.iter().map(|m| m.serial).collect();
    let unique: HashSet<u64> = serials.iter().copied().collect();
    assert_eq!(serials.len(), (SENDERS * PER_SENDER) as usize);
    assert_eq!(unique.len(), serials.len());

    // Each sender's messages keep their relative order
    for sender in 0..SENDERS {
        let own: Vec<u64> =
            serials.iter().copied().filter(|s| s / 1000 == sender).collect();
        let mut sorted = own.clone();
        sorted.sort_unstable();
        assert_eq!(own, sorted);
    }
}
