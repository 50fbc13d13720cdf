//! Relay RPC surface as seen by the client.
//!
//! The engine only talks to the relay through [`RelayApi`], so tests can run
//! it against an in-process relay and production against QUIC.

use async_trait::async_trait;
use quietline_core::ChatError;
use quietline_proto::{
    ChatNotification, ErrorPayload, InboxId, PublicIdentity, SealedToken, StoredMessage,
    payloads::relay::NotifyInbox,
};

/// Relay operations available to an authenticated client.
///
/// Every call is independent; the relay keeps no per-call state between them.
#[async_trait]
pub trait RelayApi: Send + Sync + 'static {
    /// Allocate a fresh anonymous inbox.
    async fn create_inbox(&self) -> Result<InboxId, ChatError>;

    /// Leave a new-chat notification for `notify.recipient`.
    async fn notify_inbox(&self, notify: NotifyInbox) -> Result<(), ChatError>;

    /// Take this user's pending notifications. The relay deletes them once
    /// answered.
    async fn fetch_new_chats(&self) -> Result<Vec<ChatNotification>, ChatError>;

    /// Sealed token for `inbox`, `None` when nothing is queued.
    async fn fetch_token(&self, inbox: InboxId) -> Result<Option<SealedToken>, ChatError>;

    /// Drain `inbox` using the unsealed token.
    async fn fetch_messages(
        &self,
        inbox: InboxId,
        token: Vec<u8>,
    ) -> Result<Vec<StoredMessage>, ChatError>;

    /// Public identity pinned for `username`.
    async fn resolve_user(&self, username: &str) -> Result<PublicIdentity, ChatError>;

    /// Page `page` (zero-based) of registered usernames containing `query`,
    /// at most `size` per page.
    async fn search_users(
        &self,
        query: &str,
        page: u32,
        size: u32,
    ) -> Result<Vec<String>, ChatError>;
}

/// Map a relay error response onto the client taxonomy.
pub fn error_from_status(error: &ErrorPayload) -> ChatError {
    let message = error.message.clone();
    match error.status {
        ErrorPayload::UNAUTHORIZED | ErrorPayload::CONFLICT => ChatError::AuthFailure(message),
        ErrorPayload::NOT_FOUND => ChatError::NotFound(message),
        ErrorPayload::BAD_REQUEST => ChatError::BadFormat(message),
        _ => ChatError::TransientIo(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert!(matches!(
            error_from_status(&ErrorPayload::unauthorized("bad token")),
            ChatError::AuthFailure(_)
        ));
        assert!(matches!(
            error_from_status(&ErrorPayload::not_found("inbox")),
            ChatError::NotFound(_)
        ));
        assert!(matches!(
            error_from_status(&ErrorPayload::bad_request("cbor")),
            ChatError::BadFormat(_)
        ));
        assert!(error_from_status(&ErrorPayload::new(ErrorPayload::INTERNAL, "db")).is_transient());
    }
}
