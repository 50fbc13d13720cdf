//! Relay RPC dispatch.
//!
//! Each RPC stream carries exactly one request frame from an authenticated
//! user and gets exactly one response frame back. Errors are answered with
//! an `Error` frame, never by closing the stream.

use std::sync::Arc;

use quietline_core::Environment;
use quietline_proto::{
    ChatNotification, Frame, Payload,
    payloads::relay::{InboxCreated, Messages, NewChats, Token, UserInfo, UserList},
};

use crate::{
    directory::UserDirectory,
    relay::{InboxRelay, RelayError},
    storage::Storage,
};

/// Answers relay RPCs.
pub struct RelayService<S: Storage, E: Environment> {
    relay: Arc<InboxRelay<S, E>>,
    directory: Arc<UserDirectory<S>>,
}

impl<S: Storage, E: Environment> RelayService<S, E> {
    /// Create a service over the shared relay and directory.
    pub fn new(relay: Arc<InboxRelay<S, E>>, directory: Arc<UserDirectory<S>>) -> Self {
        Self { relay, directory }
    }

    /// Answer one request from `caller`.
    pub async fn handle(&self, caller: &str, request: Payload) -> Payload {
        let name = request.name();
        match self.dispatch(caller, request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(caller, request = name, error = %e, "rpc failed");
                Payload::Error(e.to_payload())
            },
        }
    }

    /// Answer one request frame from `caller`. Undecodable frames get a 400.
    pub async fn handle_frame(&self, caller: &str, frame: &Frame) -> Payload {
        match Payload::from_frame(frame) {
            Ok(request) => self.handle(caller, request).await,
            Err(e) => Payload::Error(RelayError::BadRequest(e.to_string()).to_payload()),
        }
    }

    async fn dispatch(&self, caller: &str, request: Payload) -> Result<Payload, RelayError> {
        match request {
            Payload::CreateInbox => {
                let inbox_id = self.relay.create_inbox().await?;
                Ok(Payload::InboxCreated(InboxCreated { inbox_id }))
            },
            Payload::NotifyInbox(notify) => {
                let recipient = notify.recipient.clone();
                self.directory.resolve(&recipient)?;
                self.relay.notify_inbox(&recipient, &ChatNotification::from(notify)).await?;
                Ok(Payload::Ack)
            },
            Payload::FetchNewChats => {
                let chats = self.relay.take_new_chats(caller).await?;
                Ok(Payload::NewChats(NewChats { chats }))
            },
            Payload::FetchToken(fetch) => {
                let token = self.relay.get_token(fetch.inbox_id).await?;
                Ok(Payload::Token(Token { token }))
            },
            Payload::FetchMessages(fetch) => {
                let messages = self.relay.drain(fetch.inbox_id, &fetch.token).await?;
                Ok(Payload::Messages(Messages { messages }))
            },
            Payload::ResolveUser(resolve) => {
                let identity = self.directory.resolve(&resolve.username)?;
                Ok(Payload::UserInfo(UserInfo { username: resolve.username, identity }))
            },
            Payload::SearchUsers(search) => {
                let usernames = self.directory.search(&search.query, search.page, search.size)?;
                Ok(Payload::UserList(UserList { usernames }))
            },
            other => {
                Err(RelayError::BadRequest(format!("{} is not a relay request", other.name())))
            },
        }
    }
}
