//! Client protocol engine.
//!
//! Ties sessions, the codec, the rotation schedule and the relay together.
//! Every operation on a chat takes that chat's session lock for its whole
//! duration: encrypt, put the frame on the wire, then commit. A failure at any
//! step leaves the session as it was.

use std::sync::Arc;

use quietline_core::{
    ChatError, ChatSession, Environment, LocalIdentity, PeerIdentity, RotationScheduler, decrypt,
    encrypt_key_rotation, encrypt_message, open_inbox_token, open_invite, seal_invite,
};
use quietline_proto::{ChatNotification, Deliver, Event, Frame, InboxId, Payload, SendMessage};
use tokio::sync::mpsc;

use crate::{
    archive::SessionArchive,
    config::ClientConfig,
    relay_api::RelayApi,
    store::{SessionHandle, SessionStore},
    subscribers::Subscribers,
};

/// Outcome of a catch-up pass.
///
/// Individual failures never abort the pass; they are collected here.
#[derive(Debug, Default)]
pub struct CatchUpReport {
    /// Chats discovered from notifications
    pub new_chats: Vec<InboxId>,
    /// Events decrypted from inbox queues
    pub delivered: usize,
    /// Failures, with the inbox they concern when known
    pub failures: Vec<(Option<InboxId>, ChatError)>,
}

struct Inner<E: Environment, R: RelayApi> {
    env: E,
    relay: R,
    identity: LocalIdentity,
    config: ClientConfig,
    scheduler: RotationScheduler,
    sessions: SessionStore,
    subscribers: Subscribers,
    outbound: mpsc::Sender<Frame>,
    archive: Option<SessionArchive>,
}

/// Client protocol engine.
///
/// Cheap to clone; clones share all state.
pub struct Engine<E: Environment, R: RelayApi> {
    inner: Arc<Inner<E, R>>,
}

impl<E: Environment, R: RelayApi> Clone for Engine<E, R> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<E: Environment, R: RelayApi> Engine<E, R> {
    /// Create an engine writing live frames to `outbound`.
    pub fn new(
        env: E,
        relay: R,
        identity: LocalIdentity,
        config: ClientConfig,
        outbound: mpsc::Sender<Frame>,
    ) -> Self {
        Self::build(env, relay, identity, config, outbound, SessionStore::new(), None)
    }

    /// Create an engine that resumes the sessions kept in `archive` and
    /// saves every session change back to it.
    ///
    /// # Errors
    ///
    /// - `TransientIo` if the archive cannot be read
    /// - `DesyncOrCorruption` or `BadFormat` if a stored session is unusable
    pub fn with_archive(
        env: E,
        relay: R,
        identity: LocalIdentity,
        config: ClientConfig,
        outbound: mpsc::Sender<Frame>,
        archive: SessionArchive,
    ) -> Result<Self, ChatError> {
        let sessions = SessionStore::new();
        for session in archive.load_all()? {
            if session.local_username() != identity.username() {
                return Err(ChatError::BadFormat(format!(
                    "archived session {} belongs to {}",
                    session.inbox_id(),
                    session.local_username()
                )));
            }
            sessions.insert_if_absent(session);
        }
        tracing::info!(sessions = sessions.len(), "sessions restored");

        Ok(Self::build(env, relay, identity, config, outbound, sessions, Some(archive)))
    }

    fn build(
        env: E,
        relay: R,
        identity: LocalIdentity,
        config: ClientConfig,
        outbound: mpsc::Sender<Frame>,
        sessions: SessionStore,
        archive: Option<SessionArchive>,
    ) -> Self {
        let scheduler = RotationScheduler::new(config.rotation_interval);
        let subscribers = Subscribers::new(config.subscriber_capacity);

        Self {
            inner: Arc::new(Inner {
                env,
                relay,
                identity,
                config,
                scheduler,
                sessions,
                subscribers,
                outbound,
                archive,
            }),
        }
    }

    /// Local username.
    pub fn username(&self) -> &str {
        self.inner.identity.username()
    }

    /// Configuration in use.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Environment in use.
    pub fn env(&self) -> &E {
        &self.inner.env
    }

    /// Whether a chat with this inbox is known.
    pub fn has_session(&self, inbox: &InboxId) -> bool {
        self.inner.sessions.contains(inbox)
    }

    /// Session handle, for inspection.
    pub fn session(&self, inbox: &InboxId) -> Option<SessionHandle> {
        self.inner.sessions.get(inbox)
    }

    /// Known inbox ids.
    pub fn inboxes(&self) -> Vec<InboxId> {
        self.inner.sessions.inbox_ids()
    }

    /// Receive decrypted events for `inbox`.
    pub fn subscribe(&self, inbox: InboxId) -> mpsc::Receiver<Event> {
        self.inner.subscribers.subscribe(inbox)
    }

    /// Stop delivering events for `inbox`.
    pub fn unsubscribe(&self, inbox: &InboxId) {
        self.inner.subscribers.unsubscribe(inbox);
    }

    /// Events dropped because a subscriber was full.
    pub fn dropped_events(&self) -> u64 {
        self.inner.subscribers.dropped_events()
    }

    /// Page `page` (zero-based) of registered usernames containing `query`.
    ///
    /// # Errors
    ///
    /// - `TransientIo` if the relay call fails
    pub async fn search_users(
        &self,
        query: &str,
        page: u32,
        size: u32,
    ) -> Result<Vec<String>, ChatError> {
        self.inner.relay.search_users(query, page, size).await
    }

    /// Start a chat with `peer_username`.
    ///
    /// Resolves the peer, allocates an inbox, encapsulates the starting key
    /// and leaves a signed invitation with the relay.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the peer is unknown
    /// - `TransientIo` if a relay call fails
    pub async fn start_chat(&self, peer_username: &str) -> Result<InboxId, ChatError> {
        let inner = &self.inner;

        let identity = inner.relay.resolve_user(peer_username).await?;
        let peer = PeerIdentity::from_public(peer_username, &identity)?;

        let inbox = inner.relay.create_inbox().await?;
        // Leave headroom so serials never approach u64::MAX
        let serial_start = inner.env.random_u64() >> 16;

        let invite = seal_invite(&inner.env, &inner.identity, &peer, inbox, serial_start)?;
        inner.relay.notify_inbox(invite.notify).await?;

        let session = ChatSession::new(
            inbox,
            inner.identity.username(),
            peer,
            inner.identity.username(),
            invite.starting_key,
            serial_start,
        );
        self.persist(&session);
        inner.sessions.insert_if_absent(session);

        tracing::info!(inbox = %inbox, peer = peer_username, serial_start, "chat started");
        Ok(inbox)
    }

    /// Send a text message.
    ///
    /// Returns the sent event. A `KeyRotation` follows it when the schedule
    /// asks for one; if that rotation cannot be sent the message still counts
    /// as sent and the rotation is retried by the next check.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the inbox is unknown
    /// - `TransientIo` if the live stream is gone; the session is unchanged
    pub async fn send_text(&self, inbox: &InboxId, text: &str) -> Result<Event, ChatError> {
        let handle = self.handle(inbox)?;
        let mut session = handle.lock().await;

        let out = encrypt_message(&self.inner.env, &session, text)?;
        self.transmit(out.send).await?;

        let event = out.event.clone();
        session.commit_sent(out.event, out.next_key)?;
        self.persist(&session);
        tracing::debug!(inbox = %inbox, serial = event.serial, "message sent");

        if let Err(error) = self.rotate_locked(&mut session).await {
            tracing::warn!(inbox = %inbox, error = %error, "rotation after send failed");
        }
        Ok(event)
    }

    /// Decrypt and commit a delivered frame.
    ///
    /// Does not run the rotation check; call [`Engine::rotate_if_due`] once a
    /// burst of frames for the inbox has been processed.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the inbox is unknown
    /// - `DesyncOrCorruption` if the frame does not decrypt at the session's
    ///   state; the session is unchanged
    pub async fn receive(&self, deliver: &Deliver) -> Result<Event, ChatError> {
        let handle = self.handle(&deliver.inbox_id)?;
        let mut session = handle.lock().await;

        let decrypted = decrypt(&session, deliver)?;
        let event = decrypted.event.clone();
        session.commit_received(decrypted, self.inner.identity.kem())?;
        self.persist(&session);
        drop(session);

        self.inner.subscribers.publish(&deliver.inbox_id, &event);
        Ok(event)
    }

    /// Send a `KeyRotation` for `inbox` if the schedule calls for one.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the inbox is unknown
    /// - `TransientIo` if the live stream is gone
    pub async fn rotate_if_due(&self, inbox: &InboxId) -> Result<Option<Event>, ChatError> {
        let handle = self.handle(inbox)?;
        let mut session = handle.lock().await;
        self.rotate_locked(&mut session).await
    }

    async fn rotate_locked(&self, session: &mut ChatSession) -> Result<Option<Event>, ChatError> {
        if !session.needs_rotation(&self.inner.scheduler) {
            return Ok(None);
        }

        let peer_kem = session.peer().kem_key().clone();
        let out = encrypt_key_rotation(&self.inner.env, session, &peer_kem)?;
        self.transmit(out.send).await?;

        let event = out.event.clone();
        session.commit_sent(out.event, out.next_key)?;
        self.persist(session);
        tracing::debug!(inbox = %session.inbox_id(), serial = event.serial, "chat key rotated");

        Ok(Some(event))
    }

    /// Fetch new chats, then drain every known inbox.
    ///
    /// # Errors
    ///
    /// Only fails outright if the new-chat fetch itself fails. Per-chat and
    /// per-message failures are collected in the report.
    pub async fn catch_up(&self) -> Result<CatchUpReport, ChatError> {
        let mut report = CatchUpReport::default();

        let notifications = self.inner.relay.fetch_new_chats().await?;
        for notification in &notifications {
            match self.accept_invite(notification).await {
                Ok(Some(inbox)) => report.new_chats.push(inbox),
                Ok(None) => {},
                Err(e) => report.failures.push((None, e)),
            }
        }

        for inbox in self.inner.sessions.inbox_ids() {
            if let Err(e) = self.drain_inbox(&inbox, &mut report).await {
                report.failures.push((Some(inbox), e));
            }
        }

        for (inbox, error) in &report.failures {
            tracing::warn!(inbox = ?inbox, error = %error, "catch-up failure");
        }

        Ok(report)
    }

    /// Open, verify and adopt one invitation. `None` if the chat was known.
    async fn accept_invite(
        &self,
        notification: &ChatNotification,
    ) -> Result<Option<InboxId>, ChatError> {
        let inner = &self.inner;

        let opened = open_invite(notification, inner.identity.kem())?;
        if inner.sessions.contains(&opened.inbox_id) {
            return Ok(None);
        }

        let identity = inner.relay.resolve_user(&opened.sender).await?;
        let peer = PeerIdentity::from_public(opened.sender.clone(), &identity)?;
        opened.verify(&peer)?;

        let inbox = opened.inbox_id;
        let session = ChatSession::new(
            inbox,
            inner.identity.username(),
            peer,
            opened.sender,
            opened.starting_key,
            opened.serial_start,
        );

        if !inner.sessions.insert_if_absent(session) {
            return Ok(None);
        }
        if let Some(handle) = inner.sessions.get(&inbox) {
            self.persist(&*handle.lock().await);
        }

        tracing::info!(inbox = %inbox, "chat discovered");
        Ok(Some(inbox))
    }

    async fn drain_inbox(
        &self,
        inbox: &InboxId,
        report: &mut CatchUpReport,
    ) -> Result<(), ChatError> {
        let Some(sealed) = self.inner.relay.fetch_token(*inbox).await? else {
            return Ok(());
        };

        let token = open_inbox_token(&sealed, self.inner.identity.kem())?;
        let messages = self.inner.relay.fetch_messages(*inbox, token).await?;

        for message in messages {
            let deliver = Deliver {
                serial: message.serial,
                inbox_id: *inbox,
                ciphertext: message.ciphertext,
            };
            match self.receive(&deliver).await {
                Ok(_) => report.delivered += 1,
                Err(e) => report.failures.push((Some(*inbox), e)),
            }
        }

        self.rotate_if_due(inbox).await?;
        Ok(())
    }

    /// Save `session` to the archive, if there is one. A failed save is logged;
    /// the in-memory session stays authoritative.
    fn persist(&self, session: &ChatSession) {
        let Some(archive) = &self.inner.archive else {
            return;
        };
        if let Err(error) = archive.save(&self.inner.env, session) {
            tracing::warn!(inbox = %session.inbox_id(), error = %error, "session not archived");
        }
    }

    fn handle(&self, inbox: &InboxId) -> Result<SessionHandle, ChatError> {
        self.inner.sessions.get(inbox).ok_or_else(|| ChatError::NotFound(format!("inbox {inbox}")))
    }

    async fn transmit(&self, send: SendMessage) -> Result<(), ChatError> {
        let frame = Payload::Send(send).into_frame()?;
        self.inner
            .outbound
            .send(frame)
            .await
            .map_err(|_| ChatError::TransientIo("live stream closed".to_string()))
    }

    /// Queue a heartbeat on the live stream.
    pub(crate) async fn heartbeat(&self) -> Result<(), ChatError> {
        let frame = Payload::Heartbeat.into_frame()?;
        self.inner
            .outbound
            .send(frame)
            .await
            .map_err(|_| ChatError::TransientIo("live stream closed".to_string()))
    }
}
