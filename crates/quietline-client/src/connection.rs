//! Live connection driver.
//!
//! Reads frames from the live stream and routes each `Deliver` to a worker
//! task owned by its inbox, so frames for one chat are processed strictly in
//! arrival order while different chats proceed in parallel. A `Deliver` for an
//! inbox the client does not know yet goes to a single catch-up worker, which
//! pulls new chats from the relay and hands the frame back for a second try.
//!
//! ```text
//!                  ┌──► inbox worker (A) ──► receive ─► rotate_if_due
//!  live stream ────┼──► inbox worker (B) ──► receive ─► rotate_if_due
//!                  └──► catch-up worker ──► catch_up ─► retry ──┘
//! ```
//!
//! The rotation check runs when an inbox worker's queue is empty, so a burst
//! of backlog is fully applied before this side decides whether it owes a
//! rotation.

use std::collections::HashMap;

use quietline_core::Environment;
use quietline_proto::{Deliver, Frame, InboxId, Payload};
use tokio::{
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
};

use crate::{engine::Engine, relay_api::RelayApi};

/// Drive `engine` from the frames arriving on `inbound`.
///
/// Returns once `inbound` closes and every queued frame has been processed.
pub async fn run_connection<E, R>(engine: Engine<E, R>, mut inbound: mpsc::Receiver<Frame>)
where
    E: Environment,
    R: RelayApi,
{
    let heartbeat = tokio::spawn(heartbeat_loop(engine.clone()));

    let (retry_tx, mut retry_rx) = mpsc::unbounded_channel();
    let (catch_up_tx, catch_up_rx) = mpsc::unbounded_channel();
    let catch_up = tokio::spawn(catch_up_worker(engine.clone(), catch_up_rx, retry_tx));

    let mut workers = Workers::new(engine.clone());

    loop {
        tokio::select! {
            frame = inbound.recv() => {
                let Some(frame) = frame else { break };
                let Some(deliver) = deliver_from(&frame) else { continue };

                if engine.has_session(&deliver.inbox_id) {
                    workers.dispatch(deliver);
                } else if catch_up_tx.send(deliver).is_err() {
                    tracing::error!("catch-up worker stopped");
                }
            },
            Some(deliver) = retry_rx.recv() => {
                if engine.has_session(&deliver.inbox_id) {
                    workers.dispatch(deliver);
                } else {
                    tracing::error!(
                        inbox = %deliver.inbox_id,
                        serial = deliver.serial,
                        "no chat for inbox after catch-up, frame dropped"
                    );
                }
            },
        }
    }

    tracing::debug!("live stream closed, shutting down connection");

    heartbeat.abort();
    drop(catch_up_tx);
    if let Err(e) = catch_up.await {
        tracing::warn!(error = %e, "catch-up worker failed");
    }
    workers.shutdown().await;
}

/// Decode a live frame, keeping only deliveries.
fn deliver_from(frame: &Frame) -> Option<Deliver> {
    match Payload::from_frame(frame) {
        Ok(Payload::Deliver(deliver)) => Some(deliver),
        Ok(Payload::Heartbeat) => None,
        Ok(Payload::Error(error)) => {
            tracing::warn!(status = error.status, message = %error.message, "relay error");
            None
        },
        Ok(other) => {
            tracing::warn!(payload = other.name(), "unexpected frame on live stream");
            None
        },
        Err(e) => {
            tracing::warn!(error = %e, opcode = ?frame.opcode, "undecodable live frame");
            None
        },
    }
}

struct Workers<E: Environment, R: RelayApi> {
    engine: Engine<E, R>,
    queues: HashMap<InboxId, UnboundedSender<Deliver>>,
    tasks: Vec<JoinHandle<()>>,
}

impl<E: Environment, R: RelayApi> Workers<E, R> {
    fn new(engine: Engine<E, R>) -> Self {
        Self { engine, queues: HashMap::new(), tasks: Vec::new() }
    }

    fn dispatch(&mut self, deliver: Deliver) {
        let inbox = deliver.inbox_id;
        let queue = self.queues.entry(inbox).or_insert_with(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            self.tasks.push(tokio::spawn(inbox_worker(self.engine.clone(), inbox, rx)));
            tx
        });

        if queue.send(deliver).is_err() {
            tracing::error!(inbox = %inbox, "inbox worker stopped");
            self.queues.remove(&inbox);
        }
    }

    async fn shutdown(self) {
        drop(self.queues);
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "inbox worker failed");
            }
        }
    }
}

async fn inbox_worker<E, R>(
    engine: Engine<E, R>,
    inbox: InboxId,
    mut queue: UnboundedReceiver<Deliver>,
) where
    E: Environment,
    R: RelayApi,
{
    while let Some(deliver) = queue.recv().await {
        if let Err(e) = engine.receive(&deliver).await {
            tracing::warn!(
                inbox = %inbox,
                serial = deliver.serial,
                error = %e,
                "delivery rejected"
            );
        }

        if !queue.is_empty() {
            continue;
        }
        if let Err(e) = engine.rotate_if_due(&inbox).await {
            tracing::warn!(inbox = %inbox, error = %e, "key rotation failed");
        }
    }
}

async fn catch_up_worker<E, R>(
    engine: Engine<E, R>,
    mut queue: UnboundedReceiver<Deliver>,
    retry: UnboundedSender<Deliver>,
) where
    E: Environment,
    R: RelayApi,
{
    while let Some(first) = queue.recv().await {
        let mut pending = vec![first];
        while let Ok(deliver) = queue.try_recv() {
            pending.push(deliver);
        }

        match engine.catch_up().await {
            Ok(report) => tracing::info!(
                new_chats = report.new_chats.len(),
                delivered = report.delivered,
                failures = report.failures.len(),
                "caught up"
            ),
            Err(e) => tracing::warn!(error = %e, "catch-up failed"),
        }

        for deliver in pending {
            if retry.send(deliver).is_err() {
                return;
            }
        }
    }
}

async fn heartbeat_loop<E, R>(engine: Engine<E, R>)
where
    E: Environment,
    R: RelayApi,
{
    let interval = engine.config().heartbeat_interval;
    loop {
        engine.env().sleep(interval).await;
        if engine.heartbeat().await.is_err() {
            tracing::debug!("live stream closed, heartbeat stopped");
            return;
        }
    }
}
