//! Quietline client
//!
//! Client protocol engine for quietline direct messaging. Owns the chat
//! sessions, drives them from a live duplex stream and the relay, and fans
//! decrypted events out to subscribers.
//!
//! # Architecture
//!
//! ```text
//!              ┌───────────────┐   Send / Heartbeat   ┌────────┐
//!  send_text ─►│    Engine     │─────────────────────►│        │
//!              │  SessionStore │                      │ server │
//!  subscribe ◄─│  Subscribers  │◄── run_connection ◄──│        │
//!              └──────┬────────┘       Deliver        └────────┘
//!                     │ RelayApi (one request per stream)  ▲
//!                     └────────────────────────────────────┘
//! ```
//!
//! [`Engine::with_archive`] resumes chats from a [`SessionArchive`], a redb
//! file of sealed session records, and saves every session change back to it.
//!
//! The engine holds no transport. It writes live frames to a channel and
//! calls the relay through [`RelayApi`], so tests run it entirely in process.
//!
//! # Transport (optional)
//!
//! With the `transport` feature enabled, this crate also provides:
//! - [`transport::connect`]: QUIC connection with the signed login handshake
//! - [`transport::QuicRelay`]: [`RelayApi`] over QUIC streams

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod archive;
mod config;
mod connection;
mod engine;
mod relay_api;
mod store;
mod subscribers;

#[cfg(feature = "transport")]
pub mod transport;

pub use archive::{ARCHIVE_LABEL, SessionArchive};
pub use config::{ClientConfig, DEFAULT_HEARTBEAT_INTERVAL};
pub use connection::run_connection;
pub use engine::{CatchUpReport, Engine};
pub use quietline_core::{ChatError, Environment, LocalIdentity, SystemEnv};
pub use relay_api::{RelayApi, error_from_status};
pub use store::{SessionHandle, SessionStore};
pub use subscribers::Subscribers;
