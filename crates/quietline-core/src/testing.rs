//! Deterministic environment for tests.
//!
//! `SeededEnv` replays the same random stream for the same seed, so nonces,
//! KEM seeds and `serial_start` values are stable across runs. Clones share
//! one RNG stream.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use rand_chacha::ChaCha20Rng;
use rand_core::{RngCore, SeedableRng};

use crate::env::Environment;

/// Environment with a seeded ChaCha20 RNG and a settable wall clock.
#[derive(Clone)]
pub struct SeededEnv {
    rng: Arc<Mutex<ChaCha20Rng>>,
    wall_clock: Arc<AtomicU64>,
}

impl SeededEnv {
    /// Default wall clock value (2024-01-01T00:00:00Z).
    pub const EPOCH: u64 = 1_704_067_200;

    /// Create an environment from a seed.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(seed))),
            wall_clock: Arc::new(AtomicU64::new(Self::EPOCH)),
        }
    }

    /// Move the wall clock forward.
    pub fn advance_wall_clock(&self, secs: u64) {
        self.wall_clock.fetch_add(secs, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for SeededEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeededEnv")
            .field("wall_clock", &self.wall_clock.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl Environment for SeededEnv {
    type Instant = tokio::time::Instant;

    fn now(&self) -> Self::Instant {
        tokio::time::Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        // A poisoned lock still holds a valid RNG state
        let mut rng = self.rng.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        rng.fill_bytes(buffer);
    }

    fn wall_clock_secs(&self) -> u64 {
        self.wall_clock.load(Ordering::SeqCst)
    }
}
