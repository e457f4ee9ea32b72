// src/services/pacing.rs

//! Per-origin request pacing.
//!
//! Every origin owns an async gate. A caller holds the gate across its
//! randomized delay and the request itself, so requests to one origin are
//! serialized while distinct origins never wait on each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rand::Rng;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::models::CrawlerConfig;

/// Exclusive right to send one request to an origin.
///
/// Dropping the permit lets the next request to the same origin proceed.
pub struct OriginPermit {
    _guard: OwnedMutexGuard<()>,
}

/// Randomized per-origin delay scheduler.
pub struct Pacer {
    min_ms: u64,
    max_ms: u64,
    gates: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl Pacer {
    /// Create a pacer that waits between `min_ms` and `max_ms` before each request.
    pub fn new(min_ms: u64, max_ms: u64) -> Self {
        Self {
            min_ms: min_ms.min(max_ms),
            max_ms: max_ms.max(min_ms),
            gates: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &CrawlerConfig) -> Self {
        let (min, max) = config.delay_bounds_ms();
        Self::new(min, max)
    }

    /// Wait for the origin's gate, then sleep a jittered delay.
    pub async fn acquire(&self, origin: &str) -> OriginPermit {
        let gate = self.gate(origin);
        let guard = gate.lock_owned().await;

        let delay = self.next_delay();
        if !delay.is_zero() {
            log::debug!("Pacing {} for {}ms", origin, delay.as_millis());
            tokio::time::sleep(delay).await;
        }

        OriginPermit { _guard: guard }
    }

    /// Draw the next delay from the configured bounds.
    pub fn next_delay(&self) -> Duration {
        let ms = if self.min_ms == self.max_ms {
            self.min_ms
        } else {
            rand::thread_rng().gen_range(self.min_ms..=self.max_ms)
        };
        Duration::from_millis(ms)
    }

    fn gate(&self, origin: &str) -> Arc<AsyncMutex<()>> {
        let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            gates
                .entry(origin.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        )
    }
}
