//! Thread store: process-wide keyed state with time-based eviction.
//!
//! Each entry pairs an [`AgentState`] with its last-access timestamp. A reaper
//! task wakes at a fixed cadence and removes entries idle past the TTL.
//! Eviction is purely time-based. The map is sharded, so operations on
//! distinct keys do not contend and the reaper holds no global lock.
//!
//! Timestamps use `tokio::time::Instant` so tests can drive eviction with the
//! paused clock.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::state::AgentState;

/// Default idle TTL before a thread is evicted.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);
/// Default reaper cadence.
pub const DEFAULT_REAP_INTERVAL: Duration = Duration::from_secs(5 * 60);

struct Entry {
    state: AgentState,
    last_access: Instant,
}

/// Keyed in-memory store of per-thread state.
pub struct ThreadStore {
    entries: Arc<DashMap<String, Entry>>,
    ttl: Duration,
    reaper: JoinHandle<()>,
}

impl ThreadStore {
    /// Store with the default TTL (1 h) and reap cadence (5 min). Must be
    /// constructed inside a tokio runtime; the reaper task starts immediately.
    pub fn new() -> Arc<Self> {
        Self::with_config(DEFAULT_TTL, DEFAULT_REAP_INTERVAL)
    }

    pub fn with_config(ttl: Duration, reap_interval: Duration) -> Arc<Self> {
        let entries: Arc<DashMap<String, Entry>> = Arc::new(DashMap::new());
        let reaper = tokio::spawn(Self::reap_loop(Arc::clone(&entries), ttl, reap_interval));
        Arc::new(Self {
            entries,
            ttl,
            reaper,
        })
    }

    async fn reap_loop(entries: Arc<DashMap<String, Entry>>, ttl: Duration, cadence: Duration) {
        let mut ticker = tokio::time::interval(cadence);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it so a fresh store reaps
        // nothing before one full cadence elapses.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let now = Instant::now();
            let before = entries.len();
            entries.retain(|_, e| now.duration_since(e.last_access) < ttl);
            let evicted = before.saturating_sub(entries.len());
            if evicted > 0 {
                debug!(evicted, remaining = entries.len(), "thread store reaped");
            }
        }
    }

    /// Returns the stored state for `thread_id`, creating an empty one for an
    /// unknown id. Refreshes the access timestamp.
    pub fn load_or_create(&self, thread_id: &str) -> AgentState {
        let mut entry = self
            .entries
            .entry(thread_id.to_string())
            .or_insert_with(|| Entry {
                state: AgentState::new(thread_id),
                last_access: Instant::now(),
            });
        entry.last_access = Instant::now();
        entry.state.clone()
    }

    /// Stores `state`, replacing any prior state, and refreshes the timestamp.
    pub fn save(&self, thread_id: &str, state: AgentState) {
        self.entries.insert(
            thread_id.to_string(),
            Entry {
                state,
                last_access: Instant::now(),
            },
        );
    }

    /// Returns the stored state or `None`. Refreshes the timestamp on hit.
    pub fn get(&self, thread_id: &str) -> Option<AgentState> {
        let mut entry = self.entries.get_mut(thread_id)?;
        entry.last_access = Instant::now();
        Some(entry.state.clone())
    }

    /// Removes the entry, if any.
    pub fn delete(&self, thread_id: &str) {
        self.entries.remove(thread_id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Stops the reaper task. Also happens on drop.
    pub fn shutdown(&self) {
        self.reaper.abort();
    }
}

impl Drop for ThreadStore {
    fn drop(&mut self) {
        self.reaper.abort();
    }
}
