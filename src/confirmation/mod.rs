//! Confirmation tracking for submitted on-chain transactions
//!
//! Each tracked transaction gets its own polling task. A task ends after
//! emitting exactly one terminal event (final, failed or timed out), or
//! silently when cancelled.

mod observer;

#[cfg(test)]
pub use observer::MockChainObserver;
pub use observer::{ChainObserver, ChannelObserver, Observation};

use crate::catalog::ChainId;
use crate::config::ConfirmationConfig;

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tokio::task::AbortHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

const EVENT_BUFFER: usize = 1024;

/// Per-transaction confirmation state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationState {
    Unconfirmed { count: u64 },
    Final { count: u64 },
    Failed { reason: String },
}

impl Default for ConfirmationState {
    fn default() -> Self {
        ConfirmationState::Unconfirmed { count: 0 }
    }
}

impl ConfirmationState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ConfirmationState::Unconfirmed { .. })
    }

    pub fn count(&self) -> u64 {
        match self {
            ConfirmationState::Unconfirmed { count } | ConfirmationState::Final { count } => *count,
            ConfirmationState::Failed { .. } => 0,
        }
    }

    /// Step function for one observation.
    ///
    /// The count never decreases, and terminal states absorb everything.
    pub fn advance(&self, observation: &Observation, threshold: u64) -> ConfirmationState {
        let count = match self {
            ConfirmationState::Unconfirmed { count } => *count,
            terminal => return terminal.clone(),
        };

        match observation {
            Observation::Failed(reason) => ConfirmationState::Failed {
                reason: reason.clone(),
            },
            Observation::NotFound => ConfirmationState::Unconfirmed { count },
            Observation::Confirmations(seen) => {
                let count = count.max(*seen);
                if count >= threshold {
                    ConfirmationState::Final { count }
                } else {
                    ConfirmationState::Unconfirmed { count }
                }
            }
        }
    }
}

/// A transaction to watch, and the record it belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackRequest {
    pub record_id: String,
    pub chain: ChainId,
    pub tx_hash: String,
}

impl TrackRequest {
    pub fn new(
        record_id: impl Into<String>,
        chain: impl Into<ChainId>,
        tx_hash: impl Into<String>,
    ) -> Self {
        Self {
            record_id: record_id.into(),
            chain: chain.into(),
            tx_hash: tx_hash.into(),
        }
    }

    fn key(&self) -> TrackKey {
        (self.chain.clone(), self.tx_hash.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    Progress { confirmations: u64 },
    Final { confirmations: u64 },
    Failed { reason: String },
    /// Gave up after `max_polls`; says nothing about the transaction itself
    TimedOut { polls: u64 },
}

impl ConfirmationOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ConfirmationOutcome::Progress { .. })
    }
}

/// Broadcast to tracker subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationEvent {
    pub record_id: String,
    pub chain: ChainId,
    pub tx_hash: String,
    pub outcome: ConfirmationOutcome,
}

type TrackKey = (ChainId, String);
type ActiveMap = DashMap<TrackKey, (u64, AbortHandle)>;

/// Stop tracking `key` if `generation` still owns it
fn release(active: &ActiveMap, key: &TrackKey, generation: u64) -> bool {
    match active.remove_if(key, |_, (g, _)| *g == generation) {
        Some((_, (_, handle))) => {
            handle.abort();
            crate::metrics::ACTIVE_TRACKERS.dec();
            true
        }
        None => false,
    }
}

/// Owner's handle on a tracking task.
///
/// Dropping the handle cancels polling unless it was [`detach`](Self::detach)ed.
/// A handle for a transaction that was already being tracked does not own
/// the task and never cancels it.
pub struct TrackingHandle {
    key: TrackKey,
    generation: u64,
    active: Weak<ActiveMap>,
    owns_task: bool,
}

impl TrackingHandle {
    pub fn tx_hash(&self) -> &str {
        &self.key.1
    }

    pub fn is_active(&self) -> bool {
        self.active
            .upgrade()
            .map(|active| active.contains_key(&self.key))
            .unwrap_or(false)
    }

    /// Stop polling now; the record keeps its last-known state
    pub fn cancel(mut self) {
        self.stop();
    }

    /// Let polling continue after this handle is dropped
    pub fn detach(mut self) {
        self.owns_task = false;
    }

    fn stop(&mut self) {
        if !self.owns_task {
            return;
        }
        self.owns_task = false;
        if let Some(active) = self.active.upgrade() {
            if release(&active, &self.key, self.generation) {
                debug!("Stopped tracking {} on {}", self.key.1, self.key.0);
            }
        }
    }
}

impl Drop for TrackingHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Polls tracked transactions until final, failed or cancelled
pub struct ConfirmationTracker {
    observer: Arc<dyn ChainObserver>,
    config: ConfirmationConfig,
    events: broadcast::Sender<ConfirmationEvent>,
    active: Arc<ActiveMap>,
    generation: AtomicU64,
}

impl ConfirmationTracker {
    pub fn new(observer: Arc<dyn ChainObserver>, config: ConfirmationConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            observer,
            config,
            events,
            active: Arc::new(DashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConfirmationEvent> {
        self.events.subscribe()
    }

    pub fn threshold(&self) -> u64 {
        self.config.threshold
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn is_tracking(&self, chain: &str, tx_hash: &str) -> bool {
        self.active
            .contains_key(&(chain.to_string(), tx_hash.to_string()))
    }

    /// Start polling a transaction; tracking the same transaction twice is a no-op
    pub fn track(&self, request: TrackRequest) -> TrackingHandle {
        let key = request.key();

        if let Some(existing) = self.active.get(&key) {
            debug!("Already tracking {} on {}", request.tx_hash, request.chain);
            return TrackingHandle {
                key,
                generation: existing.0,
                active: Arc::downgrade(&self.active),
                owns_task: false,
            };
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let task = PollTask {
            observer: self.observer.clone(),
            events: self.events.clone(),
            active: Arc::downgrade(&self.active),
            threshold: self.config.threshold,
            max_polls: self.config.max_polls,
            request,
            generation,
        };

        // entry lock is held until the abort handle is stored, so the task
        // cannot release itself before it is registered
        match self.active.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(existing) => TrackingHandle {
                key,
                generation: existing.get().0,
                active: Arc::downgrade(&self.active),
                owns_task: false,
            },
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let interval = self.config.poll_interval();
                info!(
                    "Tracking {} on {} until {} confirmations",
                    task.request.tx_hash, task.request.chain, task.threshold
                );
                let handle = tokio::spawn(task.run(interval));
                slot.insert((generation, handle.abort_handle()));
                crate::metrics::ACTIVE_TRACKERS.inc();

                TrackingHandle {
                    key,
                    generation,
                    active: Arc::downgrade(&self.active),
                    owns_task: true,
                }
            }
        }
    }

    /// Stop polling a transaction regardless of who holds its handle
    pub fn cancel(&self, chain: &str, tx_hash: &str) -> bool {
        let key = (chain.to_string(), tx_hash.to_string());
        match self.active.get(&key).map(|entry| entry.0) {
            Some(generation) => release(&self.active, &key, generation),
            None => false,
        }
    }

    /// Stop every polling task
    pub fn shutdown(&self) {
        let keys: Vec<(TrackKey, u64)> = self
            .active
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().0))
            .collect();
        let stopped = keys
            .iter()
            .filter(|(key, generation)| release(&self.active, key, *generation))
            .count();
        info!("Confirmation tracker stopped {} polling tasks", stopped);
    }
}

impl Drop for ConfirmationTracker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct PollTask {
    observer: Arc<dyn ChainObserver>,
    events: broadcast::Sender<ConfirmationEvent>,
    active: Weak<ActiveMap>,
    threshold: u64,
    max_polls: Option<u64>,
    request: TrackRequest,
    generation: u64,
}

impl PollTask {
    async fn run(self, poll_interval: std::time::Duration) {
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut state = ConfirmationState::default();
        let mut polls = 0u64;

        let outcome = loop {
            ticker.tick().await;
            polls += 1;

            match self
                .observer
                .observe(&self.request.chain, &self.request.tx_hash)
                .await
            {
                Ok(observation) => {
                    let next = state.advance(&observation, self.threshold);
                    match &next {
                        ConfirmationState::Final { count } => {
                            break ConfirmationOutcome::Final {
                                confirmations: *count,
                            };
                        }
                        ConfirmationState::Failed { reason } => {
                            break ConfirmationOutcome::Failed {
                                reason: reason.clone(),
                            };
                        }
                        ConfirmationState::Unconfirmed { count } if *count > state.count() => {
                            debug!(
                                "{} on {}: {}/{} confirmations",
                                self.request.tx_hash, self.request.chain, count, self.threshold
                            );
                            self.emit(ConfirmationOutcome::Progress {
                                confirmations: *count,
                            });
                        }
                        ConfirmationState::Unconfirmed { .. } => {}
                    }
                    state = next;
                }
                Err(e) => {
                    // a failed poll is not a failed transaction
                    warn!(
                        "Confirmation poll for {} on {} failed: {}",
                        self.request.tx_hash, self.request.chain, e
                    );
                }
            }

            if let Some(max) = self.max_polls {
                if polls >= max {
                    break ConfirmationOutcome::TimedOut { polls };
                }
            }
        };

        match &outcome {
            ConfirmationOutcome::Final { confirmations } => {
                info!(
                    "{} on {} is final with {} confirmations",
                    self.request.tx_hash, self.request.chain, confirmations
                );
                crate::metrics::record_confirmation_final();
            }
            ConfirmationOutcome::Failed { reason } => {
                warn!(
                    "{} on {} failed: {}",
                    self.request.tx_hash, self.request.chain, reason
                );
                crate::metrics::record_confirmation_failed();
            }
            _ => warn!(
                "Gave up on {} on {} after {} polls",
                self.request.tx_hash, self.request.chain, polls
            ),
        }

        // deregister before emitting so subscribers see a settled tracker
        if let Some(active) = self.active.upgrade() {
            if active
                .remove_if(&self.request.key(), |_, (g, _)| *g == self.generation)
                .is_some()
            {
                crate::metrics::ACTIVE_TRACKERS.dec();
            }
        }
        self.emit(outcome);
    }

    fn emit(&self, outcome: ConfirmationOutcome) {
        let event = ConfirmationEvent {
            record_id: self.request.record_id.clone(),
            chain: self.request.chain.clone(),
            tx_hash: self.request.tx_hash.clone(),
            outcome,
        };
        // no subscribers is fine
        let _ = self.events.send(event);
    }
}
