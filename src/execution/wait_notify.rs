//! Correlation-id based wait/notify
//!
//! A waiter registers the set of correlation ids it needs answers for along
//! with a callback. Each `notify` answers one id; once every id of a waiter is
//! answered the callback runs with all responses. Answers that arrive before
//! anyone waits on their id are kept until a waiter claims them or the
//! retention period runs out. Cancelled ids drop their answers for the same
//! period.

use crate::step::ResponseData;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Responses collected for a waiter, keyed by correlation id
pub type Responses = HashMap<String, ResponseData>;

type Callback = Box<dyn FnOnce(Responses) + Send>;

const DEFAULT_RETENTION: Duration = Duration::from_secs(600);

struct Waiter {
    pending: HashSet<String>,
    responses: Responses,
    callback: Callback,
}

#[derive(Default)]
struct WaitState {
    next_waiter: u64,
    waiters: HashMap<u64, Waiter>,
    by_correlation: HashMap<String, u64>,
    early: HashMap<String, (Instant, ResponseData)>,
    cancelled: HashMap<String, Instant>,
}

impl WaitState {
    fn prune(&mut self, retention: Duration) {
        let before = self.early.len() + self.cancelled.len();
        self.early.retain(|_, (at, _)| at.elapsed() < retention);
        self.cancelled.retain(|_, at| at.elapsed() < retention);
        let pruned = before - self.early.len() - self.cancelled.len();
        if pruned > 0 {
            debug!("Forgot {} expired notifications", pruned);
        }
    }
}

pub struct WaitNotifyEngine {
    state: Mutex<WaitState>,
    retention: Duration,
}

impl Default for WaitNotifyEngine {
    fn default() -> Self {
        Self::with_retention(DEFAULT_RETENTION)
    }
}

impl WaitNotifyEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(retention: Duration) -> Self {
        Self {
            state: Mutex::new(WaitState::default()),
            retention,
        }
    }

    fn state(&self) -> MutexGuard<'_, WaitState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `callback` once every id in `correlation_ids` has been notified
    pub fn wait_for_all<F>(&self, correlation_ids: Vec<String>, callback: F)
    where
        F: FnOnce(Responses) + Send + 'static,
    {
        let ready = {
            let mut state = self.state();
            if let Some(id) = correlation_ids.iter().find(|id| state.cancelled.contains_key(*id)) {
                debug!("{} was cancelled, not waiting", id);
                return;
            }
            let mut waiter = Waiter {
                pending: HashSet::new(),
                responses: HashMap::new(),
                callback: Box::new(callback),
            };
            for id in correlation_ids {
                match state.early.remove(&id) {
                    Some((_, data)) => {
                        debug!("Claimed early notification for {}", id);
                        waiter.responses.insert(id, data);
                    }
                    None => {
                        waiter.pending.insert(id);
                    }
                }
            }

            if waiter.pending.is_empty() {
                Some(waiter)
            } else {
                let waiter_id = state.next_waiter;
                state.next_waiter += 1;
                for id in &waiter.pending {
                    if state.by_correlation.insert(id.clone(), waiter_id).is_some() {
                        warn!("Correlation id {} was already awaited; replacing waiter", id);
                    }
                }
                state.waiters.insert(waiter_id, waiter);
                None
            }
        };

        if let Some(waiter) = ready {
            (waiter.callback)(waiter.responses);
        }
    }

    /// Answer one correlation id
    pub fn notify(&self, correlation_id: &str, data: ResponseData) {
        let done = {
            let mut state = self.state();
            let Some(waiter_id) = state.by_correlation.remove(correlation_id) else {
                state.prune(self.retention);
                if state.cancelled.contains_key(correlation_id) {
                    debug!("{} was cancelled, dropping notification", correlation_id);
                } else {
                    debug!("No waiter for {} yet, keeping notification", correlation_id);
                    state
                        .early
                        .insert(correlation_id.to_string(), (Instant::now(), data));
                }
                return;
            };
            let finished = match state.waiters.get_mut(&waiter_id) {
                Some(waiter) => {
                    waiter.pending.remove(correlation_id);
                    waiter.responses.insert(correlation_id.to_string(), data);
                    waiter.pending.is_empty()
                }
                None => false,
            };
            if finished {
                state.waiters.remove(&waiter_id)
            } else {
                None
            }
        };

        if let Some(waiter) = done {
            (waiter.callback)(waiter.responses);
        }
    }

    /// Stop waiting on `correlation_ids`
    ///
    /// Waiters holding any of the ids are dropped without running, kept
    /// notifications for them are discarded, and answers arriving later are
    /// ignored. Returns the number of waiters dropped.
    pub fn cancel(&self, correlation_ids: &[String]) -> usize {
        let mut state = self.state();
        state.prune(self.retention);
        let now = Instant::now();
        let mut dropped = 0;
        for id in correlation_ids {
            state.early.remove(id);
            state.cancelled.insert(id.clone(), now);
            let Some(waiter_id) = state.by_correlation.remove(id) else {
                continue;
            };
            if let Some(waiter) = state.waiters.remove(&waiter_id) {
                dropped += 1;
                for other in waiter.pending {
                    state.by_correlation.remove(&other);
                    state.cancelled.insert(other, now);
                }
            }
        }
        if dropped > 0 {
            debug!("Cancelled {} waiters", dropped);
        }
        dropped
    }

    /// Number of correlation ids still awaited
    pub fn pending_count(&self) -> usize {
        self.state().by_correlation.len()
    }

    /// Number of notifications kept for ids nobody waits on yet
    pub fn early_count(&self) -> usize {
        self.state().early.len()
    }
}
