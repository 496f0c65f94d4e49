//! Host-side request lifecycle tracking.
//!
//! The tracker owns the `req_id` counter, the round-robin slot binding,
//! per-request resolver state and the resubmission counters. All mutation
//! happens under one short mutex (every operation is O(1)); lifecycle
//! hooks and resolver callbacks fire after the guard drops so they can
//! re-enter the tracker freely.

use crate::error::EvalError;
use crate::hooks::{NoopHooks, TrackerHooks};
use crossbeam_utils::CachePadded;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tracing::{debug, trace};

/// Result delivered to a request's resolver.
pub type EvalResult = Result<u32, EvalError>;

/// Resolver state for one request.
///
/// The "completion arrives before the caller registers a resolver" race is
/// resolved structurally: an early completion is stashed and handed over
/// at registration time. No sentinel values.
enum ReqState {
    /// Created; neither resolver nor completion has arrived.
    Created,
    /// A resolver is registered and waiting.
    Waiting(oneshot::Sender<EvalResult>),
    /// A completion arrived before any resolver registered.
    Stashed(EvalResult),
    /// Delivered; later completions are no-ops.
    Resolved,
}

struct Record {
    slot: usize,
    resubmits: u32,
    state: ReqState,
}

struct Inner {
    next_id: u32,
    next_slot: usize,
    requests: HashMap<u32, Record>,
}

/// Request lifecycle manager.
pub struct RequestTracker {
    inner: Mutex<Inner>,
    n_workers: usize,
    max_resubmits: u32,
    /// Successful completions only; errors never bump this.
    completed: AtomicU64,
    /// Best-effort per-slot pending gauges, observable by instrumentation.
    pending: Vec<CachePadded<AtomicUsize>>,
    hooks: Arc<dyn TrackerHooks>,
}

impl RequestTracker {
    pub fn new(n_workers: usize, max_resubmits: u32) -> Self {
        Self::with_hooks(n_workers, max_resubmits, Arc::new(NoopHooks))
    }

    pub fn with_hooks(
        n_workers: usize,
        max_resubmits: u32,
        hooks: Arc<dyn TrackerHooks>,
    ) -> Self {
        assert!(n_workers > 0, "tracker needs at least one worker slot");
        Self {
            inner: Mutex::new(Inner {
                next_id: 1,
                next_slot: 0,
                requests: HashMap::new(),
            }),
            n_workers,
            max_resubmits,
            completed: AtomicU64::new(0),
            pending: (0..n_workers)
                .map(|_| CachePadded::new(AtomicUsize::new(0)))
                .collect(),
            hooks,
        }
    }

    /// Creates a request bound to the next worker slot in round-robin
    /// order. Ids are non-zero and monotonic; after a 32-bit wrap any id
    /// still in flight is skipped rather than reused.
    pub fn create_request(&self) -> (u32, usize) {
        let (req_id, slot) = {
            let mut inner = self.inner.lock().unwrap();

            let mut id = inner.next_id;
            while id == 0 || inner.requests.contains_key(&id) {
                id = id.wrapping_add(1);
            }
            inner.next_id = id.wrapping_add(1);

            let slot = inner.next_slot;
            inner.next_slot = (inner.next_slot + 1) % self.n_workers;

            inner.requests.insert(
                id,
                Record {
                    slot,
                    resubmits: 0,
                    state: ReqState::Created,
                },
            );
            (id, slot)
        };
        self.pending[slot].fetch_add(1, Ordering::Relaxed);
        trace!(req_id, slot, "request created");
        self.hooks.on_created(req_id, slot);
        (req_id, slot)
    }

    /// Registers the resolver for a request. If a completion was stashed
    /// before registration, it is delivered immediately.
    pub fn mark_pending(&self, req_id: u32, resolver: oneshot::Sender<EvalResult>) {
        let mut inner = self.inner.lock().unwrap();
        let Some(record) = inner.requests.get_mut(&req_id) else {
            return;
        };
        match std::mem::replace(&mut record.state, ReqState::Resolved) {
            ReqState::Created => {
                record.state = ReqState::Waiting(resolver);
            }
            ReqState::Stashed(result) => {
                inner.requests.remove(&req_id);
                drop(inner);
                let _ = resolver.send(result);
            }
            // A second registration or a registration after delivery
            // drops the new resolver.
            other => {
                record.state = other;
            }
        }
    }

    /// Records a successful completion: resolves the waiting resolver or
    /// stashes the value until one registers. Idempotent once resolved.
    pub fn mark_completed(&self, req_id: u32, node_id: u32) {
        let delivery = {
            let mut inner = self.inner.lock().unwrap();
            let Some(record) = inner.requests.get_mut(&req_id) else {
                return;
            };
            let slot = record.slot;
            match std::mem::replace(&mut record.state, ReqState::Resolved) {
                ReqState::Waiting(tx) => {
                    inner.requests.remove(&req_id);
                    Some((slot, Some(tx)))
                }
                ReqState::Created => {
                    record.state = ReqState::Stashed(Ok(node_id));
                    Some((slot, None))
                }
                // Already stashed or resolved: keep the first outcome.
                other => {
                    record.state = other;
                    None
                }
            }
        };
        let Some((slot, tx)) = delivery else {
            return;
        };
        self.pending[slot].fetch_sub(1, Ordering::Relaxed);
        self.completed.fetch_add(1, Ordering::Relaxed);
        if let Some(tx) = tx {
            let _ = tx.send(Ok(node_id));
        }
        debug!(req_id, node_id, "request completed");
        self.hooks.on_completed(req_id, node_id);
    }

    /// Records a failed completion: rejects the waiting resolver, or drops
    /// the request if none registered. Never bumps the completed counter.
    pub fn mark_error(&self, req_id: u32, error: EvalError) {
        let rejected = {
            let mut inner = self.inner.lock().unwrap();
            let Some(record) = inner.requests.remove(&req_id) else {
                return;
            };
            let slot = record.slot;
            match record.state {
                ReqState::Waiting(tx) => Some((slot, Some(tx))),
                ReqState::Created | ReqState::Stashed(_) => Some((slot, None)),
                ReqState::Resolved => None,
            }
        };
        let Some((slot, tx)) = rejected else {
            return;
        };
        self.pending[slot].fetch_sub(1, Ordering::Relaxed);
        if let Some(tx) = tx {
            let _ = tx.send(Err(error.clone()));
        }
        debug!(req_id, %error, "request errored");
        self.hooks.on_errored(req_id, &error);
    }

    /// Bumps the resubmission counter, failing once past the limit.
    pub fn increment_resubmit(&self, req_id: u32) -> Result<u32, EvalError> {
        let count = {
            let mut inner = self.inner.lock().unwrap();
            let Some(record) = inner.requests.get_mut(&req_id) else {
                return Err(EvalError::ResubmissionLimitExceeded {
                    req_id,
                    max: self.max_resubmits,
                });
            };
            record.resubmits += 1;
            record.resubmits
        };
        if count > self.max_resubmits {
            return Err(EvalError::ResubmissionLimitExceeded {
                req_id,
                max: self.max_resubmits,
            });
        }
        self.hooks.on_resubmitted(req_id, count);
        Ok(count)
    }

    /// Instrumentation-only record of a worker yield.
    pub fn record_yield(&self, req_id: u32, node_id: u32) {
        trace!(req_id, node_id, "request yielded");
        self.hooks.on_yielded(req_id, node_id);
    }

    /// Rejects every outstanding request with `error`, exactly once each,
    /// and clears the pending gauges.
    pub fn abort_all(&self, error: &EvalError) {
        let drained: Vec<(u32, Option<oneshot::Sender<EvalResult>>)> = {
            let mut inner = self.inner.lock().unwrap();
            let drained = inner
                .requests
                .drain()
                .map(|(id, record)| match record.state {
                    ReqState::Waiting(tx) => (id, Some(tx)),
                    _ => (id, None),
                })
                .collect();
            drained
        };
        for gauge in &self.pending {
            gauge.store(0, Ordering::Relaxed);
        }
        debug!(count = drained.len(), %error, "aborting all requests");
        for (req_id, tx) in drained {
            if let Some(tx) = tx {
                let _ = tx.send(Err(error.clone()));
            }
            self.hooks.on_errored(req_id, error);
        }
    }

    /// Worker slot a request is bound to, if it is still tracked.
    pub fn slot_of(&self, req_id: u32) -> Option<usize> {
        self.inner
            .lock()
            .unwrap()
            .requests
            .get(&req_id)
            .map(|r| r.slot)
    }

    /// Count of successful completions.
    pub fn completed_count(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Best-effort pending count for one slot.
    pub fn pending_for_slot(&self, slot: usize) -> usize {
        self.pending[slot].load(Ordering::Relaxed)
    }

    /// Number of requests currently tracked.
    pub fn in_flight(&self) -> usize {
        self.inner.lock().unwrap().requests.len()
    }

    #[cfg(test)]
    fn force_next_id(&self, id: u32) {
        self.inner.lock().unwrap().next_id = id;
    }
}

impl std::fmt::Debug for RequestTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestTracker")
            .field("n_workers", &self.n_workers)
            .field("max_resubmits", &self.max_resubmits)
            .field("in_flight", &self.in_flight())
            .field("completed", &self.completed_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn req_ids_are_monotonic_and_nonzero() {
        let tracker = RequestTracker::new(4, 10);
        let mut last = 0;
        for _ in 0..100 {
            let (id, _) = tracker.create_request();
            assert!(id > last);
            last = id;
        }
    }

    #[test]
    fn slots_round_robin() {
        let tracker = RequestTracker::new(3, 10);
        let slots: Vec<usize> = (0..7).map(|_| tracker.create_request().1).collect();
        assert_eq!(slots, vec![0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn wrap_skips_in_flight_ids() {
        let tracker = RequestTracker::new(1, 10);
        let (first, _) = tracker.create_request();
        assert_eq!(first, 1);

        // Force the counter to the end of the id space; the next two
        // allocations wrap, skip 0, and skip the live id 1.
        tracker.force_next_id(u32::MAX);
        let (a, _) = tracker.create_request();
        let (b, _) = tracker.create_request();
        assert_eq!(a, u32::MAX);
        assert_eq!(b, 2, "wrapped allocation must skip 0 and the live id 1");
    }

    #[test]
    fn completion_before_registration_is_stashed() {
        let tracker = RequestTracker::new(1, 10);
        let (req, _) = tracker.create_request();

        tracker.mark_completed(req, 77);
        assert_eq!(tracker.completed_count(), 1);

        let (tx, mut rx) = oneshot::channel();
        tracker.mark_pending(req, tx);
        assert_eq!(rx.try_recv().unwrap(), Ok(77));
        assert_eq!(tracker.in_flight(), 0);
    }

    #[test]
    fn completion_after_registration_resolves() {
        let tracker = RequestTracker::new(1, 10);
        let (req, _) = tracker.create_request();

        let (tx, mut rx) = oneshot::channel();
        tracker.mark_pending(req, tx);
        assert!(rx.try_recv().is_err());

        tracker.mark_completed(req, 42);
        assert_eq!(rx.try_recv().unwrap(), Ok(42));
    }

    #[test]
    fn second_completion_is_a_noop() {
        let tracker = RequestTracker::new(1, 10);
        let (req, _) = tracker.create_request();
        let (tx, mut rx) = oneshot::channel();
        tracker.mark_pending(req, tx);

        tracker.mark_completed(req, 1);
        tracker.mark_completed(req, 2);
        assert_eq!(rx.try_recv().unwrap(), Ok(1));
        assert_eq!(tracker.completed_count(), 1);
    }

    #[test]
    fn errors_do_not_bump_completed() {
        let tracker = RequestTracker::new(2, 10);
        let (req, slot) = tracker.create_request();
        assert_eq!(tracker.pending_for_slot(slot), 1);

        let (tx, mut rx) = oneshot::channel();
        tracker.mark_pending(req, tx);
        tracker.mark_error(req, EvalError::Terminated);

        assert_eq!(rx.try_recv().unwrap(), Err(EvalError::Terminated));
        assert_eq!(tracker.completed_count(), 0);
        assert_eq!(tracker.pending_for_slot(slot), 0);
    }

    #[test]
    fn abort_rejects_every_pending_exactly_once() {
        #[derive(Default)]
        struct Counting {
            errored: AtomicU32,
        }
        impl TrackerHooks for Counting {
            fn on_errored(&self, _req_id: u32, _error: &EvalError) {
                self.errored.fetch_add(1, Ordering::Relaxed);
            }
        }

        let hooks = Arc::new(Counting::default());
        let tracker = RequestTracker::with_hooks(2, 10, hooks.clone());

        let mut receivers = Vec::new();
        for _ in 0..5 {
            let (req, _) = tracker.create_request();
            let (tx, rx) = oneshot::channel();
            tracker.mark_pending(req, tx);
            receivers.push(rx);
        }

        tracker.abort_all(&EvalError::Terminated);

        for mut rx in receivers {
            assert_eq!(rx.try_recv().unwrap(), Err(EvalError::Terminated));
        }
        assert_eq!(hooks.errored.load(Ordering::Relaxed), 5);
        assert_eq!(tracker.in_flight(), 0);
        assert_eq!(tracker.pending_for_slot(0), 0);
        assert_eq!(tracker.pending_for_slot(1), 0);
    }

    #[test]
    fn resubmit_limit_fails_exactly_past_max() {
        let tracker = RequestTracker::new(1, 10);
        let (req, _) = tracker.create_request();

        for expected in 1..=10 {
            assert_eq!(tracker.increment_resubmit(req).unwrap(), expected);
        }
        assert_eq!(
            tracker.increment_resubmit(req),
            Err(EvalError::ResubmissionLimitExceeded { req_id: req, max: 10 })
        );
    }

    #[test]
    fn error_without_resolver_drops_the_request() {
        let tracker = RequestTracker::new(1, 10);
        let (req, _) = tracker.create_request();
        tracker.mark_error(req, EvalError::Terminated);
        assert_eq!(tracker.in_flight(), 0);
        // A late completion for the dropped request is ignored.
        tracker.mark_completed(req, 9);
        assert_eq!(tracker.completed_count(), 0);
    }
}
