//! Host-side I/O management.
//!
//! Bridges the host's byte-oriented I/O to the per-slot stdin/stdout
//! rings, and turns stdin-wait ring entries back into submissions when
//! input arrives. Wakes are budgeted: each `write_stdin` of `n` bytes
//! charges `n` wake credits, leftovers carry over to the next call, so a
//! burst of writes cannot flood the submission queues.
//!
//! A suspension can surface in two orders: the completion (carrying the
//! `req_id`) may be drained before or after the wait-ring entry (carrying
//! only the node id). Entries whose request is not yet known are parked in
//! an insertion-ordered pending buffer and drained first on the next wake.

use crate::error::EvalError;
use crate::tracker::RequestTracker;
use skiarena::{ByteRing, SharedRegion, SubmissionQueue, WaitRing, WorkUnit};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Host-side rings for one slot.
struct SlotIo {
    sq: SubmissionQueue,
    stdin: ByteRing,
    stdout: ByteRing,
    wait: WaitRing,
}

/// The I/O manager. Lives on the driver task; never touched by workers.
pub struct IoManager {
    slots: Vec<SlotIo>,
    /// Suspended node -> owning request, registered when the YieldIo
    /// completion is drained.
    suspended: HashMap<u32, u32>,
    /// Wait-ring entries seen before their request was registered.
    pending_waiters: VecDeque<u32>,
    /// Wake credits carried over from previous calls.
    carry: usize,
    busy_wait_threshold: u32,
    aborted: Arc<AtomicBool>,
}

impl IoManager {
    pub(crate) fn new(
        regions: &[Arc<SharedRegion>],
        busy_wait_threshold: u32,
        aborted: Arc<AtomicBool>,
    ) -> Self {
        let slots = regions
            .iter()
            .map(|region| SlotIo {
                sq: SubmissionQueue::new(region),
                stdin: ByteRing::stdin(region),
                stdout: ByteRing::stdout(region),
                wait: WaitRing::new(region),
            })
            .collect();
        Self {
            slots,
            suspended: HashMap::new(),
            pending_waiters: VecDeque::new(),
            carry: 0,
            busy_wait_threshold,
            aborted,
        }
    }

    /// Registers a drained `YieldIo` completion.
    pub(crate) fn register_suspension(&mut self, node_id: u32, req_id: u32) {
        trace!(node_id, req_id, "suspension registered");
        self.suspended.insert(node_id, req_id);
    }

    /// Number of suspensions whose request is known.
    pub fn suspended_count(&self) -> usize {
        self.suspended.len()
    }

    /// Writes every byte to each slot's stdin ring, then wakes waiters
    /// with a credit per byte written.
    ///
    /// The byte-before-wake ordering guarantee comes from the ring
    /// protocol: the stdin tail is released before any wake submission is
    /// enqueued, so a woken node always observes the byte.
    pub async fn write_stdin(
        &mut self,
        bytes: &[u8],
        tracker: &RequestTracker,
    ) -> Result<(), EvalError> {
        if bytes.is_empty() {
            return Ok(());
        }
        for slot in 0..self.slots.len() {
            let mut offset = 0;
            let mut attempts = 0u32;
            while offset < bytes.len() {
                if self.aborted.load(Ordering::Acquire) {
                    return Err(EvalError::Terminated);
                }
                let written = self.slots[slot].stdin.write(&bytes[offset..]);
                offset += written;
                if offset < bytes.len() {
                    attempts += 1;
                    escalating_yield(attempts, self.busy_wait_threshold).await;
                }
            }
        }
        debug!(len = bytes.len(), "stdin written");
        self.wake_stdin_waiters(bytes.len(), tracker).await
    }

    /// Drains up to `max` bytes from the stdout rings, in slot order.
    pub fn read_stdout(&mut self, max: usize) -> Vec<u8> {
        let mut out = vec![0u8; max];
        let mut filled = 0;
        for slot in &self.slots {
            if filled == max {
                break;
            }
            filled += slot.stdout.read(&mut out[filled..]);
        }
        out.truncate(filled);
        out
    }

    /// Wakes suspended nodes, spending at most `limit` plus carried-over
    /// credits. Pending waiters drain first (insertion order), then the
    /// per-slot stdin-wait rings; entries with no registered request are
    /// parked for the next call.
    pub async fn wake_stdin_waiters(
        &mut self,
        limit: usize,
        tracker: &RequestTracker,
    ) -> Result<(), EvalError> {
        let mut budget = limit + self.carry;

        // Previously parked waiters first.
        let mut still_pending = VecDeque::new();
        while budget > 0 {
            let Some(node_id) = self.pending_waiters.pop_front() else {
                break;
            };
            if let Some(req_id) = self.suspended.remove(&node_id) {
                self.submit_suspension(node_id, req_id, tracker).await?;
                budget -= 1;
            } else {
                still_pending.push_back(node_id);
            }
        }
        // Unknown waiters keep their insertion order ahead of anything the
        // rings produce below.
        while let Some(node_id) = still_pending.pop_back() {
            self.pending_waiters.push_front(node_id);
        }

        // Then the shared-memory wait rings.
        for slot in 0..self.slots.len() {
            if budget == 0 {
                break;
            }
            while budget > 0 {
                let Some(node_id) = self.slots[slot].wait.try_dequeue() else {
                    break;
                };
                if let Some(req_id) = self.suspended.remove(&node_id) {
                    self.submit_suspension(node_id, req_id, tracker).await?;
                    budget -= 1;
                } else {
                    trace!(node_id, "waiter parked before registration");
                    self.pending_waiters.push_back(node_id);
                }
            }
        }

        self.carry = budget;
        Ok(())
    }

    /// Resubmits a woken node with a zero budget (budget inherited by the
    /// worker). Retries under the escalation policy; only termination can
    /// make this fail.
    async fn submit_suspension(
        &self,
        node_id: u32,
        req_id: u32,
        tracker: &RequestTracker,
    ) -> Result<(), EvalError> {
        let Some(slot) = tracker.slot_of(req_id) else {
            // Request was aborted while suspended; nothing to wake.
            debug!(node_id, req_id, "dropping wake for untracked request");
            return Ok(());
        };
        let unit = WorkUnit {
            node_id,
            req_id,
            max_steps: 0,
        };
        submit_with_escalation(
            &self.slots[slot].sq,
            unit,
            &self.aborted,
            self.busy_wait_threshold,
        )
        .await
    }
}

impl std::fmt::Debug for IoManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoManager")
            .field("slots", &self.slots.len())
            .field("suspended", &self.suspended.len())
            .field("pending_waiters", &self.pending_waiters.len())
            .field("carry", &self.carry)
            .finish()
    }
}

/// Enqueues a work unit under the busy-wait escalation policy: up to
/// `threshold` attempts via a cooperative yield that stays in the
/// scheduler, then zero-duration sleeps. The aborted flag preempts every
/// attempt.
pub(crate) async fn submit_with_escalation(
    sq: &SubmissionQueue,
    unit: WorkUnit,
    aborted: &AtomicBool,
    threshold: u32,
) -> Result<(), EvalError> {
    let mut attempts = 0u32;
    loop {
        if aborted.load(Ordering::Acquire) {
            return Err(EvalError::Terminated);
        }
        if sq.try_enqueue(unit) {
            return Ok(());
        }
        attempts += 1;
        escalating_yield(attempts, threshold).await;
    }
}

async fn escalating_yield(attempts: u32, threshold: u32) {
    if attempts <= threshold {
        tokio::task::yield_now().await;
    } else {
        tokio::time::sleep(Duration::ZERO).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skiarena::Layout;

    fn regions(n: usize) -> Vec<Arc<SharedRegion>> {
        (0..n)
            .map(|s| {
                SharedRegion::create(Layout::new(16, 256).unwrap(), s as u32 * 256).unwrap()
            })
            .collect()
    }

    #[tokio::test]
    async fn wake_dispatches_known_waiters() {
        let regions = regions(1);
        let aborted = Arc::new(AtomicBool::new(false));
        let tracker = RequestTracker::new(1, 10);
        let mut io = IoManager::new(&regions, 4, aborted);

        let (req, _slot) = tracker.create_request();
        let wait = WaitRing::new(&regions[0]);
        assert!(wait.try_enqueue(77));
        io.register_suspension(77, req);

        io.wake_stdin_waiters(1, &tracker).await.unwrap();

        let sq = SubmissionQueue::new(&regions[0]);
        let unit = sq.try_dequeue().expect("wake should be submitted");
        assert_eq!(unit.node_id, 77);
        assert_eq!(unit.req_id, req);
        assert_eq!(unit.max_steps, 0, "wake submissions inherit the budget");
    }

    #[tokio::test]
    async fn unknown_waiters_park_until_registration() {
        let regions = regions(1);
        let aborted = Arc::new(AtomicBool::new(false));
        let tracker = RequestTracker::new(1, 10);
        let mut io = IoManager::new(&regions, 4, aborted);

        // The wait-ring entry shows up before the completion registered it.
        let wait = WaitRing::new(&regions[0]);
        assert!(wait.try_enqueue(55));
        io.wake_stdin_waiters(1, &tracker).await.unwrap();

        let sq = SubmissionQueue::new(&regions[0]);
        assert!(sq.try_dequeue().is_none());

        // Registration arrives; the next wake drains the parked entry, and
        // the earlier unspent credit carried over.
        let (req, _slot) = tracker.create_request();
        io.register_suspension(55, req);
        io.wake_stdin_waiters(0, &tracker).await.unwrap();

        let unit = sq.try_dequeue().expect("parked waiter should wake");
        assert_eq!(unit.node_id, 55);
        assert_eq!(unit.req_id, req);
    }

    #[tokio::test]
    async fn wake_budget_is_bounded_and_carries_over() {
        let regions = regions(1);
        let aborted = Arc::new(AtomicBool::new(false));
        let tracker = RequestTracker::new(1, 10);
        let mut io = IoManager::new(&regions, 4, aborted);

        let wait = WaitRing::new(&regions[0]);
        let mut reqs = Vec::new();
        for node in [10, 11, 12] {
            let (req, _) = tracker.create_request();
            assert!(wait.try_enqueue(node));
            io.register_suspension(node, req);
            reqs.push(req);
        }

        // One credit: exactly one wake.
        io.wake_stdin_waiters(1, &tracker).await.unwrap();
        let sq = SubmissionQueue::new(&regions[0]);
        assert!(sq.try_dequeue().is_some());
        assert!(sq.try_dequeue().is_none());

        // Three more credits cover the remaining two.
        io.wake_stdin_waiters(3, &tracker).await.unwrap();
        assert!(sq.try_dequeue().is_some());
        assert!(sq.try_dequeue().is_some());
        assert!(sq.try_dequeue().is_none());
    }

    #[tokio::test]
    async fn write_stdin_lands_before_wake() {
        let regions = regions(1);
        let aborted = Arc::new(AtomicBool::new(false));
        let tracker = RequestTracker::new(1, 10);
        let mut io = IoManager::new(&regions, 4, aborted);

        let (req, _) = tracker.create_request();
        let wait = WaitRing::new(&regions[0]);
        assert!(wait.try_enqueue(9));
        io.register_suspension(9, req);

        io.write_stdin(b"A", &tracker).await.unwrap();

        // By the time the wake unit is visible, the byte is too.
        let sq = SubmissionQueue::new(&regions[0]);
        assert!(sq.try_dequeue().is_some());
        let stdin = ByteRing::stdin(&regions[0]);
        assert_eq!(stdin.pop(), Some(b'A'));
    }

    #[tokio::test]
    async fn read_stdout_drains_in_slot_order() {
        let regions = regions(2);
        let aborted = Arc::new(AtomicBool::new(false));
        let mut io = IoManager::new(&regions, 4, aborted);

        ByteRing::stdout(&regions[0]).write(b"ab");
        ByteRing::stdout(&regions[1]).write(b"cd");

        assert_eq!(io.read_stdout(16), b"abcd");
        assert_eq!(io.read_stdout(16), b"");
    }

    #[tokio::test]
    async fn termination_preempts_submission_retry() {
        let regions = regions(1);
        let aborted = Arc::new(AtomicBool::new(true));
        let sq = SubmissionQueue::new(&regions[0]);
        let unit = WorkUnit {
            node_id: 1,
            req_id: 1,
            max_steps: 0,
        };
        let err = submit_with_escalation(&sq, unit, &aborted, 4)
            .await
            .unwrap_err();
        assert_eq!(err, EvalError::Terminated);
    }
}
