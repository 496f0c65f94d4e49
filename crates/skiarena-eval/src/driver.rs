//! The parallel arena driver.
//!
//! The driver owns one region + worker per slot and runs entirely on one
//! task: it interleaves submissions, completion draining and result
//! emission cooperatively, yielding between batches, and never blocks a
//! worker thread. Requests are pinned to slots round-robin at creation;
//! each slot runs at most one request at a time, so every slot's arena is
//! mutated serially and a fixed input produces a fixed id sequence, the
//! foundation of deterministic forest replay.
//!
//! Two modes:
//!
//! - [`ArenaDriver::evaluate`] submits one term with the full step budget
//!   per call and resolves through the tracker (the linker-facing API).
//! - [`ArenaDriver::run_forest`] drives many expressions through a sliding
//!   concurrency window in one-reduction-per-call mode, recording each
//!   rewrite, and streams results in submission order regardless of
//!   completion order.

use crate::config::EvalConfig;
use crate::error::EvalError;
use crate::hooks::TrackerHooks;
use crate::io::{submit_with_escalation, IoManager};
use crate::kernel::FAULT_ARENA_FULL;
use crate::tracker::RequestTracker;
use crate::worker::WorkerHandle;
use skiarena::{
    Arena, ArenaError, CompletionQueue, CompletionStatus, Layout, SharedRegion, SubmissionQueue,
    Term, WorkUnit,
};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

/// Terminal state of one expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExprOutcome {
    /// Reached normal form.
    Completed,
    /// Step budget, resubmission limit or cycle cutoff.
    Diverged,
    /// Finalized by a fatal driver condition.
    Failed,
}

/// The recorded evaluation of one expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvalPath {
    /// Position in the submitted expression sequence.
    pub expr_index: usize,
    /// Pretty-printed source expression.
    pub expr: String,
    /// Arena id of the lowered source.
    pub source: u32,
    /// Arena id of the last head (normal form, or where evaluation stopped).
    pub sink: u32,
    /// The rewrites, in the exact order the worker performed them,
    /// truncated at the configured path ceiling.
    pub steps: Vec<(u32, u32)>,
    pub reached_normal_form: bool,
    /// Total rewrites performed (not truncated).
    pub steps_taken: u32,
    /// True when evaluation stopped because a recent head id was revisited.
    pub cycle_detected: bool,
    pub outcome: ExprOutcome,
}

/// One worker slot: its region, host-side ring views and thread handle.
struct Slot {
    arena: Arena,
    sq: SubmissionQueue,
    cq: CompletionQueue,
    worker: WorkerHandle,
}

/// Sliding window of recently seen head ids, for cycle detection.
struct RecentWindow {
    cap: usize,
    order: VecDeque<u32>,
    seen: HashSet<u32>,
}

impl RecentWindow {
    fn new(cap: usize) -> Self {
        Self {
            cap,
            order: VecDeque::new(),
            seen: HashSet::new(),
        }
    }

    fn contains(&self, id: u32) -> bool {
        self.seen.contains(&id)
    }

    fn push(&mut self, id: u32) {
        if self.order.len() == self.cap {
            if let Some(old) = self.order.pop_front() {
                self.seen.remove(&old);
            }
        }
        self.order.push_back(id);
        self.seen.insert(id);
    }
}

/// Pre-lowered expression bound to its request and slot.
struct ExprPlan {
    req_id: u32,
    slot: usize,
    source: u32,
    expr: String,
}

/// Mutable state of an in-flight expression.
struct InFlight {
    current: u32,
    steps_taken: u32,
    path: Vec<(u32, u32)>,
    recent: RecentWindow,
}

/// The parallel evaluation driver.
pub struct ArenaDriver {
    config: EvalConfig,
    slots: Vec<Slot>,
    tracker: RequestTracker,
    io: IoManager,
    aborted: Arc<AtomicBool>,
    terminated: bool,
}

impl ArenaDriver {
    pub fn new(config: EvalConfig) -> Result<Self, EvalError> {
        Self::with_hooks(config, Arc::new(crate::hooks::NoopHooks))
    }

    /// Builds the driver with an instrumentation observer injected into
    /// the tracker.
    pub fn with_hooks(
        config: EvalConfig,
        hooks: Arc<dyn TrackerHooks>,
    ) -> Result<Self, EvalError> {
        config.validate()?;
        let aborted = Arc::new(AtomicBool::new(false));

        let layout = Layout::new(config.ring_entries(), config.arena_capacity)?;
        let mut regions = Vec::with_capacity(config.n_workers);
        let mut slots = Vec::with_capacity(config.n_workers);
        for s in 0..config.n_workers {
            let id_base = s as u32 * config.arena_capacity;
            // Raise the shutdown flag before any early return so workers
            // already spawned can be joined.
            let region = match SharedRegion::create(layout, id_base) {
                Ok(region) => region,
                Err(err) => {
                    aborted.store(true, Ordering::Release);
                    return Err(err.into());
                }
            };
            let worker = match WorkerHandle::spawn(s, Arc::clone(&region), Arc::clone(&aborted)) {
                Ok(worker) => worker,
                Err(err) => {
                    aborted.store(true, Ordering::Release);
                    return Err(EvalError::InvalidConfig(format!(
                        "worker spawn failed: {err}"
                    )));
                }
            };
            slots.push(Slot {
                arena: Arena::new(Arc::clone(&region)),
                sq: SubmissionQueue::new(&region),
                cq: CompletionQueue::new(&region),
                worker,
            });
            regions.push(region);
        }

        let tracker = RequestTracker::with_hooks(config.n_workers, config.max_resubmits, hooks);
        let io = IoManager::new(&regions, config.busy_wait_threshold, Arc::clone(&aborted));

        debug!(
            workers = config.n_workers,
            ring_entries = config.ring_entries(),
            capacity = config.arena_capacity,
            "driver started"
        );
        Ok(Self {
            config,
            slots,
            tracker,
            io,
            aborted,
            terminated: false,
        })
    }

    #[inline]
    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    #[inline]
    pub fn tracker(&self) -> &RequestTracker {
        &self.tracker
    }

    /// Pretty-prints any node id allocated by this driver.
    pub fn render(&self, id: u32) -> Result<String, EvalError> {
        let slot = self
            .slot_for_id(id)
            .ok_or(EvalError::Arena(ArenaError::Dangling { id }))?;
        Ok(self.slots[slot].arena.pretty(id)?)
    }

    /// Slot owning `id`, derived from the disjoint per-slot id ranges.
    fn slot_for_id(&self, id: u32) -> Option<usize> {
        if id == 0 {
            return None;
        }
        let slot = ((id - 1) / self.config.arena_capacity) as usize;
        (slot < self.slots.len()).then_some(slot)
    }

    /// Writes bytes to stdin and wakes suspended readers.
    pub async fn write_stdin(&mut self, bytes: &[u8]) -> Result<(), EvalError> {
        self.io.write_stdin(bytes, &self.tracker).await
    }

    /// Drains up to `max` bytes of program output.
    pub fn read_stdout(&mut self, max: usize) -> Vec<u8> {
        self.io.read_stdout(max)
    }

    /// Evaluates one term to normal form with the configured budgets.
    ///
    /// Submits with the full step budget per call; budget yields resubmit
    /// up to the resubmission limit, I/O yields wait for [`write_stdin`].
    ///
    /// [`write_stdin`]: ArenaDriver::write_stdin
    pub async fn evaluate(&mut self, term: &Term) -> Result<u32, EvalError> {
        self.evaluate_with_stdin(term, &[]).await
    }

    /// Like [`evaluate`], but holds `input` back until the program first
    /// suspends on stdin, exercising the suspend-then-wake path. Programs
    /// that never read simply ignore the input.
    ///
    /// [`evaluate`]: ArenaDriver::evaluate
    pub async fn evaluate_with_stdin(
        &mut self,
        term: &Term,
        input: &[u8],
    ) -> Result<u32, EvalError> {
        self.check_active()?;

        let (req_id, slot) = self.tracker.create_request();
        let source = match term.lower(&self.slots[slot].arena) {
            Ok(id) => id,
            Err(err) => return Err(self.fatal(err.into())),
        };
        let (tx, mut rx) = oneshot::channel();
        self.tracker.mark_pending(req_id, tx);

        self.submit_to(
            slot,
            WorkUnit {
                node_id: source,
                req_id,
                max_steps: self.config.max_steps,
            },
        )
        .await?;

        let mut pending_input = input;
        loop {
            self.drain_resolving().await?;
            if !pending_input.is_empty() && self.io.suspended_count() > 0 {
                let bytes = pending_input;
                pending_input = &[];
                self.io.write_stdin(bytes, &self.tracker).await?;
            }
            match rx.try_recv() {
                Ok(result) => return result,
                Err(oneshot::error::TryRecvError::Empty) => tokio::task::yield_now().await,
                Err(oneshot::error::TryRecvError::Closed) => return Err(EvalError::Terminated),
            }
        }
    }

    /// Drains completions in single-term mode: every request resolves
    /// through the tracker.
    async fn drain_resolving(&mut self) -> Result<(), EvalError> {
        for s in 0..self.slots.len() {
            loop {
                let Some(comp) = self.slots[s].cq.try_dequeue() else {
                    break;
                };
                trace!(req_id = comp.req_id, status = ?comp.status, "completion");
                match comp.status {
                    CompletionStatus::Done => {
                        self.tracker.mark_completed(comp.req_id, comp.node_id);
                    }
                    CompletionStatus::YieldBudget => {
                        self.tracker.record_yield(comp.req_id, comp.node_id);
                        match self.tracker.increment_resubmit(comp.req_id) {
                            Ok(_) => {
                                self.submit_to(
                                    s,
                                    WorkUnit {
                                        node_id: comp.node_id,
                                        req_id: comp.req_id,
                                        max_steps: self.config.max_steps,
                                    },
                                )
                                .await?;
                            }
                            Err(err) => self.tracker.mark_error(comp.req_id, err),
                        }
                    }
                    CompletionStatus::YieldIo => {
                        self.tracker.record_yield(comp.req_id, comp.node_id);
                        self.io.register_suspension(comp.node_id, comp.req_id);
                    }
                    CompletionStatus::Error => {
                        let err = self.fault_error(comp.aux);
                        return Err(self.fatal(err));
                    }
                }
            }
        }
        Ok(())
    }

    /// Evaluates every expression and streams an [`EvalPath`] per
    /// expression, in submission order, through `results`.
    ///
    /// All expressions are pre-lowered sequentially before any unit is
    /// submitted, then driven in one-reduction-per-call mode through the
    /// sliding window. Recoverable conditions (budget, resubmit limit,
    /// cycle cutoff) finalize the owning expression and keep the run
    /// going; worker faults abort everything after flushing the results
    /// already in order.
    pub async fn run_forest(
        &mut self,
        terms: &[Term],
        results: mpsc::Sender<EvalPath>,
    ) -> Result<(), EvalError> {
        self.check_active()?;

        let n = terms.len();
        let w = self.config.n_workers;

        // Deterministic ids: create requests (round-robin) and lower every
        // expression into its slot's arena before any concurrent work.
        let mut plans = Vec::with_capacity(n);
        for term in terms {
            let (req_id, slot) = self.tracker.create_request();
            let source = match term.lower(&self.slots[slot].arena) {
                Ok(id) => id,
                Err(err) => return Err(self.fatal(err.into())),
            };
            plans.push(ExprPlan {
                req_id,
                slot,
                source,
                expr: term.to_string(),
            });
        }

        let mut slot_queue: Vec<VecDeque<usize>> = vec![VecDeque::new(); w];
        for (i, plan) in plans.iter().enumerate() {
            slot_queue[plan.slot].push_back(i);
        }

        let mut active: HashMap<u32, usize> = HashMap::new();
        let mut flights: HashMap<usize, InFlight> = HashMap::new();
        let mut slot_busy = vec![false; w];
        let mut buffer: BTreeMap<usize, EvalPath> = BTreeMap::new();
        let mut next_emit = 0usize;
        let mut finished = 0usize;
        let mut idle_rounds = 0u32;

        while finished < n {
            if self.aborted.load(Ordering::Acquire) {
                return Err(EvalError::Terminated);
            }

            // Fill the window: one submission per free slot.
            for s in 0..w {
                if slot_busy[s] {
                    continue;
                }
                let Some(&i) = slot_queue[s].front() else {
                    continue;
                };
                let plan = &plans[i];
                self.submit_to(
                    s,
                    WorkUnit {
                        node_id: plan.source,
                        req_id: plan.req_id,
                        max_steps: 1,
                    },
                )
                .await?;
                slot_queue[s].pop_front();
                slot_busy[s] = true;
                active.insert(plan.req_id, i);
                let mut recent = RecentWindow::new(self.config.history_window);
                recent.push(plan.source);
                flights.insert(
                    i,
                    InFlight {
                        current: plan.source,
                        steps_taken: 0,
                        path: Vec::new(),
                        recent,
                    },
                );
            }

            // Drain a batch of completions across all slots.
            let mut progressed = false;
            for s in 0..w {
                loop {
                    let Some(comp) = self.slots[s].cq.try_dequeue() else {
                        break;
                    };
                    progressed = true;

                    let Some(&expr_idx) = active.get(&comp.req_id) else {
                        warn!(req_id = comp.req_id, "stray completion dropped");
                        continue;
                    };
                    let Some(current) = flights.get(&expr_idx).map(|f| f.current) else {
                        warn!(expr_idx, "completion for an already finalized expression");
                        continue;
                    };

                    match comp.status {
                        CompletionStatus::Done if comp.node_id == current => {
                            // Fixed point: the id came back unchanged.
                            self.tracker.mark_completed(comp.req_id, comp.node_id);
                            finalize(
                                &mut buffer,
                                &mut flights,
                                &mut active,
                                &mut slot_busy,
                                &mut finished,
                                &plans,
                                expr_idx,
                                current,
                                true,
                                false,
                                ExprOutcome::Completed,
                            );
                        }
                        CompletionStatus::Done | CompletionStatus::YieldBudget => {
                            let Some(flight) = flights.get_mut(&expr_idx) else {
                                continue;
                            };
                            let mut revisited = false;
                            if comp.node_id != flight.current {
                                if flight.path.len() < self.config.path_ceiling {
                                    flight.path.push((flight.current, comp.node_id));
                                }
                                flight.steps_taken += match comp.status {
                                    CompletionStatus::YieldBudget => comp.aux.max(1),
                                    _ => 1,
                                };
                                revisited = flight.recent.contains(comp.node_id);
                                flight.current = comp.node_id;
                                if !revisited {
                                    flight.recent.push(comp.node_id);
                                }
                            } else if comp.status == CompletionStatus::YieldBudget {
                                // No progress this call (e.g. stdout was
                                // full); aux carries the true step count.
                                flight.steps_taken += comp.aux;
                            }

                            if revisited {
                                let sink = comp.node_id;
                                let steps_taken = flight.steps_taken;
                                self.tracker.mark_error(
                                    comp.req_id,
                                    EvalError::StepBudgetExhausted {
                                        req_id: comp.req_id,
                                        budget: steps_taken,
                                    },
                                );
                                finalize(
                                    &mut buffer,
                                    &mut flights,
                                    &mut active,
                                    &mut slot_busy,
                                    &mut finished,
                                    &plans,
                                    expr_idx,
                                    sink,
                                    false,
                                    true,
                                    ExprOutcome::Diverged,
                                );
                                continue;
                            }

                            let next = flight.current;
                            if flight.steps_taken >= self.config.max_steps {
                                self.tracker.mark_error(
                                    comp.req_id,
                                    EvalError::StepBudgetExhausted {
                                        req_id: comp.req_id,
                                        budget: self.config.max_steps,
                                    },
                                );
                                finalize(
                                    &mut buffer,
                                    &mut flights,
                                    &mut active,
                                    &mut slot_busy,
                                    &mut finished,
                                    &plans,
                                    expr_idx,
                                    next,
                                    false,
                                    false,
                                    ExprOutcome::Diverged,
                                );
                                continue;
                            }

                            match self.tracker.increment_resubmit(comp.req_id) {
                                Ok(_) => {
                                    self.submit_to(
                                        s,
                                        WorkUnit {
                                            node_id: next,
                                            req_id: comp.req_id,
                                            max_steps: 1,
                                        },
                                    )
                                    .await?;
                                }
                                Err(err) => {
                                    self.tracker.mark_error(comp.req_id, err);
                                    finalize(
                                        &mut buffer,
                                        &mut flights,
                                        &mut active,
                                        &mut slot_busy,
                                        &mut finished,
                                        &plans,
                                        expr_idx,
                                        next,
                                        false,
                                        false,
                                        ExprOutcome::Diverged,
                                    );
                                }
                            }
                        }
                        CompletionStatus::YieldIo => {
                            // Slot stays busy; the I/O manager resubmits
                            // when input arrives.
                            self.tracker.record_yield(comp.req_id, comp.node_id);
                            self.io.register_suspension(comp.node_id, comp.req_id);
                        }
                        CompletionStatus::Error => {
                            // Flush everything already in order, then abort.
                            while let Some(path) = buffer.remove(&next_emit) {
                                let _ = results.send(path).await;
                                next_emit += 1;
                            }
                            let err = self.fault_error(comp.aux);
                            return Err(self.fatal(err));
                        }
                    }
                }
            }

            // Emit the contiguous prefix, preserving submission order.
            while let Some(path) = buffer.remove(&next_emit) {
                if results.send(path).await.is_err() {
                    debug!("result receiver dropped; stopping forest run");
                    return Ok(());
                }
                next_emit += 1;
            }

            // Voluntary yield between batches; escalate when idle.
            if progressed {
                idle_rounds = 0;
                tokio::task::yield_now().await;
            } else {
                idle_rounds += 1;
                if idle_rounds <= self.config.busy_wait_threshold {
                    tokio::task::yield_now().await;
                } else {
                    tokio::time::sleep(Duration::ZERO).await;
                }
            }
        }

        while let Some(path) = buffer.remove(&next_emit) {
            if results.send(path).await.is_err() {
                return Ok(());
            }
            next_emit += 1;
        }
        Ok(())
    }

    /// Sets the aborted flag, rejects all pending requests and joins the
    /// workers. Idempotent; also runs on drop.
    pub fn terminate(&mut self) {
        if self.terminated {
            return;
        }
        self.terminated = true;
        self.aborted.store(true, Ordering::Release);
        self.tracker.abort_all(&EvalError::Terminated);
        for slot in &mut self.slots {
            slot.worker.join();
        }
        debug!("driver terminated");
    }

    fn check_active(&self) -> Result<(), EvalError> {
        if self.terminated || self.aborted.load(Ordering::Acquire) {
            return Err(EvalError::Terminated);
        }
        Ok(())
    }

    /// Fatal path: abort every pending request and surface the error.
    fn fatal(&self, err: EvalError) -> EvalError {
        warn!(%err, "fatal driver condition");
        self.aborted.store(true, Ordering::Release);
        self.tracker.abort_all(&err);
        err
    }

    fn fault_error(&self, code: u32) -> EvalError {
        if code == FAULT_ARENA_FULL {
            EvalError::ResourceExhaustion(ArenaError::Exhausted {
                capacity: self.config.arena_capacity,
            })
        } else {
            EvalError::WorkerInvariantViolation { code }
        }
    }

    async fn submit_to(&self, slot: usize, unit: WorkUnit) -> Result<(), EvalError> {
        submit_with_escalation(
            &self.slots[slot].sq,
            unit,
            &self.aborted,
            self.config.busy_wait_threshold,
        )
        .await
    }
}

impl Drop for ArenaDriver {
    fn drop(&mut self) {
        self.terminate();
    }
}

impl std::fmt::Debug for ArenaDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArenaDriver")
            .field("workers", &self.slots.len())
            .field("terminated", &self.terminated)
            .finish()
    }
}

#[allow(clippy::too_many_arguments)]
fn finalize(
    buffer: &mut BTreeMap<usize, EvalPath>,
    flights: &mut HashMap<usize, InFlight>,
    active: &mut HashMap<u32, usize>,
    slot_busy: &mut [bool],
    finished: &mut usize,
    plans: &[ExprPlan],
    expr_idx: usize,
    sink: u32,
    reached_normal_form: bool,
    cycle_detected: bool,
    outcome: ExprOutcome,
) {
    let Some(flight) = flights.remove(&expr_idx) else {
        return;
    };
    let plan = &plans[expr_idx];
    active.remove(&plan.req_id);
    slot_busy[plan.slot] = false;
    *finished += 1;
    trace!(
        expr_index = expr_idx,
        sink,
        reached_normal_form,
        ?outcome,
        "expression finalized"
    );
    buffer.insert(
        expr_idx,
        EvalPath {
            expr_index: expr_idx,
            expr: plan.expr.clone(),
            source: plan.source,
            sink,
            steps: flight.path,
            reached_normal_form,
            steps_taken: flight.steps_taken,
            cycle_detected,
            outcome,
        },
    );
}
