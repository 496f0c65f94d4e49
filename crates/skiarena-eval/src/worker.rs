//! Per-slot worker threads.
//!
//! Each worker owns the worker-side views of one shared region: it
//! consumes the submission queue, runs the reduction kernel, and produces
//! completions. Workers never call back into the host; every interaction
//! is a ring operation. Waiting runs entirely on the [`Backoff`] ladder,
//! whose park tier bounds how long a sleeping worker takes to notice new
//! work or shutdown.

use crate::kernel::Reducer;
use skiarena::{Backoff, CompletionQueue, SharedRegion, SubmissionQueue};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{trace, warn};

pub(crate) struct WorkerHandle {
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Spawns the worker thread for one slot.
    ///
    /// The thread validates the region header on attach, mirroring what an
    /// out-of-process worker runtime would do, then enters the
    /// dequeue/reduce/publish loop until `shutdown` is raised.
    pub fn spawn(
        slot: usize,
        region: Arc<SharedRegion>,
        shutdown: Arc<AtomicBool>,
    ) -> std::io::Result<Self> {
        let thread = thread::Builder::new()
            .name(format!("skiarena-worker-{slot}"))
            // Redex search recurses along the term depth; give deep terms
            // headroom beyond the platform default.
            .stack_size(8 * 1024 * 1024)
            .spawn(move || run_worker(slot, &region, &shutdown))?;
        Ok(Self {
            thread: Some(thread),
        })
    }

    pub fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("worker thread panicked during shutdown");
            }
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.join();
    }
}

fn run_worker(slot: usize, region: &Arc<SharedRegion>, shutdown: &AtomicBool) {
    if let Err(err) = region.validate() {
        warn!(slot, %err, "worker refused to attach to region");
        return;
    }

    let sq = SubmissionQueue::new(region);
    let cq = CompletionQueue::new(region);
    let mut reducer = Reducer::new(region);
    let mut backoff = Backoff::new();

    while !shutdown.load(Ordering::Acquire) {
        match sq.try_dequeue() {
            Some(work_unit) => {
                backoff.reset();
                trace!(
                    slot,
                    req_id = work_unit.req_id,
                    node_id = work_unit.node_id,
                    "unit dequeued"
                );
                let completion = reducer.run(work_unit);

                // Publish, backing off if the host is slow to drain.
                let mut publish = Backoff::new();
                while !cq.try_enqueue(completion) {
                    if shutdown.load(Ordering::Acquire) {
                        return;
                    }
                    publish.snooze();
                }
            }
            None => backoff.snooze(),
        }
    }
}
