//! Instrumentation seam for request lifecycle events.

use crate::error::EvalError;

/// Observer of request lifecycle events.
///
/// Every method has a no-op default, so implementors override only what
/// they watch. The tracker guarantees each event fires exactly once per
/// lifecycle transition and never while its internal lock is held, so a
/// hook may itself create requests.
pub trait TrackerHooks: Send + Sync {
    /// A request was created and bound to a worker slot.
    fn on_created(&self, req_id: u32, slot: usize) {
        let _ = (req_id, slot);
    }

    /// A request completed with a result node.
    fn on_completed(&self, req_id: u32, node_id: u32) {
        let _ = (req_id, node_id);
    }

    /// A request was rejected or dropped with an error.
    fn on_errored(&self, req_id: u32, error: &EvalError) {
        let _ = (req_id, error);
    }

    /// A request yielded (I/O wait or budget) with the given head node.
    fn on_yielded(&self, req_id: u32, node_id: u32) {
        let _ = (req_id, node_id);
    }

    /// A request was resubmitted; `count` is the running total.
    fn on_resubmitted(&self, req_id: u32, count: u32) {
        let _ = (req_id, count);
    }
}

/// The default observer: ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl TrackerHooks for NoopHooks {}
