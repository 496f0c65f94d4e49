use crate::layout::{
    SharedRegion, CQ_ENTRY_WORDS, OFF_CQ_HEAD, OFF_CQ_TAIL, OFF_SQ_HEAD, OFF_SQ_TAIL,
    OFF_WAIT_HEAD, OFF_WAIT_TAIL, SQ_ENTRY_WORDS,
};
use crate::ring::SlotRing;
use std::sync::Arc;

/// Suspension reason carried in the aux word of a `YieldIo` completion.
pub const REASON_STDIN_EMPTY: u32 = 1;

/// One unit of work: reduce `node_id` for up to `max_steps` rewrites.
///
/// `max_steps == 0` is a wake: the worker resumes with the budget it
/// recorded when the request suspended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkUnit {
    pub node_id: u32,
    pub req_id: u32,
    pub max_steps: u32,
}

impl WorkUnit {
    #[inline]
    fn encode(self) -> [u32; SQ_ENTRY_WORDS] {
        [self.node_id, self.req_id, self.max_steps]
    }

    #[inline]
    fn decode(words: [u32; SQ_ENTRY_WORDS]) -> Self {
        Self {
            node_id: words[0],
            req_id: words[1],
            max_steps: words[2],
        }
    }
}

/// Outcome class of a completion entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum CompletionStatus {
    /// `node_id` is the (possibly unchanged) head; unchanged means normal form.
    Done = 0,
    /// Suspended on empty stdin; `node_id` is the node to wake, aux the reason.
    YieldIo = 1,
    /// Step budget exhausted; `node_id` is the current head, aux the step count.
    YieldBudget = 2,
    /// The worker detected an invariant violation; aux carries the fault code.
    Error = 3,
}

impl CompletionStatus {
    fn from_word(w: u32) -> Option<Self> {
        match w {
            0 => Some(Self::Done),
            1 => Some(Self::YieldIo),
            2 => Some(Self::YieldBudget),
            3 => Some(Self::Error),
            _ => None,
        }
    }
}

/// One completion: the worker's verdict on a previously submitted unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub req_id: u32,
    pub node_id: u32,
    pub status: CompletionStatus,
    pub aux: u32,
}

impl Completion {
    pub fn done(req_id: u32, node_id: u32) -> Self {
        Self {
            req_id,
            node_id,
            status: CompletionStatus::Done,
            aux: 0,
        }
    }

    pub fn yield_io(req_id: u32, node_id: u32, reason: u32) -> Self {
        Self {
            req_id,
            node_id,
            status: CompletionStatus::YieldIo,
            aux: reason,
        }
    }

    pub fn yield_budget(req_id: u32, node_id: u32, steps: u32) -> Self {
        Self {
            req_id,
            node_id,
            status: CompletionStatus::YieldBudget,
            aux: steps,
        }
    }

    pub fn error(req_id: u32, node_id: u32, code: u32) -> Self {
        Self {
            req_id,
            node_id,
            status: CompletionStatus::Error,
            aux: code,
        }
    }

    #[inline]
    fn encode(self) -> [u32; CQ_ENTRY_WORDS] {
        [self.req_id, self.node_id, self.status as u32, self.aux]
    }

    #[inline]
    fn decode(words: [u32; CQ_ENTRY_WORDS]) -> Option<Self> {
        Some(Self {
            req_id: words[0],
            node_id: words[1],
            status: CompletionStatus::from_word(words[2])?,
            aux: words[3],
        })
    }
}

/// Host → worker submission queue.
#[derive(Debug, Clone)]
pub struct SubmissionQueue {
    ring: SlotRing,
}

impl SubmissionQueue {
    pub fn new(region: &Arc<SharedRegion>) -> Self {
        let l = region.layout();
        Self {
            ring: SlotRing::new(
                Arc::clone(region),
                OFF_SQ_HEAD,
                OFF_SQ_TAIL,
                l.sq_data(),
                SQ_ENTRY_WORDS,
            ),
        }
    }

    #[inline]
    pub fn try_enqueue(&self, unit: WorkUnit) -> bool {
        self.ring.try_enqueue(&unit.encode())
    }

    #[inline]
    pub fn try_dequeue(&self) -> Option<WorkUnit> {
        let mut words = [0u32; SQ_ENTRY_WORDS];
        self.ring.try_dequeue(&mut words).then(|| WorkUnit::decode(words))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}

/// Worker → host completion queue.
#[derive(Debug, Clone)]
pub struct CompletionQueue {
    ring: SlotRing,
}

impl CompletionQueue {
    pub fn new(region: &Arc<SharedRegion>) -> Self {
        let l = region.layout();
        Self {
            ring: SlotRing::new(
                Arc::clone(region),
                OFF_CQ_HEAD,
                OFF_CQ_TAIL,
                l.cq_data(),
                CQ_ENTRY_WORDS,
            ),
        }
    }

    #[inline]
    pub fn try_enqueue(&self, completion: Completion) -> bool {
        self.ring.try_enqueue(&completion.encode())
    }

    /// Dequeues one completion. A status word outside the known range is a
    /// corrupted entry and comes back as `None` after consuming the slot.
    #[inline]
    pub fn try_dequeue(&self) -> Option<Completion> {
        let mut words = [0u32; CQ_ENTRY_WORDS];
        if !self.ring.try_dequeue(&mut words) {
            return None;
        }
        Completion::decode(words)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}

/// Worker → host ring of node ids suspended on empty stdin.
#[derive(Debug, Clone)]
pub struct WaitRing {
    ring: SlotRing,
}

impl WaitRing {
    pub fn new(region: &Arc<SharedRegion>) -> Self {
        let l = region.layout();
        Self {
            ring: SlotRing::new(
                Arc::clone(region),
                OFF_WAIT_HEAD,
                OFF_WAIT_TAIL,
                l.wait_data(),
                1,
            ),
        }
    }

    #[inline]
    pub fn try_enqueue(&self, node_id: u32) -> bool {
        self.ring.try_enqueue(&[node_id])
    }

    #[inline]
    pub fn try_dequeue(&self) -> Option<u32> {
        let mut words = [0u32; 1];
        self.ring.try_dequeue(&mut words).then(|| words[0])
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}
