//! Shared-memory substrate for a parallel SKI reduction runtime.
//!
//! The substrate is a single contiguous byte region with a fixed-offset
//! header, five single-producer/single-consumer rings (work submission,
//! completion, stdin, stdout, stdin-wait) and an append-only node arena.
//! The byte layout is the external ABI: a host and a worker that agree on
//! `(ring_entries, capacity)` observe identical offsets, which is what
//! allows the two sides to be written independently.
//!
//! # Layers
//!
//! - `layout`: offset computation and the [`SharedRegion`] allocation
//! - `ring`: raw [`SlotRing`] / [`ByteRing`] index protocol
//! - `queue`: typed work-unit / completion / wait views over the rings
//! - `arena`: node store with bump allocation and stable 32-bit ids
//! - `term`: the lowering contract between a front-end and the arena
//!
//! # Example
//!
//! ```
//! use skiarena::{Layout, SharedRegion, Arena, Term};
//!
//! let region = SharedRegion::create(Layout::new(256, 4096).unwrap(), 0).unwrap();
//! let arena = Arena::new(region);
//! let term = Term::app(Term::app(Term::S, Term::K), Term::K);
//! let id = term.lower(&arena).unwrap();
//! assert_eq!(arena.pretty(id).unwrap(), "SKK");
//! ```

mod arena;
mod backoff;
mod invariants;
mod layout;
mod queue;
mod ring;
mod term;

pub use arena::{Arena, ArenaError, Node, NULL_ID};
pub use backoff::Backoff;
pub use layout::{
    Layout, LayoutError, SharedRegion, CQ_ENTRY_WORDS, HEADER_BYTES, MAGIC, NODE_WORDS,
    OFF_CAPACITY, OFF_CQ_HEAD, OFF_CQ_TAIL, OFF_MAGIC, OFF_RING_ENTRIES, OFF_SQ_HEAD,
    OFF_SQ_TAIL, OFF_STDIN_HEAD, OFF_STDIN_TAIL, OFF_STDOUT_HEAD, OFF_STDOUT_TAIL, OFF_TOP,
    OFF_WAIT_HEAD, OFF_WAIT_TAIL, SQ_ENTRY_WORDS,
};
pub use queue::{
    Completion, CompletionQueue, CompletionStatus, SubmissionQueue, WaitRing, WorkUnit,
    REASON_STDIN_EMPTY,
};
pub use ring::{ByteRing, SlotRing};
pub use term::Term;
