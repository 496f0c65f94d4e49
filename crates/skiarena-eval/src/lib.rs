//! Parallel evaluation runtime over the `skiarena` substrate.
//!
//! The runtime owns one shared region per worker slot. Each slot pairs a
//! host-side view (submission queue producer, completion queue consumer,
//! stdin writer, stdout reader) with a dedicated worker thread running the
//! reduction kernel. The host side is a single-threaded cooperative driver:
//! it interleaves submissions and completion draining on one task, never
//! blocks a worker, and talks to workers only through the rings.
//!
//! # Pieces
//!
//! - `kernel`: the leftmost-outermost reduction kernel (worker side)
//! - `worker`: the per-slot worker thread loop
//! - `tracker`: request lifecycle (ids, slots, resolvers, resubmits)
//! - `io`: stdin/stdout bridging and stdin-wait wakeups
//! - `driver`: the sliding-window driver and result streaming
//!
//! # Example
//!
//! ```no_run
//! use skiarena::Term;
//! use skiarena_eval::{ArenaDriver, EvalConfig};
//!
//! # async fn demo() -> Result<(), skiarena_eval::EvalError> {
//! let mut driver = ArenaDriver::new(EvalConfig::default())?;
//! let skk = Term::app(Term::app(Term::S, Term::K), Term::K);
//! let term = Term::app(skk, Term::I);
//! let sink = driver.evaluate(&term).await?;
//! assert_eq!(driver.render(sink)?, "I");
//! # Ok(())
//! # }
//! ```

mod config;
mod driver;
mod error;
mod hooks;
mod io;
mod kernel;
mod tracker;
mod worker;

pub use config::EvalConfig;
pub use driver::{ArenaDriver, EvalPath, ExprOutcome};
pub use error::EvalError;
pub use hooks::{NoopHooks, TrackerHooks};
pub use io::IoManager;
pub use kernel::{FAULT_ARENA_FULL, FAULT_CORRUPT_NODE, FAULT_DANGLING_NODE, FAULT_WAIT_RING_FULL};
pub use tracker::RequestTracker;
