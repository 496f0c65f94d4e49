//! The reduction kernel: the worker side of a slot.
//!
//! Given a work unit `(node_id, req_id, max_steps)` the kernel performs up
//! to `max_steps` head reductions and publishes the outcome. Redex choice
//! is leftmost-outermost along the left spine, ties broken by node id, so
//! two runs over the same arena perform identical rewrite sequences.
//!
//! Every productive contraction is path-copying: the contractum and fresh
//! applications along the spine from the redex up to the root are
//! allocated, untouched subtrees are shared, and the rewritten root gets a
//! fresh id. The host's fixed-point test (resubmit until the returned id
//! equals the submitted one) falls out of that: an irreducible head is
//! the only case where the id comes back unchanged. It also preserves the
//! arena ordering invariant that application children precede parents.

use skiarena::{
    Arena, ArenaError, Backoff, ByteRing, Completion, Node, SharedRegion, WaitRing, WorkUnit,
    REASON_STDIN_EMPTY,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Fault codes carried in the aux word of an `ERROR` completion.
pub const FAULT_DANGLING_NODE: u32 = 1;
pub const FAULT_CORRUPT_NODE: u32 = 2;
pub const FAULT_ARENA_FULL: u32 = 3;
pub const FAULT_WAIT_RING_FULL: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Fault {
    pub code: u32,
}

impl From<ArenaError> for Fault {
    fn from(err: ArenaError) -> Self {
        let code = match err {
            ArenaError::Exhausted { .. } => FAULT_ARENA_FULL,
            ArenaError::Dangling { .. } => FAULT_DANGLING_NODE,
            ArenaError::Corrupt { .. } => FAULT_CORRUPT_NODE,
        };
        Self { code }
    }
}

/// One ancestor of a redex: an application node and the side the redex
/// lies on. `left == true` means the redex is in the `lft` child.
#[derive(Debug, Clone, Copy)]
struct PathSeg {
    node: u32,
    left: bool,
}

/// A contraction rule with its operands resolved to node ids.
#[derive(Debug)]
enum Rule {
    /// `I x -> x`
    Identity { x: u32 },
    /// `K x y -> x`
    Constant { x: u32 },
    /// `S f g x -> (f x) (g x)`
    Distribute { f: u32, g: u32, x: u32 },
    /// Constructor selection: branch applied to the scrutinee's fields.
    Select { branch: u32, fields: Vec<u32> },
    /// `read1 k -> k #b`, or suspend on empty stdin.
    ReadByte { cont: u32 },
    /// `write1 #b -> unit`, publishing `b` to stdout.
    WriteByte { value: u32 },
}

#[derive(Debug)]
struct Redex {
    /// Ancestors from the root down to (excluding) the outermost
    /// application of the redex.
    path: Vec<PathSeg>,
    rule: Rule,
}

enum Contraction {
    Replaced(u32),
    NeedStdin,
    StdoutFull,
}

/// Per-slot reducer state. Owned by exactly one worker thread.
pub(crate) struct Reducer {
    arena: Arena,
    stdin: ByteRing,
    stdout: ByteRing,
    wait: WaitRing,
    /// Remaining budgets recorded at suspension, restored on wake.
    /// Requests are slot-pinned, so worker-local state suffices.
    resume_budgets: HashMap<u32, u32>,
}

impl Reducer {
    pub fn new(region: &Arc<SharedRegion>) -> Self {
        Self {
            arena: Arena::new(Arc::clone(region)),
            stdin: ByteRing::stdin(region),
            stdout: ByteRing::stdout(region),
            wait: WaitRing::new(region),
            resume_budgets: HashMap::new(),
        }
    }

    /// Runs one work unit to its completion entry.
    pub fn run(&mut self, unit: WorkUnit) -> Completion {
        match self.run_inner(unit) {
            Ok(completion) => completion,
            Err(fault) => Completion::error(unit.req_id, unit.node_id, fault.code),
        }
    }

    fn run_inner(&mut self, unit: WorkUnit) -> Result<Completion, Fault> {
        let budget = if unit.max_steps == 0 {
            // Wake: resume with the budget recorded at suspension time.
            self.resume_budgets.remove(&unit.req_id).unwrap_or(1)
        } else {
            unit.max_steps
        };

        let mut current = unit.node_id;
        let mut steps: u32 = 0;
        loop {
            let redex = {
                let mut path = Vec::new();
                self.search(current, &mut path)?
            };
            let Some(redex) = redex else {
                // Terminal head or irreducible application.
                return Ok(Completion::done(unit.req_id, current));
            };
            if steps >= budget {
                return Ok(Completion::yield_budget(unit.req_id, current, steps));
            }
            match self.contract(&redex.rule)? {
                Contraction::Replaced(replacement) => {
                    current = self.rebuild(&redex.path, replacement)?;
                    steps += 1;
                }
                Contraction::NeedStdin => {
                    if !self.wait.try_enqueue(current) {
                        return Err(Fault {
                            code: FAULT_WAIT_RING_FULL,
                        });
                    }
                    self.resume_budgets.insert(unit.req_id, budget - steps);
                    return Ok(Completion::yield_io(
                        unit.req_id,
                        current,
                        REASON_STDIN_EMPTY,
                    ));
                }
                Contraction::StdoutFull => {
                    // Stdout pressure is not a suspension reason; hand the
                    // unit back so the host can drain stdout and resubmit.
                    return Ok(Completion::yield_budget(unit.req_id, current, steps));
                }
            }
        }
    }

    /// Finds the leftmost-outermost redex under `node`.
    ///
    /// The left spine is checked for a head redex first (outermost), then
    /// arguments are searched in textual order, innermost application
    /// first, exactly the order a normal-order normalizer contracts in.
    fn search(&self, node: u32, path: &mut Vec<PathSeg>) -> Result<Option<Redex>, Fault> {
        // Unwind the left spine. spine[0] is `node`; the head terminal is
        // the lft of the last entry.
        let mut spine: Vec<u32> = Vec::new();
        let mut head_id = node;
        loop {
            match self.arena.get(head_id).map_err(Fault::from)? {
                Node::App { lft, .. } => {
                    spine.push(head_id);
                    head_id = lft;
                }
                _ => break,
            }
        }
        let head = self.arena.get(head_id).map_err(Fault::from)?;
        let k = spine.len();

        // Head-spine redex?
        if let Some((consumed, rule)) = self.head_rule(head, &spine)? {
            let mut full = path.clone();
            for &ancestor in &spine[..k - consumed] {
                full.push(PathSeg {
                    node: ancestor,
                    left: true,
                });
            }
            return Ok(Some(Redex { path: full, rule }));
        }

        // No head redex: search arguments left to right. The i-th argument
        // (textual order) is the rgt of spine[k - i].
        for i in 1..=k {
            let j = k - i;
            let arg = self.rgt_of(spine[j])?;
            let depth = path.len();
            for &ancestor in &spine[..j] {
                path.push(PathSeg {
                    node: ancestor,
                    left: true,
                });
            }
            path.push(PathSeg {
                node: spine[j],
                left: false,
            });
            if let Some(redex) = self.search(arg, path)? {
                return Ok(Some(redex));
            }
            path.truncate(depth);
        }

        Ok(None)
    }

    /// Matches the head terminal against the spine, returning the number
    /// of spine applications the redex consumes and the resolved rule.
    fn head_rule(&self, head: Node, spine: &[u32]) -> Result<Option<(usize, Rule)>, Fault> {
        let k = spine.len();
        match head {
            Node::I if k >= 1 => {
                let x = self.rgt_of(spine[k - 1])?;
                Ok(Some((1, Rule::Identity { x })))
            }
            Node::K if k >= 2 => {
                let x = self.rgt_of(spine[k - 1])?;
                Ok(Some((2, Rule::Constant { x })))
            }
            Node::S if k >= 3 => {
                let f = self.rgt_of(spine[k - 1])?;
                let g = self.rgt_of(spine[k - 2])?;
                let x = self.rgt_of(spine[k - 3])?;
                Ok(Some((3, Rule::Distribute { f, g, x })))
            }
            Node::Case { branches } if branches > 0 && k >= branches as usize + 1 => {
                let n = branches as usize;
                let scrutinee = self.rgt_of(spine[k - 1])?;
                match self.saturated_constructor(scrutinee)? {
                    Some((tag, fields)) if (tag as usize) < n => {
                        // Branches are arguments 2..=n+1; branch `tag` is
                        // argument 2 + tag.
                        let branch = self.rgt_of(spine[k - 2 - tag as usize])?;
                        Ok(Some((n + 1, Rule::Select { branch, fields })))
                    }
                    // Scrutinee not yet a saturated constructor (the
                    // argument scan will reduce inside it first) or its tag
                    // is out of range (stuck).
                    _ => Ok(None),
                }
            }
            Node::Read1 if k >= 1 => {
                let cont = self.rgt_of(spine[k - 1])?;
                Ok(Some((1, Rule::ReadByte { cont })))
            }
            Node::Write1 if k >= 1 => {
                let arg = self.rgt_of(spine[k - 1])?;
                match self.arena.get(arg).map_err(Fault::from)? {
                    // Strict in its argument: only a literal writes.
                    Node::Lit(value) => Ok(Some((1, Rule::WriteByte { value }))),
                    _ => Ok(None),
                }
            }
            _ => Ok(None),
        }
    }

    /// If `node` is a constructor applied to exactly its arity, returns
    /// the tag and the fields in textual order.
    fn saturated_constructor(&self, node: u32) -> Result<Option<(u32, Vec<u32>)>, Fault> {
        let mut spine: Vec<u32> = Vec::new();
        let mut head_id = node;
        loop {
            match self.arena.get(head_id).map_err(Fault::from)? {
                Node::App { lft, .. } => {
                    spine.push(head_id);
                    head_id = lft;
                }
                _ => break,
            }
        }
        match self.arena.get(head_id).map_err(Fault::from)? {
            Node::Con { tag, arity } if spine.len() == arity as usize => {
                let k = spine.len();
                let mut fields = Vec::with_capacity(k);
                for i in 1..=k {
                    fields.push(self.rgt_of(spine[k - i])?);
                }
                Ok(Some((tag, fields)))
            }
            _ => Ok(None),
        }
    }

    fn contract(&mut self, rule: &Rule) -> Result<Contraction, Fault> {
        match rule {
            Rule::Identity { x } | Rule::Constant { x } => Ok(Contraction::Replaced(*x)),
            Rule::Distribute { f, g, x } => {
                let fx = self.arena.alloc_app(*f, *x)?;
                let gx = self.arena.alloc_app(*g, *x)?;
                Ok(Contraction::Replaced(self.arena.alloc_app(fx, gx)?))
            }
            Rule::Select { branch, fields } => {
                let mut acc = *branch;
                for field in fields {
                    acc = self.arena.alloc_app(acc, *field)?;
                }
                Ok(Contraction::Replaced(acc))
            }
            Rule::ReadByte { cont } => match self.stdin.pop() {
                Some(byte) => {
                    let lit = self.arena.alloc(Node::Lit(u32::from(byte)))?;
                    Ok(Contraction::Replaced(self.arena.alloc_app(*cont, lit)?))
                }
                None => Ok(Contraction::NeedStdin),
            },
            Rule::WriteByte { value } => {
                // Spin and yield only; once the ladder would park, hand
                // the unit back instead of sleeping mid-reduction.
                let mut backoff = Backoff::new();
                while !self.stdout.push(*value as u8) {
                    if backoff.is_parking() {
                        return Ok(Contraction::StdoutFull);
                    }
                    backoff.snooze();
                }
                Ok(Contraction::Replaced(self.arena.alloc(Node::Con {
                    tag: 0,
                    arity: 0,
                })?))
            }
        }
    }

    /// Path-copies from the redex back to the root.
    fn rebuild(&self, path: &[PathSeg], mut replacement: u32) -> Result<u32, Fault> {
        for seg in path.iter().rev() {
            let Node::App { lft, rgt } = self.arena.get(seg.node).map_err(Fault::from)? else {
                return Err(Fault {
                    code: FAULT_CORRUPT_NODE,
                });
            };
            let (l, r) = if seg.left {
                (replacement, rgt)
            } else {
                (lft, replacement)
            };
            replacement = self.arena.alloc_app(l, r)?;
        }
        Ok(replacement)
    }

    #[inline]
    fn rgt_of(&self, app: u32) -> Result<u32, Fault> {
        match self.arena.get(app).map_err(Fault::from)? {
            Node::App { rgt, .. } => Ok(rgt),
            _ => Err(Fault {
                code: FAULT_CORRUPT_NODE,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skiarena::{CompletionStatus, Layout, Term};

    fn setup() -> (Arc<SharedRegion>, Reducer, Arena) {
        let region = SharedRegion::create(Layout::new(64, 4096).unwrap(), 0).unwrap();
        let reducer = Reducer::new(&region);
        let arena = Arena::new(Arc::clone(&region));
        (region, reducer, arena)
    }

    fn unit(node_id: u32, max_steps: u32) -> WorkUnit {
        WorkUnit {
            node_id,
            req_id: 1,
            max_steps,
        }
    }

    #[test]
    fn identity_contracts_to_its_argument() {
        let (_region, mut reducer, arena) = setup();
        let root = Term::app(Term::I, Term::K).lower(&arena).unwrap();

        let comp = reducer.run(unit(root, 10));
        assert_eq!(comp.status, CompletionStatus::Done);
        assert_eq!(arena.pretty(comp.node_id).unwrap(), "K");
        assert_ne!(comp.node_id, root);
    }

    #[test]
    fn constant_discards_its_second_argument() {
        let (_region, mut reducer, arena) = setup();
        let root = Term::apply(Term::K, [Term::S, Term::I]).lower(&arena).unwrap();

        let comp = reducer.run(unit(root, 10));
        assert_eq!(comp.status, CompletionStatus::Done);
        assert_eq!(arena.pretty(comp.node_id).unwrap(), "S");
    }

    #[test]
    fn distribution_duplicates_the_argument() {
        let (_region, mut reducer, arena) = setup();
        // S K K x -> K x (K x) -> x
        let root = Term::apply(Term::S, [Term::K, Term::K, Term::I])
            .lower(&arena)
            .unwrap();

        let comp = reducer.run(unit(root, 10));
        assert_eq!(comp.status, CompletionStatus::Done);
        assert_eq!(arena.pretty(comp.node_id).unwrap(), "I");
    }

    #[test]
    fn normal_form_returns_the_submitted_id() {
        let (_region, mut reducer, arena) = setup();
        // `S K` is an irreducible application.
        let root = Term::app(Term::S, Term::K).lower(&arena).unwrap();

        let comp = reducer.run(unit(root, 10));
        assert_eq!(comp.status, CompletionStatus::Done);
        assert_eq!(comp.node_id, root);
    }

    #[test]
    fn single_step_budget_yields_with_progress() {
        let (_region, mut reducer, arena) = setup();
        // Two steps to normal form; budget of one must yield in between.
        let root = Term::apply(Term::S, [Term::K, Term::K, Term::I])
            .lower(&arena)
            .unwrap();

        let first = reducer.run(unit(root, 1));
        assert_eq!(first.status, CompletionStatus::YieldBudget);
        assert_eq!(first.aux, 1);
        assert_ne!(first.node_id, root);

        let second = reducer.run(unit(first.node_id, 1));
        // The second contraction reaches normal form within budget.
        assert_eq!(second.status, CompletionStatus::Done);
        assert_eq!(arena.pretty(second.node_id).unwrap(), "I");
    }

    #[test]
    fn interior_redex_gets_a_fresh_root() {
        let (_region, mut reducer, arena) = setup();
        // (S K) (I I): head spine is irreducible, redex is inside the arg.
        let root = Term::app(
            Term::app(Term::S, Term::K),
            Term::app(Term::I, Term::I),
        )
        .lower(&arena)
        .unwrap();

        let comp = reducer.run(unit(root, 1));
        // The one permitted contraction lands on a normal form, so the
        // kernel reports Done, but with a path-copied fresh root.
        assert_eq!(comp.status, CompletionStatus::Done);
        assert_ne!(comp.node_id, root, "path copy must produce a fresh root");
        assert_eq!(arena.pretty(comp.node_id).unwrap(), "SKI");
    }

    #[test]
    fn case_selects_the_tagged_branch() {
        let (_region, mut reducer, arena) = setup();
        // case2 (C1/1 #7) K I -> I #7 -> #7
        let scrutinee = Term::app(Term::Con { tag: 1, arity: 1 }, Term::Lit(7));
        let root = Term::apply(Term::Case { branches: 2 }, [scrutinee, Term::K, Term::I])
            .lower(&arena)
            .unwrap();

        let comp = reducer.run(unit(root, 10));
        assert_eq!(comp.status, CompletionStatus::Done);
        assert_eq!(arena.pretty(comp.node_id).unwrap(), "#7");
    }

    #[test]
    fn case_reduces_inside_the_scrutinee_first() {
        let (_region, mut reducer, arena) = setup();
        // case1 (I (C0/1 #5)) I : the scrutinee needs one step before the
        // selection fires, then the branch is applied to the field.
        let scrutinee = Term::app(
            Term::I,
            Term::app(Term::Con { tag: 0, arity: 1 }, Term::Lit(5)),
        );
        let root = Term::apply(Term::Case { branches: 1 }, [scrutinee, Term::I])
            .lower(&arena)
            .unwrap();

        let comp = reducer.run(unit(root, 10));
        assert_eq!(comp.status, CompletionStatus::Done);
        assert_eq!(arena.pretty(comp.node_id).unwrap(), "#5");
    }

    #[test]
    fn church_two_applied_to_peano_constructors() {
        let (_region, mut reducer, arena) = setup();
        // 2 = S B (S B (K I)) with B = S (K S) K; 2 succ zero -> succ (succ zero)
        let b = || Term::apply(Term::S, [Term::app(Term::K, Term::S), Term::K]);
        let two = Term::apply(
            Term::S,
            [
                b(),
                Term::apply(Term::S, [b(), Term::app(Term::K, Term::I)]),
            ],
        );
        let succ = Term::Con { tag: 1, arity: 1 };
        let zero = Term::Con { tag: 0, arity: 0 };
        let root = Term::apply(two, [succ, zero]).lower(&arena).unwrap();

        let comp = reducer.run(unit(root, 2000));
        assert_eq!(comp.status, CompletionStatus::Done);
        assert_eq!(arena.pretty(comp.node_id).unwrap(), "C1/1(C1/1C0/0)");
    }

    #[test]
    fn read_suspends_on_empty_stdin_and_resumes_on_wake() {
        let (region, mut reducer, arena) = setup();
        let root = Term::app(Term::Read1, Term::I).lower(&arena).unwrap();

        let comp = reducer.run(unit(root, 10));
        assert_eq!(comp.status, CompletionStatus::YieldIo);
        assert_eq!(comp.aux, REASON_STDIN_EMPTY);
        assert_eq!(comp.node_id, root);

        // The suspension parked the head in the wait ring.
        let wait = WaitRing::new(&region);
        assert_eq!(wait.try_dequeue(), Some(root));

        // Host writes a byte, then wakes with an inherited budget.
        assert!(ByteRing::stdin(&region).push(65));
        let woken = reducer.run(unit(root, 0));
        assert_eq!(woken.status, CompletionStatus::Done);
        assert_eq!(arena.pretty(woken.node_id).unwrap(), "#65");
    }

    #[test]
    fn write_publishes_to_stdout_and_reduces_to_unit() {
        let (region, mut reducer, arena) = setup();
        let root = Term::app(Term::Write1, Term::Lit(66)).lower(&arena).unwrap();

        let comp = reducer.run(unit(root, 10));
        assert_eq!(comp.status, CompletionStatus::Done);
        assert_eq!(arena.pretty(comp.node_id).unwrap(), "C0/0");

        let mut out = [0u8; 4];
        assert_eq!(ByteRing::stdout(&region).read(&mut out), 1);
        assert_eq!(out[0], 66);
    }

    #[test]
    fn echo_one_byte() {
        let (region, mut reducer, arena) = setup();
        // read1 write1: reads a byte, writes it back, reduces to unit.
        let root = Term::app(Term::Read1, Term::Write1).lower(&arena).unwrap();

        assert!(ByteRing::stdin(&region).push(65));
        let comp = reducer.run(unit(root, 10));
        assert_eq!(comp.status, CompletionStatus::Done);
        assert_eq!(arena.pretty(comp.node_id).unwrap(), "C0/0");

        let mut out = [0u8; 4];
        assert_eq!(ByteRing::stdout(&region).read(&mut out), 1);
        assert_eq!(out[0], 65);
    }

    #[test]
    fn reduction_sequences_are_deterministic() {
        let trace = || {
            let (_region, mut reducer, arena) = setup();
            let root = Term::apply(Term::S, [Term::K, Term::K, Term::app(Term::I, Term::K)])
                .lower(&arena)
                .unwrap();
            let mut ids = vec![root];
            let mut current = root;
            loop {
                let comp = reducer.run(WorkUnit {
                    node_id: current,
                    req_id: 1,
                    max_steps: 1,
                });
                if comp.status == CompletionStatus::Done && comp.node_id == current {
                    break;
                }
                current = comp.node_id;
                ids.push(current);
            }
            ids
        };
        assert_eq!(trace(), trace());
    }

    #[test]
    fn dangling_submission_is_a_worker_fault() {
        let (_region, mut reducer, _arena) = setup();
        let comp = reducer.run(unit(4000, 10));
        assert_eq!(comp.status, CompletionStatus::Error);
        assert_eq!(comp.aux, FAULT_DANGLING_NODE);
    }
}
