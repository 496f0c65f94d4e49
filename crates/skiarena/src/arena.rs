use crate::layout::{SharedRegion, NODE_WORDS};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use thiserror::Error;

/// Reserved null id. No node is ever stored at local index 0.
pub const NULL_ID: u32 = 0;

// Node kind words. The zero word is deliberately unused so a read of
// never-written arena memory decodes as corrupt rather than as a node.
const KIND_APP: u32 = 1;
const KIND_S: u32 = 2;
const KIND_K: u32 = 3;
const KIND_I: u32 = 4;
const KIND_LIT: u32 = 5;
const KIND_CON: u32 = 6;
const KIND_CASE: u32 = 7;
const KIND_READ1: u32 = 8;
const KIND_WRITE1: u32 = 9;

/// Errors raised by arena access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ArenaError {
    /// Bump allocation hit the fixed capacity. Fatal for the whole driver.
    #[error("arena exhausted ({capacity} nodes)")]
    Exhausted { capacity: u32 },
    /// An id outside `(id_base, id_base + top)` was dereferenced.
    #[error("dangling node id {id}")]
    Dangling { id: u32 },
    /// A node decoded to an unknown kind word.
    #[error("corrupt node {id} (kind word {kind})")]
    Corrupt { id: u32, kind: u32 },
}

/// Decoded view of one arena node.
///
/// A node is either a terminal (combinator, literal, constructor, case
/// selector or I/O primitive) or an application of two node ids read as
/// left-associative function application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Node {
    App { lft: u32, rgt: u32 },
    S,
    K,
    I,
    Lit(u32),
    Con { tag: u32, arity: u32 },
    Case { branches: u32 },
    Read1,
    Write1,
}

/// Append-only node store inside a shared region.
///
/// Ids are dense, monotonically increasing from `id_base + 1`, never
/// reused and never freed; teardown drops the whole region at once. `top`
/// is the next free *local* index and grows through a single atomic
/// `fetch_add`, so concurrent allocators (host lowering, worker rewrites)
/// never hand out the same id.
///
/// Node words themselves are written with plain stores: every node is
/// written exactly once, before the id that references it is published
/// through a ring tail (submission for host-lowered nodes, completion for
/// worker-built ones), and the ring's release/acquire pair orders the
/// reads on the other side. This is the same argument the ring slots use.
#[derive(Clone)]
pub struct Arena {
    region: Arc<SharedRegion>,
}

impl Arena {
    pub fn new(region: Arc<SharedRegion>) -> Self {
        Self { region }
    }

    #[inline]
    pub fn region(&self) -> &Arc<SharedRegion> {
        &self.region
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.region.layout().capacity()
    }

    #[inline]
    pub fn id_base(&self) -> u32 {
        self.region.id_base()
    }

    /// Number of allocated nodes, including the reserved null slot.
    #[inline]
    pub fn top(&self) -> u32 {
        self.region.top().load(Ordering::Acquire)
    }

    /// First id this arena can hand out.
    #[inline]
    pub fn first_id(&self) -> u32 {
        self.id_base() + 1
    }

    /// True when `id` was allocated by this arena.
    ///
    /// `top` is clamped to capacity so an overshot allocation counter never
    /// admits ids past the end of the node region.
    #[inline]
    pub fn contains(&self, id: u32) -> bool {
        id > self.id_base() && id - self.id_base() < self.top().min(self.capacity())
    }

    /// Allocates one node, returning its stable global id.
    pub fn alloc(&self, node: Node) -> Result<u32, ArenaError> {
        let local = self.region.top().fetch_add(1, Ordering::AcqRel);
        if local >= self.capacity() {
            // Leave top overshot; the arena is dead either way.
            return Err(ArenaError::Exhausted {
                capacity: self.capacity(),
            });
        }

        let (kind, a, b) = encode(node);
        let words = self.node_ptr(local);
        // SAFETY: `local` was exclusively claimed by the fetch_add above and
        // is in bounds; nothing reads a node before its id is published.
        unsafe {
            words.write(kind);
            words.add(1).write(a);
            words.add(2).write(b);
        }
        Ok(self.id_base() + local)
    }

    #[inline]
    pub fn alloc_app(&self, lft: u32, rgt: u32) -> Result<u32, ArenaError> {
        self.alloc(Node::App { lft, rgt })
    }

    /// Decodes the node at `id`.
    pub fn get(&self, id: u32) -> Result<Node, ArenaError> {
        if !self.contains(id) {
            return Err(ArenaError::Dangling { id });
        }
        let local = id - self.id_base();
        let words = self.node_ptr(local);
        // SAFETY: `contains` bounds-checked the local index against top; the
        // node was fully written before its id became reachable.
        let (kind, a, b) = unsafe { (words.read(), words.add(1).read(), words.add(2).read()) };
        decode(id, kind, a, b)
    }

    #[inline]
    fn node_ptr(&self, local: u32) -> *mut u32 {
        let off = self.region.layout().arena_data() + local as usize * NODE_WORDS * 4;
        self.region.words_at(off, NODE_WORDS)
    }

    /// Pretty-prints the term rooted at `id`.
    ///
    /// Standard combinator notation: application is juxtaposition and
    /// associates left, so parentheses appear only around right-nested
    /// applications. `SKK` is `((S K) K)`; `S(KK)` is `(S (K K))`.
    pub fn pretty(&self, id: u32) -> Result<String, ArenaError> {
        let mut out = String::new();
        self.render(id, false, &mut out)?;
        Ok(out)
    }

    fn render(&self, id: u32, parens: bool, out: &mut String) -> Result<(), ArenaError> {
        match self.get(id)? {
            Node::App { lft, rgt } => {
                if parens {
                    out.push('(');
                }
                self.render(lft, false, out)?;
                self.render(rgt, true, out)?;
                if parens {
                    out.push(')');
                }
            }
            Node::S => out.push('S'),
            Node::K => out.push('K'),
            Node::I => out.push('I'),
            Node::Lit(v) => {
                out.push('#');
                out.push_str(&v.to_string());
            }
            Node::Con { tag, arity } => {
                out.push('C');
                out.push_str(&tag.to_string());
                out.push('/');
                out.push_str(&arity.to_string());
            }
            Node::Case { branches } => {
                out.push_str("case");
                out.push_str(&branches.to_string());
            }
            Node::Read1 => out.push_str("read1"),
            Node::Write1 => out.push_str("write1"),
        }
        Ok(())
    }
}

impl std::fmt::Debug for Arena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arena")
            .field("id_base", &self.id_base())
            .field("capacity", &self.capacity())
            .field("top", &self.top())
            .finish()
    }
}

fn encode(node: Node) -> (u32, u32, u32) {
    match node {
        Node::App { lft, rgt } => (KIND_APP, lft, rgt),
        Node::S => (KIND_S, 0, 0),
        Node::K => (KIND_K, 0, 0),
        Node::I => (KIND_I, 0, 0),
        Node::Lit(v) => (KIND_LIT, v, 0),
        Node::Con { tag, arity } => (KIND_CON, tag, arity),
        Node::Case { branches } => (KIND_CASE, branches, 0),
        Node::Read1 => (KIND_READ1, 0, 0),
        Node::Write1 => (KIND_WRITE1, 0, 0),
    }
}

fn decode(id: u32, kind: u32, a: u32, b: u32) -> Result<Node, ArenaError> {
    match kind {
        KIND_APP => Ok(Node::App { lft: a, rgt: b }),
        KIND_S => Ok(Node::S),
        KIND_K => Ok(Node::K),
        KIND_I => Ok(Node::I),
        KIND_LIT => Ok(Node::Lit(a)),
        KIND_CON => Ok(Node::Con { tag: a, arity: b }),
        KIND_CASE => Ok(Node::Case { branches: a }),
        KIND_READ1 => Ok(Node::Read1),
        KIND_WRITE1 => Ok(Node::Write1),
        other => Err(ArenaError::Corrupt { id, kind: other }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::Layout;

    fn arena() -> Arena {
        Arena::new(SharedRegion::create(Layout::new(16, 64).unwrap(), 0).unwrap())
    }

    #[test]
    fn ids_are_dense_and_monotonic_from_one() {
        let arena = arena();
        let a = arena.alloc(Node::S).unwrap();
        let b = arena.alloc(Node::K).unwrap();
        let c = arena.alloc_app(a, b).unwrap();
        assert_eq!((a, b, c), (1, 2, 3));
        assert_eq!(arena.top(), 4);
    }

    #[test]
    fn id_base_offsets_the_id_space() {
        let region = SharedRegion::create(Layout::new(16, 64).unwrap(), 640).unwrap();
        let arena = Arena::new(region);
        assert_eq!(arena.first_id(), 641);
        let a = arena.alloc(Node::I).unwrap();
        assert_eq!(a, 641);
        assert!(arena.contains(641));
        assert!(!arena.contains(640));
        assert!(!arena.contains(1));
    }

    #[test]
    fn get_round_trips_every_kind() {
        let arena = arena();
        let nodes = [
            Node::S,
            Node::K,
            Node::I,
            Node::Lit(65),
            Node::Con { tag: 1, arity: 2 },
            Node::Case { branches: 2 },
            Node::Read1,
            Node::Write1,
        ];
        let ids: Vec<u32> = nodes.iter().map(|n| arena.alloc(*n).unwrap()).collect();
        let app = arena.alloc_app(ids[0], ids[1]).unwrap();

        for (node, id) in nodes.iter().zip(&ids) {
            assert_eq!(arena.get(*id).unwrap(), *node);
        }
        assert_eq!(
            arena.get(app).unwrap(),
            Node::App {
                lft: ids[0],
                rgt: ids[1]
            }
        );
    }

    #[test]
    fn null_and_out_of_range_ids_are_dangling() {
        let arena = arena();
        let a = arena.alloc(Node::S).unwrap();
        assert_eq!(arena.get(NULL_ID), Err(ArenaError::Dangling { id: 0 }));
        assert_eq!(arena.get(a + 1), Err(ArenaError::Dangling { id: a + 1 }));
    }

    #[test]
    fn exhaustion_is_an_error_not_a_wraparound() {
        let region = SharedRegion::create(Layout::new(16, 16).unwrap(), 0).unwrap();
        let arena = Arena::new(region);
        for _ in 0..15 {
            arena.alloc(Node::I).unwrap();
        }
        assert_eq!(
            arena.alloc(Node::I),
            Err(ArenaError::Exhausted { capacity: 16 })
        );
        // Still failing afterwards; top stays overshot.
        assert_eq!(
            arena.alloc(Node::I),
            Err(ArenaError::Exhausted { capacity: 16 })
        );
    }

    #[test]
    fn pretty_uses_minimal_parentheses() {
        let arena = arena();
        let s = arena.alloc(Node::S).unwrap();
        let k = arena.alloc(Node::K).unwrap();
        let i = arena.alloc(Node::I).unwrap();
        let sk = arena.alloc_app(s, k).unwrap();
        let skk = arena.alloc_app(sk, k).unwrap();
        let ki = arena.alloc_app(k, i).unwrap();
        let s_ki = arena.alloc_app(s, ki).unwrap();

        assert_eq!(arena.pretty(skk).unwrap(), "SKK");
        assert_eq!(arena.pretty(s_ki).unwrap(), "S(KI)");
    }
}
