use crate::arena::{Arena, ArenaError, Node};
use std::fmt;

/// A combinator term, the lowering contract between a front-end and the
/// arena.
///
/// Front-ends (parser, elaborator, enumerator) build `Term`s; the runtime
/// only ever sees node ids. Lowering is post-order, so the children of an
/// application always receive smaller ids than the application itself and
/// a fixed term sequence lowers to a fixed id sequence.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Term {
    S,
    K,
    I,
    /// Numeric or character literal with an embedded value.
    Lit(u32),
    /// Data constructor with a tag and arity.
    Con { tag: u32, arity: u32 },
    /// Pattern selector over `branches` constructors.
    Case { branches: u32 },
    /// Read one byte from stdin, continuation-passing.
    Read1,
    /// Write one byte to stdout, reducing to unit.
    Write1,
    App(Box<Term>, Box<Term>),
}

impl Term {
    /// Application shorthand.
    pub fn app(lft: Term, rgt: Term) -> Term {
        Term::App(Box::new(lft), Box::new(rgt))
    }

    /// Left-folds `f` onto `args`: `apply(f, [a, b]) = ((f a) b)`.
    pub fn apply(f: Term, args: impl IntoIterator<Item = Term>) -> Term {
        args.into_iter().fold(f, Term::app)
    }

    /// The unit value, a nullary constructor.
    pub fn unit() -> Term {
        Term::Con { tag: 0, arity: 0 }
    }

    /// Number of leaf symbols.
    pub fn symbols(&self) -> usize {
        match self {
            Term::App(l, r) => l.symbols() + r.symbols(),
            _ => 1,
        }
    }

    /// Lowers the term into `arena`, returning the root id.
    pub fn lower(&self, arena: &Arena) -> Result<u32, ArenaError> {
        match self {
            Term::App(l, r) => {
                let lft = l.lower(arena)?;
                let rgt = r.lower(arena)?;
                arena.alloc_app(lft, rgt)
            }
            Term::S => arena.alloc(Node::S),
            Term::K => arena.alloc(Node::K),
            Term::I => arena.alloc(Node::I),
            Term::Lit(v) => arena.alloc(Node::Lit(*v)),
            Term::Con { tag, arity } => arena.alloc(Node::Con {
                tag: *tag,
                arity: *arity,
            }),
            Term::Case { branches } => arena.alloc(Node::Case {
                branches: *branches,
            }),
            Term::Read1 => arena.alloc(Node::Read1),
            Term::Write1 => arena.alloc(Node::Write1),
        }
    }

    fn fmt_inner(&self, parens: bool, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::App(l, r) => {
                if parens {
                    f.write_str("(")?;
                }
                l.fmt_inner(false, f)?;
                r.fmt_inner(true, f)?;
                if parens {
                    f.write_str(")")?;
                }
                Ok(())
            }
            Term::S => f.write_str("S"),
            Term::K => f.write_str("K"),
            Term::I => f.write_str("I"),
            Term::Lit(v) => write!(f, "#{v}"),
            Term::Con { tag, arity } => write!(f, "C{tag}/{arity}"),
            Term::Case { branches } => write!(f, "case{branches}"),
            Term::Read1 => f.write_str("read1"),
            Term::Write1 => f.write_str("write1"),
        }
    }
}

impl fmt::Display for Term {
    /// Same notation as [`Arena::pretty`], so a lowered term prints
    /// identically from either side.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_inner(false, f)
    }
}
