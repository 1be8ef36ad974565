//! The instruction model produced by the translator.
//!
//! A machine node holds one [`Instruction`]. Node entries are
//! [`Instruction::Consumer`] values — the only instruction kind that may
//! inspect the next input byte — while all other variants are tail
//! instructions that flow into a successor or jump to another node by index.
//!
//! Cursor contract: the single-byte consumers (`Char`, `Range`, `Map`,
//! `Chars`, `Mixed`) peek at the byte under the cursor and never advance it;
//! a committed arm advances explicitly through [`Instruction::Next`]. `Is`
//! commits the matched literal as it scans so it can pause across chunk
//! boundaries; when its ok-arm re-issues the advance (a span capture sits
//! behind the literal) the back-end emits the test in non-committing form.
//! `Consume` advances `data[prop]` bytes itself, decrementing the slot as
//! chunks drain.

use crate::grammar::{Call, PropIx, Selector};
use crate::interval::{Interval, Range};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// A single test inside a [`Consumer::Mixed`] arm.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Check {
    /// Equality against one byte.
    Byte(u8),
    /// A contiguous range test.
    Range(Range),
    /// Membership in a compiled bitmap.
    Map(Interval),
}

/// An instruction that reads (and possibly advances past) input bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Consumer {
    /// Match a literal prefix; may pause across buffers.
    Is {
        subject: Vec<u8>,
        ok: Box<Instruction>,
        err: Box<Instruction>,
    },
    /// Single byte equality.
    Char {
        byte: u8,
        ok: Box<Instruction>,
        err: Box<Instruction>,
    },
    /// Range test.
    Range {
        range: Range,
        ok: Box<Instruction>,
        err: Box<Instruction>,
    },
    /// Membership in a compiled bitmap.
    Map {
        interval: Interval,
        ok: Box<Instruction>,
        err: Box<Instruction>,
    },
    /// Dense switch; every arm tests one byte.
    Chars {
        arms: Vec<(u8, Instruction)>,
        otherwise: Box<Instruction>,
    },
    /// Chained if-else over heterogeneous checks.
    Mixed {
        arms: Vec<(Check, Instruction)>,
        otherwise: Box<Instruction>,
    },
    /// Advance `data[prop]` bytes; may span chunks.
    Consume { prop: PropIx, ok: Box<Instruction> },
}

/// One machine instruction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Instruction {
    /// The entry form: gates on input availability.
    Consumer(Consumer),
    /// Dispatch on a host-provided value.
    Select {
        selector: Selector,
        arms: Vec<(u64, Instruction)>,
        otherwise: Box<Instruction>,
    },
    /// Advance the cursor by `count` bytes. Never emitted with `count == 0`.
    Next {
        count: usize,
        next: Box<Instruction>,
    },
    /// Write `data` (or the byte under the cursor if absent) into a slot.
    Store {
        prop: PropIx,
        data: Option<u8>,
        next: Box<Instruction>,
    },
    /// Record the current position as the start of span `prop`.
    Capture { prop: PropIx, next: Box<Instruction> },
    /// Fire span `prop`'s callback with `(start, current, buffer)` and clear
    /// the recorded start.
    Close { prop: PropIx, next: Box<Instruction> },
    /// Perform a computation.
    Call { call: Call, next: Box<Instruction> },
    /// Jump to the node at the given index.
    Goto(usize),
    /// Terminate with an author-defined error code.
    Error(u64),
}

impl Instruction {
    /// Returns `true` when this instruction may serve as a node entry.
    pub fn is_consumer(&self) -> bool {
        matches!(self, Instruction::Consumer(_))
    }

    /// A stable structural fingerprint. The translator groups branch arms by
    /// this value so identical continuations dedupe into a single arm.
    pub fn fingerprint(&self) -> u64 {
        let mut h = DefaultHasher::new();
        self.hash(&mut h);
        h.finish()
    }

    /// Pre-order traversal over this instruction and everything nested in
    /// it, consumer payloads included.
    pub fn visit<'a>(&'a self, f: &mut impl FnMut(&'a Instruction)) {
        f(self);
        match self {
            Instruction::Consumer(c) => match c {
                Consumer::Is { ok, err, .. }
                | Consumer::Char { ok, err, .. }
                | Consumer::Range { ok, err, .. }
                | Consumer::Map { ok, err, .. } => {
                    ok.visit(f);
                    err.visit(f);
                }
                Consumer::Chars { arms, otherwise } => {
                    for (_, inst) in arms {
                        inst.visit(f);
                    }
                    otherwise.visit(f);
                }
                Consumer::Mixed { arms, otherwise } => {
                    for (_, inst) in arms {
                        inst.visit(f);
                    }
                    otherwise.visit(f);
                }
                Consumer::Consume { ok, .. } => ok.visit(f),
            },
            Instruction::Select {
                arms, otherwise, ..
            } => {
                for (_, inst) in arms {
                    inst.visit(f);
                }
                otherwise.visit(f);
            }
            Instruction::Next { next, .. }
            | Instruction::Store { next, .. }
            | Instruction::Capture { next, .. }
            | Instruction::Close { next, .. }
            | Instruction::Call { next, .. } => next.visit(f),
            Instruction::Goto(_) | Instruction::Error(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn goto(n: usize) -> Instruction {
        Instruction::Goto(n)
    }

    #[test]
    fn fingerprint_is_structural() {
        let a = Instruction::Next {
            count: 1,
            next: Box::new(goto(3)),
        };
        let b = Instruction::Next {
            count: 1,
            next: Box::new(goto(3)),
        };
        let c = Instruction::Next {
            count: 1,
            next: Box::new(goto(4)),
        };
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn visit_reaches_consumer_payloads() {
        let inst = Instruction::Consumer(Consumer::Chars {
            arms: vec![
                (b'a', goto(1)),
                (
                    b'b',
                    Instruction::Next {
                        count: 1,
                        next: Box::new(goto(2)),
                    },
                ),
            ],
            otherwise: Box::new(Instruction::Error(7)),
        });
        let mut gotos = Vec::new();
        let mut errors = Vec::new();
        inst.visit(&mut |i| match i {
            Instruction::Goto(n) => gotos.push(*n),
            Instruction::Error(code) => errors.push(*code),
            _ => {}
        });
        assert_eq!(gotos, vec![1, 2]);
        assert_eq!(errors, vec![7]);
    }

    #[test]
    fn only_consumers_are_entries() {
        let c = Instruction::Consumer(Consumer::Consume {
            prop: 0,
            ok: Box::new(goto(0)),
        });
        assert!(c.is_consumer());
        assert!(!goto(0).is_consumer());
        assert!(!Instruction::Error(0).is_consumer());
    }
}
