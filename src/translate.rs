//! The translator: walks specialized trees and assembles the [`Machine`].
//!
//! Named states are reserved in source order first, so their node indices
//! match the grammar's and forward `goto`s resolve immediately. Interior
//! consumers (nested branches, default-position consumes) materialize fresh
//! nodes post-order and are reached through `goto`, which keeps every node
//! entry a consumer.

use crate::error::GrammarError;
use crate::grammar::{Action, Call, Capture, Grammar, Pattern, Selector, Storage};
use crate::inst::{Check, Consumer, Instruction};
use crate::interval::Interval;
use crate::machine::Machine;
use crate::specialize::{self, Branches, Next, SAction, Step, Tree};
use indexmap::IndexMap;
use smartstring::alias::String;

/// Translates a grammar into its machine.
///
/// This is a pure function of the grammar: node indices, arm order, and
/// generated labels are a deterministic function of source order and the
/// structural identity of compiled continuations.
pub fn translate(grammar: &Grammar) -> Result<Machine, GrammarError> {
    validate(grammar)?;

    let mut t = Translator {
        machine: Machine::new(grammar.storage.clone()),
    };

    // Reserve one node per named state, in source order.
    for node in &grammar.nodes {
        if t.machine.mapper.contains_key(node.name.as_str()) {
            return Err(GrammarError::DuplicateState(node.name.clone()));
        }
        let ix = t.machine.add_node(Some(&node.name));
        t.machine.mapper.insert(node.name.clone(), ix);
    }

    for (ix, node) in grammar.nodes.iter().enumerate() {
        let tree = specialize::solve(node)?;
        let entry = t.compile_tree(node.name.as_str(), &tree, 0, true)?;
        t.machine.set_node(ix, entry);
    }

    Ok(t.machine)
}

struct Translator {
    machine: Machine,
}

impl Translator {
    /// `next(jump, inst)` with zero-byte advances elided.
    fn goto_next(jump: usize, inst: Instruction) -> Instruction {
        if jump > 0 {
            Instruction::Next {
                count: jump,
                next: Box::new(inst),
            }
        } else {
            inst
        }
    }

    fn resolve(&self, name: &String) -> Result<usize, GrammarError> {
        self.machine
            .index_of(name)
            .ok_or_else(|| GrammarError::UnknownState(name.clone()))
    }

    /// Compiles an action chain under `jump` pending bytes of advance.
    ///
    /// The advance stays pending across data stores, calls, and span opens —
    /// each needs the byte (or its position) still under the cursor — and is
    /// placed at the first link that no longer does: before a close, before
    /// a jump. An error terminates without advancing, so the reported
    /// position is the offending byte.
    fn compile_action(
        &mut self,
        jump: usize,
        data: Option<u8>,
        action: &SAction,
    ) -> Result<Instruction, GrammarError> {
        Ok(match action {
            SAction::Store(Capture::Data, prop, next) => Instruction::Store {
                prop: *prop,
                data,
                next: Box::new(self.compile_action(jump, data, next)?),
            },
            SAction::Store(Capture::Begin, prop, next) => Instruction::Capture {
                prop: *prop,
                next: Box::new(self.compile_action(jump, data, next)?),
            },
            SAction::Store(Capture::Close, prop, next) => Self::goto_next(
                jump,
                Instruction::Close {
                    prop: *prop,
                    next: Box::new(self.compile_action(0, data, next)?),
                },
            ),
            SAction::Call(call, next) => Instruction::Call {
                call: *call,
                next: Box::new(self.compile_action(jump, data, next)?),
            },
            SAction::Goto(name) => {
                let target = self.resolve(name)?;
                Self::goto_next(jump, Instruction::Goto(target))
            }
            SAction::Error(code) => Instruction::Error(*code),
        })
    }

    fn compile_step(&mut self, jump: usize, step: &Step) -> Result<Instruction, GrammarError> {
        // A capturing step records a span start, so at least one byte of
        // advance must follow the capture.
        let jump = if step.capture { jump.max(1) } else { jump };
        match &step.next {
            Next::Single(action) => self.compile_action(jump, step.data, action),
            Next::Select {
                selector,
                arms,
                otherwise,
            } => {
                let mut compiled = Vec::with_capacity(arms.len());
                for (value, action) in arms {
                    compiled.push((*value, self.compile_action(jump, step.data, action)?));
                }
                let otherwise = self.compile_action(jump, step.data, otherwise)?;
                Ok(Instruction::Select {
                    selector: *selector,
                    arms: compiled,
                    otherwise: Box::new(otherwise),
                })
            }
        }
    }

    /// Compiles a tree. `is_entry` marks the instruction that will become a
    /// node's entry (and so may be a consumer directly); interior consumers
    /// are materialized into fresh nodes reached through `goto`.
    fn compile_tree(
        &mut self,
        state: &str,
        tree: &Tree,
        jump: usize,
        is_entry: bool,
    ) -> Result<Instruction, GrammarError> {
        match tree {
            Tree::Fail => Ok(Instruction::Error(0)),
            Tree::Done(step) => self.compile_step(jump, step),
            Tree::Consume { prop, step } => {
                let ok = self.compile_step(jump, step)?;
                let consumer = Instruction::Consumer(Consumer::Consume {
                    prop: *prop,
                    ok: Box::new(ok),
                });
                if is_entry {
                    Ok(consumer)
                } else {
                    // A fresh node, so control returning here resumes the
                    // consume at a chunk boundary.
                    let ix = self.machine.add_node(None);
                    self.machine.set_node(ix, consumer);
                    Ok(Self::goto_next(jump, Instruction::Goto(ix)))
                }
            }
            Tree::Branch { branches, default } => {
                let default_inst = self.compile_tree(state, default, 0, false)?;
                let consumer = match branches {
                    Branches::Str(branch) => {
                        let inner_jump = if tree_captures(&branch.next) {
                            branch.subject.len()
                        } else {
                            0
                        };
                        log::trace!(
                            "state {:?}: is {} (jump {})",
                            state,
                            hex::encode(&branch.subject),
                            inner_jump
                        );
                        let ok = self.compile_tree(state, &branch.next, inner_jump, false)?;
                        Consumer::Is {
                            subject: branch.subject.clone(),
                            ok: Box::new(ok),
                            err: Box::new(default_inst),
                        }
                    }
                    Branches::Chars(matchers) => {
                        let mut groups: IndexMap<Instruction, Vec<u8>> = IndexMap::new();
                        for m in matchers {
                            let inst = self.compile_tree(state, &m.next, 1, false)?;
                            log::trace!(
                                "state {:?}: arm 0x{:02x} -> {:016x}",
                                state,
                                m.byte,
                                inst.fingerprint()
                            );
                            groups.entry(inst).or_default().push(m.byte);
                        }
                        shape(groups, default_inst)
                    }
                };
                let inst = Instruction::Consumer(consumer);
                if is_entry {
                    Ok(Self::goto_next(jump, inst))
                } else {
                    let ix = self.machine.add_node(None);
                    self.machine.set_node(ix, inst);
                    Ok(Self::goto_next(jump, Instruction::Goto(ix)))
                }
            }
        }
    }
}

fn tree_captures(tree: &Tree) -> bool {
    match tree {
        Tree::Done(step) | Tree::Consume { step, .. } => step.capture,
        Tree::Fail | Tree::Branch { .. } => false,
    }
}

/// Picks the consumer shape for a set of grouped arms: a bare
/// `char`/`range`/`map` for a single group, a dense `chars` switch when
/// every group holds one byte, a `mixed` chain otherwise.
fn shape(groups: IndexMap<Instruction, Vec<u8>>, otherwise: Instruction) -> Consumer {
    if groups.len() == 1 {
        match groups.into_iter().next() {
            Some((inst, bytes)) => {
                let interval = Interval::of(&bytes);
                let ok = Box::new(inst);
                let err = Box::new(otherwise);
                return match (interval.as_byte(), interval.as_range()) {
                    (Some(byte), _) => Consumer::Char { byte, ok, err },
                    (None, Some(range)) => Consumer::Range { range, ok, err },
                    _ => Consumer::Map { interval, ok, err },
                };
            }
            None => unreachable!(),
        }
    }
    if groups.values().all(|bytes| bytes.len() == 1) {
        let arms = groups
            .into_iter()
            .map(|(inst, bytes)| (bytes[0], inst))
            .collect();
        return Consumer::Chars {
            arms,
            otherwise: Box::new(otherwise),
        };
    }
    let arms = groups
        .into_iter()
        .map(|(inst, bytes)| {
            let interval = Interval::of(&bytes);
            let check = match (interval.as_byte(), interval.as_range()) {
                (Some(byte), _) => Check::Byte(byte),
                (None, Some(range)) => Check::Range(range),
                _ => Check::Map(interval),
            };
            (check, inst)
        })
        .collect();
    Consumer::Mixed {
        arms,
        otherwise: Box::new(otherwise),
    }
}

fn check_prop(storage: &Storage, state: &str, prop: usize) -> Result<(), GrammarError> {
    if prop < storage.props.len() {
        Ok(())
    } else {
        Err(GrammarError::InvalidProp {
            state: state.into(),
            prop,
            len: storage.props.len(),
        })
    }
}

fn check_numeric(storage: &Storage, state: &str, prop: usize) -> Result<(), GrammarError> {
    check_prop(storage, state, prop)?;
    if storage.props[prop].typ.is_span() {
        Err(GrammarError::PropType {
            state: state.into(),
            prop,
            expected: "numeric",
        })
    } else {
        Ok(())
    }
}

fn check_span(storage: &Storage, state: &str, prop: usize) -> Result<(), GrammarError> {
    check_prop(storage, state, prop)?;
    if storage.props[prop].typ.is_span() {
        Ok(())
    } else {
        Err(GrammarError::PropType {
            state: state.into(),
            prop,
            expected: "span",
        })
    }
}

fn check_callback(storage: &Storage, call: usize) -> Result<(), GrammarError> {
    if call < storage.callbacks.len() {
        Ok(())
    } else {
        Err(GrammarError::InvalidCallback {
            call,
            len: storage.callbacks.len(),
        })
    }
}

fn check_call(storage: &Storage, state: &str, call: &Call) -> Result<(), GrammarError> {
    match call {
        Call::Arbitrary(ix) => check_callback(storage, *ix),
        Call::MulAdd { prop, .. } => check_numeric(storage, state, *prop),
        Call::LoadNum(prop) => check_numeric(storage, state, *prop),
        Call::Store { prop, .. } => check_numeric(storage, state, *prop),
        Call::CallStore { prop, call } => {
            check_numeric(storage, state, *prop)?;
            check_callback(storage, *call)
        }
    }
}

fn check_action(
    storage: &Storage,
    state: &str,
    action: &Action,
    begun: &mut [bool],
    closed: &mut [Option<String>],
) -> Result<(), GrammarError> {
    match action {
        Action::Store(capture, prop, next) => {
            match capture {
                Capture::Data => check_numeric(storage, state, *prop)?,
                Capture::Begin => {
                    check_span(storage, state, *prop)?;
                    begun[*prop] = true;
                }
                Capture::Close => {
                    check_span(storage, state, *prop)?;
                    if closed[*prop].is_none() {
                        closed[*prop] = Some(state.into());
                    }
                }
            }
            check_action(storage, state, next, begun, closed)
        }
        Action::Call(call, next) => {
            check_call(storage, state, call)?;
            check_action(storage, state, next, begun, closed)
        }
        Action::Goto(_) | Action::Error(_) => Ok(()),
        Action::Select {
            selector,
            arms,
            otherwise,
        } => {
            match selector {
                Selector::Call(call) => check_call(storage, state, call)?,
                Selector::Method(prop) => check_numeric(storage, state, *prop)?,
            }
            for (_, arm) in arms {
                check_action(storage, state, arm, begun, closed)?;
            }
            check_action(storage, state, otherwise, begun, closed)
        }
    }
}

fn validate(grammar: &Grammar) -> Result<(), GrammarError> {
    let storage = &grammar.storage;
    let nprops = storage.props.len();
    let mut begun = vec![false; nprops];
    let mut closed: Vec<Option<String>> = vec![None; nprops];

    for node in &grammar.nodes {
        let state = node.name.as_str();
        for (pattern, action) in &node.cases {
            if let Pattern::Consume(prop) = pattern {
                check_numeric(storage, state, *prop)?;
            }
            check_action(storage, state, action, &mut begun, &mut closed)?;
        }
    }

    for (prop, close_state) in closed.iter().enumerate() {
        if let Some(state) = close_state {
            if !begun[prop] {
                return Err(GrammarError::BadCapture {
                    state: state.clone(),
                    prop,
                });
            }
            if storage.span_callback_for(prop).is_none() {
                return Err(GrammarError::MissingSpanCallback {
                    state: state.clone(),
                    prop,
                });
            }
        }
    }
    for (prop, opened) in begun.iter().enumerate() {
        if *opened && closed[prop].is_none() {
            log::warn!(
                "span property {:?} is opened but never closed",
                storage.props[prop].name
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::{Base, Node, Typ};
    use crate::interval::Range;

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn goto(n: usize) -> Instruction {
        Instruction::Goto(n)
    }

    fn next(count: usize, inst: Instruction) -> Instruction {
        Instruction::Next {
            count,
            next: Box::new(inst),
        }
    }

    fn sink(name: &str) -> Node {
        Node::new(name).case(Pattern::Otherwise, Action::error(99))
    }

    #[test]
    fn single_literal_state() {
        init_logger();
        let grammar = Grammar {
            storage: Storage::default(),
            nodes: vec![
                Node::new("start").case(Pattern::literal("GET"), Action::goto("done")),
                sink("done"),
            ],
        };
        let m = translate(&grammar).unwrap();
        assert_eq!(m.names[0], "start");
        assert_eq!(m.names[1], "done");
        assert_eq!(m.index_of("done"), Some(1));
        assert_eq!(
            m.nodes[0].body,
            Instruction::Consumer(Consumer::Is {
                subject: b"GET".to_vec(),
                ok: Box::new(goto(1)),
                err: Box::new(Instruction::Error(0)),
            })
        );
        assert!(m.nodes[0].is_check);
    }

    #[test]
    fn digit_accumulator_advances_after_call() {
        let mut storage = Storage::default();
        let n = storage.prop("n", Typ::U64);
        let grammar = Grammar {
            storage,
            nodes: vec![Node::new("self").case(
                Pattern::Range(b'0', b'9'),
                Action::call(
                    Call::MulAdd {
                        base: Base::Decimal,
                        prop: n,
                    },
                    Action::goto("self"),
                ),
            )],
        };
        let m = translate(&grammar).unwrap();
        assert_eq!(
            m.nodes[0].body,
            Instruction::Consumer(Consumer::Range {
                range: Range::new(0x30, 0x39),
                ok: Box::new(Instruction::Call {
                    call: Call::MulAdd {
                        base: Base::Decimal,
                        prop: n,
                    },
                    next: Box::new(next(1, goto(0))),
                }),
                err: Box::new(Instruction::Error(0)),
            })
        );
    }

    #[test]
    fn shared_continuations_group_into_mixed() {
        let grammar = Grammar {
            storage: Storage::default(),
            nodes: vec![
                Node::new("start")
                    .case(Pattern::Set(vec![b'a', b'b', b'c']), Action::goto("a"))
                    .case(Pattern::Set(vec![b'x', b'z']), Action::goto("b")),
                sink("a"),
                sink("b"),
            ],
        };
        let m = translate(&grammar).unwrap();
        assert_eq!(
            m.nodes[0].body,
            Instruction::Consumer(Consumer::Mixed {
                arms: vec![
                    (Check::Range(Range::new(b'a', b'c')), next(1, goto(1))),
                    (Check::Map(Interval::of(&[b'x', b'z'])), next(1, goto(2))),
                ],
                otherwise: Box::new(Instruction::Error(0)),
            })
        );
    }

    #[test]
    fn chars_shape_when_continuations_differ() {
        let grammar = Grammar {
            storage: Storage::default(),
            nodes: vec![
                Node::new("start")
                    .case(Pattern::Byte(b'a'), Action::goto("a"))
                    .case(Pattern::Byte(b'b'), Action::goto("b")),
                sink("a"),
                sink("b"),
            ],
        };
        let m = translate(&grammar).unwrap();
        assert_eq!(
            m.nodes[0].body,
            Instruction::Consumer(Consumer::Chars {
                arms: vec![(b'a', next(1, goto(1))), (b'b', next(1, goto(2)))],
                otherwise: Box::new(Instruction::Error(0)),
            })
        );
    }

    #[test]
    fn span_capture_paths() {
        let mut storage = Storage::default();
        let sp = storage.prop("word", Typ::Span);
        storage.span_callback("on_word", sp);
        let grammar = Grammar {
            storage,
            nodes: vec![
                Node::new("start").case(
                    Pattern::Range(b'a', b'z'),
                    Action::store(Capture::Begin, sp, Action::goto("word")),
                ),
                Node::new("word")
                    .case(Pattern::Range(b'a', b'z'), Action::goto("word"))
                    .case(
                        Pattern::Otherwise,
                        Action::store(Capture::Close, sp, Action::goto("start")),
                    ),
            ],
        };
        let m = translate(&grammar).unwrap();
        // Begin: capture first, then the raised one-byte advance.
        assert_eq!(
            m.nodes[0].body,
            Instruction::Consumer(Consumer::Range {
                range: Range::new(b'a', b'z'),
                ok: Box::new(Instruction::Capture {
                    prop: sp,
                    next: Box::new(next(1, goto(1))),
                }),
                err: Box::new(Instruction::Error(0)),
            })
        );
        // Close: no pending advance on the default path.
        assert_eq!(
            m.nodes[1].body,
            Instruction::Consumer(Consumer::Range {
                range: Range::new(b'a', b'z'),
                ok: Box::new(next(1, goto(1))),
                err: Box::new(Instruction::Close {
                    prop: sp,
                    next: Box::new(goto(0)),
                }),
            })
        );
    }

    #[test]
    fn capturing_string_branch_reissues_advance() {
        let mut storage = Storage::default();
        let sp = storage.prop("tail", Typ::Span);
        storage.span_callback("on_tail", sp);
        let grammar = Grammar {
            storage,
            nodes: vec![
                Node::new("start").case(
                    Pattern::literal("abc"),
                    Action::store(Capture::Begin, sp, Action::goto("rest")),
                ),
                Node::new("rest").case(
                    Pattern::Otherwise,
                    Action::store(Capture::Close, sp, Action::goto("start")),
                ),
            ],
        };
        let m = translate(&grammar).unwrap();
        assert_eq!(
            m.nodes[0].body,
            Instruction::Consumer(Consumer::Is {
                subject: b"abc".to_vec(),
                ok: Box::new(Instruction::Capture {
                    prop: sp,
                    next: Box::new(next(3, goto(1))),
                }),
                err: Box::new(Instruction::Error(0)),
            })
        );
    }

    #[test]
    fn consume_default_materializes_node() {
        let mut storage = Storage::default();
        let len = storage.prop("len", Typ::U64);
        let grammar = Grammar {
            storage,
            nodes: vec![
                Node::new("start")
                    .case(Pattern::Byte(b':'), Action::goto("start"))
                    .case(Pattern::Consume(len), Action::goto("done")),
                sink("done"),
            ],
        };
        let m = translate(&grammar).unwrap();
        // Named states plus one materialized consume node.
        assert_eq!(m.nodes.len(), 3);
        assert_eq!(m.names[2], "state2");
        assert_eq!(
            m.nodes[2].body,
            Instruction::Consumer(Consumer::Consume {
                prop: len,
                ok: Box::new(goto(1)),
            })
        );
        assert_eq!(
            m.nodes[0].body,
            Instruction::Consumer(Consumer::Char {
                byte: b':',
                ok: Box::new(next(1, goto(0))),
                err: Box::new(goto(2)),
            })
        );
    }

    #[test]
    fn entry_consume_stays_in_place() {
        let mut storage = Storage::default();
        let len = storage.prop("len", Typ::U64);
        let grammar = Grammar {
            storage,
            nodes: vec![
                Node::new("body").case(Pattern::Consume(len), Action::goto("done")),
                sink("done"),
            ],
        };
        let m = translate(&grammar).unwrap();
        assert_eq!(m.nodes.len(), 2);
        assert_eq!(
            m.nodes[0].body,
            Instruction::Consumer(Consumer::Consume {
                prop: len,
                ok: Box::new(goto(1)),
            })
        );
        assert!(m.nodes[0].is_check);
    }

    #[test]
    fn conflict_is_fatal() {
        let grammar = Grammar {
            storage: Storage::default(),
            nodes: vec![
                Node::new("start")
                    .case(Pattern::Byte(b'A'), Action::goto("start"))
                    .case(Pattern::Byte(b'A'), Action::error(1)),
            ],
        };
        match translate(&grammar).unwrap_err() {
            GrammarError::Conflict { state, details } => {
                assert_eq!(state, "start");
                assert!(details.contains("overlapping at 0x41"));
            }
            other => panic!("expected Conflict, got {:?}", other),
        }
    }

    #[test]
    fn unknown_goto_target() {
        let grammar = Grammar {
            storage: Storage::default(),
            nodes: vec![Node::new("start").case(Pattern::Byte(b'x'), Action::goto("missing"))],
        };
        assert_eq!(
            translate(&grammar).unwrap_err(),
            GrammarError::UnknownState("missing".into())
        );
    }

    #[test]
    fn duplicate_state_names() {
        let grammar = Grammar {
            storage: Storage::default(),
            nodes: vec![sink("start"), sink("start")],
        };
        assert_eq!(
            translate(&grammar).unwrap_err(),
            GrammarError::DuplicateState("start".into())
        );
    }

    #[test]
    fn validation_catches_bad_props_and_captures() {
        let grammar = Grammar {
            storage: Storage::default(),
            nodes: vec![Node::new("start").case(
                Pattern::Byte(b'x'),
                Action::store(Capture::Data, 0, Action::goto("start")),
            )],
        };
        assert!(matches!(
            translate(&grammar).unwrap_err(),
            GrammarError::InvalidProp { prop: 0, len: 0, .. }
        ));

        let mut storage = Storage::default();
        let sp = storage.prop("sp", Typ::Span);
        let grammar = Grammar {
            storage,
            nodes: vec![Node::new("start").case(
                Pattern::Byte(b'x'),
                Action::store(Capture::Data, sp, Action::goto("start")),
            )],
        };
        assert!(matches!(
            translate(&grammar).unwrap_err(),
            GrammarError::PropType {
                expected: "numeric",
                ..
            }
        ));

        // Close with no begin anywhere.
        let mut storage = Storage::default();
        let sp = storage.prop("sp", Typ::Span);
        storage.span_callback("on_sp", sp);
        let grammar = Grammar {
            storage,
            nodes: vec![Node::new("start").case(
                Pattern::Byte(b'x'),
                Action::store(Capture::Close, sp, Action::goto("start")),
            )],
        };
        assert!(matches!(
            translate(&grammar).unwrap_err(),
            GrammarError::BadCapture { prop: 0, .. }
        ));

        // Close with a begin but no declared span callback.
        let mut storage = Storage::default();
        let sp = storage.prop("sp", Typ::Span);
        let grammar = Grammar {
            storage,
            nodes: vec![Node::new("start").case(
                Pattern::Byte(b'x'),
                Action::store(
                    Capture::Begin,
                    sp,
                    Action::store(Capture::Close, sp, Action::goto("start")),
                ),
            )],
        };
        assert!(matches!(
            translate(&grammar).unwrap_err(),
            GrammarError::MissingSpanCallback { prop: 0, .. }
        ));
    }

    #[test]
    fn data_stores_keep_per_byte_arms() {
        let mut storage = Storage::default();
        let c = storage.prop("c", Typ::Char);
        let grammar = Grammar {
            storage,
            nodes: vec![Node::new("start").case(
                Pattern::Set(vec![b'a', b'b']),
                Action::store(Capture::Data, c, Action::goto("start")),
            )],
        };
        let m = translate(&grammar).unwrap();
        // The stored byte differs per arm, so the arms never merge.
        assert_eq!(
            m.nodes[0].body,
            Instruction::Consumer(Consumer::Chars {
                arms: vec![
                    (
                        b'a',
                        Instruction::Store {
                            prop: c,
                            data: Some(b'a'),
                            next: Box::new(next(1, goto(0))),
                        }
                    ),
                    (
                        b'b',
                        Instruction::Store {
                            prop: c,
                            data: Some(b'b'),
                            next: Box::new(next(1, goto(0))),
                        }
                    ),
                ],
                otherwise: Box::new(Instruction::Error(0)),
            })
        );
    }

    #[test]
    fn literal_factoring_materializes_interior_nodes() {
        let grammar = Grammar {
            storage: Storage::default(),
            nodes: vec![
                Node::new("start")
                    .case(Pattern::literal("GET"), Action::goto("get"))
                    .case(Pattern::literal("GONE"), Action::goto("gone")),
                sink("get"),
                sink("gone"),
            ],
        };
        let m = translate(&grammar).unwrap();
        assert_eq!(m.nodes.len(), 6);
        // Entry discriminates on 'G' and advances into the residual node.
        assert_eq!(
            m.nodes[0].body,
            Instruction::Consumer(Consumer::Char {
                byte: b'G',
                ok: Box::new(next(1, goto(5))),
                err: Box::new(Instruction::Error(0)),
            })
        );
        // Residual node: dense switch into the two string tails.
        assert_eq!(
            m.nodes[5].body,
            Instruction::Consumer(Consumer::Chars {
                arms: vec![(b'E', next(1, goto(3))), (b'O', next(1, goto(4)))],
                otherwise: Box::new(Instruction::Error(0)),
            })
        );
        assert_eq!(
            m.nodes[3].body,
            Instruction::Consumer(Consumer::Is {
                subject: b"T".to_vec(),
                ok: Box::new(goto(1)),
                err: Box::new(Instruction::Error(0)),
            })
        );
        assert_eq!(
            m.nodes[4].body,
            Instruction::Consumer(Consumer::Is {
                subject: b"NE".to_vec(),
                ok: Box::new(goto(2)),
                err: Box::new(Instruction::Error(0)),
            })
        );
    }

    #[test]
    fn select_arms_compile_under_shared_jump() {
        let mut storage = Storage::default();
        let n = storage.prop("n", Typ::U64);
        let grammar = Grammar {
            storage,
            nodes: vec![
                Node::new("start").case(
                    Pattern::Byte(b'!'),
                    Action::Select {
                        selector: Selector::Method(n),
                        arms: vec![(1, Action::goto("one"))],
                        otherwise: Box::new(Action::error(5)),
                    },
                ),
                sink("one"),
            ],
        };
        let m = translate(&grammar).unwrap();
        assert_eq!(
            m.nodes[0].body,
            Instruction::Consumer(Consumer::Char {
                byte: b'!',
                ok: Box::new(Instruction::Select {
                    selector: Selector::Method(n),
                    arms: vec![(1, next(1, goto(1)))],
                    otherwise: Box::new(Instruction::Error(5)),
                }),
                err: Box::new(Instruction::Error(0)),
            })
        );
    }

    fn sample_grammar() -> Grammar {
        let mut storage = Storage::default();
        let n = storage.prop("n", Typ::U64);
        let sp = storage.prop("body", Typ::Span);
        storage.span_callback("on_body", sp);
        let done = storage.callback("on_done", &[n]);
        Grammar {
            storage,
            nodes: vec![
                Node::new("start")
                    .case(Pattern::literal("LEN:"), Action::goto("num"))
                    .case(Pattern::Set(vec![b' ', b'\t']), Action::goto("start")),
                Node::new("num")
                    .case(
                        Pattern::Range(b'0', b'9'),
                        Action::call(
                            Call::MulAdd {
                                base: Base::Decimal,
                                prop: n,
                            },
                            Action::goto("num"),
                        ),
                    )
                    .case(
                        Pattern::Byte(b'\n'),
                        Action::store(Capture::Begin, sp, Action::goto("body")),
                    ),
                Node::new("body")
                    .case(
                        Pattern::Byte(0),
                        Action::store(
                            Capture::Close,
                            sp,
                            Action::call(Call::Arbitrary(done), Action::goto("start")),
                        ),
                    )
                    .case(Pattern::Otherwise, Action::goto("body")),
            ],
        }
    }

    #[test]
    fn translate_is_deterministic() {
        let g = sample_grammar();
        let a = translate(&g).unwrap();
        let b = translate(&g).unwrap();
        assert_eq!(a, b);
        let ka: Vec<_> = a.mapper.keys().cloned().collect();
        let kb: Vec<_> = b.mapper.keys().cloned().collect();
        assert_eq!(ka, kb);
    }

    #[test]
    fn machine_invariants_hold() {
        let g = sample_grammar();
        let m = translate(&g).unwrap();
        assert_eq!(m.index_of("start"), Some(0));
        assert_eq!(m.index_of("num"), Some(1));
        assert_eq!(m.index_of("body"), Some(2));
        for (ix, node) in m.nodes.iter().enumerate() {
            assert!(node.is_check, "node {} entry is not a consumer", ix);
            node.body.visit(&mut |inst| match inst {
                Instruction::Goto(target) => {
                    assert!(*target < m.nodes.len(), "goto {} out of range", target)
                }
                Instruction::Next { count, .. } => {
                    assert!(*count > 0, "zero-byte advance emitted")
                }
                _ => {}
            });
        }
        // Chars arms carry pairwise distinct continuations.
        for node in &m.nodes {
            node.body.visit(&mut |inst| {
                if let Instruction::Consumer(Consumer::Chars { arms, .. }) = inst {
                    for i in 0..arms.len() {
                        for j in i + 1..arms.len() {
                            assert_ne!(arms[i].1, arms[j].1, "mergeable chars arms survived");
                        }
                    }
                }
            });
        }
    }

    #[test]
    fn grouping_is_idempotent() {
        // Two cases sharing a continuation compile exactly like the single
        // case over their unioned interval.
        let split = Grammar {
            storage: Storage::default(),
            nodes: vec![
                Node::new("start")
                    .case(Pattern::Set(vec![b'a']), Action::goto("next"))
                    .case(Pattern::Set(vec![b'b']), Action::goto("next")),
                sink("next"),
            ],
        };
        let merged = Grammar {
            storage: Storage::default(),
            nodes: vec![
                Node::new("start").case(Pattern::Set(vec![b'a', b'b']), Action::goto("next")),
                sink("next"),
            ],
        };
        assert_eq!(
            translate(&split).unwrap().nodes,
            translate(&merged).unwrap().nodes
        );
    }
}
