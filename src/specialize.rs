//! The specializer: solves one state's cases into a decision [`Tree`].
//!
//! Each grammar state carries an ordered list of `(pattern, action)` cases.
//! The specializer checks that the cases are disjoint, factors literals that
//! share leading bytes, expands character classes into per-byte matchers,
//! and lowers actions into the restricted [`SAction`] chain language. The
//! translator later regroups per-byte matchers whose compiled continuations
//! coincide, so expansion here loses nothing.

use crate::error::GrammarError;
use crate::grammar::{Action, Capture, Call, Node, Pattern, PropIx, Selector};
use crate::interval::Interval;
use indexmap::IndexMap;
use smartstring::alias::String;

/// The lowered action chain: stores and calls ending in a jump or an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SAction {
    Store(Capture, PropIx, Box<SAction>),
    Call(Call, Box<SAction>),
    Goto(String),
    Error(u64),
}

/// What follows a step: one action chain, or a multi-way switch on a
/// host-provided value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Next {
    Single(SAction),
    Select {
        selector: Selector,
        arms: Vec<(u64, SAction)>,
        otherwise: Box<SAction>,
    },
}

/// A terminal step of the tree.
///
/// `capture` is `true` when some path through the step opens a span, which
/// forces the translator to keep at least one byte of advance pending.
/// `data` carries the byte a per-byte matcher committed to, so a
/// `Capture::Data` store can be emitted with an immediate payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub capture: bool,
    pub data: Option<u8>,
    pub next: Next,
}

/// A literal-prefix specialization: the whole residual string at once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrBranch {
    pub subject: Vec<u8>,
    pub next: Box<Tree>,
}

/// A single-byte discriminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharBranch {
    pub byte: u8,
    pub next: Tree,
}

/// The branch payload of a [`Tree::Branch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Branches {
    Str(StrBranch),
    Chars(Vec<CharBranch>),
}

/// The specialized decision tree for one state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tree {
    /// Unconditional match failure.
    Fail,
    /// Perform the step and leave the node.
    Done(Step),
    /// Swallow `data[prop]` bytes, then perform the step.
    Consume { prop: PropIx, step: Step },
    /// Discriminate on leading byte(s); `default` is the fallthrough.
    Branch {
        branches: Branches,
        default: Box<Tree>,
    },
}

enum CaseItem<'g> {
    Class(Interval, &'g Action),
    Lit(&'g [u8], &'g Action),
}

fn conflict(state: &str, details: std::string::String) -> GrammarError {
    GrammarError::Conflict {
        state: state.into(),
        details: details.into(),
    }
}

/// Solves a state's cases into a decision tree.
///
/// Fails with [`GrammarError::Conflict`] when two cases accept an
/// overlapping byte or prefix, [`GrammarError::EmptyPattern`] for vacuous
/// patterns, and [`GrammarError::BadSelect`] for a `select` below a store
/// or call.
pub fn solve(node: &Node) -> Result<Tree, GrammarError> {
    let state = node.name.as_str();
    let mut items: Vec<CaseItem> = Vec::new();
    let mut default: Option<(Option<PropIx>, &Action)> = None;

    for (pattern, action) in &node.cases {
        match pattern {
            Pattern::Byte(b) => items.push(CaseItem::Class(Interval::point(*b), action)),
            Pattern::Range(lo, hi) => match Interval::span(*lo, *hi) {
                Some(iv) => items.push(CaseItem::Class(iv, action)),
                None => {
                    return Err(GrammarError::EmptyPattern {
                        state: state.into(),
                    });
                }
            },
            Pattern::Set(bytes) => match Interval::from_bytes(bytes) {
                Some(iv) => items.push(CaseItem::Class(iv, action)),
                None => {
                    return Err(GrammarError::EmptyPattern {
                        state: state.into(),
                    });
                }
            },
            Pattern::Literal(bytes) => {
                if bytes.is_empty() {
                    return Err(GrammarError::EmptyPattern {
                        state: state.into(),
                    });
                }
                items.push(CaseItem::Lit(bytes, action));
            }
            Pattern::Consume(prop) => {
                if default.is_some() {
                    return Err(conflict(state, "more than one default case".to_owned()));
                }
                default = Some((Some(*prop), action));
            }
            Pattern::Otherwise => {
                if default.is_some() {
                    return Err(conflict(state, "more than one default case".to_owned()));
                }
                default = Some((None, action));
            }
        }
    }

    // Pairwise disjointness among character classes.
    let classes: Vec<&Interval> = items
        .iter()
        .filter_map(|item| match item {
            CaseItem::Class(iv, _) => Some(iv),
            CaseItem::Lit(..) => None,
        })
        .collect();
    for i in 0..classes.len() {
        for j in i + 1..classes.len() {
            if let Some(b) = classes[i].first_common_byte(classes[j]) {
                return Err(conflict(state, format!("overlapping at 0x{:02X}", b)));
            }
        }
    }

    let default_tree = match default {
        None => Tree::Fail,
        Some((None, action)) => Tree::Done(lower(state, action, None)?),
        Some((Some(prop), action)) => Tree::Consume {
            prop,
            step: lower(state, action, None)?,
        },
    };

    if items.is_empty() {
        return Ok(default_tree);
    }
    log::debug!("state {:?}: {} case items", state, items.len());
    build(state, &items, &default_tree)
}

fn build<'g>(
    state: &str,
    items: &[CaseItem<'g>],
    default: &Tree,
) -> Result<Tree, GrammarError> {
    // A lone literal becomes a string specialization: the emitter gets one
    // pausable prefix match instead of a chain of byte tests.
    if let [CaseItem::Lit(bytes, action)] = items {
        log::trace!("state {:?}: literal {}", state, hex::encode(bytes));
        let step = lower(state, action, None)?;
        return Ok(Tree::Branch {
            branches: Branches::Str(StrBranch {
                subject: bytes.to_vec(),
                next: Box::new(Tree::Done(step)),
            }),
            default: Box::new(default.clone()),
        });
    }

    // Literals sharing a leading byte nest under one discriminator.
    let mut groups: IndexMap<u8, Vec<(&'g [u8], &'g Action)>> = IndexMap::new();
    for item in items {
        if let CaseItem::Lit(bytes, action) = item {
            groups.entry(bytes[0]).or_default().push((&bytes[1..], *action));
        }
    }

    let mut seen = [false; 256];
    let mut emitted = [false; 256];
    let mut matchers: Vec<CharBranch> = Vec::new();
    for item in items {
        match item {
            CaseItem::Class(interval, action) => {
                for b in interval.bytes() {
                    if seen[b as usize] {
                        return Err(conflict(state, format!("overlapping at 0x{:02X}", b)));
                    }
                    seen[b as usize] = true;
                    matchers.push(CharBranch {
                        byte: b,
                        next: Tree::Done(lower(state, action, Some(b))?),
                    });
                }
            }
            CaseItem::Lit(bytes, _) => {
                let b = bytes[0];
                if emitted[b as usize] {
                    continue;
                }
                emitted[b as usize] = true;
                if seen[b as usize] {
                    return Err(conflict(state, format!("overlapping at 0x{:02X}", b)));
                }
                seen[b as usize] = true;
                matchers.push(CharBranch {
                    byte: b,
                    next: residual(state, &groups[&b], default)?,
                });
            }
        }
    }

    Ok(Tree::Branch {
        branches: Branches::Chars(matchers),
        default: Box::new(default.clone()),
    })
}

fn residual<'g>(
    state: &str,
    residuals: &[(&'g [u8], &'g Action)],
    default: &Tree,
) -> Result<Tree, GrammarError> {
    if let [(bytes, action)] = residuals {
        if bytes.is_empty() {
            // Literal exhausted by the factored prefix.
            return Ok(Tree::Done(lower(state, action, None)?));
        }
        let items = [CaseItem::Lit(bytes, *action)];
        return build(state, &items, default);
    }
    if residuals.iter().any(|(bytes, _)| bytes.is_empty()) {
        return Err(conflict(
            state,
            "one literal is a prefix of another".to_owned(),
        ));
    }
    let items: Vec<CaseItem> = residuals
        .iter()
        .map(|(bytes, action)| CaseItem::Lit(bytes, *action))
        .collect();
    build(state, &items, default)
}

fn lower(state: &str, action: &Action, data: Option<u8>) -> Result<Step, GrammarError> {
    let capture = begins(action);
    let next = match action {
        Action::Select {
            selector,
            arms,
            otherwise,
        } => {
            let mut lowered = Vec::with_capacity(arms.len());
            for (value, arm) in arms {
                lowered.push((*value, chain(state, arm)?));
            }
            Next::Select {
                selector: *selector,
                arms: lowered,
                otherwise: Box::new(chain(state, otherwise)?),
            }
        }
        other => Next::Single(chain(state, other)?),
    };
    Ok(Step {
        capture,
        data,
        next,
    })
}

fn chain(state: &str, action: &Action) -> Result<SAction, GrammarError> {
    Ok(match action {
        Action::Store(capture, prop, next) => {
            SAction::Store(*capture, *prop, Box::new(chain(state, next)?))
        }
        Action::Call(call, next) => SAction::Call(*call, Box::new(chain(state, next)?)),
        Action::Goto(name) => SAction::Goto(name.clone()),
        Action::Error(code) => SAction::Error(*code),
        Action::Select { .. } => {
            return Err(GrammarError::BadSelect {
                state: state.into(),
            });
        }
    })
}

fn begins(action: &Action) -> bool {
    match action {
        Action::Store(Capture::Begin, _, _) => true,
        Action::Store(_, _, next) | Action::Call(_, next) => begins(next),
        Action::Goto(_) | Action::Error(_) => false,
        Action::Select {
            arms, otherwise, ..
        } => arms.iter().any(|(_, a)| begins(a)) || begins(otherwise),
    }
}
