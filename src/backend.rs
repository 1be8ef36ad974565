//! The back-end facing model.
//!
//! Emitters consume a [`Machine`] plus the tables built here: an
//! insertion-ordered bitmap interner (equal intervals share one emitted
//! table, and emitted identifiers embed the insertion index, so ordering
//! must be reproducible across runs) and per-node labels.

use crate::inst::{Check, Consumer, Instruction};
use crate::interval::Interval;
use crate::machine::Machine;
use indexmap::IndexMap;

/// An insertion-ordered interning table from canonical [`Interval`]s to
/// bitmap indices.
#[derive(Debug, Default)]
pub struct BitmapTab {
    tab: IndexMap<Interval, ()>,
}

impl BitmapTab {
    /// Creates a new, empty table.
    pub fn new() -> Self {
        Self {
            tab: IndexMap::new(),
        }
    }

    /// Inserts the interval if it is new and returns its bitmap index.
    pub fn intern(&mut self, interval: &Interval) -> usize {
        match self.tab.get_index_of(interval) {
            Some(ix) => ix,
            None => {
                let ix = self.tab.len();
                self.tab.insert(interval.clone(), ());
                ix
            }
        }
    }

    /// Looks up an interval's bitmap index without inserting.
    pub fn get(&self, interval: &Interval) -> Option<usize> {
        self.tab.get_index_of(interval)
    }

    /// Number of distinct bitmaps.
    pub fn len(&self) -> usize {
        self.tab.len()
    }

    /// Returns `true` when no interval has been interned.
    pub fn is_empty(&self) -> bool {
        self.tab.is_empty()
    }

    /// Iterates `(index, interval)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Interval)> {
        self.tab.keys().enumerate()
    }
}

/// Collects every bitmap-tested interval of the machine, in node order and
/// pre-order within a node, so bitmap numbering is deterministic.
pub fn collect_bitmaps(machine: &Machine) -> BitmapTab {
    let mut tab = BitmapTab::new();
    for node in &machine.nodes {
        node.body.visit(&mut |inst| {
            if let Instruction::Consumer(consumer) = inst {
                match consumer {
                    Consumer::Map { interval, .. } => {
                        tab.intern(interval);
                    }
                    Consumer::Mixed { arms, .. } => {
                        for (check, _) in arms {
                            if let Check::Map(interval) = check {
                                tab.intern(interval);
                            }
                        }
                    }
                    _ => {}
                }
            }
        });
    }
    log::debug!("interned {} bitmap(s)", tab.len());
    tab
}

/// The label an emitter uses for the node at `ix`.
pub fn state_label(ix: usize) -> String {
    format!("state_{}", ix)
}
