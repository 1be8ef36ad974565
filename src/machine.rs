//! The machine: the translator's output model.
//!
//! A [`Machine`] is a flat, indexed list of instruction nodes plus the
//! grammar's storage declaration and a name-to-index mapper for the named
//! states. It is built once by [`crate::translate`] and read-only
//! thereafter; back-ends walk it to render code.

use crate::grammar::Storage;
use crate::inst::Instruction;
use indexmap::IndexMap;
use smartstring::alias::String;

/// One machine node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inst {
    /// `true` iff the body is a consumer (the node gates on input).
    pub is_check: bool,
    /// The node's entry instruction.
    pub body: Instruction,
}

/// The emitted intermediate form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Machine {
    /// The grammar's storage declaration, passed through unchanged.
    pub storage: Storage,
    /// Node name per index; anonymous nodes get a generated `stateN` label.
    pub names: Vec<String>,
    /// The instruction nodes, indexed by `goto` targets.
    pub nodes: Vec<Inst>,
    /// Name-to-index lookup for named states, in source order.
    pub mapper: IndexMap<String, usize>,
}

impl Machine {
    pub(crate) fn new(storage: Storage) -> Self {
        Self {
            storage,
            names: Vec::new(),
            nodes: Vec::new(),
            mapper: IndexMap::new(),
        }
    }

    /// The index of a named state, if the grammar declares it.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.mapper.get(name).copied()
    }

    /// Appends a placeholder node and returns its index. Named states keep
    /// their grammar name; anonymous nodes get a generated label.
    pub(crate) fn add_node(&mut self, name: Option<&str>) -> usize {
        let ix = self.nodes.len();
        let name: String = match name {
            Some(n) => n.into(),
            None => format!("state{}", ix).into(),
        };
        log::trace!("node {} allocated as {:?}", ix, name);
        self.names.push(name);
        self.nodes.push(Inst {
            is_check: false,
            body: Instruction::Error(0),
        });
        ix
    }

    /// Writes a node body, deriving its `is_check` flag.
    pub(crate) fn set_node(&mut self, ix: usize, body: Instruction) {
        let is_check = body.is_consumer();
        self.nodes[ix] = Inst { is_check, body };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::Storage;
    use crate::inst::{Consumer, Instruction};

    #[test]
    fn placeholder_nodes_and_names() {
        let mut m = Machine::new(Storage::default());
        let a = m.add_node(Some("start"));
        let b = m.add_node(None);
        assert_eq!((a, b), (0, 1));
        assert_eq!(m.names[0], "start");
        assert_eq!(m.names[1], "state1");
        assert_eq!(m.nodes[0].body, Instruction::Error(0));
        assert!(!m.nodes[0].is_check);
    }

    #[test]
    fn set_node_derives_is_check() {
        let mut m = Machine::new(Storage::default());
        let ix = m.add_node(Some("start"));
        m.set_node(
            ix,
            Instruction::Consumer(Consumer::Consume {
                prop: 0,
                ok: Box::new(Instruction::Goto(0)),
            }),
        );
        assert!(m.nodes[ix].is_check);
        m.set_node(ix, Instruction::Goto(0));
        assert!(!m.nodes[ix].is_check);
    }

    #[test]
    fn mapper_lookup() {
        let mut m = Machine::new(Storage::default());
        let ix = m.add_node(Some("loop"));
        m.mapper.insert("loop".into(), ix);
        assert_eq!(m.index_of("loop"), Some(0));
        assert_eq!(m.index_of("nope"), None);
    }
}
