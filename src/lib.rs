//! Copyright (c) 2005–2025 IKH Software, Inc.
//!
//! Released under the terms of the GNU Lesser General Public License, version 3.0
//! or (at your option) any later version (LGPL-3.0-or-later).
//!
//! Wire-protocol parser generator core.
//!
//! `wiregen` lowers a declarative grammar over raw bytes — named states,
//! byte patterns, span captures, host callbacks — into an efficient
//! incremental parser: a flat, indexed machine of instruction nodes plus
//! the tables a code emitter needs. The pipeline runs leaves first:
//!
//! * [`interval`] — canonical byte-set algebra and bitmap materialization
//! * [`specialize`] — per-state case solving into a decision tree that
//!   factors common prefixes and inlines single-byte discriminators
//! * [`translate`] — tree walking into a linear instruction stream with
//!   named entry points and resolved jumps
//! * [`backend`] — the model emitters consume: interned bitmap tables,
//!   state labels, storage descriptors
//!
//! The surface grammar DSL and production back-ends live outside this
//! crate; [`emit`] holds the reference Rust emitter.
//!
//! # Crates.io
//! Published at [crates.io/crates/wiregen](https://crates.io/crates/wiregen).

pub mod backend;
pub mod emit;
pub mod error;
pub mod grammar;
pub mod inst;
pub mod interval;
pub mod machine;
pub mod specialize;
pub mod translate;

pub use crate::error::GrammarError;
pub use crate::grammar::{
    Action, Base, Call, CallbackDecl, Capture, Grammar, Node, Pattern, Prop, Selector, Storage, Typ,
};
pub use crate::interval::{Interval, Range};
pub use crate::machine::{Inst, Machine};
pub use crate::translate::translate;
