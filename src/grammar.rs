//! The grammar model accepted by the translator.
//!
//! A [`Grammar`] arrives as a validated value from a front-end; this module
//! only defines its shape plus small constructors so grammars read compactly
//! at call sites and in tests. A grammar is a [`Storage`] declaration (the
//! persistent parser state: properties and host callbacks) and an ordered
//! list of named states, each carrying `(pattern, action)` cases over raw
//! bytes.

use smartstring::alias::String;

/// Index of a property slot inside [`Storage::props`].
pub type PropIx = usize;

/// Index of a callback inside [`Storage::callbacks`].
pub type CallIx = usize;

/// Type of a storage property slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Typ {
    U8,
    Char,
    U16,
    U32,
    U64,
    /// A `(start, end)` position pair; closing it fires a span callback.
    Span,
}

impl Typ {
    /// Returns `true` for span slots.
    pub fn is_span(self) -> bool {
        matches!(self, Typ::Span)
    }

    /// Width of the numeric slot in bytes; 0 for spans.
    pub fn width(self) -> usize {
        match self {
            Typ::U8 | Typ::Char => 1,
            Typ::U16 => 2,
            Typ::U32 => 4,
            Typ::U64 => 8,
            Typ::Span => 0,
        }
    }

    /// The Rust type an emitter uses for the slot. Character slots are raw
    /// bytes; span slots hold a start position.
    pub fn rust_type(self) -> &'static str {
        match self {
            Typ::U8 | Typ::Char => "u8",
            Typ::U16 => "u16",
            Typ::U32 => "u32",
            Typ::U64 => "u64",
            Typ::Span => "usize",
        }
    }
}

/// A named, typed storage slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prop {
    pub name: String,
    pub typ: Typ,
}

/// A host callback declaration.
///
/// Plain callbacks receive the listed property values and return a status
/// code (zero for success). Span callbacks receive `(start, end, buffer)`
/// for the span property listed as their single argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackDecl {
    pub name: String,
    pub args: Vec<PropIx>,
    pub is_span: bool,
}

/// The grammar's declaration of persistent parser state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Storage {
    pub props: Vec<Prop>,
    pub callbacks: Vec<CallbackDecl>,
}

impl Storage {
    /// Declares a property slot and returns its index.
    pub fn prop(&mut self, name: &str, typ: Typ) -> PropIx {
        let ix = self.props.len();
        self.props.push(Prop {
            name: name.into(),
            typ,
        });
        ix
    }

    /// Declares a plain callback and returns its index.
    pub fn callback(&mut self, name: &str, args: &[PropIx]) -> CallIx {
        let ix = self.callbacks.len();
        self.callbacks.push(CallbackDecl {
            name: name.into(),
            args: args.to_vec(),
            is_span: false,
        });
        ix
    }

    /// Declares the span callback fired when `prop` is closed.
    pub fn span_callback(&mut self, name: &str, prop: PropIx) -> CallIx {
        let ix = self.callbacks.len();
        self.callbacks.push(CallbackDecl {
            name: name.into(),
            args: vec![prop],
            is_span: true,
        });
        ix
    }

    /// Finds the span callback declared for `prop`, if any.
    pub fn span_callback_for(&self, prop: PropIx) -> Option<(CallIx, &CallbackDecl)> {
        self.callbacks
            .iter()
            .enumerate()
            .find(|(_, cb)| cb.is_span && cb.args.first() == Some(&prop))
    }
}

/// Radix of a digit-accumulating [`Call::MulAdd`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Base {
    Octal,
    Decimal,
    Hex,
}

impl Base {
    /// The numeric radix.
    pub fn radix(self) -> u64 {
        match self {
            Base::Octal => 8,
            Base::Decimal => 10,
            Base::Hex => 16,
        }
    }
}

/// A computation performed by a `call` action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Call {
    /// Invoke the host callback at the given index.
    Arbitrary(CallIx),
    /// `prop = prop * radix + digit(current byte)`.
    MulAdd { base: Base, prop: PropIx },
    /// Load the current byte's decimal digit value into `prop`.
    LoadNum(PropIx),
    /// Invoke a host callback and store its return value into `prop`.
    CallStore { prop: PropIx, call: CallIx },
    /// Store an immediate value into `prop`.
    Store { prop: PropIx, value: u64 },
}

/// What a `store` action captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capture {
    /// The byte under the cursor (or a statically known byte).
    Data,
    /// The current position, as the start of a span.
    Begin,
    /// The current position, as the end of a span; fires its callback.
    Close,
}

/// The value a `select` action dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Selector {
    /// The result of a call.
    Call(Call),
    /// The current value of a numeric property.
    Method(PropIx),
}

/// The action performed when a case matches.
///
/// Actions form chains ending in `goto` or `error`; `select` branches on a
/// host-provided value and must be the outermost action of its case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Store(Capture, PropIx, Box<Action>),
    Call(Call, Box<Action>),
    Goto(String),
    Error(u64),
    Select {
        selector: Selector,
        arms: Vec<(u64, Action)>,
        otherwise: Box<Action>,
    },
}

impl Action {
    /// Jump to the named state.
    pub fn goto(name: &str) -> Self {
        Action::Goto(name.into())
    }

    /// Terminate with the given error code.
    pub fn error(code: u64) -> Self {
        Action::Error(code)
    }

    /// Capture into `prop`, then continue with `next`.
    pub fn store(capture: Capture, prop: PropIx, next: Action) -> Self {
        Action::Store(capture, prop, Box::new(next))
    }

    /// Perform `call`, then continue with `next`.
    pub fn call(call: Call, next: Action) -> Self {
        Action::Call(call, Box::new(next))
    }
}

/// The input pattern of a case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    /// A single byte.
    Byte(u8),
    /// A closed byte range.
    Range(u8, u8),
    /// An arbitrary byte set.
    Set(Vec<u8>),
    /// A literal byte string.
    Literal(Vec<u8>),
    /// Swallow `data[prop]` bytes, then act. Behaves as a default arm.
    Consume(PropIx),
    /// Any remaining byte.
    Otherwise,
}

impl Pattern {
    /// A literal pattern over the bytes of `s`.
    pub fn literal(s: &str) -> Self {
        Pattern::Literal(s.as_bytes().to_vec())
    }
}

/// A named grammar state with its ordered list of cases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub name: String,
    pub cases: Vec<(Pattern, Action)>,
}

impl Node {
    /// A state with no cases yet.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            cases: Vec::new(),
        }
    }

    /// Appends a case, builder style.
    pub fn case(mut self, pattern: Pattern, action: Action) -> Self {
        self.cases.push((pattern, action));
        self
    }
}

/// The complete input to the translator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grammar {
    pub storage: Storage,
    pub nodes: Vec<Node>,
}
