use smartstring::alias::String;
use thiserror::Error;

/// Errors surfaced while translating a grammar.
///
/// All of these are raised synchronously by [`crate::translate`]; a failed
/// translation discards any partial machine. Runtime error codes carried by
/// `error(n)` instructions are a separate, author-defined namespace and are
/// never reported through this enum.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GrammarError {
    /// Two cases at the same state accept an overlapping byte or prefix.
    #[error("conflicting cases in state {state:?}: {details}")]
    Conflict {
        /// The state whose cases collide.
        state: String,
        /// Human-readable description of the collision.
        details: String,
    },

    /// A `goto` names a state the grammar does not define.
    #[error("unknown state {0:?}")]
    UnknownState(String),

    /// A span property is closed but never opened anywhere in the grammar.
    #[error("span property {prop} is closed in state {state:?} but never opened")]
    BadCapture {
        /// The first state that closes the span.
        state: String,
        /// The span property index.
        prop: usize,
    },

    /// A literal pattern with no bytes, an empty byte set, or an inverted range.
    #[error("empty pattern in state {state:?}")]
    EmptyPattern {
        /// The state holding the offending case.
        state: String,
    },

    /// Two grammar states share a name.
    #[error("duplicate state name {0:?}")]
    DuplicateState(String),

    /// A property index outside the storage declaration.
    #[error("state {state:?} references property {prop} (storage declares {len})")]
    InvalidProp {
        /// The referencing state.
        state: String,
        /// The out-of-range property index.
        prop: usize,
        /// The number of declared properties.
        len: usize,
    },

    /// A property used with an operation its type does not support.
    #[error("property {prop} in state {state:?} is not a {expected} slot")]
    PropType {
        /// The referencing state.
        state: String,
        /// The property index.
        prop: usize,
        /// The slot kind the operation requires.
        expected: &'static str,
    },

    /// A callback index outside the storage declaration.
    #[error("callback index {call} out of range (storage declares {len})")]
    InvalidCallback {
        /// The out-of-range callback index.
        call: usize,
        /// The number of declared callbacks.
        len: usize,
    },

    /// A span property is closed but no span callback is declared for it.
    #[error("no span callback declared for property {prop} closed in state {state:?}")]
    MissingSpanCallback {
        /// The first state that closes the span.
        state: String,
        /// The span property index.
        prop: usize,
    },

    /// `select` used below a store or call in an action chain.
    #[error("select must be the outermost action of a case in state {state:?}")]
    BadSelect {
        /// The state holding the offending case.
        state: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn _assert_error_trait_obj(e: &dyn std::error::Error) -> &dyn std::error::Error {
        e
    }

    #[test]
    fn display_mentions_state() {
        let err = GrammarError::Conflict {
            state: "start".into(),
            details: "overlapping at 0x41".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("start"));
        assert!(msg.contains("0x41"));
        let _ = _assert_error_trait_obj(&err);
    }

    #[test]
    fn unknown_state_displays_name() {
        let err = GrammarError::UnknownState("nowhere".into());
        assert!(err.to_string().contains("nowhere"));
    }

    // Compile-time trait bounds sanity check.
    fn _assert_send_sync_static<T: Send + Sync + 'static>() {}
    #[test]
    fn error_is_send_sync_static() {
        _assert_send_sync_static::<GrammarError>();
    }
}
