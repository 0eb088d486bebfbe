//! Error types for the streaming mutation pipe.
//!
//! This module defines all error types that can occur while discovering the
//! cross-reference chain, scanning objects, and writing the updated document.

/// Result type alias for pipe operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur during a mutation pass.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The cross-reference chain is unreadable: missing `startxref`, an
    /// unresolvable `/Prev`, a malformed trailer, or an inconsistent
    /// generation. Fatal to the pass.
    #[error("corrupt cross-reference data: {0}")]
    CorruptXref(String),

    /// A single object could not be read (unterminated dictionary or stream,
    /// undecryptable stream, filter failure). The parser drops the object
    /// construct and continues; only the object is lost.
    #[error("corrupt object {id}: {reason}")]
    CorruptObject {
        /// Object number of the broken object
        id: u32,
        /// Reason the object could not be read
        reason: String,
    },

    /// A feature the document requires is not supported (unknown filter,
    /// unsupported encryption scheme). The pass fails before any output is
    /// written.
    #[error("unsupported feature: {0}")]
    Unsupported(String),

    /// A mutation callback returned failure. The output stream is left in
    /// whatever state it had and must be treated as invalid.
    #[error("mutation callback aborted the pass")]
    CallerAbort,

    /// An internal invariant was violated (duplicate xref slot, attempt to
    /// rewrite behind the output cursor). Fatal.
    #[error("internal assertion failed: {0}")]
    InternalAssert(String),

    /// Referenced object not found in any cross-reference table
    #[error("object not found: {0} {1} R")]
    ObjectNotFound(u32, u16),

    /// A value had the wrong type for the requested operation
    #[error("invalid type: expected {expected}, found {found}")]
    InvalidType {
        /// Expected value type
        expected: &'static str,
        /// Actual value type found
        found: &'static str,
    },

    /// Stream decoding error
    #[error("stream decoding error: {0}")]
    Decode(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
