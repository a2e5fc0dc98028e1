//! Domain-tagged error taxonomy. Plain enums with hand-written `Display` impls
//! rather than pulling in `thiserror`.

use std::fmt;

/// Errors raised while parsing or mutating a [`crate::state_vector::StateVector`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateVectorError {
    /// The string form didn't match the `uid:count(;uid:count)*` grammar.
    ParseError,
    /// A `set` would have decreased a counter. Counters are monotonic.
    MonotonicityViolation,
}

impl fmt::Display for StateVectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateVectorError::ParseError => write!(f, "malformed state vector string"),
            StateVectorError::MonotonicityViolation => {
                write!(f, "state vector counter would decrease")
            }
        }
    }
}

impl std::error::Error for StateVectorError {}

/// Errors raised by [`crate::request::Request`] / [`crate::request_log::RequestLog`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestError {
    /// `req.vector[issuer] != log.end()` when appending (and this isn't the first request).
    IndexMismatch { expected: u32, got: u32 },
    /// An Undo/Redo was requested but the user's log has nothing left to undo/redo.
    NoAssociatedRequest,
    /// A Do request carried no operation.
    MissingOperation,
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestError::IndexMismatch { expected, got } => {
                write!(f, "request index mismatch: expected {expected}, got {got}")
            }
            RequestError::NoAssociatedRequest => {
                write!(f, "no associated request to undo/redo")
            }
            RequestError::MissingOperation => write!(f, "Do request is missing its operation"),
        }
    }
}

impl std::error::Error for RequestError {}

/// Errors raised by [`crate::session::Session`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    NoSuchUser(u32),
    MissingStateVector,
    InvalidRequest(String),
    SyncAborted,
    UnexpectedMessage,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::NoSuchUser(id) => write!(f, "no such user: {id}"),
            SessionError::MissingStateVector => write!(f, "message is missing a state vector"),
            SessionError::InvalidRequest(reason) => write!(f, "invalid request: {reason}"),
            SessionError::SyncAborted => write!(f, "synchronization was aborted"),
            SessionError::UnexpectedMessage => write!(f, "message not valid in current state"),
        }
    }
}

impl std::error::Error for SessionError {}

/// Errors raised by [`crate::buffer::Buffer`] implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferError {
    OutOfRange { pos: usize, len: usize },
    EncodingError,
}

impl fmt::Display for BufferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferError::OutOfRange { pos, len } => {
                write!(f, "range [{pos}, {}) is out of bounds", pos + len)
            }
            BufferError::EncodingError => write!(f, "text is not valid for the buffer's encoding"),
        }
    }
}

impl std::error::Error for BufferError {}

/// Errors raised by [`crate::user::User`] / [`crate::user_table::UserTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserError {
    DuplicateId(u32),
    StatusPrecondition,
}

impl fmt::Display for UserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserError::DuplicateId(id) => write!(f, "user id {id} is already in use"),
            UserError::StatusPrecondition => {
                write!(f, "user status transition precondition not met")
            }
        }
    }
}

impl std::error::Error for UserError {}
