//! A timestamped Do/Undo/Redo issued by one participant.
//!
//! Requests are the unit of history: every participant's [`crate::request_log::RequestLog`]
//! is a sequence of these, and the algorithm's recursive translation walks
//! them by index.

use std::fmt;

use crate::error::RequestError;
use crate::operation::Operation;
use crate::state_vector::StateVector;

/// What kind of history entry a [`Request`] represents. Only `Do` carries its
/// own operation; `Undo`/`Redo` are resolved against a prior `Do` in the same
/// log at the time they're translated (see `RequestLog::prev_associated`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RequestKind {
    Do,
    Undo,
    Redo,
}

/// A Do/Undo/Redo timestamped by the issuer's state vector at the moment it
/// was created. `vector` records what the issuer believed `current` to be;
/// by the time this request is received elsewhere it will usually need
/// translating forward (see `algorithm::Algorithm::translate`).
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Request {
    pub kind: RequestKind,
    pub issuer: u32,
    pub vector: StateVector,
    pub op: Option<Operation>,
}

impl Request {
    pub fn do_request(issuer: u32, vector: StateVector, op: Operation) -> Self {
        Self { kind: RequestKind::Do, issuer, vector, op: Some(op) }
    }

    pub fn undo_request(issuer: u32, vector: StateVector) -> Self {
        Self { kind: RequestKind::Undo, issuer, vector, op: None }
    }

    pub fn redo_request(issuer: u32, vector: StateVector) -> Self {
        Self { kind: RequestKind::Redo, issuer, vector, op: None }
    }

    /// The index this request expects to occupy in its issuer's log
    /// (`vector[issuer]` doubles as the log position).
    pub fn expected_index(&self) -> u32 {
        self.vector.get(self.issuer)
    }

    pub fn validate(&self) -> Result<(), RequestError> {
        match self.kind {
            RequestKind::Do if self.op.is_none() => Err(RequestError::MissingOperation),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}#{} by {}", self.kind, self.expected_index(), self.issuer)
    }
}
