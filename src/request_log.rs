//! Per-participant append-only request history.
//!
//! A log is indexed `[begin, end)`; `begin` is fixed at join time from the
//! user's initial state-vector component, `end` grows by one on every
//! `add`. Requests are shared (`Rc`) between the log and the algorithm's
//! transformation cache, since both need to reference the same entry.

use std::collections::HashMap;
use std::rc::Rc;

use crate::error::RequestError;
use crate::operation::Operation;
use crate::request::{Request, RequestKind};
use crate::state_vector::StateVector;

struct Entry {
    request: Rc<Request>,
    /// For Undo/Redo: the log index of the Do (or prior Undo) it pairs with.
    /// `None` for Do requests.
    associated: Option<u32>,
    /// The vector this entry was actually translated to and applied at
    /// (i.e. the receiver's `current` at receive time). Equal to
    /// `request.vector` when no folding was needed; strictly ahead of it
    /// whenever concurrent requests were folded in first - this, not
    /// `request.vector`, is the cache key holding the entry's reversible
    /// executed form.
    applied_at: StateVector,
    /// Cache of already-translated forms of this request, keyed by the
    /// target vector they were translated to.
    cache: HashMap<StateVector, Operation>,
}

/// One user's history of Do/Undo/Redo requests. NoOp requests are never
/// logged: they carry no payload worth undoing and exist purely to advance
/// a peer's knowledge of the issuer's vector.
pub struct RequestLog {
    user: u32,
    begin: u32,
    entries: Vec<Entry>,
}

impl RequestLog {
    pub fn new(user: u32, begin: u32) -> Self {
        Self { user, begin, entries: Vec::new() }
    }

    pub fn user(&self) -> u32 {
        self.user
    }

    pub fn begin(&self) -> u32 {
        self.begin
    }

    pub fn end(&self) -> u32 {
        self.begin + self.entries.len() as u32
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn local_index(&self, global: u32) -> Option<usize> {
        if global < self.begin {
            return None;
        }
        let i = (global - self.begin) as usize;
        if i < self.entries.len() {
            Some(i)
        } else {
            None
        }
    }

    pub fn get(&self, index: u32) -> Option<Rc<Request>> {
        self.local_index(index).map(|i| self.entries[i].request.clone())
    }

    /// Append `req` to the log. `req.vector[issuer]` must equal `end()`,
    /// except for the very first request in a log that started with a
    /// nonzero `begin` (it defines `begin` itself, so it's exempt too).
    pub fn add(&mut self, req: Rc<Request>) -> Result<(), RequestError> {
        req.validate()?;
        let expected = self.end();
        if !(self.entries.is_empty() && req.expected_index() == self.begin) && req.expected_index() != expected {
            return Err(RequestError::IndexMismatch { expected, got: req.expected_index() });
        }
        let associated = match req.kind {
            RequestKind::Do => None,
            RequestKind::Undo => self.next_undo_index(),
            RequestKind::Redo => self.next_redo_index(),
        };
        if matches!(req.kind, RequestKind::Undo | RequestKind::Redo) && associated.is_none() {
            return Err(RequestError::NoAssociatedRequest);
        }
        let applied_at = req.vector.clone();
        self.entries.push(Entry { request: req, associated, applied_at, cache: HashMap::new() });
        Ok(())
    }

    /// Record the vector this entry was actually translated to and applied
    /// at. Called by the algorithm right after `add`, once it knows the
    /// real receive-time target; defaults to the request's own vector
    /// (correct for the no-folding case) until then.
    pub fn set_applied_at(&mut self, index: u32, vector: StateVector) {
        if let Some(i) = self.local_index(index) {
            self.entries[i].applied_at = vector;
        }
    }

    pub fn applied_at(&self, index: u32) -> Option<StateVector> {
        self.local_index(index).map(|i| self.entries[i].applied_at.clone())
    }

    /// For an Undo/Redo at `index`, the entry it effectively reverts/reapplies.
    pub fn prev_associated(&self, index: u32) -> Option<u32> {
        self.local_index(index).and_then(|i| self.entries[i].associated)
    }

    fn rightmost_live(&self, is_opener: impl Fn(RequestKind) -> bool, is_closer: impl Fn(RequestKind) -> bool) -> Option<usize> {
        let mut skip = 0u32;
        for i in (0..self.entries.len()).rev() {
            let kind = self.entries[i].request.kind;
            if is_closer(kind) {
                skip += 1;
            } else if is_opener(kind) {
                if skip > 0 {
                    skip -= 1;
                } else {
                    return Some(i);
                }
            }
        }
        None
    }

    pub(crate) fn next_undo_index(&self) -> Option<u32> {
        self.rightmost_live(|k| matches!(k, RequestKind::Do | RequestKind::Redo), |k| matches!(k, RequestKind::Undo))
            .map(|i| self.begin + i as u32)
    }

    pub(crate) fn next_redo_index(&self) -> Option<u32> {
        self.rightmost_live(|k| matches!(k, RequestKind::Undo), |k| matches!(k, RequestKind::Redo))
            .map(|i| self.begin + i as u32)
    }

    /// The request an Undo issued right now would target.
    pub fn next_undo(&self) -> Result<Rc<Request>, RequestError> {
        self.next_undo_index().and_then(|i| self.get(i)).ok_or(RequestError::NoAssociatedRequest)
    }

    /// The request a Redo issued right now would target.
    pub fn next_redo(&self) -> Result<Rc<Request>, RequestError> {
        self.next_redo_index().and_then(|i| self.get(i)).ok_or(RequestError::NoAssociatedRequest)
    }

    /// Requests at or beyond `since` (the caller's last-known index):
    /// the upper-bound set this user has no successor for yet, from the
    /// caller's point of view.
    pub fn unconfirmed(&self, since: u32) -> Vec<Rc<Request>> {
        let start = self.local_index(since).unwrap_or(0);
        self.entries[start..].iter().map(|e| e.request.clone()).collect()
    }

    pub fn cached(&self, index: u32, target: &StateVector) -> Option<Operation> {
        self.local_index(index).and_then(|i| self.entries[i].cache.get(target).cloned())
    }

    pub fn cache(&mut self, index: u32, target: StateVector, op: Operation) {
        if let Some(i) = self.local_index(index) {
            self.entries[i].cache.insert(target, op);
        }
    }

    /// Drop log entries and cache entries no longer reachable below
    /// `lower_bound`. Never drops an entry still reachable from a pending
    /// Undo/Redo chain.
    pub fn prune(&mut self, lower_bound: &StateVector) {
        let keep_from = self
            .entries
            .iter()
            .filter_map(|e| e.associated)
            .map(|assoc| assoc.saturating_sub(self.begin))
            .min()
            .unwrap_or(u32::MAX) as usize;
        let bound = lower_bound.get(self.user).saturating_sub(self.begin) as usize;
        let drop = keep_from.min(bound);
        if drop > 0 {
            self.entries.drain(0..drop);
            self.begin += drop as u32;
        }
        for entry in &mut self.entries {
            // `applied_at` (not `request.vector` - they only coincide when
            // no folding was needed at receive time) is where
            // `make_reversible` parks the promoted (chunk-filled-in) form of
            // a Delete. It's the only copy of that payload anywhere, so it
            // survives pruning as long as the entry itself does, independent
            // of the lower bound.
            let applied_at = entry.applied_at.clone();
            entry
                .cache
                .retain(|target, _| *target == applied_at || !target.causally_before(lower_bound));
        }
    }
}
