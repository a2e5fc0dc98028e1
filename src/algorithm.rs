//! The adOPTed engine: recursive transformation of requests recorded at one
//! state vector into their effective form at another, applying the result
//! to the buffer, and keeping per-user logs in sync.
//!
//! NoOp "I'm still here, I've seen your edits up to here" heartbeats live
//! one layer up, in [`crate::session`] - they never touch `current` or any
//! log, so they don't appear in this module at all.

use std::fmt;
use std::rc::Rc;

use log::trace;

use crate::buffer::Buffer;
use crate::error::{BufferError, RequestError};
use crate::operation::{resolve_concurrency_id, ConcurrencyId, Operation};
use crate::request::{Request, RequestKind};
use crate::state_vector::StateVector;
use crate::user_table::UserTable;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlgorithmError {
    UnknownUser(u32),
    Request(RequestError),
    Buffer(BufferError),
    /// `req.vector` references a count for some user that we haven't
    /// ourselves received yet - the caller must hold the request until its
    /// causal prerequisites have arrived (delivery ordering is the
    /// transport's problem; the algorithm can only translate forward).
    CausalGap,
}

impl fmt::Display for AlgorithmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlgorithmError::UnknownUser(id) => write!(f, "unknown user {id}"),
            AlgorithmError::Request(e) => write!(f, "{e}"),
            AlgorithmError::Buffer(e) => write!(f, "{e}"),
            AlgorithmError::CausalGap => write!(f, "request references a causally unknown vector"),
        }
    }
}

impl std::error::Error for AlgorithmError {}

impl From<RequestError> for AlgorithmError {
    fn from(e: RequestError) -> Self {
        AlgorithmError::Request(e)
    }
}

impl From<BufferError> for AlgorithmError {
    fn from(e: BufferError) -> Self {
        AlgorithmError::Buffer(e)
    }
}

/// The adOPTed core. Owns only the global state vector and the cleanup
/// threshold; it borrows the user table and buffer on every call (the
/// session owns those, the algorithm just borrows them).
pub struct Algorithm {
    current: StateVector,
    max_total_log_size: u32,
}

impl Algorithm {
    pub fn new(max_total_log_size: u32) -> Self {
        Self { current: StateVector::new(), max_total_log_size }
    }

    pub fn current(&self) -> &StateVector {
        &self.current
    }

    /// Register a user's initial vector with the global state, e.g. when
    /// joining mid-session with nonzero history.
    pub fn adopt_vector(&mut self, v: &StateVector) {
        for (u, n) in v.iter() {
            if n > self.current.get(u) {
                self.current.set(u, n).expect("adopt_vector only ever raises a counter");
            }
        }
    }

    /// Receive a request (local or remote) and integrate it. Returns
    /// whether the translated operation actually touched the buffer.
    pub fn receive<B: Buffer>(
        &mut self,
        req: Rc<Request>,
        users: &mut UserTable,
        buffer: &mut B,
    ) -> Result<bool, AlgorithmError> {
        req.validate()?;
        let issuer = req.issuer;
        {
            let user = users.get(issuer).ok_or(AlgorithmError::UnknownUser(issuer))?;
            let expected = user.log().end();
            let is_first = user.log().is_empty() && req.expected_index() == user.log().begin();
            if !is_first && req.expected_index() != expected {
                return Err(RequestError::IndexMismatch { expected, got: req.expected_index() }.into());
            }
            // The issuer's own dimension is allowed to exceed `current`
            // (that's exactly what this receive will fix); any *other*
            // dimension ahead of what we've locally received is a genuine
            // causal gap the caller must resolve before retrying.
            let others_known = req.vector.iter().filter(|&(u, _)| u != issuer).all(|(u, n)| n <= self.current.get(u));
            if !others_known {
                return Err(AlgorithmError::CausalGap);
            }
        }

        let target = self.current.clone();
        let translated = self.translate_request(&req, &target, users)?;
        let applied = translated.affects_buffer();
        let mut translated = translated;
        let removed = if applied {
            let removed = translated.apply(buffer, issuer)?;
            self.current.add(issuer, 1);
            removed
        } else {
            None
        };
        translated.make_reversible(removed);

        let user = users.get_mut(issuer).ok_or(AlgorithmError::UnknownUser(issuer))?;
        let index = req.expected_index();
        user.log_mut().add(req.clone())?;
        // `target` is this entry's real applied-at vector, not necessarily
        // `req.vector` - they diverge whenever this request needed folding
        // against concurrent requests before it could be applied. Undo/Redo
        // resolution (`effective_of_logged`) needs this exact vector to find
        // the cached reversible form below, not the request's own.
        user.log_mut().set_applied_at(index, target.clone());
        user.log_mut().cache(index, target, translated);

        // Merge what the issuer told us (their recorded vector, with their
        // own dimension bumped to their new log length) into our record of
        // their knowledge. Monotonic per dimension, never decreases - this
        // is what `lower_bound`'s componentwise min relies on to stay
        // meaningful across many users.
        let mut learned = req.vector.clone();
        learned.set(issuer, user.log().end()).ok();
        for (u, n) in learned.iter() {
            if n > user.vector().get(u) {
                user.vector_mut().set(u, n).ok();
            }
        }
        // Any Do/Undo/Redo is activity; NoOp heartbeats never reach this
        // function at all (see module docs).
        user.mark_active_from_activity();

        self.maybe_cleanup(users);
        Ok(applied)
    }

    /// `generate_request(user, op)`: build, locally execute and return a Do.
    pub fn generate_request<B: Buffer>(
        &mut self,
        issuer: u32,
        op: Operation,
        users: &mut UserTable,
        buffer: &mut B,
    ) -> Result<(Rc<Request>, bool), AlgorithmError> {
        let req = Rc::new(Request::do_request(issuer, self.current.clone(), op));
        let applied = self.receive(req.clone(), users, buffer)?;
        Ok((req, applied))
    }

    pub fn generate_undo<B: Buffer>(
        &mut self,
        issuer: u32,
        users: &mut UserTable,
        buffer: &mut B,
    ) -> Result<(Rc<Request>, bool), AlgorithmError> {
        {
            let user = users.get(issuer).ok_or(AlgorithmError::UnknownUser(issuer))?;
            if user.log().next_undo_index().is_none() {
                return Err(RequestError::NoAssociatedRequest.into());
            }
        }
        let req = Rc::new(Request::undo_request(issuer, self.current.clone()));
        let applied = self.receive(req.clone(), users, buffer)?;
        Ok((req, applied))
    }

    pub fn generate_redo<B: Buffer>(
        &mut self,
        issuer: u32,
        users: &mut UserTable,
        buffer: &mut B,
    ) -> Result<(Rc<Request>, bool), AlgorithmError> {
        {
            let user = users.get(issuer).ok_or(AlgorithmError::UnknownUser(issuer))?;
            if user.log().next_redo_index().is_none() {
                return Err(RequestError::NoAssociatedRequest.into());
            }
        }
        let req = Rc::new(Request::redo_request(issuer, self.current.clone()));
        let applied = self.receive(req.clone(), users, buffer)?;
        Ok((req, applied))
    }

    /// The per-user minimum across every known vector: nobody will ever
    /// need a translation older than this.
    pub fn lower_bound(&self, users: &UserTable) -> StateVector {
        StateVector::componentwise_min(users.iter().map(|u| u.vector()))
    }

    fn maybe_cleanup(&mut self, users: &mut UserTable) {
        let lower_bound = self.lower_bound(users);
        if self.current.sum().saturating_sub(lower_bound.sum()) >= self.max_total_log_size as u64 {
            self.cleanup(users);
        }
    }

    pub fn cleanup(&mut self, users: &mut UserTable) {
        let lower_bound = self.lower_bound(users);
        trace!("cleanup sweep: lower bound {lower_bound}");
        let ids: Vec<u32> = users.iter().map(|u| u.id()).collect();
        for id in ids {
            if let Some(u) = users.get_mut(id) {
                let before = u.log().len();
                u.log_mut().prune(&lower_bound);
                trace!("user {id} log pruned {before} -> {}", u.log().len());
            }
        }
    }

    /// Translate a not-yet-logged request (typically the argument to
    /// `receive`) from its own recorded vector to `target`.
    fn translate_request(
        &self,
        req: &Request,
        target: &StateVector,
        users: &mut UserTable,
    ) -> Result<Operation, AlgorithmError> {
        if &req.vector == target {
            return self.effective_of_pending(req, users);
        }
        let seed = self.effective_of_pending(req, users)?;
        self.fold_translate(req.issuer, req.vector.clone(), seed, target, users)
    }

    /// Translate the request stored at `(user, index)` to `target`,
    /// consulting and populating that entry's cache.
    fn translate_indexed(
        &self,
        user: u32,
        index: u32,
        target: &StateVector,
        users: &mut UserTable,
    ) -> Result<Operation, AlgorithmError> {
        if let Some(cached) = users.get(user).and_then(|u| u.log().cached(index, target)) {
            return Ok(cached);
        }
        let req = users
            .get(user)
            .and_then(|u| u.log().get(index))
            .ok_or(AlgorithmError::UnknownUser(user))?;
        let result = if &req.vector == target {
            self.effective_of_logged(user, index, users)?
        } else {
            let seed = self.effective_of_logged(user, index, users)?;
            self.fold_translate(user, req.vector.clone(), seed, target, users)?
        };
        if let Some(u) = users.get_mut(user) {
            u.log_mut().cache(index, target.clone(), result.clone());
        }
        Ok(result)
    }

    /// Walk from `cur_vector` to `target` one fold dimension at a time,
    /// transforming `cur_op` past each "crossing" request in turn. The
    /// transformation's diamond property guarantees path independence, so
    /// any choice of dimension order gives the same result.
    fn fold_translate(
        &self,
        issuer: u32,
        mut cur_vector: StateVector,
        mut cur_op: Operation,
        target: &StateVector,
        users: &mut UserTable,
    ) -> Result<Operation, AlgorithmError> {
        while &cur_vector != target {
            let fold_user = pick_fold_user(&cur_vector, target).ok_or(AlgorithmError::CausalGap)?;
            let fold_index = cur_vector.get(fold_user);
            let crossing_op = self.translate_indexed(fold_user, fold_index, &cur_vector, users)?;
            let cid = if cur_op.need_concurrency_id(&crossing_op) {
                let crossing_vector = users
                    .get(fold_user)
                    .and_then(|u| u.log().get(fold_index))
                    .map(|r| r.vector.clone())
                    .unwrap_or_else(|| cur_vector.clone());
                resolve_concurrency_id(&cur_vector, issuer, &crossing_vector, fold_user)
            } else {
                ConcurrencyId::ThisSide
            };
            cur_op = cur_op.transform(&crossing_op, cid);
            cur_vector.add(fold_user, 1);
        }
        Ok(cur_op)
    }

    /// A logged Do's own op, or an Undo/Redo's effective op derived from
    /// its *stored* association (fixed when it was appended).
    fn effective_of_logged(&self, user: u32, index: u32, users: &mut UserTable) -> Result<Operation, AlgorithmError> {
        let req = users
            .get(user)
            .and_then(|u| u.log().get(index))
            .ok_or(AlgorithmError::UnknownUser(user))?;
        match req.kind {
            RequestKind::Do => Ok(req.op.clone().expect("validated at add time")),
            RequestKind::Undo | RequestKind::Redo => {
                let assoc = users
                    .get(user)
                    .and_then(|u| u.log().prev_associated(index))
                    .ok_or(RequestError::NoAssociatedRequest)?;
                // Resolve the associated entry at the vector it was actually
                // applied at, not this Undo/Redo's (later) one - that vector's
                // issuer dimension sits one past the associated entry, so
                // using it as the fold target would fold the entry across its
                // own just-applied effect (transforming it against itself)
                // instead of against only the concurrent edits since then.
                // `applied_at` is also where the entry's reversible (chunk
                // promoted) form is cached, so this resolves straight to a
                // cache hit instead of recomputing a non-reversible op.
                let assoc_vector = users
                    .get(user)
                    .and_then(|u| u.log().applied_at(assoc))
                    .ok_or(RequestError::NoAssociatedRequest)?;
                let at_s = self.translate_indexed(user, assoc, &assoc_vector, users)?;
                let inverted = at_s.revert().ok_or(RequestError::NoAssociatedRequest)?;
                // The inverse is anchored at `assoc_vector`, but this entry
                // (the Undo/Redo itself) was recorded at `req.vector`, which
                // is generally later - any request *another* user made that
                // reached this site only after the Do was applied still needs
                // folding in here. `user`'s own dimension must NOT be part of
                // that fold though: an Undo's own vector is always exactly
                // one past its associated Do's in that one dimension (nothing
                // else of this user's own could have happened in between), so
                // crossing it would fold the inverse against the very Do it
                // came from. Pin it to `assoc_vector`'s value and only let
                // other users' dimensions advance to `req.vector`'s. Built by
                // starting from `assoc_vector` (so `user`'s own dimension
                // stays put) and raising every other dimension to
                // `req.vector`'s value - never a decrease, since vectors only
                // grow over time at a single site.
                let mut fold_target = assoc_vector.clone();
                for (u, n) in req.vector.iter() {
                    if u != user {
                        fold_target.set(u, n).ok();
                    }
                }
                if assoc_vector == fold_target {
                    Ok(inverted)
                } else {
                    self.fold_translate(user, assoc_vector, inverted, &fold_target, users)
                }
            }
        }
    }

    /// Same, but for a request that hasn't been appended to its log yet -
    /// association is derived live from the log's current tail, which (since
    /// a single issuer's own requests are always processed in order) is
    /// exactly what it was when the issuer originally created this request.
    fn effective_of_pending(&self, req: &Request, users: &mut UserTable) -> Result<Operation, AlgorithmError> {
        match req.kind {
            RequestKind::Do => Ok(req.op.clone().ok_or(RequestError::MissingOperation)?),
            RequestKind::Undo | RequestKind::Redo => {
                let log_user = req.issuer;
                let assoc = {
                    let user = users.get(log_user).ok_or(AlgorithmError::UnknownUser(log_user))?;
                    match req.kind {
                        RequestKind::Undo => user.log().next_undo_index(),
                        RequestKind::Redo => user.log().next_redo_index(),
                        RequestKind::Do => unreachable!(),
                    }
                };
                let assoc = assoc.ok_or(RequestError::NoAssociatedRequest)?;
                // Same reasoning as `effective_of_logged`: resolve against
                // the associated entry's applied-at vector, not this pending
                // request's (later) one.
                let assoc_vector = users
                    .get(log_user)
                    .and_then(|u| u.log().applied_at(assoc))
                    .ok_or(RequestError::NoAssociatedRequest)?;
                let at_s = self.translate_indexed(log_user, assoc, &assoc_vector, users)?;
                let inverted = at_s.revert().ok_or(RequestError::NoAssociatedRequest)?;
                // Same reasoning as `effective_of_logged`: fold in other
                // users' requests that reached the associated Do only after
                // it was applied, but pin `log_user`'s own dimension to
                // `assoc_vector` - this Undo/Redo's own vector is always
                // exactly one past the Do's in that dimension, and crossing
                // it would fold the inverse against the Do it came from.
                // Built the same way as `effective_of_logged`: start from
                // `assoc_vector`, raise every other dimension to
                // `req.vector`'s value.
                let mut fold_target = assoc_vector.clone();
                for (u, n) in req.vector.iter() {
                    if u != log_user {
                        fold_target.set(u, n).ok();
                    }
                }
                if assoc_vector == fold_target {
                    Ok(inverted)
                } else {
                    self.fold_translate(log_user, assoc_vector, inverted, &fold_target, users)
                }
            }
        }
    }
}

fn pick_fold_user(s: &StateVector, target: &StateVector) -> Option<u32> {
    let mut candidates: Vec<u32> = s.iter().map(|(u, _)| u).chain(target.iter().map(|(u, _)| u)).collect();
    candidates.sort_unstable();
    candidates.dedup();
    candidates.into_iter().find(|&u| s.get(u) < target.get(u))
}
