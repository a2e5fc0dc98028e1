//! Wire protocol and lifecycle around the algorithm.
//!
//! `Session` is the thing that actually owns `Algorithm`, `UserTable` and
//! `Buffer`. Everything it exposes either turns a local action into a
//! [`WireMessage`] to broadcast, or turns a received [`WireMessage`] into
//! calls against the algorithm.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use log::{debug, trace};

use crate::algorithm::{Algorithm, AlgorithmError};
use crate::buffer::Buffer;
use crate::chunk::{Chunk, Segment};
use crate::error::SessionError;
use crate::operation::Operation;
use crate::request::{Request, RequestKind};
use crate::state_vector::StateVector;
use crate::user::{User, UserStatus};
use crate::user_table::UserTable;

pub const DEFAULT_MAX_TOTAL_LOG_SIZE: u32 = 2048;
pub const DEFAULT_NOOP_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub max_total_log_size: u32,
    pub noop_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { max_total_log_size: DEFAULT_MAX_TOTAL_LOG_SIZE, noop_interval: DEFAULT_NOOP_INTERVAL }
    }
}

/// The operation payload of a wire `request`/`sync-request` element.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum WireOp {
    Insert { pos: usize, segments: Vec<(u32, String)> },
    /// `chunk` is `Some` for the reversible (payload-known) form, `None`
    /// for the bare `len` form.
    Delete { pos: usize, len: usize, chunk: Option<Vec<(u32, String)>> },
    Undo,
    Redo,
}

impl WireOp {
    fn from_request(req: &Request) -> Self {
        match req.kind {
            RequestKind::Undo => WireOp::Undo,
            RequestKind::Redo => WireOp::Redo,
            RequestKind::Do => match req.op.as_ref().expect("Do always carries an op") {
                Operation::Insert(op) => WireOp::Insert {
                    pos: op.pos,
                    segments: op.chunk.segments().map(|s| (s.author, s.text.clone())).collect(),
                },
                Operation::Delete(op) => WireOp::Delete {
                    pos: op.pos,
                    len: op.len,
                    chunk: op.chunk.as_ref().map(|c| c.segments().map(|s| (s.author, s.text.clone())).collect()),
                },
                Operation::Composite(_) | Operation::NoOp => {
                    // A freshly-authored local Do is never a Composite (that
                    // shape only appears as a *transformed* result) and
                    // never a no-op NoOp (those are session-level heartbeats,
                    // see algorithm.rs's module docs).
                    unreachable!("local Do requests are always Insert or Delete")
                }
            },
        }
    }

    fn into_request(self, issuer: u32, vector: StateVector) -> Request {
        match self {
            WireOp::Undo => Request::undo_request(issuer, vector),
            WireOp::Redo => Request::redo_request(issuer, vector),
            WireOp::Insert { pos, segments } => {
                let mut chunk = Chunk::new();
                for (author, text) in segments {
                    chunk.push_segment(Segment::new(author, text));
                }
                Request::do_request(issuer, vector, Operation::insert(pos, chunk))
            }
            WireOp::Delete { pos, len, chunk } => {
                let op = match chunk {
                    Some(segments) => {
                        let mut c = Chunk::new();
                        for (author, text) in segments {
                            c.push_segment(Segment::new(author, text));
                        }
                        crate::operation::DeleteOp::with_chunk(pos, c)
                    }
                    None => crate::operation::DeleteOp::new(pos, len),
                };
                Request::do_request(issuer, vector, Operation::Delete(op))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum WireMessage {
    Request { user: u32, time: String, op: WireOp },
    SyncBegin { num_messages: u32 },
    SyncUser { id: u32, name: String, time: String, hue: f64, caret: Option<u32>, selection: Option<i32> },
    SyncRequest { user: u32, time: String, op: WireOp },
    SyncEnd,
    UserStatusChange { id: u32, status: UserStatus },
    NoOp { user: u32, time: String },
    RequestFailed { domain: String, code: String, correlation: Option<u32> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Open,
    Syncing,
    Closed,
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Wraps `Algorithm` + `UserTable` + `Buffer`; mediates every interaction
/// with the outside world.
pub struct Session<B: Buffer> {
    algorithm: Algorithm,
    users: UserTable,
    buffer: B,
    state: Lifecycle,
    /// Per local user: the full vector this user's last broadcast was
    /// diffed against, used both to encode the next diff and to know when
    /// the noop timer should be armed.
    last_send_vector: HashMap<u32, StateVector>,
    noop_due: HashMap<u32, Instant>,
    noop_interval: Duration,
}

impl<B: Buffer> Session<B> {
    pub fn new(local_id: u32, local_name: impl Into<String>, buffer: B, config: SessionConfig) -> Self {
        let mut users = UserTable::new();
        let order = users.next_join_order();
        users.insert(User::new(local_id, local_name, true, StateVector::new(), order))
            .expect("fresh table has no existing user");
        Self {
            algorithm: Algorithm::new(config.max_total_log_size),
            users,
            buffer,
            state: Lifecycle::Open,
            last_send_vector: HashMap::new(),
            noop_due: HashMap::new(),
            noop_interval: config.noop_interval,
        }
    }

    pub fn algorithm(&self) -> &Algorithm {
        &self.algorithm
    }

    pub fn users(&self) -> &UserTable {
        &self.users
    }

    pub fn buffer(&self) -> &B {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut B {
        &mut self.buffer
    }

    pub fn is_closed(&self) -> bool {
        self.state == Lifecycle::Closed
    }

    /// Register a new participant joining an already-open session. The
    /// transport/directory layer (external to this crate) decides *when* a
    /// new user has joined and under what id/name; this is the hook it
    /// calls to make the session aware of them.
    pub fn add_user(&mut self, id: u32, name: impl Into<String>, local: bool) -> Result<(), SessionError> {
        let order = self.users.next_join_order();
        let name = name.into();
        debug!("user {id} ({name}) joining, local={local}");
        self.users
            .insert(User::new(id, name, local, StateVector::new(), order))
            .map_err(|e| SessionError::InvalidRequest(e.to_string()))
    }

    /// Cancel the noop timer, detach listeners, drop algorithm state.
    /// Idempotent.
    pub fn close(&mut self) {
        debug!("session closing, {} users known", self.users.len());
        self.noop_due.clear();
        self.state = Lifecycle::Closed;
    }

    fn require_open(&self) -> Result<(), SessionError> {
        if self.state == Lifecycle::Closed {
            return Err(SessionError::UnexpectedMessage);
        }
        Ok(())
    }

    // -- local actions -----------------------------------------------------

    pub fn do_local(&mut self, user: u32, op: Operation) -> Result<WireMessage, SessionError> {
        self.require_open()?;
        let (req, _) = self
            .algorithm
            .generate_request(user, op, &mut self.users, &mut self.buffer)
            .map_err(alg_err)?;
        Ok(self.broadcast(&req))
    }

    pub fn undo_local(&mut self, user: u32) -> Result<WireMessage, SessionError> {
        self.require_open()?;
        let (req, _) =
            self.algorithm.generate_undo(user, &mut self.users, &mut self.buffer).map_err(alg_err)?;
        Ok(self.broadcast(&req))
    }

    pub fn redo_local(&mut self, user: u32) -> Result<WireMessage, SessionError> {
        self.require_open()?;
        let (req, _) =
            self.algorithm.generate_redo(user, &mut self.users, &mut self.buffer).map_err(alg_err)?;
        Ok(self.broadcast(&req))
    }

    /// Serialize `req` to a wire message diffed against this issuer's
    /// last-send-vector, then advance that vector.
    fn broadcast(&mut self, req: &Request) -> WireMessage {
        let base = self.last_send_vector.entry(req.issuer).or_insert_with(StateVector::new);
        let time = req.vector.to_string_diff(base);
        let message = WireMessage::Request { user: req.issuer, time, op: WireOp::from_request(req) };

        // `current` already reflects this request's effect (receive() runs
        // to completion before generate_request/undo/redo return it to us).
        self.last_send_vector.insert(req.issuer, self.algorithm.current().clone());
        self.noop_due.remove(&req.issuer);
        message
    }

    /// Active -> Inactive must be explicit and broadcast.
    pub fn go_inactive(&mut self, user: u32) -> Result<WireMessage, SessionError> {
        self.users.get_mut(user).ok_or(SessionError::NoSuchUser(user))?.go_inactive().map_err(|_| {
            SessionError::InvalidRequest("user is not Active".into())
        })?;
        debug!("user {user} going inactive");
        Ok(WireMessage::UserStatusChange { id: user, status: UserStatus::Inactive })
    }

    // -- receiving -----------------------------------------------------

    pub fn receive(&mut self, message: WireMessage) -> Result<(), SessionError> {
        self.require_open()?;
        match message {
            WireMessage::Request { user, time, op } => {
                // Mirror `broadcast`: the sender diffs against *its own*
                // last-sent vector for this issuer, so the receiver must
                // decode against its record of that same issuer's vector,
                // not its own global `current` - those disagree as soon as
                // the receiver has applied a concurrent op the sender
                // hadn't seen yet.
                let base = self.users.get(user).ok_or(SessionError::NoSuchUser(user))?.vector().clone();
                let vector = StateVector::from_string_diff(&time, &base)
                    .map_err(|_| SessionError::InvalidRequest("bad time diff".into()))?;
                let req = std::rc::Rc::new(op.into_request(user, vector));
                self.algorithm.receive(req, &mut self.users, &mut self.buffer).map_err(alg_err)?;
                Ok(())
            }
            WireMessage::NoOp { user, time } => {
                let base = self.users.get(user).ok_or(SessionError::NoSuchUser(user))?.vector().clone();
                let vector = StateVector::from_string_diff(&time, &base)
                    .map_err(|_| SessionError::InvalidRequest("bad time diff".into()))?;
                self.algorithm.adopt_vector(&vector);
                // Keep our record of this user's last-broadcast vector in
                // step with what they just reported, the same way
                // `Algorithm::receive` does for Do/Undo/Redo - otherwise
                // the *next* diff from this user (Request or NoOp) would
                // be decoded against a stale base.
                let u = self.users.get_mut(user).ok_or(SessionError::NoSuchUser(user))?;
                for (uid, n) in vector.iter() {
                    if n > u.vector().get(uid) {
                        u.vector_mut().set(uid, n).ok();
                    }
                }
                Ok(())
            }
            WireMessage::UserStatusChange { id, status } => {
                debug!("user {id} -> {status:?}");
                let u = self.users.get_mut(id).ok_or(SessionError::NoSuchUser(id))?;
                let result = match status {
                    UserStatus::Inactive => u.go_inactive(),
                    UserStatus::Unavailable => u.go_unavailable(),
                    UserStatus::Active => {
                        u.mark_active_from_activity();
                        Ok(())
                    }
                };
                result.map_err(|_| SessionError::InvalidRequest("bad status transition".into()))
            }
            WireMessage::RequestFailed { domain, code, .. } => {
                Err(SessionError::InvalidRequest(format!("{domain}/{code}")))
            }
            WireMessage::SyncBegin { .. }
            | WireMessage::SyncUser { .. }
            | WireMessage::SyncRequest { .. }
            | WireMessage::SyncEnd => Err(SessionError::UnexpectedMessage),
        }
    }

    // -- synchronizing a joining peer ---------------------------------

    /// Build the full sync stream for a joining peer. A real transport
    /// would pace these out one at a time; we hand back the whole ordered
    /// batch since this crate has no network layer of its own.
    pub fn sync_stream(&self) -> Vec<WireMessage> {
        let mut users: Vec<&User> = self.users.iter().collect();
        users.sort_by_key(|u| u.id());
        let total: usize = 2 + users.iter().map(|u| 1 + u.log().len()).sum::<usize>();
        debug!("sync begin: {total} messages across {} users", users.len());
        let mut out = Vec::with_capacity(total);
        out.push(WireMessage::SyncBegin { num_messages: total as u32 });
        for user in &users {
            out.push(WireMessage::SyncUser {
                id: user.id(),
                name: user.name().to_string(),
                time: user.vector().to_string(),
                hue: user.hue(),
                caret: Some(user.caret()),
                selection: Some(user.selection()),
            });
            for i in user.log().begin()..user.log().end() {
                let req = user.log().get(i).expect("within [begin,end)");
                out.push(WireMessage::SyncRequest {
                    user: req.issuer,
                    time: req.vector.to_string(),
                    op: WireOp::from_request(&req),
                });
            }
        }
        out.push(WireMessage::SyncEnd);
        debug!("sync end");
        out
    }

    /// Consume a sync stream to materialize a brand-new session. Fails
    /// with `SyncAborted` on a malformed/truncated stream.
    pub fn from_sync_stream(
        local_id: u32,
        local_name: impl Into<String>,
        buffer: B,
        config: SessionConfig,
        stream: impl IntoIterator<Item = WireMessage>,
    ) -> Result<Self, SessionError> {
        let mut iter = stream.into_iter();
        match iter.next() {
            Some(WireMessage::SyncBegin { num_messages }) => {
                debug!("sync begin: consuming {num_messages} messages as {local_id}");
            }
            _ => return Err(SessionError::SyncAborted),
        }

        let mut session = Session::new(local_id, local_name, buffer, config);
        // The constructor above already seeded a local user at vector {};
        // the synced users are an entirely separate population (a fresh
        // joiner is usually not itself part of the stream it's consuming),
        // so park it aside and start fresh.
        // It's reinserted below unless the stream turns out to mention
        // `local_id` itself (a rejoin), in which case the synced entry wins.
        let local_user = session.users.remove(local_id).expect("just inserted by Session::new");
        session.users = UserTable::new();

        loop {
            match iter.next().ok_or(SessionError::SyncAborted)? {
                WireMessage::SyncUser { id, name, time, hue, caret, selection } => {
                    let vector = StateVector::from_string(&time).map_err(|_| SessionError::SyncAborted)?;
                    // Log replay below starts each user's log at index 0 and
                    // rebuilds it request by request, so the user must start
                    // with an empty log, not one that already claims to span
                    // the whole synced history. `vector` (the issuer's own
                    // snapshot at sync time) is folded in separately so a
                    // user with no requests of their own still carries the
                    // knowledge they reported.
                    let order = session.users.next_join_order();
                    let mut user = User::new(id, name, id == local_id, StateVector::new(), order);
                    for (u, n) in vector.iter() {
                        if n > user.vector().get(u) {
                            user.vector_mut().set(u, n).ok();
                        }
                    }
                    if let (Some(caret), Some(selection)) = (caret, selection) {
                        user.set_caret(caret, selection);
                    }
                    user.hue_override(hue);
                    session.users.insert(user).map_err(|_| SessionError::SyncAborted)?;
                }
                WireMessage::SyncRequest { user, time, op } => {
                    let vector = StateVector::from_string(&time).map_err(|_| SessionError::SyncAborted)?;
                    let req = std::rc::Rc::new(op.into_request(user, vector));
                    // Replay through the algorithm rather than appending
                    // straight to the log: this translates each request to
                    // the joiner's own `current` and applies it, so the
                    // buffer ends up with the same content as every other
                    // session, not just an empty one with a populated log.
                    session.algorithm.receive(req, &mut session.users, &mut session.buffer).map_err(|_| SessionError::SyncAborted)?;
                }
                WireMessage::SyncEnd => {
                    debug!("sync end: {} users materialized", session.users.len());
                    break;
                }
                _ => return Err(SessionError::SyncAborted),
            }
        }
        if session.users.get(local_id).is_none() {
            session.users.insert(local_user).expect("table was just checked to lack local_id");
        }
        Ok(session)
    }

    // -- noop timer -----------------------------------------------------

    /// Call after every broadcast/receive tick: arms the timer for any
    /// local user whose last-sent vector now lags the algorithm's current
    /// state.
    pub fn refresh_noop_schedule(&mut self, now: Instant) {
        for user in self.users.local() {
            let sent = self.last_send_vector.entry(user.id()).or_insert_with(StateVector::new);
            if sent.causally_before(self.algorithm.current()) && *sent != *self.algorithm.current() {
                if !self.noop_due.contains_key(&user.id()) {
                    trace!("noop timer armed for user {}", user.id());
                }
                self.noop_due.entry(user.id()).or_insert(now + self.noop_interval);
            } else {
                self.noop_due.remove(&user.id());
            }
        }
    }

    /// The earliest pending noop deadline across all local users: one
    /// shared timer fires for whichever local user is due earliest.
    pub fn next_noop_deadline(&self) -> Option<Instant> {
        self.noop_due.values().copied().min()
    }

    /// Build NoOp broadcasts for every local user whose deadline has
    /// elapsed by `now`.
    pub fn due_noops(&mut self, now: Instant) -> Vec<WireMessage> {
        let due: Vec<u32> = self.noop_due.iter().filter(|(_, &t)| t <= now).map(|(&id, _)| id).collect();
        let mut out = Vec::with_capacity(due.len());
        for id in due {
            if self.users.get(id).is_none() {
                continue;
            }
            trace!("noop due for user {id}, broadcasting");
            let vector = self.algorithm.current().clone();
            let base = self.last_send_vector.entry(id).or_insert_with(StateVector::new);
            let time = vector.to_string_diff(base);
            self.last_send_vector.insert(id, vector);
            self.noop_due.remove(&id);
            out.push(WireMessage::NoOp { user: id, time });
        }
        out
    }
}

fn alg_err(e: AlgorithmError) -> SessionError {
    match e {
        AlgorithmError::UnknownUser(id) => SessionError::NoSuchUser(id),
        AlgorithmError::Request(req) => SessionError::InvalidRequest(req.to_string()),
        AlgorithmError::Buffer(buf) => SessionError::InvalidRequest(buf.to_string()),
        AlgorithmError::CausalGap => SessionError::InvalidRequest("causal gap".into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::TextBuffer;

    #[test]
    fn local_insert_broadcasts_and_applies() {
        let mut session = Session::new(1, "alice", TextBuffer::new(), SessionConfig::default());
        let msg = session.do_local(1, Operation::insert(0, Chunk::single(1, "hi"))).unwrap();
        assert_eq!(session.buffer().to_text(), "hi");
        assert!(matches!(msg, WireMessage::Request { user: 1, .. }));
    }

    #[test]
    fn sync_stream_round_trips_into_new_session() {
        let mut a = Session::new(1, "alice", TextBuffer::new(), SessionConfig::default());
        a.do_local(1, Operation::insert(0, Chunk::single(1, "He"))).unwrap();
        a.do_local(1, Operation::insert(2, Chunk::single(1, "llo"))).unwrap();

        let stream = a.sync_stream();
        let c = Session::from_sync_stream(3, "carol", TextBuffer::new(), SessionConfig::default(), stream).unwrap();
        assert_eq!(c.users().get(1).unwrap().log().len(), 2);
        assert_eq!(c.algorithm().current().get(1), 2);

        // The joiner's own identity must survive even though it was never
        // part of the synced stream.
        let carol = c.users().get(3).unwrap();
        assert!(carol.is_local());
        assert_eq!(carol.name(), "carol");
    }

    #[test]
    fn add_user_registers_new_participant() {
        let mut session = Session::new(1, "alice", TextBuffer::new(), SessionConfig::default());
        session.add_user(2, "bob", false).unwrap();
        assert!(session.users().get(2).is_some());
        let err = session.add_user(2, "bob-again", false).unwrap_err();
        assert!(matches!(err, SessionError::InvalidRequest(_)));
    }

    #[test]
    fn noop_schedule_arms_when_sender_lags() {
        let mut session = Session::new(1, "alice", TextBuffer::new(), SessionConfig::default());
        session.do_local(1, Operation::insert(0, Chunk::single(1, "hi"))).unwrap();
        // Manually regress the last-send-vector to simulate a peer that's
        // moved on without A rebroadcasting.
        session.last_send_vector.insert(1, StateVector::new());
        let now = Instant::now();
        session.refresh_noop_schedule(now);
        assert!(session.next_noop_deadline().is_some());
    }

    #[test]
    fn explicit_inactive_transition_broadcasts() {
        let mut session = Session::new(1, "alice", TextBuffer::new(), SessionConfig::default());
        let msg = session.go_inactive(1).unwrap();
        assert_eq!(msg, WireMessage::UserStatusChange { id: 1, status: UserStatus::Inactive });
    }
}
