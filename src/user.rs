//! A session participant: identity, presence status, and the bookkeeping
//! (state vector + request log) the algorithm needs to talk to them.
//!
//! The presence machine cycles through Unavailable/Inactive/Active: joining
//! lands a user in `Active`; `Active` and `Inactive` toggle freely; leaving
//! is a one-way trip back to `Unavailable`.

use crate::error::UserError;
use crate::request_log::RequestLog;
use crate::state_vector::StateVector;

/// Golden-ratio conjugate: repeatedly adding it mod 1 gives a low-discrepancy
/// sequence, so hues assigned in join order stay visually well-spread no
/// matter how many users join.
const HUE_STEP: f64 = 0.618_033_988_749_895;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum UserStatus {
    Unavailable,
    Inactive,
    Active,
}

pub struct User {
    id: u32,
    name: String,
    status: UserStatus,
    local: bool,
    vector: StateVector,
    log: RequestLog,
    caret: u32,
    selection: i32,
    hue: f64,
}

impl User {
    /// `join_order` is the 0-based order in which this user joined the
    /// table; it deterministically seeds `hue` so two sites that learn of
    /// the same users in the same order assign them the same color.
    pub fn new(id: u32, name: impl Into<String>, local: bool, initial_vector: StateVector, join_order: u32) -> Self {
        let begin = initial_vector.get(id);
        let hue = (join_order as f64 * HUE_STEP).fract();
        Self {
            id,
            name: name.into(),
            status: UserStatus::Active,
            local,
            log: RequestLog::new(id, begin),
            vector: initial_vector,
            caret: 0,
            selection: 0,
            hue,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> UserStatus {
        self.status
    }

    pub fn is_local(&self) -> bool {
        self.local
    }

    pub fn vector(&self) -> &StateVector {
        &self.vector
    }

    pub fn vector_mut(&mut self) -> &mut StateVector {
        &mut self.vector
    }

    pub fn log(&self) -> &RequestLog {
        &self.log
    }

    pub fn log_mut(&mut self) -> &mut RequestLog {
        &mut self.log
    }

    pub fn hue(&self) -> f64 {
        self.hue
    }

    /// Overrides the join-order-derived hue with one learned from a peer
    /// during synchronization (the `sync-user` message's `hue` field), so
    /// every site displays the same color for the same user.
    pub fn hue_override(&mut self, hue: f64) {
        self.hue = hue;
    }

    pub fn caret(&self) -> u32 {
        self.caret
    }

    pub fn selection(&self) -> i32 {
        self.selection
    }

    pub fn set_caret(&mut self, caret: u32, selection: i32) {
        self.caret = caret;
        self.selection = selection;
    }

    /// Any non-NoOp Do/Undo/Redo implicitly wakes an Inactive user back up
    /// A no-op on an already-Active user.
    pub fn mark_active_from_activity(&mut self) {
        if self.status == UserStatus::Inactive {
            self.status = UserStatus::Active;
        }
    }

    /// Active -> Inactive. Must be explicit (unlike the activity-triggered
    /// reverse direction) and is broadcast by the session.
    pub fn go_inactive(&mut self) -> Result<(), UserError> {
        if self.status != UserStatus::Active {
            return Err(UserError::StatusPrecondition);
        }
        self.status = UserStatus::Inactive;
        Ok(())
    }

    /// Active or Inactive -> Unavailable. Terminal: a `User` that has left
    /// is never reused, a rejoin constructs a fresh one.
    pub fn go_unavailable(&mut self) -> Result<(), UserError> {
        if self.status == UserStatus::Unavailable {
            return Err(UserError::StatusPrecondition);
        }
        self.status = UserStatus::Unavailable;
        Ok(())
    }
}
