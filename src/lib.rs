//! `adopted` — the adOPTed operational-transformation engine and the session
//! protocol that wraps it.
//!
//! Leaves first: [`state_vector`] and [`chunk`] have no internal
//! dependencies; [`operation`] and [`buffer`] build on those; [`request`]
//! and [`request_log`] build on `operation`; [`algorithm`] is the engine
//! that ties logs, operations and the buffer together; [`session`] wraps
//! the algorithm with the wire protocol; [`user`] / [`user_table`] are the
//! identity registry the algorithm and session both consult.

pub mod algorithm;
pub mod buffer;
pub mod chunk;
pub mod error;
pub mod operation;
pub mod request;
pub mod request_log;
pub mod session;
pub mod state_vector;
pub mod user;
pub mod user_table;

pub use algorithm::{Algorithm, AlgorithmError};
pub use buffer::{Buffer, TextBuffer};
pub use chunk::{Chunk, Segment};
pub use operation::{ConcurrencyId, Operation};
pub use request::{Request, RequestKind};
pub use request_log::RequestLog;
pub use session::{Session, SessionConfig, WireMessage, WireOp};
pub use state_vector::StateVector;
pub use user::{User, UserStatus};
pub use user_table::{UserEvent, UserTable};
