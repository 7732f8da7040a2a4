//! Lobby Domain
//!
//! Sessions, the match registry, and outcome resolution. No I/O happens
//! here: the network layer owns the values and mutates them one event at a
//! time.
//!
//! ## Module Structure
//!
//! - `session`: per-connection state machine, identity, stats, session table
//! - `registry`: bounded match collection and matchmaking operations
//! - `outcome`: winner selection for finished matches

pub mod session;
pub mod registry;
pub mod outcome;

// Re-export key types
pub use session::{
    PlayerStats, Session, SessionError, SessionId, SessionState, SessionTable, Username,
};
pub use registry::{
    JoinError, Match, MatchId, MatchRegistry, MatchResult, MatchStatus, RegistryError, Side,
};
pub use outcome::{OutcomeResolver, RandomResolver};
