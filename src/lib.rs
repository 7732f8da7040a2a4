//! # Duel Lobby Server
//!
//! Matchmaking lobby for two-player games over a compact binary TCP protocol.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      DUEL LOBBY SERVER                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/            - Deterministic primitives                 │
//! │  └── rng.rs       - Seeded Xorshift128+ PRNG                 │
//! │                                                              │
//! │  lobby/           - Lobby rules (no I/O)                     │
//! │  ├── session.rs   - Session state machine and table          │
//! │  ├── registry.rs  - Bounded match registry                   │
//! │  └── outcome.rs   - Winner selection                         │
//! │                                                              │
//! │  network/         - Sockets and bytes                        │
//! │  ├── protocol.rs  - Frame codec                              │
//! │  ├── auth.rs      - Credential store                         │
//! │  ├── dispatcher.rs- Frame -> lobby operation routing         │
//! │  ├── server.rs    - TCP connection multiplexer               │
//! │  └── client.rs    - Client-side frame I/O                    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Concurrency
//!
//! One task owns the session table and match registry. Socket reads and
//! writes happen in per-connection tasks, but every frame is dispatched by
//! the owning task, one at a time, to completion. Lobby types therefore need
//! no locks.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod lobby;
pub mod network;

// Re-export commonly used types
pub use crate::core::rng::DeterministicRng;
pub use lobby::{MatchId, MatchRegistry, SessionId, SessionState, SessionTable, Side, Username};
pub use network::{CredentialStore, LobbyClient, LobbyServer, ServerConfig};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default TCP port
pub const DEFAULT_PORT: u16 = 55555;
