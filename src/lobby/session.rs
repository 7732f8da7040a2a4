//! Player Sessions
//!
//! One [`Session`] per accepted connection: its protocol state, the identity
//! it authenticated as, and the stats it has accumulated. The
//! [`SessionTable`] owns every live session and the identity index that keeps
//! one session per username.

use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;

use chrono::{DateTime, Utc};

use crate::lobby::registry::MatchId;
use crate::network::protocol::CREDENTIAL_FIELD_WIDTH;

/// Score every player starts a connection with.
pub const STARTING_SCORE: i32 = 1000;

/// Score gained by the winner and lost by the loser of a match.
pub const SCORE_DELTA: i32 = 10;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Connection handle. Allocated monotonically and never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

/// Authenticated player name: 1 to 16 bytes of UTF-8, no control characters.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Username(String);

impl Username {
    /// Validate a name against the wire field width. Control characters
    /// such as NUL or newline would break the line-oriented match listing.
    pub fn new(name: &str) -> Option<Self> {
        let valid = !name.is_empty()
            && name.len() <= CREDENTIAL_FIELD_WIDTH
            && !name.chars().any(char::is_control);
        valid.then(|| Self(name.to_owned()))
    }

    /// Name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// SESSION STATE
// =============================================================================

/// Protocol state of a session. Lobby and match states carry the match they refer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connected, not yet logged in.
    Unauthenticated,
    /// Logged in, not hosting or playing.
    Idle,
    /// Hosting a match that awaits an opponent.
    InLobby(MatchId),
    /// Playing a match.
    InMatch(MatchId),
}

impl SessionState {
    /// Short state name for logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Unauthenticated => "Unauthenticated",
            SessionState::Idle => "Idle",
            SessionState::InLobby(_) => "InLobby",
            SessionState::InMatch(_) => "InMatch",
        }
    }

    /// Match this state refers to, if any.
    pub fn match_id(&self) -> Option<MatchId> {
        match self {
            SessionState::InLobby(id) | SessionState::InMatch(id) => Some(*id),
            SessionState::Unauthenticated | SessionState::Idle => None,
        }
    }
}

/// Per-connection player record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerStats {
    /// Matches won.
    pub wins: u32,
    /// Matches lost.
    pub losses: u32,
    /// Matches finished.
    pub matches_played: u32,
    /// Rating, moves by [`SCORE_DELTA`] per match.
    pub score: i32,
}

impl Default for PlayerStats {
    fn default() -> Self {
        Self {
            wins: 0,
            losses: 0,
            matches_played: 0,
            score: STARTING_SCORE,
        }
    }
}

impl PlayerStats {
    /// Apply a win.
    pub fn record_win(&mut self) {
        self.wins += 1;
        self.matches_played += 1;
        self.score += SCORE_DELTA;
    }

    /// Apply a loss.
    pub fn record_loss(&mut self) {
        self.losses += 1;
        self.matches_played += 1;
        self.score -= SCORE_DELTA;
    }
}

/// Session errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// The requested transition is not legal from the current state.
    #[error("cannot {action} while {from}")]
    InvalidTransition {
        /// State the session was in.
        from: &'static str,
        /// Transition that was attempted.
        action: &'static str,
    },

    /// Connection limit reached.
    #[error("session table full ({capacity} sessions)")]
    TableFull {
        /// Configured maximum.
        capacity: usize,
    },

    /// No live session with this id.
    #[error("unknown {0}")]
    UnknownSession(SessionId),

    /// Another live session already authenticated as this user.
    #[error("{0} is already logged in")]
    IdentityInUse(Username),
}

// =============================================================================
// SESSION
// =============================================================================

/// Server-side state of one client connection.
#[derive(Debug, Clone)]
pub struct Session {
    id: SessionId,
    peer: SocketAddr,
    state: SessionState,
    identity: Option<Username>,
    stats: PlayerStats,
    connected_at: DateTime<Utc>,
}

impl Session {
    /// Create an unauthenticated session.
    pub fn new(id: SessionId, peer: SocketAddr) -> Self {
        Self {
            id,
            peer,
            state: SessionState::Unauthenticated,
            identity: None,
            stats: PlayerStats::default(),
            connected_at: Utc::now(),
        }
    }

    /// Connection handle.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Remote address.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Current protocol state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Authenticated identity, once logged in.
    pub fn identity(&self) -> Option<&Username> {
        self.identity.as_ref()
    }

    /// Accumulated stats.
    pub fn stats(&self) -> &PlayerStats {
        &self.stats
    }

    /// When the connection was accepted.
    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    fn transition(&self, action: &'static str) -> SessionError {
        SessionError::InvalidTransition {
            from: self.state.name(),
            action,
        }
    }

    /// Unauthenticated -> Idle, binding the identity.
    fn authenticate(&mut self, username: Username) -> Result<(), SessionError> {
        if self.state != SessionState::Unauthenticated {
            return Err(self.transition("authenticate"));
        }
        self.identity = Some(username);
        self.state = SessionState::Idle;
        Ok(())
    }

    /// Idle -> InLobby, hosting `match_id`.
    pub fn host(&mut self, match_id: MatchId) -> Result<(), SessionError> {
        if self.state != SessionState::Idle {
            return Err(self.transition("host a match"));
        }
        self.state = SessionState::InLobby(match_id);
        Ok(())
    }

    /// Idle (joining) or InLobby for the same match (host being joined) -> InMatch.
    pub fn enter_match(&mut self, match_id: MatchId) -> Result<(), SessionError> {
        match self.state {
            SessionState::Idle => {}
            SessionState::InLobby(hosted) if hosted == match_id => {}
            _ => return Err(self.transition("enter a match")),
        }
        self.state = SessionState::InMatch(match_id);
        Ok(())
    }

    /// InLobby -> Idle after withdrawing the hosted match.
    pub fn leave_lobby(&mut self) -> Result<MatchId, SessionError> {
        match self.state {
            SessionState::InLobby(id) => {
                self.state = SessionState::Idle;
                Ok(id)
            }
            _ => Err(self.transition("leave the lobby")),
        }
    }

    /// InMatch -> Idle, recording the result.
    pub fn finish_match(&mut self, won: bool) -> Result<MatchId, SessionError> {
        let SessionState::InMatch(id) = self.state else {
            return Err(self.transition("finish a match"));
        };
        if won {
            self.stats.record_win();
        } else {
            self.stats.record_loss();
        }
        self.state = SessionState::Idle;
        Ok(id)
    }
}

// =============================================================================
// SESSION TABLE
// =============================================================================

/// All live sessions, bounded by the connection limit.
#[derive(Debug)]
pub struct SessionTable {
    sessions: BTreeMap<SessionId, Session>,
    identities: BTreeMap<Username, SessionId>,
    capacity: usize,
    next_id: u64,
}

impl SessionTable {
    /// Create an empty table holding at most `capacity` sessions.
    pub fn new(capacity: usize) -> Self {
        Self {
            sessions: BTreeMap::new(),
            identities: BTreeMap::new(),
            capacity,
            next_id: 1,
        }
    }

    /// Register a new unauthenticated session for `peer`.
    pub fn open(&mut self, peer: SocketAddr) -> Result<SessionId, SessionError> {
        if self.is_full() {
            return Err(SessionError::TableFull {
                capacity: self.capacity,
            });
        }
        let id = SessionId(self.next_id);
        self.next_id += 1;
        self.sessions.insert(id, Session::new(id, peer));
        Ok(id)
    }

    /// Remove a session and release its identity.
    pub fn close(&mut self, id: SessionId) -> Option<Session> {
        let session = self.sessions.remove(&id)?;
        if let Some(name) = session.identity() {
            self.identities.remove(name);
        }
        Some(session)
    }

    /// Authenticate `id` as `username`, enforcing one live session per identity.
    pub fn bind_identity(&mut self, id: SessionId, username: Username) -> Result<(), SessionError> {
        if self.identities.contains_key(&username) {
            return Err(SessionError::IdentityInUse(username));
        }
        let session = self
            .sessions
            .get_mut(&id)
            .ok_or(SessionError::UnknownSession(id))?;
        session.authenticate(username.clone())?;
        self.identities.insert(username, id);
        Ok(())
    }

    /// Session currently authenticated as `username`.
    pub fn session_of(&self, username: &Username) -> Option<SessionId> {
        self.identities.get(username).copied()
    }

    /// Look up a session.
    pub fn get(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    /// Look up a session mutably.
    pub fn get_mut(&mut self, id: SessionId) -> Option<&mut Session> {
        self.sessions.get_mut(&id)
    }

    /// Ids of all live sessions, ascending.
    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.keys().copied().collect()
    }

    /// Iterate live sessions in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    /// Live session count.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session is live.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Whether the connection limit is reached.
    pub fn is_full(&self) -> bool {
        self.sessions.len() >= self.capacity
    }
}
