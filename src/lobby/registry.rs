//! Match Registry
//!
//! Bounded set of matches keyed by a monotonically assigned [`MatchId`].
//! Ids come from a counter and live in a sparse map, so deleting a match
//! never renumbers the others and a stale id fails with `NotFound` instead of
//! naming some unrelated match.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::lobby::session::Username;

/// Default number of matches the registry holds at once.
pub const DEFAULT_CAPACITY: usize = 5;

/// Stable match identifier. Travels as a big-endian u32.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MatchId(u32);

impl MatchId {
    /// Wrap a raw id.
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw id value.
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for MatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStatus {
    /// Hosted, no guest yet.
    AwaitingOpponent,
    /// Host and guest both playing.
    Active,
    /// Decided; only seen on the record handed back by [`MatchRegistry::resolve`].
    Finished,
}

/// One side of a two-player match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// The player who created the match.
    Host,
    /// The player who joined it.
    Guest,
}

impl Side {
    /// The other side.
    pub fn opponent(self) -> Self {
        match self {
            Side::Host => Side::Guest,
            Side::Guest => Side::Host,
        }
    }
}

/// A lobby entry or active contest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    /// Stable identifier.
    pub id: MatchId,
    /// Creator.
    pub host: Username,
    /// Joiner, absent until someone joins.
    pub guest: Option<Username>,
    /// Current status.
    pub status: MatchStatus,
    /// When the host created it.
    pub created_at: DateTime<Utc>,
}

impl Match {
    /// Player on the given side, if seated.
    pub fn player(&self, side: Side) -> Option<&Username> {
        match side {
            Side::Host => Some(&self.host),
            Side::Guest => self.guest.as_ref(),
        }
    }

    /// Which side `name` plays on, if any.
    pub fn side_of(&self, name: &Username) -> Option<Side> {
        if &self.host == name {
            Some(Side::Host)
        } else if self.guest.as_ref() == Some(name) {
            Some(Side::Guest)
        } else {
            None
        }
    }
}

/// A match that has been decided and removed from the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    /// The removed record, status [`MatchStatus::Finished`].
    pub record: Match,
    /// Winning player.
    pub winner: Username,
    /// Losing player.
    pub loser: Username,
}

/// Failure to create a match.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Capacity reached.
    #[error("registry full ({capacity} matches)")]
    Full {
        /// Configured capacity.
        capacity: usize,
    },

    /// The id counter wrapped.
    #[error("match ids exhausted")]
    IdsExhausted,
}

/// Failure to join, resolve, or abandon a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum JoinError {
    /// No live match with this id.
    #[error("match not found")]
    NotFound,
    /// The match already has a guest.
    #[error("match already has two players")]
    AlreadyFull,
    /// The host tried to join their own match.
    #[error("cannot join your own match")]
    SelfJoin,
    /// The match is in the wrong status for the operation.
    #[error("match is in the wrong state for this operation")]
    InvalidState,
}

impl RegistryError {
    /// Stable code sent to clients.
    pub fn code(&self) -> &'static str {
        match self {
            RegistryError::Full { .. } => "RegistryFull",
            RegistryError::IdsExhausted => "RegistryExhausted",
        }
    }
}

impl JoinError {
    /// Stable code sent to clients.
    pub fn code(&self) -> &'static str {
        match self {
            JoinError::NotFound => "NotFound",
            JoinError::AlreadyFull => "AlreadyFull",
            JoinError::SelfJoin => "SelfJoin",
            JoinError::InvalidState => "InvalidState",
        }
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Bounded, id-ordered match collection.
#[derive(Debug)]
pub struct MatchRegistry {
    matches: BTreeMap<MatchId, Match>,
    capacity: usize,
    next_id: u32,
}

impl Default for MatchRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl MatchRegistry {
    /// Create an empty registry holding at most `capacity` matches.
    pub fn new(capacity: usize) -> Self {
        Self {
            matches: BTreeMap::new(),
            capacity,
            next_id: 1,
        }
    }

    /// Register a new match awaiting an opponent.
    pub fn create(&mut self, host: Username) -> Result<MatchId, RegistryError> {
        if self.matches.len() >= self.capacity {
            return Err(RegistryError::Full {
                capacity: self.capacity,
            });
        }
        let id = MatchId(self.next_id);
        self.next_id = self.next_id.checked_add(1).ok_or(RegistryError::IdsExhausted)?;

        self.matches.insert(id, Match {
            id,
            host,
            guest: None,
            status: MatchStatus::AwaitingOpponent,
            created_at: Utc::now(),
        });
        Ok(id)
    }

    /// Matches awaiting an opponent as `(id, host)`, ascending by id.
    pub fn list(&self) -> Vec<(MatchId, Username)> {
        self.matches
            .values()
            .filter(|m| m.status == MatchStatus::AwaitingOpponent)
            .map(|m| (m.id, m.host.clone()))
            .collect()
    }

    /// Seat `guest` in match `id`, returning the host.
    pub fn join(&mut self, id: MatchId, guest: Username) -> Result<Username, JoinError> {
        let entry = self.matches.get_mut(&id).ok_or(JoinError::NotFound)?;
        if entry.guest.is_some() || entry.status != MatchStatus::AwaitingOpponent {
            return Err(JoinError::AlreadyFull);
        }
        if entry.host == guest {
            return Err(JoinError::SelfJoin);
        }

        entry.guest = Some(guest);
        entry.status = MatchStatus::Active;
        Ok(entry.host.clone())
    }

    /// Decide an active match in favour of `winner` and remove it.
    pub fn resolve(&mut self, id: MatchId, winner: Side) -> Result<MatchResult, JoinError> {
        let entry = self.matches.get(&id).ok_or(JoinError::NotFound)?;
        if entry.status != MatchStatus::Active {
            return Err(JoinError::InvalidState);
        }
        let mut record = self.matches.remove(&id).ok_or(JoinError::NotFound)?;
        let guest = record.guest.clone().ok_or(JoinError::InvalidState)?;

        let (winner, loser) = match winner {
            Side::Host => (record.host.clone(), guest),
            Side::Guest => (guest, record.host.clone()),
        };
        record.status = MatchStatus::Finished;

        Ok(MatchResult { record, winner, loser })
    }

    /// Withdraw a match nobody has joined yet.
    pub fn abandon(&mut self, id: MatchId) -> Result<Match, JoinError> {
        let entry = self.matches.get(&id).ok_or(JoinError::NotFound)?;
        if entry.status != MatchStatus::AwaitingOpponent {
            return Err(JoinError::InvalidState);
        }
        self.matches.remove(&id).ok_or(JoinError::NotFound)
    }

    /// Look up a live match.
    pub fn get(&self, id: MatchId) -> Option<&Match> {
        self.matches.get(&id)
    }

    /// Iterate live matches in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Match> {
        self.matches.values()
    }

    /// Live match count.
    pub fn len(&self) -> usize {
        self.matches.len()
    }

    /// Whether no match is live.
    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> Username {
        Username::new(s).unwrap()
    }

    fn assert_invariants(registry: &MatchRegistry) {
        assert!(registry.len() <= registry.capacity());
        for m in registry.iter() {
            assert_eq!(m.status == MatchStatus::AwaitingOpponent, m.guest.is_none());
            assert_ne!(m.status, MatchStatus::Finished);
        }
    }

    #[test]
    fn test_create_first_match() {
        let mut registry = MatchRegistry::default();
        let id = registry.create(name("host")).unwrap();

        assert_eq!(id, MatchId::new(1));
        assert_eq!(registry.get(id).unwrap().status, MatchStatus::AwaitingOpponent);
        assert_eq!(registry.list(), vec![(id, name("host"))]);
        assert_invariants(&registry);
    }

    #[test]
    fn test_capacity_enforced() {
        let mut registry = MatchRegistry::new(DEFAULT_CAPACITY);
        for i in 0..DEFAULT_CAPACITY {
            registry.create(name(&format!("p{}", i))).unwrap();
        }
        assert_eq!(
            registry.create(name("late")),
            Err(RegistryError::Full { capacity: DEFAULT_CAPACITY })
        );
        assert_invariants(&registry);
    }

    #[test]
    fn test_ids_not_reused_after_delete() {
        let mut registry = MatchRegistry::default();
        let a = registry.create(name("a")).unwrap();
        let b = registry.create(name("b")).unwrap();
        registry.abandon(a).unwrap();
        let c = registry.create(name("c")).unwrap();

        assert_eq!(c, MatchId::new(3));
        // b kept its id
        assert_eq!(registry.get(b).unwrap().host, name("b"));
        assert_eq!(registry.join(a, name("z")), Err(JoinError::NotFound));
    }

    #[test]
    fn test_list_only_awaiting_in_id_order() {
        let mut registry = MatchRegistry::default();
        let a = registry.create(name("a")).unwrap();
        let b = registry.create(name("b")).unwrap();
        let c = registry.create(name("c")).unwrap();
        registry.join(b, name("x")).unwrap();

        assert_eq!(registry.list(), vec![(a, name("a")), (c, name("c"))]);
    }

    #[test]
    fn test_join_activates_match() {
        let mut registry = MatchRegistry::default();
        let id = registry.create(name("host")).unwrap();

        assert_eq!(registry.join(id, name("guest")), Ok(name("host")));
        let entry = registry.get(id).unwrap();
        assert_eq!(entry.status, MatchStatus::Active);
        assert_eq!(entry.guest, Some(name("guest")));
        assert_invariants(&registry);
    }

    #[test]
    fn test_join_errors() {
        let mut registry = MatchRegistry::default();
        let id = registry.create(name("host")).unwrap();

        assert_eq!(registry.join(MatchId::new(99), name("g")), Err(JoinError::NotFound));
        assert_eq!(registry.join(id, name("host")), Err(JoinError::SelfJoin));

        registry.join(id, name("g1")).unwrap();
        assert_eq!(registry.join(id, name("g2")), Err(JoinError::AlreadyFull));
        assert_eq!(registry.get(id).unwrap().guest, Some(name("g1")));
    }

    #[test]
    fn test_resolve_removes_entry() {
        let mut registry = MatchRegistry::default();
        let id = registry.create(name("host")).unwrap();
        registry.join(id, name("guest")).unwrap();

        let result = registry.resolve(id, Side::Guest).unwrap();
        assert_eq!(result.winner, name("guest"));
        assert_eq!(result.loser, name("host"));
        assert_eq!(result.record.status, MatchStatus::Finished);
        assert!(registry.get(id).is_none());
        assert!(registry.list().is_empty());
        assert_eq!(registry.resolve(id, Side::Host), Err(JoinError::NotFound));
    }

    #[test]
    fn test_resolve_requires_active() {
        let mut registry = MatchRegistry::default();
        let id = registry.create(name("host")).unwrap();
        assert_eq!(registry.resolve(id, Side::Host), Err(JoinError::InvalidState));
        assert!(registry.get(id).is_some());
    }

    #[test]
    fn test_abandon_rules() {
        let mut registry = MatchRegistry::default();
        let open = registry.create(name("a")).unwrap();
        let active = registry.create(name("b")).unwrap();
        registry.join(active, name("c")).unwrap();

        assert_eq!(registry.abandon(active), Err(JoinError::InvalidState));
        assert!(registry.abandon(open).is_ok());

        // Idempotent failure on an already-removed id
        assert_eq!(registry.abandon(open), Err(JoinError::NotFound));
        assert_eq!(registry.abandon(open), Err(JoinError::NotFound));
    }

    #[test]
    fn test_side_lookup() {
        let mut registry = MatchRegistry::default();
        let id = registry.create(name("host")).unwrap();
        registry.join(id, name("guest")).unwrap();
        let entry = registry.get(id).unwrap();

        assert_eq!(entry.side_of(&name("host")), Some(Side::Host));
        assert_eq!(entry.side_of(&name("guest")), Some(Side::Guest));
        assert_eq!(entry.side_of(&name("other")), None);
        assert_eq!(entry.player(Side::Host.opponent()), Some(&name("guest")));
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(RegistryError::Full { capacity: 5 }.code(), "RegistryFull");
        assert_eq!(JoinError::AlreadyFull.code(), "AlreadyFull");
        assert_eq!(JoinError::SelfJoin.code(), "SelfJoin");
    }
}
