//! Match Outcome Resolution
//!
//! The lobby does not play the game; it asks an [`OutcomeResolver`] who won.
//! The default resolver flips a fair coin from a seeded [`DeterministicRng`].

use tracing::debug;

use crate::core::rng::DeterministicRng;
use crate::lobby::registry::Side;
use crate::lobby::session::Username;

/// Decides the winner of a finished match.
///
/// Called exactly once per resolved match. Any
/// `FnMut(&Username, &Username) -> Side` closure is a resolver.
pub trait OutcomeResolver {
    /// Pick the winning side given the host and guest.
    fn resolve(&mut self, host: &Username, guest: &Username) -> Side;
}

impl<F> OutcomeResolver for F
where
    F: FnMut(&Username, &Username) -> Side,
{
    fn resolve(&mut self, host: &Username, guest: &Username) -> Side {
        self(host, guest)
    }
}

/// Even-odds resolver.
#[derive(Debug, Clone)]
pub struct RandomResolver {
    rng: DeterministicRng,
}

impl RandomResolver {
    /// Reproducible resolver for a fixed seed.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: DeterministicRng::new(seed),
        }
    }

    /// Resolver seeded from OS entropy.
    pub fn from_entropy() -> Self {
        Self {
            rng: DeterministicRng::from_entropy(),
        }
    }
}

impl OutcomeResolver for RandomResolver {
    fn resolve(&mut self, host: &Username, guest: &Username) -> Side {
        let side = if self.rng.next_bool_ratio(1, 2) {
            Side::Host
        } else {
            Side::Guest
        };
        debug!("Resolved {} vs {}: {:?} wins", host, guest, side);
        side
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn players() -> (Username, Username) {
        (Username::new("host").unwrap(), Username::new("guest").unwrap())
    }

    #[test]
    fn test_seeded_resolver_is_reproducible() {
        let (host, guest) = players();
        let mut a = RandomResolver::with_seed(7);
        let mut b = RandomResolver::with_seed(7);

        for _ in 0..100 {
            assert_eq!(a.resolve(&host, &guest), b.resolve(&host, &guest));
        }
    }

    #[test]
    fn test_random_resolver_picks_both_sides() {
        let (host, guest) = players();
        let mut resolver = RandomResolver::with_seed(1);
        let sides: Vec<Side> = (0..64).map(|_| resolver.resolve(&host, &guest)).collect();

        assert!(sides.contains(&Side::Host));
        assert!(sides.contains(&Side::Guest));
    }

    #[test]
    fn test_closure_resolver() {
        let (host, guest) = players();
        let mut calls = 0;
        let mut resolver = |_: &Username, _: &Username| {
            calls += 1;
            Side::Guest
        };

        assert_eq!(OutcomeResolver::resolve(&mut resolver, &host, &guest), Side::Guest);
        assert_eq!(calls, 1);
    }
}
