use std::sync::Mutex;

use rand::distr::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Length of a game identifier.
pub const GAME_ID_LENGTH: usize = 8;

/// Length of the random suffix appended to a game id to name a connection.
pub const CONNECTION_SUFFIX_LENGTH: usize = 4;

/// Produce `len` random ASCII alphanumeric characters from `rng`.
pub fn random_id<R: Rng + ?Sized>(rng: &mut R, len: usize) -> String {
    (0..len).map(|_| char::from(rng.sample(Alphanumeric))).collect()
}

/// Build a connection identifier scoped to its game.
pub fn connection_id(game_id: &str, suffix: &str) -> String {
    format!("{game_id}-{suffix}")
}

/// Game ids become store keys and file names, so only the generated shape
/// is accepted.
pub fn is_valid_game_id(id: &str) -> bool {
    id.len() == GAME_ID_LENGTH && id.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// Process-wide random source, seeded once at startup.
pub struct IdGenerator {
    rng: Mutex<StdRng>,
}

impl IdGenerator {
    pub fn from_os_rng() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// Deterministic generator for tests and reproducible runs.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn game_id(&self) -> String {
        self.next(GAME_ID_LENGTH)
    }

    pub fn connection_suffix(&self) -> String {
        self.next(CONNECTION_SUFFIX_LENGTH)
    }

    fn next(&self, len: usize) -> String {
        let mut rng = self
            .rng
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        random_id(&mut *rng, len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_id_has_requested_length() {
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(random_id(&mut rng, 0).len(), 0);
        assert_eq!(random_id(&mut rng, 4).len(), 4);
        assert_eq!(random_id(&mut rng, 32).len(), 32);
    }

    #[test]
    fn same_seed_same_sequence() {
        let a = IdGenerator::seeded(42);
        let b = IdGenerator::seeded(42);
        for _ in 0..10 {
            assert_eq!(a.game_id(), b.game_id());
        }
    }

    #[test]
    fn generated_game_ids_are_valid() {
        let ids = IdGenerator::seeded(1);
        for _ in 0..100 {
            let id = ids.game_id();
            assert!(is_valid_game_id(&id), "Invalid game id: {id}");
        }
    }

    #[test]
    fn rejects_malformed_game_ids() {
        assert!(!is_valid_game_id(""));
        assert!(!is_valid_game_id("abc"));
        assert!(!is_valid_game_id("../../etc"));
        assert!(!is_valid_game_id("abcd-123"));
        assert!(is_valid_game_id("aB3dE5gH"));
    }

    #[test]
    fn connection_id_prefixes_game() {
        assert_eq!(connection_id("aB3dE5gH", "xYz1"), "aB3dE5gH-xYz1");
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn ids_are_alphanumeric(seed in any::<u64>(), len in 0usize..64) {
                let mut rng = StdRng::seed_from_u64(seed);
                let id = random_id(&mut rng, len);
                prop_assert_eq!(id.len(), len);
                prop_assert!(id.bytes().all(|b| b.is_ascii_alphanumeric()));
            }
        }
    }
}
