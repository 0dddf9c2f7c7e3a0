//! Varied picks from reply banks, seedable so tests stay reproducible.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::patterns;

/// Per-session picker for reply banks. Prefers lines that were not used in
/// the recent assistant replies.
#[derive(Debug, Clone)]
pub struct Rotator {
    rng: StdRng,
}

impl Default for Rotator {
    fn default() -> Self {
        Self::new()
    }
}

impl Rotator {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
        }
    }

    /// Reproducible rotation, for tests and replays.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Picks a line from `bank`, skipping any that repeat one of `recent`.
    /// Falls back to the whole bank when every line was used recently.
    pub fn pick<'a>(&mut self, bank: &[&'a str], recent: &[String]) -> Option<&'a str> {
        let fresh: Vec<&'a str> = bank
            .iter()
            .copied()
            .filter(|line| !patterns::detect_repetition(line, recent, recent.len()))
            .collect();
        let pool: &[&'a str] = if fresh.is_empty() { bank } else { &fresh };
        if pool.is_empty() {
            return None;
        }
        let index = self.rng.random_range(0..pool.len());
        Some(pool[index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BANK: &[&str] = &["What happened?", "What's going on?", "Oh no. What happened next?"];

    #[test]
    fn avoids_recent_lines() {
        let mut rotator = Rotator::seeded(7);
        let recent = vec!["What happened?".to_string(), "What's going on?".to_string()];
        for _ in 0..20 {
            assert_eq!(rotator.pick(BANK, &recent), Some("Oh no. What happened next?"));
        }
    }

    #[test]
    fn falls_back_to_whole_bank_when_exhausted() {
        let mut rotator = Rotator::seeded(7);
        let recent: Vec<String> = BANK.iter().map(|s| s.to_string()).collect();
        assert!(rotator.pick(BANK, &recent).is_some());
        assert_eq!(rotator.pick(&[], &recent), None);
    }

    #[test]
    fn same_seed_same_sequence() {
        let mut a = Rotator::seeded(42);
        let mut b = Rotator::seeded(42);
        for _ in 0..10 {
            assert_eq!(a.pick(BANK, &[]), b.pick(BANK, &[]));
        }
    }
}
