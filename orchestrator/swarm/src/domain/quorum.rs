// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Quorum arithmetic.

/// Absorbs binary rounding of fractions such as 2/3 so that `2/3 × 12`
/// yields exactly 8.
const FRACTION_EPSILON: f64 = 1e-9;

/// Grants required to approve a proposal among `alive` eligible voters.
///
/// `max(1, ceil(fraction × alive))`, capped at `alive` when any voter exists.
pub fn quorum_size(fraction: f64, alive: usize) -> usize {
    let raw = (fraction * alive as f64 - FRACTION_EPSILON).ceil();
    let required = if raw.is_finite() && raw > 0.0 { raw as usize } else { 0 };
    required.max(1).min(alive.max(1))
}

/// Simple majority (`N/2 + 1`) used by leader election.
pub fn majority(alive: usize) -> usize {
    alive / 2 + 1
}

/// Faulty voters tolerated among `alive` peers, `⌊(N-1)/3⌋`.
pub fn max_faulty(alive: usize) -> usize {
    alive.saturating_sub(1) / 3
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_THIRDS: f64 = 2.0 / 3.0;

    #[test]
    fn test_two_thirds_quorum() {
        assert_eq!(quorum_size(TWO_THIRDS, 5), 4);
        assert_eq!(quorum_size(TWO_THIRDS, 10), 7);
        assert_eq!(quorum_size(TWO_THIRDS, 12), 8);
        assert_eq!(quorum_size(TWO_THIRDS, 3), 2);
        assert_eq!(quorum_size(TWO_THIRDS, 1), 1);
    }

    #[test]
    fn test_quorum_never_below_one() {
        assert_eq!(quorum_size(TWO_THIRDS, 0), 1);
        assert_eq!(quorum_size(0.01, 4), 1);
    }

    #[test]
    fn test_half_quorum_override() {
        assert_eq!(quorum_size(0.5, 4), 2);
        assert_eq!(quorum_size(0.5, 5), 3);
    }

    #[test]
    fn test_majority() {
        assert_eq!(majority(1), 1);
        assert_eq!(majority(4), 3);
        assert_eq!(majority(5), 3);
    }

    #[test]
    fn test_faulty_voters_cannot_reach_two_thirds() {
        for n in 1..=30 {
            let f = max_faulty(n);
            assert!(f < quorum_size(TWO_THIRDS, n), "n={n}");
        }
    }
}
