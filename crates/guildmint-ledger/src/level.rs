//! Level ↔ XP math.
//!
//! Level is derived, never authoritative: `level = floor(sqrt(xp / 125)) + 1`.

use guildmint_core::constants::LEVEL_MULTIPLIER;

/// Level for a given XP total. Negative XP clamps to zero.
pub fn level_from_xp(xp: f64) -> i64 {
    let xp = xp.max(0.0);
    (xp / LEVEL_MULTIPLIER).sqrt().floor() as i64 + 1
}

/// XP required to reach `level`: `(level - 1)^2 * 125`.
pub fn xp_for_level(level: i64) -> f64 {
    let steps = (level - 1).max(0) as f64;
    steps * steps * LEVEL_MULTIPLIER
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_user_is_level_one() {
        assert_eq!(level_from_xp(0.0), 1);
        assert_eq!(level_from_xp(124.9), 1);
    }

    #[test]
    fn level_boundaries() {
        assert_eq!(level_from_xp(125.0), 2);
        assert_eq!(level_from_xp(499.9), 2);
        assert_eq!(level_from_xp(500.0), 3);
    }

    #[test]
    fn negative_xp_clamps() {
        assert_eq!(level_from_xp(-50.0), 1);
    }

    #[test]
    fn xp_for_level_inverts_level_from_xp() {
        for level in 1..=60 {
            let xp = xp_for_level(level);
            assert_eq!(level_from_xp(xp), level, "level {level} at {xp} xp");
            if level > 1 {
                assert_eq!(level_from_xp(xp - 0.1), level - 1);
            }
        }
    }
}
