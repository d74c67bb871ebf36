//! Pure progression arithmetic: levels, streak multipliers, streak continuity.

use chrono::NaiveDate;

/// XP per level step; level `n` starts at `(n-1)² × XP_PER_LEVEL_UNIT`.
pub const XP_PER_LEVEL_UNIT: u64 = 100;

/// `floor(sqrt(xp / 100)) + 1`.
pub fn level_for_xp(xp: u64) -> u32 {
    (integer_sqrt(xp / XP_PER_LEVEL_UNIT) + 1) as u32
}

/// Total XP at which the level after `level` begins.
pub fn xp_for_next_level(level: u32) -> u64 {
    let level = u64::from(level);
    level * level * XP_PER_LEVEL_UNIT
}

/// XP earned since the start of the current level.
pub fn xp_progress(xp: u64, level: u32) -> u64 {
    xp.saturating_sub(xp_for_next_level(level.saturating_sub(1)))
}

fn integer_sqrt(n: u64) -> u64 {
    if n < 2 {
        return n;
    }
    let mut x = (n as f64).sqrt() as u64;
    // Float rounding can be off by one either way near perfect squares.
    while x * x > n {
        x -= 1;
    }
    while (x + 1) * (x + 1) <= n {
        x += 1;
    }
    x
}

/// Streak bonus, stored in quarters so XP stays exact integer math.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreakMultiplier {
    quarters: u64,
}

impl StreakMultiplier {
    pub fn for_streak(streak: u32) -> Self {
        let quarters = match streak {
            s if s >= 30 => 8,
            s if s >= 14 => 6,
            s if s >= 7 => 5,
            _ => 4,
        };
        Self { quarters }
    }

    pub fn as_f64(self) -> f64 {
        self.quarters as f64 / 4.0
    }

    /// `floor(minutes × multiplier)`.
    pub fn apply(self, minutes: u64) -> u64 {
        minutes * self.quarters / 4
    }
}

/// XP earned for a session of `minutes` at the given streak.
pub fn xp_for_session(minutes: u64, streak: u32) -> u64 {
    StreakMultiplier::for_streak(streak).apply(minutes)
}

/// Streak after activity on `today`, given the previous streak and last active day.
///
/// Same day keeps the streak, the following day extends it, any longer gap (or
/// no history) restarts at 1. A last-active day in the future is treated as
/// same-day so clock skew never wipes a streak.
pub fn next_streak(previous: Option<(u32, NaiveDate)>, today: NaiveDate) -> u32 {
    let Some((streak, last_active)) = previous else {
        return 1;
    };
    match (today - last_active).num_days() {
        d if d <= 0 => streak,
        1 => streak + 1,
        _ => 1,
    }
}

/// Role label granted on reaching exactly `level`.
pub fn role_reward(level: u32) -> Option<&'static str> {
    match level {
        5 => Some("Bronze Member"),
        10 => Some("Silver Member"),
        25 => Some("Gold Member"),
        50 => Some("Platinum Member"),
        100 => Some("Diamond Legend"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    #[test]
    fn level_thresholds() {
        assert_eq!(level_for_xp(0), 1);
        assert_eq!(level_for_xp(99), 1);
        assert_eq!(level_for_xp(100), 2);
        assert_eq!(level_for_xp(399), 2);
        assert_eq!(level_for_xp(400), 3);
        assert_eq!(level_for_xp(2499), 5);
        assert_eq!(level_for_xp(2500), 6);
        assert_eq!(level_for_xp(1_000_000), 101);
    }

    #[test]
    fn level_matches_float_formula_over_a_range() {
        for xp in (0..200_000u64).step_by(37) {
            let expected = ((xp as f64 / 100.0).sqrt().floor() as u32) + 1;
            assert_eq!(level_for_xp(xp), expected, "xp = {xp}");
        }
    }

    #[test]
    fn next_level_and_progress() {
        assert_eq!(xp_for_next_level(1), 100);
        assert_eq!(xp_for_next_level(5), 2500);
        assert_eq!(xp_progress(2600, 6), 100);
        assert_eq!(xp_progress(50, 1), 50);
    }

    #[test]
    fn multiplier_tiers() {
        assert_eq!(StreakMultiplier::for_streak(0).as_f64(), 1.0);
        assert_eq!(StreakMultiplier::for_streak(6).as_f64(), 1.0);
        assert_eq!(StreakMultiplier::for_streak(7).as_f64(), 1.25);
        assert_eq!(StreakMultiplier::for_streak(14).as_f64(), 1.5);
        assert_eq!(StreakMultiplier::for_streak(29).as_f64(), 1.5);
        assert_eq!(StreakMultiplier::for_streak(30).as_f64(), 2.0);
    }

    #[test]
    fn session_xp_is_floored() {
        assert_eq!(xp_for_session(60, 7), 75);
        assert_eq!(xp_for_session(3, 7), 3);
        assert_eq!(xp_for_session(3, 14), 4);
        assert_eq!(xp_for_session(0, 30), 0);
    }

    #[test]
    fn streak_continuity() {
        assert_eq!(next_streak(None, day(10)), 1);
        assert_eq!(next_streak(Some((4, day(10))), day(10)), 4);
        assert_eq!(next_streak(Some((4, day(9))), day(10)), 5);
        assert_eq!(next_streak(Some((4, day(7))), day(10)), 1);
        assert_eq!(next_streak(Some((4, day(11))), day(10)), 4);
    }

    #[test]
    fn role_rewards_only_on_milestones() {
        assert_eq!(role_reward(5), Some("Bronze Member"));
        assert_eq!(role_reward(100), Some("Diamond Legend"));
        assert_eq!(role_reward(6), None);
    }
}
