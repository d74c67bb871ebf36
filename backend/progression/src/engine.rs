//! Progression engine: turns voice sessions into XP, levels, streaks and
//! achievements.
//!
//! The watchdog calls [`ProgressionEngine::on_join`] and
//! [`ProgressionEngine::on_leave`] at its lifecycle points and nothing else.
//! Every persistence failure is returned to the caller, which logs it and moves
//! on; the engine never retries a lost write.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::{debug, info};

use afkwarden_core::{Clock, UserId};

use crate::achievements::{AchievementRegistry, SessionContext};
use crate::level::{next_streak, role_reward, xp_for_next_level, xp_progress, StreakMultiplier};
use crate::store::{
    ProgressionRecord, ProgressionStore, SessionId, SessionRecord, WindowStat,
};

/// Entries shown per leaderboard.
pub const LEADERBOARD_SIZE: usize = 10;
pub const WEEKLY_WINDOW_DAYS: i64 = 7;
pub const MONTHLY_WINDOW_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy)]
struct ActiveSession {
    session_id: SessionId,
    joined_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinOutcome {
    pub session_id: SessionId,
    pub streak: u32,
    /// `true` if the record was created by this join.
    pub new_member: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelUp {
    pub from: u32,
    pub to: u32,
    pub role_reward: Option<&'static str>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AchievementUnlock {
    pub kind: &'static str,
    pub name: &'static str,
    pub description: &'static str,
}

/// What a leave produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveOutcome {
    pub minutes: u64,
    pub xp_earned: u64,
    pub multiplier: f64,
    pub total_xp: u64,
    pub total_time_minutes: u64,
    pub level_up: Option<LevelUp>,
    pub unlocked: Vec<AchievementUnlock>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileAchievement {
    pub kind: String,
    pub name: String,
    pub description: String,
    pub unlocked_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(flatten)]
    pub record: ProgressionRecord,
    pub xp_for_next_level: u64,
    pub xp_progress: u64,
    pub multiplier: f64,
    pub achievements: Vec<ProfileAchievement>,
    pub recent_sessions: Vec<SessionRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Leaderboards {
    pub by_time: Vec<ProgressionRecord>,
    pub by_level: Vec<ProgressionRecord>,
    pub by_streak: Vec<ProgressionRecord>,
    pub weekly: Vec<WindowStat>,
    pub monthly: Vec<WindowStat>,
}

pub struct ProgressionEngine {
    store: Arc<dyn ProgressionStore>,
    registry: AchievementRegistry,
    clock: Arc<dyn Clock>,
    active_sessions: HashMap<UserId, ActiveSession>,
}

impl ProgressionEngine {
    pub fn new(store: Arc<dyn ProgressionStore>, clock: Arc<dyn Clock>) -> Self {
        Self::with_registry(store, clock, AchievementRegistry::standard())
    }

    pub fn with_registry(
        store: Arc<dyn ProgressionStore>,
        clock: Arc<dyn Clock>,
        registry: AchievementRegistry,
    ) -> Self {
        Self {
            store,
            registry,
            clock,
            active_sessions: HashMap::new(),
        }
    }

    /// Sessions opened and not yet closed.
    pub fn open_sessions(&self) -> usize {
        self.active_sessions.len()
    }

    /// Ensure a record exists, advance the streak and open a session.
    pub fn on_join(&mut self, user_id: UserId, display_name: &str) -> Result<JoinOutcome> {
        let now = self.clock.now();

        let (record, new_member) = match self.store.get_record(user_id)? {
            Some(record) => (record, false),
            None => {
                let record = self
                    .store
                    .create_record(user_id, display_name, now)
                    .context("create progression record")?;
                info!(user = %user_id, name = %display_name, "New progression record");
                (record, true)
            }
        };

        let previous = record
            .last_active
            .map(|at| (record.current_streak, at.date()));
        let streak = next_streak(previous, now.date());
        self.store
            .update_streak(user_id, streak, now)
            .context("update streak")?;

        let session_id = self
            .store
            .record_session_start(user_id, now)
            .context("open session")?;
        // A repeated join without a leave abandons the earlier open session.
        self.active_sessions.insert(
            user_id,
            ActiveSession {
                session_id,
                joined_at: now,
            },
        );

        debug!(user = %user_id, streak, session = session_id.0, "Progression session opened");
        Ok(JoinOutcome {
            session_id,
            streak,
            new_member,
        })
    }

    /// Close the user's session and apply its rewards.
    ///
    /// Returns `Ok(None)` when no session was open for the user (for example
    /// when the join itself could not be recorded).
    pub fn on_leave(&mut self, user_id: UserId, elapsed: Duration) -> Result<Option<LeaveOutcome>> {
        let Some(session) = self.active_sessions.remove(&user_id) else {
            debug!(user = %user_id, "Leave without an open progression session");
            return Ok(None);
        };
        let now = self.clock.now();

        let record = self
            .store
            .get_record(user_id)?
            .with_context(|| format!("no progression record for {user_id}"))?;

        let minutes = elapsed.as_secs() / 60;
        let multiplier = StreakMultiplier::for_streak(record.current_streak);
        let xp_earned = multiplier.apply(minutes);

        let total_time_minutes = self
            .store
            .add_time(user_id, minutes, now)
            .context("add session time")?;
        let change = self
            .store
            .add_xp(user_id, xp_earned, now)
            .context("add session xp")?;
        self.store
            .record_session_end(session.session_id, now, minutes, xp_earned)
            .context("close session")?;

        let level_up = change.leveled_up().then(|| LevelUp {
            from: change.previous_level,
            to: change.new_level,
            role_reward: role_reward(change.new_level),
        });
        if let Some(ref up) = level_up {
            info!(user = %user_id, from = up.from, to = up.to, "Level up");
        }

        let updated = self
            .store
            .get_record(user_id)?
            .with_context(|| format!("progression record for {user_id} vanished"))?;
        let ctx = SessionContext {
            session_duration: elapsed,
            total_time_minutes,
            evaluated_at: now,
        };
        let unlocked = self.unlock_achievements(&updated, &ctx)?;

        debug!(
            user = %user_id,
            minutes,
            xp = xp_earned,
            joined_at = %session.joined_at,
            "Progression session closed"
        );

        Ok(Some(LeaveOutcome {
            minutes,
            xp_earned,
            multiplier: multiplier.as_f64(),
            total_xp: change.new_xp,
            total_time_minutes,
            level_up,
            unlocked,
        }))
    }

    fn unlock_achievements(
        &self,
        record: &ProgressionRecord,
        ctx: &SessionContext,
    ) -> Result<Vec<AchievementUnlock>> {
        let mut unlocked = Vec::new();
        for def in self.registry.satisfied(record, ctx) {
            if self.store.has_achievement(record.user_id, def.kind)? {
                continue;
            }
            if self
                .store
                .unlock_achievement(record.user_id, def.kind, ctx.evaluated_at)?
            {
                info!(user = %record.user_id, achievement = def.kind, "Achievement unlocked");
                unlocked.push(AchievementUnlock {
                    kind: def.kind,
                    name: def.name,
                    description: def.description,
                });
            }
        }
        Ok(unlocked)
    }

    pub fn profile(&self, user_id: UserId) -> Result<Option<UserProfile>> {
        let Some(record) = self.store.get_record(user_id)? else {
            return Ok(None);
        };

        let achievements = self
            .store
            .achievements(user_id)?
            .into_iter()
            .map(|a| {
                let (name, description) = match self.registry.get(&a.kind) {
                    Some(def) => (def.name.to_string(), def.description.to_string()),
                    None => (a.kind.clone(), String::new()),
                };
                ProfileAchievement {
                    kind: a.kind,
                    name,
                    description,
                    unlocked_at: a.unlocked_at,
                }
            })
            .collect();

        Ok(Some(UserProfile {
            xp_for_next_level: xp_for_next_level(record.level),
            xp_progress: xp_progress(record.xp, record.level),
            multiplier: StreakMultiplier::for_streak(record.current_streak).as_f64(),
            achievements,
            recent_sessions: self.store.sessions(user_id, 5)?,
            record,
        }))
    }

    /// Session totals per user over the trailing `days`.
    pub fn window(&self, days: i64, limit: usize) -> Result<Vec<WindowStat>> {
        let since = self.clock.now() - chrono::Duration::days(days);
        self.store.aggregate_window(since, limit)
    }

    pub fn leaderboards(&self, limit: usize) -> Result<Leaderboards> {
        Ok(Leaderboards {
            by_time: self.store.top_by_time(limit)?,
            by_level: self.store.top_by_level(limit)?,
            by_streak: self.store.top_by_streak(limit)?,
            weekly: self.window(WEEKLY_WINDOW_DAYS, limit)?,
            monthly: self.window(MONTHLY_WINDOW_DAYS, limit)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite_store::SqliteProgressionStore;
    use afkwarden_core::FixedClock;
    use chrono::NaiveDate;

    const ALICE: UserId = UserId(42);

    fn setup(hour: u32) -> (ProgressionEngine, Arc<SqliteProgressionStore>, Arc<FixedClock>) {
        let start = NaiveDate::from_ymd_opt(2024, 9, 2)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap();
        let store = Arc::new(SqliteProgressionStore::in_memory().unwrap());
        let clock = Arc::new(FixedClock::new(start));
        let engine = ProgressionEngine::new(store.clone(), clock.clone());
        (engine, store, clock)
    }

    fn minutes(m: u64) -> Duration {
        Duration::from_secs(m * 60)
    }

    #[test]
    fn zero_length_session_still_updates_streak() {
        let (mut engine, store, clock) = setup(12);
        let joined = engine.on_join(ALICE, "alice").unwrap();
        assert!(joined.new_member);
        assert_eq!(joined.streak, 1);

        let outcome = engine.on_leave(ALICE, Duration::ZERO).unwrap().unwrap();
        assert_eq!(outcome.xp_earned, 0);
        assert_eq!(outcome.minutes, 0);
        assert!(outcome.level_up.is_none());

        let record = store.get_record(ALICE).unwrap().unwrap();
        assert_eq!(record.current_streak, 1);
        assert_eq!(record.last_active, Some(clock.now()));
        assert_eq!(store.sessions(ALICE, 1).unwrap()[0].duration_minutes, 0);
    }

    #[test]
    fn seven_day_streak_earns_bonus() {
        let (mut engine, store, clock) = setup(12);
        store.create_record(ALICE, "alice", clock.now()).unwrap();
        store.update_streak(ALICE, 7, clock.now()).unwrap();

        engine.on_join(ALICE, "alice").unwrap();
        let outcome = engine.on_leave(ALICE, minutes(60)).unwrap().unwrap();
        assert_eq!(outcome.multiplier, 1.25);
        assert_eq!(outcome.xp_earned, 75);
        assert_eq!(outcome.total_time_minutes, 60);
    }

    #[test]
    fn partial_minutes_are_dropped() {
        let (mut engine, _, _) = setup(12);
        engine.on_join(ALICE, "alice").unwrap();
        let outcome = engine
            .on_leave(ALICE, Duration::from_secs(5 * 60 + 59))
            .unwrap()
            .unwrap();
        assert_eq!(outcome.minutes, 5);
        assert_eq!(outcome.xp_earned, 5);
    }

    #[test]
    fn crossing_2500_xp_reports_level_six() {
        let (mut engine, store, clock) = setup(12);
        store.create_record(ALICE, "alice", clock.now()).unwrap();
        store.add_xp(ALICE, 2499, clock.now()).unwrap();

        engine.on_join(ALICE, "alice").unwrap();
        let outcome = engine.on_leave(ALICE, minutes(1)).unwrap().unwrap();
        assert_eq!(outcome.total_xp, 2500);
        assert_eq!(
            outcome.level_up,
            Some(LevelUp { from: 5, to: 6, role_reward: None })
        );
    }

    #[test]
    fn milestone_level_carries_role_reward() {
        let (mut engine, store, clock) = setup(12);
        store.create_record(ALICE, "alice", clock.now()).unwrap();
        store.add_xp(ALICE, 1599, clock.now()).unwrap();

        engine.on_join(ALICE, "alice").unwrap();
        let outcome = engine.on_leave(ALICE, minutes(1)).unwrap().unwrap();
        let up = outcome.level_up.unwrap();
        assert_eq!(up.to, 5);
        assert_eq!(up.role_reward, Some("Bronze Member"));
    }

    #[test]
    fn marathon_unlocks_once() {
        let (mut engine, store, clock) = setup(12);
        engine.on_join(ALICE, "alice").unwrap();
        let first = engine.on_leave(ALICE, minutes(360)).unwrap().unwrap();
        let kinds: Vec<_> = first.unlocked.iter().map(|a| a.kind).collect();
        assert_eq!(kinds, vec!["MARATHON"]);

        clock.advance(chrono::Duration::hours(7));
        engine.on_join(ALICE, "alice").unwrap();
        let second = engine.on_leave(ALICE, minutes(400)).unwrap().unwrap();
        assert!(second.unlocked.iter().all(|a| a.kind != "MARATHON"));
        assert_eq!(store.achievements(ALICE).unwrap().len(), 1);
    }

    #[test]
    fn night_owl_uses_leave_time() {
        let (mut engine, _, _) = setup(3);
        engine.on_join(ALICE, "alice").unwrap();
        let outcome = engine.on_leave(ALICE, minutes(10)).unwrap().unwrap();
        assert_eq!(outcome.unlocked[0].name, "Night Owl");
    }

    #[test]
    fn streak_advances_on_consecutive_days() {
        let (mut engine, _, clock) = setup(12);
        assert_eq!(engine.on_join(ALICE, "alice").unwrap().streak, 1);
        engine.on_leave(ALICE, minutes(5)).unwrap();

        clock.advance(chrono::Duration::days(1));
        assert_eq!(engine.on_join(ALICE, "alice").unwrap().streak, 2);
        engine.on_leave(ALICE, minutes(5)).unwrap();

        clock.advance(chrono::Duration::days(3));
        assert_eq!(engine.on_join(ALICE, "alice").unwrap().streak, 1);
    }

    #[test]
    fn sessions_stay_open_until_leave() {
        let (mut engine, _, _) = setup(12);
        engine.on_join(ALICE, "alice").unwrap();
        engine.on_join(UserId(7), "bob").unwrap();
        assert_eq!(engine.open_sessions(), 2);

        engine.on_leave(ALICE, minutes(3)).unwrap();
        assert_eq!(engine.open_sessions(), 1);
        assert!(engine.on_leave(ALICE, minutes(3)).unwrap().is_none());
        assert_eq!(engine.open_sessions(), 1);
    }

    #[test]
    fn leave_without_join_is_ignored() {
        let (mut engine, store, _) = setup(12);
        assert!(engine.on_leave(ALICE, minutes(30)).unwrap().is_none());
        assert_eq!(store.user_count().unwrap(), 0);
    }

    #[test]
    fn profile_reports_level_progress() {
        let (mut engine, store, clock) = setup(12);
        store.create_record(ALICE, "alice", clock.now()).unwrap();
        store.add_xp(ALICE, 2600, clock.now()).unwrap();
        engine.on_join(ALICE, "alice").unwrap();
        engine.on_leave(ALICE, minutes(360)).unwrap();

        let profile = engine.profile(ALICE).unwrap().unwrap();
        assert_eq!(profile.record.level, 6);
        assert_eq!(profile.xp_for_next_level, 3600);
        assert_eq!(profile.xp_progress, 2960 - 2500);
        assert_eq!(profile.achievements[0].name, "Marathon");
        assert_eq!(profile.recent_sessions.len(), 1);

        assert!(engine.profile(UserId(7)).unwrap().is_none());
    }

    #[test]
    fn leaderboards_include_windows() {
        let (mut engine, _, clock) = setup(12);
        engine.on_join(ALICE, "alice").unwrap();
        engine.on_leave(ALICE, minutes(90)).unwrap();

        clock.advance(chrono::Duration::days(10));
        engine.on_join(UserId(7), "bob").unwrap();
        engine.on_leave(UserId(7), minutes(30)).unwrap();

        let boards = engine.leaderboards(LEADERBOARD_SIZE).unwrap();
        assert_eq!(boards.by_time[0].username, "alice");
        assert_eq!(boards.weekly.len(), 1);
        assert_eq!(boards.weekly[0].username, "bob");
        assert_eq!(boards.monthly.len(), 2);
    }
}
