//! Achievement predicates.
//!
//! Each achievement is a named pure predicate over the updated record and the
//! session that just ended. New kinds are added by registering another
//! [`AchievementDef`]; nothing outside this crate needs to change.

use std::time::Duration;

use chrono::{NaiveDateTime, Timelike};

use crate::store::ProgressionRecord;

/// Context of the session that just ended.
#[derive(Debug, Clone)]
pub struct SessionContext {
    /// Length of the session that ended.
    pub session_duration: Duration,
    /// Lifetime presence after this session.
    pub total_time_minutes: u64,
    /// Local wall-clock time the predicates are evaluated at.
    pub evaluated_at: NaiveDateTime,
}

pub type AchievementPredicate = fn(&ProgressionRecord, &SessionContext) -> bool;

#[derive(Clone)]
pub struct AchievementDef {
    /// Stable key persisted with unlocks (e.g. `NIGHT_OWL`).
    pub kind: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub predicate: AchievementPredicate,
}

impl std::fmt::Debug for AchievementDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AchievementDef")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl AchievementDef {
    pub fn is_satisfied(&self, record: &ProgressionRecord, ctx: &SessionContext) -> bool {
        (self.predicate)(record, ctx)
    }
}

/// Ordered set of achievement definitions consulted after every leave.
#[derive(Debug, Clone, Default)]
pub struct AchievementRegistry {
    defs: Vec<AchievementDef>,
}

pub const MARATHON_DURATION: Duration = Duration::from_secs(6 * 60 * 60);

impl AchievementRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in achievements.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(AchievementDef {
            kind: "NIGHT_OWL",
            name: "Night Owl",
            description: "Active between 12 AM - 6 AM",
            predicate: |_, ctx| ctx.evaluated_at.hour() < 6,
        });
        registry.register(AchievementDef {
            kind: "MARATHON",
            name: "Marathon",
            description: "Stay in voice for 6+ hours continuously",
            predicate: |_, ctx| ctx.session_duration >= MARATHON_DURATION,
        });
        registry.register(AchievementDef {
            kind: "DEDICATED",
            name: "Dedicated",
            description: "Maintain a 7-day streak",
            predicate: |record, _| record.current_streak >= 7,
        });
        registry.register(AchievementDef {
            kind: "VETERAN",
            name: "Veteran",
            description: "Reach level 10",
            predicate: |record, _| record.level >= 10,
        });
        registry.register(AchievementDef {
            kind: "MASTER",
            name: "Master",
            description: "Reach level 25",
            predicate: |record, _| record.level >= 25,
        });
        registry.register(AchievementDef {
            kind: "LEGEND",
            name: "Legend",
            description: "Reach level 50",
            predicate: |record, _| record.level >= 50,
        });
        registry.register(AchievementDef {
            kind: "CENTURY",
            name: "Century",
            description: "Reach level 100",
            predicate: |record, _| record.level >= 100,
        });
        registry
    }

    /// Add a definition. A later definition with the same kind replaces the earlier one.
    pub fn register(&mut self, def: AchievementDef) {
        self.defs.retain(|d| d.kind != def.kind);
        self.defs.push(def);
    }

    pub fn get(&self, kind: &str) -> Option<&AchievementDef> {
        self.defs.iter().find(|d| d.kind == kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AchievementDef> {
        self.defs.iter()
    }

    /// Definitions whose predicate holds, regardless of prior unlocks.
    pub fn satisfied<'a>(
        &'a self,
        record: &'a ProgressionRecord,
        ctx: &'a SessionContext,
    ) -> impl Iterator<Item = &'a AchievementDef> + 'a {
        self.defs.iter().filter(move |d| d.is_satisfied(record, ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use afkwarden_core::UserId;
    use chrono::NaiveDate;

    fn at(hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(hour, 15, 0)
            .unwrap()
    }

    fn record(level: u32, streak: u32) -> ProgressionRecord {
        ProgressionRecord {
            user_id: UserId(1),
            username: "tester".into(),
            xp: 0,
            level,
            total_time_minutes: 0,
            current_streak: streak,
            last_active: None,
            created_at: at(12),
        }
    }

    fn ctx(hour: u32, minutes: u64) -> SessionContext {
        SessionContext {
            session_duration: Duration::from_secs(minutes * 60),
            total_time_minutes: minutes,
            evaluated_at: at(hour),
        }
    }

    fn kinds(registry: &AchievementRegistry, r: &ProgressionRecord, c: &SessionContext) -> Vec<&'static str> {
        registry.satisfied(r, c).map(|d| d.kind).collect()
    }

    #[test]
    fn night_owl_window() {
        let registry = AchievementRegistry::standard();
        assert_eq!(kinds(&registry, &record(1, 1), &ctx(0, 5)), vec!["NIGHT_OWL"]);
        assert_eq!(kinds(&registry, &record(1, 1), &ctx(5, 5)), vec!["NIGHT_OWL"]);
        assert!(kinds(&registry, &record(1, 1), &ctx(6, 5)).is_empty());
    }

    #[test]
    fn marathon_needs_six_hours() {
        let registry = AchievementRegistry::standard();
        assert!(kinds(&registry, &record(1, 1), &ctx(12, 359)).is_empty());
        assert_eq!(kinds(&registry, &record(1, 1), &ctx(12, 360)), vec!["MARATHON"]);
    }

    #[test]
    fn level_and_streak_tiers() {
        let registry = AchievementRegistry::standard();
        assert_eq!(
            kinds(&registry, &record(25, 7), &ctx(12, 1)),
            vec!["DEDICATED", "VETERAN", "MASTER"]
        );
        assert_eq!(kinds(&registry, &record(100, 0), &ctx(12, 1)).len(), 4);
    }

    #[test]
    fn custom_achievement_can_be_registered() {
        let mut registry = AchievementRegistry::standard();
        registry.register(AchievementDef {
            kind: "REGULAR",
            name: "Regular",
            description: "Spend 1000 minutes in voice",
            predicate: |_, ctx| ctx.total_time_minutes >= 1000,
        });
        assert!(registry.get("REGULAR").is_some());
        assert_eq!(kinds(&registry, &record(1, 1), &ctx(12, 1000)), vec!["REGULAR"]);
    }
}
