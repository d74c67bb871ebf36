use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDateTime;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::info;

use afkwarden_core::UserId;

use crate::level::level_for_xp;
use crate::store::{
    ProgressionRecord, ProgressionStore, SessionId, SessionRecord, UnlockedAchievement,
    WindowStat, XpChange, TIMESTAMP_FORMAT,
};

const RECORD_COLUMNS: &str = "user_id, username, xp, level, total_time, current_streak, last_active, created_at";

/// SQLite-backed progression store.
pub struct SqliteProgressionStore {
    conn: Mutex<Connection>,
}

impl SqliteProgressionStore {
    /// Open or create the store at the given path.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open progression database at {path}"))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let store = Self { conn: Mutex::new(conn) };
        store.init_schema()?;
        info!(path = %path, "Progression store opened");
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory SQLite")?;
        let store = Self { conn: Mutex::new(conn) };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("progression store connection poisoned"))
    }

    fn init_schema(&self) -> Result<()> {
        self.conn()?.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                user_id        TEXT PRIMARY KEY,
                username       TEXT NOT NULL,
                total_time     INTEGER NOT NULL DEFAULT 0,
                xp             INTEGER NOT NULL DEFAULT 0,
                level          INTEGER NOT NULL DEFAULT 1,
                current_streak INTEGER NOT NULL DEFAULT 0,
                last_active    TEXT,
                created_at     TEXT NOT NULL,
                updated_at     TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS achievements (
                id               INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id          TEXT NOT NULL,
                achievement_type TEXT NOT NULL,
                unlocked_at      TEXT NOT NULL,
                UNIQUE(user_id, achievement_type),
                FOREIGN KEY (user_id) REFERENCES users(user_id)
            );
            CREATE TABLE IF NOT EXISTS sessions (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id    TEXT NOT NULL,
                join_time  TEXT NOT NULL,
                leave_time TEXT,
                duration   INTEGER NOT NULL DEFAULT 0,
                xp_earned  INTEGER NOT NULL DEFAULT 0,
                FOREIGN KEY (user_id) REFERENCES users(user_id)
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_user_id ON sessions(user_id);
            CREATE INDEX IF NOT EXISTS idx_sessions_join_time ON sessions(join_time);
            "#,
        )?;
        Ok(())
    }

    fn query_records(&self, order_by: &str, limit: usize) -> Result<Vec<ProgressionRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM users ORDER BY {order_by} LIMIT ?1"
        ))?;
        let records = stmt
            .query_map(params![limit as i64], record_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }
}

fn ts(at: NaiveDateTime) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_user(idx: usize, raw: &str) -> rusqlite::Result<UserId> {
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<ProgressionRecord> {
    let user_id: String = row.get(0)?;
    let last_active: Option<String> = row.get(6)?;
    let created_at: String = row.get(7)?;
    Ok(ProgressionRecord {
        user_id: parse_user(0, &user_id)?,
        username: row.get(1)?,
        xp: row.get::<_, i64>(2)? as u64,
        level: row.get::<_, i64>(3)? as u32,
        total_time_minutes: row.get::<_, i64>(4)? as u64,
        current_streak: row.get::<_, i64>(5)? as u32,
        last_active: last_active.as_deref().map(|s| parse_ts(6, s)).transpose()?,
        created_at: parse_ts(7, &created_at)?,
    })
}

impl ProgressionStore for SqliteProgressionStore {
    fn get_record(&self, user_id: UserId) -> Result<Option<ProgressionRecord>> {
        let conn = self.conn()?;
        let record = conn
            .query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM users WHERE user_id = ?1"),
                params![user_id.to_string()],
                record_from_row,
            )
            .optional()?;
        Ok(record)
    }

    fn create_record(
        &self,
        user_id: UserId,
        username: &str,
        now: NaiveDateTime,
    ) -> Result<ProgressionRecord> {
        self.conn()?.execute(
            "INSERT OR IGNORE INTO users (user_id, username, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)",
            params![user_id.to_string(), username, ts(now)],
        )?;
        self.get_record(user_id)?
            .ok_or_else(|| anyhow!("user {user_id} missing right after insert"))
    }

    fn update_streak(
        &self,
        user_id: UserId,
        streak: u32,
        last_active: NaiveDateTime,
    ) -> Result<()> {
        self.conn()?.execute(
            "UPDATE users SET current_streak = ?1, last_active = ?2, updated_at = ?2
             WHERE user_id = ?3",
            params![i64::from(streak), ts(last_active), user_id.to_string()],
        )?;
        Ok(())
    }

    fn add_time(&self, user_id: UserId, minutes: u64, now: NaiveDateTime) -> Result<u64> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE users SET total_time = total_time + ?1, updated_at = ?2 WHERE user_id = ?3",
            params![minutes as i64, ts(now), user_id.to_string()],
        )?;
        let total: i64 = conn
            .query_row(
                "SELECT total_time FROM users WHERE user_id = ?1",
                params![user_id.to_string()],
                |row| row.get(0),
            )
            .with_context(|| format!("add_time: unknown user {user_id}"))?;
        Ok(total as u64)
    }

    fn add_xp(&self, user_id: UserId, amount: u64, now: NaiveDateTime) -> Result<XpChange> {
        let conn = self.conn()?;
        let (xp, level): (i64, i64) = conn
            .query_row(
                "SELECT xp, level FROM users WHERE user_id = ?1",
                params![user_id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .with_context(|| format!("add_xp: unknown user {user_id}"))?;

        let new_xp = xp as u64 + amount;
        // Recomputed on every mutation, which also repairs rows written with a stale level.
        let new_level = level_for_xp(new_xp);
        conn.execute(
            "UPDATE users SET xp = ?1, level = ?2, updated_at = ?3 WHERE user_id = ?4",
            params![new_xp as i64, i64::from(new_level), ts(now), user_id.to_string()],
        )?;

        Ok(XpChange {
            previous_level: level as u32,
            new_level,
            new_xp,
        })
    }

    fn record_session_start(&self, user_id: UserId, joined_at: NaiveDateTime) -> Result<SessionId> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO sessions (user_id, join_time) VALUES (?1, ?2)",
            params![user_id.to_string(), ts(joined_at)],
        )?;
        Ok(SessionId(conn.last_insert_rowid()))
    }

    fn record_session_end(
        &self,
        session_id: SessionId,
        left_at: NaiveDateTime,
        duration_minutes: u64,
        xp_earned: u64,
    ) -> Result<()> {
        self.conn()?.execute(
            "UPDATE sessions SET leave_time = ?1, duration = ?2, xp_earned = ?3
             WHERE id = ?4 AND leave_time IS NULL",
            params![ts(left_at), duration_minutes as i64, xp_earned as i64, session_id.0],
        )?;
        Ok(())
    }

    fn sessions(&self, user_id: UserId, limit: usize) -> Result<Vec<SessionRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, join_time, leave_time, duration, xp_earned
             FROM sessions WHERE user_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let sessions = stmt
            .query_map(params![user_id.to_string(), limit as i64], |row| {
                let user: String = row.get(1)?;
                let join_time: String = row.get(2)?;
                let leave_time: Option<String> = row.get(3)?;
                Ok(SessionRecord {
                    id: SessionId(row.get(0)?),
                    user_id: parse_user(1, &user)?,
                    join_time: parse_ts(2, &join_time)?,
                    leave_time: leave_time.as_deref().map(|s| parse_ts(3, s)).transpose()?,
                    duration_minutes: row.get::<_, i64>(4)? as u64,
                    xp_earned: row.get::<_, i64>(5)? as u64,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(sessions)
    }

    fn has_achievement(&self, user_id: UserId, kind: &str) -> Result<bool> {
        let count: i64 = self.conn()?.query_row(
            "SELECT COUNT(*) FROM achievements WHERE user_id = ?1 AND achievement_type = ?2",
            params![user_id.to_string(), kind],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn unlock_achievement(&self, user_id: UserId, kind: &str, at: NaiveDateTime) -> Result<bool> {
        let inserted = self.conn()?.execute(
            "INSERT OR IGNORE INTO achievements (user_id, achievement_type, unlocked_at)
             VALUES (?1, ?2, ?3)",
            params![user_id.to_string(), kind, ts(at)],
        )?;
        Ok(inserted > 0)
    }

    fn achievements(&self, user_id: UserId) -> Result<Vec<UnlockedAchievement>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT achievement_type, unlocked_at FROM achievements
             WHERE user_id = ?1 ORDER BY unlocked_at DESC, id DESC",
        )?;
        let unlocked = stmt
            .query_map(params![user_id.to_string()], |row| {
                let at: String = row.get(1)?;
                Ok(UnlockedAchievement {
                    kind: row.get(0)?,
                    unlocked_at: parse_ts(1, &at)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(unlocked)
    }

    fn top_by_time(&self, limit: usize) -> Result<Vec<ProgressionRecord>> {
        self.query_records("total_time DESC", limit)
    }

    fn top_by_level(&self, limit: usize) -> Result<Vec<ProgressionRecord>> {
        self.query_records("level DESC, xp DESC", limit)
    }

    fn top_by_streak(&self, limit: usize) -> Result<Vec<ProgressionRecord>> {
        self.query_records("current_streak DESC", limit)
    }

    fn aggregate_window(&self, since: NaiveDateTime, limit: usize) -> Result<Vec<WindowStat>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT s.user_id, u.username, SUM(s.duration) AS minutes, SUM(s.xp_earned) AS xp
             FROM sessions s JOIN users u ON u.user_id = s.user_id
             WHERE s.join_time >= ?1
             GROUP BY s.user_id
             ORDER BY minutes DESC
             LIMIT ?2",
        )?;
        let stats = stmt
            .query_map(params![ts(since), limit as i64], |row| {
                let user: String = row.get(0)?;
                Ok(WindowStat {
                    user_id: parse_user(0, &user)?,
                    username: row.get(1)?,
                    minutes: row.get::<_, i64>(2)? as u64,
                    xp: row.get::<_, i64>(3)? as u64,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(stats)
    }

    fn user_count(&self) -> Result<u64> {
        let count: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn noon(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 7, day)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    #[test]
    fn create_record_is_idempotent() {
        let store = SqliteProgressionStore::in_memory().unwrap();
        let first = store.create_record(UserId(1), "alice", noon(1)).unwrap();
        assert_eq!(first.level, 1);
        assert_eq!(first.xp, 0);
        assert_eq!(first.last_active, None);

        let again = store.create_record(UserId(1), "renamed", noon(2)).unwrap();
        assert_eq!(again.username, "alice");
        assert_eq!(store.user_count().unwrap(), 1);
    }

    #[test]
    fn add_xp_recomputes_level() {
        let store = SqliteProgressionStore::in_memory().unwrap();
        store.create_record(UserId(1), "alice", noon(1)).unwrap();
        let change = store.add_xp(UserId(1), 2499, noon(1)).unwrap();
        assert_eq!(change.new_level, 5);
        let change = store.add_xp(UserId(1), 1, noon(1)).unwrap();
        assert_eq!(change.previous_level, 5);
        assert_eq!(change.new_level, 6);
        assert!(change.leveled_up());
    }

    #[test]
    fn add_xp_repairs_stale_level() {
        let store = SqliteProgressionStore::in_memory().unwrap();
        store.create_record(UserId(1), "alice", noon(1)).unwrap();
        store
            .conn()
            .unwrap()
            .execute("UPDATE users SET xp = 900, level = 1 WHERE user_id = '1'", [])
            .unwrap();

        let change = store.add_xp(UserId(1), 0, noon(1)).unwrap();
        assert_eq!(change.new_level, 4);
        assert_eq!(store.get_record(UserId(1)).unwrap().unwrap().level, 4);
    }

    #[test]
    fn add_xp_for_unknown_user_fails() {
        let store = SqliteProgressionStore::in_memory().unwrap();
        assert!(store.add_xp(UserId(404), 10, noon(1)).is_err());
    }

    #[test]
    fn unlock_is_unique_per_kind() {
        let store = SqliteProgressionStore::in_memory().unwrap();
        store.create_record(UserId(1), "alice", noon(1)).unwrap();
        assert!(store.unlock_achievement(UserId(1), "MARATHON", noon(1)).unwrap());
        assert!(!store.unlock_achievement(UserId(1), "MARATHON", noon(2)).unwrap());
        assert!(store.has_achievement(UserId(1), "MARATHON").unwrap());
        assert_eq!(store.achievements(UserId(1)).unwrap().len(), 1);
    }

    #[test]
    fn session_lifecycle_is_written_once() {
        let store = SqliteProgressionStore::in_memory().unwrap();
        store.create_record(UserId(1), "alice", noon(1)).unwrap();
        let id = store.record_session_start(UserId(1), noon(1)).unwrap();
        store
            .record_session_end(id, noon(1) + Duration::minutes(45), 45, 45)
            .unwrap();
        // A second close is ignored.
        store
            .record_session_end(id, noon(1) + Duration::minutes(90), 90, 90)
            .unwrap();

        let sessions = store.sessions(UserId(1), 10).unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].duration_minutes, 45);
        assert_eq!(sessions[0].leave_time, Some(noon(1) + Duration::minutes(45)));
    }

    #[test]
    fn leaderboards_order_rows() {
        let store = SqliteProgressionStore::in_memory().unwrap();
        for (id, name, minutes, xp, streak) in [
            (1, "alice", 300, 2600, 2),
            (2, "bob", 900, 2550, 9),
            (3, "carol", 10, 100, 1),
        ] {
            store.create_record(UserId(id), name, noon(1)).unwrap();
            store.add_time(UserId(id), minutes, noon(1)).unwrap();
            store.add_xp(UserId(id), xp, noon(1)).unwrap();
            store.update_streak(UserId(id), streak, noon(1)).unwrap();
        }

        let by_time: Vec<_> = store.top_by_time(2).unwrap().into_iter().map(|r| r.username).collect();
        assert_eq!(by_time, vec!["bob", "alice"]);

        let by_level: Vec<_> = store.top_by_level(3).unwrap().into_iter().map(|r| r.username).collect();
        assert_eq!(by_level, vec!["alice", "bob", "carol"]);

        let by_streak = store.top_by_streak(1).unwrap();
        assert_eq!(by_streak[0].username, "bob");
    }

    #[test]
    fn aggregate_window_filters_old_sessions() {
        let store = SqliteProgressionStore::in_memory().unwrap();
        store.create_record(UserId(1), "alice", noon(1)).unwrap();
        for (day, minutes) in [(1, 100), (8, 30), (9, 20)] {
            let id = store.record_session_start(UserId(1), noon(day)).unwrap();
            store.record_session_end(id, noon(day), minutes, minutes).unwrap();
        }

        let stats = store.aggregate_window(noon(3), 10).unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].minutes, 50);
        assert_eq!(stats[0].xp, 50);
    }
}
