//! Read-only progression commands and `init-config`.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use afkwarden_config::{starter_config, write_config, AfkWardenConfig};
use afkwarden_core::{SystemClock, UserId};
use afkwarden_progression::{
    role_reward, Leaderboards, ProgressionEngine, ProgressionRecord, SqliteProgressionStore,
    UserProfile, WindowStat,
};

use crate::terminal_output::{note_info, note_success, note_warn, render_table, Column, BOLD, RESET};

fn open_engine(config: &AfkWardenConfig, dir: &Path) -> Result<ProgressionEngine> {
    let path = crate::db_path(config, dir);
    let store = SqliteProgressionStore::open(&path.to_string_lossy())
        .with_context(|| format!("open progression database {}", path.display()))?;
    Ok(ProgressionEngine::new(Arc::new(store), Arc::new(SystemClock)))
}

pub async fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        note_warn(&format!(
            "{} already exists; pass --force to overwrite it",
            path.display()
        ));
        return Ok(());
    }
    write_config(&starter_config(), path).await?;
    note_success(&format!("Wrote {}", path.display()));
    note_info("Set DISCORD_TOKEN in the environment, then run `afkwarden serve`");
    Ok(())
}

pub fn profile(config: &AfkWardenConfig, dir: &Path, user_id: &str, json: bool) -> Result<()> {
    let user_id: UserId = user_id
        .parse()
        .with_context(|| format!("'{user_id}' is not a Discord user id"))?;
    let engine = open_engine(config, dir)?;
    match engine.profile(user_id)? {
        Some(profile) if json => println!("{}", serde_json::to_string_pretty(&profile)?),
        Some(profile) => print!("{}", render_profile(&profile)),
        None => note_warn(&format!("No progression recorded for {user_id}")),
    }
    Ok(())
}

pub fn leaderboard(config: &AfkWardenConfig, dir: &Path, limit: usize) -> Result<()> {
    let engine = open_engine(config, dir)?;
    print!("{}", render_leaderboards(&engine.leaderboards(limit)?));
    Ok(())
}

fn hours(minutes: u64) -> String {
    format!("{}h {:02}m", minutes / 60, minutes % 60)
}

pub fn render_profile(profile: &UserProfile) -> String {
    let r = &profile.record;
    let mut out = format!("\n{BOLD}{}{RESET} ({})\n\n", r.username, r.user_id);
    out.push_str(&format!(
        "  Level {}  ({} / {} XP into next level)\n",
        r.level, profile.xp_progress, profile.xp_for_next_level
    ));
    if let Some(role) = role_reward(r.level) {
        out.push_str(&format!("  Role:    {role}\n"));
    }
    out.push_str(&format!("  XP:      {}\n", r.xp));
    out.push_str(&format!("  Voice:   {}\n", hours(r.total_time_minutes)));
    out.push_str(&format!(
        "  Streak:  {} day(s), x{:.2} XP\n",
        r.current_streak, profile.multiplier
    ));
    out.push_str(&format!("  Since:   {}\n", r.created_at.format("%Y-%m-%d")));

    if !profile.achievements.is_empty() {
        out.push_str(&format!("\n{BOLD}Achievements{RESET}\n"));
        let rows: Vec<Vec<String>> = profile
            .achievements
            .iter()
            .map(|a| {
                vec![
                    a.name.clone(),
                    a.description.clone(),
                    a.unlocked_at.format("%Y-%m-%d %H:%M").to_string(),
                ]
            })
            .collect();
        out.push_str(&render_table(
            &[Column::left("Name"), Column::left("Description"), Column::left("Unlocked")],
            &rows,
        ));
    }

    if !profile.recent_sessions.is_empty() {
        out.push_str(&format!("\n{BOLD}Recent sessions{RESET}\n"));
        let rows: Vec<Vec<String>> = profile
            .recent_sessions
            .iter()
            .map(|s| {
                vec![
                    s.join_time.format("%Y-%m-%d %H:%M").to_string(),
                    s.leave_time
                        .map(|t| t.format("%H:%M").to_string())
                        .unwrap_or_else(|| "open".into()),
                    hours(s.duration_minutes),
                    s.xp_earned.to_string(),
                ]
            })
            .collect();
        out.push_str(&render_table(
            &[
                Column::left("Joined"),
                Column::left("Left"),
                Column::right("Time"),
                Column::right("XP"),
            ],
            &rows,
        ));
    }
    out
}

fn record_table(title: &str, records: &[ProgressionRecord], value: impl Fn(&ProgressionRecord) -> String) -> String {
    let rows: Vec<Vec<String>> = records
        .iter()
        .enumerate()
        .map(|(i, r)| vec![format!("{}", i + 1), r.username.clone(), value(r)])
        .collect();
    format!(
        "\n{BOLD}{title}{RESET}\n{}",
        render_table(&[Column::right("#"), Column::left("Member"), Column::right(title)], &rows)
    )
}

fn window_table(title: &str, stats: &[WindowStat]) -> String {
    let rows: Vec<Vec<String>> = stats
        .iter()
        .enumerate()
        .map(|(i, s)| {
            vec![
                format!("{}", i + 1),
                s.username.clone(),
                hours(s.minutes),
                s.xp.to_string(),
            ]
        })
        .collect();
    format!(
        "\n{BOLD}{title}{RESET}\n{}",
        render_table(
            &[
                Column::right("#"),
                Column::left("Member"),
                Column::right("Time"),
                Column::right("XP"),
            ],
            &rows
        )
    )
}

pub fn render_leaderboards(boards: &Leaderboards) -> String {
    let mut out = String::new();
    out.push_str(&record_table("Voice time", &boards.by_time, |r| hours(r.total_time_minutes)));
    out.push_str(&record_table("Level", &boards.by_level, |r| {
        format!("{} ({} XP)", r.level, r.xp)
    }));
    out.push_str(&record_table("Streak", &boards.by_streak, |r| {
        format!("{} day(s)", r.current_streak)
    }));
    out.push_str(&window_table("This week", &boards.weekly));
    out.push_str(&window_table("This month", &boards.monthly));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terminal_output::strip_ansi;
    use std::time::Duration;

    fn engine_with_history() -> ProgressionEngine {
        let store = SqliteProgressionStore::in_memory().unwrap();
        let mut engine = ProgressionEngine::new(Arc::new(store), Arc::new(SystemClock));
        engine.on_join(UserId(1), "alice").unwrap();
        engine.on_leave(UserId(1), Duration::from_secs(365 * 60)).unwrap();
        engine.on_join(UserId(2), "bob").unwrap();
        engine.on_leave(UserId(2), Duration::from_secs(10 * 60)).unwrap();
        engine
    }

    #[test]
    fn profile_shows_level_and_time() {
        let engine = engine_with_history();
        let profile = engine.profile(UserId(1)).unwrap().unwrap();
        let text = strip_ansi(&render_profile(&profile));
        assert!(text.contains("alice (1)"));
        assert!(text.contains("Level 2"));
        assert!(text.contains("6h 05m"));
        assert!(text.contains("Marathon"));
    }

    #[test]
    fn leaderboards_rank_by_time() {
        let engine = engine_with_history();
        let text = strip_ansi(&render_leaderboards(&engine.leaderboards(10).unwrap()));
        let alice = text.find("alice").unwrap();
        let bob = text.find("bob").unwrap();
        assert!(alice < bob);
        assert!(text.contains("This week"));
    }

    #[test]
    fn hours_pad_minutes() {
        assert_eq!(hours(61), "1h 01m");
        assert_eq!(hours(0), "0h 00m");
    }
}
