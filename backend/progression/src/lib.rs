pub mod achievements;
pub mod engine;
pub mod level;
pub mod sqlite_store;
pub mod store;

pub use achievements::{AchievementDef, AchievementRegistry, SessionContext};
pub use engine::{
    AchievementUnlock, JoinOutcome, LeaveOutcome, Leaderboards, LevelUp, ProgressionEngine,
    UserProfile, LEADERBOARD_SIZE,
};
pub use level::{level_for_xp, role_reward, xp_for_session, StreakMultiplier};
pub use sqlite_store::SqliteProgressionStore;
pub use store::{ProgressionRecord, ProgressionStore, SessionId, WindowStat, XpChange};
