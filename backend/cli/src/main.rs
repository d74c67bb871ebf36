mod doctor_cmd;
mod inspect_cmd;
mod serve_cmd;
mod terminal_output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use afkwarden_config::{config_dir, config_file_path, load_and_prepare, resolve_relative, AfkWardenConfig};
use afkwarden_progression::LEADERBOARD_SIZE;

#[derive(Parser)]
#[command(name = "afkwarden")]
#[command(about = "afkwarden: voice presence watchdog with XP and achievements")]
#[command(version)]
struct Cli {
    /// Config directory (defaults to $AFKWARDEN_CONFIG_DIR or ~/.afkwarden)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to Discord and start watching voice channels
    Serve,
    /// Show a member's level, XP, streak and achievements
    Profile {
        /// Discord user id
        user_id: String,
        /// Print the raw profile as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the leaderboards
    Leaderboard {
        #[arg(short, long, default_value_t = LEADERBOARD_SIZE)]
        limit: usize,
    },
    /// Write a starter config file
    InitConfig {
        /// Overwrite an existing file (the old one is kept as a backup)
        #[arg(long)]
        force: bool,
    },
    /// Check config, token and database
    Doctor,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let dir = cli.config_dir.unwrap_or_else(config_dir);
    let path = config_file_path(&dir);

    match cli.command {
        Commands::InitConfig { force } => inspect_cmd::init_config(&path, force).await,
        Commands::Doctor => doctor_cmd::run(&dir).await,
        command => {
            let config = load_and_prepare(&path).await?;
            init_logging(&config, &dir);
            match command {
                Commands::Serve => serve_cmd::run(config, &dir).await,
                Commands::Profile { user_id, json } => {
                    inspect_cmd::profile(&config, &dir, &user_id, json)
                }
                Commands::Leaderboard { limit } => inspect_cmd::leaderboard(&config, &dir, limit),
                Commands::InitConfig { .. } | Commands::Doctor => Ok(()),
            }
        }
    }
}

fn init_logging(config: &AfkWardenConfig, dir: &std::path::Path) {
    let logging = config.logging.clone().unwrap_or_default();
    let level = logging.level.as_deref().unwrap_or("info");
    let log_dir = logging.dir.map(|d| resolve_relative(dir, &d));
    afkwarden_logging::init_logger(log_dir.as_deref(), level);
}

/// Database path from config, relative to the config directory.
pub(crate) fn db_path(config: &AfkWardenConfig, dir: &std::path::Path) -> PathBuf {
    let db = config
        .progression
        .as_ref()
        .and_then(|p| p.db_path.as_deref())
        .unwrap_or(afkwarden_config::defaults::DEFAULT_DB_PATH);
    resolve_relative(dir, db)
}
