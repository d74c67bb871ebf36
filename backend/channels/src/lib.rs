pub mod discord;

pub use discord::{DiscordAdapter, DiscordNotifier, Handler, CONFIRM_MARKER};
