pub mod clock;
pub mod error;
pub mod event;
pub mod traits;
pub mod types;

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::WardenError;
pub use event::{EventKind, WatchdogEvent};
pub use traits::NotificationChannel;
pub use types::{ChannelId, GuildId, MessageId, MessageRef, SessionLocation, TextChannelInfo, UserId};
