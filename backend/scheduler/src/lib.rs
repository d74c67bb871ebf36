pub mod delivery;
pub mod timers;

pub use delivery::{DeliveryQueue, DEFAULT_SPACING};
pub use timers::{TimerFired, TimerKey, TimerPurpose, TimerScheduler};
