pub mod admission;
pub mod destination;
pub mod handle;
pub mod mock;
pub mod settings;
pub mod state;
pub mod watchdog;

pub use admission::{Admission, AdmissionController};
pub use destination::select_destination;
pub use handle::{Mailbox, WatchdogHandle, WatchdogInput};
pub use mock::{MockCall, MockChannel};
pub use settings::WatchdogSettings;
pub use state::{WatchdogStats, WatchedUserView};
pub use watchdog::{Watchdog, CONFIRM_CLEANUP_DELAY, KICK_CLEANUP_DELAY};
