mod reset;
mod setup;
mod status;
mod sync;
mod watch;

pub use reset::cmd_reset;
pub use setup::cmd_setup;
pub use status::cmd_status;
pub use sync::{cmd_sync, cmd_sync_all};
pub use watch::cmd_watch;
