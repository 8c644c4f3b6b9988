//! Command implementations for the CLI.

mod config;
mod provision;
mod scan;
mod status;
mod watch;

pub use config::cmd_config;
pub use provision::{ProvisionArgs, cmd_provision};
pub use scan::cmd_scan;
pub use status::cmd_status;
pub use watch::cmd_watch;
