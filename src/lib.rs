pub mod classifier;
pub mod cli;
pub mod engine;
mod logging;
pub mod registry;

pub use engine::{
    check_dependencies, Host, ProvisionReport, ProvisionedDisk, Provisioner, SystemHost,
};
pub use logging::{background_log::BackgroundLog, multilog::MultiLogger};

/// autodisk version as provided by environment variables at build time
pub const AUTODISK_VERSION: &str = match option_env!("AUTODISK_VERSION") {
    Some(v) => v,
    None => env!("CARGO_PKG_VERSION"),
};
