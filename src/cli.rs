use clap::Parser;

use crate::AUTODISK_VERSION;

/// Partition, format, register and mount every unpartitioned data disk above
/// the size threshold.
#[derive(Parser, Debug)]
#[clap(version = AUTODISK_VERSION)]
pub struct Cli {
    /// Only consider this device (e.g. sdb or /dev/sdb) instead of every
    /// physical disk
    #[clap(index = 1, value_name = "DEVICE")]
    pub device: Option<String>,
}
