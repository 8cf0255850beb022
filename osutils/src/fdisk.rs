use std::path::Path;

use strum_macros::IntoStaticStr;

use crate::dependencies::{CommandOutput, Dependency, DependencyError};

/// Partition table label written to a disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum PartitionTable {
    /// GUID Partition Table
    Gpt,

    /// Master Boot Record
    Mbr,
}

impl PartitionTable {
    /// Keystrokes that make an interactive `fdisk` session create a new label
    /// with a single partition spanning the whole disk, accepting the default
    /// first and last sectors, and write it.
    pub fn script(self) -> &'static str {
        match self {
            // new GPT label, new partition 1, default start, default end, write
            PartitionTable::Gpt => "g\nn\n1\n\n\nw\n",
            // new DOS label, new primary partition 1, default start, default end, write
            PartitionTable::Mbr => "o\nn\np\n1\n\n\nw\n",
        }
    }

    pub fn name(self) -> &'static str {
        self.into()
    }
}

impl std::fmt::Display for PartitionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Replaces the partition table of `disk` with a `table` label holding one
/// partition that spans the disk.
///
/// Returns the output of fdisk without checking its exit status: fdisk
/// reports failure when the kernel cannot re-read a busy partition table even
/// though the new table was written, so callers decide what a non-zero exit
/// means. Failing to start fdisk is an error.
pub fn create_single_partition(
    disk: impl AsRef<Path>,
    table: PartitionTable,
) -> Result<CommandOutput, Box<DependencyError>> {
    Dependency::Fdisk
        .cmd()
        .arg(disk.as_ref())
        .stdin_bytes(table.script())
        .output()
}
