//! Text-level operations on the persisted mount table (`/etc/fstab`).
//!
//! The table is treated as opaque text: entries are never parsed, membership is
//! decided by substring containment and new entries are appended at the end.
//! Callers read the whole table, transform it with these functions and write
//! it back in one piece.

use std::path::{Path, PathBuf};

use autodisk_api::constants::{
    DATA_FILESYSTEM, DATA_MOUNT_OPTIONS, LEGACY_RESOURCE_ENTRY, LEGACY_RESOURCE_ENTRY_NETDEV,
};

/// A mount table entry for a provisioned data partition, identified by its
/// filesystem UUID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabFileEntry {
    pub uuid: String,
    pub mount_point: PathBuf,
}

impl TabFileEntry {
    pub fn new(uuid: impl Into<String>, mount_point: impl Into<PathBuf>) -> Self {
        Self {
            uuid: uuid.into(),
            mount_point: mount_point.into(),
        }
    }

    /// Render this entry as a line suitable for writing to the mount table.
    pub fn render(&self) -> String {
        format!(
            "UUID={} {}          {}    {} 0 0\n",
            self.uuid,
            self.mount_point.display(),
            DATA_FILESYSTEM,
            DATA_MOUNT_OPTIONS,
        )
    }
}

/// Renders the managed mount table line for `uuid` mounted at `mount_point`.
pub fn managed_entry(uuid: &str, mount_point: &Path) -> String {
    TabFileEntry::new(uuid, mount_point).render()
}

/// Returns whether `uuid` appears anywhere in the mount table text. An empty
/// UUID is never registered.
pub fn is_registered(uuid: &str, contents: &str) -> bool {
    !uuid.is_empty() && contents.contains(uuid)
}

/// Removes the legacy cloud-init resource disk entries, leaving every other
/// line untouched.
pub fn strip_legacy_entries(contents: &str) -> String {
    contents
        .replace(LEGACY_RESOURCE_ENTRY, "")
        .replace(LEGACY_RESOURCE_ENTRY_NETDEV, "")
}

/// Returns the mount table text with an entry for `uuid` mounted at
/// `mount_point` appended. A missing newline at the end of the existing text
/// is added first.
pub fn append_entry(contents: &str, uuid: &str, mount_point: &Path) -> String {
    let entry = managed_entry(uuid, mount_point);

    let mut updated = String::with_capacity(contents.len() + entry.len() + 1);
    updated.push_str(contents);
    if !updated.is_empty() && !updated.ends_with('\n') {
        updated.push('\n');
    }
    updated.push_str(&entry);
    updated
}
