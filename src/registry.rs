use std::path::{Path, PathBuf};

use anyhow::Error;
use log::{debug, info};

use autodisk_api::error::{AutodiskError, ProvisioningError, ReportError};
use osutils::tabfile;

use crate::engine::Host;

/// Returns the first mount point `<prefix>01`, `<prefix>02`, ... up to
/// `<prefix><max>` that is not currently a mount point.
pub fn next_mount_path(
    prefix: &str,
    max: u32,
    mut is_mounted: impl FnMut(&Path) -> Result<bool, Error>,
) -> Result<PathBuf, AutodiskError> {
    for index in 1..=max {
        let candidate = PathBuf::from(format!("{prefix}{index:02}"));
        if !is_mounted(&candidate).structured(ProvisioningError::AllocateMountPoint)? {
            return Ok(candidate);
        }
        debug!("'{}' is already in use", candidate.display());
    }

    Err(AutodiskError::new(ProvisioningError::AllocateMountPoint))
}

/// In-memory copy of the persisted mount table.
///
/// The table is loaded in full, edited as text and written back in one piece
/// by [`MountRegistry::commit`], only if something changed.
#[derive(Debug)]
pub struct MountRegistry {
    path: PathBuf,
    original: String,
    contents: String,
}

impl MountRegistry {
    pub fn load(host: &impl Host, path: impl Into<PathBuf>) -> Result<Self, AutodiskError> {
        let path = path.into();
        let contents = host
            .read_mount_table(&path)
            .structured(ProvisioningError::ReadMountTable {
                path: path.to_string_lossy().to_string(),
            })?;

        Ok(Self {
            path,
            original: contents.clone(),
            contents,
        })
    }

    pub fn contents(&self) -> &str {
        &self.contents
    }

    pub fn is_registered(&self, uuid: &str) -> bool {
        tabfile::is_registered(uuid, &self.contents)
    }

    /// Drops the legacy resource disk entries.
    pub fn strip_legacy_entries(&mut self) {
        self.contents = tabfile::strip_legacy_entries(&self.contents);
    }

    pub fn register(&mut self, uuid: &str, mount_point: &Path) {
        self.contents = tabfile::append_entry(&self.contents, uuid, mount_point);
    }

    pub fn is_modified(&self) -> bool {
        self.contents != self.original
    }

    /// Writes the table back if it was modified. Returns whether a write
    /// happened.
    pub fn commit(self, host: &mut impl Host) -> Result<bool, AutodiskError> {
        if !self.is_modified() {
            return Ok(false);
        }

        host.write_mount_table(&self.path, &self.contents)
            .structured(ProvisioningError::WriteMountTable {
                path: self.path.to_string_lossy().to_string(),
            })?;
        info!("Updated mount table '{}'", self.path.display());

        Ok(true)
    }
}
