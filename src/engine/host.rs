use std::{
    fs, io,
    path::{Path, PathBuf},
};

use anyhow::{Context, Error};
use log::debug;

use autodisk_api::{
    config::AutodiskConfig,
    constants::{DATA_FILESYSTEM, DATA_MOUNT_FLAGS},
    error::{AutodiskError, ExecutionEnvironmentMisconfigurationError, ReportError},
};
use osutils::{
    dependencies::DependencyError,
    fdisk::{self, PartitionTable},
    files,
    lspci::PciInventory,
    mkfs, mount, mountpoint,
    sysfs::{Blkid, BlockDeviceScanner, Device},
    udevadm,
};

/// Mode of a newly created mount table.
const MOUNT_TABLE_MODE: u32 = 0o644;

/// Every interaction of the provisioning engine with the machine.
pub trait Host {
    /// Takes a fresh snapshot of the physical block devices, or of `target`
    /// only.
    fn scan(&self, target: Option<&str>) -> Result<Vec<Device>, Error>;

    /// Writes a `table` label with one partition spanning `disk`. A non-zero
    /// exit of the partitioner is reported as `ExecutionFailed`.
    fn partition(
        &mut self,
        disk: &Path,
        table: PartitionTable,
    ) -> Result<(), Box<DependencyError>>;

    /// Waits for the device manager to process pending events.
    fn settle(&mut self) -> Result<(), Box<DependencyError>>;

    fn format(&mut self, partition: &Path) -> Result<(), Box<DependencyError>>;

    fn read_mount_table(&self, path: &Path) -> Result<String, Error>;

    fn write_mount_table(&mut self, path: &Path, contents: &str) -> Result<(), Error>;

    fn is_mount_point(&self, path: &Path) -> Result<bool, Error>;

    /// Creates the directory `path` unless it already exists.
    fn ensure_directory(&mut self, path: &Path) -> Result<(), Error>;

    fn mount(&mut self, partition: &Path, mount_point: &Path) -> Result<(), Box<DependencyError>>;
}

/// The machine autodisk runs on.
pub struct SystemHost {
    block_root: PathBuf,
    dev_root: PathBuf,
    inventory: PciInventory,
}

impl SystemHost {
    /// Loads the PCI controller inventory used to describe scanned disks.
    pub fn new(config: &AutodiskConfig) -> Result<Self, AutodiskError> {
        let inventory = PciInventory::load()
            .structured(ExecutionEnvironmentMisconfigurationError::ControllerInventory)?;

        Ok(Self {
            block_root: config.sysfs_block.clone(),
            dev_root: config.dev_root.clone(),
            inventory,
        })
    }
}

impl Host for SystemHost {
    fn scan(&self, target: Option<&str>) -> Result<Vec<Device>, Error> {
        let scanner = BlockDeviceScanner::new(
            &self.block_root,
            &self.dev_root,
            self.inventory.clone(),
            &Blkid,
        );
        let devices = scanner.scan(target)?;

        for device in &devices {
            debug!(
                "Found {device}: vendor '{}', model '{}', controller {:?}, holders {:?}",
                device.vendor, device.model, device.controller, device.holders
            );
        }

        Ok(devices)
    }

    fn partition(
        &mut self,
        disk: &Path,
        table: PartitionTable,
    ) -> Result<(), Box<DependencyError>> {
        fdisk::create_single_partition(disk, table)?.check()
    }

    fn settle(&mut self) -> Result<(), Box<DependencyError>> {
        udevadm::settle()
    }

    fn format(&mut self, partition: &Path) -> Result<(), Box<DependencyError>> {
        mkfs::run(partition, DATA_FILESYSTEM)
    }

    fn read_mount_table(&self, path: &Path) -> Result<String, Error> {
        match fs::read_to_string(path) {
            Ok(contents) => Ok(contents),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Mount table '{}' does not exist yet", path.display());
                Ok(String::new())
            }
            Err(e) => Err(e).with_context(|| format!("Failed to read '{}'", path.display())),
        }
    }

    fn write_mount_table(&mut self, path: &Path, contents: &str) -> Result<(), Error> {
        files::replace_file(path, MOUNT_TABLE_MODE, contents.as_bytes())
    }

    fn is_mount_point(&self, path: &Path) -> Result<bool, Error> {
        mountpoint::check_is_mountpoint(path)
    }

    fn ensure_directory(&mut self, path: &Path) -> Result<(), Error> {
        mount::ensure_mount_directory(path)
    }

    fn mount(&mut self, partition: &Path, mount_point: &Path) -> Result<(), Box<DependencyError>> {
        mount::mount(partition, mount_point, DATA_FILESYSTEM, &[DATA_MOUNT_FLAGS])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::TempDir;

    fn host() -> SystemHost {
        SystemHost {
            block_root: "/sys/block".into(),
            dev_root: "/dev".into(),
            inventory: PciInventory::default(),
        }
    }

    #[test]
    fn test_mount_table_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fstab");
        let mut host = host();

        // A missing table reads as empty
        assert_eq!(host.read_mount_table(&path).unwrap(), "");

        host.write_mount_table(&path, "# fstab\n").unwrap();
        assert_eq!(host.read_mount_table(&path).unwrap(), "# fstab\n");

        // Directories cannot be read as a table
        assert!(host.read_mount_table(dir.path()).is_err());
    }

    #[test]
    fn test_ensure_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mnt").join("volume_01");
        let mut host = host();

        host.ensure_directory(&path).unwrap();
        assert!(path.is_dir());

        // Existing directories are left alone
        host.ensure_directory(&path).unwrap();
    }
}
