//! Discovery of physical block devices from the kernel's sysfs block tree.
//!
//! Every scan re-reads the tree and produces a fresh snapshot; nothing is
//! cached between scans.

use std::{
    fmt::{self, Display},
    fs, io,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Error};
use log::{debug, trace};
use regex::Regex;

use crate::{blkid, files, lspci::PciInventory};

/// Extracts the PCI address of the storage controller from a device path such
/// as `.../0000:00:10.0/host2/target2:0:1/...`.
const CONTROLLER_PATTERN: &str = r".+/\d+:(\w+:\w+\.\w)/host\d+/";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SysfsError {
    #[error("Invalid device name '{0}'")]
    InvalidDevice(String),
}

/// Rotation class reported by `queue/rotational`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotational {
    Spinning,
    SolidState,
    #[default]
    Unknown,
}

/// One block device, disk or partition, as read from sysfs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    /// Kernel name, e.g. `sdb` or `sdb1`.
    pub name: String,

    /// Directory the device was read from.
    pub sys_path: PathBuf,

    /// Whether the device was resolved without per-device symlinks.
    pub compat_mode: bool,

    /// Size in sectors, 0 if unknown.
    pub sector_count: u64,

    /// Sector size in bytes.
    pub sector_size: u64,

    /// First sector of a partition.
    pub start_sector: Option<u64>,

    pub rotational: Rotational,
    pub removable: bool,
    pub supports_discard: bool,
    pub vendor: String,
    pub model: String,

    /// Description of the storage controller, if it could be resolved.
    pub controller: Option<String>,

    /// Names of the devices built on top of this one.
    pub holders: Vec<String>,

    partitions: Vec<Device>,
    filesystem_uuids: Vec<String>,
}

impl Device {
    /// Creates a device record with every attribute at its default.
    pub fn new(name: impl Into<String>, sys_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            sys_path: sys_path.into(),
            compat_mode: false,
            sector_count: 0,
            sector_size: 512,
            start_sector: None,
            rotational: Rotational::Unknown,
            removable: false,
            supports_discard: false,
            vendor: String::new(),
            model: String::new(),
            controller: None,
            holders: Vec::new(),
            partitions: Vec::new(),
            filesystem_uuids: Vec::new(),
        }
    }

    pub fn with_geometry(mut self, sector_count: u64, sector_size: u64) -> Self {
        self.sector_count = sector_count;
        self.sector_size = sector_size;
        self
    }

    /// Adds a partition together with the UUID it was identified by.
    pub fn with_partition(mut self, partition: Device, uuid: impl Into<String>) -> Self {
        self.partitions.push(partition);
        self.filesystem_uuids.push(uuid.into());
        self
    }

    pub fn partitions(&self) -> &[Device] {
        &self.partitions
    }

    /// UUIDs of the partitions; `filesystem_uuids()[i]` belongs to
    /// `partitions()[i]`.
    pub fn filesystem_uuids(&self) -> &[String] {
        &self.filesystem_uuids
    }

    /// Iterates over the partitions paired with their UUIDs.
    pub fn partition_uuids(&self) -> impl Iterator<Item = (&Device, &str)> {
        self.partitions
            .iter()
            .zip(self.filesystem_uuids.iter().map(String::as_str))
    }

    pub fn size_bytes(&self) -> u64 {
        self.sector_count.saturating_mul(self.sector_size)
    }

    pub fn size_gib(&self) -> f64 {
        self.size_bytes() as f64 / (1024.0 * 1024.0 * 1024.0)
    }

    /// Path of the device node under `dev_root`.
    pub fn dev_path(&self, dev_root: impl AsRef<Path>) -> PathBuf {
        dev_root.as_ref().join(&self.name)
    }
}

impl Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({:.1} GiB, {} partition(s))",
            self.name,
            self.size_gib(),
            self.partitions.len()
        )
    }
}

/// Source of the identifier recorded for each partition.
pub trait UuidResolver {
    fn resolve(&self, device_path: &Path) -> Result<String, Error>;
}

/// Identifies partitions with `blkid`.
pub struct Blkid;

impl UuidResolver for Blkid {
    fn resolve(&self, device_path: &Path) -> Result<String, Error> {
        blkid::get_uuid(device_path)
    }
}

/// Builds device snapshots from a sysfs block directory.
pub struct BlockDeviceScanner<'a> {
    block_root: PathBuf,
    dev_root: PathBuf,
    inventory: PciInventory,
    resolver: &'a dyn UuidResolver,
}

impl<'a> BlockDeviceScanner<'a> {
    pub fn new(
        block_root: impl Into<PathBuf>,
        dev_root: impl Into<PathBuf>,
        inventory: PciInventory,
        resolver: &'a dyn UuidResolver,
    ) -> Self {
        Self {
            block_root: block_root.into(),
            dev_root: dev_root.into(),
            inventory,
            resolver,
        }
    }

    /// Scans the physical block devices, or only `target` when given.
    ///
    /// `target` may be a kernel name (`sdb`) or a device path (`/dev/sdb`); a
    /// partition path selects its disk. An unknown `target` is an error.
    pub fn scan(&self, target: Option<&str>) -> Result<Vec<Device>, Error> {
        match target {
            Some(target) => Ok(vec![self.scan_target(target)?]),
            None => self.scan_all(),
        }
    }

    fn scan_all(&self) -> Result<Vec<Device>, Error> {
        let mut names = fs::read_dir(&self.block_root)
            .with_context(|| format!("Failed to list '{}'", self.block_root.display()))?
            .map(|entry| entry.map(|e| e.file_name().to_string_lossy().to_string()))
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("Failed to list '{}'", self.block_root.display()))?;
        names.sort();

        let mut compat_mode = false;
        let mut devices = Vec::new();
        for name in names {
            let relative = if compat_mode {
                PathBuf::from(&name)
            } else {
                match fs::read_link(self.block_root.join(&name)) {
                    Ok(link) => link,
                    Err(e) if e.kind() == io::ErrorKind::InvalidInput => {
                        debug!("'{name}' is not a symlink, switching to compat mode");
                        compat_mode = true;
                        PathBuf::from(&name)
                    }
                    Err(e) => {
                        debug!("Skipping '{name}': {e}");
                        continue;
                    }
                }
            };

            if relative.to_string_lossy().contains("virtual") {
                trace!("Skipping virtual device '{name}'");
                continue;
            }

            let sys_path = self.block_root.join(&relative);
            if compat_mode && !has_device_entry(&sys_path) {
                trace!("Skipping virtual device '{name}'");
                continue;
            }

            devices.push(self.read_device(&sys_path, compat_mode)?);
        }

        Ok(devices)
    }

    fn scan_target(&self, target: &str) -> Result<Device, Error> {
        let name = self.block_name(target)?;

        let (sys_path, compat_mode) = match fs::read_link(self.block_root.join(&name)) {
            Ok(link) => (self.block_root.join(link), false),
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => {
                (self.block_root.join(&name), true)
            }
            Err(e) => {
                return Err(Error::new(e).context(SysfsError::InvalidDevice(target.into())))
            }
        };

        self.read_device(&sys_path, compat_mode)
    }

    /// Maps a user supplied device name to an entry of the block directory.
    fn block_name(&self, target: &str) -> Result<String, Error> {
        let name = target.strip_prefix("/dev/").unwrap_or(target);
        if name.is_empty() || name.contains('/') {
            bail!(SysfsError::InvalidDevice(target.into()));
        }

        if self.block_root.join(name).symlink_metadata().is_ok() {
            return Ok(name.into());
        }

        // A partition name selects its disk: sdb1 -> sdb, nvme0n1p1 -> nvme0n1
        let trimmed = name.trim_end_matches(|c: char| c.is_ascii_digit());
        let trimmed = match trimmed.strip_suffix('p') {
            Some(disk) if disk.ends_with(|c: char| c.is_ascii_digit()) => disk,
            _ => trimmed,
        };

        if trimmed != name
            && !trimmed.is_empty()
            && self.block_root.join(trimmed).symlink_metadata().is_ok()
        {
            return Ok(trimmed.into());
        }

        bail!(SysfsError::InvalidDevice(target.into()))
    }

    fn read_device(&self, sys_path: &Path, compat_mode: bool) -> Result<Device, Error> {
        let name = device_name(sys_path)?;
        let mut device = Device::new(name, sys_path);
        device.compat_mode = compat_mode;
        device.holders = read_holders(sys_path);
        device.removable = read_attribute(sys_path.join("removable")).as_deref() == Some("1");
        device.model = read_attribute(sys_path.join("device/model")).unwrap_or_default();
        device.vendor = read_attribute(sys_path.join("device/vendor")).unwrap_or_default();
        device.sector_count = read_number(sys_path.join("size")).unwrap_or(0);
        device.sector_size = read_number(sys_path.join("queue/hw_sector_size")).unwrap_or(512);
        device.rotational = match read_attribute(sys_path.join("queue/rotational")) {
            Some(value) if value == "1" => Rotational::Spinning,
            Some(_) => Rotational::SolidState,
            None => Rotational::Unknown,
        };
        device.supports_discard = read_attribute(sys_path.join("queue/discard_granularity"))
            .is_some_and(|value| value != "0");
        device.controller = self.resolve_controller(sys_path, compat_mode)?;

        for partition_path in partition_paths(sys_path, &device.name)? {
            let partition = read_partition(&partition_path)?;
            let dev_path = partition.dev_path(&self.dev_root);
            let uuid = self.resolver.resolve(&dev_path).with_context(|| {
                format!(
                    "Failed to identify partition '{}' of disk '{}'",
                    partition.name, device.name
                )
            })?;
            device = device.with_partition(partition, uuid);
        }

        trace!("Read device {device} from '{}'", sys_path.display());
        Ok(device)
    }

    fn resolve_controller(
        &self,
        sys_path: &Path,
        compat_mode: bool,
    ) -> Result<Option<String>, Error> {
        let path = if compat_mode {
            match fs::read_link(sys_path.join("device")) {
                Ok(link) => link,
                Err(_) => return Ok(None),
            }
        } else {
            sys_path.to_owned()
        };

        let re = Regex::new(CONTROLLER_PATTERN)?;
        let path = path.to_string_lossy();
        Ok(re
            .captures(&path)
            .and_then(|captures| captures.get(1))
            .and_then(|pci_id| self.inventory.find(pci_id.as_str()))
            .map(str::to_owned))
    }
}

fn device_name(sys_path: &Path) -> Result<String, Error> {
    sys_path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .with_context(|| format!("Failed to get device name of '{}'", sys_path.display()))
}

/// Compat mode heuristic: a physical device has at least one entry whose name
/// contains "device" in its directory.
fn has_device_entry(sys_path: &Path) -> bool {
    fs::read_dir(sys_path)
        .map(|entries| {
            entries
                .flatten()
                .any(|entry| entry.file_name().to_string_lossy().contains("device"))
        })
        .unwrap_or(false)
}

/// Reads and trims a sysfs attribute; None if it cannot be read.
fn read_attribute(path: impl AsRef<Path>) -> Option<String> {
    files::read_file_trim(&path).ok()
}

fn read_number(path: impl AsRef<Path>) -> Option<u64> {
    read_attribute(path).and_then(|value| value.parse().ok())
}

/// Lists the holders of a device. Device-mapper holders are reported by
/// their mapped name when it can be read.
fn read_holders(sys_path: &Path) -> Vec<String> {
    let holders_path = sys_path.join("holders");
    let Ok(entries) = fs::read_dir(&holders_path) else {
        return Vec::new();
    };

    let mut names = entries
        .flatten()
        .map(|entry| entry.file_name().to_string_lossy().to_string())
        .collect::<Vec<_>>();
    names.sort();

    names
        .into_iter()
        .map(|name| {
            if name.starts_with("dm-") {
                read_attribute(holders_path.join(&name).join("dm/name")).unwrap_or(name)
            } else {
                name
            }
        })
        .collect()
}

/// Returns the partition directories of the disk at `sys_path`: entries named
/// after the disk followed by a non-empty suffix of word characters.
fn partition_paths(sys_path: &Path, disk_name: &str) -> Result<Vec<PathBuf>, Error> {
    let mut paths = fs::read_dir(sys_path)
        .with_context(|| format!("Failed to list '{}'", sys_path.display()))?
        .flatten()
        .filter(|entry| {
            let name = entry.file_name().to_string_lossy().to_string();
            name.strip_prefix(disk_name).is_some_and(|suffix| {
                !suffix.is_empty() && suffix.chars().all(|c| c.is_alphanumeric() || c == '_')
            })
        })
        .map(|entry| entry.path())
        .collect::<Vec<_>>();
    paths.sort();
    Ok(paths)
}

fn read_partition(sys_path: &Path) -> Result<Device, Error> {
    let mut partition = Device::new(device_name(sys_path)?, sys_path);
    partition.holders = read_holders(sys_path);
    partition.sector_count = read_number(sys_path.join("size")).unwrap_or(0);
    partition.start_sector = read_number(sys_path.join("start"));
    Ok(partition)
}
