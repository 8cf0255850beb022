use std::path::PathBuf;

use log::{debug, info, warn};
use strum_macros::IntoStaticStr;

use autodisk_api::{
    config::AutodiskConfig,
    error::{
        AutodiskError, AutodiskResultExt, InvalidInputError, ProvisioningError, ReportError,
    },
};
use osutils::{
    dependencies::{Dependency, DependencyError, DependencyResultExt},
    fdisk::PartitionTable,
    lock::ProvisionLock,
    sysfs::{Device, SysfsError},
};

use crate::{
    classifier,
    registry::{self, MountRegistry},
};

mod host;

pub use host::{Host, SystemHost};

/// A disk being driven through the provisioning states.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Job {
    disk: String,
    scheme: PartitionTable,
}

/// A partition that passed verification and is waiting to be registered.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Verified {
    job: Job,
    partition: String,
    uuid: String,
}

#[derive(Debug, Clone, PartialEq, Eq, IntoStaticStr)]
enum State {
    Scanning,
    Partitioning(Job),
    Formatting(Job),
    Verifying(Job),
    Registering(Verified),
    Done,
}

impl State {
    fn name(&self) -> &'static str {
        self.into()
    }
}

/// One disk handled by a provisioning run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedDisk {
    pub disk: String,
    pub partition: String,
    pub uuid: String,
    pub scheme: PartitionTable,

    /// Where the partition was mounted; None if its UUID was already
    /// registered in the mount table.
    pub mount_point: Option<PathBuf>,
}

/// Outcome of a provisioning run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProvisionReport {
    pub disks: Vec<ProvisionedDisk>,
}

/// Drives eligible disks from raw to mounted, one at a time.
///
/// Every step after a mutation works from a fresh scan, so decisions are
/// always made against what the kernel currently reports.
pub struct Provisioner<'a, H: Host> {
    host: H,
    config: &'a AutodiskConfig,
    target: Option<&'a str>,
}

impl<'a, H: Host> Provisioner<'a, H> {
    /// Creates a provisioner over every physical disk, or over `target` only.
    pub fn new(host: H, config: &'a AutodiskConfig, target: Option<&'a str>) -> Self {
        Self {
            host,
            config,
            target,
        }
    }

    /// Provisions every eligible disk until none is left.
    pub fn run(&mut self, _lock: &ProvisionLock) -> Result<ProvisionReport, AutodiskError> {
        self.normalize_mount_table()
            .message("Failed to normalize the mount table")?;

        let mut report = ProvisionReport::default();
        let mut handled: Vec<String> = Vec::new();
        let mut state = State::Scanning;

        loop {
            info!("Provisioning state: {}", state.name());
            state = match state {
                State::Scanning => match self.select_candidate()? {
                    Some(job) if handled.contains(&job.disk) => {
                        return Err(AutodiskError::new(
                            ProvisioningError::ProvisioningStalled { disk: job.disk },
                        ));
                    }
                    Some(job) => State::Partitioning(job),
                    None => State::Done,
                },
                State::Partitioning(job) => {
                    self.partition(&job)?;
                    State::Formatting(job)
                }
                State::Formatting(job) => {
                    self.format(&job)?;
                    State::Verifying(job)
                }
                State::Verifying(job) => State::Registering(self.verify(job)?),
                State::Registering(verified) => {
                    let mount_point = self
                        .register(&verified)
                        .message(format!("Failed to register disk '{}'", verified.job.disk))?;
                    handled.push(verified.job.disk.clone());
                    report.disks.push(ProvisionedDisk {
                        disk: verified.job.disk,
                        partition: verified.partition,
                        uuid: verified.uuid,
                        scheme: verified.job.scheme,
                        mount_point,
                    });
                    State::Scanning
                }
                State::Done => break,
            };
        }

        info!("Provisioned {} disk(s)", report.disks.len());
        Ok(report)
    }

    /// Drops legacy resource disk entries left in the mount table.
    fn normalize_mount_table(&mut self) -> Result<(), AutodiskError> {
        let mut registry = MountRegistry::load(&self.host, &self.config.mount_table)?;
        registry.strip_legacy_entries();
        if registry.commit(&mut self.host)? {
            info!("Removed legacy entries from the mount table");
        }
        Ok(())
    }

    fn scan(&self) -> Result<Vec<Device>, AutodiskError> {
        self.host.scan(self.target).map_err(|e| {
            match e.downcast_ref::<SysfsError>().cloned() {
                Some(SysfsError::InvalidDevice(name)) => {
                    AutodiskError::with_source(InvalidInputError::UnknownDevice { name }, e)
                }
                None => AutodiskError::with_source(ProvisioningError::ScanDevices, e),
            }
        })
    }

    /// Rescans and returns the disk named `name`.
    fn find_disk(&self, name: &str) -> Result<Device, AutodiskError> {
        self.scan()?
            .into_iter()
            .find(|device| device.name == name)
            .structured(ProvisioningError::DiskVanished { disk: name.into() })
    }

    fn select_candidate(&self) -> Result<Option<Job>, AutodiskError> {
        let devices = self.scan()?;
        for device in &devices {
            debug!(
                "Scanned {device}: {} byte(s), {} partition(s), holders {:?}",
                device.size_bytes(),
                device.partitions().len(),
                device.holders
            );
        }

        let Some(device) = classifier::select_candidate(&devices, self.config.threshold_gib)
        else {
            info!("No unpartitioned disk larger than {} GiB", self.config.threshold_gib);
            return Ok(None);
        };

        let scheme =
            classifier::partition_scheme(device.size_bytes(), self.config.gpt_threshold_gib);
        info!("Selected disk {device} for provisioning with a {scheme} label");

        Ok(Some(Job {
            disk: device.name.clone(),
            scheme,
        }))
    }

    fn partition(&mut self, job: &Job) -> Result<(), AutodiskError> {
        let disk_path = self.config.dev_root.join(&job.disk);
        match self.host.partition(&disk_path, job.scheme) {
            Ok(()) => {}
            Err(e) if matches!(*e, DependencyError::ExecutionFailed { .. }) => {
                warn!(
                    "Partitioning '{}' reported a failure, continuing: {e}",
                    disk_path.display()
                );
            }
            Err(e) => {
                return Err(e).structured(ProvisioningError::CreatePartitionTable {
                    disk: job.disk.clone(),
                })
            }
        }

        if let Err(e) = self.host.settle() {
            warn!("Failed to wait for device events to settle: {e}");
        }

        Ok(())
    }

    fn format(&mut self, job: &Job) -> Result<(), AutodiskError> {
        let disk = self.find_disk(&job.disk)?;
        let partition = disk
            .partitions()
            .first()
            .structured(ProvisioningError::MissingPartition {
                disk: job.disk.clone(),
            })?;

        let partition_path = partition.dev_path(&self.config.dev_root);
        info!("Creating filesystem on '{}'", partition_path.display());
        self.host
            .format(&partition_path)
            .structured(ProvisioningError::CreateFilesystem {
                partition: partition.name.clone(),
            })
    }

    fn verify(&self, job: Job) -> Result<Verified, AutodiskError> {
        let disk = self.find_disk(&job.disk)?;
        let partitions = disk.partition_uuids().collect::<Vec<_>>();
        if partitions.len() != 1 {
            return Err(AutodiskError::new(
                ProvisioningError::UnexpectedPartitionCount {
                    disk: job.disk,
                    expected: 1,
                    found: partitions.len(),
                },
            ));
        }
        let (partition, uuid) = (partitions[0].0.name.clone(), partitions[0].1.to_string());

        info!("Disk '{}' carries partition '{partition}' with UUID {uuid}", job.disk);
        Ok(Verified {
            job,
            partition,
            uuid,
        })
    }

    /// Records the partition in the mount table and mounts it. Returns the
    /// mount point, or None if the partition was already registered.
    fn register(&mut self, verified: &Verified) -> Result<Option<PathBuf>, AutodiskError> {
        let mut registry = MountRegistry::load(&self.host, &self.config.mount_table)?;
        registry.strip_legacy_entries();

        if registry.is_registered(&verified.uuid) {
            info!(
                "UUID {} is already in the mount table, not mounting '{}'",
                verified.uuid, verified.partition
            );
            registry.commit(&mut self.host)?;
            return Ok(None);
        }

        let host = &self.host;
        let mount_point = registry::next_mount_path(
            &self.config.mount_prefix,
            self.config.max_volumes,
            |path| host.is_mount_point(path),
        )?;

        self.host
            .ensure_directory(&mount_point)
            .structured(ProvisioningError::CreateMountPoint {
                path: mount_point.to_string_lossy().to_string(),
            })?;

        registry.register(&verified.uuid, &mount_point);
        registry.commit(&mut self.host)?;

        let partition_path = self.config.dev_root.join(&verified.partition);
        info!(
            "Mounting '{}' at '{}'",
            partition_path.display(),
            mount_point.display()
        );
        self.host
            .mount(&partition_path, &mount_point)
            .structured(ProvisioningError::Mount {
                partition: verified.partition.clone(),
                path: mount_point.to_string_lossy().to_string(),
            })?;

        Ok(Some(mount_point))
    }
}

/// Checks that the binaries every run needs are installed.
pub fn check_dependencies() -> Result<(), AutodiskError> {
    for dependency in [
        Dependency::Blkid,
        Dependency::Fdisk,
        Dependency::Lspci,
        Dependency::Mkfs,
        Dependency::Mount,
        Dependency::Mountpoint,
        Dependency::Udevadm,
    ] {
        dependency
            .path()
            .message(format!("Missing dependency '{dependency}'"))?;
    }

    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    use std::{collections::HashSet, path::Path};

    use anyhow::{bail, Error};
    use indoc::indoc;
    use tempfile::TempDir;

    use autodisk_api::{
        constants::{GIB, LEGACY_RESOURCE_ENTRY, LEGACY_RESOURCE_ENTRY_NETDEV},
        error::ErrorKind,
    };
    const FSTAB: &str = indoc! {"
        # /etc/fstab: static file system information.
        UUID=9a1b4c3e-7d2f-4e1a-8b5c-6d7e8f901234 / ext4 defaults,discard 0 1
    "};

    #[derive(Debug, Clone)]
    struct FakeDisk {
        name: String,
        bytes: u64,
        partitions: Vec<(String, String)>,
    }

    /// In-memory machine: disks, a mount table and the mounts made so far.
    #[derive(Debug, Default)]
    pub(crate) struct FakeHost {
        disks: Vec<FakeDisk>,
        pub table: String,
        pub table_writes: usize,
        mounted: HashSet<PathBuf>,
        directories: HashSet<PathBuf>,
        pub mounts: Vec<(PathBuf, PathBuf)>,
        pub calls: Vec<String>,

        /// Partitioning writes a table but exits non-zero.
        fdisk_exit_failure: bool,
        /// Partitioning silently does nothing.
        fdisk_no_effect: bool,
        /// Partitioning creates two partitions.
        fdisk_extra_partition: bool,
        /// Formatting fails.
        mkfs_failure: bool,
        /// Disks lose their partitions after being mounted.
        forget_after_mount: bool,
    }

    impl FakeHost {
        pub(crate) fn new(table: impl Into<String>) -> Self {
            Self {
                table: table.into(),
                ..Default::default()
            }
        }

        fn with_disk(mut self, name: &str, bytes: u64) -> Self {
            self.disks.push(FakeDisk {
                name: name.into(),
                bytes,
                partitions: Vec::new(),
            });
            self
        }

        fn with_partitioned_disk(mut self, name: &str, bytes: u64, uuid: &str) -> Self {
            self.disks.push(FakeDisk {
                name: name.into(),
                bytes,
                partitions: vec![(format!("{name}1"), uuid.into())],
            });
            self
        }

        fn disk_mut(&mut self, dev_path: &Path) -> Option<&mut FakeDisk> {
            let name = dev_path.file_name()?.to_string_lossy().to_string();
            self.disks.iter_mut().find(|disk| disk.name == name)
        }

        fn execution_failed(dependency: Dependency) -> Box<DependencyError> {
            Box::new(DependencyError::ExecutionFailed {
                dependency,
                command: dependency.name().into(),
                explanation: "exited with status: 1".into(),
                report: "stderr:\nfailure".into(),
            })
        }
    }

    impl Host for FakeHost {
        fn scan(&self, target: Option<&str>) -> Result<Vec<Device>, Error> {
            let devices = self
                .disks
                .iter()
                .map(|disk| {
                    disk.partitions.iter().fold(
                        Device::new(&disk.name, format!("/sys/block/{}", disk.name))
                            .with_geometry(disk.bytes / 512, 512),
                        |device, (partition, uuid)| {
                            let sys_path = format!("/sys/block/{}/{partition}", disk.name);
                            device.with_partition(Device::new(partition, sys_path), uuid)
                        },
                    )
                })
                .collect::<Vec<_>>();

            match target {
                None => Ok(devices),
                Some(target) => {
                    let name = target.strip_prefix("/dev/").unwrap_or(target);
                    match devices.into_iter().find(|device| device.name == name) {
                        Some(device) => Ok(vec![device]),
                        None => bail!(SysfsError::InvalidDevice(target.into())),
                    }
                }
            }
        }

        fn partition(
            &mut self,
            disk: &Path,
            table: PartitionTable,
        ) -> Result<(), Box<DependencyError>> {
            self.calls.push(format!("fdisk {} {table}", disk.display()));
            let no_effect = self.fdisk_no_effect;
            let extra = self.fdisk_extra_partition;
            let exit_failure = self.fdisk_exit_failure;

            if !no_effect {
                if let Some(fake) = self.disk_mut(disk) {
                    let name = fake.name.clone();
                    fake.partitions = vec![(format!("{name}1"), format!("PARTUUID-{name}1"))];
                    if extra {
                        fake.partitions
                            .push((format!("{name}2"), format!("PARTUUID-{name}2")));
                    }
                }
            }

            if exit_failure {
                return Err(Self::execution_failed(Dependency::Fdisk));
            }
            Ok(())
        }

        fn settle(&mut self) -> Result<(), Box<DependencyError>> {
            self.calls.push("udevadm settle".into());
            Ok(())
        }

        fn format(&mut self, partition: &Path) -> Result<(), Box<DependencyError>> {
            self.calls.push(format!("mkfs {}", partition.display()));
            if self.mkfs_failure {
                return Err(Self::execution_failed(Dependency::Mkfs));
            }

            let name = partition.file_name().map(|n| n.to_string_lossy().to_string());
            for disk in &mut self.disks {
                for (partition, uuid) in &mut disk.partitions {
                    if Some(&*partition) == name.as_ref() {
                        *uuid = format!("uuid-{partition}");
                    }
                }
            }
            Ok(())
        }

        fn read_mount_table(&self, _path: &Path) -> Result<String, Error> {
            Ok(self.table.clone())
        }

        fn write_mount_table(&mut self, _path: &Path, contents: &str) -> Result<(), Error> {
            self.table = contents.into();
            self.table_writes += 1;
            Ok(())
        }

        fn is_mount_point(&self, path: &Path) -> Result<bool, Error> {
            Ok(self.mounted.contains(path))
        }

        fn ensure_directory(&mut self, path: &Path) -> Result<(), Error> {
            self.directories.insert(path.to_owned());
            Ok(())
        }

        fn mount(
            &mut self,
            partition: &Path,
            mount_point: &Path,
        ) -> Result<(), Box<DependencyError>> {
            self.calls.push(format!(
                "mount {} {}",
                partition.display(),
                mount_point.display()
            ));
            self.mounted.insert(mount_point.to_owned());
            self.mounts
                .push((partition.to_owned(), mount_point.to_owned()));
            if self.forget_after_mount {
                for disk in &mut self.disks {
                    disk.partitions.clear();
                }
            }
            Ok(())
        }
    }

    fn run(
        host: FakeHost,
        target: Option<&str>,
    ) -> (Result<ProvisionReport, AutodiskError>, FakeHost) {
        let dir = TempDir::new().unwrap();
        let lock = ProvisionLock::acquire(dir.path().join("autodisk.lock")).unwrap();
        let config = AutodiskConfig::default();

        let mut provisioner = Provisioner::new(host, &config, target);
        let result = provisioner.run(&lock);
        (result, provisioner.host)
    }

    fn managed_line(uuid: &str, mount_point: &str) -> String {
        format!("UUID={uuid} {mount_point}          ext4    defaults,nofail,discard 0 0\n")
    }

    #[test]
    fn test_provision_mbr_disk() {
        let host = FakeHost::new(FSTAB).with_disk("sdb", 200 * GIB);
        let (result, host) = run(host, None);
        let report = result.unwrap();

        assert_eq!(
            report.disks,
            [ProvisionedDisk {
                disk: "sdb".into(),
                partition: "sdb1".into(),
                uuid: "uuid-sdb1".into(),
                scheme: PartitionTable::Mbr,
                mount_point: Some("/mnt/volume_01".into()),
            }]
        );
        assert_eq!(
            host.calls,
            [
                "fdisk /dev/sdb mbr",
                "udevadm settle",
                "mkfs /dev/sdb1",
                "mount /dev/sdb1 /mnt/volume_01",
            ]
        );
        assert_eq!(
            host.table,
            format!("{FSTAB}{}", managed_line("uuid-sdb1", "/mnt/volume_01"))
        );
        assert!(host.directories.contains(Path::new("/mnt/volume_01")));
    }

    #[test]
    fn test_provision_gpt_disk() {
        let host = FakeHost::new(FSTAB).with_disk("sdc", 3000 * GIB);
        let (result, host) = run(host, None);
        let report = result.unwrap();

        assert_eq!(report.disks.len(), 1);
        assert_eq!(report.disks[0].scheme, PartitionTable::Gpt);
        assert_eq!(host.calls[0], "fdisk /dev/sdc gpt");
    }

    #[test]
    fn test_partitioned_disk_untouched() {
        let host = FakeHost::new(FSTAB)
            .with_partitioned_disk("sda", 30 * GIB, "9a1b4c3e-7d2f-4e1a-8b5c-6d7e8f901234")
            .with_partitioned_disk("sdb", 200 * GIB, "DATA-UUID");
        let (result, host) = run(host, None);

        assert!(result.unwrap().disks.is_empty());
        assert!(host.calls.is_empty());
        assert_eq!(host.table, FSTAB);
        assert_eq!(host.table_writes, 0);
    }

    #[test]
    fn test_threshold_boundary() {
        let host = FakeHost::new(FSTAB)
            .with_disk("sdb", 100 * GIB)
            .with_disk("sdc", 50 * GIB);
        let (result, host) = run(host, None);

        assert!(result.unwrap().disks.is_empty());
        assert!(host.calls.is_empty());
    }

    #[test]
    fn test_provision_multiple_disks() {
        let mut host = FakeHost::new(FSTAB)
            .with_partitioned_disk("sda", 30 * GIB, "9a1b4c3e-7d2f-4e1a-8b5c-6d7e8f901234")
            .with_disk("sdb", 200 * GIB)
            .with_disk("sdc", 10 * GIB)
            .with_disk("sdd", 4096 * GIB);
        // Someone else already mounted the first volume
        host.mounted.insert("/mnt/volume_01".into());

        let (result, host) = run(host, None);
        let report = result.unwrap();

        let summary = report
            .disks
            .iter()
            .map(|d| (d.disk.as_str(), d.scheme, d.mount_point.clone()))
            .collect::<Vec<_>>();
        assert_eq!(
            summary,
            [
                ("sdb", PartitionTable::Mbr, Some(PathBuf::from("/mnt/volume_02"))),
                ("sdd", PartitionTable::Gpt, Some(PathBuf::from("/mnt/volume_03"))),
            ]
        );
        assert_eq!(
            host.table,
            format!(
                "{FSTAB}{}{}",
                managed_line("uuid-sdb1", "/mnt/volume_02"),
                managed_line("uuid-sdd1", "/mnt/volume_03")
            )
        );
    }

    #[test]
    fn test_legacy_entries_stripped() {
        let table = format!("{LEGACY_RESOURCE_ENTRY}{FSTAB}{LEGACY_RESOURCE_ENTRY_NETDEV}");
        let host = FakeHost::new(table);
        let (result, host) = run(host, None);

        assert!(result.unwrap().disks.is_empty());
        assert_eq!(host.table, FSTAB);
        assert_eq!(host.table_writes, 1);
    }

    #[test]
    fn test_already_registered_uuid() {
        let table = format!("{FSTAB}{}", managed_line("uuid-sdb1", "/data"));
        let host = FakeHost::new(table.clone()).with_disk("sdb", 200 * GIB);
        let (result, host) = run(host, None);
        let report = result.unwrap();

        assert_eq!(report.disks.len(), 1);
        assert_eq!(report.disks[0].mount_point, None);
        assert_eq!(host.table, table);
        assert!(host.mounts.is_empty());
        assert!(host.directories.is_empty());
    }

    #[test]
    fn test_rerun_is_idempotent() {
        let host = FakeHost::new(FSTAB).with_disk("sdb", 200 * GIB);
        let (result, host) = run(host, None);
        assert_eq!(result.unwrap().disks.len(), 1);
        let table = host.table.clone();
        let calls = host.calls.len();

        let (result, host) = run(host, None);
        assert!(result.unwrap().disks.is_empty());
        assert_eq!(host.table, table);
        assert_eq!(host.calls.len(), calls);
    }

    #[test]
    fn test_fdisk_failure_is_tolerated() {
        let mut host = FakeHost::new(FSTAB).with_disk("sdb", 200 * GIB);
        host.fdisk_exit_failure = true;
        let (result, host) = run(host, None);

        assert_eq!(result.unwrap().disks.len(), 1);
        assert_eq!(host.mounts.len(), 1);
    }

    #[test]
    fn test_fdisk_without_effect() {
        let mut host = FakeHost::new(FSTAB).with_disk("sdb", 200 * GIB);
        host.fdisk_no_effect = true;
        let (result, host) = run(host, None);

        assert_eq!(
            result.unwrap_err().kind(),
            &ErrorKind::Provisioning(ProvisioningError::MissingPartition { disk: "sdb".into() })
        );
        assert_eq!(host.table, FSTAB);
    }

    #[test]
    fn test_unexpected_partition_count() {
        let mut host = FakeHost::new(FSTAB).with_disk("sdb", 200 * GIB);
        host.fdisk_extra_partition = true;
        let (result, host) = run(host, None);

        assert_eq!(
            result.unwrap_err().kind(),
            &ErrorKind::Provisioning(ProvisioningError::UnexpectedPartitionCount {
                disk: "sdb".into(),
                expected: 1,
                found: 2,
            })
        );
        assert!(host.mounts.is_empty());
    }

    #[test]
    fn test_mkfs_failure() {
        let mut host = FakeHost::new(FSTAB).with_disk("sdb", 200 * GIB);
        host.mkfs_failure = true;
        let (result, host) = run(host, None);

        assert_eq!(
            result.unwrap_err().kind(),
            &ErrorKind::Provisioning(ProvisioningError::CreateFilesystem {
                partition: "sdb1".into()
            })
        );
        assert_eq!(host.table, FSTAB);
    }

    #[test]
    fn test_stalled_disk() {
        let mut host = FakeHost::new(FSTAB).with_disk("sdb", 200 * GIB);
        host.forget_after_mount = true;
        let (result, host) = run(host, None);

        assert_eq!(
            result.unwrap_err().kind(),
            &ErrorKind::Provisioning(ProvisioningError::ProvisioningStalled {
                disk: "sdb".into()
            })
        );
        assert_eq!(host.mounts.len(), 1);
    }

    #[test]
    fn test_target_device() {
        let host = FakeHost::new(FSTAB)
            .with_disk("sdb", 200 * GIB)
            .with_disk("sdc", 200 * GIB);
        let (result, host) = run(host, Some("/dev/sdc"));
        let report = result.unwrap();

        assert_eq!(report.disks.len(), 1);
        assert_eq!(report.disks[0].disk, "sdc");
        assert!(host.calls.iter().all(|call| !call.contains("sdb")));
    }

    #[test]
    fn test_unknown_target_device() {
        let host = FakeHost::new(FSTAB).with_disk("sdb", 200 * GIB);
        let (result, host) = run(host, Some("sdz"));

        let error = result.unwrap_err();
        assert_eq!(error.category(), "invalid-input");
        assert_eq!(
            error.kind(),
            &ErrorKind::InvalidInput(InvalidInputError::UnknownDevice { name: "sdz".into() })
        );
        assert!(host.calls.is_empty());
    }
}
