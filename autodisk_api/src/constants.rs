use const_format::formatcp;

// Capacity constants

/// Number of bytes in one GiB.
pub const GIB: u64 = 1024 * 1024 * 1024;

/// Disks must be strictly larger than this many GiB to be provisioned.
pub const DEFAULT_THRESHOLD_GIB: u64 = 100;

/// Disks of at least this many GiB get a GPT label, smaller ones get MBR.
pub const DEFAULT_GPT_THRESHOLD_GIB: u64 = 2048;

// Filesystem constants

/// Filesystem created on every provisioned partition.
pub const DATA_FILESYSTEM: &str = "ext4";

/// Options written to the mount table for provisioned partitions.
pub const DATA_MOUNT_OPTIONS: &str = "defaults,nofail,discard";

/// Options passed to `mount` when mounting a freshly provisioned partition.
pub const DATA_MOUNT_FLAGS: &str = "discard";

// Path constants

/// Directory containing autodisk's own files.
pub const AUTODISK_CONFIG_DIR: &str = "/etc/autodisk";

/// Path to load the optional configuration from.
pub const AUTODISK_CONFIG_PATH: &str = formatcp!("{AUTODISK_CONFIG_DIR}/config.yaml");

/// Persisted mount table.
pub const FSTAB_PATH: &str = "/etc/fstab";

/// Root of the kernel's block device tree.
pub const SYSFS_BLOCK_PATH: &str = "/sys/block";

/// Directory containing block device nodes.
pub const DEV_PATH: &str = "/dev";

/// Prefix of allocated mount points: `/mnt/volume_01`, `/mnt/volume_02`, ...
pub const MOUNT_PATH_PREFIX: &str = "/mnt/volume_";

/// Highest volume index that may be allocated.
pub const DEFAULT_MAX_VOLUMES: u32 = 99;

/// Lock file guarding against concurrent runs.
pub const AUTODISK_LOCK_PATH: &str = "/run/autodisk.lock";

/// JSON lines log appended to by every run; entries carry the pid of their run.
pub const AUTODISK_LOG_PATH: &str = "/var/log/autodisk.log";

// Legacy resource disk entries written by cloud-init

/// Device of the cloud-init managed resource disk.
const LEGACY_RESOURCE_DEVICE: &str = "/dev/disk/cloud/azure_resource-part1";

/// Legacy resource disk entry without a network dependency.
pub const LEGACY_RESOURCE_ENTRY: &str = formatcp!(
    "{LEGACY_RESOURCE_DEVICE}\t/mnt\tauto\tdefaults,nofail,x-systemd.requires=cloud-init.service,comment=cloudconfig\t0\t2\n"
);

/// Legacy resource disk entry with a network dependency.
pub const LEGACY_RESOURCE_ENTRY_NETDEV: &str = formatcp!(
    "{LEGACY_RESOURCE_DEVICE}\t/mnt\tauto\tdefaults,nofail,x-systemd.requires=cloud-init.service,_netdev,comment=cloudconfig\t0\t2\n"
);
