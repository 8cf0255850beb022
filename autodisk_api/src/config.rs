use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{
    constants::{
        AUTODISK_LOCK_PATH, AUTODISK_LOG_PATH, DEFAULT_GPT_THRESHOLD_GIB, DEFAULT_MAX_VOLUMES,
        DEFAULT_THRESHOLD_GIB, DEV_PATH, FSTAB_PATH, MOUNT_PATH_PREFIX, SYSFS_BLOCK_PATH,
    },
    error::{AutodiskError, InitializationError, ReportError},
};

/// Definition of autodisk's configuration. Every field is optional in the
/// file; missing fields take the built-in defaults.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct AutodiskConfig {
    /// Disks must be strictly larger than this many GiB to be provisioned.
    pub threshold_gib: u64,

    /// Disks of at least this many GiB are labeled GPT instead of MBR.
    pub gpt_threshold_gib: u64,

    /// Prefix of allocated mount points. The two digit volume index is
    /// appended to it.
    pub mount_prefix: String,

    /// Highest volume index that may be allocated.
    pub max_volumes: u32,

    /// Persisted mount table.
    pub mount_table: PathBuf,

    /// Root of the kernel's block device tree.
    pub sysfs_block: PathBuf,

    /// Directory holding the device nodes.
    pub dev_root: PathBuf,

    /// Lock file guarding against concurrent runs.
    pub lock_file: PathBuf,

    /// JSON lines log of the run.
    pub log_file: PathBuf,
}

impl Default for AutodiskConfig {
    fn default() -> Self {
        Self {
            threshold_gib: DEFAULT_THRESHOLD_GIB,
            gpt_threshold_gib: DEFAULT_GPT_THRESHOLD_GIB,
            mount_prefix: MOUNT_PATH_PREFIX.into(),
            max_volumes: DEFAULT_MAX_VOLUMES,
            mount_table: FSTAB_PATH.into(),
            sysfs_block: SYSFS_BLOCK_PATH.into(),
            dev_root: DEV_PATH.into(),
            lock_file: AUTODISK_LOCK_PATH.into(),
            log_file: AUTODISK_LOG_PATH.into(),
        }
    }
}

impl AutodiskConfig {
    /// Loads the configuration from `path`. A missing file yields the
    /// defaults, any other read or parse failure is an error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, AutodiskError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents =
            std::fs::read_to_string(path).structured(InitializationError::LoadConfig {
                path: path.to_string_lossy().to_string(),
            })?;

        Self::from_yaml(&contents)
    }

    /// Parses a configuration document. An empty document yields the
    /// defaults.
    pub fn from_yaml(contents: &str) -> Result<Self, AutodiskError> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }

        serde_yaml::from_str(contents).structured(InitializationError::ParseConfig)
    }
}
