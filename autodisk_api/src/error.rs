use std::fmt::{Debug, Write};
use std::{borrow::Cow, panic::Location};

use strum_macros::IntoStaticStr;

/// autodisk failed to initialize.
#[derive(Debug, Eq, thiserror::Error, IntoStaticStr, PartialEq)]
#[strum(serialize_all = "kebab-case")]
pub enum InitializationError {
    #[error("Failed to load configuration from '{path}'")]
    LoadConfig { path: String },
    #[error("Failed to parse configuration")]
    ParseConfig,
    #[error("Failed to acquire lock file '{path}'")]
    AcquireLock { path: String },
    #[error("Another instance of autodisk is already running")]
    AlreadyRunning,
}

/// autodisk failed to run because the execution environment was misconfigured.
#[derive(Debug, Eq, thiserror::Error, IntoStaticStr, PartialEq)]
#[strum(serialize_all = "kebab-case")]
pub enum ExecutionEnvironmentMisconfigurationError {
    #[error("Required binary '{binary}' could not be found")]
    MissingBinary { binary: &'static str },
    #[error("Failed to list PCI controllers")]
    ControllerInventory,
}

/// User provided input was invalid.
#[derive(Debug, Eq, thiserror::Error, IntoStaticStr, PartialEq)]
#[strum(serialize_all = "kebab-case")]
pub enum InvalidInputError {
    #[error("Invalid device name '{name}'")]
    UnknownDevice { name: String },
}

/// A step of the provisioning loop failed.
#[derive(Debug, Eq, thiserror::Error, IntoStaticStr, PartialEq)]
#[strum(serialize_all = "kebab-case")]
pub enum ProvisioningError {
    #[error("Failed to execute '{binary}'")]
    CommandCouldNotExecute { binary: &'static str },
    #[error("'{binary}' failed: {explanation}")]
    CommandFailed {
        binary: &'static str,
        explanation: String,
    },
    #[error("Failed to scan block devices")]
    ScanDevices,
    #[error("Failed to create partition table on disk '{disk}'")]
    CreatePartitionTable { disk: String },
    #[error("Disk '{disk}' disappeared during provisioning")]
    DiskVanished { disk: String },
    #[error("Disk '{disk}' has no partition after partitioning")]
    MissingPartition { disk: String },
    #[error("Failed to create filesystem on '{partition}'")]
    CreateFilesystem { partition: String },
    #[error("Disk '{disk}' has {found} partitions, expected {expected}")]
    UnexpectedPartitionCount {
        disk: String,
        expected: usize,
        found: usize,
    },
    #[error("Disk '{disk}' is still a candidate after it was provisioned")]
    ProvisioningStalled { disk: String },
    #[error("Failed to read mount table '{path}'")]
    ReadMountTable { path: String },
    #[error("Failed to write mount table '{path}'")]
    WriteMountTable { path: String },
    #[error("Failed to allocate a mount point")]
    AllocateMountPoint,
    #[error("Failed to create mount point '{path}'")]
    CreateMountPoint { path: String },
    #[error("Failed to mount '{partition}' at '{path}'")]
    Mount { partition: String, path: String },
}

#[derive(Debug, Eq, thiserror::Error, IntoStaticStr, PartialEq)]
#[strum(serialize_all = "kebab-case")]
pub enum InternalError {
    #[error("autodisk panicked: {0}")]
    Panic(String),
}

/// Each variant of `ErrorKind` corresponds to a different category of error.
#[derive(Debug, Eq, thiserror::Error, IntoStaticStr, PartialEq)]
#[strum(serialize_all = "kebab-case")]
pub enum ErrorKind {
    /// autodisk failed to initialize.
    #[error(transparent)]
    Initialization(#[from] InitializationError),

    /// autodisk failed because a required tool is missing or broken.
    #[error(transparent)]
    ExecutionEnvironmentMisconfiguration(#[from] ExecutionEnvironmentMisconfigurationError),

    /// autodisk was given invalid input.
    #[error(transparent)]
    InvalidInput(#[from] InvalidInputError),

    /// A discovery, partitioning, formatting or registration step failed. The
    /// disk involved may have been left partially provisioned.
    #[error(transparent)]
    Provisioning(#[from] ProvisioningError),

    /// A bug in autodisk.
    #[error(transparent)]
    Internal(#[from] InternalError),
}

#[derive(Debug)]
struct AutodiskErrorInner {
    kind: ErrorKind,
    location: &'static Location<'static>,
    source: Option<anyhow::Error>,
    context: Vec<(Cow<'static, str>, &'static Location<'static>)>,
}

pub struct AutodiskError(Box<AutodiskErrorInner>);
impl AutodiskError {
    #[track_caller]
    pub fn new(kind: impl Into<ErrorKind>) -> Self {
        AutodiskError(Box::new(AutodiskErrorInner {
            kind: kind.into(),
            location: Location::caller(),
            source: None,
            context: Vec::new(),
        }))
    }

    #[track_caller]
    pub fn with_source(kind: impl Into<ErrorKind>, source: anyhow::Error) -> Self {
        AutodiskError(Box::new(AutodiskErrorInner {
            kind: kind.into(),
            location: Location::caller(),
            source: Some(source),
            context: Vec::new(),
        }))
    }

    /// Returns a reference to the inner ErrorKind.
    pub fn kind(&self) -> &ErrorKind {
        &self.0.kind
    }

    /// Returns the category name of this error, e.g. "provisioning".
    pub fn category(&self) -> &'static str {
        <&str>::from(&self.0.kind)
    }
}

pub trait ReportError<T, K> {
    /// Convert this error into a structured AutodiskError.
    fn structured(self, kind: K) -> Result<T, AutodiskError>;
}

impl<T, K> ReportError<T, K> for Option<T>
where
    K: Into<ErrorKind>,
{
    #[track_caller]
    fn structured(self, kind: K) -> Result<T, AutodiskError> {
        match self {
            Some(t) => Ok(t),
            None => Err(AutodiskError::new(kind)),
        }
    }
}

impl<T, E, K> ReportError<T, K> for Result<T, E>
where
    E: Into<anyhow::Error>,
    K: Into<ErrorKind>,
{
    #[track_caller]
    fn structured(self, kind: K) -> Result<T, AutodiskError> {
        match self {
            Ok(o) => Ok(o),
            Err(e) => Err(AutodiskError::with_source(kind, e.into())),
        }
    }
}

pub trait AutodiskResultExt<T> {
    /// Attach a context message to the error.
    fn message(self, context: impl Into<Cow<'static, str>>) -> Result<T, AutodiskError>;
}

impl<T> AutodiskResultExt<T> for Result<T, AutodiskError> {
    #[track_caller]
    fn message(mut self, context: impl Into<Cow<'static, str>>) -> Result<T, AutodiskError> {
        if let Err(ref mut e) = self {
            e.0.context.push((context.into(), Location::caller()));
        }
        self
    }
}

impl Debug for AutodiskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} at {}:{}",
            self.0.kind,
            self.0.location.file(),
            self.0.location.line()
        )?;

        if !self.0.context.is_empty() {
            writeln!(f, "\n\nContext:")?;
            for (i, (context, location)) in self.0.context.iter().enumerate() {
                for (j, line) in context.split('\n').enumerate() {
                    if j == 0 {
                        write!(f, "{: >5}: ", i)?;
                    } else {
                        f.write_str("\n       ")?;
                    }
                    f.write_str(line)?;
                }
                writeln!(f, " at {}:{}", location.file(), location.line())?;
            }
        }

        if let Some(ref source) = self.0.source {
            writeln!(f, "\n\nCaused by:")?;
            let mut index = 0;
            let mut source: Option<&dyn std::error::Error> = Some(source.as_ref());
            while let Some(e) = source {
                for (i, line) in e.to_string().split('\n').enumerate() {
                    if i == 0 {
                        write!(f, "{: >5}: ", index)?;
                    } else {
                        f.write_str("\n       ")?;
                    }
                    f.write_str(line)?;
                }
                f.write_char('\n')?;
                source = e.source();
                index += 1;
            }
        }
        Ok(())
    }
}
