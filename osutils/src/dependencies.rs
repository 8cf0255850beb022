use std::{
    borrow::Cow,
    ffi::{OsStr, OsString},
    fmt,
    io::{self, Write},
    os::unix::process::ExitStatusExt,
    path::PathBuf,
    process::{Command as StdCommand, Output, Stdio},
};

use log::trace;
use strum_macros::IntoStaticStr;

use autodisk_api::error::{
    AutodiskError, AutodiskResultExt, ExecutionEnvironmentMisconfigurationError,
    ProvisioningError,
};

#[derive(Debug, thiserror::Error)]
pub enum DependencyError {
    #[error("Failed to find dependency '{dependency}': {source}")]
    NotFound {
        dependency: Dependency,
        #[source]
        source: which::Error,
    },

    #[error("Failed to execute dependency '{dependency}': {inner}")]
    CouldNotExecute {
        dependency: Dependency,
        #[source]
        inner: io::Error,
    },

    #[error("'{command}' {explanation}\n{report}")]
    ExecutionFailed {
        dependency: Dependency,
        command: String,
        explanation: String,
        report: String,
    },
}

impl From<DependencyError> for AutodiskError {
    #[track_caller]
    fn from(value: DependencyError) -> Self {
        match value {
            DependencyError::NotFound { dependency, source } => AutodiskError::with_source(
                ExecutionEnvironmentMisconfigurationError::MissingBinary {
                    binary: dependency.name(),
                },
                source.into(),
            ),
            DependencyError::CouldNotExecute { dependency, inner } => AutodiskError::with_source(
                ProvisioningError::CommandCouldNotExecute {
                    binary: dependency.name(),
                },
                inner.into(),
            ),
            DependencyError::ExecutionFailed {
                dependency,
                explanation,
                ..
            } => AutodiskError::new(ProvisioningError::CommandFailed {
                binary: dependency.name(),
                explanation,
            }),
        }
    }
}

pub trait DependencyResultExt<T> {
    /// Attach a context message to the error.
    fn message(self, context: impl Into<Cow<'static, str>>) -> Result<T, AutodiskError>;
}

impl<T> DependencyResultExt<T> for Result<T, Box<DependencyError>> {
    #[track_caller]
    fn message(self, context: impl Into<Cow<'static, str>>) -> Result<T, AutodiskError> {
        let result: Result<T, AutodiskError> = self.map_err(|e| (*e).into());
        result.message(context)
    }
}

/// External binaries autodisk drives.
#[derive(Debug, Clone, Copy, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum Dependency {
    Blkid,
    Fdisk,
    Lspci,
    Mkfs,
    Mount,
    Mountpoint,
    Udevadm,
    #[cfg(test)]
    Cat,
    #[cfg(test)]
    DoesNotExist,
    #[cfg(test)]
    Echo,
    #[cfg(test)]
    False,
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Dependency {
    /// Name of the binary, e.g. `fdisk` for `Dependency::Fdisk`.
    pub fn name(&self) -> &'static str {
        self.into()
    }

    /// Resolves the binary on `PATH`.
    pub fn path(&self) -> Result<PathBuf, Box<DependencyError>> {
        which::which(self.name()).map_err(|source| {
            Box::new(DependencyError::NotFound {
                dependency: *self,
                source,
            })
        })
    }

    pub fn cmd(&self) -> Command {
        Command {
            dependency: *self,
            args: Vec::new(),
            stdin: None,
        }
    }
}

/// An invocation of a [`Dependency`], built up before it runs.
pub struct Command {
    dependency: Dependency,
    args: Vec<OsString>,
    stdin: Option<Vec<u8>>,
}

impl Command {
    pub fn arg<S: AsRef<OsStr>>(&mut self, arg: S) -> &mut Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    /// Feeds `input` to the process on stdin. Without it, stdin is closed.
    pub fn stdin_bytes(&mut self, input: impl Into<Vec<u8>>) -> &mut Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn run_and_check(&self) -> Result<(), Box<DependencyError>> {
        self.output()?.check()
    }

    /// Runs the command and returns its stdout if it succeeded.
    pub fn output_and_check(&self) -> Result<String, Box<DependencyError>> {
        let output = self.output()?;
        output.check()?;
        Ok(output.output())
    }

    /// Runs the command without checking how it exited.
    pub fn output(&self) -> Result<CommandOutput, Box<DependencyError>> {
        let mut cmd = StdCommand::new(self.dependency.path()?);
        cmd.args(&self.args);

        let command = self.render();
        trace!("Executing '{command}'");
        let inner = self
            .execute(cmd)
            .map_err(|inner| DependencyError::CouldNotExecute {
                dependency: self.dependency,
                inner,
            })?;

        let output = CommandOutput {
            command,
            dependency: self.dependency,
            inner,
        };
        trace!(
            "Executed '{}': {}\n{}",
            output.command,
            output.explain_exit(),
            output.report()
        );
        Ok(output)
    }

    fn render(&self) -> String {
        let mut rendered = self.dependency.name().to_owned();
        for arg in &self.args {
            let arg = arg.to_string_lossy();
            if arg.contains(' ') {
                rendered += &format!(" '{arg}'");
            } else {
                rendered += &format!(" {arg}");
            }
        }
        rendered
    }

    fn execute(&self, mut cmd: StdCommand) -> io::Result<Output> {
        let Some(input) = self.stdin.as_ref() else {
            return cmd.output();
        };

        let mut child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        // Dropping stdin after the write closes it so the process sees EOF. A
        // process may exit before reading all of its input; how it exited is
        // still what counts.
        let written = child.stdin.take().map(|mut stdin| stdin.write_all(input));
        let output = child.wait_with_output()?;

        match written {
            Some(Err(e)) if e.kind() != io::ErrorKind::BrokenPipe => Err(e),
            _ => Ok(output),
        }
    }
}

#[derive(Debug)]
pub struct CommandOutput {
    command: String,
    dependency: Dependency,
    inner: Output,
}

impl CommandOutput {
    /// Gets stdout.
    pub fn output(&self) -> String {
        String::from_utf8_lossy(&self.inner.stdout).into()
    }

    /// Fails with `ExecutionFailed` unless the process exited with status 0.
    pub fn check(&self) -> Result<(), Box<DependencyError>> {
        if self.inner.status.success() {
            return Ok(());
        }

        Err(Box::new(DependencyError::ExecutionFailed {
            dependency: self.dependency,
            command: self.command.clone(),
            explanation: self.explain_exit(),
            report: match self.report() {
                report if !report.is_empty() => report,
                _ => "(no output collected)".into(),
            },
        }))
    }

    pub fn explain_exit(&self) -> String {
        if let Some(code) = self.inner.status.code() {
            format!("exited with status: {code}")
        } else if let Some(signal) = self.inner.status.signal() {
            format!("terminated by signal: {signal}")
        } else {
            "exited with unknown status".into()
        }
    }

    /// Both output streams, labelled, for logs and error reports.
    fn report(&self) -> String {
        [("stdout", &self.inner.stdout), ("stderr", &self.inner.stderr)]
            .into_iter()
            .filter(|(_, stream)| !stream.is_empty())
            .map(|(name, stream)| format!("{name}:\n{}", String::from_utf8_lossy(stream)))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
