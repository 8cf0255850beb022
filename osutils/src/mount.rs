use std::path::Path;

use anyhow::{bail, Context, Error};

use crate::{
    dependencies::{Dependency, DependencyError},
    files,
};

/// Mounts the block device `path` of type `filesystem` at `mount_dir`.
pub fn mount(
    path: impl AsRef<Path>,
    mount_dir: impl AsRef<Path>,
    filesystem: &str,
    options: &[&str],
) -> Result<(), Box<DependencyError>> {
    let mut command = Dependency::Mount.cmd();

    if !options.is_empty() {
        command.arg("-o").arg(options.join(","));
    }

    command
        .arg("-t")
        .arg(filesystem)
        .arg(path.as_ref())
        .arg(mount_dir.as_ref())
        .run_and_check()
}

/// Ensures that `target_path` exists and is a directory, creating it and its
/// parents when missing.
pub fn ensure_mount_directory(target_path: &Path) -> Result<(), Error> {
    if target_path.exists() {
        if !target_path.is_dir() {
            bail!("Mount path '{}' is not a directory", target_path.display());
        }
    } else {
        files::create_dirs(target_path).context(format!(
            "Failed to create mount path '{}'",
            target_path.display()
        ))?;
    }

    Ok(())
}
