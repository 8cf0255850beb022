use std::{
    fs::Permissions,
    io::Write,
    os::unix::fs::PermissionsExt,
    path::Path,
};

use anyhow::{Context, Error};

/// Creates all directories in a path if they don't exist
pub fn create_dirs<S>(path: S) -> Result<(), Error>
where
    S: AsRef<Path>,
{
    std::fs::create_dir_all(path.as_ref()).context(format!(
        "Could not create path: {}",
        path.as_ref().display()
    ))
}

/// Reads the content of a file and trims it
pub fn read_file_trim<S>(file_path: &S) -> Result<String, Error>
where
    S: AsRef<Path>,
{
    let content = std::fs::read_to_string(file_path.as_ref()).context(format!(
        "Could not read file contents: {:?}",
        file_path.as_ref()
    ))?;
    Ok(content.trim().to_string())
}

/// Replaces the contents of the file at `path` with `contents`.
///
/// The new contents are written to a temporary file in the same directory,
/// which is then renamed over `path`, so readers see either the old or the
/// new file in full. The permissions of an existing file are kept, a new
/// file gets `default_mode`.
pub fn replace_file<S>(path: S, default_mode: u32, contents: &[u8]) -> Result<(), Error>
where
    S: AsRef<Path>,
{
    let path = path.as_ref();
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mode = match std::fs::metadata(path) {
        Ok(metadata) => metadata.permissions().mode(),
        Err(_) => default_mode,
    };

    let mut file = tempfile::NamedTempFile::new_in(directory).context(format!(
        "Could not create temporary file in {}",
        directory.display()
    ))?;

    file.write_all(contents)
        .and_then(|()| file.as_file().sync_all())
        .context(format!(
            "Could not write new contents of {}",
            path.display()
        ))?;

    std::fs::set_permissions(file.path(), Permissions::from_mode(mode)).context(format!(
        "Could not set permissions {:#o} for new contents of {}",
        mode,
        path.display()
    ))?;

    file.persist(path)
        .context(format!("Could not replace {}", path.display()))?;

    Ok(())
}
