use std::path::Path;

use crate::dependencies::{Dependency, DependencyError};

/// Creates a `filesystem` filesystem on `device_path` with default options.
pub fn run(device_path: &Path, filesystem: &str) -> Result<(), Box<DependencyError>> {
    Dependency::Mkfs
        .cmd()
        .arg("-t")
        .arg(filesystem)
        .arg(device_path)
        .run_and_check()
}
