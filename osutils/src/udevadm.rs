use crate::dependencies::{Dependency, DependencyError};

/// Waits for udev to finish processing queued events, such as the creation of
/// partition device nodes.
pub fn settle() -> Result<(), Box<DependencyError>> {
    Dependency::Udevadm.cmd().arg("settle").run_and_check()
}
