use crate::dependencies::{Dependency, DependencyError};

/// The PCI device listing printed by `lspci`, one device per line:
/// `<bus:slot.func> <description>`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PciInventory {
    listing: String,
}

impl PciInventory {
    /// Runs `lspci`. Failure to run it, or a non-zero exit, is an error.
    pub fn load() -> Result<Self, Box<DependencyError>> {
        Dependency::Lspci
            .cmd()
            .output_and_check()
            .map(Self::from_listing)
    }

    pub fn from_listing(listing: impl Into<String>) -> Self {
        Self {
            listing: listing.into(),
        }
    }

    /// Returns the description of the device at PCI address `pci_id` (for
    /// example `00:10.0`), or None if the listing has no such device.
    pub fn find(&self, pci_id: &str) -> Option<&str> {
        self.listing.lines().find_map(|line| {
            line.strip_prefix(pci_id)
                .and_then(|rest| rest.strip_prefix(char::is_whitespace))
        })
    }
}
