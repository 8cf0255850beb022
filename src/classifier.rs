//! Decides which disks are eligible for provisioning and how they are labeled.

use autodisk_api::constants::GIB;
use osutils::{fdisk::PartitionTable, sysfs::Device};

/// Returns whether the device is strictly larger than `threshold_gib` GiB.
pub fn exceeds_threshold(device: &Device, threshold_gib: u64) -> bool {
    device.size_bytes() > threshold_gib.saturating_mul(GIB)
}

/// A candidate is larger than the threshold and carries no partition at all.
pub fn is_candidate(device: &Device, threshold_gib: u64) -> bool {
    exceeds_threshold(device, threshold_gib) && device.partitions().is_empty()
}

/// Returns the first candidate in snapshot order.
pub fn select_candidate(devices: &[Device], threshold_gib: u64) -> Option<&Device> {
    devices
        .iter()
        .find(|device| is_candidate(device, threshold_gib))
}

/// Disks of at least `gpt_threshold_gib` GiB need a GPT label, MBR cannot
/// address them.
pub fn partition_scheme(size_bytes: u64, gpt_threshold_gib: u64) -> PartitionTable {
    if size_bytes >= gpt_threshold_gib.saturating_mul(GIB) {
        PartitionTable::Gpt
    } else {
        PartitionTable::Mbr
    }
}
