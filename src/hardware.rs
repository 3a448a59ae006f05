//! Host hardware snapshot consumed by the disk planner.
//!
//! The catalog is produced by an external probe (geom/gpart/zpool on the live
//! media) and handed to this crate as already-parsed data. Nothing here talks
//! to block devices; the planner only reads the snapshot.
//!
//! # Integration
//!
//! Load the snapshot with `HardwareCatalog::load_from_file()` (or build it in
//! memory) and refresh it on demand between runs, never during one.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;

use crate::types::{BootLoader, FirmwareMode, PartitionTable};

/// Bytes in one MB as the installation engine counts them
pub const MIB: u64 = 1024 * 1024;

/// A contiguous byte range on a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Extent {
    pub start_bytes: u64,
    pub size_bytes: u64,
}

impl Extent {
    #[inline]
    pub fn end_bytes(&self) -> u64 {
        self.start_bytes.saturating_add(self.size_bytes)
    }
}

/// An existing slice/partition on a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SliceInfo {
    /// `s1`, `p2`, ...
    pub name: String,
    pub start_bytes: u64,
    pub size_bytes: u64,
    /// Partition type as reported by the probe (e.g. `freebsd-zfs`)
    #[serde(default)]
    pub kind: String,
}

impl SliceInfo {
    pub fn extent(&self) -> Extent {
        Extent {
            start_bytes: self.start_bytes,
            size_bytes: self.size_bytes,
        }
    }
}

fn default_sector_size() -> u64 {
    512
}

/// One block device present on the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceInfo {
    pub name: String,
    #[serde(default)]
    pub model: String,
    pub size_bytes: u64,
    #[serde(default = "default_sector_size")]
    pub sector_size: u64,
    #[serde(default)]
    pub table: PartitionTable,
    #[serde(default)]
    pub free_regions: Vec<Extent>,
    #[serde(default)]
    pub slices: Vec<SliceInfo>,
}

impl DeviceInfo {
    /// Blank device of the given size in MB (512-byte sectors, no table)
    pub fn blank(name: &str, size_mb: u64) -> Self {
        Self {
            name: name.to_string(),
            model: String::new(),
            size_bytes: size_mb.saturating_mul(MIB),
            sector_size: 512,
            table: PartitionTable::None,
            free_regions: Vec::new(),
            slices: Vec::new(),
        }
    }

    /// Largest unpartitioned region, if any
    pub fn largest_free_region(&self) -> Option<Extent> {
        self.free_regions
            .iter()
            .copied()
            .filter(|r| r.size_bytes > 0)
            .max_by_key(|r| r.size_bytes)
    }

    pub fn slice(&self, name: &str) -> Option<&SliceInfo> {
        self.slices.iter().find(|s| s.name == name)
    }

    /// One-line description, e.g. `ada0: 238.5 GB (Samsung SSD 860)`
    pub fn short_description(&self) -> String {
        let size = bytes_to_human(self.size_bytes);
        if self.model.is_empty() {
            format!("{}: {}", self.name, size)
        } else {
            format!("{}: {} ({})", self.name, size, self.model)
        }
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.short_description())?;
        if self.table != PartitionTable::None {
            write!(f, " [{}", self.table)?;
            for slice in &self.slices {
                write!(f, " {}={}", slice.name, bytes_to_human(slice.size_bytes))?;
            }
            write!(f, "]")?;
        }
        Ok(())
    }
}

/// Read-only snapshot of the devices and pools present on the host.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct HardwareCatalog {
    pub firmware: FirmwareMode,
    pub devices: Vec<DeviceInfo>,
    /// Names of ZFS pools already imported or importable on the host
    pub pools: Vec<String>,
}

impl HardwareCatalog {
    /// Load a probe snapshot from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read hardware catalog from {:?}", path.as_ref()))?;

        let catalog: Self =
            serde_json::from_str(&content).context("Failed to parse hardware catalog JSON")?;

        log::info!(
            "Hardware catalog: firmware={}, {} device(s), {} pool(s)",
            catalog.firmware,
            catalog.devices.len(),
            catalog.pools.len()
        );

        Ok(catalog)
    }

    pub fn device(&self, name: &str) -> Option<&DeviceInfo> {
        self.devices.iter().find(|d| d.name == name)
    }

    pub fn pool_exists(&self, name: &str) -> bool {
        self.pools.iter().any(|p| p == name)
    }

    /// Returns true if the boot loader choice is compatible with the firmware.
    ///
    /// rEFInd is a UEFI application. The stock loader works with both.
    pub fn is_boot_loader_compatible(&self, loader: BootLoader) -> bool {
        match loader {
            BootLoader::Refind => self.firmware.is_uefi(),
            BootLoader::Bsd => true,
        }
    }
}

// ============================================================================
// Size formatting
// ============================================================================

/// Render a byte count with a binary unit, e.g. `1.5 GB`
pub fn bytes_to_human(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

/// Render a size given in MB
pub fn mb_to_human(mb: f64) -> String {
    if mb <= 0.0 {
        return "0 B".to_string();
    }
    bytes_to_human((mb * MIB as f64).round() as u64)
}
