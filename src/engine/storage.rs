//! Disk Planner
//!
//! Checks the disks of an `InstallPlan` against a `HardwareCatalog` snapshot
//! and resolves every partition to a concrete byte range.
//!
//! # Checks (per disk, in order)
//!
//! | Check                 | Violation |
//! |-----------------------|-----------|
//! | Device exists         | `UnknownDevice` |
//! | Region is available   | `NoFreeSpace`, `UnknownSlice` |
//! | Fixed sizes fit       | `InsufficientSpace` |
//! | Automatic size usable | `AutomaticTooSmall` |
//!
//! Ordering, mirror, pool naming and boot loader rules are checked alongside.
//!
//! # Design
//!
//! - **Pure logic**: No I/O, no side effects; the catalog is a snapshot
//! - **Exhaustive**: Every violation is collected, not just the first
//! - **Typed output**: Only a `ValidatedPlan` can be compiled

use std::fmt;
use thiserror::Error;

use crate::hardware::{Extent, HardwareCatalog, MIB};
use crate::plan::{DiskSpec, InstallPlan, PartitionSpec};
use crate::types::{FirmwareMode, InstallRegion, InstallType, PartitionTable};

/// Partition starts are rounded up to this boundary when 4K alignment is on
pub const ALIGNMENT_BYTES: u64 = 4096;

/// Smallest automatic partition worth creating (smallest vdev ZFS accepts)
pub const MIN_AUTO_PARTITION_MB: u64 = 64;

/// Sectors used by the primary GPT header and entries
const GPT_HEADER_SECTORS: u64 = 34;
/// Sectors used by the backup GPT at the end of the device
const GPT_BACKUP_SECTORS: u64 = 33;

/// Words ZFS reserves for vdev types; pool names may not start with them
const RESERVED_POOL_PREFIXES: &[&str] = &["mirror", "raidz", "draid", "spare", "log"];

// ============================================================================
// Errors
// ============================================================================

/// A single constraint the plan violates
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    #[error("no target disk selected")]
    NoTargetDisk,

    #[error("disk {disk}: device not found on this system")]
    UnknownDevice { disk: String },

    #[error("disk {disk}: no unpartitioned free space available")]
    NoFreeSpace { disk: String },

    #[error("disk {disk}: slice {slice} does not exist")]
    UnknownSlice { disk: String, slice: String },

    #[error("disk {disk}: partitions need {requested_mb} MB but only {available_mb} MB are available")]
    InsufficientSpace {
        disk: String,
        requested_mb: u64,
        available_mb: u64,
    },

    #[error("disk {disk}: only {available_mb} MB left for the automatic partition (minimum {minimum_mb} MB)")]
    AutomaticTooSmall {
        disk: String,
        available_mb: u64,
        minimum_mb: u64,
    },

    #[error("disk {disk}: only one partition may use the remaining space")]
    MultipleAutomatic { disk: String },

    #[error("disk {disk}: the automatically sized partition must be the last one")]
    AutomaticNotLast { disk: String },

    #[error("disk {disk}: mirror disk {mirror} not found on this system")]
    UnknownMirror { disk: String, mirror: String },

    #[error("disk {disk}: a disk cannot mirror itself")]
    MirrorSelf { disk: String },

    #[error("disk {disk}: mirror disk {mirror} is also configured as an install target")]
    MirrorInUse { disk: String, mirror: String },

    #[error("disk {disk}: mirroring requires a whole-disk install")]
    MirrorNeedsWholeDisk { disk: String },

    #[error("boot environment pool {pool} not found on this system")]
    UnknownPool { pool: String },

    #[error("disks are configured but the install targets a boot environment in pool {pool}")]
    DisksWithBootEnvironment { pool: String },

    #[error("pool name {name} is invalid: {reason}")]
    InvalidPoolName { name: String, reason: String },

    #[error("pool name {name} is already in use on this system")]
    PoolNameInUse { name: String },

    #[error("rEFInd requires UEFI firmware but the host booted with {firmware}")]
    BootLoaderUnsupported { firmware: FirmwareMode },
}

impl Violation {
    /// The disk this violation is about, if it concerns a single disk
    pub fn disk(&self) -> Option<&str> {
        match self {
            Self::UnknownDevice { disk }
            | Self::NoFreeSpace { disk }
            | Self::UnknownSlice { disk, .. }
            | Self::InsufficientSpace { disk, .. }
            | Self::AutomaticTooSmall { disk, .. }
            | Self::MultipleAutomatic { disk }
            | Self::AutomaticNotLast { disk }
            | Self::UnknownMirror { disk, .. }
            | Self::MirrorSelf { disk }
            | Self::MirrorInUse { disk, .. }
            | Self::MirrorNeedsWholeDisk { disk } => Some(disk),
            _ => None,
        }
    }
}

/// Every constraint the plan violates against the live devices
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("install plan does not fit this system: {}", join_violations(.violations))]
pub struct ValidationError {
    violations: Vec<Violation>,
}

fn join_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationError {
    pub fn new(violations: Vec<Violation>) -> Self {
        Self { violations }
    }

    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    /// Disks named by at least one violation, in report order
    pub fn disks(&self) -> Vec<&str> {
        let mut disks: Vec<&str> = Vec::new();
        for disk in self.violations.iter().filter_map(Violation::disk) {
            if !disks.contains(&disk) {
                disks.push(disk);
            }
        }
        disks
    }
}

// ============================================================================
// Validated plan
// ============================================================================

/// A partition with its resolved position on the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedPartition {
    pub install_type: InstallType,
    pub start_bytes: u64,
    pub size_bytes: u64,
    /// Size was derived from the remaining space
    pub automatic: bool,
}

impl ResolvedPartition {
    /// Whole MB covered by this partition
    #[inline]
    pub fn size_mb(&self) -> u64 {
        self.size_bytes / MIB
    }

    #[inline]
    pub fn end_bytes(&self) -> u64 {
        self.start_bytes.saturating_add(self.size_bytes)
    }
}

/// A disk with its usable region and resolved partitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDisk {
    pub name: String,
    /// Bytes the install takes over: the whole device, or the free region/slice
    pub capacity_bytes: u64,
    /// Byte range the partitions were laid out in
    pub region: Extent,
    /// Table the engine writes (whole disk) or finds (free space / slice)
    pub table: PartitionTable,
    pub partitions: Vec<ResolvedPartition>,
}

impl ResolvedDisk {
    /// Bytes of the capacity not covered by any partition: the GPT
    /// reservation on whole disks, alignment padding and any unused tail
    pub fn alignment_overhead_bytes(&self) -> u64 {
        let used: u64 = self.partitions.iter().map(|p| p.size_bytes).sum();
        self.capacity_bytes.saturating_sub(used)
    }
}

/// An install plan that passed validation against a hardware snapshot.
///
/// Holds a normalized copy of the plan; later changes to the caller's plan do
/// not leak into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedPlan {
    plan: InstallPlan,
    disks: Vec<ResolvedDisk>,
    pool_name: Option<String>,
    firmware: FirmwareMode,
}

impl ValidatedPlan {
    /// The normalized plan (default layouts filled in)
    pub fn plan(&self) -> &InstallPlan {
        &self.plan
    }

    pub fn disks(&self) -> &[ResolvedDisk] {
        &self.disks
    }

    pub fn disk(&self, name: &str) -> Option<&ResolvedDisk> {
        self.disks.iter().find(|d| d.name == name)
    }

    /// Pool the installation creates or installs into, if ZFS is in play
    pub fn pool_name(&self) -> Option<&str> {
        self.pool_name.as_deref()
    }

    /// True when installing a new boot environment into an existing pool
    pub fn is_boot_environment(&self) -> bool {
        self.plan.install_to_be()
    }

    pub fn firmware(&self) -> FirmwareMode {
        self.firmware
    }

    /// Summary of the resolved layout for logging/display.
    pub fn summary(&self) -> String {
        let mut lines = vec![format!(
            "Disk plan: {} disk(s), pool={}",
            self.disks.len(),
            self.pool_name.as_deref().unwrap_or("-")
        )];
        for disk in &self.disks {
            lines.push(format!(
                "  {} [{}] region {}+{} bytes",
                disk.name, disk.table, disk.region.start_bytes, disk.region.size_bytes
            ));
            for (i, part) in disk.partitions.iter().enumerate() {
                lines.push(format!(
                    "    {}. {} {} MB at {}{}",
                    i + 1,
                    part.install_type,
                    part.size_mb(),
                    part.start_bytes,
                    if part.automatic { " (auto)" } else { "" }
                ));
            }
        }
        lines.join("\n")
    }
}

impl fmt::Display for ValidatedPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary())
    }
}

// ============================================================================
// Validation
// ============================================================================

/// Validate the plan's disk selection against the devices present on the host.
///
/// Returns a `ValidatedPlan` with every partition resolved to a byte range, or
/// a `ValidationError` listing every violated constraint.
///
/// # What This Explicitly Refuses To Do
///
/// - Touch a device: the catalog is the only source of truth
/// - Return a partially valid plan: any violation fails the whole plan
pub fn validate_disk_selection(
    plan: &InstallPlan,
    catalog: &HardwareCatalog,
) -> Result<ValidatedPlan, ValidationError> {
    let plan = normalize(plan);
    let mut violations = Vec::new();

    if !catalog.is_boot_loader_compatible(plan.boot_loader()) {
        violations.push(Violation::BootLoaderUnsupported {
            firmware: catalog.firmware,
        });
    }

    let mut disks = Vec::new();
    let pool_name = if let Some(pool) = plan.be_pool() {
        if !catalog.pool_exists(pool) {
            violations.push(Violation::UnknownPool {
                pool: pool.to_string(),
            });
        }
        if !plan.disks().is_empty() {
            violations.push(Violation::DisksWithBootEnvironment {
                pool: pool.to_string(),
            });
        }
        Some(pool.to_string())
    } else {
        if plan.disks().is_empty() {
            violations.push(Violation::NoTargetDisk);
        }
        for disk in plan.disks() {
            if let Some(resolved) = check_disk(disk, &plan, catalog, &mut violations) {
                disks.push(resolved);
            }
        }
        resolve_pool_name(&plan, catalog, &mut violations)
    };

    if !violations.is_empty() {
        log::warn!("Disk selection rejected with {} violation(s)", violations.len());
        for violation in &violations {
            log::debug!("  {}", violation);
        }
        return Err(ValidationError::new(violations));
    }

    let validated = ValidatedPlan {
        plan,
        disks,
        pool_name,
        firmware: catalog.firmware,
    };
    log::info!("{}", validated.summary());
    Ok(validated)
}

/// Copy of the plan with the default layout applied to disks without partitions
fn normalize(plan: &InstallPlan) -> InstallPlan {
    let mut normalized = plan.clone();
    for disk in plan.disks().iter().filter(|d| d.partitions.is_empty()) {
        log::debug!("Disk {} has no partitions, using default layout", disk.name);
        normalized.add_disk(DiskSpec {
            partitions: default_partitions(0),
            ..disk.clone()
        });
    }
    normalized
}

/// Run every per-disk check; returns the resolved disk when the layout fits
fn check_disk(
    disk: &DiskSpec,
    plan: &InstallPlan,
    catalog: &HardwareCatalog,
    violations: &mut Vec<Violation>,
) -> Option<ResolvedDisk> {
    let name = disk.name.clone();
    let ordering_ok = check_automatic_ordering(disk, violations);
    check_mirror(disk, plan, catalog, violations);

    let Some(device) = catalog.device(&disk.name) else {
        violations.push(Violation::UnknownDevice { disk: name });
        return None;
    };

    let (capacity_bytes, region, table) = match &disk.region {
        InstallRegion::WholeDisk => {
            let head = GPT_HEADER_SECTORS.saturating_mul(device.sector_size);
            let tail = GPT_BACKUP_SECTORS.saturating_mul(device.sector_size);
            let region = Extent {
                start_bytes: head,
                size_bytes: device.size_bytes.saturating_sub(head.saturating_add(tail)),
            };
            (device.size_bytes, region, PartitionTable::Gpt)
        }
        InstallRegion::FreeSpace => match device.largest_free_region() {
            Some(region) => (region.size_bytes, region, device.table),
            None => {
                violations.push(Violation::NoFreeSpace { disk: name });
                return None;
            }
        },
        InstallRegion::Slice(slice) => match device.slice(slice) {
            Some(info) => (info.size_bytes, info.extent(), device.table),
            None => {
                violations.push(Violation::UnknownSlice {
                    disk: name,
                    slice: slice.clone(),
                });
                return None;
            }
        },
    };

    if !ordering_ok {
        return None;
    }

    let partitions = layout_partitions(&disk.name, region, &disk.partitions, plan.use_4k_alignment(), violations)?;

    Some(ResolvedDisk {
        name,
        capacity_bytes,
        region,
        table,
        partitions,
    })
}

/// At most one automatic partition, and only in the last position
fn check_automatic_ordering(disk: &DiskSpec, violations: &mut Vec<Violation>) -> bool {
    let automatic: Vec<usize> = disk
        .partitions
        .iter()
        .enumerate()
        .filter(|(_, p)| p.is_automatic())
        .map(|(i, _)| i)
        .collect();

    if automatic.len() > 1 {
        violations.push(Violation::MultipleAutomatic {
            disk: disk.name.clone(),
        });
        return false;
    }
    if let Some(&idx) = automatic.first() {
        if idx + 1 != disk.partitions.len() {
            violations.push(Violation::AutomaticNotLast {
                disk: disk.name.clone(),
            });
            return false;
        }
    }
    true
}

fn check_mirror(
    disk: &DiskSpec,
    plan: &InstallPlan,
    catalog: &HardwareCatalog,
    violations: &mut Vec<Violation>,
) {
    let Some(mirror) = disk.mirror_disk.as_deref() else {
        return;
    };
    let disk_name = disk.name.clone();

    if mirror == disk.name {
        violations.push(Violation::MirrorSelf { disk: disk_name });
        return;
    }
    if catalog.device(mirror).is_none() {
        violations.push(Violation::UnknownMirror {
            disk: disk_name.clone(),
            mirror: mirror.to_string(),
        });
    }
    if plan.disks().iter().any(|d| d.name == mirror) {
        violations.push(Violation::MirrorInUse {
            disk: disk_name.clone(),
            mirror: mirror.to_string(),
        });
    }
    if disk.region != InstallRegion::WholeDisk {
        violations.push(Violation::MirrorNeedsWholeDisk { disk: disk_name });
    }
}

/// Lay the partitions out front to back inside `region`.
///
/// With alignment on, every start is rounded up to `ALIGNMENT_BYTES` and the
/// automatic partition is trimmed to a multiple of it. Fixed partitions always
/// get exactly the requested size.
fn layout_partitions(
    disk: &str,
    region: Extent,
    partitions: &[PartitionSpec],
    align: bool,
    violations: &mut Vec<Violation>,
) -> Option<Vec<ResolvedPartition>> {
    let region_end = region.end_bytes();
    let mut cursor = region.start_bytes;
    let mut resolved = Vec::with_capacity(partitions.len());

    let requested_mb: u64 = partitions
        .iter()
        .filter(|p| !p.is_automatic())
        .fold(0u64, |acc, p| acc.saturating_add(p.size_mb as u64));
    let insufficient = || Violation::InsufficientSpace {
        disk: disk.to_string(),
        requested_mb,
        available_mb: region.size_bytes / MIB,
    };

    for spec in partitions {
        if align {
            cursor = align_up(cursor);
        }
        let start = cursor;

        let size = if spec.is_automatic() {
            let available = region_end.saturating_sub(start);
            if align { align_down(available) } else { available }
        } else {
            // Sizes beyond u64 bytes can never fit
            match (spec.size_mb as u64).checked_mul(MIB) {
                Some(size) => size,
                None => {
                    violations.push(insufficient());
                    return None;
                }
            }
        };
        let Some(end) = start.checked_add(size) else {
            violations.push(insufficient());
            return None;
        };
        resolved.push(ResolvedPartition {
            install_type: spec.install_type,
            start_bytes: start,
            size_bytes: size,
            automatic: spec.is_automatic(),
        });
        cursor = end;
    }

    let fixed_end = resolved
        .iter()
        .filter(|p| !p.automatic)
        .map(ResolvedPartition::end_bytes)
        .max()
        .unwrap_or(region.start_bytes);

    if fixed_end > region_end {
        violations.push(insufficient());
        return None;
    }

    if let Some(auto) = resolved.iter().find(|p| p.automatic) {
        if auto.size_bytes < MIN_AUTO_PARTITION_MB * MIB {
            violations.push(Violation::AutomaticTooSmall {
                disk: disk.to_string(),
                available_mb: auto.size_mb(),
                minimum_mb: MIN_AUTO_PARTITION_MB,
            });
            return None;
        }
    }

    Some(resolved)
}

#[inline]
fn align_up(offset: u64) -> u64 {
    offset.div_ceil(ALIGNMENT_BYTES).saturating_mul(ALIGNMENT_BYTES)
}

#[inline]
fn align_down(size: u64) -> u64 {
    size / ALIGNMENT_BYTES * ALIGNMENT_BYTES
}

// ============================================================================
// Pool naming
// ============================================================================

/// Effective pool name for a fresh install, or `None` without ZFS partitions
fn resolve_pool_name(
    plan: &InstallPlan,
    catalog: &HardwareCatalog,
    violations: &mut Vec<Violation>,
) -> Option<String> {
    let first_zfs = plan
        .disks()
        .iter()
        .find(|d| d.partitions.iter().any(|p| p.install_type.is_zfs()));

    let Some(first_zfs) = first_zfs else {
        if let Some(custom) = plan.custom_pool_name() {
            log::warn!("Custom pool name {} ignored: no ZFS partitions planned", custom);
        }
        return None;
    };

    match plan.custom_pool_name() {
        Some(custom) => {
            if let Err(reason) = check_pool_name(custom) {
                violations.push(Violation::InvalidPoolName {
                    name: custom.to_string(),
                    reason,
                });
                None
            } else if catalog.pool_exists(custom) {
                violations.push(Violation::PoolNameInUse {
                    name: custom.to_string(),
                });
                None
            } else {
                Some(custom.to_string())
            }
        }
        None => Some(default_pool_name(&first_zfs.name, catalog)),
    }
}

/// Generated pool name: `zroot-<device>`, suffixed `-1`, `-2`, ... until it
/// does not collide with a pool on the host.
pub fn default_pool_name(device: &str, catalog: &HardwareCatalog) -> String {
    let sanitized: String = device
        .chars()
        .map(|c| if is_pool_name_char(c) { c } else { '_' })
        .collect();
    let base = format!("zroot-{}", sanitized);

    if !catalog.pool_exists(&base) {
        return base;
    }
    (1..)
        .map(|n| format!("{}-{}", base, n))
        .find(|candidate| !catalog.pool_exists(candidate))
        .unwrap_or(base)
}

fn is_pool_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':')
}

/// ZFS pool naming rules: leading letter, limited charset, no reserved words
pub fn check_pool_name(name: &str) -> Result<(), String> {
    let Some(first) = name.chars().next() else {
        return Err("name is empty".to_string());
    };
    if !first.is_ascii_alphabetic() {
        return Err("must start with a letter".to_string());
    }
    if name.len() > 255 {
        return Err("longer than 255 characters".to_string());
    }
    if let Some(bad) = name.chars().find(|c| !is_pool_name_char(*c)) {
        return Err(format!("character '{}' is not allowed", bad));
    }
    if let Some(word) = RESERVED_POOL_PREFIXES.iter().find(|w| name.starts_with(*w)) {
        return Err(format!("names starting with '{}' are reserved", word));
    }
    let mut chars = name.chars();
    if chars.next() == Some('c') && chars.next().is_some_and(|c| c.is_ascii_digit()) {
        return Err("c[0-9] prefixes are reserved for device names".to_string());
    }
    Ok(())
}

// ============================================================================
// Default layout
// ============================================================================

/// Dataset list for a fresh ZFS install
pub fn default_zfs_datasets() -> Vec<String> {
    [
        "/(compress=lz4|atime=off)",
        "/tmp(compress=lz4|setuid=off)",
        "/usr(canmount=off|mountpoint=none)",
        "/usr/home(compress=lz4)",
        "/usr/jails(compress=lz4)",
        "/usr/obj(compress=lz4)",
        "/usr/ports(compress=lz4)",
        "/usr/src(compress=lz4)",
        "/var(canmount=off|atime=on|mountpoint=none)",
        "/var/audit(compress=lz4)",
        "/var/log(compress=lz4|exec=off|setuid=off)",
        "/var/mail(compress=lz4)",
        "/var/tmp(compress=lz4|exec=off|setuid=off)",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Default disk layout: optional fixed swap, then ZFS on the remaining space
pub fn default_partitions(swap_mb: u64) -> Vec<PartitionSpec> {
    let mut partitions = Vec::with_capacity(2);
    if swap_mb > 0 {
        partitions.push(PartitionSpec::fixed(InstallType::Swap, swap_mb as i64, &["none"]));
    }
    partitions.push(PartitionSpec {
        targets: default_zfs_datasets(),
        ..PartitionSpec::automatic(InstallType::Zfs, &[])
    });
    partitions
}

// ============================================================================
// Tests
// ============================================================================
