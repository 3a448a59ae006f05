//! tri-install Library
//!
//! Planning and execution core of the Trident installer: validate an install
//! plan against the host's disks, compile it into `pc-sysinstall` input, and
//! supervise the engine while it runs.

pub mod cli;
pub mod engine;
pub mod error;
pub mod hardware;
pub mod install_state;
pub mod installer;
pub mod logic;
pub mod plan;
pub mod process_guard;
pub mod types;

// Re-export main types for convenience
pub use error::{InstallError, Result};
pub use hardware::{DeviceInfo, Extent, HardwareCatalog, SliceInfo};
pub use install_state::{InstallRunState, RunTransitionError};
pub use plan::{DiskSpec, InstallPlan, KeyboardSettings, PartitionSpec, Settings, UserSpec};
pub use process_guard::CommandProcessGroup;
pub use types::{BootLoader, CompileMode, FirmwareMode, InstallRegion, InstallType, PartitionTable};

// Disk planner
pub use engine::storage::{
    ResolvedDisk, ResolvedPartition, ValidatedPlan, ValidationError, Violation,
    default_partitions, default_zfs_datasets, validate_disk_selection,
};

// Config compiler
pub use engine::compiler::{CompileError, ConfigText, compile};

// Supervisor
pub use installer::{
    Artifact, EngineCommand, InstallEvent, InstallerSupervisor, Observer, SupervisorError,
    refind_archive_available,
};

// Package selection
pub use logic::packages::{
    PackageCatalog, PackageTree, available_shells, build_tree, default_user_shell,
    flatten_selection, set_install_packages,
};
