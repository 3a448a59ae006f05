//! Install plan: the desired end state of the target system.
//!
//! The plan is created empty at session start, mutated incrementally by the
//! caller, and read by the disk planner and config compiler. Users and disks
//! are keyed by name; adding an entry with an existing key replaces it in
//! place so insertion order (and therefore compiled output) stays stable.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::types::{BootLoader, InstallRegion, InstallType};

/// A user account to create on the target system
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserSpec {
    pub name: String,
    #[serde(default)]
    pub comment: String,
    /// Login shell path (e.g. `/usr/local/bin/zsh`)
    pub shell: String,
    /// Home directory (e.g. `/usr/home/alice`)
    pub home: String,
    /// Plaintext; the engine hashes it
    pub password: String,
    #[serde(default)]
    pub groups: BTreeSet<String>,
    #[serde(default)]
    pub autologin: bool,
}

impl UserSpec {
    /// Create a user with the conventional home directory and no groups
    pub fn new(name: &str, password: &str, shell: &str) -> Self {
        Self {
            name: name.to_string(),
            comment: String::new(),
            shell: shell.to_string(),
            home: format!("/usr/home/{}", name),
            password: password.to_string(),
            groups: BTreeSet::new(),
            autologin: false,
        }
    }
}

/// One partition on a target disk
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartitionSpec {
    pub install_type: InstallType,
    /// GELI passphrase; only meaningful for `.eli` install types
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypt_pass: Option<String>,
    /// ZFS datasets for ZFS partitions, mount points for everything else
    #[serde(default)]
    pub targets: Vec<String>,
    /// Size in MB; zero or negative means "use the remaining space"
    pub size_mb: i64,
    /// Opaque directive passed through to the engine
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub extra_setup: String,
}

impl PartitionSpec {
    /// Fixed-size partition
    pub fn fixed(install_type: InstallType, size_mb: i64, targets: &[&str]) -> Self {
        Self {
            install_type,
            encrypt_pass: None,
            targets: targets.iter().map(|t| t.to_string()).collect(),
            size_mb,
            extra_setup: String::new(),
        }
    }

    /// Partition that takes whatever space is left on the disk
    pub fn automatic(install_type: InstallType, targets: &[&str]) -> Self {
        Self::fixed(install_type, 0, targets)
    }

    /// Attach a GELI passphrase
    pub fn with_passphrase(mut self, pass: &str) -> Self {
        self.encrypt_pass = Some(pass.to_string());
        self
    }

    #[inline]
    pub fn is_automatic(&self) -> bool {
        self.size_mb <= 0
    }
}

/// A target disk and the partitions to create on it
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiskSpec {
    /// Device name, e.g. `ada0` or `nvd0`
    pub name: String,
    #[serde(default)]
    pub region: InstallRegion,
    /// Legacy gmirror partner
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mirror_disk: Option<String>,
    #[serde(default)]
    pub install_boot_manager: bool,
    #[serde(default)]
    pub partitions: Vec<PartitionSpec>,
}

impl DiskSpec {
    /// Whole-disk target with a boot manager and no partitions yet
    pub fn whole_disk(name: &str) -> Self {
        Self {
            name: name.to_string(),
            region: InstallRegion::WholeDisk,
            mirror_disk: None,
            install_boot_manager: true,
            partitions: Vec::new(),
        }
    }

    pub fn with_partition(mut self, partition: PartitionSpec) -> Self {
        self.partitions.push(partition);
        self
    }
}

/// Keyboard layout, model and variant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeyboardSettings {
    pub layout: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub variant: String,
}

impl Default for KeyboardSettings {
    fn default() -> Self {
        Self {
            layout: "us".to_string(),
            model: String::new(),
            variant: String::new(),
        }
    }
}

/// Every scalar option the installer recognizes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Settings {
    pub hostname: String,
    pub lang: String,
    pub keyboard: KeyboardSettings,
    pub timezone: String,
    pub use_ntp: bool,
    pub root_password: String,
    /// Partition starts rounded to 4096 bytes; enabled by default
    pub use_4k_alignment: bool,
    pub boot_loader: BootLoader,
    /// Directory holding the distribution files on the install media
    pub dist_path: PathBuf,
    /// Packages to install, in install order
    pub install_packages: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            hostname: "trident".to_string(),
            lang: "en_US".to_string(),
            keyboard: KeyboardSettings::default(),
            timezone: "UTC".to_string(),
            use_ntp: true,
            root_password: String::new(),
            use_4k_alignment: true,
            boot_loader: BootLoader::Bsd,
            dist_path: PathBuf::from("/dist"),
            install_packages: Vec::new(),
        }
    }
}

/// The aggregate install plan
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct InstallPlan {
    pub settings: Settings,
    users: Vec<UserSpec>,
    disks: Vec<DiskSpec>,
    /// Existing pool to install a new boot environment into
    #[serde(skip_serializing_if = "Option::is_none")]
    install_to_be: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    custom_pool_name: Option<String>,
}

impl InstallPlan {
    /// Create an empty plan with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Save the plan to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json =
            serde_json::to_string_pretty(self).context("Failed to serialize install plan to JSON")?;

        fs::write(&path, json)
            .with_context(|| format!("Failed to write install plan to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Load a plan from a JSON file; unknown keys are rejected
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read install plan from {:?}", path.as_ref()))?;

        let plan: Self = serde_json::from_str(&content).context("Failed to parse install plan JSON")?;

        Ok(plan)
    }

    // ------------------------------------------------------------------
    // Scalar settings
    // ------------------------------------------------------------------

    pub fn hostname(&self) -> &str {
        &self.settings.hostname
    }

    pub fn set_hostname(&mut self, hostname: &str) {
        self.settings.hostname = hostname.trim().to_string();
    }

    pub fn lang(&self) -> &str {
        &self.settings.lang
    }

    pub fn set_lang(&mut self, lang: &str) {
        self.settings.lang = lang.to_string();
    }

    pub fn keyboard(&self) -> &KeyboardSettings {
        &self.settings.keyboard
    }

    pub fn set_keyboard(&mut self, keyboard: KeyboardSettings) {
        self.settings.keyboard = keyboard;
    }

    pub fn timezone(&self) -> &str {
        &self.settings.timezone
    }

    pub fn set_timezone(&mut self, timezone: &str) {
        self.settings.timezone = timezone.to_string();
    }

    pub fn use_ntp(&self) -> bool {
        self.settings.use_ntp
    }

    pub fn set_use_ntp(&mut self, enabled: bool) {
        self.settings.use_ntp = enabled;
    }

    pub fn root_password(&self) -> &str {
        &self.settings.root_password
    }

    pub fn set_root_password(&mut self, password: &str) {
        self.settings.root_password = password.to_string();
    }

    pub fn use_4k_alignment(&self) -> bool {
        self.settings.use_4k_alignment
    }

    pub fn set_4k_alignment(&mut self, enabled: bool) {
        self.settings.use_4k_alignment = enabled;
    }

    pub fn boot_loader(&self) -> BootLoader {
        self.settings.boot_loader
    }

    pub fn set_boot_loader(&mut self, loader: BootLoader) {
        self.settings.boot_loader = loader;
    }

    pub fn install_packages(&self) -> &[String] {
        &self.settings.install_packages
    }

    pub fn set_install_packages(&mut self, packages: Vec<String>) {
        self.settings.install_packages = packages;
    }

    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    pub fn users(&self) -> &[UserSpec] {
        &self.users
    }

    /// Add a user, replacing any existing user with the same name
    pub fn add_user(&mut self, user: UserSpec) {
        match self.users.iter_mut().find(|u| u.name == user.name) {
            Some(existing) => *existing = user,
            None => self.users.push(user),
        }
    }

    /// Remove a user by name; returns the removed entry
    pub fn remove_user(&mut self, name: &str) -> Option<UserSpec> {
        let idx = self.users.iter().position(|u| u.name == name)?;
        Some(self.users.remove(idx))
    }

    pub fn clear_users(&mut self) {
        self.users.clear();
    }

    // ------------------------------------------------------------------
    // Disks
    // ------------------------------------------------------------------

    pub fn disks(&self) -> &[DiskSpec] {
        &self.disks
    }

    /// Add a disk, replacing any existing disk with the same device name
    pub fn add_disk(&mut self, disk: DiskSpec) {
        match self.disks.iter_mut().find(|d| d.name == disk.name) {
            Some(existing) => *existing = disk,
            None => self.disks.push(disk),
        }
    }

    /// Remove a disk by device name; returns the removed entry
    pub fn remove_disk(&mut self, name: &str) -> Option<DiskSpec> {
        let idx = self.disks.iter().position(|d| d.name == name)?;
        Some(self.disks.remove(idx))
    }

    pub fn clear_disks(&mut self) {
        self.disks.clear();
    }

    // ------------------------------------------------------------------
    // ZFS pool naming and boot environments
    // ------------------------------------------------------------------

    /// True when a pool has been designated for a boot-environment install
    pub fn install_to_be(&self) -> bool {
        self.install_to_be.is_some()
    }

    /// The pool designated for a boot-environment install
    pub fn be_pool(&self) -> Option<&str> {
        self.install_to_be.as_deref()
    }

    /// Designate a pool for a boot-environment install; empty disables it
    pub fn set_install_to_be(&mut self, pool: &str) {
        let pool = pool.trim();
        self.install_to_be = (!pool.is_empty()).then(|| pool.to_string());
    }

    pub fn custom_pool_name(&self) -> Option<&str> {
        self.custom_pool_name.as_deref()
    }

    /// Override the generated pool name; empty restores the default
    pub fn set_custom_pool_name(&mut self, name: &str) {
        let name = name.trim();
        self.custom_pool_name = (!name.is_empty()).then(|| name.to_string());
    }
}
