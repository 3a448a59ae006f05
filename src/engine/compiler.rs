//! Config Compiler
//!
//! Renders a `ValidatedPlan` into the line-oriented `key=value` text the
//! installation engine reads.
//!
//! # Block order
//!
//! | Block          | Contents |
//! |----------------|----------|
//! | Global         | mode, source, hostname, locale, keyboard, time, root password, pool, alignment |
//! | `# Users`      | one group per user, insertion order |
//! | `# Disk N`     | disk settings, then one line per partition |
//! | `# Packages`   | space-separated install list |
//! | `# Boot Manager` | loader choice |
//!
//! # Design
//!
//! - **Pure**: no I/O; equal input gives byte-identical output
//! - **Two modes**: `Full` is the only text the engine may execute; `Summary`
//!   replaces every secret with `********` and keeps every other line

use std::fmt;
use std::fmt::Write as _;
use thiserror::Error;

use crate::engine::storage::{ResolvedDisk, ValidatedPlan};
use crate::plan::{DiskSpec, InstallPlan, PartitionSpec, UserSpec};
use crate::types::{BootLoader, CompileMode};

/// Replacement for secrets in summary mode
pub const REDACTED: &str = "********";

/// Boot-manager archive shipped on the install media
pub const REFIND_ARCHIVE: &str = "/Trident_refind.zip";

/// Errors for plans that validate against the hardware but cannot be rendered
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("hostname is empty")]
    EmptyHostname,

    #[error("root password is empty")]
    EmptyRootPassword,

    #[error("disk {disk} partition {index}: {install_type} needs an encryption passphrase")]
    MissingPassphrase {
        disk: String,
        index: usize,
        install_type: String,
    },

    #[error("disk {disk} partition {index}: passphrase given for unencrypted {install_type}")]
    UnexpectedPassphrase {
        disk: String,
        index: usize,
        install_type: String,
    },

    #[error("user #{index} has no name")]
    UserWithoutName { index: usize },

    #[error("user {name} has no password")]
    UserWithoutPassword { name: String },

    #[error("only one user may log in automatically (found: {})", .users.join(", "))]
    MultipleAutologin { users: Vec<String> },

    /// The value would break the line or list it is written into
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: &'static str },
}

/// Compiled engine configuration.
///
/// Carries the mode it was rendered in so that redacted text can never be
/// mistaken for executable text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigText {
    mode: CompileMode,
    text: String,
}

impl ConfigText {
    pub fn mode(&self) -> CompileMode {
        self.mode
    }

    /// True for summary output
    pub fn is_redacted(&self) -> bool {
        self.mode == CompileMode::Summary
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn into_string(self) -> String {
        self.text
    }
}

impl fmt::Display for ConfigText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Render a validated plan.
///
/// # Errors
///
/// Returns the first `CompileError` found, checking settings, then users, then
/// partitions in plan order.
pub fn compile(validated: &ValidatedPlan, mode: CompileMode) -> Result<ConfigText, CompileError> {
    let plan = validated.plan();
    check_plan(plan)?;

    let secret = |value: &str| -> String {
        match mode {
            CompileMode::Full => value.to_string(),
            CompileMode::Summary => REDACTED.to_string(),
        }
    };

    let mut blocks = vec![render_global(validated, &secret)];

    if !plan.users().is_empty() {
        blocks.push(render_users(plan.users(), &secret));
    }

    for (n, (disk, resolved)) in plan.disks().iter().zip(validated.disks()).enumerate() {
        blocks.push(render_disk(n, disk, resolved, &secret));
    }

    if !plan.install_packages().is_empty() {
        blocks.push(format!(
            "# Packages\ninstallPackages={}\n",
            plan.install_packages().join(" ")
        ));
    }

    blocks.push(render_boot_manager(plan.boot_loader()));

    let text = blocks.join("\n");
    log::debug!("Compiled {} configuration ({} bytes)", mode, text.len());

    Ok(ConfigText { mode, text })
}

/// Consistency checks the planner does not cover
fn check_plan(plan: &InstallPlan) -> Result<(), CompileError> {
    if plan.hostname().trim().is_empty() {
        return Err(CompileError::EmptyHostname);
    }
    if plan.root_password().is_empty() {
        return Err(CompileError::EmptyRootPassword);
    }
    check_settings(plan)?;

    for (index, user) in plan.users().iter().enumerate() {
        if user.name.is_empty() {
            return Err(CompileError::UserWithoutName { index });
        }
        if user.password.is_empty() {
            return Err(CompileError::UserWithoutPassword {
                name: user.name.clone(),
            });
        }
        check_user(user)?;
    }
    let autologin: Vec<String> = plan
        .users()
        .iter()
        .filter(|u| u.autologin)
        .map(|u| u.name.clone())
        .collect();
    if autologin.len() > 1 {
        return Err(CompileError::MultipleAutologin { users: autologin });
    }

    for (n, disk) in plan.disks().iter().enumerate() {
        check_line(&format!("disk{}", n), &disk.name)?;
        if let Some(mirror) = &disk.mirror_disk {
            check_line("mirror", mirror)?;
        }
        for (index, part) in disk.partitions.iter().enumerate() {
            let has_pass = part.encrypt_pass.as_deref().is_some_and(|p| !p.is_empty());
            if part.install_type.is_encrypted() && !has_pass {
                return Err(CompileError::MissingPassphrase {
                    disk: disk.name.clone(),
                    index,
                    install_type: part.install_type.to_string(),
                });
            }
            if !part.install_type.is_encrypted() && part.encrypt_pass.is_some() {
                return Err(CompileError::UnexpectedPassphrase {
                    disk: disk.name.clone(),
                    index,
                    install_type: part.install_type.to_string(),
                });
            }
            check_partition(n, part)?;
        }
    }
    Ok(())
}

fn check_settings(plan: &InstallPlan) -> Result<(), CompileError> {
    if plan.hostname().contains(char::is_whitespace) {
        return Err(invalid("hostname", "contains whitespace"));
    }
    check_line("localPath", &plan.settings.dist_path.to_string_lossy())?;
    check_line("localizeLang", plan.lang())?;
    let keyboard = plan.keyboard();
    check_line("localizeKeyLayout", &keyboard.layout)?;
    check_line("localizeKeyModel", &keyboard.model)?;
    check_line("localizeKeyVariant", &keyboard.variant)?;
    check_line("timeZone", plan.timezone())?;
    check_line("rootPass", plan.root_password())?;
    for package in plan.install_packages() {
        check_list_item("installPackages", package)?;
    }
    Ok(())
}

fn check_user(user: &UserSpec) -> Result<(), CompileError> {
    if user.name.contains(|c: char| c.is_whitespace() || c == ':') {
        return Err(invalid("userName", "contains whitespace or a colon"));
    }
    check_line("userComment", &user.comment)?;
    check_line("userPass", &user.password)?;
    check_line("userShell", &user.shell)?;
    check_line("userHome", &user.home)?;
    for group in &user.groups {
        check_list_item("userGroups", group)?;
    }
    Ok(())
}

/// Targets are a comma list inside the space-separated partition line;
/// the extra setup directive is the last field and may contain spaces
fn check_partition(n: usize, part: &PartitionSpec) -> Result<(), CompileError> {
    let key = format!("disk{}-part", n);
    for target in &part.targets {
        check_list_item(&key, target)?;
    }
    check_line(&key, &part.extra_setup)?;
    if let Some(pass) = &part.encrypt_pass {
        check_line("encpass", pass)?;
    }
    Ok(())
}

fn invalid(key: &str, reason: &'static str) -> CompileError {
    CompileError::InvalidValue {
        key: key.to_string(),
        reason,
    }
}

/// Every value is written on a single `key=value` line
fn check_line(key: &str, value: &str) -> Result<(), CompileError> {
    if value.contains(['\r', '\n']) {
        return Err(invalid(key, "contains a line break"));
    }
    Ok(())
}

/// Items of space- or comma-separated lists
fn check_list_item(key: &str, item: &str) -> Result<(), CompileError> {
    if item.is_empty() {
        return Err(invalid(key, "contains an empty item"));
    }
    if item.contains(|c: char| c.is_whitespace() || c == ',') {
        return Err(invalid(key, "item contains whitespace or a comma"));
    }
    Ok(())
}

// ============================================================================
// Blocks
// ============================================================================

fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}

fn render_global(validated: &ValidatedPlan, secret: &dyn Fn(&str) -> String) -> String {
    let plan = validated.plan();
    let settings = &plan.settings;
    let mut out = String::from("# tri-install configuration\n");

    let mode = if validated.is_boot_environment() { "bootenv" } else { "fresh" };
    let _ = writeln!(out, "installMode={}", mode);
    out.push_str("installInteractive=no\n");
    out.push_str("installType=FreeBSD\n");
    out.push_str("installMedium=local\n");
    let _ = writeln!(out, "localPath={}", settings.dist_path.display());
    out.push_str("packageType=pkg\n");
    let _ = writeln!(out, "hostname={}", plan.hostname());
    out.push_str("netSaveDev=AUTO-DHCP-SLAAC\n");
    let _ = writeln!(out, "localizeLang={}", plan.lang());

    let keyboard = plan.keyboard();
    let _ = writeln!(out, "localizeKeyLayout={}", keyboard.layout);
    if !keyboard.model.is_empty() {
        let _ = writeln!(out, "localizeKeyModel={}", keyboard.model);
    }
    if !keyboard.variant.is_empty() {
        let _ = writeln!(out, "localizeKeyVariant={}", keyboard.variant);
    }

    let _ = writeln!(out, "timeZone={}", plan.timezone());
    let _ = writeln!(out, "enableNTP={}", yes_no(plan.use_ntp()));
    let _ = writeln!(out, "rootPass={}", secret(plan.root_password()));
    if let Some(pool) = validated.pool_name() {
        let _ = writeln!(out, "zpoolName={}", pool);
    }
    let _ = writeln!(out, "force4k={}", yes_no(plan.use_4k_alignment()));
    out
}

fn render_users(users: &[UserSpec], secret: &dyn Fn(&str) -> String) -> String {
    let mut out = String::from("# Users\n");
    for (i, user) in users.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        let _ = writeln!(out, "userName={}", user.name);
        let _ = writeln!(out, "userComment={}", user.comment);
        let _ = writeln!(out, "userPass={}", secret(&user.password));
        let _ = writeln!(out, "userShell={}", user.shell);
        let _ = writeln!(out, "userHome={}", user.home);
        if !user.groups.is_empty() {
            let groups: Vec<&str> = user.groups.iter().map(String::as_str).collect();
            let _ = writeln!(out, "userGroups={}", groups.join(","));
        }
        if user.autologin {
            out.push_str("autoLogin=yes\n");
        }
        out.push_str("commitUser\n");
    }
    out
}

fn render_disk(
    n: usize,
    disk: &DiskSpec,
    resolved: &ResolvedDisk,
    secret: &dyn Fn(&str) -> String,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Disk {}: {}", n, disk.name);
    let _ = writeln!(out, "disk{}={}", n, disk.name);
    let _ = writeln!(out, "partition={}", disk.region.engine_value());
    let boot_manager = if disk.install_boot_manager { "bsd" } else { "none" };
    let _ = writeln!(out, "bootManager={}", boot_manager);
    let _ = writeln!(out, "partscheme={}", resolved.table);
    if let Some(mirror) = &disk.mirror_disk {
        let _ = writeln!(out, "mirror={}", mirror);
    }
    out.push_str("commitDiskPart\n");

    for (part, placed) in disk.partitions.iter().zip(&resolved.partitions) {
        let _ = writeln!(out, "disk{}-part={}", n, partition_line(part));
        if let Some(pass) = &part.encrypt_pass {
            let _ = writeln!(out, "encpass={}", secret(pass));
        }
        let _ = writeln!(
            out,
            "# resolved: start={} size={}",
            placed.start_bytes, placed.size_bytes
        );
    }
    out.push_str("commitDiskLabel\n");
    out
}

/// `<TYPE> <sizeMB|0> <targets or none>[ <extrasetup>]`
fn partition_line(part: &PartitionSpec) -> String {
    let size = if part.is_automatic() { 0 } else { part.size_mb };
    let targets = if part.targets.is_empty() {
        "none".to_string()
    } else {
        part.targets.join(",")
    };
    let mut line = format!("{} {} {}", part.install_type, size, targets);
    if !part.extra_setup.is_empty() {
        line.push(' ');
        line.push_str(&part.extra_setup);
    }
    line
}

fn render_boot_manager(loader: BootLoader) -> String {
    let mut out = String::from("# Boot Manager\n");
    let _ = writeln!(out, "bootLoader={}", loader);
    if loader == BootLoader::Refind {
        let _ = writeln!(out, "refindArchive={}", REFIND_ARCHIVE);
    }
    out
}
