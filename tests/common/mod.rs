//! Shared fixtures for integration tests
#![allow(dead_code)]

use std::time::Duration;
use tempfile::TempDir;

use tri_install::{
    ConfigText, DeviceInfo, DiskSpec, EngineCommand, FirmwareMode, HardwareCatalog, InstallEvent,
    InstallPlan, InstallType, Observer, PartitionSpec, UserSpec, compile, validate_disk_selection,
};
use tri_install::types::CompileMode;

/// Two blank 10000 MB disks on a UEFI host with one existing pool
pub fn test_catalog() -> HardwareCatalog {
    HardwareCatalog {
        firmware: FirmwareMode::Uefi,
        devices: vec![DeviceInfo::blank("ada0", 10_000), DeviceInfo::blank("ada1", 10_000)],
        pools: vec!["tank".to_string()],
    }
}

/// Complete plan: one user, swap + automatic ZFS on ada0
pub fn test_plan() -> InstallPlan {
    let mut plan = InstallPlan::new();
    plan.set_hostname("tribox");
    plan.set_root_password("rootpw");
    plan.add_user(UserSpec::new("alice", "alicepw", "/bin/sh"));
    plan.add_disk(
        DiskSpec::whole_disk("ada0")
            .with_partition(PartitionSpec::fixed(InstallType::Swap, 2000, &["none"]))
            .with_partition(PartitionSpec::automatic(InstallType::Zfs, &["/"])),
    );
    plan
}

pub fn compile_test_plan(mode: CompileMode) -> ConfigText {
    let validated = validate_disk_selection(&test_plan(), &test_catalog())
        .expect("test plan is valid"); // test: fixture
    compile(&validated, mode).expect("test plan compiles") // test: fixture
}

/// `sh -c <script>` with config and log paths inside `dir`.
///
/// The config path is appended after the script, so it is `$0` inside it.
pub fn sh_engine(script: &str, dir: &TempDir) -> EngineCommand {
    EngineCommand::new("sh")
        .arg("-c")
        .arg(script)
        .config_path(dir.path().join("engine.conf"))
        .log_path(dir.path().join("engine.log"))
}

/// Drain an observer until its stream ends (bounded per event)
pub fn collect(observer: Observer) -> Vec<InstallEvent> {
    let mut events = Vec::new();
    while let Some(event) = observer.recv_timeout(Duration::from_secs(20)) {
        events.push(event);
    }
    events
}

pub fn output_lines(events: &[InstallEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            InstallEvent::Output(line) => Some(line.clone()),
            InstallEvent::Finished { .. } => None,
        })
        .collect()
}

pub fn finished_count(events: &[InstallEvent]) -> usize {
    events.iter().filter(|e| e.is_finished()).count()
}
