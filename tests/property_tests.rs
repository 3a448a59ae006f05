//! Property-Based Tests for tri-install
//!
//! These tests verify:
//! - Compiler determinism and full/summary agreement, including hostile secrets
//! - Replace-by-key for users and disks
//! - Alignment arithmetic for arbitrary fixed sizes
//! - Dependency closure of flattened selections

use proptest::prelude::*;
use std::collections::HashSet;

use tri_install::engine::compiler::{CompileError, REDACTED};
use tri_install::hardware::MIB;
use tri_install::types::CompileMode;
use tri_install::{
    DeviceInfo, DiskSpec, FirmwareMode, HardwareCatalog, InstallPlan, InstallType, PackageCatalog,
    PartitionSpec, UserSpec, build_tree, compile, flatten_selection, validate_disk_selection,
};

fn catalog(size_mb: u64) -> HardwareCatalog {
    HardwareCatalog {
        firmware: FirmwareMode::Uefi,
        devices: vec![DeviceInfo::blank("ada0", size_mb)],
        pools: Vec::new(),
    }
}

/// Strategy for secrets that cannot collide with other config text
fn secret_strategy() -> impl Strategy<Value = String> {
    "[a-z]{6,12}".prop_map(|s| format!("S3cr3t-{}", s))
}

fn name_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9]{0,7}"
}

// =============================================================================
// Compiler
// =============================================================================

proptest! {
    /// Equal plans compile to identical text; summary differs only in secrets
    #[test]
    fn compile_deterministic_and_redacted(
        root in secret_strategy(),
        user_pw in secret_strategy(),
        geli in secret_strategy(),
        user in name_strategy(),
        swap_mb in 64i64..4000,
    ) {
        let mut plan = InstallPlan::new();
        plan.set_root_password(&root);
        plan.add_user(UserSpec::new(&user, &user_pw, "/bin/sh"));
        plan.add_disk(
            DiskSpec::whole_disk("ada0")
                .with_partition(PartitionSpec::fixed(InstallType::SwapEli, swap_mb, &["none"]).with_passphrase(&geli))
                .with_partition(PartitionSpec::automatic(InstallType::Zfs, &["/"])),
        );

        let validated = validate_disk_selection(&plan, &catalog(20_000)).expect("fits");
        let full = compile(&validated, CompileMode::Full).expect("compiles");
        let again = compile(&validate_disk_selection(&plan.clone(), &catalog(20_000)).expect("fits"), CompileMode::Full)
            .expect("compiles");
        prop_assert_eq!(full.as_str(), again.as_str());

        let summary = compile(&validated, CompileMode::Summary).expect("compiles");
        for secret in [&root, &user_pw, &geli] {
            prop_assert!(!summary.as_str().contains(secret.as_str()));
            prop_assert!(full.as_str().contains(secret.as_str()));
        }
        let full_lines: Vec<&str> = full.as_str().lines().collect();
        let summary_lines: Vec<&str> = summary.as_str().lines().collect();
        prop_assert_eq!(full_lines.len(), summary_lines.len());
        for (f, s) in full_lines.iter().zip(&summary_lines) {
            if f != s {
                prop_assert!(s.ends_with(REDACTED));
            }
        }
    }
}

proptest! {
    /// Whatever the secrets contain, a compiled summary has the same lines as
    /// the full text, so no value can smuggle in extra directives
    #[test]
    fn secrets_cannot_add_lines(
        root in "[ -~\r\n]{1,24}",
        user_pw in "[ -~\r\n]{1,24}",
    ) {
        let mut plan = InstallPlan::new();
        plan.set_root_password(&root);
        plan.add_user(UserSpec::new("alice", &user_pw, "/bin/sh"));
        plan.add_disk(
            DiskSpec::whole_disk("ada0")
                .with_partition(PartitionSpec::automatic(InstallType::Zfs, &["/"])),
        );
        let validated = validate_disk_selection(&plan, &catalog(20_000)).expect("fits");

        match (
            compile(&validated, CompileMode::Full),
            compile(&validated, CompileMode::Summary),
        ) {
            (Ok(full), Ok(summary)) => {
                prop_assert!(!root.contains(['\r', '\n']) && !user_pw.contains(['\r', '\n']));
                prop_assert_eq!(full.as_str().lines().count(), summary.as_str().lines().count());
            }
            (Err(full), Err(summary)) => {
                prop_assert_eq!(&full, &summary);
                let is_invalid_value = matches!(full, CompileError::InvalidValue { .. });
                prop_assert!(is_invalid_value);
            }
            (full, summary) => {
                prop_assert!(false, "modes disagree: {:?} / {:?}", full.is_ok(), summary.is_ok());
            }
        }
    }
}

// =============================================================================
// Plan
// =============================================================================

proptest! {
    /// Adding entries by key leaves exactly one entry per key, first-seen order
    #[test]
    fn replace_by_key(names in proptest::collection::vec(name_strategy(), 1..20)) {
        let mut plan = InstallPlan::new();
        for (i, name) in names.iter().enumerate() {
            plan.add_user(UserSpec::new(name, &format!("pw{}", i), "/bin/sh"));
            plan.add_disk(DiskSpec::whole_disk(name));
        }

        let mut seen = Vec::new();
        for name in &names {
            if !seen.contains(name) {
                seen.push(name.clone());
            }
        }
        let users: Vec<String> = plan.users().iter().map(|u| u.name.clone()).collect();
        let disks: Vec<String> = plan.disks().iter().map(|d| d.name.clone()).collect();
        prop_assert_eq!(&users, &seen);
        prop_assert_eq!(&disks, &seen);

        // Last write wins
        for user in plan.users() {
            let last = names.iter().rposition(|n| *n == user.name).expect("present");
            prop_assert_eq!(&user.password, &format!("pw{}", last));
        }
    }
}

// =============================================================================
// Disk planner
// =============================================================================

proptest! {
    /// Fixed sizes are kept exactly; the automatic partition gets the device
    /// capacity minus the fixed sizes and the overhead (GPT plus alignment)
    #[test]
    fn alignment_arithmetic(disk_mb in 1_000u64..200_000, fixed_pct in 1u64..90) {
        let fixed_mb = (disk_mb * fixed_pct / 100).max(1);
        let mut plan = InstallPlan::new();
        plan.add_disk(
            DiskSpec::whole_disk("ada0")
                .with_partition(PartitionSpec::fixed(InstallType::Swap, fixed_mb as i64, &["none"]))
                .with_partition(PartitionSpec::automatic(InstallType::Ufs, &["/"])),
        );

        match validate_disk_selection(&plan, &catalog(disk_mb)) {
            Ok(validated) => {
                let disk = &validated.disks()[0];
                let overhead = disk.alignment_overhead_bytes();
                prop_assert_eq!(disk.partitions[0].size_bytes, fixed_mb * MIB);
                prop_assert!(overhead < MIB);
                prop_assert_eq!(disk.capacity_bytes, disk_mb * MIB);
                prop_assert_eq!(
                    disk.partitions[1].size_bytes,
                    disk_mb * MIB - fixed_mb * MIB - overhead
                );
                for part in &disk.partitions {
                    prop_assert_eq!(part.start_bytes % 4096, 0);
                    prop_assert!(part.end_bytes() <= disk.region.end_bytes());
                }
            }
            Err(e) => {
                // Only a too-small remainder may be rejected
                prop_assert!(disk_mb - fixed_mb < 66, "unexpected rejection: {}", e);
            }
        }
    }
}

// =============================================================================
// Package tree
// =============================================================================

/// Catalog of `n` packages where package i may depend on any package
fn catalog_strategy() -> impl Strategy<Value = (usize, Vec<Vec<usize>>, Vec<bool>)> {
    (2usize..12).prop_flat_map(|n| {
        (
            Just(n),
            proptest::collection::vec(proptest::collection::vec(0..n, 0..4), n),
            proptest::collection::vec(any::<bool>(), n),
        )
    })
}

proptest! {
    /// Every selected package and its transitive dependencies are listed once
    #[test]
    fn flatten_includes_closure((n, deps, selected) in catalog_strategy()) {
        let mut json = String::from("{\"All\": {");
        for i in 0..n {
            let dep_list: Vec<String> = deps[i].iter().map(|d| format!("\"p{}\"", d)).collect();
            if i > 0 {
                json.push(',');
            }
            json.push_str(&format!(
                "\"p{i}\": {{\"name\": \"p{i}\", \"dependencies\": [{}]}}",
                dep_list.join(",")
            ));
        }
        json.push_str("}}");

        let mut tree = build_tree(&PackageCatalog::from_json(&json).expect("json")).expect("tree");
        for (i, sel) in selected.iter().enumerate() {
            if *sel {
                tree.select_package(&format!("p{}", i));
            }
        }
        let list = flatten_selection(&tree);

        let unique: HashSet<&String> = list.iter().collect();
        prop_assert_eq!(unique.len(), list.len());

        // Transitive closure of the selection
        let mut expected = HashSet::new();
        let mut stack: Vec<usize> = (0..n).filter(|i| selected[*i]).collect();
        while let Some(i) = stack.pop() {
            if expected.insert(i) {
                stack.extend(deps[i].iter().copied());
            }
        }
        let listed: HashSet<usize> = list
            .iter()
            .map(|p| p[1..].parse().expect("pN"))
            .collect();
        prop_assert_eq!(listed, expected);
    }
}
