// Package selection tree integration tests

use std::io::Write;
use tempfile::NamedTempFile;

use tri_install::{
    InstallPlan, PackageCatalog, available_shells, build_tree, default_user_shell,
    flatten_selection, set_install_packages,
};

const CATALOG: &str = r#"{
    "Desktop": {
        "Lumina": {
            "lumina": { "name": "lumina", "dependencies": ["qt5-core", "fluxbox"] },
            "fluxbox": { "name": "fluxbox", "dependencies": ["libX11"] }
        },
        "Browsers": {
            "firefox": { "name": "firefox", "dependencies": ["libX11", "nss"] }
        }
    },
    "Shells": {
        "bash": { "name": "bash" },
        "fish": { "name": "fish" }
    },
    "Libraries": {
        "qt5-core": { "name": "qt5-core", "dependencies": ["libX11"] },
        "libX11": { "name": "libX11" },
        "nss": { "name": "nss" }
    }
}"#;

fn load_catalog() -> PackageCatalog {
    let mut file = NamedTempFile::new().expect("tempfile");
    file.write_all(CATALOG.as_bytes()).expect("write catalog");
    file.flush().expect("flush");
    PackageCatalog::load_from_file(file.path()).expect("catalog loads")
}

#[test]
fn test_transitive_closure_across_categories() {
    let mut tree = build_tree(&load_catalog()).expect("tree builds");
    tree.select(tree.find_path("Desktop/Lumina").expect("category"));

    let list = flatten_selection(&tree);
    assert_eq!(list, vec!["libX11", "qt5-core", "fluxbox", "lumina"]);

    let pos = |name: &str| list.iter().position(|p| p == name).expect("listed");
    assert!(pos("libX11") < pos("qt5-core"));
    assert!(pos("qt5-core") < pos("lumina"));
    assert!(pos("fluxbox") < pos("lumina"));
}

#[test]
fn test_shared_dependencies_listed_once() {
    let mut tree = build_tree(&load_catalog()).expect("tree builds");
    tree.select(tree.find_path("Desktop").expect("category"));

    let list = flatten_selection(&tree);
    assert_eq!(
        list,
        vec!["libX11", "qt5-core", "fluxbox", "lumina", "nss", "firefox"]
    );
}

#[test]
fn test_shells_follow_selection() {
    let mut tree = build_tree(&load_catalog()).expect("tree builds");
    assert_eq!(default_user_shell(&tree), vec!["/bin/sh"]);

    tree.select(tree.find_path("Shells").expect("category"));
    assert_eq!(
        default_user_shell(&tree),
        vec!["/usr/local/bin/bash", "/usr/local/bin/fish"]
    );
    assert_eq!(
        available_shells(&tree),
        vec!["/usr/local/bin/bash", "/usr/local/bin/fish", "/bin/sh", "/bin/csh"]
    );
}

#[test]
fn test_selection_feeds_plan_and_compiled_output() {
    let mut tree = build_tree(&load_catalog()).expect("tree builds");
    tree.select_package("firefox");

    let mut plan = InstallPlan::new();
    set_install_packages(&mut plan, &tree);
    assert_eq!(plan.install_packages(), &["libX11", "nss", "firefox"]);
}
