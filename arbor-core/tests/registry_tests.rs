//! Registry error-message, atomic-write-safety and account integration tests.
//! Storage: ~/.arbor/projects/<owner>/<id>.yaml, ~/.arbor/accounts/<owner>.yaml

use arbor_core::{
    registry,
    types::{Account, BranchName, OwnerId, ProjectKey, ProjectType, RepoRef},
    RegistryError,
};
use assert_fs::prelude::*;
use predicates::prelude::predicate;
use std::fs;

fn owner() -> OwnerId {
    OwnerId::from("ada")
}

// ---------------------------------------------------------------------------
// 1. Load error messages
// ---------------------------------------------------------------------------

#[test]
fn load_missing_project_returns_not_found() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let err = registry::load_project_at(home.path(), &ProjectKey::new("ada", 3)).unwrap_err();
    assert!(matches!(err, RegistryError::ProjectNotFound { .. }), "got: {err}");
    assert!(err.to_string().contains("3.yaml"));
}

#[test]
fn load_corrupt_yaml_returns_parse_error_with_path() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let dir = home.path().join(".arbor").join("projects").join("ada");
    fs::create_dir_all(&dir).expect("mkdir");
    fs::write(dir.join("1.yaml"), b": : corrupt : yaml : !!!\n  - broken: [unclosed")
        .expect("write");

    let err = registry::load_project_at(home.path(), &ProjectKey::new("ada", 1)).unwrap_err();
    assert!(matches!(err, RegistryError::Parse { .. }), "got: {err}");
    assert!(err.to_string().contains("1.yaml"), "must contain file path, got: {err}");
}

#[test]
fn list_skips_non_yaml_files() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    registry::create_project_at(
        home.path(),
        &owner(),
        "demo",
        ProjectType::Blank,
        None,
        BranchName::default(),
    )
    .expect("create");
    home.child(".arbor/projects/ada/notes.txt")
        .write_str("not a project")
        .expect("write");

    let listed = registry::list_projects_at(home.path(), &owner()).expect("list");
    assert_eq!(listed.len(), 1);
}

#[test]
fn list_for_unknown_owner_is_empty() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let listed = registry::list_projects_at(home.path(), &OwnerId::from("nobody")).expect("list");
    assert!(listed.is_empty());
}

// ---------------------------------------------------------------------------
// 2. Atomic write safety
// ---------------------------------------------------------------------------

#[test]
fn save_writes_yaml_with_owner_only_permissions() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let project = registry::create_project_at(
        home.path(),
        &owner(),
        "demo",
        ProjectType::Node,
        Some(RepoRef::from("ada/arbor-demo-1234")),
        BranchName::default(),
    )
    .expect("create");

    let file = home.child(".arbor/projects/ada/1.yaml");
    file.assert(predicate::path::exists());
    file.assert(predicate::str::contains("arbor-demo-1234"));
    file.assert(predicate::str::contains("project_type: node"));
    assert!(!registry::project_path_at(home.path(), &project.key())
        .with_extension("yaml.tmp")
        .exists());

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(file.path()).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }
}

#[test]
fn ids_continue_after_highest_existing() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let create = |name: &str| {
        registry::create_project_at(
            home.path(),
            &owner(),
            name,
            ProjectType::Blank,
            None,
            BranchName::default(),
        )
        .expect("create")
    };
    create("a");
    let b = create("b");
    create("c");
    registry::delete_project_at(home.path(), &b.key()).expect("delete");
    assert_eq!(create("d").id.0, 4);
}

// ---------------------------------------------------------------------------
// 3. Accounts
// ---------------------------------------------------------------------------

#[test]
fn account_roundtrip_keeps_token() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let mut account = Account::new(owner());
    account.remote_token = Some("ghp_secret".into());
    account.default_branch = BranchName::from("trunk");
    registry::save_account_at(home.path(), &account).expect("save");

    let loaded = registry::load_account_at(home.path(), &owner()).expect("load");
    assert_eq!(loaded, account);
    assert_eq!(loaded.credential(), Some("ghp_secret"));
    home.child(".arbor/accounts/ada.yaml")
        .assert(predicate::path::exists());
}
