//! Startup scan: loading, purging and system package handling.

mod common;

use std::sync::{Arc, Mutex};

use common::{TestRegistry, manifest, name, write_artifact};
use enclave_core::{InstallFlags, QueryFlags, StorageLayout, UserId};
use enclave_events::{FnWatcher, LifecycleEvent, LifecycleKind};
use enclave_pm::{InstallRequest, PackageManager, StaticHost};

#[test]
fn test_corrupt_record_does_not_block_others() {
    let reg = TestRegistry::new();
    let a = reg.install_ok(&manifest("com.example.a"), UserId::SYSTEM);
    let b = reg.install_ok(&manifest("com.example.b"), UserId::SYSTEM);
    let c = reg.install_ok(&manifest("com.example.c"), UserId::SYSTEM);
    std::fs::write(reg.home.record_path_for(&b), b"{ truncated").unwrap();

    let pm = PackageManager::builder(Arc::clone(&reg.home) as _).build().unwrap();
    let events = Arc::new(Mutex::new(Vec::<LifecycleEvent>::new()));
    let sink = Arc::clone(&events);
    pm.add_watcher(Arc::new(FnWatcher::new("recorder", move |e: &LifecycleEvent| {
        sink.lock().unwrap().push(e.clone());
    })));

    let report = pm.system_ready().unwrap();
    assert_eq!(report.loaded, vec![a.clone(), c.clone()]);
    assert_eq!(report.purged, vec!["com.example.b".to_string()]);

    assert!(pm.is_installed(&a, UserId::SYSTEM));
    assert!(pm.is_installed(&c, UserId::SYSTEM));
    assert!(!pm.is_installed(&b, UserId::SYSTEM));
    assert!(!reg.home.app_dir_for(&b).exists());
    assert!(!reg.home.user_data_dir_for(&b, UserId::SYSTEM).exists());
    assert_eq!(pm.identities().lookup(&b), None);

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].package, b);
    assert_eq!(events[0].kind, LifecycleKind::Uninstalled);
    assert_eq!(events[0].user, UserId::ALL);
    assert!(events[0].removed_entirely);
}

#[test]
fn test_record_under_wrong_directory_is_purged() {
    let reg = TestRegistry::new();
    let a = reg.install_ok(&manifest("com.example.a"), UserId::SYSTEM);

    let impostor = reg.home.app_dir_for(&name("com.example.impostor"));
    std::fs::create_dir_all(&impostor).unwrap();
    std::fs::copy(reg.home.record_path_for(&a), impostor.join("package.json")).unwrap();

    let report = reg.pm.system_ready().unwrap();
    assert_eq!(report.purged, vec!["com.example.impostor".to_string()]);
    assert!(reg.pm.is_installed(&a, UserId::SYSTEM));
}

#[test]
fn test_invalid_directory_names_deleted() {
    let reg = TestRegistry::new();
    let junk = reg.home.apps_dir().join("Not A Package");
    std::fs::create_dir_all(&junk).unwrap();

    let report = reg.pm.system_ready().unwrap();
    assert_eq!(report.purged, vec!["Not A Package".to_string()]);
    assert!(!junk.exists());
}

#[test]
fn test_corrupt_identity_table_recovered_from_records() {
    let reg = TestRegistry::new();
    let a = reg.install_ok(&manifest("com.example.a"), UserId::SYSTEM);
    let b = reg.install_ok(&manifest("com.example.b"), UserId::SYSTEM);
    let uid_b = reg.pm.uid_for_package(&b, UserId::SYSTEM).unwrap();
    std::fs::write(reg.home.identities_path(), b"\0\0garbage").unwrap();

    let pm = reg.restart();
    assert_eq!(pm.uid_for_package(&b, UserId::SYSTEM), Some(uid_b));
    assert!(pm.identities().lookup(&a).is_some());

    // New allocations do not collide with re-registered identities.
    let path = reg.artifact("c.pkg", &manifest("com.example.c"));
    let result = pm.install(InstallRequest::from_path(path, InstallFlags::STORAGE, UserId::SYSTEM));
    assert!(result.success, "{}", result.diagnostic);
    let uid_c = pm.uid_for_package(&name("com.example.c"), UserId::SYSTEM).unwrap();
    assert!(uid_c > uid_b);
}

#[test]
fn test_unwritable_identity_table_keeps_valid_packages() {
    let reg = TestRegistry::new();
    let a = reg.install_ok(&manifest("com.example.a"), UserId::SYSTEM);
    let uid_a = reg.pm.uid_for_package(&a, UserId::SYSTEM).unwrap();
    let notes = reg.home.user_data_dir_for(&a, UserId::SYSTEM).join("files/notes.txt");
    std::fs::write(&notes, b"keep me").unwrap();

    let identities = reg.home.identities_path();
    std::fs::remove_file(&identities).unwrap();
    std::fs::create_dir_all(identities.join("blocker")).unwrap();

    let pm = PackageManager::builder(Arc::clone(&reg.home) as _).build().unwrap();
    let report = pm.system_ready().unwrap();
    assert_eq!(report.loaded, vec![a.clone()]);
    assert!(report.purged.is_empty());

    assert!(pm.is_installed(&a, UserId::SYSTEM));
    assert_eq!(pm.uid_for_package(&a, UserId::SYSTEM), Some(uid_a));
    assert!(reg.home.app_dir_for(&a).exists());
    assert_eq!(std::fs::read(&notes).unwrap(), b"keep me");
}

#[test]
fn test_rescan_is_idempotent() {
    let reg = TestRegistry::new();
    let a = reg.install_ok(&manifest("com.example.a"), UserId::SYSTEM);

    let first = reg.pm.rescan().unwrap();
    let second = reg.pm.rescan().unwrap();
    assert_eq!(first, second);
    assert_eq!(second.loaded, vec![a]);
    assert!(second.purged.is_empty());
}

#[test]
fn test_host_system_packages_provisioned() {
    let dir = tempfile::tempdir().unwrap();
    let image = dir.path().join("image.pkg");
    write_artifact(&image, &manifest("com.example.launcher"), &[]);
    let launcher = name("com.example.launcher");

    let host = StaticHost::default().with_system_package(launcher.clone(), image.clone());
    let reg = TestRegistry::with(move |b| b.with_host(Arc::new(host.clone())));

    assert!(reg.pm.is_installed(&launcher, UserId::SYSTEM));
    let info = reg
        .pm
        .application_info(&launcher, QueryFlags::empty(), UserId::SYSTEM)
        .unwrap();
    assert!(info.system);
    assert_eq!(info.code_path, image);

    let report = reg.pm.system_ready().unwrap();
    assert!(report.provisioned.is_empty());
    assert_eq!(report.loaded, vec![launcher]);
}

#[test]
fn test_system_package_reconciled_with_new_image() {
    let dir = tempfile::tempdir().unwrap();
    let old_image = dir.path().join("old.pkg");
    let new_image = dir.path().join("new.pkg");
    write_artifact(&old_image, &manifest("com.example.launcher"), &[]);
    write_artifact(
        &new_image,
        "package = \"com.example.launcher\"\nversion_code = 9\n",
        &[],
    );
    let launcher = name("com.example.launcher");

    let old_host = StaticHost::default().with_system_package(launcher.clone(), old_image);
    let reg = TestRegistry::with(move |b| b.with_host(Arc::new(old_host.clone())));
    let uid = reg.pm.uid_for_package(&launcher, UserId::SYSTEM).unwrap();

    let new_host = StaticHost::default().with_system_package(launcher.clone(), new_image.clone());
    let pm = PackageManager::builder(Arc::clone(&reg.home) as _)
        .with_host(Arc::new(new_host))
        .build()
        .unwrap();
    let report = pm.system_ready().unwrap();
    assert_eq!(report.reconciled, vec![launcher.clone()]);

    let info = pm
        .package_info(&launcher, QueryFlags::empty(), UserId::SYSTEM)
        .unwrap();
    assert_eq!(info.version_code, 9);
    assert_eq!(info.uid, uid);
    assert_eq!(info.application.code_path, new_image);
}
