//! Overlay lifecycle scenarios spanning refcount, mount state, and the
//! forced-removal discipline.
//!
//! Real fuse-overlayfs mounts are not available in the test environment, so
//! these scenarios exercise the copy fallback and the ground-truth mount
//! table queries; the invariant under test is that cleanup paths succeed and
//! leave no state regardless of what launchers did before.

use std::path::Path;
use std::time::Duration;
use uncork_runtime::overlay::{instantiate, is_mounted, purge_user_data, InstanceKind, OverlayMount};
use uncork_runtime::refcount::{live_count, MountGuard};
use uncork_spec::UserDataLayout;

const TIMEOUT: Duration = Duration::from_secs(5);

fn template(dir: &Path) -> std::path::PathBuf {
    let t = dir.join("template");
    std::fs::create_dir_all(t.join("drive_c/users/__WINE_USER__")).unwrap();
    std::fs::write(t.join("system.reg"), "WINE REGISTRY Version 2\n").unwrap();
    t
}

#[test]
fn first_launch_materializes_instance_lazily() {
    let dir = tempfile::tempdir().unwrap();
    let tpl = template(dir.path());
    let data = UserDataLayout::new(dir.path().join("data"));

    assert!(!data.prefix_dir().exists(), "no user data before first run");
    let kind = instantiate(&tpl, &data, false, TIMEOUT).unwrap();
    assert_eq!(kind, InstanceKind::Copy);
    assert!(data.prefix_dir().join("system.reg").exists());
}

#[test]
fn crashed_launcher_leaves_stale_count_but_removal_still_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let tpl = template(dir.path());
    let data = UserDataLayout::new(dir.path().join("data"));
    instantiate(&tpl, &data, false, TIMEOUT).unwrap();

    // Simulate launchers killed abnormally: counts never released.
    let (g1, _) = MountGuard::acquire(&data).unwrap();
    let (g2, _) = MountGuard::acquire(&data).unwrap();
    std::mem::forget(g1);
    std::mem::forget(g2);
    assert_eq!(live_count(&data), 2);

    // Forced removal ignores the stale counter: it consults the mount
    // table, finds nothing mounted, and succeeds idempotently.
    let mount = OverlayMount::new(&tpl, &data);
    assert!(!mount.is_mounted());
    assert!(mount.unmount(TIMEOUT).is_ok());
    assert!(mount.unmount(TIMEOUT).is_ok(), "second unmount is also success");
}

#[test]
fn package_removal_leaves_user_data_intact() {
    let dir = tempfile::tempdir().unwrap();
    let tpl = template(dir.path());
    let data = UserDataLayout::new(dir.path().join("data"));
    instantiate(&tpl, &data, false, TIMEOUT).unwrap();
    std::fs::write(data.prefix_dir().join("save.dat"), b"progress").unwrap();

    // Removal-path cleanup is only the unmount; the user's prefix instance
    // must survive the package itself.
    let mount = OverlayMount::new(&tpl, &data);
    mount.unmount(TIMEOUT).unwrap();
    assert!(data.prefix_dir().join("save.dat").exists());
}

#[test]
fn purge_destroys_everything_and_is_terminal() {
    let dir = tempfile::tempdir().unwrap();
    let tpl = template(dir.path());
    let data = UserDataLayout::new(dir.path().join("data"));
    instantiate(&tpl, &data, false, TIMEOUT).unwrap();
    let (guard, _) = MountGuard::acquire(&data).unwrap();
    drop(guard);

    purge_user_data(&data, TIMEOUT).unwrap();
    assert!(!data.data_root().exists());
    assert!(!is_mounted(&data.prefix_dir()));
}

#[test]
fn two_instances_share_one_materialization() {
    let dir = tempfile::tempdir().unwrap();
    let tpl = template(dir.path());
    let data = UserDataLayout::new(dir.path().join("data"));

    instantiate(&tpl, &data, false, TIMEOUT).unwrap();
    let (g1, c1) = MountGuard::acquire(&data).unwrap();
    // Second launch: instance already materialized, count observes it.
    instantiate(&tpl, &data, false, TIMEOUT).unwrap();
    let (g2, c2) = MountGuard::acquire(&data).unwrap();
    assert_eq!((c1, c2), (1, 2));

    assert_eq!(g1.release().unwrap(), 1, "first exit leaves the instance alive");
    assert_eq!(g2.release().unwrap(), 0, "last exit reaches zero exactly once");
}
