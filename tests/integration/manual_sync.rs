use crate::common::Replicas;
use std::fs;
use syncfold::tree::FinalState;

#[test]
fn second_sync_plans_nothing() {
    let r = Replicas::new(3);
    r.write(0, "a.txt", "alpha", 1_000);
    r.write(1, "notes/b.txt", "bravo", 1_000);
    r.write(2, "a.txt", "alpha, newer", 2_000);

    let first = r.sync();
    assert!(first.raw_mode);
    assert!(first.is_clean());

    let (second, tree) = r.sync_tree();
    assert!(!second.raw_mode);
    assert_eq!(second.planned, 0);
    assert_eq!(second.summary.changes(), 0);
    for node in tree.iter() {
        for (replica, slot) in node.slots.iter().enumerate() {
            assert_eq!(
                slot.final_state(),
                FinalState::Unchanged,
                "{} at replica {}",
                node.path,
                replica
            );
        }
    }
}

#[test]
fn replicas_agree_after_sync() {
    let r = Replicas::new(3);
    r.write(0, "a.txt", "alpha", 1_000);
    r.write(1, "deep/nested/c.txt", "charlie", 1_500);
    r.write(2, "a.txt", "alpha, newer", 2_000);
    r.write(2, "z.txt", "zulu", 500);

    r.sync();

    let expected = r.listing(0);
    assert_eq!(
        expected,
        vec![
            ("a.txt".to_string(), "alpha, newer".to_string()),
            ("deep/nested/c.txt".to_string(), "charlie".to_string()),
            ("z.txt".to_string(), "zulu".to_string()),
        ]
    );
    assert_eq!(r.listing(1), expected);
    assert_eq!(r.listing(2), expected);
}

#[test]
fn rename_propagates_as_rename() {
    let r = Replicas::new(2);
    r.write(0, "a.txt", "payload", 1_000);
    r.sync();

    fs::rename(r.path(0, "a.txt"), r.path(0, "b.txt")).unwrap();
    let report = r.sync();

    assert!(report.summary.renamed > 0);
    assert_eq!(report.summary.created, 0);
    assert_eq!(report.summary.deleted, 0);
    assert!(!r.exists(1, "a.txt"));
    assert_eq!(r.read(1, "b.txt").as_deref(), Some("payload"));
}

#[test]
fn deletion_propagates_once_history_exists() {
    let r = Replicas::new(3);
    r.write(0, "old.txt", "stale", 1_000);
    r.sync();
    assert!(r.exists(2, "old.txt"));

    fs::remove_file(r.path(1, "old.txt")).unwrap();
    let report = r.sync();

    assert_eq!(report.summary.errors, 0);
    for replica in 0..3 {
        assert!(!r.exists(replica, "old.txt"));
    }
    assert_eq!(r.sync().planned, 0);
}

#[test]
fn deletion_without_history_is_recreated() {
    let r = Replicas::new(2);
    r.write(0, "a.txt", "alpha", 1_000);
    r.write(1, "a.txt", "alpha", 1_000);

    fs::remove_file(r.path(1, "a.txt")).unwrap();
    r.sync();

    assert_eq!(r.read(1, "a.txt").as_deref(), Some("alpha"));
}

#[test]
fn edit_overrules_deletion() {
    let r = Replicas::new(2);
    r.write(0, "a.txt", "alpha", 1_000);
    r.sync();

    fs::remove_file(r.path(0, "a.txt")).unwrap();
    r.write(1, "a.txt", "alpha, edited", 900);
    r.sync();

    assert_eq!(r.read(0, "a.txt").as_deref(), Some("alpha, edited"));
    assert_eq!(r.read(1, "a.txt").as_deref(), Some("alpha, edited"));
}

#[test]
fn removed_folder_is_removed_everywhere() {
    let r = Replicas::new(2);
    r.write(0, "dir/x.txt", "x", 1_000);
    r.write(0, "dir/sub/y.txt", "y", 1_000);
    r.sync();
    assert!(r.exists(1, "dir/sub/y.txt"));

    fs::remove_dir_all(r.path(0, "dir")).unwrap();
    let report = r.sync();

    assert_eq!(report.summary.errors, 0);
    assert!(!r.exists(1, "dir"));
}

#[test]
fn overwritten_copy_is_archived() {
    let mut r = Replicas::new(2);
    r.config.archive_limit = 2;
    r.write(0, "a.txt", "v1", 1_000);
    r.sync();

    r.write(0, "a.txt", "v2", 2_000);
    let report = r.sync();

    assert!(report.summary.updated >= 1);
    assert_eq!(r.read(1, "a.txt").as_deref(), Some("v2"));
    let archived: Vec<_> = fs::read_dir(r.path(1, "_archive"))
        .unwrap()
        .filter_map(Result::ok)
        .collect();
    assert_eq!(archived.len(), 1);
    assert_eq!(fs::read_to_string(archived[0].path()).unwrap(), "v1");
}

#[test]
fn empty_folder_is_created_everywhere() {
    let r = Replicas::new(3);
    fs::create_dir_all(r.path(1, "inbox")).unwrap();
    r.sync();
    assert!(r.path(0, "inbox").is_dir());
    assert!(r.path(2, "inbox").is_dir());
}
