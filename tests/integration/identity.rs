use crate::common::Replicas;
use std::fs;

#[test]
fn case_variants_are_one_file() {
    let r = Replicas::new(2);
    r.write(0, "Notes.txt", "new", 2_000);
    r.write(1, "notes.txt", "old", 1_000);

    let report = r.sync();

    assert!(report.is_clean());
    assert_eq!(r.listing(0), vec![("Notes.txt".to_string(), "new".to_string())]);
    assert_eq!(r.listing(1), vec![("notes.txt".to_string(), "new".to_string())]);
    assert_eq!(r.sync().planned, 0);
}

#[test]
fn folder_spelling_is_kept_per_replica() {
    let r = Replicas::new(2);
    r.write(0, "Docs/a.txt", "new", 2_000);
    r.write(0, "Docs/b.txt", "bravo", 1_000);
    r.write(1, "docs/a.txt", "old", 1_000);

    r.sync();

    assert_eq!(
        r.listing(1),
        vec![
            ("docs/a.txt".to_string(), "new".to_string()),
            ("docs/b.txt".to_string(), "bravo".to_string()),
        ]
    );
    assert!(!r.exists(1, "Docs"));
}

#[test]
fn composed_and_decomposed_names_are_one_file() {
    let r = Replicas::new(2);
    let composed = "caf\u{e9}.txt";
    let decomposed = "cafe\u{301}.txt";
    r.write(0, composed, "new", 2_000);
    r.write(1, decomposed, "old", 1_000);

    r.sync();

    assert_eq!(r.listing(1), vec![(decomposed.to_string(), "new".to_string())]);
    assert_eq!(r.sync().planned, 0);
}

#[test]
fn archive_pruning_spares_similarly_named_files() {
    let mut r = Replicas::new(2);
    r.config.archive_limit = 1;
    r.write(0, "a.txt", "a1", 1_000);
    r.write(0, "a_b.txt", "ab1", 1_000);
    r.sync();

    r.write(0, "a_b.txt", "ab2", 2_000);
    r.sync();
    r.write(0, "a.txt", "a2", 2_000);
    r.sync();

    let mut archived: Vec<String> = fs::read_dir(r.path(1, "_archive"))
        .unwrap()
        .map(|e| fs::read_to_string(e.unwrap().path()).unwrap())
        .collect();
    archived.sort();
    assert_eq!(archived, vec!["a1".to_string(), "ab1".to_string()]);
}
