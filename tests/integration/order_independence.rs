use crate::common::Replicas;
use proptest::prelude::*;
use std::path::PathBuf;

fn ordered(r: &Replicas, order: &[usize]) -> Vec<PathBuf> {
    order.iter().map(|&i| r.roots[i].clone()).collect()
}

/// Three replicas each holding a different version of `a.txt`.
fn versions(mtimes: &[i64]) -> Replicas {
    let r = Replicas::new(mtimes.len());
    for (i, mtime) in mtimes.iter().enumerate() {
        r.write(i, "a.txt", &format!("v{}", mtime), *mtime);
    }
    r
}

#[test]
fn most_recent_wins_forwards_and_backwards() {
    for order in [[0, 1, 2], [2, 1, 0]] {
        let r = versions(&[1_000, 2_000, 3_000]);
        r.sync_with(&r.ops, &ordered(&r, &order));
        for replica in 0..3 {
            assert_eq!(r.read(replica, "a.txt").as_deref(), Some("v3000"), "order {:?}", order);
        }
    }
}

#[test]
fn equal_timestamps_resolve_the_same_way_in_any_order() {
    let mut winners = Vec::new();
    for order in [[0, 1, 2], [2, 1, 0], [1, 2, 0]] {
        let r = Replicas::new(3);
        for (i, body) in ["apple", "banana", "cherry"].iter().enumerate() {
            r.write(i, "a.txt", body, 5_000);
        }
        r.sync_with(&r.ops, &ordered(&r, &order));
        let winner = r.read(0, "a.txt").unwrap();
        assert_eq!(r.read(1, "a.txt").as_deref(), Some(winner.as_str()));
        assert_eq!(r.read(2, "a.txt").as_deref(), Some(winner.as_str()));
        winners.push(winner);
    }
    winners.dedup();
    assert_eq!(winners.len(), 1);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn newest_copy_wins_regardless_of_replica_order(
        mtimes in Just(vec![1_000i64, 2_000, 3_000, 4_000]).prop_shuffle(),
        order in Just(vec![0usize, 1, 2, 3]).prop_shuffle(),
    ) {
        let r = versions(&mtimes);
        r.sync_with(&r.ops, &ordered(&r, &order));
        for replica in 0..mtimes.len() {
            prop_assert_eq!(r.read(replica, "a.txt"), Some("v4000".to_string()));
        }
    }

    #[test]
    fn metadata_merge_is_order_independent(
        edits in proptest::collection::vec(any::<bool>(), 3),
        order in Just(vec![0usize, 1, 2]).prop_shuffle(),
    ) {
        let r = Replicas::new(3);
        r.write(0, "shared.txt", "base", 1_000);
        r.sync();

        // each replica that edits gets a distinct, later timestamp
        for (i, edit) in edits.iter().enumerate() {
            if *edit {
                r.write(i, "shared.txt", &format!("edit{}", i), 2_000 + i as i64);
            }
        }
        r.sync_with(&r.ops, &ordered(&r, &order));

        let expected = match edits.iter().rposition(|e| *e) {
            Some(i) => format!("edit{}", i),
            None => "base".to_string(),
        };
        for replica in 0..3 {
            prop_assert_eq!(r.read(replica, "shared.txt"), Some(expected.clone()));
        }
    }
}
