//! Content comparison between two records of the same logical file.

use crate::snapshot::FileRecord;
use std::cmp::Ordering;

/// Outcome of comparing a source record against a target record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentOrder {
    SourceNewer,
    TargetNewer,
    Identical,
}

/// Whether a record is known to be unchanged since its replica's snapshot.
///
/// Records from replicas without history are always `Pending`: they cannot be
/// overruled just because another replica has a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Standing {
    Unchanged,
    Pending,
}

/// Compare two records by length, then modification time, then hash.
///
/// Records are identical when their content hashes agree, even if the
/// timestamps drifted apart. Otherwise the more recently modified side wins and
/// equal timestamps fall back to the larger hash so the verdict never depends on
/// which record was passed first.
pub fn compare_content(source: &FileRecord, target: &FileRecord) -> ContentOrder {
    // unequal length can never hash equal; skip straight to ordering
    if source.length == target.length && source.hash == target.hash {
        return ContentOrder::Identical;
    }

    match source
        .modified
        .cmp(&target.modified)
        .then_with(|| source.hash.cmp(&target.hash))
    {
        Ordering::Greater => ContentOrder::SourceNewer,
        Ordering::Less => ContentOrder::TargetNewer,
        Ordering::Equal => ContentOrder::Identical,
    }
}

/// Compare with snapshot standing taken into account: a pending change beats an
/// unchanged record regardless of timestamps.
pub fn compare_with_standing(
    source: &FileRecord,
    source_standing: Standing,
    target: &FileRecord,
    target_standing: Standing,
) -> ContentOrder {
    match compare_content(source, target) {
        ContentOrder::Identical => ContentOrder::Identical,
        by_content => match source_standing.cmp(&target_standing) {
            Ordering::Greater => ContentOrder::SourceNewer,
            Ordering::Less => ContentOrder::TargetNewer,
            Ordering::Equal => by_content,
        },
    }
}
