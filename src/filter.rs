//! Track filtering
//!
//! Tracks shorter than the configured minimum are dropped, and the dropped
//! object ids are removed from every table so downstream joins stay
//! consistent.

use crate::ingest::EventTables;
use crate::types::{ObjId, TrackLength, TrackedRow};
use std::collections::{HashMap, HashSet};
use tracing::info;

/// Row indices of each object id, in order of first appearance
pub fn group_by_obj_id(tracked: &[TrackedRow]) -> Vec<(ObjId, Vec<usize>)> {
    let mut groups: Vec<(ObjId, Vec<usize>)> = Vec::new();
    let mut position: HashMap<ObjId, usize> = HashMap::new();
    for (i, row) in tracked.iter().enumerate() {
        let slot = *position.entry(row.obj_id).or_insert_with(|| {
            groups.push((row.obj_id, Vec::new()));
            groups.len() - 1
        });
        groups[slot].1.push(i);
    }
    groups
}

/// Measure every track against `min_len` (strict less-than drops)
pub fn track_lengths(tracked: &[TrackedRow], min_len: f64) -> Vec<TrackLength> {
    let total = tracked.len();
    group_by_obj_id(tracked)
        .into_iter()
        .map(|(obj_id, indices)| {
            let samples = indices.len();
            TrackLength {
                obj_id,
                samples,
                pct: 100.0 * samples as f64 / total as f64,
                kept: (samples as f64) >= min_len,
            }
        })
        .collect()
}

/// Drop tracks shorter than `min_len` samples from all tables.
///
/// Head/body rows carry no object id of their own unless the recorder
/// included one; rows without it are matched to tracked rows by frame number
/// and dropped when every object tracked in that frame was dropped.
pub fn filter_short_tracks(tables: &mut EventTables, min_len: f64) -> Vec<TrackLength> {
    let lengths = track_lengths(&tables.tracked, min_len);

    for track in &lengths {
        if track.kept {
            info!(obj_id = track.obj_id, samples = track.samples, pct = track.pct, "trajectory");
        } else {
            info!(obj_id = track.obj_id, samples = track.samples, pct = track.pct, "skip short trajectory");
        }
    }

    let dropped: HashSet<ObjId> = lengths.iter().filter(|t| !t.kept).map(|t| t.obj_id).collect();
    if dropped.is_empty() {
        return lengths;
    }

    // frame number -> whether any kept object was tracked in it
    let mut frames: HashMap<u64, bool> = HashMap::new();
    for row in &tables.tracked {
        let kept = !dropped.contains(&row.obj_id);
        *frames.entry(row.framenumber).or_insert(false) |= kept;
    }

    tables.tracked.retain(|r| !dropped.contains(&r.obj_id));
    tables.targeted.retain(|r| !dropped.contains(&r.obj_id));
    tables.head.retain(|r| match r.obj_id {
        Some(id) => !dropped.contains(&id),
        None => frames.get(&r.framenumber).copied().unwrap_or(true),
    });

    lengths
}
