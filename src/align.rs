//! Timestamp alignment between the event tables
//!
//! The tables share no keys. Downstream analyses that need "the targeting
//! state while this sample was tracked" join by forward fill: each tracked
//! row sees the most recent row of the other table at or before its time.

use crate::types::{HeadDetectRow, Session, TargetedRow, TrackedRow};
use chrono::{DateTime, FixedOffset};
use tracing::warn;

/// Minimum ratio of smallest to largest table before a join is reported as lopsided
const SIZE_SIMILARITY_WARN: f64 = 0.9;

/// Index and value of the last entry of `times` that is `<= t`.
///
/// `times` must be sorted ascending. Returns `None` when every entry is later
/// than `t`.
pub fn nearest_at_or_before<T: PartialOrd + Copy>(times: &[T], t: T) -> Option<(usize, T)> {
    let n = times.partition_point(|x| *x <= t);
    if n == 0 {
        None
    } else {
        Some((n - 1, times[n - 1]))
    }
}

/// Tracked row joined with the latest targeting and head rows
#[derive(Debug, Clone, Copy)]
pub struct AlignedRow<'a> {
    pub tracked: &'a TrackedRow,
    pub targeted: Option<&'a TargetedRow>,
    pub head: Option<&'a HeadDetectRow>,
}

impl AlignedRow<'_> {
    /// Laser on at the time of the tracked sample
    pub fn laser_on(&self) -> bool {
        self.targeted.map_or(false, |t| t.laser_state != 0)
    }
}

/// Forward fill the targeting and head tables onto every tracked row
pub fn align_session(session: &Session) -> Vec<AlignedRow<'_>> {
    let sizes = [session.tracked.len(), session.targeted.len(), session.head.len()];
    if let (Some(&min), Some(&max)) = (sizes.iter().min(), sizes.iter().max()) {
        if max > 0 && (min as f64 / max as f64) < SIZE_SIMILARITY_WARN {
            warn!(
                tracked = sizes[0],
                targeted = sizes[1],
                head = sizes[2],
                "event tables differ in size; aligned rows will repeat stale values"
            );
        }
    }

    let targeted_times: Vec<DateTime<FixedOffset>> = session.targeted.iter().map(|r| r.time).collect();
    let head_times: Vec<DateTime<FixedOffset>> = session.head.iter().map(|r| r.time).collect();

    session
        .tracked
        .iter()
        .map(|tracked| AlignedRow {
            tracked,
            targeted: nearest_at_or_before(&targeted_times, tracked.time).map(|(i, _)| &session.targeted[i]),
            head: nearest_at_or_before(&head_times, tracked.time).map(|(i, _)| &session.head[i]),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{head_row, targeted_row, tracked_row};

    #[test]
    fn test_nearest_at_or_before() {
        let times = [1.0, 2.0, 2.0, 4.0];
        assert_eq!(nearest_at_or_before(&times, 0.5), None);
        assert_eq!(nearest_at_or_before(&times, 1.0), Some((0, 1.0)));
        assert_eq!(nearest_at_or_before(&times, 3.0), Some((2, 2.0)));
        assert_eq!(nearest_at_or_before(&times, 10.0), Some((3, 4.0)));
        assert_eq!(nearest_at_or_before::<f64>(&[], 1.0), None);
    }

    #[test]
    fn test_align_forward_fills() {
        let mut laser = targeted_row(1, 0.05);
        laser.laser_state = 1;
        let session = Session {
            geometry: None,
            arena_polygon: None,
            targeted: vec![targeted_row(1, 0.015), laser],
            tracked: (0..10).map(|i| tracked_row(1, i as f64 * 0.01, 0.0, 0.0)).collect(),
            head: vec![head_row(3)],
            extra: None,
            timezone: "UTC".to_string(),
            track_lengths: Vec::new(),
        };

        let aligned = align_session(&session);
        assert_eq!(aligned.len(), 10);
        assert!(aligned[0].targeted.is_none());
        assert!(aligned[1].targeted.is_none());
        assert_eq!(aligned[2].targeted.map(|t| t.ts), Some(0.015));
        assert!(!aligned[4].laser_on());
        assert!(aligned[5].laser_on());
        assert!(aligned[9].laser_on());

        assert!(aligned[2].head.is_none());
        assert_eq!(aligned[3].head.map(|h| h.framenumber), Some(3));
        assert_eq!(aligned[9].head.map(|h| h.framenumber), Some(3));
    }
}
