//! Time spent inside the arena area
//!
//! All statistics are computed per experiment (the source session of a
//! merged table) from the `in_area` flag of the tracked rows.

use crate::error::AnalysisError;
use crate::types::{ObjId, TrackedRow};
use std::collections::BTreeMap;
use tracing::{debug, warn};

fn pct(inside: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        100.0 * inside as f64 / total as f64
    }
}

fn count_inside<'a>(rows: impl IntoIterator<Item = &'a TrackedRow>) -> (usize, usize) {
    rows.into_iter()
        .fold((0, 0), |(inside, total), r| (inside + usize::from(r.in_area), total + 1))
}

/// Rows of each experiment, in order of first appearance
fn by_experiment(tracked: &[TrackedRow]) -> Vec<(u32, Vec<&TrackedRow>)> {
    let mut groups: Vec<(u32, Vec<&TrackedRow>)> = Vec::new();
    for row in tracked {
        match groups.iter_mut().find(|(e, _)| *e == row.experiment) {
            Some((_, rows)) => rows.push(row),
            None => groups.push((row.experiment, vec![row])),
        }
    }
    groups
}

/// Percentage of tracked samples inside the area, per experiment
pub fn total_pct_in_area(tracked: &[TrackedRow]) -> Vec<(u32, f64)> {
    by_experiment(tracked)
        .into_iter()
        .map(|(experiment, rows)| {
            let (inside, total) = count_inside(rows);
            (experiment, pct(inside, total))
        })
        .collect()
}

/// Percentage inside the area per experiment and object.
///
/// Only objects holding at least `min_len_frac` (0.10 for 10%) of their
/// experiment's samples are reported.
pub fn pct_in_area_per_obj_id(
    tracked: &[TrackedRow],
    min_len_frac: f64,
) -> BTreeMap<u32, BTreeMap<ObjId, f64>> {
    let mut out = BTreeMap::new();
    for (experiment, rows) in by_experiment(tracked) {
        let mut flies: BTreeMap<ObjId, (usize, usize)> = BTreeMap::new();
        for row in &rows {
            let entry = flies.entry(row.obj_id).or_default();
            entry.0 += usize::from(row.in_area);
            entry.1 += 1;
        }

        let total = rows.len() as f64;
        let kept = flies
            .into_iter()
            .filter(|(_, (_, n))| *n as f64 / total >= min_len_frac)
            .map(|(obj_id, (inside, n))| (obj_id, pct(inside, n)))
            .collect();
        out.insert(experiment, kept);
    }
    out
}

/// Percentage inside the area in consecutive time windows, per experiment.
///
/// Windows are `[start + offsets[i], start + offsets[i + 1]]`, followed by a
/// final window from the last offset to `start + max_time` (or the end of the
/// experiment if it is shorter). Bounds are inclusive. Empty windows report 0.
pub fn time_in_area(
    tracked: &[TrackedRow],
    max_time: f64,
    offsets: &[f64],
) -> Result<Vec<Vec<f64>>, AnalysisError> {
    if offsets.len() < 2 {
        return Err(AnalysisError::InvalidOptions(format!(
            "time_in_area needs at least two offsets, got {}",
            offsets.len()
        )));
    }

    let mut out = Vec::new();
    for (experiment, rows) in by_experiment(tracked) {
        let (first, last) = match (rows.first(), rows.last()) {
            (Some(first), Some(last)) => (first.ts, last.ts),
            _ => continue,
        };
        let end = (first + max_time).min(last);
        let window = |t0: f64, t1: f64| {
            let (inside, total) = count_inside(rows.iter().copied().filter(|r| r.ts >= t0 && r.ts <= t1));
            debug!(experiment, t0, t1, samples = total, "time in area window");
            pct(inside, total)
        };

        let mut pcts: Vec<f64> = offsets
            .windows(2)
            .map(|w| {
                let (t0, t1) = (first + w[0], first + w[1]);
                if t1 > end {
                    warn!(experiment, max_time, duration = last - first, "experiment shorter than max time");
                }
                window(t0, t1)
            })
            .collect();
        if let Some(&last_offset) = offsets.last() {
            pcts.push(window(first + last_offset, end));
        }
        out.push(pcts);
    }
    Ok(out)
}

/// Sample interval assumed when integrating speed into a path length (s)
const PATH_DX: f64 = 0.01;

/// How long one object took to settle inside the area
#[derive(Debug, Clone, PartialEq)]
pub struct LatencyToStay {
    pub experiment: u32,
    pub obj_id: ObjId,
    /// Seconds until the object had stayed `holdtime` inside, or the length
    /// of its track when it never did
    pub latency: f64,
    pub stayed: bool,
    /// Mean speed before entering the area (the whole track if it never stayed)
    pub vel_out: Option<f64>,
    /// Mean speed while staying; `None` if it never stayed
    pub vel_in: Option<f64>,
    /// Distance covered outside the area
    pub path_length: f64,
}

fn speeds<'a>(rows: impl IntoIterator<Item = &'a TrackedRow>) -> Vec<f64> {
    rows.into_iter().filter_map(|r| r.v).collect()
}

fn mean(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

fn trapz(values: &[f64], dx: f64) -> f64 {
    values.windows(2).map(|w| 0.5 * (w[0] + w[1]) * dx).sum()
}

/// Latency to stay inside the area for more than `holdtime` seconds.
///
/// Objects holding less than `min_len_frac` of their experiment's samples,
/// and objects whose track starts inside the area, are skipped. Time inside
/// accumulates across exits shorter than `tout_reset` seconds; a longer exit
/// starts it over.
pub fn latency_to_stay(
    tracked: &[TrackedRow],
    holdtime: f64,
    min_len_frac: f64,
    tout_reset: f64,
) -> Vec<LatencyToStay> {
    let mut out = Vec::new();
    for (experiment, rows) in by_experiment(tracked) {
        let mut flies: BTreeMap<ObjId, Vec<&TrackedRow>> = BTreeMap::new();
        for row in &rows {
            flies.entry(row.obj_id).or_default().push(row);
        }

        let total = rows.len() as f64;
        for (obj_id, group) in flies {
            let len_frac = group.len() as f64 / total;
            if len_frac < min_len_frac {
                debug!(experiment, obj_id, len_frac, "latency: skipping short track");
                continue;
            }
            let start = match group.first() {
                Some(first) if first.in_area => {
                    debug!(experiment, obj_id, "latency: skipping track starting in area");
                    continue;
                }
                Some(first) => first.ts,
                None => continue,
            };

            let (mut t0, mut t1) = (start, start);
            let (mut t_in, mut t_out) = (0.0, 0.0);
            let mut stayed = false;
            for row in &group {
                t1 = row.ts;
                let dt = t1 - t0;
                if row.in_area {
                    t_out = 0.0;
                    t_in += dt;
                    if t_in > holdtime {
                        stayed = true;
                        break;
                    }
                } else {
                    t_out += dt;
                    if t_out > tout_reset {
                        t_in = 0.0;
                    }
                }
                t0 = t1;
            }

            let (vel_out, vel_in, path_length) = if stayed {
                let entered = t1 - t_in;
                let outside = speeds(group.iter().copied().filter(|r| r.ts <= entered));
                let inside = speeds(group.iter().copied().filter(|r| r.ts >= entered && r.ts <= t1));
                (mean(&outside), mean(&inside), trapz(&outside, PATH_DX))
            } else {
                let all = speeds(group.iter().copied());
                (mean(&all), None, trapz(&all, PATH_DX))
            };
            debug!(experiment, obj_id, latency = t1 - start, stayed, "latency to stay");

            out.push(LatencyToStay {
                experiment,
                obj_id,
                latency: t1 - start,
                stayed,
                vel_out,
                vel_in,
                path_length,
            });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::tracked_row;
    use approx::assert_relative_eq;

    fn row(experiment: u32, obj_id: ObjId, ts: f64, in_area: bool) -> TrackedRow {
        let mut r = tracked_row(obj_id, ts, 0.0, 0.0);
        r.experiment = experiment;
        r.in_area = in_area;
        r
    }

    #[test]
    fn test_total_pct_per_experiment() {
        let mut rows: Vec<TrackedRow> = (0..4).map(|i| row(0, 1, i as f64, i == 0)).collect();
        rows.extend((0..2).map(|i| row(1, 1, i as f64, true)));
        assert_eq!(total_pct_in_area(&rows), vec![(0, 25.0), (1, 100.0)]);
    }

    #[test]
    fn test_per_obj_id_respects_min_len() {
        let mut rows: Vec<TrackedRow> = (0..95).map(|i| row(0, 1, i as f64, i % 2 == 0)).collect();
        rows.extend((0..5).map(|i| row(0, 2, i as f64, true)));
        let pcts = pct_in_area_per_obj_id(&rows, 0.10);
        let exp = &pcts[&0];
        assert_eq!(exp.len(), 1);
        assert_relative_eq!(exp[&1], 100.0 * 48.0 / 95.0);

        let pcts = pct_in_area_per_obj_id(&rows, 0.0);
        assert_eq!(pcts[&0][&2], 100.0);
    }

    #[test]
    fn test_time_in_area_windows() {
        // in the area for the first 5 s only
        let rows: Vec<TrackedRow> = (0..20).map(|i| row(0, 1, 100.0 + i as f64, i < 5)).collect();
        let pcts = time_in_area(&rows, 15.0, &[0.0, 4.0, 9.0]).unwrap();
        assert_eq!(pcts.len(), 1);
        // [0, 4]: 5/5, [4, 9]: 1/6, [9, 15]: 0/7
        assert_eq!(pcts[0][0], 100.0);
        assert_relative_eq!(pcts[0][1], 100.0 / 6.0);
        assert_eq!(pcts[0][2], 0.0);
    }

    fn moving(obj_id: ObjId, ts: f64, in_area: bool, v: f64) -> TrackedRow {
        let mut r = row(0, obj_id, ts, in_area);
        r.v = Some(v);
        r
    }

    #[test]
    fn test_latency_object_stays() {
        // enters at 5 s, moving at 2 outside and 1 inside
        let rows: Vec<TrackedRow> = (0..=30)
            .map(|i| moving(1, i as f64, i >= 5, if i >= 5 { 1.0 } else { 2.0 }))
            .collect();
        let result = latency_to_stay(&rows, 20.0, 0.10, 1.0);
        assert_eq!(result.len(), 1);
        let fly = &result[0];
        assert!(fly.stayed);
        assert_eq!(fly.latency, 25.0);
        assert_eq!(fly.vel_out, Some(2.0));
        // samples 4..=25 s, the first one still outside
        assert_relative_eq!(fly.vel_in.unwrap(), 23.0 / 22.0);
        assert_relative_eq!(fly.path_length, 4.0 * 2.0 * PATH_DX, epsilon = 1e-12);
    }

    #[test]
    fn test_latency_brief_exit_keeps_time_in_area() {
        let rows: Vec<TrackedRow> = (0..=30).map(|i| moving(1, i as f64, i > 0 && i != 11, 1.0)).collect();
        let fly = &latency_to_stay(&rows, 20.0, 0.10, 1.0)[0];
        assert!(fly.stayed);
        assert_eq!(fly.latency, 22.0);

        // a longer exit starts the count over and 19 s remain
        let fly = &latency_to_stay(&rows, 20.0, 0.10, 0.5)[0];
        assert!(!fly.stayed);
        assert_eq!(fly.latency, 30.0);
    }

    #[test]
    fn test_latency_object_never_stays() {
        let rows: Vec<TrackedRow> = (0..=30).map(|i| moving(1, i as f64, (5..=10).contains(&i), 1.5)).collect();
        let fly = &latency_to_stay(&rows, 20.0, 0.10, 1.0)[0];
        assert!(!fly.stayed);
        assert_eq!(fly.latency, 30.0);
        assert_eq!(fly.vel_out, Some(1.5));
        assert!(fly.vel_in.is_none());
        assert_relative_eq!(fly.path_length, 30.0 * 1.5 * PATH_DX, epsilon = 1e-12);
    }

    #[test]
    fn test_latency_skips_objects_starting_inside_and_short_tracks() {
        let mut rows: Vec<TrackedRow> = (0..30).map(|i| moving(1, i as f64, false, 1.0)).collect();
        rows.extend((0..11).map(|i| moving(2, i as f64, true, 1.0)));
        rows.push(moving(3, 0.0, false, 1.0));
        let result = latency_to_stay(&rows, 20.0, 0.10, 1.0);
        let obj_ids: Vec<ObjId> = result.iter().map(|r| r.obj_id).collect();
        assert_eq!(obj_ids, vec![1]);
    }

    #[test]
    fn test_time_in_area_needs_offsets() {
        assert!(time_in_area(&[], 10.0, &[0.0]).is_err());
        assert!(time_in_area(&[], 10.0, &[0.0, 1.0]).unwrap().is_empty());
    }
}
