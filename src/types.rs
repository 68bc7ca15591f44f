//! Core types for the FlyMAD analysis pipeline
//!
//! This module defines the rows of the three event tables, the extra
//! side-channel table and the [`Session`] that bundles them.

use crate::extra::ExtraValue;
use crate::geometry::Polygon;
use crate::schema::{MODE_TTM, MODE_WIDE, TARGET_BODY, TARGET_HEAD};
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Object identifier assigned by the tracker
pub type ObjId = u32;

/// Laser targeting command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetedRow {
    pub time: DateTime<FixedOffset>,
    /// Seconds since the epoch
    pub ts: f64,
    pub obj_id: ObjId,
    pub fly_x_px: f64,
    pub fly_y_px: f64,
    pub laser_x_px: f64,
    pub laser_y_px: f64,
    pub fly_x: f64,
    pub fly_y: f64,
    pub laser_x: f64,
    pub laser_y: f64,
    pub laser_power: f64,
    pub mode: i32,
    /// 1 while the laser is on
    pub laser_state: u8,
}

impl TargetedRow {
    /// Human readable targeter mode
    pub fn target_mode(&self) -> &'static str {
        match self.mode {
            MODE_WIDE => "Wide",
            MODE_TTM => "TTM",
            _ => "Idle",
        }
    }
}

/// Tracked object sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedRow {
    pub time: DateTime<FixedOffset>,
    /// Seconds since the epoch
    pub ts: f64,
    pub obj_id: ObjId,
    pub framenumber: u64,
    /// State vector reported by the tracker
    pub raw_x_px: f64,
    pub raw_y_px: f64,
    pub raw_vx_px: f64,
    pub raw_vy_px: f64,
    /// Position used for analysis (smoothed when smoothing is enabled)
    pub x_px: f64,
    pub y_px: f64,
    /// Velocity re-derived from `x_px`/`y_px`
    pub vx_px: Option<f64>,
    pub vy_px: Option<f64>,
    pub v_px: Option<f64>,
    /// Position and velocity in the arena's unit
    pub x: f64,
    pub y: f64,
    pub vx: Option<f64>,
    pub vy: Option<f64>,
    pub v: Option<f64>,
    /// Local sample interval (s)
    pub dt: Option<f64>,
    pub theta: Option<f64>,
    pub in_area: bool,
    /// Index of the source session after a merge
    pub experiment: u32,
}

/// Head/body detection in the targeting camera; `None` means not detected
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeadDetectRow {
    pub time: DateTime<FixedOffset>,
    /// Seconds since the epoch
    pub ts: f64,
    pub obj_id: Option<ObjId>,
    pub head_x: Option<f64>,
    pub head_y: Option<f64>,
    pub body_x: Option<f64>,
    pub body_y: Option<f64>,
    pub target_x: Option<f64>,
    pub target_y: Option<f64>,
    pub target_type: Option<i32>,
    pub framenumber: u64,
    pub processing_time: Option<f64>,
}

impl HeadDetectRow {
    /// Offset between the laser target and the detected feature it aims at
    pub fn target_delta(&self) -> Option<(f64, f64)> {
        let (fx, fy) = match self.target_type? {
            TARGET_HEAD => (self.head_x?, self.head_y?),
            TARGET_BODY => (self.body_x?, self.body_y?),
            _ => return None,
        };
        Some((self.target_x? - fx, self.target_y? - fy))
    }
}

/// Legacy single-object heading sample
#[derive(Debug, Clone, PartialEq)]
pub struct Raw2dRow {
    pub time: DateTime<FixedOffset>,
    pub framenumber: u64,
    pub theta: f64,
}

/// Row of the extra side-channel table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtraRow {
    pub time: DateTime<FixedOffset>,
    pub ts: f64,
    pub topic: String,
    pub values: BTreeMap<String, Option<ExtraValue>>,
}

/// Extra side-channel table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtraTable {
    pub columns: Vec<String>,
    pub rows: Vec<ExtraRow>,
}

/// Length of one track and whether it survived filtering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackLength {
    pub obj_id: ObjId,
    pub samples: usize,
    /// Share of all tracked samples in the session (%)
    pub pct: f64,
    pub kept: bool,
}

/// Fully processed experiment session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Arena boundary polygon as drawn (px)
    pub geometry: Option<Polygon>,
    /// Boundary intersected with the arena, in the arena's unit
    pub arena_polygon: Option<Polygon>,
    pub targeted: Vec<TargetedRow>,
    pub tracked: Vec<TrackedRow>,
    pub head: Vec<HeadDetectRow>,
    pub extra: Option<ExtraTable>,
    /// Zone the timestamps were converted into
    pub timezone: String,
    pub track_lengths: Vec<TrackLength>,
}

impl Session {
    /// Object ids in order of first appearance
    pub fn obj_ids(&self) -> Vec<ObjId> {
        let mut ids: Vec<ObjId> = Vec::new();
        for row in &self.tracked {
            if !ids.contains(&row.obj_id) {
                ids.push(row.obj_id);
            }
        }
        ids
    }

    /// Tracked rows of one object
    pub fn track(&self, obj_id: ObjId) -> impl Iterator<Item = &TrackedRow> {
        self.tracked.iter().filter(move |r| r.obj_id == obj_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn head_row(target_type: Option<i32>) -> HeadDetectRow {
        HeadDetectRow {
            time: FixedOffset::east_opt(3600).unwrap().timestamp_opt(0, 0).unwrap(),
            ts: 0.0,
            obj_id: None,
            head_x: Some(10.0),
            head_y: Some(20.0),
            body_x: None,
            body_y: None,
            target_x: Some(12.0),
            target_y: Some(17.0),
            target_type,
            framenumber: 0,
            processing_time: None,
        }
    }

    #[test]
    fn test_target_delta_head() {
        assert_eq!(head_row(Some(TARGET_HEAD)).target_delta(), Some((2.0, -3.0)));
    }

    #[test]
    fn test_target_mode_from_targeter_mode() {
        let mut row = crate::test_support::targeted_row(1, 0.0);
        assert_eq!(row.target_mode(), "Idle");
        row.mode = MODE_WIDE;
        assert_eq!(row.target_mode(), "Wide");
        row.mode = MODE_TTM;
        assert_eq!(row.target_mode(), "TTM");
        row.mode = 7;
        assert_eq!(row.target_mode(), "Idle");
    }

    #[test]
    fn test_target_delta_not_detected() {
        assert_eq!(head_row(Some(TARGET_BODY)).target_delta(), None);
        assert_eq!(head_row(None).target_delta(), None);
    }
}
