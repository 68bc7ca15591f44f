//! Shared builders for unit tests.

use crate::schema::{
    LogEvent, Stamp, TOPIC_GEOMETRY, TOPIC_HEAD_DELTA, TOPIC_RAW_2D, TOPIC_TARGETED, TOPIC_TRACKED,
};
use crate::types::{HeadDetectRow, ObjId, TargetedRow, TrackedRow};
use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use serde_json::json;

/// 2013-10-07 14:59:29 UTC
pub(crate) const BASE_SECS: i64 = 1_381_157_969;

/// Tracker frame interval in nanoseconds
const FRAME_NANOS: i64 = 10_000_000;

pub(crate) fn time_at(ts: f64) -> DateTime<FixedOffset> {
    Utc.timestamp_nanos((ts * 1e9).round() as i64).fixed_offset()
}

fn frame_stamp(frame: u64) -> Stamp {
    Stamp::from_nanos(BASE_SECS * 1_000_000_000 + frame as i64 * FRAME_NANOS)
}

fn stamp_json(stamp: Stamp) -> serde_json::Value {
    json!({"secs": stamp.secs, "nsecs": stamp.nsecs})
}

pub(crate) fn tracked_row(obj_id: ObjId, ts: f64, x: f64, y: f64) -> TrackedRow {
    TrackedRow {
        time: time_at(ts),
        ts,
        obj_id,
        framenumber: 0,
        raw_x_px: x,
        raw_y_px: y,
        raw_vx_px: 0.0,
        raw_vy_px: 0.0,
        x_px: x,
        y_px: y,
        vx_px: None,
        vy_px: None,
        v_px: None,
        x,
        y,
        vx: None,
        vy: None,
        v: None,
        dt: None,
        theta: None,
        in_area: false,
        experiment: 0,
    }
}

pub(crate) fn targeted_row(obj_id: ObjId, ts: f64) -> TargetedRow {
    TargetedRow {
        time: time_at(ts),
        ts,
        obj_id,
        fly_x_px: 0.0,
        fly_y_px: 0.0,
        laser_x_px: 0.0,
        laser_y_px: 0.0,
        fly_x: 0.0,
        fly_y: 0.0,
        laser_x: 0.0,
        laser_y: 0.0,
        laser_power: 0.0,
        mode: 0,
        laser_state: 0,
    }
}

pub(crate) fn head_row(framenumber: u64) -> HeadDetectRow {
    HeadDetectRow {
        time: time_at(framenumber as f64 * 0.01),
        ts: framenumber as f64 * 0.01,
        obj_id: None,
        head_x: None,
        head_y: None,
        body_x: None,
        body_y: None,
        target_x: None,
        target_y: None,
        target_type: None,
        framenumber,
        processing_time: None,
    }
}

/// Living tracked object at `frame`, stamped 10 ms per frame after [`BASE_SECS`]
pub(crate) fn tracked_event(obj_id: ObjId, frame: u64, x: f64, y: f64) -> LogEvent {
    let stamp = frame_stamp(frame);
    LogEvent::new(
        TOPIC_TRACKED,
        stamp,
        json!({
            "header": {"stamp": stamp_json(stamp)},
            "obj_id": obj_id,
            "framenumber": frame,
            "state_vec": [x, y, 0.0, 0.0],
            "is_living": true
        }),
    )
}

/// Targeting command `offset` seconds after [`BASE_SECS`]
pub(crate) fn targeted_event(obj_id: ObjId, offset: f64, laser_power: f64) -> LogEvent {
    let stamp = Stamp::from_nanos(BASE_SECS * 1_000_000_000 + (offset * 1e9).round() as i64);
    LogEvent::new(
        TOPIC_TARGETED,
        stamp,
        json!({
            "header": {"stamp": stamp_json(stamp)},
            "obj_id": obj_id,
            "fly_x": 360.0,
            "fly_y": 255.0,
            "laser_x": 365.0,
            "laser_y": 250.0,
            "laser_power": laser_power,
            "mode": 1
        }),
    )
}

pub(crate) fn head_event(offset: f64, msg: serde_json::Value) -> LogEvent {
    let stamp = Stamp::from_nanos(BASE_SECS * 1_000_000_000 + (offset * 1e9).round() as i64);
    LogEvent::new(TOPIC_HEAD_DELTA, stamp, msg)
}

pub(crate) fn geometry_event(points: &[(f64, f64)]) -> LogEvent {
    let points: Vec<serde_json::Value> = points.iter().map(|(x, y)| json!({"x": x, "y": y})).collect();
    LogEvent::new(TOPIC_GEOMETRY, frame_stamp(0), json!({ "points": points }))
}

pub(crate) fn raw2d_event(frame: u64, thetas: &[f64]) -> LogEvent {
    let stamp = frame_stamp(frame);
    let points: Vec<serde_json::Value> =
        thetas.iter().map(|t| json!({"x": 0.0, "y": 0.0, "theta": t})).collect();
    LogEvent::new(
        TOPIC_RAW_2D,
        stamp,
        json!({
            "header": {"stamp": stamp_json(stamp)},
            "framenumber": frame,
            "points": points
        }),
    )
}

/// Square drawn around the default arena centre (px)
pub(crate) fn arena_square() -> Vec<(f64, f64)> {
    vec![(260.0, 155.0), (460.0, 155.0), (460.0, 355.0), (260.0, 355.0)]
}

/// Log with the arena square and one straight track per `(obj_id, samples)`.
///
/// Tracks run one after the other; each moves 1 px per frame from the arena
/// centre.
pub(crate) fn session_log(tracks: &[(ObjId, u64)]) -> Vec<LogEvent> {
    let mut events = vec![geometry_event(&arena_square())];
    let mut frame = 0;
    for &(obj_id, samples) in tracks {
        for i in 0..samples {
            events.push(tracked_event(obj_id, frame, 360.0 + i as f64, 255.0));
            if i % 10 == 0 {
                let offset = frame as f64 * 0.01;
                events.push(targeted_event(obj_id, offset, if i % 20 == 0 { 1.0 } else { 0.0 }));
            }
            frame += 1;
        }
    }
    events
}
