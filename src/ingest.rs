//! Log ingestion
//!
//! Routes the events of one log into typed, timestamp-ordered tables. This is
//! the only stage that looks at topics; everything after it works on the
//! tables.

use crate::arena::Arena;
use crate::extra::ExtraChannels;
use crate::geometry::{Point, Polygon};
use crate::schema::{
    HeadDeltaMsg, LogEvent, Message, Raw2dMsg, Stamp, TargetedMsg, TrackedMsg, NO_DETECT,
    TOPIC_HEAD_DELTA, TOPIC_RAW_2D, TOPIC_TARGETED, TOPIC_TRACKED,
};
use crate::types::{
    ExtraRow, ExtraTable, HeadDetectRow, ObjId, Raw2dRow, TargetedRow, TrackedRow,
};
use chrono::{DateTime, FixedOffset, TimeZone};
use chrono_tz::Tz;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

/// Tables produced from one log, before filtering and smoothing
#[derive(Debug, Clone, Default)]
pub struct EventTables {
    pub targeted: Vec<TargetedRow>,
    pub tracked: Vec<TrackedRow>,
    pub head: Vec<HeadDetectRow>,
    pub raw2d: Vec<Raw2dRow>,
    pub extra: Vec<ExtraRow>,
    pub geometry: Option<Polygon>,
}

impl EventTables {
    /// Extra rows as a table with its declared columns, if any were collected
    pub fn extra_table(&self, channels: &ExtraChannels) -> Option<ExtraTable> {
        if self.extra.is_empty() {
            return None;
        }
        Some(ExtraTable {
            columns: channels.columns().to_vec(),
            rows: self.extra.clone(),
        })
    }
}

/// Convert a log stamp to an absolute time in `tz`, keeping nanoseconds.
///
/// Returns `None` for stamps outside the representable range.
pub fn stamp_to_time(stamp: Stamp, tz: &Tz) -> Option<DateTime<FixedOffset>> {
    Some(tz.timestamp_nanos(stamp.as_nanos()?).fixed_offset())
}

/// Detector coordinate, with the not-detected sentinel mapped to `None`
fn detected(value: Option<f64>) -> Option<f64> {
    value.filter(|&v| v != NO_DETECT)
}

/// Stateful router for one pass over a log
pub struct Ingestor<'a> {
    arena: &'a Arena,
    tz: Tz,
    extra: &'a ExtraChannels,
    tables: EventTables,
}

impl<'a> Ingestor<'a> {
    pub fn new(arena: &'a Arena, tz: Tz, extra: &'a ExtraChannels) -> Self {
        Self {
            arena,
            tz,
            extra,
            tables: EventTables::default(),
        }
    }

    /// Route one event to its table
    pub fn push(&mut self, event: &LogEvent) {
        match event.decode() {
            Message::Targeted(msg) => self.push_targeted(msg),
            Message::Tracked(msg) => self.push_tracked(msg),
            Message::Geometry(msg) => {
                let polygon = Polygon::new(msg.points.iter().map(|p| Point::new(p.x, p.y)).collect());
                if let Some(existing) = &self.tables.geometry {
                    warn!(?polygon, ?existing, "duplicate arena geometry message, ignoring");
                } else {
                    self.tables.geometry = Some(polygon);
                }
            }
            Message::HeadDelta(msg) => self.push_head(event.time, msg),
            Message::Raw2d(msg) => self.push_raw2d(msg),
            Message::Malformed => {}
            Message::Other => {
                if let Some(values) = self.extra.extract(&event.topic, &event.msg) {
                    let Some(time) = self.time_of(&event.topic, event.time) else {
                        return;
                    };
                    self.tables.extra.push(ExtraRow {
                        time,
                        ts: event.time.to_sec(),
                        topic: event.topic.clone(),
                        values,
                    });
                }
            }
        }
    }

    /// Absolute time of `stamp`, logging and skipping stamps out of range
    fn time_of(&self, topic: &str, stamp: Stamp) -> Option<DateTime<FixedOffset>> {
        let time = stamp_to_time(stamp, &self.tz);
        if time.is_none() {
            warn!(topic, secs = stamp.secs, nsecs = stamp.nsecs, "skipping event with out-of-range timestamp");
        }
        time
    }

    fn push_targeted(&mut self, msg: TargetedMsg) {
        let stamp = msg.header.stamp;
        let Some(time) = self.time_of(TOPIC_TARGETED, stamp) else {
            return;
        };
        self.tables.targeted.push(TargetedRow {
            time,
            ts: stamp.to_sec(),
            obj_id: msg.obj_id,
            fly_x_px: msg.fly_x,
            fly_y_px: msg.fly_y,
            laser_x_px: msg.laser_x,
            laser_y_px: msg.laser_y,
            fly_x: self.arena.scale_x(msg.fly_x),
            fly_y: self.arena.scale_y(msg.fly_y),
            laser_x: self.arena.scale_x(msg.laser_x),
            laser_y: self.arena.scale_y(msg.laser_y),
            laser_power: msg.laser_power,
            mode: msg.mode,
            laser_state: u8::from(msg.laser_power > 0.0),
        });
    }

    fn push_tracked(&mut self, msg: TrackedMsg) {
        if !msg.is_living {
            return;
        }
        let stamp = msg.header.stamp;
        let Some(time) = self.time_of(TOPIC_TRACKED, stamp) else {
            return;
        };
        let [x, y, vx, vy] = msg.state_vec;
        self.tables.tracked.push(TrackedRow {
            time,
            ts: stamp.to_sec(),
            obj_id: msg.obj_id,
            framenumber: msg.framenumber,
            raw_x_px: x,
            raw_y_px: y,
            raw_vx_px: vx,
            raw_vy_px: vy,
            x_px: x,
            y_px: y,
            vx_px: None,
            vy_px: None,
            v_px: None,
            x: self.arena.scale_x(x),
            y: self.arena.scale_y(y),
            vx: None,
            vy: None,
            v: None,
            dt: None,
            theta: msg.theta_passthrough,
            in_area: false,
            experiment: 0,
        });
    }

    fn push_head(&mut self, received: Stamp, msg: HeadDeltaMsg) {
        let Some(time) = self.time_of(TOPIC_HEAD_DELTA, received) else {
            return;
        };
        self.tables.head.push(HeadDetectRow {
            time,
            ts: received.to_sec(),
            obj_id: msg.obj_id,
            head_x: detected(msg.head_x),
            head_y: detected(msg.head_y),
            body_x: detected(msg.body_x),
            body_y: detected(msg.body_y),
            target_x: detected(msg.target_x),
            target_y: detected(msg.target_y),
            target_type: msg.target_type,
            framenumber: msg.framenumber.unwrap_or(0),
            processing_time: msg.processing_time,
        });
    }

    fn push_raw2d(&mut self, msg: Raw2dMsg) {
        // headings are only unambiguous with a single detection
        if msg.points.len() != 1 {
            return;
        }
        let Some(time) = self.time_of(TOPIC_RAW_2D, msg.header.stamp) else {
            return;
        };
        self.tables.raw2d.push(Raw2dRow {
            time,
            framenumber: msg.framenumber,
            theta: msg.points[0].theta,
        });
    }

    /// Order every table by time and backfill missing headings
    pub fn finish(mut self) -> EventTables {
        sort_by_time(&mut self.tables.targeted, |r| r.time, "targeted");
        sort_by_time(&mut self.tables.tracked, |r| r.time, "tracked");
        sort_by_time(&mut self.tables.head, |r| r.time, "head");
        sort_by_time(&mut self.tables.raw2d, |r| r.time, "raw2d");
        sort_by_time(&mut self.tables.extra, |r| r.time, "extra");

        backfill_theta(&mut self.tables.tracked, &self.tables.raw2d);

        self.tables
    }
}

/// Ingest a whole log
pub fn ingest(events: &[LogEvent], arena: &Arena, tz: Tz, extra: &ExtraChannels) -> EventTables {
    let mut ingestor = Ingestor::new(arena, tz, extra);
    for event in events {
        ingestor.push(event);
    }
    ingestor.finish()
}

fn sort_by_time<T>(rows: &mut [T], key: impl Fn(&T) -> DateTime<FixedOffset>, table: &str) {
    let ordered = rows.windows(2).all(|w| key(&w[0]) <= key(&w[1]));
    if !ordered {
        debug!(table, "reordering out-of-order rows by timestamp");
        rows.sort_by_key(|r| key(r));
    }
}

/// Recover headings of logs recorded before the tracker passed them through.
///
/// With a single object the raw detections line up one to one with tracked
/// rows. Otherwise rows are matched by frame number, and only frames with a
/// single tracked row get a heading.
fn backfill_theta(tracked: &mut [TrackedRow], raw2d: &[Raw2dRow]) {
    if tracked.is_empty() || tracked.iter().any(|r| r.theta.is_some()) {
        return;
    }

    let obj_ids: HashSet<ObjId> = tracked.iter().map(|r| r.obj_id).collect();
    if obj_ids.len() == 1 && raw2d.len() == tracked.len() {
        info!("copying raw 2d headings to tracked rows by position (single object)");
        for (row, raw) in tracked.iter_mut().zip(raw2d) {
            row.theta = Some(raw.theta);
        }
        return;
    }

    info!("copying raw 2d headings to tracked rows by frame number");
    let mut by_frame: HashMap<u64, Vec<usize>> = HashMap::new();
    for (i, row) in tracked.iter().enumerate() {
        by_frame.entry(row.framenumber).or_default().push(i);
    }
    for raw in raw2d {
        if let Some([i]) = by_frame.get(&raw.framenumber).map(Vec::as_slice) {
            tracked[*i].theta = Some(raw.theta);
        }
    }
}
