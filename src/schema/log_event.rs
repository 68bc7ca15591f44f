//! FlyMAD event log envelope and message definitions
//!
//! Every record in a log is a [`LogEvent`]: the topic it was published on,
//! the recorder's receive time and the message body. Bodies of the known
//! topics decode into the typed messages below; everything else stays a raw
//! JSON value so caller-declared extra topics can read fields from it.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Laser targeting commands issued by the targeter
pub const TOPIC_TARGETED: &str = "/targeter/targeted";
/// Tracked object state from the wide-field tracker
pub const TOPIC_TRACKED: &str = "/flymad/tracked";
/// Arena boundary polygon drawn by the experimenter
pub const TOPIC_GEOMETRY: &str = "/draw_geom/poly";
/// Head/body detections from the targeting camera
pub const TOPIC_HEAD_DELTA: &str = "/flymad/laser_head_delta";
/// Raw 2d detections; only used to recover headings in old logs
pub const TOPIC_RAW_2D: &str = "/flymad/raw_2d_positions";

/// Head was selected as the laser target
pub const TARGET_HEAD: i32 = 1;
/// Body was selected as the laser target
pub const TARGET_BODY: i32 = 2;

/// Targeter is steering from the wide-field tracker
pub const MODE_WIDE: i32 = 1;
/// Targeter is steering from the targeting camera
pub const MODE_TTM: i32 = 2;

/// Coordinate the head detector reports for a part it did not find
pub const NO_DETECT: f64 = 1e6;

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Integer timestamp as recorded in the log
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Stamp {
    pub secs: i64,
    #[serde(default)]
    pub nsecs: u32,
}

impl Stamp {
    pub fn new(secs: i64, nsecs: u32) -> Self {
        Self { secs, nsecs }
    }

    /// Build a stamp from floating point seconds (rounded to the nanosecond)
    pub fn from_sec(sec: f64) -> Self {
        Self::from_nanos((sec * NANOS_PER_SEC as f64).round() as i64)
    }

    pub fn from_nanos(nanos: i64) -> Self {
        Self {
            secs: nanos.div_euclid(NANOS_PER_SEC),
            nsecs: nanos.rem_euclid(NANOS_PER_SEC) as u32,
        }
    }

    /// Nanoseconds since the epoch, `None` when they do not fit in an `i64`
    pub fn as_nanos(&self) -> Option<i64> {
        self.secs
            .checked_mul(NANOS_PER_SEC)?
            .checked_add(i64::from(self.nsecs))
    }

    pub fn to_sec(&self) -> f64 {
        self.secs as f64 + f64::from(self.nsecs) * 1e-9
    }
}

/// Message header carrying the acquisition stamp
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Header {
    #[serde(default)]
    pub seq: u64,
    pub stamp: Stamp,
    #[serde(default)]
    pub frame_id: String,
}

/// One record of the event log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    /// Topic the message was published on
    pub topic: String,
    /// Time the recorder received the message
    pub time: Stamp,
    /// Message body
    pub msg: serde_json::Value,
}

impl LogEvent {
    pub fn new(topic: impl Into<String>, time: Stamp, msg: serde_json::Value) -> Self {
        Self {
            topic: topic.into(),
            time,
            msg,
        }
    }

    /// Decode the body of a known topic.
    ///
    /// Bodies that fail to decode are logged and reported as
    /// [`Message::Malformed`] so a single bad record never aborts a session.
    pub fn decode(&self) -> Message {
        let decoded = match self.topic.as_str() {
            TOPIC_TARGETED => TargetedMsg::deserialize(&self.msg).map(Message::Targeted),
            TOPIC_TRACKED => TrackedMsg::deserialize(&self.msg).map(Message::Tracked),
            TOPIC_GEOMETRY => PolyMsg::deserialize(&self.msg).map(Message::Geometry),
            TOPIC_HEAD_DELTA => HeadDeltaMsg::deserialize(&self.msg).map(Message::HeadDelta),
            TOPIC_RAW_2D => Raw2dMsg::deserialize(&self.msg).map(Message::Raw2d),
            _ => return Message::Other,
        };

        decoded.unwrap_or_else(|e| {
            warn!(topic = %self.topic, error = %e, "skipping malformed message");
            Message::Malformed
        })
    }
}

/// Decoded body of a log event
#[derive(Debug, Clone)]
pub enum Message {
    Targeted(TargetedMsg),
    Tracked(TrackedMsg),
    Geometry(PolyMsg),
    HeadDelta(HeadDeltaMsg),
    Raw2d(Raw2dMsg),
    /// Known topic whose body could not be decoded
    Malformed,
    /// Topic without a typed decoder
    Other,
}

/// Laser targeting command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetedMsg {
    pub header: Header,
    pub obj_id: u32,
    pub fly_x: f64,
    pub fly_y: f64,
    pub laser_x: f64,
    pub laser_y: f64,
    pub laser_power: f64,
    pub mode: i32,
}

/// Tracked object state (x, y, vx, vy in pixels)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedMsg {
    pub header: Header,
    pub obj_id: u32,
    pub framenumber: u64,
    pub state_vec: [f64; 4],
    pub is_living: bool,
    /// Heading; absent in logs recorded before it was added
    #[serde(default)]
    pub theta_passthrough: Option<f64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PolyPoint {
    pub x: f64,
    pub y: f64,
}

/// Arena boundary polygon in pixels
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolyMsg {
    #[serde(default)]
    pub points: Vec<PolyPoint>,
}

/// Head/body detection in the targeting camera.
///
/// Every field is optional: older recorders omitted some of them and a
/// missing value means "not detected".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeadDeltaMsg {
    #[serde(default)]
    pub obj_id: Option<u32>,
    #[serde(default)]
    pub head_x: Option<f64>,
    #[serde(default)]
    pub head_y: Option<f64>,
    #[serde(default)]
    pub body_x: Option<f64>,
    #[serde(default)]
    pub body_y: Option<f64>,
    #[serde(default)]
    pub target_x: Option<f64>,
    #[serde(default)]
    pub target_y: Option<f64>,
    #[serde(default)]
    pub target_type: Option<i32>,
    #[serde(default)]
    pub framenumber: Option<u64>,
    #[serde(default)]
    pub processing_time: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Raw2dPoint {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    pub theta: f64,
}

/// Raw detections of one wide-field frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Raw2dMsg {
    pub header: Header,
    pub framenumber: u64,
    #[serde(default)]
    pub points: Vec<Raw2dPoint>,
}
