//! Arena geometry and unit conversion
//!
//! The arena is the circular walking area seen by the wide-field camera. An
//! [`Arena`] is an immutable value: calibrating it returns a new arena, and a
//! second, different calibration for the same arena is rejected.

use crate::error::AnalysisError;
use crate::geometry::{Point, Polygon, CIRCLE_SEGMENTS};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Physical unit of converted positions and velocities
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    /// No conversion; values stay in camera pixels
    #[default]
    Px,
    M,
    Cm,
    Mm,
}

impl Unit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Unit::Px => "px",
            Unit::M => "m",
            Unit::Cm => "cm",
            Unit::Mm => "mm",
        }
    }

    /// Factor from meters to this unit
    fn multiplier(&self) -> f64 {
        match self {
            Unit::Px | Unit::M => 1.0,
            Unit::Cm => 100.0,
            Unit::Mm => 1000.0,
        }
    }

    fn converts(&self) -> bool {
        !matches!(self, Unit::Px)
    }
}

impl std::str::FromStr for Unit {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "px" => Ok(Unit::Px),
            "m" => Ok(Unit::M),
            "cm" => Ok(Unit::Cm),
            "mm" => Ok(Unit::Mm),
            other => Err(AnalysisError::InvalidOptions(format!("unknown unit '{}'", other))),
        }
    }
}

/// Arena parameters as stored in experiment configuration files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArenaConfig {
    /// Centre x (px)
    pub cx: f64,
    /// Centre y (px)
    pub cy: f64,
    /// Radius (px)
    pub cr: f64,
    pub xlim: (f64, f64),
    pub ylim: (f64, f64),
    /// Physical radius (m)
    pub rw: f64,
    /// Scale factor px -> m along x
    pub sx: f64,
    /// Scale factor px -> m along y
    pub sy: f64,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            cx: 360.0,
            cy: 255.0,
            cr: 200.0,
            xlim: (150.0, 570.0),
            ylim: (47.0, 463.0),
            rw: 0.045,
            sx: 0.045 / 208.0,
            sy: 0.045 / 219.0,
        }
    }
}

impl ArenaConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Measured arena bounds from a laser/camera calibration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub cx: f64,
    pub cy: f64,
    pub r: f64,
    pub xlim: (f64, f64),
    pub ylim: (f64, f64),
}

impl Calibration {
    /// Load a calibration record.
    ///
    /// A missing or undecodable file means "no calibration": old sessions were
    /// recorded without one and the arena defaults apply to them.
    pub fn load(path: &Path) -> Option<Calibration> {
        let data = match fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "no calibration");
                return None;
            }
        };
        match serde_json::from_str(&data) {
            Ok(calibration) => Some(calibration),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring invalid calibration");
                None
            }
        }
    }
}

/// Circular arena with its pixel to physical unit conversion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Arena {
    unit: Unit,
    cx: f64,
    cy: f64,
    r: f64,
    xlim: (f64, f64),
    ylim: (f64, f64),
    rw: f64,
    sx: f64,
    sy: f64,
    calibration: Option<Calibration>,
}

impl Default for Arena {
    fn default() -> Self {
        Self::new(Unit::Px)
    }
}

impl Arena {
    pub fn new(unit: Unit) -> Self {
        Self::from_config(unit, &ArenaConfig::default())
    }

    pub fn from_config(unit: Unit, config: &ArenaConfig) -> Self {
        Self {
            unit,
            cx: config.cx,
            cy: config.cy,
            r: config.cr,
            xlim: config.xlim,
            ylim: config.ylim,
            rw: config.rw,
            sx: config.sx,
            sy: config.sy,
            calibration: None,
        }
    }

    /// Return this arena updated from a calibration.
    ///
    /// Applying the calibration the arena already carries is a no-op; applying
    /// a different one is an error.
    pub fn with_calibration(self, calibration: Calibration) -> Result<Arena, AnalysisError> {
        match &self.calibration {
            Some(existing) if *existing == calibration => return Ok(self),
            Some(existing) => {
                return Err(AnalysisError::ConflictingCalibration(format!(
                    "{:?} vs {:?}",
                    existing, calibration
                )))
            }
            None => {}
        }

        info!(
            cx = calibration.cx,
            cy = calibration.cy,
            r = calibration.r,
            "updating arena from calibration"
        );

        // the circular arena is seen slightly obliquely; the x and y extents
        // are close enough that separate scales are sufficient
        let sx = self.rw / ((calibration.xlim.1 - calibration.xlim.0) / 2.0);
        let sy = self.rw / ((calibration.ylim.1 - calibration.ylim.0) / 2.0);

        Ok(Arena {
            cx: calibration.cx,
            cy: calibration.cy,
            r: calibration.r,
            xlim: calibration.xlim,
            ylim: calibration.ylim,
            sx,
            sy,
            calibration: Some(calibration),
            ..self
        })
    }

    pub fn calibration(&self) -> Option<&Calibration> {
        self.calibration.as_ref()
    }

    pub fn scale_x(&self, x: f64) -> f64 {
        if self.unit.converts() {
            (x - self.cx) * self.sx * self.unit.multiplier()
        } else {
            x
        }
    }

    pub fn scale_y(&self, y: f64) -> f64 {
        if self.unit.converts() {
            (y - self.cy) * self.sy * self.unit.multiplier()
        } else {
            y
        }
    }

    /// Velocities are origin independent; only the scale applies
    pub fn scale_vx(&self, vx: f64) -> f64 {
        if self.unit.converts() {
            vx * self.sx * self.unit.multiplier()
        } else {
            vx
        }
    }

    pub fn scale_vy(&self, vy: f64) -> f64 {
        if self.unit.converts() {
            vy * self.sy * self.unit.multiplier()
        } else {
            vy
        }
    }

    pub fn scale_point(&self, p: Point) -> Point {
        Point::new(self.scale_x(p.x), self.scale_y(p.y))
    }

    /// Centre and radius in output units
    pub fn circle(&self) -> (Point, f64) {
        if self.unit.converts() {
            (Point::new(0.0, 0.0), self.unit.multiplier() * self.rw)
        } else {
            (Point::new(self.cx, self.cy), self.r)
        }
    }

    /// Plot limits (x, y) in output units, 10% larger than the arena when converted
    pub fn limits(&self) -> ((f64, f64), (f64, f64)) {
        if self.unit.converts() {
            let l = self.rw * self.unit.multiplier() * 1.1;
            ((-l, l), (-l, l))
        } else {
            (self.xlim, self.ylim)
        }
    }

    /// Arena disc as a polygon in output units
    pub fn boundary(&self) -> Polygon {
        let (c, r) = self.circle();
        Polygon::circle(c.x, c.y, r, CIRCLE_SEGMENTS)
    }

    /// Intersection of a pixel-space polygon with the arena, in output units
    pub fn intersect_polygon(&self, geom: &Polygon) -> Option<Polygon> {
        if !geom.is_valid() {
            return None;
        }
        let scaled = Polygon::new(geom.points.iter().map(|p| self.scale_point(*p)).collect());
        scaled.clip_to_convex(&self.boundary())
    }
}
