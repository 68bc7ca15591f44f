//! Planar polygon helpers
//!
//! Just enough geometry for the arena: point-in-polygon tests, intersection
//! tests between boundary polygons, and clipping a polygon against the convex
//! approximation of the arena disc.

use serde::{Deserialize, Serialize};

/// Number of segments used to approximate the arena circle
pub const CIRCLE_SEGMENTS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Simple polygon given by its exterior ring (not explicitly closed)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    pub points: Vec<Point>,
}

impl Polygon {
    pub fn new(points: Vec<Point>) -> Self {
        Self { points }
    }

    /// Regular polygon approximating a circle
    pub fn circle(cx: f64, cy: f64, r: f64, segments: usize) -> Self {
        let points = (0..segments)
            .map(|i| {
                let a = std::f64::consts::TAU * (i as f64) / (segments as f64);
                Point::new(cx + r * a.cos(), cy + r * a.sin())
            })
            .collect();
        Self { points }
    }

    /// A polygon needs at least three vertices to enclose anything
    pub fn is_valid(&self) -> bool {
        self.points.len() >= 3
    }

    /// Signed area (positive for counter-clockwise rings)
    pub fn signed_area(&self) -> f64 {
        let n = self.points.len();
        if n < 3 {
            return 0.0;
        }
        let mut sum = 0.0;
        for i in 0..n {
            let a = self.points[i];
            let b = self.points[(i + 1) % n];
            sum += a.x * b.y - b.x * a.y;
        }
        sum / 2.0
    }

    pub fn area(&self) -> f64 {
        self.signed_area().abs()
    }

    /// Even-odd point in polygon test
    pub fn contains(&self, p: Point) -> bool {
        let n = self.points.len();
        if n < 3 {
            return false;
        }
        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let a = self.points[i];
            let b = self.points[j];
            if (a.y > p.y) != (b.y > p.y) {
                let x_cross = (b.x - a.x) * (p.y - a.y) / (b.y - a.y) + a.x;
                if p.x < x_cross {
                    inside = !inside;
                }
            }
            j = i;
        }
        inside
    }

    /// True if the polygons share any point (touching edges count)
    pub fn intersects(&self, other: &Polygon) -> bool {
        if !self.is_valid() || !other.is_valid() {
            return false;
        }
        for (a0, a1) in self.edges() {
            for (b0, b1) in other.edges() {
                if segments_intersect(a0, a1, b0, b1) {
                    return true;
                }
            }
        }
        self.contains(other.points[0]) || other.contains(self.points[0])
    }

    /// Clip this polygon against a convex polygon (Sutherland-Hodgman).
    ///
    /// Returns `None` when nothing of this polygon lies inside `clip`.
    pub fn clip_to_convex(&self, clip: &Polygon) -> Option<Polygon> {
        if !self.is_valid() || !clip.is_valid() {
            return None;
        }
        let orientation = clip.signed_area().signum();
        let inside = |p: Point, e0: Point, e1: Point| orientation * cross(e0, e1, p) >= 0.0;

        let mut output = self.points.clone();
        for (e0, e1) in clip.edges() {
            if output.is_empty() {
                break;
            }
            let input = std::mem::take(&mut output);
            let mut prev = input[input.len() - 1];
            for &cur in &input {
                let cur_in = inside(cur, e0, e1);
                let prev_in = inside(prev, e0, e1);
                if cur_in {
                    if !prev_in {
                        output.push(line_intersection(prev, cur, e0, e1));
                    }
                    output.push(cur);
                } else if prev_in {
                    output.push(line_intersection(prev, cur, e0, e1));
                }
                prev = cur;
            }
        }

        let clipped = Polygon::new(output);
        if clipped.is_valid() && clipped.area() > 0.0 {
            Some(clipped)
        } else {
            None
        }
    }

    fn edges(&self) -> impl Iterator<Item = (Point, Point)> + '_ {
        let n = self.points.len();
        (0..n).map(move |i| (self.points[i], self.points[(i + 1) % n]))
    }
}

/// z component of (b - a) x (p - a)
fn cross(a: Point, b: Point, p: Point) -> f64 {
    (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x)
}

fn on_segment(a: Point, b: Point, p: Point) -> bool {
    p.x >= a.x.min(b.x) && p.x <= a.x.max(b.x) && p.y >= a.y.min(b.y) && p.y <= a.y.max(b.y)
}

fn segments_intersect(a0: Point, a1: Point, b0: Point, b1: Point) -> bool {
    let d1 = cross(b0, b1, a0);
    let d2 = cross(b0, b1, a1);
    let d3 = cross(a0, a1, b0);
    let d4 = cross(a0, a1, b1);

    if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
    {
        return true;
    }

    (d1 == 0.0 && on_segment(b0, b1, a0))
        || (d2 == 0.0 && on_segment(b0, b1, a1))
        || (d3 == 0.0 && on_segment(a0, a1, b0))
        || (d4 == 0.0 && on_segment(a0, a1, b1))
}

/// Intersection of segment p0-p1 with the infinite line through e0-e1
fn line_intersection(p0: Point, p1: Point, e0: Point, e1: Point) -> Point {
    let d0 = cross(e0, e1, p0);
    let d1 = cross(e0, e1, p1);
    let denom = d0 - d1;
    if denom == 0.0 {
        return p1;
    }
    let t = d0 / denom;
    Point::new(p0.x + t * (p1.x - p0.x), p0.y + t * (p1.y - p0.y))
}
