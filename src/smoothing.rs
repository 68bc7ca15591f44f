//! Smoothing and derivative recomputation
//!
//! Positions of each track are optionally Kalman smoothed, then velocities
//! are re-derived as the numerical gradient of position over the gradient of
//! the sample timestamps. Using the actual timestamps rather than the nominal
//! frame interval keeps velocities right when frames were dropped.

use crate::arena::Arena;
use crate::error::AnalysisError;
use crate::filter::group_by_obj_id;
use crate::kalman::Kalman;
use crate::types::TrackedRow;
use tracing::debug;

/// Numerical gradient with central differences in the interior and one-sided
/// differences at the ends. Needs at least two samples.
pub fn gradient(values: &[f64]) -> Option<Vec<f64>> {
    let n = values.len();
    if n < 2 {
        return None;
    }
    let mut out = Vec::with_capacity(n);
    out.push(values[1] - values[0]);
    for i in 1..n - 1 {
        out.push((values[i + 1] - values[i - 1]) / 2.0);
    }
    out.push(values[n - 1] - values[n - 2]);
    Some(out)
}

/// Re-derived kinematics of one track, in pixels
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedTrack {
    pub x_px: Vec<f64>,
    pub y_px: Vec<f64>,
    pub vx_px: Vec<Option<f64>>,
    pub vy_px: Vec<Option<f64>>,
    pub dt: Vec<Option<f64>>,
}

/// Smooth (optionally) and differentiate one time-ordered track
pub fn derive_track(
    ts: &[f64],
    x: &[f64],
    y: &[f64],
    smooth: bool,
) -> Result<DerivedTrack, AnalysisError> {
    let (x_px, y_px) = if smooth {
        let states = Kalman::default().smooth_xy(x, y)?;
        (
            states.iter().map(|s| s[0]).collect::<Vec<_>>(),
            states.iter().map(|s| s[1]).collect::<Vec<_>>(),
        )
    } else {
        (x.to_vec(), y.to_vec())
    };

    let n = ts.len();
    let (vx_px, vy_px, dt) = match (gradient(ts), gradient(&x_px), gradient(&y_px)) {
        (Some(dt), Some(dx), Some(dy)) => {
            let rate = |d: f64, dt: f64| if dt != 0.0 { Some(d / dt) } else { None };
            (
                dx.iter().zip(&dt).map(|(&d, &t)| rate(d, t)).collect(),
                dy.iter().zip(&dt).map(|(&d, &t)| rate(d, t)).collect(),
                dt.into_iter().map(Some).collect(),
            )
        }
        _ => (vec![None; n], vec![None; n], vec![None; n]),
    };

    Ok(DerivedTrack {
        x_px,
        y_px,
        vx_px,
        vy_px,
        dt,
    })
}

fn magnitude(vx: Option<f64>, vy: Option<f64>) -> Option<f64> {
    Some(vx?.hypot(vy?))
}

/// Recompute positions and velocities of every track in place.
///
/// `tracked` must be ordered by timestamp.
pub fn smooth_tracks(
    tracked: &mut [TrackedRow],
    arena: &Arena,
    smooth: bool,
) -> Result<(), AnalysisError> {
    for (obj_id, indices) in group_by_obj_id(tracked) {
        if smooth {
            debug!(obj_id, samples = indices.len(), "kalman smoothing trajectory");
        }

        let ts: Vec<f64> = indices.iter().map(|&i| tracked[i].ts).collect();
        let x: Vec<f64> = indices.iter().map(|&i| tracked[i].raw_x_px).collect();
        let y: Vec<f64> = indices.iter().map(|&i| tracked[i].raw_y_px).collect();
        let derived = derive_track(&ts, &x, &y, smooth)?;

        for (k, &i) in indices.iter().enumerate() {
            let row = &mut tracked[i];
            row.x_px = derived.x_px[k];
            row.y_px = derived.y_px[k];
            row.vx_px = derived.vx_px[k];
            row.vy_px = derived.vy_px[k];
            row.v_px = magnitude(row.vx_px, row.vy_px);

            row.x = arena.scale_x(row.x_px);
            row.y = arena.scale_y(row.y_px);
            row.vx = row.vx_px.map(|v| arena.scale_vx(v));
            row.vy = row.vy_px.map(|v| arena.scale_vy(v));
            row.v = magnitude(row.vx, row.vy);

            row.dt = derived.dt[k];
        }
    }
    Ok(())
}
