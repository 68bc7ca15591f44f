//! Fixed-interval Kalman smoother
//!
//! Constant-velocity model in the image plane.
//! State: [x, y, vx, vy] (px, px/s)
//! Observation: [x, y] (px)
//!
//! The parameters match the online tracker so that offline smoothing sees the
//! same model the tracker used while recording.

use crate::error::AnalysisError;
use nalgebra::{Matrix2, Matrix2x4, Matrix4, Vector2, Vector4};

/// Tracker frame rate (Hz)
pub const FPS: f64 = 100.0;
/// Process covariance scale
pub const Q_SIGMA: f64 = 10.0;
/// Observation covariance scale
pub const R_SIGMA: f64 = 10.0;

/// Linear-Gaussian constant-velocity model
#[derive(Debug, Clone)]
pub struct Kalman {
    /// Process model
    a: Matrix4<f64>,
    /// Observation model
    c: Matrix2x4<f64>,
    /// Process covariance
    q: Matrix4<f64>,
    /// Observation covariance
    r: Matrix2<f64>,
}

impl Default for Kalman {
    fn default() -> Self {
        Self::constant_velocity(1.0 / FPS, Q_SIGMA, R_SIGMA)
    }
}

impl Kalman {
    pub fn constant_velocity(dt: f64, q_sigma: f64, r_sigma: f64) -> Self {
        #[rustfmt::skip]
        let a = Matrix4::new(
            1.0, 0.0, dt,  0.0,
            0.0, 1.0, 0.0, dt,
            0.0, 0.0, 1.0, 0.0,
            0.0, 0.0, 0.0, 1.0,
        );
        #[rustfmt::skip]
        let c = Matrix2x4::new(
            1.0, 0.0, 0.0, 0.0,
            0.0, 1.0, 0.0, 0.0,
        );
        Self {
            a,
            c,
            q: Matrix4::identity() * q_sigma,
            r: Matrix2::identity() * r_sigma,
        }
    }

    /// Smooth a sequence of (x, y) observations.
    ///
    /// The filter is seeded with the first observation, zero velocity and zero
    /// covariance; a Rauch-Tung-Striebel backward pass follows the forward
    /// filter. Returns one smoothed state per observation.
    pub fn smooth(&self, observations: &[Vector2<f64>]) -> Result<Vec<Vector4<f64>>, AnalysisError> {
        let n = observations.len();
        if n == 0 {
            return Ok(Vec::new());
        }

        let first = observations[0];
        let init_x = Vector4::new(first.x, first.y, 0.0, 0.0);
        let init_v = Matrix4::zeros();

        // forward pass
        let mut x_filt: Vec<Vector4<f64>> = Vec::with_capacity(n);
        let mut v_filt: Vec<Matrix4<f64>> = Vec::with_capacity(n);
        let mut x_pred: Vec<Vector4<f64>> = Vec::with_capacity(n);
        let mut v_pred: Vec<Matrix4<f64>> = Vec::with_capacity(n);

        for (t, y) in observations.iter().enumerate() {
            let (xp, vp) = if t == 0 {
                (init_x, init_v)
            } else {
                (
                    self.a * x_filt[t - 1],
                    self.a * v_filt[t - 1] * self.a.transpose() + self.q,
                )
            };

            let innovation = y - self.c * xp;
            let s = self.c * vp * self.c.transpose() + self.r;
            let s_inv = s.try_inverse().ok_or_else(|| {
                AnalysisError::SmootherError(format!("singular innovation covariance at sample {}", t))
            })?;
            let gain = vp * self.c.transpose() * s_inv;

            x_filt.push(xp + gain * innovation);
            v_filt.push((Matrix4::identity() - gain * self.c) * vp);
            x_pred.push(xp);
            v_pred.push(vp);
        }

        // backward pass
        let mut x_smooth = x_filt.clone();
        for t in (0..n - 1).rev() {
            let vp_inv = v_pred[t + 1].try_inverse().ok_or_else(|| {
                AnalysisError::SmootherError(format!("singular predicted covariance at sample {}", t + 1))
            })?;
            let j = v_filt[t] * self.a.transpose() * vp_inv;
            x_smooth[t] = x_filt[t] + j * (x_smooth[t + 1] - x_pred[t + 1]);
        }

        Ok(x_smooth)
    }

    /// Convenience wrapper taking separate coordinate slices
    pub fn smooth_xy(&self, x: &[f64], y: &[f64]) -> Result<Vec<Vector4<f64>>, AnalysisError> {
        let observations: Vec<Vector2<f64>> =
            x.iter().zip(y).map(|(&x, &y)| Vector2::new(x, y)).collect();
        self.smooth(&observations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_empty_input() {
        assert!(Kalman::default().smooth(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_single_observation_is_seed() {
        let out = Kalman::default().smooth(&[Vector2::new(3.0, 4.0)]).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0], Vector4::new(3.0, 4.0, 0.0, 0.0));
    }

    #[test]
    fn test_stationary_target() {
        let obs = vec![Vector2::new(100.0, 50.0); 200];
        let out = Kalman::default().smooth(&obs).unwrap();
        for state in &out {
            assert_relative_eq!(state.x, 100.0, epsilon = 1e-9);
            assert_relative_eq!(state.y, 50.0, epsilon = 1e-9);
            assert_relative_eq!(state.z, 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_reduces_noise() {
        // deterministic zig-zag around a fixed point
        let obs: Vec<Vector2<f64>> = (0..500)
            .map(|i| {
                let offset = if i % 2 == 0 { 2.0 } else { -2.0 };
                Vector2::new(200.0 + offset, 200.0 - offset)
            })
            .collect();
        let out = Kalman::default().smooth(&obs).unwrap();

        let raw_err: f64 = obs.iter().map(|o| (o.x - 200.0).abs()).sum::<f64>() / obs.len() as f64;
        let smooth_err: f64 =
            out.iter().map(|s| (s.x - 200.0).abs()).sum::<f64>() / out.len() as f64;
        assert!(smooth_err < raw_err);
    }

    #[test]
    fn test_linear_in_observations() {
        let obs: Vec<Vector2<f64>> = (0..100)
            .map(|i| Vector2::new(i as f64 * 0.7 + (i % 3) as f64, 5.0 - i as f64 * 0.2))
            .collect();
        let scaled: Vec<Vector2<f64>> = obs.iter().map(|o| *o * 3.0).collect();

        let kf = Kalman::default();
        let a = kf.smooth(&obs).unwrap();
        let b = kf.smooth(&scaled).unwrap();
        for (sa, sb) in a.iter().zip(&b) {
            assert_relative_eq!(sa.x * 3.0, sb.x, max_relative = 1e-9);
            assert_relative_eq!(sa.w * 3.0, sb.w, max_relative = 1e-9, epsilon = 1e-9);
        }
    }
}
