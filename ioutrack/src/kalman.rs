//! Constant-velocity Kalman filter over box state
//!
//! State is `[cx, cy, s, r, vx, vy, vs]` where `s` is the box area and `r`
//! its aspect ratio (width / height). Only the first four are observed.

use crate::bbox::Bbox;
use anyhow::{anyhow, Result};
use nalgebra::{SMatrix, SVector};

pub type State = SVector<f32, 7>;
pub type Measurement = SVector<f32, 4>;

/// Diagonal of the measurement noise for `(cx, cy, s, r)`
const MEASUREMENT_VAR: [f32; 4] = [1.0, 1.0, 10.0, 10.0];
/// Diagonal of the process noise, velocities kept stiff
const PROCESS_VAR: [f32; 7] = [1.0, 1.0, 1.0, 1.0, 0.01, 0.01, 0.0001];
/// Initial covariance, unobserved velocities very uncertain
const INITIAL_VAR: [f32; 7] = [10.0, 10.0, 10.0, 10.0, 10000.0, 10000.0, 10000.0];

/// Box corners to `(cx, cy, area, aspect)`
pub fn bbox_to_z(bbox: &Bbox) -> Measurement {
    let (cx, cy) = bbox.center();
    let (w, h) = (bbox.width(), bbox.height());
    Measurement::new(cx, cy, w * h, w / h)
}

/// Inverse of [`bbox_to_z`]. Degenerate states give an invalid box.
pub fn z_to_bbox(cx: f32, cy: f32, area: f32, aspect: f32) -> Bbox {
    let w = (area * aspect).max(0.0).sqrt();
    let h = if w > 0.0 { area / w } else { 0.0 };
    Bbox::new(cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0)
}

#[derive(Debug, Clone)]
pub struct BoxKalman {
    x: State,
    p: SMatrix<f32, 7, 7>,
    f: SMatrix<f32, 7, 7>,
    h: SMatrix<f32, 4, 7>,
    r: SMatrix<f32, 4, 4>,
    q: SMatrix<f32, 7, 7>,
}

impl BoxKalman {
    pub fn new(bbox: &Bbox) -> Self {
        let z = bbox_to_z(bbox);
        let x = State::from_column_slice(&[z[0], z[1], z[2], z[3], 0.0, 0.0, 0.0]);

        // Position and area advance by their velocities each step
        let mut f = SMatrix::<f32, 7, 7>::identity();
        f[(0, 4)] = 1.0;
        f[(1, 5)] = 1.0;
        f[(2, 6)] = 1.0;

        let mut h = SMatrix::<f32, 4, 7>::zeros();
        for i in 0..4 {
            h[(i, i)] = 1.0;
        }

        Self {
            x,
            p: SMatrix::from_diagonal(&State::from_column_slice(&INITIAL_VAR)),
            f,
            h,
            r: SMatrix::from_diagonal(&Measurement::from_column_slice(&MEASUREMENT_VAR)),
            q: SMatrix::from_diagonal(&State::from_column_slice(&PROCESS_VAR)),
        }
    }

    /// Advance one step
    pub fn predict(&mut self) {
        // Shrinking area would go negative
        if self.x[2] + self.x[6] <= 0.0 {
            self.x[6] = 0.0;
        }
        self.x = self.f * self.x;
        self.p = self.f * self.p * self.f.transpose() + self.q;
    }

    /// Correct with an observed box
    pub fn update(&mut self, bbox: &Bbox) -> Result<()> {
        let y = bbox_to_z(bbox) - self.h * self.x;
        let s = self.h * self.p * self.h.transpose() + self.r;
        let s_inv = s
            .try_inverse()
            .ok_or_else(|| anyhow!("innovation covariance is singular"))?;
        let k = self.p * self.h.transpose() * s_inv;

        self.x += k * y;
        self.p = (SMatrix::<f32, 7, 7>::identity() - k * self.h) * self.p;
        Ok(())
    }

    pub fn bbox(&self) -> Bbox {
        z_to_bbox(self.x[0], self.x[1], self.x[2], self.x[3])
    }

    pub fn state(&self) -> &State {
        &self.x
    }
}
