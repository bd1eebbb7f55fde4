//! Quaternion to yaw/pitch/roll.

use libm::{asinf, atan2f};
use snowtrack_common::QuaternionSample;

const RAD_TO_DEG: f32 = 180.0 / core::f32::consts::PI;

/// Orientation quaternion as reported by the hub: real part `w`, vector
/// part `(i, j, k)`.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Quaternion {
    pub w: f32,
    pub i: f32,
    pub j: f32,
    pub k: f32,
}

impl Quaternion {
    pub const IDENTITY: Self = Self {
        w: 1.0,
        i: 0.0,
        j: 0.0,
        k: 0.0,
    };

    pub fn new(w: f32, i: f32, j: f32, k: f32) -> Self {
        Self { w, i, j, k }
    }

    pub fn norm_squared(&self) -> f32 {
        self.w * self.w + self.i * self.i + self.j * self.j + self.k * self.k
    }
}

impl From<Quaternion> for QuaternionSample {
    fn from(q: Quaternion) -> Self {
        QuaternionSample::new(q.w, q.i, q.j, q.k)
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Units {
    Radians,
    Degrees,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EulerAngles {
    pub yaw: f32,
    pub pitch: f32,
    pub roll: f32,
}

impl EulerAngles {
    pub fn to_degrees(self) -> Self {
        Self {
            yaw: self.yaw * RAD_TO_DEG,
            pitch: self.pitch * RAD_TO_DEG,
            roll: self.roll * RAD_TO_DEG,
        }
    }
}

/// Convert a quaternion to Euler angles.
///
/// The pitch term is normalised by the squared norm and clamped to
/// `[-1, 1]`, so a denormalised or degenerate report never produces NaN.
pub fn quaternion_to_euler(q: Quaternion, units: Units) -> EulerAngles {
    let Quaternion { w, i, j, k } = q;
    let (ww, ii, jj, kk) = (w * w, i * i, j * j, k * k);

    let yaw = atan2f(2.0 * (i * j + k * w), ii - jj - kk + ww);
    let roll = atan2f(2.0 * (j * k + i * w), -ii - jj + kk + ww);

    let norm = ii + jj + kk + ww;
    let sin_pitch = if norm.is_normal() {
        (-2.0 * (i * k - j * w) / norm).clamp(-1.0, 1.0)
    } else {
        0.0
    };
    // clamp() passes NaN through
    let sin_pitch = if sin_pitch.is_nan() { 0.0 } else { sin_pitch };
    let pitch = asinf(sin_pitch);

    let angles = EulerAngles { yaw, pitch, roll };
    match units {
        Units::Radians => angles,
        Units::Degrees => angles.to_degrees(),
    }
}
