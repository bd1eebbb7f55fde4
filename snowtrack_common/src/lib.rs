#![cfg_attr(feature = "no_std", no_std)]

pub mod cmd;
pub mod msg;

#[cfg(feature = "std")]
use serde::{Deserialize, Serialize};

/// Encoded size of a [`QuaternionSample`] on the link.
pub const SAMPLE_SIZE: usize = 16;

/// Orientation quaternion handed from the acquisition task to the link.
#[cfg_attr(feature = "no_std", derive(defmt::Format))]
#[cfg_attr(feature = "std", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct QuaternionSample {
    pub w: f32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl QuaternionSample {
    pub const IDENTITY: Self = Self {
        w: 1.0,
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(w: f32, x: f32, y: f32, z: f32) -> Self {
        Self { w, x, y, z }
    }

    pub fn to_bytes(&self) -> [u8; SAMPLE_SIZE] {
        let mut bytes = [0u8; SAMPLE_SIZE];
        bytes[0..4].copy_from_slice(&self.w.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.x.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.y.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.z.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8; SAMPLE_SIZE]) -> Self {
        let mut w = [0u8; 4];
        let mut x = [0u8; 4];
        let mut y = [0u8; 4];
        let mut z = [0u8; 4];

        w.copy_from_slice(&bytes[0..4]);
        x.copy_from_slice(&bytes[4..8]);
        y.copy_from_slice(&bytes[8..12]);
        z.copy_from_slice(&bytes[12..16]);

        Self {
            w: f32::from_le_bytes(w),
            x: f32::from_le_bytes(x),
            y: f32::from_le_bytes(y),
            z: f32::from_le_bytes(z),
        }
    }
}
