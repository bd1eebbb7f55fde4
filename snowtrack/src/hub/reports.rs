//! SH-2 packet decoding.

use crate::err::DecodeError;
use crate::orientation::Quaternion;
use crate::shtp::{Header, HEADER_LEN};

use super::{
    CHANNEL_CONTROL, CHANNEL_EXECUTABLE, CHANNEL_GYRO_ROTATION_VECTOR, CHANNEL_REPORTS,
    CHANNEL_WAKE_REPORTS,
};

pub const REPORT_ACCELEROMETER: u8 = 0x01;
pub const REPORT_GYROSCOPE: u8 = 0x02;
pub const REPORT_ROTATION_VECTOR: u8 = 0x05;
pub const REPORT_GAME_ROTATION_VECTOR: u8 = 0x08;
/// Streamed on its own channel without a report header.
pub const REPORT_GYRO_INTEGRATED_ROTATION_VECTOR: u8 = 0x2A;

pub(crate) const BASE_TIMESTAMP: u8 = 0xFB;
pub(crate) const TIMESTAMP_REBASE: u8 = 0xFA;
pub(crate) const PRODUCT_ID_REQUEST: u8 = 0xF9;
pub(crate) const PRODUCT_ID_RESPONSE: u8 = 0xF8;
pub(crate) const SET_FEATURE: u8 = 0xFD;
pub(crate) const COMMAND_RESPONSE: u8 = 0xF1;
pub(crate) const COMMAND_INITIALIZE: u8 = 0x84;
pub(crate) const EXEC_RESET: u8 = 0x01;
pub(crate) const EXEC_RESET_COMPLETE: u8 = 0x01;

const TIMESTAMP_RECORD_LEN: usize = 5;
const PRODUCT_ID_LEN: usize = 16;
const GYRO_RV_LEN: usize = 14;
/// Hub timestamps and delays tick in 100 us.
const TICK_US: u64 = 100;

fn report_len(id: u8) -> Option<usize> {
    match id {
        REPORT_ACCELEROMETER | REPORT_GYROSCOPE => Some(10),
        REPORT_ROTATION_VECTOR => Some(14),
        REPORT_GAME_ROTATION_VECTOR => Some(12),
        _ => None,
    }
}

fn fixed(lo: u8, hi: u8, q: u8) -> f32 {
    i16::from_le_bytes([lo, hi]) as f32 / (1u32 << q) as f32
}

fn quaternion_q14(b: &[u8]) -> Quaternion {
    Quaternion {
        i: fixed(b[0], b[1], 14),
        j: fixed(b[2], b[3], 14),
        k: fixed(b[4], b[5], 14),
        w: fixed(b[6], b[7], 14),
    }
}

fn vector(b: &[u8], q: u8) -> [f32; 3] {
    [fixed(b[0], b[1], q), fixed(b[2], b[3], q), fixed(b[4], b[5], q)]
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Report {
    #[default]
    Empty,
    /// m/s^2
    Accelerometer([f32; 3]),
    /// rad/s
    Gyroscope([f32; 3]),
    RotationVector {
        quaternion: Quaternion,
        /// Estimated heading accuracy, radians.
        accuracy: f32,
    },
    GameRotationVector(Quaternion),
    /// Low-latency stream with no timestamp. Always counts as fresh.
    GyroIntegratedRotationVector {
        quaternion: Quaternion,
        /// rad/s
        angular_velocity: [f32; 3],
    },
}

impl Report {
    /// SH-2 report id, `None` for [`Report::Empty`].
    pub fn id(&self) -> Option<u8> {
        match self {
            Report::Empty => None,
            Report::Accelerometer(_) => Some(REPORT_ACCELEROMETER),
            Report::Gyroscope(_) => Some(REPORT_GYROSCOPE),
            Report::RotationVector { .. } => Some(REPORT_ROTATION_VECTOR),
            Report::GameRotationVector(_) => Some(REPORT_GAME_ROTATION_VECTOR),
            Report::GyroIntegratedRotationVector { .. } => {
                Some(REPORT_GYRO_INTEGRATED_ROTATION_VECTOR)
            }
        }
    }

    pub fn always_fresh(&self) -> bool {
        matches!(self, Report::GyroIntegratedRotationVector { .. })
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SensorEvent {
    /// Microseconds on the host timebase. Zero means "no new event".
    pub timestamp_us: u64,
    pub report: Report,
}

impl SensorEvent {
    pub const fn empty() -> Self {
        Self {
            timestamp_us: 0,
            report: Report::Empty,
        }
    }

    pub fn is_fresh(&self) -> bool {
        self.timestamp_us != 0 || self.report.always_fresh()
    }

    pub fn orientation(&self) -> Option<Quaternion> {
        match self.report {
            Report::RotationVector { quaternion, .. }
            | Report::GameRotationVector(quaternion)
            | Report::GyroIntegratedRotationVector { quaternion, .. } => Some(quaternion),
            _ => None,
        }
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProductId {
    pub reset_cause: u8,
    pub version_major: u8,
    pub version_minor: u8,
    pub part_number: u32,
    pub build_number: u32,
    pub version_patch: u16,
}

impl ProductId {
    fn parse(b: &[u8]) -> Result<Self, DecodeError> {
        if b.len() < PRODUCT_ID_LEN {
            return Err(DecodeError::Truncated {
                report: PRODUCT_ID_RESPONSE,
                len: b.len(),
            });
        }
        Ok(Self {
            reset_cause: b[1],
            version_major: b[2],
            version_minor: b[3],
            part_number: u32::from_le_bytes([b[4], b[5], b[6], b[7]]),
            build_number: u32::from_le_bytes([b[8], b[9], b[10], b[11]]),
            version_patch: u16::from_le_bytes([b[12], b[13]]),
        })
    }
}

/// What a packet turned out to be.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decoded {
    /// `event` was overwritten.
    Sensor,
    /// The hub reset itself.
    ResetComplete,
    ProductId(ProductId),
    Ignored,
}

/// Decode one reassembled packet (header included). `now_us` is the host
/// time the packet was read. Only the first sensor report of a packet is
/// decoded.
pub fn decode(packet: &[u8], now_us: u64, event: &mut SensorEvent) -> Result<Decoded, DecodeError> {
    let header: &[u8; HEADER_LEN] = packet
        .get(..HEADER_LEN)
        .and_then(|h| h.try_into().ok())
        .ok_or(DecodeError::Truncated {
            report: 0,
            len: packet.len(),
        })?;
    let header = Header::parse(header);
    let cargo = &packet[HEADER_LEN..];

    match header.channel {
        CHANNEL_EXECUTABLE => match cargo.first() {
            Some(&EXEC_RESET_COMPLETE) => Ok(Decoded::ResetComplete),
            _ => Ok(Decoded::Ignored),
        },
        CHANNEL_CONTROL => match cargo.first() {
            Some(&PRODUCT_ID_RESPONSE) => ProductId::parse(cargo).map(Decoded::ProductId),
            Some(&COMMAND_RESPONSE) if cargo.get(2) == Some(&COMMAND_INITIALIZE) => {
                Ok(Decoded::ResetComplete)
            }
            _ => Ok(Decoded::Ignored),
        },
        CHANNEL_REPORTS | CHANNEL_WAKE_REPORTS => decode_sensor(cargo, now_us, event),
        CHANNEL_GYRO_ROTATION_VECTOR => {
            if cargo.len() < GYRO_RV_LEN {
                return Err(DecodeError::Truncated {
                    report: CHANNEL_GYRO_ROTATION_VECTOR,
                    len: cargo.len(),
                });
            }
            event.report = Report::GyroIntegratedRotationVector {
                quaternion: quaternion_q14(&cargo[..8]),
                angular_velocity: vector(&cargo[8..14], 10),
            };
            Ok(Decoded::Sensor)
        }
        _ => Ok(Decoded::Ignored),
    }
}

fn decode_sensor(
    cargo: &[u8],
    now_us: u64,
    event: &mut SensorEvent,
) -> Result<Decoded, DecodeError> {
    let mut rest = cargo;
    let mut base_delta_us = 0u64;

    while let Some(&id) = rest.first() {
        if id != BASE_TIMESTAMP && id != TIMESTAMP_REBASE {
            break;
        }
        if rest.len() < TIMESTAMP_RECORD_LEN {
            return Err(DecodeError::Truncated {
                report: id,
                len: rest.len(),
            });
        }
        if id == BASE_TIMESTAMP {
            let ticks = u32::from_le_bytes([rest[1], rest[2], rest[3], rest[4]]);
            base_delta_us = ticks as u64 * TICK_US;
        }
        rest = &rest[TIMESTAMP_RECORD_LEN..];
    }

    let Some(&id) = rest.first() else {
        return Ok(Decoded::Ignored);
    };
    let len = report_len(id).ok_or(DecodeError::UnknownReport(id))?;
    if rest.len() < len {
        return Err(DecodeError::Truncated {
            report: id,
            len: rest.len(),
        });
    }
    let r = &rest[..len];

    // status bits 7:2 extend the delay field
    let delay_ticks = (((r[2] >> 2) as u64) << 8) | r[3] as u64;
    let timestamp_us = now_us.saturating_sub(base_delta_us) + delay_ticks * TICK_US;

    event.report = match id {
        REPORT_ACCELEROMETER => Report::Accelerometer(vector(&r[4..10], 8)),
        REPORT_GYROSCOPE => Report::Gyroscope(vector(&r[4..10], 9)),
        REPORT_ROTATION_VECTOR => Report::RotationVector {
            quaternion: quaternion_q14(&r[4..12]),
            accuracy: fixed(r[12], r[13], 12),
        },
        REPORT_GAME_ROTATION_VECTOR => Report::GameRotationVector(quaternion_q14(&r[4..12])),
        _ => return Err(DecodeError::UnknownReport(id)),
    };
    // zero is reserved for "no new event"
    event.timestamp_us = timestamp_us.max(1);
    Ok(Decoded::Sensor)
}
