//! Frames sent from the device to the link peer.
//!
//! Every frame starts with a response-type tag:
//!
//! - `0x00` status: `[0x00, status]`
//! - `0x01` orientation: `[0x01, w, x, y, z]`, each component an `f32`,
//!   little-endian.

use static_assertions::const_assert_eq;

use crate::cmd::CommandStatus;
use crate::{QuaternionSample, SAMPLE_SIZE};

pub const STATUS_FRAME_LEN: usize = 2;
pub const ORIENTATION_FRAME_LEN: usize = 1 + SAMPLE_SIZE;
pub const MAX_REPLY_LEN: usize = ORIENTATION_FRAME_LEN;

const_assert_eq!(STATUS_FRAME_LEN, 2);
const_assert_eq!(ORIENTATION_FRAME_LEN, 17);

#[cfg_attr(feature = "no_std", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
    Status,
    Orientation,
}

impl ResponseType {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(ResponseType::Status),
            0x01 => Some(ResponseType::Orientation),
            _ => None,
        }
    }
    pub fn to_byte(&self) -> u8 {
        match self {
            ResponseType::Status => 0x00,
            ResponseType::Orientation => 0x01,
        }
    }
}

pub fn status_frame(status: CommandStatus) -> [u8; STATUS_FRAME_LEN] {
    [ResponseType::Status.to_byte(), status.to_byte()]
}

pub fn orientation_frame(sample: &QuaternionSample) -> [u8; ORIENTATION_FRAME_LEN] {
    let mut frame = [0u8; ORIENTATION_FRAME_LEN];
    frame[0] = ResponseType::Orientation.to_byte();
    frame[1..].copy_from_slice(&sample.to_bytes());
    frame
}

/// A decoded device-to-peer frame, as seen by host tooling.
#[cfg_attr(feature = "no_std", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reply {
    Status(CommandStatus),
    Orientation(QuaternionSample),
}

impl Reply {
    /// Parse one frame from the front of `bytes`, returning it with the
    /// number of bytes consumed. `None` if the frame is unknown or incomplete.
    pub fn parse(bytes: &[u8]) -> Option<(Self, usize)> {
        match ResponseType::from_byte(*bytes.first()?)? {
            ResponseType::Status => {
                let status = CommandStatus::from_byte(*bytes.get(1)?)?;
                Some((Reply::Status(status), STATUS_FRAME_LEN))
            }
            ResponseType::Orientation => {
                let body: &[u8; SAMPLE_SIZE] =
                    bytes.get(1..ORIENTATION_FRAME_LEN)?.try_into().ok()?;
                Some((
                    Reply::Orientation(QuaternionSample::from_bytes(body)),
                    ORIENTATION_FRAME_LEN,
                ))
            }
        }
    }

    pub fn encoded_len(&self) -> usize {
        match self {
            Reply::Status(_) => STATUS_FRAME_LEN,
            Reply::Orientation(_) => ORIENTATION_FRAME_LEN,
        }
    }

    /// Encode into `buf`, returning the number of bytes written, or `None`
    /// if `buf` is too small.
    pub fn encode(&self, buf: &mut [u8]) -> Option<usize> {
        let out = buf.get_mut(..self.encoded_len())?;
        match self {
            Reply::Status(status) => out.copy_from_slice(&status_frame(*status)),
            Reply::Orientation(sample) => out.copy_from_slice(&orientation_frame(sample)),
        }
        Some(out.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_frame_is_tag_then_code() {
        assert_eq!(status_frame(CommandStatus::QueueFull), [0x00, 0x02]);
        assert_eq!(status_frame(CommandStatus::InvalidCommand), [0x00, 0x01]);
    }

    #[test]
    fn parse_stream_of_mixed_frames() {
        let sample = QuaternionSample::new(0.5, 0.5, -0.5, 0.5);
        let mut stream = [0u8; STATUS_FRAME_LEN + ORIENTATION_FRAME_LEN];
        stream[..2].copy_from_slice(&status_frame(CommandStatus::Ok));
        stream[2..].copy_from_slice(&orientation_frame(&sample));

        let (first, used) = Reply::parse(&stream).unwrap();
        assert_eq!(first, Reply::Status(CommandStatus::Ok));
        let (second, rest) = Reply::parse(&stream[used..]).unwrap();
        assert_eq!(second, Reply::Orientation(sample));
        assert_eq!(used + rest, stream.len());
    }

    #[test]
    fn incomplete_or_unknown_frames_do_not_parse() {
        assert_eq!(Reply::parse(&[]), None);
        assert_eq!(Reply::parse(&[0x00]), None);
        assert_eq!(Reply::parse(&[0x00, 0x09]), None);
        assert_eq!(Reply::parse(&[0x01, 0, 0, 0]), None);
        assert_eq!(Reply::parse(&[0x7F, 0]), None);
    }

    #[test]
    fn encode_refuses_short_buffer() {
        let reply = Reply::Orientation(QuaternionSample::IDENTITY);
        let mut small = [0u8; 4];
        assert_eq!(reply.encode(&mut small), None);
        let mut buf = [0u8; MAX_REPLY_LEN];
        assert_eq!(reply.encode(&mut buf), Some(ORIENTATION_FRAME_LEN));
        assert_eq!(buf[0], 0x01);
    }
}
