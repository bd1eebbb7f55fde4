use core::fmt::{self, Display};

pub mod log;

/// Failure of a single bus transaction.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusError {
    /// Peripheral is wedged; the bus has to be reinitialized before use.
    InvalidState,
    Nack,
    Timeout,
    Other,
}

impl BusError {
    /// Classify an `embedded-hal` I2C error.
    pub fn from_i2c<E: embedded_hal::i2c::Error>(err: E) -> Self {
        use embedded_hal::i2c::ErrorKind;
        match err.kind() {
            ErrorKind::Bus | ErrorKind::ArbitrationLoss => BusError::InvalidState,
            ErrorKind::NoAcknowledge(_) => BusError::Nack,
            _ => BusError::Other,
        }
    }
}

impl Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusError::InvalidState => write!(f, "bus in invalid state"),
            BusError::Nack => write!(f, "no acknowledge"),
            BusError::Timeout => write!(f, "bus timeout"),
            BusError::Other => write!(f, "bus error"),
        }
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// Nothing pending. Not an error when polling.
    NoData,
    /// Declared packet length does not fit the destination.
    Overflow { declared: usize, capacity: usize },
    /// Declared length shorter than a header.
    Malformed(usize),
    Bus(BusError),
}

impl From<BusError> for FrameError {
    fn from(e: BusError) -> Self {
        FrameError::Bus(e)
    }
}

impl Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::NoData => write!(f, "no packet available"),
            FrameError::Overflow { declared, capacity } => write!(
                f,
                "packet of {} bytes exceeds {} byte buffer",
                declared, capacity
            ),
            FrameError::Malformed(len) => write!(f, "malformed header length {}", len),
            FrameError::Bus(e) => write!(f, "{}", e),
        }
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenError {
    /// The reset line could not be driven.
    ResetLine,
    /// No soft-reset packet got through.
    SoftReset { attempts: u8 },
    Bus(BusError),
}

impl From<BusError> for OpenError {
    fn from(e: BusError) -> Self {
        OpenError::Bus(e)
    }
}

impl From<FrameError> for OpenError {
    fn from(e: FrameError) -> Self {
        match e {
            FrameError::Bus(e) => OpenError::Bus(e),
            _ => OpenError::Bus(BusError::Other),
        }
    }
}

impl Display for OpenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpenError::ResetLine => write!(f, "could not drive hub reset line"),
            OpenError::SoftReset { attempts } => {
                write!(f, "hub soft reset failed after {} attempts", attempts)
            }
            OpenError::Bus(e) => write!(f, "{}", e),
        }
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    Truncated { report: u8, len: usize },
    UnknownReport(u8),
}

impl Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Truncated { report, len } => {
                write!(f, "report {:#04x} truncated to {} bytes", report, len)
            }
            DecodeError::UnknownReport(id) => write!(f, "unknown report {:#04x}", id),
        }
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionError {
    /// The hub stayed silent through every allowed recovery.
    RecoveryExhausted { attempts: u8 },
}

impl Display for AcquisitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcquisitionError::RecoveryExhausted { attempts } => {
                write!(f, "hub did not recover after {} attempts", attempts)
            }
        }
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    Disconnected,
    /// Outbound path cannot take more bytes right now.
    Busy,
}

impl Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkError::Disconnected => write!(f, "link disconnected"),
            LinkError::Busy => write!(f, "link busy"),
        }
    }
}

/// Any error raised by this crate.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    Bus(BusError),
    Frame(FrameError),
    Open(OpenError),
    Decode(DecodeError),
    Acquisition(AcquisitionError),
    Link(LinkError),
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Bus(e) => write!(f, "{}", e),
            Error::Frame(e) => write!(f, "{}", e),
            Error::Open(e) => write!(f, "{}", e),
            Error::Decode(e) => write!(f, "{}", e),
            Error::Acquisition(e) => write!(f, "{}", e),
            Error::Link(e) => write!(f, "{}", e),
        }
    }
}

macro_rules! impl_from_error {
    ($($variant:ident($ty:ty)),* $(,)?) => {
        $(
            impl From<$ty> for Error {
                fn from(e: $ty) -> Self {
                    Error::$variant(e)
                }
            }
        )*
    };
}

impl_from_error!(
    Bus(BusError),
    Frame(FrameError),
    Open(OpenError),
    Decode(DecodeError),
    Acquisition(AcquisitionError),
    Link(LinkError),
);

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal::i2c::{ErrorKind, NoAcknowledgeSource};

    #[test]
    fn i2c_errors_classify() {
        assert_eq!(BusError::from_i2c(ErrorKind::Bus), BusError::InvalidState);
        assert_eq!(
            BusError::from_i2c(ErrorKind::ArbitrationLoss),
            BusError::InvalidState
        );
        assert_eq!(
            BusError::from_i2c(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address)),
            BusError::Nack
        );
        assert_eq!(BusError::from_i2c(ErrorKind::Overrun), BusError::Other);
    }

    #[test]
    fn frame_errors_fold_into_open_errors() {
        assert_eq!(
            OpenError::from(FrameError::Bus(BusError::Nack)),
            OpenError::Bus(BusError::Nack)
        );
        assert_eq!(
            OpenError::from(FrameError::Overflow {
                declared: 300,
                capacity: 32
            }),
            OpenError::Bus(BusError::Other)
        );
    }

    #[test]
    fn display_is_readable() {
        let e: Error = FrameError::Overflow {
            declared: 400,
            capacity: 384,
        }
        .into();
        assert_eq!(e.to_string(), "packet of 400 bytes exceeds 384 byte buffer");
        let e: Error = DecodeError::UnknownReport(0x2a).into();
        assert_eq!(e.to_string(), "unknown report 0x2a");
    }
}
