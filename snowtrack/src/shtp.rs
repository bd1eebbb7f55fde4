//! Chunked packet transport to the sensor hub.
//!
//! Every hub packet starts with a 4-byte header `[len_lo, len_hi, channel,
//! seq]`. The length is little-endian, includes the header, and carries a
//! continuation flag in bit 15. A packet longer than one bus transaction is
//! delivered as several chunks, each of which repeats a 4-byte header.
//!
//! Reads reassemble chunks. Writes do not: a write is one transaction of at
//! most `max_chunk` bytes.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use static_assertions::const_assert;

use crate::err::{BusError, FrameError};

pub const HEADER_LEN: usize = 4;
/// Largest single bus transaction the framer will issue.
pub const MAX_CHUNK_LEN: usize = 256;
const CONTINUATION: u16 = 0x8000;
/// Idle hub answers a read with all ones.
const IDLE_HEADER: u16 = 0xFFFF;

const_assert!(MAX_CHUNK_LEN > HEADER_LEN);

/// SCL pulses that shift out any byte a slave is still sending.
pub const CLEAR_PULSES: u32 = 9;
const CLEAR_HALF_PERIOD_US: u32 = 5;

/// Free a bus whose SDA line is held low by a slave stuck mid-byte.
///
/// Both lines must be open-drain GPIOs, detached from the I2C peripheral.
/// SCL is clocked until SDA is released, at most [`CLEAR_PULSES`] times, then
/// a STOP condition is driven. Returns whether SDA ended up high.
pub fn clear_bus<SCL, SDA, D>(scl: &mut SCL, sda: &mut SDA, delay: &mut D) -> Result<bool, BusError>
where
    SCL: OutputPin,
    SDA: InputPin + OutputPin,
    D: DelayNs,
{
    sda.set_high().map_err(|_| BusError::Other)?;
    scl.set_high().map_err(|_| BusError::Other)?;
    delay.delay_us(CLEAR_HALF_PERIOD_US);

    let mut pulses = 0;
    while pulses < CLEAR_PULSES && sda.is_low().map_err(|_| BusError::Other)? {
        scl.set_low().map_err(|_| BusError::Other)?;
        delay.delay_us(CLEAR_HALF_PERIOD_US);
        scl.set_high().map_err(|_| BusError::Other)?;
        delay.delay_us(CLEAR_HALF_PERIOD_US);
        pulses += 1;
    }
    if pulses > 0 {
        warn!("hub bus cleared with {} clock pulses", pulses);
    }

    // STOP: SDA rises while SCL is high
    scl.set_low().map_err(|_| BusError::Other)?;
    sda.set_low().map_err(|_| BusError::Other)?;
    delay.delay_us(CLEAR_HALF_PERIOD_US);
    scl.set_high().map_err(|_| BusError::Other)?;
    delay.delay_us(CLEAR_HALF_PERIOD_US);
    sda.set_high().map_err(|_| BusError::Other)?;
    delay.delay_us(CLEAR_HALF_PERIOD_US);

    sda.is_high().map_err(|_| BusError::Other)
}

/// Byte-oriented bus primitive the framer runs on.
pub trait Bus {
    fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), BusError>;
    fn read(&mut self, address: u8, buf: &mut [u8]) -> Result<(), BusError>;
    /// Recover from [`BusError::InvalidState`] by recreating the bus.
    fn reinitialize(&mut self) -> Result<(), BusError>;
}

/// Rebuilds an I2C peripheral from scratch.
pub trait Reinit<I2C> {
    fn reinit(&mut self, i2c: I2C) -> I2C;
}

/// Keeps the existing handle.
pub struct NoReinit;

impl<I2C> Reinit<I2C> for NoReinit {
    fn reinit(&mut self, i2c: I2C) -> I2C {
        i2c
    }
}

/// [`Bus`] over an `embedded-hal` I2C peripheral.
pub struct I2cBus<I2C, R = NoReinit> {
    i2c: Option<I2C>,
    rebuild: R,
}

impl<I2C> I2cBus<I2C, NoReinit> {
    pub fn new(i2c: I2C) -> Self {
        Self {
            i2c: Some(i2c),
            rebuild: NoReinit,
        }
    }
}

impl<I2C, R: Reinit<I2C>> I2cBus<I2C, R> {
    pub fn with_reinit(i2c: I2C, rebuild: R) -> Self {
        Self {
            i2c: Some(i2c),
            rebuild,
        }
    }

    pub fn release(self) -> Option<I2C> {
        self.i2c
    }

    fn i2c(&mut self) -> Result<&mut I2C, BusError> {
        self.i2c.as_mut().ok_or(BusError::InvalidState)
    }
}

impl<I2C, R> Bus for I2cBus<I2C, R>
where
    I2C: embedded_hal::i2c::I2c,
    R: Reinit<I2C>,
{
    fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), BusError> {
        self.i2c()?.write(address, bytes).map_err(BusError::from_i2c)
    }

    fn read(&mut self, address: u8, buf: &mut [u8]) -> Result<(), BusError> {
        self.i2c()?.read(address, buf).map_err(BusError::from_i2c)
    }

    fn reinitialize(&mut self) -> Result<(), BusError> {
        let i2c = self.i2c.take().ok_or(BusError::InvalidState)?;
        self.i2c = Some(self.rebuild.reinit(i2c));
        Ok(())
    }
}

impl<B: Bus + ?Sized> Bus for &mut B {
    fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), BusError> {
        (**self).write(address, bytes)
    }

    fn read(&mut self, address: u8, buf: &mut [u8]) -> Result<(), BusError> {
        (**self).read(address, buf)
    }

    fn reinitialize(&mut self) -> Result<(), BusError> {
        (**self).reinitialize()
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Total packet length including this header.
    pub len: u16,
    pub continuation: bool,
    pub channel: u8,
    pub seq: u8,
}

impl Header {
    pub fn parse(bytes: &[u8; HEADER_LEN]) -> Self {
        let raw = u16::from_le_bytes([bytes[0], bytes[1]]);
        Self {
            len: raw & !CONTINUATION,
            continuation: raw & CONTINUATION != 0,
            channel: bytes[2],
            seq: bytes[3],
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut raw = self.len & !CONTINUATION;
        if self.continuation {
            raw |= CONTINUATION;
        }
        let [lo, hi] = raw.to_le_bytes();
        [lo, hi, self.channel, self.seq]
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FramerConfig {
    /// 7-bit bus address of the hub.
    pub address: u8,
    /// Largest transaction, header included.
    pub max_chunk: usize,
    /// Bus reinitializations allowed while reading one header.
    pub reinit_retries: u8,
}

impl Default for FramerConfig {
    fn default() -> Self {
        Self {
            address: 0x4A,
            max_chunk: 250,
            reinit_retries: 5,
        }
    }
}

pub struct Framer<B> {
    bus: B,
    address: u8,
    max_chunk: usize,
    reinit_retries: u8,
    chunk: [u8; MAX_CHUNK_LEN],
}

impl<B: Bus> Framer<B> {
    pub fn new(bus: B, config: FramerConfig) -> Self {
        Self {
            bus,
            address: config.address,
            max_chunk: config.max_chunk.clamp(HEADER_LEN + 1, MAX_CHUNK_LEN),
            reinit_retries: config.reinit_retries,
            chunk: [0u8; MAX_CHUNK_LEN],
        }
    }

    pub fn max_chunk(&self) -> usize {
        self.max_chunk
    }

    pub fn bus(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn release(self) -> B {
        self.bus
    }

    pub fn reinitialize_bus(&mut self) -> Result<(), FrameError> {
        warn!("reinitializing hub bus");
        self.bus.reinitialize().map_err(FrameError::Bus)
    }

    /// Read one packet into `dest`, header included. Returns its length.
    ///
    /// `dest` is only written up to the returned length. A packet that does
    /// not fit is rejected with [`FrameError::Overflow`] before any payload
    /// is read.
    pub fn read_packet(&mut self, dest: &mut [u8]) -> Result<usize, FrameError> {
        let header = self.read_header()?;
        let len = header.len as usize;
        if len == 0 {
            return Err(FrameError::NoData);
        }
        if len < HEADER_LEN {
            warn!("hub header declares {} bytes", len);
            return Err(FrameError::Malformed(len));
        }
        if len > dest.len() {
            warn!("hub packet of {} bytes dropped, buffer holds {}", len, dest.len());
            return Err(FrameError::Overflow {
                declared: len,
                capacity: dest.len(),
            });
        }

        // First chunk is taken verbatim, header and all.
        let first = self.max_chunk.min(len);
        self.bus.read(self.address, &mut dest[..first])?;
        let mut cursor = first;

        // Continuation chunks re-send a header, which is dropped.
        while cursor < len {
            let remaining = len - cursor;
            let n = self.max_chunk.min(remaining + HEADER_LEN);
            self.bus.read(self.address, &mut self.chunk[..n])?;
            let payload = n - HEADER_LEN;
            dest[cursor..cursor + payload].copy_from_slice(&self.chunk[HEADER_LEN..n]);
            cursor += payload;
        }

        trace!("hub packet ch {} seq {} len {}", header.channel, header.seq, len);
        Ok(len)
    }

    /// Write `bytes` in one transaction, truncated to `max_chunk`. Returns the
    /// number of bytes written.
    pub fn write_packet(&mut self, bytes: &[u8]) -> Result<usize, FrameError> {
        let n = self.max_chunk.min(bytes.len());
        self.bus.write(self.address, &bytes[..n])?;
        Ok(n)
    }

    fn read_header(&mut self) -> Result<Header, FrameError> {
        let mut raw = [0u8; HEADER_LEN];
        let mut reinits = 0;
        loop {
            match self.bus.read(self.address, &mut raw) {
                Ok(()) => break,
                Err(BusError::InvalidState) if reinits < self.reinit_retries => {
                    reinits += 1;
                    warn!("hub bus wedged, reinit {} of {}", reinits, self.reinit_retries);
                    self.bus.reinitialize()?;
                }
                Err(BusError::InvalidState) => {
                    error!("hub bus still wedged after {} reinits", reinits);
                    return Err(FrameError::Bus(BusError::InvalidState));
                }
                Err(e) => {
                    debug!("hub header read failed: {:?}", e);
                    return Err(FrameError::NoData);
                }
            }
        }
        if u16::from_le_bytes([raw[0], raw[1]]) == IDLE_HEADER {
            return Err(FrameError::NoData);
        }
        Ok(Header::parse(&raw))
    }
}
