//! Hardware stand-ins for unit tests.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::vec::Vec;

use crate::err::{BusError, LinkError};
use crate::hub::Timebase;
use crate::link::Link;
use crate::shtp::{Bus, HEADER_LEN};

/// A complete hub packet, header included.
pub fn packet(channel: u8, seq: u8, cargo: &[u8]) -> Vec<u8> {
    let len = (HEADER_LEN + cargo.len()) as u16;
    let mut out = Vec::with_capacity(len as usize);
    out.extend_from_slice(&len.to_le_bytes());
    out.push(channel);
    out.push(seq);
    out.extend_from_slice(cargo);
    out
}

/// Base timestamp record followed by a rotation vector report with raw Q14
/// components `[i, j, k, real]`.
pub fn rotation_vector_cargo(base_ticks: u32, raw: [i16; 4]) -> Vec<u8> {
    let mut out = vec![0xFB];
    out.extend_from_slice(&base_ticks.to_le_bytes());
    out.extend_from_slice(&[0x05, 0, 0, 0]);
    for c in raw {
        out.extend_from_slice(&c.to_le_bytes());
    }
    out.extend_from_slice(&[0, 0]);
    out
}

/// Behaves like the hub on the bus: every read returns a header for what is
/// left of the current packet followed by as much of the rest as fits.
#[derive(Default)]
pub struct FakeHubBus {
    pending: VecDeque<Vec<u8>>,
    cursor: usize,
    read_sizes: Vec<usize>,
    writes: Vec<Vec<u8>>,
    failing_writes: usize,
    failing_reads: Option<(BusError, usize)>,
    reinits: usize,
}

impl FakeHubBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue(&mut self, packet: &[u8]) {
        self.pending.push_back(packet.to_vec());
    }

    pub fn fail_writes(&mut self, n: usize) {
        self.failing_writes = n;
    }

    pub fn fail_reads(&mut self, err: BusError, n: usize) {
        self.failing_reads = Some((err, n));
    }

    pub fn read_sizes(&self) -> &[usize] {
        &self.read_sizes
    }

    pub fn writes(&self) -> &[Vec<u8>] {
        &self.writes
    }

    pub fn reinits(&self) -> usize {
        self.reinits
    }
}

impl Bus for FakeHubBus {
    fn write(&mut self, _address: u8, bytes: &[u8]) -> Result<(), BusError> {
        if self.failing_writes > 0 {
            self.failing_writes -= 1;
            return Err(BusError::Nack);
        }
        self.writes.push(bytes.to_vec());
        Ok(())
    }

    fn read(&mut self, _address: u8, buf: &mut [u8]) -> Result<(), BusError> {
        self.read_sizes.push(buf.len());
        if let Some((err, n)) = self.failing_reads.as_mut() {
            if *n > 0 {
                *n -= 1;
                return Err(*err);
            }
        }
        buf.fill(0);
        let Some(pkt) = self.pending.front() else {
            return Ok(());
        };

        let cargo = &pkt[HEADER_LEN..];
        let remaining = (cargo.len() - self.cursor + HEADER_LEN) as u16;
        let mut raw = remaining;
        if self.cursor > 0 {
            raw |= 0x8000;
        }
        let header = [raw as u8, (raw >> 8) as u8, pkt[2], pkt[3]];
        let n = buf.len().min(HEADER_LEN);
        buf[..n].copy_from_slice(&header[..n]);

        let take = buf.len().saturating_sub(HEADER_LEN).min(cargo.len() - self.cursor);
        buf[HEADER_LEN..HEADER_LEN + take].copy_from_slice(&cargo[self.cursor..self.cursor + take]);
        self.cursor += take;
        if take > 0 && self.cursor == cargo.len() {
            self.pending.pop_front();
            self.cursor = 0;
        }
        Ok(())
    }

    fn reinitialize(&mut self) -> Result<(), BusError> {
        self.reinits += 1;
        Ok(())
    }
}

/// Returns scripted 4-byte results in order, zeros once exhausted.
pub struct ScriptedBus {
    script: VecDeque<Result<[u8; HEADER_LEN], BusError>>,
    pub reinits: usize,
}

impl ScriptedBus {
    pub fn new(script: &[Result<[u8; HEADER_LEN], BusError>]) -> Self {
        Self {
            script: script.iter().copied().collect(),
            reinits: 0,
        }
    }
}

impl Bus for ScriptedBus {
    fn write(&mut self, _address: u8, _bytes: &[u8]) -> Result<(), BusError> {
        Ok(())
    }

    fn read(&mut self, _address: u8, buf: &mut [u8]) -> Result<(), BusError> {
        buf.fill(0);
        if let Some(next) = self.script.pop_front() {
            let bytes = next?;
            let n = buf.len().min(HEADER_LEN);
            buf[..n].copy_from_slice(&bytes[..n]);
        }
        Ok(())
    }

    fn reinitialize(&mut self) -> Result<(), BusError> {
        self.reinits += 1;
        Ok(())
    }
}

/// Output pin that records levels it was driven to.
#[derive(Default)]
pub struct FakePin {
    levels: Vec<bool>,
    broken: bool,
}

impl FakePin {
    pub fn broken() -> Self {
        Self {
            levels: Vec::new(),
            broken: true,
        }
    }

    pub fn transitions(&self) -> &[bool] {
        &self.levels
    }
}

impl embedded_hal::digital::ErrorType for FakePin {
    type Error = embedded_hal::digital::ErrorKind;
}

impl embedded_hal::digital::OutputPin for FakePin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        if self.broken {
            return Err(embedded_hal::digital::ErrorKind::Other);
        }
        self.levels.push(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        if self.broken {
            return Err(embedded_hal::digital::ErrorKind::Other);
        }
        self.levels.push(true);
        Ok(())
    }
}

/// SCL and SDA of a bus where a slave holds SDA low for `hold` more clock
/// pulses.
pub fn stuck_lines(hold: u32) -> (FakeScl, FakeSda) {
    let hold = Rc::new(Cell::new(hold));
    (
        FakeScl {
            hold: hold.clone(),
            falling: 0,
        },
        FakeSda {
            hold,
            released: true,
            driven: Vec::new(),
        },
    )
}

pub struct FakeScl {
    hold: Rc<Cell<u32>>,
    falling: u32,
}

impl FakeScl {
    pub fn falling_edges(&self) -> u32 {
        self.falling
    }
}

impl embedded_hal::digital::ErrorType for FakeScl {
    type Error = core::convert::Infallible;
}

impl embedded_hal::digital::OutputPin for FakeScl {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.falling += 1;
        self.hold.set(self.hold.get().saturating_sub(1));
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Open-drain SDA: reads high only when neither side pulls it low.
pub struct FakeSda {
    hold: Rc<Cell<u32>>,
    released: bool,
    driven: Vec<bool>,
}

impl FakeSda {
    /// Levels the master drove, in order.
    pub fn driven(&self) -> &[bool] {
        &self.driven
    }
}

impl embedded_hal::digital::ErrorType for FakeSda {
    type Error = core::convert::Infallible;
}

impl embedded_hal::digital::OutputPin for FakeSda {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.released = false;
        self.driven.push(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.released = true;
        self.driven.push(true);
        Ok(())
    }
}

impl embedded_hal::digital::InputPin for FakeSda {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(self.released && self.hold.get() == 0)
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        self.is_high().map(|high| !high)
    }
}

/// Delay that returns at once and adds up what was asked of it.
#[derive(Default)]
pub struct NoopDelay {
    total_ns: u64,
}

impl NoopDelay {
    pub fn total_ms(&self) -> u64 {
        self.total_ns / 1_000_000
    }
}

impl embedded_hal::delay::DelayNs for NoopDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.total_ns += ns as u64;
    }
}

impl embedded_hal_async::delay::DelayNs for NoopDelay {
    async fn delay_ns(&mut self, ns: u32) {
        self.total_ns += ns as u64;
    }
}

/// Advances by a fixed step on every read.
pub struct StepClock {
    now: Cell<u64>,
    step: u64,
}

impl StepClock {
    pub fn new(start: u64, step: u64) -> Self {
        Self {
            now: Cell::new(start),
            step,
        }
    }
}

impl Timebase for StepClock {
    fn now_us(&self) -> u64 {
        let now = self.now.get();
        self.now.set(now + self.step);
        now
    }
}

/// Link that keeps every frame it was given. Clones share the record.
#[derive(Clone, Default)]
pub struct RecordingLink {
    frames: Rc<RefCell<Vec<Vec<u8>>>>,
    refuse: Rc<Cell<Option<LinkError>>>,
}

impl RecordingLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.frames.borrow().clone()
    }

    pub fn refuse_with(&self, err: Option<LinkError>) {
        self.refuse.set(err);
    }
}

impl Link for RecordingLink {
    fn send(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        if let Some(err) = self.refuse.get() {
            return Err(err);
        }
        self.frames.borrow_mut().push(bytes.to_vec());
        Ok(())
    }
}
