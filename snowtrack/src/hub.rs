//! Sensor hub session: reset lifecycle, outbound commands and event polling.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;

use crate::err::{FrameError, OpenError};
use crate::shtp::{Bus, Framer, Header, HEADER_LEN};

pub mod reports;

use reports::{
    decode, Decoded, ProductId, SensorEvent, EXEC_RESET, PRODUCT_ID_REQUEST, SET_FEATURE,
};

pub const CHANNEL_COMMAND: u8 = 0;
pub const CHANNEL_EXECUTABLE: u8 = 1;
pub const CHANNEL_CONTROL: u8 = 2;
pub const CHANNEL_REPORTS: u8 = 3;
pub const CHANNEL_WAKE_REPORTS: u8 = 4;
pub const CHANNEL_GYRO_ROTATION_VECTOR: u8 = 5;
const CHANNELS: usize = 6;

/// Receive buffer; large enough for the hub's advertisement packet.
pub const RX_BUF_LEN: usize = 384;
const TX_BUF_LEN: usize = 32;
const SET_FEATURE_LEN: usize = 17;
/// Packets drained after a reset before the session counts as open.
const MAX_DRAIN: usize = 8;

/// Monotonic host time.
pub trait Timebase {
    fn now_us(&self) -> u64;
}

/// Called with every decoded sensor event, fresh or not.
pub type EventHandler = fn(&SensorEvent);

#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub reset_low_ms: u32,
    pub reset_settle_ms: u32,
    pub soft_reset_attempts: u8,
    pub soft_reset_backoff_ms: u32,
    pub post_reset_settle_ms: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reset_low_ms: 1,
            reset_settle_ms: 100,
            soft_reset_attempts: 5,
            soft_reset_backoff_ms: 30,
            post_reset_settle_ms: 300,
        }
    }
}

pub struct HubSession<B, RST, D, T> {
    framer: Framer<B>,
    reset: RST,
    delay: D,
    clock: T,
    config: SessionConfig,
    open: bool,
    reset_occurred: bool,
    handler: Option<EventHandler>,
    product_id: Option<ProductId>,
    seq: [u8; CHANNELS],
    rx: [u8; RX_BUF_LEN],
}

impl<B, RST, D, T> HubSession<B, RST, D, T>
where
    B: Bus,
    RST: OutputPin,
    D: DelayNs,
    T: Timebase,
{
    pub fn new(framer: Framer<B>, reset: RST, delay: D, clock: T, config: SessionConfig) -> Self {
        Self {
            framer,
            reset,
            delay,
            clock,
            config,
            open: false,
            reset_occurred: false,
            handler: None,
            product_id: None,
            seq: [0; CHANNELS],
            rx: [0; RX_BUF_LEN],
        }
    }

    /// Hardware-reset the hub, soft-reset it over the bus and drain whatever
    /// it announces on startup.
    pub fn open(&mut self) -> Result<(), OpenError> {
        self.open = false;
        self.product_id = None;
        self.seq = [0; CHANNELS];

        debug!("hub reset pulse");
        self.reset.set_low().map_err(|_| OpenError::ResetLine)?;
        self.delay.delay_ms(self.config.reset_low_ms);
        self.reset.set_high().map_err(|_| OpenError::ResetLine)?;
        self.delay.delay_ms(self.config.reset_settle_ms);

        let attempts = self.config.soft_reset_attempts;
        let mut sent = false;
        for attempt in 1..=attempts {
            match self.send(CHANNEL_EXECUTABLE, &[EXEC_RESET]) {
                Ok(()) => {
                    sent = true;
                    break;
                }
                Err(e) => {
                    warn!("hub soft reset {} of {} failed: {:?}", attempt, attempts, e);
                    self.delay.delay_ms(self.config.soft_reset_backoff_ms);
                }
            }
        }
        if !sent {
            error!("hub did not accept a soft reset");
            return Err(OpenError::SoftReset { attempts });
        }
        self.delay.delay_ms(self.config.post_reset_settle_ms);

        for _ in 0..MAX_DRAIN {
            match self.framer.read_packet(&mut self.rx) {
                Ok(len) => {
                    let now = self.clock.now_us();
                    let mut scratch = SensorEvent::empty();
                    match decode(&self.rx[..len], now, &mut scratch) {
                        Ok(Decoded::ProductId(id)) => self.product_id = Some(id),
                        Ok(_) => {}
                        Err(e) => debug!("startup packet not decoded: {:?}", e),
                    }
                }
                Err(FrameError::NoData) => break,
                Err(FrameError::Bus(e)) => return Err(OpenError::Bus(e)),
                Err(e) => debug!("startup packet dropped: {:?}", e),
            }
        }

        // our own reset is not news to the caller
        self.reset_occurred = false;
        self.open = true;
        info!("hub open");
        Ok(())
    }

    pub fn close(&mut self) {
        if self.open {
            info!("hub closed");
        }
        self.open = false;
        self.product_id = None;
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn set_callback(&mut self, handler: Option<EventHandler>) {
        self.handler = handler;
    }

    /// Pull and decode at most one pending packet into `event`.
    ///
    /// Returns true if `event` now holds a fresh sensor event: one with a
    /// non-zero timestamp, or one of the always-fresh kind.
    pub fn poll_once(&mut self, event: &mut SensorEvent) -> bool {
        event.timestamp_us = 0;
        if !self.open {
            return false;
        }

        let len = match self.framer.read_packet(&mut self.rx) {
            Ok(len) => len,
            Err(FrameError::NoData) => return false,
            Err(e) => {
                warn!("hub read failed: {:?}", e);
                return false;
            }
        };

        let now = self.clock.now_us();
        match decode(&self.rx[..len], now, event) {
            Ok(Decoded::Sensor) => {
                if let Some(handler) = self.handler {
                    handler(event);
                }
                event.is_fresh()
            }
            Ok(Decoded::ResetComplete) => {
                warn!("hub reset occurred");
                self.reset_occurred = true;
                false
            }
            Ok(Decoded::ProductId(id)) => {
                info!(
                    "hub product {} v{}.{}.{} build {}",
                    id.part_number, id.version_major, id.version_minor, id.version_patch,
                    id.build_number
                );
                self.product_id = Some(id);
                false
            }
            Ok(Decoded::Ignored) => false,
            Err(e) => {
                warn!("hub report dropped: {:?}", e);
                event.timestamp_us = 0;
                false
            }
        }
    }

    /// Ask the hub to stream `report_id` every `interval_us`.
    pub fn enable_report(&mut self, report_id: u8, interval_us: u32) -> Result<(), FrameError> {
        let mut cmd = [0u8; SET_FEATURE_LEN];
        cmd[0] = SET_FEATURE;
        cmd[1] = report_id;
        cmd[5..9].copy_from_slice(&interval_us.to_le_bytes());
        self.send(CHANNEL_CONTROL, &cmd)?;
        info!("report {:?} enabled every {} us", report_id, interval_us);
        Ok(())
    }

    /// The answer arrives through [`poll_once`](Self::poll_once).
    pub fn request_product_id(&mut self) -> Result<(), FrameError> {
        self.send(CHANNEL_CONTROL, &[PRODUCT_ID_REQUEST, 0])
    }

    pub fn product_id(&self) -> Option<ProductId> {
        self.product_id
    }

    pub fn reset_occurred(&self) -> bool {
        self.reset_occurred
    }

    /// Read and clear the reset latch.
    pub fn take_reset_flag(&mut self) -> bool {
        core::mem::take(&mut self.reset_occurred)
    }

    pub fn reinitialize_bus(&mut self) -> Result<(), FrameError> {
        self.framer.reinitialize_bus()
    }

    pub fn bus(&mut self) -> &mut B {
        self.framer.bus()
    }

    fn send(&mut self, channel: u8, cargo: &[u8]) -> Result<(), FrameError> {
        let len = HEADER_LEN + cargo.len();
        if len > TX_BUF_LEN {
            return Err(FrameError::Overflow {
                declared: len,
                capacity: TX_BUF_LEN,
            });
        }
        let slot = channel as usize % CHANNELS;
        let header = Header {
            len: len as u16,
            continuation: false,
            channel,
            seq: self.seq[slot],
        };
        let mut tx = [0u8; TX_BUF_LEN];
        tx[..HEADER_LEN].copy_from_slice(&header.to_bytes());
        tx[HEADER_LEN..len].copy_from_slice(cargo);
        self.framer.write_packet(&tx[..len])?;
        self.seq[slot] = self.seq[slot].wrapping_add(1);
        Ok(())
    }
}

/// The part of a hub session the acquisition loop drives.
pub trait HubSource {
    fn poll_once(&mut self, event: &mut SensorEvent) -> bool;
    fn take_reset_flag(&mut self) -> bool;
    fn enable_report(&mut self, report_id: u8, interval_us: u32) -> Result<(), FrameError>;
    fn reinitialize_bus(&mut self) -> Result<(), FrameError>;
    /// Close if needed, then open again.
    fn reopen(&mut self) -> Result<(), OpenError>;
}

impl<B, RST, D, T> HubSource for HubSession<B, RST, D, T>
where
    B: Bus,
    RST: OutputPin,
    D: DelayNs,
    T: Timebase,
{
    fn poll_once(&mut self, event: &mut SensorEvent) -> bool {
        HubSession::poll_once(self, event)
    }

    fn take_reset_flag(&mut self) -> bool {
        HubSession::take_reset_flag(self)
    }

    fn enable_report(&mut self, report_id: u8, interval_us: u32) -> Result<(), FrameError> {
        HubSession::enable_report(self, report_id, interval_us)
    }

    fn reinitialize_bus(&mut self) -> Result<(), FrameError> {
        HubSession::reinitialize_bus(self)
    }

    fn reopen(&mut self) -> Result<(), OpenError> {
        self.close();
        self.open()
    }
}

#[cfg(test)]
mod tests {
    use super::reports::{Report, REPORT_ROTATION_VECTOR};
    use super::*;
    use crate::err::BusError;
    use crate::orientation::Quaternion;
    use crate::shtp::FramerConfig;
    use crate::testing::{
        packet, rotation_vector_cargo, FakeHubBus, FakePin, NoopDelay, StepClock,
    };
    use core::sync::atomic::{AtomicUsize, Ordering};

    type Session<'a> = HubSession<&'a mut FakeHubBus, FakePin, NoopDelay, StepClock>;

    fn session(bus: &mut FakeHubBus) -> Session<'_> {
        HubSession::new(
            Framer::new(bus, FramerConfig::default()),
            FakePin::default(),
            NoopDelay::default(),
            StepClock::new(1_000, 1_000),
            SessionConfig::default(),
        )
    }

    fn identity_report() -> Vec<u8> {
        packet(CHANNEL_REPORTS, 0, &rotation_vector_cargo(0, [0, 0, 0, 1 << 14]))
    }

    #[test]
    fn open_pulses_reset_and_sends_soft_reset() {
        let mut bus = FakeHubBus::new();
        bus.queue(&packet(CHANNEL_EXECUTABLE, 0, &[0x01]));
        let mut hub = session(&mut bus);
        assert_eq!(hub.open(), Ok(()));
        assert!(hub.is_open());
        assert!(!hub.reset_occurred());
        assert_eq!(hub.reset.transitions(), &[false, true]);
        assert_eq!(hub.delay.total_ms(), 1 + 100 + 300);
        drop(hub);
        assert_eq!(bus.writes(), &[vec![5, 0, CHANNEL_EXECUTABLE, 0, 1]]);
    }

    #[test]
    fn open_retries_soft_reset_then_fails() {
        let mut bus = FakeHubBus::new();
        bus.fail_writes(5);
        let mut hub = session(&mut bus);
        assert_eq!(hub.open(), Err(OpenError::SoftReset { attempts: 5 }));
        assert!(!hub.is_open());
        assert_eq!(hub.delay.total_ms(), 1 + 100 + 5 * 30);
    }

    #[test]
    fn open_survives_transient_write_failures() {
        let mut bus = FakeHubBus::new();
        bus.fail_writes(4);
        let mut hub = session(&mut bus);
        assert_eq!(hub.open(), Ok(()));
    }

    #[test]
    fn open_fails_on_dead_reset_line() {
        let mut bus = FakeHubBus::new();
        let mut hub = session(&mut bus);
        hub.reset = FakePin::broken();
        assert_eq!(hub.open(), Err(OpenError::ResetLine));
    }

    #[test]
    fn poll_once_reports_fresh_orientation() {
        let mut bus = FakeHubBus::new();
        let mut hub = session(&mut bus);
        hub.open().unwrap();
        hub.framer.bus().queue(&identity_report());

        let mut event = SensorEvent::empty();
        assert!(hub.poll_once(&mut event));
        assert_eq!(event.orientation(), Some(Quaternion::IDENTITY));
        assert!(!hub.poll_once(&mut event));
        assert_eq!(event.timestamp_us, 0);
    }

    #[test]
    fn poll_once_is_idle_while_closed() {
        let mut bus = FakeHubBus::new();
        bus.queue(&identity_report());
        let mut hub = session(&mut bus);
        let mut event = SensorEvent::empty();
        event.timestamp_us = 77;
        assert!(!hub.poll_once(&mut event));
        assert_eq!(event.timestamp_us, 0);
    }

    #[test]
    fn decode_failure_is_stale_not_fatal() {
        let mut bus = FakeHubBus::new();
        let mut hub = session(&mut bus);
        hub.open().unwrap();
        hub.framer
            .bus()
            .queue(&packet(CHANNEL_REPORTS, 0, &[0xFB, 0, 0, 0, 0, 0x05, 0, 0]));
        hub.framer.bus().queue(&identity_report());

        let mut event = SensorEvent::empty();
        assert!(!hub.poll_once(&mut event));
        assert_eq!(event.timestamp_us, 0);
        assert!(hub.poll_once(&mut event));
    }

    #[test]
    fn reset_after_open_is_latched() {
        let mut bus = FakeHubBus::new();
        let mut hub = session(&mut bus);
        hub.open().unwrap();
        hub.framer
            .bus()
            .queue(&packet(CHANNEL_EXECUTABLE, 1, &[0x01]));
        let mut event = SensorEvent::empty();
        assert!(!hub.poll_once(&mut event));
        assert!(hub.reset_occurred());
        assert!(hub.take_reset_flag());
        assert!(!hub.take_reset_flag());
    }

    #[test]
    fn callback_sees_each_sensor_event() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        fn count(event: &SensorEvent) {
            assert!(matches!(event.report, Report::RotationVector { .. }));
            CALLS.fetch_add(1, Ordering::SeqCst);
        }

        let mut bus = FakeHubBus::new();
        let mut hub = session(&mut bus);
        hub.open().unwrap();
        hub.set_callback(Some(count));
        hub.framer.bus().queue(&identity_report());
        hub.framer.bus().queue(&identity_report());
        let mut event = SensorEvent::empty();
        hub.poll_once(&mut event);
        hub.poll_once(&mut event);
        assert_eq!(CALLS.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn enable_report_sends_set_feature_with_sequence() {
        let mut bus = FakeHubBus::new();
        let mut hub = session(&mut bus);
        hub.open().unwrap();
        hub.enable_report(REPORT_ROTATION_VECTOR, 30_769).unwrap();
        hub.enable_report(REPORT_ROTATION_VECTOR, 10_000).unwrap();
        drop(hub);

        let writes = bus.writes();
        assert_eq!(writes.len(), 3);
        let first = &writes[1];
        assert_eq!(&first[..4], &[21, 0, CHANNEL_CONTROL, 0]);
        assert_eq!(first[4], 0xFD);
        assert_eq!(first[5], REPORT_ROTATION_VECTOR);
        assert_eq!(&first[9..13], &30_769u32.to_le_bytes());
        assert_eq!(writes[2][3], 1);
    }

    #[test]
    fn product_id_is_cached() {
        let mut bus = FakeHubBus::new();
        let mut hub = session(&mut bus);
        hub.open().unwrap();
        assert_eq!(hub.product_id(), None);
        hub.request_product_id().unwrap();
        let mut cargo = [0u8; 16];
        cargo[0] = 0xF8;
        cargo[2] = 3;
        hub.framer.bus().queue(&packet(CHANNEL_CONTROL, 0, &cargo));
        let mut event = SensorEvent::empty();
        assert!(!hub.poll_once(&mut event));
        assert_eq!(hub.product_id().map(|id| id.version_major), Some(3));
        hub.close();
        assert_eq!(hub.product_id(), None);
    }

    #[test]
    fn wedged_bus_during_poll_is_not_fatal() {
        let mut bus = FakeHubBus::new();
        let mut hub = session(&mut bus);
        hub.open().unwrap();
        hub.framer.bus().fail_reads(BusError::InvalidState, 10);
        let mut event = SensorEvent::empty();
        assert!(!hub.poll_once(&mut event));
        assert_eq!(hub.framer.bus().reinits(), 5);
    }
}
