//! The acquisition loop: polls the hub, converts orientation reports and
//! republishes them on the lossy result channel.
//!
//! Recovery policy: after `stale_threshold` consecutive polls with no fresh
//! event the loop reinitializes the bus, reopens the session and enables the
//! reports again. A fresh event clears the count of recoveries. Once
//! `max_recovery_attempts` recoveries in a row fail to bring data back the
//! loop gives up with [`AcquisitionError::RecoveryExhausted`], and
//! [`Acquisition::supervise`] starts the session over.
//!
//! Only the configured report is forwarded; any other kind, orientation or
//! not, is counted as [`Step::Other`].

use embedded_hal_async::delay::DelayNs;
use snowtrack_common::QuaternionSample;

use crate::err::{AcquisitionError, OpenError};
use crate::hub::reports::{SensorEvent, REPORT_ROTATION_VECTOR};
use crate::hub::HubSource;
use crate::lossy::LossyChannel;
use crate::orientation::{quaternion_to_euler, EulerAngles, Units};

#[derive(Debug, Clone, Copy)]
pub struct AcquisitionConfig {
    pub report_id: u8,
    /// Requested report period, ~32.5 Hz by default.
    pub report_interval_us: u32,
    pub poll_interval_ms: u32,
    /// Empty polls before a recovery. `None` disables recovery.
    pub stale_threshold: Option<u32>,
    pub max_recovery_attempts: u8,
    /// Reinitialize the bus every this many fresh events. `None` disables.
    pub bus_refresh_every: Option<u32>,
    /// Log angles every this many published samples. Zero disables.
    pub log_every: u32,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            report_id: REPORT_ROTATION_VECTOR,
            report_interval_us: 30_769,
            poll_interval_ms: 1,
            stale_threshold: Some(1000),
            max_recovery_attempts: 3,
            bus_refresh_every: None,
            log_every: 300,
        }
    }
}

/// Outcome of one loop iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Step {
    /// An orientation sample went onto the result channel.
    Published(EulerAngles),
    /// Fresh event of a kind that is not forwarded.
    Other,
    Idle,
    Recovered,
    RecoveryFailed,
}

pub struct Acquisition<'a, H, const N: usize> {
    hub: H,
    results: &'a LossyChannel<QuaternionSample, N>,
    config: AcquisitionConfig,
    event: SensorEvent,
    empty_polls: u32,
    recoveries: u8,
    since_refresh: u32,
    published: u32,
}

impl<'a, H: HubSource, const N: usize> Acquisition<'a, H, N> {
    pub fn new(
        hub: H,
        results: &'a LossyChannel<QuaternionSample, N>,
        config: AcquisitionConfig,
    ) -> Self {
        Self {
            hub,
            results,
            config,
            event: SensorEvent::empty(),
            empty_polls: 0,
            recoveries: 0,
            since_refresh: 0,
            published: 0,
        }
    }

    pub fn hub(&mut self) -> &mut H {
        &mut self.hub
    }

    pub fn published(&self) -> u32 {
        self.published
    }

    /// Open the hub and enable reports. Failure here is fatal for startup.
    pub fn start(&mut self) -> Result<(), OpenError> {
        self.empty_polls = 0;
        self.recoveries = 0;
        self.hub.reopen()?;
        self.configure()?;
        info!("acquisition started");
        Ok(())
    }

    fn configure(&mut self) -> Result<(), OpenError> {
        self.hub
            .enable_report(self.config.report_id, self.config.report_interval_us)
            .map_err(OpenError::from)
    }

    pub fn step(&mut self) -> Result<Step, AcquisitionError> {
        if self.hub.take_reset_flag() {
            warn!("hub reset, enabling reports again");
            if let Err(e) = self.configure() {
                error!("report enable after reset failed: {:?}", e);
            }
        }

        if !self.hub.poll_once(&mut self.event) {
            self.empty_polls = self.empty_polls.saturating_add(1);
            return match self.config.stale_threshold {
                Some(threshold) if self.empty_polls >= threshold => self.recover(),
                _ => Ok(Step::Idle),
            };
        }

        self.empty_polls = 0;
        self.recoveries = 0;
        self.refresh_bus();

        let report_id = self.event.report.id();
        if report_id != Some(self.config.report_id) {
            debug!("other sensor event {:?}", report_id);
            return Ok(Step::Other);
        }
        let Some(quaternion) = self.event.orientation() else {
            return Ok(Step::Other);
        };
        let angles = quaternion_to_euler(quaternion, Units::Radians);
        if self.results.publish(quaternion.into()).is_some() {
            trace!("result channel full, oldest sample evicted");
        }
        self.published = self.published.wrapping_add(1);
        if self.config.log_every > 0 && self.published % self.config.log_every == 0 {
            let deg = angles.to_degrees();
            info!("yaw {} pitch {} roll {}", deg.yaw, deg.pitch, deg.roll);
        }
        Ok(Step::Published(angles))
    }

    /// Run until recovery is exhausted.
    pub async fn run<D: DelayNs>(&mut self, delay: &mut D) -> AcquisitionError {
        loop {
            if let Err(e) = self.step() {
                return e;
            }
            delay.delay_ms(self.config.poll_interval_ms).await;
        }
    }

    /// Start, run, and start again whenever recovery is exhausted. Returns
    /// only when the startup handshake fails.
    pub async fn supervise<D: DelayNs>(&mut self, delay: &mut D) -> OpenError {
        loop {
            if let Err(e) = self.start() {
                return e;
            }
            let e = self.run(delay).await;
            error!("{:?}, restarting acquisition", e);
        }
    }

    fn refresh_bus(&mut self) {
        let Some(every) = self.config.bus_refresh_every else {
            return;
        };
        self.since_refresh += 1;
        if self.since_refresh >= every {
            self.since_refresh = 0;
            if let Err(e) = self.hub.reinitialize_bus() {
                warn!("periodic bus refresh failed: {:?}", e);
            }
        }
    }

    fn recover(&mut self) -> Result<Step, AcquisitionError> {
        self.empty_polls = 0;
        if self.recoveries >= self.config.max_recovery_attempts {
            error!("hub silent after {} recoveries", self.recoveries);
            return Err(AcquisitionError::RecoveryExhausted {
                attempts: self.recoveries,
            });
        }
        self.recoveries += 1;
        warn!(
            "no hub data, recovery {} of {}",
            self.recoveries, self.config.max_recovery_attempts
        );

        let result = self
            .hub
            .reinitialize_bus()
            .map_err(OpenError::from)
            .and_then(|()| self.hub.reopen())
            .and_then(|()| self.configure());
        match result {
            Ok(()) => Ok(Step::Recovered),
            Err(e) => {
                error!("hub recovery failed: {:?}", e);
                Ok(Step::RecoveryFailed)
            }
        }
    }
}
