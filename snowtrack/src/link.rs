//! The wireless link seam and the path from results to the link.

use core::sync::atomic::{AtomicBool, Ordering};

use embedded_hal_async::delay::DelayNs;
use snowtrack_common::msg::orientation_frame;
use snowtrack_common::QuaternionSample;

use crate::err::LinkError;
use crate::lossy::LossyChannel;

/// Outbound byte stream to the link peer. `send` must not block.
pub trait Link {
    fn send(&mut self, bytes: &[u8]) -> Result<(), LinkError>;
}

impl<L: Link + ?Sized> Link for &mut L {
    fn send(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        (**self).send(bytes)
    }
}

/// Connection flag, driven by the link layer's lifecycle notifications.
pub struct LinkState {
    connected: AtomicBool,
}

impl LinkState {
    pub const fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
        }
    }

    pub fn on_connect(&self) {
        if !self.connected.swap(true, Ordering::AcqRel) {
            info!("link connected");
        }
    }

    pub fn on_disconnect(&self) {
        if self.connected.swap(false, Ordering::AcqRel) {
            info!("link disconnected");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

impl Default for LinkState {
    fn default() -> Self {
        Self::new()
    }
}

/// Refuses to send while the link is down.
pub struct GatedLink<'a, L> {
    state: &'a LinkState,
    inner: L,
}

impl<'a, L: Link> GatedLink<'a, L> {
    pub fn new(state: &'a LinkState, inner: L) -> Self {
        Self { state, inner }
    }
}

impl<'a, L: Link> Link for GatedLink<'a, L> {
    fn send(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        if !self.state.is_connected() {
            return Err(LinkError::Disconnected);
        }
        self.inner.send(bytes)
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Forwarded {
    Sent,
    /// Taken off the channel but the link refused it.
    Dropped(LinkError),
    /// Nothing arrived within the timeout.
    Idle,
}

/// Drains the result channel onto the link as orientation frames.
pub struct ResultForwarder<'a, L, D, const N: usize> {
    results: &'a LossyChannel<QuaternionSample, N>,
    link: L,
    delay: D,
    timeout_ms: u32,
    dropped: u32,
}

impl<'a, L: Link, D: DelayNs, const N: usize> ResultForwarder<'a, L, D, N> {
    pub fn new(
        results: &'a LossyChannel<QuaternionSample, N>,
        link: L,
        delay: D,
        timeout_ms: u32,
    ) -> Self {
        Self {
            results,
            link,
            delay,
            timeout_ms,
            dropped: 0,
        }
    }

    pub fn dropped(&self) -> u32 {
        self.dropped
    }

    pub async fn forward_one(&mut self) -> Forwarded {
        let Some(sample) = self.results.try_take(&mut self.delay, self.timeout_ms).await else {
            return Forwarded::Idle;
        };
        match self.link.send(&orientation_frame(&sample)) {
            Ok(()) => Forwarded::Sent,
            Err(e) => {
                self.dropped = self.dropped.wrapping_add(1);
                trace!("sample dropped: {:?}", e);
                Forwarded::Dropped(e)
            }
        }
    }

    pub async fn run(&mut self) -> ! {
        loop {
            self.forward_one().await;
        }
    }
}
