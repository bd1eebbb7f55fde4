//! Bounded drop-oldest channel between the acquisition task and the link.
//!
//! The producer never waits. When the queue is full, `publish` evicts the
//! oldest entry and appends the new one inside a single critical section, so
//! a concurrent consumer sees either the old queue or the new one.

use core::cell::RefCell;
use core::future::poll_fn;
use core::sync::atomic::{AtomicU32, Ordering};
use core::task::Poll;

use critical_section::Mutex;
use embassy_futures::select::{select, Either};
use embedded_hal_async::delay::DelayNs;
use heapless::Deque;
use rtic_common::waker_registration::CriticalSectionWakerRegistration;

/// Capacity of the orientation result channel.
pub const RESULT_QUEUE_LEN: usize = 5;

pub struct LossyChannel<T, const N: usize> {
    queue: Mutex<RefCell<Deque<T, N>>>,
    waker: CriticalSectionWakerRegistration,
    evicted: AtomicU32,
}

impl<T, const N: usize> LossyChannel<T, N> {
    pub const fn new() -> Self {
        Self {
            queue: Mutex::new(RefCell::new(Deque::new())),
            waker: CriticalSectionWakerRegistration::new(),
            evicted: AtomicU32::new(0),
        }
    }

    /// Enqueue `item`, evicting the oldest entry if full. Returns the evicted
    /// entry, if any.
    pub fn publish(&self, item: T) -> Option<T> {
        let evicted = critical_section::with(|cs| {
            let mut queue = self.queue.borrow_ref_mut(cs);
            let oldest = if queue.is_full() {
                queue.pop_front()
            } else {
                None
            };
            match queue.push_back(item) {
                Ok(()) => oldest,
                Err(item) => Some(item),
            }
        });
        if evicted.is_some() {
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        self.waker.wake();
        evicted
    }

    /// Dequeue without waiting.
    pub fn take_now(&self) -> Option<T> {
        critical_section::with(|cs| self.queue.borrow_ref_mut(cs).pop_front())
    }

    /// Wait for the next entry.
    pub async fn take(&self) -> T {
        poll_fn(|cx| {
            if let Some(item) = self.take_now() {
                return Poll::Ready(item);
            }
            self.waker.register(cx.waker());
            // a publish may have landed before the waker was registered
            match self.take_now() {
                Some(item) => Poll::Ready(item),
                None => Poll::Pending,
            }
        })
        .await
    }

    /// Wait at most `timeout_ms` for the next entry.
    pub async fn try_take<D: DelayNs>(&self, delay: &mut D, timeout_ms: u32) -> Option<T> {
        match select(self.take(), delay.delay_ms(timeout_ms)).await {
            Either::First(item) => Some(item),
            Either::Second(()) => None,
        }
    }

    pub fn len(&self) -> usize {
        critical_section::with(|cs| self.queue.borrow_ref(cs).len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Entries dropped to make room since start.
    pub fn evicted(&self) -> u32 {
        self.evicted.load(Ordering::Relaxed)
    }
}

impl<T, const N: usize> Default for LossyChannel<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::NoopDelay;
    use embassy_futures::block_on;

    #[test]
    fn sixth_publish_evicts_the_first() {
        let ch: LossyChannel<u32, RESULT_QUEUE_LEN> = LossyChannel::new();
        for i in 1..=5 {
            assert_eq!(ch.publish(i), None);
        }
        assert_eq!(ch.publish(6), Some(1));
        assert_eq!(ch.len(), 5);
        assert_eq!(ch.evicted(), 1);

        let drained: Vec<u32> = core::iter::from_fn(|| ch.take_now()).collect();
        assert_eq!(drained, vec![2, 3, 4, 5, 6]);
        assert!(ch.is_empty());
    }

    #[test]
    fn take_returns_queued_entry() {
        let ch: LossyChannel<u8, 2> = LossyChannel::new();
        ch.publish(9);
        assert_eq!(block_on(ch.take()), 9);
    }

    #[test]
    fn try_take_times_out_when_empty() {
        let ch: LossyChannel<u8, 2> = LossyChannel::new();
        let mut delay = NoopDelay::default();
        assert_eq!(block_on(ch.try_take(&mut delay, 50)), None);
        assert_eq!(delay.total_ms(), 50);

        ch.publish(4);
        assert_eq!(block_on(ch.try_take(&mut delay, 50)), Some(4));
    }
}
