//! Millisecond tick counting and wrap-safe deadlines.

use core::future::Future;

use embassy_futures::select::{select, Either};
use embassy_futures::yield_now;
use embassy_time::{Duration, Instant, Timer};
use portable_atomic::{AtomicU32, Ordering};

use crate::error::Error;

/// Source of a free-running, wrapping millisecond tick.
pub trait Clock {
    fn now(&self) -> u32;

    /// Suspends the caller between two polls of the link.
    async fn pause(&self) {
        yield_now().await
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> u32 {
        (**self).now()
    }

    async fn pause(&self) {
        (**self).pause().await
    }
}

/// Tick counter advanced from a periodic interrupt.
pub struct TickCounter {
    ticks: AtomicU32,
}

impl TickCounter {
    pub const fn new() -> Self {
        Self {
            ticks: AtomicU32::new(0),
        }
    }

    /// Call from the periodic timer interrupt.
    pub fn tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn advance(&self, ticks: u32) {
        self.ticks.fetch_add(ticks, Ordering::Relaxed);
    }
}

impl Default for TickCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TickCounter {
    fn now(&self) -> u32 {
        self.ticks.load(Ordering::Relaxed)
    }
}

/// Clock backed by the embassy time driver.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbassyClock;

impl Clock for EmbassyClock {
    fn now(&self) -> u32 {
        Instant::now().as_millis() as u32
    }

    async fn pause(&self) {
        Timer::after(Duration::from_millis(1)).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimerInstance {
    start_time: u32,
    timeout: u32,
}

impl TimerInstance {
    pub fn start(clock: &impl Clock, duration: u32) -> Self {
        Self {
            start_time: clock.now(),
            timeout: duration,
        }
    }

    pub fn elapsed(&self, clock: &impl Clock) -> u32 {
        clock.now().wrapping_sub(self.start_time)
    }

    pub fn expired(&self, clock: &impl Clock) -> bool {
        self.elapsed(clock) > self.timeout
    }

    pub fn remaining(&self, clock: &impl Clock) -> u32 {
        self.timeout.saturating_sub(self.elapsed(clock))
    }
}

/// How long a blocking wait may suspend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WaitTime {
    Forever,
    /// Poll once and give up if the result is not already available.
    Immediate,
    Millis(u32),
}

impl WaitTime {
    /// Runs `fut` to completion or until the wait budget runs out.
    pub async fn apply<F: Future>(self, fut: F) -> Result<F::Output, Error> {
        match self {
            WaitTime::Forever => Ok(fut.await),
            WaitTime::Immediate => match select(fut, core::future::ready(())).await {
                Either::First(out) => Ok(out),
                Either::Second(()) => Err(Error::Timeout),
            },
            WaitTime::Millis(ms) => embassy_time::with_timeout(Duration::from_millis(ms as u64), fut)
                .await
                .map_err(|_| Error::Timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expires_only_after_duration() {
        let clock = TickCounter::new();
        let timer = TimerInstance::start(&clock, 10);
        assert!(!timer.expired(&clock));
        assert_eq!(timer.remaining(&clock), 10);

        let mut last = timer.remaining(&clock);
        for _ in 0..10 {
            clock.tick();
            let remaining = timer.remaining(&clock);
            assert!(remaining <= last);
            last = remaining;
            assert!(!timer.expired(&clock));
        }
        assert_eq!(timer.remaining(&clock), 0);

        clock.tick();
        assert!(timer.expired(&clock));
        clock.advance(1000);
        assert_eq!(timer.remaining(&clock), 0);
    }

    #[test]
    fn survives_counter_wrap() {
        let clock = TickCounter::new();
        clock.advance(u32::MAX - 2);
        let timer = TimerInstance::start(&clock, 5);
        clock.advance(4);
        assert_eq!(timer.elapsed(&clock), 4);
        assert!(!timer.expired(&clock));
        assert_eq!(timer.remaining(&clock), 1);
        clock.advance(2);
        assert!(timer.expired(&clock));
    }

    #[test]
    fn immediate_wait_does_not_suspend() {
        let ready = embassy_futures::block_on(WaitTime::Immediate.apply(async { 7 }));
        assert_eq!(ready, Ok(7));
        let pending = embassy_futures::block_on(WaitTime::Immediate.apply(core::future::pending::<()>()));
        assert_eq!(pending, Err(Error::Timeout));
    }
}
