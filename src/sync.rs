use core::cell::RefCell;
use core::future::{poll_fn, Future};
use core::task::Poll;

use atomic_waker::AtomicWaker;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::waitqueue::MultiWakerRegistration;
use portable_atomic::{AtomicUsize, Ordering};

use crate::error::Error;
use crate::timer::WaitTime;

/// A counting semaphore with a single async waiter.
///
/// Posting is lock-free and may happen from interrupt context. Only one task
/// should wait on a given semaphore at a time.
pub struct Semaphore {
    waker: AtomicWaker,
    permits: AtomicUsize,
}

impl Semaphore {
    pub const fn new() -> Self {
        Self {
            waker: AtomicWaker::new(),
            permits: AtomicUsize::new(0),
        }
    }

    /// Adds one permit and wakes the waiter.
    pub fn post(&self) {
        self.permits.fetch_add(1, Ordering::Release);
        self.waker.wake();
    }

    pub fn post_from_isr(&self) {
        self.post()
    }

    /// Takes one permit if there is one.
    pub fn try_take(&self) -> bool {
        self.permits
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }

    /// Drop all permits.
    pub fn reset(&self) {
        self.permits.store(0, Ordering::Release);
    }

    pub fn permits(&self) -> usize {
        self.permits.load(Ordering::Acquire)
    }

    /// Asynchronously wait for the next permit.
    pub fn take(&self) -> impl Future<Output = ()> + '_ {
        poll_fn(move |cx| {
            if self.try_take() {
                return Poll::Ready(());
            }
            self.waker.register(cx.waker());
            // A post may have landed between the first check and registering.
            if self.try_take() {
                Poll::Ready(())
            } else {
                Poll::Pending
            }
        })
    }

    pub async fn take_timeout(&self, wait: WaitTime) -> Result<(), Error> {
        match wait {
            WaitTime::Immediate => self.try_take().then_some(()).ok_or(Error::Timeout),
            wait => wait.apply(self.take()).await,
        }
    }
}

impl Default for Semaphore {
    fn default() -> Self {
        Self::new()
    }
}

/// A counting semaphore that up to `N` tasks may wait on at once.
///
/// Every post wakes all registered waiters; the ones that lose the race for
/// the permit register again. Waiters beyond `N` are woken early and retry.
pub struct MultiSemaphore<const N: usize> {
    wakers: Mutex<CriticalSectionRawMutex, RefCell<MultiWakerRegistration<N>>>,
    permits: AtomicUsize,
}

impl<const N: usize> MultiSemaphore<N> {
    pub const fn new() -> Self {
        Self {
            wakers: Mutex::new(RefCell::new(MultiWakerRegistration::new())),
            permits: AtomicUsize::new(0),
        }
    }

    pub fn post(&self) {
        self.permits.fetch_add(1, Ordering::Release);
        self.wakers.lock(|wakers| wakers.borrow_mut().wake());
    }

    pub fn post_from_isr(&self) {
        self.post()
    }

    pub fn try_take(&self) -> bool {
        self.permits
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }

    pub fn permits(&self) -> usize {
        self.permits.load(Ordering::Acquire)
    }

    pub fn take(&self) -> impl Future<Output = ()> + '_ {
        poll_fn(move |cx| {
            if self.try_take() {
                return Poll::Ready(());
            }
            self.wakers.lock(|wakers| wakers.borrow_mut().register(cx.waker()));
            if self.try_take() {
                Poll::Ready(())
            } else {
                Poll::Pending
            }
        })
    }
}

impl<const N: usize> Default for MultiSemaphore<N> {
    fn default() -> Self {
        Self::new()
    }
}
