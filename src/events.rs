//! Pending-event bitmap and the cooperative dispatch loop that drains it.

use portable_atomic::{AtomicU32, Ordering};

use crate::error::Error;
use crate::sync::Semaphore;

pub const MAX_EVENTS: usize = 32;

/// Raised by the interrupt bridge when the NCP has something for the host.
pub const RX_EVENT: u32 = 0;
/// Raised whenever the TX queue may have packets to drain.
pub const TX_EVENT: u32 = 1;
/// Free for socket-layer consumers.
pub const SOCKET_EVENT: u32 = 2;

fn bit(event: u32) -> u32 {
    if (event as usize) < MAX_EVENTS {
        1 << event
    } else {
        0
    }
}

/// 32 event bits split into "raised" and "observable".
///
/// The semaphore carries one permit per wakeup that made an unmasked event
/// visible. A permit whose event was consumed in the meantime is harmless:
/// the dispatcher just finds nothing to do.
pub struct EventSet {
    pending: AtomicU32,
    mask: AtomicU32,
    signal: Semaphore,
}

impl EventSet {
    /// All events start masked.
    pub const fn new() -> Self {
        Self {
            pending: AtomicU32::new(0),
            mask: AtomicU32::new(0),
            signal: Semaphore::new(),
        }
    }

    pub fn set(&self, event: u32) {
        let bit = bit(event);
        let prev = self.pending.fetch_or(bit, Ordering::AcqRel);
        if bit & self.mask.load(Ordering::Acquire) != 0 && prev & bit == 0 {
            self.signal.post();
        }
    }

    pub fn set_from_isr(&self, event: u32) {
        self.set(event)
    }

    pub fn clear(&self, event: u32) {
        self.pending.fetch_and(!bit(event), Ordering::AcqRel);
    }

    pub fn mask(&self, event: u32) {
        self.mask.fetch_and(!bit(event), Ordering::AcqRel);
    }

    /// Makes `event` observable, posting a wakeup if it was raised while masked.
    pub fn unmask(&self, event: u32) {
        let bit = bit(event);
        let prev = self.mask.fetch_or(bit, Ordering::AcqRel);
        if prev & bit == 0 && self.pending.load(Ordering::Acquire) & bit != 0 {
            self.signal.post();
        }
    }

    pub fn unmask_from_isr(&self, event: u32) {
        self.unmask(event)
    }

    /// Lowest-numbered event that is both pending and unmasked.
    pub fn get_event(&self) -> Option<u32> {
        let ready = self.pending.load(Ordering::Acquire) & self.mask.load(Ordering::Acquire);
        (ready != 0).then(|| ready.trailing_zeros())
    }

    pub fn is_pending(&self, event: u32) -> bool {
        self.pending.load(Ordering::Acquire) & bit(event) != 0
    }

    pub fn is_masked(&self, event: u32) -> bool {
        self.mask.load(Ordering::Acquire) & bit(event) == 0
    }

    /// Suspends until some wakeup has been posted.
    pub async fn wait(&self) {
        self.signal.take().await
    }

    pub(crate) fn try_wait(&self) -> bool {
        self.signal.try_take()
    }
}

impl Default for EventSet {
    fn default() -> Self {
        Self::new()
    }
}

pub type Handler<C> = fn(&mut C);

/// Dispatch table mapping event bits to handlers over a context `C`.
pub struct EventScheduler<'a, C> {
    events: &'a EventSet,
    handlers: [Option<Handler<C>>; MAX_EVENTS],
}

impl<'a, C> EventScheduler<'a, C> {
    pub fn new(events: &'a EventSet) -> Self {
        Self {
            events,
            handlers: [None; MAX_EVENTS],
        }
    }

    pub fn events(&self) -> &'a EventSet {
        self.events
    }

    pub fn register(&mut self, event: u32, handler: Handler<C>) -> Result<(), Error> {
        let slot = self.handlers.get_mut(event as usize).ok_or(Error::InvalidParameter)?;
        *slot = Some(handler);
        Ok(())
    }

    /// Takes the lowest-numbered ready event off the pending set.
    pub fn take_ready(&self) -> Option<u32> {
        let event = self.events.get_event()?;
        self.events.clear(event);
        Some(event)
    }

    /// Runs the handler registered for `event`, if any.
    pub fn dispatch_event(&self, event: u32, ctx: &mut C) {
        match self.handlers.get(event as usize).copied().flatten() {
            Some(handler) => handler(ctx),
            None => warn!("event {} has no handler", event),
        }
    }

    /// Consumes the next ready event and runs its handler to completion.
    pub fn dispatch(&self, ctx: &mut C) -> Option<u32> {
        let event = self.take_ready()?;
        self.dispatch_event(event, ctx);
        Some(event)
    }

    /// Waits for one wakeup, then dispatches at most one event.
    pub async fn run_once(&self, ctx: &mut C) -> Option<u32> {
        self.events.wait().await;
        self.dispatch(ctx)
    }

    /// Dispatches every event that is ready right now without suspending.
    pub fn poll(&self, ctx: &mut C) -> usize {
        let mut dispatched = 0;
        while self.events.try_wait() {
            if self.dispatch(ctx).is_some() {
                dispatched += 1;
            }
        }
        dispatched
    }

    pub async fn run_forever(&self, ctx: &mut C) -> ! {
        loop {
            self.run_once(ctx).await;
        }
    }
}
