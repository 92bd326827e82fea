//! Glue between the NCP's host interrupt line and the event scheduler.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::signal::Signal;
use embedded_hal_async::digital::Wait;
use portable_atomic::{AtomicBool, Ordering};

use crate::events::RX_EVENT;
use crate::packet::Packet;
use crate::Shared;

/// Platform control over the physical interrupt source.
pub trait InterruptLine {
    fn mask(&mut self);
    fn unmask(&mut self);

    /// Whether the line is still asserted after servicing. Level-triggered
    /// platforms should report the pin level here.
    fn is_asserted(&mut self) -> bool {
        false
    }
}

/// For platforms where [`InterruptBridge::watch`] drives the bridge.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLine;

impl InterruptLine for NoLine {
    fn mask(&mut self) {}
    fn unmask(&mut self) {}
}

pub(crate) struct IrqState<L> {
    armed: AtomicBool,
    rearmed: Signal<CriticalSectionRawMutex, ()>,
    line: Mutex<CriticalSectionRawMutex, RefCell<L>>,
}

impl<L> IrqState<L> {
    pub(crate) fn new(line: L) -> Self {
        Self {
            armed: AtomicBool::new(false),
            rearmed: Signal::new(),
            line: Mutex::new(RefCell::new(line)),
        }
    }
}

/// Handle used from interrupt context.
///
/// An interrupt raises [`RX_EVENT`] and masks the line until the RX handler
/// has serviced the NCP and re-armed the bridge.
pub struct InterruptBridge<'a, 'p, L> {
    shared: &'a Shared<'p, L>,
}

impl<L> Clone for InterruptBridge<'_, '_, L> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<L> Copy for InterruptBridge<'_, '_, L> {}

impl<'a, 'p, L: InterruptLine> InterruptBridge<'a, 'p, L> {
    pub(crate) fn new(shared: &'a Shared<'p, L>) -> Self {
        Self { shared }
    }

    /// Call from the host interrupt handler.
    pub fn on_interrupt(&self) {
        let irq = &self.shared.irq;
        if irq.armed.swap(false, Ordering::AcqRel) {
            irq.line.lock(|line| line.borrow_mut().mask());
            self.shared.events.set_from_isr(RX_EVENT);
        }
    }

    pub fn is_armed(&self) -> bool {
        self.shared.irq.armed.load(Ordering::Acquire)
    }

    pub(crate) fn rearm(&self) {
        let irq = &self.shared.irq;
        irq.armed.store(true, Ordering::Release);
        let asserted = irq.line.lock(|line| {
            let mut line = line.borrow_mut();
            line.unmask();
            line.is_asserted()
        });
        irq.rearmed.signal(());
        if asserted {
            self.on_interrupt();
        }
    }

    /// Raises an arbitrary event from interrupt context.
    pub fn post_from_isr(&self, event: u32) {
        self.shared.events.set_from_isr(event);
    }

    /// Hands a packet filled in interrupt context to the RX queue.
    pub fn enqueue_from_isr(&self, packet: Packet<'p>) -> Result<(), Packet<'p>> {
        self.shared.rx_queue.enqueue_from_isr(packet)?;
        self.shared.rx_ready.post_from_isr();
        Ok(())
    }

    /// Drives the bridge from a level-high interrupt pin instead of a raw
    /// ISR. Only returns if the pin reports an error.
    pub async fn watch<P: Wait>(&self, pin: &mut P) -> P::Error {
        loop {
            if self.is_armed() {
                if let Err(e) = pin.wait_for_high().await {
                    return e;
                }
                self.on_interrupt();
            } else {
                self.shared.irq.rearmed.wait().await;
            }
        }
    }
}
