#![cfg_attr(not(test), no_std)]
#![deny(unused_must_use)]
#![allow(async_fn_in_trait)]

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub mod commands;
pub mod config;
mod error;
pub mod events;
pub mod frame;
pub mod irq;
pub mod packet;
pub mod queue;
pub mod spi;
pub mod sync;
pub mod timer;
pub mod transport;

use core::cell::{Cell, RefCell};

use embassy_futures::yield_now;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use portable_atomic::{AtomicU32, Ordering};

pub use crate::commands::{CommandClass, CommandState, CommandStateTracker};
pub use crate::config::{Config, HOST_DESC_LEN, MAX_PACKETS, MAX_RX_WAITERS};
pub use crate::error::{BusError, Error};
pub use crate::events::{EventScheduler, EventSet, Handler, MAX_EVENTS, RX_EVENT, SOCKET_EVENT, TX_EVENT};
pub use crate::frame::{FrameDescriptor, QueueType};
pub use crate::irq::{InterruptBridge, InterruptLine, NoLine};
pub use crate::packet::{Packet, PacketPool};
pub use crate::queue::PacketQueue;
pub use crate::spi::SpiBus;
pub use crate::sync::{MultiSemaphore, Semaphore};
pub use crate::timer::{Clock, EmbassyClock, TickCounter, TimerInstance, WaitTime};
pub use crate::transport::{Bus, FrameTransport};

use crate::irq::IrqState;
use crate::transport::int_status;

enum Outcome<'p> {
    Response(Packet<'p>),
    Failed(Error),
}

/// Where the outcome of an in-flight command lands.
struct Slot<'p> {
    expected: Option<u8>,
    outcome: Option<Outcome<'p>>,
}

type Slots<'p> = [Slot<'p>; CommandClass::COUNT];

/// The class whose in-flight command a frame with `desc` answers.
fn awaiting(slots: &Slots<'_>, desc: &FrameDescriptor) -> Option<CommandClass> {
    CommandClass::ALL.into_iter().find(|class| {
        let slot = &slots[class.index()];
        class.queue() == desc.queue && slot.expected == Some(desc.frame_type) && slot.outcome.is_none()
    })
}

pub(crate) struct Shared<'p, L> {
    pub(crate) pool: PacketPool<'p>,
    pub(crate) tx_queue: PacketQueue<'p>,
    pub(crate) rx_queue: PacketQueue<'p>,
    pub(crate) rx_ready: MultiSemaphore<MAX_RX_WAITERS>,
    rx_dropped: AtomicU32,
    pub(crate) events: EventSet,
    pub(crate) commands: CommandStateTracker,
    completions: [Semaphore; CommandClass::COUNT],
    slots: Mutex<CriticalSectionRawMutex, RefCell<Slots<'p>>>,
    link_error: Mutex<CriticalSectionRawMutex, Cell<Option<Error>>>,
    pub(crate) irq: IrqState<L>,
}

impl<'p, L> Shared<'p, L> {
    fn record_error(&self, e: Error) {
        self.link_error.lock(|slot| slot.set(Some(e)));
    }

    fn count_dropped(&self) {
        self.rx_dropped.fetch_add(1, Ordering::Relaxed);
    }

    fn clear_slot(&self, class: CommandClass) -> Option<Outcome<'p>> {
        self.slots.lock(|slots| {
            let slot = &mut slots.borrow_mut()[class.index()];
            slot.expected = None;
            slot.outcome.take()
        })
    }

    /// Routes a received frame to the command waiting for it, or to the RX queue.
    fn deliver(&self, desc: FrameDescriptor, packet: Packet<'p>) {
        let routed = self.slots.lock(move |slots| {
            let mut slots = slots.borrow_mut();
            match awaiting(&slots, &desc) {
                Some(class) => {
                    let slot = &mut slots[class.index()];
                    slot.expected = None;
                    slot.outcome = Some(Outcome::Response(packet));
                    Ok(class)
                }
                None => Err(packet),
            }
        });

        match routed {
            Ok(class) => {
                trace!("response {:02x} for {:?}", desc.frame_type, class);
                self.completions[class.index()].post();
            }
            Err(packet) => match self.rx_queue.enqueue(packet) {
                Ok(()) => self.rx_ready.post(),
                Err(packet) => {
                    warn!("rx queue full, dropping frame {:02x}", desc.frame_type);
                    self.count_dropped();
                    self.pool.free(packet);
                }
            },
        }
    }

    /// Completes the command a failed TX frame belonged to with `e`.
    fn fail_command(&self, desc: &FrameDescriptor, e: Error) {
        let failed = self.slots.lock(|slots| {
            let mut slots = slots.borrow_mut();
            let class = awaiting(&slots, desc)?;
            let slot = &mut slots[class.index()];
            slot.expected = None;
            slot.outcome = Some(Outcome::Failed(e));
            Some(class)
        });
        if let Some(class) = failed {
            debug!("{:?} command {:02x} failed to send", class, desc.frame_type);
            self.completions[class.index()].post();
        }
    }
}

/// Releases a command class when its `send_command` finishes or is dropped.
struct InFlight<'a, 'p, L> {
    shared: &'a Shared<'p, L>,
    class: CommandClass,
}

impl<L> Drop for InFlight<'_, '_, L> {
    fn drop(&mut self) {
        if let Some(Outcome::Response(stale)) = self.shared.clear_slot(self.class) {
            self.shared.pool.free(stale);
        }
        self.shared.commands.release(self.class);
    }
}

/// Interior-mutable state shared by [`Control`], [`Runner`] and [`InterruptBridge`].
pub struct State<'p, L = NoLine> {
    shared: Shared<'p, L>,
}

impl<'p, L: InterruptLine> State<'p, L> {
    /// Carves `buffer` into as many `packet_size` slots as fit, up to [`MAX_PACKETS`].
    pub fn new(buffer: &'p mut [u8], packet_size: usize, line: L) -> Result<Self, Error> {
        if packet_size < HOST_DESC_LEN {
            return Err(Error::InvalidParameter);
        }
        let slots = (buffer.len() / packet_size).min(MAX_PACKETS);
        let pool = PacketPool::init(buffer, slots * packet_size, packet_size)?;

        Ok(Self {
            shared: Shared {
                pool,
                tx_queue: PacketQueue::new(),
                rx_queue: PacketQueue::new(),
                rx_ready: MultiSemaphore::new(),
                rx_dropped: AtomicU32::new(0),
                events: EventSet::new(),
                commands: CommandStateTracker::new(),
                completions: core::array::from_fn(|_| Semaphore::new()),
                slots: Mutex::new(RefCell::new(core::array::from_fn(|_| Slot {
                    expected: None,
                    outcome: None,
                }))),
                link_error: Mutex::new(Cell::new(None)),
                irq: IrqState::new(line),
            },
        })
    }
}

/// Brings up the link and arms the RX and TX events.
pub async fn new<'a, 'p, B, C, L>(
    state: &'a State<'p, L>,
    mut transport: FrameTransport<B, C>,
) -> Result<(Control<'a, 'p, L>, Runner<'a, 'p, B, C, L>, InterruptBridge<'a, 'p, L>), Error>
where
    B: Bus,
    C: Clock,
    L: InterruptLine,
{
    let shared = &state.shared;

    info!("initializing link...");
    transport.init().await?;

    let scheduler: EventScheduler<'a, Driver<'a, 'p, B, C, L>> = EventScheduler::new(&shared.events);
    shared.events.unmask(RX_EVENT);
    shared.events.unmask(TX_EVENT);

    let bridge = InterruptBridge::new(shared);
    bridge.rearm();

    let runner = Runner {
        scheduler,
        driver: Driver { shared, transport },
    };
    Ok((Control { shared }, runner, bridge))
}

/// Context handed to application event handlers. The RX and TX handlers
/// run on it inside [`Runner`].
pub struct Driver<'a, 'p, B, C, L> {
    shared: &'a Shared<'p, L>,
    transport: FrameTransport<B, C>,
}

impl<'a, 'p, B: Bus, C: Clock, L: InterruptLine> Driver<'a, 'p, B, C, L> {
    pub fn transport(&mut self) -> &mut FrameTransport<B, C> {
        &mut self.transport
    }

    pub fn control(&self) -> Control<'a, 'p, L> {
        Control { shared: self.shared }
    }

    async fn on_rx(&mut self) {
        if let Err(e) = self.service_interrupt().await {
            warn!("rx failed: {:?}", e);
            self.shared.record_error(e);
        }
        InterruptBridge::new(self.shared).rearm();
    }

    async fn service_interrupt(&mut self) -> Result<(), Error> {
        let status = self.transport.interrupt_status().await?;
        trace!("interrupt status {:02x}", status);

        if status & int_status::BUFFER_FULL != 0 {
            debug!("ncp buffer full, holding tx");
            self.shared.tx_queue.block();
        }
        if status & int_status::BUFFER_FREE != 0 {
            debug!("ncp buffer free, resuming tx");
            self.shared.tx_queue.unblock();
            self.shared.events.set(TX_EVENT);
        }
        if status & int_status::RX_PENDING != 0 {
            self.receive_frame().await?;
        }
        Ok(())
    }

    async fn receive_frame(&mut self) -> Result<(), Error> {
        let pool = &self.shared.pool;
        let mut packet = pool.allocate().inspect_err(|_| warn!("no packet free for rx frame"))?;

        let desc = match self.transport.read_frame(packet.as_bytes_mut()).await {
            Ok(0) => {
                pool.free(packet);
                return Ok(());
            }
            Ok(_) => packet.descriptor(),
            Err(e) => Err(e),
        };
        match desc {
            Ok(desc) => {
                self.shared.deliver(desc, packet);
                Ok(())
            }
            Err(e) => {
                if e == Error::FrameTooLarge {
                    self.shared.count_dropped();
                }
                pool.free(packet);
                Err(e)
            }
        }
    }

    async fn on_tx(&mut self) {
        while self.shared.tx_queue.status() > 0 {
            let Some(packet) = self.shared.tx_queue.dequeue() else {
                break;
            };
            if let Err(e) = self.transport.write_packet(&packet).await {
                warn!("tx failed: {:?}", e);
                self.shared.record_error(e);
                if let Ok(desc) = packet.descriptor() {
                    self.shared.fail_command(&desc, e);
                }
            }
            self.shared.pool.free(packet);
        }
    }
}

/// Owns the scheduler loop. Spawn [`Runner::run`] in its own task.
pub struct Runner<'a, 'p, B, C, L> {
    scheduler: EventScheduler<'a, Driver<'a, 'p, B, C, L>>,
    driver: Driver<'a, 'p, B, C, L>,
}

impl<'a, 'p, B: Bus, C: Clock, L: InterruptLine> Runner<'a, 'p, B, C, L> {
    /// Adds a handler for an application event. [`RX_EVENT`] and [`TX_EVENT`]
    /// belong to the driver.
    pub fn register(&mut self, event: u32, handler: Handler<Driver<'a, 'p, B, C, L>>) -> Result<(), Error> {
        if event == RX_EVENT || event == TX_EVENT {
            return Err(Error::InvalidParameter);
        }
        self.scheduler.register(event, handler)?;
        self.scheduler.events().unmask(event);
        Ok(())
    }

    pub fn driver(&mut self) -> &mut Driver<'a, 'p, B, C, L> {
        &mut self.driver
    }

    async fn handle(&mut self, event: u32) {
        match event {
            RX_EVENT => self.driver.on_rx().await,
            TX_EVENT => self.driver.on_tx().await,
            event => self.scheduler.dispatch_event(event, &mut self.driver),
        }
    }

    /// Waits for the next wakeup and dispatches at most one event.
    pub async fn run_once(&mut self) -> Option<u32> {
        self.scheduler.events().wait().await;
        let event = self.scheduler.take_ready()?;
        self.handle(event).await;
        Some(event)
    }

    /// Dispatches whatever is ready without waiting for a wakeup.
    pub async fn poll(&mut self) -> usize {
        let mut dispatched = 0;
        while self.scheduler.events().try_wait() {
            if let Some(event) = self.scheduler.take_ready() {
                self.handle(event).await;
                dispatched += 1;
            }
        }
        dispatched
    }

    pub async fn run(&mut self) -> ! {
        info!("running...");
        loop {
            self.run_once().await;
            // Keep tasks on the same executor from starving while events keep arriving.
            yield_now().await;
        }
    }
}

/// Application-facing handle.
pub struct Control<'a, 'p, L> {
    shared: &'a Shared<'p, L>,
}

impl<L> Clone for Control<'_, '_, L> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<L> Copy for Control<'_, '_, L> {}

impl<'a, 'p, L> Control<'a, 'p, L> {
    /// Never blocks.
    pub fn allocate(&self) -> Result<Packet<'p>, Error> {
        self.shared.pool.allocate()
    }

    pub fn free(&self, packet: Packet<'p>) {
        self.shared.pool.free(packet)
    }

    pub fn available_packets(&self) -> usize {
        self.shared.pool.available_count()
    }

    /// Queues a filled packet for the NCP and raises [`TX_EVENT`].
    pub fn transmit(&self, packet: Packet<'p>) -> Result<(), Error> {
        if let Err(packet) = self.shared.tx_queue.enqueue(packet) {
            self.shared.pool.free(packet);
            return Err(Error::BusyResource);
        }
        self.shared.events.set(TX_EVENT);
        Ok(())
    }

    pub fn send_frame(&self, queue: QueueType, frame_type: u8, payload: &[u8]) -> Result<(), Error> {
        let packet = self.prepare(queue, frame_type, payload)?;
        self.transmit(packet)
    }

    fn prepare(&self, queue: QueueType, frame_type: u8, payload: &[u8]) -> Result<Packet<'p>, Error> {
        let desc = FrameDescriptor::new(queue, frame_type, payload.len())?;
        let mut packet = self.allocate()?;
        if let Err(e) = packet.fill(&desc, payload) {
            self.free(packet);
            return Err(e);
        }
        Ok(packet)
    }

    /// Sends a command and waits for the NCP's response of the same frame type.
    ///
    /// Fails with [`Error::WrongState`] while another command of `class` is in
    /// flight, and with the transport error if the command frame could not be
    /// written. On timeout the class is released and a late response ends up
    /// on the RX queue.
    pub async fn send_command(
        &self,
        class: CommandClass,
        frame_type: u8,
        payload: &[u8],
        wait: WaitTime,
    ) -> Result<Packet<'p>, Error> {
        self.shared
            .commands
            .try_acquire(class)
            .map_err(|_| Error::WrongState)?;
        let _in_flight = InFlight {
            shared: self.shared,
            class,
        };

        if self.shared.tx_queue.is_blocked() {
            return Err(Error::BusyResource);
        }
        let packet = self.prepare(class.queue(), frame_type, payload)?;

        let done = &self.shared.completions[class.index()];
        done.reset();
        self.shared
            .slots
            .lock(|slots| slots.borrow_mut()[class.index()].expected = Some(frame_type));

        if let Err(packet) = self.shared.tx_queue.enqueue(packet) {
            self.shared.pool.free(packet);
            return Err(Error::BusyResource);
        }
        self.shared.events.set(TX_EVENT);

        let waited = done.take_timeout(wait).await;
        match (waited, self.shared.clear_slot(class)) {
            (_, Some(Outcome::Response(response))) => Ok(response),
            (_, Some(Outcome::Failed(e))) => Err(e),
            (Ok(()), None) => Err(Error::WrongState),
            (Err(e), None) => {
                debug!("{:?} command {:02x} timed out", class, frame_type);
                Err(e)
            }
        }
    }

    /// Waits for the next frame that was not a command response.
    pub async fn receive(&self, wait: WaitTime) -> Result<Packet<'p>, Error> {
        let shared = self.shared;
        wait.apply(async move {
            loop {
                if let Some(packet) = shared.rx_queue.dequeue() {
                    return packet;
                }
                shared.rx_ready.take().await;
            }
        })
        .await
    }

    pub fn try_receive(&self) -> Option<Packet<'p>> {
        self.shared.rx_queue.dequeue()
    }

    /// Raises an application event.
    pub fn raise(&self, event: u32) {
        self.shared.events.set(event);
    }

    pub fn command_state(&self, class: CommandClass) -> CommandState {
        self.shared.commands.state(class)
    }

    /// Received frames discarded because they did not fit a slot or the RX
    /// queue was full.
    pub fn dropped_frames(&self) -> u32 {
        self.shared.rx_dropped.load(Ordering::Relaxed)
    }

    /// Takes the last failure reported by a handler, if any.
    pub fn take_error(&self) -> Option<Error> {
        self.shared.link_error.lock(|slot| slot.take())
    }
}
