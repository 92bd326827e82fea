#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use embassy_futures::block_on;
use ncp_host::transport::{int_status, BLOCK_COUNT_REG, INTF_STATUS_REG};
use ncp_host::{
    Bus, BusError, Config, Control, FrameDescriptor, FrameTransport, InterruptBridge, InterruptLine, QueueType,
    Runner, State, TickCounter,
};

pub const BLOCK: usize = 64;

/// In-memory stand-in for the co-processor side of the link.
#[derive(Default)]
pub struct Ncp {
    pub status: u8,
    pub inbox: VecDeque<Vec<u8>>,
    pub written: Vec<(u32, Vec<u8>)>,
    pub reg_writes: Vec<(u8, u8)>,
    pub fail_block_reads: bool,
    pub fail_writes: bool,
    pub line_masked: bool,
    pub masks: usize,
    pub unmasks: usize,
}

impl Ncp {
    /// Queues a frame for the host and flags it in the interrupt status.
    pub fn push_frame(&mut self, queue: QueueType, frame_type: u8, payload: &[u8]) {
        let desc = FrameDescriptor::new(queue, frame_type, payload.len()).unwrap();
        let mut frame = desc.encode().to_vec();
        frame.extend_from_slice(payload);
        frame.resize(frame.len().div_ceil(BLOCK) * BLOCK, 0);
        self.inbox.push_back(frame);
        self.status |= int_status::RX_PENDING;
    }

    /// Descriptors and payloads of everything the host has written.
    pub fn sent(&self) -> Vec<(FrameDescriptor, Vec<u8>)> {
        self.written
            .iter()
            .map(|(_, data)| {
                let desc = FrameDescriptor::decode(data).unwrap();
                let payload = data[16..16 + desc.length as usize].to_vec();
                (desc, payload)
            })
            .collect()
    }
}

#[derive(Clone)]
pub struct MockBus(pub Rc<RefCell<Ncp>>);

impl Bus for MockBus {
    async fn read_register(&mut self, reg: u8) -> Result<u8, BusError> {
        let ncp = self.0.borrow();
        Ok(match reg {
            INTF_STATUS_REG => ncp.status,
            BLOCK_COUNT_REG => ncp.inbox.front().map_or(0, |f| (f.len() / BLOCK) as u8),
            _ => 0,
        })
    }

    async fn write_register(&mut self, reg: u8, value: u8) -> Result<(), BusError> {
        self.0.borrow_mut().reg_writes.push((reg, value));
        Ok(())
    }

    /// Reads continue through the head frame and pop it once it is used up.
    async fn read_blocks(&mut self, buf: &mut [u8]) -> Result<(), BusError> {
        let mut ncp = self.0.borrow_mut();
        if ncp.fail_block_reads {
            return Err(BusError::Failed);
        }
        let frame = ncp.inbox.front_mut().ok_or(BusError::Failed)?;
        buf.copy_from_slice(&frame[..buf.len()]);
        frame.drain(..buf.len());
        if frame.is_empty() {
            ncp.inbox.pop_front();
        }
        if ncp.inbox.is_empty() {
            ncp.status &= !int_status::RX_PENDING;
        }
        Ok(())
    }

    async fn write_blocks(&mut self, addr: u32, parts: &[&[u8]]) -> Result<(), BusError> {
        let mut ncp = self.0.borrow_mut();
        if ncp.fail_writes {
            return Err(BusError::Failed);
        }
        ncp.written.push((addr, parts.concat()));
        Ok(())
    }

    async fn read_bytes(&mut self, _addr: u32, buf: &mut [u8]) -> Result<(), BusError> {
        buf.fill(0);
        Ok(())
    }

    async fn write_bytes(&mut self, _addr: u32, _data: &[u8]) -> Result<(), BusError> {
        Ok(())
    }
}

/// Host interrupt line that stays asserted while the NCP has frames pending.
#[derive(Clone)]
pub struct RecordingLine(pub Rc<RefCell<Ncp>>);

impl InterruptLine for RecordingLine {
    fn mask(&mut self) {
        let mut ncp = self.0.borrow_mut();
        ncp.line_masked = true;
        ncp.masks += 1;
    }

    fn unmask(&mut self) {
        let mut ncp = self.0.borrow_mut();
        ncp.line_masked = false;
        ncp.unmasks += 1;
    }

    fn is_asserted(&mut self) -> bool {
        self.0.borrow().status & int_status::RX_PENDING != 0
    }
}

pub type Transport = FrameTransport<MockBus, TickCounter>;

pub fn transport_for(ncp: &Rc<RefCell<Ncp>>) -> Transport {
    let config = Config::new().with_block_size(BLOCK);
    FrameTransport::with_clock(MockBus(ncp.clone()), TickCounter::new(), config).unwrap()
}

pub fn link() -> (Rc<RefCell<Ncp>>, Transport) {
    let ncp = Rc::new(RefCell::new(Ncp::default()));
    let transport = transport_for(&ncp);
    (ncp, transport)
}

pub type Handles<'a, 'p, L> = (Control<'a, 'p, L>, Runner<'a, 'p, MockBus, TickCounter, L>, InterruptBridge<'a, 'p, L>);

/// Runs `ncp_host::new` to completion over the mock link.
pub fn start<'a, 'p, L: InterruptLine>(state: &'a State<'p, L>, transport: Transport) -> Handles<'a, 'p, L> {
    block_on(ncp_host::new(state, transport)).unwrap()
}

/// Waker that records whether it was woken.
#[derive(Default)]
pub struct WakeFlag(std::sync::atomic::AtomicBool);

impl futures::task::ArcWake for WakeFlag {
    fn wake_by_ref(arc_self: &std::sync::Arc<Self>) {
        arc_self.0.store(true, std::sync::atomic::Ordering::SeqCst);
    }
}

impl WakeFlag {
    pub fn take(&self) -> bool {
        self.0.swap(false, std::sync::atomic::Ordering::SeqCst)
    }
}
