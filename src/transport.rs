//! Block-granular frame and register access over the NCP link.

use crate::config::{Config, HOST_DESC_LEN, MAX_BLOCK_SIZE};
use crate::error::{BusError, Error};
use crate::frame::FrameDescriptor;
use crate::packet::Packet;
use crate::timer::{Clock, EmbassyClock, TimerInstance};

/// Pending RX block count.
pub const BLOCK_COUNT_REG: u8 = 0xF1;
/// Address bits 31..24 of the memory window.
pub const MEM_ADDR_MSB_REG: u8 = 0xFB;
/// Address bits 23..16 of the memory window.
pub const MEM_ADDR_LSB_REG: u8 = 0xFA;
pub const READ_START_LVL_REG: u8 = 0xFC;
pub const READ_FIFO_CTL_REG: u8 = 0xFD;
pub const WRITE_FIFO_CTL_REG: u8 = 0xFE;
/// Host interface interrupt status.
pub const INTF_STATUS_REG: u8 = 0x08;

/// Selects the memory window instead of the frame FIFO.
pub const SD_MASTER_ACCESS: u32 = 1 << 16;

const READ_START_LVL: u8 = 0x24;
const READ_FIFO_CTL: u8 = 0x60;
const WRITE_FIFO_CTL: u8 = 0x20;

/// Bits of [`INTF_STATUS_REG`].
pub mod int_status {
    /// The NCP cannot take more frames.
    pub const BUFFER_FULL: u8 = 0x01;
    /// The NCP has room again.
    pub const BUFFER_FREE: u8 = 0x02;
    /// A frame is waiting to be read.
    pub const RX_PENDING: u8 = 0x08;
}

static ZEROS: [u8; MAX_BLOCK_SIZE] = [0; MAX_BLOCK_SIZE];

/// Physical link primitives. Implemented for SDIO hosts by the platform and
/// for SPI by [`SpiBus`](crate::spi::SpiBus).
pub trait Bus {
    async fn init(&mut self) -> Result<(), BusError> {
        Ok(())
    }

    async fn read_register(&mut self, reg: u8) -> Result<u8, BusError>;
    async fn write_register(&mut self, reg: u8, value: u8) -> Result<(), BusError>;

    /// Multi-block read of the pending frame into `buf`. Consecutive reads
    /// continue where the previous one stopped.
    async fn read_blocks(&mut self, buf: &mut [u8]) -> Result<(), BusError>;

    /// Multi-block write of the concatenation of `parts` to `addr`.
    async fn write_blocks(&mut self, addr: u32, parts: &[&[u8]]) -> Result<(), BusError>;

    /// Byte-mode read.
    async fn read_bytes(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), BusError>;
    /// Byte-mode write.
    async fn write_bytes(&mut self, addr: u32, data: &[u8]) -> Result<(), BusError>;
}

impl<T: Bus + ?Sized> Bus for &mut T {
    async fn init(&mut self) -> Result<(), BusError> {
        T::init(self).await
    }

    async fn read_register(&mut self, reg: u8) -> Result<u8, BusError> {
        T::read_register(self, reg).await
    }

    async fn write_register(&mut self, reg: u8, value: u8) -> Result<(), BusError> {
        T::write_register(self, reg, value).await
    }

    async fn read_blocks(&mut self, buf: &mut [u8]) -> Result<(), BusError> {
        T::read_blocks(self, buf).await
    }

    async fn write_blocks(&mut self, addr: u32, parts: &[&[u8]]) -> Result<(), BusError> {
        T::write_blocks(self, addr, parts).await
    }

    async fn read_bytes(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), BusError> {
        T::read_bytes(self, addr, buf).await
    }

    async fn write_bytes(&mut self, addr: u32, data: &[u8]) -> Result<(), BusError> {
        T::write_bytes(self, addr, data).await
    }
}

pub(crate) fn blocks_for(len: usize, block_size: usize) -> usize {
    len.div_ceil(block_size)
}

pub struct FrameTransport<B, C = EmbassyClock> {
    bus: B,
    clock: C,
    config: Config,
}

impl<B: Bus> FrameTransport<B> {
    pub fn new(bus: B, config: Config) -> Result<Self, Error> {
        Self::with_clock(bus, EmbassyClock, config)
    }
}

impl<B: Bus, C: Clock> FrameTransport<B, C> {
    pub fn with_clock(bus: B, clock: C, config: Config) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self { bus, clock, config })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Brings up the link and programs the NCP's FIFO thresholds.
    pub async fn init(&mut self) -> Result<(), Error> {
        self.bus.init().await?;
        self.bus.write_register(READ_START_LVL_REG, READ_START_LVL).await?;
        self.bus.write_register(READ_FIFO_CTL_REG, READ_FIFO_CTL).await?;
        self.bus.write_register(WRITE_FIFO_CTL_REG, WRITE_FIFO_CTL).await?;
        debug!("link up, block size {}", self.config.block_size);
        Ok(())
    }

    pub async fn read_register(&mut self, reg: u8) -> Result<u8, Error> {
        Ok(self.bus.read_register(reg).await?)
    }

    pub async fn write_register(&mut self, reg: u8, value: u8) -> Result<(), Error> {
        Ok(self.bus.write_register(reg, value).await?)
    }

    /// Sends one frame as `[headroom][descriptor][payload][padding]`, padded
    /// out to whole blocks.
    pub async fn write_frame(&mut self, desc: &FrameDescriptor, payload: &[u8]) -> Result<(), Error> {
        if payload.len() != desc.length as usize {
            return Err(Error::InvalidParameter);
        }

        let bs = self.config.block_size;
        let headroom = self.config.headroom_for(desc.queue);
        let used = headroom + HOST_DESC_LEN + payload.len();
        let blocks = blocks_for(used, bs);
        let transfer_len = blocks * bs;
        if transfer_len > FrameDescriptor::MAX_LENGTH {
            return Err(Error::InvalidParameter);
        }

        let addr = transfer_len as u32 | (u8::from(desc.queue) as u32) << 12;
        let header = desc.encode();
        let parts: [&[u8]; 4] = [&ZEROS[..headroom], &header, payload, &ZEROS[..transfer_len - used]];

        trace!(
            "tx frame: queue {} type {:02x} len {} blocks {}",
            u8::from(desc.queue),
            desc.frame_type,
            payload.len(),
            blocks
        );

        self.bus.write_blocks(addr, &parts).await.map_err(|e| {
            warn!("frame write failed: {:?}", e);
            Error::WriteFailed
        })
    }

    /// Sends a packet whose descriptor has already been filled in.
    pub async fn write_packet(&mut self, packet: &Packet<'_>) -> Result<(), Error> {
        let desc = packet.descriptor()?;
        self.write_frame(&desc, packet.frame_payload()?).await
    }

    /// Pulls the pending frame into `dest`, returning the number of bytes
    /// read. Returns 0 when the NCP reports no pending blocks.
    ///
    /// A frame longer than `dest` is read out and discarded so the next one
    /// can be received, and [`Error::FrameTooLarge`] is returned.
    pub async fn read_frame(&mut self, dest: &mut [u8]) -> Result<usize, Error> {
        let count = (self.bus.read_register(BLOCK_COUNT_REG).await? & self.config.block_count_mask) as usize;
        if count == 0 {
            return Ok(0);
        }
        let len = count * self.config.block_size;
        let capacity = dest.len();
        match dest.get_mut(..len) {
            Some(dest) => {
                self.bus.read_blocks(dest).await?;
                trace!("rx frame: {} blocks", count);
                Ok(len)
            }
            None => {
                self.discard_blocks(count).await?;
                warn!("dropped {} byte rx frame, slot holds {}", len, capacity);
                Err(Error::FrameTooLarge)
            }
        }
    }

    async fn discard_blocks(&mut self, count: usize) -> Result<(), Error> {
        let mut scratch = [0u8; MAX_BLOCK_SIZE];
        let block = &mut scratch[..self.config.block_size];
        for _ in 0..count {
            self.bus.read_blocks(block).await?;
        }
        Ok(())
    }

    async fn select_window(&mut self, addr: u32) -> Result<(), Error> {
        self.bus.write_register(MEM_ADDR_MSB_REG, (addr >> 24) as u8).await?;
        self.bus.write_register(MEM_ADDR_LSB_REG, (addr >> 16) as u8).await?;
        Ok(())
    }

    /// Writes NCP memory through the master-access window.
    pub async fn mem_write(&mut self, addr: u32, data: &[u8]) -> Result<(), Error> {
        self.select_window(addr).await?;
        let window = (addr & 0xFFFF) | SD_MASTER_ACCESS;
        if data.len() > self.config.block_size {
            let padding = blocks_for(data.len(), self.config.block_size) * self.config.block_size - data.len();
            self.bus.write_blocks(window, &[data, &ZEROS[..padding]]).await?;
        } else {
            self.bus.write_bytes(window, data).await?;
        }
        Ok(())
    }

    pub async fn mem_read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), Error> {
        self.select_window(addr).await?;
        self.bus.read_bytes((addr & 0xFFFF) | SD_MASTER_ACCESS, buf).await?;
        Ok(())
    }

    /// Reads the interrupt status register, retrying failed reads until
    /// the status timeout runs out.
    pub async fn interrupt_status(&mut self) -> Result<u8, Error> {
        self.poll_status(|_| true).await
    }

    /// Polls until any bit of `mask` is set in the interrupt status.
    pub async fn wait_interrupt_status(&mut self, mask: u8) -> Result<u8, Error> {
        self.poll_status(|status| status & mask != 0).await
    }

    /// Pauses on the clock between attempts so other tasks keep running.
    async fn poll_status(&mut self, accept: impl Fn(u8) -> bool) -> Result<u8, Error> {
        let timer = TimerInstance::start(&self.clock, self.config.status_timeout_ms);
        loop {
            if timer.expired(&self.clock) {
                return Err(Error::Timeout);
            }
            match self.bus.read_register(INTF_STATUS_REG).await {
                Ok(status) if accept(status) => return Ok(status),
                Ok(_) => {}
                Err(e) => trace!("status read failed: {:?}", e),
            }
            self.clock.pause().await;
        }
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn release(self) -> B {
        self.bus
    }
}
