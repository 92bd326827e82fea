//! [`Bus`] over an SPI device using the NCP's C1/C2 command-byte protocol.
//!
//! Every access starts with a two-byte command: C1 selects the access kind
//! and C2 carries the register address. The byte clocked back during C2 is
//! the NCP's status. Reads then wait for a start token before the data.

use embedded_hal_async::spi::{Operation, SpiDevice};

use crate::error::BusError;
use crate::transport::{Bus, SD_MASTER_ACCESS};

const C1_REG_READ: u8 = 0x50;
const C1_REG_WRITE: u8 = 0x71;
const C1_FRAME_READ: u8 = 0x5C;
const C1_FRAME_WRITE: u8 = 0x7C;
const C1_MEM_READ: u8 = 0x57;
const C1_MEM_WRITE: u8 = 0x77;

const STATUS_SUCCESS: u8 = 0x58;
const STATUS_BUSY: u8 = 0x54;
const STATUS_FAIL: u8 = 0x52;
const START_TOKEN: u8 = 0x55;

const INIT_CMD: u32 = 0x005C_4A12;
const INIT_ATTEMPTS: usize = 10;
const START_TOKEN_POLLS: usize = 1000;

/// Parts gathered into a single chip-select window.
const MAX_PARTS: usize = 4;

fn check_status(status: u8) -> Result<(), BusError> {
    match status {
        STATUS_SUCCESS => Ok(()),
        STATUS_BUSY => Err(BusError::Busy),
        STATUS_FAIL => Err(BusError::Failed),
        other => Err(BusError::Status(other)),
    }
}

fn spi_err<E: embedded_hal::spi::Error>(e: E) -> BusError {
    BusError::Spi(e.kind())
}

pub struct SpiBus<D> {
    spi: D,
}

impl<D: SpiDevice> SpiBus<D> {
    pub fn new(spi: D) -> Self {
        Self { spi }
    }

    pub fn release(self) -> D {
        self.spi
    }

    async fn send_c1c2(&mut self, c1: u8, c2: u8) -> Result<(), BusError> {
        let mut rx = [0u8; 2];
        self.spi.transfer(&mut rx, &[c1, c2]).await.map_err(spi_err)?;
        check_status(rx[1])
    }

    async fn wait_start_token(&mut self) -> Result<(), BusError> {
        for _ in 0..START_TOKEN_POLLS {
            let mut b = [0u8];
            self.spi.read(&mut b).await.map_err(spi_err)?;
            if b[0] == START_TOKEN {
                return Ok(());
            }
        }
        Err(BusError::StartTokenTimeout)
    }

    /// Length and address that follow a memory command.
    fn mem_header(addr: u32, len: usize) -> [u8; 6] {
        let len = (len as u16).to_le_bytes();
        let addr = addr.to_le_bytes();
        [len[0], len[1], addr[0], addr[1], addr[2], addr[3]]
    }

    async fn write_gathered(&mut self, header: &[u8], parts: &[&[u8]]) -> Result<(), BusError> {
        self.spi.write(header).await.map_err(spi_err)?;
        for chunk in parts.chunks(MAX_PARTS) {
            let mut ops: [Operation<'_, u8>; MAX_PARTS] = core::array::from_fn(|_| Operation::Write(&[]));
            for (op, part) in ops.iter_mut().zip(chunk) {
                *op = Operation::Write(*part);
            }
            self.spi.transaction(&mut ops[..chunk.len()]).await.map_err(spi_err)?;
        }
        Ok(())
    }
}

impl<D: SpiDevice> Bus for SpiBus<D> {
    async fn init(&mut self) -> Result<(), BusError> {
        let cmd = INIT_CMD.to_le_bytes();
        let mut last = BusError::Busy;
        for _ in 0..INIT_ATTEMPTS {
            let mut rx = [0u8; 4];
            self.spi.transfer(&mut rx, &cmd).await.map_err(spi_err)?;
            match check_status(rx[3]) {
                Ok(()) => {
                    debug!("spi link initialised");
                    return Ok(());
                }
                Err(e) => last = e,
            }
        }
        warn!("spi init handshake failed: {:?}", last);
        Err(last)
    }

    async fn read_register(&mut self, reg: u8) -> Result<u8, BusError> {
        self.send_c1c2(C1_REG_READ, reg & 0x3F).await?;
        self.wait_start_token().await?;
        let mut b = [0u8];
        self.spi.read(&mut b).await.map_err(spi_err)?;
        trace!("read reg {:02x} = {:02x}", reg, b[0]);
        Ok(b[0])
    }

    async fn write_register(&mut self, reg: u8, value: u8) -> Result<(), BusError> {
        trace!("write reg {:02x} = {:02x}", reg, value);
        self.send_c1c2(C1_REG_WRITE, reg & 0x3F).await?;
        self.spi.write(&[value, 0]).await.map_err(spi_err)
    }

    async fn read_blocks(&mut self, buf: &mut [u8]) -> Result<(), BusError> {
        self.send_c1c2(C1_FRAME_READ, 0).await?;
        self.spi.write(&(buf.len() as u16).to_le_bytes()).await.map_err(spi_err)?;
        self.wait_start_token().await?;
        self.spi.read(buf).await.map_err(spi_err)
    }

    async fn write_blocks(&mut self, addr: u32, parts: &[&[u8]]) -> Result<(), BusError> {
        let len: usize = parts.iter().map(|p| p.len()).sum();
        if addr & SD_MASTER_ACCESS != 0 {
            self.send_c1c2(C1_MEM_WRITE, 0).await?;
            self.write_gathered(&Self::mem_header(addr, len), parts).await
        } else {
            // Frame writes carry the length/queue word as their address.
            self.send_c1c2(C1_FRAME_WRITE, 0).await?;
            self.write_gathered(&(addr as u16).to_le_bytes(), parts).await
        }
    }

    async fn read_bytes(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), BusError> {
        self.send_c1c2(C1_MEM_READ, 0).await?;
        self.spi.write(&Self::mem_header(addr, buf.len())).await.map_err(spi_err)?;
        self.wait_start_token().await?;
        self.spi.read(buf).await.map_err(spi_err)
    }

    async fn write_bytes(&mut self, addr: u32, data: &[u8]) -> Result<(), BusError> {
        self.send_c1c2(C1_MEM_WRITE, 0).await?;
        self.write_gathered(&Self::mem_header(addr, data.len()), &[data]).await
    }
}
