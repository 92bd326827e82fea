use crate::error::Error;
use crate::frame::QueueType;

/// Size of the host descriptor in front of every frame.
pub const HOST_DESC_LEN: usize = 16;

/// Upper bound on the number of slots a pool (and therefore a queue) can hold.
pub const MAX_PACKETS: usize = 16;

/// Tasks that may wait in [`Control::receive`](crate::Control::receive) at the same time.
pub const MAX_RX_WAITERS: usize = 4;

/// Largest supported link block size.
pub const MAX_BLOCK_SIZE: usize = 512;

/// Largest headroom that can be put in front of a WLAN frame.
pub const MAX_HEADROOM: usize = 64;

/// Block-count register width on older NCP revisions.
pub const NARROW_BLOCK_COUNT_MASK: u8 = 0x1F;
/// Block-count register width on revisions that report a full byte.
pub const WIDE_BLOCK_COUNT_MASK: u8 = 0xFF;

const DEFAULT_BLOCK_SIZE: usize = 256;
const DEFAULT_STATUS_TIMEOUT_MS: u32 = 100;

const _: () = {
    core::assert!(MAX_PACKETS >= 1, "At least one packet slot is required");
    core::assert!(MAX_PACKETS <= u16::MAX as usize, "Packet indices are 16 bit");
    core::assert!(MAX_HEADROOM <= MAX_BLOCK_SIZE, "Headroom must fit in one block");
};

/// Link parameters for a [`FrameTransport`](crate::transport::FrameTransport).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    pub(crate) block_size: usize,
    pub(crate) headroom: usize,
    pub(crate) block_count_mask: u8,
    pub(crate) status_timeout_ms: u32,
}

impl Config {
    pub const fn new() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            headroom: 0,
            block_count_mask: NARROW_BLOCK_COUNT_MASK,
            status_timeout_ms: DEFAULT_STATUS_TIMEOUT_MS,
        }
    }

    pub const fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Headroom is only inserted in front of WLAN management and data frames.
    pub const fn with_headroom(mut self, headroom: usize) -> Self {
        self.headroom = headroom;
        self
    }

    pub const fn with_wide_block_count(mut self) -> Self {
        self.block_count_mask = WIDE_BLOCK_COUNT_MASK;
        self
    }

    pub const fn with_status_timeout_ms(mut self, timeout_ms: u32) -> Self {
        self.status_timeout_ms = timeout_ms;
        self
    }

    pub const fn block_size(&self) -> usize {
        self.block_size
    }

    pub const fn block_count_mask(&self) -> u8 {
        self.block_count_mask
    }

    pub const fn status_timeout_ms(&self) -> u32 {
        self.status_timeout_ms
    }

    pub fn headroom_for(&self, queue: QueueType) -> usize {
        match queue {
            QueueType::WlanMgmt | QueueType::WlanData => self.headroom,
            _ => 0,
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.block_size == 0 || self.block_size > MAX_BLOCK_SIZE || self.headroom > MAX_HEADROOM {
            return Err(Error::InvalidParameter);
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
