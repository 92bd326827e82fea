//! Fixed-capacity packet arena carved out of a caller-supplied buffer.
//!
//! Every slot is handed out as an owned [`Packet`]. A packet is always in
//! exactly one place: the pool's free list, a single [`PacketQueue`](crate::queue::PacketQueue),
//! or the hands of whoever allocated it. Moving the `Packet` value is the
//! ownership transfer, so no slot can be linked into two structures at once.

use core::cell::RefCell;
use core::fmt;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use heapless::Vec;

use crate::config::{HOST_DESC_LEN, MAX_PACKETS};
use crate::error::Error;
use crate::frame::FrameDescriptor;

/// One pool slot: a 16-byte host descriptor followed by the payload region.
pub struct Packet<'p> {
    index: u16,
    buf: &'p mut [u8],
}

impl<'p> Packet<'p> {
    /// Slot index inside the owning pool.
    pub fn index(&self) -> u16 {
        self.index
    }

    /// Total slot size, descriptor included.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Room left for payload after the descriptor.
    pub fn payload_capacity(&self) -> usize {
        self.buf.len() - HOST_DESC_LEN
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.buf
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        self.buf
    }

    pub fn descriptor(&self) -> Result<FrameDescriptor, Error> {
        FrameDescriptor::decode(&self.buf[..HOST_DESC_LEN])
    }

    pub fn set_descriptor(&mut self, desc: &FrameDescriptor) {
        self.buf[..HOST_DESC_LEN].copy_from_slice(&desc.encode());
    }

    pub fn payload(&self) -> &[u8] {
        &self.buf[HOST_DESC_LEN..]
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.buf[HOST_DESC_LEN..]
    }

    /// The payload bytes the descriptor's length field covers.
    pub fn frame_payload(&self) -> Result<&[u8], Error> {
        let len = self.descriptor()?.length as usize;
        self.payload().get(..len).ok_or(Error::InvalidParameter)
    }

    /// Writes `desc` and copies `payload` behind it.
    pub fn fill(&mut self, desc: &FrameDescriptor, payload: &[u8]) -> Result<(), Error> {
        if payload.len() != desc.length as usize || payload.len() > self.payload_capacity() {
            return Err(Error::InvalidParameter);
        }
        self.set_descriptor(desc);
        self.payload_mut()[..payload.len()].copy_from_slice(payload);
        Ok(())
    }
}

impl fmt::Debug for Packet<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("index", &self.index)
            .field("capacity", &self.buf.len())
            .finish()
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Packet<'_> {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "Packet(index={=u16}, capacity={=usize})", self.index, self.buf.len())
    }
}

pub struct PacketPool<'p, const N: usize = MAX_PACKETS> {
    free: Mutex<CriticalSectionRawMutex, RefCell<Vec<Packet<'p>, N>>>,
    capacity: usize,
    packet_size: usize,
}

impl<'p, const N: usize> PacketPool<'p, N> {
    /// Splits the first `total_size` bytes of `buffer` into `total_size / packet_size` slots.
    pub fn init(buffer: &'p mut [u8], total_size: usize, packet_size: usize) -> Result<Self, Error> {
        if packet_size < HOST_DESC_LEN
            || total_size > buffer.len()
            || total_size % packet_size != 0
            || total_size / packet_size == 0
            || total_size / packet_size > N
        {
            return Err(Error::InvalidParameter);
        }

        let capacity = total_size / packet_size;
        let mut free = Vec::new();
        // Reversed so that the lowest slot is handed out first.
        for (index, buf) in buffer[..total_size].chunks_exact_mut(packet_size).enumerate().rev() {
            free.push(Packet {
                index: index as u16,
                buf,
            })
            .map_err(|_| Error::InvalidParameter)?;
        }

        debug!("packet pool: {} slots of {} bytes", capacity, packet_size);

        Ok(Self {
            free: Mutex::new(RefCell::new(free)),
            capacity,
            packet_size,
        })
    }

    /// Never blocks; fails with [`Error::AllocationFailure`] when the pool is empty.
    pub fn allocate(&self) -> Result<Packet<'p>, Error> {
        self.free
            .lock(|free| free.borrow_mut().pop())
            .ok_or(Error::AllocationFailure)
    }

    /// Returns a slot to the pool.
    ///
    /// The packet must have been allocated from this pool. A foreign packet
    /// that does not fit in the free list is dropped.
    pub fn free(&self, packet: Packet<'p>) {
        if let Err(packet) = self.free.lock(|free| free.borrow_mut().push(packet)) {
            warn!("dropping packet {} not owned by this pool", packet.index);
        }
    }

    /// Current free-slot count, for diagnostics.
    pub fn available_count(&self) -> usize {
        self.free.lock(|free| free.borrow().len())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn packet_size(&self) -> usize {
        self.packet_size
    }
}
