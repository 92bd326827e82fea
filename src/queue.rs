use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use heapless::Deque;

use crate::config::MAX_PACKETS;
use crate::packet::Packet;

struct Inner<'p, const N: usize> {
    packets: Deque<Packet<'p>, N>,
    masked: bool,
}

/// Bounded FIFO of packets with a block/unblock mask.
///
/// Task and interrupt producers both go through the same critical-section
/// mutex, so an ISR enqueue can never interleave with a task-context dequeue.
pub struct PacketQueue<'p, const N: usize = MAX_PACKETS> {
    inner: Mutex<CriticalSectionRawMutex, RefCell<Inner<'p, N>>>,
}

impl<'p, const N: usize> PacketQueue<'p, N> {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(Inner {
                packets: Deque::new(),
                masked: false,
            })),
        }
    }

    /// Appends `packet`, handing it back if the queue is full.
    pub fn enqueue(&self, packet: Packet<'p>) -> Result<(), Packet<'p>> {
        self.inner.lock(|inner| inner.borrow_mut().packets.push_back(packet))
    }

    pub fn enqueue_from_isr(&self, packet: Packet<'p>) -> Result<(), Packet<'p>> {
        self.enqueue(packet)
    }

    pub fn dequeue(&self) -> Option<Packet<'p>> {
        self.inner.lock(|inner| inner.borrow_mut().packets.pop_front())
    }

    /// Pending count, or 0 while the queue is blocked.
    pub fn status(&self) -> usize {
        self.inner.lock(|inner| {
            let inner = inner.borrow();
            if inner.masked {
                0
            } else {
                inner.packets.len()
            }
        })
    }

    /// Number of queued packets regardless of the mask.
    pub fn pending_count(&self) -> usize {
        self.inner.lock(|inner| inner.borrow().packets.len())
    }

    pub fn is_full(&self) -> bool {
        self.inner.lock(|inner| inner.borrow().packets.is_full())
    }

    pub fn block(&self) {
        self.inner.lock(|inner| inner.borrow_mut().masked = true);
    }

    pub fn unblock(&self) {
        self.inner.lock(|inner| inner.borrow_mut().masked = false);
    }

    pub fn is_blocked(&self) -> bool {
        self.inner.lock(|inner| inner.borrow().masked)
    }
}

impl<const N: usize> Default for PacketQueue<'_, N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::PacketPool;

    #[test]
    fn mask_hides_but_keeps_entries() {
        let mut buf = [0u8; 3 * 32];
        let pool: PacketPool<'_, 3> = PacketPool::init(&mut buf, 96, 32).unwrap();
        let queue: PacketQueue<'_, 3> = PacketQueue::new();
        assert_eq!(queue.status(), 0);

        let p1 = pool.allocate().unwrap();
        let p2 = pool.allocate().unwrap();
        let p3 = pool.allocate().unwrap();
        let ids = [p1.index(), p2.index(), p3.index()];
        queue.enqueue(p1).unwrap();
        queue.enqueue_from_isr(p2).unwrap();
        queue.enqueue(p3).unwrap();
        assert_eq!(queue.status(), 3);

        queue.block();
        assert!(queue.is_blocked());
        assert_eq!(queue.status(), 0);
        assert_eq!(queue.pending_count(), 3);
        queue.unblock();
        assert_eq!(queue.status(), 3);

        for id in ids {
            assert_eq!(queue.dequeue().unwrap().index(), id);
        }
        assert!(queue.dequeue().is_none());
        assert_eq!(queue.pending_count(), 0);
    }

    #[test]
    fn dequeues_in_enqueue_order() {
        let mut buf = [0u8; 8 * 16];
        let pool: PacketPool<'_, 8> = PacketPool::init(&mut buf, 128, 16).unwrap();
        let queue: PacketQueue<'_, 8> = PacketQueue::new();

        let mut held: heapless::Vec<_, 8> = heapless::Vec::new();
        while let Ok(p) = pool.allocate() {
            held.push(p).unwrap();
        }
        assert_eq!(pool.available_count(), 0);

        // Enqueue highest index first so FIFO order differs from slot order.
        let mut ids = heapless::Vec::<u16, 8>::new();
        while let Some(p) = held.pop() {
            ids.push(p.index()).unwrap();
            queue.enqueue(p).unwrap();
        }
        assert_eq!(queue.pending_count(), 8);

        for id in ids {
            let p = queue.dequeue().unwrap();
            assert_eq!(p.index(), id);
            pool.free(p);
        }
        assert_eq!(queue.status(), 0);
        assert_eq!(pool.available_count(), 8);
    }

    #[test]
    fn full_queue_hands_packet_back() {
        let mut buf = [0u8; 2 * 16];
        let pool: PacketPool<'_, 2> = PacketPool::init(&mut buf, 32, 16).unwrap();
        let queue: PacketQueue<'_, 1> = PacketQueue::new();
        queue.enqueue(pool.allocate().unwrap()).unwrap();
        assert!(queue.is_full());
        let rejected = queue.enqueue(pool.allocate().unwrap()).unwrap_err();
        assert_eq!(rejected.index(), 1);
        pool.free(rejected);
        assert_eq!(pool.available_count(), 1);
    }
}
