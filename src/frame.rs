//! The 16-byte host descriptor carried in front of every frame.
//!
//! ```text
//!  0      1      2      3 .. 11    12      13 .. 15
//! +------+------+------+---------+--------+---------+
//! | len[11:0] q |type  | reserved| status | reserved|
//! +------+------+------+---------+--------+---------+
//! ```
//! The queue id lives in the high nibble of byte 1.

use bitfield_struct::bitfield;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::config::HOST_DESC_LEN;
use crate::error::Error;

#[bitfield(u16)]
struct LengthQueue {
    #[bits(12)]
    length: u16,
    #[bits(4)]
    queue: u8,
}

/// 4-bit queue id naming the NCP-side queue a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum QueueType {
    Common = 0,
    Zigbee = 1,
    Bt = 2,
    PropProtocol = 3,
    WlanMgmt = 4,
    WlanData = 5,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FrameDescriptor {
    /// Payload length following the descriptor.
    pub length: u16,
    pub queue: QueueType,
    pub frame_type: u8,
    /// 0 on success.
    pub status: u8,
}

impl FrameDescriptor {
    /// Largest payload the 12-bit length field can describe.
    pub const MAX_LENGTH: usize = 0x0FFF;

    const FRAME_TYPE_OFFSET: usize = 2;
    const STATUS_OFFSET: usize = 12;

    pub fn new(queue: QueueType, frame_type: u8, length: usize) -> Result<Self, Error> {
        if length > Self::MAX_LENGTH {
            return Err(Error::InvalidParameter);
        }
        Ok(Self {
            length: length as u16,
            queue,
            frame_type,
            status: 0,
        })
    }

    pub fn encode(&self) -> [u8; HOST_DESC_LEN] {
        let mut out = [0u8; HOST_DESC_LEN];
        let lq = LengthQueue::new()
            .with_length(self.length & Self::MAX_LENGTH as u16)
            .with_queue(self.queue.into());
        out[..2].copy_from_slice(&lq.into_bits().to_le_bytes());
        out[Self::FRAME_TYPE_OFFSET] = self.frame_type;
        out[Self::STATUS_OFFSET] = self.status;
        out
    }

    /// Reserved bytes are ignored.
    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() < HOST_DESC_LEN {
            return Err(Error::InvalidParameter);
        }
        let lq = LengthQueue::from_bits(u16::from_le_bytes([bytes[0], bytes[1]]));
        let queue = QueueType::try_from(lq.queue()).map_err(|_| Error::InvalidParameter)?;
        Ok(Self {
            length: lq.length(),
            queue,
            frame_type: bytes[Self::FRAME_TYPE_OFFSET],
            status: bytes[Self::STATUS_OFFSET],
        })
    }

    pub fn is_success(&self) -> bool {
        self.status == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_id_sits_in_high_nibble_of_byte_one() {
        let desc = FrameDescriptor::new(QueueType::WlanData, 0x10, 0x234).unwrap();
        let bytes = desc.encode();
        assert_eq!(bytes[0], 0x34);
        assert_eq!(bytes[1], 0x52);
        assert_eq!(bytes[2], 0x10);
        assert!(bytes[3..12].iter().all(|b| *b == 0));
        assert_eq!(bytes[12], 0);
        assert!(bytes[13..].iter().all(|b| *b == 0));
    }

    #[test]
    fn decode_reads_status_and_ignores_reserved() {
        let mut bytes = [0xAAu8; HOST_DESC_LEN];
        bytes[0] = 0x05;
        bytes[1] = 0x40;
        bytes[2] = 0x9C;
        bytes[12] = 0x03;
        let desc = FrameDescriptor::decode(&bytes).unwrap();
        assert_eq!(desc.length, 5);
        assert_eq!(desc.queue, QueueType::WlanMgmt);
        assert_eq!(desc.frame_type, 0x9C);
        assert_eq!(desc.status, 3);
        assert!(!desc.is_success());
    }

    #[test]
    fn rejects_lengths_past_twelve_bits() {
        assert_eq!(
            FrameDescriptor::new(QueueType::Common, 0, FrameDescriptor::MAX_LENGTH + 1),
            Err(Error::InvalidParameter)
        );
    }

    #[test]
    fn rejects_unknown_queue_and_short_input() {
        let mut bytes = [0u8; HOST_DESC_LEN];
        bytes[1] = 0xF0;
        assert_eq!(FrameDescriptor::decode(&bytes), Err(Error::InvalidParameter));
        assert_eq!(FrameDescriptor::decode(&bytes[..8]), Err(Error::InvalidParameter));
    }
}
