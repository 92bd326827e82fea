use num_enum::{IntoPrimitive, TryFromPrimitive};
use portable_atomic::{AtomicU8, Ordering};

use crate::error::Error;
use crate::frame::QueueType;

/// Command categories that may each have one request in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum CommandClass {
    Wlan = 0,
    Network = 1,
    Socket = 2,
    BtBle = 3,
    Common = 4,
    PropProtocol = 5,
}

impl CommandClass {
    pub const COUNT: usize = 6;

    pub const ALL: [CommandClass; Self::COUNT] = [
        CommandClass::Wlan,
        CommandClass::Network,
        CommandClass::Socket,
        CommandClass::BtBle,
        CommandClass::Common,
        CommandClass::PropProtocol,
    ];

    /// NCP queue that carries this class's commands and responses.
    pub fn queue(self) -> QueueType {
        match self {
            CommandClass::Wlan | CommandClass::Network | CommandClass::Socket => QueueType::WlanMgmt,
            CommandClass::BtBle => QueueType::Bt,
            CommandClass::Common => QueueType::Common,
            CommandClass::PropProtocol => QueueType::PropProtocol,
        }
    }

    pub(crate) fn index(self) -> usize {
        u8::from(self) as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum CommandState {
    Idle = 0,
    InUse = 1,
}

/// One `Idle`/`InUse` flag per [`CommandClass`].
pub struct CommandStateTracker {
    states: [AtomicU8; CommandClass::COUNT],
}

impl CommandStateTracker {
    pub const fn new() -> Self {
        Self {
            states: [
                AtomicU8::new(CommandState::Idle as u8),
                AtomicU8::new(CommandState::Idle as u8),
                AtomicU8::new(CommandState::Idle as u8),
                AtomicU8::new(CommandState::Idle as u8),
                AtomicU8::new(CommandState::Idle as u8),
                AtomicU8::new(CommandState::Idle as u8),
            ],
        }
    }

    pub fn try_acquire(&self, class: CommandClass) -> Result<(), Error> {
        self.states[class.index()]
            .compare_exchange(
                CommandState::Idle as u8,
                CommandState::InUse as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| ())
            .map_err(|_| Error::Busy)
    }

    /// Unconditionally returns `class` to `Idle`. Only the holder may call this.
    pub fn release(&self, class: CommandClass) {
        self.states[class.index()].store(CommandState::Idle as u8, Ordering::Release);
    }

    pub fn state(&self, class: CommandClass) -> CommandState {
        match self.states[class.index()].load(Ordering::Acquire) {
            0 => CommandState::Idle,
            _ => CommandState::InUse,
        }
    }
}

impl Default for CommandStateTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_is_busy_until_release() {
        let tracker = CommandStateTracker::new();
        tracker.try_acquire(CommandClass::Wlan).unwrap();
        assert_eq!(tracker.state(CommandClass::Wlan), CommandState::InUse);
        assert_eq!(tracker.try_acquire(CommandClass::Wlan), Err(Error::Busy));

        tracker.release(CommandClass::Wlan);
        assert_eq!(tracker.state(CommandClass::Wlan), CommandState::Idle);
        assert_eq!(tracker.try_acquire(CommandClass::Wlan), Ok(()));
    }

    #[test]
    fn classes_are_independent() {
        let tracker = CommandStateTracker::new();
        for class in CommandClass::ALL {
            tracker.try_acquire(class).unwrap();
        }
        tracker.release(CommandClass::BtBle);
        for class in CommandClass::ALL {
            let expected = if class == CommandClass::BtBle {
                CommandState::Idle
            } else {
                CommandState::InUse
            };
            assert_eq!(tracker.state(class), expected);
        }
    }

    #[test]
    fn wlan_family_shares_management_queue() {
        assert_eq!(CommandClass::Socket.queue(), QueueType::WlanMgmt);
        assert_eq!(CommandClass::Network.queue(), QueueType::WlanMgmt);
        assert_eq!(CommandClass::BtBle.queue(), QueueType::Bt);
        assert_eq!(CommandClass::try_from(5u8).ok(), Some(CommandClass::PropProtocol));
    }
}
