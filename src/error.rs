use embedded_hal::spi::ErrorKind;

/// Fault reported by the physical link underneath [`FrameTransport`](crate::transport::FrameTransport).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusError {
    /// The SPI peripheral itself failed.
    Spi(ErrorKind),
    /// The NCP answered a command byte with its busy status.
    Busy,
    /// The NCP answered a command byte with its failure status.
    Failed,
    /// No start token arrived within the polling budget.
    StartTokenTimeout,
    /// A host controller returned a nonzero transfer status.
    Status(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// A bounded wait ran out before the condition was met.
    Timeout,
    /// The packet pool has no free slot.
    AllocationFailure,
    InvalidParameter,
    /// A command was issued while another one of the same class is in flight.
    WrongState,
    /// The command class is already held.
    Busy,
    /// A queue is masked or full.
    BusyResource,
    /// A multi-block frame write reported a nonzero status.
    WriteFailed,
    /// A received frame did not fit in a packet slot and was discarded.
    FrameTooLarge,
    Transport(BusError),
}

impl From<BusError> for Error {
    fn from(e: BusError) -> Self {
        Error::Transport(e)
    }
}
