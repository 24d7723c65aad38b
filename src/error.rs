use core::fmt::{self, Display};

use crate::ChannelError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// The coarse category of a [CrcError].
pub enum ErrorKind {
    /// The caller passed something, that can't be used.
    InvalidArg,
    /// The driver isn't in a state, where the operation is possible.
    InvalidState,
    /// An allocation failed.
    NoMem,
    /// The operation didn't complete in time.
    Timeout,
    /// Anything else, mostly errors reported by the DMA channel.
    Fail,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// An error returned by the driver.
pub enum CrcError {
    /// A null pointer or a zero length buffer was passed.
    InvalidArgument,
    /// The CRC width is either not 8, 16 or 32 bits, or it exceeds what the bus supports.
    UnsupportedWidth(u8),
    /// The buffer isn't aligned to what the DMA channel requires for that memory region.
    MisalignedBuffer { alignment: usize },
    /// The DMA burst size must be zero or a power of two.
    InvalidBurstSize(usize),
    /// All transactions are in use.
    NoFreeTransaction,
    /// The driver still has transactions in flight.
    Busy,
    /// A blocking call was made from interrupt context.
    IsrContext,
    /// The calculation didn't complete before the timeout expired.
    Timeout,
    /// The transaction pool couldn't be allocated.
    NoMemory,
    /// The descriptor chain for a transaction couldn't be allocated.
    DescriptorAllocation,
    /// The DMA channel reported an error.
    Channel(ChannelError),
}
impl CrcError {
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument
            | Self::UnsupportedWidth(_)
            | Self::MisalignedBuffer { .. }
            | Self::InvalidBurstSize(_) => ErrorKind::InvalidArg,
            Self::NoFreeTransaction | Self::Busy | Self::IsrContext => ErrorKind::InvalidState,
            Self::NoMemory => ErrorKind::NoMem,
            Self::Timeout => ErrorKind::Timeout,
            Self::DescriptorAllocation | Self::Channel(_) => ErrorKind::Fail,
        }
    }
}
impl From<ChannelError> for CrcError {
    fn from(value: ChannelError) -> Self {
        Self::Channel(value)
    }
}
impl Display for CrcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument => f.write_str("invalid argument"),
            Self::UnsupportedWidth(width) => write!(f, "unsupported CRC width of {width} bits"),
            Self::MisalignedBuffer { alignment } => {
                write!(f, "buffer isn't aligned to {alignment} bytes")
            }
            Self::InvalidBurstSize(size) => write!(f, "invalid DMA burst size {size}"),
            Self::NoFreeTransaction => f.write_str("no free transaction"),
            Self::Busy => f.write_str("driver is busy"),
            Self::IsrContext => f.write_str("blocking call from interrupt context"),
            Self::Timeout => f.write_str("timed out"),
            Self::NoMemory => f.write_str("out of memory"),
            Self::DescriptorAllocation => f.write_str("failed to allocate DMA descriptors"),
            Self::Channel(err) => write!(f, "DMA channel error: {err}"),
        }
    }
}
impl core::error::Error for CrcError {}

pub type CrcResult<T> = Result<T, CrcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds() {
        assert_eq!(CrcError::InvalidArgument.kind(), ErrorKind::InvalidArg);
        assert_eq!(CrcError::UnsupportedWidth(12).kind(), ErrorKind::InvalidArg);
        assert_eq!(
            CrcError::MisalignedBuffer { alignment: 4 }.kind(),
            ErrorKind::InvalidArg
        );
        assert_eq!(CrcError::InvalidBurstSize(3).kind(), ErrorKind::InvalidArg);
        assert_eq!(CrcError::NoFreeTransaction.kind(), ErrorKind::InvalidState);
        assert_eq!(CrcError::Busy.kind(), ErrorKind::InvalidState);
        assert_eq!(CrcError::IsrContext.kind(), ErrorKind::InvalidState);
        assert_eq!(CrcError::NoMemory.kind(), ErrorKind::NoMem);
        assert_eq!(CrcError::Timeout.kind(), ErrorKind::Timeout);
        assert_eq!(CrcError::DescriptorAllocation.kind(), ErrorKind::Fail);
        assert_eq!(
            CrcError::from(ChannelError::ConnectFailed).kind(),
            ErrorKind::Fail
        );
    }
}
