use core::{
    fmt::{self, Display},
    ptr::NonNull,
};

use crate::DmaDescriptor;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// The bus a GDMA channel is attached to.
pub enum GdmaBus {
    Ahb,
    Axi,
}
impl GdmaBus {
    /// The widest CRC the calculator on this bus can compute.
    pub const fn max_crc_bit_width(self) -> u8 {
        match self {
            Self::Ahb => 32,
            Self::Axi => 16,
        }
    }
    /// The alignment the DMA requires for descriptors.
    pub const fn descriptor_alignment(self) -> usize {
        match self {
            Self::Ahb => 4,
            Self::Axi => 8,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// Buffer alignment the channel requires, in bytes.
///
/// Zero means, that there is no requirement.
pub struct AlignmentConstraints {
    pub internal: usize,
    pub external: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// The settings of the CRC calculator sitting behind the TX side of the channel.
pub struct CrcCalculatorConfig {
    pub bit_width: u8,
    pub polynomial: u32,
    pub init_value: u32,
    /// Reverse the bits of every byte, before it's fed to the calculator.
    pub reverse_data_mask: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransferConfig {
    /// Zero disables bursts.
    pub max_data_burst_size: usize,
    pub access_ext_mem: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StrategyConfig {
    /// The DMA checks the owner bit of every descriptor.
    pub owner_check: bool,
    /// The DMA clears the owner bit, once it's done with a descriptor.
    pub auto_update_desc: bool,
    pub eof_till_data_popped: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// The status passed along with an end of frame interrupt.
pub struct EofEvent {
    /// The frame ended normally, as opposed to an error terminating the transfer.
    pub normal_eof: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// An error reported by a [GdmaCrcChannel].
pub enum ChannelError {
    /// No free memory to memory trigger was available.
    ConnectFailed,
    /// The transfer configuration was rejected.
    InvalidTransferConfig,
    /// The channel requires a buffer alignment, that a single descriptor can't cover.
    UnsupportedAlignment,
}
impl Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ConnectFailed => "no free memory to memory trigger",
            Self::InvalidTransferConfig => "transfer configuration rejected",
            Self::UnsupportedAlignment => "buffer alignment exceeds descriptor size",
        })
    }
}

/// A GDMA TX channel with a CRC calculator attached.
///
/// The driver only ever has one transfer running on the channel. It configures the calculator,
/// resets the channel and then starts the transfer. Once the frame is done, the platform has to
/// call [AsyncCrc::on_transfer_eof](crate::AsyncCrc::on_transfer_eof) from the EOF interrupt of
/// the channel, exactly once per call to [GdmaCrcChannel::start].
pub trait GdmaCrcChannel: Send + Sync {
    fn bus(&self) -> GdmaBus;
    /// The number of the channel pair.
    ///
    /// This is reported as the [DriverId](crate::DriverId) of the driver installed on it.
    fn channel_id(&self) -> u32;
    /// Reset the channel and the calculator.
    fn reset(&self);
    /// Connect the channel to a free memory to memory trigger.
    fn connect_m2m(&mut self) -> Result<(), ChannelError>;
    fn disconnect(&mut self);
    fn apply_strategy(&mut self, strategy: &StrategyConfig);
    fn config_transfer(&mut self, config: &TransferConfig) -> Result<(), ChannelError>;
    fn alignment_constraints(&self) -> AlignmentConstraints;

    /// Check if `address` is in internal memory.
    fn is_internal_memory(&self, address: *const u8) -> bool;
    /// The size of the data cache line in front of `address`, or zero if there is none.
    fn cache_line_size(&self, address: *const u8) -> usize;
    /// Write back the data cache for the specified range.
    fn cache_writeback(&self, address: *const u8, length: usize);

    fn configure_crc(&self, config: &CrcCalculatorConfig);
    /// Start transmitting the chain starting at `head`.
    ///
    /// SAFETY:
    /// The chain and the buffers mounted into it, must stay alive and unmodified until the EOF
    /// for this transfer was handled.
    unsafe fn start(&self, head: NonNull<DmaDescriptor>);
    /// Read the raw value of the CRC result register.
    fn crc_result(&self) -> u32;

    /// Check if we're currently running in interrupt context.
    fn in_isr_context(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bus_limits() {
        assert_eq!(GdmaBus::Ahb.max_crc_bit_width(), 32);
        assert_eq!(GdmaBus::Axi.max_crc_bit_width(), 16);
        assert!(core::mem::align_of::<DmaDescriptor>() >= GdmaBus::Ahb.descriptor_alignment());
        assert!(core::mem::align_of::<DmaDescriptor>() >= GdmaBus::Axi.descriptor_alignment());
    }
}
