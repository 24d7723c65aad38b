//! # `esp-async-crc`
//! This is a driver for calculating CRCs asynchronously, using the CRC calculator built into the
//! GDMA of newer ESP32-series chips.
//! ## Hardware overview
//! This chapter will give a short overview of how the hardware is used.
//!
//! ### The GDMA CRC calculator
//! The TX side of a GDMA channel has a CRC calculator attached to it, which sees every byte the
//! channel reads from memory. We connect the channel to a free memory to memory trigger, but
//! never set up the RX side, so the data just passes through the calculator. Once the last
//! descriptor was processed, the channel raises an EOF interrupt and the result can be read from
//! a register. The calculator supports an arbitrary polynomial, initial value and reversal of the
//! input bits. Reversing the output and the final XOR are done in software. On the AXI bus, the
//! calculator is limited to 16 bits.
//!
//! The register level access to the channel is abstracted by the [GdmaCrcChannel] trait, so the
//! driver itself is independent of the chip. The `sim` feature provides a software model of the
//! channel, which is also used for the tests.
//!
//! ### Buffers
//! The buffer is passed to the DMA through a chain of descriptors, each of which covers at most
//! 4095 bytes. We don't copy the data, so the buffer has to fulfill the alignment requirements of
//! the channel, which differ between internal and external memory. If the buffer is behind a
//! data cache, it's written back before the transfer is started.
//!
//! ### Transactions
//! All transactions are allocated, when the driver is installed. Free transactions live in the
//! idle queue. Submitting a request takes one of them, builds the descriptor chain for it and
//! moves it to the ready queue. Since there is only one calculator, at most one transaction runs
//! at a time. Who gets to start the next transaction is decided through a small state machine,
//! which is driven both from task context and from the EOF interrupt:
//!
//! - IDLE: Nothing is running.
//! - WAIT: Someone claimed the state machine and is deciding what to do next.
//! - RUN: A transaction is running on the hardware.
//!
//! Whenever a request is queued or a transfer ends, we try to claim the state machine by moving
//! it from IDLE to WAIT. Whoever wins takes the first transaction from the ready queue and starts
//! it. If the queue turns out to be empty, we go back to IDLE and check the queue again, since a
//! request may have been queued in the mean time. Transactions therefore complete in the order
//! they were submitted. When a transfer ends, the interrupt handler finalizes the result, invokes
//! the callback of the transaction and returns the transaction to the idle queue, before starting
//! the next one.

#![no_std]
pub(crate) mod fmt;

extern crate alloc;
#[cfg(any(test, feature = "sim"))]
extern crate std;

mod blocking;
mod crc;
mod dma_list;
mod driver;
mod error;
mod gdma;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
mod sync;

pub use blocking::BlockingTimeout;
pub use crc::{bit_reverse32, CrcParams};
pub use dma_list::{
    descriptor_count, DescriptorChain, DmaDescriptor, DmaDescriptorHeader,
    DESCRIPTOR_BUFFER_MAX_SIZE,
};
pub use driver::{AsyncCrc, Config, CrcEvent, CrcFsm, DriverId, IsrCallback, IsrFn};
pub use error::{CrcError, CrcResult, ErrorKind};
pub use gdma::{
    AlignmentConstraints, ChannelError, CrcCalculatorConfig, EofEvent, GdmaBus, GdmaCrcChannel,
    StrategyConfig, TransferConfig,
};

include!(concat!(env!("OUT_DIR"), "/config.rs"));

/// The transaction queues are shared with the EOF interrupt.
type DefaultRawMutex = embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
