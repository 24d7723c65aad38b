use alloc::vec::Vec;
use core::{
    ptr::{addr_of_mut, null_mut, NonNull},
    slice,
};

use bitfield_struct::bitfield;

use crate::CrcError;

/// The maximum amount of bytes a single descriptor can point to.
pub const DESCRIPTOR_BUFFER_MAX_SIZE: usize = 4095;

#[bitfield(u32)]
pub struct DmaDescriptorHeader {
    #[bits(12)]
    pub buffer_size: u16,
    #[bits(12)]
    pub buffer_length: u16,
    #[bits(6)]
    __: u8,
    /// Marks the last descriptor of a frame.
    pub suc_eof: bool,
    pub dma_owned: bool,
}

#[repr(C, align(8))]
/// A GDMA link list item.
///
/// The alignment satisfies both the AHB (4 bytes) and the AXI (8 bytes) descriptor alignment.
pub struct DmaDescriptor {
    header: DmaDescriptorHeader,
    buffer: *const u8,
    next: *mut DmaDescriptor,
}
impl DmaDescriptor {
    /// Create a descriptor for a TX chunk, which is owned by the DMA.
    fn new_for_tx(buffer: *const u8, length: usize) -> Self {
        Self {
            header: DmaDescriptorHeader::new()
                .with_buffer_size(length as u16)
                .with_buffer_length(length as u16)
                .with_suc_eof(false)
                .with_dma_owned(true),
            buffer,
            next: null_mut(),
        }
    }
    pub fn header(&self) -> DmaDescriptorHeader {
        self.header
    }
    /// Returns a byte slice of the buffer, which is [DmaDescriptorHeader::buffer_length] long.
    ///
    /// SAFETY:
    /// The buffer mounted into this descriptor must still be alive.
    pub unsafe fn buffer(&self) -> &[u8] {
        if self.buffer.is_null() {
            return &[];
        }
        unsafe { slice::from_raw_parts(self.buffer, self.header.buffer_length() as usize) }
    }
    pub fn next(&self) -> Option<NonNull<Self>> {
        NonNull::new(self.next)
    }
}

/// Calculate how many descriptors are needed to cover `length` bytes.
///
/// Every descriptor but the last one covers the largest multiple of `buffer_alignment`, that
/// fits into [DESCRIPTOR_BUFFER_MAX_SIZE].
pub fn descriptor_count(length: usize, buffer_alignment: usize) -> usize {
    length.div_ceil(max_chunk_size(buffer_alignment))
}
fn max_chunk_size(buffer_alignment: usize) -> usize {
    // An alignment above the descriptor limit would leave no room for any data.
    let buffer_alignment = buffer_alignment.clamp(1, DESCRIPTOR_BUFFER_MAX_SIZE);
    DESCRIPTOR_BUFFER_MAX_SIZE - DESCRIPTOR_BUFFER_MAX_SIZE % buffer_alignment
}

/// A chain of descriptors covering one buffer.
///
/// The allocation is kept between uses. Rebuilding the chain for a new buffer only allocates, if
/// the new buffer needs more descriptors than any buffer before it.
#[derive(Default)]
pub struct DescriptorChain {
    items: Vec<DmaDescriptor>,
}
// The chain only holds pointers into its own allocation and into the mounted buffer, which the
// DMA reads.
unsafe impl Send for DescriptorChain {}
impl DescriptorChain {
    pub const fn new() -> Self {
        Self { items: Vec::new() }
    }
    /// Mount `length` bytes starting at `buffer` into the chain.
    ///
    /// The previous contents of the chain are discarded. The last descriptor is marked as the end
    /// of the frame and links to nothing.
    ///
    /// SAFETY:
    /// The buffer must stay alive and unmodified, until the DMA is done with it.
    pub unsafe fn mount(
        &mut self,
        buffer: NonNull<u8>,
        length: usize,
        buffer_alignment: usize,
    ) -> Result<(), CrcError> {
        let node_count = descriptor_count(length, buffer_alignment);
        self.items.clear();
        self.items
            .try_reserve_exact(node_count)
            .map_err(|_| CrcError::DescriptorAllocation)?;

        let max_chunk_size = max_chunk_size(buffer_alignment);
        let mut processed = 0;
        while processed < length {
            let chunk_size = usize::min(max_chunk_size, length - processed);
            let chunk = unsafe { buffer.as_ptr().add(processed) };
            self.items
                .push(DmaDescriptor::new_for_tx(chunk.cast_const(), chunk_size));
            processed += chunk_size;
        }
        // Linking is done after all pushes, so that the addresses are stable.
        for i in 0..self.items.len().saturating_sub(1) {
            let next = addr_of_mut!(self.items[i + 1]);
            self.items[i].next = next;
        }
        if let Some(last) = self.items.last_mut() {
            last.header.set_suc_eof(true);
            last.next = null_mut();
        }
        trace!(
            "Mounted {} bytes into {} descriptors.",
            length,
            self.items.len()
        );
        Ok(())
    }
    /// The address, that has to be passed to the DMA to start the transfer.
    pub fn head(&mut self) -> Option<NonNull<DmaDescriptor>> {
        self.items.first_mut().map(NonNull::from)
    }
    pub fn len(&self) -> usize {
        self.items.len()
    }
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
    /// The amount of descriptors the chain can hold without allocating.
    pub fn capacity(&self) -> usize {
        self.items.capacity()
    }
    pub fn descriptors(&self) -> &[DmaDescriptor] {
        &self.items
    }
}
