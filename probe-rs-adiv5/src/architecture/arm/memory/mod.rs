//! Memory access through a MEM-AP.

mod adi_memory_interface;
pub mod romtable;

use super::ap::{AccessPortError, DataSize};
use super::dp::DebugPortError;

/// An error during a memory transfer.
///
/// Every failed transfer also sets the sticky fault of the debug port.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    /// Programming CSW or TAR failed.
    #[error("Error while setting up the memory access port")]
    AccessPort(#[from] AccessPortError),
    /// A data transfer failed.
    #[error("Memory transfer at address 0x{address:08x} failed")]
    Transfer {
        /// Address of the element being transferred.
        address: u32,
        /// The underlying error.
        #[source]
        source: DebugPortError,
    },
    /// The address or length does not suit the requested transfer width.
    #[error("Failed to access address 0x{address:08x} as it is not aligned to the requirement of {alignment} bytes.")]
    MemoryNotAligned {
        /// The address of the access.
        address: u32,
        /// The required alignment in bytes.
        alignment: usize,
    },
}

/// Width of the individual transfers of a memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Alignment {
    /// 8 bit transfers.
    Byte = 0,
    /// 16 bit transfers.
    HalfWord = 1,
    /// 32 bit transfers.
    Word = 2,
    /// 64 bit elements, moved as two 32 bit transfers.
    DoubleWord = 3,
}

impl Alignment {
    /// The widest transfer `value` is aligned to, up to a word.
    pub fn of(value: u32) -> Self {
        if value & 3 == 0 {
            Alignment::Word
        } else if value & 1 == 0 {
            Alignment::HalfWord
        } else {
            Alignment::Byte
        }
    }

    /// The widest transfer usable for `len` bytes at `address` without
    /// touching anything outside of the range.
    pub fn for_access(address: u32, len: usize) -> Self {
        // Only the low bits of the length matter.
        Self::of(address).min(Self::of(len as u32))
    }

    /// Size of one element in bytes.
    pub fn bytes(&self) -> usize {
        1 << (*self as usize)
    }

    /// Bytes moved by one DRW transfer.
    pub(crate) fn transfer_bytes(&self) -> usize {
        self.bytes().min(4)
    }

    /// CSW.SIZE for elements of this width.
    ///
    /// A 64 bit SIZE is reserved unless the access port implements the Large
    /// Data Extension, without it doublewords are moved as plain words.
    pub(crate) fn data_size(&self, large_data: bool) -> DataSize {
        match self {
            Alignment::Byte => DataSize::U8,
            Alignment::HalfWord => DataSize::U16,
            Alignment::Word => DataSize::U32,
            Alignment::DoubleWord if large_data => DataSize::U64,
            Alignment::DoubleWord => DataSize::U32,
        }
    }
}
