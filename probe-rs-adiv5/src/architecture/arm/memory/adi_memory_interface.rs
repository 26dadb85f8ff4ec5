use super::{Alignment, MemoryError};
use crate::architecture::arm::ap::{AccessPort, AddressIncrement, DRW, TAR};
use crate::architecture::arm::dp::RdBuff;
use crate::architecture::arm::Register;
use crate::probe::{PortAddress, TransferDirection};

/// TAR is only guaranteed to auto-increment within a 1 KiB window.
const TAR_AUTOINCREMENT_MASK: u32 = !0x3ff;

/// Whether auto-increment from `programmed` to `address` has left the window.
fn crosses_window(address: u32, programmed: u32) -> bool {
    (address ^ programmed) & TAR_AUTOINCREMENT_MASK != 0
}

/// Bit offset of a byte or halfword inside the 32 bit data lanes.
fn lane_shift(address: u32, alignment: Alignment) -> u32 {
    match alignment {
        Alignment::Byte => (address & 3) << 3,
        Alignment::HalfWord => (address & 2) << 3,
        Alignment::Word | Alignment::DoubleWord => 0,
    }
}

/// Store the element transferred for `address` out of the data lanes.
fn extract(dest: &mut [u8], address: u32, value: u32, alignment: Alignment) {
    let value = value >> lane_shift(address, alignment);
    let bytes = value.to_le_bytes();
    dest.copy_from_slice(&bytes[..dest.len()]);
}

/// Place the element for `address` into the data lanes.
fn pack(src: &[u8], address: u32, alignment: Alignment) -> u32 {
    let mut bytes = [0u8; 4];
    bytes[..src.len()].copy_from_slice(src);
    u32::from_le_bytes(bytes) << lane_shift(address, alignment)
}

impl AccessPort {
    /// Program CSW for auto-incrementing transfers of `alignment` and TAR with `address`.
    fn setup_transfer(&self, address: u32, alignment: Alignment) -> Result<(), MemoryError> {
        let csw = self
            .csw()
            .with_transfer(
                alignment.data_size(self.has_large_data_extension()),
                AddressIncrement::Single,
            );
        self.write_ap_register(csw)?;
        self.raw_transfer(TransferDirection::Write, PortAddress::Ap(TAR::ADDRESS), address, address)?;
        Ok(())
    }

    fn raw_transfer(
        &self,
        direction: TransferDirection,
        register: PortAddress,
        value: u32,
        address: u32,
    ) -> Result<u32, MemoryError> {
        self.dp()
            .low_access(direction, register, value)
            .map_err(|source| MemoryError::Transfer { address, source })
    }

    /// Read `data.len()` bytes starting at `address`.
    ///
    /// The transfer width is the widest both `address` and the length are
    /// aligned to, so nothing outside of the requested range is touched.
    /// The first failing transfer ends the burst, the sticky fault of the
    /// debug port is set in that case.
    pub fn read(&self, address: u32, data: &mut [u8]) -> Result<(), MemoryError> {
        if data.is_empty() {
            return Ok(());
        }

        let alignment = Alignment::for_access(address, data.len());
        tracing::trace!(
            "Reading {} bytes from {:#010x} as {:?}",
            data.len(),
            address,
            alignment
        );

        self.setup_transfer(address, alignment)?;

        let drw = PortAddress::Ap(DRW::ADDRESS);
        let step = alignment.transfer_bytes();
        let count = data.len() / step;

        // Reads are posted, each DRW read returns the data of the previous one.
        self.raw_transfer(TransferDirection::Read, drw, 0, address)?;

        let mut current = address;
        let mut programmed = address;
        for (index, element) in data.chunks_exact_mut(step).enumerate() {
            let last = index + 1 == count;
            let register = if last {
                PortAddress::Dp(RdBuff::ADDRESS)
            } else {
                drw
            };

            let value = self.raw_transfer(TransferDirection::Read, register, 0, current)?;
            extract(element, current, value, alignment);

            if last {
                break;
            }

            current = current.wrapping_add(step as u32);
            if crosses_window(current, programmed) {
                programmed = current;
                self.raw_transfer(
                    TransferDirection::Write,
                    PortAddress::Ap(TAR::ADDRESS),
                    current,
                    current,
                )?;
                self.raw_transfer(TransferDirection::Read, drw, 0, current)?;
            }
        }

        Ok(())
    }

    /// Write `data` to `address`, choosing the transfer width like [`AccessPort::read`].
    pub fn write(&self, address: u32, data: &[u8]) -> Result<(), MemoryError> {
        let alignment = Alignment::for_access(address, data.len());
        self.write_sized(address, data, alignment)
    }

    /// Write `data` to `address` using transfers of `alignment`.
    ///
    /// Both `address` and the length of `data` have to be multiples of the
    /// element size.
    pub fn write_sized(
        &self,
        address: u32,
        data: &[u8],
        alignment: Alignment,
    ) -> Result<(), MemoryError> {
        if data.is_empty() {
            return Ok(());
        }

        let element = alignment.bytes();
        if address as usize % element != 0 || data.len() % element != 0 {
            return Err(MemoryError::MemoryNotAligned {
                address,
                alignment: element,
            });
        }

        tracing::trace!(
            "Writing {} bytes to {:#010x} as {:?}",
            data.len(),
            address,
            alignment
        );

        self.setup_transfer(address, alignment)?;

        let drw = PortAddress::Ap(DRW::ADDRESS);
        let step = alignment.transfer_bytes();

        let mut current = address;
        let mut programmed = address;
        for chunk in data.chunks_exact(step) {
            let value = pack(chunk, current, alignment);
            self.raw_transfer(TransferDirection::Write, drw, value, current)?;

            current = current.wrapping_add(step as u32);
            if crosses_window(current, programmed) {
                programmed = current;
                self.raw_transfer(
                    TransferDirection::Write,
                    PortAddress::Ap(TAR::ADDRESS),
                    current,
                    current,
                )?;
            }
        }

        // Make sure the last write completed.
        self.raw_transfer(
            TransferDirection::Read,
            PortAddress::Dp(RdBuff::ADDRESS),
            0,
            current,
        )?;

        Ok(())
    }

    /// Read a single 32 bit word.
    pub fn read_word_32(&self, address: u32) -> Result<u32, MemoryError> {
        let mut buffer = [0u8; 4];
        self.read(address, &mut buffer)?;
        Ok(u32::from_le_bytes(buffer))
    }

    /// Write a single 32 bit word.
    pub fn write_word_32(&self, address: u32, value: u32) -> Result<(), MemoryError> {
        self.write(address, &value.to_le_bytes())
    }
}
