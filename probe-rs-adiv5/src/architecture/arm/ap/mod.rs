//! Access ports and their registers.

use super::communication_interface::impl_register;
use super::dp::{DebugPort, DebugPortError, Select};
use super::Register;
use crate::probe::PortAddress;
use bitfield::bitfield;
use enum_primitive_derive::Primitive;
use num_traits::FromPrimitive;
use std::cell::Cell;
use std::rc::Rc;

/// An error in the communication with an access port.
#[derive(Debug, thiserror::Error)]
pub enum AccessPortError {
    /// Reading a register failed.
    #[error("Failed to read register {name} at address 0x{address:02x}")]
    RegisterReadError {
        /// Address of the register.
        address: u8,
        /// Name of the register.
        name: &'static str,
        /// The underlying error.
        #[source]
        source: DebugPortError,
    },
    /// Writing a register failed.
    #[error("Failed to write register {name} at address 0x{address:02x}")]
    RegisterWriteError {
        /// Address of the register.
        address: u8,
        /// Name of the register.
        name: &'static str,
        /// The underlying error.
        #[source]
        source: DebugPortError,
    },
    /// Selecting the access port failed.
    #[error("Error while communicating with debug port")]
    DebugPort(#[from] DebugPortError),
}

impl AccessPortError {
    /// A failed read of register `R`.
    pub fn register_read_error<R: Register>(source: DebugPortError) -> Self {
        AccessPortError::RegisterReadError {
            address: R::ADDRESS,
            name: R::NAME,
            source,
        }
    }

    /// A failed write of register `R`.
    pub fn register_write_error<R: Register>(source: DebugPortError) -> Self {
        AccessPortError::RegisterWriteError {
            address: R::ADDRESS,
            name: R::NAME,
            source,
        }
    }

    fn raw_read_error(address: u8, source: DebugPortError) -> Self {
        AccessPortError::RegisterReadError {
            address,
            name: "AP register",
            source,
        }
    }

    fn raw_write_error(address: u8, source: DebugPortError) -> Self {
        AccessPortError::RegisterWriteError {
            address,
            name: "AP register",
            source,
        }
    }
}

/// A register of an access port.
pub trait ApRegister: Register {}

/// Transfer width in CSW.SIZE.
#[derive(Debug, Primitive, Clone, Copy, PartialEq, Eq)]
pub enum DataSize {
    /// 8 bit.
    U8 = 0b000,
    /// 16 bit.
    U16 = 0b001,
    /// 32 bit.
    U32 = 0b010,
    /// 64 bit, large data extension.
    U64 = 0b011,
}

/// Address increment mode in CSW.AddrInc.
#[derive(Debug, Primitive, Clone, Copy, PartialEq, Eq)]
pub enum AddressIncrement {
    /// TAR stays put.
    Off = 0b00,
    /// TAR advances by the transfer size after each DRW access.
    Single = 0b01,
    /// Packed transfers.
    Packed = 0b10,
}

bitfield! {
    /// CSW, control and status word of a MEM-AP.
    #[derive(Clone, Copy, Default)]
    pub struct CSW(u32);
    impl Debug;
    pub dbg_sw_enable, set_dbg_sw_enable: 31;
    pub u8, prot, set_prot: 30, 24;
    pub spiden, _: 23;
    pub u8, mode, set_mode: 11, 8;
    pub tr_in_prog, _: 7;
    pub device_en, _: 6;
    pub u8, addr_inc_raw, set_addr_inc_raw: 5, 4;
    pub u8, size_raw, set_size_raw: 2, 0;
}

impl CSW {
    const SIZE_MASK: u32 = 0b111;
    const ADDR_INC_MASK: u32 = 0b11 << 4;

    /// The template kept per access port: everything but SIZE and AddrInc.
    pub fn template(self) -> Self {
        CSW(self.0 & !(Self::SIZE_MASK | Self::ADDR_INC_MASK))
    }

    /// The template with a transfer size and increment mode filled in.
    pub fn with_transfer(self, size: DataSize, increment: AddressIncrement) -> Self {
        let mut csw = self.template();
        csw.set_size_raw(size as u8);
        csw.set_addr_inc_raw(increment as u8);
        csw
    }

    /// CSW.SIZE, `None` for sizes this crate never uses.
    pub fn size(&self) -> Option<DataSize> {
        DataSize::from_u8(self.size_raw())
    }

    /// CSW.AddrInc.
    pub fn addr_inc(&self) -> Option<AddressIncrement> {
        AddressIncrement::from_u8(self.addr_inc_raw())
    }
}

impl_register!(CSW, 0x00, "CSW");
impl ApRegister for CSW {}

/// TAR, the transfer address register.
#[derive(Debug, Clone, Copy)]
pub struct TAR(pub u32);

impl_register!(TAR, 0x04, "TAR");
impl ApRegister for TAR {}

/// DRW, the data read/write register.
#[derive(Debug, Clone, Copy)]
pub struct DRW(pub u32);

impl_register!(DRW, 0x0c, "DRW");
impl ApRegister for DRW {}

bitfield! {
    /// CFG, MEM-AP configuration.
    #[derive(Clone, Copy)]
    pub struct CFG(u32);
    impl Debug;
    pub ld, _: 2;
    pub la, _: 1;
    pub be, _: 0;
}

impl_register!(CFG, 0xf4, "CFG");
impl ApRegister for CFG {}

bitfield! {
    /// BASE, points at the top level ROM table or debug component.
    #[derive(Clone, Copy)]
    pub struct BASE(u32);
    impl Debug;
    pub u32, baseaddr, _: 31, 12;
    pub format, _: 1;
    pub present, _: 0;
}

impl BASE {
    /// BASE reads as all ones when a MEM-AP has no debug entries.
    pub const NOT_PRESENT: u32 = 0xffff_ffff;
}

impl_register!(BASE, 0xf8, "BASE");
impl ApRegister for BASE {}

/// Bus type of a MEM-AP, from IDR.TYPE.
#[derive(Debug, Primitive, Clone, Copy, PartialEq, Eq)]
pub enum ApType {
    /// A JTAG-AP or another non memory access port.
    JtagComAp = 0x0,
    /// AMBA AHB3 bus.
    AmbaAhb3 = 0x1,
    /// AMBA APB2 or APB3 bus.
    AmbaApb2Apb3 = 0x2,
    /// AMBA AXI3 or AXI4 bus.
    AmbaAxi3Axi4 = 0x4,
    /// AMBA AHB5 bus.
    AmbaAhb5 = 0x5,
    /// AMBA APB4 bus.
    AmbaApb4 = 0x6,
    /// AMBA AXI5 bus.
    AmbaAxi5 = 0x7,
    /// AMBA AHB5 with enhanced HPROT.
    AmbaAhb5Hprot = 0x8,
}

bitfield! {
    /// IDR, the identification register of an access port.
    #[derive(Clone, Copy)]
    pub struct IDR(u32);
    impl Debug;
    pub u8, revision, _: 31, 28;
    pub u16, designer, _: 27, 17;
    pub u8, class, _: 16, 13;
    pub u8, variant, _: 7, 4;
    pub u8, ap_type_raw, _: 3, 0;
}

impl IDR {
    /// The bus type, `None` for reserved encodings.
    pub fn ap_type(&self) -> Option<ApType> {
        ApType::from_u8(self.ap_type_raw())
    }
}

impl_register!(IDR, 0xfc, "IDR");
impl ApRegister for IDR {}

/// Read an access port register without an [`AccessPort`] to hang it off.
fn read_raw(dp: &DebugPort, selector: u8, address: u8) -> Result<u32, AccessPortError> {
    dp.write_dp_register(Select::for_ap_register(selector, address))?;
    dp.read_register(PortAddress::Ap(address))
        .map_err(|e| AccessPortError::raw_read_error(address, e))
}

/// A valid access port behind a [`DebugPort`].
///
/// Like the debug port, an access port carries its own reference count.
/// The first reference taken on an access port also takes a reference on
/// its debug port, the last one dropped gives it back.
#[derive(Debug)]
pub struct AccessPort {
    dp: Rc<DebugPort>,
    selector: u8,
    idr: IDR,
    base: u32,
    csw: CSW,
    large_data: bool,
    designer_code: Cell<u16>,
    part_no: Cell<u16>,
    cortexm_demcr: Cell<u32>,
    refcnt: Cell<usize>,
}

impl AccessPort {
    /// Probe access port `selector` of `dp`.
    ///
    /// Returns `Ok(None)` if the selector does not hold a usable MEM-AP:
    /// BASE reads as all ones, IDR reads as zero or a transaction is still in
    /// progress. A returned access port holds one reference.
    #[tracing::instrument(skip(dp))]
    pub fn new(dp: &Rc<DebugPort>, selector: u8) -> Result<Option<Rc<Self>>, AccessPortError> {
        let idr = IDR(read_raw(dp, selector, IDR::ADDRESS)?);
        let base = read_raw(dp, selector, BASE::ADDRESS)?;

        if base == BASE::NOT_PRESENT {
            // No debug entries, useless AP
            return Ok(None);
        }

        if idr.0 == 0 {
            return Ok(None);
        }

        let csw = CSW(read_raw(dp, selector, CSW::ADDRESS)?);
        if csw.tr_in_prog() {
            tracing::warn!("AP {}: Transaction in progress. AP is not usable!", selector);
            return Ok(None);
        }

        let cfg = match read_raw(dp, selector, CFG::ADDRESS) {
            Ok(cfg) => CFG(cfg),
            Err(e) => {
                tracing::debug!("AP {}: reading CFG failed: {}", selector, e);
                CFG(0)
            }
        };

        tracing::info!(
            "AP {:3}: IDR={:08x} CFG={:08x} BASE={:08x} CSW={:08x} ({:?} var{:x} rev{:x})",
            selector,
            idr.0,
            cfg.0,
            base,
            csw.0,
            idr.ap_type(),
            idr.variant(),
            idr.revision()
        );

        let ap = Rc::new(Self {
            dp: dp.clone(),
            selector,
            idr,
            base,
            csw: csw.template(),
            large_data: cfg.ld(),
            designer_code: Cell::new(0),
            part_no: Cell::new(0),
            cortexm_demcr: Cell::new(0),
            refcnt: Cell::new(0),
        });

        ap.add_ref();
        Ok(Some(ap))
    }

    /// An access port standing in for one which cannot be probed, as on the
    /// RP2040 rescue debug port. All identification registers are zero.
    pub fn detached(dp: &Rc<DebugPort>) -> Rc<Self> {
        let ap = Rc::new(Self {
            dp: dp.clone(),
            selector: 0,
            idr: IDR(0),
            base: 0,
            csw: CSW(0),
            large_data: false,
            designer_code: Cell::new(0),
            part_no: Cell::new(0),
            cortexm_demcr: Cell::new(0),
            refcnt: Cell::new(0),
        });
        ap.add_ref();
        ap
    }

    /// The debug port this access port belongs to.
    pub fn dp(&self) -> &Rc<DebugPort> {
        &self.dp
    }

    /// APSEL of this access port.
    pub fn selector(&self) -> u8 {
        self.selector
    }

    /// IDR as read during probing.
    pub fn idr(&self) -> IDR {
        self.idr
    }

    /// BASE as read during probing.
    pub fn base(&self) -> u32 {
        self.base
    }

    /// CSW with SIZE and AddrInc cleared.
    pub fn csw(&self) -> CSW {
        self.csw
    }

    /// Whether CFG advertises the Large Data Extension, which allows 64 bit
    /// transfers in CSW.SIZE.
    pub fn has_large_data_extension(&self) -> bool {
        self.large_data
    }

    /// The bus behind this access port.
    pub fn ap_type(&self) -> Option<ApType> {
        self.idr.ap_type()
    }

    /// Designer of the top level ROM table, once discovery has seen it.
    pub fn designer_code(&self) -> u16 {
        self.designer_code.get()
    }

    /// Part number of the top level ROM table, once discovery has seen it.
    pub fn part_no(&self) -> u16 {
        self.part_no.get()
    }

    pub(crate) fn set_identity(&self, designer_code: u16, part_no: u16) {
        self.designer_code.set(designer_code);
        self.part_no.set(part_no);
    }

    /// DEMCR as found before discovery changed it.
    pub fn cortexm_demcr(&self) -> u32 {
        self.cortexm_demcr.get()
    }

    pub(crate) fn set_cortexm_demcr(&self, demcr: u32) {
        self.cortexm_demcr.set(demcr);
    }

    /// Current reference count.
    pub fn refcount(&self) -> usize {
        self.refcnt.get()
    }

    /// Take a reference, and one on the debug port if this is the first.
    pub fn add_ref(&self) {
        if self.refcnt.get() == 0 {
            self.dp.add_ref();
        }
        self.refcnt.set(self.refcnt.get() + 1);
    }

    /// Drop a reference. Dropping the last one also drops the reference on
    /// the debug port.
    ///
    /// Returns `true` if this was the last reference.
    pub fn unref(&self) -> bool {
        match self.refcnt.get() {
            0 => {
                tracing::warn!("AP {} unreferenced more often than referenced", self.selector);
                false
            }
            1 => {
                self.refcnt.set(0);
                self.dp.unref();
                true
            }
            n => {
                self.refcnt.set(n - 1);
                false
            }
        }
    }

    /// Read a register of this access port.
    pub fn read_register(&self, address: u8) -> Result<u32, AccessPortError> {
        read_raw(&self.dp, self.selector, address)
    }

    /// Write a register of this access port.
    pub fn write_register(&self, address: u8, value: u32) -> Result<(), AccessPortError> {
        self.dp
            .write_dp_register(Select::for_ap_register(self.selector, address))?;
        self.dp
            .write_register(PortAddress::Ap(address), value)
            .map_err(|e| AccessPortError::raw_write_error(address, e))
    }

    /// Read a typed register of this access port.
    pub fn read_ap_register<R: ApRegister>(&self) -> Result<R, AccessPortError> {
        self.dp
            .write_dp_register(Select::for_ap_register(self.selector, R::ADDRESS))?;
        let value = self
            .dp
            .read_register(PortAddress::Ap(R::ADDRESS))
            .map_err(AccessPortError::register_read_error::<R>)?;
        tracing::debug!("Read register    {}, value={:#010x}", R::NAME, value);
        Ok(R::from(value))
    }

    /// Write a typed register of this access port.
    pub fn write_ap_register<R: ApRegister>(&self, register: R) -> Result<(), AccessPortError> {
        tracing::debug!("Writing register {}, value={:x?}", R::NAME, register);
        self.dp
            .write_dp_register(Select::for_ap_register(self.selector, R::ADDRESS))?;
        self.dp
            .write_register(PortAddress::Ap(R::ADDRESS), register.into())
            .map_err(AccessPortError::register_write_error::<R>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::{MockAp, MockTransport};
    use pretty_assertions::assert_eq;

    fn dp_with(mock: &MockTransport) -> Rc<DebugPort> {
        DebugPort::new(Box::new(mock.clone()), 0)
    }

    #[test]
    fn csw_template_drops_size_and_increment() {
        let csw = CSW(0x2300_0052);

        assert_eq!(csw.template().0, 0x2300_0040);
        assert_eq!(
            csw.with_transfer(DataSize::U8, AddressIncrement::Single).0,
            0x2300_0050
        );
        assert_eq!(csw.size(), Some(DataSize::U32));
        assert_eq!(csw.addr_inc(), Some(AddressIncrement::Single));
    }

    #[test]
    fn new_ap_reads_identity() {
        let mock = MockTransport::new();
        mock.add_ap(0, MockAp::ahb(0xe00f_f003).with_csw(0x2300_0052));
        let dp = dp_with(&mock);

        let ap = AccessPort::new(&dp, 0).unwrap().expect("AP 0 is valid");

        assert_eq!(ap.base(), 0xe00f_f003);
        assert_eq!(ap.ap_type(), Some(ApType::AmbaAhb3));
        assert_eq!(ap.csw().0, 0x2300_0040);
        assert_eq!(ap.refcount(), 1);
        assert_eq!(dp.refcount(), 1);
    }

    #[test]
    fn base_all_ones_is_not_an_ap() {
        let mock = MockTransport::new();
        mock.add_ap(1, MockAp::ahb(0xffff_ffff));
        let dp = dp_with(&mock);

        assert!(AccessPort::new(&dp, 1).unwrap().is_none());
        assert_eq!(dp.refcount(), 0);
    }

    #[test]
    fn zero_idr_is_not_an_ap() {
        let mock = MockTransport::new();
        mock.add_ap(2, MockAp::ahb(0xe00f_f003).with_idr(0));
        let dp = dp_with(&mock);

        assert!(AccessPort::new(&dp, 2).unwrap().is_none());
    }

    #[test]
    fn transaction_in_progress_is_not_an_ap() {
        let mock = MockTransport::new();
        mock.add_ap(0, MockAp::ahb(0xe00f_f003).with_csw(0x0000_0080));
        let dp = dp_with(&mock);

        assert!(AccessPort::new(&dp, 0).unwrap().is_none());
        assert_eq!(dp.refcount(), 0);
    }

    #[test]
    fn ref_then_unref_restores_counts() {
        let mock = MockTransport::new();
        mock.add_ap(0, MockAp::ahb(0xe00f_f003));
        let dp = dp_with(&mock);
        dp.add_ref();

        let ap = AccessPort::new(&dp, 0).unwrap().unwrap();
        let dp_count = dp.refcount();

        ap.add_ref();
        assert_eq!(dp.refcount(), dp_count);
        assert!(!ap.unref());
        assert_eq!(ap.refcount(), 1);
        assert_eq!(dp.refcount(), dp_count);

        // The creation reference is the last one.
        assert!(ap.unref());
        assert_eq!(ap.refcount(), 0);
        assert_eq!(dp.refcount(), dp_count - 1);
        assert!(!dp.is_released());
    }

    #[test]
    fn last_ap_reference_releases_dp() {
        let mock = MockTransport::new();
        mock.add_ap(0, MockAp::ahb(0xe00f_f003));
        let dp = dp_with(&mock);

        let ap = AccessPort::new(&dp, 0).unwrap().unwrap();
        assert!(ap.unref());

        assert!(dp.is_released());
    }

    #[test]
    fn register_access_selects_ap_and_bank() {
        let mock = MockTransport::new();
        mock.add_ap(5, MockAp::ahb(0xe00f_f003));
        let dp = dp_with(&mock);
        let ap = AccessPort::new(&dp, 5).unwrap().unwrap();

        mock.clear_log();
        let idr: IDR = ap.read_ap_register().unwrap();

        assert_eq!(idr.ap_type(), Some(ApType::AmbaAhb3));
        assert_eq!(mock.last_select(), 0x0500_00f0);
    }
}
