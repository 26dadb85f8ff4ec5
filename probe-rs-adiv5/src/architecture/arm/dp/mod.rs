//! The debug port: registers, identity and the shared handle every access
//! port refers to.

mod init;

pub use init::dp_init;

use super::communication_interface::impl_register;
use super::{designer, Register};
use crate::probe::{DapTransport, PortAddress, TransferDirection, TransportError};
use bitfield::bitfield;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

/// IDCODE of a JTAG-DP which predates DPIDR.
pub const JTAG_IDCODE_ARM_DPV0: u32 = 0x4ba0_0477;

/// An error in the communication with a debug port.
#[derive(thiserror::Error, Debug)]
pub enum DebugPortError {
    /// A transfer on the wire failed. The sticky fault of the port is set.
    #[error("Transfer of register {name} failed")]
    Transfer {
        /// The register which was accessed.
        name: &'static str,
        /// The error reported by the transport.
        #[source]
        source: TransportError,
    },
    /// The port was released and has no transport anymore.
    #[error("The debug port has already been released")]
    Released,
    /// DPIDR could not be read.
    #[error("The debug port is not responding")]
    NotResponding(#[source] TransportError),
    /// The power domains never acknowledged the power-up request.
    #[error("Debug power-up was not acknowledged within {0} ms")]
    PowerUpTimeout(u32),
}

impl DebugPortError {
    /// The transport error behind this error, if there is one.
    pub fn transport_error(&self) -> Option<TransportError> {
        match self {
            DebugPortError::Transfer { source, .. } | DebugPortError::NotResponding(source) => {
                Some(*source)
            }
            _ => None,
        }
    }
}

/// A register of the debug port.
pub trait DpRegister: Register {}

bitfield! {
    /// ABORT, write only.
    #[derive(Clone, Copy)]
    pub struct Abort(u32);
    impl Debug;
    pub _, set_orunerrclr: 4;
    pub _, set_wderrclr: 3;
    pub _, set_stkerrclr: 2;
    pub _, set_stkcmpclr: 1;
    pub _, set_dapabort: 0;
}

impl_register!(Abort, 0x0, "ABORT");
impl DpRegister for Abort {}

bitfield! {
    /// CTRL/STAT, the control and status register of the debug port.
    #[derive(Clone, Copy, Default)]
    pub struct Ctrl(u32);
    impl Debug;
    pub csyspwrupack, _: 31;
    pub csyspwrupreq, set_csyspwrupreq: 30;
    pub cdbgpwrupack, _: 29;
    pub cdbgpwrupreq, set_cdbgpwrupreq: 28;
    pub cdbgrstack, _: 27;
    pub cdbgrstreq, set_cdbgrstreq: 26;
    pub u16, trn_cnt, set_trn_cnt: 23, 12;
    pub u8, mask_lane, set_mask_lane: 11, 8;
    pub w_data_err, _ : 7;
    pub read_ok, _ : 6;
    pub sticky_err, _: 5;
    pub stick_cmp, _: 4;
    pub u8, trn_mode, _: 3, 2;
    pub sticky_orun, _: 1;
    pub orun_detect, set_orun_detect: 0;
}

impl Ctrl {
    /// Both power domains acknowledge their power-up request.
    pub fn powered_up(&self) -> bool {
        self.csyspwrupack() && self.cdbgpwrupack()
    }
}

impl_register!(Ctrl, 0x4, "CTRL/STAT");
impl DpRegister for Ctrl {}

bitfield! {
    /// SELECT, chooses the access port, its register bank and the DP register bank.
    #[derive(Clone, Copy, Default)]
    pub struct Select(u32);
    impl Debug;
    pub u8, ap_sel, set_ap_sel: 31, 24;
    pub u8, ap_bank_sel, set_ap_bank_sel: 7, 4;
    pub u8, dp_bank_sel, set_dp_bank_sel: 3, 0;
}

impl Select {
    /// SELECT value addressing `register` of access port `selector`.
    pub fn for_ap_register(selector: u8, register: u8) -> Self {
        let mut select = Select(0);
        select.set_ap_sel(selector);
        select.set_ap_bank_sel(register >> 4);
        select
    }

    /// SELECT value for DP register bank `bank`, access port 0.
    pub fn for_dp_bank(bank: u8) -> Self {
        let mut select = Select(0);
        select.set_dp_bank_sel(bank);
        select
    }
}

impl_register!(Select, 0x8, "SELECT");
impl DpRegister for Select {}

bitfield! {
    /// DPIDR, the identification register of the debug port.
    #[derive(Clone, Copy)]
    pub struct DPIDR(u32);
    impl Debug;
    pub u8, revision, _: 31, 28;
    pub u8, part_no, _: 27, 20;
    pub min, _: 16;
    pub u8, version, _: 15, 12;
    pub u16, designer, _: 11, 1;
    pub rao, _: 0;
}

impl_register!(DPIDR, 0x0, "DPIDR");
impl DpRegister for DPIDR {}

bitfield! {
    /// TARGETID, only available from DPv2 on, in DP register bank 2.
    #[derive(Clone, Copy)]
    pub struct TargetId(u32);
    impl Debug;
    pub u8, trevision, _: 31, 28;
    pub u16, tpartno, _: 27, 12;
    pub u16, tdesigner, _: 11, 1;
}

impl TargetId {
    /// Bits of TARGETID which are repeated in TARGETSEL.
    const SELECT_MASK: u32 = 0x0fff_fffe;

    /// The TARGETSEL value addressing this target as multi-drop `instance`.
    pub fn target_sel(&self, instance: u8) -> u32 {
        (u32::from(instance) << 28) | (self.0 & Self::SELECT_MASK) | 1
    }
}

impl_register!(TargetId, 0x4, "TARGETID");
impl DpRegister for TargetId {}

/// RDBUFF, holds the result of the last posted access port read.
#[derive(Debug, Clone, Copy)]
pub struct RdBuff(pub u32);

impl_register!(RdBuff, 0xc, "RDBUFF");
impl DpRegister for RdBuff {}

/// Architecture version of a debug port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum DebugPortVersion {
    /// JTAG-DP without DPIDR.
    #[default]
    DPv0,
    /// ADIv5.0.
    DPv1,
    /// ADIv5.2, adds TARGETID and multi-drop.
    DPv2,
    /// ADIv6.
    DPv3,
    /// A version this crate does not know about.
    Unsupported(u8),
}

impl From<u8> for DebugPortVersion {
    fn from(value: u8) -> Self {
        match value {
            0 => DebugPortVersion::DPv0,
            1 => DebugPortVersion::DPv1,
            2 => DebugPortVersion::DPv2,
            3 => DebugPortVersion::DPv3,
            v => DebugPortVersion::Unsupported(v),
        }
    }
}

impl DebugPortVersion {
    /// Whether the port has TARGETID in DP register bank 2.
    pub fn has_target_id(&self) -> bool {
        !matches!(self, DebugPortVersion::DPv0 | DebugPortVersion::DPv1)
    }
}

/// What is known about a debug port and the target behind it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebugPortInfo {
    /// Architecture version from DPIDR.
    pub version: DebugPortVersion,
    /// Designer of the debug port, see [`designer`](super::designer).
    pub designer_code: u16,
    /// Part number of the debug port.
    pub part_no: u8,
    /// The port implements the minimal debug port subset, without TRNCNT.
    pub min_dp: bool,
    /// Designer of the target, from TARGETID.
    pub target_designer_code: u16,
    /// Part number of the target, from TARGETID.
    pub target_part_no: u16,
    /// Value to write to TARGETSEL to address this target on a multi-drop bus.
    pub target_sel: u32,
}

impl DebugPortInfo {
    /// Decode DPIDR.
    ///
    /// A DPIDR without its read-as-one bit or without a designer is not
    /// trusted, and the port is treated as DPv0.
    pub fn from_dpidr(dpidr: DPIDR) -> Self {
        let version = DebugPortVersion::from(dpidr.version());
        let designer_code = designer::from_designer_field(dpidr.designer());

        if version == DebugPortVersion::DPv0 {
            tracing::warn!("DPv0 detected based on JTAG IDCODE");
            return Self::default();
        }

        if !dpidr.rao() || designer_code == 0 {
            tracing::warn!("Invalid DPIDR {:#010x}, assuming DP version 0", dpidr.0);
            return Self::default();
        }

        tracing::info!(
            "DP DPIDR {:#010x} ({:?}{} rev{}) designer {:#x} ({}) partno {:#x}",
            dpidr.0,
            version,
            if dpidr.min() { " MINDP" } else { "" },
            dpidr.revision(),
            designer_code,
            designer::name(designer_code),
            dpidr.part_no()
        );

        Self {
            version,
            designer_code,
            part_no: dpidr.part_no(),
            min_dp: dpidr.min(),
            ..Self::default()
        }
    }

    /// Add the target identity from TARGETID.
    pub fn with_target_id(self, target_id: TargetId, instance: u8) -> Self {
        let info = Self {
            target_designer_code: designer::from_designer_field(target_id.tdesigner()),
            target_part_no: target_id.tpartno(),
            target_sel: target_id.target_sel(instance),
            ..self
        };

        tracing::info!(
            "TARGETID {:#010x} designer {:#x} ({}) partno {:#x}",
            target_id.0,
            info.target_designer_code,
            designer::name(info.target_designer_code),
            info.target_part_no
        );

        info
    }
}

/// A debug port, shared by all access ports discovered behind it.
///
/// The port keeps its own reference count next to the `Rc` it lives in:
/// every access port that holds a reference counts as one, and the port is
/// released when the count drops back to zero. Releasing drops the transport,
/// afterwards every access fails with [`DebugPortError::Released`].
pub struct DebugPort {
    transport: RefCell<Option<Box<dyn DapTransport>>>,
    info: Cell<DebugPortInfo>,
    instance: u8,
    fault: Cell<Option<TransportError>>,
    refcnt: Cell<usize>,
}

impl fmt::Debug for DebugPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebugPort")
            .field("info", &self.info.get())
            .field("instance", &self.instance)
            .field("fault", &self.fault.get())
            .field("refcnt", &self.refcnt.get())
            .field("released", &self.is_released())
            .finish()
    }
}

impl DebugPort {
    /// Wrap a transport. The new port is not referenced by anything yet.
    pub fn new(transport: Box<dyn DapTransport>, instance: u8) -> Rc<Self> {
        Rc::new(Self {
            transport: RefCell::new(Some(transport)),
            info: Cell::new(DebugPortInfo::default()),
            instance,
            fault: Cell::new(None),
            refcnt: Cell::new(0),
        })
    }

    /// Identity of the port, valid after [`dp_init`] read it.
    pub fn info(&self) -> DebugPortInfo {
        self.info.get()
    }

    pub(crate) fn set_info(&self, info: DebugPortInfo) {
        self.info.set(info);
    }

    /// Multi-drop instance number.
    pub fn instance(&self) -> u8 {
        self.instance
    }

    /// Current reference count.
    pub fn refcount(&self) -> usize {
        self.refcnt.get()
    }

    /// Take a reference.
    pub fn add_ref(&self) {
        self.refcnt.set(self.refcnt.get() + 1);
    }

    /// Drop a reference, releasing the port when it was the last one.
    ///
    /// Returns `true` if the port got released.
    pub fn unref(&self) -> bool {
        match self.refcnt.get() {
            0 => {
                tracing::warn!("Debug port unreferenced more often than referenced");
                false
            }
            1 => {
                self.refcnt.set(0);
                self.release();
                true
            }
            n => {
                self.refcnt.set(n - 1);
                false
            }
        }
    }

    /// Drop the transport. Only the first call has an effect.
    pub(crate) fn release(&self) {
        if self.transport.borrow_mut().take().is_some() {
            tracing::debug!("Debug port released");
        }
    }

    /// Whether the port has been released.
    pub fn is_released(&self) -> bool {
        self.transport.borrow().is_none()
    }

    /// Returns and clears the sticky fault.
    pub fn take_fault(&self) -> Option<TransportError> {
        self.fault.take()
    }

    /// Whether a transfer failed since the sticky fault was last cleared.
    pub fn has_fault(&self) -> bool {
        self.fault.get().is_some()
    }

    fn with_transport<T>(
        &self,
        name: &'static str,
        f: impl FnOnce(&mut dyn DapTransport) -> Result<T, TransportError>,
    ) -> Result<T, DebugPortError> {
        let mut transport = self.transport.borrow_mut();
        let transport = transport.as_mut().ok_or(DebugPortError::Released)?;

        f(transport.as_mut()).map_err(|source| {
            tracing::debug!("Transfer of {} failed: {}", name, source);
            self.fault.set(Some(source));
            DebugPortError::Transfer { name, source }
        })
    }

    /// Read a register, DP or AP, and wait for its value.
    pub fn read_register(&self, address: PortAddress) -> Result<u32, DebugPortError> {
        let value = self.with_transport("register", |t| t.dp_read(address))?;
        tracing::trace!("Read {:x?} = {:#010x}", address, value);
        Ok(value)
    }

    /// Write a register, DP or AP.
    pub fn write_register(&self, address: PortAddress, value: u32) -> Result<(), DebugPortError> {
        tracing::trace!("Write {:x?} = {:#010x}", address, value);
        self.with_transport("register", |t| t.dp_write(address, value))
    }

    /// A single raw transfer, see [`DapTransport::low_access`].
    pub fn low_access(
        &self,
        direction: TransferDirection,
        address: PortAddress,
        value: u32,
    ) -> Result<u32, DebugPortError> {
        self.with_transport("raw transfer", |t| t.low_access(direction, address, value))
    }

    /// Write ABORT.
    pub fn abort(&self, abort: Abort) -> Result<(), DebugPortError> {
        self.with_transport(Abort::NAME, |t| t.dp_abort(abort.into()))
    }

    /// Read a debug port register.
    pub fn read_dp_register<R: DpRegister>(&self) -> Result<R, DebugPortError> {
        self.with_transport(R::NAME, |t| t.dp_read(PortAddress::Dp(R::ADDRESS)))
            .map(R::from)
    }

    /// Write a debug port register.
    pub fn write_dp_register<R: DpRegister>(&self, register: R) -> Result<(), DebugPortError> {
        tracing::trace!("Write {} = {:x?}", R::NAME, register);
        self.with_transport(R::NAME, |t| {
            t.dp_write(PortAddress::Dp(R::ADDRESS), register.into())
        })
    }
}
