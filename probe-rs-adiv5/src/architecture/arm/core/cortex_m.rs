//! Halting a Cortex-M core before its components are probed.

use super::MemoryMappedRegister;
use crate::architecture::arm::ap::{AccessPort, AddressIncrement, DataSize, DRW, TAR};
use crate::architecture::arm::dp::{Ctrl, DebugPortError};
use crate::architecture::arm::memory::MemoryError;
use crate::architecture::arm::Register;
use crate::config::AdiConfig;
use crate::probe::{Deadline, Platform, PortAddress, TransferDirection};
use bitfield::bitfield;
use std::rc::Rc;

/// An error while preparing a Cortex-M core for discovery.
#[derive(Debug, thiserror::Error)]
pub enum HaltError {
    /// The core never reported being halted.
    #[error("The core did not halt within {0} ms")]
    HaltTimeout(u32),
    /// The core stayed in reset after nRST was released.
    #[error("The core did not leave reset")]
    ResetReleaseTimeout,
    /// Accessing the debug registers failed.
    #[error("Accessing the core debug registers failed")]
    Memory(#[from] MemoryError),
}

bitfield! {
    /// DHCSR, Debug Halting Control and Status Register.
    #[derive(Copy, Clone)]
    pub struct Dhcsr(u32);
    impl Debug;
    pub s_reset_st, _: 25;
    pub s_retire_st, _: 24;
    pub s_lockup, _: 19;
    pub s_sleep, _: 18;
    pub s_halt, _: 17;
    pub s_regrdy, _: 16;
    pub c_maskints, set_c_maskints: 3;
    pub c_step, set_c_step: 2;
    pub c_halt, set_c_halt: 1;
    pub c_debugen, set_c_debugen: 0;
}

impl Dhcsr {
    /// Bits which read as zero on every implementation. A value with any of
    /// them set is a stale or garbled transfer.
    const RESERVED: u32 = 0xf000_fff0;

    /// This function sets the bit to enable writes to this register.
    ///
    /// C1.6.3 Debug Halting Control and Status Register, DHCSR:
    /// Debug key:
    /// Software must write 0xA05F to this field to enable write accesses to bits
    /// [15:0], otherwise the processor ignores the write access.
    pub fn enable_write(&mut self) {
        self.0 &= !(0xffff << 16);
        self.0 |= 0xa05f << 16;
    }

    /// The value requesting a halt with debug enabled.
    pub fn halt_request() -> Self {
        let mut dhcsr = Dhcsr(0);
        dhcsr.enable_write();
        dhcsr.set_c_halt(true);
        dhcsr.set_c_debugen(true);
        dhcsr
    }

    /// Whether this can be a real DHCSR value.
    pub fn is_plausible(&self) -> bool {
        self.0 != 0xffff_ffff && self.0 & Self::RESERVED == 0
    }

    /// Halted, with debug enabled.
    pub fn is_halted(&self) -> bool {
        self.s_halt() && self.c_debugen()
    }
}

impl From<u32> for Dhcsr {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<Dhcsr> for u32 {
    fn from(value: Dhcsr) -> Self {
        value.0
    }
}

impl MemoryMappedRegister for Dhcsr {
    const ADDRESS: u32 = 0xE000_EDF0;
    const NAME: &'static str = "DHCSR";
}

bitfield! {
    /// DEMCR, Debug Exception and Monitor Control Register.
    #[derive(Copy, Clone)]
    pub struct Demcr(u32);
    impl Debug;
    /// Global enable for DWT and ITM features
    pub trcena, set_trcena: 24;
    /// DebugMonitor semaphore bit
    pub mon_req, set_mon_req: 19;
    /// Step the processor?
    pub mon_step, set_mon_step: 18;
    /// Sets or clears the pending state of the DebugMonitor exception
    pub mon_pend, set_mon_pend: 17;
    /// Enable the DebugMonitor exception
    pub mon_en, set_mon_en: 16;
    /// Enable halting debug trap on a HardFault exception
    pub vc_harderr, set_vc_harderr: 10;
    /// Enable halting debug trap on a fault occurring during exception entry
    /// or exception return
    pub vc_interr, set_vc_interr: 9;
    /// Enable halting debug trap on a BusFault exception
    pub vc_buserr, set_vc_buserr: 8;
    /// Enable halting debug trap on a UsageFault exception caused by a state
    /// information error, for example an Undefined Instruction exception
    pub vc_staterr, set_vc_staterr: 7;
    /// Enable halting debug trap on a UsageFault exception caused by a
    /// checking error, for example an alignment check error
    pub vc_chkerr, set_vc_chkerr: 6;
    /// Enable halting debug trap on a UsageFault caused by an access to a
    /// Coprocessor
    pub vc_nocperr, set_vc_nocperr: 5;
    /// Enable halting debug trap on a MemManage exception.
    pub vc_mmerr, set_vc_mmerr: 4;
    /// Enable Reset Vector Catch
    pub vc_corereset, set_vc_corereset: 0;
}

impl From<u32> for Demcr {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<Demcr> for u32 {
    fn from(value: Demcr) -> Self {
        value.0
    }
}

impl MemoryMappedRegister for Demcr {
    const ADDRESS: u32 = 0xE000_EDFC;
    const NAME: &'static str = "DEMCR";
}

/// First transfer count hint given to the probe while halting.
const TRNCNT_SEED: u16 = 0x80;
/// Widest value of CTRL/STAT.TRNCNT.
const TRNCNT_MAX: u16 = 0xfff;

/// The transfer count hint after `elapsed_ms` of trying to halt.
///
/// Probes which batch transfers use TRNCNT to size their bursts. The hint
/// grows by 8 per elapsed millisecond and saturates at the field width.
pub fn trncnt_step(trncnt: u16, elapsed_ms: u32) -> u16 {
    if trncnt >= TRNCNT_MAX {
        return TRNCNT_MAX;
    }
    let grown = u32::from(trncnt).saturating_add(elapsed_ms.saturating_mul(8));
    grown.min(u32::from(TRNCNT_MAX)) as u16
}

/// Point TAR at DHCSR for the raw polling loop.
fn setup_low_access(ap: &AccessPort) -> Result<(), MemoryError> {
    let csw = ap
        .csw()
        .with_transfer(DataSize::U32, AddressIncrement::Off);
    ap.write_ap_register(csw)?;
    ap.dp()
        .low_access(
            TransferDirection::Write,
            PortAddress::Ap(TAR::ADDRESS),
            Dhcsr::ADDRESS,
        )
        .map_err(|source| MemoryError::Transfer {
            address: Dhcsr::ADDRESS,
            source,
        })?;
    Ok(())
}

/// One halt request and DHCSR read, as raw transfers on a full debug port.
///
/// The read is posted, so the value returned belongs to the previous poll.
fn poll_low_access(ap: &AccessPort, ctrl: Ctrl, request: Dhcsr) -> Result<u32, MemoryError> {
    let dp = ap.dp();
    let transfer = |direction: TransferDirection, address: PortAddress, value: u32| {
        dp.low_access(direction, address, value)
            .map_err(|source: DebugPortError| MemoryError::Transfer {
                address: Dhcsr::ADDRESS,
                source,
            })
    };

    transfer(
        TransferDirection::Write,
        PortAddress::Dp(Ctrl::ADDRESS),
        ctrl.into(),
    )?;
    transfer(
        TransferDirection::Write,
        PortAddress::Ap(DRW::ADDRESS),
        request.into(),
    )?;
    transfer(TransferDirection::Read, PortAddress::Ap(DRW::ADDRESS), 0)
}

/// One halt request and DHCSR read through the memory interface.
fn poll_memory(ap: &AccessPort, request: Dhcsr) -> Result<u32, MemoryError> {
    ap.write_word_32(Dhcsr::ADDRESS, request.into())?;
    ap.read_word_32(Dhcsr::ADDRESS)
}

/// Keep asking the core behind `ap` to halt until it does.
///
/// Returns the DHCSR value that showed the core halted, or showed it in
/// reset when connecting under reset. Returns 0 if neither happened within
/// [`AdiConfig::halt_timeout_ms`].
///
/// The first time the core is seen in reset is not taken as an answer
/// unless connecting under reset, as reading DHCSR clears S_RESET_ST.
#[tracing::instrument(skip_all, fields(ap = ap.selector()))]
pub fn cortexm_initial_halt(
    ap: &Rc<AccessPort>,
    config: &AdiConfig,
    platform: &mut dyn Platform,
) -> u32 {
    let dp = ap.dp();

    let ctrl = dp.read_dp_register::<Ctrl>().unwrap_or_else(|e| {
        tracing::debug!("Reading CTRL/STAT failed: {}", e);
        dp.take_fault();
        Ctrl::default()
    });

    let deadline = Deadline::start(platform, config.halt_timeout_ms);
    let request = Dhcsr::halt_request();

    // Minimal debug ports have no TRNCNT, they take the regular path.
    let use_low_access = !dp.info().min_dp;
    if use_low_access {
        if let Err(e) = setup_low_access(ap) {
            tracing::debug!("Pointing TAR at DHCSR failed: {}", e);
            dp.take_fault();
        }
    }

    let mut trncnt = TRNCNT_SEED;
    let mut reset_seen = false;

    while !deadline.is_expired(platform) {
        let result = if use_low_access {
            let mut hint = ctrl;
            hint.set_trn_cnt(trncnt);
            let result = poll_low_access(ap, hint, request);
            trncnt = trncnt_step(trncnt, deadline.elapsed(platform));
            result
        } else {
            poll_memory(ap, request)
        };

        let dhcsr = match result {
            Ok(value) => Dhcsr(value),
            Err(e) => {
                // A WAIT or FAULT while the core is busy is expected, try again.
                tracing::trace!("Polling DHCSR failed: {}", e);
                dp.take_fault();
                continue;
            }
        };

        if !dhcsr.is_plausible() {
            continue;
        }

        if dhcsr.s_reset_st() && !reset_seen {
            if config.connect_under_reset {
                return dhcsr.0;
            }
            reset_seen = true;
            continue;
        }

        if dhcsr.is_halted() {
            tracing::debug!("Core halted, DHCSR = {:#010x}", dhcsr.0);
            return dhcsr.0;
        }
    }

    0
}

/// Halt the core behind `ap` and get it ready for probing.
///
/// After the halt the original DEMCR is kept in the access port, see
/// [`AccessPort::cortexm_demcr`], and vector catch on reset and hard faults
/// is enabled with trace. nRST is released and the core has to leave reset
/// within [`AdiConfig::halt_timeout_ms`].
#[tracing::instrument(skip_all, fields(ap = ap.selector()))]
pub fn cortexm_prepare(
    ap: &Rc<AccessPort>,
    config: &AdiConfig,
    platform: &mut dyn Platform,
) -> Result<(), HaltError> {
    let mut dhcsr = Dhcsr(cortexm_initial_halt(ap, config, platform));
    if dhcsr.0 == 0 {
        match ap.read_word_32(Dhcsr::ADDRESS) {
            Ok(current) => tracing::error!("Halt via DHCSR({:#010x}): failure", current),
            Err(e) => tracing::error!("Halt via DHCSR failed, DHCSR not readable: {}", e),
        }
        ap.dp().take_fault();
        return Err(HaltError::HaltTimeout(config.halt_timeout_ms));
    }

    // Leftovers from the polling loop.
    ap.dp().take_fault();

    ap.set_cortexm_demcr(ap.read_word_32(Demcr::ADDRESS)?);

    let mut demcr = Demcr(0);
    demcr.set_trcena(true);
    demcr.set_vc_harderr(true);
    demcr.set_vc_corereset(true);
    ap.write_word_32(Demcr::ADDRESS, demcr.into())?;

    platform.set_nrst(false);

    let deadline = Deadline::start(platform, config.halt_timeout_ms);
    while dhcsr.s_reset_st() && !deadline.is_expired(platform) {
        match ap.read_word_32(Dhcsr::ADDRESS) {
            Ok(value) => dhcsr = Dhcsr(value),
            Err(e) => {
                tracing::trace!("Reading DHCSR failed: {}", e);
                ap.dp().take_fault();
            }
        }
    }

    if dhcsr.s_reset_st() {
        tracing::error!("Error releasing from reset");
        return Err(HaltError::ResetReleaseTimeout);
    }

    Ok(())
}
