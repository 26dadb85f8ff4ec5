//! Debug port bring-up and access port enumeration.

use super::{
    Abort, Ctrl, DebugPort, DebugPortError, DebugPortInfo, Select, TargetId, DPIDR,
    JTAG_IDCODE_ARM_DPV0,
};
use crate::architecture::arm::ap::{AccessPort, ApType};
use crate::architecture::arm::core::cortex_m::cortexm_prepare;
use crate::architecture::arm::designer;
use crate::architecture::arm::memory::romtable::component_probe;
use crate::architecture::arm::sequences::{rescue_setup, TargetProbes};
use crate::config::AdiConfig;
use crate::probe::{Deadline, Platform, TransportError};
use std::rc::Rc;

/// Part number of the RP2040 rescue debug port.
const RP2040_RESCUE_PART: u8 = 0x2;

/// Enumeration gives up after this many invalid access ports in a row.
const MAX_INVALID_APS: usize = 8;

/// Bring up the debug port `dp` and hand everything found behind it to `targets`.
///
/// `idcode` is the IDCODE the scan chain reported for this port, or zero on
/// SWD. A JTAG-DP without DPIDR is recognised by it.
///
/// The port is powered up and given a debug reset. Then all access ports are
/// enumerated, each valid one has its components walked with
/// [`component_probe`]. When nothing keeps a reference to an access port,
/// the debug port is released before this returns.
///
/// Errors are only returned when the port itself is unusable, in which case
/// it has been released. Problems with individual access ports or components
/// are logged and skipped.
#[tracing::instrument(skip(dp, config, platform, targets))]
pub fn dp_init(
    dp: &Rc<DebugPort>,
    idcode: u32,
    config: &AdiConfig,
    platform: &mut dyn Platform,
    targets: &mut dyn TargetProbes,
) -> Result<(), DebugPortError> {
    let mut info = if idcode == JTAG_IDCODE_ARM_DPV0 {
        // DPIDR is not implemented on a DPv0.
        DebugPortInfo::default()
    } else {
        match dp.read_dp_register::<DPIDR>() {
            Ok(dpidr) => DebugPortInfo::from_dpidr(dpidr),
            Err(e) => {
                tracing::error!("Failed to read DPIDR: {}", e);
                dp.take_fault();
                dp.release();
                return Err(match e.transport_error() {
                    Some(source) => DebugPortError::NotResponding(source),
                    None => e,
                });
            }
        }
    };

    if info.version.has_target_id() {
        match read_target_id(dp) {
            Ok(target_id) => info = info.with_target_id(target_id, dp.instance()),
            Err(e) => {
                tracing::warn!("Failed to read TARGETID: {}", e);
                dp.take_fault();
            }
        }
    }
    dp.set_info(info);

    if info.designer_code == designer::RASPBERRY && info.part_no == RP2040_RESCUE_PART {
        rescue_setup(dp, targets);
        return Ok(());
    }

    let ctrl = match power_up(dp, config, platform) {
        Ok(ctrl) => ctrl,
        Err(e) => {
            tracing::error!("{}", e);
            dp.take_fault();
            dp.release();
            return Err(e);
        }
    };

    debug_reset(dp, ctrl, config, platform);

    enumerate(dp, config, platform, targets);
    Ok(())
}

/// Read TARGETID from DP register bank 2, leaving bank 0 selected.
fn read_target_id(dp: &DebugPort) -> Result<TargetId, DebugPortError> {
    dp.write_dp_register(Select::for_dp_bank(2))?;
    let target_id = dp.read_dp_register::<TargetId>();
    dp.write_dp_register(Select::for_dp_bank(0))?;
    target_id
}

/// Read CTRL/STAT, aborting a stuck transaction on a timeout.
fn read_ctrl(dp: &DebugPort) -> Result<Ctrl, DebugPortError> {
    match dp.read_dp_register::<Ctrl>() {
        Err(e) if e.transport_error() == Some(TransportError::Timeout) => {
            tracing::warn!("DP not responding! Trying abort sequence...");
            dp.take_fault();
            let mut abort = Abort(0);
            abort.set_dapabort(true);
            dp.abort(abort)?;
            dp.read_dp_register::<Ctrl>()
        }
        result => result,
    }
}

/// Request system and debug power and wait for both to be acknowledged.
///
/// Returns the CTRL/STAT value written for the request.
fn power_up(
    dp: &DebugPort,
    config: &AdiConfig,
    platform: &mut dyn Platform,
) -> Result<Ctrl, DebugPortError> {
    let mut ctrl = read_ctrl(dp).unwrap_or_else(|e| {
        tracing::warn!("Failed to read CTRL/STAT: {}", e);
        dp.take_fault();
        Ctrl::default()
    });

    let deadline = Deadline::start(platform, config.power_up_timeout_ms);
    ctrl.set_csyspwrupreq(true);
    ctrl.set_cdbgpwrupreq(true);
    if let Err(e) = dp.write_dp_register(ctrl) {
        // The polling below will tell if the request made it.
        tracing::debug!("Power-up request failed: {}", e);
        dp.take_fault();
    }

    loop {
        match dp.read_dp_register::<Ctrl>() {
            Ok(status) if status.powered_up() => return Ok(ctrl),
            Ok(_) => {}
            Err(e) => {
                tracing::debug!("Polling CTRL/STAT failed: {}", e);
                dp.take_fault();
            }
        }

        if deadline.is_expired(platform) {
            return Err(DebugPortError::PowerUpTimeout(config.power_up_timeout_ms));
        }
    }
}

/// Pulse the debug reset request. Targets without debug reset never
/// acknowledge, so a failure here is only logged.
fn debug_reset(dp: &DebugPort, mut ctrl: Ctrl, config: &AdiConfig, platform: &mut dyn Platform) {
    let deadline = Deadline::start(platform, config.power_up_timeout_ms);

    ctrl.set_cdbgrstreq(true);
    let request = dp.write_dp_register(ctrl);
    ctrl.set_cdbgrstreq(false);
    if let Err(e) = request.and_then(|_| dp.write_dp_register(ctrl)) {
        tracing::warn!("Debug reset request failed: {}", e);
        dp.take_fault();
        return;
    }

    // Some parts never raise CDBGRSTACK, so this gives up after the timeout.
    loop {
        platform.delay_ms(config.debug_reset_poll_ms);
        match dp.read_dp_register::<Ctrl>() {
            Ok(status) if status.cdbgrstack() => {
                tracing::debug!("Debug reset acknowledged");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!("Polling CTRL/STAT failed: {}", e);
                dp.take_fault();
            }
        }

        if deadline.is_expired(platform) {
            tracing::warn!("Debug reset was not acknowledged");
            return;
        }
    }
}

/// Walk all access port selectors and probe every valid access port.
fn enumerate(
    dp: &Rc<DebugPort>,
    config: &AdiConfig,
    platform: &mut dyn Platform,
    targets: &mut dyn TargetProbes,
) {
    // Keep the port alive while access ports come and go.
    dp.add_ref();

    let mut invalid_run = 0;
    let mut last_base = None;

    for selector in 0..=u8::MAX {
        let ap = AccessPort::new(dp, selector).unwrap_or_else(|e| {
            tracing::debug!("AP {}: {}", selector, e);
            dp.take_fault();
            None
        });

        let Some(ap) = ap else {
            invalid_run += 1;
            if invalid_run == MAX_INVALID_APS {
                break;
            }
            continue;
        };
        invalid_run = 0;

        // Some targets mirror a single AP on every selector.
        if last_base == Some(ap.base()) {
            tracing::debug!(
                "AP {}: BASE {:#010x} repeats the previous AP, stopping",
                selector,
                ap.base()
            );
            ap.unref();
            dp.unref();
            return;
        }
        last_base = Some(ap.base());

        probe_ap(&ap, config, platform, targets);
        ap.unref();
    }

    if !config.connect_under_reset {
        targets.resume_targets();
    }
    dp.unref();
}

fn probe_ap(
    ap: &Rc<AccessPort>,
    config: &AdiConfig,
    platform: &mut dyn Platform,
    targets: &mut dyn TargetProbes,
) {
    if let Err(e) = targets.kinetis_mdm_probe(ap) {
        tracing::warn!("Kinetis MDM probe failed: {:#}", e);
    }
    if let Err(e) = targets.nrf51_mdm_probe(ap) {
        tracing::warn!("nRF51 MDM probe failed: {:#}", e);
    }
    if let Err(e) = targets.efm32_aap_probe(ap) {
        tracing::warn!("EFM32 AAP probe failed: {:#}", e);
    }

    // Halt the device and release it from reset, in case reset is active.
    if ap.selector() == 0 && ap.ap_type() == Some(ApType::AmbaAhb3) {
        if let Err(e) = cortexm_prepare(ap, config, platform) {
            tracing::warn!("Preparing the Cortex-M on AP 0 failed: {}", e);
        }
    }

    component_probe(ap, ap.base(), 0, 0, config, targets);
}
