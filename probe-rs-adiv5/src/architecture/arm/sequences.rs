//! Hooks into the architecture and vendor specific code which turns
//! discovered access ports into debuggable targets.

use super::ap::AccessPort;
use super::dp::DebugPort;
use std::rc::Rc;

/// The receiving end of debug port discovery.
///
/// Discovery only lends out the access ports it hands to these hooks. An
/// implementation which keeps one around has to call
/// [`AccessPort::add_ref`] and later [`AccessPort::unref`] on it.
///
/// Errors returned from a hook are logged and discovery carries on.
pub trait TargetProbes {
    /// A Cortex-M system control space was found behind `ap`.
    fn cortexm_probe(&mut self, ap: &Rc<AccessPort>) -> anyhow::Result<()>;

    /// A Cortex-A debug unit was found behind `ap` at `debug_base`.
    ///
    /// The debug registers of a Cortex-A are not at a fixed address, so the
    /// component address is passed along.
    fn cortexa_probe(&mut self, ap: &Rc<AccessPort>, debug_base: u32) -> anyhow::Result<()>;

    /// The debug port is the RP2040 rescue debug port, which has no real
    /// access ports. `ap` is a [detached](AccessPort::detached) stand-in.
    fn rescue_probe(&mut self, ap: &Rc<AccessPort>) -> anyhow::Result<()> {
        tracing::info!(
            "No handler for the rescue debug port {:#x}",
            ap.dp().info().designer_code
        );
        Ok(())
    }

    /// Called for every valid access port, before the core is halted.
    fn kinetis_mdm_probe(&mut self, _ap: &Rc<AccessPort>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called for every valid access port, before the core is halted.
    fn nrf51_mdm_probe(&mut self, _ap: &Rc<AccessPort>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called for every valid access port, before the core is halted.
    fn efm32_aap_probe(&mut self, _ap: &Rc<AccessPort>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Discovery is done, let the cores halted for it run again.
    fn resume_targets(&mut self) {}
}

/// Discovery without anything to hand the results to.
///
/// Useful to enumerate a debug port and look at the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTargetProbes;

impl TargetProbes for NoTargetProbes {
    fn cortexm_probe(&mut self, ap: &Rc<AccessPort>) -> anyhow::Result<()> {
        tracing::info!("Cortex-M found on AP {}", ap.selector());
        Ok(())
    }

    fn cortexa_probe(&mut self, ap: &Rc<AccessPort>, debug_base: u32) -> anyhow::Result<()> {
        tracing::info!(
            "Cortex-A found on AP {} at {:#010x}",
            ap.selector(),
            debug_base
        );
        Ok(())
    }
}

/// Hand a debug port without access ports to the rescue hook.
pub(crate) fn rescue_setup(dp: &Rc<DebugPort>, targets: &mut dyn TargetProbes) {
    let ap = AccessPort::detached(dp);
    if let Err(e) = targets.rescue_probe(&ap) {
        tracing::warn!("Rescue probe failed: {:#}", e);
    }
    ap.unref();
}
