//! # probe-rs-adiv5
//!
//! The transport-independent half of the ARM Debug Interface (ADIv5) as run
//! on a debug probe.
//!
//! This crate brings up a debug port, enumerates the access ports behind it,
//! moves bytes through a MEM-AP and walks the CoreSight ROM tables to hand
//! discovered cores over to architecture specific code. The wire level SWD or
//! JTAG framing is not part of this crate, it is provided by an implementation
//! of [`DapTransport`]. Timing and the reset line come from a [`Platform`],
//! and everything that turns a discovered component into a debuggable target
//! lives behind [`TargetProbes`].
//!
//! ```no_run
//! use probe_rs_adiv5::{
//!     architecture::arm::{dp_init, DebugPort, NoTargetProbes},
//!     AdiConfig, DapTransport, StdPlatform,
//! };
//!
//! # fn transport() -> Box<dyn DapTransport> { unimplemented!() }
//! let config = AdiConfig::default();
//! let mut platform = StdPlatform::new();
//! let mut targets = NoTargetProbes;
//!
//! let dp = DebugPort::new(transport(), 0);
//! dp_init(&dp, 0x2ba01477, &config, &mut platform, &mut targets)?;
//! # Ok::<(), probe_rs_adiv5::Error>(())
//! ```
#![warn(missing_docs)]

pub mod architecture;
pub mod config;
mod error;
pub mod probe;

#[cfg(test)]
pub(crate) mod test;

pub use crate::config::AdiConfig;
pub use crate::error::Error;
pub use crate::probe::{
    DapTransport, Deadline, Platform, PortAddress, StdPlatform, TransferDirection, TransportError,
};
