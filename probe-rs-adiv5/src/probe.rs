//! The seams towards the probe hardware.
//!
//! Everything in here is implemented outside of this crate by whatever drives
//! the SWD or JTAG pins: raw DP/AP transfers, a millisecond clock and the
//! target reset line.

use std::time::{Duration, Instant};

/// Address of a register on the debug port or on the currently selected access port.
///
/// For access port registers only bits `[3:2]` go out on the wire, the bank is
/// taken from `SELECT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortAddress {
    /// A register of the debug port itself.
    Dp(u8),
    /// A register of the access port selected in `SELECT`.
    Ap(u8),
}

impl PortAddress {
    /// The register address as it is used on the wire.
    pub fn address(&self) -> u8 {
        match self {
            PortAddress::Dp(address) | PortAddress::Ap(address) => *address,
        }
    }

    /// Returns `true` for access port registers.
    pub fn is_ap(&self) -> bool {
        matches!(self, PortAddress::Ap(_))
    }
}

/// Direction of a single raw transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    /// Read from the target.
    Read,
    /// Write to the target.
    Write,
}

/// Errors reported by a [`DapTransport`].
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// The target answered with a FAULT acknowledge.
    #[error("The target responded with a FAULT acknowledge")]
    Fault,
    /// The target kept answering WAIT, or did not answer at all.
    #[error("The transfer timed out")]
    Timeout,
    /// The read data did not match its parity bit.
    #[error("Parity error in the data read from the target")]
    Parity,
    /// The acknowledge was not one of OK, WAIT or FAULT.
    #[error("Invalid acknowledge 0x{0:x} received")]
    InvalidAck(u8),
}

/// Raw register access on a debug port.
///
/// This mirrors the lowest layer of the wire protocol. An implementation is
/// handed over to a [`DebugPort`](crate::architecture::arm::DebugPort),
/// which owns it until the debug port is released.
pub trait DapTransport {
    /// Issue exactly one transfer on the wire.
    ///
    /// Reads of access port registers are posted: the returned value belongs
    /// to the previous access port read, the value of this one has to be
    /// fetched through `RDBUFF` or the next posted read.
    fn low_access(
        &mut self,
        direction: TransferDirection,
        address: PortAddress,
        value: u32,
    ) -> Result<u32, TransportError>;

    /// Read a register and return its value, hiding the posted read behaviour
    /// of access port registers.
    fn dp_read(&mut self, address: PortAddress) -> Result<u32, TransportError>;

    /// Write a register.
    fn dp_write(&mut self, address: PortAddress, value: u32) -> Result<(), TransportError>;

    /// Write the `ABORT` register.
    fn dp_abort(&mut self, abort: u32) -> Result<(), TransportError>;
}

/// Timing and reset line services of the probe.
pub trait Platform {
    /// A free running millisecond counter. Wrapping is allowed.
    fn time_ms(&self) -> u32;

    /// Block for the given amount of milliseconds.
    fn delay_ms(&mut self, ms: u32);

    /// Drive the target nRST line. `true` asserts reset.
    fn set_nrst(&mut self, asserted: bool);
}

/// A bounded wait, measured on the [`Platform`] clock.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: u32,
    period: u32,
}

impl Deadline {
    /// Start a deadline which expires `period_ms` from now.
    pub fn start(platform: &dyn Platform, period_ms: u32) -> Self {
        Self {
            start: platform.time_ms(),
            period: period_ms,
        }
    }

    /// Milliseconds passed since the deadline was started.
    pub fn elapsed(&self, platform: &dyn Platform) -> u32 {
        platform.time_ms().wrapping_sub(self.start)
    }

    /// Returns `true` once more than the period has passed.
    pub fn is_expired(&self, platform: &dyn Platform) -> bool {
        self.elapsed(platform) > self.period
    }
}

/// A [`Platform`] for probes hosted on a regular operating system.
///
/// There is no reset line to drive, requests to change it are only logged.
#[derive(Debug)]
pub struct StdPlatform {
    epoch: Instant,
    nrst: bool,
}

impl StdPlatform {
    /// Create a new platform, with the clock starting at zero.
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            nrst: false,
        }
    }

    /// The last requested state of nRST.
    pub fn nrst(&self) -> bool {
        self.nrst
    }
}

impl Default for StdPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for StdPlatform {
    fn time_ms(&self) -> u32 {
        // Truncation gives the wrapping millisecond counter.
        self.epoch.elapsed().as_millis() as u32
    }

    fn delay_ms(&mut self, ms: u32) {
        std::thread::sleep(Duration::from_millis(u64::from(ms)));
    }

    fn set_nrst(&mut self, asserted: bool) {
        tracing::debug!("nRST {}", if asserted { "asserted" } else { "released" });
        self.nrst = asserted;
    }
}
