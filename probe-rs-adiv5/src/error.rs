use crate::architecture::arm::{
    ap::AccessPortError, core::cortex_m::HaltError, dp::DebugPortError, memory::MemoryError,
    memory::romtable::RomTableError,
};
use crate::probe::TransportError;
use thiserror::Error;

/// The overarching error type which contains all possible errors as variants.
#[derive(Error, Debug)]
pub enum Error {
    /// The transport below the debug port reported an error.
    #[error("An error with the transport to the target occured")]
    Transport(#[from] TransportError),
    /// An error specific to the debug port.
    #[error("A debug port error occured")]
    DebugPort(#[from] DebugPortError),
    /// An error specific to an access port.
    #[error("An access port error occured")]
    AccessPort(#[from] AccessPortError),
    /// A memory transfer through a MEM-AP failed.
    #[error("A memory access error occured")]
    Memory(#[from] MemoryError),
    /// ROM table discovery failed.
    #[error("An error occured while reading a ROM table")]
    RomTable(#[from] RomTableError),
    /// The core could not be halted.
    #[error("The core could not be halted")]
    Halt(#[from] HaltError),
    /// Any other error occurred.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
