//! All the interface bits for ARM debug ports and CoreSight discovery.

pub mod ap;
pub(crate) mod communication_interface;
pub mod component;
pub mod core;
pub mod designer;
pub mod dp;
pub mod memory;
pub mod sequences;

pub use self::ap::{AccessPort, AccessPortError};
pub use self::communication_interface::Register;
pub use self::component::{ComponentArchitecture, ComponentClass};
pub use self::core::cortex_m::{cortexm_initial_halt, cortexm_prepare};
pub use self::dp::{dp_init, DebugPort, DebugPortError, DebugPortInfo};
pub use self::memory::romtable::component_probe;
pub use self::memory::{Alignment, MemoryError};
pub use self::sequences::{NoTargetProbes, TargetProbes};
