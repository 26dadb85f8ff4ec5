//! Core specific parts of discovery.

pub mod cortex_m;

/// A register of a core, mapped into the memory space behind a MEM-AP.
pub trait MemoryMappedRegister: Clone + From<u32> + Into<u32> + Sized + std::fmt::Debug {
    /// The register's address in the target memory.
    const ADDRESS: u32;
    /// The register's name.
    const NAME: &'static str;
}
