//! CoreSight ROM table discovery.

use super::MemoryError;
use crate::architecture::arm::ap::AccessPort;
use crate::architecture::arm::component::{
    find_arm_component, ComponentArchitecture, ComponentClass,
};
use crate::architecture::arm::designer;
use crate::architecture::arm::sequences::TargetProbes;
use crate::config::AdiConfig;
use num_traits::FromPrimitive;
use std::collections::HashSet;
use std::rc::Rc;
use thiserror::Error;

/// An error to report any errors that are romtable discovery specific.
#[derive(Error, Debug)]
pub enum RomTableError {
    /// The component ID registers could not be read.
    #[error("Reading the component ID at 0x{address:08x} failed")]
    CSComponentIdentification {
        /// Base address of the component.
        address: u32,
        /// The failed access.
        #[source]
        source: MemoryError,
    },
    /// The peripheral ID registers could not be read.
    #[error("Reading the peripheral ID at 0x{address:08x} failed")]
    PeripheralIdentification {
        /// Base address of the component.
        address: u32,
        /// The failed access.
        #[source]
        source: MemoryError,
    },
}

const CIDR0_OFFSET: u32 = 0xff0;
const PIDR0_OFFSET: u32 = 0xfe0;
const PIDR4_OFFSET: u32 = 0xfd0;
const DEVTYPE_OFFSET: u32 = 0xfcc;
const DEVARCH_OFFSET: u32 = 0xfbc;

const CID_PREAMBLE: u32 = 0xb105_000d;
const CID_CLASS_MASK: u32 = 0x0000_f000;
const CID_CLASS_SHIFT: u32 = 12;

const DEVTYPE_MASK: u32 = 0xff;
const DEVARCH_PRESENT: u32 = 1 << 20;
const DEVARCH_ARCHID_MASK: u32 = 0xffff;

/// A ROM table has at most 960 entries before the identification registers.
const ROM_TABLE_MAX_ENTRIES: u32 = 960;

/// Used to probe for a protected SAMx5x device.
const SAMX5X_DSU_PART: u16 = 0xcd0;
const SAMX5X_DSU_CTRLSTAT: u32 = 0x4100_2100;
const SAMX5X_STATUSB_PROT: u32 = 1 << 16;

/// A raw ROM table entry.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
struct RomTableEntryRaw {
    /// Offset of the component from the ROM table base, two's complement.
    address_offset: u32,
    /// Whether a component is present behind the entry.
    entry_present: bool,
}

impl RomTableEntryRaw {
    /// Create a new RomTableEntryRaw from raw ROM table entry data in memory.
    fn new(raw: u32) -> Self {
        RomTableEntryRaw {
            address_offset: raw & 0xffff_f000,
            entry_present: raw & 1 == 1,
        }
    }

    /// Address of the component behind this entry in the table at `base_address`.
    fn component_address(&self, base_address: u32) -> u32 {
        base_address.wrapping_add(self.address_offset)
    }
}

/// Peripheral ID of a CoreSight component, PIDR7..PIDR0 packed into 64 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeripheralID(u64);

impl PeripheralID {
    const JEP106_USED: u64 = 1 << 19;

    /// Wrap the raw 64 bit value.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw 64 bit value.
    pub fn raw(&self) -> u64 {
        self.0
    }

    /// Designer code of the component, see [`designer`].
    ///
    /// Components without a JEP-106 code get their legacy ASCII code with
    /// [`designer::ASCII_CODE_FLAG`] set. Two codes known to be reported
    /// wrongly by STM32 parts are corrected.
    pub fn designer_code(&self) -> u16 {
        let identity = ((self.0 >> 12) & 0x7f) as u16;
        if self.0 & Self::JEP106_USED == 0 {
            return identity | designer::ASCII_CODE_FLAG;
        }

        let continuation = ((self.0 >> 32) & 0xf) as u16;
        let code = (continuation << 8) | identity;
        if code == designer::ERRATA_STM32WX || code == designer::ERRATA_CS {
            tracing::warn!("Patching designer code {:#05x} -> {:#05x}", code, designer::STM);
            return designer::STM;
        }
        code
    }

    /// Part number.
    pub fn part(&self) -> u16 {
        (self.0 & 0xfff) as u16
    }

    /// Major revision.
    pub fn revision(&self) -> u8 {
        ((self.0 >> 20) & 0xf) as u8
    }

    /// Size of the component in 4 KiB blocks.
    pub fn size(&self) -> u32 {
        1 << ((self.0 >> 36) & 0xf)
    }
}

/// Reassemble a 32 bit identification value from four registers which
/// each hold one byte in their low bits.
fn read_id(ap: &AccessPort, address: u32) -> Result<u32, MemoryError> {
    let mut data = [0u8; 16];
    ap.read(address, &mut data)?;
    Ok((0..4).fold(0, |id, i| id | (u32::from(data[4 * i]) << (8 * i))))
}

fn read_pidr(ap: &AccessPort, address: u32) -> Result<PeripheralID, MemoryError> {
    let high = read_id(ap, address + PIDR4_OFFSET)?;
    let low = read_id(ap, address + PIDR0_OFFSET)?;
    Ok(PeripheralID::from_raw((u64::from(high) << 32) | u64::from(low)))
}

/// A component still to be looked at.
#[derive(Debug, Clone, Copy)]
struct Frame {
    address: u32,
    depth: usize,
    entry: u32,
}

/// Walk the component tree below `address` and hand everything recognised to `targets`.
///
/// The walk is depth first in table order. Anything unreadable or not
/// looking like a CoreSight component ends the walk of its own subtree only,
/// nothing is reported back to the caller. Tables nested deeper than
/// [`AdiConfig::max_rom_table_depth`] are skipped, and every ROM table is
/// expanded at most once per walk.
#[tracing::instrument(skip(ap, config, targets), fields(ap = ap.selector()))]
pub fn component_probe(
    ap: &Rc<AccessPort>,
    address: u32,
    depth: usize,
    entry: u32,
    config: &AdiConfig,
    targets: &mut dyn TargetProbes,
) {
    let mut pending = vec![Frame {
        address,
        depth,
        entry,
    }];
    let mut expanded = HashSet::new();

    while let Some(frame) = pending.pop() {
        if frame.depth > config.max_rom_table_depth {
            tracing::warn!(
                "{:#010x}: ROM table nesting deeper than {}, skipped",
                frame.address,
                config.max_rom_table_depth
            );
            continue;
        }

        match probe_one(ap, frame, &mut expanded, targets) {
            Ok(children) => pending.extend(children.into_iter().rev()),
            Err(e) => {
                ap.dp().take_fault();
                tracing::warn!("{:indent$}{}", "", e, indent = frame.depth);
            }
        }
    }
}

/// Look at a single component, returning the entries of a ROM table.
fn probe_one(
    ap: &Rc<AccessPort>,
    frame: Frame,
    expanded: &mut HashSet<u32>,
    targets: &mut dyn TargetProbes,
) -> Result<Vec<Frame>, RomTableError> {
    let address = frame.address & 0xffff_f000;
    if address == 0 {
        // No ROM table on this AP
        return Ok(Vec::new());
    }
    let indent = frame.depth;

    let cidr = read_id(ap, address + CIDR0_OFFSET)
        .map_err(|source| RomTableError::CSComponentIdentification { address, source })?;

    if cidr & !CID_CLASS_MASK != CID_PREAMBLE {
        tracing::debug!(
            "{:indent$}{} {:#010x}: {:#010x} <- does not match preamble ({:#010x})",
            "",
            frame.entry,
            address,
            cidr,
            CID_PREAMBLE
        );
        return Ok(Vec::new());
    }

    let class_raw = (cidr & CID_CLASS_MASK) >> CID_CLASS_SHIFT;
    let class = ComponentClass::from_u32(class_raw);

    let pidr = read_pidr(ap, address)
        .map_err(|source| RomTableError::PeripheralIdentification { address, source })?;
    let designer_code = pidr.designer_code();
    let part_number = pidr.part();

    if class == Some(ComponentClass::RomTable) {
        if !expanded.insert(address) {
            tracing::warn!(
                "{:indent$}{} {:#010x}: ROM table already walked, skipped",
                "",
                frame.entry,
                address
            );
            return Ok(Vec::new());
        }

        if frame.depth == 0 {
            ap.set_identity(designer_code, part_number);

            if designer_code == designer::ATMEL
                && part_number == SAMX5X_DSU_PART
                && samx5x_protected(ap)
            {
                // Only a small memory region is accessible, walking on would fault.
                tracing::info!("Protected SAMx5x device found");
                if let Err(e) = targets.cortexm_probe(ap) {
                    tracing::warn!("Cortex-M probe failed: {:#}", e);
                }
                return Ok(Vec::new());
            }
        }

        tracing::info!(
            "{:indent$}ROM: Table BASE={:#010x} Manufacturer {:3x} ({}) Partno {:3x}",
            "",
            address,
            designer_code,
            designer::name(designer_code),
            part_number
        );

        let entries = read_rom_table(ap, address, indent);
        tracing::info!("{:indent$}ROM: Table END", "");

        return Ok(entries
            .into_iter()
            .map(|(index, entry)| Frame {
                address: entry.component_address(address),
                depth: frame.depth + 1,
                entry: index,
            })
            .collect());
    }

    if designer_code != designer::ARM {
        // Non ARM components are not supported
        tracing::warn!(
            "{:indent$}{:#010x}: {:#018x} Non ARM component ignored",
            "",
            address,
            pidr.raw()
        );
        return Ok(Vec::new());
    }

    let (dev_type, arch_id) = if class == Some(ComponentClass::DebugComponent) {
        read_device_type(ap, address)
    } else {
        (0, 0)
    };

    let Some(component) = find_arm_component(part_number, dev_type, arch_id) else {
        tracing::warn!(
            "{:indent$}{} {:#010x}: {:?} - Unknown (PIDR = {:#018x} DEVTYPE = {:#04x} ARCHID = {:#06x})",
            "",
            frame.entry,
            address,
            class,
            pidr.raw(),
            dev_type,
            arch_id
        );
        return Ok(Vec::new());
    };

    tracing::info!(
        "{:indent$}{} {:#010x}: {:?} - {} {} (PIDR = {:#018x} DEVTYPE = {:#04x} ARCHID = {:#06x})",
        "",
        frame.entry,
        address,
        class,
        component.kind,
        component.description,
        pidr.raw(),
        dev_type,
        arch_id
    );

    if component.class_mismatch(class) {
        tracing::warn!(
            "{:indent$}WARNING: {:?} !match expected {:?}",
            "",
            class,
            component.class
        );
    }

    let result = match component.arch {
        ComponentArchitecture::CortexM => targets.cortexm_probe(ap),
        ComponentArchitecture::CortexA => targets.cortexa_probe(ap, address),
        ComponentArchitecture::Unsupported => Ok(()),
    };
    if let Err(e) = result {
        tracing::warn!("{:?} probe failed: {:#}", component.arch, e);
    }

    Ok(Vec::new())
}

/// Read the entries of the ROM table at `address`, up to the terminating zero.
///
/// A fault ends the table early, entries read until then are kept.
fn read_rom_table(ap: &AccessPort, address: u32, indent: usize) -> Vec<(u32, RomTableEntryRaw)> {
    let mut entries = Vec::new();

    for index in 0..ROM_TABLE_MAX_ENTRIES {
        ap.dp().take_fault();

        let raw = match ap.read_word_32(address + index * 4) {
            Ok(raw) => raw,
            Err(e) => {
                ap.dp().take_fault();
                tracing::warn!("{:indent$}Fault reading ROM table entry {}: {}", "", index, e);
                break;
            }
        };

        if raw == 0 {
            break;
        }

        let entry = RomTableEntryRaw::new(raw);
        tracing::debug!("{:indent$}Parsed raw rom table entry: {:x?}", "", entry);

        if !entry.entry_present {
            tracing::info!("{:indent$}{} Entry {:#010x} -> Not present", "", index, raw);
            continue;
        }

        entries.push((index, entry));
    }

    entries
}

/// DEVTYPE and DEVARCH.ARCHID of a debug component, zero where not implemented.
fn read_device_type(ap: &AccessPort, address: u32) -> (u8, u16) {
    let dev_type = ap
        .read_word_32(address + DEVTYPE_OFFSET)
        .map(|devtype| (devtype & DEVTYPE_MASK) as u8)
        .unwrap_or_else(|e| {
            tracing::debug!("DEVTYPE not readable: {}", e);
            0
        });

    let arch_id = match ap.read_word_32(address + DEVARCH_OFFSET) {
        Ok(devarch) if devarch & DEVARCH_PRESENT != 0 => (devarch & DEVARCH_ARCHID_MASK) as u16,
        Ok(_) => 0,
        Err(e) => {
            tracing::debug!("DEVARCH not readable: {}", e);
            0
        }
    };

    ap.dp().take_fault();
    (dev_type, arch_id)
}

fn samx5x_protected(ap: &AccessPort) -> bool {
    match ap.read_word_32(SAMX5X_DSU_CTRLSTAT) {
        Ok(ctrlstat) => ctrlstat & SAMX5X_STATUSB_PROT != 0,
        Err(e) => {
            ap.dp().take_fault();
            tracing::debug!("Reading the DSU status failed: {}", e);
            false
        }
    }
}
