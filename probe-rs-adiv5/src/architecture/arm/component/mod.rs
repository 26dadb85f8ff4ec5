//! Identification of CoreSight components found during ROM table discovery.

use enum_primitive_derive::Primitive;
use ComponentArchitecture::{CortexA, CortexM, Unsupported};
use ComponentClass::{DebugComponent, GenericIp};

/// Class of a CoreSight component, from bits `[15:12]` of the component ID.
#[derive(Debug, Primitive, Clone, Copy, PartialEq, Eq)]
pub enum ComponentClass {
    /// Generic verification component.
    GenericVerificationComponent = 0x0,
    /// ROM table.
    RomTable = 0x1,
    /// CoreSight debug component.
    DebugComponent = 0x9,
    /// Peripheral test block.
    PeripheralTestBlock = 0xb,
    /// Data engine or processor.
    DataEngine = 0xd,
    /// Generic IP component, e.g. a Cortex-M system control space.
    GenericIp = 0xe,
    /// CoreLink, PrimeCell or system component.
    SystemComponent = 0xf,
}

/// What the rest of the debugger should do with a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentArchitecture {
    /// Hand the access port to the Cortex-M probe.
    CortexM,
    /// Hand the access port and component address to the Cortex-A probe.
    CortexA,
    /// Known, but nothing to do.
    Unsupported,
}

/// A known ARM designed component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArmComponent {
    /// Part number from the peripheral ID.
    pub part_number: u16,
    /// DEVTYPE, zero if the component does not implement it.
    pub dev_type: u8,
    /// DEVARCH.ARCHID, zero if the component does not implement it.
    pub arch_id: u16,
    /// What to do with the component.
    pub arch: ComponentArchitecture,
    /// The class the component is expected to report, if known.
    pub class: Option<ComponentClass>,
    /// Short name.
    pub kind: &'static str,
    /// Longer description.
    pub description: &'static str,
}

impl ArmComponent {
    const fn new(
        part_number: u16,
        dev_type: u8,
        arch_id: u16,
        arch: ComponentArchitecture,
        class: Option<ComponentClass>,
        kind: &'static str,
        description: &'static str,
    ) -> Self {
        Self {
            part_number,
            dev_type,
            arch_id,
            arch,
            class,
            kind,
            description,
        }
    }

    /// Whether a component of `class` contradicts the expected class.
    pub fn class_mismatch(&self, class: Option<ComponentClass>) -> bool {
        matches!(self.class, Some(expected) if Some(expected) != class)
    }
}

/// Known ARM components, adopted from OpenOCD and pyOCD.
///
/// Lookups scan the table in order and take the first entry matching part
/// number, device type and architecture id.
pub static ARM_COMPONENTS: &[ArmComponent] = &[
    ArmComponent::new(0x000, 0x00, 0, CortexM, Some(GenericIp), "Cortex-M3 SCS", "System Control Space"),
    ArmComponent::new(0x001, 0x00, 0, Unsupported, None, "Cortex-M3 ITM", "Instrumentation Trace Module"),
    ArmComponent::new(0x002, 0x00, 0, Unsupported, None, "Cortex-M3 DWT", "Data Watchpoint and Trace"),
    ArmComponent::new(0x003, 0x00, 0, Unsupported, None, "Cortex-M3 FBP", "Flash Patch and Breakpoint"),
    ArmComponent::new(0x008, 0x00, 0, CortexM, Some(GenericIp), "Cortex-M0 SCS", "System Control Space"),
    ArmComponent::new(0x00a, 0x00, 0, Unsupported, None, "Cortex-M0 DWT", "Data Watchpoint and Trace"),
    ArmComponent::new(0x00b, 0x00, 0, Unsupported, None, "Cortex-M0 BPU", "Breakpoint Unit"),
    ArmComponent::new(0x00c, 0x00, 0, CortexM, Some(GenericIp), "Cortex-M4 SCS", "System Control Space"),
    ArmComponent::new(0x00d, 0x00, 0, Unsupported, None, "CoreSight ETM11", "Embedded Trace"),
    ArmComponent::new(0x00e, 0x00, 0, Unsupported, None, "Cortex-M7 FBP", "Flash Patch and Breakpoint"),
    ArmComponent::new(0x101, 0x00, 0, Unsupported, None, "System TSGEN", "Time Stamp Generator"),
    ArmComponent::new(0x471, 0x00, 0, Unsupported, None, "Cortex-M0  ROM", "Cortex-M0 ROM"),
    ArmComponent::new(0x490, 0x00, 0, Unsupported, None, "Cortex-A15 GIC", "Generic Interrupt Controller"),
    ArmComponent::new(0x4c0, 0x00, 0, Unsupported, None, "Cortex-M0+ ROM", "Cortex-M0+ ROM"),
    ArmComponent::new(0x4c3, 0x00, 0, Unsupported, None, "Cortex-M3 ROM", "Cortex-M3 ROM"),
    ArmComponent::new(0x4c4, 0x00, 0, Unsupported, None, "Cortex-M4 ROM", "Cortex-M4 ROM"),
    ArmComponent::new(0x4c7, 0x00, 0, Unsupported, None, "Cortex-M7 PPB", "Cortex-M7 Private Peripheral Bus ROM Table"),
    ArmComponent::new(0x4c8, 0x00, 0, Unsupported, None, "Cortex-M7 ROM", "Cortex-M7 ROM"),
    ArmComponent::new(0x906, 0x14, 0, Unsupported, None, "CoreSight CTI", "Cross Trigger"),
    ArmComponent::new(0x907, 0x21, 0, Unsupported, None, "CoreSight ETB", "Trace Buffer"),
    ArmComponent::new(0x908, 0x12, 0, Unsupported, None, "CoreSight CSTF", "Trace Funnel"),
    ArmComponent::new(0x910, 0x00, 0, Unsupported, None, "CoreSight ETM9", "Embedded Trace"),
    ArmComponent::new(0x912, 0x11, 0, Unsupported, None, "CoreSight TPIU", "Trace Port Interface Unit"),
    ArmComponent::new(0x913, 0x00, 0, Unsupported, None, "CoreSight ITM", "Instrumentation Trace Macrocell"),
    ArmComponent::new(0x914, 0x11, 0, Unsupported, None, "CoreSight SWO", "Single Wire Output"),
    ArmComponent::new(0x917, 0x00, 0, Unsupported, None, "CoreSight HTM", "AHB Trace Macrocell"),
    ArmComponent::new(0x920, 0x00, 0, Unsupported, None, "CoreSight ETM11", "Embedded Trace"),
    ArmComponent::new(0x921, 0x00, 0, Unsupported, None, "Cortex-A8 ETM", "Embedded Trace"),
    ArmComponent::new(0x922, 0x00, 0, Unsupported, None, "Cortex-A8 CTI", "Cross Trigger"),
    ArmComponent::new(0x923, 0x11, 0, Unsupported, None, "Cortex-M3 TPIU", "Trace Port Interface Unit"),
    ArmComponent::new(0x924, 0x13, 0, Unsupported, None, "Cortex-M3 ETM", "Embedded Trace"),
    ArmComponent::new(0x925, 0x13, 0, Unsupported, None, "Cortex-M4 ETM", "Embedded Trace"),
    ArmComponent::new(0x930, 0x00, 0, Unsupported, None, "Cortex-R4 ETM", "Embedded Trace"),
    ArmComponent::new(0x932, 0x31, 0x0a31, Unsupported, None, "CoreSight MTB-M0+", "Simple Execution Trace"),
    ArmComponent::new(0x941, 0x00, 0, Unsupported, None, "CoreSight TPIU-Lite", "Trace Port Interface Unit"),
    ArmComponent::new(0x950, 0x00, 0, Unsupported, None, "CoreSight Component", "unidentified Cortex-A9 component"),
    ArmComponent::new(0x955, 0x00, 0, Unsupported, None, "CoreSight Component", "unidentified Cortex-A5 component"),
    ArmComponent::new(0x956, 0x13, 0, Unsupported, None, "Cortex-A7 ETM", "Embedded Trace"),
    ArmComponent::new(0x95f, 0x00, 0, Unsupported, None, "Cortex-A15 PTM", "Program Trace Macrocell"),
    ArmComponent::new(0x961, 0x32, 0, Unsupported, None, "CoreSight TMC", "Trace Memory Controller"),
    ArmComponent::new(0x962, 0x00, 0, Unsupported, None, "CoreSight STM", "System Trace Macrocell"),
    ArmComponent::new(0x963, 0x63, 0x0a63, Unsupported, None, "CoreSight STM", "System Trace Macrocell"),
    ArmComponent::new(0x975, 0x13, 0x4a13, Unsupported, None, "Cortex-M7 ETM", "Embedded Trace"),
    ArmComponent::new(0x9a0, 0x00, 0, Unsupported, None, "CoreSight PMU", "Performance Monitoring Unit"),
    ArmComponent::new(0x9a1, 0x11, 0, Unsupported, None, "Cortex-M4 TPIU", "Trace Port Interface Unit"),
    ArmComponent::new(0x9a6, 0x14, 0x1a14, Unsupported, Some(DebugComponent), "Cortex-M0+ CTI", "Cross Trigger Interface"),
    ArmComponent::new(0x9a9, 0x11, 0, Unsupported, None, "Cortex-M7 TPIU", "Trace Port Interface Unit"),
    ArmComponent::new(0x9a5, 0x00, 0, Unsupported, None, "Cortex-A5 ETM", "Embedded Trace"),
    ArmComponent::new(0x9a7, 0x16, 0, Unsupported, None, "Cortex-A7 PMU", "Performance Monitor Unit"),
    ArmComponent::new(0x9af, 0x00, 0, Unsupported, None, "Cortex-A15 PMU", "Performance Monitor Unit"),
    ArmComponent::new(0xc05, 0x00, 0, CortexA, Some(DebugComponent), "Cortex-A5 Debug", "Debug Unit"),
    ArmComponent::new(0xc07, 0x15, 0, CortexA, Some(DebugComponent), "Cortex-A7 Debug", "Debug Unit"),
    ArmComponent::new(0xc08, 0x00, 0, CortexA, Some(DebugComponent), "Cortex-A8 Debug", "Debug Unit"),
    ArmComponent::new(0xc09, 0x00, 0, CortexA, Some(DebugComponent), "Cortex-A9 Debug", "Debug Unit"),
    ArmComponent::new(0xc0f, 0x00, 0, Unsupported, None, "Cortex-A15 Debug", "Debug Unit"),
    ArmComponent::new(0xc14, 0x00, 0, Unsupported, None, "Cortex-R4 Debug", "Debug Unit"),
    ArmComponent::new(0xcd0, 0x00, 0, Unsupported, None, "Atmel DSU", "Device Service Unit"),
    ArmComponent::new(0xd20, 0x00, 0x2a04, CortexM, Some(DebugComponent), "Cortex-M23", "System Control Space"),
    ArmComponent::new(0xd20, 0x11, 0, Unsupported, Some(DebugComponent), "Cortex-M23", "Trace Port Interface Unit"),
    ArmComponent::new(0xd20, 0x13, 0, Unsupported, Some(DebugComponent), "Cortex-M23", "Embedded Trace"),
    ArmComponent::new(0xd20, 0x31, 0x0a31, Unsupported, Some(DebugComponent), "Cortex-M23", "Micro Trace Buffer"),
    ArmComponent::new(0xd20, 0x00, 0x1a02, Unsupported, Some(DebugComponent), "Cortex-M23", "Data Watchpoint and Trace"),
    ArmComponent::new(0xd20, 0x00, 0x1a03, Unsupported, Some(DebugComponent), "Cortex-M23", "Breakpoint Unit"),
    ArmComponent::new(0xd20, 0x14, 0x1a14, Unsupported, Some(DebugComponent), "Cortex-M23", "Cross Trigger"),
    ArmComponent::new(0xd21, 0x00, 0x2a04, CortexM, Some(DebugComponent), "Cortex-M33", "System Control Space"),
    ArmComponent::new(0xd21, 0x31, 0x0a31, Unsupported, Some(DebugComponent), "Cortex-M33", "Micro Trace Buffer"),
    ArmComponent::new(0xd21, 0x43, 0x1a01, Unsupported, Some(DebugComponent), "Cortex-M33", "Instrumentation Trace Macrocell"),
    ArmComponent::new(0xd21, 0x00, 0x1a02, Unsupported, Some(DebugComponent), "Cortex-M33", "Data Watchpoint and Trace"),
    ArmComponent::new(0xd21, 0x00, 0x1a03, Unsupported, Some(DebugComponent), "Cortex-M33", "Breakpoint Unit"),
    ArmComponent::new(0xd21, 0x14, 0x1a14, Unsupported, Some(DebugComponent), "Cortex-M33", "Cross Trigger"),
    ArmComponent::new(0xd21, 0x13, 0x4a13, Unsupported, Some(DebugComponent), "Cortex-M33", "Embedded Trace"),
    ArmComponent::new(0xd21, 0x11, 0, Unsupported, Some(DebugComponent), "Cortex-M33", "Trace Port Interface Unit"),
];

/// Find a component by part number, DEVTYPE and DEVARCH.ARCHID.
pub fn find_arm_component(part_number: u16, dev_type: u8, arch_id: u16) -> Option<&'static ArmComponent> {
    ARM_COMPONENTS.iter().find(|component| {
        component.part_number == part_number
            && component.dev_type == dev_type
            && component.arch_id == arch_id
    })
}
