//! Mocks of the probe side, for unit tests.
//!
//! [`MockTransport`] emulates a debug port with a set of MEM-APs in front of
//! a sparse, byte addressed memory. AP reads through [`DapTransport::low_access`]
//! are posted like on the wire, TAR auto-increments within 1 KiB and narrow
//! transfers use the byte lanes of the address.

use crate::architecture::arm::ap::AccessPort;
use crate::architecture::arm::component::ComponentClass;
use crate::architecture::arm::sequences::TargetProbes;
use crate::probe::{DapTransport, Platform, PortAddress, TransferDirection, TransportError};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::rc::Rc;

/// Value of the byte lanes a narrow read does not drive.
const UNDRIVEN_LANE: u8 = 0xa5;

/// One access the mock saw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transfer {
    /// A debug port register read.
    DpRead(u8),
    /// A debug port register write.
    DpWrite(u8, u32),
    /// An access port register read, with the bank from SELECT applied.
    ApRead { ap: u8, address: u8 },
    /// An access port register write, with the bank from SELECT applied.
    ApWrite { ap: u8, address: u8, value: u32 },
    /// A raw write of TAR.
    TarWrite(u32),
    /// A raw read of RDBUFF.
    RdBuff,
    /// A memory read behind a MEM-AP.
    Read { address: u32, width: u8 },
    /// A memory write behind a MEM-AP.
    Write { address: u32, width: u8, value: u32 },
    /// A write of ABORT.
    Abort(u32),
}

/// Register contents of a mocked MEM-AP.
#[derive(Debug, Clone)]
pub(crate) struct MockAp {
    idr: u32,
    base: u32,
    csw: u32,
    cfg: u32,
    tar: u32,
}

impl MockAp {
    /// An AHB-AP, as found on Cortex-M parts, with BASE `base`.
    pub fn ahb(base: u32) -> Self {
        Self {
            idr: 0x2477_0011,
            base,
            csw: 0x2300_0040,
            cfg: 0,
            tar: 0,
        }
    }

    pub fn with_csw(mut self, csw: u32) -> Self {
        self.csw = csw;
        self
    }

    pub fn with_cfg(mut self, cfg: u32) -> Self {
        self.cfg = cfg;
        self
    }

    pub fn with_idr(mut self, idr: u32) -> Self {
        self.idr = idr;
        self
    }

    /// Bytes moved per DRW access with the current CSW.
    fn width(&self) -> u8 {
        match self.csw & 0b111 {
            0 => 1,
            1 => 2,
            // Doubleword elements go out as 32 bit beats.
            _ => 4,
        }
    }

    fn advance(&mut self) {
        if (self.csw >> 4) & 0b11 == 1 {
            let next = self.tar.wrapping_add(u32::from(self.width()));
            self.tar = (self.tar & !0x3ff) | (next & 0x3ff);
        }
    }
}

#[derive(Debug)]
struct MockState {
    dpidr: u32,
    target_id: u32,
    ctrl: u32,
    power_up: bool,
    reset_ignored: bool,
    reset_ack_pending: bool,
    select: u32,
    posted: u32,
    aps: BTreeMap<u8, MockAp>,
    failing_aps: HashSet<u8>,
    dp_read_failures: HashMap<u8, VecDeque<TransportError>>,
    memory: HashMap<u32, u8>,
    scripts: HashMap<u32, VecDeque<u32>>,
    faults: HashSet<u32>,
    faults_once: HashSet<u32>,
    log: Vec<Transfer>,
}

impl MockState {
    const CTRL_REQUESTS: u32 = 0x5000_0000;
    const CTRL_RSTREQ: u32 = 1 << 26;
    const CTRL_RSTACK: u32 = 1 << 27;

    fn ap_selector(&self) -> u8 {
        (self.select >> 24) as u8
    }

    fn ap_register(&self, address: u8) -> u8 {
        (self.select as u8 & 0xf0) | (address & 0x0c)
    }

    fn dp_bank(&self) -> u32 {
        self.select & 0xf
    }

    fn read_dp(&mut self, address: u8) -> Result<u32, TransportError> {
        self.log.push(Transfer::DpRead(address));
        if let Some(error) = self
            .dp_read_failures
            .get_mut(&address)
            .and_then(|failures| failures.pop_front())
        {
            return Err(error);
        }

        Ok(match (address, self.dp_bank()) {
            (0x0, _) => self.dpidr,
            (0x4, 0) if self.reset_ack_pending => {
                // The acknowledge of a debug reset pulse is seen once.
                self.reset_ack_pending = false;
                self.ctrl | Self::CTRL_RSTACK
            }
            (0x4, 0) => self.ctrl,
            (0x4, 2) => self.target_id,
            (0xc, _) => self.posted,
            _ => 0,
        })
    }

    fn write_dp(&mut self, address: u8, value: u32) {
        self.log.push(Transfer::DpWrite(address, value));
        match (address, self.dp_bank()) {
            (0x0, _) => self.log.push(Transfer::Abort(value)),
            (0x4, 0) => self.write_ctrl(value),
            (0x8, _) => self.select = value,
            _ => {}
        }
    }

    fn write_ctrl(&mut self, value: u32) {
        let requests = value & Self::CTRL_REQUESTS;
        let acks = if self.power_up { requests << 1 } else { 0 };
        if value & Self::CTRL_RSTREQ != 0 && !self.reset_ignored {
            self.reset_ack_pending = true;
        }
        self.ctrl = (value & !(Self::CTRL_REQUESTS << 1) & !Self::CTRL_RSTACK) | acks;
    }

    fn read_ap(&mut self, address: u8) -> Result<u32, TransportError> {
        let selector = self.ap_selector();
        let register = self.ap_register(address);
        self.log.push(Transfer::ApRead {
            ap: selector,
            address: register,
        });
        if self.failing_aps.contains(&selector) {
            return Err(TransportError::Fault);
        }

        if register == 0x0c {
            return self.memory_read();
        }

        let Some(ap) = self.aps.get(&selector) else {
            return Ok(0);
        };
        Ok(match register {
            0x00 => ap.csw,
            0x04 => ap.tar,
            0xf4 => ap.cfg,
            0xf8 => ap.base,
            0xfc => ap.idr,
            _ => 0,
        })
    }

    fn write_ap(&mut self, address: u8, value: u32) -> Result<(), TransportError> {
        let selector = self.ap_selector();
        let register = self.ap_register(address);
        self.log.push(Transfer::ApWrite {
            ap: selector,
            address: register,
            value,
        });
        if self.failing_aps.contains(&selector) {
            return Err(TransportError::Fault);
        }

        if register == 0x0c {
            return self.memory_write(value);
        }

        if let Some(ap) = self.aps.get_mut(&selector) {
            match register {
                0x00 => ap.csw = value,
                0x04 => ap.tar = value,
                _ => {}
            }
        }
        Ok(())
    }

    fn check_fault(&mut self, address: u32) -> Result<(), TransportError> {
        if self.faults.contains(&address) || self.faults_once.remove(&address) {
            Err(TransportError::Fault)
        } else {
            Ok(())
        }
    }

    /// A DRW read through the selected AP, advancing TAR.
    fn memory_read(&mut self) -> Result<u32, TransportError> {
        let selector = self.ap_selector();
        let Some(ap) = self.aps.get_mut(&selector) else {
            return Ok(0);
        };
        let address = ap.tar;
        let width = ap.width();
        ap.advance();

        self.log.push(Transfer::Read { address, width });
        self.check_fault(address)?;

        if width == 4 {
            if let Some(script) = self.scripts.get_mut(&address) {
                let value = if script.len() > 1 {
                    script.pop_front()
                } else {
                    script.front().copied()
                };
                if let Some(value) = value {
                    return Ok(value);
                }
            }
        }

        let lane = (address & 3) as usize;
        let mut lanes = [UNDRIVEN_LANE; 4];
        for offset in 0..usize::from(width) {
            let byte = address.wrapping_add(offset as u32);
            lanes[lane + offset] = self.memory.get(&byte).copied().unwrap_or(0);
        }
        Ok(u32::from_le_bytes(lanes))
    }

    /// A DRW write through the selected AP, advancing TAR.
    fn memory_write(&mut self, value: u32) -> Result<(), TransportError> {
        let selector = self.ap_selector();
        let Some(ap) = self.aps.get_mut(&selector) else {
            return Ok(());
        };
        let address = ap.tar;
        let width = ap.width();
        ap.advance();

        self.log.push(Transfer::Write {
            address,
            width,
            value,
        });
        self.check_fault(address)?;

        let lane = (address & 3) as usize;
        let lanes = value.to_le_bytes();
        for offset in 0..usize::from(width) {
            self.memory
                .insert(address.wrapping_add(offset as u32), lanes[lane + offset]);
        }
        Ok(())
    }
}

/// A debug port backed by memory, see the module documentation.
///
/// Clones share their state, so a test can keep one to inspect what the
/// [`DebugPort`](crate::architecture::arm::DebugPort) did with the other.
#[derive(Debug, Clone)]
pub(crate) struct MockTransport {
    state: Rc<RefCell<MockState>>,
}

impl MockTransport {
    /// A powered down Cortex-M4 SW-DP without access ports.
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(MockState {
                dpidr: 0x2ba0_1477,
                target_id: 0,
                ctrl: 0,
                power_up: true,
                reset_ignored: false,
                reset_ack_pending: false,
                select: 0,
                posted: 0,
                aps: BTreeMap::new(),
                failing_aps: HashSet::new(),
                dp_read_failures: HashMap::new(),
                memory: HashMap::new(),
                scripts: HashMap::new(),
                faults: HashSet::new(),
                faults_once: HashSet::new(),
                log: Vec::new(),
            })),
        }
    }

    pub fn set_dpidr(&self, dpidr: u32) {
        self.state.borrow_mut().dpidr = dpidr;
    }

    pub fn set_target_id(&self, target_id: u32) {
        self.state.borrow_mut().target_id = target_id;
    }

    /// Power-up requests are never acknowledged.
    pub fn refuse_power_up(&self) {
        self.state.borrow_mut().power_up = false;
    }

    /// A debug reset request is never acknowledged, as on STM32.
    pub fn ignore_debug_reset(&self) {
        self.state.borrow_mut().reset_ignored = true;
    }

    /// The next `count` reads of DP register `address` fail with `error`.
    pub fn fail_dp_reads(&self, address: u8, count: usize, error: TransportError) {
        self.state
            .borrow_mut()
            .dp_read_failures
            .entry(address)
            .or_default()
            .extend(std::iter::repeat(error).take(count));
    }

    pub fn add_ap(&self, selector: u8, ap: MockAp) {
        self.state.borrow_mut().aps.insert(selector, ap);
    }

    /// Every register access on AP `selector` faults.
    pub fn fail_ap(&self, selector: u8) {
        self.state.borrow_mut().failing_aps.insert(selector);
    }

    /// Every memory access at `address` faults.
    pub fn add_fault(&self, address: u32) {
        self.state.borrow_mut().faults.insert(address);
    }

    /// The next memory access at `address` faults.
    pub fn add_fault_once(&self, address: u32) {
        self.state.borrow_mut().faults_once.insert(address);
    }

    pub fn write_memory(&self, address: u32, data: &[u8]) {
        let mut state = self.state.borrow_mut();
        for (offset, byte) in data.iter().enumerate() {
            state
                .memory
                .insert(address.wrapping_add(offset as u32), *byte);
        }
    }

    pub fn write_word(&self, address: u32, value: u32) {
        self.write_memory(address, &value.to_le_bytes());
    }

    pub fn read_memory(&self, address: u32, len: usize) -> Vec<u8> {
        let state = self.state.borrow();
        (0..len)
            .map(|offset| {
                let byte = address.wrapping_add(offset as u32);
                state.memory.get(&byte).copied().unwrap_or(0)
            })
            .collect()
    }

    /// Word reads at `address` return `values` in order, the last one repeats.
    pub fn script_reads(&self, address: u32, values: &[u32]) {
        self.state
            .borrow_mut()
            .scripts
            .insert(address, values.iter().copied().collect());
    }

    /// Lay out a ROM table at `base` with the given raw entries.
    pub fn add_rom_table(&self, base: u32, designer: u16, part: u16, entries: &[u32]) {
        for (index, entry) in entries.iter().enumerate() {
            self.write_word(base + 4 * index as u32, *entry);
        }
        self.add_component(base, ComponentClass::RomTable, designer, part);
    }

    /// Write the component and peripheral ID registers of a component at `base`.
    pub fn add_component(&self, base: u32, class: ComponentClass, designer: u16, part: u16) {
        let continuation = ((designer >> 8) & 0xf) as u32;
        let identity = (designer & 0x7f) as u32;
        let part = u32::from(part);

        let pidr = [
            part & 0xff,
            ((part >> 8) & 0xf) | ((identity & 0xf) << 4),
            (identity >> 4) | 0x08,
            0,
        ];
        for (index, value) in pidr.iter().enumerate() {
            self.write_word(base + 0xfe0 + 4 * index as u32, *value);
        }
        self.write_word(base + 0xfd0, continuation);

        let cidr = [0x0d, (class as u32) << 4, 0x05, 0xb1];
        for (index, value) in cidr.iter().enumerate() {
            self.write_word(base + 0xff0 + 4 * index as u32, *value);
        }
    }

    pub fn log(&self) -> Vec<Transfer> {
        self.state.borrow().log.clone()
    }

    pub fn clear_log(&self) {
        self.state.borrow_mut().log.clear();
    }

    /// Only the memory accesses behind the access ports.
    pub fn memory_transfers(&self) -> Vec<Transfer> {
        self.log()
            .into_iter()
            .filter(|t| matches!(t, Transfer::Read { .. } | Transfer::Write { .. }))
            .collect()
    }

    /// Values written to DP register `address`, raw or not.
    pub fn dp_writes(&self, address: u8) -> Vec<u32> {
        self.log()
            .into_iter()
            .filter_map(|t| match t {
                Transfer::DpWrite(a, value) if a == address => Some(value),
                _ => None,
            })
            .collect()
    }

    pub fn aborts(&self) -> Vec<u32> {
        self.log()
            .into_iter()
            .filter_map(|t| match t {
                Transfer::Abort(value) => Some(value),
                _ => None,
            })
            .collect()
    }

    /// Access ports whose IDR was read, in order.
    pub fn probed_aps(&self) -> Vec<u8> {
        let mut probed = Vec::new();
        for transfer in self.log() {
            if let Transfer::ApRead { ap, address: 0xfc } = transfer {
                if !probed.contains(&ap) {
                    probed.push(ap);
                }
            }
        }
        probed
    }

    pub fn last_select(&self) -> u32 {
        self.state.borrow().select
    }
}

impl DapTransport for MockTransport {
    fn low_access(
        &mut self,
        direction: TransferDirection,
        address: PortAddress,
        value: u32,
    ) -> Result<u32, TransportError> {
        let mut state = self.state.borrow_mut();
        match (direction, address) {
            (TransferDirection::Read, PortAddress::Dp(0xc)) => {
                state.log.push(Transfer::RdBuff);
                Ok(state.posted)
            }
            (TransferDirection::Read, PortAddress::Dp(address)) => state.read_dp(address),
            (TransferDirection::Write, PortAddress::Dp(address)) => {
                state.write_dp(address, value);
                Ok(0)
            }
            (TransferDirection::Write, PortAddress::Ap(0x04)) => {
                state.log.push(Transfer::TarWrite(value));
                let selector = state.ap_selector();
                if let Some(ap) = state.aps.get_mut(&selector) {
                    ap.tar = value;
                }
                Ok(0)
            }
            (TransferDirection::Read, PortAddress::Ap(0x0c)) => {
                let previous = state.posted;
                state.posted = state.memory_read()?;
                Ok(previous)
            }
            (TransferDirection::Write, PortAddress::Ap(0x0c)) => {
                state.memory_write(value)?;
                Ok(0)
            }
            (TransferDirection::Read, PortAddress::Ap(address)) => {
                let previous = state.posted;
                state.posted = state.read_ap(address)?;
                Ok(previous)
            }
            (TransferDirection::Write, PortAddress::Ap(address)) => {
                state.write_ap(address, value)?;
                Ok(0)
            }
        }
    }

    fn dp_read(&mut self, address: PortAddress) -> Result<u32, TransportError> {
        let mut state = self.state.borrow_mut();
        match address {
            PortAddress::Dp(address) => state.read_dp(address),
            PortAddress::Ap(address) => state.read_ap(address),
        }
    }

    fn dp_write(&mut self, address: PortAddress, value: u32) -> Result<(), TransportError> {
        let mut state = self.state.borrow_mut();
        match address {
            PortAddress::Dp(address) => {
                state.write_dp(address, value);
                Ok(())
            }
            PortAddress::Ap(address) => state.write_ap(address, value),
        }
    }

    fn dp_abort(&mut self, abort: u32) -> Result<(), TransportError> {
        self.state.borrow_mut().log.push(Transfer::Abort(abort));
        Ok(())
    }
}

/// A clock which advances by a fixed step every time it is read.
#[derive(Debug)]
pub(crate) struct MockPlatform {
    now: Cell<u32>,
    step: u32,
    nrst: Vec<bool>,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self::with_step(1)
    }

    pub fn with_step(step: u32) -> Self {
        Self::starting_at(0, step)
    }

    pub fn starting_at(start: u32, step: u32) -> Self {
        Self {
            now: Cell::new(start),
            step,
            nrst: Vec::new(),
        }
    }

    /// Every nRST change requested so far.
    pub fn nrst(&self) -> Vec<bool> {
        self.nrst.clone()
    }
}

impl Platform for MockPlatform {
    fn time_ms(&self) -> u32 {
        let now = self.now.get();
        self.now.set(now.wrapping_add(self.step));
        now
    }

    fn delay_ms(&mut self, ms: u32) {
        self.now.set(self.now.get().wrapping_add(ms));
    }

    fn set_nrst(&mut self, asserted: bool) {
        self.nrst.push(asserted);
    }
}

/// Records what discovery handed over.
#[derive(Debug, Default)]
pub(crate) struct RecordingProbes {
    /// Selectors of the APs with a Cortex-M.
    pub cortexm: Vec<u8>,
    /// Selectors and debug bases of Cortex-A cores.
    pub cortexa: Vec<(u8, u32)>,
    pub rescue: usize,
    /// Vendor hooks called, with the selector.
    pub vendor: Vec<(&'static str, u8)>,
    pub resumed: usize,
    /// Keep a reference on every AP with a core.
    pub keep_aps: bool,
    pub kept: Vec<Rc<AccessPort>>,
}

impl RecordingProbes {
    /// Nothing was found.
    pub fn is_empty(&self) -> bool {
        self.cortexm.is_empty() && self.cortexa.is_empty() && self.rescue == 0
    }

    fn keep(&mut self, ap: &Rc<AccessPort>) {
        if self.keep_aps {
            ap.add_ref();
            self.kept.push(ap.clone());
        }
    }
}

impl TargetProbes for RecordingProbes {
    fn cortexm_probe(&mut self, ap: &Rc<AccessPort>) -> anyhow::Result<()> {
        self.cortexm.push(ap.selector());
        self.keep(ap);
        Ok(())
    }

    fn cortexa_probe(&mut self, ap: &Rc<AccessPort>, debug_base: u32) -> anyhow::Result<()> {
        self.cortexa.push((ap.selector(), debug_base));
        self.keep(ap);
        Ok(())
    }

    fn rescue_probe(&mut self, _ap: &Rc<AccessPort>) -> anyhow::Result<()> {
        self.rescue += 1;
        Ok(())
    }

    fn kinetis_mdm_probe(&mut self, ap: &Rc<AccessPort>) -> anyhow::Result<()> {
        self.vendor.push(("kinetis", ap.selector()));
        Ok(())
    }

    fn nrf51_mdm_probe(&mut self, ap: &Rc<AccessPort>) -> anyhow::Result<()> {
        self.vendor.push(("nrf51", ap.selector()));
        Ok(())
    }

    fn efm32_aap_probe(&mut self, ap: &Rc<AccessPort>) -> anyhow::Result<()> {
        self.vendor.push(("efm32", ap.selector()));
        Ok(())
    }

    fn resume_targets(&mut self) {
        self.resumed += 1;
    }
}
