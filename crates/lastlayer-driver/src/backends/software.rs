// SPDX-License-Identifier: AGPL-3.0-only

//! Software (in-process) LastLayer device
//!
//! Implements [`DeviceAbi`] with the same access rules as a generated model
//! wrapper, without compiling any hardware. This enables:
//!
//! 1. **CI without a model library**: every shim and the marshaller run
//!    against a device that enforces hid, lane and address bounds exactly like
//!    the generated wrapper's assertions.
//!
//! 2. **Transaction inspection**: with the journal enabled every ABI call is
//!    recorded in arrival order, so tests can check ordering, not only results.
//!
//! 3. **Fault injection**: `fail_after(n)` makes the `n+1`-th call fault, to
//!    exercise partial-transfer behaviour.
//!
//! ## Access model
//!
//! ```text
//! register hid ─┬─ sel 0 ── bits [0, 32)
//!               └─ sel 1 ── bits [32, 64)      (width > 32 only)
//!
//! memory hid ── addr 0..depth ─┬─ sel 0
//!                              └─ sel n-1       n = ceil(width / 32)
//! ```
//!
//! Writes are masked to the declared width of the addressed lane. `reset`
//! clears registers and keeps memory contents. `run` calls the optional
//! [`Kernel`] once per cycle.

use crate::backend::{BackendType, DeviceAbi, RawHandle, Word};
use crate::error::{LastLayerError, Result};
use lastlayer_chip::layout::{lane_mask, DeviceLayout};
use lastlayer_chip::regs;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::{debug, trace};

/// Per-cycle behaviour plugged into the software device
///
/// The device itself only stores state; a kernel stands in for the hardware
/// design that would otherwise react to register writes.
pub trait Kernel: Debug + Send + Sync {
    /// Advance one clock cycle
    fn tick(&self, state: &mut InstanceState);
}

/// Register and memory contents of one device instance
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceState {
    registers: HashMap<(u32, u32), Word>,
    memories: HashMap<(u32, i32, u32), Word>,
    reset_cycles: u64,
    run_cycles: u64,
}

impl InstanceState {
    /// Lane `sel` of register `hid` (0 if never written)
    pub fn register(&self, hid: u32, sel: u32) -> Word {
        self.registers.get(&(hid, sel)).copied().unwrap_or(0)
    }

    /// Store lane `sel` of register `hid`, unmasked
    pub fn set_register(&mut self, hid: u32, sel: u32, value: Word) {
        self.registers.insert((hid, sel), value);
    }

    /// Lane `sel` of word `addr` in memory `hid` (0 if never written)
    pub fn memory_word(&self, hid: u32, addr: i32, sel: u32) -> Word {
        self.memories.get(&(hid, addr, sel)).copied().unwrap_or(0)
    }

    /// Store lane `sel` of word `addr` in memory `hid`, unmasked
    pub fn set_memory_word(&mut self, hid: u32, addr: i32, sel: u32, value: Word) {
        self.memories.insert((hid, addr, sel), value);
    }

    /// Total cycles spent in reset
    pub const fn reset_cycles(&self) -> u64 {
        self.reset_cycles
    }

    /// Total cycles run
    pub const fn run_cycles(&self) -> u64 {
        self.run_cycles
    }
}

/// One ABI call as seen by the software device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// `alloc` returning `handle`
    Alloc {
        /// Returned instance
        handle: RawHandle,
    },
    /// `dealloc`
    Dealloc {
        /// Target instance
        handle: RawHandle,
    },
    /// `read_reg`
    ReadReg {
        /// Target instance
        handle: RawHandle,
        /// Register id
        hid: u32,
        /// Lane
        sel: u32,
    },
    /// `write_reg`
    WriteReg {
        /// Target instance
        handle: RawHandle,
        /// Register id
        hid: u32,
        /// Lane
        sel: u32,
        /// Value as received
        value: i32,
    },
    /// `read_mem`
    ReadMem {
        /// Target instance
        handle: RawHandle,
        /// Memory id
        hid: u32,
        /// Word address
        addr: i32,
        /// Lane
        sel: u32,
    },
    /// `write_mem`
    WriteMem {
        /// Target instance
        handle: RawHandle,
        /// Memory id
        hid: u32,
        /// Word address
        addr: i32,
        /// Lane
        sel: u32,
        /// Word as received
        value: Word,
    },
    /// `reset`
    Reset {
        /// Target instance
        handle: RawHandle,
        /// Cycle count
        cycles: i32,
    },
    /// `run`
    Run {
        /// Target instance
        handle: RawHandle,
        /// Cycle count
        cycles: i32,
    },
}

/// Software LastLayer device
///
/// Hosts any number of independent instances of one [`DeviceLayout`].
#[derive(Debug)]
pub struct SoftwareDevice {
    layout: DeviceLayout,
    instances: HashMap<RawHandle, InstanceState>,
    next_handle: u64,
    max_instances: Option<usize>,
    kernel: Option<Arc<dyn Kernel>>,
    journal: Option<Vec<Access>>,
    fail_after: Option<usize>,
    calls: usize,
}

impl SoftwareDevice {
    /// Create a device exposing `layout`
    pub fn new(layout: DeviceLayout) -> Self {
        Self {
            layout,
            instances: HashMap::new(),
            next_handle: 1,
            max_instances: None,
            kernel: None,
            journal: None,
            fail_after: None,
            calls: 0,
        }
    }

    /// Streaming accelerator layout with 1024 words of one lane per memory
    ///
    /// # Errors
    ///
    /// Never fails for the fixed map; mirrors [`regs::stream_layout`].
    pub fn stream_default() -> Result<Self> {
        Ok(Self::new(regs::stream_layout(1024, 1)?))
    }

    /// Limit the number of live instances; `alloc` past the limit returns null
    #[must_use]
    pub fn with_max_instances(mut self, max: usize) -> Self {
        self.max_instances = Some(max);
        self
    }

    /// Attach a per-cycle kernel
    #[must_use]
    pub fn with_kernel(mut self, kernel: Arc<dyn Kernel>) -> Self {
        self.kernel = Some(kernel);
        self
    }

    /// Record every ABI call
    #[must_use]
    pub fn with_journal(mut self) -> Self {
        self.journal = Some(Vec::new());
        self
    }

    /// Fault every call after the first `calls` calls
    #[must_use]
    pub fn fail_after(mut self, calls: usize) -> Self {
        self.fail_after = Some(calls);
        self
    }

    /// Recorded calls, oldest first (empty if the journal is off)
    pub fn journal(&self) -> &[Access] {
        self.journal.as_deref().unwrap_or(&[])
    }

    /// Drain the journal
    pub fn take_journal(&mut self) -> Vec<Access> {
        self.journal.as_mut().map(std::mem::take).unwrap_or_default()
    }

    /// State of a live instance
    pub fn instance(&self, handle: RawHandle) -> Option<&InstanceState> {
        self.instances.get(&handle)
    }

    /// Number of live instances
    pub fn live_instances(&self) -> usize {
        self.instances.len()
    }

    /// Layout served by this device
    pub const fn layout(&self) -> &DeviceLayout {
        &self.layout
    }

    fn record(&mut self, access: Access) {
        if let Some(journal) = self.journal.as_mut() {
            journal.push(access);
        }
    }

    fn check_fault(&mut self, op: &'static str) -> Result<()> {
        if let Some(limit) = self.fail_after {
            if self.calls >= limit {
                return Err(LastLayerError::collaborator_fault(
                    op,
                    format!("injected fault after {limit} calls"),
                ));
            }
        }
        self.calls += 1;
        Ok(())
    }

    fn state_mut(&mut self, op: &'static str, handle: RawHandle) -> Result<&mut InstanceState> {
        self.instances
            .get_mut(&handle)
            .ok_or_else(|| LastLayerError::collaborator_fault(op, format!("no instance {handle}")))
    }

    fn register_mask(&self, op: &'static str, hid: u32, sel: u32) -> Result<Word> {
        let reg = self.layout.register(hid).ok_or_else(|| {
            LastLayerError::collaborator_fault(op, format!("wrong hid {hid} for register access"))
        })?;
        if sel >= reg.lanes() {
            return Err(LastLayerError::collaborator_fault(
                op,
                format!("sel {sel} out of range for register {hid} ({} lanes)", reg.lanes()),
            ));
        }
        Ok(lane_mask(reg.width, sel))
    }

    fn memory_mask(&self, op: &'static str, hid: u32, addr: i32, sel: u32) -> Result<Word> {
        let mem = self.layout.memory(hid).ok_or_else(|| {
            LastLayerError::collaborator_fault(op, format!("wrong hid {hid} for memory access"))
        })?;
        let in_range = u32::try_from(addr).is_ok_and(|a| a < mem.depth);
        if !in_range {
            return Err(LastLayerError::collaborator_fault(
                op,
                format!("addr {addr} out of range for memory {hid} (depth {})", mem.depth),
            ));
        }
        if sel >= mem.lanes() {
            return Err(LastLayerError::collaborator_fault(
                op,
                format!("sel {sel} out of range for memory {hid} ({} lanes)", mem.lanes()),
            ));
        }
        Ok(lane_mask(mem.width, sel))
    }

    fn check_cycles(op: &'static str, cycles: i32) -> Result<u64> {
        u64::try_from(cycles).map_err(|_| {
            LastLayerError::collaborator_fault(op, format!("negative cycle count {cycles}"))
        })
    }
}

impl DeviceAbi for SoftwareDevice {
    fn alloc(&mut self) -> Result<RawHandle> {
        self.check_fault("alloc")?;
        if self
            .max_instances
            .is_some_and(|max| self.instances.len() >= max)
        {
            debug!("SoftwareDevice: instance limit reached, returning null");
            self.record(Access::Alloc {
                handle: RawHandle::NULL,
            });
            return Ok(RawHandle::NULL);
        }
        let handle = RawHandle::new(self.next_handle);
        self.next_handle += 1;
        self.instances.insert(handle, InstanceState::default());
        self.record(Access::Alloc { handle });
        debug!("SoftwareDevice: allocated instance {handle}");
        Ok(handle)
    }

    fn dealloc(&mut self, handle: RawHandle) -> Result<()> {
        self.check_fault("dealloc")?;
        if self.instances.remove(&handle).is_none() {
            return Err(LastLayerError::collaborator_fault(
                "dealloc",
                format!("no instance {handle}"),
            ));
        }
        self.record(Access::Dealloc { handle });
        debug!("SoftwareDevice: released instance {handle}");
        Ok(())
    }

    fn read_reg(&mut self, handle: RawHandle, hid: u32, sel: u32) -> Result<i32> {
        self.check_fault("read_reg")?;
        self.register_mask("read_reg", hid, sel)?;
        #[allow(clippy::cast_possible_wrap)]
        let value = self.state_mut("read_reg", handle)?.register(hid, sel) as i32;
        self.record(Access::ReadReg { handle, hid, sel });
        Ok(value)
    }

    fn write_reg(&mut self, handle: RawHandle, hid: u32, sel: u32, value: i32) -> Result<()> {
        self.check_fault("write_reg")?;
        let mask = self.register_mask("write_reg", hid, sel)?;
        #[allow(clippy::cast_sign_loss)]
        let bits = value as u32 & mask;
        self.state_mut("write_reg", handle)?
            .set_register(hid, sel, bits);
        self.record(Access::WriteReg {
            handle,
            hid,
            sel,
            value,
        });
        Ok(())
    }

    fn read_mem(&mut self, handle: RawHandle, hid: u32, addr: i32, sel: u32) -> Result<Word> {
        self.check_fault("read_mem")?;
        self.memory_mask("read_mem", hid, addr, sel)?;
        let word = self.state_mut("read_mem", handle)?.memory_word(hid, addr, sel);
        self.record(Access::ReadMem {
            handle,
            hid,
            addr,
            sel,
        });
        trace!("read_mem hid={hid} addr={addr} sel={sel} -> {word:#010x}");
        Ok(word)
    }

    fn write_mem(
        &mut self,
        handle: RawHandle,
        hid: u32,
        addr: i32,
        sel: u32,
        value: Word,
    ) -> Result<()> {
        self.check_fault("write_mem")?;
        let mask = self.memory_mask("write_mem", hid, addr, sel)?;
        self.state_mut("write_mem", handle)?
            .set_memory_word(hid, addr, sel, value & mask);
        self.record(Access::WriteMem {
            handle,
            hid,
            addr,
            sel,
            value,
        });
        trace!("write_mem hid={hid} addr={addr} sel={sel} <- {value:#010x}");
        Ok(())
    }

    fn reset(&mut self, handle: RawHandle, cycles: i32) -> Result<()> {
        self.check_fault("reset")?;
        let n = Self::check_cycles("reset", cycles)?;
        let state = self.state_mut("reset", handle)?;
        state.registers.clear();
        state.reset_cycles += n;
        self.record(Access::Reset { handle, cycles });
        Ok(())
    }

    fn run(&mut self, handle: RawHandle, cycles: i32) -> Result<()> {
        self.check_fault("run")?;
        let n = Self::check_cycles("run", cycles)?;
        let kernel = self.kernel.clone();
        let state = self.state_mut("run", handle)?;
        for _ in 0..n {
            if let Some(kernel) = &kernel {
                kernel.tick(state);
            }
            state.run_cycles += 1;
        }
        self.record(Access::Run { handle, cycles });
        Ok(())
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Software
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lastlayer_chip::regs::{adder, adder_layout, stream};

    fn adder_device() -> SoftwareDevice {
        SoftwareDevice::new(adder_layout().unwrap())
    }

    #[test]
    fn register_writes_are_masked_to_width() {
        let mut dev = adder_device();
        let h = dev.alloc().unwrap();
        dev.write_reg(h, adder::A, 0, 0x1FF).unwrap();
        assert_eq!(dev.read_reg(h, adder::A, 0).unwrap(), 0xFF);
        dev.write_reg(h, adder::B, 0, -3).unwrap();
        assert_eq!(dev.read_reg(h, adder::B, 0).unwrap(), 0xFD);
    }

    #[test]
    fn unknown_hid_and_lane_fault() {
        let mut dev = adder_device();
        let h = dev.alloc().unwrap();
        assert!(dev.read_reg(h, 7, 0).unwrap_err().is_collaborator_fault());
        assert!(dev.read_reg(h, adder::A, 1).unwrap_err().is_collaborator_fault());
        assert!(dev.read_mem(h, 0, 0, 0).unwrap_err().is_collaborator_fault());
    }

    #[test]
    fn memory_address_bounds_enforced() {
        let mut dev = SoftwareDevice::stream_default().unwrap();
        let h = dev.alloc().unwrap();
        dev.write_mem(h, stream::INPUT_MEM, 1023, 0, 7).unwrap();
        assert_eq!(dev.read_mem(h, stream::INPUT_MEM, 1023, 0).unwrap(), 7);
        assert!(dev.write_mem(h, stream::INPUT_MEM, 1024, 0, 7).is_err());
        assert!(dev.write_mem(h, stream::INPUT_MEM, -1, 0, 7).is_err());
        assert!(dev.write_mem(h, stream::INPUT_MEM, 0, 1, 7).is_err());
    }

    #[test]
    fn reset_clears_registers_keeps_memory() {
        let mut dev = SoftwareDevice::stream_default().unwrap();
        let h = dev.alloc().unwrap();
        dev.write_reg(h, stream::LENGTH, 0, 16).unwrap();
        dev.write_mem(h, stream::INPUT_MEM, 3, 0, 0xDEAD_BEEF).unwrap();
        dev.reset(h, 10).unwrap();
        assert_eq!(dev.read_reg(h, stream::LENGTH, 0).unwrap(), 0);
        assert_eq!(dev.read_mem(h, stream::INPUT_MEM, 3, 0).unwrap(), 0xDEAD_BEEF);
        assert_eq!(dev.instance(h).unwrap().reset_cycles(), 10);
    }

    #[test]
    fn run_advances_cycle_counter() {
        let mut dev = adder_device();
        let h = dev.alloc().unwrap();
        dev.run(h, 20).unwrap();
        dev.run(h, 5).unwrap();
        assert_eq!(dev.instance(h).unwrap().run_cycles(), 25);
        assert!(dev.run(h, -1).is_err());
    }

    #[test]
    fn instance_limit_returns_null() {
        let mut dev = adder_device().with_max_instances(1);
        let first = dev.alloc().unwrap();
        assert!(!first.is_null());
        assert!(dev.alloc().unwrap().is_null());
        dev.dealloc(first).unwrap();
        assert!(!dev.alloc().unwrap().is_null());
    }

    #[test]
    fn dealloc_twice_faults() {
        let mut dev = adder_device();
        let h = dev.alloc().unwrap();
        dev.dealloc(h).unwrap();
        assert!(dev.dealloc(h).unwrap_err().is_collaborator_fault());
        assert!(dev.read_reg(h, adder::A, 0).is_err());
    }

    #[test]
    fn injected_fault_hits_after_limit() {
        let mut dev = adder_device().fail_after(2);
        let h = dev.alloc().unwrap();
        dev.write_reg(h, adder::A, 0, 1).unwrap();
        let err = dev.write_reg(h, adder::B, 0, 1).unwrap_err();
        assert!(err.is_collaborator_fault());
    }

    #[test]
    fn journal_records_in_order() {
        let mut dev = adder_device().with_journal();
        let h = dev.alloc().unwrap();
        dev.write_reg(h, adder::A, 0, 4).unwrap();
        dev.read_reg(h, adder::A, 0).unwrap();
        assert_eq!(
            dev.take_journal(),
            vec![
                Access::Alloc { handle: h },
                Access::WriteReg { handle: h, hid: adder::A, sel: 0, value: 4 },
                Access::ReadReg { handle: h, hid: adder::A, sel: 0 },
            ]
        );
        assert!(dev.journal().is_empty());
    }
}
