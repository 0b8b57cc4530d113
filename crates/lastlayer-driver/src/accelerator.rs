// SPDX-License-Identifier: AGPL-3.0-only

//! Accelerator helpers over the register maps in [`lastlayer_chip::regs`]
//!
//! [`StreamAccelerator`] owns a facade plus one instance and speaks the
//! streaming wrapper's registers by name:
//!
//! ```text
//! reset ─► set_raddr / set_waddr / set_length ─► write_input ─► launch
//!       ─► run_until_finished ─► read_output, clock_cycles
//! ```
//!
//! [`ReluKernel`] and [`AdderKernel`] give the software device the behaviour
//! of the matching hardware designs, so the whole flow runs without a
//! compiled model.

use lastlayer_chip::regs::{adder, stream};

use crate::backend::{DeviceAbi, Word};
use crate::backends::software::{InstanceState, Kernel};
use crate::device::{DeviceHandle, LastLayer};
use crate::error::{LastLayerError, Result};
use crate::marshal::BurstRegion;

// ── Streaming accelerator ────────────────────────────────────────────────────

/// One streaming accelerator instance
#[derive(Debug)]
pub struct StreamAccelerator<A: DeviceAbi = Box<dyn DeviceAbi>> {
    device: LastLayer<A>,
    handle: DeviceHandle,
    vector_words: u32,
}

impl<A: DeviceAbi> StreamAccelerator<A> {
    /// Allocate an instance on `device`; memories carry `vector_words` lanes per address
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` for zero `vector_words`, or the allocation error.
    pub fn open(mut device: LastLayer<A>, vector_words: u32) -> Result<Self> {
        if vector_words == 0 {
            return Err(LastLayerError::invalid_parameter("vector_words must be >= 1"));
        }
        let handle = device.alloc()?;
        Ok(Self {
            device,
            handle,
            vector_words,
        })
    }

    /// Release the instance and hand back the facade
    ///
    /// # Errors
    ///
    /// Returns the collaborator's fault on release.
    pub fn close(self) -> Result<LastLayer<A>> {
        let Self {
            mut device, handle, ..
        } = self;
        device.dealloc(handle)?;
        Ok(device)
    }

    /// Hold reset for `cycles`
    ///
    /// # Errors
    ///
    /// See [`LastLayer::reset`].
    pub fn reset(&mut self, cycles: i64) -> Result<()> {
        self.device.reset(&self.handle, cycles)
    }

    /// Run for `cycles`
    ///
    /// # Errors
    ///
    /// See [`LastLayer::run`].
    pub fn run(&mut self, cycles: i64) -> Result<()> {
        self.device.run(&self.handle, cycles)
    }

    fn get(&mut self, hid: u32) -> Result<i64> {
        self.device.read_reg(&self.handle, hid, stream::SEL)
    }

    fn set(&mut self, hid: u32, value: i64) -> Result<()> {
        self.device.write_reg(&self.handle, hid, stream::SEL, value)
    }

    /// Input base address
    ///
    /// # Errors
    ///
    /// Collaborator fault.
    pub fn raddr(&mut self) -> Result<i64> {
        self.get(stream::RADDR)
    }

    /// Set the input base address
    ///
    /// # Errors
    ///
    /// Collaborator fault.
    pub fn set_raddr(&mut self, addr: i64) -> Result<()> {
        self.set(stream::RADDR, addr)
    }

    /// Output base address
    ///
    /// # Errors
    ///
    /// Collaborator fault.
    pub fn waddr(&mut self) -> Result<i64> {
        self.get(stream::WADDR)
    }

    /// Set the output base address
    ///
    /// # Errors
    ///
    /// Collaborator fault.
    pub fn set_waddr(&mut self, addr: i64) -> Result<()> {
        self.set(stream::WADDR, addr)
    }

    /// Number of memory words to process
    ///
    /// # Errors
    ///
    /// Collaborator fault.
    pub fn length(&mut self) -> Result<i64> {
        self.get(stream::LENGTH)
    }

    /// Set the number of memory words to process
    ///
    /// # Errors
    ///
    /// Collaborator fault.
    pub fn set_length(&mut self, words: i64) -> Result<()> {
        self.set(stream::LENGTH, words)
    }

    /// Start processing
    ///
    /// # Errors
    ///
    /// Collaborator fault.
    pub fn launch(&mut self) -> Result<()> {
        self.set(stream::LAUNCH, 1)
    }

    /// True once the accelerator raised its finish flag
    ///
    /// # Errors
    ///
    /// Collaborator fault.
    pub fn finish(&mut self) -> Result<bool> {
        Ok(self.get(stream::FINISH)? == 1)
    }

    /// Cycle counter sampled by the wrapper
    ///
    /// # Errors
    ///
    /// Collaborator fault.
    pub fn clock_cycles(&mut self) -> Result<i64> {
        self.get(stream::CYCLES)
    }

    /// Write `data` to the input memory from address `start`
    ///
    /// # Errors
    ///
    /// See [`LastLayer::write_mem`].
    pub fn write_input(&mut self, start: i32, data: &[u8]) -> Result<usize> {
        let region = BurstRegion::new(start, self.vector_words)?;
        self.device
            .write_mem(&self.handle, stream::INPUT_MEM, region, data)
    }

    /// Read `num_elements` bytes from the output memory from address `start`
    ///
    /// # Errors
    ///
    /// See [`LastLayer::read_mem`].
    pub fn read_output(&mut self, start: i32, num_elements: usize) -> Result<Vec<u8>> {
        let region = BurstRegion::new(start, self.vector_words)?;
        self.device
            .read_mem(&self.handle, stream::OUTPUT_MEM, region, num_elements)
    }

    /// Run in slices of `step` cycles until the finish flag rises
    ///
    /// Returns the cycles spent.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` for a non-positive `step`, `NotFinished`
    /// once `budget` cycles have run without completion.
    pub fn run_until_finished(&mut self, budget: i64, step: i64) -> Result<i64> {
        if step <= 0 {
            return Err(LastLayerError::invalid_parameter(format!(
                "step must be positive, got {step}"
            )));
        }
        let mut spent = 0;
        while spent < budget {
            let slice = step.min(budget - spent);
            self.run(slice)?;
            spent += slice;
            if self.finish()? {
                tracing::debug!("stream accelerator finished after {spent} cycles");
                return Ok(spent);
            }
        }
        Err(LastLayerError::NotFinished { cycles: spent })
    }

    /// Underlying facade
    pub const fn device(&self) -> &LastLayer<A> {
        &self.device
    }

    /// Underlying facade and the instance handle
    pub fn parts_mut(&mut self) -> (&mut LastLayer<A>, &DeviceHandle) {
        (&mut self.device, &self.handle)
    }
}

/// Byte-wise relu for the streaming accelerator on the software device
///
/// While `LAUNCH` is set and `FINISH` is clear, each cycle processes one
/// memory address (all lanes): every byte is read as `i8` and clamped at
/// zero. `CYCLES` counts processed addresses; `FINISH` rises when it reaches
/// `LENGTH`.
#[derive(Debug, Clone, Copy)]
pub struct ReluKernel {
    vector_words: u32,
}

impl ReluKernel {
    /// Kernel for memories with `vector_words` lanes per address
    pub const fn new(vector_words: u32) -> Self {
        Self { vector_words }
    }

    fn relu(word: Word) -> Word {
        let bytes = word.to_le_bytes().map(|b| if b >= 0x80 { 0 } else { b });
        Word::from_le_bytes(bytes)
    }
}

impl Kernel for ReluKernel {
    #[allow(clippy::cast_possible_wrap)]
    fn tick(&self, state: &mut InstanceState) {
        let sel = stream::SEL;
        if state.register(stream::LAUNCH, sel) == 0 || state.register(stream::FINISH, sel) != 0 {
            return;
        }
        let done = state.register(stream::CYCLES, sel);
        let length = state.register(stream::LENGTH, sel);
        if done < length {
            let src = state.register(stream::RADDR, sel).wrapping_add(done) as i32;
            let dst = state.register(stream::WADDR, sel).wrapping_add(done) as i32;
            for lane in 0..self.vector_words {
                let word = state.memory_word(stream::INPUT_MEM, src, lane);
                state.set_memory_word(stream::OUTPUT_MEM, dst, lane, Self::relu(word));
            }
            state.set_register(stream::CYCLES, sel, done.saturating_add(1));
        }
        if done.saturating_add(1) >= length {
            state.set_register(stream::FINISH, sel, 1);
        }
    }
}

// ── Adder ────────────────────────────────────────────────────────────────────

/// Combinational 8-bit adder on the software device: `y = a + b` every cycle
#[derive(Debug, Clone, Copy, Default)]
pub struct AdderKernel;

impl Kernel for AdderKernel {
    fn tick(&self, state: &mut InstanceState) {
        let a = state.register(adder::A, 0);
        let b = state.register(adder::B, 0);
        state.set_register(adder::Y, 0, a.wrapping_add(b) & 0xFF);
    }
}

/// One adder instance
#[derive(Debug)]
pub struct Adder<A: DeviceAbi = Box<dyn DeviceAbi>> {
    device: LastLayer<A>,
    handle: DeviceHandle,
}

impl<A: DeviceAbi> Adder<A> {
    /// Allocate an instance and hold it in reset for `reset_cycles`
    ///
    /// # Errors
    ///
    /// Allocation or reset failure.
    pub fn open(mut device: LastLayer<A>, reset_cycles: i64) -> Result<Self> {
        let handle = device.alloc()?;
        device.reset(&handle, reset_cycles)?;
        Ok(Self { device, handle })
    }

    /// Drive `a` and `b`, clock once and return `y`
    ///
    /// # Errors
    ///
    /// Collaborator fault.
    pub fn add(&mut self, a: i64, b: i64) -> Result<i64> {
        self.device.write_reg(&self.handle, adder::A, 0, a)?;
        self.device.write_reg(&self.handle, adder::B, 0, b)?;
        self.device.run(&self.handle, 1)?;
        self.device.read_reg(&self.handle, adder::Y, 0)
    }

    /// Release the instance and hand back the facade
    ///
    /// # Errors
    ///
    /// Returns the collaborator's fault on release.
    pub fn close(self) -> Result<LastLayer<A>> {
        let Self { mut device, handle } = self;
        device.dealloc(handle)?;
        Ok(device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::software::SoftwareDevice;
    use crate::config::DriverConfig;
    use crate::registers::RegisterWidth;
    use lastlayer_chip::regs::{adder_layout, stream_layout};
    use std::sync::Arc;

    #[test]
    fn relu_clamps_each_byte() {
        assert_eq!(ReluKernel::relu(0x80FF_7F01), 0x0000_7F01);
    }

    #[test]
    fn stream_flow_on_software_device() {
        let dev = SoftwareDevice::new(stream_layout(64, 2).unwrap())
            .with_kernel(Arc::new(ReluKernel::new(2)));
        let mut acc = StreamAccelerator::open(LastLayer::new(dev), 2).unwrap();

        acc.reset(3).unwrap();
        acc.set_raddr(0).unwrap();
        acc.set_waddr(8).unwrap();
        acc.set_length(2).unwrap();
        let input: Vec<u8> = [-3i8, 5, -128, 127, 0, -1, 9, 10, 1, 2, 3, 4, -5, -6, -7, -8]
            .iter()
            .map(|v| v.to_ne_bytes()[0])
            .collect();
        assert_eq!(acc.write_input(0, &input).unwrap(), 4);
        assert!(!acc.finish().unwrap());

        acc.launch().unwrap();
        let spent = acc.run_until_finished(100, 1).unwrap();
        assert_eq!(spent, 2);
        assert_eq!(acc.clock_cycles().unwrap(), 2);

        let out = acc.read_output(8, input.len()).unwrap();
        let expected: Vec<u8> = input.iter().map(|&b| if b >= 0x80 { 0 } else { b }).collect();
        assert_eq!(out, expected);

        let device = acc.close().unwrap();
        assert_eq!(device.live_handles(), 0);
    }

    #[test]
    fn saturated_cycle_counter_finishes_without_copying() {
        let dev = SoftwareDevice::new(stream_layout(16, 1).unwrap())
            .with_kernel(Arc::new(ReluKernel::new(1)));
        let mut acc = StreamAccelerator::open(LastLayer::new(dev), 1).unwrap();
        acc.write_input(0, &[1, 2, 3, 4]).unwrap();
        {
            let (ll, h) = acc.parts_mut();
            ll.write_reg(h, stream::CYCLES, 0, -1).unwrap();
        }
        acc.set_length(4).unwrap();
        acc.launch().unwrap();
        acc.run(1).unwrap();

        assert!(acc.finish().unwrap());
        assert_eq!(acc.read_output(0, 4).unwrap(), vec![0; 4]);
    }

    #[test]
    fn unfinished_run_reports_budget() {
        let dev = SoftwareDevice::new(stream_layout(16, 1).unwrap());
        let mut acc = StreamAccelerator::open(LastLayer::new(dev), 1).unwrap();
        acc.launch().unwrap();
        assert!(matches!(
            acc.run_until_finished(10, 4),
            Err(LastLayerError::NotFinished { cycles: 10 })
        ));
        assert!(acc.run_until_finished(10, 0).is_err());
    }

    #[test]
    fn adder_wraps_at_eight_bits() {
        let dev = SoftwareDevice::new(adder_layout().unwrap()).with_kernel(Arc::new(AdderKernel));
        let config = DriverConfig::default().with_register_width(RegisterWidth::U8);
        let mut add = Adder::open(LastLayer::with_config(dev, config), 2).unwrap();
        assert_eq!(add.add(3, 4).unwrap(), 7);
        assert_eq!(add.add(200, 100).unwrap(), 44);
        add.close().unwrap();
    }
}
