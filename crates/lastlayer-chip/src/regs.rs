//! Register maps of the accelerator wrappers driven through LastLayer.
//!
//! Each wrapper decides which hids it exposes; these maps are what the host
//! bindings program against. Ids are `hid` values, all at `sel = 0`.

use crate::abi::LANE_BITS;
use crate::layout::{DeviceLayout, LayoutError};

// ── Streaming vector accelerator (relu) ──────────────────────────────────────

/// Streaming accelerator: reads a vector from one memory, writes the result to
/// another, raises `FINISH` when done.
pub mod stream {
    /// Read base address in the input memory.
    pub const RADDR: u32 = 0;
    /// Write base address in the output memory.
    pub const WADDR: u32 = 1;
    /// Write 1 to start processing.
    pub const LAUNCH: u32 = 2;
    /// Reads 1 once processing is complete.
    pub const FINISH: u32 = 3;
    /// Number of memory words to process.
    pub const LENGTH: u32 = 4;
    /// Cycle counter sampled by the wrapper.
    pub const CYCLES: u32 = 5;

    /// Input memory hid.
    pub const INPUT_MEM: u32 = 0;
    /// Output memory hid.
    pub const OUTPUT_MEM: u32 = 1;

    /// Lane selector used for all scalar registers.
    pub const SEL: u32 = 0;
}

/// Layout of the streaming accelerator with `depth` words per memory and
/// `vector_words` lanes per memory word.
///
/// # Errors
///
/// Fails if `vector_words` is zero or its width overflows 32 bits.
pub fn stream_layout(depth: u32, vector_words: u32) -> Result<DeviceLayout, LayoutError> {
    let width = vector_words
        .checked_mul(LANE_BITS)
        .ok_or(LayoutError::WidthOverflow(stream::INPUT_MEM))?;
    DeviceLayout::new()
        .add_register(stream::RADDR, LANE_BITS)?
        .add_register(stream::WADDR, LANE_BITS)?
        .add_register(stream::LAUNCH, 1)?
        .add_register(stream::FINISH, 1)?
        .add_register(stream::LENGTH, LANE_BITS)?
        .add_register(stream::CYCLES, LANE_BITS)?
        .add_memory(stream::INPUT_MEM, width, depth)?
        .add_memory(stream::OUTPUT_MEM, width, depth)
}

// ── Adder ────────────────────────────────────────────────────────────────────

/// Combinational 8-bit adder: `y = a + b`.
pub mod adder {
    /// First operand.
    pub const A: u32 = 0;
    /// Second operand.
    pub const B: u32 = 1;
    /// Sum.
    pub const Y: u32 = 2;
    /// Operand width in bits.
    pub const WIDTH: u32 = 8;
}

/// Layout of the adder.
///
/// # Errors
///
/// Never fails for the fixed adder map; the `Result` mirrors [`DeviceLayout`].
pub fn adder_layout() -> Result<DeviceLayout, LayoutError> {
    DeviceLayout::new()
        .add_register(adder::A, adder::WIDTH)?
        .add_register(adder::B, adder::WIDTH)?
        .add_register(adder::Y, adder::WIDTH)
}
