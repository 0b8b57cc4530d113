//! Register and memory declarations of a LastLayer model.
//!
//! A model wraps a hardware design and exposes selected internal signals as
//! numbered registers and memories. Anything wider than one ABI lane is split
//! into 32-bit lanes addressed by `sel`:
//!
//! ```text
//! width  lanes  sel range
//! ─────  ─────  ─────────
//!   8      1      0
//!  32      1      0
//!  33      2      0..=1
//! 128      4      0..=3
//! ```

use crate::abi::LANE_BITS;

/// Number of 32-bit lanes needed to expose `width_bits`.
pub const fn lanes_for_width(width_bits: u32) -> u32 {
    width_bits.div_ceil(LANE_BITS)
}

/// Mask of the bits of lane `sel` that belong to a `width_bits` wide signal.
///
/// Returns 0 for lanes past the end of the signal.
pub const fn lane_mask(width_bits: u32, sel: u32) -> u32 {
    let lo = sel * LANE_BITS;
    if lo >= width_bits {
        return 0;
    }
    let bits = width_bits - lo;
    if bits >= LANE_BITS {
        u32::MAX
    } else {
        (1 << bits) - 1
    }
}

/// A declared register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegisterDecl {
    /// Host id used as `hid` in the ABI.
    pub hid: u32,
    /// Signal width in bits.
    pub width: u32,
}

impl RegisterDecl {
    /// Lanes addressable through `sel`.
    pub const fn lanes(&self) -> u32 {
        lanes_for_width(self.width)
    }
}

/// A declared memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryDecl {
    /// Host id used as `hid` in the ABI.
    pub hid: u32,
    /// Word width in bits.
    pub width: u32,
    /// Number of addressable words.
    pub depth: u32,
}

impl MemoryDecl {
    /// Lanes per word addressable through `sel`.
    pub const fn lanes(&self) -> u32 {
        lanes_for_width(self.width)
    }
}

/// Error raised while assembling a [`DeviceLayout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutError {
    /// A register with this hid is already declared.
    DuplicateRegister(u32),
    /// A memory with this hid is already declared.
    DuplicateMemory(u32),
    /// Zero-width signals cannot be exposed.
    ZeroWidth(u32),
    /// Requested width does not fit in 32 bits.
    WidthOverflow(u32),
}

impl std::fmt::Display for LayoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateRegister(hid) => write!(f, "register hid {hid} already declared"),
            Self::DuplicateMemory(hid) => write!(f, "memory hid {hid} already declared"),
            Self::ZeroWidth(hid) => write!(f, "hid {hid} declared with zero width"),
            Self::WidthOverflow(hid) => write!(f, "hid {hid} width overflows 32 bits"),
        }
    }
}

impl std::error::Error for LayoutError {}

/// Full set of registers and memories exposed by one model.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceLayout {
    registers: Vec<RegisterDecl>,
    memories: Vec<MemoryDecl>,
}

impl DeviceLayout {
    /// Empty layout.
    pub const fn new() -> Self {
        Self {
            registers: Vec::new(),
            memories: Vec::new(),
        }
    }

    /// Declare a register.
    ///
    /// # Errors
    ///
    /// Fails if `hid` is already a register or `width` is zero.
    pub fn add_register(mut self, hid: u32, width: u32) -> Result<Self, LayoutError> {
        if width == 0 {
            return Err(LayoutError::ZeroWidth(hid));
        }
        if self.register(hid).is_some() {
            return Err(LayoutError::DuplicateRegister(hid));
        }
        self.registers.push(RegisterDecl { hid, width });
        Ok(self)
    }

    /// Declare a memory of `depth` words.
    ///
    /// # Errors
    ///
    /// Fails if `hid` is already a memory or `width` is zero.
    pub fn add_memory(mut self, hid: u32, width: u32, depth: u32) -> Result<Self, LayoutError> {
        if width == 0 {
            return Err(LayoutError::ZeroWidth(hid));
        }
        if self.memory(hid).is_some() {
            return Err(LayoutError::DuplicateMemory(hid));
        }
        self.memories.push(MemoryDecl { hid, width, depth });
        Ok(self)
    }

    /// Look up a register by hid.
    pub fn register(&self, hid: u32) -> Option<&RegisterDecl> {
        self.registers.iter().find(|r| r.hid == hid)
    }

    /// Look up a memory by hid.
    pub fn memory(&self, hid: u32) -> Option<&MemoryDecl> {
        self.memories.iter().find(|m| m.hid == hid)
    }

    /// Declared registers in declaration order.
    pub fn registers(&self) -> &[RegisterDecl] {
        &self.registers
    }

    /// Declared memories in declaration order.
    pub fn memories(&self) -> &[MemoryDecl] {
        &self.memories
    }
}
