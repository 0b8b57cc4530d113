//! C ABI exported by a compiled LastLayer model.
//!
//! Every model library exports the same eight entry points, declared in
//! `lastlayer.h`:
//!
//! ```text
//! LastLayerHandle LastLayerAlloc();
//! void LastLayerDealloc(LastLayerHandle handle);
//! int  LastLayerReadReg(LastLayerHandle handle, int hid, int sel);
//! void LastLayerWriteReg(LastLayerHandle handle, int hid, int sel, int value);
//! int  LastLayerReadMem(LastLayerHandle handle, int hid, int addr, int sel);
//! void LastLayerWriteMem(LastLayerHandle handle, int hid, int addr, int sel, int value);
//! void LastLayerReset(LastLayerHandle handle, int n);
//! void LastLayerRun(LastLayerHandle handle, int n);
//! ```
//!
//! `hid` selects a declared register or memory, `sel` selects a 32-bit lane
//! of it, and `addr` is a word address inside a memory.

// ── Symbols ──────────────────────────────────────────────────────────────────

/// Exported symbol names, in header order.
pub mod symbols {
    /// `LastLayerHandle LastLayerAlloc()`
    pub const ALLOC: &str = "LastLayerAlloc";
    /// `void LastLayerDealloc(handle)`
    pub const DEALLOC: &str = "LastLayerDealloc";
    /// `int LastLayerReadReg(handle, hid, sel)`
    pub const READ_REG: &str = "LastLayerReadReg";
    /// `void LastLayerWriteReg(handle, hid, sel, value)`
    pub const WRITE_REG: &str = "LastLayerWriteReg";
    /// `int LastLayerReadMem(handle, hid, addr, sel)`
    pub const READ_MEM: &str = "LastLayerReadMem";
    /// `void LastLayerWriteMem(handle, hid, addr, sel, value)`
    pub const WRITE_MEM: &str = "LastLayerWriteMem";
    /// `void LastLayerReset(handle, n)`
    pub const RESET: &str = "LastLayerReset";
    /// `void LastLayerRun(handle, n)`
    pub const RUN: &str = "LastLayerRun";

    /// All eight symbols.
    pub const ALL: [&str; 8] = [ALLOC, DEALLOC, READ_REG, WRITE_REG, READ_MEM, WRITE_MEM, RESET, RUN];
}

// ── Word geometry ────────────────────────────────────────────────────────────

/// Width of one register/memory lane as seen through the ABI (`int`).
pub const LANE_BITS: u32 = 32;

/// Largest number of host bytes that fit in one memory word.
pub const MAX_WORD_BYTES: usize = (LANE_BITS / 8) as usize;

/// Environment variable naming the model library to load.
pub const LIBRARY_ENV: &str = "LASTLAYER_LIB";

// ── ABI generations ──────────────────────────────────────────────────────────

/// Memory marshalling generations found in host bindings.
///
/// Both drive the same `LastLayerWriteMem`/`LastLayerReadMem` entry points;
/// they differ only in how many host bytes are packed into one word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AbiGeneration {
    /// One byte per memory transaction, 8-bit registers.
    ByteLane,
    /// Four bytes per word, little-endian lanes, 32-bit registers.
    #[default]
    WordLane,
}

impl AbiGeneration {
    /// Host bytes packed into one memory word.
    pub const fn word_bytes(self) -> usize {
        match self {
            Self::ByteLane => 1,
            Self::WordLane => MAX_WORD_BYTES,
        }
    }

    /// Register width in bits.
    pub const fn register_bits(self) -> u32 {
        match self {
            Self::ByteLane => 8,
            Self::WordLane => LANE_BITS,
        }
    }
}

impl std::fmt::Display for AbiGeneration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ByteLane => write!(f, "byte-lane (1 B/word)"),
            Self::WordLane => write!(f, "word-lane ({MAX_WORD_BYTES} B/word)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generations_fit_in_one_lane() {
        for generation in [AbiGeneration::ByteLane, AbiGeneration::WordLane] {
            assert!(generation.word_bytes() * 8 <= LANE_BITS as usize);
            assert!(generation.register_bits() <= LANE_BITS);
        }
    }

    #[test]
    fn symbols_are_distinct() {
        for (i, a) in symbols::ALL.iter().enumerate() {
            for b in &symbols::ALL[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
