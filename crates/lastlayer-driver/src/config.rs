//! Driver configuration
//!
//! Everything that differs between ABI generations or host bindings lives
//! here, so the facade and the marshaller stay parameterised rather than
//! forked.

use crate::marshal::WordSpec;
use crate::registers::RegisterWidth;
use lastlayer_chip::abi::AbiGeneration;

/// Byte a read buffer is filled with before the device words land in it
pub const DEFAULT_READ_FILL: u8 = 1;

/// Facade configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverConfig {
    /// How register values are narrowed on write and extended on read
    pub register_width: RegisterWidth,
    /// Bytes packed per memory word
    pub word: WordSpec,
    /// Initial content of read buffers
    ///
    /// A successful read overwrites every byte and a failed one returns no
    /// buffer, so the fill never reaches the caller. Kept for parity with
    /// the other LastLayer bindings, which pre-fill with the same sentinel.
    pub read_fill: u8,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self::for_generation(AbiGeneration::default())
    }
}

impl DriverConfig {
    /// Settings matching one ABI generation
    pub fn for_generation(generation: AbiGeneration) -> Self {
        let word = match generation {
            AbiGeneration::ByteLane => WordSpec::BYTE,
            AbiGeneration::WordLane => WordSpec::WORD,
        };
        Self {
            register_width: RegisterWidth::from_generation(generation),
            word,
            read_fill: DEFAULT_READ_FILL,
        }
    }

    /// Set the register width
    #[must_use]
    pub const fn with_register_width(mut self, width: RegisterWidth) -> Self {
        self.register_width = width;
        self
    }

    /// Set the word packing
    #[must_use]
    pub const fn with_word(mut self, word: WordSpec) -> Self {
        self.word = word;
        self
    }

    /// Set the read fill byte
    #[must_use]
    pub const fn with_read_fill(mut self, fill: u8) -> Self {
        self.read_fill = fill;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_word_lane_generation() {
        let config = DriverConfig::default();
        assert_eq!(config.word, WordSpec::WORD);
        assert_eq!(config.register_width, RegisterWidth::I32);
        assert_eq!(config.read_fill, 1);
    }

    #[test]
    fn byte_lane_generation() {
        let config = DriverConfig::for_generation(AbiGeneration::ByteLane).with_read_fill(0);
        assert_eq!(config.word.word_bytes(), 1);
        assert_eq!(config.register_width.bits(), 8);
        assert_eq!(config.read_fill, 0);
    }
}
