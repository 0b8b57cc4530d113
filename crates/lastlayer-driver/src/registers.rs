//! Register value interpretation
//!
//! The collaborator moves registers as raw C `int`. The host sees a signed
//! 64-bit integer. [`RegisterWidth`] sits between the two: writes are
//! truncated to the width (never range-checked), reads are sign- or
//! zero-extended from it.
//!
//! | Width | Write `300` | Write `-1` | Read raw `0xFF` |
//! |-------|-------------|------------|-----------------|
//! | `I8`  | `44`        | `-1`       | `-1`            |
//! | `U8`  | `44`        | `255`      | `255`           |
//! | `I32` | `300`       | `-1`       | `255`           |

#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]

use lastlayer_chip::abi::AbiGeneration;

/// Register width as seen by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RegisterWidth {
    /// Signed 8-bit
    I8,
    /// Unsigned 8-bit
    U8,
    /// Signed 16-bit
    I16,
    /// Unsigned 16-bit
    U16,
    /// Signed 32-bit
    #[default]
    I32,
    /// Unsigned 32-bit
    U32,
}

impl RegisterWidth {
    /// Width used by an ABI generation's register exchange
    pub const fn from_generation(generation: AbiGeneration) -> Self {
        match generation {
            AbiGeneration::ByteLane => Self::I8,
            AbiGeneration::WordLane => Self::I32,
        }
    }

    /// Width in bits
    pub const fn bits(self) -> u32 {
        match self {
            Self::I8 | Self::U8 => 8,
            Self::I16 | Self::U16 => 16,
            Self::I32 | Self::U32 => 32,
        }
    }

    /// True for the signed variants
    pub const fn signed(self) -> bool {
        matches!(self, Self::I8 | Self::I16 | Self::I32)
    }

    /// Truncate a host value to this width and hand it over as a C `int`
    pub const fn narrow(self, value: i64) -> i32 {
        match self {
            Self::I8 => value as i8 as i32,
            Self::U8 => value as u8 as i32,
            Self::I16 => value as i16 as i32,
            Self::U16 => value as u16 as i32,
            Self::I32 | Self::U32 => value as i32,
        }
    }

    /// Interpret a raw C `int` at this width
    pub const fn widen(self, raw: i32) -> i64 {
        match self {
            Self::I8 => raw as i8 as i64,
            Self::U8 => raw as u8 as i64,
            Self::I16 => raw as i16 as i64,
            Self::U16 => raw as u16 as i64,
            Self::I32 => raw as i64,
            Self::U32 => raw as u32 as i64,
        }
    }
}

impl std::fmt::Display for RegisterWidth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.signed() { 'i' } else { 'u' };
        write!(f, "{sign}{}", self.bits())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn narrow_truncates_without_error() {
        assert_eq!(RegisterWidth::I8.narrow(300), 44);
        assert_eq!(RegisterWidth::U8.narrow(300), 44);
        assert_eq!(RegisterWidth::I32.narrow(0x1_0000_0005), 5);
        assert_eq!(RegisterWidth::U16.narrow(-1), 0xFFFF);
        assert_eq!(RegisterWidth::I16.narrow(-1), -1);
    }

    #[test]
    fn widen_extends_by_signedness() {
        assert_eq!(RegisterWidth::I8.widen(0xFF), -1);
        assert_eq!(RegisterWidth::U8.widen(0xFF), 255);
        assert_eq!(RegisterWidth::U32.widen(-1), 0xFFFF_FFFF);
        assert_eq!(RegisterWidth::I32.widen(-1), -1);
    }

    #[test]
    fn default_is_signed_32() {
        assert_eq!(RegisterWidth::default(), RegisterWidth::I32);
        assert_eq!(RegisterWidth::default().to_string(), "i32");
        assert_eq!(
            RegisterWidth::from_generation(AbiGeneration::ByteLane),
            RegisterWidth::I8
        );
    }
}
