//! Clock cycle counts for `reset` and `run`

use crate::error::{LastLayerError, Result};

/// Validated cycle count, `0..=i32::MAX`
///
/// Construction is the only check: once a `CycleCount` exists it can be
/// forwarded to the collaborator's `int` parameter as is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct CycleCount(i32);

impl CycleCount {
    /// Zero cycles
    pub const ZERO: Self = Self(0);

    /// Validate a host-side count
    ///
    /// # Errors
    ///
    /// Returns `InvalidCycleCount` for negative counts and counts above `i32::MAX`.
    pub fn new(cycles: i64) -> Result<Self> {
        i32::try_from(cycles)
            .ok()
            .filter(|c| *c >= 0)
            .map(Self)
            .ok_or(LastLayerError::InvalidCycleCount { cycles })
    }

    /// Value handed to the collaborator
    pub const fn get(self) -> i32 {
        self.0
    }
}

impl TryFrom<i64> for CycleCount {
    type Error = LastLayerError;

    fn try_from(cycles: i64) -> Result<Self> {
        Self::new(cycles)
    }
}

impl std::fmt::Display for CycleCount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds() {
        assert_eq!(CycleCount::new(0).unwrap(), CycleCount::ZERO);
        assert_eq!(CycleCount::new(i64::from(i32::MAX)).unwrap().get(), i32::MAX);
        assert!(matches!(
            CycleCount::new(-1),
            Err(LastLayerError::InvalidCycleCount { cycles: -1 })
        ));
        assert!(CycleCount::new(i64::from(i32::MAX) + 1).is_err());
    }
}
