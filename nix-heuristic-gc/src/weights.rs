//! Translation from user-facing "friendly" penalty strengths (1..=10) to the
//! internal floating-point weights the scoring formula (§4.5) actually uses.
//!
//! Grounded on `_unfriendly_weight` in the reference orchestrator: weights
//! grow exponentially with base 7 around a strength of 5, so that adjacent
//! friendly strengths differ by a full order of magnitude rather than a
//! fraction of one.

const EXP_BASE: f64 = 7.0;
const DEFAULT_FRIENDLY_WEIGHT: f64 = 5.0;

/// Default internal weight for the `invalid`, `drv`, and `substitutable`
/// penalties at friendly strength 5.
pub const DEFAULT_INVALID: f64 = 1e5;
pub const DEFAULT_DRV: f64 = 1e5;
pub const DEFAULT_SUBSTITUTABLE: f64 = 1e5;
pub const DEFAULT_INODES: f64 = 1e6;
pub const DEFAULT_SIZE: f64 = 1e-3;
pub const DEFAULT_EXCEEDING_LIMIT: f64 = 5e5;

/// A friendly penalty strength in `1..=10`, or disabled.
///
/// `0` and "unset" are equivalent: both disable the penalty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FriendlyWeight(Option<u8>);

impl FriendlyWeight {
    pub const DISABLED: FriendlyWeight = FriendlyWeight(None);

    /// Constructs a friendly weight, validating the `1..=10` range. `0` is
    /// accepted as a synonym for "disabled" rather than rejected, per §4.11.
    pub fn new(strength: u8) -> Result<FriendlyWeight, crate::error::ConfigError> {
        match strength {
            0 => Ok(FriendlyWeight::DISABLED),
            1..=10 => Ok(FriendlyWeight(Some(strength))),
            other => Err(crate::error::ConfigError::WeightOutOfRange(other)),
        }
    }

    /// Maps this friendly strength onto an internal float weight, or `None`
    /// if the penalty is disabled.
    pub fn to_internal(self, default: f64) -> Option<f64> {
        self.0
            .map(|f| EXP_BASE.powf(f as f64 - DEFAULT_FRIENDLY_WEIGHT) * default)
    }
}

impl Default for FriendlyWeight {
    fn default() -> Self {
        FriendlyWeight::DISABLED
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_maps_to_none() {
        assert_eq!(FriendlyWeight::DISABLED.to_internal(DEFAULT_INVALID), None);
        assert_eq!(
            FriendlyWeight::new(0).unwrap().to_internal(DEFAULT_INVALID),
            None
        );
    }

    #[test]
    fn default_strength_yields_default_weight() {
        let w = FriendlyWeight::new(5).unwrap();
        assert_eq!(w.to_internal(DEFAULT_INVALID), Some(DEFAULT_INVALID));
    }

    #[test]
    fn strength_above_default_scales_up() {
        let w = FriendlyWeight::new(6).unwrap();
        assert_eq!(w.to_internal(DEFAULT_INVALID), Some(DEFAULT_INVALID * 7.0));
    }

    #[test]
    fn strength_below_default_scales_down() {
        let w = FriendlyWeight::new(4).unwrap();
        assert_eq!(w.to_internal(DEFAULT_INVALID), Some(DEFAULT_INVALID / 7.0));
    }

    #[test]
    fn out_of_range_is_rejected() {
        assert!(FriendlyWeight::new(11).is_err());
    }
}
