//! User-facing reclamation budgets: either a byte count or an inode count.

use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// Which dimension a [`Quantity`] is measured in, and therefore which of a
/// node's `limit_measurement` it's compared against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantityUnit {
    Bytes,
    Inodes,
}

impl fmt::Display for QuantityUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuantityUnit::Bytes => write!(f, "bytes"),
            QuantityUnit::Inodes => write!(f, "inodes"),
        }
    }
}

/// A parsed reclamation budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quantity {
    pub value: u64,
    pub unit: QuantityUnit,
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.unit)
    }
}

impl FromStr for Quantity {
    type Err = ConfigError;

    /// Parses strings like `100MiB`, `2G`, or `12I` (12 inodes).
    ///
    /// A trailing, case-insensitive `i`/`I` with no byte-unit letter anywhere
    /// else in the string selects [`QuantityUnit::Inodes`]; otherwise the
    /// whole string is parsed as a byte size. Containing both is rejected as
    /// ambiguous.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();

        let ends_with_inode_marker = trimmed
            .strip_suffix(['i', 'I'])
            .map(str::trim_end)
            .filter(|rest| rest.chars().last().is_some_and(|c| c.is_ascii_digit()));

        match ends_with_inode_marker {
            Some(rest) => {
                if contains_byte_unit_letter(rest) {
                    return Err(ConfigError::AmbiguousQuantity(s.to_string()));
                }
                let value = rest
                    .parse::<u64>()
                    .map_err(|e| ConfigError::InvalidQuantity(s.to_string(), e.to_string()))?;
                Ok(Quantity {
                    value,
                    unit: QuantityUnit::Inodes,
                })
            }
            None => {
                let value = bytesize::ByteSize::from_str(trimmed)
                    .map_err(|e| ConfigError::InvalidQuantity(s.to_string(), e))?;
                Ok(Quantity {
                    value: value.0,
                    unit: QuantityUnit::Bytes,
                })
            }
        }
    }
}

/// Whether `s` contains a letter that could only belong to a byte-size unit
/// (`b`, `k`, `m`, `g`, `t`, `p`), used to reject strings like `12KIB` that
/// try to be both an inode count and a byte size.
fn contains_byte_unit_letter(s: &str) -> bool {
    s.chars()
        .any(|c| "bBkKmMgGtTpP".contains(c))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_bytes() {
        let q: Quantity = "1000".parse().unwrap();
        assert_eq!(q.unit, QuantityUnit::Bytes);
        assert_eq!(q.value, 1000);
    }

    #[test]
    fn binary_suffix() {
        let q: Quantity = "100MiB".parse().unwrap();
        assert_eq!(q.unit, QuantityUnit::Bytes);
        assert_eq!(q.value, 100 * 1024 * 1024);
    }

    #[test]
    fn si_suffix() {
        let q: Quantity = "2G".parse().unwrap();
        assert_eq!(q.unit, QuantityUnit::Bytes);
        assert_eq!(q.value, 2_000_000_000);
    }

    #[test]
    fn inode_count() {
        let q: Quantity = "12I".parse().unwrap();
        assert_eq!(q.unit, QuantityUnit::Inodes);
        assert_eq!(q.value, 12);
    }

    #[test]
    fn inode_count_lowercase() {
        let q: Quantity = "12i".parse().unwrap();
        assert_eq!(q.unit, QuantityUnit::Inodes);
        assert_eq!(q.value, 12);
    }

    #[test]
    fn ambiguous_is_rejected() {
        assert!(matches!(
            "12KIB".parse::<Quantity>(),
            Err(ConfigError::AmbiguousQuantity(_))
        ));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!("not-a-size".parse::<Quantity>().is_err());
    }
}
