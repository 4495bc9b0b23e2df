//! Token amounts in base units, carried as decimal strings on the wire

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::Add;
use std::str::FromStr;

/// Unsigned amount in a token's smallest unit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(pub u128);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Parse a human-entered decimal ("1.5") into base units for `decimals`
    pub fn parse_units(input: &str, decimals: u8) -> Result<Self, String> {
        let input = input.trim();
        if input.is_empty() {
            return Err("amount is required".to_string());
        }

        let (whole, fraction) = match input.split_once('.') {
            Some((w, f)) => (w, f),
            None => (input, ""),
        };

        if whole.is_empty() && fraction.is_empty() {
            return Err(format!("'{}' is not a number", input));
        }
        if !whole.chars().all(|c| c.is_ascii_digit()) || !fraction.chars().all(|c| c.is_ascii_digit())
        {
            return Err(format!("'{}' is not a number", input));
        }
        if fraction.len() > decimals as usize {
            return Err(format!("at most {} decimal places are allowed", decimals));
        }

        let scale = 10u128
            .checked_pow(decimals as u32)
            .ok_or_else(|| format!("unsupported precision {}", decimals))?;
        let whole: u128 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| "amount is too large".to_string())?
        };
        let padded = format!("{:0<width$}", fraction, width = decimals as usize);
        let fraction: u128 = if padded.is_empty() {
            0
        } else {
            padded.parse().map_err(|_| "amount is too large".to_string())?
        };

        whole
            .checked_mul(scale)
            .and_then(|w| w.checked_add(fraction))
            .map(Amount)
            .ok_or_else(|| "amount is too large".to_string())
    }

    /// Render base units as a decimal string with trailing zeros trimmed
    pub fn format_units(&self, decimals: u8) -> String {
        if decimals == 0 {
            return self.0.to_string();
        }
        let digits = format!("{:0>width$}", self.0, width = decimals as usize + 1);
        let (whole, fraction) = digits.split_at(digits.len() - decimals as usize);
        let fraction = fraction.trim_end_matches('0');
        if fraction.is_empty() {
            whole.to_string()
        } else {
            format!("{}.{}", whole, fraction)
        }
    }
}

impl Add for Amount {
    type Output = Amount;

    fn add(self, other: Amount) -> Amount {
        Amount(self.0.saturating_add(other.0))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u128> for Amount {
    fn from(value: u128) -> Self {
        Self(value)
    }
}

impl From<u64> for Amount {
    fn from(value: u64) -> Self {
        Self(value as u128)
    }
}

impl FromStr for Amount {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Amount)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct AmountVisitor;

        impl<'de> Visitor<'de> for AmountVisitor {
            type Value = Amount;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a non-negative integer or a string of digits")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Amount, E> {
                Ok(Amount(v as u128))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Amount, E> {
                u128::try_from(v)
                    .map(Amount)
                    .map_err(|_| E::custom("amount cannot be negative"))
            }

            fn visit_u128<E: de::Error>(self, v: u128) -> Result<Amount, E> {
                Ok(Amount(v))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Amount, E> {
                v.parse()
                    .map_err(|_| E::custom(format!("invalid amount '{}'", v)))
            }
        }

        deserializer.deserialize_any(AmountVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_units() {
        assert_eq!(Amount::parse_units("1.5", 6).unwrap(), Amount(1_500_000));
        assert_eq!(Amount::parse_units("42", 0).unwrap(), Amount(42));
        assert_eq!(Amount::parse_units(".25", 2).unwrap(), Amount(25));
        assert_eq!(Amount::parse_units("0", 18).unwrap(), Amount::ZERO);
    }

    #[test]
    fn test_parse_units_rejects_garbage() {
        assert!(Amount::parse_units("", 6).is_err());
        assert!(Amount::parse_units("-1", 6).is_err());
        assert!(Amount::parse_units("1.2.3", 6).is_err());
        assert!(Amount::parse_units(".", 6).is_err());
        assert!(Amount::parse_units("1.1234567", 6)
            .unwrap_err()
            .contains("6 decimal places"));
    }

    #[test]
    fn test_format_units() {
        assert_eq!(Amount(1_500_000).format_units(6), "1.5");
        assert_eq!(Amount(7).format_units(3), "0.007");
        assert_eq!(Amount(2_000).format_units(3), "2");
        assert_eq!(Amount(9).format_units(0), "9");
    }

    #[test]
    fn test_wire_format_accepts_strings_and_numbers() {
        let from_str: Amount = serde_json::from_str("\"340282366920938463463374607431768211455\"").unwrap();
        assert_eq!(from_str, Amount(u128::MAX));
        let from_num: Amount = serde_json::from_str("250").unwrap();
        assert_eq!(from_num, Amount(250));
        assert!(serde_json::from_str::<Amount>("-5").is_err());
        assert_eq!(serde_json::to_string(&Amount(10)).unwrap(), "\"10\"");
    }
}
