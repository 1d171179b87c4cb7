//! # Amount Type
//!
//! Invoice amounts in integer minor units (grosze for PLN).
//!
//! ## Why Not f64?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  The KSeF API returns amounts as JSON numbers ("gross": 123.45) in      │
//! │  some revisions and as strings ("gross": "123.45") in others.           │
//! │                                                                         │
//! │  Both are parsed digit by digit into i64 minor units:                   │
//! │                                                                         │
//! │     "123.45"  → 12345                                                   │
//! │     "123.4"   → 12340                                                   │
//! │     "-5"      → -500                                                    │
//! │     "1.005"   → error (more than two fractional digits)                 │
//! │                                                                         │
//! │  No float arithmetic ever touches the value.                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, CoreResult};

/// Number of fractional digits carried by every amount.
const SCALE_DIGITS: usize = 2;

/// A monetary amount in the smallest currency unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(i64);

impl Amount {
    /// Creates an amount from minor units.
    ///
    /// ```rust
    /// use ksef_core::Amount;
    ///
    /// let gross = Amount::from_minor(12345);
    /// assert_eq!(gross.to_string(), "123.45");
    /// ```
    #[inline]
    pub const fn from_minor(minor: i64) -> Self {
        Amount(minor)
    }

    /// Returns the value in minor units.
    #[inline]
    pub const fn minor(&self) -> i64 {
        self.0
    }

    /// Zero amount.
    #[inline]
    pub const fn zero() -> Self {
        Amount(0)
    }

    /// Parses a decimal string such as `"123.45"` or `"-0.5"`.
    pub fn parse_decimal(value: &str) -> CoreResult<Self> {
        let invalid = |reason: &str| CoreError::InvalidAmount {
            value: value.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = value.trim();
        let (negative, digits) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
        };

        let (whole, fraction) = match digits.split_once('.') {
            Some((whole, fraction)) => (whole, fraction),
            None => (digits, ""),
        };

        if whole.is_empty() && fraction.is_empty() {
            return Err(invalid("empty value"));
        }
        if !whole.chars().all(|c| c.is_ascii_digit())
            || !fraction.chars().all(|c| c.is_ascii_digit())
        {
            return Err(invalid("not a decimal number"));
        }
        if fraction.len() > SCALE_DIGITS {
            return Err(invalid("more than two fractional digits"));
        }

        let whole: i64 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| invalid("out of range"))?
        };
        let mut fraction_value: i64 = if fraction.is_empty() {
            0
        } else {
            fraction.parse().map_err(|_| invalid("out of range"))?
        };
        // "0.5" means 50 minor units
        for _ in fraction.len()..SCALE_DIGITS {
            fraction_value *= 10;
        }

        let minor = whole
            .checked_mul(100)
            .and_then(|w| w.checked_add(fraction_value))
            .ok_or_else(|| invalid("out of range"))?;

        Ok(Amount(if negative { -minor } else { minor }))
    }
}

impl FromStr for Amount {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Amount::parse_decimal(s)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawAmount {
            Number(serde_json::Number),
            Text(String),
        }

        let text = match RawAmount::deserialize(deserializer)? {
            RawAmount::Number(n) => n.to_string(),
            RawAmount::Text(s) => s,
        };
        Amount::parse_decimal(&text).map_err(serde::de::Error::custom)
    }
}
