//! # Validation Module
//!
//! Input validation for credentials before any network call is made.
//!
//! ## NIP Checksum
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  A Polish tax id (NIP) is 10 digits. The last one is a check digit:     │
//! │                                                                         │
//! │    digits:   5  2  6  0  2  5  0  2  7 │ 4                              │
//! │    weights:  6  5  7  2  3  4  5  6  7 │                                │
//! │                                                                         │
//! │    sum(digit * weight) mod 11 == check digit   (10 is never valid)      │
//! │                                                                         │
//! │  Formatting noise ("526-025-02-74", "PL5260250274") is stripped first.  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::ValidationError;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

const NIP_WEIGHTS: [u32; 9] = [6, 5, 7, 2, 3, 4, 5, 6, 7];

/// Normalizes and validates a NIP, returning the bare 10-digit form.
///
/// ```rust
/// use ksef_core::validation::normalize_tax_id;
///
/// assert_eq!(normalize_tax_id("526-025-02-74").unwrap(), "5260250274");
/// assert!(normalize_tax_id("5260250275").is_err());
/// ```
pub fn normalize_tax_id(raw: &str) -> ValidationResult<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Required {
            field: "tax_id".to_string(),
        });
    }

    let without_prefix = trimmed
        .strip_prefix("PL")
        .or_else(|| trimmed.strip_prefix("pl"))
        .unwrap_or(trimmed);

    let digits: String = without_prefix
        .chars()
        .filter(|c| !matches!(c, '-' | ' '))
        .collect();

    if digits.len() != 10 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(ValidationError::InvalidFormat {
            field: "tax_id".to_string(),
            reason: "expected 10 digits".to_string(),
        });
    }

    let values: Vec<u32> = digits.chars().filter_map(|c| c.to_digit(10)).collect();
    let sum: u32 = values
        .iter()
        .zip(NIP_WEIGHTS.iter())
        .map(|(digit, weight)| digit * weight)
        .sum();
    let check = sum % 11;

    if check == 10 || check != values[9] {
        return Err(ValidationError::InvalidChecksum {
            field: "tax_id".to_string(),
        });
    }

    Ok(digits)
}

/// Validates that the authorization secret is usable.
pub fn validate_secret(secret: &str) -> ValidationResult<()> {
    if secret.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "secret".to_string(),
        });
    }
    if secret.contains('|') {
        return Err(ValidationError::InvalidFormat {
            field: "secret".to_string(),
            reason: "must not contain the '|' separator".to_string(),
        });
    }
    Ok(())
}
