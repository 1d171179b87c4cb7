//! # Error Types
//!
//! Domain-specific error types for ksef-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  ksef-core errors (this file)                                          │
//! │  ├── CoreError        - General domain errors                          │
//! │  ├── ValidationError  - Input validation failures                      │
//! │  └── CryptoError      - Token encryption failures                      │
//! │                                                                         │
//! │  ksef-db errors (separate crate)                                       │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  ksef-sync errors (separate crate)                                     │
//! │  └── SyncError        - Classified cycle failures (what callers see)   │
//! │                                                                         │
//! │  Flow: ValidationError / CryptoError → SyncError → TriggerReport       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Core domain errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A monetary amount could not be parsed.
    ///
    /// ## When This Occurs
    /// - Server sent more than two fractional digits
    /// - Value is not a decimal number at all
    /// - Value overflows i64 minor units
    #[error("Invalid amount '{value}': {reason}")]
    InvalidAmount { value: String, reason: String },

    /// A timestamp could not be parsed.
    #[error("Invalid timestamp '{value}': {reason}")]
    InvalidTimestamp { value: String, reason: String },

    /// Unknown environment name.
    #[error("Unknown environment '{0}'. Valid options: test, demo, prod")]
    UnknownEnvironment(String),

    /// Unknown protocol version tag.
    #[error("Unknown protocol version '{0}'. Valid options: v1, v2")]
    UnknownProtocolVersion(String),

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Invalid format (wrong length, non-digit characters, ...).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Check digit does not match.
    #[error("{field} has invalid checksum")]
    InvalidChecksum { field: String },
}

// =============================================================================
// Crypto Error
// =============================================================================

/// Token encryption errors.
///
/// None of these variants carry the secret, the plaintext, or the ciphertext.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Public key material could not be decoded.
    #[error("Malformed public key: {0}")]
    MalformedKey(String),

    /// Plaintext does not fit in a single PKCS#1 v1.5 block.
    #[error("Token plaintext is {len} bytes, key allows at most {max}")]
    PlaintextTooLong { len: usize, max: usize },

    /// The RSA backend refused to encrypt.
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;
