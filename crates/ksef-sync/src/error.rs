//! # Sync Error Types
//!
//! Error types for sync operations.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Config         │  │   Transport     │  │     Protocol            │ │
//! │  │  (fatal)        │  │   (retryable)   │  │     (retryable)         │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Transport      │  │  InvalidResponse        │ │
//! │  │  InvalidUrl     │  │  Timeout        │  │  Server(ServerFault)    │ │
//! │  │  ConfigLoad..   │  │                 │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Auth           │  │   Encryption    │  │     Persistence         │ │
//! │  │  (fatal)        │  │   (fatal)       │  │     (retryable)         │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  AuthRejected   │  │  Encryption     │  │  Persistence(DbError)   │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! "Fatal" means retrying the same cycle cannot succeed until an operator
//! changes something (credential, key, config).

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use ksef_core::{CoreError, CryptoError, ValidationError};
use ksef_db::DbError;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

// =============================================================================
// Server Fault
// =============================================================================

/// One entry of the server's `exceptionDetailList`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultDetail {
    /// Numeric exception code, the only field used for classification.
    pub code: Option<i64>,
    pub description: Option<String>,
}

/// A non-success HTTP response, with the structured exception envelope
/// decoded when the body carried one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerFault {
    pub status: u16,
    pub service_code: Option<String>,
    pub details: Vec<FaultDetail>,
    /// Truncated raw body, kept when no envelope could be decoded.
    pub body_preview: Option<String>,
}

impl ServerFault {
    /// True if any detail carries `code`.
    pub fn has_code(&self, code: i64) -> bool {
        self.details.iter().any(|d| d.code == Some(code))
    }

    /// True if any detail code is in `codes`.
    pub fn has_any_code(&self, codes: &[i64]) -> bool {
        codes.iter().any(|code| self.has_code(*code))
    }

    /// Code of the first detail, if any.
    pub fn first_code(&self) -> Option<i64> {
        self.details.iter().find_map(|d| d.code)
    }

    /// Description of the first described detail, else the body preview.
    pub fn description(&self) -> Option<String> {
        self.details
            .iter()
            .find_map(|d| d.description.clone())
            .or_else(|| self.body_preview.clone())
    }

    /// Human readable reason, never empty.
    pub fn reason(&self) -> String {
        self.description()
            .unwrap_or_else(|| format!("HTTP {}", self.status))
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }
}

impl fmt::Display for ServerFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HTTP {}", self.status)?;
        if let Some(code) = self.first_code() {
            write!(f, " code {}", code)?;
        }
        match self.description() {
            Some(description) => write!(f, ": {}", description),
            None => Ok(()),
        }
    }
}

// =============================================================================
// Error Kind
// =============================================================================

/// Coarse error class reported to callers and stored in the run journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Config,
    Transport,
    Protocol,
    Auth,
    Encryption,
    Persistence,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Config => "config",
            ErrorKind::Transport => "transport",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Auth => "auth",
            ErrorKind::Encryption => "encryption",
            ErrorKind::Persistence => "persistence",
        }
    }

    /// Transport, protocol and persistence failures may clear up on their
    /// own; the rest need an operator.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Transport | ErrorKind::Protocol | ErrorKind::Persistence
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Sync Error
// =============================================================================

/// Sync error type covering every failure a cycle can surface.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid sync configuration.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// Invalid URL in configuration.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Failed to load a config file, key file or credential.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// Network, DNS or TLS failure.
    #[error("Transport error during {operation}: {source}")]
    Transport {
        operation: String,
        #[source]
        source: reqwest::Error,
    },

    /// The call exceeded the configured timeout.
    #[error("Timeout after {secs} seconds during {operation}")]
    Timeout {
        operation: String,
        secs: u64,
        #[source]
        source: reqwest::Error,
    },

    // =========================================================================
    // Protocol Errors
    // =========================================================================
    /// The server answered, but not in the expected shape.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The server answered with a non-success status.
    #[error("Server error: {0}")]
    Server(ServerFault),

    // =========================================================================
    // Auth Errors
    // =========================================================================
    /// The login exchange was rejected.
    #[error("Authentication rejected: {0}")]
    AuthRejected(String),

    // =========================================================================
    // Encryption Errors
    // =========================================================================
    /// Token encryption failed.
    #[error("Token encryption failed: {0}")]
    Encryption(#[from] CryptoError),

    // =========================================================================
    // Persistence Errors
    // =========================================================================
    /// Watermark or invoice store failure.
    #[error("Persistence failed: {0}")]
    Persistence(#[from] DbError),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<CoreError> for SyncError {
    fn from(err: CoreError) -> Self {
        SyncError::InvalidConfig(err.to_string())
    }
}

impl From<ValidationError> for SyncError {
    fn from(err: ValidationError) -> Self {
        SyncError::InvalidConfig(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl SyncError {
    /// Maps a reqwest failure, separating timeouts from other transport faults.
    pub fn transport(operation: &str, timeout_secs: u64, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SyncError::Timeout {
                operation: operation.to_string(),
                secs: timeout_secs,
                source: err,
            }
        } else {
            SyncError::Transport {
                operation: operation.to_string(),
                source: err,
            }
        }
    }

    /// The error class of this failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::InvalidConfig(_)
            | SyncError::InvalidUrl(_)
            | SyncError::ConfigLoadFailed(_) => ErrorKind::Config,
            SyncError::Transport { .. } | SyncError::Timeout { .. } => ErrorKind::Transport,
            SyncError::InvalidResponse(_) | SyncError::Server(_) => ErrorKind::Protocol,
            SyncError::AuthRejected(_) => ErrorKind::Auth,
            SyncError::Encryption(_) => ErrorKind::Encryption,
            SyncError::Persistence(_) => ErrorKind::Persistence,
        }
    }

    /// Returns true if re-running the cycle later may succeed.
    ///
    /// ## Retryable
    /// - Transport failures and timeouts
    /// - Server and malformed-response faults
    /// - Store failures
    ///
    /// ## Not Retryable
    /// - Rejected credentials
    /// - Encryption (bad key, oversize token)
    /// - Configuration errors
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// The server fault, when the server answered with an error status.
    pub fn server_fault(&self) -> Option<&ServerFault> {
        match self {
            SyncError::Server(fault) => Some(fault),
            _ => None,
        }
    }

    /// True for the structured "no results" fault (any code in `codes`).
    pub fn is_no_results(&self, codes: &[i64]) -> bool {
        self.server_fault()
            .map(|fault| fault.has_any_code(codes))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fault(status: u16, code: Option<i64>) -> ServerFault {
        ServerFault {
            status,
            service_code: Some("20240301-EX-1".to_string()),
            details: vec![FaultDetail {
                code,
                description: Some("Brak wyników".to_string()),
            }],
            body_preview: None,
        }
    }

    #[test]
    fn test_retryable_errors() {
        assert!(SyncError::Server(fault(500, None)).is_retryable());
        assert!(SyncError::InvalidResponse("missing challenge".into()).is_retryable());
        assert!(SyncError::Persistence(DbError::PoolExhausted).is_retryable());

        assert!(!SyncError::AuthRejected("bad token".into()).is_retryable());
        assert!(!SyncError::InvalidConfig("page_size".into()).is_retryable());
        assert!(!SyncError::Encryption(CryptoError::MalformedKey("x".into())).is_retryable());
    }

    #[test]
    fn test_kinds() {
        assert_eq!(SyncError::AuthRejected("x".into()).kind(), ErrorKind::Auth);
        assert_eq!(
            SyncError::from(DbError::PoolExhausted).kind(),
            ErrorKind::Persistence
        );
        assert_eq!(
            SyncError::from(ValidationError::Required {
                field: "tax_id".into()
            })
            .kind(),
            ErrorKind::Config
        );
        assert_eq!(ErrorKind::Persistence.to_string(), "persistence");
        assert_eq!(
            serde_json::to_string(&ErrorKind::Encryption).unwrap(),
            "\"encryption\""
        );
    }

    #[test]
    fn test_no_results_uses_codes_only() {
        let err = SyncError::Server(fault(400, Some(21164)));
        assert!(err.is_no_results(&[21164]));
        assert!(!err.is_no_results(&[21405]));

        let err = SyncError::Server(fault(400, None));
        assert!(!err.is_no_results(&[21164]));

        assert!(!SyncError::InvalidResponse("x".into()).is_no_results(&[21164]));
    }

    #[test]
    fn test_fault_display() {
        let err = SyncError::Server(fault(400, Some(21164)));
        assert_eq!(err.to_string(), "Server error: HTTP 400 code 21164: Brak wyników");

        let bare = ServerFault {
            status: 503,
            service_code: None,
            details: vec![],
            body_preview: None,
        };
        assert_eq!(bare.to_string(), "HTTP 503");
        assert_eq!(bare.reason(), "HTTP 503");
    }
}
