//! # Domain Types
//!
//! Core domain types used throughout the KSeF sync client.
//!
//! ## Type Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │  Environment    │   │   Credential    │   │   Challenge     │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  Test           │   │  tax_id (NIP)   │   │  issued_at      │       │
//! │  │  Demo           │   │  secret (never  │   │  value          │       │
//! │  │  Production     │   │   logged)       │   │  (single use)   │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │  SessionToken   │   │  InvoiceHeader  │   │  SyncWatermark  │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  opaque value   │   │  reference_no   │   │  last_synced_at │       │
//! │  │  per cycle      │   │  (natural key)  │   │  (forward only) │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::amount::Amount;
use crate::error::{CoreError, CoreResult};
use crate::validation::{normalize_tax_id, validate_secret};

// =============================================================================
// Environment
// =============================================================================

/// Target KSeF environment.
///
/// Each variant is bound to a fixed base endpoint and a fixed public key
/// file name. Both can be overridden by the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    /// Public test environment (fake data, self-issued tokens).
    #[default]
    Test,
    /// Pre-production environment.
    Demo,
    /// Production.
    Production,
}

impl Environment {
    /// Base endpoint for this environment.
    pub fn base_url(&self) -> &'static str {
        match self {
            Environment::Test => "https://ksef-test.mf.gov.pl/api",
            Environment::Demo => "https://ksef-demo.mf.gov.pl/api",
            Environment::Production => "https://ksef.mf.gov.pl/api",
        }
    }

    /// File name of this environment's public key inside the keys directory.
    pub fn public_key_file(&self) -> &'static str {
        match self {
            Environment::Test => "ksef-test-public-key.pem",
            Environment::Demo => "ksef-demo-public-key.pem",
            Environment::Production => "ksef-prod-public-key.pem",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Test => write!(f, "test"),
            Environment::Demo => write!(f, "demo"),
            Environment::Production => write!(f, "prod"),
        }
    }
}

impl FromStr for Environment {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "test" => Ok(Environment::Test),
            "demo" => Ok(Environment::Demo),
            "prod" | "production" => Ok(Environment::Production),
            other => Err(CoreError::UnknownEnvironment(other.to_string())),
        }
    }
}

// =============================================================================
// Protocol Version
// =============================================================================

/// Remote API generation. Selects the protocol strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolVersion {
    /// XML login body, `SessionToken` header.
    #[default]
    V1,
    /// JSON login body, bearer access token.
    V2,
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolVersion::V1 => write!(f, "v1"),
            ProtocolVersion::V2 => write!(f, "v2"),
        }
    }
}

impl FromStr for ProtocolVersion {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "v1" | "1" => Ok(ProtocolVersion::V1),
            "v2" | "2" => Ok(ProtocolVersion::V2),
            other => Err(CoreError::UnknownProtocolVersion(other.to_string())),
        }
    }
}

// =============================================================================
// Credential
// =============================================================================

/// Caller-supplied credential.
///
/// `Debug` never prints the secret.
#[derive(Clone)]
pub struct Credential {
    tax_id: String,
    secret: String,
}

impl Credential {
    /// Validates and builds a credential. The tax id is normalized to 10 digits.
    pub fn new(tax_id: &str, secret: impl Into<String>) -> CoreResult<Self> {
        let tax_id = normalize_tax_id(tax_id)?;
        let secret = secret.into();
        validate_secret(&secret)?;
        Ok(Credential { tax_id, secret })
    }

    /// The normalized tax id (NIP).
    pub fn tax_id(&self) -> &str {
        &self.tax_id
    }

    /// The authorization secret. Only the token encryptor should read this.
    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("tax_id", &self.tax_id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

// =============================================================================
// Challenge
// =============================================================================

/// Server-issued authorisation challenge.
///
/// Deliberately not `Clone`: the login step takes it by value, so a
/// challenge can feed exactly one handshake.
#[derive(Debug, PartialEq, Eq)]
pub struct Challenge {
    /// Server time at which the challenge was issued.
    pub issued_at: DateTime<Utc>,
    /// Opaque challenge value.
    pub value: String,
}

impl Challenge {
    /// Epoch milliseconds of `issued_at`, as placed after the `|` in the
    /// token plaintext.
    pub fn timestamp_millis(&self) -> String {
        self.issued_at.timestamp_millis().to_string()
    }
}

// =============================================================================
// Session Token
// =============================================================================

/// Session credential returned by a successful login.
///
/// Lives for one sync cycle only and is never persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken {
    value: String,
    reference_number: Option<String>,
}

impl SessionToken {
    pub fn new(value: impl Into<String>, reference_number: Option<String>) -> Self {
        SessionToken {
            value: value.into(),
            reference_number,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// Server-side session reference number, when the protocol returns one.
    pub fn reference_number(&self) -> Option<&str> {
        self.reference_number.as_deref()
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionToken")
            .field("value", &"<redacted>")
            .field("reference_number", &self.reference_number)
            .finish()
    }
}

// =============================================================================
// Invoice Header
// =============================================================================

/// Invoice metadata as returned by the query endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceHeader {
    /// KSeF reference number. Globally unique; the deduplication key.
    pub reference_number: String,

    /// Issuer's own invoice number.
    pub invoice_number: Option<String>,

    /// Issuer tax id.
    pub issuer_tax_id: String,

    /// Issuer name, if the server sent one.
    pub issuer_name: Option<String>,

    pub net_amount: Option<Amount>,

    pub vat_amount: Option<Amount>,

    pub gross_amount: Amount,

    /// ISO 4217 currency code.
    pub currency: String,

    /// Invoice issue date.
    pub invoice_date: NaiveDate,

    /// When the invoice became visible to the querying party.
    pub acquired_at: DateTime<Utc>,
}

// =============================================================================
// Time Window
// =============================================================================

/// Half-open query window `[from, to)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        TimeWindow { from, to }
    }

    /// True when `at` falls inside `[from, to)`.
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.from && at < self.to
    }

    pub fn is_empty(&self) -> bool {
        self.from >= self.to
    }
}

// =============================================================================
// Sync Watermark
// =============================================================================

/// "Everything acquired before this instant has been synced."
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncWatermark {
    pub last_synced_at: DateTime<Utc>,
}

impl SyncWatermark {
    pub fn new(last_synced_at: DateTime<Utc>) -> Self {
        SyncWatermark { last_synced_at }
    }

    /// Watermark used when none has been stored yet.
    pub fn initial(now: DateTime<Utc>, lookback: Duration) -> Self {
        SyncWatermark {
            last_synced_at: now - lookback,
        }
    }
}

// =============================================================================
// Sync Outcome
// =============================================================================

/// Externally visible outcome of one successful sync cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOutcome {
    /// The `now` captured at cycle start; also the new watermark.
    pub synced_at: DateTime<Utc>,

    /// Lower bound of the window that was queried.
    pub window_from: DateTime<Utc>,

    pub new_invoice_count: usize,

    pub invoices: Vec<InvoiceHeader>,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_environment_parsing() {
        assert_eq!("test".parse::<Environment>().unwrap(), Environment::Test);
        assert_eq!("DEMO".parse::<Environment>().unwrap(), Environment::Demo);
        assert_eq!(
            "production".parse::<Environment>().unwrap(),
            Environment::Production
        );
        assert_eq!("prod".parse::<Environment>().unwrap(), Environment::Production);
        assert!("staging".parse::<Environment>().is_err());
    }

    #[test]
    fn test_environment_endpoints_are_distinct() {
        assert_ne!(Environment::Test.base_url(), Environment::Production.base_url());
        assert_ne!(
            Environment::Demo.public_key_file(),
            Environment::Production.public_key_file()
        );
    }

    #[test]
    fn test_protocol_version_parsing() {
        assert_eq!("v1".parse::<ProtocolVersion>().unwrap(), ProtocolVersion::V1);
        assert_eq!("2".parse::<ProtocolVersion>().unwrap(), ProtocolVersion::V2);
        assert!("v3".parse::<ProtocolVersion>().is_err());
    }

    #[test]
    fn test_credential_debug_redacts_secret() {
        let credential = Credential::new("5260250274", "super-secret-token").unwrap();
        let printed = format!("{:?}", credential);
        assert!(printed.contains("5260250274"));
        assert!(!printed.contains("super-secret-token"));
    }

    #[test]
    fn test_credential_rejects_bad_tax_id() {
        assert!(Credential::new("5260250275", "token").is_err());
        assert!(Credential::new("5260250274", "").is_err());
    }

    #[test]
    fn test_session_token_debug_redacts_value() {
        let token = SessionToken::new("abc.def.ghi", Some("20240101-SE-1".to_string()));
        let printed = format!("{:?}", token);
        assert!(!printed.contains("abc.def.ghi"));
        assert!(printed.contains("20240101-SE-1"));
    }

    #[test]
    fn test_challenge_timestamp_millis() {
        let challenge = Challenge {
            issued_at: Utc.timestamp_millis_opt(1_700_000_000_123).unwrap(),
            value: "20231114-CR-1".to_string(),
        };
        assert_eq!(challenge.timestamp_millis(), "1700000000123");
    }

    #[test]
    fn test_window_is_half_open() {
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let window = TimeWindow::new(from, to);

        assert!(window.contains(from));
        assert!(window.contains(to - Duration::milliseconds(1)));
        assert!(!window.contains(to));
        assert!(!window.is_empty());
        assert!(TimeWindow::new(to, to).is_empty());
    }

    #[test]
    fn test_initial_watermark_lookback() {
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 12, 0, 0).unwrap();
        let watermark = SyncWatermark::initial(now, Duration::hours(24));
        assert_eq!(
            watermark.last_synced_at,
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
        );
    }
}
