//! # ksef-core: Domain Logic for the KSeF Sync Client
//!
//! Types, validation and token encryption shared by every other crate.
//! Nothing here touches the network, the database or the file system.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        KSeF Sync Architecture                           │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    apps/sync-runner                             │   │
//! │  │        one-shot run  ──►  watch loop  ──►  connectivity check   │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    ksef-sync (engine)                           │   │
//! │  │    protocol v1/v2, HTTP transport, orchestrator, trigger        │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ ksef-core (THIS CRATE) ★                        │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │  amount   │  │  crypto   │  │ validation│  │   │
//! │  │   │ Challenge │  │  Amount   │  │ PublicKey │  │    NIP    │  │   │
//! │  │   │ Invoice.. │  │ (grosze)  │  │ encrypt_. │  │  secret   │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │              NO I/O • NO DATABASE • NO NETWORK                  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    ksef-db (Database Layer)                     │   │
//! │  │          watermark, invoice upserts, sync run journal           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Credential, Challenge, InvoiceHeader, ...)
//! - [`amount`] - Amounts in integer minor units
//! - [`crypto`] - Login token encryption
//! - [`error`] - Domain error types
//! - [`validation`] - Tax id and secret checks
//!
//! ## Example Usage
//!
//! ```rust
//! use ksef_core::{Amount, Credential};
//!
//! let credential = Credential::new("PL 526-025-02-74", "0123ABCD").unwrap();
//! assert_eq!(credential.tax_id(), "5260250274");
//!
//! let gross: Amount = "1230.50".parse().unwrap();
//! assert_eq!(gross.minor(), 123050);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod amount;
pub mod crypto;
pub mod error;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use amount::Amount;
pub use crypto::{encrypt_token, PublicKey};
pub use error::{CoreError, CoreResult, CryptoError, ValidationError};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Default lookback when no watermark has been stored yet.
pub const DEFAULT_LOOKBACK_HOURS: i64 = 24;
