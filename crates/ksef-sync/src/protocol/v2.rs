//! # Protocol v2 (JSON login)
//!
//! ```text
//! POST   v2/auth/challenge                               → {challenge, timestamp}
//! POST   v2/auth/ksef-token   {challenge, ctx, token}    → {referenceNumber, authenticationToken}
//! GET    v2/auth/{ref}        Bearer auth token          → {status.code}  (100 pending, 200 ok)
//! POST   v2/auth/token/redeem Bearer auth token          → {accessToken}
//! POST   v2/invoices/query/metadata?pageOffset&pageSize  → {invoices, hasMore}
//! DELETE v2/auth/sessions/current
//! GET    v2/security/public-key-certificates             (probe)
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{
    collect_pages, format_query_time, login_failure, parse_challenge, parse_date,
    parse_timestamp, required, Page, ProtocolClient,
};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::transport::HttpTransport;
use ksef_core::{
    encrypt_token, Amount, Challenge, Credential, Environment, InvoiceHeader, ProtocolVersion,
    PublicKey, SessionToken, TimeWindow,
};

const CHALLENGE_PATH: &str = "v2/auth/challenge";
const KSEF_TOKEN_PATH: &str = "v2/auth/ksef-token";
const REDEEM_PATH: &str = "v2/auth/token/redeem";
const QUERY_PATH: &str = "v2/invoices/query/metadata";
const TERMINATE_PATH: &str = "v2/auth/sessions/current";
const PROBE_PATH: &str = "v2/security/public-key-certificates";

/// Authentication still being processed.
const STATUS_IN_PROGRESS: i64 = 100;
/// Authentication succeeded.
const STATUS_SUCCESS: i64 = 200;

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct ChallengeResponse {
    timestamp: Option<String>,
    challenge: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct KsefTokenRequest<'a> {
    challenge: &'a str,
    context_identifier: ContextIdentifier<'a>,
    encrypted_token: &'a str,
}

#[derive(Debug, Serialize)]
struct ContextIdentifier<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    value: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KsefTokenResponse {
    reference_number: Option<String>,
    authentication_token: Option<TokenBody>,
}

#[derive(Debug, Deserialize)]
struct TokenBody {
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: Option<AuthStatus>,
}

#[derive(Debug, Deserialize)]
struct AuthStatus {
    code: Option<i64>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RedeemResponse {
    access_token: Option<TokenBody>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest {
    subject_type: &'static str,
    date_range: DateRange,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DateRange {
    date_type: &'static str,
    from: String,
    to: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    invoices: Vec<WireInvoice>,
    #[serde(default)]
    has_more: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireInvoice {
    ksef_number: Option<String>,
    invoice_number: Option<String>,
    issue_date: Option<String>,
    acquisition_date: Option<String>,
    seller: Option<Seller>,
    net_amount: Option<Amount>,
    vat_amount: Option<Amount>,
    gross_amount: Option<Amount>,
    currency: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Seller {
    nip: Option<String>,
    name: Option<String>,
}

impl TryFrom<WireInvoice> for InvoiceHeader {
    type Error = SyncError;

    fn try_from(wire: WireInvoice) -> Result<Self, Self::Error> {
        let (issuer_tax_id, issuer_name) = match wire.seller {
            Some(seller) => (seller.nip, seller.name),
            None => (None, None),
        };
        let issue_date = required(wire.issue_date, "issueDate")?;
        let acquisition = required(wire.acquisition_date, "acquisitionDate")?;

        Ok(InvoiceHeader {
            reference_number: required(wire.ksef_number, "ksefNumber")?,
            invoice_number: wire.invoice_number,
            issuer_tax_id: required(issuer_tax_id, "seller.nip")?,
            issuer_name,
            net_amount: wire.net_amount,
            vat_amount: wire.vat_amount,
            gross_amount: required(wire.gross_amount, "grossAmount")?,
            currency: wire.currency.unwrap_or_else(|| "PLN".to_string()),
            invoice_date: parse_date("issueDate", &issue_date)?,
            acquired_at: parse_timestamp("acquisitionDate", &acquisition)?,
        })
    }
}

// =============================================================================
// Client
// =============================================================================

/// KSeF API v2 client.
#[derive(Debug, Clone)]
pub struct V2Client {
    transport: HttpTransport,
    environment: Environment,
    page_size: u32,
    no_results_codes: Vec<i64>,
    poll_attempts: u32,
    poll_interval: Duration,
}

impl V2Client {
    pub fn new(config: &SyncConfig) -> SyncResult<Self> {
        Ok(V2Client {
            transport: HttpTransport::new(config)?,
            environment: config.ksef.environment,
            page_size: config.query.page_size,
            no_results_codes: config.query.no_results_codes.clone(),
            poll_attempts: config.auth.status_poll_attempts,
            poll_interval: config.auth.status_poll_interval(),
        })
    }

    /// Sends the encrypted token; returns `(reference, authentication token)`.
    async fn submit_token(
        &self,
        challenge: Challenge,
        tax_id: &str,
        encrypted: &str,
    ) -> SyncResult<(String, String)> {
        let body = KsefTokenRequest {
            challenge: &challenge.value,
            context_identifier: ContextIdentifier {
                kind: "Nip",
                value: tax_id,
            },
            encrypted_token: encrypted,
        };
        let request = self.transport.post(KSEF_TOKEN_PATH)?.json(&body);

        let response: KsefTokenResponse = self
            .transport
            .send_credential_json("submit token", request)
            .await
            .map_err(login_failure)?;

        let reference = required(response.reference_number, "referenceNumber")?;
        let token = required(
            response.authentication_token.and_then(|t| t.token),
            "authenticationToken.token",
        )?;
        Ok((reference, token))
    }

    /// Polls the authentication status until it succeeds, fails, or the
    /// attempts run out.
    async fn await_authentication(&self, reference: &str, auth_token: &str) -> SyncResult<()> {
        let path = format!("v2/auth/{}", reference);

        for attempt in 1..=self.poll_attempts {
            let request = self.transport.get(&path)?.bearer_auth(auth_token);
            let response: StatusResponse = self
                .transport
                .send_json("authentication status", request)
                .await
                .map_err(login_failure)?;

            let status = required(response.status, "status")?;
            match status.code {
                Some(STATUS_SUCCESS) => {
                    debug!(attempt, "Authentication confirmed");
                    return Ok(());
                }
                Some(code) if code >= 400 => {
                    return Err(SyncError::AuthRejected(
                        status
                            .description
                            .unwrap_or_else(|| format!("authentication status {}", code)),
                    ));
                }
                Some(STATUS_IN_PROGRESS) | None => {
                    debug!(attempt, "Authentication in progress");
                }
                Some(code) => {
                    debug!(attempt, code, "Unexpected authentication status");
                }
            }

            if attempt < self.poll_attempts {
                tokio::time::sleep(self.poll_interval).await;
            }
        }

        Err(SyncError::AuthRejected(format!(
            "authentication not confirmed after {} status checks",
            self.poll_attempts
        )))
    }

    async fn redeem(&self, auth_token: &str) -> SyncResult<String> {
        let request = self.transport.post(REDEEM_PATH)?.bearer_auth(auth_token);
        let response: RedeemResponse = self
            .transport
            .send_credential_json("redeem token", request)
            .await
            .map_err(login_failure)?;

        required(
            response.access_token.and_then(|t| t.token),
            "accessToken.token",
        )
    }

    async fn fetch_page(
        &self,
        token: &SessionToken,
        window: TimeWindow,
        page_offset: u32,
    ) -> SyncResult<Page> {
        let body = QueryRequest {
            subject_type: "Subject2",
            date_range: DateRange {
                date_type: "Acquisition",
                from: format_query_time(&window.from),
                to: format_query_time(&window.to),
            },
        };

        let request = self
            .transport
            .post(QUERY_PATH)?
            .query(&[("pageOffset", page_offset), ("pageSize", self.page_size)])
            .bearer_auth(token.as_str())
            .json(&body);

        let response: QueryResponse = self.transport.send_json("query invoices", request).await?;
        let headers = response
            .invoices
            .into_iter()
            .map(InvoiceHeader::try_from)
            .collect::<SyncResult<Vec<_>>>()?;

        Ok(Page {
            headers,
            has_more: response.has_more,
        })
    }
}

#[async_trait]
impl ProtocolClient for V2Client {
    fn version(&self) -> ProtocolVersion {
        ProtocolVersion::V2
    }

    fn environment(&self) -> Environment {
        self.environment
    }

    async fn get_challenge(&self, tax_id: &str) -> SyncResult<Challenge> {
        let request = self.transport.post(CHALLENGE_PATH)?.json(&serde_json::json!({}));
        let response: ChallengeResponse = self.transport.send_json("get challenge", request).await?;
        let challenge = parse_challenge(response.timestamp, response.challenge)?;

        debug!(tax_id, issued_at = %challenge.issued_at, "Challenge received");
        Ok(challenge)
    }

    async fn authenticate(
        &self,
        credential: &Credential,
        public_key: &PublicKey,
    ) -> SyncResult<SessionToken> {
        let challenge = self.get_challenge(credential.tax_id()).await?;
        let encrypted = encrypt_token(
            credential.secret(),
            &challenge.timestamp_millis(),
            public_key,
        )?;

        let (reference, auth_token) = self
            .submit_token(challenge, credential.tax_id(), &encrypted)
            .await?;
        self.await_authentication(&reference, &auth_token).await?;
        let access = self.redeem(&auth_token).await?;

        info!(session = %reference, "Session opened");
        Ok(SessionToken::new(access, Some(reference)))
    }

    async fn fetch_invoices_since(
        &self,
        token: &SessionToken,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> SyncResult<Vec<InvoiceHeader>> {
        let window = TimeWindow::new(from, to);
        collect_pages(window, &self.no_results_codes, |page_offset| {
            self.fetch_page(token, window, page_offset)
        })
        .await
    }

    async fn check_connectivity(&self) -> bool {
        self.transport.probe(PROBE_PATH).await
    }

    async fn terminate_session(&self, token: &SessionToken) -> SyncResult<()> {
        let request = self
            .transport
            .delete(TERMINATE_PATH)?
            .bearer_auth(token.as_str());

        match self.transport.send_empty("terminate session", request).await {
            Ok(()) => {
                debug!("Session terminated");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Session termination failed");
                Err(e)
            }
        }
    }
}
