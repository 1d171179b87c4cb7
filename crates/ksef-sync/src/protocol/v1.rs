//! # Protocol v1 (XML login)
//!
//! ```text
//! POST online/Session/AuthorisationChallenge   {contextIdentifier}      → {timestamp, challenge}
//! POST online/Session/InitToken                XML InitSessionToken     → {sessionToken.token}
//! POST online/Query/Invoice/Sync?PageSize&PageOffset   SessionToken hdr → {invoiceHeaderList}
//! GET  online/Session/Terminate                SessionToken hdr
//! GET  common/Status                           (probe)
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
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

const CHALLENGE_PATH: &str = "online/Session/AuthorisationChallenge";
const INIT_TOKEN_PATH: &str = "online/Session/InitToken";
const QUERY_PATH: &str = "online/Query/Invoice/Sync";
const TERMINATE_PATH: &str = "online/Session/Terminate";
const STATUS_PATH: &str = "common/Status";

/// Header carrying the v1 session token.
pub const SESSION_TOKEN_HEADER: &str = "SessionToken";

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct ChallengeResponse {
    timestamp: Option<String>,
    challenge: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitTokenResponse {
    reference_number: Option<String>,
    session_token: Option<SessionTokenBody>,
}

#[derive(Debug, Deserialize)]
struct SessionTokenBody {
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    invoice_header_list: Vec<WireHeader>,
    number_of_elements: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireHeader {
    ksef_reference_number: Option<String>,
    invoice_reference_number: Option<String>,
    subject_by: Option<SubjectBy>,
    invoicing_date: Option<String>,
    acquisition_timestamp: Option<String>,
    net: Option<Amount>,
    vat: Option<Amount>,
    gross: Option<Amount>,
    currency: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubjectBy {
    issued_by_identifier: Option<Identifier>,
    issued_by_name: Option<SubjectName>,
}

#[derive(Debug, Deserialize)]
struct Identifier {
    identifier: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubjectName {
    full_name: Option<String>,
    trade_name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest {
    query_criteria: QueryCriteria,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryCriteria {
    subject_type: &'static str,
    #[serde(rename = "type")]
    kind: &'static str,
    acquisition_timestamp_threshold_from: String,
    acquisition_timestamp_threshold_to: String,
}

impl TryFrom<WireHeader> for InvoiceHeader {
    type Error = SyncError;

    fn try_from(wire: WireHeader) -> Result<Self, Self::Error> {
        let (issuer_tax_id, issuer_name) = match wire.subject_by {
            Some(subject) => (
                subject.issued_by_identifier.and_then(|i| i.identifier),
                subject
                    .issued_by_name
                    .and_then(|n| n.full_name.or(n.trade_name)),
            ),
            None => (None, None),
        };

        let invoicing_date = required(wire.invoicing_date, "invoicingDate")?;
        let acquisition = required(wire.acquisition_timestamp, "acquisitionTimestamp")?;

        Ok(InvoiceHeader {
            reference_number: required(wire.ksef_reference_number, "ksefReferenceNumber")?,
            invoice_number: wire.invoice_reference_number,
            issuer_tax_id: required(issuer_tax_id, "subjectBy.issuedByIdentifier")?,
            issuer_name,
            net_amount: wire.net,
            vat_amount: wire.vat,
            gross_amount: required(wire.gross, "gross")?,
            currency: wire.currency.unwrap_or_else(|| "PLN".to_string()),
            invoice_date: parse_date("invoicingDate", &invoicing_date)?,
            acquired_at: parse_timestamp("acquisitionTimestamp", &acquisition)?,
        })
    }
}

/// Escapes text for an XML element body.
fn xml_escape(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Builds the `InitSessionTokenRequest` document. Takes the challenge by
/// value: it is spent once it is in a login body.
pub(crate) fn init_token_body(challenge: Challenge, tax_id: &str, encrypted_token: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<ns3:InitSessionTokenRequest xmlns="http://ksef.mf.gov.pl/schema/gtw/svc/online/types/2021/10/01/0001" xmlns:ns2="http://ksef.mf.gov.pl/schema/gtw/svc/types/2021/10/01/0001" xmlns:ns3="http://ksef.mf.gov.pl/schema/gtw/svc/online/auth/request/2021/10/01/0001">
    <ns3:Context>
        <Challenge>{challenge}</Challenge>
        <Identifier xsi:type="ns2:SubjectIdentifierByCompanyType" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
            <ns2:Identifier>{tax_id}</ns2:Identifier>
        </Identifier>
        <DocumentType>
            <ns2:Service>KSeF</ns2:Service>
            <ns2:FormCode>
                <ns2:SystemCode>FA (2)</ns2:SystemCode>
                <ns2:SchemaVersion>1-0E</ns2:SchemaVersion>
                <ns2:TargetNamespace>http://crd.gov.pl/wzor/2023/06/29/12648/</ns2:TargetNamespace>
                <ns2:Value>FA</ns2:Value>
            </ns2:FormCode>
        </DocumentType>
        <Token>{token}</Token>
    </ns3:Context>
</ns3:InitSessionTokenRequest>"#,
        challenge = xml_escape(&challenge.value),
        tax_id = xml_escape(tax_id),
        token = xml_escape(encrypted_token),
    )
}

// =============================================================================
// Client
// =============================================================================

/// KSeF API v1 client.
#[derive(Debug, Clone)]
pub struct V1Client {
    transport: HttpTransport,
    environment: Environment,
    page_size: u32,
    no_results_codes: Vec<i64>,
}

impl V1Client {
    pub fn new(config: &SyncConfig) -> SyncResult<Self> {
        Ok(V1Client {
            transport: HttpTransport::new(config)?,
            environment: config.ksef.environment,
            page_size: config.query.page_size,
            no_results_codes: config.query.no_results_codes.clone(),
        })
    }

    async fn fetch_page(
        &self,
        token: &SessionToken,
        window: TimeWindow,
        page_offset: u32,
    ) -> SyncResult<Page> {
        let body = QueryRequest {
            query_criteria: QueryCriteria {
                subject_type: "subject2",
                kind: "incremental",
                acquisition_timestamp_threshold_from: format_query_time(&window.from),
                acquisition_timestamp_threshold_to: format_query_time(&window.to),
            },
        };

        let request = self
            .transport
            .post(QUERY_PATH)?
            .query(&[("PageSize", self.page_size), ("PageOffset", page_offset)])
            .header(SESSION_TOKEN_HEADER, token.as_str())
            .json(&body);

        let response: QueryResponse = self.transport.send_json("query invoices", request).await?;

        let received = response.invoice_header_list.len() as u64;
        let has_more = match response.number_of_elements {
            Some(total) => (u64::from(page_offset) + 1) * u64::from(self.page_size) < total,
            None => received == u64::from(self.page_size),
        };

        let headers = response
            .invoice_header_list
            .into_iter()
            .map(InvoiceHeader::try_from)
            .collect::<SyncResult<Vec<_>>>()?;

        Ok(Page { headers, has_more })
    }
}

#[async_trait]
impl ProtocolClient for V1Client {
    fn version(&self) -> ProtocolVersion {
        ProtocolVersion::V1
    }

    fn environment(&self) -> Environment {
        self.environment
    }

    async fn get_challenge(&self, tax_id: &str) -> SyncResult<Challenge> {
        let request = self.transport.post(CHALLENGE_PATH)?.json(&json!({
            "contextIdentifier": { "type": "onip", "identifier": tax_id }
        }));

        let response: ChallengeResponse = self.transport.send_json("get challenge", request).await?;
        let challenge = parse_challenge(response.timestamp, response.challenge)?;

        debug!(issued_at = %challenge.issued_at, "Challenge received");
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
        let body = init_token_body(challenge, credential.tax_id(), &encrypted);

        let request = self
            .transport
            .post(INIT_TOKEN_PATH)?
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(body);

        let response: InitTokenResponse = self
            .transport
            .send_credential_json("init session", request)
            .await
            .map_err(login_failure)?;

        let token = required(
            response.session_token.and_then(|t| t.token),
            "sessionToken.token",
        )?;

        info!(
            session = response.reference_number.as_deref().unwrap_or("-"),
            "Session opened"
        );
        Ok(SessionToken::new(token, response.reference_number))
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
        self.transport.probe(STATUS_PATH).await
    }

    async fn terminate_session(&self, token: &SessionToken) -> SyncResult<()> {
        let request = self
            .transport
            .get(TERMINATE_PATH)?
            .header(SESSION_TOKEN_HEADER, token.as_str());

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
