//! In-process fake KSeF server for tests.
//!
//! Serves the v1 or v2 endpoints on `127.0.0.1:0`, holds the private half of
//! the login key and checks every encrypted token against the challenge it
//! issued. Challenges are single-use.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, OnceLock};

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey};
use serde_json::{json, Value};
use tokio::net::TcpListener;

use crate::config::SyncConfig;
use ksef_core::{Credential, ProtocolVersion, PublicKey};

fn private_key() -> &'static RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| {
        RsaPrivateKey::new(&mut rand::thread_rng(), 1024).expect("generate test key")
    })
}

/// Public half of the shared test key.
pub(crate) fn test_public_key() -> PublicKey {
    PublicKey::from(private_key().to_public_key())
}

/// Behaviour switches for one fake server.
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeOptions {
    /// Challenge responses carry no fields.
    pub empty_challenge: bool,
    /// Every query answers with the "no results" fault.
    pub no_results: bool,
    /// v2: status polls answering "in progress" before success.
    pub pending_polls: u32,
    /// Every query answers with this status and no body.
    pub query_failure_status: Option<u16>,
    /// Login responses carry the token as a bare string instead of an
    /// object (v1 `sessionToken`, v2 `accessToken`).
    pub malformed_login: bool,
}

#[derive(Debug, Clone)]
struct FakeInvoice {
    reference: String,
    acquired_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Inner {
    counter: u64,
    challenges: HashMap<String, String>,
    pending_auth: HashMap<String, u32>,
    confirmed_auth: HashSet<String>,
    sessions: HashSet<String>,
    invoices: Vec<FakeInvoice>,
    windows: Vec<(DateTime<Utc>, DateTime<Utc>)>,
    logins: u32,
    status_polls: u32,
    query_pages: u32,
    terminations: u32,
}

impl Inner {
    fn next_id(&mut self) -> u64 {
        self.counter += 1;
        self.counter
    }
}

struct FakeState {
    options: FakeOptions,
    inner: Mutex<Inner>,
}

impl FakeState {
    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("fake state poisoned")
    }
}

/// Handle to a running fake server.
pub(crate) struct FakeKsef {
    version: ProtocolVersion,
    addr: SocketAddr,
    state: Arc<FakeState>,
}

impl FakeKsef {
    pub const TAX_ID: &'static str = "5260250274";
    pub const SECRET: &'static str = "FAKE-AUTH-TOKEN-0123456789";

    pub async fn start(version: ProtocolVersion, options: FakeOptions) -> Self {
        let state = Arc::new(FakeState {
            options,
            inner: Mutex::new(Inner::default()),
        });

        let app = match version {
            ProtocolVersion::V1 => Router::new()
                .route("/api/online/Session/AuthorisationChallenge", post(challenge))
                .route("/api/online/Session/InitToken", post(v1_init_token))
                .route("/api/online/Query/Invoice/Sync", post(v1_query))
                .route("/api/online/Session/Terminate", get(v1_terminate))
                .route("/api/common/Status", get(|| async { "OK" })),
            ProtocolVersion::V2 => Router::new()
                .route("/api/v2/auth/challenge", post(challenge))
                .route("/api/v2/auth/ksef-token", post(v2_ksef_token))
                .route("/api/v2/auth/token/redeem", post(v2_redeem))
                .route("/api/v2/auth/sessions/current", delete(v2_terminate))
                .route("/api/v2/auth/{reference}", get(v2_status))
                .route("/api/v2/invoices/query/metadata", post(v2_query))
                .route(
                    "/api/v2/security/public-key-certificates",
                    get(|| async { Json(json!([])) }),
                ),
        }
        .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake server");
        let addr = listener.local_addr().expect("fake server address");
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        FakeKsef {
            version,
            addr,
            state,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}/api", self.addr)
    }

    /// Config pointed at this server with a short timeout.
    pub fn config(&self) -> SyncConfig {
        let mut config = SyncConfig::default();
        config.ksef.base_url = Some(self.base_url());
        config.ksef.protocol_version = self.version;
        config.http.timeout_secs = 5;
        config.auth.status_poll_interval_ms = 5;
        config
    }

    pub fn credential(&self) -> Credential {
        Credential::new(Self::TAX_ID, Self::SECRET).expect("valid fake credential")
    }

    pub fn public_key(&self) -> PublicKey {
        test_public_key()
    }

    /// Adds an invoice acquired at `acquired_at`.
    pub fn add_invoice(&self, reference: &str, acquired_at: DateTime<Utc>) {
        self.state.lock().invoices.push(FakeInvoice {
            reference: reference.to_string(),
            acquired_at,
        });
    }

    pub fn is_valid_session(&self, token: &str) -> bool {
        self.state.lock().sessions.contains(token)
    }

    pub fn logins(&self) -> u32 {
        self.state.lock().logins
    }

    pub fn status_polls(&self) -> u32 {
        self.state.lock().status_polls
    }

    pub fn query_pages(&self) -> u32 {
        self.state.lock().query_pages
    }

    pub fn terminations(&self) -> u32 {
        self.state.lock().terminations
    }

    /// `(from, to)` of every query page request, in order.
    pub fn windows(&self) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
        self.state.lock().windows.clone()
    }
}

// =============================================================================
// Shared Handlers
// =============================================================================

fn fault(status: StatusCode, code: i64, description: &str) -> Response {
    (
        status,
        Json(json!({
            "exception": {
                "serviceCode": "FAKE-EX",
                "exceptionDetailList": [
                    {"exceptionCode": code, "exceptionDescription": description}
                ]
            }
        })),
    )
        .into_response()
}

fn unauthorized() -> Response {
    fault(StatusCode::UNAUTHORIZED, 21301, "Brak autoryzacji.")
}

fn no_results() -> Response {
    fault(
        StatusCode::BAD_REQUEST,
        21164,
        "Brak wyników wyszukiwania dla podanych kryteriów.",
    )
}

async fn challenge(State(state): State<Arc<FakeState>>) -> Response {
    if state.options.empty_challenge {
        return Json(json!({})).into_response();
    }

    let issued_at = Utc::now().trunc_subsecs(3);
    let mut inner = state.lock();
    let value = format!("20240301-CR-{:010}", inner.next_id());
    inner
        .challenges
        .insert(value.clone(), issued_at.timestamp_millis().to_string());

    Json(json!({
        "timestamp": issued_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        "challenge": value,
    }))
    .into_response()
}

/// Consumes `challenge` and checks the token decrypts to `secret|millis`.
fn check_token(inner: &mut Inner, challenge: &str, encrypted: &str) -> bool {
    let Some(millis) = inner.challenges.remove(challenge) else {
        return false;
    };
    let Ok(ciphertext) = STANDARD.decode(encrypted) else {
        return false;
    };
    let Ok(plaintext) = private_key().decrypt(Pkcs1v15Encrypt, &ciphertext) else {
        return false;
    };
    plaintext == format!("{}|{}", FakeKsef::SECRET, millis).as_bytes()
}

fn parse_time(raw: Option<&str>) -> Option<DateTime<Utc>> {
    raw.and_then(|r| DateTime::parse_from_rfc3339(r).ok())
        .map(|at| at.with_timezone(&Utc))
}

/// Invoices in `[from, to]`, oldest first. The upper bound is inclusive
/// here so clients have to drop it themselves.
fn matching(inner: &Inner, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<FakeInvoice> {
    let mut found: Vec<_> = inner
        .invoices
        .iter()
        .filter(|i| i.acquired_at >= from && i.acquired_at <= to)
        .cloned()
        .collect();
    found.sort_by_key(|i| i.acquired_at);
    found
}

fn page_params(params: &HashMap<String, String>, offset: &str, size: &str) -> (usize, usize) {
    let offset = params.get(offset).and_then(|v| v.parse().ok()).unwrap_or(0);
    let size = params.get(size).and_then(|v| v.parse().ok()).unwrap_or(100);
    (offset, size)
}

/// Common query prologue: failure modes, window capture, page slicing.
fn run_query(
    state: &FakeState,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    offset: usize,
    size: usize,
) -> Result<(Vec<FakeInvoice>, usize), Response> {
    let mut inner = state.lock();
    inner.query_pages += 1;

    if let Some(status) = state.options.query_failure_status {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return Err(status.into_response());
    }

    let (Some(from), Some(to)) = (from, to) else {
        return Err(fault(StatusCode::BAD_REQUEST, 21405, "Błąd walidacji."));
    };
    inner.windows.push((from, to));

    if state.options.no_results {
        return Err(no_results());
    }

    let all = matching(&inner, from, to);
    if all.is_empty() {
        return Err(no_results());
    }

    let total = all.len();
    let page = all.into_iter().skip(offset * size).take(size).collect();
    Ok((page, total))
}

// =============================================================================
// v1 Handlers
// =============================================================================

fn xml_value<'a>(xml: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)? + start;
    Some(&xml[start..end])
}

fn v1_session(headers: &HeaderMap) -> Option<String> {
    headers
        .get("SessionToken")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn v1_init_token(State(state): State<Arc<FakeState>>, body: String) -> Response {
    let (Some(challenge), Some(token)) = (xml_value(&body, "Challenge"), xml_value(&body, "Token"))
    else {
        return fault(StatusCode::BAD_REQUEST, 21405, "Błąd walidacji.");
    };

    let mut inner = state.lock();
    if !check_token(&mut inner, challenge, token) {
        return unauthorized();
    }

    let id = inner.next_id();
    let session = format!("v1-session-{}", id);
    inner.sessions.insert(session.clone());
    inner.logins += 1;

    if state.options.malformed_login {
        return Json(json!({
            "referenceNumber": format!("20240301-SE-{:010}", id),
            "sessionToken": session
        }))
        .into_response();
    }

    Json(json!({
        "referenceNumber": format!("20240301-SE-{:010}", id),
        "timestamp": Utc::now().to_rfc3339(),
        "sessionToken": {"token": session}
    }))
    .into_response()
}

async fn v1_query(
    State(state): State<Arc<FakeState>>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> Response {
    let authorized = v1_session(&headers)
        .map(|token| state.lock().sessions.contains(&token))
        .unwrap_or(false);
    if !authorized {
        return unauthorized();
    }

    let criteria = &body["queryCriteria"];
    let (offset, size) = page_params(&params, "PageOffset", "PageSize");
    let (page, total) = match run_query(
        &state,
        parse_time(criteria["acquisitionTimestampThresholdFrom"].as_str()),
        parse_time(criteria["acquisitionTimestampThresholdTo"].as_str()),
        offset,
        size,
    ) {
        Ok(found) => found,
        Err(response) => return response,
    };

    let list: Vec<Value> = page
        .iter()
        .map(|invoice| {
            json!({
                "ksefReferenceNumber": invoice.reference,
                "invoiceReferenceNumber": format!("FV/{}", invoice.reference),
                "subjectBy": {
                    "issuedByIdentifier": {"type": "onip", "identifier": FakeKsef::TAX_ID},
                    "issuedByName": {"type": "fn", "fullName": "Fake Seller Sp. z o.o."}
                },
                "invoicingDate": invoice.acquired_at.date_naive().to_string(),
                "acquisitionTimestamp":
                    invoice.acquired_at.to_rfc3339_opts(SecondsFormat::Millis, true),
                "net": "100.00",
                "vat": "23.00",
                "gross": "123.00",
                "currency": "PLN"
            })
        })
        .collect();

    Json(json!({
        "invoiceHeaderList": list,
        "numberOfElements": total,
        "pageSize": size,
        "pageOffset": offset
    }))
    .into_response()
}

async fn v1_terminate(State(state): State<Arc<FakeState>>, headers: HeaderMap) -> Response {
    let mut inner = state.lock();
    match v1_session(&headers) {
        Some(token) if inner.sessions.remove(&token) => {
            inner.terminations += 1;
            Json(json!({"processingCode": 200})).into_response()
        }
        _ => unauthorized(),
    }
}

// =============================================================================
// v2 Handlers
// =============================================================================

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

async fn v2_ksef_token(State(state): State<Arc<FakeState>>, Json(body): Json<Value>) -> Response {
    let (Some(challenge), Some(token)) =
        (body["challenge"].as_str(), body["encryptedToken"].as_str())
    else {
        return fault(StatusCode::BAD_REQUEST, 21405, "Błąd walidacji.");
    };
    if body["contextIdentifier"]["value"].as_str() != Some(FakeKsef::TAX_ID) {
        return unauthorized();
    }

    let mut inner = state.lock();
    if !check_token(&mut inner, challenge, token) {
        return unauthorized();
    }

    let id = inner.next_id();
    let auth_token = format!("v2-auth-{}", id);
    inner
        .pending_auth
        .insert(auth_token.clone(), state.options.pending_polls);

    (
        StatusCode::ACCEPTED,
        Json(json!({
            "referenceNumber": format!("20240301-AU-{:010}", id),
            "authenticationToken": {"token": auth_token, "validUntil": Utc::now().to_rfc3339()}
        })),
    )
        .into_response()
}

async fn v2_status(
    State(state): State<Arc<FakeState>>,
    Path(_reference): Path<String>,
    headers: HeaderMap,
) -> Response {
    let Some(auth_token) = bearer(&headers) else {
        return unauthorized();
    };

    let mut inner = state.lock();
    inner.status_polls += 1;

    let Some(remaining) = inner.pending_auth.get_mut(&auth_token) else {
        return unauthorized();
    };
    if *remaining > 0 {
        *remaining -= 1;
        return Json(json!({"status": {"code": 100, "description": "Uwierzytelnianie w toku"}}))
            .into_response();
    }

    inner.pending_auth.remove(&auth_token);
    inner.confirmed_auth.insert(auth_token);
    Json(json!({"status": {"code": 200, "description": "Uwierzytelnianie zakończone sukcesem"}}))
        .into_response()
}

async fn v2_redeem(State(state): State<Arc<FakeState>>, headers: HeaderMap) -> Response {
    let mut inner = state.lock();
    match bearer(&headers) {
        Some(auth_token) if inner.confirmed_auth.remove(&auth_token) => {
            let id = inner.next_id();
            let access = format!("v2-access-{}", id);
            inner.sessions.insert(access.clone());
            inner.logins += 1;
            if state.options.malformed_login {
                return Json(json!({"accessToken": access})).into_response();
            }
            Json(json!({
                "accessToken": {"token": access, "validUntil": Utc::now().to_rfc3339()},
                "refreshToken": {"token": format!("v2-refresh-{}", id)}
            }))
            .into_response()
        }
        _ => unauthorized(),
    }
}

async fn v2_query(
    State(state): State<Arc<FakeState>>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> Response {
    let authorized = bearer(&headers)
        .map(|token| state.lock().sessions.contains(&token))
        .unwrap_or(false);
    if !authorized {
        return unauthorized();
    }

    let range = &body["dateRange"];
    let (offset, size) = page_params(&params, "pageOffset", "pageSize");
    let (page, total) = match run_query(
        &state,
        parse_time(range["from"].as_str()),
        parse_time(range["to"].as_str()),
        offset,
        size,
    ) {
        Ok(found) => found,
        Err(response) => return response,
    };

    let invoices: Vec<Value> = page
        .iter()
        .map(|invoice| {
            json!({
                "ksefNumber": invoice.reference,
                "invoiceNumber": format!("FV/{}", invoice.reference),
                "issueDate": invoice.acquired_at.date_naive().to_string(),
                "acquisitionDate": invoice.acquired_at.to_rfc3339_opts(SecondsFormat::Millis, true),
                "seller": {"nip": FakeKsef::TAX_ID, "name": "Fake Seller Sp. z o.o."},
                "netAmount": 100.0,
                "vatAmount": 23.0,
                "grossAmount": 123.0,
                "currency": "PLN"
            })
        })
        .collect();

    Json(json!({
        "invoices": invoices,
        "hasMore": (offset + 1) * size < total
    }))
    .into_response()
}

async fn v2_terminate(State(state): State<Arc<FakeState>>, headers: HeaderMap) -> Response {
    let mut inner = state.lock();
    match bearer(&headers) {
        Some(token) if inner.sessions.remove(&token) => {
            inner.terminations += 1;
            StatusCode::NO_CONTENT.into_response()
        }
        _ => unauthorized(),
    }
}
