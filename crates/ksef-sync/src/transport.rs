//! # HTTP Transport
//!
//! One `reqwest::Client` per protocol client, plus the decoding of the KSeF
//! exception envelope.
//!
//! ## Request Path
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  protocol strategy                                                      │
//! │       │  transport.post("online/Session/AuthorisationChallenge")        │
//! │       ▼                                                                 │
//! │  HttpTransport                                                          │
//! │   • base URL + relative path                                            │
//! │   • default headers (User-Agent, Accept, Accept-Language)               │
//! │   • per-call timeout                                                    │
//! │   • explicit proxy only                                                 │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  response status?                                                       │
//! │   ├── 2xx     → decode JSON body          (bad JSON → InvalidResponse)  │
//! │   ├── non-2xx → ServerFault {status, serviceCode, exception codes}      │
//! │   └── none    → Transport / Timeout       (reqwest::Error as source)    │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Exception Envelope
//! ```json
//! {"exception": {
//!     "serviceCode": "20240301-EX-...",
//!     "exceptionDetailList": [
//!         {"exceptionCode": 21164, "exceptionDescription": "..."}
//!     ]
//! }}
//! ```

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Instant;
use tracing::{debug, warn};
use url::Url;

use crate::config::SyncConfig;
use crate::error::{FaultDetail, ServerFault, SyncError, SyncResult};

/// Longest response body kept in errors and logs.
const MAX_BODY_PREVIEW_CHARS: usize = 512;

// =============================================================================
// Exception Envelope
// =============================================================================

#[derive(Debug, Deserialize)]
struct ExceptionEnvelope {
    exception: ExceptionBody,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExceptionBody {
    service_code: Option<String>,
    #[serde(default)]
    exception_detail_list: Vec<ExceptionDetail>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExceptionDetail {
    exception_code: Option<i64>,
    exception_description: Option<String>,
}

/// Builds a fault from a non-success response body.
pub(crate) fn parse_fault(status: u16, body: &str) -> ServerFault {
    match serde_json::from_str::<ExceptionEnvelope>(body) {
        Ok(envelope) => ServerFault {
            status,
            service_code: envelope.exception.service_code,
            details: envelope
                .exception
                .exception_detail_list
                .into_iter()
                .map(|d| FaultDetail {
                    code: d.exception_code,
                    description: d.exception_description,
                })
                .collect(),
            body_preview: None,
        },
        Err(_) => ServerFault {
            status,
            service_code: None,
            details: Vec::new(),
            body_preview: (!body.trim().is_empty()).then(|| preview(body)),
        },
    }
}

fn preview(body: &str) -> String {
    if body.chars().count() <= MAX_BODY_PREVIEW_CHARS {
        body.to_string()
    } else {
        let mut short: String = body.chars().take(MAX_BODY_PREVIEW_CHARS).collect();
        short.push('…');
        short
    }
}

// =============================================================================
// Transport
// =============================================================================

/// HTTP access to one KSeF base endpoint.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: Url,
    timeout_secs: u64,
}

impl HttpTransport {
    /// Builds the client from the `[ksef]` and `[http]` settings.
    pub fn new(config: &SyncConfig) -> SyncResult<Self> {
        let mut base_url = config.base_url()?;
        // Url::join replaces the last segment unless the path ends in '/'
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let mut headers = HeaderMap::new();
        for (name, value) in &config.http.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                SyncError::InvalidConfig(format!("header name '{}': {}", name, e))
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                SyncError::InvalidConfig(format!("header '{}' value: {}", name, e))
            })?;
            headers.insert(name, value);
        }

        let mut builder = Client::builder()
            .timeout(config.http.timeout())
            .default_headers(headers);

        builder = match config.http.proxy_url {
            Some(ref proxy) => {
                let proxy = reqwest::Proxy::all(proxy)
                    .map_err(|e| SyncError::InvalidConfig(format!("proxy_url: {}", e)))?;
                builder.proxy(proxy)
            }
            None => builder.no_proxy(),
        };

        let client = builder
            .build()
            .map_err(|e| SyncError::InvalidConfig(format!("HTTP client: {}", e)))?;

        debug!(
            base_url = %base_url,
            timeout_secs = config.http.timeout_secs,
            proxy = config.http.proxy_url.is_some(),
            "HTTP transport ready"
        );

        Ok(HttpTransport {
            client,
            base_url,
            timeout_secs: config.http.timeout_secs,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolves a path relative to the base URL.
    pub fn endpoint(&self, path: &str) -> SyncResult<Url> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }

    /// Starts a request against `path`.
    pub fn request(&self, method: Method, path: &str) -> SyncResult<RequestBuilder> {
        Ok(self.client.request(method, self.endpoint(path)?))
    }

    pub fn get(&self, path: &str) -> SyncResult<RequestBuilder> {
        self.request(Method::GET, path)
    }

    pub fn post(&self, path: &str) -> SyncResult<RequestBuilder> {
        self.request(Method::POST, path)
    }

    pub fn delete(&self, path: &str) -> SyncResult<RequestBuilder> {
        self.request(Method::DELETE, path)
    }

    /// Sends `request` and decodes a JSON success body.
    pub async fn send_json<T: DeserializeOwned>(
        &self,
        operation: &str,
        request: RequestBuilder,
    ) -> SyncResult<T> {
        let body = self.send_text(operation, request).await?;

        serde_json::from_str(&body).map_err(|e| {
            warn!(operation, error = %e, "Malformed response body");
            SyncError::InvalidResponse(format!(
                "{}: {} (body: {})",
                operation,
                e,
                preview(&body)
            ))
        })
    }

    /// Like [`send_json`](Self::send_json), for responses that carry a
    /// session or access token. A decode failure reports only where the body
    /// stopped matching; neither the body nor serde's message (which quotes
    /// the offending value) reaches the error or the log.
    pub async fn send_credential_json<T: DeserializeOwned>(
        &self,
        operation: &str,
        request: RequestBuilder,
    ) -> SyncResult<T> {
        let body = self.send_text(operation, request).await?;
        serde_json::from_str(&body).map_err(|e| redacted_decode_error(operation, &e))
    }

    /// Sends `request`, ignoring any success body.
    pub async fn send_empty(&self, operation: &str, request: RequestBuilder) -> SyncResult<()> {
        self.send_text(operation, request).await.map(|_| ())
    }

    async fn send_text(&self, operation: &str, request: RequestBuilder) -> SyncResult<String> {
        let started = Instant::now();
        let response = request
            .send()
            .await
            .map_err(|e| SyncError::transport(operation, self.timeout_secs, e))?;

        let status = response.status();
        debug!(
            operation,
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "KSeF call"
        );

        let body = read_body(operation, self.timeout_secs, response).await?;

        if status.is_success() {
            Ok(body)
        } else {
            let fault = parse_fault(status.as_u16(), &body);
            debug!(operation, fault = %fault, "KSeF call failed");
            Err(SyncError::Server(fault))
        }
    }

    /// GET `path`; true only on a 2xx. Never errors.
    pub async fn probe(&self, path: &str) -> bool {
        let request = match self.get(path) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "Connectivity probe URL invalid");
                return false;
            }
        };

        match request.send().await {
            Ok(response) => {
                let ok = response.status().is_success();
                debug!(status = response.status().as_u16(), ok, "Connectivity probe");
                ok
            }
            Err(e) => {
                debug!(error = %e, "Connectivity probe failed");
                false
            }
        }
    }
}

fn redacted_decode_error(operation: &str, e: &serde_json::Error) -> SyncError {
    warn!(
        operation,
        category = ?e.classify(),
        line = e.line(),
        column = e.column(),
        "Malformed credential response"
    );
    SyncError::InvalidResponse(format!(
        "{}: unexpected response shape ({:?} error at line {} column {})",
        operation,
        e.classify(),
        e.line(),
        e.column()
    ))
}

async fn read_body(operation: &str, timeout_secs: u64, response: Response) -> SyncResult<String> {
    response
        .text()
        .await
        .map_err(|e| SyncError::transport(operation, timeout_secs, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport(base: &str) -> HttpTransport {
        let mut config = SyncConfig::default();
        config.ksef.base_url = Some(base.to_string());
        HttpTransport::new(&config).unwrap()
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let t = transport("https://ksef-test.mf.gov.pl/api");
        assert_eq!(
            t.endpoint("online/Session/AuthorisationChallenge")
                .unwrap()
                .as_str(),
            "https://ksef-test.mf.gov.pl/api/online/Session/AuthorisationChallenge"
        );

        let t = transport("https://ksef-test.mf.gov.pl/api/");
        assert_eq!(
            t.endpoint("/v2/auth/challenge").unwrap().as_str(),
            "https://ksef-test.mf.gov.pl/api/v2/auth/challenge"
        );
    }

    #[test]
    fn test_parse_structured_fault() {
        let body = r#"{"exception":{"serviceCode":"20240301-EX-ABC","exceptionDetailList":[
            {"exceptionCode":21164,"exceptionDescription":"Brak wyników wyszukiwania."}]}}"#;
        let fault = parse_fault(400, body);

        assert_eq!(fault.status, 400);
        assert_eq!(fault.service_code.as_deref(), Some("20240301-EX-ABC"));
        assert!(fault.has_code(21164));
        assert_eq!(fault.reason(), "Brak wyników wyszukiwania.");
        assert!(fault.body_preview.is_none());
    }

    #[test]
    fn test_parse_unstructured_fault() {
        let fault = parse_fault(502, "<html>Bad Gateway</html>");
        assert!(fault.details.is_empty());
        assert_eq!(fault.body_preview.as_deref(), Some("<html>Bad Gateway</html>"));

        let fault = parse_fault(503, "");
        assert!(fault.body_preview.is_none());
    }

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        let long = "ż".repeat(MAX_BODY_PREVIEW_CHARS + 10);
        let short = preview(&long);
        assert_eq!(short.chars().count(), MAX_BODY_PREVIEW_CHARS + 1);
        assert!(short.ends_with('…'));
    }

    #[test]
    fn test_invalid_header_rejected() {
        let mut config = SyncConfig::default();
        config
            .http
            .headers
            .insert("Bad Header".to_string(), "x".to_string());
        assert!(matches!(
            HttpTransport::new(&config),
            Err(SyncError::InvalidConfig(_))
        ));
    }

    /// Serves `app` on a loopback port and returns its `/api` base URL.
    async fn serve(app: axum::Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        format!("http://{}/api", addr)
    }

    #[derive(Debug, Deserialize)]
    #[allow(dead_code)]
    struct TokenBody {
        token: String,
    }

    #[derive(Debug, Deserialize)]
    #[allow(dead_code)]
    #[serde(rename_all = "camelCase")]
    struct LoginBody {
        session_token: TokenBody,
    }

    #[tokio::test]
    async fn test_credential_decode_error_hides_body() {
        const TOKEN: &str = "SESSION-TOKEN-5260250274-XYZ";
        let app = axum::Router::new().route(
            "/api/online/Session/InitToken",
            axum::routing::post(|| async {
                axum::Json(serde_json::json!({"referenceNumber": "R1", "sessionToken": TOKEN}))
            }),
        );
        let t = transport(&serve(app).await);

        let request = t.post("online/Session/InitToken").unwrap();
        let err = t
            .send_credential_json::<LoginBody>("init session", request)
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::InvalidResponse(_)));
        let message = err.to_string();
        assert!(message.contains("init session"));
        assert!(!message.contains(TOKEN));
        assert!(!message.contains("sessionToken"));

        // plain decoding still shows the body for ordinary responses
        let request = t.post("online/Session/InitToken").unwrap();
        let err = t
            .send_json::<LoginBody>("init session", request)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("referenceNumber"));
    }

    #[tokio::test]
    async fn test_slow_response_times_out() {
        let app = axum::Router::new().route(
            "/api/common/Status",
            axum::routing::get(|| async {
                tokio::time::sleep(std::time::Duration::from_secs(3)).await;
                "OK"
            }),
        );
        let mut config = SyncConfig::default();
        config.ksef.base_url = Some(serve(app).await);
        config.http.timeout_secs = 1;
        let t = HttpTransport::new(&config).unwrap();

        let started = Instant::now();
        let request = t.get("common/Status").unwrap();
        let err = t.send_empty("status", request).await.unwrap_err();

        assert!(matches!(err, SyncError::Timeout { secs: 1, .. }));
        assert!(err.is_retryable());
        assert!(started.elapsed() < std::time::Duration::from_millis(2500));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transport_error() {
        // port 9 (discard) on loopback is closed on test machines
        let t = transport("http://127.0.0.1:9/api");
        let request = t.get("common/Status").unwrap();
        let err = t
            .send_json::<serde_json::Value>("probe", request)
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Transport { .. }));
        assert!(err.is_retryable());
        assert!(!t.probe("common/Status").await);
    }
}
