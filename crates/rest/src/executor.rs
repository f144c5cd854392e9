//! Retrying request executor
//!
//! [`RestExecutor::perform`] signs and sends a request, follows temporary
//! redirects, retries the failures the storage services document as
//! transient, and turns everything else into a [`ServiceError`]. Every path
//! that does not hand the response back to the caller releases its
//! connection first.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use jiff::{SignedDuration, Timestamp};
use reqwest::Method;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, DATE, HOST, HeaderMap, LOCATION};
use stowage_core::{Error, HttpSettings, Result, ServiceError};
use url::Url;

use crate::body::RepeatableBody;
use crate::release::ReleasingBody;
use crate::signing::{Signer, parse_http_date};
use crate::transport::{HttpTransport, TransportRequest, TransportResponse};

/// Temporary redirects followed before giving up
pub const MAX_REDIRECTS: u32 = 5;

/// Base delay between attempts after a 500 or 503
const INTERNAL_ERROR_BASE_DELAY_MS: u64 = 50;

/// A request to send, possibly several times
#[derive(Debug, Clone)]
pub struct RestRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<RepeatableBody>,
}

impl RestRequest {
    /// Create a request with no headers or body
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// Attach an upload body
    pub fn with_body(mut self, body: RepeatableBody) -> Self {
        self.body = Some(body);
        self
    }

    fn to_transport(&self) -> TransportRequest {
        TransportRequest {
            method: self.method.clone(),
            url: self.url.clone(),
            headers: self.headers.clone(),
            body: self.body.clone(),
        }
    }

    fn path_and_query(&self) -> String {
        match self.url.query() {
            Some(q) => format!("{}?{}", self.url.path(), q),
            None => self.url.path().to_string(),
        }
    }

    fn host(&self) -> String {
        let host = self.url.host_str().unwrap_or_default();
        match self.url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        }
    }
}

/// A response with one of the expected status codes
#[derive(Debug)]
pub struct RestResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: ReleasingBody,
}

impl RestResponse {
    /// A response header as text
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers
            .get(name)
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
    }
}

/// Sends signed requests with bounded retry
pub struct RestExecutor {
    transport: Arc<dyn HttpTransport>,
    signer: Signer,
    settings: HttpSettings,
    time_offset_secs: AtomicI64,
}

#[derive(Default)]
struct Attempts {
    redirects: u32,
    internal_errors: u32,
    request_timeouts: u32,
    clock_skew: u32,
    put_no_such_key: u32,
    transport_errors: u32,
}

impl RestExecutor {
    /// Create an executor
    pub fn new(transport: Arc<dyn HttpTransport>, signer: Signer, settings: HttpSettings) -> Self {
        Self {
            transport,
            signer,
            settings,
            time_offset_secs: AtomicI64::new(0),
        }
    }

    /// Signer used for every request
    pub fn signer(&self) -> &Signer {
        &self.signer
    }

    /// HTTP settings in effect
    pub fn settings(&self) -> &HttpSettings {
        &self.settings
    }

    /// Seconds added to the local clock when dating requests
    pub fn time_offset_secs(&self) -> i64 {
        self.time_offset_secs.load(Ordering::Relaxed)
    }

    /// Current time as the service sees it
    pub fn now(&self) -> Timestamp {
        let offset = SignedDuration::from_secs(self.time_offset_secs());
        let now = Timestamp::now();
        now.checked_add(offset).unwrap_or(now)
    }

    fn adjust_clock(&self, response_headers: &HeaderMap) {
        let server_time = response_headers
            .get(DATE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_http_date);
        if let Some(server_time) = server_time {
            let offset = server_time.as_second() - Timestamp::now().as_second();
            self.time_offset_secs.store(offset, Ordering::Relaxed);
            tracing::warn!(
                offset_secs = offset,
                "Adjusted time offset in response to RequestTimeTooSkewed error. Local machine and service disagree on the time"
            );
        }
    }

    /// Send `request`, retrying until a response with one of
    /// `expected_codes` arrives or the failure is final
    pub async fn perform(&self, mut request: RestRequest, expected_codes: &[u16]) -> Result<RestResponse> {
        let mut attempts = Attempts::default();
        let mut recently_redirected = false;

        loop {
            if recently_redirected {
                recently_redirected = false;
            } else {
                self.signer.authorize(&mut request, self.now())?;
            }

            if let Some(body) = &request.body {
                body.rewind().await.map_err(|e| {
                    self.enrich(
                        ServiceError::new(format!("Unable to replay request body: {e}")),
                        &request,
                        None,
                    )
                })?;
            }

            tracing::debug!(
                method = %request.method,
                url = %request.url,
                "Performing request"
            );

            let response = match self.transport.execute(request.to_transport()).await {
                Ok(response) => response,
                Err(e) => {
                    let replayable = request.body.as_ref().is_none_or(|b| b.is_repeatable());
                    if replayable && attempts.transport_errors < self.settings.retry_max {
                        attempts.transport_errors += 1;
                        tracing::warn!(
                            method = %request.method,
                            path = %request.path_and_query(),
                            attempt = attempts.transport_errors,
                            "Retrying request after transport failure: {e}"
                        );
                        continue;
                    }
                    tracing::error!(
                        method = %request.method,
                        path = %request.path_and_query(),
                        "Request failed: {e}"
                    );
                    return Err(self.enrich(
                        ServiceError::new(format!("Request Error: {e}")),
                        &request,
                        None,
                    ));
                }
            };

            let status = response.status;

            if status == 307 {
                let mut response = response;
                response.body.close();
                // Sign against the original host before following
                self.signer.authorize(&mut request, self.now())?;

                let location = response
                    .headers
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|loc| request.url.join(loc).ok());
                let Some(location) = location else {
                    return Err(self.enrich(
                        ServiceError::new("Received 307 redirect without a usable Location header"),
                        &request,
                        Some(&response),
                    ));
                };

                attempts.redirects += 1;
                if attempts.redirects > MAX_REDIRECTS {
                    tracing::error!("Exceeded 307 redirect limit ({MAX_REDIRECTS})");
                    return Err(self.enrich(
                        ServiceError::new(format!(
                            "Exceeded 307 redirect limit ({MAX_REDIRECTS})."
                        )),
                        &request,
                        Some(&response),
                    ));
                }

                tracing::debug!(location = %location, "Following temporary redirect");
                request.url = location;
                recently_redirected = true;
                continue;
            }

            if status == 500 || status == 503 {
                let mut response = response;
                response.body.close();
                attempts.internal_errors += 1;
                if attempts.internal_errors > self.settings.internal_error_retry_max {
                    tracing::error!(
                        method = %request.method,
                        path = %request.path_and_query(),
                        status,
                        "Encountered too many internal server errors"
                    );
                    return Err(self.enrich(
                        ServiceError::new(format!(
                            "Encountered too many Internal Server errors ({}), aborting request.",
                            attempts.internal_errors
                        )),
                        &request,
                        Some(&response),
                    ));
                }
                let n = u64::from(attempts.internal_errors);
                let delay = Duration::from_millis(INTERNAL_ERROR_BASE_DELAY_MS * n * n);
                tracing::warn!(
                    status,
                    attempt = attempts.internal_errors,
                    delay_ms = delay.as_millis() as u64,
                    "Internal server error, retrying"
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            if expected_codes.contains(&status) {
                let mut response = response;
                if !response_has_content(&request.method, &response) {
                    response.body.close();
                }
                return Ok(RestResponse {
                    status,
                    headers: response.headers,
                    body: response.body,
                });
            }

            tracing::warn!(
                method = %request.method,
                path = %request.path_and_query(),
                status,
                request_headers = %flatten_headers(&request.headers),
                response_headers = %flatten_headers(&response.headers),
                "Response has unexpected status"
            );

            let is_xml = response
                .headers
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|ct| ct.contains("xml"));
            let has_content = response_has_content(&request.method, &response);

            let TransportResponse {
                status_text,
                headers,
                body,
                ..
            } = response;
            let text = if has_content {
                body.text().await.ok().filter(|t| !t.is_empty())
            } else {
                drop(body);
                None
            };
            let exchange = ResponseSummary {
                status,
                status_text,
                headers,
            };

            let text = match text {
                Some(t) if is_xml => t,
                other => {
                    let message = match other {
                        Some(t) => format!("Request Error [{t}]."),
                        None => "Request Error.".to_string(),
                    };
                    return Err(self.enrich_summary(
                        ServiceError::new(message),
                        &request,
                        &exchange,
                    ));
                }
            };

            let error = ServiceError::from_xml("Service Error Message.", text);
            let code = error.error_code.clone().unwrap_or_default();

            match code.as_str() {
                "RequestTimeout" if attempts.request_timeouts < self.settings.retry_max => {
                    attempts.request_timeouts += 1;
                    tracing::warn!(
                        attempt = attempts.request_timeouts,
                        "Response '{}' - Received error response with XML message, retrying",
                        request.path_and_query()
                    );
                    continue;
                }
                "RequestTimeTooSkewed" if attempts.clock_skew < self.settings.retry_max => {
                    attempts.clock_skew += 1;
                    self.adjust_clock(&exchange.headers);
                    continue;
                }
                "NoSuchKey"
                    if request.method == Method::PUT
                        && status == 404
                        && attempts.put_no_such_key < self.settings.retry_max =>
                {
                    attempts.put_no_such_key += 1;
                    tracing::warn!(
                        attempt = attempts.put_no_such_key,
                        "Spurious NoSuchKey response to PUT, retrying"
                    );
                    continue;
                }
                "RequestTimeout" | "RequestTimeTooSkewed" => {
                    tracing::error!(code = %code, "Exceeded maximum number of retries");
                }
                _ => {}
            }

            return Err(self.enrich_summary(error, &request, &exchange));
        }
    }

    fn enrich(
        &self,
        error: ServiceError,
        request: &RestRequest,
        response: Option<&TransportResponse>,
    ) -> Error {
        match response {
            Some(r) => self.enrich_summary(
                error,
                request,
                &ResponseSummary {
                    status: r.status,
                    status_text: r.status_text.clone(),
                    headers: r.headers.clone(),
                },
            ),
            None => {
                let mut error = error;
                error.request_verb = Some(request.method.to_string());
                error.request_path = Some(request.path_and_query());
                error.request_host = Some(request.host());
                Error::from(error)
            }
        }
    }

    fn enrich_summary(
        &self,
        mut error: ServiceError,
        request: &RestRequest,
        response: &ResponseSummary,
    ) -> Error {
        let provider = self.signer.provider();
        let header = |name: &str| {
            response
                .headers
                .get(name)
                .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
        };

        if !error.is_parsed_from_xml()
            && let (Some(request_id), Some(host_id)) = (
                header(provider.request_id_header()),
                header(provider.host_id_header()),
            )
        {
            error.set_request_and_host_ids(request_id, host_id);
        }

        error.status_code = Some(response.status);
        error.status_text = Some(response.status_text.clone());
        error.request_verb = Some(request.method.to_string());
        error.request_path = Some(request.path_and_query());
        error.request_host = request
            .headers
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .or_else(|| Some(request.host()));
        error.response_date = header(DATE.as_str());
        error.response_headers = response
            .headers
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_string(),
                    String::from_utf8_lossy(v.as_bytes()).into_owned(),
                )
            })
            .collect::<BTreeMap<_, _>>();
        Error::from(error)
    }
}

struct ResponseSummary {
    status: u16,
    status_text: String,
    headers: HeaderMap,
}

fn response_has_content(method: &Method, response: &TransportResponse) -> bool {
    if *method == Method::HEAD || matches!(response.status, 204 | 304) {
        return false;
    }
    match response.headers.get(CONTENT_LENGTH) {
        Some(len) => len
            .to_str()
            .ok()
            .and_then(|l| l.trim().parse::<u64>().ok())
            .is_none_or(|l| l > 0),
        None => true,
    }
}

fn flatten_headers(headers: &HeaderMap) -> String {
    headers
        .iter()
        .map(|(k, v)| {
            let value = if *k == reqwest::header::AUTHORIZATION {
                "***".into()
            } else {
                String::from_utf8_lossy(v.as_bytes()).replace(['\r', '\n'], "")
            };
            format!("{k}: {value}")
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    use reqwest::header::{AUTHORIZATION, HeaderValue};
    use stowage_core::Credentials;
    use tokio::io::AsyncReadExt;

    use crate::provider::Provider;
    use crate::signing::Endpoint;
    use crate::transport::MockHttpTransport;

    /// Canned response for the scripted transport
    #[derive(Clone, Default)]
    pub(crate) struct Scripted {
        pub status: u16,
        pub headers: Vec<(&'static str, String)>,
        pub body: Vec<u8>,
        pub fail: bool,
    }

    impl Scripted {
        pub fn status(status: u16) -> Self {
            Self {
                status,
                ..Default::default()
            }
        }

        pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
            self.headers.push((name, value.into()));
            self
        }

        pub fn xml(mut self, body: &str) -> Self {
            self.headers.push(("content-type", "application/xml".into()));
            self.body = body.as_bytes().to_vec();
            self
        }

        pub fn body(mut self, body: &[u8]) -> Self {
            self.body = body.to_vec();
            self
        }

        pub fn io_error() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }
    }

    /// What the scripted transport saw for one attempt
    #[derive(Debug, Clone)]
    pub(crate) struct Seen {
        pub method: Method,
        pub url: Url,
        pub headers: HeaderMap,
        pub body: Option<Vec<u8>>,
        pub content_length: Option<u64>,
    }

    /// Transport answering from a script, recording requests and releases
    #[derive(Default)]
    pub(crate) struct ScriptedTransport {
        script: Mutex<VecDeque<Scripted>>,
        pub seen: Mutex<Vec<Seen>>,
        pub releases: Arc<AtomicUsize>,
    }

    impl ScriptedTransport {
        pub fn new(script: Vec<Scripted>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                ..Default::default()
            })
        }

        pub fn seen(&self) -> Vec<Seen> {
            self.seen.lock().unwrap().clone()
        }

        pub fn releases(&self) -> usize {
            self.releases.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn execute(&self, request: TransportRequest) -> Result<TransportResponse> {
            let content_length = request.body.as_ref().and_then(RepeatableBody::content_length);
            let body = match request.body {
                Some(mut body) => {
                    let mut buf = Vec::new();
                    body.read_to_end(&mut buf).await?;
                    Some(buf)
                }
                None => None,
            };
            self.seen.lock().unwrap().push(Seen {
                method: request.method,
                url: request.url,
                headers: request.headers,
                body,
                content_length,
            });

            let next = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .expect("script exhausted");
            if next.fail {
                return Err(Error::Network("connection reset".into()));
            }

            let mut headers = HeaderMap::new();
            for (name, value) in &next.headers {
                headers.append(*name, HeaderValue::from_str(value).unwrap());
            }
            headers.insert(CONTENT_LENGTH, HeaderValue::from(next.body.len()));

            let releases = Arc::clone(&self.releases);
            Ok(TransportResponse {
                status: next.status,
                status_text: String::new(),
                headers,
                body: ReleasingBody::new(std::io::Cursor::new(next.body), move || {
                    releases.fetch_add(1, Ordering::SeqCst);
                }),
            })
        }
    }

    pub(crate) fn test_signer(provider: Provider) -> Signer {
        let endpoint = Endpoint::parse("s3.amazonaws.com", provider, "auto", true, false).unwrap();
        Signer::new(
            Some(Credentials {
                access_key: "AKID".into(),
                secret_key: "secret".into(),
            }),
            provider,
            endpoint,
        )
    }

    fn fast_settings() -> HttpSettings {
        HttpSettings {
            retry_max: 2,
            internal_error_retry_max: 2,
            ..HttpSettings::default()
        }
    }

    fn executor(transport: Arc<ScriptedTransport>) -> RestExecutor {
        RestExecutor::new(transport, test_signer(Provider::S3), fast_settings())
    }

    fn get(url: &str) -> RestRequest {
        RestRequest::new(Method::GET, Url::parse(url).unwrap())
    }

    fn error_xml(code: &str) -> String {
        format!("<Error><Code>{code}</Code><Message>m</Message><RequestId>rid</RequestId><HostId>hid</HostId></Error>")
    }

    #[tokio::test]
    async fn test_expected_response_is_returned() {
        let transport = ScriptedTransport::new(vec![Scripted::status(200).body(b"payload")]);
        let exec = executor(Arc::clone(&transport));

        let response = exec
            .perform(get("https://bucket.s3.amazonaws.com/key"), &[200])
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(transport.releases(), 0);
        assert_eq!(response.body.bytes().await.unwrap(), b"payload");
        assert_eq!(transport.releases(), 1);

        let seen = transport.seen();
        assert!(seen[0].headers.contains_key(AUTHORIZATION));
        assert!(seen[0].headers.contains_key(DATE));
    }

    #[tokio::test]
    async fn test_empty_expected_response_is_released() {
        let transport = ScriptedTransport::new(vec![Scripted::status(204)]);
        let exec = executor(Arc::clone(&transport));

        let response = exec
            .perform(
                RestRequest::new(Method::DELETE, Url::parse("https://b.s3.amazonaws.com/k").unwrap()),
                &[204],
            )
            .await
            .unwrap();
        assert!(response.body.is_released());
        assert_eq!(transport.releases(), 1);
    }

    #[tokio::test]
    async fn test_retried_upload_replays_identical_body() {
        let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 253) as u8).collect();
        let transport = ScriptedTransport::new(vec![
            Scripted::status(500),
            Scripted::status(200).header("etag", "\"abc\""),
        ]);
        let exec = executor(Arc::clone(&transport));

        let body = RepeatableBody::from_bytes(payload.clone());
        let request = RestRequest::new(
            Method::PUT,
            Url::parse("https://bucket.s3.amazonaws.com/key").unwrap(),
        )
        .with_body(body.clone());

        exec.perform(request, &[200]).await.unwrap();

        let seen = transport.seen();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].body.as_deref(), Some(payload.as_slice()));
        assert_eq!(seen[1].body.as_deref(), Some(payload.as_slice()));
        assert!(body.md5_digest().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_internal_errors_are_bounded() {
        let transport = ScriptedTransport::new(vec![
            Scripted::status(500),
            Scripted::status(503),
            Scripted::status(500),
        ]);
        let exec = executor(Arc::clone(&transport));

        let err = exec
            .perform(get("https://bucket.s3.amazonaws.com/key"), &[200])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Encountered too many Internal Server errors (3)"));
        assert_eq!(err.status_code(), Some(500));
        assert_eq!(transport.seen().len(), 3);
        assert_eq!(transport.releases(), 3);
    }

    #[tokio::test]
    async fn test_redirect_is_signed_for_original_url() {
        let original = "https://bucket.s3.amazonaws.com/key";
        let redirected = "https://bucket.s3-external-1.amazonaws.com/key";
        let transport = ScriptedTransport::new(vec![
            Scripted::status(307).header("location", redirected),
            Scripted::status(200),
        ]);
        let exec = executor(Arc::clone(&transport));

        exec.perform(get(original), &[200]).await.unwrap();

        let seen = transport.seen();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].url.as_str(), redirected);
        assert_eq!(transport.releases(), 2);

        // The second attempt carries a signature made for the original URL at
        // its own Date, not one made for the redirect target
        let date = seen[1].headers.get(DATE).unwrap().to_str().unwrap();
        let signed_at = parse_http_date(date).unwrap();
        let signer = test_signer(Provider::S3);
        let authorization_for = |url: &str| {
            let mut request = get(url);
            signer.authorize(&mut request, signed_at).unwrap();
            request.headers.get(AUTHORIZATION).unwrap().clone()
        };
        let sent = seen[1].headers.get(AUTHORIZATION).unwrap();
        assert_eq!(sent, &authorization_for(original));
        assert_ne!(sent, &authorization_for(redirected));
    }

    #[tokio::test]
    async fn test_redirect_limit() {
        let script = (0..6)
            .map(|i| Scripted::status(307).header("location", format!("https://h{i}.example.com/key")))
            .collect();
        let transport = ScriptedTransport::new(script);
        let exec = executor(Arc::clone(&transport));

        let err = exec
            .perform(get("https://bucket.s3.amazonaws.com/key"), &[200])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Exceeded 307 redirect limit (5)"));
        assert_eq!(transport.seen().len(), 6);
        assert_eq!(transport.releases(), 6);
    }

    #[tokio::test]
    async fn test_request_timeout_is_retried() {
        let transport = ScriptedTransport::new(vec![
            Scripted::status(400).xml(&error_xml("RequestTimeout")),
            Scripted::status(200),
        ]);
        let exec = executor(Arc::clone(&transport));

        exec.perform(get("https://bucket.s3.amazonaws.com/key"), &[200])
            .await
            .unwrap();
        assert_eq!(transport.seen().len(), 2);
    }

    #[tokio::test]
    async fn test_request_timeout_retries_are_bounded() {
        let transport = ScriptedTransport::new(vec![
            Scripted::status(400).xml(&error_xml("RequestTimeout")),
            Scripted::status(400).xml(&error_xml("RequestTimeout")),
            Scripted::status(400).xml(&error_xml("RequestTimeout")),
        ]);
        let exec = executor(Arc::clone(&transport));

        let err = exec
            .perform(get("https://bucket.s3.amazonaws.com/key"), &[200])
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), Some("RequestTimeout"));
        assert_eq!(transport.seen().len(), 3);
    }

    #[tokio::test]
    async fn test_clock_skew_adjusts_offset() {
        let server_time = Timestamp::now()
            .checked_add(SignedDuration::from_hours(2))
            .unwrap();
        let transport = ScriptedTransport::new(vec![
            Scripted::status(403)
                .xml(&error_xml("RequestTimeTooSkewed"))
                .header("date", crate::signing::http_date(server_time)),
            Scripted::status(200),
        ]);
        let exec = executor(Arc::clone(&transport));

        exec.perform(get("https://bucket.s3.amazonaws.com/key"), &[200])
            .await
            .unwrap();
        let offset = exec.time_offset_secs();
        assert!((7190..=7210).contains(&offset), "offset was {offset}");
    }

    #[tokio::test]
    async fn test_spurious_put_no_such_key_is_retried() {
        let transport = ScriptedTransport::new(vec![
            Scripted::status(404).xml(&error_xml("NoSuchKey")),
            Scripted::status(200),
        ]);
        let exec = executor(Arc::clone(&transport));

        let request = RestRequest::new(
            Method::PUT,
            Url::parse("https://bucket.s3.amazonaws.com/key").unwrap(),
        )
        .with_body(RepeatableBody::from_bytes(b"data".to_vec()));
        exec.perform(request, &[200]).await.unwrap();
        assert_eq!(transport.seen().len(), 2);
    }

    #[tokio::test]
    async fn test_get_no_such_key_is_raised() {
        let transport = ScriptedTransport::new(vec![
            Scripted::status(404)
                .xml(&error_xml("NoSuchKey"))
                .header("x-amz-request-id", "header-rid")
                .header("x-amz-id-2", "header-hid"),
        ]);
        let exec = executor(Arc::clone(&transport));

        let err = exec
            .perform(get("https://bucket.s3.amazonaws.com/missing"), &[200])
            .await
            .unwrap_err();
        let service = err.as_service().unwrap();
        assert_eq!(service.error_code.as_deref(), Some("NoSuchKey"));
        assert_eq!(service.status_code, Some(404));
        // Ids parsed from XML take precedence over headers
        assert_eq!(service.request_id.as_deref(), Some("rid"));
        assert_eq!(service.request_verb.as_deref(), Some("GET"));
        assert_eq!(service.request_path.as_deref(), Some("/missing"));
        assert_eq!(service.request_host.as_deref(), Some("bucket.s3.amazonaws.com"));
        assert!(err.is_not_found());
        assert_eq!(transport.releases(), 1);
    }

    #[tokio::test]
    async fn test_non_xml_error_carries_body_text() {
        let transport = ScriptedTransport::new(vec![
            Scripted::status(403)
                .body(b"Forbidden")
                .header("x-amz-request-id", "rid")
                .header("x-amz-id-2", "hid"),
        ]);
        let exec = executor(Arc::clone(&transport));

        let err = exec
            .perform(get("https://bucket.s3.amazonaws.com/key"), &[200])
            .await
            .unwrap_err();
        let service = err.as_service().unwrap();
        assert_eq!(service.message, "Request Error [Forbidden].");
        assert_eq!(service.status_code, Some(403));
        assert_eq!(service.request_id.as_deref(), Some("rid"));
        assert_eq!(service.host_id.as_deref(), Some("hid"));
        assert_eq!(err.exit_code(), 4);
        assert_eq!(transport.releases(), 1);
    }

    #[tokio::test]
    async fn test_transport_errors_are_retried() {
        let transport = ScriptedTransport::new(vec![Scripted::io_error(), Scripted::status(200)]);
        let exec = executor(Arc::clone(&transport));

        exec.perform(get("https://bucket.s3.amazonaws.com/key"), &[200])
            .await
            .unwrap();
        assert_eq!(transport.seen().len(), 2);
    }

    #[tokio::test]
    async fn test_transport_errors_are_bounded() {
        let transport = ScriptedTransport::new(vec![
            Scripted::io_error(),
            Scripted::io_error(),
            Scripted::io_error(),
        ]);
        let exec = executor(Arc::clone(&transport));

        let err = exec
            .perform(get("https://bucket.s3.amazonaws.com/key"), &[200])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("connection reset"));
        assert_eq!(err.exit_code(), 3);
    }

    #[tokio::test]
    async fn test_mock_transport_sees_signed_request() {
        let mut mock = MockHttpTransport::new();
        mock.expect_execute()
            .withf(|req| {
                req.headers
                    .get(AUTHORIZATION)
                    .and_then(|v| v.to_str().ok())
                    .is_some_and(|v| v.starts_with("AWS AKID:"))
            })
            .times(1)
            .returning(|_| {
                Ok(TransportResponse {
                    status: 200,
                    status_text: "OK".into(),
                    headers: HeaderMap::new(),
                    body: ReleasingBody::empty(),
                })
            });

        let exec = RestExecutor::new(Arc::new(mock), test_signer(Provider::S3), fast_settings());
        let response = exec
            .perform(get("https://s3.amazonaws.com/"), &[200])
            .await
            .unwrap();
        assert_eq!(response.status, 200);
    }
}
