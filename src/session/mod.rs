//! Session configuration and per-call request resolution.
//!
//! [`SessionConfig`] is validated once by [`crate::ApiClient::setup`] and frozen
//! into a [`ClientSession`]. Every call then resolves its descriptor against
//! the session into a [`PreparedRequest`]: URL joining, query and header
//! precedence, timeouts and certificate policy. The session itself never
//! changes afterwards, so per-call overrides cannot leak between calls.

mod credentials;
mod gates;

use std::path::PathBuf;
use std::time::Duration;

use reqwest::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use thiserror::Error;
use tracing::debug;
use url::Url;

pub use credentials::CredentialStore;
pub use gates::{AssumeOnline, ConnectivityGate, GrantedPermissions, PermissionGate, TcpReachability};

use crate::request::{HttpMethod, QueryValue, RequestBody, RequestDescriptor, ResponseShape};
use crate::transport::constants::{
    CONNECT_TIMEOUT_SECS, DEFAULT_RETRY_DELAYS, DOWNLOAD_RECEIVE_TIMEOUT_SECS,
    RECEIVE_TIMEOUT_SECS, SEND_TIMEOUT_SECS, UPLOAD_SEND_TIMEOUT_SECS,
};
use crate::transport::{
    FileStager, PreparedRequest, RetryPolicy, TlsPolicy, TransportClient, TransportError,
};

/// Per-operation time limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Establishing the TCP/TLS connection.
    pub connect: Duration,
    /// Sending a request.
    pub send: Duration,
    /// Receiving a response.
    pub receive: Duration,
    /// Sending a file upload.
    pub upload_send: Duration,
    /// Receiving a download.
    pub download_receive: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            send: Duration::from_secs(SEND_TIMEOUT_SECS),
            receive: Duration::from_secs(RECEIVE_TIMEOUT_SECS),
            upload_send: Duration::from_secs(UPLOAD_SEND_TIMEOUT_SECS),
            download_receive: Duration::from_secs(DOWNLOAD_RECEIVE_TIMEOUT_SECS),
        }
    }
}

impl Timeouts {
    fn first_zero(&self) -> Option<&'static str> {
        [
            ("connect", self.connect),
            ("send", self.send),
            ("receive", self.receive),
            ("upload_send", self.upload_send),
            ("download_receive", self.download_receive),
        ]
        .into_iter()
        .find(|(_, value)| value.is_zero())
        .map(|(name, _)| name)
    }
}

/// Retry settings for unary calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of retries; `None` disables retrying.
    pub retry_count: Option<u32>,
    /// Delays between attempts; the last one is reused for later retries.
    pub delays: Vec<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retry_count: None,
            delays: DEFAULT_RETRY_DELAYS.to_vec(),
        }
    }
}

impl RetryConfig {
    /// Enables `retry_count` retries with the given delays (default delays when empty).
    #[must_use]
    pub fn new(retry_count: u32, delays: Vec<Duration>) -> Self {
        Self {
            retry_count: Some(retry_count),
            delays,
        }
    }

    fn to_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_count, self.delays.clone())
    }
}

/// Settings applied to every call of a client.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Base URL joined with relative descriptor paths. May be empty.
    pub base_url: String,
    /// Headers sent with every request.
    pub headers: Vec<(String, String)>,
    /// Query parameters added to every request.
    pub query: Vec<(String, QueryValue)>,
    pub timeouts: Timeouts,
    pub retry: RetryConfig,
    /// Directory for downloads instead of the platform download directory.
    pub download_dir: Option<PathBuf>,
}

impl SessionConfig {
    /// Creates a configuration with defaults for everything but the base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<QueryValue>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = Some(dir.into());
        self
    }
}

/// Errors from [`crate::ApiClient::setup`].
#[derive(Debug, Error)]
pub enum SetupError {
    /// `setup` was already called on this client.
    #[error("client session already initialized")]
    AlreadyInitialized,

    /// The base URL does not parse.
    #[error("invalid base URL {url}: {source}")]
    InvalidBaseUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    /// A session header cannot be sent over HTTP.
    #[error("invalid session header {name}")]
    InvalidHeader { name: String },

    /// A timeout is zero.
    #[error("{name} timeout must be greater than zero")]
    ZeroTimeout { name: &'static str },

    /// The HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    Transport(#[source] reqwest::Error),
}

/// Frozen session state shared by every call.
#[derive(Debug)]
pub(crate) struct ClientSession {
    base_url: Option<Url>,
    headers: HeaderMap,
    query: Vec<(String, QueryValue)>,
    timeouts: Timeouts,
    retry: RetryPolicy,
    stager: FileStager,
    transport: TransportClient,
}

impl ClientSession {
    /// Validates `config` and builds the transport.
    pub(crate) fn from_config(config: SessionConfig) -> Result<Self, SetupError> {
        let base_url = if config.base_url.trim().is_empty() {
            None
        } else {
            let url = Url::parse(config.base_url.trim()).map_err(|source| {
                SetupError::InvalidBaseUrl {
                    url: config.base_url.clone(),
                    source,
                }
            })?;
            Some(url)
        };

        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let (header_name, header_value) = parse_header(name, value)
                .ok_or_else(|| SetupError::InvalidHeader { name: name.clone() })?;
            headers.insert(header_name, header_value);
        }

        if let Some(name) = config.timeouts.first_zero() {
            return Err(SetupError::ZeroTimeout { name });
        }

        let transport =
            TransportClient::new(config.timeouts.connect).map_err(SetupError::Transport)?;
        let stager = config
            .download_dir
            .map_or_else(FileStager::new, FileStager::with_save_dir);

        debug!(
            base_url = base_url.as_ref().map_or("", Url::as_str),
            headers = headers.len(),
            retries = ?config.retry.retry_count,
            "session configured"
        );

        Ok(Self {
            base_url,
            headers,
            query: config.query,
            timeouts: config.timeouts,
            retry: config.retry.to_policy(),
            stager,
            transport,
        })
    }

    pub(crate) fn transport(&self) -> &TransportClient {
        &self.transport
    }

    pub(crate) fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    pub(crate) fn stager(&self) -> &FileStager {
        &self.stager
    }

    /// Resolves a descriptor for a unary, download or decode-and-persist call.
    pub(crate) fn prepare<T>(
        &self,
        descriptor: &RequestDescriptor<T>,
        credentials: &CredentialStore,
    ) -> Result<PreparedRequest, TransportError> {
        let (method, shape) = if descriptor.file_decode() {
            (reqwest::Method::GET, ResponseShape::Json)
        } else {
            (descriptor.method().as_reqwest(), descriptor.shape())
        };

        let mut headers = self.merged_headers(descriptor, credentials)?;
        if !headers.contains_key(ACCEPT) {
            headers.insert(ACCEPT, HeaderValue::from_static(accept_for(descriptor, shape)));
        }
        set_content_type(&mut headers, descriptor.body());

        let send = if descriptor.is_file_upload() {
            self.timeouts.upload_send
        } else {
            self.timeouts.send
        };
        let receive = if descriptor.method() == HttpMethod::Download {
            self.timeouts.download_receive
        } else {
            self.timeouts.receive
        };
        let timeout = descriptor.timeout().unwrap_or(send + receive);

        Ok(PreparedRequest {
            method,
            url: self.resolve_url(descriptor)?,
            headers,
            body: descriptor.body().cloned(),
            timeout: Some(timeout),
            tls: tls_policy(descriptor),
            shape,
            log_body: descriptor.log_body(),
        })
    }

    /// Resolves a descriptor for a server-sent event stream.
    ///
    /// Streams only get the connect timeout: they stay open indefinitely.
    pub(crate) fn prepare_stream<T>(
        &self,
        descriptor: &RequestDescriptor<T>,
        credentials: &CredentialStore,
    ) -> Result<PreparedRequest, TransportError> {
        let mut headers = self.merged_headers(descriptor, credentials)?;
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        set_content_type(&mut headers, descriptor.body());

        Ok(PreparedRequest {
            method: descriptor.method().as_reqwest(),
            url: self.resolve_url(descriptor)?,
            headers,
            body: descriptor.body().cloned(),
            timeout: None,
            tls: tls_policy(descriptor),
            shape: ResponseShape::Text,
            log_body: descriptor.log_body(),
        })
    }

    /// Session headers, then credentials, then call headers.
    fn merged_headers<T>(
        &self,
        descriptor: &RequestDescriptor<T>,
        credentials: &CredentialStore,
    ) -> Result<HeaderMap, TransportError> {
        let mut headers = self.headers.clone();
        credentials.apply(&mut headers)?;
        for (name, value) in descriptor.headers() {
            let (header_name, header_value) =
                parse_header(name, value).ok_or_else(|| TransportError::invalid_header(name))?;
            headers.insert(header_name, header_value);
        }
        Ok(headers)
    }

    fn resolve_url<T>(&self, descriptor: &RequestDescriptor<T>) -> Result<Url, TransportError> {
        let path = descriptor.path();
        let mut url = match Url::parse(path) {
            Ok(absolute) => absolute,
            Err(url::ParseError::RelativeUrlWithoutBase) if !descriptor.ignore_base_url() => {
                let base = self
                    .base_url
                    .as_ref()
                    .ok_or_else(|| TransportError::invalid_url(path))?;
                join_base(base, path)?
            }
            Err(_) => return Err(TransportError::invalid_url(path)),
        };
        merge_query(&mut url, &self.query, descriptor.query());
        Ok(url)
    }
}

/// Joins `path` to `base` with exactly one slash between them.
fn join_base(base: &Url, path: &str) -> Result<Url, TransportError> {
    let joined = if path.is_empty() {
        base.as_str().to_string()
    } else {
        format!(
            "{}/{}",
            base.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    };
    Url::parse(&joined).map_err(|_| TransportError::invalid_url(joined))
}

/// Merges session parameters, the URL's own query and call parameters, in
/// increasing precedence. A key set at a higher level replaces every
/// occurrence below it; a null value removes the key. Repeated keys in the
/// URL's own query are kept as they are.
fn merge_query(url: &mut Url, session: &[(String, QueryValue)], call: &[(String, QueryValue)]) {
    if session.is_empty() && call.is_empty() {
        return;
    }

    let mut pairs: Vec<(String, String)> = Vec::new();
    for (key, value) in session {
        replace_key(&mut pairs, key, value.to_query_string().into_iter().collect());
    }

    let mut own: Vec<(String, Vec<String>)> = Vec::new();
    for (key, value) in url.query_pairs().into_owned() {
        match own.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, values)) => values.push(value),
            None => own.push((key, vec![value])),
        }
    }
    for (key, values) in own {
        replace_key(&mut pairs, &key, values);
    }

    for (key, value) in call {
        replace_key(&mut pairs, key, value.to_query_string().into_iter().collect());
    }

    if pairs.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(pairs);
    }
}

/// Replaces all occurrences of `key` with `values`, at the position of its
/// first occurrence or at the end. Empty `values` removes the key.
fn replace_key(pairs: &mut Vec<(String, String)>, key: &str, values: Vec<String>) {
    let position = pairs.iter().position(|(k, _)| k == key);
    pairs.retain(|(k, _)| k != key);
    let at = position.unwrap_or(pairs.len());
    pairs.splice(at..at, values.into_iter().map(|value| (key.to_string(), value)));
}

fn parse_header(name: &str, value: &str) -> Option<(HeaderName, HeaderValue)> {
    let header_name = HeaderName::from_bytes(name.as_bytes()).ok()?;
    let header_value = HeaderValue::from_str(value).ok()?;
    Some((header_name, header_value))
}

fn accept_for<T>(descriptor: &RequestDescriptor<T>, shape: ResponseShape) -> &'static str {
    if descriptor.method() == HttpMethod::Download {
        return "*/*";
    }
    match shape {
        ResponseShape::Json => "application/json",
        ResponseShape::Text => "text/plain, */*",
        ResponseShape::Bytes => "application/octet-stream, */*",
    }
}

fn set_content_type(headers: &mut HeaderMap, body: Option<&RequestBody>) {
    if headers.contains_key(CONTENT_TYPE) {
        return;
    }
    let content_type = match body {
        Some(RequestBody::Json(_)) => "application/json",
        Some(RequestBody::Text(_)) => "text/plain; charset=utf-8",
        Some(RequestBody::Bytes(_)) => "application/octet-stream",
        None => return,
    };
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
}

fn tls_policy<T>(descriptor: &RequestDescriptor<T>) -> TlsPolicy {
    if descriptor.ignore_cert_validation() {
        TlsPolicy::AcceptInvalid
    } else {
        TlsPolicy::Verify
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use reqwest::header::AUTHORIZATION;

    fn session(config: SessionConfig) -> ClientSession {
        ClientSession::from_config(config).unwrap()
    }

    // ==================== Setup Validation Tests ====================

    #[test]
    fn test_from_config_rejects_bad_base_url() {
        let result = ClientSession::from_config(SessionConfig::new("not a url"));
        assert!(matches!(result, Err(SetupError::InvalidBaseUrl { .. })));
    }

    #[test]
    fn test_from_config_rejects_bad_header() {
        let config = SessionConfig::new("https://api.example.com").with_header("bad name", "x");
        let result = ClientSession::from_config(config);
        assert!(matches!(result, Err(SetupError::InvalidHeader { .. })));
    }

    #[test]
    fn test_from_config_rejects_zero_timeout() {
        let config = SessionConfig::new("https://api.example.com").with_timeouts(Timeouts {
            receive: Duration::ZERO,
            ..Timeouts::default()
        });
        let result = ClientSession::from_config(config);
        assert!(matches!(
            result,
            Err(SetupError::ZeroTimeout { name: "receive" })
        ));
    }

    #[test]
    fn test_default_timeouts() {
        let timeouts = Timeouts::default();
        assert_eq!(timeouts.connect, Duration::from_secs(30));
        assert_eq!(timeouts.upload_send, Duration::from_secs(300));
        assert_eq!(timeouts.download_receive, Duration::from_secs(300));
    }

    // ==================== URL Resolution Tests ====================

    #[test]
    fn test_prepare_joins_base_with_single_slash() {
        let credentials = CredentialStore::new();
        for base in ["https://api.example.com/v1", "https://api.example.com/v1/"] {
            let session = session(SessionConfig::new(base));
            for path in ["users/1", "/users/1"] {
                let descriptor = RequestDescriptor::get(path).build();
                let request = session.prepare(&descriptor, &credentials).unwrap();
                assert_eq!(request.url.as_str(), "https://api.example.com/v1/users/1");
            }
        }
    }

    #[test]
    fn test_prepare_absolute_path_ignores_base() {
        let session = session(SessionConfig::new("https://api.example.com"));
        let descriptor = RequestDescriptor::get("https://cdn.example.com/a.png").build();
        let request = session.prepare(&descriptor, &CredentialStore::new()).unwrap();
        assert_eq!(request.url.as_str(), "https://cdn.example.com/a.png");
    }

    #[test]
    fn test_prepare_ignore_base_url_requires_absolute_path() {
        let session = session(SessionConfig::new("https://api.example.com"));
        let descriptor = RequestDescriptor::get("/users").ignore_base_url().build();
        let result = session.prepare(&descriptor, &CredentialStore::new());
        assert!(matches!(result, Err(TransportError::InvalidUrl { .. })));
    }

    #[test]
    fn test_prepare_relative_path_without_base_fails() {
        let session = session(SessionConfig::default());
        let descriptor = RequestDescriptor::get("/users").build();
        let result = session.prepare(&descriptor, &CredentialStore::new());
        assert!(matches!(result, Err(TransportError::InvalidUrl { .. })));
    }

    #[test]
    fn test_query_precedence_and_null_removal() {
        let session = session(
            SessionConfig::new("https://api.example.com")
                .with_query("lang", "en")
                .with_query("page", 1),
        );
        let descriptor = RequestDescriptor::get("/items?page=2&sort=asc&keep=yes")
            .query("page", 3)
            .query("sort", None::<&str>)
            .build();
        let request = session.prepare(&descriptor, &CredentialStore::new()).unwrap();
        assert_eq!(request.url.query(), Some("lang=en&page=3&keep=yes"));
    }

    #[test]
    fn test_query_keeps_repeated_keys_from_path() {
        let session = session(SessionConfig::new("https://api.example.com"));
        let descriptor = RequestDescriptor::get("/items?tag=a&tag=b")
            .query("page", 1)
            .build();
        let request = session.prepare(&descriptor, &CredentialStore::new()).unwrap();
        assert_eq!(request.url.query(), Some("tag=a&tag=b&page=1"));
    }

    #[test]
    fn test_query_call_value_replaces_every_repeated_key() {
        let session = session(SessionConfig::new("https://api.example.com").with_query("tag", "s"));
        let descriptor = RequestDescriptor::get("/items?tag=a&x=1&tag=b")
            .query("tag", "c")
            .build();
        let request = session.prepare(&descriptor, &CredentialStore::new()).unwrap();
        assert_eq!(request.url.query(), Some("tag=c&x=1"));

        let descriptor = RequestDescriptor::get("/items?tag=a&tag=b")
            .query("tag", None::<&str>)
            .build();
        let request = session.prepare(&descriptor, &CredentialStore::new()).unwrap();
        assert_eq!(request.url.query(), None);
    }

    #[test]
    fn test_query_untouched_without_parameters() {
        let session = session(SessionConfig::new("https://api.example.com"));
        let descriptor = RequestDescriptor::get("/items?a=1").build();
        let request = session.prepare(&descriptor, &CredentialStore::new()).unwrap();
        assert_eq!(request.url.query(), Some("a=1"));
    }

    // ==================== Header Tests ====================

    #[test]
    fn test_header_precedence() {
        let session = session(
            SessionConfig::new("https://api.example.com")
                .with_header("x-app", "session")
                .with_header("authorization", "Basic old"),
        );
        let credentials = CredentialStore::new();
        credentials.set_bearer_token(Some("tok"));
        let descriptor = RequestDescriptor::get("/me").header("x-app", "call").build();
        let request = session.prepare(&descriptor, &credentials).unwrap();
        assert_eq!(request.headers.get("x-app").unwrap(), "call");
        assert_eq!(request.headers.get(AUTHORIZATION).unwrap(), "Bearer tok");
        assert_eq!(request.headers.get(ACCEPT).unwrap(), "application/json");
    }

    #[test]
    fn test_content_type_follows_body() {
        let session = session(SessionConfig::new("https://api.example.com"));
        let descriptor = RequestDescriptor::post("/notes").text_body("hi").build();
        let request = session.prepare(&descriptor, &CredentialStore::new()).unwrap();
        assert_eq!(
            request.headers.get(CONTENT_TYPE).unwrap(),
            "text/plain; charset=utf-8"
        );
    }

    #[test]
    fn test_stream_request_accepts_event_stream_without_timeout() {
        let session = session(SessionConfig::new("https://api.example.com"));
        let descriptor = RequestDescriptor::get("/events").build();
        let request = session
            .prepare_stream(&descriptor, &CredentialStore::new())
            .unwrap();
        assert_eq!(request.headers.get(ACCEPT).unwrap(), "text/event-stream");
        assert!(request.timeout.is_none());
    }

    // ==================== Timeout and TLS Tests ====================

    #[test]
    fn test_timeouts_per_operation_class() {
        let session = session(SessionConfig::new("https://api.example.com"));
        let credentials = CredentialStore::new();

        let plain = RequestDescriptor::get("/a").build();
        let upload = RequestDescriptor::post("/a").file_upload().build();
        let download = RequestDescriptor::download("/a").build();
        let custom = RequestDescriptor::get("/a")
            .timeout(Duration::from_secs(5))
            .build();

        let timeout = |request: PreparedRequest| request.timeout.unwrap().as_secs();
        assert_eq!(timeout(session.prepare(&plain, &credentials).unwrap()), 60);
        assert_eq!(timeout(session.prepare(&upload, &credentials).unwrap()), 330);
        assert_eq!(timeout(session.prepare(&download, &credentials).unwrap()), 330);
        assert_eq!(timeout(session.prepare(&custom, &credentials).unwrap()), 5);
    }

    #[test]
    fn test_tls_policy_is_per_call() {
        let session = session(SessionConfig::new("https://api.example.com"));
        let credentials = CredentialStore::new();
        let insecure = RequestDescriptor::get("/a").ignore_cert_validation().build();
        let normal = RequestDescriptor::get("/a").build();
        assert_eq!(
            session.prepare(&insecure, &credentials).unwrap().tls,
            TlsPolicy::AcceptInvalid
        );
        assert_eq!(
            session.prepare(&normal, &credentials).unwrap().tls,
            TlsPolicy::Verify
        );
    }

    #[test]
    fn test_file_decode_forces_json_get() {
        let session = session(SessionConfig::new("https://api.example.com"));
        let descriptor = RequestDescriptor::post("/export")
            .shape(ResponseShape::Bytes)
            .file_decode()
            .build();
        let request = session.prepare(&descriptor, &CredentialStore::new()).unwrap();
        assert_eq!(request.method, reqwest::Method::GET);
        assert_eq!(request.shape, ResponseShape::Json);
    }
}
