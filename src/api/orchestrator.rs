//! The [`ApiClient`] entry point wiring gates, transport and translation.

use std::fmt;
use std::sync::{Arc, OnceLock};

use futures_util::{Stream, StreamExt};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, info, info_span, trace};
use uuid::Uuid;

use super::error::{ApiError, CallFailure};
use super::translator::ErrorTranslator;
use super::validator::ResponseValidator;
use crate::request::{
    CallResult, CancelToken, FromPayload, Payload, RequestDescriptor, ResponseShape,
};
use crate::session::{
    AssumeOnline, ClientSession, ConnectivityGate, CredentialStore, GrantedPermissions,
    PermissionGate, SessionConfig, SetupError,
};
use crate::transport::constants::ERROR_FEED_CAPACITY;
use crate::transport::{PreparedRequest, SseEvent, StreamSession};

/// Event type the server uses to report a failure on a stream.
const ERROR_EVENT: &str = "error";

/// Field injected into JSON stream events before mapping.
const EVENT_FIELD: &str = "event";

struct ClientInner {
    session: OnceLock<ClientSession>,
    credentials: CredentialStore,
    connectivity: Box<dyn ConnectivityGate>,
    permissions: Box<dyn PermissionGate>,
    translator: ErrorTranslator,
}

/// Resilient HTTP/SSE client.
///
/// Clones share the session, credentials and error feed. Call
/// [`setup`](Self::setup) once before issuing calls.
///
/// # Example
///
/// ```no_run
/// use courier_core::{ApiClient, RequestDescriptor, ResponseShape, SessionConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = ApiClient::new();
/// client.setup(SessionConfig::new("https://api.example.com"))?;
///
/// let descriptor = RequestDescriptor::get("/health")
///     .shape(ResponseShape::Text)
///     .output::<String>()
///     .build();
/// let body = client.call(&descriptor, None).await.into_result()?;
/// println!("{body:?}");
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ClientInner>,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("initialized", &self.inner.session.get().is_some())
            .field("credentials", &self.inner.credentials.snapshot().len())
            .finish_non_exhaustive()
    }
}

impl Default for ApiClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for an [`ApiClient`] with custom gates.
pub struct ApiClientBuilder {
    connectivity: Box<dyn ConnectivityGate>,
    permissions: Box<dyn PermissionGate>,
}

impl fmt::Debug for ApiClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClientBuilder").finish_non_exhaustive()
    }
}

impl Default for ApiClientBuilder {
    fn default() -> Self {
        Self {
            connectivity: Box::new(AssumeOnline),
            permissions: Box::new(GrantedPermissions),
        }
    }
}

impl ApiClientBuilder {
    /// Uses `gate` to decide whether calls may reach the network.
    #[must_use]
    pub fn connectivity_gate(mut self, gate: impl ConnectivityGate + 'static) -> Self {
        self.connectivity = Box::new(gate);
        self
    }

    /// Uses `gate` to decide whether files may be written.
    #[must_use]
    pub fn permission_gate(mut self, gate: impl PermissionGate + 'static) -> Self {
        self.permissions = Box::new(gate);
        self
    }

    #[must_use]
    pub fn build(self) -> ApiClient {
        ApiClient {
            inner: Arc::new(ClientInner {
                session: OnceLock::new(),
                credentials: CredentialStore::new(),
                connectivity: self.connectivity,
                permissions: self.permissions,
                translator: ErrorTranslator::new(ERROR_FEED_CAPACITY),
            }),
        }
    }
}

impl ApiClient {
    /// Creates a client that assumes connectivity and storage permission.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    #[must_use]
    pub fn builder() -> ApiClientBuilder {
        ApiClientBuilder::default()
    }

    /// Validates `config` and initializes the session.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError::AlreadyInitialized`] on a second call, or the
    /// validation error for a malformed base URL, header or timeout.
    pub fn setup(&self, config: SessionConfig) -> Result<(), SetupError> {
        if self.inner.session.get().is_some() {
            return Err(SetupError::AlreadyInitialized);
        }
        let session = ClientSession::from_config(config)?;
        self.inner
            .session
            .set(session)
            .map_err(|_| SetupError::AlreadyInitialized)?;
        info!("client session initialized");
        Ok(())
    }

    /// Returns `true` once [`setup`](Self::setup) succeeded.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.inner.session.get().is_some()
    }

    /// Sets or clears the bearer token sent with every call.
    pub fn set_bearer_auth_token(&self, token: Option<&str>) {
        self.inner.credentials.set_bearer_token(token);
    }

    /// Sets or clears the secondary id token sent with every call.
    pub fn set_id_token(&self, token: Option<&str>) {
        self.inner.credentials.set_id_token(token);
    }

    /// Stream of every error translated after subscribing.
    ///
    /// Slow subscribers skip the errors they missed. The stream ends when the
    /// last clone of this client is dropped.
    pub fn on_api_error(&self) -> impl Stream<Item = ApiError> + Send + 'static {
        BroadcastStream::new(self.subscribe_errors()).filter_map(|item| async move {
            match item {
                Ok(error) => Some(error),
                Err(lagged) => {
                    debug!(error = %lagged, "error feed subscriber lagged");
                    None
                }
            }
        })
    }

    /// Raw broadcast receiver for the error feed.
    #[must_use]
    pub fn subscribe_errors(&self) -> broadcast::Receiver<ApiError> {
        self.inner.translator.subscribe()
    }

    /// Executes one unary, download or decode-and-persist call.
    ///
    /// Never panics or returns early with an error: every failure is
    /// classified into the returned [`CallResult::Failure`] and published on
    /// the error feed.
    pub async fn call<T>(
        &self,
        descriptor: &RequestDescriptor<T>,
        cancel: Option<&CancelToken>,
    ) -> CallResult<T>
    where
        T: FromPayload + Send + 'static,
    {
        let correlation_id = Uuid::new_v4().to_string();
        let span = info_span!(
            "api_call",
            correlation_id = %correlation_id,
            method = %descriptor.method(),
            path = %descriptor.path(),
        );
        async {
            match self.execute_call(descriptor, cancel).await {
                Ok(value) => CallResult::Success(value),
                Err(failure) => {
                    CallResult::Failure(self.translate(failure, cancel, &correlation_id))
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn execute_call<T>(
        &self,
        descriptor: &RequestDescriptor<T>,
        cancel: Option<&CancelToken>,
    ) -> Result<Option<T>, CallFailure>
    where
        T: FromPayload,
    {
        let session = self.session()?;
        let request = session.prepare(descriptor, &self.inner.credentials)?;
        log_request(&request, descriptor);

        if !self.inner.connectivity.has_connection().await {
            return Err(CallFailure::Offline);
        }

        let signal = cancel.map(CancelToken::signal);
        let signal = signal.as_ref();

        if descriptor.writes_file() {
            if !self.inner.permissions.has_storage_permission().await {
                return Err(CallFailure::PermissionDenied);
            }
            let stager = session.stager();
            let directory = stager
                .resolve_save_directory()
                .map_err(crate::transport::TransportError::from)?;
            let name = descriptor.download_file_name();
            let path = if descriptor.file_decode() {
                session
                    .transport()
                    .decode_to_file(&request, stager, &directory, name, signal)
                    .await?
            } else {
                session
                    .transport()
                    .download(&request, stager, &directory, name, signal)
                    .await?
            };
            info!(path = %path.display(), "file saved");
            return Ok(T::from_payload(Payload::File(path)));
        }

        let response = session
            .retry()
            .run(signal, || session.transport().execute(&request, signal))
            .await?;
        info!(status = response.status, "response received");
        if request.log_body {
            debug!(payload = ?response.payload, "response body");
        }

        map_payload(descriptor, response.payload)
    }

    /// Opens a server-sent event stream for `descriptor`.
    ///
    /// Nothing happens until the returned stream is polled. Each server event
    /// becomes one item; an `error` event yields a single failure and ends the
    /// stream. Cancelling `cancel` or dropping the stream closes the
    /// connection.
    pub fn call_stream<T>(
        &self,
        descriptor: &RequestDescriptor<T>,
        cancel: Option<&CancelToken>,
    ) -> impl Stream<Item = CallResult<T>> + Send + 'static
    where
        T: FromPayload + Send + 'static,
    {
        let correlation_id = Uuid::new_v4().to_string();
        let span = info_span!(
            "api_stream",
            correlation_id = %correlation_id,
            method = %descriptor.method(),
            path = %descriptor.path(),
        );
        let context = StreamContext {
            client: self.clone(),
            descriptor: descriptor.clone(),
            cancel: cancel.cloned(),
            signal: None,
            correlation_id,
            span,
        };

        futures_util::stream::unfold(
            (StreamState::Pending, context),
            |(state, mut context)| async move {
                let span = context.span.clone();
                let (item, state) = context.advance(state).instrument(span).await?;
                Some((item, (state, context)))
            },
        )
    }

    fn session(&self) -> Result<&ClientSession, CallFailure> {
        self.inner.session.get().ok_or(CallFailure::NotInitialized)
    }

    fn translate(
        &self,
        failure: CallFailure,
        cancel: Option<&CancelToken>,
        correlation_id: &str,
    ) -> ApiError {
        self.inner
            .translator
            .translate(failure, cancel, correlation_id)
    }
}

/// Converts a successful unary payload into the call's output.
fn map_payload<T: FromPayload>(
    descriptor: &RequestDescriptor<T>,
    payload: Payload,
) -> Result<Option<T>, CallFailure> {
    match descriptor.shape() {
        ResponseShape::Json => {
            let Some(mapper) = descriptor.mapper() else {
                return Ok(None);
            };
            let value = ResponseValidator::json(payload)?;
            Ok(Some(mapper(value)?))
        }
        shape @ (ResponseShape::Text | ResponseShape::Bytes) => {
            ResponseValidator::check(shape, &payload)?;
            Ok(T::from_payload(payload))
        }
    }
}

fn log_request<T>(request: &PreparedRequest, descriptor: &RequestDescriptor<T>) {
    debug!(
        method = %request.method,
        url = %request.url,
        tls = ?request.tls,
        timeout = ?request.timeout,
        "sending request"
    );
    if request.log_body {
        debug!(body = ?descriptor.body(), "request body");
    }
}

enum StreamState {
    Pending,
    Open(StreamSession),
    Done,
}

struct StreamContext<T> {
    client: ApiClient,
    descriptor: RequestDescriptor<T>,
    cancel: Option<CancelToken>,
    signal: Option<CancellationToken>,
    correlation_id: String,
    span: Span,
}

impl<T: FromPayload> StreamContext<T> {
    /// Produces the next item and the state that follows it, or `None` to end.
    async fn advance(&mut self, mut state: StreamState) -> Option<(CallResult<T>, StreamState)> {
        loop {
            match state {
                StreamState::Done => return None,
                StreamState::Pending => match self.open().await {
                    Ok(session) => state = StreamState::Open(session),
                    Err(failure) => return Some((self.fail(failure), StreamState::Done)),
                },
                StreamState::Open(mut session) => {
                    if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
                        self.stop_cancelled();
                        return None;
                    }

                    let next = match &self.signal {
                        Some(signal) => {
                            tokio::select! {
                                biased;
                                () = signal.cancelled() => {
                                    self.stop_cancelled();
                                    return None;
                                }
                                next = session.next_event() => next,
                            }
                        }
                        None => session.next_event().await,
                    };

                    match next {
                        Ok(Some(event)) if event.event == ERROR_EVENT => {
                            let failure = CallFailure::StreamEvent { data: event.data };
                            return Some((self.fail(failure), StreamState::Done));
                        }
                        Ok(Some(event)) if event.data.is_empty() => {
                            trace!(event = %event.event, "skipping empty event");
                            state = StreamState::Open(session);
                        }
                        Ok(Some(event)) => {
                            let value = self.map_event(event);
                            return Some((CallResult::Success(value), StreamState::Open(session)));
                        }
                        Ok(None) => {
                            info!("event stream closed by server");
                            return None;
                        }
                        Err(error) => return Some((self.fail(error.into()), StreamState::Done)),
                    }
                }
            }
        }
    }

    async fn open(&mut self) -> Result<StreamSession, CallFailure> {
        let session = self.client.session()?;
        let request = session.prepare_stream(&self.descriptor, &self.client.inner.credentials)?;
        log_request(&request, &self.descriptor);

        if !self.client.inner.connectivity.has_connection().await {
            return Err(CallFailure::Offline);
        }

        self.signal = self.cancel.as_ref().map(CancelToken::signal);
        let stream = session
            .transport()
            .open_stream(&request, self.signal.as_ref())
            .await?;
        Ok(stream)
    }

    /// Maps one event. JSON objects get the event type injected; anything the
    /// mapper cannot handle is passed through as raw text.
    fn map_event(&self, event: SseEvent) -> Option<T> {
        let Some(mapper) = self.descriptor.mapper() else {
            return T::from_payload(Payload::Text(event.data));
        };

        let decoded = match serde_json::from_str::<Value>(&event.data) {
            Ok(Value::Object(mut object)) => {
                object.insert(EVENT_FIELD.to_string(), Value::String(event.event.clone()));
                Value::Object(object)
            }
            Ok(other) => other,
            Err(error) => {
                trace!(error = %error, "event data is not JSON, passing through");
                return T::from_payload(Payload::Text(event.data));
            }
        };

        match mapper(decoded) {
            Ok(value) => Some(value),
            Err(error) => {
                debug!(error = %error, "event mapping failed, passing through");
                T::from_payload(Payload::Text(event.data))
            }
        }
    }

    fn fail(&self, failure: CallFailure) -> CallResult<T> {
        CallResult::Failure(self.client.translate(
            failure,
            self.cancel.as_ref(),
            &self.correlation_id,
        ))
    }

    fn stop_cancelled(&self) {
        info!("event stream cancelled by caller");
        if let Some(token) = &self.cancel {
            token.rearm();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::api::ApiErrorKind;
    use serde_json::json;

    // ==================== Payload Mapping Tests ====================

    #[test]
    fn test_map_payload_without_mapper_is_fire_and_forget() {
        let descriptor = RequestDescriptor::post("/events").build();
        let value = map_payload(&descriptor, Payload::Json(json!({"ok": true}))).unwrap();
        assert!(value.is_none());
    }

    #[test]
    fn test_map_payload_applies_mapper() {
        let descriptor = RequestDescriptor::get("/count")
            .map_json(|v| Ok(v["n"].as_u64().unwrap_or_default()))
            .build();
        let value = map_payload(&descriptor, Payload::Json(json!({"n": 4}))).unwrap();
        assert_eq!(value, Some(4));
    }

    #[test]
    fn test_map_payload_shape_mismatch() {
        let descriptor = RequestDescriptor::get("/count")
            .map_json(|v| Ok(v.to_string()))
            .build();
        let failure = map_payload(&descriptor, Payload::Text("<html>".into())).unwrap_err();
        assert!(matches!(failure, CallFailure::Validation(_)));
    }

    #[test]
    fn test_map_payload_text_passthrough() {
        let descriptor = RequestDescriptor::get("/readme")
            .shape(ResponseShape::Text)
            .output::<String>()
            .build();
        let value = map_payload(&descriptor, Payload::Text("hello".into())).unwrap();
        assert_eq!(value.as_deref(), Some("hello"));
    }

    // ==================== Client Lifecycle Tests ====================

    #[test]
    fn test_setup_twice_fails() {
        let client = ApiClient::new();
        client.setup(SessionConfig::new("https://api.example.com")).unwrap();
        assert!(client.is_initialized());
        assert!(matches!(
            client.setup(SessionConfig::new("https://api.example.com")),
            Err(SetupError::AlreadyInitialized)
        ));
    }

    #[tokio::test]
    async fn test_call_before_setup_is_unknown_failure() {
        let client = ApiClient::new();
        let result = client.call(&RequestDescriptor::get("/a").build(), None).await;
        let error = result.error().unwrap();
        assert_eq!(error.kind(), ApiErrorKind::Unknown);
        assert_eq!(error.message(), "client session not initialized");
        assert!(error.correlation_id().is_some());
    }

    #[tokio::test]
    async fn test_stream_before_setup_yields_one_failure() {
        let client = ApiClient::new();
        let items: Vec<CallResult<String>> = client
            .call_stream(&RequestDescriptor::get("/events").output::<String>().build(), None)
            .collect()
            .await;
        assert_eq!(items.len(), 1);
        assert!(items[0].is_failure());
    }
}
