//! Immutable description of one API operation.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

/// HTTP verb of a descriptor. `Download` is a GET whose body is streamed to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Download,
}

impl HttpMethod {
    /// Returns the method sent on the wire.
    #[must_use]
    pub fn as_reqwest(self) -> reqwest::Method {
        match self {
            Self::Get | Self::Download => reqwest::Method::GET,
            Self::Post => reqwest::Method::POST,
            Self::Put => reqwest::Method::PUT,
            Self::Delete => reqwest::Method::DELETE,
            Self::Patch => reqwest::Method::PATCH,
        }
    }

    /// Returns the upper-case method name (`DOWNLOAD` for downloads).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Patch => "PATCH",
            Self::Download => "DOWNLOAD",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Expected kind of the response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResponseShape {
    #[default]
    Json,
    Text,
    Bytes,
}

impl fmt::Display for ResponseShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Json => "json",
            Self::Text => "text",
            Self::Bytes => "bytes",
        })
    }
}

/// Request payload. The content type follows the variant unless a header overrides it.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Json(Value),
    Text(String),
    Bytes(Bytes),
}

/// Scalar query parameter value. [`QueryValue::Null`] removes the key.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl QueryValue {
    /// Renders the value for the query string, `None` for [`QueryValue::Null`].
    #[must_use]
    pub fn to_query_string(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Bool(value) => Some(value.to_string()),
            Self::Integer(value) => Some(value.to_string()),
            Self::Float(value) => Some(value.to_string()),
            Self::Text(value) => Some(value.clone()),
        }
    }
}

impl From<&str> for QueryValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for QueryValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<bool> for QueryValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for QueryValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for QueryValue {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<u32> for QueryValue {
    fn from(value: u32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<f64> for QueryValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl<V: Into<QueryValue>> From<Option<V>> for QueryValue {
    fn from(value: Option<V>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Failure raised by a response mapper.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("response mapping failed: {message}")]
pub struct MapError {
    message: String,
}

impl MapError {
    /// Creates a mapping error with a description.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Returns the description.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<serde_json::Error> for MapError {
    fn from(error: serde_json::Error) -> Self {
        Self::new(error.to_string())
    }
}

/// Converts a decoded JSON body into the caller's output type.
pub type ResponseMapper<T> = Arc<dyn Fn(Value) -> Result<T, MapError> + Send + Sync>;

/// Immutable description of one API operation.
///
/// Built with [`RequestDescriptor::get`] and friends, which return a
/// [`DescriptorBuilder`]. Without a mapper the call is "fire and forget":
/// success carries no value unless the shape is text or bytes, or the call
/// writes a file.
///
/// # Example
///
/// ```
/// use courier_core::{RequestDescriptor, ResponseShape};
///
/// let descriptor = RequestDescriptor::get("/reports")
///     .query("page", 2)
///     .header("x-trace", "on")
///     .shape(ResponseShape::Text)
///     .output::<String>()
///     .build();
/// assert_eq!(descriptor.path(), "/reports");
/// ```
pub struct RequestDescriptor<T = ()> {
    method: HttpMethod,
    path: String,
    body: Option<RequestBody>,
    headers: Vec<(String, String)>,
    query: Vec<(String, QueryValue)>,
    shape: ResponseShape,
    mapper: Option<ResponseMapper<T>>,
    timeout: Option<Duration>,
    ignore_base_url: bool,
    ignore_cert_validation: bool,
    is_file_upload: bool,
    file_decode: bool,
    download_file_name: Option<String>,
    log_body: bool,
}

impl<T> Clone for RequestDescriptor<T> {
    fn clone(&self) -> Self {
        Self {
            method: self.method,
            path: self.path.clone(),
            body: self.body.clone(),
            headers: self.headers.clone(),
            query: self.query.clone(),
            shape: self.shape,
            mapper: self.mapper.clone(),
            timeout: self.timeout,
            ignore_base_url: self.ignore_base_url,
            ignore_cert_validation: self.ignore_cert_validation,
            is_file_upload: self.is_file_upload,
            file_decode: self.file_decode,
            download_file_name: self.download_file_name.clone(),
            log_body: self.log_body,
        }
    }
}

impl<T> fmt::Debug for RequestDescriptor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestDescriptor")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("shape", &self.shape)
            .field("has_mapper", &self.mapper.is_some())
            .field("query", &self.query)
            .field("ignore_base_url", &self.ignore_base_url)
            .field("ignore_cert_validation", &self.ignore_cert_validation)
            .field("file_decode", &self.file_decode)
            .finish_non_exhaustive()
    }
}

impl RequestDescriptor<()> {
    /// Starts a descriptor for `method` on `path`.
    pub fn builder(method: HttpMethod, path: impl Into<String>) -> DescriptorBuilder<()> {
        DescriptorBuilder {
            inner: RequestDescriptor {
                method,
                path: path.into(),
                body: None,
                headers: Vec::new(),
                query: Vec::new(),
                shape: ResponseShape::Json,
                mapper: None,
                timeout: None,
                ignore_base_url: false,
                ignore_cert_validation: false,
                is_file_upload: false,
                file_decode: false,
                download_file_name: None,
                log_body: false,
            },
        }
    }

    /// Starts a GET descriptor.
    pub fn get(path: impl Into<String>) -> DescriptorBuilder<()> {
        Self::builder(HttpMethod::Get, path)
    }

    /// Starts a POST descriptor.
    pub fn post(path: impl Into<String>) -> DescriptorBuilder<()> {
        Self::builder(HttpMethod::Post, path)
    }

    /// Starts a PUT descriptor.
    pub fn put(path: impl Into<String>) -> DescriptorBuilder<()> {
        Self::builder(HttpMethod::Put, path)
    }

    /// Starts a DELETE descriptor.
    pub fn delete(path: impl Into<String>) -> DescriptorBuilder<()> {
        Self::builder(HttpMethod::Delete, path)
    }

    /// Starts a PATCH descriptor.
    pub fn patch(path: impl Into<String>) -> DescriptorBuilder<()> {
        Self::builder(HttpMethod::Patch, path)
    }

    /// Starts a download descriptor; the body is streamed to a file.
    pub fn download(path: impl Into<String>) -> DescriptorBuilder<()> {
        Self::builder(HttpMethod::Download, path).shape(ResponseShape::Bytes)
    }
}

impl<T> RequestDescriptor<T> {
    #[must_use]
    pub fn method(&self) -> HttpMethod {
        self.method
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn body(&self) -> Option<&RequestBody> {
        self.body.as_ref()
    }

    /// Call headers, applied over session and credential headers.
    #[must_use]
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Call query parameters, applied over session and path parameters.
    #[must_use]
    pub fn query(&self) -> &[(String, QueryValue)] {
        &self.query
    }

    #[must_use]
    pub fn shape(&self) -> ResponseShape {
        self.shape
    }

    #[must_use]
    pub fn mapper(&self) -> Option<&ResponseMapper<T>> {
        self.mapper.as_ref()
    }

    /// Total time allowed for this call, replacing the session's send and receive limits.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    #[must_use]
    pub fn ignore_base_url(&self) -> bool {
        self.ignore_base_url
    }

    #[must_use]
    pub fn ignore_cert_validation(&self) -> bool {
        self.ignore_cert_validation
    }

    #[must_use]
    pub fn is_file_upload(&self) -> bool {
        self.is_file_upload
    }

    #[must_use]
    pub fn file_decode(&self) -> bool {
        self.file_decode
    }

    #[must_use]
    pub fn download_file_name(&self) -> Option<&str> {
        self.download_file_name.as_deref()
    }

    #[must_use]
    pub fn log_body(&self) -> bool {
        self.log_body
    }

    /// Returns `true` when the call writes its result to a file.
    #[must_use]
    pub fn writes_file(&self) -> bool {
        self.method == HttpMethod::Download || self.file_decode
    }
}

/// Builder for [`RequestDescriptor`].
///
/// The output type parameter changes when a mapper is installed.
pub struct DescriptorBuilder<T = ()> {
    inner: RequestDescriptor<T>,
}

impl<T> Clone for DescriptorBuilder<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for DescriptorBuilder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DescriptorBuilder").field(&self.inner).finish()
    }
}

impl<T> DescriptorBuilder<T> {
    /// Sends `value` as a JSON body.
    #[must_use]
    pub fn json_body(mut self, value: Value) -> Self {
        self.inner.body = Some(RequestBody::Json(value));
        self
    }

    /// Sends `text` as a plain-text body.
    #[must_use]
    pub fn text_body(mut self, text: impl Into<String>) -> Self {
        self.inner.body = Some(RequestBody::Text(text.into()));
        self
    }

    /// Sends raw bytes as the body.
    #[must_use]
    pub fn bytes_body(mut self, bytes: impl Into<Bytes>) -> Self {
        self.inner.body = Some(RequestBody::Bytes(bytes.into()));
        self
    }

    /// Adds a call header. A later value for the same name wins.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.inner.headers.push((name.into(), value.into()));
        self
    }

    /// Adds a query parameter. Pass [`QueryValue::Null`] (or `None`) to drop the key.
    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl Into<QueryValue>) -> Self {
        self.inner.query.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn shape(mut self, shape: ResponseShape) -> Self {
        self.inner.shape = shape;
        self
    }

    /// Limits the whole exchange of this call to `timeout`.
    ///
    /// Replaces the session's send and receive timeouts; the connect timeout
    /// still applies.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.inner.timeout = Some(timeout);
        self
    }

    /// Uses `path` as-is instead of joining it to the session base URL.
    #[must_use]
    pub fn ignore_base_url(mut self) -> Self {
        self.inner.ignore_base_url = true;
        self
    }

    /// Skips server certificate validation for this call only.
    #[must_use]
    pub fn ignore_cert_validation(mut self) -> Self {
        self.inner.ignore_cert_validation = true;
        self
    }

    /// Uses the longer upload send timeout.
    #[must_use]
    pub fn file_upload(mut self) -> Self {
        self.inner.is_file_upload = true;
        self
    }

    /// Treats the response as a JSON document with base64 file content to write to disk.
    #[must_use]
    pub fn file_decode(mut self) -> Self {
        self.inner.file_decode = true;
        self
    }

    /// Saves a downloaded or decoded file under `name` instead of the server's name.
    #[must_use]
    pub fn download_file_name(mut self, name: impl Into<String>) -> Self {
        self.inner.download_file_name = Some(name.into());
        self
    }

    /// Allows request and response bodies to appear in debug logs.
    #[must_use]
    pub fn log_body(mut self) -> Self {
        self.inner.log_body = true;
        self
    }

    /// Installs a mapper from the decoded JSON body to `U`.
    #[must_use]
    pub fn map_json<U, F>(self, mapper: F) -> DescriptorBuilder<U>
    where
        F: Fn(Value) -> Result<U, MapError> + Send + Sync + 'static,
    {
        self.with_mapper(Some(Arc::new(mapper)))
    }

    /// Installs a mapper deserializing the JSON body into `U` with serde.
    #[must_use]
    pub fn decode_json<U>(self) -> DescriptorBuilder<U>
    where
        U: DeserializeOwned + 'static,
    {
        self.map_json(|value| serde_json::from_value::<U>(value).map_err(MapError::from))
    }

    /// Changes the output type without a mapper (for text, bytes and file results).
    #[must_use]
    pub fn output<U>(self) -> DescriptorBuilder<U> {
        self.with_mapper(None)
    }

    /// Finishes the descriptor.
    #[must_use]
    pub fn build(self) -> RequestDescriptor<T> {
        self.inner
    }

    fn with_mapper<U>(self, mapper: Option<ResponseMapper<U>>) -> DescriptorBuilder<U> {
        let d = self.inner;
        DescriptorBuilder {
            inner: RequestDescriptor {
                method: d.method,
                path: d.path,
                body: d.body,
                headers: d.headers,
                query: d.query,
                shape: d.shape,
                mapper,
                timeout: d.timeout,
                ignore_base_url: d.ignore_base_url,
                ignore_cert_validation: d.ignore_cert_validation,
                is_file_upload: d.is_file_upload,
                file_decode: d.file_decode,
                download_file_name: d.download_file_name,
                log_body: d.log_body,
            },
        }
    }
}
