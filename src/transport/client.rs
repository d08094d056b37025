//! HTTP transport for unary requests, downloads and event streams.
//!
//! This module provides the [`TransportClient`] which executes a fully
//! prepared request. Everything that varies per call (URL, headers, timeout,
//! certificate policy) travels in the [`PreparedRequest`]; the client itself
//! never changes after construction, so concurrent calls cannot observe each
//! other's overrides.

use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, Method, Response};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};
use url::Url;

use super::constants::{DECODE_PAYLOAD_FIELD, MAX_DUPLICATE_SUFFIX};
use super::error::TransportError;
use super::files::FileStager;
use super::sse::StreamSession;
use crate::request::{Payload, RequestBody, ResponseShape};
use crate::user_agent;

/// Certificate validation policy for a single request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsPolicy {
    /// Validate server certificates (the normal mode).
    #[default]
    Verify,
    /// Accept any certificate. Must be requested again on every call that needs it.
    AcceptInvalid,
}

/// Everything the transport needs to execute one call.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    /// HTTP method sent on the wire.
    pub method: Method,
    /// Absolute URL with merged query parameters.
    pub url: Url,
    /// Session, credential and call headers, already merged.
    pub headers: HeaderMap,
    /// Optional request body.
    pub body: Option<RequestBody>,
    /// Total time allowed for the exchange; `None` means no limit (streams).
    pub timeout: Option<Duration>,
    /// Certificate policy for this call only.
    pub tls: TlsPolicy,
    /// How the response body is read.
    pub shape: ResponseShape,
    /// Whether request and response bodies may be logged.
    pub log_body: bool,
}

/// A successful unary response.
#[derive(Debug)]
pub struct RawResponse {
    /// HTTP status code (always 2xx).
    pub status: u16,
    /// Response headers.
    pub headers: HeaderMap,
    /// Body read according to the requested shape.
    pub payload: Payload,
}

/// HTTP client executing prepared requests.
///
/// Created once per session and reused for every call, taking advantage of
/// connection pooling. Holds a second pool for calls that skip certificate
/// validation; which one serves a request is decided per call.
#[derive(Debug, Clone)]
pub struct TransportClient {
    verified: Client,
    unverified: Client,
}

impl TransportClient {
    /// Creates a transport with the given connect timeout.
    ///
    /// # Errors
    ///
    /// Returns the reqwest error when the TLS backend cannot be initialized.
    pub fn new(connect_timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            verified: base_client_builder(connect_timeout).build()?,
            unverified: base_client_builder(connect_timeout)
                .danger_accept_invalid_certs(true)
                .build()?,
        })
    }

    fn client_for(&self, tls: TlsPolicy) -> &Client {
        match tls {
            TlsPolicy::Verify => &self.verified,
            TlsPolicy::AcceptInvalid => &self.unverified,
        }
    }

    /// Sends the request and returns the raw response after a status check.
    async fn send(&self, request: &PreparedRequest) -> Result<Response, TransportError> {
        let url = request.url.as_str();
        let mut builder = self
            .client_for(request.tls)
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(body) = &request.body {
            builder = match body {
                RequestBody::Json(value) => builder.json(value),
                RequestBody::Text(text) => builder.body(text.clone()),
                RequestBody::Bytes(bytes) => builder.body(bytes.clone()),
            };
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::network(url, e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(std::string::ToString::to_string);
            return Err(TransportError::http_status_with_retry_after(
                url,
                status.as_u16(),
                retry_after,
            ));
        }
        Ok(response)
    }

    /// Executes a unary request and reads the body per its response shape.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] on network failure, timeout, non-2xx status
    /// or cancellation.
    #[instrument(level = "debug", skip(self, request, cancel), fields(method = %request.method, url = %request.url))]
    pub async fn execute(
        &self,
        request: &PreparedRequest,
        cancel: Option<&CancellationToken>,
    ) -> Result<RawResponse, TransportError> {
        cancellable(cancel, async {
            let response = self.send(request).await?;
            let status = response.status().as_u16();
            let headers = response.headers().clone();
            let payload = read_payload(response, request.url.as_str(), request.shape).await?;
            Ok(RawResponse {
                status,
                headers,
                payload,
            })
        })
        .await
    }

    /// Streams the response body into a file under `directory`.
    ///
    /// The file name is `explicit_name` or the `content-disposition` filename,
    /// bumped past existing files. A partially written file is removed when the
    /// transfer fails or is cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] on network failure, naming failure, or when
    /// writing to disk fails.
    #[instrument(level = "debug", skip(self, request, stager, cancel), fields(url = %request.url))]
    pub async fn download(
        &self,
        request: &PreparedRequest,
        stager: &FileStager,
        directory: &Path,
        explicit_name: Option<&str>,
        cancel: Option<&CancellationToken>,
    ) -> Result<PathBuf, TransportError> {
        let url = request.url.as_str();
        let response = cancellable(cancel, self.send(request)).await?;

        let (mut file, file_path) =
            create_unique_file(stager, explicit_name, directory, response.headers()).await?;
        debug!(path = %file_path.display(), "resolved download path");

        let stream_result =
            cancellable(cancel, stream_to_file(&mut file, response, url, &file_path)).await;
        drop(file);
        if stream_result.is_err() {
            debug!(path = %file_path.display(), "cleaning up partial file after error");
            let _ = tokio::fs::remove_file(&file_path).await;
        }
        let bytes_written = stream_result?;

        info!(path = %file_path.display(), bytes = bytes_written, "download complete");
        Ok(file_path)
    }

    /// Fetches a JSON document whose `data` field holds base64 content and
    /// writes the decoded bytes to a file under `directory`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::UnexpectedStatus`] unless the server answers
    /// 200, [`TransportError::Decode`] when the payload field is missing or not
    /// valid base64, and I/O or naming errors while writing.
    #[instrument(level = "debug", skip(self, request, stager, cancel), fields(url = %request.url))]
    pub async fn decode_to_file(
        &self,
        request: &PreparedRequest,
        stager: &FileStager,
        directory: &Path,
        explicit_name: Option<&str>,
        cancel: Option<&CancellationToken>,
    ) -> Result<PathBuf, TransportError> {
        let url = request.url.as_str();
        let (headers, document) = cancellable(cancel, async {
            let response = self.send(request).await.map_err(|error| match error {
                TransportError::HttpStatus { status, .. } => TransportError::UnexpectedStatus {
                    url: url.to_string(),
                    status,
                },
                other => other,
            })?;
            let status = response.status().as_u16();
            if status != 200 {
                return Err(TransportError::UnexpectedStatus {
                    url: url.to_string(),
                    status,
                });
            }
            let headers = response.headers().clone();
            let body = response
                .bytes()
                .await
                .map_err(|e| TransportError::network(url, e))?;
            let document: serde_json::Value = serde_json::from_slice(&body)
                .map_err(|e| TransportError::decode(url, e.to_string()))?;
            Ok((headers, document))
        })
        .await?;

        let encoded = document
            .get(DECODE_PAYLOAD_FIELD)
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| {
                TransportError::decode(url, format!("missing `{DECODE_PAYLOAD_FIELD}` field"))
            })?;
        let decoded = STANDARD
            .decode(encoded.trim())
            .map_err(|e| TransportError::decode(url, e.to_string()))?;

        let (mut file, file_path) =
            create_unique_file(stager, explicit_name, directory, &headers).await?;
        let write_result = async {
            file.write_all(&decoded).await?;
            file.flush().await
        }
        .await;
        drop(file);
        if let Err(e) = write_result {
            let _ = tokio::fs::remove_file(&file_path).await;
            return Err(TransportError::io(file_path, e));
        }

        info!(path = %file_path.display(), bytes = decoded.len(), "decoded file saved");
        Ok(file_path)
    }

    /// Opens a server-sent event stream.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when the connection cannot be established or
    /// the server rejects it.
    #[instrument(level = "debug", skip(self, request, cancel), fields(url = %request.url))]
    pub async fn open_stream(
        &self,
        request: &PreparedRequest,
        cancel: Option<&CancellationToken>,
    ) -> Result<StreamSession, TransportError> {
        let response = cancellable(cancel, self.send(request)).await?;
        info!(status = response.status().as_u16(), "event stream opened");
        Ok(StreamSession::new(request.url.as_str(), response))
    }
}

/// Creates a new file for a download, never reusing an existing path.
///
/// The name is resolved first, then the file is created exclusively. When a
/// concurrent call claimed the same name in between, the name is resolved
/// again past it.
async fn create_unique_file(
    stager: &FileStager,
    explicit_name: Option<&str>,
    directory: &Path,
    headers: &HeaderMap,
) -> Result<(File, PathBuf), TransportError> {
    tokio::fs::create_dir_all(directory)
        .await
        .map_err(|e| TransportError::io(directory, e))?;

    for _ in 0..=MAX_DUPLICATE_SUFFIX {
        let file_path = stager.resolve_file_path(explicit_name, directory, headers, true)?;
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&file_path)
            .await
        {
            Ok(file) => return Ok((file, file_path)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                debug!(path = %file_path.display(), "name taken concurrently, resolving again");
            }
            Err(e) => return Err(TransportError::io(file_path, e)),
        }
    }
    Err(TransportError::io(
        directory,
        std::io::Error::new(ErrorKind::AlreadyExists, "no free file name left"),
    ))
}

/// Races `operation` against the cancel signal.
async fn cancellable<F, T>(
    cancel: Option<&CancellationToken>,
    operation: F,
) -> Result<T, TransportError>
where
    F: Future<Output = Result<T, TransportError>>,
{
    match cancel {
        Some(token) => {
            tokio::select! {
                biased;
                () = token.cancelled() => Err(TransportError::Cancelled),
                result = operation => result,
            }
        }
        None => operation.await,
    }
}

async fn read_payload(
    response: Response,
    url: &str,
    shape: ResponseShape,
) -> Result<Payload, TransportError> {
    match shape {
        ResponseShape::Json => {
            let body = response
                .bytes()
                .await
                .map_err(|e| TransportError::network(url, e))?;
            if body.is_empty() {
                return Ok(Payload::Empty);
            }
            // Non-JSON bodies are kept as text so validation can report the mismatch.
            Ok(serde_json::from_slice(&body).map_or_else(
                |_| Payload::Text(String::from_utf8_lossy(&body).into_owned()),
                Payload::Json,
            ))
        }
        ResponseShape::Text => response
            .text()
            .await
            .map(Payload::Text)
            .map_err(|e| TransportError::network(url, e)),
        ResponseShape::Bytes => response
            .bytes()
            .await
            .map(Payload::Bytes)
            .map_err(|e| TransportError::network(url, e)),
    }
}

/// Streams response body to file, returning bytes written.
async fn stream_to_file(
    file: &mut File,
    response: Response,
    url: &str,
    file_path: &Path,
) -> Result<u64, TransportError> {
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut bytes_written: u64 = 0;

    while let Some(chunk_result) = stream.next().await {
        let chunk: Bytes = chunk_result.map_err(|e| TransportError::network(url, e))?;

        writer
            .write_all(&chunk)
            .await
            .map_err(|e| TransportError::io(file_path.to_path_buf(), e))?;

        bytes_written += chunk.len() as u64;
    }

    // Ensure all data is flushed to disk
    writer
        .flush()
        .await
        .map_err(|e| TransportError::io(file_path.to_path_buf(), e))?;

    Ok(bytes_written)
}

fn base_client_builder(connect_timeout: Duration) -> reqwest::ClientBuilder {
    Client::builder()
        .connect_timeout(connect_timeout)
        .gzip(true)
        .user_agent(user_agent::default_user_agent())
}
