//! Constants for the transport module (timeouts, retry delays, file staging).

use std::time::Duration;

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default time allowed to send a request body (30 seconds).
pub const SEND_TIMEOUT_SECS: u64 = 30;

/// Default time allowed to receive a response (30 seconds).
pub const RECEIVE_TIMEOUT_SECS: u64 = 30;

/// Default send timeout for file uploads (5 minutes).
pub const UPLOAD_SEND_TIMEOUT_SECS: u64 = 300;

/// Default receive timeout for file downloads (5 minutes for large files).
pub const DOWNLOAD_RECEIVE_TIMEOUT_SECS: u64 = 300;

/// Default delays between retries when none are configured.
pub const DEFAULT_RETRY_DELAYS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(3),
];

/// Maximum Retry-After value (1 hour) to prevent excessive delays.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Highest `(n)` suffix tried when a download name collides with an existing file.
pub const MAX_DUPLICATE_SUFFIX: u32 = 99;

/// JSON field holding the base64 content of a decode-and-persist response.
pub const DECODE_PAYLOAD_FIELD: &str = "data";

/// Header carrying the secondary identity token.
pub const ID_TOKEN_HEADER: &str = "x-id-token";

/// Capacity of the broadcast API error feed before slow subscribers lag.
pub const ERROR_FEED_CAPACITY: usize = 64;

/// Longest server-sent event line buffered while waiting for its newline (1 MiB).
pub const MAX_SSE_LINE_BYTES: usize = 1024 * 1024;
