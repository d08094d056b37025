//! Default User-Agent string for every outgoing request.

/// Project URL for User-Agent identification (RFC 9308).
const PROJECT_UA_URL: &str = "https://github.com/fierce/courier";

/// Default User-Agent (identifies the library and its version).
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("courier/{version} (+{PROJECT_UA_URL})")
}
