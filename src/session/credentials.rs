//! Mutable credential headers applied to every outgoing request.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use tracing::debug;

use crate::transport::TransportError;
use crate::transport::constants::ID_TOKEN_HEADER;

/// Holds the bearer token and secondary id token.
///
/// Tokens can change at any time (login, refresh, logout); each call reads the
/// values current when it is prepared.
#[derive(Debug, Default)]
pub struct CredentialStore {
    headers: RwLock<BTreeMap<String, String>>,
}

impl CredentialStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `Authorization: Bearer <token>`, or removes it with `None`.
    pub fn set_bearer_token(&self, token: Option<&str>) {
        self.set(
            AUTHORIZATION.as_str(),
            token.map(|token| format!("Bearer {token}")),
        );
    }

    /// Sets the secondary id token header, or removes it with `None`.
    pub fn set_id_token(&self, token: Option<&str>) {
        self.set(ID_TOKEN_HEADER, token.map(str::to_string));
    }

    /// Returns the current credential headers.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.headers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Inserts the credential headers into `headers`, replacing same-named entries.
    pub(crate) fn apply(&self, headers: &mut HeaderMap) -> Result<(), TransportError> {
        for (name, value) in self.snapshot() {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| TransportError::invalid_header(name.clone()))?;
            let header_value = HeaderValue::from_str(&value)
                .map_err(|_| TransportError::invalid_header(name.clone()))?;
            headers.insert(header_name, header_value);
        }
        Ok(())
    }

    fn set(&self, name: &str, value: Option<String>) {
        let mut headers = self.headers.write().unwrap_or_else(PoisonError::into_inner);
        match value {
            Some(value) => {
                debug!(header = name, "credential set");
                headers.insert(name.to_string(), value);
            }
            None => {
                debug!(header = name, "credential cleared");
                headers.remove(name);
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_token_set_and_cleared() {
        let store = CredentialStore::new();
        store.set_bearer_token(Some("abc"));
        assert_eq!(
            store.snapshot().get("authorization").map(String::as_str),
            Some("Bearer abc")
        );
        store.set_bearer_token(None);
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn test_apply_overrides_existing_headers() {
        let store = CredentialStore::new();
        store.set_id_token(Some("id-1"));
        let mut headers = HeaderMap::new();
        headers.insert(ID_TOKEN_HEADER, HeaderValue::from_static("stale"));
        store.apply(&mut headers).unwrap();
        assert_eq!(headers.get(ID_TOKEN_HEADER).unwrap(), "id-1");
    }

    #[test]
    fn test_apply_rejects_unsendable_value() {
        let store = CredentialStore::new();
        store.set_bearer_token(Some("bad\nvalue"));
        let mut headers = HeaderMap::new();
        assert!(matches!(
            store.apply(&mut headers),
            Err(TransportError::InvalidHeader { .. })
        ));
    }
}
