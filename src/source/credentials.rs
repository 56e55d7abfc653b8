use secrecy::{ExposeSecret, SecretString};

/// Scheme prefix the service expects in front of the token.
const AUTH_SCHEME: &str = "GoogleLogin auth=";

/// Holds the current authorization token of one account.
///
/// Login state lives in the authenticator; replacing the token here never
/// changes it.
#[derive(Default)]
pub struct CredentialStore {
    header: Option<SecretString>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a freshly issued token. Blank tokens clear the store.
    pub fn set_token(&mut self, token: &SecretString) {
        let token = token.expose_secret().trim();
        self.header = if token.is_empty() {
            None
        } else {
            Some(SecretString::from(format!("{}{}", AUTH_SCHEME, token)))
        };
    }

    /// Complete `Authorization` header value, if a token is held.
    pub fn auth_header(&self) -> Option<SecretString> {
        self.header.clone()
    }

    pub fn has_token(&self) -> bool {
        self.header.is_some()
    }

    pub fn clear(&mut self) {
        self.header = None;
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("header", &self.header.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret(s: &str) -> SecretString {
        SecretString::from(s.to_string())
    }

    #[test]
    fn test_empty_store_has_no_header() {
        let store = CredentialStore::new();
        assert!(store.auth_header().is_none());
        assert!(!store.has_token());
    }

    #[test]
    fn test_header_carries_scheme() {
        let mut store = CredentialStore::new();
        store.set_token(&secret("abc123"));
        let header = store.auth_header().unwrap();
        assert_eq!(header.expose_secret(), "GoogleLogin auth=abc123");
    }

    #[test]
    fn test_blank_token_clears() {
        let mut store = CredentialStore::new();
        store.set_token(&secret("abc"));
        store.set_token(&secret("  "));
        assert!(!store.has_token());
    }

    #[test]
    fn test_clear() {
        let mut store = CredentialStore::new();
        store.set_token(&secret("abc"));
        store.clear();
        assert!(store.auth_header().is_none());
    }

    #[test]
    fn test_debug_masks_token() {
        let mut store = CredentialStore::new();
        store.set_token(&secret("super-secret-token"));
        let debug_output = format!("{:?}", store);
        assert!(!debug_output.contains("super-secret-token"));
        assert!(debug_output.contains("[REDACTED]"));
    }
}
