use base64::Engine;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::AnnotateError;

/// Credentials for one registry endpoint
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialEntry {
    /// Registry base URL as written in the bundle (e.g., "https://index.docker.io/v1/")
    pub registry_url: String,
    pub username: String,
    pub password: String,
}

impl CredentialEntry {
    /// Empty credentials against `registry_url`
    pub fn anonymous(registry_url: impl Into<String>) -> Self {
        Self {
            registry_url: registry_url.into(),
            username: String::new(),
            password: String::new(),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.username.is_empty() && self.password.is_empty()
    }
}

// Passwords must never end up in logs
impl fmt::Debug for CredentialEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialEntry")
            .field("registry_url", &self.registry_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Decoded bundle, iterated in registry URL order
pub type CredentialMap = BTreeMap<String, CredentialEntry>;

#[derive(Debug, Deserialize)]
struct RawCredential {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    /// base64("username:password") as written by `docker login`
    #[serde(default)]
    auth: Option<String>,
}

impl RawCredential {
    fn into_pair(self) -> Result<(String, String), String> {
        if self.username.is_some() || self.password.is_some() {
            return Ok((
                self.username.unwrap_or_default(),
                self.password.unwrap_or_default(),
            ));
        }

        match self.auth.filter(|auth| !auth.is_empty()) {
            Some(auth) => {
                let decoded = base64::engine::general_purpose::STANDARD
                    .decode(auth.trim())
                    .map_err(|e| format!("auth field is not valid base64: {}", e))?;
                let decoded = String::from_utf8(decoded)
                    .map_err(|_| "auth field is not valid UTF-8".to_string())?;
                let (username, password) = decoded
                    .split_once(':')
                    .ok_or_else(|| "auth field is not of the form username:password".to_string())?;
                Ok((username.to_string(), password.to_string()))
            }
            None => Ok((String::new(), String::new())),
        }
    }
}

/// Decode a credential bundle into a map from registry URL to credentials
///
/// The bundle is a JSON object mapping registry base URLs to objects with
/// `username` and `password` fields. The `{"auths": {...}}` wrapper used by
/// `.dockerconfigjson` secrets and the base64 `auth` field are accepted too.
/// Anything else is a [`AnnotateError::MalformedCredentialBundle`].
pub fn decode_bundle(
    payload: &[u8],
    namespace: &str,
    secret_name: &str,
) -> Result<CredentialMap, AnnotateError> {
    let malformed = |reason: String| AnnotateError::MalformedCredentialBundle {
        namespace: namespace.to_string(),
        name: secret_name.to_string(),
        reason,
    };

    let mut root: serde_json::Map<String, Value> =
        serde_json::from_slice(payload).map_err(|e| malformed(e.to_string()))?;

    match root.remove("auths") {
        Some(Value::Object(auths)) => root = auths,
        Some(_) => return Err(malformed("auths is not an object".to_string())),
        None => {}
    }

    let mut entries = CredentialMap::new();
    for (registry_url, value) in root {
        let raw: RawCredential = serde_json::from_value(value)
            .map_err(|e| malformed(format!("entry {}: {}", registry_url, e)))?;
        let (username, password) = raw
            .into_pair()
            .map_err(|reason| malformed(format!("entry {}: {}", registry_url, reason)))?;

        entries.insert(
            registry_url.clone(),
            CredentialEntry {
                registry_url,
                username,
                password,
            },
        );
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_plain_bundle() {
        let payload = br#"{
            "https://registry.example.com": {"username": "alice", "password": "s3cret"},
            "https://index.docker.io/v1/": {"username": "bob", "password": "hunter2", "email": "bob@example.com"}
        }"#;

        let entries = decode_bundle(payload, "default", "pull-creds").unwrap();
        assert_eq!(entries.len(), 2);

        let hub = &entries["https://index.docker.io/v1/"];
        assert_eq!(hub.username, "bob");
        assert_eq!(hub.password, "hunter2");
    }

    #[test]
    fn test_decode_iterates_in_registry_url_order() {
        let payload = br#"{
            "https://zeta.example.com": {"username": "z", "password": "z"},
            "https://alpha.example.com": {"username": "a", "password": "a"},
            "https://mid.example.com": {"username": "m", "password": "m"}
        }"#;

        let entries = decode_bundle(payload, "default", "pull-creds").unwrap();
        let order: Vec<_> = entries.keys().map(String::as_str).collect();
        assert_eq!(
            order,
            vec![
                "https://alpha.example.com",
                "https://mid.example.com",
                "https://zeta.example.com"
            ]
        );
    }

    #[test]
    fn test_decode_dockerconfigjson_with_auth_field() {
        let auth = base64::engine::general_purpose::STANDARD.encode("carol:pa:ss");
        let payload = format!(r#"{{"auths": {{"registry.example.com": {{"auth": "{}"}}}}}}"#, auth);

        let entries = decode_bundle(payload.as_bytes(), "default", "pull-creds").unwrap();
        let entry = &entries["registry.example.com"];
        assert_eq!(entry.username, "carol");
        assert_eq!(entry.password, "pa:ss");
    }

    #[test]
    fn test_decode_entry_without_credentials_is_anonymous() {
        let entries =
            decode_bundle(br#"{"https://public.example.com": {}}"#, "default", "x").unwrap();
        assert!(entries["https://public.example.com"].is_anonymous());
    }

    #[test]
    fn test_decode_rejects_invalid_json() {
        let err = decode_bundle(b"not json at all", "kube-system", "broken").unwrap_err();
        match err {
            AnnotateError::MalformedCredentialBundle {
                namespace, name, ..
            } => {
                assert_eq!(namespace, "kube-system");
                assert_eq!(name, "broken");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_decode_rejects_wrong_shapes() {
        for payload in [
            &br#"["https://registry.example.com"]"#[..],
            &br#"{"https://registry.example.com": "alice:secret"}"#[..],
            &br#"{"https://registry.example.com": {"username": 42}}"#[..],
            &br#"{"https://registry.example.com": {"auth": "%%%"}}"#[..],
            &br#"{"auths": "oops"}"#[..],
            &br#"{"auths": null}"#[..],
            &br#"{"auths": ["https://registry.example.com"]}"#[..],
        ] {
            assert!(
                matches!(
                    decode_bundle(payload, "default", "bad"),
                    Err(AnnotateError::MalformedCredentialBundle { .. })
                ),
                "payload should be rejected: {}",
                String::from_utf8_lossy(payload)
            );
        }
    }

    #[test]
    fn test_debug_output_redacts_password() {
        let entry = CredentialEntry {
            registry_url: "https://registry.example.com".to_string(),
            username: "alice".to_string(),
            password: "s3cret".to_string(),
        };
        let debug = format!("{:?}", entry);
        assert!(debug.contains("alice"));
        assert!(!debug.contains("s3cret"));
    }
}
