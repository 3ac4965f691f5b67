//! Identity resolution from an opaque bearer credential.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::Value;

const ANONYMOUS_KEY: &str = "anonymous";

/// Claims checked, in order, for a stable user key.
const IDENTITY_CLAIMS: &[&str] = &["sub", "user_id", "email"];

/// The namespace history and remote calls are scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    User(String),
    Anonymous,
}

impl Identity {
    /// Derives an identity from a JWT-shaped credential. Never fails: anything
    /// that cannot be decoded resolves to [`Identity::Anonymous`].
    pub fn resolve(credential: Option<&str>) -> Self {
        let Some(token) = credential.map(str::trim).filter(|t| !t.is_empty()) else {
            return Identity::Anonymous;
        };
        let token = token.strip_prefix("Bearer ").unwrap_or(token);

        match decode_subject(token) {
            Some(key) => Identity::User(key),
            None => {
                log::debug!("Credential could not be decoded, using anonymous identity");
                Identity::Anonymous
            }
        }
    }

    pub fn storage_key(&self) -> &str {
        match self {
            Identity::User(key) => key,
            Identity::Anonymous => ANONYMOUS_KEY,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Identity::Anonymous)
    }
}

fn decode_subject(token: &str) -> Option<String> {
    let mut parts = token.split('.');
    let (_header, payload, _signature) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }

    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: Value = serde_json::from_slice(&bytes).ok()?;

    IDENTITY_CLAIMS.iter().find_map(|claim| match claims.get(*claim) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}
