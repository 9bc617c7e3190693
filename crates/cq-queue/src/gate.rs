//! Credential gate for mutation endpoints.
//!
//! The username/secret pair travels inside the request body, in
//! `kullaniciBilgisi` or, failing that, `hastaBilgisi`. For array bodies only
//! the last element is inspected.
//!
//! Secrets are stored and compared in plaintext. This matches the existing
//! credential table and is a known weakness.

use cq_schemas::User;
use serde_json::Value;
use tracing::{info, warn};

use crate::error::{QueueError, Result};
use crate::store::QueueStore;

const CREDENTIAL_KEYS: [&str; 2] = ["kullaniciBilgisi", "hastaBilgisi"];
const USERNAME_KEYS: [&str; 2] = ["kullanici_adi", "username"];
const SECRET_KEYS: [&str; 2] = ["sifre", "secret"];

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub secret: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("secret", &"<REDACTED>")
            .finish()
    }
}

/// First non-empty value under `keys`. Numbers count as text; zero counts
/// as absent, like an empty string.
fn first_text(block: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match block.get(*k) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) if n.as_f64() != Some(0.0) => Some(n.to_string()),
        _ => None,
    })
}

/// Pull the credential pair out of a request body.
pub fn extract_credentials(body: &Value) -> Result<Credentials> {
    let carrier = match body {
        Value::Array(items) => items.last().ok_or_else(|| {
            warn!(category = "middleware", "empty array body");
            QueueError::validation("Request body array cannot be empty")
        })?,
        other => other,
    };

    let block = CREDENTIAL_KEYS
        .iter()
        .find_map(|k| carrier.get(*k).filter(|v| v.is_object()))
        .ok_or_else(|| {
            warn!(category = "middleware", "no user credentials found");
            QueueError::validation("User credentials are required")
        })?;

    match (first_text(block, &USERNAME_KEYS), first_text(block, &SECRET_KEYS)) {
        (Some(username), Some(secret)) => Ok(Credentials { username, secret }),
        _ => {
            warn!(category = "middleware", "missing username or secret");
            Err(QueueError::validation("Username and secret are required"))
        }
    }
}

/// Check the body's credentials against the stored user table.
pub async fn authenticate(store: &dyn QueueStore, body: &Value) -> Result<User> {
    let creds = extract_credentials(body)?;
    match store.find_user(&creds.username).await? {
        Some(user) if user.secret == creds.secret => {
            info!(category = "middleware", username = %user.username, "user validated");
            Ok(user)
        }
        _ => {
            warn!(category = "middleware", username = %creds.username, "invalid credentials");
            Err(QueueError::Unauthorized(
                "Invalid username or secret".to_string(),
            ))
        }
    }
}
