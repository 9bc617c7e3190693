//! Runtime secret resolution.
//!
//! Config YAML stores only env var NAMES (e.g. `database.url_env:
//! "CQ_DATABASE_URL"`). Binaries resolve the value once at start-up and pass
//! it into constructors. Errors name the variable, never the value, and
//! `Debug` output is redacted.

use anyhow::{bail, Result};

use crate::AppConfig;

/// Postgres connection URL resolved from the environment.
#[derive(Clone)]
pub struct DatabaseUrl {
    env_name: String,
    value: String,
}

impl DatabaseUrl {
    pub fn env_name(&self) -> &str {
        &self.env_name
    }

    pub fn expose(&self) -> &str {
        &self.value
    }
}

impl std::fmt::Debug for DatabaseUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseUrl")
            .field("env_name", &self.env_name)
            .field("value", &"<REDACTED>")
            .finish()
    }
}

/// Resolve `database.url_env` from the process environment.
pub fn resolve_database_url(cfg: &AppConfig) -> Result<DatabaseUrl> {
    let name = cfg.database.url_env.trim();
    if name.is_empty() {
        bail!("SECRETS_MISSING: database.url_env is blank");
    }
    match resolve_env(name) {
        Some(value) => Ok(DatabaseUrl {
            env_name: name.to_string(),
            value,
        }),
        None => bail!(
            "SECRETS_MISSING: required env var '{}' (database url) is not set or empty",
            name
        ),
    }
}

/// `None` when the variable is unset or blank.
fn resolve_env(var_name: &str) -> Option<String> {
    match std::env::var(var_name) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}
