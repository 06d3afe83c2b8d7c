#![forbid(unsafe_code)]

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use crate::clips::FetchError;

/// Tokens expiring within this many seconds are replaced before use.
pub const TOKEN_REFRESH_MARGIN_SECS: i64 = 60 * 60;

/// Upper bound applied to `expires_in`; larger values are treated as this.
const MAX_TOKEN_LIFETIME_SECS: i64 = 10 * 365 * 24 * 60 * 60;

/// Body of a successful client-credentials exchange.
#[derive(Debug, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    pub expires_in: i64,
    #[serde(default)]
    pub token_type: String,
}

#[derive(Clone)]
struct AppToken {
    value: String,
    expires_at: DateTime<Utc>,
}

/// Holds at most one app access token. Owned by whoever makes the API calls
/// and passed into each fetch; there is no process-global token.
#[derive(Default)]
pub struct TokenCache {
    current: Option<AppToken>,
}

impl std::fmt::Debug for TokenCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCache")
            .field("expires_at", &self.expires_at())
            .finish()
    }
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.current.as_ref().map(|token| token.expires_at)
    }

    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        match &self.current {
            Some(token) => token.expires_at - now <= Duration::seconds(TOKEN_REFRESH_MARGIN_SECS),
            None => true,
        }
    }

    /// Returns a usable bearer token, running `exchange` only when the cached
    /// one is missing or about to expire.
    pub fn bearer<F>(&mut self, now: DateTime<Utc>, exchange: F) -> Result<String, FetchError>
    where
        F: FnOnce() -> Result<TokenGrant, FetchError>,
    {
        if !self.needs_refresh(now)
            && let Some(token) = &self.current
        {
            return Ok(token.value.clone());
        }

        let grant = exchange()?;
        if grant.access_token.trim().is_empty() {
            return Err(FetchError::Upstream(
                "token endpoint returned an empty access token".to_string(),
            ));
        }
        let token = AppToken {
            value: grant.access_token,
            expires_at: now
                .checked_add_signed(Duration::seconds(
                    grant.expires_in.clamp(0, MAX_TOKEN_LIFETIME_SECS),
                ))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        };
        tracing::info!(expires_at = %token.expires_at, "obtained app access token");

        let value = token.value.clone();
        self.current = Some(token);
        Ok(value)
    }

    /// Drops the cached token so the next call performs a fresh exchange.
    pub fn invalidate(&mut self) {
        self.current = None;
    }
}
