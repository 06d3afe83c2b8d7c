#![forbid(unsafe_code)]

//! Helix API access: app token exchange, broadcaster lookup, and clip listing.

pub mod helix;
pub mod token;

use chrono::{DateTime, Utc};

use crate::clips::{Clip, FetchError, Period, select_top};
use crate::config::{Credentials, Settings};
use helix::HelixClient;
use token::TokenCache;

/// Fetches the most viewed recent clips of one broadcaster.
#[derive(Clone)]
pub struct ClipFetcher {
    helix: HelixClient,
    credentials: Option<Credentials>,
    missing: Vec<&'static str>,
    broadcaster: String,
}

impl ClipFetcher {
    pub fn new(helix: HelixClient, settings: &Settings) -> Self {
        Self {
            helix,
            credentials: settings.credentials(),
            missing: settings.missing_credentials(),
            broadcaster: settings.broadcaster.clone(),
        }
    }

    pub fn broadcaster(&self) -> &str {
        &self.broadcaster
    }

    pub fn is_configured(&self) -> bool {
        self.credentials.is_some()
    }

    /// Token, broadcaster id, one page of clips, sort, cap. Blocks on network
    /// I/O. An upstream failure drops the cached token so the next request
    /// starts from a fresh exchange.
    pub fn fetch(
        &self,
        tokens: &mut TokenCache,
        count: usize,
        period: Period,
        now: DateTime<Utc>,
    ) -> Result<Vec<Clip>, FetchError> {
        let Some(credentials) = &self.credentials else {
            return Err(FetchError::Configuration {
                missing: self.missing.clone(),
            });
        };

        let bearer = tokens.bearer(now, || self.helix.app_token(credentials))?;
        let result = self.fetch_with_token(credentials, &bearer, count, period, now);
        if let Err(FetchError::Upstream(message)) = &result {
            tracing::debug!(%message, "discarding cached token after upstream failure");
            tokens.invalidate();
        }
        result
    }

    fn fetch_with_token(
        &self,
        credentials: &Credentials,
        bearer: &str,
        count: usize,
        period: Period,
        now: DateTime<Utc>,
    ) -> Result<Vec<Clip>, FetchError> {
        let user = self
            .helix
            .user_by_login(credentials, bearer, &self.broadcaster)?;
        let (started_at, ended_at) = period.window(now);
        let clips = self
            .helix
            .clips(credentials, bearer, &user.id, started_at, ended_at)?;
        if clips.is_empty() {
            let name = if user.display_name.trim().is_empty() {
                &user.login
            } else {
                &user.display_name
            };
            return Err(FetchError::Empty(format!(
                "{name} has no clips from the last {}",
                period.as_str()
            )));
        }

        let fetched = clips.len();
        let top = select_top(clips, count);
        tracing::info!(
            broadcaster = %self.broadcaster,
            period = period.as_str(),
            fetched,
            returned = top.len(),
            "fetched clips"
        );
        Ok(top)
    }
}
