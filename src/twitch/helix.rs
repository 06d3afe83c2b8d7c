#![forbid(unsafe_code)]

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, de::DeserializeOwned};

use super::token::TokenGrant;
use crate::clips::{Clip, FetchError};
use crate::config::Credentials;

pub const DEFAULT_API_BASE: &str = "https://api.twitch.tv/helix";
pub const DEFAULT_TOKEN_URL: &str = "https://id.twitch.tv/oauth2/token";

/// Largest page the clips endpoint hands out.
pub const CLIPS_PAGE_SIZE: usize = 100;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const USER_AGENT: &str = concat!("clipreel/", env!("CARGO_PKG_VERSION"));
const ERROR_BODY_LIMIT: usize = 200;

#[derive(Debug, Clone)]
pub struct Endpoints {
    pub api_base: String,
    pub token_url: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct HelixPage<T> {
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
pub struct HelixUser {
    pub id: String,
    pub login: String,
    #[serde(default)]
    pub display_name: String,
}

/// Blocking Helix client. Every call uses the same agent and timeout; run it
/// from `spawn_blocking` when inside the async server.
#[derive(Clone)]
pub struct HelixClient {
    agent: ureq::Agent,
    endpoints: Endpoints,
}

impl HelixClient {
    pub fn new() -> Self {
        Self::with_endpoints(Endpoints::default())
    }

    pub fn with_endpoints(endpoints: Endpoints) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build();
        Self { agent, endpoints }
    }

    /// Client-credentials exchange against the OAuth token endpoint.
    pub fn app_token(&self, credentials: &Credentials) -> Result<TokenGrant, FetchError> {
        let response = self
            .agent
            .post(&self.endpoints.token_url)
            .send_form(&[
                ("client_id", credentials.client_id.as_str()),
                ("client_secret", credentials.client_secret.as_str()),
                ("grant_type", "client_credentials"),
            ])
            .map_err(|err| upstream_error("token exchange", err))?;
        response
            .into_json()
            .map_err(|err| FetchError::Upstream(format!("token exchange returned bad JSON: {err}")))
    }

    /// Resolves a login name to the broadcaster id. An unknown login is an
    /// empty result, not an upstream failure.
    pub fn user_by_login(
        &self,
        credentials: &Credentials,
        bearer: &str,
        login: &str,
    ) -> Result<HelixUser, FetchError> {
        let page: HelixPage<HelixUser> =
            self.get_json(credentials, bearer, "users", &[("login", login)])?;
        page.data
            .into_iter()
            .next()
            .ok_or_else(|| FetchError::Empty(format!("broadcaster {login:?} was not found")))
    }

    /// One page of clips created inside `[started_at, ended_at]`, in the
    /// order the API returns them.
    pub fn clips(
        &self,
        credentials: &Credentials,
        bearer: &str,
        broadcaster_id: &str,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
    ) -> Result<Vec<Clip>, FetchError> {
        let first = CLIPS_PAGE_SIZE.to_string();
        let started_at = started_at.to_rfc3339_opts(SecondsFormat::Secs, true);
        let ended_at = ended_at.to_rfc3339_opts(SecondsFormat::Secs, true);
        let page: HelixPage<Clip> = self.get_json(
            credentials,
            bearer,
            "clips",
            &[
                ("broadcaster_id", broadcaster_id),
                ("first", first.as_str()),
                ("started_at", started_at.as_str()),
                ("ended_at", ended_at.as_str()),
            ],
        )?;
        Ok(page.data)
    }

    fn get_json<T: DeserializeOwned>(
        &self,
        credentials: &Credentials,
        bearer: &str,
        resource: &str,
        query: &[(&str, &str)],
    ) -> Result<T, FetchError> {
        let url = format!("{}/{resource}", self.endpoints.api_base.trim_end_matches('/'));
        let mut request = self
            .agent
            .get(&url)
            .set("Client-Id", &credentials.client_id)
            .set("Authorization", &format!("Bearer {bearer}"));
        for (key, value) in query {
            request = request.query(key, value);
        }
        let response = request
            .call()
            .map_err(|err| upstream_error(resource, err))?;
        response
            .into_json()
            .map_err(|err| FetchError::Upstream(format!("{resource} returned bad JSON: {err}")))
    }
}

impl Default for HelixClient {
    fn default() -> Self {
        Self::new()
    }
}

fn upstream_error(what: &str, err: ureq::Error) -> FetchError {
    match err {
        ureq::Error::Status(code, response) => {
            let body = response.into_string().unwrap_or_default();
            let body: String = body.trim().chars().take(ERROR_BODY_LIMIT).collect();
            FetchError::Upstream(format!("{what} returned HTTP {code}: {body}"))
        }
        ureq::Error::Transport(transport) => {
            FetchError::Upstream(format!("{what} request failed: {transport}"))
        }
    }
}
