#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_CLIPREEL_PORT: u16 = 5000;
pub const DEFAULT_CLIPREEL_HOST: &str = "0.0.0.0";
pub const DEFAULT_BROADCASTER: &str = "ticklefitz";
pub const DEFAULT_ARCHIVE_BRANCH: &str = "main";
pub const DEFAULT_ARCHIVE_DIR: &str = "archive";

pub const CLIENT_ID_VAR: &str = "TWITCH_CLIENT_ID";
pub const CLIENT_SECRET_VAR: &str = "TWITCH_CLIENT_SECRET";

/// How the playlist page plays clips back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackMode {
    /// Platform embed iframe, one clip slug at a time.
    Embed,
    /// Native `<video>` pointed at MP4 URLs derived from thumbnails.
    Direct,
    /// Native `<video>` pointed at files committed to the archive repository.
    Archive,
}

impl PlaybackMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "embed" | "iframe" => Some(Self::Embed),
            "mp4" | "direct" | "video" => Some(Self::Direct),
            "archive" | "github" | "repo" => Some(Self::Archive),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Embed => "embed",
            Self::Direct => "mp4",
            Self::Archive => "archive",
        }
    }
}

/// API credentials for the client-credentials exchange.
#[derive(Clone)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Where archived clips get committed.
#[derive(Clone)]
pub struct ArchiveTarget {
    pub token: String,
    /// `owner/name` on the hosting provider.
    pub repo: String,
    pub branch: String,
    pub workdir: PathBuf,
}

impl std::fmt::Debug for ArchiveTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveTarget")
            .field("token", &"<redacted>")
            .field("repo", &self.repo)
            .field("branch", &self.branch)
            .field("workdir", &self.workdir)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub broadcaster: String,
    pub mode: PlaybackMode,
    pub fallback_on_upstream_error: bool,
    pub archive: Option<ArchiveTarget>,
    pub port: u16,
    pub host: String,
}

impl Settings {
    /// Returns both credentials, or `None` when either is missing.
    pub fn credentials(&self) -> Option<Credentials> {
        Some(Credentials {
            client_id: self.client_id.clone()?,
            client_secret: self.client_secret.clone()?,
        })
    }

    /// Names of the credential variables that are not set.
    pub fn missing_credentials(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.client_id.is_none() {
            missing.push(CLIENT_ID_VAR);
        }
        if self.client_secret.is_none() {
            missing.push(CLIENT_SECRET_VAR);
        }
        missing
    }
}

pub fn load_settings() -> Result<Settings> {
    resolve_settings(SettingsOverrides::default())
}

#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub port: Option<u16>,
    pub host: Option<String>,
    pub mode: Option<PlaybackMode>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_settings(overrides: SettingsOverrides) -> Result<Settings> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    build_settings_with_overrides(&file_vars, env_var_string, overrides)
}

#[cfg(test)]
fn build_settings(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> Result<Settings> {
    build_settings_with_overrides(file_vars, env_lookup, SettingsOverrides::default())
}

fn build_settings_with_overrides(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: SettingsOverrides,
) -> Result<Settings> {
    let lookup = |key: &str| lookup_value(key, file_vars, &env_lookup);

    let port = overrides
        .port
        .or_else(|| {
            lookup("CLIPREEL_PORT")
                .or_else(|| lookup("PORT"))
                .and_then(|value| value.parse::<u16>().ok())
        })
        .unwrap_or(DEFAULT_CLIPREEL_PORT);
    let host = overrides
        .host
        .and_then(|value| {
            let trimmed = value.trim().to_string();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed)
            }
        })
        .or_else(|| lookup("CLIPREEL_HOST"))
        .unwrap_or_else(|| DEFAULT_CLIPREEL_HOST.to_string());

    let mode = match overrides.mode {
        Some(mode) => mode,
        None => match lookup("CLIPREEL_MODE") {
            Some(raw) => match PlaybackMode::parse(&raw) {
                Some(mode) => mode,
                None => bail!("CLIPREEL_MODE must be one of embed, mp4, archive (got {raw:?})"),
            },
            None => PlaybackMode::Embed,
        },
    };

    let fallback_on_upstream_error = lookup("CLIPREEL_FALLBACK")
        .as_deref()
        .and_then(parse_flag)
        .unwrap_or(false);

    let archive = match (lookup("GITHUB_TOKEN"), lookup("GITHUB_REPO")) {
        (Some(token), Some(repo)) => {
            if !is_valid_repo(&repo) {
                bail!("GITHUB_REPO must look like owner/name (got {repo:?})");
            }
            Some(ArchiveTarget {
                token,
                repo,
                branch: lookup("GITHUB_BRANCH")
                    .unwrap_or_else(|| DEFAULT_ARCHIVE_BRANCH.to_string()),
                workdir: PathBuf::from(
                    lookup("CLIPREEL_ARCHIVE_DIR").unwrap_or_else(|| DEFAULT_ARCHIVE_DIR.into()),
                ),
            })
        }
        _ => None,
    };

    if mode == PlaybackMode::Archive && archive.is_none() {
        bail!("CLIPREEL_MODE=archive requires GITHUB_TOKEN and GITHUB_REPO");
    }

    Ok(Settings {
        client_id: lookup(CLIENT_ID_VAR),
        client_secret: lookup(CLIENT_SECRET_VAR),
        broadcaster: lookup("CLIPREEL_BROADCASTER")
            .map(|value| value.to_ascii_lowercase())
            .unwrap_or_else(|| DEFAULT_BROADCASTER.to_string()),
        mode,
        fallback_on_upstream_error,
        archive,
        port,
        host,
    })
}

/// Accepts the usual spellings of a boolean switch.
pub fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn is_valid_repo(repo: &str) -> bool {
    let mut parts = repo.split('/');
    let valid_part = |part: Option<&str>| {
        part.is_some_and(|part| {
            !part.is_empty()
                && part
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        })
    };
    valid_part(parts.next()) && valid_part(parts.next()) && parts.next().is_none()
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| {
        file_vars
            .get(key)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    })
}

pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}
