#![forbid(unsafe_code)]

//! Archival of the current top clips into a git repository.
//!
//! A refresh clones the repository into a scratch working copy, downloads
//! every clip that has a derivable MP4 URL, writes `manifest.json`, commits,
//! and pushes. The first failing step aborts the whole refresh and discards
//! the working copy, so readers fall back to the published manifest until the
//! next successful refresh. The published manifest is what the archive page
//! mode plays from.

use std::{
    fs,
    io::{self, Write as _},
    path::{Path, PathBuf},
    process::Command,
    sync::Arc,
    time::Duration,
};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clips::Clip;
use crate::config::ArchiveTarget;
use crate::playback::{PlaybackResolver, ThumbnailPatterns};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const CLIPS_SUBDIR: &str = "clips";
pub const DEFAULT_RAW_BASE: &str = "https://raw.githubusercontent.com";
const DEFAULT_GIT_HOST: &str = "https://github.com";

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(120);
const COMMIT_AUTHOR_NAME: &str = "clipreel";
const COMMIT_AUTHOR_EMAIL: &str = "clipreel@users.noreply.github.com";

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("an archival refresh is already running")]
    Busy,
    #[error("git {command} failed: {detail}")]
    Git { command: String, detail: String },
    #[error("downloading clip {id} failed: {detail}")]
    Download { id: String, detail: String },
    #[error("none of the clips had a downloadable video URL")]
    NothingToArchive,
    #[error("manifest unavailable: {0}")]
    Manifest(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub updated_at: DateTime<Utc>,
    pub broadcaster: String,
    pub clips: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub creator_name: String,
    #[serde(default)]
    pub view_count: u64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub duration: f64,
    /// Path inside the repository, e.g. `clips/<id>.mp4`.
    pub file: String,
}

impl ManifestEntry {
    fn from_clip(clip: &Clip, file: String) -> Self {
        Self {
            id: clip.id.clone(),
            title: clip.title.clone(),
            creator_name: clip.creator_name.clone(),
            view_count: clip.view_count,
            created_at: clip.created_at,
            duration: clip.duration,
            file,
        }
    }

    pub fn to_clip(&self) -> Clip {
        Clip {
            id: self.id.clone(),
            title: self.title.clone(),
            creator_name: self.creator_name.clone(),
            view_count: self.view_count,
            created_at: self.created_at,
            duration: self.duration,
            thumbnail_url: String::new(),
            url: String::new(),
            embed_url: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ManifestSource {
    /// Read from the local working copy.
    Local,
    /// Fetched from the raw-file endpoint.
    Remote,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArchiveReport {
    pub archived: usize,
    pub skipped: Vec<String>,
    pub committed: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArchiveStatus {
    pub clips: usize,
    pub updated_at: DateTime<Utc>,
    pub source: ManifestSource,
}

/// Runs archival refreshes against one repository. Only one refresh runs at
/// a time per `Archiver`; a concurrent call gets [`ArchiveError::Busy`].
pub struct Archiver {
    target: ArchiveTarget,
    broadcaster: String,
    agent: ureq::Agent,
    resolver: Arc<dyn PlaybackResolver>,
    git_program: PathBuf,
    git_host: String,
    raw_base: String,
    running: Mutex<()>,
}

impl Archiver {
    pub fn new(target: ArchiveTarget, broadcaster: impl Into<String>) -> Self {
        Self {
            target,
            broadcaster: broadcaster.into(),
            agent: ureq::AgentBuilder::new().timeout(DOWNLOAD_TIMEOUT).build(),
            resolver: Arc::new(ThumbnailPatterns),
            git_program: PathBuf::from("git"),
            git_host: DEFAULT_GIT_HOST.to_string(),
            raw_base: DEFAULT_RAW_BASE.to_string(),
            running: Mutex::new(()),
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn PlaybackResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_git_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.git_program = program.into();
        self
    }

    pub fn with_raw_base(mut self, raw_base: impl Into<String>) -> Self {
        self.raw_base = raw_base.into();
        self
    }

    pub fn repo(&self) -> &str {
        &self.target.repo
    }

    pub fn is_running(&self) -> bool {
        self.running.is_locked()
    }

    /// Public URL of a file committed to the repository.
    pub fn raw_url(&self, file: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            self.raw_base.trim_end_matches('/'),
            self.target.repo,
            self.target.branch,
            file.trim_start_matches('/')
        )
    }

    fn manifest_path(&self) -> PathBuf {
        self.target.workdir.join(MANIFEST_FILE)
    }

    /// Clone, download, write manifest, commit, push. Blocks until git and
    /// every download have finished.
    pub fn refresh(&self, clips: &[Clip], now: DateTime<Utc>) -> Result<ArchiveReport, ArchiveError> {
        let Some(_guard) = self.running.try_lock() else {
            return Err(ArchiveError::Busy);
        };

        tracing::info!(repo = %self.target.repo, clips = clips.len(), "starting archival refresh");
        let result = self.refresh_locked(clips, now);
        if result.is_err() {
            self.discard_workdir();
        }
        result
    }

    fn refresh_locked(
        &self,
        clips: &[Clip],
        now: DateTime<Utc>,
    ) -> Result<ArchiveReport, ArchiveError> {
        self.clone_fresh()?;

        let workdir = &self.target.workdir;
        let clips_dir = workdir.join(CLIPS_SUBDIR);
        if clips_dir.exists() {
            fs::remove_dir_all(&clips_dir)?;
        }
        fs::create_dir_all(&clips_dir)?;

        let mut entries = Vec::with_capacity(clips.len());
        let mut skipped = Vec::new();
        for clip in clips {
            let Some(stem) = safe_file_stem(&clip.id) else {
                tracing::warn!(id = %clip.id, "skipping clip with unsafe id");
                skipped.push(clip.id.clone());
                continue;
            };
            let Some(source) = self.resolver.derive_url(&clip.thumbnail_url) else {
                tracing::warn!(id = %clip.id, thumbnail = %clip.thumbnail_url, "no video url for clip");
                skipped.push(clip.id.clone());
                continue;
            };
            let file = format!("{CLIPS_SUBDIR}/{stem}.mp4");
            let bytes = self.download(&clip.id, &source, &workdir.join(&file))?;
            tracing::debug!(id = %clip.id, bytes, "downloaded clip");
            entries.push(ManifestEntry::from_clip(clip, file));
        }

        if entries.is_empty() {
            return Err(ArchiveError::NothingToArchive);
        }

        let manifest = Manifest {
            updated_at: now,
            broadcaster: self.broadcaster.clone(),
            clips: entries,
        };
        write_json_atomic(&self.manifest_path(), &manifest)?;

        self.git(&["add", "--all"], Some(workdir))?;
        let pending = self.git(&["status", "--porcelain"], Some(workdir))?;
        let committed = !pending.trim().is_empty();
        if committed {
            let message = format!("Update clips {}", now.format("%Y-%m-%d %H:%M UTC"));
            let author_name = format!("user.name={COMMIT_AUTHOR_NAME}");
            let author_email = format!("user.email={COMMIT_AUTHOR_EMAIL}");
            self.git(
                &[
                    "-c",
                    &author_name,
                    "-c",
                    &author_email,
                    "commit",
                    "--message",
                    &message,
                ],
                Some(workdir),
            )?;
            let refspec = format!("HEAD:{}", self.target.branch);
            self.git(&["push", "origin", &refspec], Some(workdir))?;
        } else {
            tracing::info!("archive already up to date, nothing to push");
        }

        let report = ArchiveReport {
            archived: manifest.clips.len(),
            skipped,
            committed,
            updated_at: now,
        };
        tracing::info!(
            archived = report.archived,
            skipped = report.skipped.len(),
            committed,
            "archival refresh finished"
        );
        Ok(report)
    }

    /// Manifest from the local working copy when present, otherwise from the
    /// raw-file endpoint.
    pub fn manifest(&self) -> Result<(Manifest, ManifestSource), ArchiveError> {
        let local = self.manifest_path();
        if local.exists() {
            let raw = fs::read_to_string(&local)?;
            return Ok((serde_json::from_str(&raw)?, ManifestSource::Local));
        }

        let url = self.raw_url(MANIFEST_FILE);
        let response = self.agent.get(&url).call().map_err(|err| match err {
            ureq::Error::Status(code, _) => {
                ArchiveError::Manifest(format!("{url} returned HTTP {code}"))
            }
            ureq::Error::Transport(transport) => {
                ArchiveError::Manifest(format!("fetching {url} failed: {transport}"))
            }
        })?;
        let manifest = response
            .into_json()
            .map_err(|err| ArchiveError::Manifest(format!("{url} is not a manifest: {err}")))?;
        Ok((manifest, ManifestSource::Remote))
    }

    /// Archived clips in manifest order, each paired with the public URL of
    /// its video file.
    pub fn manifest_clips(&self) -> Result<Vec<(Clip, String)>, ArchiveError> {
        let (manifest, _) = self.manifest()?;
        Ok(manifest
            .clips
            .iter()
            .map(|entry| (entry.to_clip(), self.raw_url(&entry.file)))
            .collect())
    }

    pub fn status(&self) -> Result<ArchiveStatus, ArchiveError> {
        let (manifest, source) = self.manifest()?;
        Ok(ArchiveStatus {
            clips: manifest.clips.len(),
            updated_at: manifest.updated_at,
            source,
        })
    }

    /// Drops a working copy that may hold unpublished changes.
    fn discard_workdir(&self) {
        let workdir = &self.target.workdir;
        if workdir.exists()
            && let Err(err) = fs::remove_dir_all(workdir)
        {
            tracing::warn!(%err, path = %workdir.display(), "could not remove archive working copy");
        }
    }

    fn clone_fresh(&self) -> Result<(), ArchiveError> {
        let workdir = &self.target.workdir;
        if workdir.exists() {
            fs::remove_dir_all(workdir)?;
        }
        if let Some(parent) = workdir.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let remote = format!(
            "{}/{}.git",
            self.git_host.replacen(
                "https://",
                &format!("https://x-access-token:{}@", self.target.token),
                1
            ),
            self.target.repo
        );
        let workdir_arg = workdir.to_string_lossy();
        let cloned = self.git(
            &[
                "clone",
                "--depth",
                "1",
                "--branch",
                &self.target.branch,
                &remote,
                &workdir_arg,
            ],
            None,
        );
        match cloned {
            Ok(_) => Ok(()),
            // Fresh repository without the branch yet: start its first commit.
            Err(ArchiveError::Git { detail, .. }) if detail.contains("not found in upstream") => {
                tracing::warn!(
                    branch = %self.target.branch,
                    "archive branch does not exist yet, starting a new history"
                );
                if workdir.exists() {
                    fs::remove_dir_all(workdir)?;
                }
                let head = format!("refs/heads/{}", self.target.branch);
                self.git(&["init", &workdir_arg], None)?;
                self.git(&["remote", "add", "origin", &remote], Some(workdir))?;
                self.git(&["symbolic-ref", "HEAD", &head], Some(workdir))?;
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    fn download(&self, id: &str, url: &str, dest: &Path) -> Result<u64, ArchiveError> {
        let download_error = |detail: String| ArchiveError::Download {
            id: id.to_string(),
            detail,
        };
        let response = self.agent.get(url).call().map_err(|err| match err {
            ureq::Error::Status(code, _) => download_error(format!("HTTP {code} from {url}")),
            ureq::Error::Transport(transport) => download_error(transport.to_string()),
        })?;

        let dir = dest.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        let written = io::copy(&mut response.into_reader(), &mut tmp)
            .map_err(|err| download_error(err.to_string()))?;
        tmp.flush()?;
        if written == 0 {
            return Err(download_error(format!("{url} returned an empty body")));
        }
        tmp.persist(dest).map_err(|err| err.error)?;
        Ok(written)
    }

    /// Runs git and returns stdout. Failures carry stderr with the token
    /// scrubbed out.
    fn git(&self, args: &[&str], cwd: Option<&Path>) -> Result<String, ArchiveError> {
        let command_name = args
            .iter()
            .find(|arg| !arg.starts_with('-') && !arg.contains('='))
            .copied()
            .unwrap_or("git")
            .to_string();
        let mut command = Command::new(&self.git_program);
        command.args(args).env("GIT_TERMINAL_PROMPT", "0");
        if let Some(cwd) = cwd {
            command.current_dir(cwd);
        }
        let output = command.output().map_err(|err| ArchiveError::Git {
            command: command_name.clone(),
            detail: format!("could not launch {}: {err}", self.git_program.display()),
        })?;
        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(ArchiveError::Git {
            command: command_name,
            detail: self.redact(&format!("{} ({})", stderr.trim(), output.status)),
        })
    }

    fn redact(&self, text: &str) -> String {
        if self.target.token.is_empty() {
            text.to_string()
        } else {
            text.replace(&self.target.token, "***")
        }
    }
}

fn safe_file_stem(id: &str) -> Option<&str> {
    let valid = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    valid.then_some(id)
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), ArchiveError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("tmp");
    let payload = serde_json::to_vec_pretty(value)?;
    fs::write(&tmp_path, payload)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}
