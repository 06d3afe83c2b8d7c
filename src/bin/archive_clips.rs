#![forbid(unsafe_code)]

//! One-shot archival refresh, for cron jobs. Does the same work as the
//! server's `/update` route and prints the report as JSON.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::Parser;
use clipreel::archive::{ArchiveReport, Archiver};
use clipreel::clips::{MAX_CLIP_COUNT, MIN_CLIP_COUNT, Period};
use clipreel::config::{Settings, SettingsOverrides, resolve_settings};
use clipreel::twitch::{ClipFetcher, helix::HelixClient, token::TokenCache};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "archive_clips",
    version,
    about = "Download the current top clips and push them to the archive repository"
)]
struct ArchiveArgs {
    /// Alternate `.env` file.
    #[arg(long = "env-file", value_name = "PATH")]
    env_file: Option<PathBuf>,
    /// Number of clips to archive.
    #[arg(long, default_value_t = 10, value_parser = parse_count)]
    count: usize,
    /// Trailing window: day, week or month.
    #[arg(long, default_value = "week", value_parser = parse_period)]
    period: Period,
}

fn parse_count(value: &str) -> std::result::Result<usize, String> {
    let count: usize = value
        .parse()
        .map_err(|_| format!("expected a number, got {value:?}"))?;
    if !(MIN_CLIP_COUNT..=MAX_CLIP_COUNT).contains(&count) {
        return Err(format!(
            "count must be between {MIN_CLIP_COUNT} and {MAX_CLIP_COUNT}"
        ));
    }
    Ok(count)
}

fn parse_period(value: &str) -> std::result::Result<Period, String> {
    Period::parse(value).ok_or_else(|| format!("expected day, week or month (got {value:?})"))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = ArchiveArgs::parse();
    let settings = resolve_settings(SettingsOverrides {
        env_path: args.env_file.clone(),
        ..SettingsOverrides::default()
    })
    .context("loading configuration")?;

    let report = run(&settings, HelixClient::new(), &args)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("serializing archive report")?
    );
    Ok(())
}

fn run(settings: &Settings, helix: HelixClient, args: &ArchiveArgs) -> Result<ArchiveReport> {
    let Some(target) = settings.archive.clone() else {
        bail!("archive is not configured; set GITHUB_TOKEN and GITHUB_REPO");
    };

    let fetcher = ClipFetcher::new(helix, settings);
    let mut tokens = TokenCache::new();
    let clips = fetcher
        .fetch(&mut tokens, args.count, args.period, Utc::now())
        .context("fetching clips")?;

    let archiver = Archiver::new(target, settings.broadcaster.clone());
    archiver
        .refresh(&clips, Utc::now())
        .with_context(|| format!("archiving into {}", archiver.repo()))
}
