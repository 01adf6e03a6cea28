//! CLI entry point for the segment-fetch tool.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use segment_fetch::download::DownloadReport;
use segment_fetch::{
    DownloadJob, FetchCoordinator, HttpClient, PlaylistSource, RateLimiter, Segment,
    sanitize_filename,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

mod app_config;
mod cli;

use app_config::Settings;
use cli::Args;

/// Extension of the assembled output file.
const OUTPUT_EXTENSION: &str = "mp4";

/// Exit code when the output was written with missing segments.
///
/// clap already uses 2 for usage errors.
const EXIT_PARTIAL: u8 = 3;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    // Logs go to stderr so `--json` output on stdout stays machine-readable.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let loaded = app_config::load_default_file_config()?;
    if let Some(path) = &loaded.path {
        debug!(path = %path.display(), loaded = loaded.config.is_some(), "config file");
    }
    let settings = app_config::resolve_settings(&args, loaded.config.as_ref());
    debug!(?settings, "effective settings");

    let title = match args.title.clone() {
        Some(title) => title,
        None => prompt_title().await?,
    };
    let output_path = output_path_for(&settings.output_dir, &title);

    let client = HttpClient::with_options(&settings.client)
        .context("Failed to configure HTTP client")?;
    let source = playlist_source(&args).await?;
    info!(source = %source, "reading playlist");
    let segments = source.list_segments(&client).await?;

    let report = download(&settings, client, segments, &output_path).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if !args.quiet {
        print_summary(&report);
    }

    if report.is_complete() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(EXIT_PARTIAL))
    }
}

async fn download(
    settings: &Settings,
    client: HttpClient,
    segments: Vec<Segment>,
    output_path: &Path,
) -> Result<DownloadReport> {
    let rate_limiter = if settings.rate_limit.is_zero() {
        debug!("rate limiting disabled");
        Arc::new(RateLimiter::unpaced())
    } else {
        debug!(rate_limit_ms = settings.rate_limit.as_millis(), "rate limiting enabled");
        Arc::new(RateLimiter::new(settings.rate_limit))
    };
    let coordinator = FetchCoordinator::new(client, rate_limiter);

    let job = DownloadJob::new(segments, output_path)
        .with_max_workers(settings.workers)
        .with_max_retries(settings.max_retries)
        .with_gap_policy(settings.gap_policy);

    let cancel = CancellationToken::new();
    let cancel_on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling download");
            cancel_on_signal.cancel();
        }
    });

    coordinator
        .run_cancellable(&job, &cancel)
        .await
        .with_context(|| format!("Failed to download '{}'", output_path.display()))
}

async fn playlist_source(args: &Args) -> Result<PlaylistSource> {
    if let Some(path) = &args.playlist {
        return Ok(PlaylistSource::Local(path.clone()));
    }
    if let Some(url) = &args.playlist_url {
        return Ok(PlaylistSource::Remote(url.clone()));
    }
    let cwd = std::env::current_dir().context("Failed to resolve current directory")?;
    Ok(PlaylistSource::discover(&cwd).await?)
}

/// Asks for the video title on stdin.
async fn prompt_title() -> Result<String> {
    let mut stderr = tokio::io::stderr();
    stderr.write_all(b"Video title: ").await?;
    stderr.flush().await?;

    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .context("Failed to read title from stdin")?;
    Ok(line.trim().to_string())
}

fn output_path_for(output_dir: &Path, title: &str) -> PathBuf {
    output_dir.join(format!("{}.{OUTPUT_EXTENSION}", sanitize_filename(title)))
}

fn print_summary(report: &DownloadReport) {
    println!(
        "Saved {} ({} bytes, {}/{} segments)",
        report.output_path.display(),
        report.bytes_written,
        report.succeeded,
        report.total_segments
    );
    if report.recovered > 0 || report.retried > 0 || report.rate_limit_hits > 0 {
        println!(
            "  retried {} times, recovered {} segments, rate limited {} times",
            report.retried, report.recovered, report.rate_limit_hits
        );
    }
    if !report.is_complete() {
        println!("  missing segments: {:?}", report.failed_indices);
    }
}
