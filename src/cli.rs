//! CLI argument definitions using clap derive macros.
//!
//! Tunables are `Option`s so that values from the config file apply only
//! when the flag was not given.

use std::path::PathBuf;

use clap::Parser;

/// Download a segmented video and join it into one file.
///
/// Segment URLs come from a playlist: `--playlist`, `--playlist-url`, or the
/// first `.m3u8` file in the current directory. The output is written to
/// `<OUTPUT_DIR>/<TITLE>.mp4`.
///
/// Exit codes: 0 complete, 1 error, 2 invalid arguments, 3 written with
/// missing segments (only with --allow-gaps).
#[derive(Parser, Debug)]
#[command(name = "segment-fetch")]
#[command(author, version, about)]
pub struct Args {
    /// Title used for the output file name (prompted for when omitted)
    pub title: Option<String>,

    /// Playlist file listing the segment URLs
    #[arg(short = 'p', long, value_name = "FILE", conflicts_with = "playlist_url")]
    pub playlist: Option<PathBuf>,

    /// Remote playlist listing the segment URLs
    #[arg(short = 'u', long, value_name = "URL")]
    pub playlist_url: Option<String>,

    /// Directory for the output file [default: ./output]
    #[arg(short = 'o', long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Maximum concurrent segment downloads (1-100) [default: 5]
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub workers: Option<u8>,

    /// Attempts per segment before it is queued for recovery (1-10) [default: 5]
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u8).range(1..=10))]
    pub max_retries: Option<u8>,

    /// Minimum delay between requests in milliseconds (0 to disable, max 60000) [default: 100]
    #[arg(short = 'l', long, value_name = "MS", value_parser = clap::value_parser!(u64).range(0..=60000))]
    pub rate_limit: Option<u64>,

    /// Per-request timeout in seconds (1-3600) [default: 15]
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub timeout: Option<u64>,

    /// Write the output even if some segments could not be fetched
    #[arg(long)]
    pub allow_gaps: bool,

    /// Print the download report as JSON on stdout
    #[arg(long)]
    pub json: bool,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_default_args_parses_successfully() {
        let args = Args::try_parse_from(["segment-fetch"]).unwrap();
        assert!(args.title.is_none());
        assert!(args.playlist.is_none());
        assert!(args.workers.is_none());
        assert!(args.max_retries.is_none());
        assert!(args.rate_limit.is_none());
        assert!(!args.allow_gaps);
        assert!(!args.json);
        assert_eq!(args.verbose, 0);
        assert!(!args.quiet);
    }

    #[test]
    fn test_cli_title_positional() {
        let args = Args::try_parse_from(["segment-fetch", "Lesson 3: Ownership"]).unwrap();
        assert_eq!(args.title.as_deref(), Some("Lesson 3: Ownership"));
    }

    #[test]
    fn test_cli_verbose_flag_increments_count() {
        let args = Args::try_parse_from(["segment-fetch", "-vv"]).unwrap();
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_cli_quiet_conflicts_with_verbose() {
        let result = Args::try_parse_from(["segment-fetch", "-q", "-v"]);
        assert_eq!(
            result.unwrap_err().kind(),
            clap::error::ErrorKind::ArgumentConflict
        );
    }

    #[test]
    fn test_cli_playlist_sources_conflict() {
        let result = Args::try_parse_from([
            "segment-fetch",
            "--playlist",
            "a.m3u8",
            "--playlist-url",
            "https://cdn.example.com/a.m3u8",
        ]);
        assert_eq!(
            result.unwrap_err().kind(),
            clap::error::ErrorKind::ArgumentConflict
        );
    }

    #[test]
    fn test_cli_workers_range() {
        let args = Args::try_parse_from(["segment-fetch", "-c", "100"]).unwrap();
        assert_eq!(args.workers, Some(100));

        for invalid in ["0", "101"] {
            let result = Args::try_parse_from(["segment-fetch", "-c", invalid]);
            assert_eq!(
                result.unwrap_err().kind(),
                clap::error::ErrorKind::ValueValidation
            );
        }
    }

    #[test]
    fn test_cli_max_retries_rejects_zero() {
        let result = Args::try_parse_from(["segment-fetch", "-r", "0"]);
        assert_eq!(
            result.unwrap_err().kind(),
            clap::error::ErrorKind::ValueValidation
        );
    }

    #[test]
    fn test_cli_rate_limit_zero_allowed() {
        let args = Args::try_parse_from(["segment-fetch", "-l", "0"]).unwrap();
        assert_eq!(args.rate_limit, Some(0));
    }

    #[test]
    fn test_cli_full_invocation() {
        let args = Args::try_parse_from([
            "segment-fetch",
            "Intro",
            "-p",
            "lesson.m3u8",
            "-o",
            "videos",
            "--timeout",
            "30",
            "--allow-gaps",
            "--json",
        ])
        .unwrap();
        assert_eq!(args.playlist, Some(PathBuf::from("lesson.m3u8")));
        assert_eq!(args.output_dir, Some(PathBuf::from("videos")));
        assert_eq!(args.timeout, Some(30));
        assert!(args.allow_gaps);
        assert!(args.json);
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        let result = Args::try_parse_from(["segment-fetch", "--help"]);
        assert_eq!(
            result.unwrap_err().kind(),
            clap::error::ErrorKind::DisplayHelp
        );
    }
}
