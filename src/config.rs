use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use glob::Pattern;

use crate::cli::SyncArgs;
use crate::download::DownloadConfig;
use crate::filter::FilterConfig;
use crate::index::IndexConfig;
use crate::limiter::ThrottleConfig;
use crate::retry::RetryConfig;
use crate::sync::SyncConfig;
use crate::types::MaxSize;

/// Ledger location used when `--ledger-directory` is not given.
const DEFAULT_LEDGER_SUBDIR: &str = ".flickrpd";

/// Validated application configuration.
pub struct Config {
    pub api_key: String,
    pub user_id: String,
    pub directory: PathBuf,
    pub ledger_directory: PathBuf,
    pub album_pattern: Option<Pattern>,
    pub skip_albums: Vec<String>,
    pub auto_generated_names: Vec<String>,

    pub api_call_delay: Duration,
    pub retry_delay: Duration,
    pub max_backoff: Duration,

    pub max_retries: u32,
    pub max_throttle_retries: u32,
    pub workers: u16,

    pub max_size: MaxSize,

    pub include_auto_generated: bool,
    pub download_video: bool,
    pub dry_run: bool,
    pub no_progress_bar: bool,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("api_key", &"<redacted>")
            .field("user_id", &self.user_id)
            .field("directory", &self.directory)
            .field("ledger_directory", &self.ledger_directory)
            .field("album_pattern", &self.album_pattern.as_ref().map(Pattern::as_str))
            .field("workers", &self.workers)
            .field("api_call_delay", &self.api_call_delay)
            .field("dry_run", &self.dry_run)
            .finish_non_exhaustive()
    }
}

pub(crate) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

/// Resolve the ledger directory: explicit flag, else a hidden folder under
/// the download root.
pub(crate) fn resolve_ledger_directory(directory: &Path, explicit: Option<&str>) -> PathBuf {
    match explicit {
        Some(dir) => expand_tilde(dir),
        None => directory.join(DEFAULT_LEDGER_SUBDIR),
    }
}

fn required(value: Option<String>, name: &str, env: &str) -> anyhow::Result<String> {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => anyhow::bail!("--{name} is required (or set {env})"),
    }
}

fn non_empty(names: Vec<String>) -> Vec<String> {
    names
        .into_iter()
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .collect()
}

impl Config {
    pub fn from_cli(cli: SyncArgs) -> anyhow::Result<Self> {
        let api_key = required(cli.api_key, "api-key", "FLICKR_API_KEY")?;
        let user_id = required(cli.user_id, "user-id", "FLICKR_USER_ID")?;

        if cli.workers < 1 {
            anyhow::bail!("--workers must be at least 1");
        }
        if !cli.api_call_delay.is_finite() || cli.api_call_delay < 0.0 {
            anyhow::bail!("--api-call-delay must be a non-negative number of seconds");
        }

        let album_pattern = cli
            .album
            .as_deref()
            .map(|p| Pattern::new(p).with_context(|| format!("Invalid album pattern '{p}'")))
            .transpose()?;

        let api_call_delay = Duration::try_from_secs_f64(cli.api_call_delay)
            .with_context(|| format!("--api-call-delay {} is out of range", cli.api_call_delay))?;

        let directory = expand_tilde(&cli.directory);
        let ledger_directory =
            resolve_ledger_directory(&directory, cli.ledger_directory.as_deref());

        Ok(Self {
            api_key,
            user_id,
            directory,
            ledger_directory,
            album_pattern,
            skip_albums: non_empty(cli.skip_albums),
            auto_generated_names: non_empty(cli.auto_generated_album),
            api_call_delay,
            retry_delay: Duration::from_secs(cli.retry_delay),
            max_backoff: Duration::from_secs(cli.max_backoff),
            max_retries: cli.max_retries,
            max_throttle_retries: cli.max_throttle_retries,
            workers: cli.workers,
            max_size: cli.max_size,
            include_auto_generated: cli.include_auto_generated,
            download_video: cli.download_video,
            dry_run: cli.dry_run,
            no_progress_bar: cli.no_progress_bar,
        })
    }

    pub fn retry(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            base_delay: self.retry_delay,
            max_delay: self.max_backoff,
        }
    }

    pub fn throttle(&self) -> ThrottleConfig {
        ThrottleConfig {
            min_interval: self.api_call_delay,
            backoff: RetryConfig {
                max_retries: self.max_throttle_retries,
                base_delay: self.retry_delay,
                max_delay: self.max_backoff,
            },
        }
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            index: IndexConfig {
                auto_generated_names: self.auto_generated_names.clone(),
                retry: self.retry(),
            },
            filter: FilterConfig {
                directory: self.directory.clone(),
                album_pattern: self.album_pattern.clone(),
                skip_albums: self.skip_albums.clone(),
                include_auto_generated: self.include_auto_generated,
                download_videos: self.download_video,
                size_capped: self.max_size.max_edge().is_some(),
            },
            download: DownloadConfig {
                concurrent_downloads: self.workers as usize,
                retry: self.retry(),
                dry_run: self.dry_run,
                no_progress_bar: self.no_progress_bar,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Command};
    use clap::Parser;

    fn make_cli(extra: &[&str]) -> SyncArgs {
        let mut argv = vec!["flickrpd-rs", "--api-key", "secret-key", "--user-id", "12345@N00"];
        argv.extend_from_slice(extra);
        match Cli::try_parse_from(argv).unwrap().effective_command() {
            Command::Sync(args) => args,
            Command::Status(_) => panic!("expected sync"),
        }
    }

    #[test]
    fn test_expand_tilde_with_home() {
        let result = expand_tilde("~/Pictures");
        if let Some(home) = dirs::home_dir() {
            assert_eq!(result, home.join("Pictures"));
        }
    }

    #[test]
    fn test_expand_tilde_no_prefix() {
        assert_eq!(expand_tilde("/absolute/path"), PathBuf::from("/absolute/path"));
        assert_eq!(expand_tilde("relative/path"), PathBuf::from("relative/path"));
    }

    #[test]
    fn test_default_ledger_directory_is_under_download_root() {
        let cfg = Config::from_cli(make_cli(&["-d", "/photos"])).unwrap();
        assert_eq!(cfg.ledger_directory, PathBuf::from("/photos/.flickrpd"));
    }

    #[test]
    fn test_explicit_ledger_directory() {
        let cfg = Config::from_cli(make_cli(&["--ledger-directory", "/var/lib/flickrpd"])).unwrap();
        assert_eq!(cfg.ledger_directory, PathBuf::from("/var/lib/flickrpd"));
    }

    #[test]
    fn test_missing_api_key_is_rejected() {
        let mut args = make_cli(&[]);
        args.api_key = None;
        let err = Config::from_cli(args).unwrap_err();
        assert!(err.to_string().contains("FLICKR_API_KEY"));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut args = make_cli(&[]);
        args.workers = 0;
        assert!(Config::from_cli(args).is_err());
    }

    #[test]
    fn test_negative_delay_rejected() {
        let mut args = make_cli(&[]);
        args.api_call_delay = -1.0;
        assert!(Config::from_cli(args).is_err());
    }

    #[test]
    fn test_huge_delay_rejected_without_panic() {
        let err = Config::from_cli(make_cli(&["--api-call-delay", "1e300"])).unwrap_err();
        assert!(err.to_string().contains("--api-call-delay"));
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        assert!(Config::from_cli(make_cli(&["--album", "[unclosed"])).is_err());
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let cfg = Config::from_cli(make_cli(&[])).unwrap();
        let debug = format!("{cfg:?}");
        assert!(!debug.contains("secret-key"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_sync_config_carries_settings() {
        let cfg = Config::from_cli(make_cli(&[
            "--workers",
            "3",
            "--api-call-delay",
            "0.5",
            "--download-video",
            "false",
            "--skip-albums",
            " Screenshots ,",
        ]))
        .unwrap();
        assert_eq!(cfg.throttle().min_interval, Duration::from_millis(500));
        assert_eq!(cfg.skip_albums, vec!["Screenshots"]);

        let sync = cfg.sync_config();
        assert_eq!(sync.download.concurrent_downloads, 3);
        assert!(!sync.filter.download_videos);
        assert!(!sync.filter.size_capped);
        assert_eq!(sync.index.auto_generated_names, vec!["Auto Upload"]);
    }
}
