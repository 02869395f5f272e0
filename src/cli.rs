use clap::{Args, Parser, Subcommand};

use crate::types::{LogLevel, MaxSize};

#[derive(Parser, Debug)]
#[command(
    name = "flickrpd-rs",
    version,
    about = "Mirror a Flickr account's albums to local storage",
    after_help = "Examples:\n  \
        flickrpd-rs                          # Download all albums\n  \
        flickrpd-rs --album \"Vacation 2023\"  # Download only that album\n  \
        flickrpd-rs --album \"Trip*\"          # Albums starting with \"Trip\"\n  \
        flickrpd-rs status                   # Show what has been downloaded",
    args_conflicts_with_subcommands = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub sync: SyncArgs,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Download everything not yet in the ledger (default)
    Sync(SyncArgs),
    /// Show ledger totals and the last run
    Status(StatusArgs),
}

impl Cli {
    /// The subcommand to run; bare invocation means `sync`.
    pub fn effective_command(self) -> Command {
        self.command.unwrap_or(Command::Sync(self.sync))
    }

    pub fn log_level(&self) -> LogLevel {
        match &self.command {
            Some(Command::Sync(args)) => args.log_level,
            Some(Command::Status(args)) => args.log_level,
            None => self.sync.log_level,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct SyncArgs {
    /// Flickr API key
    #[arg(long, env = "FLICKR_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// NSID of the account to mirror
    #[arg(long, env = "FLICKR_USER_ID")]
    pub user_id: Option<String>,

    /// Local directory for downloads
    #[arg(short = 'd', long, env = "DOWNLOAD_DIR", default_value = "./flickr_downloads")]
    pub directory: String,

    /// Directory for the resume ledger [default: <directory>/.flickrpd]
    #[arg(long)]
    pub ledger_directory: Option<String>,

    /// Only download albums matching this name. Supports * and ?
    #[arg(short = 'a', long = "album")]
    pub album: Option<String>,

    /// Album names never downloaded (comma separated)
    #[arg(long, env = "SKIP_ALBUMS", value_delimiter = ',')]
    pub skip_albums: Vec<String>,

    /// Album names treated as auto-generated (comma separated)
    #[arg(long, value_delimiter = ',', default_value = "Auto Upload")]
    pub auto_generated_album: Vec<String>,

    /// Store items whose only home is an auto-generated album
    #[arg(long)]
    pub include_auto_generated: bool,

    /// Download videos
    #[arg(
        long,
        env = "DOWNLOAD_VIDEO",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub download_video: bool,

    /// Largest rendition to download
    #[arg(long, value_enum, default_value = "original")]
    pub max_size: MaxSize,

    /// Number of concurrent download workers
    #[arg(short = 'w', long, env = "MAX_WORKERS", default_value_t = 8)]
    pub workers: u16,

    /// Minimum seconds between API calls, across all workers
    #[arg(long, env = "API_CALL_DELAY", default_value_t = 1.1)]
    pub api_call_delay: f64,

    /// Max retries per download (0 = no retries)
    #[arg(long, default_value_t = 5)]
    pub max_retries: u32,

    /// Initial retry delay in seconds
    #[arg(long, default_value_t = 2)]
    pub retry_delay: u64,

    /// Consecutive throttle responses tolerated before giving up
    #[arg(long, default_value_t = 3)]
    pub max_throttle_retries: u32,

    /// Upper bound on any backoff delay, in seconds
    #[arg(long, default_value_t = 60)]
    pub max_backoff: u64,

    /// Log what would be downloaded without writing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Disable progress bar
    #[arg(long)]
    pub no_progress_bar: bool,

    /// Log level
    #[arg(long, value_enum, default_value = "info")]
    pub log_level: LogLevel,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    /// Local directory for downloads
    #[arg(short = 'd', long, env = "DOWNLOAD_DIR", default_value = "./flickr_downloads")]
    pub directory: String,

    /// Directory for the resume ledger [default: <directory>/.flickrpd]
    #[arg(long)]
    pub ledger_directory: Option<String>,

    /// Log level
    #[arg(long, value_enum, default_value = "warn")]
    pub log_level: LogLevel,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["flickrpd-rs"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_bare_invocation_is_sync() {
        let cli = parse(&["--api-key", "k", "--user-id", "u"]);
        match cli.effective_command() {
            Command::Sync(args) => {
                assert_eq!(args.api_key.as_deref(), Some("k"));
                assert_eq!(args.workers, 8);
                assert!(args.download_video);
                assert_eq!(args.auto_generated_album, vec!["Auto Upload"]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_album_pattern_short_flag() {
        let cli = parse(&["-a", "Trip*"]);
        let Command::Sync(args) = cli.effective_command() else {
            panic!("expected sync");
        };
        assert_eq!(args.album.as_deref(), Some("Trip*"));
    }

    #[test]
    fn test_skip_albums_comma_separated() {
        let cli = parse(&["--skip-albums", "Screenshots,Old Stuff"]);
        let Command::Sync(args) = cli.effective_command() else {
            panic!("expected sync");
        };
        assert_eq!(args.skip_albums, vec!["Screenshots", "Old Stuff"]);
    }

    #[test]
    fn test_download_video_takes_value() {
        let cli = parse(&["--download-video", "false"]);
        let Command::Sync(args) = cli.effective_command() else {
            panic!("expected sync");
        };
        assert!(!args.download_video);
    }

    #[test]
    fn test_status_subcommand() {
        let cli = parse(&["status", "--ledger-directory", "/tmp/l"]);
        assert_eq!(cli.log_level(), LogLevel::Warn);
        match cli.effective_command() {
            Command::Status(args) => {
                assert_eq!(args.ledger_directory.as_deref(), Some("/tmp/l"))
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_max_size_values() {
        let cli = parse(&["--max-size", "2048"]);
        let Command::Sync(args) = cli.effective_command() else {
            panic!("expected sync");
        };
        assert_eq!(args.max_size, MaxSize::Px2048);
    }
}
