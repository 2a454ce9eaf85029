// crates/client/src/cli.rs
//! Command line of `chatshell-migrate`.
//!
//! ```bash
//! chatshell-migrate export --out ~/backups
//! chatshell-migrate import ~/backups/chatshell-20261019.chatshell.gz --upload
//! chatshell-migrate --max-poll-failures 1 status 2f1c...
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::client::DEFAULT_SERVER;
use crate::poller::PollerConfig;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Parser)]
#[command(name = "chatshell-migrate")]
#[command(about = "Export or import chatshell data through a running host")]
#[command(version)]
pub struct Cli {
    /// Base URL of the chatshell host
    #[arg(long, global = true, default_value = DEFAULT_SERVER, env = "CHATSHELL_SERVER")]
    pub server: String,

    /// Delay between status polls
    #[arg(long = "poll-interval-ms", global = true, default_value_t = 1200)]
    pub poll_interval_ms: u64,

    /// Consecutive failed polls tolerated before giving up (1 = stop at the first)
    #[arg(long = "max-poll-failures", global = true, default_value_t = 3)]
    pub max_poll_failures: u32,

    /// Base backoff after a failed poll or connection attempt; doubles each time
    #[arg(long = "retry-backoff-ms", global = true, default_value_t = 500)]
    pub retry_backoff_ms: u64,

    /// Attempts to reach the host before giving up
    #[arg(long = "connect-retries", global = true, default_value_t = 10)]
    pub connect_retries: u32,

    /// Stop watching a job after this many seconds (the job keeps running)
    #[arg(long = "timeout-secs", global = true)]
    pub timeout_secs: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Export the data directory and download the archive
    Export {
        /// File or directory for the archive (default: current directory)
        #[arg(long, short)]
        out: Option<PathBuf>,
    },
    /// Replace the data directory with an archive
    Import {
        /// Archive to import
        archive: PathBuf,
        /// Send the archive to the host instead of passing its path
        #[arg(long)]
        upload: bool,
    },
    /// Show one job
    Status { id: String },
    /// Ask the host to cancel a job
    Cancel { id: String },
    /// List the jobs the host still retains
    List,
}

impl Cli {
    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            interval: Duration::from_millis(self.poll_interval_ms),
            poll_retry: RetryPolicy::new(
                self.max_poll_failures,
                Duration::from_millis(self.retry_backoff_ms),
            ),
            timeout: self.timeout_secs.map(Duration::from_secs),
        }
    }

    pub fn connect_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.connect_retries,
            Duration::from_millis(self.retry_backoff_ms),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["chatshell-migrate", "export"]).unwrap();
        assert_eq!(cli.server, DEFAULT_SERVER);
        let config = cli.poller_config();
        assert_eq!(config.interval, Duration::from_millis(1200));
        assert_eq!(config.poll_retry.max_attempts, 3);
        assert_eq!(config.poll_retry.base_delay, Duration::from_millis(500));
        assert_eq!(cli.connect_policy().max_attempts, 10);
        assert!(matches!(cli.command, Command::Export { out: None }));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "chatshell-migrate",
            "import",
            "backup.chatshell.gz",
            "--upload",
            "--max-poll-failures",
            "1",
            "--timeout-secs",
            "30",
        ])
        .unwrap();
        let config = cli.poller_config();
        assert_eq!(config.poll_retry.max_attempts, 1);
        assert_eq!(config.timeout, Some(Duration::from_secs(30)));
        match cli.command {
            Command::Import { archive, upload } => {
                assert_eq!(archive, PathBuf::from("backup.chatshell.gz"));
                assert!(upload);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_import_requires_archive() {
        assert!(Cli::try_parse_from(["chatshell-migrate", "import"]).is_err());
    }
}
