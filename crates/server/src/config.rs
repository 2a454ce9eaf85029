// crates/server/src/config.rs
//! Host configuration: CLI flags with environment fallbacks.
//!
//! ```bash
//! chatshell --port 47900 --data-dir ~/chatshell/data --persist-jobs
//! CHATSHELL_PORT=47900 CHATSHELL_RETENTION_SECS=600 chatshell
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Default port for the host.
pub const DEFAULT_PORT: u16 = 47900;

#[derive(Debug, Clone, Parser)]
#[command(name = "chatshell")]
#[command(about = "Chatshell host: serves the migration job API")]
#[command(version)]
pub struct Config {
    /// Address the HTTP server binds to
    #[arg(long, default_value = "127.0.0.1", env = "CHATSHELL_HOST")]
    pub host: String,

    /// Port the HTTP server listens on
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "CHATSHELL_PORT")]
    pub port: u16,

    /// Application data directory that exports read and imports replace
    #[arg(long, env = "CHATSHELL_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Host state directory: staged artifacts, uploads, job snapshot
    #[arg(long, env = "CHATSHELL_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Also write logs to daily-rotated files in this directory
    #[arg(long, env = "CHATSHELL_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// How long finished jobs are kept before their artifacts are dropped
    #[arg(long = "retention-secs", default_value_t = 3600, env = "CHATSHELL_RETENTION_SECS")]
    pub retention_secs: u64,

    /// Interval of the retention sweep
    #[arg(long = "sweep-interval-secs", default_value_t = 60, env = "CHATSHELL_SWEEP_INTERVAL_SECS")]
    pub sweep_interval_secs: u64,

    /// Persist the job table so finished jobs survive a restart
    #[arg(long = "persist-jobs", env = "CHATSHELL_PERSIST_JOBS")]
    pub persist_jobs: bool,

    /// Extra browser origin allowed to call the API (repeatable). Loopback
    /// pages and the desktop shell's own schemes are always allowed.
    #[arg(long = "allow-origin", env = "CHATSHELL_ALLOW_ORIGINS", value_delimiter = ',')]
    pub allow_origins: Vec<String>,

    /// Largest accepted upload, in megabytes
    #[arg(long = "max-upload-mb", default_value_t = 1024, env = "CHATSHELL_MAX_UPLOAD_MB")]
    pub max_upload_mb: u64,
}

impl Config {
    /// Check values clap cannot check on its own.
    pub fn validate(&self) -> Result<(), String> {
        if self.port == 0 {
            return Err("port must be non-zero".to_string());
        }
        if self.sweep_interval_secs == 0 {
            return Err("sweep-interval-secs must be at least 1".to_string());
        }
        if self.max_upload_mb == 0 {
            return Err("max-upload-mb must be at least 1".to_string());
        }
        if let Some(bad) = self.allow_origins.iter().find(|o| !o.contains("://")) {
            return Err(format!("allow-origin {bad:?} must be a full origin such as https://example.com"));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, String> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| format!("invalid bind address {}:{}: {e}", self.host, self.port))
    }

    /// Resolve directories against the platform defaults.
    pub fn settings(&self) -> Result<HostSettings, String> {
        let data_dir = match &self.data_dir {
            Some(dir) => dir.clone(),
            None => chatshell_core::paths::default_data_dir()
                .ok_or("could not determine a default data directory; pass --data-dir")?,
        };
        let state_dir = match &self.state_dir {
            Some(dir) => dir.clone(),
            None => chatshell_core::paths::default_state_dir()
                .ok_or("could not determine a default state directory; pass --state-dir")?,
        };
        Ok(HostSettings {
            data_dir,
            state_dir,
            retention: Duration::from_secs(self.retention_secs),
            persist_jobs: self.persist_jobs,
            max_upload_bytes: usize::try_from(self.max_upload_mb.saturating_mul(1024 * 1024))
                .unwrap_or(usize::MAX),
            allowed_origins: self
                .allow_origins
                .iter()
                .map(|o| o.trim_end_matches('/').to_string())
                .collect(),
        })
    }
}

/// Resolved runtime settings shared by the job service and the router.
#[derive(Debug, Clone)]
pub struct HostSettings {
    pub data_dir: PathBuf,
    pub state_dir: PathBuf,
    pub retention: Duration,
    pub persist_jobs: bool,
    pub max_upload_bytes: usize,
    /// Browser origins allowed on top of the built-in ones.
    pub allowed_origins: Vec<String>,
}

impl HostSettings {
    /// Settings rooted in two explicit directories, defaults elsewhere.
    pub fn new(data_dir: impl Into<PathBuf>, state_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            state_dir: state_dir.into(),
            retention: Duration::from_secs(3600),
            persist_jobs: false,
            max_upload_bytes: 1024 * 1024 * 1024,
            allowed_origins: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        Config::try_parse_from(std::iter::once("chatshell").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]);
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.retention_secs, 3600);
        assert!(!config.persist_jobs);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_explicit_dirs_resolve_to_settings() {
        let config = parse(&[
            "--data-dir",
            "/tmp/d",
            "--state-dir",
            "/tmp/s",
            "--retention-secs",
            "5",
            "--persist-jobs",
        ]);
        let settings = config.settings().unwrap();
        assert_eq!(settings.data_dir, PathBuf::from("/tmp/d"));
        assert_eq!(settings.state_dir, PathBuf::from("/tmp/s"));
        assert_eq!(settings.retention, Duration::from_secs(5));
        assert!(settings.persist_jobs);
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        assert!(parse(&["--port", "0"]).validate().is_err());
        assert!(parse(&["--sweep-interval-secs", "0"]).validate().is_err());
        assert!(parse(&["--max-upload-mb", "0"]).validate().is_err());
    }

    #[test]
    fn test_allow_origin_is_repeatable_and_validated() {
        let config = parse(&[
            "--data-dir",
            "/tmp/d",
            "--state-dir",
            "/tmp/s",
            "--allow-origin",
            "https://chat.example.com/",
            "--allow-origin",
            "http://10.0.0.5:3000",
        ]);
        assert!(config.validate().is_ok());
        assert_eq!(
            config.settings().unwrap().allowed_origins,
            vec!["https://chat.example.com", "http://10.0.0.5:3000"]
        );
        assert!(parse(&["--allow-origin", "example.com"]).validate().is_err());
    }

    #[test]
    fn test_bind_addr() {
        let config = parse(&["--host", "0.0.0.0", "--port", "8123"]);
        assert_eq!(config.bind_addr().unwrap().to_string(), "0.0.0.0:8123");
        assert!(parse(&["--host", "not a host"]).bind_addr().is_err());
    }
}
