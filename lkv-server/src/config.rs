//! Server configuration and command-line interface.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Snapshot file used when none is given.
pub const DEFAULT_CONFIG_PATH: &str = "./config.txt";

/// Runtime settings for the listener, workers and background tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address the listener binds to.
    pub listen: SocketAddr,
    /// Snapshot file backing the store.
    pub config_path: PathBuf,
    /// Upper bound on every accept/read wait before the stop flag is re-checked.
    /// A reply the peer does not drain within this interval closes the
    /// connection.
    pub poll_interval: Duration,
    /// How often finished connection workers are joined.
    pub reap_interval: Duration,
    /// How often a dirty store is saved.
    pub snapshot_period: Duration,
    /// Statistics report period; `None` disables the report.
    pub report_interval: Option<Duration>,
    /// Longest accepted request line, terminator excluded.
    pub max_line_len: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            listen: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
            poll_interval: Duration::from_secs(1),
            reap_interval: Duration::from_secs(1),
            snapshot_period: Duration::from_secs(1),
            report_interval: Some(Duration::from_secs(10)),
            max_line_len: 64 * 1024,
        }
    }
}

/// Command-line arguments for `lkv-server`.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Line-protocol key-value server")]
pub struct Cli {
    /// Port to listen on.
    #[arg(short, long, env = "LKV_PORT")]
    pub port: u16,

    /// Snapshot file; a `.json` extension selects JSON, anything else INI.
    #[arg(short = 'c', long = "config-file", env = "LKV_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    pub config_file: PathBuf,

    /// Interface to bind.
    #[arg(long, default_value = "0.0.0.0")]
    pub bind: IpAddr,

    /// Seconds between statistics reports on stdout; 0 disables them.
    #[arg(long, default_value_t = 10)]
    pub report_interval_secs: u64,

    /// Milliseconds between snapshots of a modified store.
    #[arg(long, default_value_t = 1000)]
    pub snapshot_period_ms: u64,

    /// Milliseconds each loop waits before re-checking for shutdown.
    #[arg(long, default_value_t = 1000)]
    pub poll_interval_ms: u64,
}

impl Cli {
    /// Builds the server configuration from the parsed arguments.
    pub fn to_config(&self) -> ServerConfig {
        let poll_interval = Duration::from_millis(self.poll_interval_ms.max(1));
        ServerConfig {
            listen: SocketAddr::new(self.bind, self.port),
            config_path: self.config_file.clone(),
            poll_interval,
            reap_interval: poll_interval,
            snapshot_period: Duration::from_millis(self.snapshot_period_ms.max(1)),
            report_interval: (self.report_interval_secs > 0)
                .then(|| Duration::from_secs(self.report_interval_secs)),
            ..ServerConfig::default()
        }
    }
}
