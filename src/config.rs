//! Server configuration from command-line arguments or the environment.
//!
//! When `HASHSERVER_DIRECTORY` is set, argv is ignored and every setting is
//! read from `HASHSERVER_*` variables; otherwise clap parses the command
//! line. Either way the result is one validated [`Config`].

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use anyhow::bail;
use clap::Parser;
use clap::ValueEnum;
use rand::Rng;

use crate::checksum::ChecksumAlgorithm;
use crate::layout::Layout;

/// Port used when neither `--port` nor `--port-range` is given.
const DEFAULT_PORT: u16 = 8000;

/// Default lockfile staleness timeout, in seconds.
const DEFAULT_LOCK_TIMEOUT: f64 = 120.0;

/// Environment variable that switches configuration to environment mode.
pub const ENV_DIRECTORY: &str = "HASHSERVER_DIRECTORY";

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "hashserver", version, about = "Content-addressed buffer storage server")]
pub struct Cli {
    /// Directory where buffers are located.
    ///
    /// Buffers have the same file name as their checksum (sha3-256 by
    /// default).
    pub directory: PathBuf,

    /// Allow HTTP PUT requests.
    #[arg(long)]
    pub writable: bool,

    /// Extra directories where read-only buffers are located, separated by
    /// semicolons (;). Read from HASHSERVER_EXTRA_DIRS when not given.
    #[arg(long, value_name = "DIRS")]
    pub extra_dirs: Option<String>,

    /// Directory layout.
    #[arg(long, value_enum, default_value_t)]
    pub layout: Layout,

    /// Seconds before an advisory lockfile is considered stale.
    #[arg(long, value_name = "SECONDS", default_value_t = DEFAULT_LOCK_TIMEOUT)]
    pub lock_timeout: f64,

    /// Hash algorithm used for checksum calculations.
    #[arg(long, value_enum, default_value_t)]
    pub encoding: ChecksumAlgorithm,

    /// Network port.
    #[arg(long, conflicts_with = "port_range")]
    pub port: Option<u16>,

    /// Inclusive port range to select a random free port from.
    #[arg(long, num_args = 2, value_names = ["START", "END"])]
    pub port_range: Option<Vec<u16>>,

    /// Network host.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// JSON file used to report server status.
    #[arg(long, value_name = "PATH")]
    pub status_file: Option<PathBuf>,

    /// Stop the server after this many seconds of inactivity.
    #[arg(long, value_name = "SECONDS")]
    pub timeout: Option<f64>,
}

/// Validated runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Primary buffer directory.
    pub directory: PathBuf,
    /// Whether PUT routes exist.
    pub writable: bool,
    /// Read-only fallback roots, in consultation order.
    pub extra_dirs: Vec<PathBuf>,
    /// Primary directory layout.
    pub layout: Layout,
    /// Lockfile staleness timeout, in seconds.
    pub lock_timeout: f64,
    /// Hash algorithm buffers are named by.
    pub encoding: ChecksumAlgorithm,
    /// Host to bind.
    pub host: String,
    /// Explicit port, when given.
    pub port: Option<u16>,
    /// Inclusive random-port range, when given.
    pub port_range: Option<(u16, u16)>,
    /// Status file for the supervisor handshake.
    pub status_file: Option<PathBuf>,
    /// Inactivity shutdown timeout, in seconds.
    pub timeout: Option<f64>,
}

impl Config {
    /// Loads configuration: environment mode when [`ENV_DIRECTORY`] is set,
    /// argv otherwise.
    pub fn load() -> anyhow::Result<Self> {
        match std::env::var(ENV_DIRECTORY) {
            Ok(directory) => Self::from_env(directory),
            Err(_) => Ok(Self::from_cli(Cli::parse())),
        }
    }

    /// Builds the configuration from parsed command-line arguments.
    pub fn from_cli(cli: Cli) -> Self {
        let extra_dirs = cli
            .extra_dirs
            .or_else(|| std::env::var("HASHSERVER_EXTRA_DIRS").ok())
            .map(|dirs| split_extra_dirs(&dirs))
            .unwrap_or_default();
        let port_range = cli
            .port_range
            .as_deref()
            .map(|range| (range[0], range[1]));
        Self {
            directory: cli.directory,
            writable: cli.writable,
            extra_dirs,
            layout: cli.layout,
            lock_timeout: cli.lock_timeout,
            encoding: cli.encoding,
            host: cli.host,
            port: cli.port,
            port_range,
            status_file: cli.status_file,
            timeout: cli.timeout,
        }
    }

    /// Builds the configuration from `HASHSERVER_*` environment variables.
    fn from_env(directory: String) -> anyhow::Result<Self> {
        let writable = match std::env::var("HASHSERVER_WRITABLE") {
            Ok(value) => match value.to_lowercase().as_str() {
                "true" | "1" => true,
                "false" | "0" | "" => false,
                other => bail!("HASHSERVER_WRITABLE must be true, false, 0 or 1, not '{other}'"),
            },
            Err(_) => false,
        };
        let extra_dirs = std::env::var("HASHSERVER_EXTRA_DIRS")
            .map(|dirs| split_extra_dirs(&dirs))
            .unwrap_or_default();
        let layout = match std::env::var("HASHSERVER_LAYOUT") {
            Ok(value) => parse_value_enum::<Layout>(&value, "HASHSERVER_LAYOUT")?,
            Err(_) => Layout::default(),
        };
        let lock_timeout = match std::env::var("HASHSERVER_LOCK_TIMEOUT") {
            Ok(value) => value
                .parse()
                .with_context(|| format!("HASHSERVER_LOCK_TIMEOUT is not a number: '{value}'"))?,
            Err(_) => DEFAULT_LOCK_TIMEOUT,
        };
        let encoding = match std::env::var("HASHSERVER_ENCODING") {
            Ok(value) => parse_value_enum::<ChecksumAlgorithm>(&value, "HASHSERVER_ENCODING")?,
            Err(_) => ChecksumAlgorithm::default(),
        };
        Ok(Self {
            directory: PathBuf::from(directory),
            writable,
            extra_dirs,
            layout,
            lock_timeout,
            encoding,
            host: String::from("127.0.0.1"),
            port: None,
            port_range: None,
            status_file: None,
            timeout: None,
        })
    }

    /// Validates settings that clap cannot check.
    ///
    /// # Errors
    ///
    /// Fails on a missing or non-directory buffer directory, a writable
    /// vault, a non-positive timeout, a negative lock timeout, or a reversed
    /// port range.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.directory.exists() {
            bail!("Directory '{}' does not exist", self.directory.display());
        }
        if !self.directory.is_dir() {
            bail!("Directory '{}' is not a directory", self.directory.display());
        }
        if self.writable && self.layout == Layout::Vault {
            bail!("--writable cannot be combined with the vault layout");
        }
        if !self.lock_timeout.is_finite() || self.lock_timeout < 0.0 {
            bail!("--lock-timeout must be a non-negative number");
        }
        if let Some(timeout) = self.timeout {
            if !timeout.is_finite() || timeout <= 0.0 {
                bail!("--timeout must be a positive number");
            }
        }
        if let Some((start, end)) = self.port_range {
            if start > end {
                bail!("--port-range START must be less than or equal to END");
            }
        }
        Ok(())
    }

    /// The lockfile staleness timeout as a duration.
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.lock_timeout)
    }

    /// The inactivity shutdown timeout as a duration, when configured.
    pub fn inactivity_timeout(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_secs_f64)
    }

    /// Chooses the port to bind: explicit, a random free one from the range,
    /// or the default.
    pub fn select_port(&self) -> anyhow::Result<u16> {
        match (self.port, self.port_range) {
            (Some(port), _) => Ok(port),
            (None, Some((start, end))) => pick_random_free_port(&self.host, start, end),
            (None, None) => Ok(DEFAULT_PORT),
        }
    }
}

/// Splits a semicolon-separated directory list, dropping empty and
/// quoted-empty tokens.
fn split_extra_dirs(dirs: &str) -> Vec<PathBuf> {
    dirs.split(';')
        .map(str::trim)
        .filter(|token| !token.is_empty() && *token != "\"\"" && *token != "''")
        .map(PathBuf::from)
        .collect()
}

/// Parses a clap `ValueEnum` out of an environment variable.
fn parse_value_enum<T: ValueEnum>(value: &str, variable: &str) -> anyhow::Result<T> {
    T::from_str(value, true).map_err(|_| {
        let options = T::value_variants()
            .iter()
            .filter_map(|variant| variant.to_possible_value())
            .map(|possible| possible.get_name().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        anyhow::anyhow!("{variable} must be one of: {options} (got '{value}')")
    })
}

/// Samples the range without replacement, test-binding each candidate, until
/// a free port is found.
fn pick_random_free_port(host: &str, start: u16, end: u16) -> anyhow::Result<u16> {
    let span = usize::from(end - start) + 1;
    let mut attempted = HashSet::new();
    let mut rng = rand::rng();
    while attempted.len() < span {
        let port = rng.random_range(start..=end);
        if !attempted.insert(port) {
            continue;
        }
        if std::net::TcpListener::bind((host, port)).is_ok() {
            return Ok(port);
        }
    }
    bail!("No free port available in range {start}-{end}")
}
