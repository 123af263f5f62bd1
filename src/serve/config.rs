//! Server configuration: defaults, `KEY = VALUE` files and command-line flags
//!
//! Resolution order:
//! 1. built-in defaults
//! 2. the file given with `--config`, if any
//! 3. command-line flags (override file values)
//! 4. while no directory is known, the system-wide files in `SYSTEM_CONFIG_PATHS`

use clap::Parser;
use serde::Serialize;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const DEFAULT_PORT: u16 = 80;
pub const DEFAULT_MAX_CONNECTIONS: usize = 128;
/// Upper bound for `max_connections` (Linux `SOMAXCONN`)
pub const MAX_CONNECTIONS_LIMIT: usize = 4096;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5000;

pub const SYSTEM_CONFIG_PATHS: &[&str] = &[
    "/usr/local/etc/generated-at.conf",
    "/etc/generated-at.conf",
];

/// Serve the generated-at page (and anything else under a directory) over HTTP/1.0
#[derive(Parser, Debug, Default, Clone)]
#[command(name = "generated-at-serve", version)]
pub struct Args {
    /// Configuration file (KEY = VALUE lines)
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Directory to serve
    #[arg(short, long)]
    pub directory: Option<PathBuf>,
    /// IPv4 address to bind
    #[arg(short, long)]
    pub origin: Option<Ipv4Addr>,
    /// TCP port
    #[arg(short, long)]
    pub port: Option<u16>,
    /// Connections served concurrently (also the listen backlog)
    #[arg(short, long)]
    pub max_connections: Option<usize>,
    /// Milliseconds to wait for a request head; 0 waits forever
    #[arg(short = 't', long)]
    pub request_timeout: Option<u64>,
    /// Print the effective configuration as JSON and exit
    #[arg(long)]
    pub print_config: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{}:{line}: malformed line '{text}'", .path.display())]
    Malformed {
        path: PathBuf,
        line: usize,
        text: String,
    },
    #[error("{}:{line}: invalid value '{value}' for {key}", .path.display())]
    InvalidValue {
        path: PathBuf,
        line: usize,
        key: String,
        value: String,
    },
    #[error("no directory configured; pass --directory or set VROOT in one of: {tried}")]
    MissingDirectory { tried: String },
    #[error("{} is not a directory", .0.display())]
    NotADirectory(PathBuf),
    #[error("max connections must be between 1 and {limit}, got {got}")]
    MaxConnections { got: usize, limit: usize },
}

/// Effective server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServeConfig {
    pub origin: Ipv4Addr,
    pub port: u16,
    pub directory: PathBuf,
    pub max_connections: usize,
    pub request_timeout_ms: u64,
}

/// Configuration under construction; `directory` may still be unknown
#[derive(Debug, Clone, PartialEq, Eq)]
struct Draft {
    origin: Ipv4Addr,
    port: u16,
    directory: Option<PathBuf>,
    max_connections: usize,
    request_timeout_ms: u64,
}

impl Default for Draft {
    fn default() -> Self {
        Self {
            origin: Ipv4Addr::UNSPECIFIED,
            port: DEFAULT_PORT,
            directory: None,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }
}

impl Draft {
    fn apply_args(&mut self, args: &Args) {
        if let Some(origin) = args.origin {
            self.origin = origin;
        }
        if let Some(port) = args.port {
            self.port = port;
        }
        if let Some(dir) = &args.directory {
            self.directory = Some(dir.clone());
        }
        if let Some(max) = args.max_connections {
            self.max_connections = max;
        }
        if let Some(timeout) = args.request_timeout {
            self.request_timeout_ms = timeout;
        }
    }

    /// Apply a file's contents; `path` is only used in error messages
    fn apply_file(&mut self, path: &Path, contents: &str) -> Result<(), ConfigError> {
        for (idx, raw) in contents.lines().enumerate() {
            let line = idx + 1;
            let Some((key, value)) = parse_line(raw).ok_or_else(|| ConfigError::Malformed {
                path: path.to_path_buf(),
                line,
                text: raw.to_string(),
            })?
            else {
                continue;
            };

            let invalid = || ConfigError::InvalidValue {
                path: path.to_path_buf(),
                line,
                key: key.to_string(),
                value: value.to_string(),
            };

            match key {
                "ALLOW" => self.origin = value.parse().map_err(|_| invalid())?,
                "PORT" => self.port = value.parse().map_err(|_| invalid())?,
                "VROOT" => self.directory = Some(PathBuf::from(value)),
                "MAX_CONNECTION" => self.max_connections = value.parse().map_err(|_| invalid())?,
                "REQUEST_TIMEOUT" => {
                    self.request_timeout_ms = value.parse().map_err(|_| invalid())?
                }
                _ => warn!(path = %path.display(), line, key, "Unknown configuration key"),
            }
        }
        Ok(())
    }

    fn finish(self, tried: &[&Path]) -> Result<ServeConfig, ConfigError> {
        let directory = self.directory.ok_or_else(|| ConfigError::MissingDirectory {
            tried: tried
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
        })?;
        if !directory.is_dir() {
            return Err(ConfigError::NotADirectory(directory));
        }
        if !(1..=MAX_CONNECTIONS_LIMIT).contains(&self.max_connections) {
            return Err(ConfigError::MaxConnections {
                got: self.max_connections,
                limit: MAX_CONNECTIONS_LIMIT,
            });
        }
        Ok(ServeConfig {
            origin: self.origin,
            port: self.port,
            directory,
            max_connections: self.max_connections,
            request_timeout_ms: self.request_timeout_ms,
        })
    }
}

/// Split one config line
///
/// `Some(None)` for blank and comment lines, `None` for malformed ones.
fn parse_line(raw: &str) -> Option<Option<(&str, &str)>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Some(None);
    }
    let (key, value) = trimmed.split_once('=')?;
    let (key, value) = (key.trim_end(), value.trim_start());

    let mut chars = key.chars();
    let key_ok = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphabetic() || c == '_');
    let value_ok = !value.is_empty() && !value.contains(|c: char| c == '=' || c.is_whitespace());

    (key_ok && value_ok).then_some(Some((key, value)))
}

/// Read a config file into `draft`; `Ok(false)` when the file does not exist
fn load_file(draft: &mut Draft, path: &Path) -> Result<bool, ConfigError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    draft.apply_file(path, &contents)?;
    Ok(true)
}

/// Resolve the effective configuration using the system-wide fallback files
pub fn load(args: &Args) -> Result<ServeConfig, ConfigError> {
    let fallbacks: Vec<&Path> = SYSTEM_CONFIG_PATHS.iter().map(Path::new).collect();
    load_with_fallbacks(args, &fallbacks)
}

/// Resolve the effective configuration, consulting `fallbacks` in order while
/// no directory is known
pub fn load_with_fallbacks(args: &Args, fallbacks: &[&Path]) -> Result<ServeConfig, ConfigError> {
    let mut draft = Draft::default();

    if let Some(path) = &args.config {
        // An explicitly named file must exist
        if !load_file(&mut draft, path)? {
            return Err(ConfigError::Read {
                path: path.clone(),
                source: std::io::ErrorKind::NotFound.into(),
            });
        }
        info!(path = %path.display(), "Configuration loaded");
    }

    draft.apply_args(args);

    for path in fallbacks {
        if draft.directory.is_some() {
            break;
        }
        if load_file(&mut draft, path)? {
            info!(path = %path.display(), "Configuration loaded");
        } else {
            debug!(path = %path.display(), "No configuration file");
        }
    }

    draft.finish(fallbacks)
}
