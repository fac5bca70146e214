//! Configuration
//!
//! Three inputs, all read once at startup:
//! - positional arguments ([`crate::cli::Args`])
//! - presence-only environment flags ([`EnvFlags`])
//! - an optional TOML settings file ([`Settings`])
//!
//! [`resolve`] checks the arguments, loads the settings file and merges
//! everything into the immutable [`Config`] the rest of the program runs on.
//! Argument errors are reported before the settings file is touched.

use crate::cli::Args;
use crate::exit::Exit;
use crate::usb::SessionOptions;
use anyhow::{Context, Result, anyhow};
use common::{DeviceIdentity, EndpointAddress};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Switches taken from the environment; only presence matters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnvFlags {
    pub verbose: bool,
    pub drain: bool,
    pub hexdump: bool,
}

impl EnvFlags {
    pub const VERBOSE: &'static str = "WITH_DEBUG";
    pub const DRAIN: &'static str = "WITH_DRAIN";
    pub const HEXDUMP: &'static str = "WITH_HEXDUMP";

    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var_os(name).is_some())
    }

    pub fn from_lookup(is_set: impl Fn(&str) -> bool) -> Self {
        Self {
            verbose: is_set(Self::VERBOSE),
            drain: is_set(Self::DRAIN),
            hexdump: is_set(Self::HEXDUMP),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsageError {
    #[error("endpoint addresses must be non-zero")]
    ZeroEndpoint,

    #[error("IN_EP must have bit 7 set (got {0})")]
    ReadEndpointDirection(EndpointAddress),
}

/// Endpoint pair named on the command line, as `(write, read)`
///
/// Neither endpoint may be zero and the read endpoint must be an IN address.
pub fn validate_endpoints(args: &Args) -> Result<(EndpointAddress, EndpointAddress), UsageError> {
    if args.out_endpoint == 0 || args.in_endpoint == 0 {
        return Err(UsageError::ZeroEndpoint);
    }

    let read_endpoint = EndpointAddress(args.in_endpoint);
    if !read_endpoint.is_in() {
        return Err(UsageError::ReadEndpointDirection(read_endpoint));
    }

    Ok((EndpointAddress(args.out_endpoint), read_endpoint))
}

/// Why startup stopped before any device access
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Usage(#[from] UsageError),

    #[error("{0:#}")]
    Settings(anyhow::Error),
}

impl StartupError {
    pub fn exit(&self) -> Exit {
        match self {
            StartupError::Usage(_) => Exit::Usage,
            StartupError::Settings(_) => Exit::Config,
        }
    }
}

/// Validate `args`, then load settings and build the [`Config`]
pub fn resolve(args: &Args, flags: EnvFlags) -> Result<(Settings, Config), StartupError> {
    validate_endpoints(args)?;

    let settings = Settings::load(args.config.clone()).map_err(StartupError::Settings)?;
    let config = Config::new(args, &settings, flags)?;
    Ok((settings, config))
}

/// Settings file contents
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub transfer: TransferSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Base log level when `WITH_DEBUG` is not set
    #[serde(default = "LoggingSettings::default_level")]
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

impl LoggingSettings {
    fn default_level() -> String {
        "warn".to_string()
    }
}

/// Transfer timeouts in milliseconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferSettings {
    #[serde(default = "TransferSettings::default_read_timeout")]
    pub read_timeout_ms: u64,
    #[serde(default = "TransferSettings::default_write_timeout")]
    pub write_timeout_ms: u64,
    #[serde(default = "TransferSettings::default_drain_timeout")]
    pub drain_timeout_ms: u64,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            read_timeout_ms: Self::default_read_timeout(),
            write_timeout_ms: Self::default_write_timeout(),
            drain_timeout_ms: Self::default_drain_timeout(),
        }
    }
}

impl TransferSettings {
    fn default_read_timeout() -> u64 {
        5000
    }

    fn default_write_timeout() -> u64 {
        5000
    }

    fn default_drain_timeout() -> u64 {
        50
    }
}

impl Settings {
    /// Load settings
    ///
    /// An explicit `path` must exist. Without one, the default location is
    /// used if a file is there, otherwise built-in defaults.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => PathBuf::from(shellexpand::tilde(&p.to_string_lossy()).as_ref()),
            None => {
                let default = Self::default_path();
                if !default.exists() {
                    return Ok(Self::default());
                }
                default
            }
        };

        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let settings: Settings = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        settings.validate()?;
        Ok(settings)
    }

    /// Default settings file location
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("usbcat").join("usbcat.toml")
        } else {
            PathBuf::from(".config/usbcat/usbcat.toml")
        }
    }

    fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            ));
        }

        Ok(())
    }

    /// Log level to install, given the environment flags
    pub fn log_level(&self, flags: EnvFlags) -> &str {
        if flags.verbose {
            "debug"
        } else {
            &self.logging.level
        }
    }
}

/// Validated, merged configuration for one invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub identity: DeviceIdentity,
    pub write_endpoint: EndpointAddress,
    pub read_endpoint: EndpointAddress,
    pub hexdump: bool,
    pub session: SessionOptions,
}

impl Config {
    pub fn new(args: &Args, settings: &Settings, flags: EnvFlags) -> Result<Self, UsageError> {
        let (write_endpoint, read_endpoint) = validate_endpoints(args)?;

        let transfer = &settings.transfer;
        let read_timeout_ms = args.in_timeout_ms.unwrap_or(transfer.read_timeout_ms);

        Ok(Self {
            identity: DeviceIdentity::new(args.vendor_id, args.product_id),
            write_endpoint,
            read_endpoint,
            hexdump: flags.hexdump,
            session: SessionOptions {
                drain: flags.drain,
                verbose: flags.verbose,
                drain_timeout: Duration::from_millis(transfer.drain_timeout_ms),
                write_timeout: Duration::from_millis(transfer.write_timeout_ms),
                read_timeout: Duration::from_millis(read_timeout_ms),
            },
        })
    }
}
