use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// PKCS#11 provider settings
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct Pkcs11Config {
    /// Path to the PKCS#11 module that exposes the TPM token
    #[serde(default = "default_module")]
    pub module: PathBuf,
    /// Slot id; the first slot with a token present when unset
    #[serde(default)]
    pub slot: Option<u64>,
    /// Label written to the token when it is cleared
    #[serde(default = "default_token_label")]
    pub token_label: String,
}

fn default_module() -> PathBuf {
    PathBuf::from("/usr/lib/opencryptoki/libopencryptoki.so")
}

fn default_token_label() -> String {
    "IBM PKCS#11 TPM Token".to_string()
}

impl Default for Pkcs11Config {
    fn default() -> Self {
        Self {
            module: default_module(),
            slot: None,
            token_label: default_token_label(),
        }
    }
}

/// Verbosity of operator-facing log output.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    None,
    Error,
    #[default]
    Info,
    Debug,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`.
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::None => "off",
            LogLevel::Error => "error",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(LogLevel::None),
            "error" => Ok(LogLevel::Error),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            other => Err(format!(
                "invalid log level '{}'; valid levels are: none, error, info, debug",
                other
            )),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::None => "none",
            LogLevel::Error => "error",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        };
        f.write_str(name)
    }
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct LogConfig {
    #[serde(default)]
    pub level: LogLevel,
}

/// PIN entry policy
#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct PinPolicy {
    /// Rejected new PINs tolerated before giving up; unlimited when unset
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

/// Root tool configuration
#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct ToolConfig {
    #[serde(default)]
    pub pkcs11: Pkcs11Config,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub pin: PinPolicy,
}

impl ToolConfig {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        // Per-user config, e.g. ~/.config/tpmtools/config.toml
        if let Some(dir) = dirs::config_dir() {
            builder = builder.add_source(File::from(dir.join("tpmtools").join("config")).required(false));
        }

        let config = builder
            // Override with a config file in the working directory
            .add_source(File::with_name("tpmtools").required(false))
            // Override with environment variables (prefix: TPMTOOLS_)
            // e.g., TPMTOOLS_PKCS11__MODULE, TPMTOOLS_PIN__MAX_ATTEMPTS
            .add_source(environment())
            .build()?;

        config.try_deserialize()
    }
}

/// `TPMTOOLS_` prefix, `__` between nested keys.
fn environment() -> Environment {
    Environment::with_prefix("TPMTOOLS")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}
