//! rootsize.toml configuration parser.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::VolumeSizingRule;

/// Where `rootsize run` looks for its config when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/rootsize/rootsize.toml";

const EMBEDDED_RULES: &str = include_str!("default_rules.toml");

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RootsizeConfig {
    /// Device node of the root EBS volume.
    pub root_device: String,
    /// Mount point of the root filesystem.
    pub root_mount: PathBuf,
    /// Root of the sysfs tree used for block-device discovery.
    pub sysfs_root: PathBuf,
    pub metadata: MetadataConfig,
    pub resize: ResizeConfig,
    pub log: LogConfig,
    pub rules: Vec<VolumeSizingRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    /// Instance metadata service base URL (plain HTTP).
    pub endpoint: String,
    /// Total attempts per metadata read, including the first.
    pub attempts: u32,
    #[serde(with = "duration_str")]
    pub initial_backoff: Duration,
    #[serde(with = "duration_str")]
    pub max_backoff: Duration,
    #[serde(with = "duration_str")]
    pub request_timeout: Duration,
    /// IMDSv2 session token lifetime in seconds.
    pub token_ttl_secs: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResizeConfig {
    #[serde(with = "duration_str")]
    pub poll_initial: Duration,
    #[serde(with = "duration_str")]
    pub poll_max: Duration,
    /// Deadline for the whole run, metadata reads included.
    #[serde(with = "duration_str")]
    pub timeout: Duration,
    /// AWS CLI binary used for volume calls.
    pub aws_cli: String,
    pub region: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Append each run's outcome record as a JSON line to this file.
    pub record_path: Option<PathBuf>,
}

impl Default for RootsizeConfig {
    fn default() -> Self {
        Self {
            root_device: "/dev/nvme0n1".to_string(),
            root_mount: PathBuf::from("/"),
            sysfs_root: PathBuf::from("/sys"),
            metadata: MetadataConfig::default(),
            resize: ResizeConfig::default(),
            log: LogConfig::default(),
            rules: Vec::new(),
        }
    }
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://169.254.169.254".to_string(),
            attempts: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(10),
            request_timeout: Duration::from_secs(2),
            token_ttl_secs: 21600,
        }
    }
}

impl Default for ResizeConfig {
    fn default() -> Self {
        Self {
            poll_initial: Duration::from_secs(2),
            poll_max: Duration::from_secs(30),
            timeout: Duration::from_secs(300),
            aws_cli: "aws".to_string(),
            region: None,
        }
    }
}

impl RootsizeConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: RootsizeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load an explicitly named file, or the default path if it exists,
    /// or fall back to built-in defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_PATH);
                if default_path.is_file() {
                    Self::from_file(default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// The configured rule rows, or the built-in table if none are configured.
    pub fn effective_rules(&self) -> Result<Vec<VolumeSizingRule>, ConfigError> {
        if self.rules.is_empty() {
            embedded_rules()
        } else {
            Ok(self.rules.clone())
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.root_device.starts_with("/dev/") {
            return Err(ConfigError::Invalid {
                field: "root_device",
                reason: format!("{:?} is not a /dev path", self.root_device),
            });
        }
        if !self.metadata.endpoint.starts_with("http://") {
            return Err(ConfigError::Invalid {
                field: "metadata.endpoint",
                reason: format!("{:?} must be an http:// URL", self.metadata.endpoint),
            });
        }
        if self.metadata.attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "metadata.attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.resize.poll_initial.is_zero() {
            return Err(ConfigError::Invalid {
                field: "resize.poll_initial",
                reason: "must be non-zero".to_string(),
            });
        }
        if self.resize.timeout.is_zero() {
            return Err(ConfigError::Invalid {
                field: "resize.timeout",
                reason: "must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct RuleFile {
    rules: Vec<VolumeSizingRule>,
}

/// The sizing table compiled into the binary.
pub fn embedded_rules() -> Result<Vec<VolumeSizingRule>, ConfigError> {
    let file: RuleFile = toml::from_str(EMBEDDED_RULES)?;
    Ok(file.rules)
}

/// Parse `"500ms"`, `"5s"`, `"2m"` or `"1h"`. A bare number is seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    let (digits, unit) = s.split_at(s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len()));
    let value: u64 = digits.parse().ok()?;
    let unit_ms = match unit.trim() {
        "ms" => 1,
        "" | "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        _ => return None,
    };
    value.checked_mul(unit_ms).map(Duration::from_millis)
}

fn format_duration(d: Duration) -> String {
    let ms = d.as_millis();
    if ms % 60_000 == 0 && ms > 0 {
        format!("{}m", ms / 60_000)
    } else if ms % 1000 == 0 {
        format!("{}s", ms / 1000)
    } else {
        format!("{ms}ms")
    }
}

mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_duration(&raw)
            .ok_or_else(|| D::Error::custom(format!("invalid duration {raw:?}")))
    }
}
