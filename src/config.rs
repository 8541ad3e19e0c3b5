//! Harness configuration.
//!
//! Loaded from `asterisk-fixture.toml` when present. Every field has a
//! default, so an empty file (or no file) yields a working configuration:
//!
//! ```toml
//! [network]
//! base_address = "127.0.0.0"
//! hold_port = 29999
//! ami_port = 5038
//! sip_port = 5060
//!
//! [boot]
//! max_attempts = 100
//! delay_ms = 100
//!
//! [shutdown]
//! refdebug_grace_ms = 6400
//!
//! [events]
//! settle_ms = 50
//!
//! [paths]
//! binary = "asterisk"
//! assets = "tests/asterisk-assets"
//! python = "python3"
//! ```

use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::constants;
use crate::process::BootPolicy;

/// Result of configuration validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Non-fatal warnings that should be logged but don't prevent operation.
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// Returns true if there are any warnings.
    #[must_use]
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarnessConfig {
    pub network: NetworkConfig,
    pub boot: BootConfig,
    pub shutdown: ShutdownConfig,
    pub events: EventsConfig,
    pub paths: PathsConfig,
}

/// Address pool and port settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkConfig {
    pub base_address: Ipv4Addr,
    pub hold_port: u16,
    pub ami_port: u16,
    pub sip_port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            base_address: constants::BASE_ADDRESS,
            hold_port: constants::HOLD_PORT,
            ami_port: constants::AMI_PORT,
            sip_port: constants::SIP_PORT,
        }
    }
}

/// Readiness polling.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BootConfig {
    pub max_attempts: u32,
    pub delay_ms: u64,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            max_attempts: constants::BOOT_MAX_ATTEMPTS,
            delay_ms: constants::BOOT_DELAY_MS,
        }
    }
}

/// Shutdown timing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ShutdownConfig {
    pub refdebug_grace_ms: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            refdebug_grace_ms: constants::REFDEBUG_GRACE_MS,
        }
    }
}

/// Event watch timing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EventsConfig {
    pub settle_ms: u64,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            settle_ms: constants::EVENT_SETTLE_MS,
        }
    }
}

/// External programs and asset locations.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
    /// Server binary; bare names are looked up on `PATH`.
    pub binary: PathBuf,
    /// Directory with `documentation/`, `sounds/`, `configs/` and
    /// `scripts/refcounter.py`.
    pub assets: Option<PathBuf>,
    /// Interpreter for the refcounter script.
    pub python: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from(constants::DEFAULT_BINARY),
            assets: None,
            python: PathBuf::from(constants::DEFAULT_PYTHON),
        }
    }
}

impl HarnessConfig {
    /// Load configuration from the specified path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, contains invalid TOML,
    /// or has fields of the wrong type.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: HarnessConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load `path` if it exists, otherwise return defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be loaded.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load_from(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Validate configuration.
    ///
    /// # Errors
    ///
    /// Returns an error listing every fatal problem:
    /// - Base address outside `127.0.0.0/8`
    /// - Zero boot attempts
    /// - Zero AMI or SIP port
    pub fn validate(&self) -> Result<ValidationResult> {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if !self.network.base_address.is_loopback() {
            errors.push(format!(
                "network.base_address {} is not a loopback address (127.0.0.0/8)",
                self.network.base_address
            ));
        }

        if self.network.ami_port == 0 {
            errors.push("network.ami_port cannot be 0".to_string());
        }
        if self.network.sip_port == 0 {
            errors.push("network.sip_port cannot be 0".to_string());
        }
        if self.network.hold_port == 0 {
            warnings.push(
                "network.hold_port is 0; addresses will not be checked against other processes"
                    .to_string(),
            );
        }

        if self.boot.max_attempts == 0 {
            errors.push("boot.max_attempts cannot be 0".to_string());
        }
        if self.boot.delay_ms == 0 {
            warnings.push("boot.delay_ms is 0; readiness polling will spin".to_string());
        }

        if let Some(assets) = &self.paths.assets
            && !assets.is_dir()
        {
            warnings.push(format!(
                "paths.assets does not exist: {}\n  \
                 Documentation, sounds and generic configs will not be installed",
                assets.display()
            ));
        }

        if !errors.is_empty() {
            anyhow::bail!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            );
        }

        Ok(ValidationResult { warnings })
    }

    /// Readiness policy derived from `[boot]`.
    #[must_use]
    pub fn boot_policy(&self) -> BootPolicy {
        BootPolicy {
            max_attempts: self.boot.max_attempts,
            delay: Duration::from_millis(self.boot.delay_ms),
        }
    }

    /// Pre-shutdown delay applied when the refs debug log exists.
    #[must_use]
    pub fn refdebug_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown.refdebug_grace_ms)
    }

    /// Settle delay for event watches.
    #[must_use]
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.events.settle_ms)
    }

    /// Path of the refcounter script, if an asset directory is configured.
    #[must_use]
    pub fn refcounter_script(&self) -> Option<PathBuf> {
        self.paths
            .assets
            .as_ref()
            .map(|assets| assets.join("scripts").join("refcounter.py"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_config() {
        let config: HarnessConfig = toml::from_str("").unwrap();
        assert_eq!(config.network.base_address, Ipv4Addr::new(127, 0, 0, 0));
        assert_eq!(config.network.hold_port, 29999);
        assert_eq!(config.boot.max_attempts, 100);
        assert_eq!(config.refdebug_grace(), Duration::from_millis(6400));
        assert_eq!(config.settle(), Duration::from_millis(50));
        assert!(config.refcounter_script().is_none());
    }

    #[test]
    fn test_parse_partial_config() {
        let toml_str = r#"
[network]
base_address = "127.10.0.0"

[boot]
delay_ms = 20

[paths]
assets = "/opt/assets"
"#;
        let config: HarnessConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.network.base_address, Ipv4Addr::new(127, 10, 0, 0));
        assert_eq!(config.network.ami_port, 5038);
        assert_eq!(
            config.boot_policy(),
            BootPolicy {
                max_attempts: 100,
                delay: Duration::from_millis(20),
            }
        );
        assert_eq!(
            config.refcounter_script(),
            Some(PathBuf::from("/opt/assets/scripts/refcounter.py"))
        );
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result: std::result::Result<HarnessConfig, _> = toml::from_str("[boot]\nretries = 3\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_default() {
        let result = HarnessConfig::default().validate().unwrap();
        assert!(!result.has_warnings());
    }

    #[test]
    fn test_validate_non_loopback_base() {
        let mut config = HarnessConfig::default();
        config.network.base_address = Ipv4Addr::new(10, 0, 0, 0);
        config.boot.max_attempts = 0;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("not a loopback address"));
        assert!(err.contains("max_attempts cannot be 0"));
    }

    #[test]
    fn test_validate_warnings() {
        let mut config = HarnessConfig::default();
        config.network.hold_port = 0;
        config.paths.assets = Some(PathBuf::from("/nonexistent/assets"));
        let result = config.validate().unwrap();
        assert_eq!(result.warnings.len(), 2);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = HarnessConfig::load_or_default("/nonexistent/asterisk-fixture.toml").unwrap();
        assert_eq!(config.boot.max_attempts, 100);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("asterisk-fixture.toml");
        std::fs::write(&path, "[events]\nsettle_ms = 75\n").unwrap();

        let config = HarnessConfig::load_from(&path).unwrap();
        assert_eq!(config.settle(), Duration::from_millis(75));
    }
}
