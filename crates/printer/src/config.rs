//! Printer bridge configuration management

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrinterConfig {
    #[serde(default)]
    pub general: GeneralSettings,
    /// Default printer to connect to
    #[serde(default)]
    pub printer: PrinterSettings,
    #[serde(default)]
    pub transfer: TransferSettings,
    #[serde(default)]
    pub permission: PermissionSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    pub log_level: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Target printer as hex VID/PID strings (e.g. "0x0fe6")
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrinterSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferSettings {
    /// Per-chunk timeout of print jobs in milliseconds
    #[serde(default = "TransferSettings::default_print_timeout")]
    pub print_timeout_ms: u64,
    /// Timeout of raw bulk transfers issued from the CLI, in milliseconds
    #[serde(default = "TransferSettings::default_timeout")]
    pub default_timeout_ms: u32,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            print_timeout_ms: Self::default_print_timeout(),
            default_timeout_ms: Self::default_timeout(),
        }
    }
}

impl TransferSettings {
    fn default_print_timeout() -> u64 {
        100_000
    }

    fn default_timeout() -> u32 {
        1_000
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSettings {
    /// Give up on an unanswered permission prompt after this many seconds
    ///
    /// Unset means wait indefinitely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl PrinterConfig {
    /// Load configuration from file
    ///
    /// Without an explicit path, the user config directory is tried first,
    /// then `/etc/smart-usb/printer.toml`.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/smart-usb/printer.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: PrinterConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::debug!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("smart-usb").join("printer.toml")
        } else {
            PathBuf::from(".config/smart-usb/printer.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.general.log_level,
                valid_levels.join(", ")
            ));
        }

        match (&self.printer.vendor_id, &self.printer.product_id) {
            (Some(vid), Some(pid)) => {
                parse_hex_id(vid, "VID")?;
                parse_hex_id(pid, "PID")?;
            }
            (None, None) => {}
            _ => {
                return Err(anyhow!(
                    "printer.vendor_id and printer.product_id must be set together"
                ));
            }
        }

        if self.transfer.print_timeout_ms == 0 {
            return Err(anyhow!("transfer.print_timeout_ms must be non-zero"));
        }
        if self.transfer.default_timeout_ms == 0 {
            return Err(anyhow!("transfer.default_timeout_ms must be non-zero"));
        }
        if self.permission.timeout_secs == Some(0) {
            return Err(anyhow!("permission.timeout_secs must be non-zero when set"));
        }

        Ok(())
    }

    /// Configured default printer as a VID/PID pair
    pub fn target_ids(&self) -> Result<Option<(u16, u16)>> {
        match (&self.printer.vendor_id, &self.printer.product_id) {
            (Some(vid), Some(pid)) => Ok(Some((parse_hex_id(vid, "VID")?, parse_hex_id(pid, "PID")?))),
            _ => Ok(None),
        }
    }

    pub fn print_timeout(&self) -> Duration {
        Duration::from_millis(self.transfer.print_timeout_ms)
    }

    pub fn permission_timeout(&self) -> Option<Duration> {
        self.permission.timeout_secs.map(Duration::from_secs)
    }
}

/// Parse a hex ID (VID or PID) such as "0x0fe6"
pub fn parse_hex_id(id: &str, name: &str) -> Result<u16> {
    let hex_part = id
        .strip_prefix("0x")
        .or_else(|| id.strip_prefix("0X"))
        .ok_or_else(|| {
            anyhow!(
                "Invalid {} '{}', must start with '0x' (e.g., '0x1234')",
                name,
                id
            )
        })?;

    if hex_part.is_empty() || hex_part.len() > 4 {
        return Err(anyhow!(
            "Invalid {} '{}', hex part must be 1-4 digits",
            name,
            id
        ));
    }

    u16::from_str_radix(hex_part, 16)
        .map_err(|_| anyhow!("Invalid {} '{}', not a valid hex number", name, id))
}

/// Load configuration from a user-supplied path, expanding `~`
pub fn load_config(path: &str) -> Result<PrinterConfig> {
    let path_buf = PathBuf::from(shellexpand::tilde(path).as_ref());
    PrinterConfig::load(Some(path_buf))
}
