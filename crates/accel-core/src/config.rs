//! agent.toml configuration parser.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::types::{Family, NamingStyle};

pub const MIN_HEALTH_INTERVAL_SECS: u64 = 1;
pub const MAX_HEALTH_INTERVAL_SECS: u64 = 3600;
pub const DEFAULT_HEALTH_INTERVAL_SECS: u64 = 5;

/// Ledger database file name inside the plugin directory.
pub const LEDGER_FILE_NAME: &str = "preparedClaims.redb";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub node_name: String,
    pub sysfs_root: PathBuf,
    pub devfs_root: PathBuf,
    pub cdi_root: PathBuf,
    /// Defaults to `/var/lib/kubelet/plugins/<driver>`.
    pub plugin_dir: Option<PathBuf>,
    pub naming_style: NamingStyle,
    pub listen: String,
    pub health: HealthSettings,
    pub qat: QatSettings,
    pub gaudi: GaudiSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSettings {
    pub enabled: bool,
    pub interval_secs: u64,
    /// Treat telemetry warnings as healthy and never taint on them.
    pub ignore_warning: bool,
    pub telemetry_path: Option<PathBuf>,
    pub marker_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QatSettings {
    pub allow_reconfiguration: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GaudiSettings {
    pub hook_path: PathBuf,
    pub gaudinet_path: PathBuf,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            node_name: "localhost".to_string(),
            sysfs_root: PathBuf::from("/sys"),
            devfs_root: PathBuf::from("/"),
            cdi_root: PathBuf::from("/etc/cdi"),
            plugin_dir: None,
            naming_style: NamingStyle::Machine,
            listen: "127.0.0.1:9477".to_string(),
            health: HealthSettings::default(),
            qat: QatSettings::default(),
            gaudi: GaudiSettings::default(),
        }
    }
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: DEFAULT_HEALTH_INTERVAL_SECS,
            ignore_warning: false,
            telemetry_path: None,
            marker_dir: None,
        }
    }
}

impl Default for GaudiSettings {
    fn default() -> Self {
        Self {
            hook_path: PathBuf::from("/usr/local/habana/bin/habana-container-hook"),
            gaudinet_path: PathBuf::from("/etc/habanalabs/gaudinet.json"),
        }
    }
}

impl HealthSettings {
    /// Polling interval clamped to the supported range.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(
            self.interval_secs
                .clamp(MIN_HEALTH_INTERVAL_SECS, MAX_HEALTH_INTERVAL_SECS),
        )
    }
}

impl AgentConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: AgentConfig = toml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn plugin_dir(&self, family: Family) -> PathBuf {
        self.plugin_dir.clone().unwrap_or_else(|| {
            PathBuf::from("/var/lib/kubelet/plugins").join(family.driver_name())
        })
    }

    pub fn ledger_path(&self, family: Family) -> PathBuf {
        self.plugin_dir(family).join(LEDGER_FILE_NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_toml() {
        let config = AgentConfig::default();
        let toml_str = config.to_toml_string().unwrap();
        assert!(toml_str.contains("/etc/cdi"));
        let back: AgentConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(back.health.interval_secs, DEFAULT_HEALTH_INTERVAL_SECS);
        assert!(!back.qat.allow_reconfiguration);
    }

    #[test]
    fn parse_partial_file() {
        let toml_str = r#"
node_name = "worker-3"
naming_style = "classic"

[health]
enabled = true
interval_secs = 0
"#;
        let config: AgentConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.node_name, "worker-3");
        assert_eq!(config.naming_style, NamingStyle::Classic);
        assert!(config.health.enabled);
        assert_eq!(config.health.interval(), Duration::from_secs(1));
        assert_eq!(config.sysfs_root, PathBuf::from("/sys"));
    }

    #[test]
    fn interval_upper_bound() {
        let health = HealthSettings {
            interval_secs: 100_000,
            ..Default::default()
        };
        assert_eq!(health.interval(), Duration::from_secs(3600));
    }

    #[test]
    fn plugin_dir_defaults_per_driver() {
        let config = AgentConfig::default();
        assert_eq!(
            config.ledger_path(Family::Qat),
            PathBuf::from("/var/lib/kubelet/plugins/qat.intel.com/preparedClaims.redb")
        );
    }

    #[test]
    fn from_file_reads_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.toml");
        std::fs::write(&path, "node_name = \"n1\"\n[qat]\nallow_reconfiguration = true\n").unwrap();
        let config = AgentConfig::from_file(&path).unwrap();
        assert_eq!(config.node_name, "n1");
        assert!(config.qat.allow_reconfiguration);
    }
}
