use serde::Deserialize;
use std::path::{Path, PathBuf};
use switchyard_llm::ModelConfig;
use switchyard_orchestrator::{BusConfig, GovernanceConfig};

/// Contents of `switchyard.toml`.
#[derive(Debug, Deserialize)]
pub struct SwitchyardConfig {
    /// Where the file store keeps its records.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Absent means plans come from the configured routes only.
    #[serde(default)]
    pub model: Option<ModelConfig>,
    /// Thresholds, contracts and routes.
    #[serde(default)]
    pub governance: GovernanceConfig,
    /// Bus timing.
    #[serde(default)]
    pub bus: BusConfig,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

impl Default for SwitchyardConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            model: None,
            governance: GovernanceConfig::default(),
            bus: BusConfig::default(),
        }
    }
}

impl SwitchyardConfig {
    /// Parse TOML text.
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Read the config file. A missing file yields the defaults; a relative
    /// `data_dir` is resolved against the file's directory.
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = match tokio::fs::read_to_string(path).await {
            Ok(raw) => Self::parse(&raw).map_err(|e| {
                anyhow::anyhow!("Failed to parse config file '{}': {e}", path.display())
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => {
                return Err(anyhow::anyhow!(
                    "Failed to read config file '{}': {e}",
                    path.display()
                ))
            }
        };

        if config.data_dir.is_relative() {
            let base = path.parent().unwrap_or_else(|| Path::new("."));
            config.data_dir = base.join(&config.data_dir);
        }
        Ok(config)
    }
}
