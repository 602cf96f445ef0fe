use serde::Deserialize;
use std::path::{Path, PathBuf};
use vertex_gateway::ServerConfig;
use vertex_monitor::{MonitorConfig, WebhookSinkConfig};
use vertex_orchestrator::{AuditConfig, OrchestratorConfig};
use vertex_registry::{CacheConfig, PreloadConfig};

/// Contents of `vertex.toml`. Every section is optional.
#[derive(Debug, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub preload: PreloadConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
}

#[derive(Debug, Default, Deserialize)]
pub struct AlertsConfig {
    #[serde(default)]
    pub webhooks: Vec<WebhookSinkConfig>,
}

impl AppConfig {
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read `path`, or fall back to defaults when the file does not exist.
    /// Relative paths inside the file resolve against its directory.
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let text = match tokio::fs::read_to_string(path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "Config file not found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(anyhow::anyhow!(
                    "Failed to read config file '{}': {e}",
                    path.display()
                ))
            }
        };
        let mut config = Self::parse(&text)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        config.audit.dir = resolve(base, &config.audit.dir);
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        self.orchestrator.validate()?;
        self.monitor.thresholds.validate()?;
        for hook in &self.alerts.webhooks {
            if !hook.url.starts_with("http://") && !hook.url.starts_with("https://") {
                anyhow::bail!("webhook '{}' has a non-HTTP url: {}", hook.name, hook.url);
            }
        }
        Ok(())
    }
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
