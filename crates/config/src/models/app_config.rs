use std::path::Path;

use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use super::{
    data_plane::DataPlaneConfig,
    dispatcher::DispatcherConfig,
    message_queue::MessageQueueConfig,
    module::ModuleConfig,
    observability::ObservabilityConfig,
    providers::{AzureBatchConfig, KubernetesConfig, ProviderKind},
};
use crate::validation::ConfigValidator;
use crate::{ConfigError, ConfigResult};

pub const DEFAULT_CONFIG_PATHS: [&str; 3] = [
    "config/jobgate.toml",
    "jobgate.toml",
    "/etc/jobgate/config.toml",
];

pub const ENV_PREFIX: &str = "JOBGATE";

/// Process-wide configuration, read once at startup and never mutated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub message_queue: MessageQueueConfig,
    pub module: ModuleConfig,
    pub dispatcher: DispatcherConfig,
    pub data_plane: DataPlaneConfig,
    pub observability: ObservabilityConfig,
    pub kubernetes: Option<KubernetesConfig>,
    pub azure_batch: Option<AzureBatchConfig>,
}

impl AppConfig {
    /// Loads the TOML file (explicit path, or the first default path that
    /// exists) and layers `JOBGATE_*` environment variables on top, e.g.
    /// `JOBGATE_DISPATCHER__RECONCILE_INTERVAL_SECONDS=30`.
    pub fn load(config_path: Option<&str>) -> ConfigResult<Self> {
        let mut builder = ConfigBuilder::builder();

        match config_path {
            Some(path) => {
                if !Path::new(path).exists() {
                    return Err(ConfigError::File(format!("配置文件不存在: {path}")));
                }
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
            None => {
                if let Some(path) = DEFAULT_CONFIG_PATHS
                    .iter()
                    .find(|p| Path::new(p).exists())
                {
                    builder = builder.add_source(File::new(path, FileFormat::Toml));
                }
            }
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(toml_str: &str) -> ConfigResult<Self> {
        let config: AppConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// A present `azure_batch` block selects the Batch backend; everything
    /// else runs on Kubernetes.
    pub fn provider_kind(&self) -> ProviderKind {
        if self.azure_batch.is_some() {
            ProviderKind::AzureBatch
        } else {
            ProviderKind::Kubernetes
        }
    }
}

impl ConfigValidator for AppConfig {
    fn validate(&self) -> ConfigResult<()> {
        self.message_queue.validate()?;
        self.module.validate()?;
        self.dispatcher.validate()?;
        self.data_plane.validate()?;
        self.observability.validate()?;
        if let Some(kubernetes) = &self.kubernetes {
            kubernetes.validate()?;
        }
        if let Some(batch) = &self.azure_batch {
            batch.validate()?;
        }
        if self.dispatcher.orphan_grace_seconds < self.dispatcher.reconcile_interval_seconds {
            return Err(ConfigError::Validation(
                "dispatcher.orphan_grace_seconds must be >= reconcile_interval_seconds".to_string(),
            ));
        }
        Ok(())
    }
}
