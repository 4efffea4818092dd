use std::sync::Arc;

use jobgate_config::{AppConfig, ProviderKind};
use jobgate_core::{DispatcherError, DispatcherResult, Provider};
use jobgate_infrastructure::{AzureBatchBackend, KubernetesBackend};
use tracing::info;

use crate::provider::{AzureBatchProvider, KubernetesProvider, ProviderSettings};

/// A present Azure Batch block wins; otherwise Kubernetes.
pub fn select_provider_kind(config: &AppConfig) -> ProviderKind {
    config.provider_kind()
}

/// Constructs the single provider this process runs with. Every error is
/// fatal to startup.
pub async fn build_provider(config: &AppConfig) -> DispatcherResult<Arc<dyn Provider>> {
    let settings = ProviderSettings::from_config(config);

    match select_provider_kind(config) {
        ProviderKind::AzureBatch => {
            info!("Using Azure Batch provider...");
            let batch = config.azure_batch.as_ref().ok_or_else(|| {
                DispatcherError::ProviderInit("缺少 azure_batch 配置".to_string())
            })?;
            let backend = AzureBatchBackend::connect(batch, &config.module.name).await?;
            Ok(Arc::new(AzureBatchProvider::new(backend, settings)))
        }
        ProviderKind::Kubernetes => {
            info!("Defaulting to Kubernetes provider...");
            let kubernetes = config.kubernetes.clone().unwrap_or_default();
            let backend = KubernetesBackend::connect(&kubernetes, &config.module.name).await?;
            Ok(Arc::new(KubernetesProvider::new(backend, settings)))
        }
    }
}
