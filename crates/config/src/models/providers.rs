use std::fmt;

use serde::{Deserialize, Serialize};

use crate::validation::{ConfigValidator, ValidationUtils};
use crate::ConfigError;

/// Which compute backend a dispatcher instance drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Kubernetes,
    AzureBatch,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Kubernetes => f.write_str("kubernetes"),
            ProviderKind::AzureBatch => f.write_str("azure_batch"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KubernetesConfig {
    pub namespace: String,
    pub image_pull_secret: Option<String>,
    pub service_account: Option<String>,
    pub cpu_limit: Option<String>,
    pub memory_limit: Option<String>,
}

impl Default for KubernetesConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            image_pull_secret: None,
            service_account: None,
            cpu_limit: None,
            memory_limit: None,
        }
    }
}

impl ConfigValidator for KubernetesConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_dns_label(&self.namespace, "kubernetes.namespace", 63)?;
        if let Some(secret) = &self.image_pull_secret {
            ValidationUtils::validate_not_empty(secret, "kubernetes.image_pull_secret")?;
        }
        if let Some(account) = &self.service_account {
            ValidationUtils::validate_not_empty(account, "kubernetes.service_account")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AzureBatchConfig {
    /// e.g. `https://<account>.<region>.batch.azure.com`
    pub account_url: String,
    pub pool_id: String,
    pub job_id: String,
    /// Azure AD bearer token for the Batch resource.
    pub access_token: String,
    pub api_version: String,
    pub request_timeout_seconds: u64,
}

impl Default for AzureBatchConfig {
    fn default() -> Self {
        Self {
            account_url: String::new(),
            pool_id: String::new(),
            job_id: "jobgate".to_string(),
            access_token: String::new(),
            api_version: "2024-07-01.20.0".to_string(),
            request_timeout_seconds: 30,
        }
    }
}

impl ConfigValidator for AzureBatchConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_url(&self.account_url, "azure_batch.account_url", &["https", "http"])?;
        ValidationUtils::validate_not_empty(&self.pool_id, "azure_batch.pool_id")?;
        ValidationUtils::validate_not_empty(&self.job_id, "azure_batch.job_id")?;
        let valid_job_id = self.job_id.len() <= 64
            && self
                .job_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid_job_id {
            return Err(ConfigError::Validation(
                "azure_batch.job_id may only contain letters, digits, '-' and '_' (max 64)"
                    .to_string(),
            ));
        }
        ValidationUtils::validate_not_empty(&self.access_token, "azure_batch.access_token")?;
        ValidationUtils::validate_not_empty(&self.api_version, "azure_batch.api_version")?;
        ValidationUtils::validate_timeout_seconds(
            self.request_timeout_seconds,
            "azure_batch.request_timeout_seconds",
        )?;
        Ok(())
    }
}
