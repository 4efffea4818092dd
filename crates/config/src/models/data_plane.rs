use serde::{Deserialize, Serialize};

use crate::validation::ConfigValidator;
use crate::ConfigError;

/// Endpoints and secrets the sidecar needs to commit a workload's outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataPlaneConfig {
    pub sidecar_port: u16,
    pub shared_secret: String,
    pub blob_account_name: String,
    pub blob_account_key: String,
    pub document_store_name: String,
    pub document_store_password: String,
    pub document_store_collection: String,
    pub document_store_port: u16,
}

impl Default for DataPlaneConfig {
    fn default() -> Self {
        Self {
            sidecar_port: 8080,
            shared_secret: String::new(),
            blob_account_name: String::new(),
            blob_account_key: String::new(),
            document_store_name: String::new(),
            document_store_password: String::new(),
            document_store_collection: "events".to_string(),
            document_store_port: 10255,
        }
    }
}

impl ConfigValidator for DataPlaneConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        if self.sidecar_port == 0 {
            return Err(ConfigError::Validation(
                "data_plane.sidecar_port cannot be 0".to_string(),
            ));
        }
        if !self.document_store_name.is_empty() && self.document_store_port == 0 {
            return Err(ConfigError::Validation(
                "data_plane.document_store_port cannot be 0".to_string(),
            ));
        }
        Ok(())
    }
}
