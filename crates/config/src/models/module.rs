use serde::{Deserialize, Serialize};

use crate::validation::{ConfigValidator, ValidationUtils};

/// The module this dispatcher runs work for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleConfig {
    /// Used as the workload name prefix, so it must be a DNS label.
    pub name: String,
    pub image: String,
    pub sidecar_image: String,
    /// Event types the module may publish on completion.
    pub events_published: Vec<String>,
    /// Workloads running longer than this are removed by reconciliation.
    pub max_running_minutes: u64,
    pub log_level: String,
    pub development: bool,
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            name: "module".to_string(),
            image: String::new(),
            sidecar_image: String::new(),
            events_published: Vec::new(),
            max_running_minutes: 60,
            log_level: "info".to_string(),
            development: false,
        }
    }
}

impl ConfigValidator for ModuleConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        // job names get "-<8>-<6>" appended and Kubernetes caps them at 63
        ValidationUtils::validate_dns_label(&self.name, "module.name", 40)?;
        ValidationUtils::validate_not_empty(&self.image, "module.image")?;
        ValidationUtils::validate_not_empty(&self.sidecar_image, "module.sidecar_image")?;
        for event_type in &self.events_published {
            ValidationUtils::validate_not_empty(event_type, "module.events_published")?;
        }
        ValidationUtils::validate_count(
            self.max_running_minutes,
            "module.max_running_minutes",
            7 * 24 * 60,
        )?;
        ValidationUtils::validate_not_empty(&self.log_level, "module.log_level")?;
        Ok(())
    }
}
