//! Test data builders with sensible defaults.

use jobgate_config::{
    AppConfig, AzureBatchConfig, DispatcherConfig, KubernetesConfig, MessageQueueConfig,
    ModuleConfig, RetryPolicyConfig,
};

/// A valid configuration for module `thumbnailer` on the in-memory queue,
/// with fast retry settings.
pub fn test_app_config() -> AppConfig {
    AppConfig {
        message_queue: MessageQueueConfig {
            access_key_name: "dispatch".to_string(),
            access_key: "test-key".to_string(),
            ..MessageQueueConfig::in_memory_default()
        },
        module: ModuleConfig {
            name: "thumbnailer".to_string(),
            image: "registry.local/thumbnailer:1.2".to_string(),
            sidecar_image: "registry.local/sidecar:1.0".to_string(),
            events_published: vec!["thumbnail_created".to_string()],
            ..Default::default()
        },
        dispatcher: DispatcherConfig {
            receive_retry: RetryPolicyConfig {
                base_delay_ms: 10,
                max_delay_ms: 100,
                jitter_factor: 0.0,
                max_consecutive_failures: 3,
                ..Default::default()
            },
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn with_kubernetes(mut config: AppConfig) -> AppConfig {
    config.kubernetes = Some(KubernetesConfig::default());
    config
}

pub fn with_azure_batch(mut config: AppConfig) -> AppConfig {
    config.azure_batch = Some(AzureBatchConfig {
        account_url: "https://acct.westeurope.batch.azure.com".to_string(),
        pool_id: "pool-1".to_string(),
        access_token: "token".to_string(),
        ..Default::default()
    });
    config
}

/// Builder for JSON event payloads.
pub struct EventPayloadBuilder {
    value: serde_json::Value,
}

impl EventPayloadBuilder {
    pub fn new(event_type: &str) -> Self {
        Self {
            value: serde_json::json!({ "eventType": event_type }),
        }
    }

    pub fn with_files(mut self, files: &str) -> Self {
        self.value["files"] = serde_json::Value::String(files.to_string());
        self
    }

    pub fn with_event_id(mut self, event_id: &str) -> Self {
        self.value["context"]["eventId"] = serde_json::Value::String(event_id.to_string());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: &str) -> Self {
        self.value["context"]["correlationId"] =
            serde_json::Value::String(correlation_id.to_string());
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.value.to_string().into_bytes()
    }
}
