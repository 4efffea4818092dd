use jobgate_config::AppConfig;
use jobgate_core::{AccessKeys, SidecarArgs};

/// Builds the arguments every dispatched sidecar receives.
///
/// Pure: called once at startup with the validated configuration and the
/// credentials the queue listener issued, then shared by every dispatch.
/// Optional data-plane endpoints are only included when configured.
pub fn compose_sidecar_args(config: &AppConfig, access_keys: &AccessKeys) -> SidecarArgs {
    let module = &config.module;
    let data_plane = &config.data_plane;

    let mut args = SidecarArgs::new()
        .with("context.name", module.name.as_str())
        .with("serverport", data_plane.sidecar_port.to_string())
        .with("sharedsecret", data_plane.shared_secret.as_str())
        .with("loglevel", module.log_level.as_str())
        .with("development", module.development.to_string())
        .with("valideventtypes", module.events_published.join(","))
        .with("messaging.endpoint", access_keys.endpoint.as_str())
        .with("messaging.queue", access_keys.queue.as_str())
        .with("messaging.keyname", access_keys.key_name.as_str())
        .with("messaging.key", access_keys.key.as_str());

    if !data_plane.blob_account_name.is_empty() {
        args = args
            .with("blob.accountname", data_plane.blob_account_name.as_str())
            .with("blob.accountkey", data_plane.blob_account_key.as_str());
    }

    if !data_plane.document_store_name.is_empty() {
        args = args
            .with("documentstore.name", data_plane.document_store_name.as_str())
            .with("documentstore.password", data_plane.document_store_password.as_str())
            .with("documentstore.collection", data_plane.document_store_collection.as_str())
            .with("documentstore.port", data_plane.document_store_port.to_string());
    }

    args
}
