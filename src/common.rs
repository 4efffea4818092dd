use std::net::SocketAddr;

use anyhow::{Context, Result};
use jobgate_config::{AppConfig, ObservabilityConfig};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// 通用的应用启动配置
#[derive(Debug, Clone, Default)]
pub struct StartupConfig {
    pub config_path: Option<String>,
    /// Overrides `observability.log_level` when set.
    pub log_level: Option<String>,
    /// Overrides `observability.log_format` when set.
    pub log_format: Option<String>,
}

/// 初始化日志系统
///
/// `RUST_LOG` wins over the configured level.
pub fn init_logging(log_level: &str, log_format: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format {
        "json" => {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .context("初始化JSON日志格式失败")?;
        }
        "pretty" => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init()
                .context("初始化Pretty日志格式失败")?;
        }
        _ => {
            return Err(anyhow::anyhow!("不支持的日志格式: {log_format}"));
        }
    }

    Ok(())
}

/// 加载应用配置，并应用命令行覆盖项
pub fn load_config(startup_config: &StartupConfig) -> Result<AppConfig> {
    let mut config = AppConfig::load(startup_config.config_path.as_deref()).with_context(|| {
        format!(
            "加载配置文件失败: {}",
            startup_config.config_path.as_deref().unwrap_or("<default>")
        )
    })?;

    if let Some(level) = &startup_config.log_level {
        config.observability.log_level = level.clone();
    }
    if let Some(format) = &startup_config.log_format {
        config.observability.log_format = format.clone();
    }

    Ok(config)
}

/// Starts the Prometheus scrape endpoint when an address is configured.
pub fn init_metrics(observability: &ObservabilityConfig) -> Result<()> {
    let Some(address) = &observability.metrics_listen_address else {
        return Ok(());
    };
    let address: SocketAddr = address
        .parse()
        .with_context(|| format!("无效的指标监听地址: {address}"))?;

    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(address)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;
    jobgate_dispatcher::telemetry::describe_metrics();

    info!("Prometheus exporter listening on {}", address);
    Ok(())
}

/// 等待关闭信号
pub async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("安装Ctrl+C信号处理器失败: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("安装SIGTERM信号处理器失败: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到Ctrl+C信号");
        },
        _ = terminate => {
            info!("收到SIGTERM信号");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_cli_overrides_config_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[message_queue]
type = "in_memory"

[module]
name = "thumbnailer"
image = "registry.local/thumbnailer:1.2"
sidecar_image = "registry.local/sidecar:1.0"

[observability]
log_level = "warn"
"#
        )
        .unwrap();

        let startup = StartupConfig {
            config_path: Some(file.path().to_string_lossy().into_owned()),
            log_level: Some("debug".to_string()),
            log_format: None,
        };
        let config = load_config(&startup).unwrap();

        assert_eq!(config.observability.log_level, "debug");
        assert_eq!(config.observability.log_format, "pretty");
        assert_eq!(config.module.name, "thumbnailer");
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        let startup = StartupConfig {
            config_path: Some("/nonexistent/jobgate.toml".to_string()),
            ..Default::default()
        };
        assert!(load_config(&startup).is_err());
    }

    #[test]
    fn test_metrics_disabled_without_address() {
        assert!(init_metrics(&ObservabilityConfig::default()).is_ok());
    }
}
