use anyhow::Result;
use clap::{Arg, Command};
use jobgate::app::Application;
use jobgate::common::{init_logging, init_metrics, load_config, StartupConfig};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("jobgate")
        .version(env!("CARGO_PKG_VERSION"))
        .about("队列驱动的任务分发器")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径 (默认搜索 config/jobgate.toml, jobgate.toml, /etc/jobgate/config.toml)"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式")
                .value_parser(["json", "pretty"]),
        )
        .get_matches();

    let startup = StartupConfig {
        config_path: matches.get_one::<String>("config").cloned(),
        log_level: matches.get_one::<String>("log-level").cloned(),
        log_format: matches.get_one::<String>("log-format").cloned(),
    };

    let config = load_config(&startup)?;
    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
    )?;
    init_metrics(&config.observability)?;

    info!("启动 jobgate 分发服务");
    if let Some(path) = &startup.config_path {
        info!("配置文件: {path}");
    }

    let app = Application::new(config).await?;
    app.run().await?;

    info!("jobgate 分发服务已退出");
    Ok(())
}
