use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use router_core::AppConfig;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use router::app::{AppMode, Application};
use router::shutdown::ShutdownManager;

/// 感测数据分析任务路由系统
#[derive(Debug, Parser)]
#[command(name = "router", version, about = "感测数据分析任务路由系统")]
struct Cli {
    /// 配置文件路径（缺省时依次探测 config/router.toml、router.toml）
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// 运行模式
    #[arg(short, long, value_enum, default_value_t = Mode::All)]
    mode: Mode,

    /// 工作节点标识，覆盖配置中的 worker.node_id（仅worker相关模式有意义）
    #[arg(long, value_name = "ID")]
    node_id: Option<String>,

    /// 日志级别
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: String,

    /// 日志格式
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// 仅运行HTTP触发面（含派发服务）
    Api,
    /// 仅运行分析工作节点
    Worker,
    /// 运行全部启用的组件
    All,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 日志先于配置初始化，配置加载失败也有日志可查
    init_logging(&cli.log_level, cli.log_format)?;

    info!("启动分析任务路由系统");
    if let Some(path) = &cli.config {
        info!("配置文件: {path}");
    }
    info!("运行模式: {:?}", cli.mode);

    let mut config = AppConfig::load(cli.config.as_deref()).context("加载配置失败")?;

    if let Some(node_id) = cli.node_id {
        info!("覆盖工作节点标识: {node_id}");
        config.worker.node_id = node_id;
    }

    let app_mode = parse_app_mode(cli.mode, &config)?;

    let app = Application::new(config, app_mode).await?;

    let shutdown_manager = ShutdownManager::new();

    let app_handle = {
        let app = Arc::new(app);
        let shutdown_rx = shutdown_manager.subscribe().await;

        tokio::spawn(async move {
            if let Err(e) = app.run(shutdown_rx).await {
                error!("应用运行失败: {e}");
            }
        })
    };

    wait_for_shutdown_signal().await;

    info!("收到关闭信号，开始优雅关闭...");
    shutdown_manager.shutdown().await;

    match tokio::time::timeout(Duration::from_secs(30), app_handle).await {
        Ok(result) => {
            if let Err(e) = result {
                error!("应用关闭时发生错误: {e}");
            } else {
                info!("应用已优雅关闭");
            }
        }
        Err(_) => {
            warn!("应用关闭超时，强制退出");
        }
    }

    info!("分析任务路由系统已退出");
    Ok(())
}

/// 初始化日志系统
fn init_logging(log_level: &str, log_format: LogFormat) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format {
        LogFormat::Json => {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .context("初始化JSON日志格式失败")?;
        }
        LogFormat::Pretty => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init()
                .context("初始化Pretty日志格式失败")?;
        }
    }

    Ok(())
}

/// 解析运行模式，校验相应组件已启用
fn parse_app_mode(mode: Mode, config: &AppConfig) -> Result<AppMode> {
    match mode {
        Mode::Api => {
            if !config.api.enabled {
                return Err(anyhow::anyhow!("API模式被禁用，请检查配置"));
            }
            Ok(AppMode::Api)
        }
        Mode::Worker => {
            if !config.worker.enabled {
                return Err(anyhow::anyhow!("Worker模式被禁用，请检查配置"));
            }
            Ok(AppMode::Worker)
        }
        Mode::All => {
            if !config.api.enabled && !config.worker.enabled {
                return Err(anyhow::anyhow!("所有组件都被禁用，请检查配置"));
            }
            Ok(AppMode::All)
        }
    }
}

/// 等待关闭信号
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("安装Ctrl+C信号处理器失败");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("安装SIGTERM信号处理器失败")
            .recv()
            .await;
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
