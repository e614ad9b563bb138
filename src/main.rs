//! Kiro Bridge 命令行入口

use clap::{Parser, Subcommand};
use serde_json::json;

use kiro_bridge::config::BridgeConfig;
use kiro_bridge::kiro::{patcher, server::Bridge};
use kiro_bridge::platform;
use kiro_bridge::utils::tracing_config;

#[derive(Parser)]
#[command(name = "kiro-bridge", version, about = "Kiro IDE 本地协议桥接服务")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// 启动本地桥接服务
    Serve,
    /// 把 Kiro 扩展的内置端点改写到本地桥接
    Patch,
    /// 从备份还原 Kiro 扩展
    Restore,
    /// 查看配置、补丁状态和桥接健康情况
    Status,
    /// 更新并保存配置
    Config {
        /// 桥接服务监听端口
        #[arg(long)]
        port: Option<u16>,
        /// 上游代理地址
        #[arg(long)]
        upstream_url: Option<String>,
        /// 自定义 Kiro 扩展文件路径
        #[arg(long)]
        extension_path: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _log_guard = tracing_config::init();
    tracing_config::log_system_info();

    let cli = Cli::parse();
    let config = BridgeConfig::load();

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Patch => {
            if platform::is_kiro_running() {
                tracing::warn!("⚠️ Kiro 正在运行，改写的端点需要重启 IDE 后生效");
            }
            let message = patcher::patch(&config)?;
            println!("{}", message);
            Ok(())
        }
        Command::Restore => {
            let message = patcher::restore(&config)?;
            println!("{}", message);
            Ok(())
        }
        Command::Status => status(config).await,
        Command::Config {
            port,
            upstream_url,
            extension_path,
        } => update_config(config, port, upstream_url, extension_path),
    }
}

async fn serve(config: BridgeConfig) -> anyhow::Result<()> {
    let mut bridge = Bridge::new(config);
    let addr = bridge.start().await?;
    tracing::info!(target: "app::startup", %addr, "桥接服务就绪，Ctrl-C 退出");

    tokio::signal::ctrl_c().await?;
    tracing::info!(target: "app::startup", "收到退出信号");
    bridge.stop().await;
    Ok(())
}

async fn status(config: BridgeConfig) -> anyhow::Result<()> {
    let patch_state = patcher::patch_state(&config);
    let bridge_healthy = reqwest::Client::new()
        .get(format!("{}/health", config.bridge_origin()))
        .timeout(std::time::Duration::from_millis(1000))
        .send()
        .await
        .map(|r| r.status().is_success())
        .unwrap_or(false);

    let report = json!({
        "config": {
            "port": config.port,
            "upstreamBaseUrl": config.upstream_base_url,
        },
        "patch": patch_state,
        "kiroRunning": platform::is_kiro_running(),
        "bridgeHealthy": bridge_healthy,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn update_config(
    mut config: BridgeConfig,
    port: Option<u16>,
    upstream_url: Option<String>,
    extension_path: Option<String>,
) -> anyhow::Result<()> {
    if let Some(port) = port {
        config.port = port;
    }
    if let Some(url) = upstream_url {
        config.upstream_base_url = url;
    }
    if let Some(path) = extension_path {
        if !kiro_bridge::config::validate_extension_path(&path) {
            anyhow::bail!("路径无效：文件 '{}' 不存在或不是普通文件", path);
        }
        config.custom_extension_path = Some(path);
    }

    config.save()?;
    println!("配置已更新");
    Ok(())
}
