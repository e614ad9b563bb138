//! Tracing 配置模块
//! 提供统一的结构化日志配置和初始化

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// 初始化日志系统：控制台输出 + 按天滚动的 JSON 文件日志
///
/// 返回的 guard 必须在进程存活期间持有，否则文件日志会丢失缓冲内容
pub fn init() -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = match crate::config::log_directory() {
        Ok(log_dir) => {
            let appender = tracing_appender::rolling::daily(log_dir, "kiro-bridge.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            Some((fmt::layer().json().with_ansi(false).with_writer(writer), guard))
        }
        Err(e) => {
            eprintln!("警告：无法创建日志目录: {}，仅输出到控制台", e);
            None
        }
    };

    match file_layer {
        Some((layer, guard)) => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .with(layer)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .init();
            None
        }
    }
}

/// 记录系统启动信息
pub fn log_system_info() {
    tracing::info!(
        target: "app::startup",
        version = env!("CARGO_PKG_VERSION"),
        "🚀 启动 Kiro Bridge"
    );
    tracing::info!(
        target: "app::startup",
        os = std::env::consts::OS,
        arch = std::env::consts::ARCH,
        "🖥️ 系统信息"
    );
    tracing::info!(
        target: "app::startup",
        "📁 Tracing 日志系统已启用"
    );
}
