//! 桥接服务配置管理模块
//! 负责保存和读取桥接端口、上游代理地址以及用户自定义的扩展文件路径

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// 桥接服务默认监听端口（与上游代理端口区分开）
pub const DEFAULT_BRIDGE_PORT: u16 = 9980;

/// 上游代理默认地址
pub const DEFAULT_UPSTREAM_BASE_URL: &str = "http://127.0.0.1:8080";

/// 桥接服务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// 本地桥接服务监听端口
    #[serde(default = "default_port")]
    pub port: u16,
    /// 上游代理的根地址
    #[serde(default = "default_upstream_base_url")]
    pub upstream_base_url: String,
    /// 用户自定义的 Kiro 扩展文件路径（优先于自动检测）
    #[serde(default)]
    pub custom_extension_path: Option<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_BRIDGE_PORT,
            upstream_base_url: DEFAULT_UPSTREAM_BASE_URL.to_string(),
            custom_extension_path: None,
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_BRIDGE_PORT
}

fn default_upstream_base_url() -> String {
    DEFAULT_UPSTREAM_BASE_URL.to_string()
}

impl BridgeConfig {
    /// 桥接服务对外的本地源地址（写入扩展文件的替换目标）
    pub fn bridge_origin(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// 读取配置文件，不存在或损坏时回退到默认值
    pub fn load() -> Self {
        let config_file = match config_file_path() {
            Ok(path) => path,
            Err(e) => {
                tracing::warn!("无法确定配置文件路径: {}，使用默认配置", e);
                return Self::default();
            }
        };

        if !config_file.exists() {
            return Self::default();
        }

        match fs::read_to_string(&config_file) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("解析配置文件失败: {}，使用默认配置", e);
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("读取配置文件失败: {}，使用默认配置", e);
                Self::default()
            }
        }
    }

    /// 保存配置到文件
    pub fn save(&self) -> anyhow::Result<()> {
        let config_file = config_file_path()?;
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&config_file, json)?;
        tracing::info!("✅ 配置已保存: {}", config_file.display());
        Ok(())
    }
}

/// 获取应用主配置目录
/// 配置和日志统一存放在系统配置目录的 .kiro-bridge 下
pub fn config_directory() -> anyhow::Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| anyhow::anyhow!("无法获取系统配置目录"))?
        .join(".kiro-bridge");

    // 确保目录存在
    fs::create_dir_all(&config_dir)?;

    Ok(config_dir)
}

/// 获取日志目录路径
pub fn log_directory() -> anyhow::Result<PathBuf> {
    Ok(config_directory()?.join("logs"))
}

/// 获取配置文件路径
fn config_file_path() -> anyhow::Result<PathBuf> {
    Ok(config_directory()?.join("config.json"))
}

/// 验证扩展文件路径是否有效
pub fn validate_extension_path(path: &str) -> bool {
    let path_buf = PathBuf::from(path);
    path_buf.exists() && path_buf.is_file()
}
