//! Kiro 扩展补丁模块
//!
//! 定位已安装的 Kiro 智能体扩展文件，把其中内置的上游端点改写为
//! 本地桥接服务地址。改写前保留一次性 .backup 备份以支持还原。
//! 所有写入都先落临时文件再原子重命名，避免写一半留下损坏的扩展

use anyhow::{anyhow, Context, Result};
use regex::Regex;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::BridgeConfig;

/// 扩展内置的上游端点主机特征
const UPSTREAM_HOST_PATTERN: &str = r"https://q\.[a-z0-9-]+\.amazonaws\.com";

/// 带引号的端点赋值特征（改写后保持同样的赋值形状）
const ENDPOINT_ASSIGNMENT_PATTERN: &str =
    r#"endpoint:\s*"https://q\.[a-z0-9-]+\.amazonaws\.com""#;

/// 扩展包目录名前缀，实际目录带版本后缀（如 kiro.kiro-agent-0.2.48）
const EXTENSION_DIR_PREFIX: &str = "kiro.kiro-agent";
const EXTENSION_FILE_NAME: &str = "extension.js";

/// 扩展当前的补丁状态
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchState {
    pub extension_path: Option<String>,
    pub backup_exists: bool,
    pub patched: bool,
}

/// 搜索已安装的 Kiro 扩展文件
///
/// 优先使用用户配置的路径，然后在各扩展根目录下扫描版本化的扩展包
pub fn locate_extension(config: &BridgeConfig) -> Option<PathBuf> {
    if let Some(custom) = &config.custom_extension_path {
        if crate::config::validate_extension_path(custom) {
            return Some(PathBuf::from(custom));
        }
        tracing::warn!("⚠️ 自定义扩展文件路径无效: {}", custom);
    }

    for root in crate::platform::find_kiro_extension_roots() {
        if !root.exists() {
            continue;
        }
        for entry in WalkDir::new(&root).max_depth(3).into_iter().flatten() {
            let path = entry.path();
            let is_extension_file =
                path.is_file() && path.file_name().is_some_and(|n| n == EXTENSION_FILE_NAME);
            if !is_extension_file {
                continue;
            }
            let in_agent_dir = path.ancestors().any(|a| {
                a.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(EXTENSION_DIR_PREFIX))
            });
            if in_agent_dir {
                tracing::info!("✅ 找到 Kiro 扩展文件: {}", path.display());
                return Some(path.to_path_buf());
            }
        }
    }

    tracing::warn!("⚠️ 未能自动检测到 Kiro 扩展文件");
    None
}

/// 汇总补丁状态，供状态展示使用（读取失败按未打补丁处理）
pub fn patch_state(config: &BridgeConfig) -> PatchState {
    match locate_extension(config) {
        Some(path) => {
            let patched = fs::read_to_string(&path)
                .map(|content| is_patched_content(&content, &config.bridge_origin()))
                .unwrap_or(false);
            PatchState {
                backup_exists: backup_path(&path).exists(),
                patched,
                extension_path: Some(path.to_string_lossy().to_string()),
            }
        }
        None => PatchState {
            extension_path: None,
            backup_exists: false,
            patched: false,
        },
    }
}

/// 检查扩展是否已指向本地桥接
pub fn is_patched(config: &BridgeConfig) -> Result<bool> {
    let path = locate_extension(config).ok_or_else(|| anyhow!("未找到 Kiro 扩展文件"))?;
    let content =
        fs::read_to_string(&path).with_context(|| format!("读取扩展文件失败: {}", path.display()))?;
    Ok(is_patched_content(&content, &config.bridge_origin()))
}

/// 补丁判定：包含本地桥接地址，且不再残留上游端点特征
///
/// 两个条件都检查，半途而废的改写或已还原的文件都按未打补丁处理
pub fn is_patched_content(content: &str, bridge_origin: &str) -> bool {
    let host_re = Regex::new(UPSTREAM_HOST_PATTERN).expect("valid endpoint regex");
    content.contains(bridge_origin) && !host_re.is_match(content)
}

/// 定位并改写扩展端点
pub fn patch(config: &BridgeConfig) -> Result<String> {
    let path = locate_extension(config).ok_or_else(|| {
        anyhow!("未找到 Kiro 扩展文件，请确认 Kiro 已安装或在配置中指定扩展路径")
    })?;
    patch_file(&path, &config.bridge_origin())
}

/// 对指定扩展文件执行端点改写
pub fn patch_file(path: &Path, bridge_origin: &str) -> Result<String> {
    // 一次性备份：已有备份绝不覆盖，避免把打过补丁的内容备份进去
    let backup = backup_path(path);
    if !backup.exists() {
        fs::copy(path, &backup)
            .with_context(|| format!("创建扩展备份失败: {}", backup.display()))?;
        tracing::info!("📦 已创建扩展备份: {}", backup.display());
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("读取扩展文件失败: {}", path.display()))?;

    let endpoint_re = Regex::new(ENDPOINT_ASSIGNMENT_PATTERN).expect("valid endpoint regex");
    let host_re = Regex::new(UPSTREAM_HOST_PATTERN).expect("valid endpoint regex");

    let mut updated = content.clone();
    let mut replaced = false;

    if endpoint_re.is_match(&updated) {
        let replacement = format!("endpoint: \"{}\"", bridge_origin);
        updated = endpoint_re
            .replace_all(&updated, replacement.as_str())
            .into_owned();
        replaced = true;
    }
    if host_re.is_match(&updated) {
        updated = host_re.replace_all(&updated, bridge_origin).into_owned();
        replaced = true;
    }

    if !replaced {
        if is_patched_content(&content, bridge_origin) {
            tracing::info!("扩展已处于补丁状态，无需改写");
            return Ok("扩展已处于补丁状态".to_string());
        }
        return Err(anyhow!(
            "未在扩展文件中找到可替换的端点特征: {}",
            path.display()
        ));
    }

    write_atomic(path, updated.as_bytes())?;
    tracing::info!("✅ 扩展端点已改写为 {}", bridge_origin);
    Ok(format!("已将扩展端点改写为 {}", bridge_origin))
}

/// 定位扩展并用备份还原
pub fn restore(config: &BridgeConfig) -> Result<String> {
    let path = locate_extension(config).ok_or_else(|| anyhow!("未找到 Kiro 扩展文件"))?;
    restore_file(&path)?;
    Ok(format!("已从备份还原扩展: {}", path.display()))
}

/// 用 .backup 覆盖回指定扩展文件
pub fn restore_file(path: &Path) -> Result<()> {
    let backup = backup_path(path);
    if !backup.exists() {
        return Err(anyhow!("未找到备份文件: {}", backup.display()));
    }
    let content =
        fs::read(&backup).with_context(|| format!("读取备份文件失败: {}", backup.display()))?;
    write_atomic(path, &content)?;
    tracing::info!("✅ 扩展已从备份还原");
    Ok(())
}

/// 备份文件是扩展文件的同目录兄弟（extension.js.backup）
fn backup_path(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    path.with_file_name(format!("{}.backup", file_name))
}

/// 先写临时文件再重命名，目标文件不会出现写了一半的状态
fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let temp = path.with_file_name(format!("{}.tmp", file_name));
    fs::write(&temp, content).with_context(|| format!("写入临时文件失败: {}", temp.display()))?;
    fs::rename(&temp, path)
        .with_context(|| format!("替换扩展文件失败: {}", path.display()))?;
    Ok(())
}
