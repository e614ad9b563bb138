//! Kiro IDE 安装位置与进程检测（跨平台）

use std::path::PathBuf;

/// 搜索可能的 Kiro 扩展根目录
///
/// Kiro 将扩展安装在用户主目录的 .kiro/extensions 下，
/// 个别发行版会落在系统数据目录的 Kiro/extensions 下
pub fn find_kiro_extension_roots() -> Vec<PathBuf> {
    let mut possible_paths = Vec::new();

    // 用户主目录
    if let Some(home) = dirs::home_dir() {
        possible_paths.push(home.join(".kiro").join("extensions"));
    }

    // 用户数据目录
    if let Some(user_data) = dirs::data_dir() {
        possible_paths.push(user_data.join("Kiro").join("extensions"));
    }

    // 配置目录
    if let Some(config_dir) = dirs::config_dir() {
        possible_paths.push(config_dir.join("Kiro").join("extensions"));
    }

    possible_paths
}

/// 检查 Kiro 是否正在运行
///
/// 补丁会改写正在被 IDE 加载的文件，运行中改写需要重启后才生效
pub fn is_kiro_running() -> bool {
    use sysinfo::System;

    let mut system = System::new();
    system.refresh_processes();

    system
        .processes()
        .values()
        .any(|process| is_kiro_process(process.name()))
}

/// 进程匹配：忽略大小写，允许 .exe 后缀
fn is_kiro_process(name: &str) -> bool {
    let normalized = name
        .trim()
        .to_ascii_lowercase()
        .trim_end_matches(".exe")
        .to_string();
    normalized == "kiro" || normalized.starts_with("kiro ") || normalized.contains("kiro-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_name_matching_ignores_case_and_exe_suffix() {
        assert!(is_kiro_process("Kiro"));
        assert!(is_kiro_process("kiro.exe"));
        assert!(is_kiro_process("Kiro.exe"));
        assert!(is_kiro_process("kiro-helper"));
        assert!(!is_kiro_process("kiroshi"));
        assert!(!is_kiro_process("code"));
    }

    #[test]
    fn extension_roots_live_under_user_directories() {
        let roots = find_kiro_extension_roots();
        assert!(!roots.is_empty());
        assert!(roots
            .iter()
            .all(|p| p.components().count() > 1 && p.ends_with("extensions")));
    }
}
