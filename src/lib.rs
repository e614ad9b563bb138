//! Kiro Bridge 核心库
//!
//! 在本地将 Kiro IDE 智能体扩展的专有协议转换为上游代理的标准聊天 API：
//! - `kiro::eventstream` 负责专有二进制事件流的编码
//! - `kiro::translator` 负责请求形状和模型 ID 的转换
//! - `kiro::server` 是面向 Kiro 扩展的本地 HTTP 监听器
//! - `kiro::patcher` 将已安装扩展的内置端点改写到本地桥接服务

pub mod config;
pub mod kiro;
pub mod platform;
pub mod upstream;
pub mod utils;
