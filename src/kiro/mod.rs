//! Kiro IDE 桥接子系统
//!
//! 按数据流向分为四块：二进制事件流编码、请求转换、
//! 本地 HTTP 桥接服务、扩展文件补丁

pub mod eventstream;
pub mod patcher;
pub mod server;
pub mod translator;
