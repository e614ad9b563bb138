//! 上游代理客户端
//!
//! 桥接服务只消费上游代理的两个端点：模型列表查询和流式聊天转发。
//! 所有错误在这里显式建模，是否回退到内置列表由调用方决定

use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use crate::kiro::translator::ChatRequest;

/// 上游不可达时使用的内置模型列表
pub const FALLBACK_MODEL_IDS: [&str; 4] = [
    "claude-sonnet-4-5",
    "claude-sonnet-4-5-thinking",
    "claude-opus-4-1",
    "claude-3-5-haiku",
];

/// 模型列表查询的单次超时（该端点被 Kiro 高频轮询，不能长时间阻塞）
const FETCH_TIMEOUT: Duration = Duration::from_millis(4000);

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("请求上游代理失败: {0}")]
    Request(#[from] reqwest::Error),
    #[error("上游代理返回异常状态: {0}")]
    Status(StatusCode),
    #[error("解析上游响应失败: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("上游响应缺少 models 字段")]
    MissingModels,
}

/// 上游代理的 HTTP 客户端句柄
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    client: reqwest::Client,
    base_url: String,
}

impl UpstreamClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// 从上游的账户额度端点拉取当前可用模型 ID 列表
    pub async fn fetch_model_ids(&self) -> Result<Vec<String>, FetchError> {
        let url = format!("{}/account-limits", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("format", "json")])
            .timeout(FETCH_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }

        let bytes = response.bytes().await?;
        let value: Value = serde_json::from_slice(&bytes)?;
        let models = value
            .get("models")
            .and_then(|m| m.as_array())
            .ok_or(FetchError::MissingModels)?;

        Ok(models
            .iter()
            .filter_map(|m| m.as_str())
            .map(|m| m.to_string())
            .collect())
    }

    /// 向上游发起流式聊天请求，返回未消费的响应体供逐块读取
    ///
    /// 转发中不设总超时：生成可能持续数分钟，中断由流本身的错误体现
    pub async fn open_chat_stream(
        &self,
        request: &ChatRequest,
    ) -> Result<reqwest::Response, FetchError> {
        let url = format!("{}/v1/messages", self.base_url);
        let response = self.client.post(&url).json(request).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }
        Ok(response)
    }
}
