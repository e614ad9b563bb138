//! 请求转换模块
//!
//! 把 Kiro 扩展的 generateAssistantResponse 请求压平成上游代理
//! 接受的标准聊天请求，并处理模型 ID 的别名映射与列表过滤

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 未声明模型时的默认目标（思考型 Sonnet）
pub const DEFAULT_MODEL_ID: &str = "claude-sonnet-4-5-thinking";

/// 别名统一映射到的快速模型
pub const FAST_MODEL_ID: &str = "claude-3-5-haiku";

/// 单次响应的输出 token 上限
pub const MAX_OUTPUT_TOKENS: u32 = 8192;

/// 模型列表中需要剔除的废弃系列前缀
const EXCLUDED_FAMILY_PREFIX: &str = "gemini-1.5";

/// 标准聊天请求（上游代理 /v1/messages 的请求体）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub stream: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: MessageContent,
}

/// 消息内容：用户回合是纯文本，助手回合包成单个文本块
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<TextBlock>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    pub text: String,
}

impl TextBlock {
    fn text(text: &str) -> Self {
        Self {
            block_type: "text".to_string(),
            text: text.to_string(),
        }
    }
}

impl ChatMessage {
    fn user(content: &str) -> Self {
        Self {
            role: "user".to_string(),
            content: MessageContent::Text(content.to_string()),
        }
    }

    fn assistant(content: &str) -> Self {
        Self {
            role: "assistant".to_string(),
            content: MessageContent::Blocks(vec![TextBlock::text(content)]),
        }
    }
}

/// 模型 ID 别名映射
///
/// 全函数：任何输入都有输出。未知 ID 原样透传，
/// 空 ID 落到默认模型
pub fn map_model_id(id: &str) -> String {
    match id {
        "" => DEFAULT_MODEL_ID.to_string(),
        "claude-haiku" | "simple-task" => FAST_MODEL_ID.to_string(),
        other => other.to_string(),
    }
}

/// 把 Kiro 请求转换为标准聊天请求
///
/// 依次压平 conversationState.history 中的历史回合，再追加
/// currentMessage 的当前回合。字段缺失或形状异常时按空处理，不会失败
pub fn translate_request(host_request: &Value) -> ChatRequest {
    let conversation = host_request.get("conversationState");

    let mut messages = Vec::new();

    let history = conversation
        .and_then(|c| c.get("history"))
        .and_then(|h| h.as_array());
    for entry in history.into_iter().flatten() {
        if let Some(content) = entry
            .get("userInputMessage")
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
        {
            messages.push(ChatMessage::user(content));
        } else if let Some(content) = entry
            .get("assistantResponseMessage")
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
        {
            if !content.is_empty() {
                messages.push(ChatMessage::assistant(content));
            }
        }
    }

    let current = conversation
        .and_then(|c| c.get("currentMessage"))
        .and_then(|m| m.get("userInputMessage"));
    if let Some(content) = current
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
    {
        messages.push(ChatMessage::user(content));
    }

    let model_id = current
        .and_then(|m| m.get("modelId"))
        .and_then(|m| m.as_str())
        .unwrap_or("");

    ChatRequest {
        model: map_model_id(model_id),
        messages,
        max_tokens: MAX_OUTPUT_TOKENS,
        stream: true,
    }
}

/// 过滤提供给 Kiro 的模型列表
///
/// 剔除图像生成模型和废弃系列，其余原样保留
pub fn filter_models(ids: Vec<String>) -> Vec<String> {
    ids.into_iter()
        .filter(|id| !id.contains("image") && !id.starts_with(EXCLUDED_FAMILY_PREFIX))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn model_mapping_is_total() {
        assert_eq!(map_model_id(""), DEFAULT_MODEL_ID);
        assert_eq!(map_model_id("claude-haiku"), FAST_MODEL_ID);
        assert_eq!(map_model_id("simple-task"), FAST_MODEL_ID);
        assert_eq!(map_model_id("claude-opus-4-1"), "claude-opus-4-1");
        assert_eq!(map_model_id("anything-else"), "anything-else");
    }

    #[test]
    fn history_order_is_preserved_with_current_turn_last() {
        let request = json!({
            "conversationState": {
                "history": [
                    {"userInputMessage": {"content": "第一问"}},
                    {"assistantResponseMessage": {"content": "第一答"}},
                    {"userInputMessage": {"content": "第二问"}},
                ],
                "currentMessage": {
                    "userInputMessage": {"content": "当前问题", "modelId": "claude-haiku"}
                }
            }
        });

        let chat = translate_request(&request);
        assert_eq!(chat.model, FAST_MODEL_ID);
        assert_eq!(chat.max_tokens, MAX_OUTPUT_TOKENS);
        assert!(chat.stream);

        let roles: Vec<&str> = chat.messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["user", "assistant", "user", "user"]);

        match &chat.messages[1].content {
            MessageContent::Blocks(blocks) => {
                assert_eq!(blocks.len(), 1);
                assert_eq!(blocks[0].block_type, "text");
                assert_eq!(blocks[0].text, "第一答");
            }
            MessageContent::Text(_) => panic!("助手回合应是文本块"),
        }
        match &chat.messages[3].content {
            MessageContent::Text(text) => assert_eq!(text, "当前问题"),
            MessageContent::Blocks(_) => panic!("用户回合应是纯文本"),
        }
    }

    #[test]
    fn empty_assistant_turns_are_skipped() {
        let request = json!({
            "conversationState": {
                "history": [
                    {"userInputMessage": {"content": "hi"}},
                    {"assistantResponseMessage": {"content": ""}},
                ],
                "currentMessage": {"userInputMessage": {"content": "again"}}
            }
        });
        let chat = translate_request(&request);
        let roles: Vec<&str> = chat.messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["user", "user"]);
    }

    #[test]
    fn malformed_requests_do_not_panic() {
        for request in [
            json!({}),
            json!({"conversationState": null}),
            json!({"conversationState": {"history": "not-an-array"}}),
            json!({"conversationState": {"currentMessage": {}}}),
            json!(42),
        ] {
            let chat = translate_request(&request);
            assert!(chat.messages.is_empty());
            assert_eq!(chat.model, DEFAULT_MODEL_ID);
        }
    }

    #[test]
    fn filter_drops_exactly_the_documented_classes() {
        let ids = vec![
            "claude-sonnet-4-5".to_string(),
            "gemini-image-preview".to_string(),
            "gemini-1.5-pro".to_string(),
            "claude-3-5-haiku".to_string(),
        ];
        assert_eq!(
            filter_models(ids),
            vec![
                "claude-sonnet-4-5".to_string(),
                "claude-3-5-haiku".to_string()
            ]
        );
    }

    #[test]
    fn chat_request_serializes_in_wire_shape() {
        let request = json!({
            "conversationState": {
                "history": [{"assistantResponseMessage": {"content": "ok"}}],
                "currentMessage": {"userInputMessage": {"content": "ping"}}
            }
        });
        let chat = translate_request(&request);
        let wire = serde_json::to_value(&chat).unwrap();
        assert_eq!(wire["model"], DEFAULT_MODEL_ID);
        assert_eq!(wire["stream"], true);
        assert_eq!(wire["messages"][0]["content"][0]["type"], "text");
        assert_eq!(wire["messages"][1]["content"], "ping");
    }
}
