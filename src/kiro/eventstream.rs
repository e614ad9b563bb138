//! 专有二进制事件流编码
//!
//! Kiro 扩展的网络层使用 AWS 风格的事件流帧格式：
//! 长度前缀 + 头部块 + JSON 载荷，前导与整帧各带一个 CRC32 校验。
//! 桥接服务只向扩展发送消息，因此这里只实现编码方向。
//!
//! 帧布局：
//! `total_len(u32 BE) | header_len(u32 BE) | crc32(前 8 字节) | headers | payload | crc32(之前全部)`

use serde_json::{json, Value};
use thiserror::Error;

/// 头部值类型标记，固定为字符串类型
const HEADER_VALUE_TYPE_STRING: u8 = 7;

/// 前导区长度（两个长度字段 + 前导 CRC）
const PRELUDE_LEN: usize = 12;

/// 尾部 CRC 长度
const TRAILER_LEN: usize = 4;

/// 计量事件固定携带的用量（真实计量在上游代理侧完成）
pub const METERING_USAGE: f64 = 0.001;

/// 上下文用量事件固定上报的百分比
pub const CONTEXT_USAGE_PERCENTAGE: f64 = 50.0;

#[derive(Debug, Error)]
pub enum FrameError {
    /// 头部名称编码为 1 字节长度，超过 255 字节直接拒绝，静默截断会破坏帧结构
    #[error("头部名称超长: {0} 字节（上限 255）")]
    HeaderNameTooLong(usize),
    /// 头部值编码为 2 字节长度，上限 65535 字节
    #[error("头部值超长: {0} 字节（上限 65535）")]
    HeaderValueTooLong(usize),
    #[error("序列化事件载荷失败: {0}")]
    Payload(#[from] serde_json::Error),
}

/// 编码单个字符串头部
///
/// 布局：`name_len(u8) | name | type(u8=7) | value_len(u16 BE) | value`
pub fn encode_header(name: &str, value: &str) -> Result<Vec<u8>, FrameError> {
    let name_bytes = name.as_bytes();
    let value_bytes = value.as_bytes();

    if name_bytes.len() > u8::MAX as usize {
        return Err(FrameError::HeaderNameTooLong(name_bytes.len()));
    }
    if value_bytes.len() > u16::MAX as usize {
        return Err(FrameError::HeaderValueTooLong(value_bytes.len()));
    }

    let mut buf = Vec::with_capacity(1 + name_bytes.len() + 1 + 2 + value_bytes.len());
    buf.push(name_bytes.len() as u8);
    buf.extend_from_slice(name_bytes);
    buf.push(HEADER_VALUE_TYPE_STRING);
    buf.extend_from_slice(&(value_bytes.len() as u16).to_be_bytes());
    buf.extend_from_slice(value_bytes);
    Ok(buf)
}

/// 编码一条完整的事件流消息
///
/// 每条消息固定携带三个头部：事件类型、内容类型、消息类型。
/// 纯函数，相同输入产生字节级一致的输出
pub fn encode_message(event_type: &str, payload: &Value) -> Result<Vec<u8>, FrameError> {
    let mut headers = Vec::new();
    headers.extend(encode_header(":event-type", event_type)?);
    headers.extend(encode_header(":content-type", "application/json")?);
    headers.extend(encode_header(":message-type", "event")?);

    let payload_bytes = serde_json::to_vec(payload)?;

    let total_len = PRELUDE_LEN + headers.len() + payload_bytes.len() + TRAILER_LEN;

    let mut message = Vec::with_capacity(total_len);
    message.extend_from_slice(&(total_len as u32).to_be_bytes());
    message.extend_from_slice(&(headers.len() as u32).to_be_bytes());
    let prelude_crc = crc32fast::hash(&message[..8]);
    message.extend_from_slice(&prelude_crc.to_be_bytes());
    message.extend_from_slice(&headers);
    message.extend_from_slice(&payload_bytes);
    let message_crc = crc32fast::hash(&message);
    message.extend_from_slice(&message_crc.to_be_bytes());
    Ok(message)
}

/// 助手文本增量事件
pub fn assistant_response_event(text: &str) -> Result<Vec<u8>, FrameError> {
    encode_message("assistantResponseEvent", &json!({ "content": text }))
}

/// 计量事件，在流结束时发送一次
pub fn metering_event(usage: f64) -> Result<Vec<u8>, FrameError> {
    encode_message(
        "meteringEvent",
        &json!({
            "unit": "credit",
            "unitPlural": "credits",
            "usage": usage,
        }),
    )
}

/// 上下文窗口用量事件，在流结束时发送一次
pub fn context_usage_event(percentage: f64) -> Result<Vec<u8>, FrameError> {
    encode_message(
        "contextUsageEvent",
        &json!({ "contextUsagePercentage": percentage }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 测试侧的头部解码，验证编码可逆
    fn decode_headers(mut block: &[u8]) -> Vec<(String, String)> {
        let mut headers = Vec::new();
        while !block.is_empty() {
            let name_len = block[0] as usize;
            let name = String::from_utf8(block[1..1 + name_len].to_vec()).unwrap();
            block = &block[1 + name_len..];
            assert_eq!(block[0], HEADER_VALUE_TYPE_STRING);
            let value_len = u16::from_be_bytes([block[1], block[2]]) as usize;
            let value = String::from_utf8(block[3..3 + value_len].to_vec()).unwrap();
            block = &block[3 + value_len..];
            headers.push((name, value));
        }
        headers
    }

    fn read_u32(bytes: &[u8], offset: usize) -> u32 {
        u32::from_be_bytes(bytes[offset..offset + 4].try_into().unwrap())
    }

    #[test]
    fn encoding_is_deterministic() {
        let payload = json!({"content": "你好, Kiro"});
        let first = encode_message("assistantResponseEvent", &payload).unwrap();
        let second = encode_message("assistantResponseEvent", &payload).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn message_lengths_and_checksums_are_consistent() {
        let message = assistant_response_event("streamed chunk").unwrap();

        let total_len = read_u32(&message, 0) as usize;
        let header_len = read_u32(&message, 4) as usize;
        assert_eq!(total_len, message.len());

        let payload_len = total_len - PRELUDE_LEN - header_len - TRAILER_LEN;
        assert_eq!(
            total_len,
            PRELUDE_LEN + header_len + payload_len + TRAILER_LEN
        );

        let prelude_crc = read_u32(&message, 8);
        assert_eq!(prelude_crc, crc32fast::hash(&message[..8]));

        let trailer_crc = read_u32(&message, message.len() - 4);
        assert_eq!(trailer_crc, crc32fast::hash(&message[..message.len() - 4]));
    }

    #[test]
    fn message_carries_three_fixed_headers() {
        let message = encode_message("meteringEvent", &json!({"usage": 1})).unwrap();
        let header_len = read_u32(&message, 4) as usize;
        let headers = decode_headers(&message[PRELUDE_LEN..PRELUDE_LEN + header_len]);
        assert_eq!(
            headers,
            vec![
                (":event-type".to_string(), "meteringEvent".to_string()),
                (
                    ":content-type".to_string(),
                    "application/json".to_string()
                ),
                (":message-type".to_string(), "event".to_string()),
            ]
        );
    }

    #[test]
    fn header_roundtrips_exactly() {
        let encoded = encode_header("x-custom", "值 with spaces").unwrap();
        let headers = decode_headers(&encoded);
        assert_eq!(
            headers,
            vec![("x-custom".to_string(), "值 with spaces".to_string())]
        );
    }

    #[test]
    fn oversized_headers_are_rejected() {
        let long_name = "n".repeat(256);
        assert!(matches!(
            encode_header(&long_name, "v"),
            Err(FrameError::HeaderNameTooLong(256))
        ));

        let long_value = "v".repeat(65_536);
        assert!(matches!(
            encode_header("name", &long_value),
            Err(FrameError::HeaderValueTooLong(65_536))
        ));
    }

    #[test]
    fn payload_survives_framing() {
        let message = assistant_response_event("Hi").unwrap();
        let header_len = read_u32(&message, 4) as usize;
        let payload_start = PRELUDE_LEN + header_len;
        let payload_end = message.len() - TRAILER_LEN;
        let payload: Value =
            serde_json::from_slice(&message[payload_start..payload_end]).unwrap();
        assert_eq!(payload, json!({"content": "Hi"}));
    }

    #[test]
    fn tail_events_carry_fixed_values() {
        let metering = metering_event(METERING_USAGE).unwrap();
        let header_len = read_u32(&metering, 4) as usize;
        let payload: Value = serde_json::from_slice(
            &metering[PRELUDE_LEN + header_len..metering.len() - TRAILER_LEN],
        )
        .unwrap();
        assert_eq!(payload["unit"], "credit");
        assert_eq!(payload["unitPlural"], "credits");
        assert_eq!(payload["usage"], METERING_USAGE);

        let context = context_usage_event(CONTEXT_USAGE_PERCENTAGE).unwrap();
        let header_len = read_u32(&context, 4) as usize;
        let payload: Value = serde_json::from_slice(
            &context[PRELUDE_LEN + header_len..context.len() - TRAILER_LEN],
        )
        .unwrap();
        assert_eq!(payload["contextUsagePercentage"], 50.0);
    }
}
