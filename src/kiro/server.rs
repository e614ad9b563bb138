//! 本地桥接 HTTP 服务
//!
//! 监听固定本地端口，对外暴露 Kiro 扩展网络层会调用的几个端点。
//! 流式端点把上游的 SSE 文本增量逐条重新编码为二进制事件流帧，
//! 边收边发，不缓冲完整响应

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::{Stream, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::BridgeConfig;
use crate::kiro::eventstream;
use crate::kiro::translator::{self, translate_request, MAX_OUTPUT_TOKENS};
use crate::upstream::{FetchError, UpstreamClient, FALLBACK_MODEL_IDS};

/// 启动后的健康检查预算：5 次 × 500ms
const HEALTH_CHECK_ATTEMPTS: u32 = 5;
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_millis(500);

/// 事件流响应的内容类型
const EVENTSTREAM_CONTENT_TYPE: &str = "application/vnd.amazon.eventstream";

#[derive(Clone)]
struct BridgeState {
    upstream: UpstreamClient,
}

/// 正在运行的桥接服务句柄，只有创建它的 Bridge 能停止它
struct BridgeHandle {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// 桥接服务生命周期对象
///
/// 同一时间最多一个实例处于运行状态；重复 start 是无操作成功
pub struct Bridge {
    config: BridgeConfig,
    handle: Option<BridgeHandle>,
}

impl Bridge {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            handle: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|h| !h.task.is_finished())
            .unwrap_or(false)
    }

    /// 启动监听并等健康检查通过
    ///
    /// 已在运行时直接返回现有地址；残留的失效句柄先清理再重启
    pub async fn start(&mut self) -> anyhow::Result<SocketAddr> {
        if let Some(handle) = self.handle.take() {
            if !handle.task.is_finished() {
                let addr = handle.addr;
                self.handle = Some(handle);
                tracing::info!(target: "bridge::server", %addr, "桥接服务已在运行");
                return Ok(addr);
            }
            tracing::warn!(target: "bridge::server", "清理失效的桥接服务句柄");
            let _ = handle.shutdown.send(());
        }

        let listener = TcpListener::bind(("127.0.0.1", self.config.port)).await?;
        let addr = listener.local_addr()?;

        let state = BridgeState {
            upstream: UpstreamClient::new(&self.config.upstream_base_url),
        };
        let app = router(state);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            if let Err(e) = serve.await {
                tracing::error!(target: "bridge::server", error = %e, "桥接服务异常退出");
            }
        });

        // 轮询自身健康端点确认监听就绪
        let health_url = format!("http://{}/health", addr);
        let probe = reqwest::Client::new();
        let mut healthy = false;
        for attempt in 1..=HEALTH_CHECK_ATTEMPTS {
            match probe
                .get(&health_url)
                .timeout(HEALTH_CHECK_INTERVAL)
                .send()
                .await
            {
                Ok(response) if response.status().is_success() => {
                    healthy = true;
                    break;
                }
                _ => {
                    tracing::debug!(target: "bridge::server", attempt, "健康检查未通过，重试");
                    tokio::time::sleep(HEALTH_CHECK_INTERVAL).await;
                }
            }
        }

        if !healthy {
            let _ = shutdown_tx.send(());
            let _ = task.await;
            anyhow::bail!(
                "桥接服务在 {} 次健康检查内未就绪，启动失败",
                HEALTH_CHECK_ATTEMPTS
            );
        }

        tracing::info!(target: "bridge::server", %addr, "✅ 桥接服务已启动");
        self.handle = Some(BridgeHandle {
            addr,
            shutdown: shutdown_tx,
            task,
        });
        Ok(addr)
    }

    /// 优雅停止并等待监听任务退出
    pub async fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.shutdown.send(());
            let _ = handle.task.await;
            tracing::info!(target: "bridge::server", "桥接服务已停止");
        }
    }
}

fn router(state: BridgeState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health).options(preflight))
        .route(
            "/ListAvailableModels",
            get(list_available_models).options(preflight),
        )
        .route("/getUsageLimits", get(get_usage_limits).options(preflight))
        .route(
            "/generateAssistantResponse",
            post(generate_assistant_response).options(preflight),
        )
        .fallback(fallback_handler)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn preflight() -> StatusCode {
    StatusCode::OK
}

async fn get_usage_limits() -> Json<Value> {
    // 用量核算在上游代理侧，这里对 Kiro 的内部记账恒为免费
    Json(json!({ "chatCreditsUsed": 0, "chatCreditsTotal": 999_999 }))
}

async fn fallback_handler(method: Method) -> Response {
    if method == Method::OPTIONS {
        StatusCode::OK.into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

async fn list_available_models(State(state): State<BridgeState>) -> Json<Value> {
    let fetched = state.upstream.fetch_model_ids().await;
    Json(build_model_listing(fetched))
}

/// 组装模型列表响应
///
/// 上游拉取失败时回退到内置列表，该端点被 Kiro 高频轮询，
/// 永远返回 200 而不是把错误透给 IDE
pub(crate) fn build_model_listing(fetched: Result<Vec<String>, FetchError>) -> Value {
    let ids = match fetched {
        Ok(ids) => ids,
        Err(e) => {
            tracing::warn!(target: "bridge::server", error = %e, "获取上游模型列表失败，使用内置列表");
            fallback_ids()
        }
    };

    let mut ids = translator::filter_models(ids);
    if ids.is_empty() {
        ids = translator::filter_models(fallback_ids());
    }

    json!({
        "defaultModel": { "modelId": ids.first() },
        "models": ids.iter().map(|id| model_descriptor(id)).collect::<Vec<_>>(),
        "nextToken": null,
    })
}

fn fallback_ids() -> Vec<String> {
    FALLBACK_MODEL_IDS.iter().map(|s| s.to_string()).collect()
}

fn model_descriptor(id: &str) -> Value {
    json!({
        "modelId": id,
        "modelName": id,
        "description": format!("{} (via local proxy)", id),
        "rateMultiplier": 0,
        "rateUnit": "credit",
        "supportedInputTypes": ["TEXT"],
        "tokenLimits": {
            "maxInputTokens": 200_000,
            "maxOutputTokens": MAX_OUTPUT_TOKENS,
        },
    })
}

async fn generate_assistant_response(
    State(state): State<BridgeState>,
    body: Bytes,
) -> Response {
    let host_request: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            tracing::error!(target: "bridge::server", error = %e, "请求体不是合法 JSON");
            return (StatusCode::INTERNAL_SERVER_ERROR, "invalid request body").into_response();
        }
    };

    let chat_request = translate_request(&host_request);
    tracing::info!(
        target: "bridge::server",
        model = %chat_request.model,
        messages = chat_request.messages.len(),
        "转发会话请求"
    );

    let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(16);
    let upstream = state.upstream.clone();
    tokio::spawn(async move {
        forward_stream(upstream, chat_request, tx).await;
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, EVENTSTREAM_CONTENT_TYPE)
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(ReceiverStream::new(rx)))
        .expect("valid response")
}

enum PumpOutcome {
    /// 上游正常收尾
    Completed,
    /// 上游中断，响应流直接关闭，不再发送任何事件
    UpstreamFailed,
    /// 客户端已断开，放弃转发
    ClientGone,
}

/// 打开上游转发流并泵送到响应通道
///
/// 正常收尾后补发一条计量事件和一条上下文用量事件；
/// 通道关闭（客户端断开）时直接返回，上游响应随之丢弃并中止
async fn forward_stream(
    upstream: UpstreamClient,
    chat_request: translator::ChatRequest,
    tx: mpsc::Sender<Result<Bytes, std::io::Error>>,
) {
    let response = match upstream.open_chat_stream(&chat_request).await {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(target: "bridge::server", error = %e, "上游转发请求失败，关闭事件流");
            return;
        }
    };

    let outcome = pump_sse_stream(Box::pin(response.bytes_stream()), &tx).await;
    match outcome {
        PumpOutcome::Completed => {
            for frame in [
                eventstream::metering_event(eventstream::METERING_USAGE),
                eventstream::context_usage_event(eventstream::CONTEXT_USAGE_PERCENTAGE),
            ] {
                match frame {
                    Ok(frame) => {
                        if tx.send(Ok(Bytes::from(frame))).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(target: "bridge::server", error = %e, "收尾事件编码失败");
                    }
                }
            }
        }
        PumpOutcome::UpstreamFailed => {}
        PumpOutcome::ClientGone => {
            tracing::debug!(target: "bridge::server", "客户端断开，已中止上游转发");
        }
    }
}

/// 把上游的 SSE 字节流翻译成二进制事件帧写入通道
///
/// 单行解析失败静默跳过，整流错误则终止
async fn pump_sse_stream<S, E>(
    mut stream: S,
    tx: &mpsc::Sender<Result<Bytes, std::io::Error>>,
) -> PumpOutcome
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    let mut buffer = String::new();

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::warn!(target: "bridge::server", error = %e, "上游流中断");
                return PumpOutcome::UpstreamFailed;
            }
        };

        buffer.push_str(&String::from_utf8_lossy(&chunk));
        while let Some(newline) = buffer.find('\n') {
            let line: String = buffer.drain(..=newline).collect();
            if !emit_delta_frame(line.trim(), tx).await {
                return PumpOutcome::ClientGone;
            }
        }
    }

    // 流结束时缓冲里可能残留最后一行
    let tail = buffer.trim().to_string();
    if !emit_delta_frame(&tail, tx).await {
        return PumpOutcome::ClientGone;
    }

    PumpOutcome::Completed
}

/// 从单条 SSE 行提取文本增量并编码发送；返回客户端是否仍然在线
async fn emit_delta_frame(line: &str, tx: &mpsc::Sender<Result<Bytes, std::io::Error>>) -> bool {
    let Some(text) = delta_text_from_sse_line(line) else {
        return true;
    };
    let frame = match eventstream::assistant_response_event(&text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(target: "bridge::server", error = %e, "增量事件编码失败，跳过");
            return true;
        }
    };
    tx.send(Ok(Bytes::from(frame))).await.is_ok()
}

/// 解析一条 `data: {...}` 行，提取 content_block_delta 携带的文本
///
/// 非 data 行、JSON 解析失败、其他事件类型一律返回 None
pub(crate) fn delta_text_from_sse_line(line: &str) -> Option<String> {
    let data = line.strip_prefix("data:")?.trim();
    if data.is_empty() {
        return None;
    }
    let event: Value = serde_json::from_str(data).ok()?;
    if event.get("type")?.as_str()? != "content_block_delta" {
        return None;
    }
    let text = event.get("delta")?.get("text")?.as_str()?;
    Some(text.to_string())
}
