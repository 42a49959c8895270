//! End-to-end tests: a real server on an ephemeral port, driven by the
//! client over actual sockets.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use duplexmcp_client::{Client, ClientError, ClientResult, SamplingHandler};
use duplexmcp_protocol::types::{
    CallToolResult, ContentBlock, CreateMessageRequest, CreateMessageResult, LoggingLevel, Role,
    Tool,
};
use duplexmcp_server::{tool_fn, McpServer, ServerError};
use duplexmcp_transport::{SessionStore, StreamableConfig};

struct EchoSampling;

#[async_trait]
impl SamplingHandler for EchoSampling {
    async fn create_message(
        &self,
        request: CreateMessageRequest,
    ) -> ClientResult<CreateMessageResult> {
        let prompt = request
            .messages
            .first()
            .and_then(|m| m.content.as_text())
            .unwrap_or("")
            .to_string();
        Ok(CreateMessageResult {
            model: "echo-1".into(),
            role: Role::Assistant,
            content: ContentBlock::text(format!("echo: {prompt}")),
            stop_reason: Some("endTurn".into()),
        })
    }
}

fn build_server(config: StreamableConfig) -> McpServer {
    McpServer::builder("e2e-server", "0.1.0")
        .config(config)
        .tool(
            Tool::new("greet").with_description("Say hello"),
            tool_fn(|args, _ctx| async move {
                let name = args
                    .as_ref()
                    .and_then(|a| a.get("name"))
                    .and_then(Value::as_str)
                    .unwrap_or("world")
                    .to_string();
                Ok(CallToolResult::text(format!("Hello, {name}!")))
            }),
        )
        .tool(
            Tool::new("delayedResponse"),
            tool_fn(|args, ctx| async move {
                let steps = args
                    .as_ref()
                    .and_then(|a| a.get("steps"))
                    .and_then(Value::as_u64)
                    .unwrap_or(3);
                let delay = args
                    .as_ref()
                    .and_then(|a| a.get("delayMs"))
                    .and_then(Value::as_u64)
                    .unwrap_or(10);
                for step in 1..=steps {
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    let progress = (step as f64 / steps as f64) * 100.0;
                    ctx.log_message(
                        LoggingLevel::Info,
                        Some("delayedResponse"),
                        json!({"progress": progress}),
                    )
                    .map_err(|e| ServerError::handler(e.to_string()))?;
                }
                Ok(CallToolResult::text(format!("completed {steps} steps")))
            }),
        )
        .tool(
            Tool::new("consult"),
            tool_fn(|args, ctx| async move {
                let question = args
                    .as_ref()
                    .and_then(|a| a.get("question"))
                    .and_then(Value::as_str)
                    .unwrap_or("?")
                    .to_string();
                let reply = ctx
                    .create_message(CreateMessageRequest::from_text(question))
                    .await?;
                let text = reply.content.as_text().unwrap_or("").to_string();
                Ok(CallToolResult {
                    content: vec![ContentBlock::text(text)],
                    is_error: None,
                    structured_content: Some(json!({"model": reply.model})),
                })
            }),
        )
        .build()
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_test_writer()
        .try_init();
}

/// Boot a server on an ephemeral port; returns its base URL and store.
async fn spawn_server(config: StreamableConfig) -> (String, Arc<SessionStore>) {
    init_tracing();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let streamable = build_server(config).streamable();
    let store = Arc::clone(streamable.store());
    tokio::spawn(async move {
        streamable.serve_with_listener(listener).await.unwrap();
    });
    (format!("http://{addr}"), store)
}

async fn spawn_default_server() -> (String, Arc<SessionStore>) {
    spawn_server(StreamableConfig::default()).await
}

#[tokio::test]
async fn test_handshake_assigns_session_and_negotiates_version() {
    let (base_url, _store) = spawn_default_server().await;
    let client = Client::builder(&base_url).build().unwrap();

    let result = client.initialize().await.unwrap();
    assert_eq!(result.server_info.name, "e2e-server");
    assert_eq!(result.protocol_version, "2025-03-26");
    assert!(client.session_id().unwrap().starts_with("mcp-"));

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_tool_call_with_json_response() {
    // SSE disabled server-side: the JSON fallback path carries the call
    let config = StreamableConfig::builder().enable_post_sse(false).build();
    let (base_url, _store) = spawn_server(config).await;
    let client = Client::builder(&base_url).build().unwrap();
    client.initialize().await.unwrap();

    let mut args = HashMap::new();
    args.insert("name".to_string(), json!("Ada"));
    let result = client.call_tool("greet", Some(args)).await.unwrap();
    assert_eq!(result.content[0].as_text(), Some("Hello, Ada!"));

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_tool_call_with_streamed_progress() {
    let (base_url, _store) = spawn_default_server().await;
    let progress = Arc::new(Mutex::new(Vec::<f64>::new()));
    let seen = Arc::clone(&progress);
    let client = Client::builder(&base_url)
        .on_notification(move |notification| {
            if notification.method == "notifications/message" {
                if let Some(value) = notification
                    .params
                    .as_ref()
                    .and_then(|p| p["data"]["progress"].as_f64())
                {
                    seen.lock().push(value);
                }
            }
        })
        .build()
        .unwrap();
    client.initialize().await.unwrap();

    let mut args = HashMap::new();
    args.insert("steps".to_string(), json!(3));
    args.insert("delayMs".to_string(), json!(10));
    let result = client.call_tool("delayedResponse", Some(args)).await.unwrap();
    assert_eq!(result.content[0].as_text(), Some("completed 3 steps"));

    // All progress notifications arrived before the final response, in
    // emission order.
    let observed = progress.lock().clone();
    assert_eq!(observed.len(), 3);
    assert!(observed[0] < observed[1] && observed[1] < observed[2]);
    assert!((observed[2] - 100.0).abs() < f64::EPSILON);

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_server_initiated_sampling_round_trip() {
    let (base_url, _store) = spawn_default_server().await;
    let client = Client::builder(&base_url)
        .sampling(EchoSampling)
        .build()
        .unwrap();
    client.initialize().await.unwrap();

    let mut args = HashMap::new();
    args.insert("question".to_string(), json!("what is the answer"));
    let result = client.call_tool("consult", Some(args)).await.unwrap();
    assert_eq!(result.content[0].as_text(), Some("echo: what is the answer"));
    assert_eq!(result.structured_content.unwrap()["model"], "echo-1");

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_sampling_without_capability_fails_with_method_not_found() {
    let (base_url, _store) = spawn_default_server().await;
    // No sampling handler: the client does not declare the capability
    let client = Client::builder(&base_url).build().unwrap();
    client.initialize().await.unwrap();

    let err = client.call_tool("consult", None).await.unwrap_err();
    match err {
        ClientError::Rpc(error) => assert_eq!(error.code, -32601),
        other => panic!("expected RPC error, got {other:?}"),
    }

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_notification_stream_delivery() {
    let (base_url, store) = spawn_default_server().await;
    let received = Arc::new(Mutex::new(Vec::<String>::new()));
    let sink = Arc::clone(&received);
    let client = Client::builder(&base_url)
        .on_notification(move |notification| {
            sink.lock().push(notification.method);
        })
        .build()
        .unwrap();
    client.initialize().await.unwrap();
    client.subscribe_notifications();

    // Give the GET stream a moment to attach, then push from the server
    let session_id = client.session_id().unwrap();
    let session = store.peek(&session_id).unwrap();
    for _ in 0..50 {
        if session.has_notification_stream() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(session.has_notification_stream(), "stream never attached");

    session.push_notification(
        json!({"jsonrpc": "2.0", "method": "notifications/message", "params": {"data": 1}})
            .to_string(),
    );

    for _ in 0..50 {
        if !received.lock().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(received.lock().as_slice(), ["notifications/message"]);

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_session_expiry_then_reinitialize() {
    let config = StreamableConfig::builder()
        .session_ttl(Duration::from_millis(100))
        .build();
    let (base_url, _store) = spawn_server(config).await;
    let client = Client::builder(&base_url).build().unwrap();
    client.initialize().await.unwrap();
    let first_session = client.session_id().unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;

    let err = client.list_tools().await.unwrap_err();
    assert!(matches!(err, ClientError::SessionNotFound));

    // Re-running initialize continues service on a fresh session
    client.initialize().await.unwrap();
    let second_session = client.session_id().unwrap();
    assert_ne!(first_session, second_session);
    assert!(client.list_tools().await.is_ok());

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_close_terminates_session() {
    let (base_url, store) = spawn_default_server().await;
    let client = Client::builder(&base_url).build().unwrap();
    client.initialize().await.unwrap();
    assert_eq!(store.len(), 1);

    client.close().await.unwrap();
    assert_eq!(store.len(), 0);
}

#[tokio::test]
async fn test_list_tools_before_initialize_is_rejected_locally() {
    let (base_url, _store) = spawn_default_server().await;
    let client = Client::builder(&base_url).build().unwrap();
    assert!(matches!(
        client.list_tools().await.unwrap_err(),
        ClientError::NotInitialized
    ));
}
