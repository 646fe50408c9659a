//! Tests for the SSE transport over a real listener.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use gcloud_mcp::mcp::transport::sse::{router, SseState};
use gcloud_mcp::mcp::transport::HttpOptions;
use gcloud_mcp::mcp::{tool_fn, Limits, McpServer, Registry, ToolError, ToolSpec};

async fn spawn_server() -> (String, SseState) {
    let mut registry = Registry::new();
    registry
        .register_tool(
            ToolSpec::new("slow")
                .summary("Answers after a pause.")
                .returns("string", "done")
                .build(tool_fn(|_| async {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok::<_, ToolError>(json!("slow done"))
                }))
                .unwrap(),
        )
        .unwrap();
    registry
        .register_tool(
            ToolSpec::new("fast")
                .summary("Answers at once.")
                .returns("string", "done")
                .build(tool_fn(|_| async { Ok::<_, ToolError>(json!("fast done")) }))
                .unwrap(),
        )
        .unwrap();

    let server = McpServer::new(Arc::new(registry), Limits::default());
    let state = SseState::new(server, &HttpOptions::default());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), state)
}

/// Minimal SSE reader: yields `(event, data)` pairs.
struct EventReader<S> {
    stream: S,
    buffer: String,
}

impl<S, B> EventReader<S>
where
    S: futures::Stream<Item = reqwest::Result<B>> + Unpin,
    B: AsRef<[u8]>,
{
    async fn next_event(&mut self) -> (String, String) {
        loop {
            if let Some(end) = self.buffer.find("\n\n") {
                let frame: String = self.buffer.drain(..end + 2).collect();
                let mut event = String::from("message");
                let mut data = Vec::new();
                for line in frame.lines() {
                    if let Some(name) = line.strip_prefix("event:") {
                        event = name.trim().to_string();
                    } else if let Some(chunk) = line.strip_prefix("data:") {
                        data.push(chunk.trim_start().to_string());
                    }
                }
                // Keep-alive comments carry no data.
                if data.is_empty() {
                    continue;
                }
                return (event, data.join("\n"));
            }
            let chunk = tokio::time::timeout(Duration::from_secs(5), self.stream.next())
                .await
                .expect("event arrives in time")
                .expect("stream stays open")
                .unwrap();
            self.buffer
                .push_str(&String::from_utf8_lossy(chunk.as_ref()).replace("\r\n", "\n"));
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn responses_arrive_on_the_stream_in_completion_order() {
    let (base, state) = spawn_server().await;
    let client = reqwest::Client::new();

    let response = client.get(format!("{base}/mcp/sse")).send().await.unwrap();
    assert_eq!(response.status(), 200);
    let mut events = EventReader {
        stream: Box::pin(response.bytes_stream()),
        buffer: String::new(),
    };

    let (event, endpoint) = events.next_event().await;
    assert_eq!(event, "endpoint");
    assert!(endpoint.starts_with("/mcp/messages?session_id="));
    assert_eq!(state.sessions().session_count(), 1);

    let post = |id: u64, tool: &str| {
        client
            .post(format!("{base}{endpoint}"))
            .json(&json!({
                "jsonrpc": "2.0", "id": id, "method": "tools/call",
                "params": { "name": tool }
            }))
            .send()
    };
    assert_eq!(post(1, "slow").await.unwrap().status(), 202);
    assert_eq!(post(2, "fast").await.unwrap().status(), 202);

    let (event, first) = events.next_event().await;
    assert_eq!(event, "message");
    let first: Value = serde_json::from_str(&first).unwrap();
    assert_eq!(first["id"], 2);
    assert_eq!(first["result"]["content"][0]["text"], "fast done");

    let (_, second) = events.next_event().await;
    let second: Value = serde_json::from_str(&second).unwrap();
    assert_eq!(second["id"], 1);
}

#[tokio::test]
async fn posting_to_unknown_session_is_not_found() {
    let (base, _state) = spawn_server().await;
    let response = reqwest::Client::new()
        .post(format!("{base}/mcp/messages?session_id=missing"))
        .json(&json!({ "jsonrpc": "2.0", "id": 1, "method": "ping" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["kind"], "NotFound");
}
