//! End-to-end tests: real router, real WebSocket agent, in-memory store.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use agent_proto::{AgentMessage, ChunkFrame, CommandStatus, CommandType, ServerMessage};
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite;
use tower::ServiceExt;
use uuid::Uuid;

use manlab_server::api::{ApiServer, ApiServerConfig};
use manlab_server::config::ServerConfig;
use manlab_server::crypto;
use manlab_server::database;
use manlab_server::database::repositories::{
    OnboardingRepository, SqlxOnboardingRepository,
};
use manlab_server::services::ServiceContainer;

async fn build_container() -> (ServiceContainer, sqlx::SqlitePool) {
    let pool = database::init_memory_pool().await.unwrap();
    let container = ServiceContainer::new(pool.clone(), &ServerConfig::default()).unwrap();
    (container, pool)
}

fn api_server(container: &ServiceContainer) -> ApiServer {
    ApiServer::new(
        ApiServerConfig::default(),
        container.state.clone(),
        container.cancellation_token(),
    )
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// A scripted in-process agent connected over a real WebSocket.
struct FakeAgent {
    ws: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    pub node_id: String,
    /// Bytes served for file.stream commands.
    data: Vec<u8>,
}

impl FakeAgent {
    /// Connect and enroll with a fresh onboarding token.
    async fn connect(addr: SocketAddr, pool: &sqlx::SqlitePool, data: Vec<u8>) -> Self {
        let onboarding = SqlxOnboardingRepository::new(pool.clone());
        let token = crypto::generate_enrollment_token();
        onboarding
            .register(&crypto::hash_auth_key(&token), Some("it-host"))
            .await
            .unwrap();

        let (mut ws, _) =
            tokio_tungstenite::connect_async(format!("ws://{}/api/agent/ws", addr))
                .await
                .unwrap();

        let enroll = AgentMessage::Enroll {
            auth_token: token,
            agent_identity: agent_proto::AgentIdentity {
                hostname: "it-host".to_string(),
                os: "TestOS 1.0".to_string(),
                agent_version: "1.0.0".to_string(),
                ip_address: None,
            },
        };
        ws.send(tungstenite::Message::text(enroll.to_json()))
            .await
            .unwrap();

        // First server frame is the EnrollAck.
        let node_id = loop {
            match ws.next().await.unwrap().unwrap() {
                tungstenite::Message::Text(text) => {
                    match ServerMessage::from_json(&text).unwrap() {
                        ServerMessage::EnrollAck { node_id, .. } => break node_id.to_string(),
                        other => panic!("expected EnrollAck, got {other:?}"),
                    }
                }
                other => panic!("unexpected frame {other:?}"),
            }
        };

        Self { ws, node_id, data }
    }

    /// Serve commands until the socket closes or the test drops the agent.
    async fn serve(mut self) {
        while let Some(Ok(frame)) = self.ws.next().await {
            let tungstenite::Message::Text(text) = frame else {
                continue;
            };
            let Ok(message) = ServerMessage::from_json(&text) else {
                continue;
            };
            match message {
                ServerMessage::ExecuteCommand {
                    command_id,
                    command_type,
                    payload,
                } => self.execute(command_id, command_type, payload).await,
                ServerMessage::ReplayPending { .. } | ServerMessage::EnrollAck { .. } => {}
            }
        }
    }

    async fn execute(
        &mut self,
        command_id: Uuid,
        command_type: CommandType,
        payload: serde_json::Value,
    ) {
        match command_type {
            CommandType::FileList => {
                let path = payload["path"].as_str().unwrap_or("/");
                let entry = serde_json::json!({
                    "name": path.rsplit('/').next().unwrap_or("f"),
                    "path": path,
                    "isDir": false,
                    "size": self.data.len(),
                });
                let output =
                    serde_json::json!({ "entries": [entry], "truncated": false }).to_string();
                self.reply(command_id, CommandStatus::Success, &output).await;
            }
            CommandType::FileStream => {
                let stream_id: Uuid =
                    serde_json::from_value(payload["streamId"].clone()).unwrap();
                let start = payload["startOffset"].as_u64().unwrap_or(0) as usize;
                let end = payload["endOffset"]
                    .as_u64()
                    .map(|e| e as usize)
                    .unwrap_or(self.data.len())
                    .min(self.data.len());

                let mut seq = 0u64;
                for chunk in self.data[start..end].chunks(8 * 1024) {
                    let frame =
                        ChunkFrame::new(stream_id, seq, Bytes::copy_from_slice(chunk));
                    self.ws
                        .send(tungstenite::Message::binary(frame.encode()))
                        .await
                        .unwrap();
                    seq += 1;
                }
                let end_frame = AgentMessage::StreamEnd {
                    stream_id,
                    error: None,
                };
                self.ws
                    .send(tungstenite::Message::text(end_frame.to_json()))
                    .await
                    .unwrap();
                self.reply(command_id, CommandStatus::Success, "{}").await;
            }
            CommandType::LogRead => {
                let output = serde_json::json!({
                    "content": "line one\nline two\n",
                    "truncated": false,
                    "totalBytes": 18,
                })
                .to_string();
                self.reply(command_id, CommandStatus::Success, &output).await;
            }
            _ => {
                self.reply(command_id, CommandStatus::Success, "{}").await;
            }
        }
    }

    async fn reply(&mut self, command_id: Uuid, status: CommandStatus, output: &str) {
        let result = AgentMessage::CommandResult {
            command_id,
            status,
            output_tail: output.to_string(),
        };
        self.ws
            .send(tungstenite::Message::text(result.to_json()))
            .await
            .unwrap();
    }
}

/// Bind the app on an ephemeral port.
async fn serve_app(container: &ServiceContainer) -> SocketAddr {
    let router = api_server(container).build_router();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    addr
}

#[tokio::test]
async fn path_traversal_rejected_with_exact_message() {
    let (container, pool) = build_container().await;
    let addr = serve_app(&container).await;
    let agent = FakeAgent::connect(addr, &pool, Vec::new()).await;
    let node_id = agent.node_id.clone();
    tokio::spawn(agent.serve());

    let router = api_server(&container).build_router();

    // Mint a system file browser session.
    let response = router
        .clone()
        .oneshot(post_json(
            &format!("/api/devices/{}/file-browser-sessions/system", node_id),
            serde_json::json!({ "ttlSeconds": 60 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let session = body_json(response).await;
    let session_id = session["id"].as_str().unwrap().to_string();

    // Traversal.
    let response = router
        .clone()
        .oneshot(post_json(
            &format!(
                "/api/devices/{}/file-browser-sessions/{}/list",
                node_id, session_id
            ),
            serde_json::json!({ "path": "/data/../etc/passwd" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["message"], "Path traversal is not allowed.");

    // Windows drive letter.
    let response = router
        .clone()
        .oneshot(post_json(
            &format!(
                "/api/devices/{}/file-browser-sessions/{}/list",
                node_id, session_id
            ),
            serde_json::json!({ "path": "C:\\logs\\app.log" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(
        body["message"],
        "Virtual paths must not contain ':'. Use '/C/...' on Windows."
    );
}

#[tokio::test]
async fn file_list_round_trip_through_live_agent() {
    let (container, pool) = build_container().await;
    let addr = serve_app(&container).await;
    let agent = FakeAgent::connect(addr, &pool, b"hello world".to_vec()).await;
    let node_id = agent.node_id.clone();
    tokio::spawn(agent.serve());

    let router = api_server(&container).build_router();

    let response = router
        .clone()
        .oneshot(post_json(
            &format!("/api/devices/{}/file-browser-sessions/system", node_id),
            serde_json::json!({}),
        ))
        .await
        .unwrap();
    let session_id = body_json(response).await["id"].as_str().unwrap().to_string();

    let response = router
        .clone()
        .oneshot(post_json(
            &format!(
                "/api/devices/{}/file-browser-sessions/{}/list",
                node_id, session_id
            ),
            serde_json::json!({ "path": "/var/data" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["entries"][0]["path"], "/var/data");
    assert_eq!(body["truncated"], false);
}

#[tokio::test]
async fn download_with_range_streams_exact_bytes() {
    // 64 KiB of patterned data so offsets are checkable.
    let data: Vec<u8> = (0..64 * 1024u32).map(|i| (i % 251) as u8).collect();

    let (container, pool) = build_container().await;
    let addr = serve_app(&container).await;
    let agent = FakeAgent::connect(addr, &pool, data.clone()).await;
    let node_id = agent.node_id.clone();
    tokio::spawn(agent.serve());

    let router = api_server(&container).build_router();

    let response = router
        .clone()
        .oneshot(post_json(
            &format!("/api/devices/{}/file-browser-sessions/system", node_id),
            serde_json::json!({}),
        ))
        .await
        .unwrap();
    let session_id = body_json(response).await["id"].as_str().unwrap().to_string();

    let response = router
        .clone()
        .oneshot(post_json(
            &format!("/api/devices/{}/downloads", node_id),
            serde_json::json!({
                "sessionId": session_id,
                "paths": ["/var/data/blob.bin"],
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let created = body_json(response).await;
    let download_id = created["downloadId"].as_str().unwrap().to_string();
    assert_eq!(
        created["streamUrl"],
        format!("/api/downloads/{}/stream", download_id)
    );

    // Wait for the prepare step to finish.
    for _ in 0..200 {
        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/api/downloads/{}/status", download_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = body_json(response).await;
        if status["state"] == "ready" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    // Resume from 1 KiB.
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/downloads/{}/stream", download_id))
                .header(header::RANGE, "bytes=1024-")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        response
            .headers()
            .get(header::CONTENT_RANGE)
            .unwrap()
            .to_str()
            .unwrap(),
        format!("bytes 1024-{}/{}", data.len() - 1, data.len())
    );
    assert_eq!(
        response.headers().get(header::ACCEPT_RANGES).unwrap(),
        "bytes"
    );
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/octet-stream"
    );

    let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024 * 1024)
        .await
        .unwrap();
    assert_eq!(bytes.len(), data.len() - 1024);
    assert_eq!(&bytes[..], &data[1024..]);

    // The download reports Completed with matching byte counts.
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/downloads/{}/status", download_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = body_json(response).await;
    assert_eq!(status["state"], "completed");
    assert_eq!(status["transferredBytes"], (data.len() - 1024) as u64);
}

#[tokio::test]
async fn log_viewer_read_uses_policy_scope() {
    let (container, pool) = build_container().await;
    let addr = serve_app(&container).await;
    let agent = FakeAgent::connect(addr, &pool, Vec::new()).await;
    let node_id = agent.node_id.clone();
    tokio::spawn(agent.serve());

    // Allow-list one log file for this node.
    let policy = {
        use manlab_server::database::repositories::{PolicyRepository, SqlxPolicyRepository};
        SqlxPolicyRepository::new(pool.clone())
            .create_log_viewer_policy(&node_id, "app log", "/var/log/app.log", 65536)
            .await
            .unwrap()
    };

    let router = api_server(&container).build_router();

    let response = router
        .clone()
        .oneshot(post_json(
            &format!("/api/devices/{}/log-viewer-sessions", node_id),
            serde_json::json!({ "policyId": policy.id }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let session_id = body_json(response).await["id"].as_str().unwrap().to_string();

    let response = router
        .clone()
        .oneshot(post_json(
            &format!(
                "/api/devices/{}/log-viewer-sessions/{}/read",
                node_id, session_id
            ),
            serde_json::json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["content"].as_str().unwrap().contains("line one"));
}

#[tokio::test]
async fn unknown_session_is_not_found() {
    let (container, _pool) = build_container().await;
    let router = api_server(&container).build_router();

    let response = router
        .oneshot(post_json(
            &format!(
                "/api/devices/{}/file-browser-sessions/{}/list",
                "no-such-node",
                Uuid::new_v4()
            ),
            serde_json::json!({ "path": "/" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn download_status_unknown_id_is_not_found() {
    let (container, _pool) = build_container().await;
    let router = api_server(&container).build_router();

    let response = router
        .oneshot(
            Request::builder()
                .uri(format!("/api/downloads/{}/status", Uuid::new_v4()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn devices_list_shows_connected_flag() {
    let (container, pool) = build_container().await;
    let addr = serve_app(&container).await;
    let agent = FakeAgent::connect(addr, &pool, Vec::new()).await;
    let node_id = agent.node_id.clone();
    tokio::spawn(agent.serve());

    let router = api_server(&container).build_router();
    let response = router
        .oneshot(
            Request::builder()
                .uri("/api/devices")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let device = body
        .as_array()
        .unwrap()
        .iter()
        .find(|d| d["id"] == node_id)
        .expect("enrolled node listed");
    assert_eq!(device["connected"], true);
    assert_eq!(device["status"], "ONLINE");
}
