//! In-process backend and balancer for end-to-end tests.

#![allow(dead_code)]

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{sse::Event, IntoResponse, Response, Sse},
    routing::{get, post},
    Json, Router,
};
use modelbalancer::backends::BackendClient;
use modelbalancer::balancer::Balancer;
use modelbalancer::config::Config;
use modelbalancer::server::{build_router, AppState};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;

/// Shared state of the mock backend.
pub struct MockBackend {
    pub addr: SocketAddr,
    models: Arc<Mutex<Vec<String>>>,
    received: Arc<Mutex<Vec<String>>>,
    gate: watch::Sender<bool>,
}

#[derive(Clone)]
struct MockState {
    models: Arc<Mutex<Vec<String>>>,
    received: Arc<Mutex<Vec<String>>>,
    gate: watch::Receiver<bool>,
}

impl MockBackend {
    pub async fn start(models: &[&str]) -> Self {
        let models = Arc::new(Mutex::new(models.iter().map(|m| m.to_string()).collect()));
        let received = Arc::new(Mutex::new(Vec::new()));
        let (gate, gate_rx) = watch::channel(false);

        let state = MockState {
            models: Arc::clone(&models),
            received: Arc::clone(&received),
            gate: gate_rx,
        };

        let app = Router::new()
            .route("/api/v0/models", get(list_models))
            .route("/v1/chat/completions", post(chat))
            .fallback(echo)
            .with_state(state);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            models,
            received,
            gate,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Model ids seen in chat requests, in arrival order.
    pub fn received_models(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }

    pub fn set_models(&self, ids: &[&str]) {
        *self.models.lock().unwrap() = ids.iter().map(|m| m.to_string()).collect();
    }

    /// Let gated streams run to completion.
    pub fn open_gate(&self) {
        let _ = self.gate.send(true);
    }
}

async fn list_models(State(state): State<MockState>) -> Json<Value> {
    let mut data: Vec<Value> = state
        .models
        .lock()
        .unwrap()
        .iter()
        .map(|id| json!({ "id": id, "type": "llm", "state": "loaded" }))
        .collect();
    data.push(json!({ "id": "on-disk", "type": "llm", "state": "not-loaded" }));

    Json(json!({ "object": "list", "data": data }))
}

/// Non-streaming requests are echoed as JSON. Streaming requests send one
/// chunk, then wait for the gate (or tick forever when `endless` is set).
async fn chat(State(state): State<MockState>, Json(payload): Json<Value>) -> Response {
    let model = payload
        .get("model")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    state.received.lock().unwrap().push(model.clone());

    let streaming = payload.get("stream").and_then(Value::as_bool).unwrap_or(false);
    if !streaming {
        return Json(json!({ "model": model, "echo": payload })).into_response();
    }

    let endless = payload.get("endless").and_then(Value::as_bool).unwrap_or(false);
    let mut gate = state.gate.clone();
    let stream = async_stream::stream! {
        yield Ok::<_, Infallible>(Event::default().data(json!({ "model": model }).to_string()));
        if endless {
            loop {
                tokio::time::sleep(Duration::from_millis(20)).await;
                yield Ok(Event::default().data("tick"));
            }
        }
        let _ = gate.wait_for(|open| *open).await;
        yield Ok(Event::default().data("[DONE]"));
    };

    Sse::new(stream).into_response()
}

async fn echo(headers: HeaderMap, body: Bytes) -> Response {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();

    (StatusCode::OK, [(header::CONTENT_TYPE, content_type)], body).into_response()
}

/// A running balancer in front of some backend URL.
pub struct TestProxy {
    pub addr: SocketAddr,
    pub balancer: Arc<Balancer>,
    pub client: reqwest::Client,
}

impl TestProxy {
    pub async fn start(backend_url: &str) -> Self {
        Self::start_with(Config {
            backend_url: backend_url.to_string(),
            ..Config::default()
        })
        .await
    }

    pub async fn start_with(config: Config) -> Self {
        let balancer = Arc::new(Balancer::new());
        let backend = BackendClient::new(&config).unwrap();
        balancer.refresh(&backend).await;

        let state = AppState::new(config, Arc::clone(&balancer), backend).unwrap();
        let app = build_router(state);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            balancer,
            client: reqwest::Client::new(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn load_report(&self) -> Value {
        self.client
            .get(self.url("/models"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    /// Wait until no request is tracked as in flight.
    pub async fn wait_for_drain(&self) {
        for _ in 0..100 {
            if self.balancer.tracker().total() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!(
            "in-flight entries never drained: {:?}",
            self.balancer.tracker().entries()
        );
    }
}

/// Accepts connections and never answers. Returns the base URL.
pub async fn start_silent_backend() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    format!("http://{}", addr)
}
