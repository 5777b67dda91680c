use axum::{
    extract::State,
    response::{sse::Event, IntoResponse, Response, Sse},
    routing::{get, post},
    Json, Router,
};
use clap::Parser;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

#[derive(Parser)]
#[command(name = "mock-lmstudio")]
#[command(about = "Mock LM Studio backend for exercising the balancer locally")]
struct Cli {
    /// Port to run the mock server on
    #[arg(long, default_value = "1234")]
    port: u16,

    /// Comma-separated ids of the models to report as loaded
    #[arg(long, default_value = "model-a,model-b")]
    models: String,

    /// Delay between streamed chunks, in milliseconds
    #[arg(long, default_value = "200")]
    chunk_delay_ms: u64,
}

struct MockState {
    models: Vec<String>,
    chunk_delay: Duration,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    tracing_subscriber::fmt::init();

    let state = Arc::new(MockState {
        models: cli
            .models
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect(),
        chunk_delay: Duration::from_millis(cli.chunk_delay_ms),
    });

    let app = Router::new()
        .route("/api/v0/models", get(models_handler))
        .route("/v1/chat/completions", post(chat_handler))
        .with_state(Arc::clone(&state));

    let addr = SocketAddr::from(([127, 0, 0, 1], cli.port));
    tracing::info!("Mock LM Studio listening on http://{}", addr);
    tracing::info!("Loaded models: {}", state.models.join(", "));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn models_handler(State(state): State<Arc<MockState>>) -> Json<Value> {
    let data: Vec<Value> = state
        .models
        .iter()
        .map(|id| json!({ "id": id, "object": "model", "type": "llm", "state": "loaded" }))
        .collect();

    Json(json!({ "object": "list", "data": data }))
}

async fn chat_handler(State(state): State<Arc<MockState>>, Json(payload): Json<Value>) -> Response {
    let model = payload
        .get("model")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();
    let is_streaming = payload.get("stream").and_then(Value::as_bool).unwrap_or(false);
    tracing::info!("Chat request for {} (stream: {})", model, is_streaming);

    let reply = format!("Served by {}", model);

    if !is_streaming {
        return Json(json!({
            "id": "chatcmpl-mock",
            "object": "chat.completion",
            "model": model,
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": reply },
                "finish_reason": "stop"
            }]
        }))
        .into_response();
    }

    let delay = state.chunk_delay;
    let stream = async_stream::stream! {
        for word in reply.split_whitespace() {
            sleep(delay).await;
            let chunk = json!({
                "id": "chatcmpl-mock",
                "object": "chat.completion.chunk",
                "model": model,
                "choices": [{ "index": 0, "delta": { "content": format!("{} ", word) } }]
            });
            yield Ok::<_, Infallible>(Event::default().data(chunk.to_string()));
        }
        yield Ok(Event::default().data("[DONE]"));
    };

    Sse::new(stream).into_response()
}
