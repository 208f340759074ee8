//! In-process mock of the render service.
//!
//! Serves `POST /render-form` and `GET /health` on an ephemeral localhost port.
//! Every request is recorded, and the number of concurrently handled requests
//! is tracked so tests can assert on the client's concurrency bound.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Behaviour knobs for the mock.
#[derive(Debug, Clone)]
pub struct MockConfig {
    /// Time spent "rendering" each request.
    pub delay: Duration,
    /// Requests whose model reference contains this marker get a 500.
    pub fail_marker: Option<String>,
    /// Requests whose model reference contains this marker take `slow_delay`.
    pub slow_marker: Option<String>,
    pub slow_delay: Duration,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(20),
            fail_marker: None,
            slow_marker: None,
            slow_delay: Duration::from_secs(5),
        }
    }
}

/// What the mock saw for one request.
#[derive(Debug, Clone, Default)]
pub struct ReceivedRequest {
    pub accept: Option<String>,
    /// Part names in the order they arrived.
    pub fields: Vec<String>,
    /// `model_url` value or the `model` part's file name.
    pub model: Option<String>,
    pub width: Option<String>,
    pub height: Option<String>,
    pub texture_bytes: usize,
    /// Every part as decoded by the multipart parser.
    pub parts: Vec<ReceivedPart>,
}

/// One decoded `multipart/form-data` part.
#[derive(Debug, Clone)]
pub struct ReceivedPart {
    pub name: String,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub data: Bytes,
}

#[derive(Default)]
struct MockState {
    config: MockConfig,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    requests: Mutex<Vec<ReceivedRequest>>,
}

/// Running mock server; aborted on drop.
pub struct MockRenderServer {
    addr: SocketAddr,
    state: Arc<MockState>,
    handle: JoinHandle<()>,
}

impl MockRenderServer {
    /// Start with default behaviour.
    pub async fn start() -> std::io::Result<Self> {
        Self::start_with(MockConfig::default()).await
    }

    /// Start with the given behaviour.
    pub async fn start_with(config: MockConfig) -> std::io::Result<Self> {
        let state = Arc::new(MockState {
            config,
            ..Default::default()
        });

        let app = Router::new()
            .route("/render-form", post(render_form))
            .route("/health", get(|| async { "ok" }))
            .layer(DefaultBodyLimit::max(64 * 1024 * 1024))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Ok(Self {
            addr,
            state,
            handle,
        })
    }

    /// `http://127.0.0.1:<port>`
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Full URL of the render endpoint.
    pub fn endpoint(&self) -> String {
        format!("{}/render-form", self.base_url())
    }

    /// Highest number of requests handled at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }

    /// Number of render requests received so far.
    pub fn request_count(&self) -> usize {
        self.state.requests.lock().unwrap().len()
    }

    /// Snapshot of every received request.
    pub fn requests(&self) -> Vec<ReceivedRequest> {
        self.state.requests.lock().unwrap().clone()
    }
}

impl Drop for MockRenderServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn render_form(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Response {
    let current = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    state.max_in_flight.fetch_max(current, Ordering::SeqCst);

    let response = handle_render(&state, headers, multipart).await;

    state.in_flight.fetch_sub(1, Ordering::SeqCst);
    response
}

async fn handle_render(state: &MockState, headers: HeaderMap, mut multipart: Multipart) -> Response {
    let mut received = ReceivedRequest {
        accept: headers
            .get(header::ACCEPT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        ..Default::default()
    };

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
        };
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        let data = match field.bytes().await {
            Ok(data) => data,
            Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
        };

        match name.as_str() {
            "model_url" => received.model = Some(String::from_utf8_lossy(&data).into_owned()),
            "model" => received.model = file_name.clone(),
            "width" => received.width = Some(String::from_utf8_lossy(&data).into_owned()),
            "height" => received.height = Some(String::from_utf8_lossy(&data).into_owned()),
            n if n.starts_with("textures[") => received.texture_bytes += data.len(),
            _ => {}
        }
        received.fields.push(name.clone());
        received.parts.push(ReceivedPart {
            name,
            file_name,
            content_type,
            data,
        });
    }

    let model = received.model.clone().unwrap_or_default();
    let accept = received
        .accept
        .clone()
        .unwrap_or_else(|| "image/png".to_string());
    let body = format!(
        "rendered {} {}x{}",
        model,
        received.width.as_deref().unwrap_or("?"),
        received.height.as_deref().unwrap_or("?")
    );
    state.requests.lock().unwrap().push(received);

    let config = &state.config;
    let delay = match &config.slow_marker {
        Some(marker) if model.contains(marker.as_str()) => config.slow_delay,
        _ => config.delay,
    };
    tokio::time::sleep(delay).await;

    if let Some(marker) = &config.fail_marker {
        if model.contains(marker.as_str()) {
            return (StatusCode::INTERNAL_SERVER_ERROR, "render failed").into_response();
        }
    }

    (StatusCode::OK, [(header::CONTENT_TYPE, accept)], body).into_response()
}
