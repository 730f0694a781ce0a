pub mod api;
pub mod app_state;
pub mod config;
pub mod encoder;
pub mod job;
pub mod pipeline;
pub mod source;
pub mod stream_map;

use anyhow::Context as _;
use axum::Router;
use axum::extract::{DefaultBodyLimit, Extension};
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tower_http::cors::Any;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

//
// Re-export
//
pub use api::{ApiError, generate, health, job_status, log_request_errors, serve_video, waitlist};
pub use app_state::AppState;
pub use config::Config;
pub use job::{EncodeJob, GenerateJob, Job, JobResult, VideoJob};
pub use pipeline::{IdlePipeline, RemotePipeline, SamplingParams, VideoPipeline};
pub use stream_map::StreamMap;

/// Headroom for the JSON fields around an inline image.
const REQUEST_OVERHEAD_BYTES: usize = 64 * 1024;

/// Largest `POST /generate` body: a base64 `data:` URL of `max_image_bytes`
/// plus the rest of the request.
fn request_body_limit(max_image_bytes: usize) -> usize {
    (max_image_bytes / 3 + 1)
        .saturating_mul(4)
        .saturating_add(REQUEST_OVERHEAD_BYTES)
}

pub fn router(state: AppState) -> Router {
    let body_limit = request_body_limit(state.max_image_bytes);
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/generate", post(generate))
        .route("/jobs/{video_id}", get(job_status))
        .route("/waitlist", get(waitlist))
        .route("/videos/{filename}", get(serve_video))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(axum::middleware::from_fn(log_request_errors))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(Extension(state))
}

pub async fn run(config: Config) -> anyhow::Result<()> {
    ffmpeg_next::init().context("Failed to initialize ffmpeg")?;

    let pipeline = pipeline::load(&config).await;
    if pipeline.is_none() {
        info!("Starting without a model, generation requests will be refused");
    }

    let state = AppState::new(&config, pipeline)
        .await
        .context("Failed to create app state")?;
    let app = router(state);

    let addr = format!("{}:{}", config.host, config.listen_on_port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Listening on {addr}");

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
