use super::ApiError;
use super::params::{
    HealthResponse, JobStatusResponse, VideoRequest, VideoResponse, WaitlistResponse,
};
use crate::AppState;
use crate::job::{GenerateJob, VideoJob};
use crate::pipeline::SamplingParams;
use crate::source::ImageSource;
use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Extension, Path as AxumPath};
use axum::http::{HeaderMap, HeaderValue, Request, Response, StatusCode, header};
use axum::response::Json;
use bytes::Bytes;
use futures::Stream;
use mime_guess::from_path;
use std::io::Error as IoError;
use std::path::PathBuf;
use tokio::io::AsyncSeekExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info, warn};

#[axum::debug_handler]
pub async fn health(Extension(state): Extension<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        model_loaded: state.model_loaded(),
        device: state.device(),
    })
}

fn validate_request(request: &VideoRequest, max_frames: u32) -> Result<(), ApiError> {
    if request.duration == 0 {
        return Err(ApiError::Validation(
            "duration must be greater than 0".to_string(),
        ));
    }
    if request.fps == 0 {
        return Err(ApiError::Validation("fps must be greater than 0".to_string()));
    }

    let frames = request.duration.checked_mul(request.fps);
    match frames {
        Some(frames) if frames <= max_frames => Ok(()),
        _ => Err(ApiError::Validation(format!(
            "duration * fps must not exceed {max_frames} frames"
        ))),
    }
}

pub async fn generate(
    Extension(state): Extension<AppState>,
    payload: Result<Json<VideoRequest>, JsonRejection>,
) -> Result<Json<VideoResponse>, ApiError> {
    let Json(request) = payload?;

    if !state.model_loaded() {
        return Err(ApiError::ModelNotLoaded);
    }

    validate_request(&request, state.max_frames)?;
    let source = ImageSource::parse(&request.image_url)?;
    source.check_inline_size(state.max_image_bytes)?;

    let video_id = uuid::Uuid::new_v4().to_string();
    let params = SamplingParams::new(&request, state.inference_steps);
    debug!(%video_id, ?params, "Sampling parameters");

    state.jobs.add(&video_id).await;
    let job = GenerateJob::new(video_id.clone(), source, params);
    if state.job_tx.unbounded_send(VideoJob::from(job)).is_err() {
        error!(%video_id, "Job handler is gone");
        state
            .jobs
            .fail(&video_id, ApiError::QueueClosed.to_string())
            .await;
        return Err(ApiError::QueueClosed);
    }

    info!(
        %video_id,
        motion = %request.motion,
        duration = request.duration,
        fps = request.fps,
        "Video generation queued"
    );
    Ok(Json(VideoResponse::processing(video_id, request.duration)))
}

pub async fn job_status(
    Extension(state): Extension<AppState>,
    AxumPath(video_id): AxumPath<String>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let record = state
        .jobs
        .get(&video_id)
        .await
        .ok_or_else(|| ApiError::NotFound("Job not found".to_string()))?;

    Ok(Json(JobStatusResponse::new(video_id, record)))
}

#[axum::debug_handler]
pub async fn waitlist(Extension(state): Extension<AppState>) -> Json<WaitlistResponse> {
    let counts = state.jobs.counts().await;
    Json(WaitlistResponse {
        processing_jobs: counts.processing,
        completed_jobs: counts.completed,
        failed_jobs: counts.failed,
    })
}

/// Only plain names inside the output directory are served.
fn is_valid_filename(filename: &str) -> bool {
    !filename.is_empty()
        && filename.len() <= 128
        && !filename.starts_with('.')
        && filename
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Resolves a `Range` header to an inclusive byte range.
///
/// Returns `None` when the range cannot be satisfied. A missing or
/// unparsable header selects the whole file.
fn parse_range(headers: &HeaderMap, file_size: u64) -> Option<(StatusCode, u64, u64)> {
    let last = file_size.checked_sub(1)?;

    if let Some(rh) = headers.get(header::RANGE)
        && let Ok(s) = rh.to_str()
        && let Some(stripped) = s.strip_prefix("bytes=")
        && let Some((start, end)) = stripped.split_once('-')
    {
        let start = start.trim();
        let end = end.trim();

        if start.is_empty() {
            // Suffix range: the last N bytes
            if let Ok(suffix) = end.parse::<u64>() {
                if suffix == 0 {
                    return None;
                }
                return Some((
                    StatusCode::PARTIAL_CONTENT,
                    file_size.saturating_sub(suffix),
                    last,
                ));
            }
        } else {
            let end = if end.is_empty() {
                Ok(last)
            } else {
                end.parse::<u64>().map(|end| end.min(last))
            };
            if let (Ok(start), Ok(end)) = (start.parse::<u64>(), end) {
                if start > end {
                    return None;
                }
                return Some((StatusCode::PARTIAL_CONTENT, start, end));
            }
        }
    }

    Some((StatusCode::OK, 0, last))
}

async fn open_range(
    path: PathBuf,
    start: u64,
    end: u64,
) -> anyhow::Result<impl Stream<Item = Result<Bytes, IoError>> + Send> {
    let mut fh = tokio::fs::File::open(&path).await?;

    fh.seek(std::io::SeekFrom::Start(start)).await?;
    let len = end - start + 1;

    use tokio::io::AsyncReadExt as _;
    Ok(ReaderStream::new(fh.take(len)))
}

pub async fn serve_video(
    Extension(state): Extension<AppState>,
    AxumPath(filename): AxumPath<String>,
    req: Request<Body>,
) -> Result<Response<Body>, ApiError> {
    if !is_valid_filename(&filename) {
        warn!(%filename, "Invalid filename");
        return Err(ApiError::InvalidFilename);
    }

    let path = state.output_dir().join(&filename);
    let size = match tokio::fs::metadata(&path).await {
        Ok(metadata) if metadata.is_file() => metadata.len(),
        _ => return Err(ApiError::NotFound("File not found".to_string())),
    };
    debug!(%filename, ?path, size, "Serving file");

    let content_type = HeaderValue::from_str(from_path(&filename).first_or_octet_stream().as_ref())
        .unwrap_or(HeaderValue::from_static("application/octet-stream"));

    let mut res = if size == 0 {
        Response::new(Body::empty())
    } else {
        let (status, start, end) = parse_range(req.headers(), size)
            .ok_or(ApiError::RangeNotSatisfiable { size })?;

        let stream = open_range(path, start, end).await.map_err(|error| {
            error!(%filename, ?error, "Failed to open file");
            ApiError::NotFound("File not found".to_string())
        })?;

        let mut res = Response::new(Body::from_stream(stream));
        *res.status_mut() = status;
        let headers = res.headers_mut();
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(end - start + 1));
        if status == StatusCode::PARTIAL_CONTENT
            && let Ok(value) = HeaderValue::from_str(&format!("bytes {start}-{end}/{size}"))
        {
            headers.insert(header::CONTENT_RANGE, value);
        }
        res
    };

    let headers = res.headers_mut();
    headers.insert(header::CONTENT_TYPE, content_type);
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("public,max-age=3600"),
    );
    Ok(res)
}
