use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::imageops::FilterType;
use image::{DynamicImage, RgbImage};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("image_url is required")]
    Empty,

    #[error("malformed data URL")]
    MalformedDataUrl,

    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("unsupported image_url scheme, expected data:, http:// or https://")]
    UnsupportedScheme,

    #[error("failed to download source image: {0}")]
    Download(#[from] reqwest::Error),

    #[error("source image is {size} bytes, limit is {limit}")]
    TooLarge { size: usize, limit: usize },

    #[error("failed to decode source image: {0}")]
    Decode(#[from] image::ImageError),
}

/// Where the source image of a request comes from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ImageSource {
    /// Bytes embedded in a `data:` URL, already base64-decoded.
    Inline(Vec<u8>),
    /// An `http(s)://` URL fetched by the job.
    Remote(String),
}

impl ImageSource {
    pub fn parse(image_url: &str) -> Result<Self, SourceError> {
        let image_url = image_url.trim();
        if image_url.is_empty() {
            return Err(SourceError::Empty);
        }

        if let Some(rest) = image_url.strip_prefix("data:") {
            let (_media_type, payload) = rest
                .split_once(',')
                .ok_or(SourceError::MalformedDataUrl)?;
            let bytes = STANDARD.decode(payload.trim())?;
            if bytes.is_empty() {
                return Err(SourceError::MalformedDataUrl);
            }
            return Ok(ImageSource::Inline(bytes));
        }

        if image_url.starts_with("http://") || image_url.starts_with("https://") {
            return Ok(ImageSource::Remote(image_url.to_string()));
        }

        Err(SourceError::UnsupportedScheme)
    }

    /// Decode the embedded bytes or download the remote image.
    pub async fn fetch(
        &self,
        client: &reqwest::Client,
        max_bytes: usize,
    ) -> Result<DynamicImage, SourceError> {
        match self {
            ImageSource::Inline(bytes) => {
                check_size(bytes.len(), max_bytes)?;
                Ok(image::load_from_memory(bytes)?)
            }
            ImageSource::Remote(url) => {
                debug!(%url, "Downloading source image");
                let mut response = client.get(url).send().await?.error_for_status()?;
                if let Some(length) = response.content_length() {
                    check_size(length as usize, max_bytes)?;
                }

                // Servers may omit or understate Content-Length
                let mut bytes = Vec::new();
                while let Some(chunk) = response.chunk().await? {
                    bytes.extend_from_slice(&chunk);
                    check_size(bytes.len(), max_bytes)?;
                }
                Ok(image::load_from_memory(&bytes)?)
            }
        }
    }

    /// Rejects inline payloads over `max_bytes` before any job is queued.
    pub fn check_inline_size(&self, max_bytes: usize) -> Result<(), SourceError> {
        match self {
            ImageSource::Inline(bytes) => check_size(bytes.len(), max_bytes),
            ImageSource::Remote(_) => Ok(()),
        }
    }
}

fn check_size(size: usize, limit: usize) -> Result<(), SourceError> {
    if size > limit {
        return Err(SourceError::TooLarge { size, limit });
    }
    Ok(())
}

/// Resize to the square input the pipeline expects.
pub fn prepare(image: DynamicImage, size: u32) -> RgbImage {
    image.resize_exact(size, size, FilterType::Lanczos3).to_rgb8()
}
