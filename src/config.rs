use anyhow::Result;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Service configuration that can be loaded from CLI, config file, or environment
///
/// Example configuration file content
/// # Video Generation Configuration
///
/// # Server configuration
/// host = "0.0.0.0"
/// listen_on_port = 5003
/// output_dir = "/output"
///
/// # Model configuration
/// backend = "remote"                      # Options: "remote" or "idle"
/// model_path = "/models/stable-video-diffusion"
/// model_endpoint = "http://127.0.0.1:7860"  # Without it, "remote" starts with no model
/// device = "auto"                         # Options: "auto", "cuda" or "cpu"
/// fallback_to_idle = false
///
/// # Generation configuration
/// workers = 2
/// inference_steps = 25
/// image_size = 512
/// max_frames = 240
/// download_timeout_secs = 30
///
/// # Webhook configuration (optional)
/// webhook_url = "https://example.com/webhook"
#[derive(Debug, Clone, Serialize, Deserialize, Parser)]
#[command(version, about, long_about = None)]
#[serde(default)]
pub struct Config {
    /// Address to bind the HTTP server to
    #[arg(long, default_value = "0.0.0.0")]
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = 5003)]
    #[serde(default = "default_port")]
    pub listen_on_port: u16,

    /// Directory generated videos and thumbnails are written to
    #[arg(short, long, env = "OUTPUT_PATH", default_value = "/output")]
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Pretrained model location, passed to the model worker on load
    #[arg(short, long, env = "MODEL_PATH", default_value = "/models/stable-video-diffusion")]
    #[serde(default = "default_model_path")]
    pub model_path: String,

    /// Model backend: remote or idle
    #[arg(short, long, default_value = "remote")]
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Base URL of the model worker; with no endpoint the remote backend starts unloaded
    #[arg(long, env = "MODEL_ENDPOINT")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_endpoint: Option<String>,

    /// Preferred inference device: auto, cuda or cpu
    #[arg(long, default_value = "auto")]
    #[serde(default = "default_device")]
    pub device: String,

    /// Use the idle animation when the remote model fails to load
    #[arg(long, default_value_t = false)]
    pub fallback_to_idle: bool,

    /// Number of concurrent inference jobs
    #[arg(short, long, default_value_t = 2)]
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Diffusion steps per video
    #[arg(long, default_value_t = 25)]
    #[serde(default = "default_inference_steps")]
    pub inference_steps: u32,

    /// Side length the source image is resized to
    #[arg(long, default_value_t = 512)]
    #[serde(default = "default_image_size")]
    pub image_size: u32,

    /// Upper bound for duration * fps
    #[arg(long, default_value_t = 240)]
    #[serde(default = "default_max_frames")]
    pub max_frames: u32,

    /// Largest accepted source image, in bytes
    #[arg(long, default_value_t = 20 * 1024 * 1024)]
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: usize,

    /// Timeout for a single model worker call, in seconds
    #[arg(long, default_value_t = 600)]
    #[serde(default = "default_model_timeout_secs")]
    pub model_timeout_secs: u64,

    /// Timeout for downloading a source image, in seconds
    #[arg(long, default_value_t = 30)]
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,

    /// Number of finished jobs kept for status queries
    #[arg(long, default_value_t = 1000)]
    #[serde(default = "default_job_history")]
    pub job_history: usize,

    /// Configuration file path (overrides all other arguments)
    #[arg(short, long)]
    #[serde(skip)]
    pub config: Option<String>,

    /// Webhook URL to call when jobs complete or fail
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            listen_on_port: default_port(),
            output_dir: default_output_dir(),
            model_path: default_model_path(),
            backend: default_backend(),
            model_endpoint: None,
            device: default_device(),
            fallback_to_idle: false,
            workers: default_workers(),
            inference_steps: default_inference_steps(),
            image_size: default_image_size(),
            max_frames: default_max_frames(),
            max_image_bytes: default_max_image_bytes(),
            model_timeout_secs: default_model_timeout_secs(),
            download_timeout_secs: default_download_timeout_secs(),
            job_history: default_job_history(),
            config: None,
            webhook_url: None,
        }
    }
}

impl Config {
    /// Load configuration from CLI args, optionally merging with a config file
    pub fn load() -> Result<Self> {
        let mut config = Config::parse();

        if let Some(config_path) = &config.config {
            let file_config = Self::from_file(Path::new(config_path))?;
            config = config.merge_with_file(file_config);
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Merge with file config, CLI args take precedence
    fn merge_with_file(mut self, file_config: Config) -> Self {
        // If CLI value is default, use file value
        if self.host == default_host() {
            self.host = file_config.host;
        }
        if self.listen_on_port == default_port() {
            self.listen_on_port = file_config.listen_on_port;
        }
        if self.output_dir == default_output_dir() {
            self.output_dir = file_config.output_dir;
        }
        if self.model_path == default_model_path() {
            self.model_path = file_config.model_path;
        }
        if self.backend == default_backend() {
            self.backend = file_config.backend;
        }
        if self.device == default_device() {
            self.device = file_config.device;
        }
        if !self.fallback_to_idle {
            self.fallback_to_idle = file_config.fallback_to_idle;
        }
        if self.workers == default_workers() {
            self.workers = file_config.workers;
        }
        if self.inference_steps == default_inference_steps() {
            self.inference_steps = file_config.inference_steps;
        }
        if self.image_size == default_image_size() {
            self.image_size = file_config.image_size;
        }
        if self.max_frames == default_max_frames() {
            self.max_frames = file_config.max_frames;
        }
        if self.max_image_bytes == default_max_image_bytes() {
            self.max_image_bytes = file_config.max_image_bytes;
        }
        if self.model_timeout_secs == default_model_timeout_secs() {
            self.model_timeout_secs = file_config.model_timeout_secs;
        }
        if self.download_timeout_secs == default_download_timeout_secs() {
            self.download_timeout_secs = file_config.download_timeout_secs;
        }
        if self.job_history == default_job_history() {
            self.job_history = file_config.job_history;
        }

        // For Option fields, CLI takes precedence if Some
        if self.model_endpoint.is_none() {
            self.model_endpoint = file_config.model_endpoint;
        }
        if self.webhook_url.is_none() {
            self.webhook_url = file_config.webhook_url;
        }

        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        match self.backend.as_str() {
            "idle" => {}
            "remote" => {
                // Without an endpoint the service starts with no model loaded
                if let Some(endpoint) = self.model_endpoint.as_deref()
                    && !is_http_url(endpoint)
                {
                    return Err(anyhow::anyhow!(
                        "Model endpoint must start with http:// or https://"
                    ));
                }
            }
            backend => {
                return Err(anyhow::anyhow!(
                    "Unsupported backend: {backend}. Use 'remote' or 'idle'"
                ));
            }
        }

        if !matches!(self.device.as_str(), "auto" | "cuda" | "cpu") {
            return Err(anyhow::anyhow!(
                "Unsupported device: {}. Use 'auto', 'cuda' or 'cpu'",
                self.device
            ));
        }

        if self.workers == 0 {
            return Err(anyhow::anyhow!("At least one worker is required"));
        }
        if self.inference_steps == 0 {
            return Err(anyhow::anyhow!("Inference steps must be greater than 0"));
        }
        // The encoder works on 4:2:0 chroma, which needs even dimensions
        if self.image_size < 16 || self.image_size % 2 != 0 {
            return Err(anyhow::anyhow!(
                "Image size must be an even number of at least 16, got {}",
                self.image_size
            ));
        }
        if self.download_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Download timeout must be greater than 0"));
        }
        if self.max_frames == 0 {
            return Err(anyhow::anyhow!("Max frames must be greater than 0"));
        }

        if let Some(webhook_url) = &self.webhook_url {
            if webhook_url.is_empty() {
                return Err(anyhow::anyhow!("Webhook URL cannot be empty"));
            }
            if !is_http_url(webhook_url) {
                return Err(anyhow::anyhow!(
                    "Webhook URL must start with http:// or https://"
                ));
            }
        }

        Ok(())
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5003
}

fn default_output_dir() -> String {
    "/output".to_string()
}

fn default_model_path() -> String {
    "/models/stable-video-diffusion".to_string()
}

fn default_backend() -> String {
    "remote".to_string()
}

fn default_device() -> String {
    "auto".to_string()
}

fn default_workers() -> usize {
    2
}

fn default_inference_steps() -> u32 {
    25
}

fn default_image_size() -> u32 {
    512
}

fn default_max_frames() -> u32 {
    240
}

fn default_max_image_bytes() -> usize {
    20 * 1024 * 1024
}

fn default_model_timeout_secs() -> u64 {
    600
}

fn default_download_timeout_secs() -> u64 {
    30
}

fn default_job_history() -> usize {
    1000
}
