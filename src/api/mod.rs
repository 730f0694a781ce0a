mod error;
mod middleware;
pub mod params;
mod routes;

pub use error::ApiError;
pub use middleware::log_request_errors;
pub use routes::{generate, health, job_status, serve_video, waitlist};
