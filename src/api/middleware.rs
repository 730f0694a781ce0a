use axum::{body::Body, http::Request, middleware::Next, response::Response};
use tracing::{error, warn};

/// Logs 4xx responses at `warn` and 5xx at `error`.
pub async fn log_request_errors(req: Request<Body>, next: Next) -> Response {
    let uri = req.uri().clone();
    let method = req.method().clone();

    let response = next.run(req).await;
    let status = response.status();
    if status.is_client_error() {
        warn!(%method, %uri, %status, "Client error");
    } else if status.is_server_error() {
        error!(%method, %uri, %status, "Server error");
    }

    response
}
