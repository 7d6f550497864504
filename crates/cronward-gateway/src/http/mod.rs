pub mod status;

use axum::{extract::Request, middleware::Next, response::Response};
use tracing::info;

/// One line per request, after the response is produced.
pub async fn access_log(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let response = next.run(req).await;
    info!(%method, %path, status = response.status().as_u16(), "http request");
    response
}
