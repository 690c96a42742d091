//! Proxy-protocol enforcement.

use axum::{extract::Request, http::StatusCode, middleware::Next, response::Response};

/// Reject requests that did not arrive over HTTPS at the edge proxy.
///
/// Deployments sit behind a TLS-terminating proxy that stamps
/// `X-Forwarded-Proto`; anything else went around the front door.
pub async fn require_forwarded_https(request: Request, next: Next) -> Result<Response, StatusCode> {
    let proto = request
        .headers()
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("http");
    if proto != "https" {
        return Err(StatusCode::FORBIDDEN);
    }
    Ok(next.run(request).await)
}
