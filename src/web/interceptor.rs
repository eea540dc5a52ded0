//! Admission and access logging around every API request.
//!
//! Before the handler runs, the instance's remaining quota is checked and the
//! request is rejected with 429 when nothing is left. After the handler, an
//! access record is built from request and response metadata and handed to
//! the pipeline. Failures of either step are logged and otherwise ignored.

use super::api::AppState;
use crate::record::{AccessLogRecord, Headers, Protocol};
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::warn;

pub const INSTANCE_HEADER: &str = "x-instance-id";
pub const PROJECT_HEADER: &str = "x-project-id";

pub const QUOTA_EXCEEDED: &str = "quota for authenticated requests exceeded";

pub async fn access_interceptor(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let headers = request.headers();
    let instance_id = instance_id(headers);

    match state.service.limit(&instance_id).await {
        Ok(Some(0)) => return (StatusCode::TOO_MANY_REQUESTS, QUOTA_EXCEEDED).into_response(),
        Ok(_) => {}
        Err(e) => warn!(instance_id = %instance_id, error = %e, "failed to check whether requests should be limited"),
    }

    let request_url = request.uri().to_string();
    let request_headers = to_headers(headers);
    let project_id = header_str(headers, PROJECT_HEADER).unwrap_or_default().to_string();
    let requested_host = header_str(headers, header::HOST.as_str())
        .unwrap_or_default()
        .to_string();
    let requested_domain = domain_of(&requested_host).to_string();

    let response = next.run(request).await;

    let record = AccessLogRecord::new(state.clock.now(), Protocol::Http, instance_id, request_url)
        .with_status(u32::from(response.status().as_u16()))
        .with_request_headers(request_headers)
        .with_response_headers(to_headers(response.headers()))
        .with_project(project_id)
        .with_requested(requested_domain, requested_host);

    if let Err(e) = state.service.handle(record).await {
        warn!(error = %e, "failed to handle access log");
    }

    response
}

/// The tenant of a request: the explicit header, else the requested host.
fn instance_id(headers: &HeaderMap) -> String {
    header_str(headers, INSTANCE_HEADER)
        .or_else(|| header_str(headers, header::HOST.as_str()))
        .unwrap_or_default()
        .to_string()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn domain_of(host: &str) -> &str {
    if host.starts_with('[') {
        // [::1]:8080
        return host.split(']').next().map_or(host, |h| h.trim_start_matches('['));
    }
    host.rsplit_once(':').map_or(host, |(domain, _port)| domain)
}

fn to_headers(headers: &HeaderMap) -> Headers {
    let mut out = Headers::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        out.entry(name.as_str().to_string()).or_default().push(value);
    }
    out
}
