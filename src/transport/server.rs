//! Serves an [`HttpAdapter`] with axum.

use crate::server::{HttpAdapter, HttpExchange};
use crate::transport::HeaderMap;
use axum::body::{Body, Bytes};
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{self, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use std::sync::Arc;
use tracing::warn;

/// Router that POSTs to `path` go through `adapter`.
pub fn router(adapter: Arc<HttpAdapter>, path: &str) -> Router {
    let limit = adapter.max_body_size();
    Router::new()
        .route(path, post(soap_handler))
        .layer(DefaultBodyLimit::max(limit))
        .with_state(adapter)
}

async fn soap_handler(
    State(adapter): State<Arc<HttpAdapter>>,
    headers: http::HeaderMap,
    body: Bytes,
) -> Response {
    let mut request_headers = HeaderMap::new();
    for (name, value) in &headers {
        if let Ok(v) = value.to_str() {
            request_headers
                .entry(name.as_str().to_string())
                .or_default()
                .push(v.to_string());
        }
    }

    let mut exchange = HttpExchange::new(request_headers, body);
    adapter.handle(&mut exchange).await;

    let status = StatusCode::from_u16(exchange.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut builder = Response::builder().status(status);
    for (name, values) in &exchange.response_headers {
        for value in values {
            builder = builder.header(name.as_str(), value.as_str());
        }
    }
    builder
        .body(Body::from(exchange.response_body))
        .unwrap_or_else(|e| {
            warn!(error = %e, "Invalid response header");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        })
}
