// ============================================================================
// Internal HTTP Surface
// ============================================================================
//
// Health, metrics and the publish API. Binds the internal port only;
// upstream services publish events here and the gateway fans them out
// over the admitted WebSocket connections.

use crate::broadcast::{BroadcastRouter, PublishRequest};
use crate::context::AppContext;
use crate::error::GatewayError;
use crate::metrics::gather_metrics;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use tokio::net::TcpListener;

pub async fn run_http_server(ctx: AppContext, port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "HTTP server listening");

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let ctx = ctx.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| route(ctx.clone(), req));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                tracing::debug!(error = %e, "HTTP connection error");
            }
        });
    }
}

async fn route(ctx: AppContext, req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/health") => health(&ctx).await,
        (&Method::GET, "/metrics") => metrics(),
        (&Method::POST, "/publish") => publish(&ctx, req).await,
        _ => plain(StatusCode::NOT_FOUND, "not found"),
    };
    Ok(response)
}

async fn health(ctx: &AppContext) -> Response<Full<Bytes>> {
    let store_up = ctx.limiter.store_healthy().await;
    let audit_up = ctx.monitor.is_healthy();
    let healthy = store_up && audit_up;
    let body = serde_json::json!({
        "status": if healthy { "ok" } else { "degraded" },
        "active_connections": ctx.connections.active_count().await,
        "counter_store": if store_up { "up" } else { "down" },
        "audit_sink": if audit_up { "up" } else { "down" },
    });
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    json(status, &body)
}

fn metrics() -> Response<Full<Bytes>> {
    match gather_metrics() {
        Ok(text) => plain(StatusCode::OK, &text),
        Err(e) => {
            tracing::error!(error = %e, "Failed to gather metrics");
            plain(StatusCode::INTERNAL_SERVER_ERROR, "metrics unavailable")
        }
    }
}

async fn publish(ctx: &AppContext, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let actor = req
        .headers()
        .get("x-actor-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("internal")
        .to_string();

    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            tracing::debug!(error = %e, "Failed to read publish body");
            return error_response(StatusCode::BAD_REQUEST, "validation_error", "unreadable body");
        }
    };
    if body.len() > ctx.limiter.max_payload_bytes() {
        return error_response(
            StatusCode::PAYLOAD_TOO_LARGE,
            "payload_too_large",
            "body exceeds payload limit",
        );
    }

    let request: PublishRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "validation_error",
                &format!("invalid publish request: {}", e),
            )
        }
    };
    let target = match request.target() {
        Ok(target) => target,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e.error_code(), &e.user_message()),
    };

    match BroadcastRouter::publish(ctx, &actor, target, request.visibility, request.event).await {
        Ok(outcome) => match serde_json::to_value(&outcome) {
            Ok(body) => json(StatusCode::OK, &body),
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize publish outcome");
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", "internal error")
            }
        },
        Err(e) => {
            e.log();
            let status = match e {
                GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
                GatewayError::AuditBackpressure => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            error_response(status, e.error_code(), &e.user_message())
        }
    }
}

fn json(status: StatusCode, body: &serde_json::Value) -> Response<Full<Bytes>> {
    let rendered = body.to_string();
    response_with(status, "application/json", rendered)
}

fn plain(status: StatusCode, body: &str) -> Response<Full<Bytes>> {
    response_with(status, "text/plain; charset=utf-8", body.to_string())
}

fn error_response(status: StatusCode, code: &str, message: &str) -> Response<Full<Bytes>> {
    json(
        status,
        &serde_json::json!({ "error": code, "message": message }),
    )
}

fn response_with(status: StatusCode, content_type: &str, body: String) -> Response<Full<Bytes>> {
    let built = Response::builder()
        .status(status)
        .header("content-type", content_type)
        .body(Full::new(Bytes::from(body)));
    match built {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(error = %e, "Failed to build HTTP response");
            Response::new(Full::new(Bytes::from_static(b"internal error")))
        }
    }
}
