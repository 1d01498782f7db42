// ============================================================================
// Connection Lifecycle
// ============================================================================
//
// One task per socket. The task owns the stream halves; everything else
// talks to the connection through its Outbound channel. Cleanup runs on
// every exit path and unregister is idempotent, so racing the heartbeat
// monitor or the delivery path is harmless.

use crate::access::{DenialReason, GrantedAccess};
use crate::audit::{AuditEvent, ANONYMOUS_ACTOR};
use crate::context::AppContext;
use crate::handlers::admission::{self, AdmissionOutcome};
use crate::message::{ClientMessage, ServerMessage};
use crate::metrics::RATE_LIMITED_TOTAL;
use crate::rate_limit::LimitClass;
use crate::registry::{CloseReason, ConnectionId, Outbound};
use crate::utils::log_safe_id;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;

type WsSink = futures_util::stream::SplitSink<WebSocketStream<TcpStream>, WsMessage>;
type WsSource = futures_util::stream::SplitStream<WebSocketStream<TcpStream>>;

pub async fn handle_connection(ctx: AppContext, stream: TcpStream, peer: SocketAddr) {
    let source = peer.ip().to_string();

    // Attempt quota first. The handshake is still completed so the
    // denial reaches the client as a frame it can parse.
    let attempt_key = format!("attempt:{}", source);
    let decision = ctx.limiter.check(&attempt_key, LimitClass::ConnectionAttempt).await;

    let ws_stream = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            tracing::debug!(source = %source, error = %e, "Handshake failed");
            return;
        }
    };
    let (mut sink, mut stream) = ws_stream.split();

    if !decision.allowed {
        let audit = AuditEvent::rate_limit_violation(
            ANONYMOUS_ACTOR,
            None,
            LimitClass::ConnectionAttempt.as_str(),
            &attempt_key,
        );
        if let Err(e) = ctx.monitor.record(audit) {
            e.log();
        }
        let frame = ServerMessage::Denied {
            code: DenialReason::RateLimited.code().to_string(),
            message: DenialReason::RateLimited.message().to_string(),
            retry_after_secs: Some(decision.retry_after.as_secs().max(1)),
        };
        send_frame(&mut sink, &frame).await;
        let _ = sink.close().await;
        return;
    }

    // The client gets a bounded window to identify itself.
    let hello_deadline = Duration::from_secs(ctx.config.hello_deadline_secs);
    let hello = match tokio::time::timeout(hello_deadline, stream.next()).await {
        Ok(Some(Ok(WsMessage::Text(text)))) => text,
        Ok(Some(Ok(_))) | Ok(Some(Err(_))) | Ok(None) => {
            tracing::debug!(source = %source, "Socket closed before Hello");
            return;
        }
        Err(_) => {
            send_error(&mut sink, "hello_timeout", "Handshake frame not received in time").await;
            let _ = sink.close().await;
            return;
        }
    };

    if !ctx.limiter.check_payload_size(hello.len()) {
        send_error(&mut sink, "payload_too_large", "Frame exceeds payload limit").await;
        let _ = sink.close().await;
        return;
    }

    let (token, tenant_id, connection_type) = match serde_json::from_str::<ClientMessage>(&hello) {
        Ok(ClientMessage::Hello {
            token,
            tenant_id,
            connection_type,
        }) => (token, tenant_id, connection_type),
        Ok(_) => {
            send_error(&mut sink, "protocol_error", "First frame must be hello").await;
            let _ = sink.close().await;
            return;
        }
        Err(e) => {
            tracing::debug!(source = %source, error = %e, "Malformed hello");
            send_error(&mut sink, "protocol_error", "Malformed handshake frame").await;
            let _ = sink.close().await;
            return;
        }
    };

    let (tx, rx) = mpsc::unbounded_channel::<Outbound>();
    let outcome = admission::admit(
        &ctx,
        &token,
        tenant_id.as_deref(),
        connection_type,
        &source,
        tx,
    )
    .await;

    let (id, granted) = match outcome {
        Ok(AdmissionOutcome::Admitted { id, granted }) => (id, granted),
        Ok(AdmissionOutcome::Refused(reason)) => {
            let frame = ServerMessage::Denied {
                code: reason.code().to_string(),
                message: reason.message().to_string(),
                retry_after_secs: None,
            };
            send_frame(&mut sink, &frame).await;
            let _ = sink.close().await;
            return;
        }
        Err(e) => {
            e.log();
            send_error(&mut sink, e.error_code(), &e.user_message()).await;
            let _ = sink.close().await;
            return;
        }
    };

    let welcome = ServerMessage::Welcome {
        connection_id: id.to_string(),
        scope: granted.scope,
        tenant_id: granted.tenant.map(|t| t.to_string()),
    };
    send_frame(&mut sink, &welcome).await;

    tracing::info!(
        connection_id = %id,
        user = %log_safe_id(&granted.user_id, &ctx.config.logging.hash_salt),
        scope = granted.scope.as_str(),
        "Session established"
    );

    run_session(&ctx, id, &granted, &mut sink, &mut stream, rx).await;

    // No-op if a forced closure already removed the connection.
    ctx.connections.unregister(id, CloseReason::ClientDisconnect).await;
}

async fn run_session(
    ctx: &AppContext,
    id: ConnectionId,
    granted: &GrantedAccess,
    sink: &mut WsSink,
    stream: &mut WsSource,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
) {
    let max_strikes = ctx.config.limits.max_parse_errors;
    let mut strikes: u32 = 0;
    let inbound_key = format!("recv:{}", id);

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                match outbound {
                    Some(Outbound::Frame(frame)) => {
                        if !send_frame(sink, &frame).await {
                            break;
                        }
                    }
                    Some(Outbound::Ping) => {
                        if sink.send(WsMessage::Ping(Vec::new())).await.is_err() {
                            break;
                        }
                    }
                    Some(Outbound::Close { reason }) => {
                        tracing::debug!(connection_id = %id, reason = reason.as_str(), "Closing");
                        let _ = sink.close().await;
                        break;
                    }
                    None => break,
                }
            }
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(WsMessage::Text(text))) => {
                        if !ctx.limiter.check_payload_size(text.len()) {
                            // Oversized frames never consume the message budget
                            send_error(sink, "payload_too_large", "Frame exceeds payload limit")
                                .await;
                            strikes += 1;
                        } else if let Some(retry_after) =
                            charge_inbound(ctx, &inbound_key, granted).await
                        {
                            // Over quota: the connection moves to closing,
                            // not just the frame dropped
                            let frame = ServerMessage::Denied {
                                code: DenialReason::RateLimited.code().to_string(),
                                message: DenialReason::RateLimited.message().to_string(),
                                retry_after_secs: Some(retry_after.as_secs().max(1)),
                            };
                            send_frame(sink, &frame).await;
                            ctx.connections.unregister(id, CloseReason::RateLimited).await;
                        } else {
                            match serde_json::from_str::<ClientMessage>(&text) {
                                Ok(ClientMessage::Heartbeat) => {
                                    ctx.connections.touch_heartbeat(id).await;
                                    send_frame(sink, &ServerMessage::HeartbeatAck).await;
                                }
                                Ok(ClientMessage::Hello { .. }) => {
                                    send_error(sink, "protocol_error", "Already admitted").await;
                                    strikes += 1;
                                }
                                Err(_) => {
                                    send_error(sink, "protocol_error", "Unparseable frame").await;
                                    strikes += 1;
                                }
                            }
                        }
                        if strikes >= max_strikes {
                            tracing::warn!(connection_id = %id, "Too many malformed frames");
                            ctx.connections.unregister(id, CloseReason::PolicyViolation).await;
                        }
                    }
                    Some(Ok(WsMessage::Ping(payload))) => {
                        let _ = sink.send(WsMessage::Pong(payload)).await;
                    }
                    Some(Ok(WsMessage::Pong(_))) => {
                        ctx.connections.touch_heartbeat(id).await;
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(connection_id = %id, error = %e, "Socket error");
                        break;
                    }
                }
            }
        }
    }
}

/// Charges one inbound frame against the connection's message quota.
/// Returns the retry window when the quota is exceeded, after recording
/// the violation.
async fn charge_inbound(
    ctx: &AppContext,
    key: &str,
    granted: &GrantedAccess,
) -> Option<Duration> {
    let decision = ctx.limiter.check(key, LimitClass::MessageRate).await;
    if decision.allowed {
        return None;
    }
    RATE_LIMITED_TOTAL.inc();
    let audit = AuditEvent::rate_limit_violation(
        &granted.user_id,
        granted.tenant,
        LimitClass::MessageRate.as_str(),
        key,
    );
    if let Err(e) = ctx.monitor.record(audit) {
        e.log();
    }
    Some(decision.retry_after)
}

async fn send_frame(sink: &mut WsSink, frame: &ServerMessage) -> bool {
    match serde_json::to_string(frame) {
        Ok(json) => sink.send(WsMessage::Text(json)).await.is_ok(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize server frame");
            false
        }
    }
}

async fn send_error(sink: &mut WsSink, code: &str, message: &str) {
    let frame = ServerMessage::Error {
        code: code.to_string(),
        message: message.to_string(),
    };
    send_frame(sink, &frame).await;
}
