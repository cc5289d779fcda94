use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use crate::{
    error::{ServiceError, ServiceResult},
    middlewares::auth::JwtClaims,
    models::{
        parse_object_id,
        realtime::{ClientEvent, ServerEvent},
    },
    services::{notification_service::NotificationService, AppState},
};

/// Unauthenticated sockets must send `register` within this window
const REGISTER_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
pub struct RealtimeParams {
    pub token: Option<String>,
}

/// GET /api/realtime - WebSocket; token via ?token= or a `register` event
pub async fn realtime_socket(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(params): Query<RealtimeParams>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, params.token))
}

async fn send_event(socket: &mut WebSocket, event: &ServerEvent) -> bool {
    let payload = match serde_json::to_string(event) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode realtime event");
            return true;
        }
    };
    socket.send(Message::Text(payload.into())).await.is_ok()
}

fn parse_event(text: &str) -> Result<ClientEvent, String> {
    serde_json::from_str(text).map_err(|e| format!("Unrecognised event: {}", e))
}

/// Waits for a valid `register` frame; None when the socket closes or times out
async fn await_registration(socket: &mut WebSocket, state: &AppState) -> Option<JwtClaims> {
    loop {
        let frame = match timeout(REGISTER_TIMEOUT, socket.recv()).await {
            Ok(Some(Ok(frame))) => frame,
            Ok(_) => return None,
            Err(_) => {
                send_event(socket, &ServerEvent::error("Registration timed out")).await;
                return None;
            }
        };

        let text = match frame {
            Message::Text(text) => text,
            Message::Close(_) => return None,
            _ => continue,
        };

        match parse_event(text.as_str()) {
            Ok(ClientEvent::Register { token }) => match state.jwt.validate_token(&token) {
                Ok(claims) => return Some(claims),
                Err(e) => {
                    if !send_event(socket, &ServerEvent::error(e.to_string())).await {
                        return None;
                    }
                }
            },
            Ok(ClientEvent::Ping) => {
                if !send_event(socket, &ServerEvent::Pong).await {
                    return None;
                }
            }
            Ok(_) => {
                if !send_event(socket, &ServerEvent::error("Register first")).await {
                    return None;
                }
            }
            Err(message) => {
                if !send_event(socket, &ServerEvent::error(message)).await {
                    return None;
                }
            }
        }
    }
}

async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>, token: Option<String>) {
    let claims = match token {
        Some(token) => match state.jwt.validate_token(&token) {
            Ok(claims) => claims,
            Err(e) => {
                tracing::warn!(error = %e, "Realtime connection rejected");
                send_event(&mut socket, &ServerEvent::error(e.to_string())).await;
                return;
            }
        },
        None => match await_registration(&mut socket, &state).await {
            Some(claims) => claims,
            None => return,
        },
    };

    let user_id = claims.sub.clone();
    let (connection_id, mut events) = state.hub.register(&user_id).await;
    tracing::info!(user_id = %user_id, connection_id = %connection_id, "Realtime client registered");

    if send_event(
        &mut socket,
        &ServerEvent::Registered {
            user_id: user_id.clone(),
        },
    )
    .await
    {
        run_session(&mut socket, &state, &claims, &mut events).await;
    }

    state.hub.unregister(&user_id, connection_id).await;
    tracing::info!(user_id = %user_id, connection_id = %connection_id, "Realtime client disconnected");
}

async fn run_session(
    socket: &mut WebSocket,
    state: &AppState,
    claims: &JwtClaims,
    events: &mut tokio::sync::mpsc::UnboundedReceiver<ServerEvent>,
) {
    loop {
        tokio::select! {
            pushed = events.recv() => match pushed {
                Some(event) => {
                    if !send_event(socket, &event).await {
                        break;
                    }
                }
                // hub shut down
                None => {
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
            },
            incoming = socket.recv() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => continue,
                };
                let reply = handle_client_event(state, claims, text.as_str()).await;
                if let Some(reply) = reply {
                    if !send_event(socket, &reply).await {
                        break;
                    }
                }
            }
        }
    }
}

async fn mark_read(state: &AppState, claims: &JwtClaims, notification_id: &str) -> ServiceResult<()> {
    let me = claims.user_id()?;
    let id = parse_object_id(notification_id, "notification_id")?;
    NotificationService::new(state).mark_read(&me, &id).await
}

/// Reply to send back, if any. Read confirmations arrive through the hub.
async fn handle_client_event(
    state: &AppState,
    claims: &JwtClaims,
    text: &str,
) -> Option<ServerEvent> {
    match parse_event(text) {
        Ok(ClientEvent::Ping) => Some(ServerEvent::Pong),
        Ok(ClientEvent::Register { .. }) => Some(ServerEvent::error("Already registered")),
        Ok(ClientEvent::MarkNotificationRead { notification_id }) => {
            match mark_read(state, claims, &notification_id).await {
                Ok(()) => None,
                Err(ServiceError::Internal(e)) => {
                    tracing::error!(user_id = %claims.sub, error = ?e, "markNotificationRead failed");
                    Some(ServerEvent::error("Internal server error"))
                }
                Err(e) => Some(ServerEvent::error(e.to_string())),
            }
        }
        Err(message) => Some(ServerEvent::error(message)),
    }
}
