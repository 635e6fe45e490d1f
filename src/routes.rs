use std::sync::Arc;

use actix_web::{HttpRequest, HttpResponse, Responder, guard, http::Method, web};
use actix_ws::{Message as WsMessage, MessageStream, Session};
use log::{debug, warn};
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use crate::engine::{CommandEngine, Message, NO_ERROR};
use crate::error::AppError;
use crate::line::EdgeEvent;
use crate::snapshot::PublicSnapshot;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<CommandEngine>,
    /// Fan-out for unsolicited snapshot pushes after input-edge events.
    pub snapshots: broadcast::Sender<PublicSnapshot>,
}

pub fn api_scope(base_path: &str) -> actix_web::Scope {
    web::scope(base_path)
        .service(
            web::resource("/snapshot")
                .route(web::get().to(get_snapshot))
                .route(
                    web::route()
                        .guard(guard_not_methods(&[Method::GET]))
                        .to(method_not_allowed),
                ),
        )
        .service(
            web::resource("/ws").route(web::get().to(command_ws)).route(
                web::route()
                    .guard(guard_not_methods(&[Method::GET]))
                    .to(method_not_allowed),
            ),
        )
}

/// Consumes edge events, refreshes the registry and publishes the fresh
/// snapshot to every connected client. Runs until the dispatcher drops.
pub fn spawn_edge_monitor(
    engine: Arc<CommandEngine>,
    mut edges: broadcast::Receiver<EdgeEvent>,
    snapshots: broadcast::Sender<PublicSnapshot>,
) {
    actix_web::rt::spawn(async move {
        loop {
            match edges.recv().await {
                Ok(event) => {
                    debug!(
                        "edge on pin {}: level {} at {}",
                        event.pin_id, event.level, event.timestamp_ms
                    );
                    let _ = snapshots.send(engine.snapshot());
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("edge monitor lagged by {n} events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

async fn get_snapshot(state: web::Data<AppState>) -> Result<impl Responder, AppError> {
    Ok(web::Json(state.engine.snapshot()))
}

async fn command_ws(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let rx = state.snapshots.subscribe();
    let engine = state.engine.clone();
    let (response, session, client_stream) = actix_ws::handle(&req, stream)
        .map_err(|e| AppError::Gpio(format!("websocket error: {e}")))?;

    actix_web::rt::spawn(async move {
        handle_command_session(session, client_stream, engine, rx).await;
    });

    Ok(response)
}

/// One session per client: request frames are answered in order, and
/// snapshot pushes are interleaved. A lagged client silently loses the
/// oldest pushes rather than stalling the event source.
async fn handle_command_session(
    mut session: Session,
    mut client_stream: MessageStream,
    engine: Arc<CommandEngine>,
    rx: broadcast::Receiver<PublicSnapshot>,
) {
    let mut pushes = BroadcastStream::new(rx);

    loop {
        tokio::select! {
            msg = client_stream.recv() => {
                let Some(msg) = msg else { break; };

                match msg {
                    Ok(WsMessage::Text(text)) => {
                        let reply = match serde_json::from_str::<Message>(&text) {
                            Ok(request) => engine.execute(request).await,
                            Err(e) => Message {
                                error: format!("Invalid request: {e}"),
                                ..Default::default()
                            },
                        };
                        if let Ok(text) = serde_json::to_string(&reply) {
                            if session.text(text).await.is_err() {
                                warn!("WebSocket client disconnected");
                                break;
                            }
                        }
                    }
                    Ok(WsMessage::Ping(bytes)) => {
                        let _ = session.pong(&bytes).await;
                    }
                    Ok(WsMessage::Close(reason)) => {
                        let _ = session.close(reason).await;
                        break;
                    }
                    Ok(WsMessage::Binary(_))
                    | Ok(WsMessage::Pong(_))
                    | Ok(WsMessage::Continuation(_))
                    | Ok(WsMessage::Nop) => {}
                    Err(_) => break,
                }
            }
            push = pushes.next() => {
                let Some(push) = push else { break; };

                match push {
                    Ok(snapshot) => {
                        let notice = Message {
                            msg_type: "GetGPIOInfo".to_string(),
                            state: serde_json::to_value(snapshot).ok(),
                            error: NO_ERROR.to_string(),
                            ..Default::default()
                        };
                        if let Ok(text) = serde_json::to_string(&notice) {
                            if session.text(text).await.is_err() {
                                warn!("WebSocket client disconnected");
                                break;
                            }
                        }
                    }
                    Err(BroadcastStreamRecvError::Lagged(n)) => {
                        warn!("WebSocket client lagged by {n} snapshots");
                    }
                }
            }
        }
    }
}

async fn method_not_allowed() -> HttpResponse {
    HttpResponse::MethodNotAllowed().finish()
}

fn guard_not_methods(methods: &[Method]) -> impl guard::Guard {
    let allowed: Vec<Method> = methods.to_vec();
    guard::fn_guard(move |ctx| !allowed.iter().any(|m| m == ctx.head().method))
}
