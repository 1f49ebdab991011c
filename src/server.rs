use crate::config::BridgeConfig;
use crate::error::BusError;
use crate::session::{Session, SessionManager, SessionSnapshot};
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use axum::extract::{ConnectInfo, Request, State, WebSocketUpgrade};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use std::borrow::Cow;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tower_http::services::ServeDir;

#[derive(Clone)]
struct AppState {
    sessions: Arc<SessionManager>,
    greeting: Arc<str>,
    shutdown: watch::Receiver<bool>,
}

/// A running server. Dropping it stops the listener without waiting.
pub struct ServerHandle {
    addr: SocketAddr,
    stop_sessions: watch::Sender<bool>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Close every open session, then wait for the listener to finish.
    pub async fn shutdown(mut self) {
        let _ = self.stop_sessions.send(true);
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        let _ = self.stop_sessions.send(true);
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

pub async fn start_server(
    config: &BridgeConfig,
    sessions: Arc<SessionManager>,
) -> std::io::Result<ServerHandle> {
    let listener = tokio::net::TcpListener::bind(config.socket_addr()).await?;
    let addr = listener.local_addr()?;

    let (stop_sessions, shutdown) = watch::channel(false);
    let state = AppState {
        sessions,
        greeting: Arc::from(config.greeting.as_str()),
        shutdown,
    };
    let app = build_router(state, &config.public_dir);

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        let result = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.await;
        })
        .await;
        if let Err(e) = result {
            log::error!("Server stopped: {}", e);
        }
    });

    Ok(ServerHandle {
        addr,
        stop_sessions,
        shutdown_tx: Some(shutdown_tx),
        task: Some(task),
    })
}

fn build_router(state: AppState, public_dir: &Path) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/sessions", get(list_sessions))
        .fallback_service(ServeDir::new(public_dir))
        .layer(middleware::from_fn_with_state(state.clone(), accept_websocket))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionSnapshot>> {
    Json(state.sessions.sessions())
}

/// Websocket upgrades are accepted on every path (`/`, `/ws`, ...); plain
/// requests continue to the routes and static files.
async fn accept_websocket(
    State(state): State<AppState>,
    ws: Option<WebSocketUpgrade>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    req: Request,
    next: Next,
) -> Response {
    match ws {
        Some(ws) => ws
            .on_upgrade(move |socket| run_connection(socket, state, peer))
            .into_response(),
        None => next.run(req).await,
    }
}

enum Ending {
    /// The client went away (close frame, error or EOF).
    Closed,
    ServerShutdown,
    BusFailure(BusError),
}

async fn run_connection(mut socket: WebSocket, state: AppState, peer: SocketAddr) {
    if socket
        .send(Message::Text(state.greeting.to_string()))
        .await
        .is_err()
    {
        return;
    }

    let mut session = match state.sessions.open(peer.to_string()) {
        Ok(session) => session,
        Err(e) => {
            let _ = socket.send(close(close_code::ERROR, e.to_string())).await;
            return;
        }
    };

    let mut shutdown = state.shutdown.clone();
    let ending = loop {
        let msg = tokio::select! {
            msg = socket.recv() => msg,
            _ = shutdown.changed() => break Ending::ServerShutdown,
        };
        match msg {
            Some(Ok(Message::Text(text))) => {
                if let Err(e) = session.handle_message(&text) {
                    break Ending::BusFailure(e);
                }
            }
            Some(Ok(Message::Binary(bytes))) => {
                if let Err(e) = handle_binary(&mut session, &bytes) {
                    break Ending::BusFailure(e);
                }
            }
            Some(Ok(Message::Close(_))) | None => break Ending::Closed,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                log::debug!("[{}] Websocket error: {}", session.id(), e);
                break Ending::Closed;
            }
        }
    };

    match ending {
        Ending::Closed => {}
        Ending::ServerShutdown => {
            let _ = socket.send(close(close_code::AWAY, "shutting down")).await;
        }
        Ending::BusFailure(e) => {
            log::error!("[{}] Ending session: {}", session.id(), e);
            let _ = socket.send(close(close_code::ERROR, e.to_string())).await;
        }
    }

    // Errors are logged by the session; the connection is gone either way.
    let _ = session.close();
}

fn handle_binary(session: &mut Session, bytes: &[u8]) -> Result<(), BusError> {
    match std::str::from_utf8(bytes) {
        Ok(text) => session.handle_message(text),
        Err(e) => {
            session.reject_message(&format!("binary frame is not UTF-8: {}", e));
            Ok(())
        }
    }
}

fn close(code: u16, reason: impl Into<Cow<'static, str>>) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.into(),
    }))
}
