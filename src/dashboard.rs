use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::sleep;

use crate::controller::ControllerStatus;

type StatusFeed = watch::Receiver<ControllerStatus>;

pub fn router(status: StatusFeed) -> Router {
    Router::new()
        .route("/status", get(status_handler))
        .route("/ws", get(ws_handler))
        .with_state(status)
}

pub async fn start_dashboard(status: StatusFeed, port: u16) -> std::io::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    log::info!("Status server at http://{}", addr);

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, router(status)).await
}

async fn status_handler(State(status): State<StatusFeed>) -> Json<ControllerStatus> {
    let snapshot = status.borrow().clone();
    Json(snapshot)
}

async fn ws_handler(ws: WebSocketUpgrade, State(status): State<StatusFeed>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, status))
}

async fn handle_socket(mut socket: WebSocket, status: StatusFeed) {
    // Push loop
    loop {
        let json = {
            let snapshot = status.borrow();
            match serde_json::to_string(&*snapshot) {
                Ok(json) => json,
                Err(e) => {
                    log::error!("Status encode failed: {}", e);
                    break;
                }
            }
        };

        if socket.send(Message::Text(json)).await.is_err() {
            // Client disconnected
            break;
        }

        // 10Hz updates
        sleep(Duration::from_millis(100)).await;
    }
}
