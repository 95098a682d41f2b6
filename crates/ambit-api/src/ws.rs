// WebSocket run protocol
//
// One request message after connect, then a stream of typed messages until
// `complete` or `error`. Heartbeats fire every 15 s of idle; any server send
// resets the timer. Client disconnect drops the channel and the turn aborts
// at its next suspension point.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

use ambit_core::protocol::{RunRequest, StreamMessage};
use ambit_worker::RunParams;

use crate::state::AppState;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/ws/agent/run", get(upgrade))
        .with_state(state)
}

async fn upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: AppState, mut socket: WebSocket) {
    // First frame is the run request
    let request = loop {
        match socket.recv().await {
            Some(Ok(Message::Text(text))) => match serde_json::from_str::<RunRequest>(&text) {
                Ok(request) => break request,
                Err(e) => {
                    let _ = send_json(
                        &mut socket,
                        &StreamMessage::error(format!("bad request: {e}"), "validation"),
                    )
                    .await;
                    return;
                }
            },
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            _ => return,
        }
    };

    info!(
        agent_id = %request.agent_id,
        user_id = %request.user_id,
        source = ?request.working_source,
        "Run started"
    );

    let (tx, mut rx) = mpsc::channel::<StreamMessage>(64);
    let runtime = state.runtime.clone();
    let params = RunParams {
        agent_id: request.agent_id,
        user_id: request.user_id,
        input_content: request.input_content,
        working_source: request.working_source,
        forced_narrative_id: None,
    };
    let mut turn = tokio::spawn(async move { runtime.run(params, tx).await });

    let mut heartbeat = interval(HEARTBEAT_INTERVAL);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    heartbeat.tick().await; // first tick is immediate

    loop {
        tokio::select! {
            message = rx.recv() => {
                let Some(message) = message else {
                    // Producer finished; drain is done
                    break;
                };
                let is_final = message.is_final();
                if send_json(&mut socket, &message).await.is_err() {
                    debug!("Client went away, aborting turn");
                    turn.abort();
                    return;
                }
                heartbeat.reset();
                if is_final {
                    break;
                }
            }
            _ = heartbeat.tick() => {
                if send_json(&mut socket, &StreamMessage::Heartbeat).await.is_err() {
                    debug!("Client went away during heartbeat, aborting turn");
                    turn.abort();
                    return;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("Client closed, aborting turn");
                        turn.abort();
                        return;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        warn!(error = %e, "Socket error, aborting turn");
                        turn.abort();
                        return;
                    }
                }
            }
        }
    }

    match (&mut turn).await {
        Ok(Ok(outcome)) => {
            debug!(event_id = %outcome.event_id, "Run finished");
        }
        Ok(Err(e)) => {
            // The runtime already streamed the error message
            warn!(error = %e, "Run failed");
        }
        Err(e) if e.is_cancelled() => {}
        Err(e) => {
            warn!(error = %e, "Run task panicked");
            let _ = send_json(
                &mut socket,
                &StreamMessage::error("internal error", "internal"),
            )
            .await;
        }
    }

    let _ = socket.send(Message::Close(None)).await;
}

async fn send_json(socket: &mut WebSocket, message: &StreamMessage) -> Result<(), axum::Error> {
    let text = serde_json::to_string(message).unwrap_or_else(|_| "{}".into());
    socket.send(Message::Text(text)).await
}
