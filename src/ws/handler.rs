//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::{GameConfig, GameEvent, GameHandle, GamePhase, GameSetup};
use crate::util::rate_limit::SessionRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, ErrorCode, ServerMsg};

/// Outbound messages queued per session
const OUTBOUND_BUFFER: usize = 256;

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let session_id = Uuid::new_v4();
    info!(session_id = %session_id, "New WebSocket connection");

    let (mut ws_sink, ws_stream) = socket.split();

    let welcome = ServerMsg::Welcome {
        session_id,
        server_time: unix_millis(),
    };

    if let Err(e) = send_msg(&mut ws_sink, &welcome).await {
        error!(session_id = %session_id, error = %e, "Failed to send welcome");
        return;
    }

    run_session(session_id, state, ws_sink, ws_stream).await;

    info!(session_id = %session_id, "WebSocket connection closed");
}

/// Run the WebSocket session with read/write split
async fn run_session(
    session_id: Uuid,
    state: AppState,
    mut ws_sink: futures::stream::SplitSink<WebSocket, Message>,
    mut ws_stream: futures::stream::SplitStream<WebSocket>,
) {
    let (out_tx, mut out_rx) = mpsc::channel::<ServerMsg>(OUTBOUND_BUFFER);

    // Spawn writer task: session messages -> WebSocket
    let writer_handle = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                debug!(session_id = %session_id, error = %e, "WebSocket send failed");
                break;
            }
        }
    });

    let rate_limiter = SessionRateLimiter::new();
    let mut session = Session::new(session_id, state, out_tx.clone());

    // Reader loop: WebSocket -> session
    while let Some(result) = ws_stream.next().await {
        let reply = match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check_message() {
                    warn!(session_id = %session_id, "Rate limited client message");
                    Some(ServerMsg::error(
                        ErrorCode::RateLimited,
                        "Too many messages, slow down",
                    ))
                } else {
                    match serde_json::from_str::<ClientMsg>(&text) {
                        Ok(client_msg) => session.handle(client_msg),
                        Err(e) => {
                            warn!(session_id = %session_id, error = %e, "Failed to parse client message");
                            Some(ServerMsg::error(ErrorCode::BadMessage, e.to_string()))
                        }
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(session_id = %session_id, "Received binary message, ignoring");
                None
            }
            Ok(Message::Ping(_)) => {
                debug!(session_id = %session_id, "Received ping");
                None
            }
            Ok(Message::Pong(_)) => {
                debug!(session_id = %session_id, "Received pong");
                None
            }
            Ok(Message::Close(_)) => {
                info!(session_id = %session_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(session_id = %session_id, error = %e, "WebSocket error");
                break;
            }
        };

        if let Some(reply) = reply {
            if out_tx.send(reply).await.is_err() {
                debug!(session_id = %session_id, "Outbound channel closed");
                break;
            }
        }
    }

    // The game itself keeps running; only this session's view of it stops
    session.detach();
    writer_handle.abort();
}

/// Per-connection state: at most one game owned at a time
struct Session {
    id: Uuid,
    state: AppState,
    out_tx: mpsc::Sender<ServerMsg>,
    game: Option<GameHandle>,
    forwarder: Option<JoinHandle<()>>,
}

impl Session {
    fn new(id: Uuid, state: AppState, out_tx: mpsc::Sender<ServerMsg>) -> Self {
        Self {
            id,
            state,
            out_tx,
            game: None,
            forwarder: None,
        }
    }

    /// The session's game, unless it has already finished
    fn running_game(&self) -> Option<&GameHandle> {
        self.game
            .as_ref()
            .filter(|game| game.phase() != GamePhase::Ended)
    }

    /// Process one client message, returning the direct reply if there is one
    fn handle(&mut self, msg: ClientMsg) -> Option<ServerMsg> {
        match msg {
            ClientMsg::StartGame { config } => self.start_game(config),
            ClientMsg::UpdateSetup { setup } => self.update_setup(setup),
            ClientMsg::Ping { t } => Some(ServerMsg::Pong { t }),
        }
    }

    fn start_game(&mut self, config: GameConfig) -> Option<ServerMsg> {
        if let Some(game) = self.running_game() {
            return Some(ServerMsg::error(
                ErrorCode::GameInProgress,
                format!("Game {} is still running", game.id),
            ));
        }

        match self.state.spawn_game(config) {
            Ok((handle, events)) => {
                info!(session_id = %self.id, game_id = %handle.id, "Session started game");
                // A previous forwarder stops by itself after the final event
                self.forwarder = Some(tokio::spawn(forward_events(
                    self.id,
                    events,
                    self.out_tx.clone(),
                )));
                self.game = Some(handle);
                None
            }
            Err(e) => {
                warn!(session_id = %self.id, error = %e, "Rejected game config");
                Some(ServerMsg::error(ErrorCode::InvalidConfig, e.to_string()))
            }
        }
    }

    fn update_setup(&self, setup: GameSetup) -> Option<ServerMsg> {
        let Some(game) = self.running_game() else {
            return Some(ServerMsg::error(ErrorCode::NoGame, "No game is running"));
        };

        match game.update_setup(setup) {
            Ok(()) => None,
            Err(e) => {
                warn!(session_id = %self.id, game_id = %game.id, error = %e, "Rejected setup update");
                Some(ServerMsg::error(ErrorCode::InvalidSetup, e.to_string()))
            }
        }
    }

    /// Stop forwarding game events to this session
    fn detach(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
    }
}

/// Relay game events to the session until the game has ended
async fn forward_events(
    session_id: Uuid,
    mut events: broadcast::Receiver<GameEvent>,
    out_tx: mpsc::Sender<ServerMsg>,
) {
    loop {
        match events.recv().await {
            Ok(event) => {
                let last = matches!(event, GameEvent::GameEnded(_));
                if out_tx.send(ServerMsg::Game { event }).await.is_err() || last {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(
                    session_id = %session_id,
                    lagged_count = n,
                    "Client lagged, skipping {} events", n
                );
                // Continue - don't disconnect for lag
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!(session_id = %session_id, "Game event channel closed");
                break;
            }
        }
    }
}

/// Send a message over WebSocket
async fn send_msg(
    sink: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &ServerMsg,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::state::tests::{game_config, test_state};
    use std::time::Duration;

    fn session() -> (Session, mpsc::Receiver<ServerMsg>) {
        let (out_tx, out_rx) = mpsc::channel(OUTBOUND_BUFFER);
        (Session::new(Uuid::new_v4(), test_state(), out_tx), out_rx)
    }

    fn error_code(reply: Option<ServerMsg>) -> Option<ErrorCode> {
        match reply {
            Some(ServerMsg::Error { code, .. }) => Some(code),
            _ => None,
        }
    }

    async fn next_event(out_rx: &mut mpsc::Receiver<ServerMsg>) -> GameEvent {
        let msg = tokio::time::timeout(Duration::from_secs(5), out_rx.recv())
            .await
            .unwrap()
            .unwrap();
        match msg {
            ServerMsg::Game { event } => event,
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let (mut session, _out_rx) = session();
        assert!(matches!(
            session.handle(ClientMsg::Ping { t: 9 }),
            Some(ServerMsg::Pong { t: 9 })
        ));
    }

    #[tokio::test]
    async fn test_one_game_per_session() {
        let (mut session, mut out_rx) = session();

        // Slow ticks keep the first game running
        assert!(session
            .handle(ClientMsg::StartGame {
                config: game_config(100, 200),
            })
            .is_none());
        assert!(matches!(next_event(&mut out_rx).await, GameEvent::GameStarted { .. }));

        let reply = session.handle(ClientMsg::StartGame {
            config: game_config(100, 200),
        });
        assert_eq!(error_code(reply), Some(ErrorCode::GameInProgress));
        assert_eq!(session.state.game_registry.active_games(), 1);
    }

    #[tokio::test]
    async fn test_events_forwarded_until_game_ends() {
        let (mut session, mut out_rx) = session();
        session.handle(ClientMsg::StartGame {
            config: game_config(2, 0),
        });

        let mut events = Vec::new();
        loop {
            let event = next_event(&mut out_rx).await;
            let last = matches!(event, GameEvent::GameEnded(_));
            events.push(event);
            if last {
                break;
            }
        }

        assert!(matches!(events[0], GameEvent::GameStarted { .. }));
        let ticks = events
            .iter()
            .filter(|e| matches!(e, GameEvent::NextTick(_)))
            .count();
        assert_eq!(ticks, 2);

        // A finished game frees the session for the next one
        assert!(session
            .handle(ClientMsg::StartGame {
                config: game_config(2, 0),
            })
            .is_none());
    }

    #[tokio::test]
    async fn test_setup_update_errors() {
        let (mut session, _out_rx) = session();
        let setup = game_config(10, 0).setup;

        let reply = session.handle(ClientMsg::UpdateSetup {
            setup: setup.clone(),
        });
        assert_eq!(error_code(reply), Some(ErrorCode::NoGame));

        session.handle(ClientMsg::StartGame {
            config: game_config(100, 200),
        });

        let mut bad = setup.clone();
        bad.sub_ticks_per_tick = 0;
        let reply = session.handle(ClientMsg::UpdateSetup { setup: bad });
        assert_eq!(error_code(reply), Some(ErrorCode::InvalidSetup));

        assert!(session.handle(ClientMsg::UpdateSetup { setup }).is_none());
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let (mut session, _out_rx) = session();
        let mut config = game_config(10, 0);
        config.setup.edge_length = 0;

        let reply = session.handle(ClientMsg::StartGame { config });
        assert_eq!(error_code(reply), Some(ErrorCode::InvalidConfig));
        assert!(session.game.is_none());
    }
}
