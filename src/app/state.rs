//! Application state shared across routes

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::info;
use uuid::Uuid;

use crate::config::Config;
use crate::game::{
    BotClient, GameConfig, GameEngine, GameEvent, GameHandle, GameRegistry, HttpBotClient,
    SetupError,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub bot_client: Arc<dyn BotClient>,
    pub game_registry: Arc<GameRegistry>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let bot_client = Arc::new(HttpBotClient::new(config.bot_timeout));
        Self::with_bot_client(config, bot_client)
    }

    /// Build the state around a custom bot transport
    pub fn with_bot_client(config: Config, bot_client: Arc<dyn BotClient>) -> Self {
        Self {
            config: Arc::new(config),
            bot_client,
            game_registry: Arc::new(GameRegistry::new()),
        }
    }

    /// Validate `config` and run a new game in the background.
    ///
    /// The returned receiver is subscribed before the game starts, so it sees
    /// every event. The game leaves the registry once it has ended.
    pub fn spawn_game(
        &self,
        config: GameConfig,
    ) -> Result<(GameHandle, broadcast::Receiver<GameEvent>), SetupError> {
        config.validate()?;

        let id = Uuid::new_v4();
        let (mut engine, handle) =
            GameEngine::new(id, config, rand::random(), self.bot_client.clone());
        let events = handle.subscribe();

        self.game_registry.insert(handle.clone());

        let registry = self.game_registry.clone();
        tokio::spawn(async move {
            engine.run().await;
            registry.remove(&id);
            info!(game_id = %id, "Game removed from registry");
        });

        Ok((handle, events))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::game::bot::{BotError, BotRequest};
    use futures::future::{BoxFuture, FutureExt};
    use serde_json::{json, Value};
    use std::time::Duration;

    /// Bot transport that answers every poll with NOOPs
    pub(crate) struct IdleBots;

    impl BotClient for IdleBots {
        fn request_directions<'a>(
            &'a self,
            request: &'a BotRequest,
        ) -> BoxFuture<'a, Result<Value, BotError>> {
            let count = request.tick.game_info.sub_ticks_per_tick;
            async move {
                Ok(Value::Array(
                    (0..count).map(|_| json!({ "task": "NOOP" })).collect(),
                ))
            }
            .boxed()
        }
    }

    pub(crate) fn test_state() -> AppState {
        let config = Config::from_lookup(|_| None).unwrap();
        AppState::with_bot_client(config, Arc::new(IdleBots))
    }

    pub(crate) fn game_config(max_ticks: u32, speed_ms: u64) -> GameConfig {
        serde_json::from_value(json!({
            "setup": {
                "edgeLength": 4,
                "maxNumOfTicks": max_ticks,
                "speed": speed_ms,
                "numOfTasksPerTick": 1
            },
            "players": [
                { "name": "alpha", "url": "http://bots.test/alpha" },
                { "name": "beta", "url": "http://bots.test/beta" }
            ]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_spawned_game_runs_to_completion() {
        let state = test_state();
        let (handle, mut events) = state.spawn_game(game_config(3, 0)).unwrap();
        assert!(state.game_registry.contains(&handle.id));

        let first = events.recv().await.unwrap();
        assert_eq!(first, GameEvent::GameStarted { id: handle.id });

        let ended = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let GameEvent::GameEnded(scores) = events.recv().await.unwrap() {
                    return scores;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(ended.id, handle.id);
        assert_eq!(ended.scores.len(), 2);

        // Registry cleanup happens right after the final event
        tokio::time::timeout(Duration::from_secs(5), async {
            while state.game_registry.contains(&handle.id) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_invalid_config_is_not_spawned() {
        let state = test_state();
        let mut config = game_config(3, 0);
        config.players[1].name = "alpha".to_string();

        let result = state.spawn_game(config);
        assert!(matches!(result, Err(SetupError::DuplicatePlayer(_))));
        assert_eq!(state.game_registry.active_games(), 0);
    }
}
