//! Notifications emitted by the engine, in the order they happen

use serde::Serialize;
use uuid::Uuid;

use super::model::{Coordinate, HighScoreInfo, NextTickInfo, PlayerPosition};

/// Game events pushed to observers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum GameEvent {
    /// Players are placed and the first tick is about to run
    GameStarted { id: Uuid },

    /// Snapshot taken at the start of each sub-tick, before bots are polled
    NextTick(NextTickInfo),

    /// Player stepped; carries the position after the move, even when it left the grid
    PlayerMoveAttempt(PlayerPosition),

    PlayerPlacedBomb {
        name: String,
        #[serde(flatten)]
        target: Coordinate,
    },

    PlayerDidNothing(PlayerPosition),

    /// Player was eliminated, with a human-readable cause
    PlayerLost { name: String, cause: String },

    /// Final standings, always the last event of a game
    GameEnded(HighScoreInfo),
}
