//! Game data model shared by the engine, the bot client and the wire protocol
//!
//! Wire names follow the existing bot ecosystem (camelCase JSON), so bots written
//! against earlier servers keep working.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A cell on the cubic grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Coordinate {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Coordinate {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Coordinate one cell away along `axis`
    pub fn step(self, axis: Axis, sign: Sign) -> Self {
        let delta = match sign {
            Sign::Plus => 1,
            Sign::Minus => -1,
        };
        match axis {
            Axis::X => Self { x: self.x + delta, ..self },
            Axis::Y => Self { y: self.y + delta, ..self },
            Axis::Z => Self { z: self.z + delta, ..self },
        }
    }
}

/// Anything that occupies a grid cell
pub trait Positioned {
    fn coordinate(&self) -> Coordinate;
}

impl Positioned for Coordinate {
    fn coordinate(&self) -> Coordinate {
        *self
    }
}

/// Identity and bot endpoint of one player, fixed for the whole game
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSetup {
    pub name: String,
    /// Endpoint the bot is polled on
    pub url: String,
}

/// Where a living player currently stands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerPosition {
    pub name: String,
    #[serde(flatten)]
    pub coordinate: Coordinate,
}

impl PlayerPosition {
    pub fn new(name: impl Into<String>, coordinate: Coordinate) -> Self {
        Self {
            name: name.into(),
            coordinate,
        }
    }
}

impl Positioned for PlayerPosition {
    fn coordinate(&self) -> Coordinate {
        self.coordinate
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Z,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sign {
    Plus,
    Minus,
}

/// One validated bot command, applied during a single sub-tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotDirection {
    /// Step one cell along an axis
    Move { axis: Axis, sign: Sign },
    /// Drop a bomb on the target cell
    Bomb(Coordinate),
    /// Stay put
    Noop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemType {
    Bomb,
}

/// Hazard lying on the grid
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameItem {
    #[serde(flatten)]
    pub coordinate: Coordinate,
    #[serde(rename = "type")]
    pub item_type: ItemType,
}

impl GameItem {
    pub fn bomb(coordinate: Coordinate) -> Self {
        Self {
            coordinate,
            item_type: ItemType::Bomb,
        }
    }

    pub fn is_bomb(&self) -> bool {
        self.item_type == ItemType::Bomb
    }
}

impl Positioned for GameItem {
    fn coordinate(&self) -> Coordinate {
        self.coordinate
    }
}

/// Every player contesting one cell during a tick
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollisionInfo {
    #[serde(flatten)]
    pub coordinate: Coordinate,
    pub has_bomb: bool,
    pub players: Vec<PlayerPosition>,
}

impl Positioned for CollisionInfo {
    fn coordinate(&self) -> Coordinate {
        self.coordinate
    }
}

/// Per-tick working set, cleared at the start of every tick
#[derive(Debug, Clone, Default)]
pub struct PreValidationInfo {
    /// Players still standing after the removal pass
    pub players: Vec<PlayerPosition>,
    pub collisions: Vec<CollisionInfo>,
    pub out_of_bounds_players: Vec<PlayerPosition>,
}

/// Final ranking entry; the score is the tick the player's game ended on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerWithHighScore {
    #[serde(flatten)]
    pub player: PlayerSetup,
    pub high_score: u32,
}

/// Tunables that may be replaced while a game is running
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSetup {
    pub edge_length: u32,
    #[serde(rename = "maxNumOfTicks")]
    pub max_ticks: u32,
    /// Pause between ticks in milliseconds
    #[serde(rename = "speed")]
    pub tick_delay_ms: u64,
    #[serde(rename = "numOfTasksPerTick")]
    pub sub_ticks_per_tick: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_start_positions: Option<Vec<PlayerPosition>>,
}

impl GameSetup {
    pub fn tick_delay(&self) -> Duration {
        Duration::from_millis(self.tick_delay_ms)
    }

    /// Check this setup against the players it will be used with
    pub fn validate(&self, players: &[PlayerSetup]) -> Result<(), SetupError> {
        if self.edge_length == 0 || self.edge_length > i32::MAX as u32 {
            return Err(SetupError::InvalidEdgeLength(self.edge_length));
        }
        if self.sub_ticks_per_tick == 0 {
            return Err(SetupError::InvalidSubTicks);
        }
        if self.max_ticks == 0 {
            return Err(SetupError::InvalidMaxTicks);
        }

        match &self.player_start_positions {
            Some(positions) => self.validate_start_positions(positions, players),
            None => {
                let cells = u128::from(self.edge_length).pow(3);
                if cells < players.len() as u128 {
                    return Err(SetupError::GridTooSmall {
                        edge_length: self.edge_length,
                        players: players.len(),
                    });
                }
                Ok(())
            }
        }
    }

    fn validate_start_positions(
        &self,
        positions: &[PlayerPosition],
        players: &[PlayerSetup],
    ) -> Result<(), SetupError> {
        let mut placed = HashSet::new();
        let mut occupied = HashSet::new();

        for position in positions {
            if !players.iter().any(|p| p.name == position.name) {
                return Err(SetupError::UnknownStartPosition(position.name.clone()));
            }
            if !placed.insert(position.name.as_str()) {
                return Err(SetupError::DuplicatePlayer(position.name.clone()));
            }
            let c = position.coordinate;
            let edge = i64::from(self.edge_length);
            if [c.x, c.y, c.z].iter().any(|&v| v < 0 || i64::from(v) >= edge) {
                return Err(SetupError::StartPositionOutOfBounds(position.name.clone()));
            }
            if !occupied.insert(c) {
                return Err(SetupError::SharedStartPosition(position.name.clone()));
            }
        }

        if let Some(missing) = players.iter().find(|p| !placed.contains(p.name.as_str())) {
            return Err(SetupError::MissingStartPosition(missing.name.clone()));
        }

        Ok(())
    }
}

/// Everything needed to start a game
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameConfig {
    pub setup: GameSetup,
    pub players: Vec<PlayerSetup>,
}

impl GameConfig {
    pub fn validate(&self) -> Result<(), SetupError> {
        let mut names = HashSet::new();
        for player in &self.players {
            if player.name.trim().is_empty() {
                return Err(SetupError::EmptyPlayerName);
            }
            if !names.insert(player.name.as_str()) {
                return Err(SetupError::DuplicatePlayer(player.name.clone()));
            }
        }

        self.setup.validate(&self.players)
    }
}

/// Rejected game configuration
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SetupError {
    #[error("Edge length {0} is out of range")]
    InvalidEdgeLength(u32),

    #[error("At least one task per tick is required")]
    InvalidSubTicks,

    #[error("At least one tick is required")]
    InvalidMaxTicks,

    #[error("Player names must not be empty")]
    EmptyPlayerName,

    #[error("Player {0} appears more than once")]
    DuplicatePlayer(String),

    #[error("Grid with edge {edge_length} cannot fit {players} players")]
    GridTooSmall { edge_length: u32, players: usize },

    #[error("Start position given for unknown player {0}")]
    UnknownStartPosition(String),

    #[error("No start position given for player {0}")]
    MissingStartPosition(String),

    #[error("Start position of player {0} is outside the grid")]
    StartPositionOutOfBounds(String),

    #[error("Start position of player {0} is already taken")]
    SharedStartPosition(String),
}

/// Tick metadata sent along with every snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameInfo {
    pub id: Uuid,
    pub edge_length: u32,
    #[serde(rename = "numOfTasksPerTick")]
    pub sub_ticks_per_tick: u32,
    #[serde(rename = "numOfBotsInPlay")]
    pub bots_in_play: usize,
    pub current_tick: u32,
}

/// Snapshot broadcast to bots and observers at every sub-tick
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NextTickInfo {
    pub players: Vec<PlayerPosition>,
    pub items: Vec<GameItem>,
    pub game_info: GameInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameResult {
    WinnerFound,
    Tie,
}

/// Final standings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighScoreInfo {
    pub winner: Option<PlayerWithHighScore>,
    pub scores: Vec<PlayerWithHighScore>,
    pub id: Uuid,
    pub result: GameResult,
}
