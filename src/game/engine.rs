//! Game state and authoritative tick loop
//!
//! Each tick runs these phases in order: sub-tick wraparound (where a pending setup
//! swap lands), bomb pruning, snapshot, bot fetch (first sub-tick only), apply,
//! collision detection, removal, status check. Phases on [`GameState`] return the
//! events they produce; [`GameEngine`] awaits the bots and dispatches the events.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::Mutex;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::bot::{BotClient, BotError, BotRequest};
use super::events::GameEvent;
use super::geometry::Grid;
use super::model::{
    BotDirection, CollisionInfo, GameConfig, GameInfo, GameItem, GameResult, GameSetup,
    HighScoreInfo, NextTickInfo, PlayerPosition, PlayerSetup, PlayerWithHighScore,
    PreValidationInfo, SetupError,
};
use super::validator::{validate_bot_directions, ValidationError};

/// Capacity of the per-game event channel
const EVENT_BUFFER: usize = 1024;

/// Game lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GamePhase {
    NotStarted,
    Running,
    /// Terminal
    Ended,
}

/// Why a player was eliminated
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EliminationCause {
    #[error("Player moved out of bounds")]
    OutOfBounds,

    #[error("Player stepped on a BOMB")]
    SteppedOnBomb,

    #[error("Player crashed into another player")]
    CrashedIntoPlayer,

    #[error("{0}")]
    Network(#[from] BotError),

    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("Player has no direction for this sub-tick")]
    NoDirection,
}

/// Setup replacement waiting for the next sub-tick wraparound
#[derive(Debug, Default)]
pub struct SetupSlot(Mutex<Option<GameSetup>>);

impl SetupSlot {
    /// Store a replacement, overwriting any earlier one not yet applied
    pub fn replace(&self, setup: GameSetup) {
        *self.0.lock() = Some(setup);
    }

    pub fn take(&self) -> Option<GameSetup> {
        self.0.lock().take()
    }
}

/// Game state (owned by the engine)
pub struct GameState {
    pub id: Uuid,
    pub config: GameConfig,
    /// Fixed at creation; setup swaps do not resize the grid
    pub edge_length: u32,
    pub phase: GamePhase,
    pub player_positions: Vec<PlayerPosition>,
    pub items: Vec<GameItem>,
    pub current_tick: u32,
    /// Cycles 1..=sub_ticks_per_tick while running
    pub sub_tick: u32,
    pub lost_players: Vec<PlayerWithHighScore>,
    pub pre_validation: PreValidationInfo,
    pub cached_directions: HashMap<String, Vec<BotDirection>>,
    rng: ChaCha8Rng,
}

impl GameState {
    pub fn new(id: Uuid, config: GameConfig, seed: u64) -> Self {
        let edge_length = config.setup.edge_length;
        Self {
            id,
            config,
            edge_length,
            phase: GamePhase::NotStarted,
            player_positions: Vec::new(),
            items: Vec::new(),
            current_tick: 0,
            sub_tick: 0,
            lost_players: Vec::new(),
            pre_validation: PreValidationInfo::default(),
            cached_directions: HashMap::new(),
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn setup(&self) -> &GameSetup {
        &self.config.setup
    }

    pub fn player_setup(&self, name: &str) -> Option<&PlayerSetup> {
        self.config.players.iter().find(|p| p.name == name)
    }

    pub fn is_lost(&self, name: &str) -> bool {
        self.lost_players.iter().any(|p| p.player.name == name)
    }

    /// Place every player, on the configured start positions if there are any
    pub fn position_players(&mut self) {
        if let Some(positions) = &self.config.setup.player_start_positions {
            self.player_positions = positions.clone();
            return;
        }

        let max = self.edge_length.saturating_sub(1) as i32;
        let mut positions: Vec<PlayerPosition> = Vec::with_capacity(self.config.players.len());
        for player in &self.config.players {
            let coordinate = Grid::random_free_coordinate(&mut self.rng, max, &positions);
            positions.push(PlayerPosition::new(player.name.clone(), coordinate));
        }
        self.player_positions = positions;
    }

    /// Wrap the sub-tick counter, prune exploded bombs and reset the working set.
    /// Returns the snapshot for the new sub-tick.
    pub fn begin_tick(&mut self, pending: &SetupSlot) -> NextTickInfo {
        if self.sub_tick >= self.config.setup.sub_ticks_per_tick {
            self.sub_tick = 0;
            if let Some(setup) = pending.take() {
                info!(
                    game_id = %self.id,
                    tick = self.current_tick,
                    sub_ticks = setup.sub_ticks_per_tick,
                    max_ticks = setup.max_ticks,
                    "Applying updated game setup"
                );
                self.config.setup = setup;
            }
        }
        self.sub_tick += 1;

        self.remove_exploded_bombs();
        self.pre_validation = PreValidationInfo::default();

        self.next_tick_info()
    }

    pub fn next_tick_info(&self) -> NextTickInfo {
        NextTickInfo {
            players: self.player_positions.clone(),
            items: self.items.clone(),
            game_info: GameInfo {
                id: self.id,
                edge_length: self.edge_length,
                sub_ticks_per_tick: self.config.setup.sub_ticks_per_tick,
                bots_in_play: self.player_positions.len(),
                current_tick: self.current_tick,
            },
        }
    }

    /// Bombs that went off last tick never outlive it
    fn remove_exploded_bombs(&mut self) {
        let exploded: Vec<_> = self
            .pre_validation
            .collisions
            .iter()
            .filter(|c| c.has_bomb)
            .map(|c| c.coordinate)
            .collect();

        self.items
            .retain(|item| !item.is_bomb() || !Grid::coordinate_is_in_use(item, &exploded));
    }

    /// Cache fresh batches and eliminate the players whose bot failed
    pub fn record_fetch_results(
        &mut self,
        results: Vec<(String, Result<Vec<BotDirection>, EliminationCause>)>,
    ) -> Vec<GameEvent> {
        let mut events = Vec::new();
        for (name, result) in results {
            match result {
                Ok(directions) => {
                    self.cached_directions.insert(name, directions);
                }
                Err(cause) => {
                    warn!(game_id = %self.id, player = %name, error = %cause, "Bot fetch failed");
                    events.extend(self.player_lost(&name, &cause));
                }
            }
        }
        events
    }

    /// Apply every active player's cached direction for the current sub-tick
    pub fn apply_directions(&mut self) -> Vec<GameEvent> {
        let mut events = Vec::new();
        let index = self.sub_tick.saturating_sub(1) as usize;

        let active: Vec<String> = self
            .player_positions
            .iter()
            .filter(|p| !self.is_lost(&p.name))
            .map(|p| p.name.clone())
            .collect();

        for name in active {
            let direction = self
                .cached_directions
                .get(&name)
                .and_then(|batch| batch.get(index))
                .copied();

            let outcome = match direction {
                Some(direction) => self.apply_direction(&name, direction, &mut events),
                None => Err(EliminationCause::NoDirection),
            };

            if let Err(cause) = outcome {
                if cause == EliminationCause::OutOfBounds {
                    if let Some(position) = self.player_positions.iter().find(|p| p.name == name) {
                        self.pre_validation.out_of_bounds_players.push(position.clone());
                    }
                }
                events.extend(self.player_lost(&name, &cause));
            }
        }

        events
    }

    fn apply_direction(
        &mut self,
        name: &str,
        direction: BotDirection,
        events: &mut Vec<GameEvent>,
    ) -> Result<(), EliminationCause> {
        match direction {
            BotDirection::Move { axis, sign } => {
                let position = self
                    .player_positions
                    .iter_mut()
                    .find(|p| p.name == name)
                    .ok_or(EliminationCause::NoDirection)?;
                position.coordinate = position.coordinate.step(axis, sign);
                events.push(GameEvent::PlayerMoveAttempt(position.clone()));

                if Grid::is_out_of_bounds(&*position, self.edge_length) {
                    return Err(EliminationCause::OutOfBounds);
                }
            }
            BotDirection::Bomb(target) => {
                let existing = self
                    .pre_validation
                    .collisions
                    .iter_mut()
                    .find(|c| Grid::is_same_coordinate(&**c, &target));

                match existing {
                    Some(collision) => collision.has_bomb = true,
                    None => {
                        if !Grid::coordinate_is_in_use(&target, &self.items) {
                            self.items.push(GameItem::bomb(target));
                        }
                    }
                }

                events.push(GameEvent::PlayerPlacedBomb {
                    name: name.to_string(),
                    target,
                });
            }
            BotDirection::Noop => {
                if let Some(position) = self.player_positions.iter().find(|p| p.name == name) {
                    events.push(GameEvent::PlayerDidNothing(position.clone()));
                }
            }
        }
        Ok(())
    }

    /// Group every player sharing a cell with another player or a bomb,
    /// one record per cell
    pub fn detect_collisions(&mut self) {
        let bombs: Vec<_> = self.items.iter().filter(|item| item.is_bomb()).cloned().collect();

        for (i, player) in self.player_positions.iter().enumerate() {
            let hits_player = self
                .player_positions
                .iter()
                .enumerate()
                .any(|(j, other)| i != j && Grid::is_same_coordinate(player, other));
            let has_bomb = Grid::coordinate_is_in_use(player, &bombs);

            if !hits_player && !has_bomb {
                continue;
            }

            let existing = self
                .pre_validation
                .collisions
                .iter_mut()
                .find(|c| Grid::is_same_coordinate(&**c, player));

            match existing {
                Some(collision) => {
                    collision.has_bomb |= has_bomb;
                    if !collision.players.iter().any(|p| p.name == player.name) {
                        collision.players.push(player.clone());
                    }
                }
                None => self.pre_validation.collisions.push(CollisionInfo {
                    coordinate: player.coordinate,
                    has_bomb,
                    players: vec![player.clone()],
                }),
            }
        }
    }

    /// Drop collided, lost and out-of-bounds players, in that order
    pub fn remove_eliminated(&mut self) {
        let collided: HashSet<String> = self
            .pre_validation
            .collisions
            .iter()
            .flat_map(|c| c.players.iter().map(|p| p.name.clone()))
            .collect();
        self.player_positions.retain(|p| !collided.contains(&p.name));

        let lost: HashSet<String> = self
            .lost_players
            .iter()
            .map(|p| p.player.name.clone())
            .collect();
        self.player_positions.retain(|p| !lost.contains(&p.name));

        let out_of_bounds: HashSet<String> = self
            .pre_validation
            .out_of_bounds_players
            .iter()
            .map(|p| p.name.clone())
            .collect();
        self.player_positions.retain(|p| !out_of_bounds.contains(&p.name));

        self.pre_validation.players = self.player_positions.clone();
    }

    /// Record this tick's losses and decide whether the game is over
    pub fn status_check(&mut self) -> Vec<GameEvent> {
        let mut events = Vec::new();

        let out_of_bounds: Vec<String> = self
            .pre_validation
            .out_of_bounds_players
            .iter()
            .map(|p| p.name.clone())
            .collect();
        for name in out_of_bounds {
            events.extend(self.player_lost(&name, &EliminationCause::OutOfBounds));
        }

        let collided: Vec<(String, bool)> = self
            .pre_validation
            .collisions
            .iter()
            .flat_map(|c| c.players.iter().map(move |p| (p.name.clone(), c.has_bomb)))
            .collect();
        for (name, has_bomb) in collided {
            let cause = if has_bomb {
                EliminationCause::SteppedOnBomb
            } else {
                EliminationCause::CrashedIntoPlayer
            };
            events.extend(self.player_lost(&name, &cause));
        }

        let everyone_lost = self.lost_players.len() >= self.config.players.len();
        let one_left = self.pre_validation.players.len() == 1;
        let out_of_time = self.current_tick + 1 >= self.config.setup.max_ticks;

        if everyone_lost || one_left || out_of_time {
            debug!(
                game_id = %self.id,
                tick = self.current_tick,
                everyone_lost,
                one_left,
                out_of_time,
                "Game over condition reached"
            );
            self.phase = GamePhase::Ended;
        }

        events
    }

    /// Mark a player as lost at the current tick.
    /// Returns the notification only the first time a name is recorded.
    pub fn player_lost(&mut self, name: &str, cause: &EliminationCause) -> Option<GameEvent> {
        if self.is_lost(name) {
            return None;
        }
        let player = self.player_setup(name)?.clone();

        info!(
            game_id = %self.id,
            player = %name,
            tick = self.current_tick,
            cause = %cause,
            "Player lost"
        );

        self.lost_players.push(PlayerWithHighScore {
            player,
            high_score: self.current_tick,
        });

        Some(GameEvent::PlayerLost {
            name: name.to_string(),
            cause: cause.to_string(),
        })
    }

    /// Final standings. Survivors are appended to the lost list with the
    /// final tick as their score.
    pub fn high_scores(&mut self) -> HighScoreInfo {
        let survivors: Vec<PlayerWithHighScore> = self
            .player_positions
            .iter()
            .filter_map(|p| self.player_setup(&p.name))
            .map(|player| PlayerWithHighScore {
                player: player.clone(),
                high_score: self.current_tick,
            })
            .collect();

        let winner = match survivors.as_slice() {
            [winner] => Some(winner.clone()),
            _ => None,
        };

        for survivor in survivors {
            if !self.is_lost(&survivor.player.name) {
                self.lost_players.push(survivor);
            }
        }

        let result = if winner.is_some() {
            GameResult::WinnerFound
        } else {
            GameResult::Tie
        };

        HighScoreInfo {
            winner,
            scores: self.lost_players.clone(),
            id: self.id,
            result,
        }
    }
}

/// Ask every positioned player's bot for a new batch, all at once,
/// and wait until every call has settled
async fn fetch_directions(
    bots: &dyn BotClient,
    state: &GameState,
    tick: &NextTickInfo,
) -> Vec<(String, Result<Vec<BotDirection>, EliminationCause>)> {
    let setup = state.setup();

    let calls = state
        .player_positions
        .iter()
        .filter_map(|p| state.player_setup(&p.name))
        .map(|player| {
            let request = BotRequest {
                current_player: player.clone(),
                tick: tick.clone(),
            };
            async move {
                let result: Result<Vec<BotDirection>, EliminationCause> =
                    match bots.request_directions(&request).await {
                        Ok(payload) => validate_bot_directions(&payload, setup).map_err(Into::into),
                        Err(e) => Err(e.into()),
                    };
                (request.current_player.name, result)
            }
        });

    join_all(calls).await
}

/// Handle to a running game
#[derive(Clone)]
pub struct GameHandle {
    pub id: Uuid,
    edge_length: u32,
    players: Arc<Vec<PlayerSetup>>,
    pending_setup: Arc<SetupSlot>,
    event_tx: broadcast::Sender<GameEvent>,
    phase_rx: watch::Receiver<GamePhase>,
}

impl GameHandle {
    pub fn phase(&self) -> GamePhase {
        *self.phase_rx.borrow()
    }

    /// Queue a setup replacement; it lands at the next sub-tick wraparound.
    /// The grid keeps the size it started with.
    pub fn update_setup(&self, mut setup: GameSetup) -> Result<(), SetupError> {
        if setup.edge_length != self.edge_length {
            warn!(
                game_id = %self.id,
                edge_length = self.edge_length,
                requested = setup.edge_length,
                "Ignoring edge length change for running game"
            );
            setup.edge_length = self.edge_length;
        }
        setup.validate(&self.players)?;
        info!(game_id = %self.id, "Game setup update queued");
        self.pending_setup.replace(setup);
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GameEvent> {
        self.event_tx.subscribe()
    }
}

/// Registry of all running games
pub struct GameRegistry {
    games: DashMap<Uuid, GameHandle>,
}

impl GameRegistry {
    pub fn new() -> Self {
        Self {
            games: DashMap::new(),
        }
    }

    pub fn get(&self, id: &Uuid) -> Option<GameHandle> {
        self.games.get(id).map(|g| g.value().clone())
    }

    pub fn insert(&self, handle: GameHandle) {
        self.games.insert(handle.id, handle);
    }

    pub fn remove(&self, id: &Uuid) -> Option<GameHandle> {
        self.games.remove(id).map(|(_, h)| h)
    }

    #[cfg(test)]
    pub fn contains(&self, id: &Uuid) -> bool {
        self.games.contains_key(id)
    }

    pub fn active_games(&self) -> usize {
        self.games.len()
    }

    pub fn ids(&self) -> Vec<Uuid> {
        self.games.iter().map(|g| *g.key()).collect()
    }
}

impl Default for GameRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The authoritative game
pub struct GameEngine {
    state: GameState,
    bots: Arc<dyn BotClient>,
    pending_setup: Arc<SetupSlot>,
    event_tx: broadcast::Sender<GameEvent>,
    phase_tx: watch::Sender<GamePhase>,
}

impl GameEngine {
    /// Create a new game. `config` must already be validated.
    pub fn new(
        id: Uuid,
        config: GameConfig,
        seed: u64,
        bots: Arc<dyn BotClient>,
    ) -> (Self, GameHandle) {
        let (event_tx, _) = broadcast::channel(EVENT_BUFFER);
        let pending_setup = Arc::new(SetupSlot::default());
        let (phase_tx, phase_rx) = watch::channel(GamePhase::NotStarted);

        let handle = GameHandle {
            id,
            edge_length: config.setup.edge_length,
            players: Arc::new(config.players.clone()),
            pending_setup: pending_setup.clone(),
            event_tx: event_tx.clone(),
            phase_rx,
        };

        let engine = Self {
            state: GameState::new(id, config, seed),
            bots,
            pending_setup,
            event_tx,
            phase_tx,
        };

        (engine, handle)
    }

    #[cfg(test)]
    pub fn state(&self) -> &GameState {
        &self.state
    }

    /// Run the game to completion and return the final standings
    pub async fn run(&mut self) -> HighScoreInfo {
        self.start();

        // The pause also follows the last tick, ahead of the final standings
        while self.state.phase != GamePhase::Ended {
            self.step().await;
            tokio::time::sleep(self.state.setup().tick_delay()).await;
        }

        self.finish()
    }

    /// Place the players and announce the game
    pub fn start(&mut self) {
        self.state.position_players();
        self.state.pre_validation.collisions.clear();
        self.state.items.clear();
        self.state.phase = GamePhase::Running;
        self.phase_tx.send_replace(GamePhase::Running);

        info!(
            game_id = %self.state.id,
            players = self.state.player_positions.len(),
            edge_length = self.state.edge_length,
            "Game started"
        );
        self.emit(GameEvent::GameStarted { id: self.state.id });
    }

    /// Run a single tick, without the pacing delay
    pub async fn step(&mut self) {
        let tick_info = self.state.begin_tick(&self.pending_setup);
        debug!(
            game_id = %self.state.id,
            tick = self.state.current_tick,
            sub_tick = self.state.sub_tick,
            players = self.state.player_positions.len(),
            "Tick"
        );
        self.emit(GameEvent::NextTick(tick_info.clone()));

        // Batches are only fetched at the first sub-tick; the rest replay the cache
        if self.state.sub_tick == 1 {
            let results = fetch_directions(self.bots.as_ref(), &self.state, &tick_info).await;
            let events = self.state.record_fetch_results(results);
            self.emit_all(events);
        }

        let events = self.state.apply_directions();
        self.emit_all(events);

        self.state.detect_collisions();
        self.state.remove_eliminated();

        let events = self.state.status_check();
        self.emit_all(events);

        self.state.current_tick += 1;
    }

    /// Compute and announce the final standings
    pub fn finish(&mut self) -> HighScoreInfo {
        let scores = self.state.high_scores();
        self.state.phase = GamePhase::Ended;
        self.phase_tx.send_replace(GamePhase::Ended);
        info!(
            game_id = %self.state.id,
            ticks = self.state.current_tick,
            result = ?scores.result,
            winner = scores.winner.as_ref().map(|w| w.player.name.as_str()).unwrap_or("-"),
            "Game ended"
        );
        self.emit(GameEvent::GameEnded(scores.clone()));
        scores
    }

    fn emit(&self, event: GameEvent) {
        // No subscribers is fine; observers may come and go
        let _ = self.event_tx.send(event);
    }

    fn emit_all(&self, events: Vec<GameEvent>) {
        for event in events {
            self.emit(event);
        }
    }
}
