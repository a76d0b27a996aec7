//! Game simulation modules

pub mod bot;
pub mod engine;
pub mod events;
pub mod geometry;
pub mod model;
pub mod validator;

pub use bot::{BotClient, HttpBotClient};
pub use engine::{GameEngine, GameHandle, GamePhase, GameRegistry};
pub use events::GameEvent;
pub use model::{GameConfig, GameSetup, SetupError};
