//! Bot response validation
//!
//! Turns the raw JSON a bot answered with into one [`BotDirection`] per sub-tick,
//! or explains why the answer cannot be used.

use serde_json::Value;

use super::model::{Axis, BotDirection, Coordinate, GameSetup, Sign};

/// Why a bot response was rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Bot response is not a list of directions")]
    NotAList,

    #[error("Expected {expected} directions, got {actual}")]
    WrongLength { expected: u32, actual: usize },

    #[error("Direction {index} has no task")]
    MissingTask { index: usize },

    #[error("Direction {index} has unknown task {task:?}")]
    UnknownTask { index: usize, task: String },

    #[error("Direction {index} has invalid move direction {direction:?}")]
    InvalidMove { index: usize, direction: String },

    #[error("Direction {index} has invalid bomb coordinates")]
    InvalidBomb { index: usize },
}

/// Validate a bot payload against the active setup
pub fn validate_bot_directions(
    payload: &Value,
    setup: &GameSetup,
) -> Result<Vec<BotDirection>, ValidationError> {
    let entries = payload.as_array().ok_or(ValidationError::NotAList)?;

    if entries.len() != setup.sub_ticks_per_tick as usize {
        return Err(ValidationError::WrongLength {
            expected: setup.sub_ticks_per_tick,
            actual: entries.len(),
        });
    }

    entries
        .iter()
        .enumerate()
        .map(|(index, entry)| parse_direction(index, entry))
        .collect()
}

fn parse_direction(index: usize, entry: &Value) -> Result<BotDirection, ValidationError> {
    let task = entry
        .get("task")
        .and_then(Value::as_str)
        .ok_or(ValidationError::MissingTask { index })?;

    if task.eq_ignore_ascii_case("MOVE") {
        let token = entry.get("direction").and_then(Value::as_str).unwrap_or_default();
        let (axis, sign) = parse_move_token(token).ok_or_else(|| ValidationError::InvalidMove {
            index,
            direction: token.to_string(),
        })?;
        Ok(BotDirection::Move { axis, sign })
    } else if task.eq_ignore_ascii_case("BOMB") {
        let component = |key: &str| {
            entry
                .get(key)
                .and_then(Value::as_i64)
                .and_then(|v| i32::try_from(v).ok())
        };
        match (component("x"), component("y"), component("z")) {
            (Some(x), Some(y), Some(z)) => Ok(BotDirection::Bomb(Coordinate::new(x, y, z))),
            _ => Err(ValidationError::InvalidBomb { index }),
        }
    } else if task.eq_ignore_ascii_case("NOOP") {
        Ok(BotDirection::Noop)
    } else {
        Err(ValidationError::UnknownTask {
            index,
            task: task.to_string(),
        })
    }
}

/// Parse one of the six tokens `+X -X +Y -Y +Z -Z` (any case)
fn parse_move_token(token: &str) -> Option<(Axis, Sign)> {
    let mut chars = token.chars();
    let sign = match chars.next()? {
        '+' => Sign::Plus,
        '-' => Sign::Minus,
        _ => return None,
    };
    let axis = match chars.next()?.to_ascii_lowercase() {
        'x' => Axis::X,
        'y' => Axis::Y,
        'z' => Axis::Z,
        _ => return None,
    };
    if chars.next().is_some() {
        return None;
    }
    Some((axis, sign))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    fn setup(sub_ticks_per_tick: u32) -> GameSetup {
        GameSetup {
            edge_length: 5,
            max_ticks: 10,
            tick_delay_ms: 0,
            sub_ticks_per_tick,
            player_start_positions: None,
        }
    }

    #[test]
    fn test_valid_batch_keeps_order() {
        let payload = json!([
            { "task": "MOVE", "direction": "+X" },
            { "task": "BOMB", "x": 2, "y": 2, "z": 2 },
            { "task": "NOOP" }
        ]);

        let directions = assert_ok!(validate_bot_directions(&payload, &setup(3)));
        assert_eq!(
            directions,
            vec![
                BotDirection::Move {
                    axis: Axis::X,
                    sign: Sign::Plus
                },
                BotDirection::Bomb(Coordinate::new(2, 2, 2)),
                BotDirection::Noop,
            ]
        );
    }

    #[test]
    fn test_wrong_length_rejected() {
        let payload = json!([{ "task": "NOOP" }, { "task": "NOOP" }]);
        assert_eq!(
            validate_bot_directions(&payload, &setup(3)),
            Err(ValidationError::WrongLength {
                expected: 3,
                actual: 2
            })
        );
    }

    #[test]
    fn test_non_list_rejected() {
        let payload = json!({ "task": "NOOP" });
        assert_eq!(
            validate_bot_directions(&payload, &setup(1)),
            Err(ValidationError::NotAList)
        );
    }

    #[test]
    fn test_move_tokens() {
        for (token, axis, sign) in [
            ("+x", Axis::X, Sign::Plus),
            ("-X", Axis::X, Sign::Minus),
            ("+Y", Axis::Y, Sign::Plus),
            ("-y", Axis::Y, Sign::Minus),
            ("+Z", Axis::Z, Sign::Plus),
            ("-Z", Axis::Z, Sign::Minus),
        ] {
            let payload = json!([{ "task": "MOVE", "direction": token }]);
            let directions = assert_ok!(validate_bot_directions(&payload, &setup(1)));
            assert_eq!(directions[0], BotDirection::Move { axis, sign });
        }

        for token in ["X", "+W", "++", "+XY", ""] {
            let payload = json!([{ "task": "MOVE", "direction": token }]);
            assert_err!(validate_bot_directions(&payload, &setup(1)));
        }
    }

    #[test]
    fn test_unknown_task_rejected() {
        let payload = json!([{ "task": "NOOP" }, { "task": "JUMP" }]);
        assert_eq!(
            validate_bot_directions(&payload, &setup(2)),
            Err(ValidationError::UnknownTask {
                index: 1,
                task: "JUMP".to_string()
            })
        );

        let payload = json!([{ "direction": "+X" }]);
        assert_eq!(
            validate_bot_directions(&payload, &setup(1)),
            Err(ValidationError::MissingTask { index: 0 })
        );
    }

    #[test]
    fn test_bomb_needs_integer_coordinates() {
        let payload = json!([{ "task": "BOMB", "x": 1, "y": "2", "z": 3 }]);
        assert_eq!(
            validate_bot_directions(&payload, &setup(1)),
            Err(ValidationError::InvalidBomb { index: 0 })
        );

        let payload = json!([{ "task": "BOMB", "x": 1.5, "y": 2, "z": 3 }]);
        assert_err!(validate_bot_directions(&payload, &setup(1)));
    }
}
