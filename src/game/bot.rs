//! Bot endpoints: the request sent each tick and the client that delivers it

use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;

use super::model::{NextTickInfo, PlayerSetup};

/// Payload POSTed to a bot at the start of every tick
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BotRequest {
    pub current_player: PlayerSetup,
    #[serde(flatten)]
    pub tick: NextTickInfo,
}

/// Bot round trip failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BotError {
    #[error("Bot did not answer within {0:?}")]
    Timeout(Duration),

    #[error("Bot request failed: {0}")]
    Transport(String),

    #[error("Bot answered with status {0}")]
    Status(u16),

    #[error("Bot response could not be decoded: {0}")]
    Decode(String),
}

/// Anything that can ask a bot for its next batch of directions.
/// Implementations enforce their own time bound.
pub trait BotClient: Send + Sync {
    fn request_directions<'a>(&'a self, request: &'a BotRequest)
        -> BoxFuture<'a, Result<Value, BotError>>;
}

/// Polls bots over HTTP
#[derive(Clone)]
pub struct HttpBotClient {
    client: Client,
    timeout: Duration,
}

impl HttpBotClient {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            timeout,
        }
    }
}

impl BotClient for HttpBotClient {
    fn request_directions<'a>(
        &'a self,
        request: &'a BotRequest,
    ) -> BoxFuture<'a, Result<Value, BotError>> {
        async move {
            let call = async {
                let response = self
                    .client
                    .post(&request.current_player.url)
                    .json(request)
                    .send()
                    .await
                    .map_err(|e| BotError::Transport(e.to_string()))?;

                if !response.status().is_success() {
                    return Err(BotError::Status(response.status().as_u16()));
                }

                response
                    .json::<Value>()
                    .await
                    .map_err(|e| BotError::Decode(e.to_string()))
            };

            match tokio::time::timeout(self.timeout, call).await {
                Ok(result) => result,
                Err(_) => Err(BotError::Timeout(self.timeout)),
            }
        }
        .boxed()
    }
}
