// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Game payloads carried by the broker.

use crate::{
    errors::AmqpError,
    publisher::Publisher,
    routing::{player_key, EXCHANGE_PERIL_TOPIC, GAME_LOG_SLUG},
};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Pause/resume broadcast from the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayingState {
    pub is_paused: bool,
}

/// Log line written by the server for every player action worth recording.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameLog {
    /// Milliseconds since the Unix epoch
    pub current_time: u64,
    pub message: String,
    pub username: String,
}

impl GameLog {
    pub fn now(username: &str, message: &str) -> GameLog {
        let current_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();

        GameLog {
            current_time,
            message: message.to_owned(),
            username: username.to_owned(),
        }
    }
}

/// Publishes a MessagePack game log on `game_logs.<username>`.
pub async fn publish_game_log(
    publisher: &Publisher,
    username: &str,
    message: &str,
) -> Result<(), AmqpError> {
    publisher
        .publish_msgpack(
            EXCHANGE_PERIL_TOPIC,
            &player_key(GAME_LOG_SLUG, username),
            &GameLog::now(username, message),
        )
        .await
}
