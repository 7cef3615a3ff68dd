// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Game Routing
//!
//! Exchange names and routing keys shared by the game server and clients.

use crate::{
    channel::{new_channel, REPLY_SUCCESS},
    errors::AmqpError,
    exchange::ExchangeDefinition,
    queue::DEFAULT_DEAD_LETTER_EXCHANGE,
    topology::{declare_dead_letter_queue, declare_exchange},
};
use lapin::Connection;
use tracing::{debug, error};

/// Direct exchange for commands addressed to every player, e.g. pause
pub const EXCHANGE_PERIL_DIRECT: &str = "peril_direct";
/// Topic exchange for moves, war declarations and game logs
pub const EXCHANGE_PERIL_TOPIC: &str = "peril_topic";
/// Dead-letter exchange all game queues report to
pub const EXCHANGE_PERIL_DLX: &str = DEFAULT_DEAD_LETTER_EXCHANGE;
/// Queue collecting discarded messages
pub const PERIL_DLQ: &str = "peril_dlq";

pub const ARMY_MOVES_PREFIX: &str = "army_moves";
pub const WAR_RECOGNITIONS_PREFIX: &str = "war";
pub const PAUSE_KEY: &str = "pause";
pub const GAME_LOG_SLUG: &str = "game_logs";

/// `<prefix>.<username>`
pub fn player_key(prefix: &str, username: &str) -> String {
    format!("{prefix}.{username}")
}

/// `<prefix>.*`, matching every player on a topic exchange.
pub fn any_player(prefix: &str) -> String {
    format!("{prefix}.*")
}

/// Declares the game exchanges and the dead-letter queue.
pub async fn declare_peril_topology(conn: &Connection) -> Result<(), AmqpError> {
    let channel = new_channel(conn).await?;

    declare_exchange(
        &channel,
        &ExchangeDefinition::new(EXCHANGE_PERIL_DIRECT).durable(),
    )
    .await?;
    declare_exchange(
        &channel,
        &ExchangeDefinition::new(EXCHANGE_PERIL_TOPIC).topic().durable(),
    )
    .await?;
    declare_exchange(
        &channel,
        &ExchangeDefinition::new(EXCHANGE_PERIL_DLX).fanout().durable(),
    )
    .await?;
    declare_dead_letter_queue(&channel, EXCHANGE_PERIL_DLX, PERIL_DLQ).await?;

    debug!("peril topology declared");

    channel
        .close(REPLY_SUCCESS, "topology declared")
        .await
        .map_err(|err| {
            error!(error = err.to_string(), "error to close topology channel");
            AmqpError::CloseError("topology channel".to_owned())
        })
}
