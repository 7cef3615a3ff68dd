// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Topology
//!
//! Declares queues and their bindings on a fresh channel carved from the shared
//! connection. Declarations are idempotent: re-declaring a queue with identical
//! arguments returns the existing queue. A declaration whose flags or arguments
//! conflict with the queue already on the broker is rejected by the broker and
//! surfaces as [`AmqpError::DeclareQueueError`]; it is never retried.

use crate::{
    channel::new_channel,
    errors::AmqpError,
    exchange::ExchangeDefinition,
    queue::{QueueBinding, QueueDefinition, QueueKind},
};
use lapin::{
    options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions},
    types::{AMQPValue, FieldTable, LongString, ShortString},
    Channel, Connection, Queue,
};
use std::{collections::BTreeMap, sync::Arc};
use tracing::{debug, error};

/// Queue argument naming the exchange that receives rejected messages
pub const AMQP_HEADERS_DEAD_LETTER_EXCHANGE: &str = "x-dead-letter-exchange";

/// Declare options and arguments for `def`.
pub(crate) fn queue_arguments(def: &QueueDefinition) -> (QueueDeclareOptions, FieldTable) {
    let mut args = BTreeMap::new();
    args.insert(
        ShortString::from(AMQP_HEADERS_DEAD_LETTER_EXCHANGE),
        AMQPValue::LongString(LongString::from(def.dead_letter_exchange.clone())),
    );

    let options = QueueDeclareOptions {
        passive: false,
        durable: def.is_durable(),
        exclusive: def.is_exclusive(),
        auto_delete: def.is_auto_delete(),
        nowait: false,
    };

    (options, FieldTable::from(args))
}

/// Opens a channel, declares `queue_name` with the default dead-letter exchange and
/// binds it to `exchange` under `routing_key`.
///
/// Declaring an existing queue with the same properties is a no-op; different
/// properties are refused by the broker.
///
/// # Parameters
/// * `conn` - Connection to open the channel on
/// * `exchange` - Exchange the queue is bound to, which must already exist
/// * `queue_name` - Queue to declare, empty for a broker-named queue
/// * `routing_key` - Binding key
/// * `kind` - Durable or transient queue
///
/// # Returns
/// The channel the queue was declared on, owned by the caller, and the queue
pub async fn declare_and_bind(
    conn: &Connection,
    exchange: &str,
    queue_name: &str,
    routing_key: &str,
    kind: QueueKind,
) -> Result<(Arc<Channel>, Queue), AmqpError> {
    declare(
        conn,
        &QueueDefinition::new(queue_name, kind),
        &QueueBinding::new(exchange, routing_key),
    )
    .await
}

/// Same as [`declare_and_bind`], taking explicit definitions.
pub async fn declare(
    conn: &Connection,
    def: &QueueDefinition,
    binding: &QueueBinding,
) -> Result<(Arc<Channel>, Queue), AmqpError> {
    let channel = new_channel(conn).await?;

    debug!(
        queue = def.name.as_str(),
        kind = ?def.kind,
        dlx = def.dead_letter_exchange.as_str(),
        "declaring queue"
    );

    let (options, args) = queue_arguments(def);
    let queue = match channel.queue_declare(&def.name, options, args).await {
        Err(err) => {
            error!(
                error = err.to_string(),
                queue = def.name.as_str(),
                "error to declare the queue"
            );
            Err(AmqpError::DeclareQueueError(
                def.name.clone(),
                err.to_string(),
            ))
        }
        Ok(queue) => Ok(queue),
    }?;

    let queue_name = queue.name().as_str();

    debug!(
        "binding queue: {} to the exchange: {} with the key: {}",
        queue_name, binding.exchange_name, binding.routing_key
    );

    match channel
        .queue_bind(
            queue_name,
            &binding.exchange_name,
            &binding.routing_key,
            QueueBindOptions { nowait: false },
            FieldTable::default(),
        )
        .await
    {
        Err(err) => {
            error!(error = err.to_string(), "error to bind queue to exchange");
            Err(AmqpError::BindingExchangeToQueueError(
                binding.exchange_name.clone(),
                queue_name.to_owned(),
            ))
        }
        _ => Ok(()),
    }?;

    Ok((channel, queue))
}

/// Declares the exchange described by `def` on `channel`.
///
/// # Parameters
/// * `channel` - Channel to declare on
/// * `def` - Exchange name, kind and flags
///
/// # Returns
/// Ok(()) or `AmqpError::DeclareExchangeError`
pub async fn declare_exchange(channel: &Channel, def: &ExchangeDefinition) -> Result<(), AmqpError> {
    debug!("creating exchange: {}", def.name);

    match channel
        .exchange_declare(
            &def.name,
            def.kind.into(),
            ExchangeDeclareOptions {
                passive: false,
                durable: def.durable,
                auto_delete: def.delete,
                internal: def.internal,
                nowait: false,
            },
            FieldTable::default(),
        )
        .await
    {
        Err(err) => {
            error!(
                error = err.to_string(),
                name = def.name.as_str(),
                "error to declare the exchange"
            );
            Err(AmqpError::DeclareExchangeError(
                def.name.clone(),
                err.to_string(),
            ))
        }
        _ => Ok(()),
    }
}

/// Declares the durable queue collecting everything routed to `dead_letter_exchange`.
///
/// This is the terminal hop, so unlike every other queue it carries no dead-letter
/// argument of its own.
///
/// # Parameters
/// * `channel` - Channel to declare on
/// * `dead_letter_exchange` - Fanout exchange rejected messages are routed to
/// * `queue` - Name of the dead-letter queue
pub async fn declare_dead_letter_queue(
    channel: &Channel,
    dead_letter_exchange: &str,
    queue_name: &str,
) -> Result<Queue, AmqpError> {
    let queue = channel
        .queue_declare(
            queue_name,
            QueueDeclareOptions {
                durable: true,
                ..QueueDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|err| {
            error!(error = err.to_string(), "failure to declare dead letter queue");
            AmqpError::DeclareQueueError(queue_name.to_owned(), err.to_string())
        })?;

    channel
        .queue_bind(
            queue_name,
            dead_letter_exchange,
            "",
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(|err| {
            error!(error = err.to_string(), "error to bind dead letter queue");
            AmqpError::BindingExchangeToQueueError(
                dead_letter_exchange.to_owned(),
                queue_name.to_owned(),
            )
        })?;

    Ok(queue)
}
