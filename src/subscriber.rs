// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Generic Subscriber
//!
//! A subscription owns one channel: the queue is declared and bound on it, the
//! prefetch limit is set on it and a single consumer reads from it. Deliveries are
//! processed strictly one at a time in delivery order, so acknowledgments leave the
//! channel in the same order the messages arrived. The broker stops delivering once
//! [`PREFETCH_COUNT`] messages are unacknowledged, which is the only backpressure.

use crate::{
    ack::Handler,
    channel::REPLY_SUCCESS,
    codec::{Codec, JsonCodec, MsgPackCodec},
    consumer::consume,
    errors::AmqpError,
    queue::{QueueBinding, QueueDefinition, QueueKind},
    topology,
};
use futures_util::{Stream, StreamExt};
use lapin::{
    message::Delivery,
    options::{BasicCancelOptions, BasicConsumeOptions, BasicQosOptions},
    types::FieldTable,
    Channel, Connection,
};
use opentelemetry::global;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, error, warn};

/// Maximum number of unacknowledged deliveries per subscription channel
pub const PREFETCH_COUNT: u16 = 10;

/// Handle to a running subscription.
///
/// Dropping the handle leaves the subscription running until its channel or the
/// connection closes.
pub struct Subscription {
    queue: String,
    consumer_tag: String,
    channel: Arc<Channel>,
    stop: watch::Sender<bool>,
    task: JoinHandle<Result<(), AmqpError>>,
}

impl Subscription {
    /// Name of the consumed queue, as assigned by the broker for unnamed queues.
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Waits until the consumer ends.
    ///
    /// # Returns
    /// Ok(()) when the consumer was cancelled or its stream ended cleanly,
    /// `AmqpError::ConsumerError` when the channel or the connection failed, and
    /// `AmqpError::InternalError` if the consumer task itself died
    pub async fn wait(self) -> Result<(), AmqpError> {
        match self.task.await {
            Ok(result) => result,
            Err(err) => {
                error!(error = err.to_string(), "subscription task failed");
                Err(AmqpError::InternalError)
            }
        }
    }

    /// Stops taking new deliveries, lets the message being handled finish, then
    /// cancels the consumer and closes the channel.
    ///
    /// Deliveries prefetched but not yet handled are still unacknowledged when
    /// the channel closes, so the broker puts them back on the queue.
    pub async fn shutdown(self) -> Result<(), AmqpError> {
        debug!(queue = self.queue.as_str(), "stopping subscription");
        let _ = self.stop.send(true);

        match self.task.await {
            Ok(Err(err)) => warn!(error = err.to_string(), "subscription ended with an error"),
            Err(err) => error!(error = err.to_string(), "subscription task failed"),
            Ok(Ok(())) => {}
        }

        if let Err(err) = self
            .channel
            .basic_cancel(&self.consumer_tag, BasicCancelOptions { nowait: false })
            .await
        {
            warn!(error = err.to_string(), "error to cancel the consumer");
        }

        self.channel
            .close(REPLY_SUCCESS, "subscription closed")
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error to close subscription channel");
                AmqpError::CloseError(self.queue.clone())
            })
    }
}

/// Subscribes `handler` to messages routed from `exchange` with `routing_key`,
/// declaring `queue_name` with the default dead-letter exchange.
///
/// Setup failures are returned; once consuming, per-message failures are
/// resolved through the acknowledgment protocol and never end the subscription.
///
/// # Parameters
/// * `conn` - Connection the subscription channel is opened on
/// * `exchange` - Exchange the queue is bound to
/// * `queue_name` - Queue to declare, empty for a broker-named queue
/// * `routing_key` - Binding key, may carry topic wildcards
/// * `kind` - Durable or transient queue
/// * `codec` - Codec every delivery must be tagged with and decoded by
/// * `handler` - Business logic deciding the outcome of each message
///
/// # Returns
/// A running [`Subscription`] or the error raised while setting it up
pub async fn subscribe<T, C, H>(
    conn: &Connection,
    exchange: &str,
    queue_name: &str,
    routing_key: &str,
    kind: QueueKind,
    codec: C,
    handler: H,
) -> Result<Subscription, AmqpError>
where
    T: DeserializeOwned + Send + 'static,
    C: Codec,
    H: Handler<T>,
{
    subscribe_with(
        conn,
        &QueueDefinition::new(queue_name, kind),
        &QueueBinding::new(exchange, routing_key),
        codec,
        handler,
    )
    .await
}

/// [`subscribe`] expecting `application/json` payloads.
pub async fn subscribe_json<T, H>(
    conn: &Connection,
    exchange: &str,
    queue_name: &str,
    routing_key: &str,
    kind: QueueKind,
    handler: H,
) -> Result<Subscription, AmqpError>
where
    T: DeserializeOwned + Send + 'static,
    H: Handler<T>,
{
    subscribe(conn, exchange, queue_name, routing_key, kind, JsonCodec, handler).await
}

/// [`subscribe`] expecting `application/x-msgpack` payloads.
pub async fn subscribe_msgpack<T, H>(
    conn: &Connection,
    exchange: &str,
    queue_name: &str,
    routing_key: &str,
    kind: QueueKind,
    handler: H,
) -> Result<Subscription, AmqpError>
where
    T: DeserializeOwned + Send + 'static,
    H: Handler<T>,
{
    subscribe(conn, exchange, queue_name, routing_key, kind, MsgPackCodec, handler).await
}

/// Same as [`subscribe`], taking explicit queue and binding definitions.
///
/// # Parameters
/// * `def` - Queue name, kind and dead-letter exchange
/// * `binding` - Exchange and routing key the queue is bound with
pub async fn subscribe_with<T, C, H>(
    conn: &Connection,
    def: &QueueDefinition,
    binding: &QueueBinding,
    codec: C,
    handler: H,
) -> Result<Subscription, AmqpError>
where
    T: DeserializeOwned + Send + 'static,
    C: Codec,
    H: Handler<T>,
{
    let (channel, queue) = topology::declare(conn, def, binding).await?;
    let queue = queue.name().to_string();

    if let Err(err) = channel
        .basic_qos(PREFETCH_COUNT, BasicQosOptions { global: false })
        .await
    {
        error!(error = err.to_string(), "error to configure qos");
        abandon(&channel).await;
        return Err(AmqpError::QoSDeclarationError(err.to_string()));
    }

    let consumer = match channel
        .basic_consume(
            &queue,
            "",
            BasicConsumeOptions {
                no_local: false,
                no_ack: false,
                exclusive: false,
                nowait: false,
            },
            FieldTable::default(),
        )
        .await
    {
        Err(err) => {
            error!(error = err.to_string(), "error to create the consumer");
            abandon(&channel).await;
            Err(AmqpError::ConsumerDeclarationError(queue.clone()))
        }
        Ok(c) => Ok(c),
    }?;

    let consumer_tag = consumer.tag().to_string();
    debug!(
        queue = queue.as_str(),
        consumer = consumer_tag.as_str(),
        "consuming"
    );

    let (stop, stopped) = watch::channel(false);
    let task = tokio::spawn(run::<T, C, H, _>(
        queue.clone(),
        consumer,
        stopped,
        codec,
        handler,
    ));

    Ok(Subscription {
        queue,
        consumer_tag,
        channel,
        stop,
        task,
    })
}

/// Closes a channel whose subscription could not be started.
async fn abandon(channel: &Channel) {
    if let Err(err) = channel.close(REPLY_SUCCESS, "subscription failed").await {
        warn!(error = err.to_string(), "error to close subscription channel");
    }
}

/// Consumer loop. The stop signal is only observed between deliveries, so a
/// handler that has started always runs to completion. A failed stream ends the
/// loop with `AmqpError::ConsumerError`.
async fn run<T, C, H, S>(
    queue: String,
    mut consumer: S,
    mut stopped: watch::Receiver<bool>,
    codec: C,
    handler: H,
) -> Result<(), AmqpError>
where
    T: DeserializeOwned + Send + 'static,
    C: Codec,
    H: Handler<T>,
    S: Stream<Item = lapin::Result<Delivery>> + Unpin,
{
    let tracer = global::tracer("amqp consumer");
    // false once the handle is dropped; the subscription then runs until the channel closes
    let mut listening = true;

    loop {
        let next = tokio::select! {
            biased;
            changed = stopped.changed(), if listening => {
                match changed {
                    Ok(()) => {
                        let stop = *stopped.borrow();
                        if stop {
                            debug!("subscription stopped");
                            return Ok(());
                        }
                    }
                    Err(_) => listening = false,
                }
                continue;
            }
            next = consumer.next() => next,
        };

        match next {
            Some(Ok(delivery)) => {
                if let Err(err) = consume::<T, C, H, _>(
                    &tracer,
                    &delivery.properties,
                    &delivery.data,
                    delivery.redelivered,
                    &delivery.acker,
                    &codec,
                    &handler,
                )
                .await
                {
                    error!(error = err.to_string(), "error consume msg");
                }
            }
            Some(Err(err)) => {
                error!(error = err.to_string(), queue = queue.as_str(), "consumer failed");
                return Err(AmqpError::ConsumerError(queue, err.to_string()));
            }
            None => {
                debug!("consumer stream ended");
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ack::AckType, errors::HandlerError};
    use lapin::{ChannelState, Error};
    use serde_json::Value;

    fn handler() -> impl Handler<Value> {
        |_: Value| async move { Ok::<_, HandlerError>(AckType::Ack) }
    }

    #[tokio::test]
    async fn stream_failure_ends_the_loop_with_an_error() {
        let (_stop, stopped) = watch::channel(false);
        let deliveries = futures_util::stream::iter(vec![
            Err(Error::InvalidChannelState(ChannelState::Closed)),
            Err(Error::InvalidChannelState(ChannelState::Closed)),
        ]);

        let result = run::<Value, _, _, _>(
            "game_logs".into(),
            deliveries,
            stopped,
            JsonCodec,
            handler(),
        )
        .await;

        assert!(matches!(
            result,
            Err(AmqpError::ConsumerError(ref queue, _)) if queue == "game_logs"
        ));
    }

    #[tokio::test]
    async fn ended_stream_is_a_clean_exit() {
        let (_stop, stopped) = watch::channel(false);

        let result = run::<Value, _, _, _>(
            "game_logs".into(),
            futures_util::stream::empty(),
            stopped,
            JsonCodec,
            handler(),
        )
        .await;

        assert_eq!(result, Ok(()));
    }

    #[tokio::test]
    async fn stop_signal_ends_the_loop_before_pending_deliveries() {
        let (stop, stopped) = watch::channel(false);
        stop.send(true).unwrap();

        let result = run::<Value, _, _, _>(
            "game_logs".into(),
            futures_util::stream::pending(),
            stopped,
            JsonCodec,
            handler(),
        )
        .await;

        assert_eq!(result, Ok(()));
    }
}
