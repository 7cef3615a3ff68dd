// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Publisher
//!
//! Publishes encoded values on a confirm channel. A publish only succeeds once the
//! broker has acknowledged it; a broker nack, a channel that is not in confirm mode
//! or a channel error before the confirmation all fail the call. No retry happens
//! here, retrying is up to the caller.

use crate::{
    channel::{new_confirm_channel, REPLY_SUCCESS},
    codec::{Codec, JsonCodec, MsgPackCodec},
    errors::AmqpError,
    otel,
};
use lapin::{
    options::BasicPublishOptions,
    publisher_confirm::Confirmation,
    types::{AMQPValue, FieldTable, ShortString},
    BasicProperties, Channel, Connection,
};
use opentelemetry::Context;
use serde::Serialize;
use std::{collections::BTreeMap, sync::Arc};
use tracing::{debug, error};
use uuid::Uuid;

/// Publishes `value` encoded with `codec` and waits for the broker confirmation.
///
/// The message carries the codec's content type, a fresh message id and the
/// current trace context in its headers. Success is only reported once the broker
/// has acknowledged the publish; a negative or missing confirmation is an error.
///
/// # Parameters
/// * `channel` - Channel with publisher confirms enabled, see
///   [`new_confirm_channel`](crate::channel::new_confirm_channel)
/// * `exchange` - Exchange to publish to
/// * `routing_key` - Routing key attached to the message
/// * `value` - Payload to encode
/// * `codec` - Codec used for the payload and its content type
///
/// # Returns
/// Ok(()) once the broker confirmed the message, `AmqpError::EncodingError` if the
/// payload could not be encoded, `AmqpError::PublishNotConfirmed` otherwise
pub async fn publish<T, C>(
    channel: &Channel,
    exchange: &str,
    routing_key: &str,
    value: &T,
    codec: &C,
) -> Result<(), AmqpError>
where
    T: Serialize + ?Sized,
    C: Codec,
{
    let payload = codec.encode(value)?;

    let mut headers = BTreeMap::<ShortString, AMQPValue>::default();
    otel::inject_context(&Context::current(), &mut headers);

    let properties = BasicProperties::default()
        .with_content_type(ShortString::from(codec.content_type()))
        .with_message_id(ShortString::from(Uuid::new_v4().to_string()))
        .with_headers(FieldTable::from(headers));

    let confirm = match channel
        .basic_publish(
            exchange,
            routing_key,
            BasicPublishOptions {
                immediate: false,
                mandatory: false,
            },
            &payload,
            properties,
        )
        .await
    {
        Err(err) => {
            error!(error = err.to_string(), "error publishing message");
            Err(AmqpError::PublishingError)
        }
        Ok(confirm) => Ok(confirm),
    }?;

    match confirm.await {
        Ok(Confirmation::Ack(_)) => {
            debug!(exchange, routing_key, "publish confirmed");
            Ok(())
        }
        Ok(Confirmation::Nack(_)) => {
            error!(exchange, routing_key, "broker rejected the publish");
            Err(AmqpError::PublishNotConfirmed(exchange.to_owned()))
        }
        Ok(Confirmation::NotRequested) => {
            error!(exchange, "publishing on a channel without confirms");
            Err(AmqpError::PublishNotConfirmed(exchange.to_owned()))
        }
        Err(err) => {
            error!(error = err.to_string(), "channel failed before confirmation");
            Err(AmqpError::PublishNotConfirmed(exchange.to_owned()))
        }
    }
}

/// Publisher owning one confirm channel.
pub struct Publisher {
    channel: Arc<Channel>,
}

impl Publisher {
    /// Opens a confirm channel on `conn`.
    ///
    /// # Parameters
    /// * `conn` - Connection the publisher channel is opened on
    ///
    /// # Returns
    /// A publisher ready to send confirmed messages
    pub async fn new(conn: &Connection) -> Result<Publisher, AmqpError> {
        Ok(Publisher {
            channel: new_confirm_channel(conn).await?,
        })
    }

    /// Publishes through the owned channel, see [`publish`].
    pub async fn publish<T, C>(
        &self,
        exchange: &str,
        routing_key: &str,
        value: &T,
        codec: &C,
    ) -> Result<(), AmqpError>
    where
        T: Serialize + ?Sized,
        C: Codec,
    {
        publish(&self.channel, exchange, routing_key, value, codec).await
    }

    /// [`Publisher::publish`] with the JSON codec.
    pub async fn publish_json<T>(
        &self,
        exchange: &str,
        routing_key: &str,
        value: &T,
    ) -> Result<(), AmqpError>
    where
        T: Serialize + ?Sized,
    {
        self.publish(exchange, routing_key, value, &JsonCodec).await
    }

    /// [`Publisher::publish`] with the MessagePack codec.
    pub async fn publish_msgpack<T>(
        &self,
        exchange: &str,
        routing_key: &str,
        value: &T,
    ) -> Result<(), AmqpError>
    where
        T: Serialize + ?Sized,
    {
        self.publish(exchange, routing_key, value, &MsgPackCodec)
            .await
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Closes the channel. Publishes still waiting for a confirmation fail.
    pub async fn close(&self) -> Result<(), AmqpError> {
        self.channel
            .close(REPLY_SUCCESS, "publisher closed")
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error to close publisher channel");
                AmqpError::CloseError("publisher channel".to_owned())
            })
    }
}
