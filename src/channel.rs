// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Connection and Channel Management
//!
//! One connection is shared by the whole process. Every subscription and every
//! publisher carves its own channel out of it and owns that channel for its whole
//! life. [`Broker`] is the owner of the connection: it hands out publishers, keeps
//! track of subscriptions and shuts everything down in order.

use crate::{
    ack::Handler,
    codec::Codec,
    configs::Configs,
    errors::AmqpError,
    publisher::Publisher,
    queue::QueueKind,
    subscriber::{subscribe, Subscription},
};
use lapin::{
    options::ConfirmSelectOptions, types::LongString, Channel, Connection, ConnectionProperties,
};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Reply code sent when closing channels and connections normally
pub(crate) const REPLY_SUCCESS: u16 = 200;

/// Connects to the broker described by `cfg`.
///
/// The connection is named after the application so it can be told apart in the
/// broker's management views.
///
/// # Parameters
/// * `cfg` - Application name and RabbitMQ settings
///
/// # Returns
/// The established connection or `AmqpError::ConnectionError`
pub async fn new_amqp_connection(cfg: &Configs) -> Result<Connection, AmqpError> {
    debug!("creating amqp connection...");
    let options = ConnectionProperties::default()
        .with_connection_name(LongString::from(cfg.app_name.clone()));

    match Connection::connect(&cfg.rabbitmq.uri(), options).await {
        Ok(conn) => {
            debug!("amqp connected");
            Ok(conn)
        }
        Err(err) => {
            error!(error = err.to_string(), "failure to connect");
            Err(AmqpError::ConnectionError)
        }
    }
}

/// Opens a plain channel on `conn`.
pub async fn new_channel(conn: &Connection) -> Result<Arc<Channel>, AmqpError> {
    match conn.create_channel().await {
        Ok(c) => {
            debug!(channel = c.id(), "channel created");
            Ok(Arc::new(c))
        }
        Err(err) => {
            error!(error = err.to_string(), "error to create the channel");
            Err(AmqpError::ChannelError)
        }
    }
}

/// Opens a channel on `conn` with publisher confirms enabled.
pub async fn new_confirm_channel(conn: &Connection) -> Result<Arc<Channel>, AmqpError> {
    let channel = new_channel(conn).await?;

    match channel
        .confirm_select(ConfirmSelectOptions { nowait: false })
        .await
    {
        Ok(_) => Ok(channel),
        Err(err) => {
            error!(error = err.to_string(), "error to enable publisher confirms");
            Err(AmqpError::ConfirmSelectError)
        }
    }
}

/// Owner of the process-wide connection.
///
/// Publishers and subscriptions each get their own channel on the shared
/// connection. Subscriptions started through the broker are tracked so that
/// [`Broker::shutdown`] can drain them before the connection goes away.
pub struct Broker {
    conn: Arc<Connection>,
    subscriptions: Vec<Subscription>,
}

impl Broker {
    /// Connects to the broker described by `cfg`.
    ///
    /// # Parameters
    /// * `cfg` - Application name and RabbitMQ settings
    ///
    /// # Returns
    /// A broker without subscriptions
    pub async fn connect(cfg: &Configs) -> Result<Broker, AmqpError> {
        let conn = new_amqp_connection(cfg).await?;
        Ok(Broker::new(Arc::new(conn)))
    }

    /// Takes ownership of an already established connection.
    pub fn new(conn: Arc<Connection>) -> Broker {
        Broker {
            conn,
            subscriptions: vec![],
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// A publisher on a new confirm channel.
    pub async fn publisher(&self) -> Result<Publisher, AmqpError> {
        Publisher::new(&self.conn).await
    }

    /// Starts a subscription that is drained when the broker shuts down.
    ///
    /// # Parameters
    /// * `exchange` - Exchange the queue is bound to
    /// * `queue_name` - Queue to declare, empty for a broker-named queue
    /// * `routing_key` - Binding key, may carry topic wildcards
    /// * `kind` - Durable or transient queue
    /// * `codec` - Codec every delivery must be tagged with
    /// * `handler` - Business logic deciding the outcome of each message
    ///
    /// # Returns
    /// The name of the queue the subscription consumes from
    pub async fn subscribe<T, C, H>(
        &mut self,
        exchange: &str,
        queue_name: &str,
        routing_key: &str,
        kind: QueueKind,
        codec: C,
        handler: H,
    ) -> Result<String, AmqpError>
    where
        T: DeserializeOwned + Send + 'static,
        C: Codec,
        H: Handler<T>,
    {
        let subscription =
            subscribe(&self.conn, exchange, queue_name, routing_key, kind, codec, handler).await?;
        let queue = subscription.queue().to_owned();
        self.subscriptions.push(subscription);
        Ok(queue)
    }

    /// Graceful shutdown.
    ///
    /// Subscriptions stop taking deliveries and finish the message they are
    /// processing before their channels close; the connection goes last.
    pub async fn shutdown(self) -> Result<(), AmqpError> {
        debug!(
            subscriptions = self.subscriptions.len(),
            "draining subscriptions"
        );

        for subscription in self.subscriptions {
            if let Err(err) = subscription.shutdown().await {
                warn!(error = err.to_string(), "subscription did not close cleanly");
            }
        }

        match self.conn.close(REPLY_SUCCESS, "shutdown").await {
            Ok(_) => {
                debug!("amqp connection closed");
                Ok(())
            }
            Err(err) => {
                error!(error = err.to_string(), "error to close the connection");
                Err(AmqpError::CloseError("connection".to_owned()))
            }
        }
    }
}
