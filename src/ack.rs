// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Acknowledgment Protocol
//!
//! Every delivery leaves the `Delivered` state exactly once, through one of the three
//! `AckType` outcomes. This module owns the mapping from those outcomes onto the
//! broker's acknowledge and reject primitives, and the handler contract that
//! produces them.

use crate::errors::{AmqpError, HandlerError};
use async_trait::async_trait;
use lapin::{
    acker::Acker,
    options::{BasicAckOptions, BasicNackOptions},
};
use std::future::Future;
use tracing::error;

#[cfg(test)]
use mockall::automock;

/// Outcome of processing a single message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AckType {
    /// Processed; remove the message from the queue.
    Ack,
    /// Retryable failure; return the message to the queue for redelivery.
    NackRequeue,
    /// Permanent failure; remove the message, the broker dead-letters it.
    NackDiscard,
}

/// Broker-side resolution of one delivery.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self) -> Result<(), AmqpError>;

    async fn nack(&self, requeue: bool) -> Result<(), AmqpError>;
}

#[async_trait]
impl Acknowledger for Acker {
    async fn ack(&self) -> Result<(), AmqpError> {
        Acker::ack(self, BasicAckOptions { multiple: false })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error whiling ack msg");
                AmqpError::AckMessageError
            })
    }

    async fn nack(&self, requeue: bool) -> Result<(), AmqpError> {
        Acker::nack(
            self,
            BasicNackOptions {
                multiple: false,
                requeue,
            },
        )
        .await
        .map_err(|err| {
            error!(error = err.to_string(), requeue, "error whiling nack msg");
            AmqpError::NackMessageError
        })
    }
}

/// Applies `outcome` to the delivery behind `acker`.
pub async fn resolve<A>(acker: &A, outcome: AckType) -> Result<(), AmqpError>
where
    A: Acknowledger + ?Sized,
{
    match outcome {
        AckType::Ack => acker.ack().await,
        AckType::NackRequeue => acker.nack(true).await,
        AckType::NackDiscard => acker.nack(false).await,
    }
}

/// Business logic invoked for every decoded message of type `T`.
///
/// Returning `Err` is reserved for unexpected failures; the error variant selects
/// the disposition, see [`HandlerError::disposition`].
#[async_trait]
pub trait Handler<T>: Send + Sync + 'static
where
    T: Send + 'static,
{
    async fn handle(&self, msg: T) -> Result<AckType, HandlerError>;
}

#[async_trait]
impl<T, F, Fut> Handler<T> for F
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<AckType, HandlerError>> + Send + 'static,
{
    async fn handle(&self, msg: T) -> Result<AckType, HandlerError> {
        (self)(msg).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;

    #[tokio::test]
    async fn ack_acknowledges() {
        let mut acker = MockAcknowledger::new();
        acker.expect_ack().times(1).returning(|| Ok(()));
        acker.expect_nack().never();

        assert!(resolve(&acker, AckType::Ack).await.is_ok());
    }

    #[tokio::test]
    async fn nack_requeue_rejects_with_requeue() {
        let mut acker = MockAcknowledger::new();
        acker.expect_ack().never();
        acker
            .expect_nack()
            .with(eq(true))
            .times(1)
            .returning(|_| Ok(()));

        assert!(resolve(&acker, AckType::NackRequeue).await.is_ok());
    }

    #[tokio::test]
    async fn nack_discard_rejects_without_requeue() {
        let mut acker = MockAcknowledger::new();
        acker.expect_ack().never();
        acker
            .expect_nack()
            .with(eq(false))
            .times(1)
            .returning(|_| Ok(()));

        assert!(resolve(&acker, AckType::NackDiscard).await.is_ok());
    }

    #[tokio::test]
    async fn broker_failures_surface() {
        let mut acker = MockAcknowledger::new();
        acker
            .expect_ack()
            .returning(|| Err(AmqpError::AckMessageError));

        assert_eq!(
            resolve(&acker, AckType::Ack).await,
            Err(AmqpError::AckMessageError)
        );
    }

    #[tokio::test]
    async fn closures_are_handlers() {
        let handler = |n: u32| async move {
            if n % 2 == 0 {
                Ok(AckType::Ack)
            } else {
                Err(HandlerError::Transient(format!("odd {n}")))
            }
        };

        assert_eq!(Handler::<u32>::handle(&handler, 2).await, Ok(AckType::Ack));
        assert_eq!(
            Handler::<u32>::handle(&handler, 3).await,
            Err(HandlerError::Transient("odd 3".into()))
        );
    }
}
