// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types
//!
//! Errors are split by who can act on them. `AmqpError` covers everything the broker
//! or the channel can fail at and is propagated to the caller. `CodecError` and
//! `HandlerError` are local to a single message and are always resolved through the
//! acknowledgment protocol instead of reaching the subscription loop.

use crate::ack::AckType;
use thiserror::Error;

/// Represents errors that can occur during AMQP/RabbitMQ operations.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AmqpError {
    /// Internal errors that don't fit into other categories
    #[error("internal error")]
    InternalError,

    /// The configuration could not be parsed
    #[error("invalid configuration `{0}`")]
    InvalidConfig(String),

    /// Error establishing a connection to the RabbitMQ server
    #[error("failure to connect")]
    ConnectionError,

    /// Error creating a channel from an established connection
    #[error("failure to create a channel")]
    ChannelError,

    /// Error declaring an exchange with the given name
    #[error("failure to declare an exchange `{0}`: {1}")]
    DeclareExchangeError(String, String),

    /// Error declaring a queue, usually a conflict with an existing declaration
    #[error("failure to declare a queue `{0}`: {1}")]
    DeclareQueueError(String, String),

    /// Error binding a queue to an exchange
    #[error("failure to bind exchange `{0}` to queue `{1}`")]
    BindingExchangeToQueueError(String, String),

    /// The consumer stream failed, usually because the channel or the connection
    /// was closed by the broker
    #[error("consumer on queue `{0}` failed: {1}")]
    ConsumerError(String, String),

    /// Error configuring Quality of Service parameters
    #[error("failure to configure qos `{0}`")]
    QoSDeclarationError(String),

    /// Error declaring a consumer
    #[error("failure to declare consumer on queue `{0}`")]
    ConsumerDeclarationError(String),

    /// Error switching a channel to publisher confirm mode
    #[error("failure to enable publisher confirms")]
    ConfirmSelectError,

    /// Error encoding an outgoing payload
    #[error(transparent)]
    EncodingError(#[from] CodecError),

    /// Error publishing a message
    #[error("failure to publish")]
    PublishingError,

    /// The broker did not positively confirm a publish
    #[error("publish to `{0}` was not confirmed by the broker")]
    PublishNotConfirmed(String),

    /// Error acknowledging a message
    #[error("failure to ack message")]
    AckMessageError,

    /// Error negative-acknowledging a message
    #[error("failure to nack message")]
    NackMessageError,

    /// Error closing a channel or the connection
    #[error("failure to close `{0}`")]
    CloseError(String),
}

/// Failure to turn a payload into bytes or back.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("failure to encode `{content_type}` payload: {reason}")]
    Encode {
        content_type: &'static str,
        reason: String,
    },

    #[error("failure to decode `{content_type}` payload: {reason}")]
    Decode {
        content_type: &'static str,
        reason: String,
    },

    #[error("unsupported content type `{0}`")]
    UnsupportedContentType(String),
}

/// Unexpected failure raised by a message handler.
///
/// The variant is the handler's statement of whether a retry could succeed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// Retrying later may succeed, e.g. a downstream publish failed
    #[error("transient handler failure: {0}")]
    Transient(String),

    /// The message can never be processed, e.g. it contradicts the game state
    #[error("permanent handler failure: {0}")]
    Permanent(String),
}

impl HandlerError {
    /// The disposition applied to the message that caused this failure.
    pub fn disposition(&self) -> AckType {
        match self {
            HandlerError::Transient(_) => AckType::NackRequeue,
            HandlerError::Permanent(_) => AckType::NackDiscard,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_error_dispositions() {
        assert_eq!(
            HandlerError::Transient("publish failed".into()).disposition(),
            AckType::NackRequeue
        );
        assert_eq!(
            HandlerError::Permanent("not involved".into()).disposition(),
            AckType::NackDiscard
        );
    }

    #[test]
    fn codec_error_converts_into_amqp_error() {
        let err = CodecError::Encode {
            content_type: "application/json",
            reason: "key must be a string".into(),
        };
        assert_eq!(AmqpError::from(err.clone()), AmqpError::EncodingError(err));
    }
}
