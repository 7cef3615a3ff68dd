// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Delivery Processing
//!
//! Turns one delivery into exactly one acknowledgment outcome:
//! 1. The content type must match the subscription codec, otherwise `NackDiscard`
//! 2. The payload must decode, otherwise `NackDiscard`
//! 3. The handler decides; a handler error picks its own disposition and a
//!    panicking handler is treated as a permanent failure
//! 4. The outcome is sent to the broker

use crate::{
    ack::{resolve, AckType, Acknowledger, Handler},
    codec::Codec,
    errors::AmqpError,
    otel,
};
use lapin::protocol::basic::AMQPProperties;
use opentelemetry::{
    global::BoxedTracer,
    trace::{Span, Status},
};
use futures_util::FutureExt;
use serde::de::DeserializeOwned;
use std::{borrow::Cow, panic::AssertUnwindSafe};
use tracing::{debug, error, warn};

/// Picks the outcome for a delivery without touching the broker.
///
/// # Parameters
/// * `codec` - Codec of the subscription
/// * `handler` - Business logic for decoded messages
/// * `content_type` - Content type tag read from the delivery, if any
/// * `data` - Raw payload
///
/// # Returns
/// Exactly one outcome, whatever the handler does
pub(crate) async fn dispose<T, C, H>(
    codec: &C,
    handler: &H,
    content_type: Option<&str>,
    data: &[u8],
) -> AckType
where
    T: DeserializeOwned + Send + 'static,
    C: Codec,
    H: Handler<T>,
{
    if content_type != Some(codec.content_type()) {
        warn!(
            expected = codec.content_type(),
            received = content_type.unwrap_or_default(),
            "discarding message with unexpected content type"
        );
        return AckType::NackDiscard;
    }

    let msg: T = match codec.decode(data) {
        Ok(msg) => msg,
        Err(err) => {
            error!(error = err.to_string(), "discarding undecodable message");
            return AckType::NackDiscard;
        }
    };

    match AssertUnwindSafe(handler.handle(msg)).catch_unwind().await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(err)) => {
            let outcome = err.disposition();
            error!(error = err.to_string(), ?outcome, "handler failure");
            outcome
        }
        Err(payload) => {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|reason| reason.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_default();
            error!(panic = reason, "handler panicked, discarding message");
            AckType::NackDiscard
        }
    }
}

/// Processes a delivery end to end and returns the outcome applied to it.
///
/// # Parameters
/// * `tracer` - Tracer for the consumer span
/// * `props` - Delivery properties, with content type and trace headers
/// * `data` - Raw payload
/// * `redelivered` - Whether the broker delivered this message before
/// * `acker` - Broker-side resolution of the delivery
/// * `codec` - Codec of the subscription
/// * `handler` - Business logic for decoded messages
///
/// # Returns
/// The applied outcome, or the error raised while sending it to the broker
pub(crate) async fn consume<T, C, H, A>(
    tracer: &BoxedTracer,
    props: &AMQPProperties,
    data: &[u8],
    redelivered: bool,
    acker: &A,
    codec: &C,
    handler: &H,
) -> Result<AckType, AmqpError>
where
    T: DeserializeOwned + Send + 'static,
    C: Codec,
    H: Handler<T>,
    A: Acknowledger + ?Sized,
{
    let content_type = props.content_type().as_ref().map(|tag| tag.as_str());
    let (_ctx, mut span) = otel::consumer_span(props, tracer, codec.content_type());

    debug!(
        content_type = content_type.unwrap_or_default(),
        redelivered, "received message"
    );

    let outcome = dispose::<T, C, H>(codec, handler, content_type, data).await;

    if let Err(err) = resolve(acker, outcome).await {
        span.record_error(&err);
        span.set_status(Status::Error {
            description: Cow::from("failure to resolve message"),
        });
        return Err(err);
    }

    match outcome {
        AckType::Ack => span.set_status(Status::Ok),
        AckType::NackRequeue | AckType::NackDiscard => span.set_status(Status::Error {
            description: Cow::from(format!("message resolved with {outcome:?}")),
        }),
    }

    debug!(?outcome, "message resolved");
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ack::MockAcknowledger,
        codec::{JsonCodec, MsgPackCodec, JSON_CONTENT_TYPE, MSGPACK_CONTENT_TYPE},
        errors::HandlerError,
    };
    use lapin::{types::ShortString, BasicProperties};
    use mockall::predicate::eq;
    use opentelemetry::global;
    use serde::Deserialize;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    #[derive(Debug, PartialEq, Deserialize)]
    struct Sample {
        a: i32,
    }

    fn answering(
        outcome: Result<AckType, HandlerError>,
        calls: Arc<AtomicUsize>,
    ) -> impl Handler<Sample> {
        move |msg: Sample| {
            let outcome = outcome.clone();
            let calls = calls.clone();
            async move {
                assert_eq!(msg, Sample { a: 1 });
                calls.fetch_add(1, Ordering::SeqCst);
                outcome
            }
        }
    }

    #[tokio::test]
    async fn handler_outcome_is_used_for_valid_messages() {
        for outcome in [AckType::Ack, AckType::NackRequeue, AckType::NackDiscard] {
            let calls = Arc::new(AtomicUsize::new(0));
            let handler = answering(Ok(outcome), calls.clone());

            let got = dispose::<Sample, _, _>(
                &JsonCodec,
                &handler,
                Some(JSON_CONTENT_TYPE),
                br#"{"a":1}"#,
            )
            .await;

            assert_eq!(got, outcome);
            assert_eq!(calls.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn content_type_mismatch_is_discarded_without_calling_the_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = answering(Ok(AckType::Ack), calls.clone());

        let got = dispose::<Sample, _, _>(
            &JsonCodec,
            &handler,
            Some(MSGPACK_CONTENT_TYPE),
            br#"{"a":1}"#,
        )
        .await;
        assert_eq!(got, AckType::NackDiscard);

        let got = dispose::<Sample, _, _>(
            &JsonCodec,
            &handler,
            None,
            br#"{"a":1}"#,
        )
        .await;
        assert_eq!(got, AckType::NackDiscard);

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn undecodable_payload_is_discarded() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = answering(Ok(AckType::Ack), calls.clone());

        let got = dispose::<Sample, _, _>(
            &MsgPackCodec,
            &handler,
            Some(MSGPACK_CONTENT_TYPE),
            b"{",
        )
        .await;

        assert_eq!(got, AckType::NackDiscard);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn handler_errors_pick_their_disposition() {
        let calls = Arc::new(AtomicUsize::new(0));

        let transient = answering(Err(HandlerError::Transient("down".into())), calls.clone());
        let got = dispose::<Sample, _, _>(
            &JsonCodec,
            &transient,
            Some(JSON_CONTENT_TYPE),
            br#"{"a":1}"#,
        )
        .await;
        assert_eq!(got, AckType::NackRequeue);

        let permanent = answering(Err(HandlerError::Permanent("bad".into())), calls.clone());
        let got = dispose::<Sample, _, _>(
            &JsonCodec,
            &permanent,
            Some(JSON_CONTENT_TYPE),
            br#"{"a":1}"#,
        )
        .await;
        assert_eq!(got, AckType::NackDiscard);
    }

    struct Panicking;

    #[async_trait::async_trait]
    impl Handler<Sample> for Panicking {
        async fn handle(&self, msg: Sample) -> Result<AckType, HandlerError> {
            panic!("cannot handle {msg:?}")
        }
    }

    #[tokio::test]
    async fn panicking_handler_is_discarded() {
        let got = dispose::<Sample, _, _>(
            &JsonCodec,
            &Panicking,
            Some(JSON_CONTENT_TYPE),
            br#"{"a":1}"#,
        )
        .await;
        assert_eq!(got, AckType::NackDiscard);
    }

    #[tokio::test]
    async fn panicking_handler_still_resolves_the_delivery() {
        let props =
            BasicProperties::default().with_content_type(ShortString::from(JSON_CONTENT_TYPE));

        let mut acker = MockAcknowledger::new();
        acker.expect_ack().never();
        acker
            .expect_nack()
            .with(eq(false))
            .times(1)
            .returning(|_| Ok(()));

        let outcome = consume::<Sample, _, _, _>(
            &global::tracer("test"),
            &props,
            br#"{"a":1}"#,
            false,
            &acker,
            &JsonCodec,
            &Panicking,
        )
        .await;

        assert_eq!(outcome, Ok(AckType::NackDiscard));
    }

    #[tokio::test]
    async fn consume_sends_exactly_one_broker_action() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = answering(Ok(AckType::NackRequeue), calls);
        let props =
            BasicProperties::default().with_content_type(ShortString::from(JSON_CONTENT_TYPE));

        let mut acker = MockAcknowledger::new();
        acker.expect_ack().never();
        acker
            .expect_nack()
            .with(eq(true))
            .times(1)
            .returning(|_| Ok(()));

        let outcome = consume::<Sample, _, _, _>(
            &global::tracer("test"),
            &props,
            br#"{"a":1}"#,
            false,
            &acker,
            &JsonCodec,
            &handler,
        )
        .await;

        assert_eq!(outcome, Ok(AckType::NackRequeue));
    }

    #[tokio::test]
    async fn consume_discards_mismatched_content_type() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = answering(Ok(AckType::Ack), calls);
        let props = BasicProperties::default().with_content_type(ShortString::from("text/plain"));

        let mut acker = MockAcknowledger::new();
        acker.expect_ack().never();
        acker
            .expect_nack()
            .with(eq(false))
            .times(1)
            .returning(|_| Ok(()));

        let outcome = consume::<Sample, _, _, _>(
            &global::tracer("test"),
            &props,
            b"hello",
            true,
            &acker,
            &JsonCodec,
            &handler,
        )
        .await;

        assert_eq!(outcome, Ok(AckType::NackDiscard));
    }

    #[tokio::test]
    async fn consume_reports_broker_failures() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = answering(Ok(AckType::Ack), calls);
        let props =
            BasicProperties::default().with_content_type(ShortString::from(JSON_CONTENT_TYPE));

        let mut acker = MockAcknowledger::new();
        acker
            .expect_ack()
            .times(1)
            .returning(|| Err(AmqpError::AckMessageError));

        let outcome = consume::<Sample, _, _, _>(
            &global::tracer("test"),
            &props,
            br#"{"a":1}"#,
            false,
            &acker,
            &JsonCodec,
            &handler,
        )
        .await;

        assert_eq!(outcome, Err(AmqpError::AckMessageError));
    }
}
