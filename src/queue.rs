// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Definitions
//!
//! Queues come in two lifetime classes. Whatever the class, every queue declared
//! through this crate is dead-letter bound, so a message rejected without requeue
//! is moved to the dead-letter exchange instead of being dropped.

/// Dead-letter exchange every queue is bound to unless overridden.
pub const DEFAULT_DEAD_LETTER_EXCHANGE: &str = "peril_dlx";

/// Lifetime class of a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    /// Fixed name, survives broker restarts, shared by any number of consumers.
    Durable,
    /// Exclusive to the declaring connection and deleted with it.
    Transient,
}

/// Definition of a queue and the dead-letter exchange it reports to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueDefinition {
    pub(crate) name: String,
    pub(crate) kind: QueueKind,
    pub(crate) dead_letter_exchange: String,
}

impl QueueDefinition {
    /// A queue named `name`. An empty name asks the broker to pick one, which only
    /// makes sense for transient queues.
    pub fn new(name: &str, kind: QueueKind) -> QueueDefinition {
        QueueDefinition {
            name: name.to_owned(),
            kind,
            dead_letter_exchange: DEFAULT_DEAD_LETTER_EXCHANGE.to_owned(),
        }
    }

    pub fn durable(name: &str) -> QueueDefinition {
        QueueDefinition::new(name, QueueKind::Durable)
    }

    pub fn transient(name: &str) -> QueueDefinition {
        QueueDefinition::new(name, QueueKind::Transient)
    }

    /// Routes discarded messages to `exchange` instead of the default DLX.
    pub fn dead_letter_exchange(mut self, exchange: &str) -> Self {
        self.dead_letter_exchange = exchange.to_owned();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> QueueKind {
        self.kind
    }

    pub(crate) fn is_durable(&self) -> bool {
        self.kind == QueueKind::Durable
    }

    pub(crate) fn is_exclusive(&self) -> bool {
        self.kind == QueueKind::Transient
    }

    pub(crate) fn is_auto_delete(&self) -> bool {
        self.kind == QueueKind::Transient
    }
}

/// The exchange side of a binding; the queue side is whatever name the broker
/// returns when the queue is declared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueBinding {
    pub(crate) exchange_name: String,
    pub(crate) routing_key: String,
}

impl QueueBinding {
    /// Binds to `exchange` with `routing_key` as the pattern.
    pub fn new(exchange: &str, routing_key: &str) -> QueueBinding {
        QueueBinding {
            exchange_name: exchange.to_owned(),
            routing_key: routing_key.to_owned(),
        }
    }

    pub fn exchange(&self) -> &str {
        &self.exchange_name
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durable_queues_are_shared_and_persistent() {
        let def = QueueDefinition::durable("war");
        assert!(def.is_durable());
        assert!(!def.is_exclusive());
        assert!(!def.is_auto_delete());
        assert_eq!(def.dead_letter_exchange, DEFAULT_DEAD_LETTER_EXCHANGE);
    }

    #[test]
    fn transient_queues_die_with_the_connection() {
        let def = QueueDefinition::transient("pause.washington").dead_letter_exchange("test_dlx");
        assert!(!def.is_durable());
        assert!(def.is_exclusive());
        assert!(def.is_auto_delete());
        assert_eq!(def.dead_letter_exchange, "test_dlx");
    }
}
