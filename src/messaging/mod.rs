//! # Messaging Layer
//!
//! Queue transport plumbing: wire payloads, transport error taxonomy, and
//! the pgmq-backed queue client with consumer-group style semantics
//! (ack-required delivery, visibility timeouts, idle-time claiming of
//! abandoned pending entries).

pub mod errors;
pub mod message;
pub mod queue_client;

pub use errors::MessagingError;
pub use message::{BrokerEnvelope, DeadLetterMessage, IngestTaskMessage};
pub use queue_client::{ClaimedDelivery, IngestQueueClient, PendingDelivery};
