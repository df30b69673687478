use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProducerError {
    /// The consuming side of the producer has gone away.
    #[error("audit producer is closed")]
    Closed,

    #[error("audit publish failed: {0}")]
    Publish(String),
}

/// AuditProducer defines the port for publishing marshalled audit events.
///
/// `send` is a hand-off: it waits while the producer's queue is full, so a
/// slow sink back-pressures the request that is being audited.
#[async_trait]
pub trait AuditProducer: Send + Sync + 'static {
    async fn send(&self, event: Bytes) -> Result<(), ProducerError>;
}
