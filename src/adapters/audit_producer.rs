use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::{
    core::avro::AvroMarshaller,
    ports::audit_producer::{AuditProducer, ProducerError},
};

/// Channel-backed audit producer.
///
/// Sends wait for free capacity in a bounded `mpsc` channel; the receiving
/// half is drained by [`run_audit_sink`] (or read directly in tests).
#[derive(Clone)]
pub struct ChannelProducer {
    tx: mpsc::Sender<Bytes>,
}

impl ChannelProducer {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl AuditProducer for ChannelProducer {
    async fn send(&self, event: Bytes) -> Result<(), ProducerError> {
        self.tx.send(event).await.map_err(|_| ProducerError::Closed)
    }
}

/// Drain audit messages until every producer handle is dropped.
///
/// Each message is decoded once so malformed payloads show up in the log;
/// the message itself is handed on as-is.
pub async fn run_audit_sink(mut rx: mpsc::Receiver<Bytes>, topic: String) {
    tracing::info!(topic = %topic, "Audit sink started");
    let marshaller = AvroMarshaller;
    let mut published: u64 = 0;

    while let Some(message) = rx.recv().await {
        match marshaller.unmarshal(&message) {
            Ok(event) => {
                published += 1;
                tracing::debug!(
                    topic = %topic,
                    bytes = message.len(),
                    request_id = %event.request_id,
                    path = %event.path,
                    status = event.status_code,
                    "Published audit event"
                );
            }
            Err(e) => {
                tracing::error!(topic = %topic, error = %e, "Dropping undecodable audit message");
            }
        }
    }

    tracing::info!(topic = %topic, published, "Audit sink stopped");
}
