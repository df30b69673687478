pub mod audit_producer;
pub mod http_client;
pub mod identity;

pub use audit_producer::{AuditProducer, ProducerError};
pub use http_client::{HttpClient, HttpClientError, HttpClientResult};
pub use identity::{IdentityError, IdentityResolver};
