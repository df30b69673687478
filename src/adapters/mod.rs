pub mod audit_producer;
pub mod health_checker;
pub mod http_client;
pub mod identity;
pub mod interceptor;
pub mod middleware;
pub mod reverse_proxy;
pub mod router;

#[cfg(test)]
pub(crate) mod test_support;

/// Re-export commonly used types from adapters
pub use audit_producer::{ChannelProducer, run_audit_sink};
pub use health_checker::HealthChecker;
pub use http_client::HttpClientAdapter;
pub use identity::ZebedeeIdentityClient;
pub use reverse_proxy::ReverseProxy;
pub use router::{Collaborators, build_router, health_targets};
