pub mod audit;
pub mod avro;
pub mod clock;
pub mod context;
pub mod deprecation;
pub mod rewriter;
pub mod routing;

pub use audit::AuditEvent;
pub use avro::AvroMarshaller;
pub use clock::{Clock, SystemClock};
pub use context::RequestContext;
pub use deprecation::DeprecationEngine;
pub use rewriter::UrlRewriter;
pub use routing::{MountTable, ProxyTarget};
