use chrono::{DateTime, Utc};
use http::{Method, Uri};

use crate::core::context::RequestContext;

/// One audit record. Emitted twice per request: before dispatch with
/// `status_code == 0` and after the inner handler with the final status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditEvent {
    /// Milliseconds since the unix epoch.
    pub created_at: i64,
    pub request_id: String,
    pub identity: String,
    pub collection_id: String,
    pub path: String,
    pub method: String,
    pub status_code: i32,
    pub query_param: String,
}

impl AuditEvent {
    /// Build the pre-dispatch event from the request line and the caller
    /// context left by the identity middleware.
    pub fn from_request(
        context: Option<&RequestContext>,
        method: &Method,
        uri: &Uri,
        now: DateTime<Utc>,
    ) -> Self {
        let (request_id, identity, collection_id) = match context {
            Some(ctx) => (
                ctx.request_id.clone(),
                ctx.caller_identity.clone().unwrap_or_default(),
                ctx.collection_id.clone().unwrap_or_default(),
            ),
            None => Default::default(),
        };

        Self {
            created_at: now.timestamp_millis(),
            request_id,
            identity,
            collection_id,
            path: uri.path().to_string(),
            method: method.to_string(),
            status_code: 0,
            query_param: uri.query().unwrap_or_default().to_string(),
        }
    }

    /// The same event carrying the final response status.
    pub fn with_status(&self, status: u16) -> Self {
        Self {
            status_code: i32::from(status),
            ..self.clone()
        }
    }
}
