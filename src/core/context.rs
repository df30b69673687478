/// Header carrying the caller supplied (or generated) request id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";
/// Header carrying the collection the caller is working in.
pub const COLLECTION_ID_HEADER: &str = "collection-id";

/// Per-request caller details, stored as a request extension by the identity
/// middleware and read by the audit middleware.
///
/// The three fields correspond to the `request-id`, `caller-identity` and
/// `collection-id` context keys. Missing values are not errors; they leave
/// the audit fields blank.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub request_id: String,
    pub caller_identity: Option<String>,
    pub collection_id: Option<String>,
}
