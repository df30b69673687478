use async_trait::async_trait;
use http::HeaderMap;
use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum IdentityError {
    #[error("identity service unreachable: {0}")]
    Unavailable(String),

    #[error("identity service returned {0}")]
    UnexpectedStatus(u16),

    #[error("invalid identity response: {0}")]
    InvalidResponse(String),
}

/// IdentityResolver looks up who is calling, given the inbound headers.
///
/// `Ok(None)` means the caller is anonymous; that is not an error.
#[async_trait]
pub trait IdentityResolver: Send + Sync + 'static {
    async fn resolve(&self, headers: &HeaderMap) -> Result<Option<String>, IdentityError>;
}
