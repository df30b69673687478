use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use http::{HeaderMap, HeaderName, Request, StatusCode, header};
use http_body_util::BodyExt;
use serde::Deserialize;

use crate::ports::{
    http_client::HttpClient,
    identity::{IdentityError, IdentityResolver},
};

/// Token header set by the publishing front end.
pub const FLORENCE_TOKEN_HEADER: &str = "x-florence-token";

#[derive(Deserialize)]
struct IdentityResponse {
    identifier: String,
}

/// Resolves callers by asking the CMS `/identity` endpoint.
///
/// Only the credential headers are forwarded. Requests without credentials
/// are anonymous and never reach the CMS.
pub struct ZebedeeIdentityClient {
    identity_url: String,
    client: Arc<dyn HttpClient>,
}

impl ZebedeeIdentityClient {
    pub fn new(zebedee_url: &str, client: Arc<dyn HttpClient>) -> Self {
        Self {
            identity_url: format!("{}/identity", zebedee_url.trim_end_matches('/')),
            client,
        }
    }
}

#[async_trait]
impl IdentityResolver for ZebedeeIdentityClient {
    async fn resolve(&self, headers: &HeaderMap) -> Result<Option<String>, IdentityError> {
        let credentials: Vec<(HeaderName, _)> = [
            HeaderName::from_static(FLORENCE_TOKEN_HEADER),
            header::AUTHORIZATION,
        ]
        .into_iter()
        .filter_map(|name| headers.get(&name).cloned().map(|value| (name, value)))
        .collect();

        if credentials.is_empty() {
            return Ok(None);
        }

        let mut builder = Request::get(&self.identity_url);
        for (name, value) in credentials {
            builder = builder.header(name, value);
        }
        let request = builder
            .body(AxumBody::empty())
            .map_err(|e| IdentityError::Unavailable(e.to_string()))?;

        let response = self
            .client
            .send_request(request)
            .await
            .map_err(|e| IdentityError::Unavailable(e.to_string()))?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::UNAUTHORIZED | StatusCode::NOT_FOUND => return Ok(None),
            other => return Err(IdentityError::UnexpectedStatus(other.as_u16())),
        }

        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| IdentityError::Unavailable(e.to_string()))?
            .to_bytes();
        let parsed: IdentityResponse = serde_json::from_slice(&body)
            .map_err(|e| IdentityError::InvalidResponse(e.to_string()))?;

        Ok(Some(parsed.identifier).filter(|id| !id.is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use axum::response::Response;

    use super::*;
    use crate::adapters::test_support::MockHttpClient;

    fn headers_with_token() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(FLORENCE_TOKEN_HEADER, "token-1".parse().unwrap());
        headers.insert(header::COOKIE, "session=abc".parse().unwrap());
        headers
    }

    #[tokio::test]
    async fn test_anonymous_request_skips_lookup() {
        let client = Arc::new(MockHttpClient::with_body("{}"));
        let resolver = ZebedeeIdentityClient::new("http://zebedee:8082", client.clone());

        assert_eq!(resolver.resolve(&HeaderMap::new()).await.unwrap(), None);
        assert!(client.requests().is_empty());
    }

    #[tokio::test]
    async fn test_identifier_is_returned_and_only_credentials_forwarded() {
        let client = Arc::new(MockHttpClient::with_body(
            r#"{"identifier":"publisher@ons.gov.uk"}"#,
        ));
        let resolver = ZebedeeIdentityClient::new("http://zebedee:8082/", client.clone());

        let identity = resolver.resolve(&headers_with_token()).await.unwrap();
        assert_eq!(identity.as_deref(), Some("publisher@ons.gov.uk"));

        let seen = client.requests();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].uri, "http://zebedee:8082/identity");
        assert_eq!(seen[0].headers[FLORENCE_TOKEN_HEADER], "token-1");
        assert!(!seen[0].headers.contains_key(header::COOKIE));
    }

    #[tokio::test]
    async fn test_unauthorised_is_anonymous() {
        let client = Arc::new(MockHttpClient::new(|_| {
            Ok(Response::builder()
                .status(StatusCode::UNAUTHORIZED)
                .body(AxumBody::empty())
                .unwrap())
        }));
        let resolver = ZebedeeIdentityClient::new("http://zebedee:8082", client);
        assert_eq!(resolver.resolve(&headers_with_token()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_transport_failure_is_an_error() {
        let resolver =
            ZebedeeIdentityClient::new("http://zebedee:8082", Arc::new(MockHttpClient::failing()));
        let err = resolver.resolve(&headers_with_token()).await.unwrap_err();
        assert!(matches!(err, IdentityError::Unavailable(_)));
    }
}
