//! Response body interception for JSON link rewriting.
//!
//! The body is inspected chunk by chunk until the first non-whitespace byte
//! shows up. If it is `{` or `[` the whole body is buffered and handed to the
//! [`UrlRewriter`]; otherwise the chunks read so far are replayed in front of
//! the untouched remainder of the stream.
use std::sync::Arc;

use axum::{
    body::Body,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::{Bytes, BytesMut};
use futures_util::{StreamExt, stream};

use crate::core::rewriter::UrlRewriter;

/// Shape of a response body, decided from its first non-whitespace byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyShape {
    Json,
    Other,
    Empty,
}

pub fn classify(byte: Option<u8>) -> BodyShape {
    match byte {
        Some(b'{' | b'[') => BodyShape::Json,
        Some(_) => BodyShape::Other,
        None => BodyShape::Empty,
    }
}

fn first_significant(chunk: &[u8]) -> Option<u8> {
    chunk.iter().copied().find(|b| !b.is_ascii_whitespace())
}

/// Apply `rewriter` to `response`'s body when it is a JSON document.
pub async fn intercept(response: Response, rewriter: &UrlRewriter) -> Response {
    let (mut parts, body) = response.into_parts();
    let mut stream = body.into_data_stream();
    let mut prefix: Vec<Bytes> = Vec::new();

    let shape = loop {
        match stream.next().await {
            Some(Ok(chunk)) => {
                let shape = classify(first_significant(&chunk));
                prefix.push(chunk);
                if shape != BodyShape::Empty {
                    break shape;
                }
            }
            Some(Err(e)) => {
                tracing::error!(error = %e, "Failed reading upstream response body");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
            None => break BodyShape::Empty,
        }
    };

    if shape != BodyShape::Json {
        let replay = stream::iter(prefix.into_iter().map(Ok::<_, axum::Error>));
        return Response::from_parts(parts, Body::from_stream(replay.chain(stream)));
    }

    let mut buffered = BytesMut::new();
    for chunk in prefix {
        buffered.extend_from_slice(&chunk);
    }
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(chunk) => buffered.extend_from_slice(&chunk),
            Err(e) => {
                tracing::error!(error = %e, "Failed reading upstream JSON body");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        }
    }

    match rewriter.rewrite(&buffered) {
        Ok(rewritten) => {
            parts
                .headers
                .insert(header::CONTENT_LENGTH, HeaderValue::from(rewritten.len()));
            Response::from_parts(parts, Body::from(rewritten))
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to rewrite JSON response");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
