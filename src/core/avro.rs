//! Avro binary encoding of [`AuditEvent`] records.
//!
//! The record layout is fixed by [`AUDIT_EVENT_SCHEMA`]; fields are written in
//! schema order using the Avro binary rules: `long`/`int` as zig-zag varints,
//! `string` as a `long` byte length followed by UTF-8 bytes.
use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::core::audit::AuditEvent;

/// Writer schema shared with audit consumers.
pub const AUDIT_EVENT_SCHEMA: &str = r#"{
  "type": "record",
  "name": "AuditEvent",
  "fields": [
    {"name": "created_at", "type": "long"},
    {"name": "request_id", "type": "string", "default": ""},
    {"name": "identity", "type": "string", "default": ""},
    {"name": "collection_id", "type": "string", "default": ""},
    {"name": "path", "type": "string"},
    {"name": "method", "type": "string"},
    {"name": "status_code", "type": "int"},
    {"name": "query_param", "type": "string"}
  ]
}"#;

// A 64-bit zig-zag varint never needs more than ten bytes.
const MAX_VARINT_BYTES: usize = 10;

#[derive(Error, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum CodecError {
    #[error("event required but was nil")]
    MissingEvent,

    #[error("unexpected end of input while reading {0}")]
    UnexpectedEof(&'static str),

    #[error("varint for {0} is too long")]
    VarintOverflow(&'static str),

    #[error("value for {0} is out of range")]
    OutOfRange(&'static str),

    #[error("string field {0} is not valid UTF-8")]
    InvalidUtf8(&'static str),

    #[error("{0} trailing bytes after record")]
    TrailingBytes(usize),
}

/// Marshals audit events to and from their Avro binary form.
#[derive(Debug, Clone, Copy, Default)]
pub struct AvroMarshaller;

impl AvroMarshaller {
    pub fn marshal(&self, event: Option<&AuditEvent>) -> Result<Bytes, CodecError> {
        let event = event.ok_or(CodecError::MissingEvent)?;

        let mut buf = BytesMut::with_capacity(64 + event.path.len() + event.query_param.len());
        put_long(&mut buf, event.created_at);
        put_string(&mut buf, &event.request_id);
        put_string(&mut buf, &event.identity);
        put_string(&mut buf, &event.collection_id);
        put_string(&mut buf, &event.path);
        put_string(&mut buf, &event.method);
        put_long(&mut buf, i64::from(event.status_code));
        put_string(&mut buf, &event.query_param);
        Ok(buf.freeze())
    }

    pub fn unmarshal(&self, mut data: &[u8]) -> Result<AuditEvent, CodecError> {
        let event = AuditEvent {
            created_at: get_long(&mut data, "created_at")?,
            request_id: get_string(&mut data, "request_id")?,
            identity: get_string(&mut data, "identity")?,
            collection_id: get_string(&mut data, "collection_id")?,
            path: get_string(&mut data, "path")?,
            method: get_string(&mut data, "method")?,
            status_code: i32::try_from(get_long(&mut data, "status_code")?)
                .map_err(|_| CodecError::OutOfRange("status_code"))?,
            query_param: get_string(&mut data, "query_param")?,
        };
        if data.has_remaining() {
            return Err(CodecError::TrailingBytes(data.remaining()));
        }
        Ok(event)
    }
}

fn put_long(buf: &mut BytesMut, value: i64) {
    let mut zigzag = ((value << 1) ^ (value >> 63)) as u64;
    while zigzag >= 0x80 {
        buf.put_u8((zigzag as u8 & 0x7f) | 0x80);
        zigzag >>= 7;
    }
    buf.put_u8(zigzag as u8);
}

fn put_string(buf: &mut BytesMut, value: &str) {
    put_long(buf, value.len() as i64);
    buf.put_slice(value.as_bytes());
}

fn get_long(data: &mut &[u8], field: &'static str) -> Result<i64, CodecError> {
    let mut zigzag: u64 = 0;
    for i in 0..MAX_VARINT_BYTES {
        if !data.has_remaining() {
            return Err(CodecError::UnexpectedEof(field));
        }
        let byte = data.get_u8();
        zigzag |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(((zigzag >> 1) as i64) ^ -((zigzag & 1) as i64));
        }
    }
    Err(CodecError::VarintOverflow(field))
}

fn get_string(data: &mut &[u8], field: &'static str) -> Result<String, CodecError> {
    let len = usize::try_from(get_long(data, field)?).map_err(|_| CodecError::OutOfRange(field))?;
    if data.remaining() < len {
        return Err(CodecError::UnexpectedEof(field));
    }
    let raw = data.copy_to_bytes(len);
    String::from_utf8(raw.to_vec()).map_err(|_| CodecError::InvalidUtf8(field))
}
