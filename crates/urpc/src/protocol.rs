// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

// urpc wire format: call envelopes and their binary encoding.
//
// All parsing is safe: malformed input returns Err, never panics.
// Encoding is deterministic, so every retransmission of one envelope
// produces identical bytes.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Decode failures for urpc envelopes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Not enough bytes to parse a header / field.
    BufferTooShort,
    /// Leading bytes are not the urpc magic.
    BadMagic,
    /// Wire version this build does not speak.
    UnsupportedVersion(u8),
    /// Unknown message kind byte.
    UnknownKind(u8),
    /// Unknown value tag byte.
    UnknownValueTag(u8),
    /// Unknown address family byte.
    UnknownAddressFamily(u8),
    /// A string field is not valid UTF-8.
    InvalidUtf8,
    /// Bytes left over after a complete envelope.
    TrailingBytes(usize),
    /// A field does not fit its length prefix (encode side).
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BufferTooShort => write!(f, "buffer too short"),
            Self::BadMagic => write!(f, "bad magic"),
            Self::UnsupportedVersion(v) => write!(f, "unsupported wire version: {}", v),
            Self::UnknownKind(k) => write!(f, "unknown message kind: 0x{:02x}", k),
            Self::UnknownValueTag(t) => write!(f, "unknown value tag: 0x{:02x}", t),
            Self::UnknownAddressFamily(a) => write!(f, "unknown address family: {}", a),
            Self::InvalidUtf8 => write!(f, "invalid UTF-8 in string field"),
            Self::TrailingBytes(n) => write!(f, "{} trailing bytes after envelope", n),
            Self::FieldTooLong { field, len, max } => {
                write!(f, "{} too long: {} > {}", field, len, max)
            }
        }
    }
}

impl std::error::Error for ProtocolError {}

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Leading bytes of every urpc datagram.
pub const MAGIC: [u8; 4] = *b"URPC";

/// Current wire version.
pub const WIRE_VERSION: u8 = 1;

/// Fixed header size: magic (4) + version (1) + kind (1) + call id (16).
pub const HEADER_SIZE: usize = 22;

// Message kinds
pub const KIND_REQUEST: u8 = 0x01;
pub const KIND_SUCCESS: u8 = 0x02;
pub const KIND_ERROR: u8 = 0x03;

// Value tags
pub const TAG_NIL: u8 = 0x00;
pub const TAG_BOOL: u8 = 0x01;
pub const TAG_INT: u8 = 0x02;
pub const TAG_STR: u8 = 0x03;

const FAMILY_V4: u8 = 4;
const FAMILY_V6: u8 = 6;

// ---------------------------------------------------------------------------
// Call identifier
// ---------------------------------------------------------------------------

/// Identifier of one logical call, shared by all of its retransmissions.
///
/// Drawn from 122 random bits (UUID v4), so independent clients never
/// need to coordinate to stay unique.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallId(Uuid);

impl CallId {
    /// Generate a fresh random call id.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Build from raw bytes (as read from the wire).
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Raw bytes (as written to the wire).
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

/// Argument and result values carried by envelopes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Int(i64),
    Str(String),
}

impl Value {
    /// Borrow the string, if this is a `Str`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// The bool, if this is a `Bool`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The integer, if this is an `Int`.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Short type name for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Nil => "nil",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Str(_) => "str",
        }
    }

    fn write_to(&self, buf: &mut Vec<u8>) -> Result<(), ProtocolError> {
        match self {
            Self::Nil => buf.push(TAG_NIL),
            Self::Bool(b) => {
                buf.push(TAG_BOOL);
                buf.push(u8::from(*b));
            }
            Self::Int(i) => {
                buf.push(TAG_INT);
                buf.extend_from_slice(&i.to_le_bytes());
            }
            Self::Str(s) => {
                buf.push(TAG_STR);
                write_long_string(buf, "string value", s)?;
            }
        }
        Ok(())
    }

    fn read_from(reader: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        match reader.u8()? {
            TAG_NIL => Ok(Self::Nil),
            TAG_BOOL => Ok(Self::Bool(reader.u8()? != 0)),
            TAG_INT => Ok(Self::Int(i64::from_le_bytes(reader.array::<8>()?))),
            TAG_STR => Ok(Self::Str(reader.long_string()?)),
            tag => Err(ProtocolError::UnknownValueTag(tag)),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nil => write!(f, "None"),
            Self::Bool(true) => write!(f, "True"),
            Self::Bool(false) => write!(f, "False"),
            Self::Int(i) => write!(f, "{}", i),
            Self::Str(s) => write!(f, "{}", s),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Message kind byte on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    /// Named operation request
    Request = KIND_REQUEST,
    /// Success result
    Success = KIND_SUCCESS,
    /// Error description
    Error = KIND_ERROR,
}

impl MessageKind {
    pub fn from_u8(v: u8) -> Result<Self, ProtocolError> {
        match v {
            KIND_REQUEST => Ok(Self::Request),
            KIND_SUCCESS => Ok(Self::Success),
            KIND_ERROR => Ok(Self::Error),
            _ => Err(ProtocolError::UnknownKind(v)),
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Envelope body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Invoke `operation` with positional `args`.
    Request { operation: String, args: Vec<Value> },
    /// The operation returned a value.
    Success(Value),
    /// The operation failed; human-readable description.
    Error(String),
}

/// A call envelope: request or response, tied together by `call_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub call_id: CallId,
    /// Address the peer should answer to.
    pub sender: SocketAddr,
    pub payload: Payload,
}

impl Envelope {
    /// Build a request envelope.
    pub fn request(
        call_id: CallId,
        sender: SocketAddr,
        operation: impl Into<String>,
        args: Vec<Value>,
    ) -> Self {
        Self {
            call_id,
            sender,
            payload: Payload::Request {
                operation: operation.into(),
                args,
            },
        }
    }

    /// Build a success response envelope.
    pub fn success(call_id: CallId, sender: SocketAddr, value: Value) -> Self {
        Self {
            call_id,
            sender,
            payload: Payload::Success(value),
        }
    }

    /// Build an error response envelope.
    pub fn error(call_id: CallId, sender: SocketAddr, message: impl Into<String>) -> Self {
        Self {
            call_id,
            sender,
            payload: Payload::Error(message.into()),
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self.payload {
            Payload::Request { .. } => MessageKind::Request,
            Payload::Success(_) => MessageKind::Success,
            Payload::Error(_) => MessageKind::Error,
        }
    }

    pub fn is_request(&self) -> bool {
        self.kind() == MessageKind::Request
    }

    /// Operation name, for requests.
    pub fn operation(&self) -> Option<&str> {
        match &self.payload {
            Payload::Request { operation, .. } => Some(operation),
            _ => None,
        }
    }

    /// Response outcome; `None` for requests.
    pub fn into_outcome(self) -> Option<Result<Value, String>> {
        match self.payload {
            Payload::Request { .. } => None,
            Payload::Success(value) => Some(Ok(value)),
            Payload::Error(message) => Some(Err(message)),
        }
    }

    /// Serialize to wire bytes.
    ///
    /// Fails with [`ProtocolError::FieldTooLong`] instead of truncating a
    /// field that does not fit its length prefix.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(&MAGIC);
        buf.push(WIRE_VERSION);
        buf.push(self.kind().as_u8());
        buf.extend_from_slice(self.call_id.as_bytes());
        write_addr(&mut buf, &self.sender);

        match &self.payload {
            Payload::Request { operation, args } => {
                write_short_string(&mut buf, "operation name", operation)?;
                let argc = u16::try_from(args.len()).map_err(|_| ProtocolError::FieldTooLong {
                    field: "argument count",
                    len: args.len(),
                    max: u16::MAX as usize,
                })?;
                buf.extend_from_slice(&argc.to_le_bytes());
                for arg in args {
                    arg.write_to(&mut buf)?;
                }
            }
            Payload::Success(value) => value.write_to(&mut buf)?,
            Payload::Error(message) => write_long_string(&mut buf, "error text", message)?,
        }
        Ok(buf)
    }

    /// Parse wire bytes. The whole buffer must be one envelope.
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        let mut reader = Reader::new(buf);

        if reader.array::<4>()? != MAGIC {
            return Err(ProtocolError::BadMagic);
        }
        let version = reader.u8()?;
        if version != WIRE_VERSION {
            return Err(ProtocolError::UnsupportedVersion(version));
        }
        let kind = MessageKind::from_u8(reader.u8()?)?;
        let call_id = CallId::from_bytes(reader.array::<16>()?);
        let sender = read_addr(&mut reader)?;

        let payload = match kind {
            MessageKind::Request => {
                let operation = reader.short_string()?;
                let argc = reader.u16()? as usize;
                let mut args = Vec::with_capacity(argc.min(reader.remaining()));
                for _ in 0..argc {
                    args.push(Value::read_from(&mut reader)?);
                }
                Payload::Request { operation, args }
            }
            MessageKind::Success => Payload::Success(Value::read_from(&mut reader)?),
            MessageKind::Error => Payload::Error(reader.long_string()?),
        };

        if reader.remaining() != 0 {
            return Err(ProtocolError::TrailingBytes(reader.remaining()));
        }

        Ok(Self {
            call_id,
            sender,
            payload,
        })
    }
}

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

fn write_short_string(buf: &mut Vec<u8>, field: &'static str, s: &str) -> Result<(), ProtocolError> {
    let len = u16::try_from(s.len()).map_err(|_| ProtocolError::FieldTooLong {
        field,
        len: s.len(),
        max: u16::MAX as usize,
    })?;
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
    Ok(())
}

fn write_long_string(buf: &mut Vec<u8>, field: &'static str, s: &str) -> Result<(), ProtocolError> {
    let len = u32::try_from(s.len()).map_err(|_| ProtocolError::FieldTooLong {
        field,
        len: s.len(),
        max: u32::MAX as usize,
    })?;
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
    Ok(())
}

fn write_addr(buf: &mut Vec<u8>, addr: &SocketAddr) {
    match addr.ip() {
        IpAddr::V4(ip) => {
            buf.push(FAMILY_V4);
            buf.extend_from_slice(&ip.octets());
        }
        IpAddr::V6(ip) => {
            buf.push(FAMILY_V6);
            buf.extend_from_slice(&ip.octets());
        }
    }
    buf.extend_from_slice(&addr.port().to_le_bytes());
}

fn read_addr(reader: &mut Reader<'_>) -> Result<SocketAddr, ProtocolError> {
    let ip = match reader.u8()? {
        FAMILY_V4 => IpAddr::V4(Ipv4Addr::from(reader.array::<4>()?)),
        FAMILY_V6 => IpAddr::V6(Ipv6Addr::from(reader.array::<16>()?)),
        other => return Err(ProtocolError::UnknownAddressFamily(other)),
    };
    let port = reader.u16()?;
    Ok(SocketAddr::new(ip, port))
}

/// Bounds-checked cursor over an inbound datagram.
struct Reader<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.offset
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], ProtocolError> {
        if self.remaining() < len {
            return Err(ProtocolError::BufferTooShort);
        }
        let slice = &self.buf[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], ProtocolError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, ProtocolError> {
        Ok(u16::from_le_bytes(self.array::<2>()?))
    }

    fn u32(&mut self) -> Result<u32, ProtocolError> {
        Ok(u32::from_le_bytes(self.array::<4>()?))
    }

    fn short_string(&mut self) -> Result<String, ProtocolError> {
        let len = self.u16()? as usize;
        self.utf8(len)
    }

    fn long_string(&mut self) -> Result<String, ProtocolError> {
        let len = self.u32()? as usize;
        self.utf8(len)
    }

    fn utf8(&mut self, len: usize) -> Result<String, ProtocolError> {
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| ProtocolError::InvalidUtf8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:9701".parse().unwrap()
    }

    #[test]
    fn request_roundtrip_keeps_argument_order() {
        let env = Envelope::request(
            CallId::random(),
            addr(),
            "put",
            vec![Value::from("a"), Value::from("1"), Value::Bool(false)],
        );
        let decoded = Envelope::decode(&env.encode().unwrap()).unwrap();
        assert_eq!(decoded, env);
        assert_eq!(decoded.operation(), Some("put"));
    }

    #[test]
    fn responses_roundtrip_with_ipv6_sender() {
        let sender: SocketAddr = "[::1]:4000".parse().unwrap();
        let id = CallId::random();
        for env in [
            Envelope::success(id, sender, Value::Int(-7)),
            Envelope::success(id, sender, Value::Nil),
            Envelope::error(id, sender, "Key missing not found"),
        ] {
            assert_eq!(Envelope::decode(&env.encode().unwrap()).unwrap(), env);
        }
    }

    #[test]
    fn encoding_is_deterministic() {
        let env = Envelope::request(CallId::random(), addr(), "get", vec![Value::from("k")]);
        assert_eq!(env.encode().unwrap(), env.encode().unwrap());
        assert_eq!(env.encode().unwrap(), env.clone().encode().unwrap());
    }

    #[test]
    fn truncated_input_is_rejected_at_every_length() {
        let bytes = Envelope::request(
            CallId::random(),
            addr(),
            "append",
            vec![Value::from("a"), Value::from("2")],
        )
        .encode()
        .unwrap();
        for len in 0..bytes.len() {
            assert!(Envelope::decode(&bytes[..len]).is_err(), "len {}", len);
        }
    }

    #[test]
    fn header_validation() {
        let mut bytes = Envelope::success(CallId::random(), addr(), Value::Bool(true))
            .encode()
            .unwrap();

        let mut bad_magic = bytes.clone();
        bad_magic[0] = b'X';
        assert_eq!(Envelope::decode(&bad_magic), Err(ProtocolError::BadMagic));

        let mut bad_version = bytes.clone();
        bad_version[4] = 9;
        assert_eq!(
            Envelope::decode(&bad_version),
            Err(ProtocolError::UnsupportedVersion(9))
        );

        let mut bad_kind = bytes.clone();
        bad_kind[5] = 0x7F;
        assert_eq!(
            Envelope::decode(&bad_kind),
            Err(ProtocolError::UnknownKind(0x7F))
        );

        bytes.push(0);
        assert_eq!(Envelope::decode(&bytes), Err(ProtocolError::TrailingBytes(1)));
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        let mut bytes = Envelope::error(CallId::random(), addr(), "ok").encode().unwrap();
        let last = bytes.len() - 1;
        bytes[last] = 0xFF;
        assert_eq!(Envelope::decode(&bytes), Err(ProtocolError::InvalidUtf8));
    }

    #[test]
    fn oversized_argument_list_is_rejected() {
        let args = vec![Value::Nil; u16::MAX as usize + 1];
        let env = Envelope::request(CallId::random(), addr(), "put", args);
        assert_eq!(
            env.encode(),
            Err(ProtocolError::FieldTooLong {
                field: "argument count",
                len: 65_536,
                max: 65_535,
            })
        );

        let at_limit = Envelope::request(
            CallId::random(),
            addr(),
            "put",
            vec![Value::Nil; u16::MAX as usize],
        );
        let decoded = Envelope::decode(&at_limit.encode().unwrap()).unwrap();
        assert_eq!(decoded, at_limit);
    }

    #[test]
    fn oversized_operation_name_is_rejected() {
        // 65_536 bytes, the last character straddling the u16 boundary.
        let name = format!("{}é", "a".repeat(u16::MAX as usize - 1));
        let env = Envelope::request(CallId::random(), addr(), name, vec![]);
        assert!(matches!(
            env.encode(),
            Err(ProtocolError::FieldTooLong {
                field: "operation name",
                len: 65_536,
                ..
            })
        ));
    }

    #[test]
    fn call_ids_are_distinct() {
        let a = CallId::random();
        let b = CallId::random();
        assert_ne!(a, b);
        assert_eq!(CallId::from_bytes(*a.as_bytes()), a);
    }

    #[test]
    fn value_display() {
        assert_eq!(Value::Bool(true).to_string(), "True");
        assert_eq!(Value::Nil.to_string(), "None");
        assert_eq!(Value::from("12").to_string(), "12");
    }

    #[test]
    fn outcome_extraction() {
        let id = CallId::random();
        assert_eq!(
            Envelope::success(id, addr(), Value::Bool(true)).into_outcome(),
            Some(Ok(Value::Bool(true)))
        );
        assert_eq!(
            Envelope::error(id, addr(), "boom").into_outcome(),
            Some(Err("boom".to_string()))
        );
        assert_eq!(
            Envelope::request(id, addr(), "get", vec![]).into_outcome(),
            None
        );
    }
}
