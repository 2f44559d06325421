use std::fmt;
use std::io::{self, Read, Write};

use crate::value::{TypeRegistry, Value};
use crate::{
    MAX_DEPTH, MAX_FRAME_LEN, READY_TOKEN, TAG_BOOL, TAG_BYTES, TAG_FLOAT, TAG_INT, TAG_LIST,
    TAG_MAP, TAG_NAMED, TAG_NIL, TAG_STRING, TAG_UINT,
};

/// One call's outcome as carried by a response frame.
///
/// A present `error` means the call failed, whatever `value` holds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Response {
    pub value: Value,
    pub error: Option<String>,
}

impl Response {
    pub fn ok(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            value: Value::Nil,
            error: Some(message.into()),
        }
    }
}

#[derive(Debug)]
pub enum WireError {
    Io(io::Error),
    /// The stream ended cleanly before a frame header.
    Closed,
    Truncated,
    FrameTooLarge(usize),
    TooDeep,
    UnknownTag(u8),
    InvalidUtf8,
    UnregisteredType(String),
    TrailingBytes(usize),
    Unexpected {
        expected: &'static str,
        got: &'static str,
    },
}

impl WireError {
    /// True when the peer went away rather than sending bad data.
    pub fn is_closed(&self) -> bool {
        match self {
            WireError::Closed => true,
            WireError::Io(err) => matches!(
                err.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
            ),
            _ => false,
        }
    }
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireError::Io(err) => write!(f, "io error: {err}"),
            WireError::Closed => f.write_str("stream closed"),
            WireError::Truncated => f.write_str("truncated frame"),
            WireError::FrameTooLarge(len) => {
                write!(f, "frame too large: {len} > {MAX_FRAME_LEN}")
            }
            WireError::TooDeep => write!(f, "value nested deeper than {MAX_DEPTH}"),
            WireError::UnknownTag(tag) => write!(f, "unknown value tag 0x{tag:02x}"),
            WireError::InvalidUtf8 => f.write_str("string is not valid UTF-8"),
            WireError::UnregisteredType(name) => write!(f, "unregistered type {name:?}"),
            WireError::TrailingBytes(n) => write!(f, "{n} trailing bytes after value"),
            WireError::Unexpected { expected, got } => {
                write!(f, "expected {expected}, got {got}")
            }
        }
    }
}

impl std::error::Error for WireError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WireError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for WireError {
    fn from(err: io::Error) -> Self {
        WireError::Io(err)
    }
}

fn put_u32(out: &mut Vec<u8>, n: usize) -> Result<(), WireError> {
    let n = u32::try_from(n).map_err(|_| WireError::FrameTooLarge(n))?;
    out.extend_from_slice(&n.to_le_bytes());
    Ok(())
}

fn put_str(out: &mut Vec<u8>, s: &[u8]) -> Result<(), WireError> {
    put_u32(out, s.len())?;
    out.extend_from_slice(s);
    Ok(())
}

pub fn encode_value(
    out: &mut Vec<u8>,
    value: &Value,
    registry: &TypeRegistry,
) -> Result<(), WireError> {
    encode_at(out, value, registry, 0)
}

fn encode_at(
    out: &mut Vec<u8>,
    value: &Value,
    registry: &TypeRegistry,
    depth: usize,
) -> Result<(), WireError> {
    if depth > MAX_DEPTH {
        return Err(WireError::TooDeep);
    }
    match value {
        Value::Nil => out.push(TAG_NIL),
        Value::Bool(b) => out.extend_from_slice(&[TAG_BOOL, u8::from(*b)]),
        Value::Int(n) => {
            out.push(TAG_INT);
            out.extend_from_slice(&n.to_le_bytes());
        }
        Value::Uint(n) => {
            out.push(TAG_UINT);
            out.extend_from_slice(&n.to_le_bytes());
        }
        Value::Float(x) => {
            out.push(TAG_FLOAT);
            out.extend_from_slice(&x.to_bits().to_le_bytes());
        }
        Value::String(s) => {
            out.push(TAG_STRING);
            put_str(out, s.as_bytes())?;
        }
        Value::Bytes(b) => {
            out.push(TAG_BYTES);
            put_str(out, b)?;
        }
        Value::List(items) => encode_list(out, items, registry, depth)?,
        Value::Map(entries) => {
            out.push(TAG_MAP);
            put_u32(out, entries.len())?;
            for (k, v) in entries {
                put_str(out, k.as_bytes())?;
                encode_at(out, v, registry, depth + 1)?;
            }
        }
        Value::Named { type_name, value } => {
            if !registry.contains(type_name) {
                return Err(WireError::UnregisteredType(type_name.clone()));
            }
            out.push(TAG_NAMED);
            put_str(out, type_name.as_bytes())?;
            encode_at(out, value, registry, depth + 1)?;
        }
    }
    Ok(())
}

fn encode_list(
    out: &mut Vec<u8>,
    items: &[Value],
    registry: &TypeRegistry,
    depth: usize,
) -> Result<(), WireError> {
    out.push(TAG_LIST);
    put_u32(out, items.len())?;
    for item in items {
        encode_at(out, item, registry, depth + 1)?;
    }
    Ok(())
}

/// Decodes exactly one value occupying all of `payload`.
pub fn decode_value(payload: &[u8], registry: &TypeRegistry) -> Result<Value, WireError> {
    let mut cur = Cursor::new(payload, registry);
    let value = cur.value(0)?;
    cur.finish()?;
    Ok(value)
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
    registry: &'a TypeRegistry,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8], registry: &'a TypeRegistry) -> Self {
        Self {
            buf,
            pos: 0,
            registry,
        }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if n > self.remaining() {
            return Err(WireError::Truncated);
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<usize, WireError> {
        let b = self.take(4)?;
        let n = u32::from_le_bytes([b[0], b[1], b[2], b[3]]);
        Ok(usize::try_from(n).unwrap_or(usize::MAX))
    }

    fn u64(&mut self) -> Result<u64, WireError> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_le_bytes(arr))
    }

    fn bytes(&mut self) -> Result<&'a [u8], WireError> {
        let n = self.u32()?;
        self.take(n)
    }

    fn string(&mut self) -> Result<String, WireError> {
        let b = self.bytes()?;
        std::str::from_utf8(b)
            .map(str::to_string)
            .map_err(|_| WireError::InvalidUtf8)
    }

    // Every encoded value occupies at least one byte, so a count larger than
    // what is left cannot be honest; reject it before allocating.
    fn count(&mut self) -> Result<usize, WireError> {
        let n = self.u32()?;
        if n > self.remaining() {
            return Err(WireError::Truncated);
        }
        Ok(n)
    }

    fn value(&mut self, depth: usize) -> Result<Value, WireError> {
        if depth > MAX_DEPTH {
            return Err(WireError::TooDeep);
        }
        let tag = self.u8()?;
        let value = match tag {
            TAG_NIL => Value::Nil,
            TAG_BOOL => Value::Bool(self.u8()? != 0),
            TAG_INT => Value::Int(self.u64()? as i64),
            TAG_UINT => Value::Uint(self.u64()?),
            TAG_FLOAT => Value::Float(f64::from_bits(self.u64()?)),
            TAG_STRING => Value::String(self.string()?),
            TAG_BYTES => Value::Bytes(self.bytes()?.to_vec()),
            TAG_LIST => {
                let n = self.count()?;
                let mut items = Vec::with_capacity(n);
                for _ in 0..n {
                    items.push(self.value(depth + 1)?);
                }
                Value::List(items)
            }
            TAG_MAP => {
                let n = self.count()?;
                let mut entries = std::collections::BTreeMap::new();
                for _ in 0..n {
                    let k = self.string()?;
                    let v = self.value(depth + 1)?;
                    entries.insert(k, v);
                }
                Value::Map(entries)
            }
            TAG_NAMED => {
                let type_name = self.string()?;
                if !self.registry.contains(&type_name) {
                    return Err(WireError::UnregisteredType(type_name));
                }
                let inner = self.value(depth + 1)?;
                Value::Named {
                    type_name,
                    value: Box::new(inner),
                }
            }
            other => return Err(WireError::UnknownTag(other)),
        };
        Ok(value)
    }

    fn error_text(&mut self) -> Result<Option<String>, WireError> {
        match self.u8()? {
            0 => Ok(None),
            1 => Ok(Some(self.string()?)),
            other => Err(WireError::UnknownTag(other)),
        }
    }

    fn finish(&self) -> Result<(), WireError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(WireError::TrailingBytes(n)),
        }
    }
}

fn read_exact_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> Result<bool, WireError> {
    let mut off = 0usize;
    while off < buf.len() {
        let n = match reader.read(&mut buf[off..]) {
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if n == 0 {
            if off == 0 {
                return Ok(false);
            }
            return Err(WireError::Truncated);
        }
        off += n;
    }
    Ok(true)
}

/// Reads one length-prefixed frame payload.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Vec<u8>, WireError> {
    let mut hdr = [0u8; 4];
    if !read_exact_or_eof(reader, &mut hdr)? {
        return Err(WireError::Closed);
    }
    let len = usize::try_from(u32::from_le_bytes(hdr)).unwrap_or(usize::MAX);
    if len > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge(len));
    }
    let mut payload = vec![0u8; len];
    if len != 0 && !read_exact_or_eof(reader, &mut payload)? {
        return Err(WireError::Truncated);
    }
    Ok(payload)
}

/// Writes one frame and flushes.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<(), WireError> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge(payload.len()));
    }
    let len = payload.len() as u32;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(payload)?;
    writer.flush()?;
    Ok(())
}

pub fn write_ready<W: Write>(writer: &mut W) -> Result<(), WireError> {
    let mut payload = Vec::new();
    encode_value(
        &mut payload,
        &Value::from(READY_TOKEN),
        &TypeRegistry::default(),
    )?;
    write_frame(writer, &payload)
}

/// Reads the handshake frame. The caller decides whether it is the ready token.
pub fn read_ready<R: Read>(reader: &mut R) -> Result<Value, WireError> {
    let payload = read_frame(reader)?;
    decode_value(&payload, &TypeRegistry::default())
}

pub fn write_request<W: Write>(
    writer: &mut W,
    args: &[Value],
    registry: &TypeRegistry,
) -> Result<(), WireError> {
    let mut payload = Vec::new();
    encode_list(&mut payload, args, registry, 0)?;
    write_frame(writer, &payload)
}

pub fn read_request<R: Read>(
    reader: &mut R,
    registry: &TypeRegistry,
) -> Result<Vec<Value>, WireError> {
    let payload = read_frame(reader)?;
    match decode_value(&payload, registry)? {
        Value::List(items) => Ok(items),
        other => Err(WireError::Unexpected {
            expected: "list",
            got: other.kind(),
        }),
    }
}

pub fn write_response<W: Write>(
    writer: &mut W,
    response: &Response,
    registry: &TypeRegistry,
) -> Result<(), WireError> {
    let mut payload = Vec::new();
    encode_value(&mut payload, &response.value, registry)?;
    match &response.error {
        None => payload.push(0),
        Some(msg) => {
            payload.push(1);
            put_str(&mut payload, msg.as_bytes())?;
        }
    }
    write_frame(writer, &payload)
}

pub fn read_response<R: Read>(
    reader: &mut R,
    registry: &TypeRegistry,
) -> Result<Response, WireError> {
    let payload = read_frame(reader)?;
    let mut cur = Cursor::new(&payload, registry);
    let value = cur.value(0)?;
    let error = cur.error_text()?;
    cur.finish()?;
    Ok(Response { value, error })
}
