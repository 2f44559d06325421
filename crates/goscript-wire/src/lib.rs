//! Values and the binary envelope format shared by the goscript host and the
//! programs it generates.
//!
//! Every message is one length-prefixed frame. The Go side of this format is
//! emitted into each generated program by `goscript-host`; the two must stay
//! byte-compatible.

pub mod codec;
pub mod json;
pub mod value;

pub use codec::{
    decode_value, encode_value, read_ready, read_request, read_response, write_ready,
    write_request, write_response, Response, WireError,
};
pub use value::{TypeRegistry, Value};

/// Token the child writes once it has started and is ready for requests.
pub const READY_TOKEN: &str = "ready";

/// Largest accepted frame payload.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Deepest accepted nesting of lists, maps and named values.
pub const MAX_DEPTH: usize = 128;

pub const TAG_NIL: u8 = 0x00;
pub const TAG_BOOL: u8 = 0x01;
pub const TAG_INT: u8 = 0x02;
pub const TAG_UINT: u8 = 0x03;
pub const TAG_FLOAT: u8 = 0x04;
pub const TAG_STRING: u8 = 0x05;
pub const TAG_BYTES: u8 = 0x06;
pub const TAG_LIST: u8 = 0x07;
pub const TAG_MAP: u8 = 0x08;
pub const TAG_NAMED: u8 = 0x09;
