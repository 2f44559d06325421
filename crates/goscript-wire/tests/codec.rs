use std::collections::BTreeMap;
use std::io::Cursor;

use goscript_wire::{
    codec::{read_frame, write_frame},
    decode_value, encode_value, read_ready, read_request, read_response, write_ready,
    write_request, write_response, Response, TypeRegistry, Value, WireError, READY_TOKEN,
};

fn registry() -> TypeRegistry {
    TypeRegistry::new().with("point").expect("register point")
}

#[test]
fn request_round_trip_keeps_every_supported_kind() {
    let mut map = BTreeMap::new();
    map.insert("k".to_string(), Value::Float(-0.25));
    let args = vec![
        Value::Nil,
        Value::Bool(true),
        Value::Int(-7),
        Value::Uint(u64::MAX),
        Value::Float(3.5),
        Value::from("héllo"),
        Value::Bytes(vec![0, 255, 10]),
        Value::List(vec![Value::from("a"), Value::List(Vec::new())]),
        Value::Map(map),
        Value::named("point", Value::List(vec![Value::Int(1), Value::Int(2)])),
    ];

    let mut wire = Vec::new();
    write_request(&mut wire, &args, &registry()).expect("encode request");
    let decoded = read_request(&mut Cursor::new(wire), &registry()).expect("decode request");
    assert_eq!(decoded, args);
}

#[test]
fn empty_request_is_an_empty_list() {
    let mut wire = Vec::new();
    write_request(&mut wire, &[], &TypeRegistry::default()).unwrap();
    let decoded = read_request(&mut Cursor::new(wire), &TypeRegistry::default()).unwrap();
    assert!(decoded.is_empty());
}

#[test]
fn response_carries_value_and_error_independently() {
    let reg = TypeRegistry::default();
    let mut wire = Vec::new();
    write_response(&mut wire, &Response::ok("Hello Mat"), &reg).unwrap();
    write_response(&mut wire, &Response::err("boom"), &reg).unwrap();
    write_response(
        &mut wire,
        &Response {
            value: Value::Int(1),
            error: Some("both".to_string()),
        },
        &reg,
    )
    .unwrap();

    let mut r = Cursor::new(wire);
    assert_eq!(read_response(&mut r, &reg).unwrap(), Response::ok("Hello Mat"));
    assert_eq!(read_response(&mut r, &reg).unwrap(), Response::err("boom"));
    let both = read_response(&mut r, &reg).unwrap();
    assert_eq!(both.value, Value::Int(1));
    assert_eq!(both.error.as_deref(), Some("both"));
    assert!(matches!(read_response(&mut r, &reg), Err(WireError::Closed)));
}

#[test]
fn handshake_reads_ready_token() {
    let mut wire = Vec::new();
    write_ready(&mut wire).unwrap();
    let v = read_ready(&mut Cursor::new(wire)).unwrap();
    assert_eq!(v.as_str(), Some(READY_TOKEN));
}

#[test]
fn unregistered_named_type_is_a_decode_error() {
    let mut payload = Vec::new();
    encode_value(&mut payload, &Value::named("point", 1), &registry()).unwrap();

    let err = decode_value(&payload, &TypeRegistry::default()).unwrap_err();
    match err {
        WireError::UnregisteredType(name) => assert_eq!(name, "point"),
        other => panic!("expected UnregisteredType, got {other}"),
    }
}

#[test]
fn unregistered_named_type_is_refused_on_encode() {
    let mut payload = Vec::new();
    let err = encode_value(
        &mut payload,
        &Value::named("secret", 1),
        &TypeRegistry::default(),
    )
    .unwrap_err();
    assert!(matches!(err, WireError::UnregisteredType(_)));
}

#[test]
fn truncated_and_trailing_payloads_are_rejected() {
    let reg = TypeRegistry::default();
    let mut payload = Vec::new();
    encode_value(&mut payload, &Value::from("abcdef"), &reg).unwrap();

    let err = decode_value(&payload[..payload.len() - 1], &reg).unwrap_err();
    assert!(matches!(err, WireError::Truncated), "{err}");

    payload.push(0);
    let err = decode_value(&payload, &reg).unwrap_err();
    assert!(matches!(err, WireError::TrailingBytes(1)), "{err}");

    let err = decode_value(&[0xee], &reg).unwrap_err();
    assert!(matches!(err, WireError::UnknownTag(0xee)), "{err}");
}

#[test]
fn frame_reader_distinguishes_clean_close_from_cut_frames() {
    let mut empty = Cursor::new(Vec::<u8>::new());
    assert!(matches!(read_frame(&mut empty), Err(WireError::Closed)));

    let mut wire = Vec::new();
    write_frame(&mut wire, b"abcd").unwrap();
    wire.truncate(6);
    let err = read_frame(&mut Cursor::new(wire)).unwrap_err();
    assert!(matches!(err, WireError::Truncated));
    assert!(!err.is_closed());

    let mut huge = Vec::new();
    huge.extend_from_slice(&u32::MAX.to_le_bytes());
    let err = read_frame(&mut Cursor::new(huge)).unwrap_err();
    assert!(matches!(err, WireError::FrameTooLarge(_)));
}

#[test]
fn request_frame_must_hold_a_list() {
    let reg = TypeRegistry::default();
    let mut payload = Vec::new();
    encode_value(&mut payload, &Value::from("not a list"), &reg).unwrap();
    let mut wire = Vec::new();
    write_frame(&mut wire, &payload).unwrap();
    let err = read_request(&mut Cursor::new(wire), &reg).unwrap_err();
    assert_eq!(err.to_string(), "expected list, got string");
}
