//! Protocol frame codec integration tests

use serde_json::json;
use tradovate_engine::transport::{
    encode_authorize, encode_request, Frame, FrameError, AUTHORIZE_REQUEST_ID, HEARTBEAT_FRAME,
};

#[test]
fn test_control_frames() {
    assert_eq!(Frame::parse("o").unwrap(), Frame::Open);
    assert_eq!(Frame::parse("h").unwrap(), Frame::Heartbeat);
    assert_eq!(Frame::parse("c").unwrap(), Frame::Close(None));
    assert_eq!(
        Frame::parse(r#"c[1000,"Normal"]"#).unwrap(),
        Frame::Close(Some(json!([1000, "Normal"])))
    );
}

#[test]
fn test_array_frame_mixes_replies_and_events() {
    let text = r#"a[{"s":200,"i":7,"d":{"id":55}},{"e":"props","d":{"entityType":"order","eventType":"Updated","entity":{"id":55}}}]"#;
    let Frame::Messages(messages) = Frame::parse(text).unwrap() else {
        panic!("expected messages");
    };
    assert_eq!(messages.len(), 2);

    let reply = &messages[0];
    assert_eq!(reply.request_id(), Some(7));
    assert!(reply.is_success());
    assert_eq!(reply.event_name(), None);

    let event = &messages[1];
    assert_eq!(event.event_name(), Some("props"));
    assert_eq!(event.request_id(), None);
    assert!(!event.is_failure());
    assert_eq!(event.data.as_ref().unwrap()["entityType"], "order");
}

#[test]
fn test_failure_reply() {
    let Frame::Messages(messages) = Frame::parse(r#"a[{"s":401,"i":3,"d":"Access is denied"}]"#)
        .unwrap()
    else {
        panic!("expected messages");
    };
    assert!(messages[0].is_failure());
    assert_eq!(messages[0].request_id(), Some(3));
}

#[test]
fn test_bad_frames() {
    assert!(matches!(Frame::parse(""), Err(FrameError::Empty)));
    assert!(matches!(Frame::parse("x[]"), Err(FrameError::UnknownTag('x'))));
    assert!(matches!(Frame::parse("a{"), Err(FrameError::Malformed(_))));
}

#[test]
fn test_outbound_encoding() {
    assert_eq!(
        encode_request("md/subscribequote", 4, r#"{"symbol":"MESZ6"}"#),
        "md/subscribequote\n4\n\n{\"symbol\":\"MESZ6\"}"
    );
    assert_eq!(
        encode_authorize("tok"),
        format!("authorize\n{}\n\ntok", AUTHORIZE_REQUEST_ID)
    );
    assert_eq!(HEARTBEAT_FRAME, "[]");
}
