use super::*;
use crate::model::{JobStatus, Presence};
use crate::{Envelope, Status, WireError};

#[test]
fn parses_user_joined() {
    let push = Envelope::push(
        "user_joined",
        serde_json::json!({
            "id": "u2",
            "username": "bob",
            "status": "online",
            "last_activity": 1000
        }),
    );
    let event = ServerEvent::parse(&push).expect("parse");
    let ServerEvent::UserJoined(participant) = event else {
        panic!("expected UserJoined, got {event:?}");
    };
    assert_eq!(participant.id, "u2");
    assert_eq!(participant.username, "bob");
    assert_eq!(participant.status, Presence::Online);
    assert!(participant.cursor.is_none());
}

#[test]
fn parses_cursor_move() {
    let push = Envelope::push(
        "user_cursor_move",
        serde_json::json!({ "user_id": "u2", "x": 10.0, "y": 20.5 }),
    );
    let event = ServerEvent::parse(&push).expect("parse");
    assert_eq!(
        event,
        ServerEvent::CursorMoved { user_id: "u2".into(), x: 10.0, y: 20.5 }
    );
}

#[test]
fn parses_lock_pair() {
    let locked = Envelope::push(
        "project_locked",
        serde_json::json!({ "user_id": "u1", "username": "alice" }),
    );
    assert_eq!(
        ServerEvent::parse(&locked).expect("parse"),
        ServerEvent::ProjectLocked { user_id: "u1".into(), username: "alice".into() }
    );

    let unlocked = Envelope::push("project_unlocked", serde_json::json!({}));
    assert_eq!(
        ServerEvent::parse(&unlocked).expect("parse"),
        ServerEvent::ProjectUnlocked
    );
}

#[test]
fn parses_processing_update() {
    let push = Envelope::push(
        "processing_update",
        serde_json::json!({
            "project_id": "p1",
            "status": "processing",
            "progress": 40,
            "stage": "transcoding"
        }),
    );
    let event = ServerEvent::parse(&push).expect("parse");
    let ServerEvent::Processing(update) = event else {
        panic!("expected Processing, got {event:?}");
    };
    assert_eq!(update.status, JobStatus::Processing);
    assert_eq!(update.progress, 40);
    assert_eq!(update.stage.as_deref(), Some("transcoding"));
}

#[test]
fn rejects_unknown_event_name() {
    let push = Envelope::push("mystery_event", serde_json::json!({}));
    let err = ServerEvent::parse(&push).expect_err("should fail");
    assert!(matches!(err, WireError::UnknownEvent(name) if name == "mystery_event"));
}

#[test]
fn rejects_malformed_payload() {
    let push = Envelope::push("user_left", serde_json::json!({ "wrong_key": true }));
    let err = ServerEvent::parse(&push).expect_err("should fail");
    assert!(matches!(err, WireError::Payload { event, .. } if event == "user_left"));
}

#[test]
fn event_names_round_trip_through_parse() {
    let event = ServerEvent::CommentDeleted { comment_id: "c9".into() };
    let push = Envelope::push(event.name(), serde_json::json!({ "comment_id": "c9" }));
    assert_eq!(ServerEvent::parse(&push).expect("parse"), event);
}

#[test]
fn request_envelope_carries_project_and_payload() {
    let envelope = ClientRequest::AddComment {
        project_id: "p1".into(),
        content: "hello".into(),
        video_timestamp: Some(3.5),
    }
    .into_envelope();

    assert_eq!(envelope.event, "add_comment");
    assert_eq!(envelope.status, Status::Request);
    assert_eq!(envelope.project_id.as_deref(), Some("p1"));
    assert_eq!(
        envelope.data.get("content").and_then(|v| v.as_str()),
        Some("hello")
    );
    assert_eq!(
        envelope.data.get("video_timestamp").and_then(serde_json::Value::as_f64),
        Some(3.5)
    );
}

#[test]
fn ping_has_no_project() {
    let envelope = ClientRequest::Ping { ts: 99 }.into_envelope();
    assert_eq!(envelope.event, "ping");
    assert!(envelope.project_id.is_none());
}

#[test]
fn authenticate_sets_from() {
    let envelope = ClientEvent::Authenticate {
        token: "t".into(),
        user_id: "u1".into(),
        username: "alice".into(),
    }
    .into_envelope();

    assert_eq!(envelope.event, "authenticate");
    assert_eq!(envelope.from.as_deref(), Some("u1"));
    assert_eq!(envelope.data.get("token").and_then(|v| v.as_str()), Some("t"));
}
