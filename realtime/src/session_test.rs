use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{WebSocketStream, accept_async};

use super::*;
use wire::{
    Cursor, Envelope, JobStatus, Participant, Presence, ProcessingUpdate, ProjectUpdate,
    UpdateKind,
};

use crate::config::ClientConfig;
use crate::error::RequestError;

fn project() -> SharedProject {
    SharedProject {
        id: "p1".into(),
        name: "Launch teaser".into(),
        owner: "u1".into(),
        collaborators: vec![participant("u1", "alice")],
        comments: Vec::new(),
        updates: Vec::new(),
        version: 3,
        locked: false,
        locked_by: None,
    }
}

fn participant(id: &str, username: &str) -> Participant {
    Participant {
        id: id.into(),
        username: username.into(),
        avatar: None,
        status: Presence::Online,
        cursor: None,
        last_activity: 0,
    }
}

fn comment(id: &str, content: &str) -> Comment {
    Comment {
        id: id.into(),
        user_id: "u2".into(),
        username: "bob".into(),
        content: content.into(),
        ts: 100,
        video_timestamp: None,
        resolved: false,
        replies: Vec::new(),
    }
}

fn update(id: &str) -> ProjectUpdate {
    ProjectUpdate {
        id: id.into(),
        kind: UpdateKind::EditApplied,
        user_id: "u2".into(),
        data: serde_json::json!({"op": "trim"}),
        ts: 200,
    }
}

// =============================================================================
// apply: participants
// =============================================================================

#[test]
fn user_joined_adds_participant() {
    let mut project = project();
    apply(&mut project, &ServerEvent::UserJoined(participant("u2", "bob")));
    assert_eq!(project.collaborators.len(), 2);
    assert_eq!(project.collaborators[1].id, "u2");
}

#[test]
fn user_joined_twice_upserts_instead_of_duplicating() {
    let mut project = project();
    apply(&mut project, &ServerEvent::UserJoined(participant("u2", "bob")));
    let mut rejoined = participant("u2", "bob");
    rejoined.last_activity = 999;
    apply(&mut project, &ServerEvent::UserJoined(rejoined));

    assert_eq!(project.collaborators.len(), 2);
    assert_eq!(project.collaborators[1].last_activity, 999);
}

#[test]
fn user_left_removes_participant() {
    let mut project = project();
    apply(&mut project, &ServerEvent::UserJoined(participant("u2", "bob")));
    apply(&mut project, &ServerEvent::UserLeft { user_id: "u2".into() });
    assert_eq!(project.collaborators.len(), 1);
    assert_eq!(project.collaborators[0].id, "u1");
}

#[test]
fn user_left_unknown_is_noop() {
    let mut project = project();
    apply(&mut project, &ServerEvent::UserLeft { user_id: "ghost".into() });
    assert_eq!(project.collaborators.len(), 1);
}

#[test]
fn cursor_moved_updates_in_place() {
    let mut project = project();
    apply(
        &mut project,
        &ServerEvent::CursorMoved { user_id: "u1".into(), x: 10.0, y: 20.0 },
    );
    assert_eq!(project.collaborators[0].cursor, Some(Cursor { x: 10.0, y: 20.0 }));
}

#[test]
fn cursor_moved_for_unknown_participant_is_noop() {
    let mut project = project();
    apply(
        &mut project,
        &ServerEvent::CursorMoved { user_id: "ghost".into(), x: 1.0, y: 1.0 },
    );
    assert_eq!(project.collaborators.len(), 1);
    assert!(project.collaborators[0].cursor.is_none());
}

// =============================================================================
// apply: comments
// =============================================================================

#[test]
fn comment_added_appends() {
    let mut project = project();
    apply(&mut project, &ServerEvent::CommentAdded(comment("c1", "first")));
    assert_eq!(project.comments.len(), 1);
    assert_eq!(project.comments[0].content, "first");
}

#[test]
fn comment_updated_replaces_by_id() {
    let mut project = project();
    apply(&mut project, &ServerEvent::CommentAdded(comment("c1", "first")));
    let mut edited = comment("c1", "edited");
    edited.resolved = true;
    apply(&mut project, &ServerEvent::CommentUpdated(edited));

    assert_eq!(project.comments.len(), 1);
    assert_eq!(project.comments[0].content, "edited");
    assert!(project.comments[0].resolved);
}

#[test]
fn comment_updated_unknown_is_noop() {
    let mut project = project();
    apply(&mut project, &ServerEvent::CommentUpdated(comment("ghost", "x")));
    assert!(project.comments.is_empty());
}

#[test]
fn comment_deleted_removes_and_repeat_is_noop() {
    let mut project = project();
    apply(&mut project, &ServerEvent::CommentAdded(comment("c1", "first")));
    apply(&mut project, &ServerEvent::CommentDeleted { comment_id: "c1".into() });
    assert!(project.comments.is_empty());
    apply(&mut project, &ServerEvent::CommentDeleted { comment_id: "c1".into() });
    assert!(project.comments.is_empty());
}

// =============================================================================
// apply: update log and version
// =============================================================================

#[test]
fn project_updated_appends_and_bumps_version() {
    let mut project = project();
    apply(&mut project, &ServerEvent::ProjectUpdated(update("up1")));
    assert_eq!(project.version, 4);
    assert_eq!(project.updates.len(), 1);

    apply(&mut project, &ServerEvent::ProjectUpdated(update("up2")));
    assert_eq!(project.version, 5);
    assert_eq!(project.updates.len(), 2);
}

#[test]
fn comment_events_do_not_bump_version() {
    let mut project = project();
    apply(&mut project, &ServerEvent::CommentAdded(comment("c1", "first")));
    apply(&mut project, &ServerEvent::CommentDeleted { comment_id: "c1".into() });
    assert_eq!(project.version, 3);
}

// =============================================================================
// apply: lock
// =============================================================================

#[test]
fn lock_sets_flag_and_holder_together() {
    let mut project = project();
    apply(
        &mut project,
        &ServerEvent::ProjectLocked { user_id: "u2".into(), username: "bob".into() },
    );
    assert!(project.locked);
    assert_eq!(project.locked_by.as_deref(), Some("bob"));

    apply(&mut project, &ServerEvent::ProjectUnlocked);
    assert!(!project.locked);
    assert!(project.locked_by.is_none());
}

#[test]
fn processing_events_leave_mirror_untouched() {
    let mut project = project();
    let before = project.clone();
    apply(
        &mut project,
        &ServerEvent::Processing(ProcessingUpdate {
            project_id: "p1".into(),
            status: JobStatus::Processing,
            progress: 50,
            stage: None,
            viral_score: None,
            error: None,
        }),
    );
    assert_eq!(project, before);
}

// =============================================================================
// SessionStore guards
// =============================================================================

fn disconnected_store() -> SessionStore {
    let connection = Connection::new(ClientConfig::session("ws://localhost:9"));
    SessionStore::new(connection, Credentials::new("u1", "alice", "tok"))
}

#[tokio::test]
async fn add_comment_without_connection_fails_fast() {
    let store = disconnected_store();
    let error = store.add_comment("hi", None).await.expect_err("must fail");
    assert!(matches!(error, SessionError::NotConnected));
}

#[tokio::test]
async fn lock_without_session_fails_fast() {
    let store = disconnected_store();
    let error = store.lock_project().await.expect_err("must fail");
    assert!(matches!(error, SessionError::NotConnected));
}

#[tokio::test]
async fn cursor_without_session_is_dropped() {
    let store = disconnected_store();
    // Must not panic or send anything.
    store.send_cursor_position(5.0, 5.0);
    assert!(store.project().is_none());
    assert!(!store.is_joined());
}

#[tokio::test]
async fn leave_without_session_is_noop() {
    let store = disconnected_store();
    store.leave_project();
    assert!(!store.is_joined());
}

// =============================================================================
// join_project against a mock server
// =============================================================================

type ServerSocket = WebSocketStream<TcpStream>;

const WAIT: Duration = Duration::from_secs(5);

async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let url = format!("ws://{}", listener.local_addr().expect("addr"));
    (listener, url)
}

/// Accept one client and consume its `authenticate` envelope.
async fn accept_authenticated(listener: &TcpListener) -> ServerSocket {
    let (stream, _) = timeout(WAIT, listener.accept())
        .await
        .expect("accept deadline")
        .expect("accept");
    let mut socket = timeout(WAIT, accept_async(stream))
        .await
        .expect("ws deadline")
        .expect("ws handshake");
    let auth = read_envelope(&mut socket).await;
    assert_eq!(auth.event, "authenticate");
    socket
}

async fn read_envelope(socket: &mut ServerSocket) -> Envelope {
    loop {
        let message = timeout(WAIT, socket.next())
            .await
            .expect("read deadline")
            .expect("stream open")
            .expect("frame");
        if let Message::Text(text) = message {
            return wire::decode_envelope(text.as_str()).expect("decode");
        }
    }
}

async fn send_envelope(socket: &mut ServerSocket, envelope: &Envelope) {
    let text = wire::encode_envelope(envelope).expect("encode");
    socket.send(Message::Text(text.into())).await.expect("send");
}

fn joinable_store(url: &str) -> SessionStore {
    let config = ClientConfig::session(url)
        .with_connect_timeout(Duration::from_secs(2))
        .with_request_timeout(Duration::from_secs(2));
    SessionStore::new(
        Connection::new(config),
        Credentials::new("u1", "alice", "tok-1"),
    )
}

#[tokio::test]
async fn join_connects_and_installs_the_snapshot() {
    let (listener, url) = bind().await;
    let store = joinable_store(&url);

    let server = tokio::spawn(async move {
        let mut socket = accept_authenticated(&listener).await;
        let request = read_envelope(&mut socket).await;
        assert_eq!(request.event, "join_project");
        let reply = request.done(json!({
            "id": "p1",
            "name": "Launch teaser",
            "owner": "u1",
            "version": 3,
            "locked": false,
            "collaborators": [{
                "id": "u2", "username": "bob", "status": "online", "last_activity": 7
            }],
            "comments": [{
                "id": "c1", "user_id": "u2", "username": "bob",
                "content": "tighten this cut", "ts": 42, "resolved": false
            }]
        }));
        send_envelope(&mut socket, &reply).await;
        socket
    });

    let project = store.join_project("p1").await.expect("join");
    assert_eq!(project.version, 3);
    assert!(store.is_joined());

    let mirror = store.project().expect("mirror");
    assert_eq!(mirror.id, "p1");
    assert_eq!(mirror.collaborators.len(), 1);
    assert_eq!(mirror.comments.len(), 1);
    drop(server.await.expect("server task"));
}

#[tokio::test]
async fn joining_another_project_replaces_the_mirror_wholesale() {
    let (listener, url) = bind().await;
    let store = joinable_store(&url);

    let server = tokio::spawn(async move {
        let mut socket = accept_authenticated(&listener).await;

        let first = read_envelope(&mut socket).await;
        assert_eq!(first.project_id.as_deref(), Some("p1"));
        let reply = first.done(json!({
            "id": "p1",
            "name": "Launch teaser",
            "owner": "u1",
            "version": 3,
            "locked": true,
            "locked_by": "carol",
            "collaborators": [{
                "id": "u3", "username": "carol", "status": "online", "last_activity": 1
            }],
            "comments": [{
                "id": "c1", "user_id": "u3", "username": "carol",
                "content": "old note", "ts": 1, "resolved": false
            }]
        }));
        send_envelope(&mut socket, &reply).await;

        let second = read_envelope(&mut socket).await;
        assert_eq!(second.project_id.as_deref(), Some("p2"));
        let reply = second.done(json!({
            "id": "p2",
            "name": "Director cut",
            "owner": "u9",
            "version": 1,
            "locked": false
        }));
        send_envelope(&mut socket, &reply).await;
        socket
    });

    store.join_project("p1").await.expect("join p1");
    store.join_project("p2").await.expect("join p2");

    // Nothing of the first project may leak into the new mirror.
    let mirror = store.project().expect("mirror");
    assert_eq!(mirror.id, "p2");
    assert_eq!(mirror.version, 1);
    assert!(mirror.collaborators.is_empty());
    assert!(mirror.comments.is_empty());
    assert!(!mirror.locked);
    assert!(mirror.locked_by.is_none());
    drop(server.await.expect("server task"));
}

#[tokio::test]
async fn rejected_join_leaves_the_prior_mirror_untouched() {
    let (listener, url) = bind().await;
    let store = joinable_store(&url);

    let server = tokio::spawn(async move {
        let mut socket = accept_authenticated(&listener).await;

        let first = read_envelope(&mut socket).await;
        let reply = first.done(json!({
            "id": "p1",
            "name": "Launch teaser",
            "owner": "u1",
            "version": 3,
            "locked": false
        }));
        send_envelope(&mut socket, &reply).await;

        let second = read_envelope(&mut socket).await;
        let reply = second.error("project not found");
        send_envelope(&mut socket, &reply).await;
        socket
    });

    store.join_project("p1").await.expect("join p1");
    let error = store.join_project("missing").await.expect_err("rejected");
    assert!(matches!(
        error,
        SessionError::Request(RequestError::Server { .. })
    ));

    let mirror = store.project().expect("mirror kept");
    assert_eq!(mirror.id, "p1");
    assert!(store.is_joined());
    drop(server.await.expect("server task"));
}
