// Integration tests for the room shape
//
// Drives the orchestrator with protocol events against the fake engine and
// checks registry contents, outbound traffic and candidate handling.

mod common;

use common::*;
use confsignal_core::capability::Direction;
use confsignal_core::message::{ClientMessage, Role, ServerMessage};
use confsignal_core::orchestrator::{Orchestrator, OrchestratorConfig, Shape, UserAction};
use confsignal_core::session::SessionPhase;
use confsignal_core::testing::{FakeEngine, FakeMedia};
use confsignal_core::transport::TransportEvent;
use confsignal_core::SignalError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[tokio::test]
async fn test_publisher_alone_negotiates_once() {
    let mut h = Harness::room();
    h.join("alice", Role::Publisher, vec![]).await;

    let sent = h.sent();
    assert_eq!(
        sent[0],
        ClientMessage::JoinRoom {
            name: "alice".into(),
            room: "room1".into(),
            role: Role::Publisher,
        }
    );
    assert_eq!(negotiated(&sent), vec!["alice"]);
    assert!(sent.contains(&ClientMessage::Negotiate {
        sender: "alice".into(),
        sdp_offer: "offer-alice".into(),
    }));

    assert_eq!(h.sessions(), vec!["alice"]);
    assert_eq!(h.engine.direction("alice"), Some(Direction::SendOnly));
    assert_eq!(h.orch.registry().get("alice").unwrap().phase(), SessionPhase::OfferSent);

    h.inbound(answer_for("alice"));
    h.settle().await;
    assert_eq!(h.engine.answers("alice"), vec!["answer-alice"]);
    assert_eq!(h.orch.registry().get("alice").unwrap().phase(), SessionPhase::Active);

    println!("✓ Lone publisher negotiates exactly one send-only session");
}

#[tokio::test]
async fn test_viewer_only_subscribes_to_publishers() {
    let mut h = Harness::room();
    h.join("carol", Role::Viewer, vec![publisher("bob"), viewer("vic")]).await;

    assert_eq!(h.sessions(), vec!["bob"]);
    assert_eq!(negotiated(&h.sent()), vec!["bob"]);
    assert_eq!(h.engine.direction("bob"), Some(Direction::ReceiveOnly));
    assert_eq!(h.engine.created_count("carol"), 0);
    assert_eq!(h.media.acquired(), 0);

    println!("✓ Viewer creates receive-only sessions for publishers only");
}

#[tokio::test]
async fn test_publisher_subscribes_after_publishing() {
    let mut h = Harness::room();
    h.join("alice", Role::Publisher, vec![publisher("bob"), publisher("dave")]).await;

    assert_eq!(h.sessions(), vec!["alice", "bob", "dave"]);
    assert_eq!(negotiated(&h.sent()), vec!["alice", "bob", "dave"]);
    assert_eq!(h.media.acquired(), 1);
}

#[tokio::test]
async fn test_roster_changes_during_capture_are_respected() {
    let mut h = Harness::room();
    h.orch.handle_action(UserAction::Join {
        name: "alice".into(),
        room: "room1".into(),
        role: Role::Publisher,
    });
    h.inbound(ServerMessage::ExistingParticipants {
        participants: vec![publisher("bob"), publisher("dave")],
    });

    // Capture still pending: bob leaves, dave comes back as a viewer
    h.inbound(ServerMessage::ParticipantLeft { name: "bob".into() });
    h.inbound(ServerMessage::NewParticipant {
        name: "dave".into(),
        role: Role::Viewer,
    });
    h.settle().await;

    assert_eq!(h.sessions(), vec!["alice"]);
    assert_eq!(h.engine.created_count("bob"), 0);
    assert_eq!(h.engine.created_count("dave"), 0);
}

#[tokio::test]
async fn test_answer_without_session_is_ignored() {
    let mut h = Harness::room();
    h.join("carol", Role::Viewer, vec![]).await;
    h.sent();

    h.inbound(answer_for("ghost"));
    h.settle().await;

    assert!(h.sessions().is_empty());
    assert!(h.engine.answers("ghost").is_empty());
    assert!(h.errors().is_empty());
}

#[tokio::test]
async fn test_candidate_before_session_is_applied_later() {
    let mut h = Harness::room();
    h.orch.handle_action(UserAction::Join {
        name: "alice".into(),
        room: "room1".into(),
        role: Role::Publisher,
    });
    h.inbound(ServerMessage::ExistingParticipants {
        participants: vec![publisher("bob")],
    });

    // bob's session waits for our own capture, so this one must be buffered
    h.inbound(remote_candidate("bob", 1));
    assert_eq!(h.orch.buffered_candidates("bob"), 1);

    h.settle().await;
    assert_eq!(h.orch.buffered_candidates("bob"), 0);
    assert_eq!(h.engine.applied_candidates("bob"), vec![candidate(1)]);

    println!("✓ Early candidate survives until the session exists");
}

#[tokio::test]
async fn test_candidate_during_handle_creation_is_queued() {
    let mut h = Harness::room();
    h.join("carol", Role::Viewer, vec![]).await;

    h.inbound(ServerMessage::NewParticipant {
        name: "dave".into(),
        role: Role::Publisher,
    });
    // Registered, handle not created yet
    assert_eq!(h.orch.registry().get("dave").unwrap().phase(), SessionPhase::Pending);
    h.inbound(remote_candidate("dave", 1));
    h.inbound(remote_candidate("dave", 2));
    assert_eq!(h.orch.registry().get("dave").unwrap().queued_candidates(), 2);

    h.settle().await;
    assert_eq!(h.engine.applied_candidates("dave"), vec![candidate(1), candidate(2)]);

    // Once the handle exists candidates go straight through
    h.inbound(remote_candidate("dave", 3));
    h.settle().await;
    assert_eq!(h.engine.applied_candidates("dave").len(), 3);
}

#[tokio::test]
async fn test_candidate_after_departure_is_discarded() {
    let mut h = Harness::room();
    h.join("carol", Role::Viewer, vec![publisher("bob")]).await;

    h.inbound(ServerMessage::ParticipantLeft { name: "bob".into() });
    h.inbound(remote_candidate("bob", 9));
    h.settle().await;

    assert!(h.sessions().is_empty());
    assert_eq!(h.orch.buffered_candidates("bob"), 0);
    assert!(h.engine.applied_candidates("bob").is_empty());
    assert_eq!(h.engine.dispose_count("bob"), 1);
    assert_eq!(h.media.detach_count("bob"), 1);
    assert!(h.errors().is_empty());
}

#[tokio::test]
async fn test_departure_releases_buffered_candidates() {
    let mut h = Harness::room();
    h.join("carol", Role::Viewer, vec![]).await;

    h.inbound(remote_candidate("erin", 1));
    assert_eq!(h.orch.buffered_candidates("erin"), 1);
    h.inbound(ServerMessage::ParticipantLeft { name: "erin".into() });
    assert_eq!(h.orch.buffered_candidates("erin"), 0);

    // Coming back clears the departed mark
    h.inbound(ServerMessage::NewParticipant {
        name: "erin".into(),
        role: Role::Publisher,
    });
    h.inbound(remote_candidate("erin", 2));
    h.settle().await;
    assert_eq!(h.engine.applied_candidates("erin"), vec![candidate(2)]);
}

#[tokio::test]
async fn test_viewer_member_candidates_are_discarded() {
    let mut h = Harness::room();
    h.join("alice", Role::Publisher, vec![viewer("vic")]).await;

    h.inbound(remote_candidate("vic", 1));
    assert_eq!(h.orch.buffered_candidates("vic"), 0);
    assert_eq!(h.sessions(), vec!["alice"]);
}

#[tokio::test]
async fn test_handle_created_after_departure_is_disposed() {
    let mut h = Harness::room();
    h.join("carol", Role::Viewer, vec![]).await;
    h.sent();

    h.inbound(ServerMessage::NewParticipant {
        name: "dave".into(),
        role: Role::Publisher,
    });
    h.inbound(ServerMessage::ParticipantLeft { name: "dave".into() });
    h.settle().await;

    assert_eq!(h.engine.created_count("dave"), 1);
    assert_eq!(h.engine.dispose_count("dave"), 1);
    assert_eq!(h.engine.offer_count("dave"), 0);
    assert!(negotiated(&h.sent()).is_empty());
    assert!(h.sessions().is_empty());

    println!("✓ Late completion for a departed participant is a no-op");
}

#[tokio::test]
async fn test_rejoin_replaces_session() {
    let mut h = Harness::room();
    h.join("carol", Role::Viewer, vec![publisher("bob")]).await;
    let first = h.orch.registry().get("bob").unwrap().id();

    h.inbound(ServerMessage::NewParticipant {
        name: "bob".into(),
        role: Role::Publisher,
    });
    h.settle().await;

    let second = h.orch.registry().get("bob").unwrap().id();
    assert_ne!(first, second);
    assert_eq!(h.engine.created_count("bob"), 2);
    assert_eq!(h.engine.dispose_count("bob"), 1);
    assert_eq!(h.sessions(), vec!["bob"]);

    // Re-joining as a viewer leaves nothing to subscribe to
    h.inbound(ServerMessage::NewParticipant {
        name: "bob".into(),
        role: Role::Viewer,
    });
    h.settle().await;
    assert!(h.sessions().is_empty());
    assert_eq!(h.engine.dispose_count("bob"), 2);
}

#[tokio::test]
async fn test_offer_failure_only_affects_that_session() {
    let mut h = Harness::room();
    h.engine.fail_offer_for("bob");
    h.join("carol", Role::Viewer, vec![publisher("bob"), publisher("dave")]).await;

    assert_eq!(h.sessions(), vec!["dave"]);
    assert_eq!(negotiated(&h.sent()), vec!["dave"]);
    let errors = h.errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("bob"), "{}", errors[0]);
    assert_eq!(h.engine.dispose_count("bob"), 1);
}

#[tokio::test]
async fn test_answer_failure_disposes_session() {
    let mut h = Harness::room();
    h.engine.fail_answer_for("bob");
    h.join("carol", Role::Viewer, vec![publisher("bob"), publisher("dave")]).await;

    h.inbound(answer_for("bob"));
    h.inbound(answer_for("dave"));
    h.settle().await;

    assert_eq!(h.sessions(), vec!["dave"]);
    assert_eq!(h.orch.registry().get("dave").unwrap().phase(), SessionPhase::Active);
    assert_eq!(h.errors().len(), 1);
}

#[tokio::test]
async fn test_candidate_failure_disposes_session() {
    let mut h = Harness::room();
    h.engine.fail_candidates_for("bob");
    h.join("carol", Role::Viewer, vec![publisher("bob")]).await;

    h.inbound(remote_candidate("bob", 1));
    h.settle().await;

    assert!(h.sessions().is_empty());
    assert_eq!(h.errors().len(), 1);
}

#[tokio::test]
async fn test_answer_timeout_fails_session() {
    let config = OrchestratorConfig {
        answer_timeout: Some(Duration::from_millis(20)),
    };
    let mut h = Harness::new(Shape::Room, config);
    h.join("carol", Role::Viewer, vec![publisher("bob"), publisher("dave")]).await;

    h.inbound(answer_for("dave"));
    h.settle().await;

    assert!(h.orch.expire_next_deadline().await);
    assert!(h.orch.expire_next_deadline().await);
    assert!(!h.orch.expire_next_deadline().await);

    assert_eq!(h.sessions(), vec!["dave"]);
    let errors = h.errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("no answer"), "{}", errors[0]);
}

#[tokio::test]
async fn test_server_error_reverts_in_flight_negotiations() {
    let mut h = Harness::room();
    h.join("carol", Role::Viewer, vec![publisher("bob"), publisher("dave")]).await;
    h.inbound(answer_for("bob"));
    h.settle().await;

    h.inbound(ServerMessage::Error {
        message: "room is full".into(),
    });

    assert_eq!(h.sessions(), vec!["bob"]);
    let errors = h.errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("room is full"));
}

#[tokio::test]
async fn test_capture_failure_still_subscribes() {
    let mut h = Harness::room();
    h.media.set_capture_unavailable(true);
    h.join("alice", Role::Publisher, vec![publisher("bob")]).await;

    assert_eq!(h.sessions(), vec!["bob"]);
    let errors = h.errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("Cannot publish"), "{}", errors[0]);
}

#[tokio::test]
async fn test_engine_unavailable_is_surfaced() {
    let mut h = Harness::room();
    h.engine.set_unavailable(true);
    h.join("carol", Role::Viewer, vec![publisher("bob")]).await;

    assert!(h.sessions().is_empty());
    let errors = h.errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].starts_with("Capability unavailable"), "{}", errors[0]);
}

#[tokio::test]
async fn test_local_candidates_are_relayed_until_disposed() {
    let mut h = Harness::room();
    h.join("alice", Role::Publisher, vec![]).await;
    h.sent();

    assert!(h.engine.emit_local_candidate("alice", candidate(7)));
    h.settle().await;
    assert_eq!(
        h.sent(),
        vec![ClientMessage::LocalCandidate {
            candidate: candidate(7),
            name: "alice".into(),
        }]
    );

    h.orch.handle_action(UserAction::Leave);
    assert_eq!(h.sent(), vec![ClientMessage::LeaveRoom]);

    assert!(h.engine.emit_local_candidate("alice", candidate(8)));
    h.settle().await;
    assert!(h.sent().is_empty());
}

#[tokio::test]
async fn test_leave_disposes_everything() {
    let mut h = Harness::room();
    h.join("alice", Role::Publisher, vec![publisher("bob"), publisher("dave")]).await;
    h.inbound(remote_candidate("erin", 1));

    h.orch.handle_action(UserAction::Leave);

    assert!(h.sessions().is_empty());
    assert_eq!(h.orch.buffered_candidates("erin"), 0);
    for name in ["alice", "bob", "dave"] {
        assert_eq!(h.engine.dispose_count(name), 1, "{}", name);
    }
    assert_eq!(h.media.local_detach_count(), 1);

    // Leaving twice is reported, not fatal
    h.orch.handle_action(UserAction::Leave);
    assert!(h.errors().iter().any(|e| e == "Not in a room"));
}

#[tokio::test]
async fn test_nameless_candidate_targets_local_identity() {
    let mut h = Harness::room();
    h.join("alice", Role::Publisher, vec![]).await;

    h.inbound(ServerMessage::RemoteCandidate {
        name: None,
        candidate: candidate(3),
    });
    h.settle().await;
    assert_eq!(h.engine.applied_candidates("alice"), vec![candidate(3)]);
}

#[tokio::test]
async fn test_bad_input_never_crashes() {
    let mut h = Harness::room();
    h.join("carol", Role::Viewer, vec![publisher("bob")]).await;

    h.orch.handle_text("{not json");
    h.orch.handle_text(r#"{"id":"dance"}"#);
    h.orch.handle_text(r#"{"id":"participantLeft"}"#);
    h.orch.handle_text(r#"{"name":"bob"}"#);

    assert_eq!(h.sessions(), vec!["bob"]);
    assert!(h.errors().is_empty());
}

#[tokio::test]
async fn test_run_loop_until_connection_lost() {
    let engine = FakeEngine::new();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    let (notice_tx, mut notice_rx) = mpsc::unbounded_channel();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (action_tx, action_rx) = mpsc::unbounded_channel();

    let orch = Orchestrator::new(
        Shape::Room,
        Arc::new(engine.clone()),
        Arc::new(FakeMedia::new()),
        outbound_tx,
        notice_tx,
        OrchestratorConfig::default(),
    );
    let task = tokio::spawn(orch.run(inbound_rx, action_rx));

    action_tx
        .send(UserAction::Join {
            name: "carol".into(),
            room: "room1".into(),
            role: Role::Viewer,
        })
        .unwrap();
    let first = tokio::time::timeout(Duration::from_secs(1), outbound_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.kind(), "joinRoom");

    inbound_tx
        .send(TransportEvent::Message(
            r#"{"id":"existingParticipants","data":[{"name":"bob","role":"user"}]}"#.into(),
        ))
        .unwrap();
    let offer = tokio::time::timeout(Duration::from_secs(1), outbound_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        offer,
        ClientMessage::Negotiate {
            sender: "bob".into(),
            sdp_offer: "offer-bob".into(),
        }
    );

    inbound_tx.send(TransportEvent::Closed(Some("going away".into()))).unwrap();
    let result = tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
    assert_eq!(result, Err(SignalError::ConnectionLost("going away".into())));
    assert_eq!(engine.dispose_count("bob"), 1);

    let mut saw_notice = false;
    while let Ok(notice) = notice_rx.try_recv() {
        saw_notice |= notice.text.contains("Connection lost");
    }
    assert!(saw_notice);

    println!("✓ Run loop escalates connection loss and cleans up");
}
