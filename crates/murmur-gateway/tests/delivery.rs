mod common;

use common::{drain, harness};
use murmur_gateway::GatewayError;
use murmur_gateway::handlers::handle_command;
use murmur_types::events::{ErrorCode, GatewayCommand, GatewayEvent};
use murmur_types::models::{DeliveryState, PresenceRecord, RequestStatus};
use uuid::Uuid;

#[tokio::test]
async fn focus_decides_seen_then_delivered() {
    let h = harness();
    let (alice, mut alice_rx) = h.connect(h.alice, "alice").await;
    let (bob, _bob_rx) = h.connect(h.bob, "bob").await;
    h.dispatcher().join_room(h.conversation_id, alice.conn_id).await;

    h.dispatcher()
        .set_presence(bob.conn_id, h.bob, PresenceRecord::focused(h.conversation_id))
        .await;
    let hi = h.engine().send(h.outgoing("hi")).await.unwrap();
    assert_eq!(hi.delivery_state, DeliveryState::Seen);
    assert_eq!(h.notifier.count(), 0);

    // Sender's own connection gets the room echo
    let echoed = drain(&mut alice_rx);
    assert!(matches!(
        echoed.as_slice(),
        [GatewayEvent::GetPrivateMessage { message, .. }] if message.id == hi.id
    ));

    h.dispatcher()
        .set_presence(bob.conn_id, h.bob, PresenceRecord::online())
        .await;
    let there = h.engine().send(h.outgoing("there")).await.unwrap();
    assert_eq!(there.delivery_state, DeliveryState::Delivered);

    let jobs = h.notifier.jobs.lock().unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].target_token, "bob-token");
    assert_eq!(jobs[0].title, "alice");
    assert_eq!(jobs[0].body, "there");
}

#[tokio::test]
async fn offline_receiver_gets_sent_and_a_push() {
    let h = harness();
    let message = h.engine().send(h.outgoing("are you there")).await.unwrap();
    assert_eq!(message.delivery_state, DeliveryState::Sent);
    assert_eq!(h.notifier.count(), 1);
}

#[tokio::test]
async fn receiver_without_device_gets_no_job() {
    let h = harness();
    let carol = Uuid::new_v4();
    let (conversation, _) = h
        .engine()
        .db()
        .find_or_create_conversation(h.alice, carol)
        .unwrap();

    let mut out = h.outgoing("hello carol");
    out.receiver_id = carol;
    out.conversation_id = conversation.id;
    let message = h.engine().send(out).await.unwrap();
    assert_eq!(message.delivery_state, DeliveryState::Sent);
    assert_eq!(h.notifier.count(), 0);
}

#[tokio::test]
async fn stale_disconnect_keeps_receiver_reachable() {
    let h = harness();
    let (old, _old_rx) = h.connect(h.bob, "bob").await;
    let (_new, _new_rx) = h.connect(h.bob, "bob").await;
    assert!(!h.dispatcher().disconnect(h.bob, old.conn_id).await);

    let message = h.engine().send(h.outgoing("still here?")).await.unwrap();
    assert_eq!(message.delivery_state, DeliveryState::Delivered);
}

#[tokio::test]
async fn first_message_backfills_and_reaches_receiver_directly() {
    let h = harness();
    let (_bob, mut bob_rx) = h.connect(h.bob, "bob").await;

    let mut out = h.outgoing("nice to meet you");
    out.is_first_message = true;
    out.toggle_suggestion = true;
    h.engine().send(out).await.unwrap();

    let events = drain(&mut bob_rx);
    assert!(events.iter().any(|e| matches!(
        e,
        GatewayEvent::NewUserMsg { sender_id, .. } if *sender_id == h.alice
    )));

    let conversation = h.engine().db().get_conversation(h.conversation_id).unwrap();
    assert_eq!(conversation.initiator, Some(h.alice));
    assert_eq!(conversation.responder, Some(h.bob));
    assert!(!conversation.is_suggestion_active);

    // A later "first" message from the other side does not flip roles
    let mut reply = h.outgoing("likewise");
    reply.sender_id = h.bob;
    reply.receiver_id = h.alice;
    reply.is_first_message = true;
    h.engine().send(reply).await.unwrap();
    let conversation = h.engine().db().get_conversation(h.conversation_id).unwrap();
    assert_eq!(conversation.initiator, Some(h.alice));
}

#[tokio::test]
async fn mark_seen_notifies_sender_only_on_change() {
    let h = harness();
    let (_alice, mut alice_rx) = h.connect(h.alice, "alice").await;
    let sent = h.engine().send(h.outgoing("ping")).await.unwrap();
    assert_eq!(sent.delivery_state, DeliveryState::Sent);
    drain(&mut alice_rx);

    assert!(h.engine().mark_seen(h.bob, h.conversation_id).await.unwrap());
    let events = drain(&mut alice_rx);
    assert!(matches!(
        events.as_slice(),
        [GatewayEvent::AllMessageSee { seen_by, .. }] if *seen_by == h.bob
    ));
    assert_eq!(
        h.engine().db().get_message(sent.id).unwrap().delivery_state,
        DeliveryState::Seen
    );

    assert!(!h.engine().mark_seen(h.bob, h.conversation_id).await.unwrap());
    assert!(drain(&mut alice_rx).is_empty());

    assert!(matches!(
        h.engine().mark_seen(Uuid::new_v4(), h.conversation_id).await,
        Err(GatewayError::Unauthorized(_))
    ));
}

#[tokio::test]
async fn catch_up_moves_sent_to_delivered() {
    let h = harness();
    let first = h.engine().send(h.outgoing("one")).await.unwrap();
    h.engine().send(h.outgoing("two")).await.unwrap();
    assert_eq!(first.delivery_state, DeliveryState::Sent);

    let (_alice, mut alice_rx) = h.connect(h.alice, "alice").await;
    assert_eq!(h.engine().catch_up_delivered(h.bob).await.unwrap(), 1);
    assert!(matches!(
        drain(&mut alice_rx).as_slice(),
        [GatewayEvent::AllMessageDelivered { delivered_to, .. }] if *delivered_to == h.bob
    ));
    assert_eq!(
        h.engine().db().get_message(first.id).unwrap().delivery_state,
        DeliveryState::Delivered
    );
}

#[tokio::test]
async fn join_room_replays_history_and_marks_seen() {
    let h = harness();
    h.engine().send(h.outgoing("while you were away")).await.unwrap();

    let (_alice, mut alice_rx) = h.connect(h.alice, "alice").await;
    let (bob, mut bob_rx) = h.connect(h.bob, "bob").await;
    handle_command(
        &h.state,
        &bob,
        GatewayCommand::JoinRoom {
            target_user_id: h.alice,
            token: None,
            wants_history: true,
        },
    )
    .await
    .unwrap();

    let events = drain(&mut bob_rx);
    assert!(matches!(events[0], GatewayEvent::ChatJoined { request_status: RequestStatus::Pending, .. }));
    match &events[1] {
        GatewayEvent::PreviousMsg { messages, .. } => assert_eq!(messages.len(), 1),
        other => panic!("expected history, got {:?}", other),
    }
    assert!(drain(&mut alice_rx)
        .iter()
        .any(|e| matches!(e, GatewayEvent::AllMessageSee { .. })));

    assert_eq!(
        h.dispatcher().presence(h.bob).await,
        Some(PresenceRecord::focused(h.conversation_id))
    );
}

#[tokio::test]
async fn identity_fields_must_match_the_connection() {
    let h = harness();
    let (bob, _bob_rx) = h.connect(h.bob, "bob").await;

    let err = handle_command(
        &h.state,
        &bob,
        GatewayCommand::LeaveChat {
            conversation_id: h.conversation_id,
            user_id: Some(h.alice),
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, GatewayError::Unauthorized(_)));

    let err = handle_command(
        &h.state,
        &bob,
        GatewayCommand::StartTyping {
            conversation_id: h.conversation_id,
            token: Some("not-a-jwt".into()),
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, GatewayError::Unauthorized(_)));
}

#[tokio::test]
async fn only_the_responder_accepts() {
    let h = harness();
    let mut out = h.outgoing("hey");
    out.is_first_message = true;
    h.engine().send(out).await.unwrap();
    let jobs_before = h.notifier.count();

    let (alice, _alice_rx) = h.connect(h.alice, "alice").await;
    let (bob, _bob_rx) = h.connect(h.bob, "bob").await;

    let accept = || GatewayCommand::AcceptChat {
        conversation_id: h.conversation_id,
        token: None,
    };
    let err = handle_command(&h.state, &alice, accept()).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::Unauthorized);

    handle_command(&h.state, &bob, accept()).await.unwrap();
    let jobs = h.notifier.jobs.lock().unwrap();
    assert_eq!(jobs.len(), jobs_before + 1);
    let last = jobs.last().unwrap();
    assert_eq!(last.target_token, "alice-token");
    assert_eq!(last.title, "Request accepted");
    assert_eq!(last.body, "bob has accepted your chat request");
}
