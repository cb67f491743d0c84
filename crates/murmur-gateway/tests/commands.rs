mod common;

use chrono::DateTime;
use common::{Harness, drain, harness};
use murmur_db::NewMessage;
use murmur_gateway::handlers::{Session, handle_command};
use murmur_types::events::{ErrorCode, GatewayCommand, GatewayEvent};
use murmur_types::models::{DeliveryState, Message, PresenceRecord, RequestStatus};
use uuid::Uuid;

impl Harness {
    fn append(&self, from: Uuid, body: &str, at_ms: i64) -> Message {
        let to = if from == self.alice { self.bob } else { self.alice };
        self.engine()
            .db()
            .append_message(NewMessage {
                conversation_id: self.conversation_id,
                sender_id: from,
                receiver_id: to,
                body: body.into(),
                message_type: Some("text".into()),
                attachment_url: None,
                client_ref: None,
                reply_to: None,
                delivery_state: DeliveryState::Sent,
                created_at: DateTime::from_timestamp_millis(at_ms),
            })
            .unwrap()
    }

    fn state_of(&self, message_id: Uuid) -> DeliveryState {
        self.engine().db().get_message(message_id).unwrap().delivery_state
    }

    async fn join(&self, session: &Session, target_user_id: Uuid) {
        handle_command(
            &self.state,
            session,
            GatewayCommand::JoinRoom {
                target_user_id,
                token: None,
                wants_history: false,
            },
        )
        .await
        .unwrap();
    }
}

async fn run(h: &Harness, session: &Session, cmd: GatewayCommand) -> Option<ErrorCode> {
    handle_command(&h.state, session, cmd).await.err().map(|e| e.code())
}

#[tokio::test]
async fn presence_commands_drive_delivery_state() {
    let h = harness();
    let (_alice, mut alice_rx) = h.connect(h.alice, "alice").await;
    let (bob, _bob_rx) = h.connect(h.bob, "bob").await;
    h.join(&bob, h.alice).await;

    let a = h.engine().send(h.outgoing("a")).await.unwrap();
    assert_eq!(a.delivery_state, DeliveryState::Seen);

    let leave_chat = GatewayCommand::LeaveChat {
        conversation_id: h.conversation_id,
        user_id: None,
    };
    assert_eq!(run(&h, &bob, leave_chat).await, None);
    assert_eq!(h.dispatcher().presence(h.bob).await, Some(PresenceRecord::online()));
    assert!(!h.dispatcher().is_joined(h.conversation_id, bob.conn_id).await);
    let b = h.engine().send(h.outgoing("b")).await.unwrap();
    assert_eq!(b.delivery_state, DeliveryState::Delivered);

    drain(&mut alice_rx);
    assert_eq!(run(&h, &bob, GatewayCommand::LeaveApp).await, None);
    assert!(!h.engine().db().is_online(h.bob).unwrap());
    assert!(drain(&mut alice_rx).iter().any(|e| matches!(
        e,
        GatewayEvent::UserOffline { user_id, .. } if *user_id == h.bob
    )));
    let c = h.engine().send(h.outgoing("c")).await.unwrap();
    assert_eq!(c.delivery_state, DeliveryState::Sent);

    assert_eq!(run(&h, &bob, GatewayCommand::OpenApp).await, None);
    assert!(h.engine().db().is_online(h.bob).unwrap());
    assert_eq!(h.state_of(c.id), DeliveryState::Delivered);
    let events = drain(&mut alice_rx);
    assert!(events.iter().any(|e| matches!(
        e,
        GatewayEvent::AllMessageDelivered { delivered_to, .. } if *delivered_to == h.bob
    )));
    assert!(events.iter().any(|e| matches!(
        e,
        GatewayEvent::UserOnline { user_id, .. } if *user_id == h.bob
    )));
}

#[tokio::test]
async fn previous_messages_respect_each_viewers_deletion_mark() {
    let h = harness();
    let m1 = h.append(h.alice, "m1", 1_000);
    let m2 = h.append(h.bob, "m2", 2_000);
    let m3 = h.append(h.alice, "m3", 3_000);
    let m4 = h.append(h.bob, "m4", 4_000);
    h.engine()
        .db()
        .mark_soft_deleted_at(
            h.conversation_id,
            h.bob,
            DateTime::from_timestamp_millis(2_000).unwrap(),
        )
        .unwrap();

    let page = || GatewayCommand::GetPreviousMessages {
        conversation_id: h.conversation_id,
        last_message_id: m4.id,
    };
    let ids_in = |events: Vec<GatewayEvent>| match events.as_slice() {
        [GatewayEvent::PreviousMessages { messages, .. }] => {
            messages.iter().map(|m| m.id).collect::<Vec<_>>()
        }
        other => panic!("expected one page, got {:?}", other),
    };

    let (bob, mut bob_rx) = h.connect(h.bob, "bob").await;
    assert_eq!(run(&h, &bob, page()).await, None);
    assert_eq!(ids_in(drain(&mut bob_rx)), vec![m3.id]);

    let (alice, mut alice_rx) = h.connect(h.alice, "alice").await;
    assert_eq!(run(&h, &alice, page()).await, None);
    assert_eq!(ids_in(drain(&mut alice_rx)), vec![m3.id, m2.id, m1.id]);

    let (stranger, mut stranger_rx) = h.connect(Uuid::new_v4(), "mallory").await;
    assert_eq!(run(&h, &stranger, page()).await, Some(ErrorCode::Unauthorized));
    assert!(drain(&mut stranger_rx).is_empty());
}

#[tokio::test]
async fn delete_messages_is_all_or_nothing() {
    let h = harness();
    let a1 = h.engine().send(h.outgoing("a1")).await.unwrap();
    let a2 = h.engine().send(h.outgoing("a2")).await.unwrap();
    let mut reply = h.outgoing("b1");
    reply.sender_id = h.bob;
    reply.sender_name = "bob".into();
    reply.receiver_id = h.alice;
    let b1 = h.engine().send(reply).await.unwrap();

    let (alice, _alice_rx) = h.connect(h.alice, "alice").await;
    let (bob, mut bob_rx) = h.connect(h.bob, "bob").await;
    h.dispatcher().join_room(h.conversation_id, bob.conn_id).await;

    let delete = |ids: Vec<Uuid>| GatewayCommand::DeleteMessages {
        message_ids: ids,
        conversation_id: h.conversation_id,
        sender_id: None,
    };
    assert_eq!(
        run(&h, &alice, delete(vec![a1.id, b1.id])).await,
        Some(ErrorCode::Unauthorized)
    );
    for id in [a1.id, a2.id, b1.id] {
        assert!(h.engine().db().get_message(id).is_ok());
    }
    assert!(drain(&mut bob_rx).is_empty());

    assert_eq!(run(&h, &alice, delete(vec![a1.id, a2.id, a1.id])).await, None);
    assert!(matches!(
        drain(&mut bob_rx).as_slice(),
        [GatewayEvent::MessagesDeleted { message_ids, .. }] if *message_ids == vec![a1.id, a2.id]
    ));
    assert!(h.engine().db().get_message(a1.id).is_err());
    assert!(h.engine().db().get_message(b1.id).is_ok());
}

#[tokio::test]
async fn reactions_and_read_receipts_reach_the_room() {
    let h = harness();
    let message = h.engine().send(h.outgoing("react to me")).await.unwrap();
    assert_eq!(message.delivery_state, DeliveryState::Sent);

    let (bob, mut bob_rx) = h.connect(h.bob, "bob").await;
    h.dispatcher().join_room(h.conversation_id, bob.conn_id).await;

    let react = |conversation_id: Uuid| GatewayCommand::ReactOnPrivateMessage {
        message_id: message.id,
        conversation_id,
        reaction: "❤️".into(),
        token: None,
    };
    assert_eq!(run(&h, &bob, react(h.conversation_id)).await, None);
    assert!(matches!(
        drain(&mut bob_rx).as_slice(),
        [GatewayEvent::ReactionUpdated { user_id, reaction, .. }]
            if *user_id == h.bob && reaction == "❤️"
    ));
    let stored = h.engine().db().get_message(message.id).unwrap();
    assert!(stored
        .reactions
        .iter()
        .any(|r| r.user_id == h.bob && r.reaction.as_deref() == Some("❤️")));

    let (elsewhere, _) = h
        .engine()
        .db()
        .find_or_create_conversation(h.bob, Uuid::new_v4())
        .unwrap();
    assert_eq!(run(&h, &bob, react(elsewhere.id)).await, Some(ErrorCode::NotFound));

    let read_all = GatewayCommand::ReadAllMessages {
        conversation_id: h.conversation_id,
        token: None,
    };
    assert_eq!(run(&h, &bob, read_all).await, None);
    assert!(matches!(
        drain(&mut bob_rx).as_slice(),
        [GatewayEvent::AllMessagesRead { user_id, .. }] if *user_id == h.bob
    ));
    assert_eq!(h.state_of(message.id), DeliveryState::Seen);
}

#[tokio::test]
async fn block_events_reach_only_the_other_participant() {
    let h = harness();
    let carol = Uuid::new_v4();
    let (alice, mut alice_rx) = h.connect(h.alice, "alice").await;
    let (_bob, mut bob_rx) = h.connect(h.bob, "bob").await;
    let (_carol, mut carol_rx) = h.connect(carol, "carol").await;

    let block = |other_user_id: Uuid| GatewayCommand::BlockUser {
        other_user_id,
        conversation_id: h.conversation_id,
        user_id: None,
    };
    assert_eq!(run(&h, &alice, block(h.bob)).await, None);
    assert!(matches!(
        drain(&mut bob_rx).as_slice(),
        [GatewayEvent::GotBlocked { user_id, .. }] if *user_id == h.alice
    ));
    assert!(drain(&mut alice_rx).is_empty());
    assert!(drain(&mut carol_rx).is_empty());

    assert_eq!(run(&h, &alice, block(carol)).await, Some(ErrorCode::Unauthorized));
    assert!(drain(&mut carol_rx).is_empty());

    let unblock = GatewayCommand::UnblockUser {
        other_user_id: h.bob,
        conversation_id: h.conversation_id,
        user_id: None,
    };
    assert_eq!(run(&h, &alice, unblock).await, None);
    assert!(matches!(
        drain(&mut bob_rx).as_slice(),
        [GatewayEvent::GotUnBlocked { user_id, .. }] if *user_id == h.alice
    ));
}

#[tokio::test]
async fn typing_requires_a_joined_room() {
    let h = harness();
    let (alice, mut alice_rx) = h.connect(h.alice, "alice").await;
    let (bob, _bob_rx) = h.connect(h.bob, "bob").await;
    h.dispatcher().join_room(h.conversation_id, alice.conn_id).await;

    let start = || GatewayCommand::StartTyping {
        conversation_id: h.conversation_id,
        token: None,
    };
    assert_eq!(run(&h, &bob, start()).await, Some(ErrorCode::Unauthorized));
    assert!(drain(&mut alice_rx).is_empty());

    h.join(&bob, h.alice).await;
    drain(&mut alice_rx);

    assert_eq!(run(&h, &bob, start()).await, None);
    assert!(matches!(
        drain(&mut alice_rx).as_slice(),
        [GatewayEvent::TypingStart { user_id, .. }] if *user_id == h.bob
    ));

    let stop = GatewayCommand::StopTyping {
        conversation_id: h.conversation_id,
        token: None,
    };
    assert_eq!(run(&h, &bob, stop).await, None);
    assert!(matches!(
        drain(&mut alice_rx).as_slice(),
        [GatewayEvent::TypingStop { user_id, .. }] if *user_id == h.bob
    ));
}

#[tokio::test]
async fn rejected_request_cannot_be_accepted_later() {
    let h = harness();
    let mut first = h.outgoing("hello?");
    first.is_first_message = true;
    h.engine().send(first).await.unwrap();

    let (alice, mut alice_rx) = h.connect(h.alice, "alice").await;
    let (bob, _bob_rx) = h.connect(h.bob, "bob").await;
    h.dispatcher().join_room(h.conversation_id, alice.conn_id).await;

    let reject = || GatewayCommand::RejectChat {
        conversation_id: h.conversation_id,
        token: None,
    };
    assert_eq!(run(&h, &alice, reject()).await, Some(ErrorCode::Unauthorized));

    assert_eq!(run(&h, &bob, reject()).await, None);
    assert!(matches!(
        drain(&mut alice_rx).as_slice(),
        [GatewayEvent::ChatRequestRejected { conversation_id }] if *conversation_id == h.conversation_id
    ));
    let conversation = h.engine().db().get_conversation(h.conversation_id).unwrap();
    assert_eq!(conversation.request_status, RequestStatus::Rejected);

    let accept = GatewayCommand::AcceptChat {
        conversation_id: h.conversation_id,
        token: None,
    };
    assert_eq!(run(&h, &bob, accept).await, Some(ErrorCode::Conflict));
    assert!(drain(&mut alice_rx).is_empty());
}

#[tokio::test]
async fn superseded_connection_cannot_issue_commands() {
    let h = harness();
    let (old, mut old_rx) = h.connect(h.bob, "bob").await;
    h.join(&old, h.alice).await;
    drain(&mut old_rx);

    let (new, _new_rx) = h.connect(h.bob, "bob").await;
    assert!(!h.dispatcher().is_joined(h.conversation_id, old.conn_id).await);

    let typing = || GatewayCommand::StartTyping {
        conversation_id: h.conversation_id,
        token: None,
    };
    assert_eq!(run(&h, &old, typing()).await, Some(ErrorCode::Unauthorized));
    assert_eq!(run(&h, &old, GatewayCommand::LeaveApp).await, Some(ErrorCode::Unauthorized));
    assert_eq!(h.dispatcher().presence(h.bob).await, Some(PresenceRecord::online()));

    h.engine().send(h.outgoing("for the new socket")).await.unwrap();
    assert!(drain(&mut old_rx).is_empty());

    h.join(&new, h.alice).await;
    assert_eq!(run(&h, &new, typing()).await, None);
}
