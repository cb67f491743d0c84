#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use murmur_db::Database;
use murmur_gateway::delivery::OutgoingMessage;
use murmur_gateway::handlers::Session;
use murmur_gateway::notify::{NotificationJob, Notifier};
use murmur_gateway::{DeliveryEngine, Dispatcher, GatewayState};
use murmur_types::events::GatewayEvent;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

#[derive(Default)]
pub struct RecordingNotifier {
    pub jobs: Mutex<Vec<NotificationJob>>,
}

impl Notifier for RecordingNotifier {
    fn enqueue(&self, job: NotificationJob) {
        self.jobs.lock().unwrap().push(job);
    }
}

impl RecordingNotifier {
    pub fn count(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }
}

pub struct Harness {
    pub state: GatewayState,
    pub notifier: Arc<RecordingNotifier>,
    pub alice: Uuid,
    pub bob: Uuid,
    pub conversation_id: Uuid,
}

pub fn harness() -> Harness {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let notifier = Arc::new(RecordingNotifier::default());
    let engine = DeliveryEngine::new(db.clone(), Dispatcher::new(), notifier.clone());
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    let (conversation, _) = db.find_or_create_conversation(alice, bob).unwrap();
    db.register_device(bob, "bob-phone", "bob-token").unwrap();
    db.register_device(alice, "alice-phone", "alice-token").unwrap();

    Harness {
        state: GatewayState {
            engine,
            jwt_secret: "test-secret".into(),
            history_page: 20,
        },
        notifier,
        alice,
        bob,
        conversation_id: conversation.id,
    }
}

impl Harness {
    pub fn engine(&self) -> &DeliveryEngine {
        &self.state.engine
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        self.state.engine.dispatcher()
    }

    pub async fn connect(&self, user_id: Uuid, username: &str) -> (Session, UnboundedReceiver<GatewayEvent>) {
        let (conn_id, rx) = self.dispatcher().connect(user_id).await;
        (
            Session {
                conn_id,
                user_id,
                username: username.into(),
            },
            rx,
        )
    }

    pub fn outgoing(&self, body: &str) -> OutgoingMessage {
        OutgoingMessage {
            sender_id: self.alice,
            sender_name: "alice".into(),
            receiver_id: self.bob,
            conversation_id: self.conversation_id,
            body: body.into(),
            message_type: Some("text".into()),
            attachment_url: None,
            client_ref: None,
            reply_to: None,
            is_first_message: false,
            toggle_suggestion: false,
        }
    }
}

pub fn drain(rx: &mut UnboundedReceiver<GatewayEvent>) -> Vec<GatewayEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
