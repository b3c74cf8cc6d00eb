//! Test doubles: a scripted transport and record builders.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::time::Duration;

use futures::future::{FutureExt, LocalBoxFuture};
use serde_json::{json, Value};

use courier_net::{Method, Request, Response, Transport, TransportError};
use courier_shared::Record;

use crate::client::Client;
use crate::config::ClientConfig;
use crate::events::Event;

/// Serves queued responses by request path; anything unscripted is a 404.
#[derive(Default)]
pub(crate) struct MockTransport {
    routes: RefCell<HashMap<String, VecDeque<Response>>>,
    requests: RefCell<Vec<Request>>,
}

impl MockTransport {
    pub(crate) fn respond(&self, path: &str, response: Response) {
        self.routes
            .borrow_mut()
            .entry(path.to_string())
            .or_default()
            .push_back(response);
    }

    pub(crate) fn requests(&self) -> Vec<Request> {
        self.requests.borrow().clone()
    }

    pub(crate) fn paths(&self) -> Vec<String> {
        self.requests.borrow().iter().map(|r| r.path.clone()).collect()
    }

    pub(crate) fn count(&self, method: Method, path: &str) -> usize {
        self.requests
            .borrow()
            .iter()
            .filter(|r| r.method == method && r.path == path)
            .count()
    }
}

impl Transport for MockTransport {
    fn request(&self, request: Request) -> LocalBoxFuture<'static, Result<Response, TransportError>> {
        let response = self
            .routes
            .borrow_mut()
            .get_mut(&request.path)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Response::error(404, "not found"));
        self.requests.borrow_mut().push(request);
        async move {
            tokio::task::yield_now().await;
            Ok(response)
        }
        .boxed_local()
    }
}

pub(crate) fn client() -> (Client, Rc<MockTransport>) {
    let transport = Rc::new(MockTransport::default());
    let client = Client::new(ClientConfig::default(), transport.clone());
    (client, transport)
}

pub(crate) fn ready_client() -> (Client, Rc<MockTransport>) {
    let (client, transport) = client();
    client.mark_ready();
    (client, transport)
}

/// Let deferred flushes, spawned requests and short timers run.
pub(crate) async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// Collects every event a handler sees.
pub(crate) fn recorder() -> (Rc<RefCell<Vec<Event>>>, impl Fn(&Event) + 'static) {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    (seen, move |event: &Event| sink.borrow_mut().push(event.clone()))
}

pub(crate) fn conversation_id(uuid: &str) -> String {
    format!("layer:///conversations/{uuid}")
}

pub(crate) fn message_id(uuid: &str) -> String {
    format!("layer:///messages/{uuid}")
}

pub(crate) fn conversation(uuid: &str, created_at: &str) -> Value {
    json!({
        "id": conversation_id(uuid),
        "created_at": created_at,
        "participants": ["frodo", "sam"],
        "unread_message_count": 0,
    })
}

pub(crate) fn conversation_with_last(uuid: &str, created_at: &str, last_sent_at: &str) -> Value {
    let mut value = conversation(uuid, created_at);
    value["last_message"] = json!({
        "id": message_id(&format!("{uuid}-last")),
        "position": 1,
        "sent_at": last_sent_at,
    });
    value
}

pub(crate) fn message(uuid: &str, conversation: &str, position: i64) -> Value {
    json!({
        "id": message_id(uuid),
        "conversation": { "id": conversation_id(conversation) },
        "position": position,
        "sent_at": "2024-01-01T00:00:00Z",
        "parts": [{ "mime_type": "text/plain", "body": uuid }],
        "is_unread": false,
    })
}

pub(crate) fn record(value: Value) -> Record {
    Record::from_value(value).expect("test record must be an object")
}
