#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use pinus_client::protocol::{Frame, FrameCodec, FrameKind, Message, MessageCodec, RouteDictionary};
use pinus_client::{
    Client, ClientConfig, NetworkStatus, Transport, TransportError, TransportEvent, TransportKind,
};
use serde_json::{Value, json};

#[derive(Default)]
struct MockState {
    inbox: VecDeque<TransportEvent>,
    sent: Vec<Vec<u8>>,
    connected: bool,
    disconnects: usize,
}

/// In-memory transport. Clones share state, so a test keeps one clone to
/// script inbound events and inspect what the client wrote.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Rc<RefCell<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_event(&self, event: TransportEvent) {
        self.state.borrow_mut().inbox.push_back(event);
    }

    pub fn accept(&self) {
        self.push_event(TransportEvent::Connected);
    }

    pub fn receive(&self, kind: FrameKind, body: &[u8]) {
        let bytes = FrameCodec::default().encode(kind, body).unwrap();
        self.push_event(TransportEvent::Received(bytes));
    }

    pub fn receive_message(&self, message: &Message) {
        let body = MessageCodec::new(RouteDictionary::new())
            .encode_message(message)
            .unwrap();
        self.receive(FrameKind::Data, &body);
    }

    pub fn receive_handshake(&self, response: &Value) {
        self.receive(FrameKind::Handshake, &serde_json::to_vec(response).unwrap());
    }

    pub fn sent_frames(&self) -> Vec<Frame> {
        let codec = FrameCodec::default();
        self.state
            .borrow()
            .sent
            .iter()
            .map(|bytes| codec.decode(bytes).unwrap())
            .collect()
    }

    pub fn sent_kinds(&self) -> Vec<FrameKind> {
        self.sent_frames().into_iter().map(|f| f.kind).collect()
    }

    pub fn clear_sent(&self) {
        self.state.borrow_mut().sent.clear();
    }

    /// Makes later sends fail as if the link dropped before the close was polled.
    pub fn drop_link(&self) {
        self.state.borrow_mut().connected = false;
    }

    pub fn disconnects(&self) -> usize {
        self.state.borrow().disconnects
    }
}

impl Transport for MockTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Tcp
    }

    fn send(&mut self, bytes: Vec<u8>) -> Result<(), TransportError> {
        let mut state = self.state.borrow_mut();
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        state.sent.push(bytes);
        Ok(())
    }

    fn poll(&mut self) -> Vec<TransportEvent> {
        let mut state = self.state.borrow_mut();
        let events: Vec<_> = state.inbox.drain(..).collect();
        for event in &events {
            match event {
                TransportEvent::Connected => state.connected = true,
                TransportEvent::Closed(_) => state.connected = false,
                TransportEvent::Received(_) => {}
            }
        }
        events
    }

    fn disconnect(&mut self) {
        let mut state = self.state.borrow_mut();
        state.connected = false;
        state.disconnects += 1;
    }
}

pub fn accepted_handshake(heartbeat: u32) -> Value {
    json!({
        "code": 200,
        "sys": { "heartbeat": heartbeat },
        "user": { "server": "connector-1" }
    })
}

/// Records every status notification.
pub fn record_statuses(client: &mut Client) -> Rc<RefCell<Vec<NetworkStatus>>> {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    client.on_status_change(move |status| sink.borrow_mut().push(status));
    seen
}

/// Drives a fresh session on `transport` through the handshake.
pub fn handshake(client: &mut Client, transport: &MockTransport, response: &Value) {
    client.connect_with(transport.clone());
    transport.accept();
    client.tick(0.0);
    transport.receive_handshake(response);
    client.tick(0.0);
}

pub fn ready_client(heartbeat: u32) -> (Client, MockTransport) {
    ready_client_with(ClientConfig::default(), heartbeat)
}

pub fn ready_client_with(config: ClientConfig, heartbeat: u32) -> (Client, MockTransport) {
    let mut client = Client::new(config);
    let transport = MockTransport::new();
    handshake(&mut client, &transport, &accepted_handshake(heartbeat));
    assert_eq!(client.status(), NetworkStatus::Ready);
    transport.clear_sent();
    (client, transport)
}
