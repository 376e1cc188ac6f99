//! Session orchestration: status machine, handshake, heartbeat and dispatch.
//!
//! Everything happens synchronously inside [`Client::tick`] or the public
//! calls. Callbacks receive values, never the client, so they cannot re-enter it.

use serde_json::Value;
use tokio::runtime::Handle;

use pinus_protocol::{
    Frame, FrameCodec, FrameKind, HandshakeNegotiator, HeartbeatConfig, MessageCodec, MessageKind,
    ProtoTables, RouteDictionary,
};

use crate::config::ClientConfig;
use crate::dispatcher::EventDispatcher;
use crate::error::{ClientError, CloseReason, RequestError, Result};
use crate::heartbeat::{HeartbeatEvent, HeartbeatMonitor};
use crate::request_id::RequestIdAllocator;
use crate::status::NetworkStatus;
use crate::transport::{Transport, TransportEvent, TransportParameter, create_transport};

type StatusObserver = Box<dyn FnMut(NetworkStatus)>;
type HandshakeObserver = Box<dyn FnMut(&Value)>;
type CloseObserver = Box<dyn FnMut(&CloseReason)>;

/// State negotiated by the handshake; exists only while `Ready`.
struct Session {
    codec: MessageCodec,
    heartbeat: HeartbeatMonitor,
    protos: Option<ProtoTables>,
}

pub struct Client {
    config: ClientConfig,
    status: NetworkStatus,
    transport: Option<Box<dyn Transport>>,
    session: Option<Session>,
    frames: FrameCodec,
    negotiator: HandshakeNegotiator,
    handshake_user: Option<Value>,
    ids: RequestIdAllocator,
    dispatcher: EventDispatcher,
    status_observers: Vec<StatusObserver>,
    handshake_observers: Vec<HandshakeObserver>,
    close_observers: Vec<CloseObserver>,
    last_close_reason: Option<CloseReason>,
}

impl Default for Client {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

impl core::fmt::Debug for Client {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Client")
            .field("status", &self.status)
            .field("transport", &self.transport.as_ref().map(|t| t.kind()))
            .field("dispatcher", &self.dispatcher)
            .field("last_close_reason", &self.last_close_reason)
            .finish_non_exhaustive()
    }
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        let frames = FrameCodec::new(config.limits.frame_limits());
        let ids = RequestIdAllocator::new(config.requests.id_ceiling);
        Self {
            config,
            status: NetworkStatus::Unknown,
            transport: None,
            session: None,
            frames,
            negotiator: HandshakeNegotiator::default(),
            handshake_user: None,
            ids,
            dispatcher: EventDispatcher::new(),
            status_observers: Vec::new(),
            handshake_observers: Vec::new(),
            close_observers: Vec::new(),
            last_close_reason: None,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn status(&self) -> NetworkStatus {
        self.status
    }

    pub fn last_close_reason(&self) -> Option<&CloseReason> {
        self.last_close_reason.as_ref()
    }

    pub fn pending_requests(&self) -> usize {
        self.dispatcher.pending_len()
    }

    /// Negotiated heartbeat, `None` until the handshake completes.
    pub fn heartbeat_config(&self) -> Option<HeartbeatConfig> {
        self.session.as_ref().map(|s| s.heartbeat.config())
    }

    pub fn route_dictionary(&self) -> Option<&RouteDictionary> {
        self.session.as_ref().map(|s| s.codec.dictionary())
    }

    pub fn protos(&self) -> Option<&ProtoTables> {
        self.session.as_ref().and_then(|s| s.protos.as_ref())
    }

    pub fn subscription_count(&self, route: &str) -> usize {
        self.dispatcher.subscription_count(route)
    }

    /// Application data sent as `user` in the next handshake hello.
    pub fn set_handshake_user(&mut self, user: Option<Value>) {
        self.handshake_user = user;
    }

    pub fn on_status_change<F>(&mut self, observer: F)
    where
        F: FnMut(NetworkStatus) + 'static,
    {
        self.status_observers.push(Box::new(observer));
    }

    /// Called with the server's `user` payload once the session is established.
    pub fn on_handshake_completed<F>(&mut self, observer: F)
    where
        F: FnMut(&Value) + 'static,
    {
        self.handshake_observers.push(Box::new(observer));
    }

    pub fn on_closed<F>(&mut self, observer: F)
    where
        F: FnMut(&CloseReason) + 'static,
    {
        self.close_observers.push(Box::new(observer));
    }

    /// Subscribes to pushes on `route`. Subscriptions outlive sessions.
    pub fn on<F>(&mut self, route: impl Into<String>, callback: F)
    where
        F: FnMut(&Value) + 'static,
    {
        self.dispatcher.add_subscription(route, callback);
    }

    /// Opens a connection on the current tokio runtime.
    ///
    /// Any open session is closed first with [`CloseReason::Replaced`].
    pub fn connect(&mut self, parameter: &TransportParameter) -> Result<()> {
        let handle = Handle::try_current().map_err(|_| ClientError::NoRuntime)?;
        let transport = create_transport(
            parameter,
            &self.config.transport,
            self.config.limits.frame_limits(),
            &handle,
        );
        log::info!("connecting to {parameter}");
        self.open(transport);
        Ok(())
    }

    /// Same as [`Self::connect`] with a caller-built transport.
    pub fn connect_with<T>(&mut self, transport: T)
    where
        T: Transport + 'static,
    {
        self.open(Box::new(transport));
    }

    /// Closes the session. Does nothing when no session is open.
    pub fn disconnect(&mut self) {
        self.teardown(CloseReason::Requested);
    }

    /// Pumps the transport and, once ready, the heartbeat.
    pub fn tick(&mut self, delta_secs: f32) {
        if !self.status.is_active() {
            return;
        }

        let events = match self.transport.as_mut() {
            Some(transport) => transport.poll(),
            None => return,
        };
        for event in events {
            if !self.status.is_active() {
                break;
            }
            self.handle_transport_event(event);
        }

        if self.status.is_ready() {
            self.advance_heartbeat(delta_secs);
        }
    }

    /// Sends a request and returns its id. Once `Ok` is returned, `callback`
    /// fires exactly once, with the response or with
    /// [`RequestError::ConnectionClosed`]. On `Err` it is dropped uncalled.
    pub fn request<F>(&mut self, route: &str, payload: Value, callback: F) -> Result<u32>
    where
        F: FnOnce(std::result::Result<Value, RequestError>) + 'static,
    {
        self.ensure_ready()?;
        let id = self.allocate_id()?;
        let frame = self.encode_data(route, id, &payload)?;

        self.dispatcher.add_callback(id, callback);
        if let Err(e) = self.send_raw(frame) {
            self.dispatcher.cancel(id);
            return Err(e);
        }
        log::debug!("request {id} -> {route}");
        Ok(id)
    }

    /// Sends a one-way message; the server never answers it.
    pub fn notify(&mut self, route: &str, payload: Value) -> Result<()> {
        self.ensure_ready()?;
        let frame = self.encode_data(route, 0, &payload)?;
        self.send_raw(frame)?;
        log::debug!("notify -> {route}");
        Ok(())
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.status.is_ready() {
            Ok(())
        } else {
            Err(ClientError::NotReady(self.status))
        }
    }

    /// Next id not currently awaiting a response.
    fn allocate_id(&mut self) -> Result<u32> {
        for _ in 0..self.ids.capacity() {
            let id = self.ids.next_id();
            if !self.dispatcher.is_pending(id) {
                return Ok(id);
            }
        }
        Err(ClientError::TooManyPendingRequests(self.ids.capacity()))
    }

    fn encode_data(&self, route: &str, id: u32, payload: &Value) -> Result<Vec<u8>> {
        let session = self
            .session
            .as_ref()
            .ok_or(ClientError::NotReady(self.status))?;
        let body = session.codec.encode(route, id, payload)?;
        Ok(self.frames.encode(FrameKind::Data, &body)?)
    }

    fn send_frame(&mut self, kind: FrameKind, body: &[u8]) -> Result<()> {
        let bytes = self.frames.encode(kind, body)?;
        self.send_raw(bytes)
    }

    fn send_raw(&mut self, bytes: Vec<u8>) -> Result<()> {
        let transport = self
            .transport
            .as_mut()
            .ok_or(ClientError::NotReady(self.status))?;
        transport.send(bytes)?;
        Ok(())
    }

    fn open(&mut self, transport: Box<dyn Transport>) {
        if self.status.is_active() {
            self.teardown(CloseReason::Replaced);
        }

        let client_type = self
            .config
            .client_type_or(transport.kind().client_type())
            .to_owned();
        self.negotiator = HandshakeNegotiator::new(self.config.handshake.version.clone(), client_type);
        self.ids.reset();
        self.transport = Some(transport);
        self.set_status(NetworkStatus::Connecting);
    }

    fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => {
                if self.status == NetworkStatus::Connecting {
                    self.set_status(NetworkStatus::Connected);
                    self.begin_handshake();
                } else {
                    log::debug!("ignoring duplicate connected event in {}", self.status);
                }
            }
            TransportEvent::Received(bytes) => self.process_bytes(&bytes),
            TransportEvent::Closed(detail) => self.teardown(CloseReason::TransportClosed(detail)),
        }
    }

    fn begin_handshake(&mut self) {
        self.set_status(NetworkStatus::Handshaking);

        let hello = match self.negotiator.build_request(self.handshake_user.as_ref()) {
            Ok(hello) => hello,
            Err(e) => {
                self.teardown(CloseReason::HandshakeRejected(e.to_string()));
                return;
            }
        };
        if let Err(e) = self.send_frame(FrameKind::Handshake, &hello) {
            self.teardown(CloseReason::TransportClosed(Some(e.to_string())));
        }
    }

    fn process_bytes(&mut self, bytes: &[u8]) {
        let frames = match self.frames.decode_all(bytes) {
            Ok(frames) => frames,
            Err(e) => {
                self.teardown(CloseReason::MalformedFrame(e.to_string()));
                return;
            }
        };

        for frame in frames {
            if !self.status.is_active() {
                break;
            }
            self.process_frame(frame);
        }
    }

    fn process_frame(&mut self, frame: Frame) {
        log::debug!("<- {:?} ({} bytes) in {}", frame.kind, frame.len(), self.status);
        match frame.kind {
            FrameKind::Handshake if self.status == NetworkStatus::Handshaking => {
                self.complete_handshake(&frame.body);
            }
            FrameKind::Heartbeat if self.status.is_ready() => {
                if let Some(session) = self.session.as_mut() {
                    session.heartbeat.reset();
                }
            }
            FrameKind::Data if self.status.is_ready() => {
                if let Some(session) = self.session.as_mut() {
                    session.heartbeat.reset();
                }
                self.process_message(&frame.body);
            }
            FrameKind::Kick => self.teardown(CloseReason::Kicked(kick_reason(&frame.body))),
            kind => log::debug!("ignoring {kind:?} frame in {}", self.status),
        }
    }

    fn complete_handshake(&mut self, body: &[u8]) {
        let outcome = match self.negotiator.parse_response(body) {
            Ok(outcome) => outcome,
            Err(e) => {
                self.teardown(CloseReason::HandshakeRejected(e.to_string()));
                return;
            }
        };

        let mut heartbeat = HeartbeatMonitor::new(outcome.heartbeat);
        if outcome.heartbeat.is_enabled() {
            heartbeat.start();
        }
        log::info!(
            "handshake accepted: {} routes, heartbeat {}s",
            outcome.dictionary.len(),
            outcome.heartbeat.interval_secs
        );
        self.session = Some(Session {
            codec: MessageCodec::new(outcome.dictionary),
            heartbeat,
            protos: outcome.protos,
        });

        if let Err(e) = self.send_frame(FrameKind::HandshakeAck, &[]) {
            self.teardown(CloseReason::TransportClosed(Some(e.to_string())));
            return;
        }

        for observer in &mut self.handshake_observers {
            observer(&outcome.user);
        }
        self.set_status(NetworkStatus::Ready);
    }

    fn process_message(&mut self, body: &[u8]) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let message = match session.codec.decode(body) {
            Ok(message) => message,
            Err(e) => {
                log::warn!("dropping undecodable message: {e}");
                return;
            }
        };

        match message.kind {
            MessageKind::Response => {
                self.dispatcher.dispatch_response(message.id, message.body);
            }
            MessageKind::Push => {
                self.dispatcher.dispatch_push(&message.route, &message.body);
            }
            kind => log::debug!("ignoring server-sent {kind:?} message"),
        }
    }

    fn advance_heartbeat(&mut self, delta_secs: f32) {
        let event = self
            .session
            .as_mut()
            .and_then(|session| session.heartbeat.advance(delta_secs));

        match event {
            Some(HeartbeatEvent::SendHeartbeat) => {
                if let Err(e) = self.send_frame(FrameKind::Heartbeat, &[]) {
                    self.teardown(CloseReason::TransportClosed(Some(e.to_string())));
                }
            }
            Some(HeartbeatEvent::Timeout) => self.teardown(CloseReason::LivenessLost),
            None => {}
        }
    }

    /// Releases every session resource and enters `Closed`.
    fn teardown(&mut self, reason: CloseReason) {
        if !self.status.is_active() {
            return;
        }

        if reason.is_error() {
            log::warn!("session closed: {reason}");
        } else {
            log::info!("session closed: {reason}");
        }

        if let Some(mut transport) = self.transport.take() {
            transport.disconnect();
        }
        self.session = None;

        let failed = self
            .dispatcher
            .fail_all(RequestError::ConnectionClosed(reason.clone()));
        if failed > 0 {
            log::debug!("failed {failed} pending requests");
        }

        self.last_close_reason = Some(reason.clone());
        self.set_status(NetworkStatus::Closed);
        for observer in &mut self.close_observers {
            observer(&reason);
        }
    }

    fn set_status(&mut self, next: NetworkStatus) {
        if self.status == next {
            return;
        }
        if !self.status.can_transition_to(next) {
            log::error!("refusing status change {} -> {next}", self.status);
            return;
        }

        log::debug!("status {} -> {next}", self.status);
        self.status = next;
        for observer in &mut self.status_observers {
            observer(next);
        }
    }
}

/// Reads `{"reason": "..."}` from a kick body; absent or unparsable gives `None`.
fn kick_reason(body: &[u8]) -> Option<String> {
    if body.is_empty() {
        return None;
    }
    serde_json::from_slice::<Value>(body)
        .ok()?
        .get("reason")
        .and_then(Value::as_str)
        .map(str::to_owned)
}
