use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::runtime::Handle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use super::{ChannelBridge, IoChannels, IoCommand, Transport, TransportError, TransportEvent, TransportKind};
use crate::config::TransportSettings;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WebSocketParameter {
    /// Full endpoint, e.g. `ws://127.0.0.1:3014`.
    pub url: String,
}

impl WebSocketParameter {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

/// Binary WebSocket. Each message already holds whole frames.
#[derive(Debug)]
pub struct WebSocketTransport {
    bridge: ChannelBridge,
}

impl WebSocketTransport {
    pub fn spawn(parameter: WebSocketParameter, settings: &TransportSettings, handle: &Handle) -> Self {
        let (bridge, channels) = ChannelBridge::new();
        let connect_timeout = Duration::from_millis(settings.connect_timeout_ms);
        handle.spawn(run(parameter, connect_timeout, channels));
        Self { bridge }
    }
}

impl Transport for WebSocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::WebSocket
    }

    fn send(&mut self, bytes: Vec<u8>) -> Result<(), TransportError> {
        self.bridge.send(bytes)
    }

    fn poll(&mut self) -> Vec<TransportEvent> {
        self.bridge.poll()
    }

    fn disconnect(&mut self) {
        self.bridge.disconnect();
    }
}

async fn run(parameter: WebSocketParameter, connect_timeout: Duration, mut channels: IoChannels) {
    let url = parameter.url;
    let ws = match tokio::time::timeout(connect_timeout, connect_async(url.as_str())).await {
        Ok(Ok((ws, _response))) => ws,
        Ok(Err(e)) => {
            let _ = channels
                .events
                .send(TransportEvent::Closed(Some(format!("connect to {url} failed: {e}"))))
                .await;
            return;
        }
        Err(_) => {
            let _ = channels
                .events
                .send(TransportEvent::Closed(Some(format!(
                    "connect to {url} timed out after {}ms",
                    connect_timeout.as_millis()
                ))))
                .await;
            return;
        }
    };

    if channels.events.send(TransportEvent::Connected).await.is_err() {
        return;
    }
    log::debug!("ws {url}: connected");

    let (mut sink, mut stream) = ws.split();

    let reason = loop {
        tokio::select! {
            command = channels.commands.recv() => match command {
                Some(IoCommand::Frame(bytes)) => {
                    if let Err(e) = sink.send(Message::binary(bytes)).await {
                        break Some(format!("write failed: {e}"));
                    }
                }
                Some(IoCommand::Close) | None => {
                    let _ = sink.send(Message::Close(None)).await;
                    log::debug!("ws {url}: closed locally");
                    return;
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Binary(data))) => {
                    if channels.events.send(TransportEvent::Received(data.to_vec())).await.is_err() {
                        return;
                    }
                }
                Some(Ok(Message::Text(text))) => {
                    log::warn!("ws {url}: ignoring {}-byte text message", text.len());
                }
                Some(Ok(Message::Close(frame))) => {
                    break frame.map(|f| f.reason.as_str().to_owned()).filter(|r| !r.is_empty());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break Some(format!("read failed: {e}")),
                None => break Some("stream ended".to_string()),
            },
        }
    };

    let _ = channels.events.send(TransportEvent::Closed(reason)).await;
}
