use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::runtime::Handle;

use pinus_protocol::{FrameCodec, FrameLimits};

use super::{ChannelBridge, IoChannels, IoCommand, Transport, TransportError, TransportEvent, TransportKind};
use crate::config::TransportSettings;

const READ_CHUNK: usize = 8 * 1024;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TcpParameter {
    pub host: String,
    pub port: u16,
}

impl TcpParameter {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Raw TCP stream. Frames are cut out of the byte stream by their length
/// header, so every `Received` event carries exactly one frame.
#[derive(Debug)]
pub struct TcpTransport {
    bridge: ChannelBridge,
}

impl TcpTransport {
    pub fn spawn(
        parameter: TcpParameter,
        settings: &TransportSettings,
        limits: FrameLimits,
        handle: &Handle,
    ) -> Self {
        let (bridge, channels) = ChannelBridge::new();
        let connect_timeout = Duration::from_millis(settings.connect_timeout_ms);
        handle.spawn(run(parameter, connect_timeout, FrameCodec::new(limits), channels));
        Self { bridge }
    }
}

impl Transport for TcpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Tcp
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

async fn run(
    parameter: TcpParameter,
    connect_timeout: Duration,
    codec: FrameCodec,
    mut channels: IoChannels,
) {
    let address = parameter.address();
    let stream = match tokio::time::timeout(connect_timeout, TcpStream::connect(&address)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            let _ = channels
                .events
                .send(TransportEvent::Closed(Some(format!("connect to {address} failed: {e}"))))
                .await;
            return;
        }
        Err(_) => {
            let _ = channels
                .events
                .send(TransportEvent::Closed(Some(format!(
                    "connect to {address} timed out after {}ms",
                    connect_timeout.as_millis()
                ))))
                .await;
            return;
        }
    };

    if let Err(e) = stream.set_nodelay(true) {
        log::debug!("tcp {address}: set_nodelay failed: {e}");
    }
    if channels.events.send(TransportEvent::Connected).await.is_err() {
        return;
    }
    log::debug!("tcp {address}: connected");

    let (mut reader, mut writer) = stream.into_split();
    let mut buffer: Vec<u8> = Vec::with_capacity(READ_CHUNK);
    let mut chunk = vec![0u8; READ_CHUNK];

    let reason = loop {
        tokio::select! {
            command = channels.commands.recv() => match command {
                Some(IoCommand::Frame(bytes)) => {
                    if let Err(e) = writer.write_all(&bytes).await {
                        break Some(format!("write failed: {e}"));
                    }
                }
                Some(IoCommand::Close) | None => {
                    let _ = writer.shutdown().await;
                    log::debug!("tcp {address}: closed locally");
                    return;
                }
            },
            read = reader.read(&mut chunk) => match read {
                Ok(0) => break Some("connection closed by peer".to_string()),
                Ok(n) => {
                    buffer.extend_from_slice(&chunk[..n]);
                    if !forward_frames(&codec, &mut buffer, &channels).await {
                        break None;
                    }
                }
                Err(e) => break Some(format!("read failed: {e}")),
            },
        }
    };

    let _ = channels.events.send(TransportEvent::Closed(reason)).await;
}

/// Sends every complete frame in `buffer` and keeps the incomplete tail.
///
/// A header that cannot be valid means the stream lost sync. The remaining
/// bytes are forwarded as-is so the session can classify the corruption, and
/// reading stops. Returns `false` when the task should end.
async fn forward_frames(codec: &FrameCodec, buffer: &mut Vec<u8>, channels: &IoChannels) -> bool {
    loop {
        match codec.peek_frame_len(buffer) {
            Ok(Some(len)) => {
                let frame: Vec<u8> = buffer.drain(..len).collect();
                if channels.events.send(TransportEvent::Received(frame)).await.is_err() {
                    return false;
                }
            }
            Ok(None) => return true,
            Err(e) => {
                log::warn!("tcp stream lost frame sync: {e}");
                let garbage = std::mem::take(buffer);
                let _ = channels.events.send(TransportEvent::Received(garbage)).await;
                return false;
            }
        }
    }
}
