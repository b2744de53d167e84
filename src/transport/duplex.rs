//! # Duplex Socket Transport
//!
//! Persistent WebSocket link. Records go out as UTF-8 text frames, one per
//! record. Frames pushed by the collector are logged and otherwise ignored.
//! Liveness is checked with a protocol-level Ping that must be answered by
//! a Pong within the probe timeout.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::{TransportKind, TransportSession};
use crate::error::{Result, UplinkError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport to `ws(s)://host:port/path`
pub struct DuplexSocketTransport {
    url: String,
    connect_timeout: Duration,
    send_timeout: Duration,
    probe_timeout: Duration,
    sink: Option<SplitSink<WsStream, Message>>,
    reader: Option<JoinHandle<()>>,
    /// Cleared by the reader task when the collector goes away
    connected: Arc<AtomicBool>,
    /// Bumped by the reader task for every Pong received
    pongs: Option<watch::Receiver<u64>>,
}

impl std::fmt::Debug for DuplexSocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuplexSocketTransport")
            .field("url", &self.url)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl DuplexSocketTransport {
    pub fn new(
        url: impl Into<String>,
        connect_timeout: Duration,
        send_timeout: Duration,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            url: url.into(),
            connect_timeout,
            send_timeout,
            probe_timeout,
            sink: None,
            reader: None,
            connected: Arc::new(AtomicBool::new(false)),
            pongs: None,
        }
    }

    /// Endpoint this transport dials
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn write_frame(&mut self, message: Message) -> Result<()> {
        if !self.is_connected() {
            return Err(UplinkError::TransportSend("not connected".to_string()));
        }
        let sink = self
            .sink
            .as_mut()
            .ok_or_else(|| UplinkError::TransportSend("no open socket".to_string()))?;

        match timeout(self.send_timeout, sink.send(message)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(UplinkError::TransportSend(e.to_string())),
            Err(_) => Err(UplinkError::TransportSend(format!(
                "write timed out after {:?}",
                self.send_timeout
            ))),
        }
    }

    fn mark_down(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl TransportSession for DuplexSocketTransport {
    async fn connect(&mut self) -> Result<()> {
        self.close().await;
        debug!("Connecting to {}", self.url);

        let (stream, _response) = match timeout(self.connect_timeout, connect_async(self.url.as_str())).await {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => {
                return Err(UplinkError::TransportConnect(format!("{}: {}", self.url, e)));
            }
            Err(_) => {
                return Err(UplinkError::TransportConnect(format!(
                    "{}: timed out after {:?}",
                    self.url, self.connect_timeout
                )));
            }
        };

        let (sink, stream) = stream.split();
        let (pong_tx, pong_rx) = watch::channel(0u64);
        // Fresh flag per link so a lingering reader cannot clear a newer one
        let connected = Arc::new(AtomicBool::new(true));

        self.reader = Some(tokio::spawn(read_loop(stream, Arc::clone(&connected), pong_tx)));
        self.sink = Some(sink);
        self.pongs = Some(pong_rx);
        self.connected = connected;

        info!("WebSocket connected to {}", self.url);
        Ok(())
    }

    async fn send(&mut self, payload: &[u8]) -> bool {
        let text = match std::str::from_utf8(payload) {
            Ok(text) => text.to_owned(),
            Err(e) => {
                warn!("Refusing non UTF-8 payload ({} bytes): {}", payload.len(), e);
                return false;
            }
        };

        match self.write_frame(Message::text(text)).await {
            Ok(()) => {
                debug!("Sent text frame ({} bytes)", payload.len());
                true
            }
            Err(e) => {
                debug!("Failed to send frame: {}", e);
                self.mark_down();
                false
            }
        }
    }

    async fn probe(&mut self) -> bool {
        let Some(mut pongs) = self.pongs.clone() else {
            return false;
        };
        pongs.borrow_and_update();

        if let Err(e) = self.write_frame(Message::Ping(Bytes::new())).await {
            debug!("Ping failed: {}", e);
            self.mark_down();
            return false;
        }

        match timeout(self.probe_timeout, pongs.changed()).await {
            Ok(Ok(())) => true,
            Ok(Err(_)) => {
                debug!("Reader ended before Pong arrived");
                self.mark_down();
                false
            }
            Err(_) => {
                debug!("No Pong within {:?}", self.probe_timeout);
                self.mark_down();
                false
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&mut self) {
        self.mark_down();
        self.pongs = None;

        if let Some(mut sink) = self.sink.take() {
            let closing = async {
                sink.send(Message::Close(None)).await?;
                sink.close().await
            };
            if let Err(e) = timeout(self.send_timeout, closing).await.unwrap_or(Ok(())) {
                debug!("Close handshake failed: {}", e);
            }
        }

        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Duplex
    }
}

async fn read_loop(
    mut stream: SplitStream<WsStream>,
    connected: Arc<AtomicBool>,
    pongs: watch::Sender<u64>,
) {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => debug!("Collector says: {}", text.as_str()),
            Ok(Message::Binary(data)) => debug!("Collector sent {} binary bytes", data.len()),
            Ok(Message::Pong(_)) => pongs.send_modify(|count| *count += 1),
            Ok(Message::Close(frame)) => {
                info!("Collector closed the WebSocket: {:?}", frame);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("WebSocket read error: {}", e);
                break;
            }
        }
    }
    connected.store(false, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    const SHORT: Duration = Duration::from_millis(500);

    fn transport_for(url: String) -> DuplexSocketTransport {
        DuplexSocketTransport::new(url, SHORT, SHORT, SHORT)
    }

    /// Accepts one WebSocket client and forwards its text frames
    async fn spawn_collector() -> (String, mpsc::UnboundedReceiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/ws", listener.local_addr().unwrap());
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();
            while let Some(Ok(frame)) = ws.next().await {
                if let Message::Text(text) = frame {
                    let _ = tx.send(text.as_str().to_string());
                }
            }
        });

        (url, rx)
    }

    async fn refused_url() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("ws://{}/ws", addr)
    }

    #[tokio::test]
    async fn test_connect_and_send_text_frames_in_order() {
        let (url, mut frames) = spawn_collector().await;
        let mut transport = transport_for(url);

        transport.connect().await.unwrap();
        assert!(transport.is_connected());

        assert!(transport.send(br#"{"n":1}"#).await);
        assert!(transport.send(br#"{"n":2}"#).await);

        assert_eq!(frames.recv().await.unwrap(), r#"{"n":1}"#);
        assert_eq!(frames.recv().await.unwrap(), r#"{"n":2}"#);

        transport.close().await;
    }

    #[tokio::test]
    async fn test_probe_answered_by_pong() {
        let (url, _frames) = spawn_collector().await;
        let mut transport = transport_for(url);
        transport.connect().await.unwrap();

        assert!(transport.probe().await);
        assert!(transport.probe().await, "Each probe needs its own Pong");
        assert!(transport.is_connected());
    }

    #[tokio::test]
    async fn test_probe_does_not_deliver_a_record() {
        let (url, mut frames) = spawn_collector().await;
        let mut transport = transport_for(url);
        transport.connect().await.unwrap();

        assert!(transport.probe().await);
        assert!(transport.send(b"{}").await);
        assert_eq!(frames.recv().await.unwrap(), "{}");
    }

    #[tokio::test]
    async fn test_connect_refused_reports_error() {
        let mut transport = transport_for(refused_url().await);
        let result = transport.connect().await;

        assert!(matches!(result, Err(UplinkError::TransportConnect(_))));
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_send_without_connection_returns_false() {
        let mut transport = transport_for(refused_url().await);
        assert!(!transport.send(b"{}").await);
        assert!(!transport.probe().await);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (url, _frames) = spawn_collector().await;
        let mut transport = transport_for(url);
        transport.connect().await.unwrap();

        transport.close().await;
        transport.close().await;
        assert!(!transport.is_connected());
        assert!(!transport.send(b"{}").await);
    }

    #[tokio::test]
    async fn test_remote_close_clears_connected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/ws", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();
            let _ = ws.close(None).await;
        });

        let mut transport = transport_for(url);
        transport.connect().await.unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while transport.is_connected() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!transport.is_connected());
    }

    #[test]
    fn test_kind_and_url() {
        let transport = transport_for("ws://10.0.0.1:8080/ws".to_string());
        assert_eq!(transport.kind(), TransportKind::Duplex);
        assert_eq!(transport.url(), "ws://10.0.0.1:8080/ws");
        assert!(!transport.is_connected());
    }
}
