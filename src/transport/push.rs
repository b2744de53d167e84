//! # Push Socket Transport
//!
//! One-way TCP push to `tcp://host:port`.
//!
//! Records are written as newline-terminated UTF-8 JSON, one per line, and
//! the collector never answers them. Before the link is declared usable the
//! collector must acknowledge a probe on a separate short-lived connection:
//! the client writes [`PROBE_REQUEST`] and expects any non-empty line back
//! within the probe timeout. The periodic liveness check repeats the same
//! exchange.

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::{TransportKind, TransportSession};
use crate::error::{Result, UplinkError};

/// Probe line sent on the short-lived check connection
pub const PROBE_REQUEST: &[u8] = b"PING\n";

/// Record terminator on the push link
const RECORD_DELIMITER: u8 = b'\n';

/// TCP push transport
pub struct PushSocketTransport {
    /// `host:port` of the collector
    address: String,
    connect_timeout: Duration,
    send_timeout: Duration,
    probe_timeout: Duration,
    stream: Option<TcpStream>,
    connected: bool,
}

impl std::fmt::Debug for PushSocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushSocketTransport")
            .field("address", &self.address)
            .field("connected", &self.connected)
            .finish_non_exhaustive()
    }
}

impl PushSocketTransport {
    pub fn new(
        address: impl Into<String>,
        connect_timeout: Duration,
        send_timeout: Duration,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            address: address.into(),
            connect_timeout,
            send_timeout,
            probe_timeout,
            stream: None,
            connected: false,
        }
    }

    /// Collector address (`host:port`)
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Request/acknowledge exchange on a throwaway connection
    ///
    /// # Returns
    ///
    /// * `Result<String>` - The acknowledgement line, trimmed
    async fn handshake(&self) -> Result<String> {
        let exchange = async {
            let mut socket = TcpStream::connect(&self.address).await?;
            socket.write_all(PROBE_REQUEST).await?;

            let mut reader = BufReader::new(socket);
            let mut reply = String::new();
            if reader.read_line(&mut reply).await? == 0 {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "closed without reply"));
            }
            Ok::<_, io::Error>(reply.trim().to_string())
        };

        match timeout(self.probe_timeout, exchange).await {
            Ok(Ok(reply)) if !reply.is_empty() => Ok(reply),
            Ok(Ok(_)) => Err(UplinkError::TransportConnect(format!(
                "{}: empty probe acknowledgement",
                self.address
            ))),
            Ok(Err(e)) => Err(UplinkError::TransportConnect(format!("{}: {}", self.address, e))),
            Err(_) => Err(UplinkError::TransportConnect(format!(
                "{}: probe not acknowledged within {:?}",
                self.address, self.probe_timeout
            ))),
        }
    }

    async fn open_stream(&self) -> Result<TcpStream> {
        let stream = match timeout(self.connect_timeout, TcpStream::connect(&self.address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(UplinkError::TransportConnect(format!("{}: {}", self.address, e)));
            }
            Err(_) => {
                return Err(UplinkError::TransportConnect(format!(
                    "{}: timed out after {:?}",
                    self.address, self.connect_timeout
                )));
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not disable Nagle on {}: {}", self.address, e);
        }
        Ok(stream)
    }

    async fn write_record(&mut self, payload: &[u8]) -> Result<()> {
        if !self.connected {
            return Err(UplinkError::TransportSend("not connected".to_string()));
        }
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| UplinkError::TransportSend("no open socket".to_string()))?;

        // One write per record so a failure never leaves half a line queued
        // behind a complete one
        let mut frame = BytesMut::with_capacity(payload.len() + 1);
        frame.put_slice(payload);
        frame.put_u8(RECORD_DELIMITER);

        let write = async {
            stream.write_all(&frame).await?;
            stream.flush().await
        };

        match timeout(self.send_timeout, write).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(UplinkError::TransportSend(e.to_string())),
            Err(_) => Err(UplinkError::TransportSend(format!(
                "write timed out after {:?}",
                self.send_timeout
            ))),
        }
    }

    /// Non-blocking check that the collector has not hung up the data link
    fn stream_open(&self) -> bool {
        let Some(stream) = self.stream.as_ref() else {
            return false;
        };
        let mut scratch = [0u8; 256];
        match stream.try_read(&mut scratch) {
            Ok(0) => false,
            Ok(n) => {
                debug!("Ignoring {} unsolicited bytes from collector", n);
                true
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => true,
            Err(e) => {
                debug!("Push link error: {}", e);
                false
            }
        }
    }
}

#[async_trait]
impl TransportSession for PushSocketTransport {
    async fn connect(&mut self) -> Result<()> {
        self.close().await;
        debug!("Probing collector at tcp://{}", self.address);

        let ack = self.handshake().await?;
        debug!("Collector acknowledged probe: {}", ack);

        self.stream = Some(self.open_stream().await?);
        self.connected = true;
        info!("Push link connected to tcp://{}", self.address);
        Ok(())
    }

    async fn send(&mut self, payload: &[u8]) -> bool {
        match self.write_record(payload).await {
            Ok(()) => {
                debug!("Pushed record ({} bytes)", payload.len());
                true
            }
            Err(e) => {
                debug!("Failed to push record: {}", e);
                self.connected = false;
                false
            }
        }
    }

    async fn probe(&mut self) -> bool {
        if !self.connected || !self.stream_open() {
            self.connected = false;
            return false;
        }

        match self.handshake().await {
            Ok(_) => true,
            Err(e) => {
                warn!("Liveness probe failed: {}", e);
                self.connected = false;
                false
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn close(&mut self) {
        self.connected = false;
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                debug!("Shutdown of push link failed: {}", e);
            }
        }
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Push
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    const SHORT: Duration = Duration::from_millis(300);

    fn transport_for(address: String) -> PushSocketTransport {
        PushSocketTransport::new(address, SHORT, SHORT, SHORT)
    }

    /// Collector that answers probes with `PONG` and forwards record lines
    async fn spawn_collector() -> (String, mpsc::UnboundedReceiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else { break };
                let tx = tx.clone();
                tokio::spawn(async move {
                    let (read, mut write) = socket.into_split();
                    let mut lines = BufReader::new(read).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        if line == "PING" {
                            let _ = write.write_all(b"PONG\n").await;
                        } else {
                            let _ = tx.send(line);
                        }
                    }
                });
            }
        });

        (address, rx)
    }

    #[tokio::test]
    async fn test_connect_after_acknowledged_probe() {
        let (address, _records) = spawn_collector().await;
        let mut transport = transport_for(address);

        transport.connect().await.unwrap();
        assert!(transport.is_connected());
    }

    #[tokio::test]
    async fn test_records_arrive_as_lines_in_order() {
        let (address, mut records) = spawn_collector().await;
        let mut transport = transport_for(address);
        transport.connect().await.unwrap();

        for n in 1..=3 {
            assert!(transport.send(format!(r#"{{"n":{}}}"#, n).as_bytes()).await);
        }

        assert_eq!(records.recv().await.unwrap(), r#"{"n":1}"#);
        assert_eq!(records.recv().await.unwrap(), r#"{"n":2}"#);
        assert_eq!(records.recv().await.unwrap(), r#"{"n":3}"#);
    }

    #[tokio::test]
    async fn test_probe_succeeds_against_live_collector() {
        let (address, mut records) = spawn_collector().await;
        let mut transport = transport_for(address);
        transport.connect().await.unwrap();

        assert!(transport.probe().await);
        assert!(transport.is_connected());
        assert!(records.try_recv().is_err(), "Probe must not be delivered as a record");
    }

    #[tokio::test]
    async fn test_silent_collector_is_not_connected() {
        // Accepts connections but never acknowledges the probe
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let mut transport = transport_for(address);
        let result = transport.connect().await;

        match result {
            Err(UplinkError::TransportConnect(msg)) => assert!(msg.contains("not acknowledged")),
            other => panic!("Expected TransportConnect, got: {:?}", other),
        }
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_connect_refused_reports_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let mut transport = transport_for(address);
        assert!(matches!(
            transport.connect().await,
            Err(UplinkError::TransportConnect(_))
        ));
        assert!(!transport.send(b"{}").await);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (address, _records) = spawn_collector().await;
        let mut transport = transport_for(address);
        transport.connect().await.unwrap();

        transport.close().await;
        transport.close().await;
        assert!(!transport.is_connected());
        assert!(!transport.probe().await);
    }

    #[test]
    fn test_probe_request_is_one_line() {
        assert_eq!(PROBE_REQUEST, b"PING\n");
        assert_eq!(RECORD_DELIMITER, b'\n');
    }

    #[test]
    fn test_kind_and_address() {
        let transport = transport_for("192.168.139.222:5555".to_string());
        assert_eq!(transport.kind(), TransportKind::Push);
        assert_eq!(transport.address(), "192.168.139.222:5555");
    }
}
