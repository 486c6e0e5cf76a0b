//! Gateway connection abstraction and its byte-stream implementation.
//!
//! The dispatcher only needs four operations from a gateway connection:
//! write a frame, wait (bounded) for the connection to become readable,
//! read one error frame, and close. Anything that speaks bytes can back it.

use crate::error::{CourierError, CourierResult};
use crate::protocol::ERROR_FRAME_LEN;
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

/// Default sandbox gateway address.
pub const SANDBOX_GATEWAY: &str = "gateway.sandbox.push.apple.com:2195";

/// Default production gateway address.
pub const PRODUCTION_GATEWAY: &str = "gateway.push.apple.com:2195";

/// An open connection to the push gateway.
#[async_trait]
pub trait GatewayConnection: Send {
    /// Write one encoded frame.
    async fn write(&mut self, frame: &[u8]) -> CourierResult<()>;

    /// Wait up to `timeout` for the gateway to have something to say.
    ///
    /// Returns `false` when nothing arrived in time. A closed connection
    /// counts as readable.
    async fn poll_readable(&mut self, timeout: Duration) -> CourierResult<bool>;

    /// Read the raw bytes of one error frame.
    ///
    /// Returns `None` when the gateway closed the connection without sending
    /// anything. The bytes are not validated here.
    async fn read_error_frame(&mut self) -> CourierResult<Option<Vec<u8>>>;

    /// Close the connection.
    async fn close(&mut self) -> CourierResult<()> {
        Ok(())
    }
}

/// Opens gateway connections for a (credential, environment) pair.
#[async_trait]
pub trait GatewayConnector: Send + Sync {
    async fn open(&self, credential: &str, sandbox: bool)
        -> CourierResult<Box<dyn GatewayConnection>>;
}

/// Gateway connection over any async byte stream.
pub struct StreamConnection<S> {
    stream: S,
    read_buf: Vec<u8>,
    eof: bool,
    read_timeout: Duration,
}

impl<S> StreamConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap a stream. `read_timeout` bounds the wait for the rest of a
    /// partially received error frame.
    pub fn new(stream: S, read_timeout: Duration) -> Self {
        Self {
            stream,
            read_buf: Vec::with_capacity(ERROR_FRAME_LEN),
            eof: false,
            read_timeout,
        }
    }

    /// Read one chunk from the stream into the buffer.
    async fn fill(&mut self) -> CourierResult<usize> {
        let mut chunk = [0u8; 256];
        let n = self.stream.read(&mut chunk).await.map_err(|e| {
            CourierError::Connection(format!("Failed to read from gateway: {}", e))
        })?;

        if n == 0 {
            self.eof = true;
        } else {
            self.read_buf.extend_from_slice(&chunk[..n]);
        }
        Ok(n)
    }
}

#[async_trait]
impl<S> GatewayConnection for StreamConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn write(&mut self, frame: &[u8]) -> CourierResult<()> {
        self.stream.write_all(frame).await.map_err(|e| {
            CourierError::Connection(format!("Failed to write to gateway: {}", e))
        })?;
        self.stream.flush().await.map_err(|e| {
            CourierError::Connection(format!("Failed to flush gateway stream: {}", e))
        })
    }

    async fn poll_readable(&mut self, wait: Duration) -> CourierResult<bool> {
        if !self.read_buf.is_empty() || self.eof {
            return Ok(true);
        }

        match timeout(wait, self.fill()).await {
            Ok(result) => {
                result?;
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    async fn read_error_frame(&mut self) -> CourierResult<Option<Vec<u8>>> {
        loop {
            if self.read_buf.len() >= ERROR_FRAME_LEN {
                return Ok(Some(self.read_buf.drain(..ERROR_FRAME_LEN).collect()));
            }

            if self.eof {
                if self.read_buf.is_empty() {
                    return Ok(None);
                }
                // Truncated frame; the decoder reports it
                return Ok(Some(std::mem::take(&mut self.read_buf)));
            }

            let read_timeout = self.read_timeout;
            match timeout(read_timeout, self.fill()).await {
                Ok(result) => {
                    result?;
                }
                Err(_) if !self.read_buf.is_empty() => {
                    return Ok(Some(std::mem::take(&mut self.read_buf)));
                }
                Err(_) => {
                    return Err(CourierError::Connection(format!(
                        "No error frame received within {}ms",
                        read_timeout.as_millis()
                    )));
                }
            }
        }
    }

    async fn close(&mut self) -> CourierResult<()> {
        // The peer may already have hung up after an error frame
        let _ = self.stream.shutdown().await;
        Ok(())
    }
}

/// Connects to the sandbox or production gateway over TCP.
///
/// TLS is terminated by a local relay holding the application's
/// certificate; this connector only checks that a credential was selected.
#[derive(Debug, Clone)]
pub struct TcpGatewayConnector {
    pub sandbox_addr: String,
    pub production_addr: String,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl TcpGatewayConnector {
    pub fn new(sandbox_addr: &str, production_addr: &str) -> Self {
        Self {
            sandbox_addr: sandbox_addr.to_string(),
            production_addr: production_addr.to_string(),
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(1),
        }
    }

    /// Address used for the given environment.
    pub fn address(&self, sandbox: bool) -> &str {
        if sandbox {
            &self.sandbox_addr
        } else {
            &self.production_addr
        }
    }
}

impl Default for TcpGatewayConnector {
    fn default() -> Self {
        Self::new(SANDBOX_GATEWAY, PRODUCTION_GATEWAY)
    }
}

#[async_trait]
impl GatewayConnector for TcpGatewayConnector {
    async fn open(
        &self,
        credential: &str,
        sandbox: bool,
    ) -> CourierResult<Box<dyn GatewayConnection>> {
        if credential.trim().is_empty() {
            return Err(CourierError::Config(
                "No credential for the selected environment".to_string(),
            ));
        }

        let addr = self.address(sandbox);
        let stream = timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                CourierError::Connection(format!(
                    "Timed out connecting to gateway at {} after {}ms",
                    addr,
                    self.connect_timeout.as_millis()
                ))
            })?
            .map_err(|e| {
                CourierError::Connection(format!("Failed to connect to gateway at {}: {}", addr, e))
            })?;
        stream.set_nodelay(true)?;

        debug!(addr = %addr, sandbox, "Connected to gateway");

        Ok(Box::new(StreamConnection::new(stream, self.read_timeout)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ErrorFrame, GatewayStatus};
    use tokio::io::duplex;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_write_reaches_peer() {
        let (client, mut server) = duplex(1024);
        let mut conn = StreamConnection::new(client, Duration::from_millis(100));

        conn.write(&[1, 2, 3]).await.unwrap();

        let mut buf = [0u8; 3];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [1, 2, 3]);
    }

    #[tokio::test]
    async fn test_silence_is_not_readable() {
        let (client, _server) = duplex(1024);
        let mut conn = StreamConnection::new(client, Duration::from_millis(100));

        let start = std::time::Instant::now();
        let readable = conn.poll_readable(Duration::from_millis(50)).await.unwrap();

        assert!(!readable);
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_error_frame_is_read() {
        let (client, mut server) = duplex(1024);
        let mut conn = StreamConnection::new(client, Duration::from_millis(100));

        let frame = ErrorFrame::new(GatewayStatus::InvalidToken, 3).encode();
        server.write_all(&frame).await.unwrap();

        assert!(conn.poll_readable(Duration::from_secs(1)).await.unwrap());
        let raw = conn.read_error_frame().await.unwrap().unwrap();
        assert_eq!(raw, frame);
    }

    #[tokio::test]
    async fn test_error_frame_split_across_reads() {
        let (client, mut server) = duplex(1024);
        let mut conn = StreamConnection::new(client, Duration::from_secs(1));

        let frame = ErrorFrame::new(GatewayStatus::ShutdownImminent, 9).encode();
        server.write_all(&frame[..2]).await.unwrap();

        assert!(conn.poll_readable(Duration::from_secs(1)).await.unwrap());

        let rest = frame[2..].to_vec();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            server.write_all(&rest).await.unwrap();
            // Keep the peer open until the reader is done
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        let raw = conn.read_error_frame().await.unwrap().unwrap();
        assert_eq!(raw, frame);
    }

    #[tokio::test]
    async fn test_closed_connection_is_readable_and_empty() {
        let (client, server) = duplex(1024);
        let mut conn = StreamConnection::new(client, Duration::from_millis(100));
        drop(server);

        assert!(conn.poll_readable(Duration::from_secs(1)).await.unwrap());
        assert!(conn.read_error_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_truncated_frame_is_returned_as_is() {
        let (client, mut server) = duplex(1024);
        let mut conn = StreamConnection::new(client, Duration::from_millis(100));

        server.write_all(&[8, 8, 0]).await.unwrap();
        drop(server);

        assert!(conn.poll_readable(Duration::from_secs(1)).await.unwrap());
        let raw = conn.read_error_frame().await.unwrap().unwrap();
        assert_eq!(raw, vec![8, 8, 0]);
        assert!(ErrorFrame::decode(&raw).is_err());
    }

    #[tokio::test]
    async fn test_tcp_connector_selects_environment() {
        let sandbox = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let sandbox_addr = sandbox.local_addr().unwrap().to_string();

        let connector = TcpGatewayConnector::new(&sandbox_addr, "127.0.0.1:1");
        assert_eq!(connector.address(true), sandbox_addr);
        assert_eq!(connector.address(false), "127.0.0.1:1");

        let accept = tokio::spawn(async move {
            let (mut stream, _) = sandbox.accept().await.unwrap();
            let mut buf = [0u8; 4];
            stream.read_exact(&mut buf).await.unwrap();
            buf
        });

        let mut conn = connector.open("dev-cert", true).await.unwrap();
        conn.write(&[9, 8, 7, 6]).await.unwrap();

        assert_eq!(accept.await.unwrap(), [9, 8, 7, 6]);
    }

    #[tokio::test]
    async fn test_tcp_connector_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let connector = TcpGatewayConnector::new(&addr, &addr);
        let result = connector.open("prod-cert", false).await;
        assert!(matches!(result, Err(CourierError::Connection(_))));
    }

    #[tokio::test]
    async fn test_tcp_connector_requires_credential() {
        let connector = TcpGatewayConnector::default();
        let result = connector.open("", true).await;
        assert!(matches!(result, Err(CourierError::Config(_))));
    }
}
