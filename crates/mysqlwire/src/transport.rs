//! Byte-stream transports.
//!
//! The channel talks to the server through [`Transport`] (blocking) or
//! [`AsyncTransport`] (asupersync). Both expose partial reads, full writes
//! and an in-place TLS upgrade of the same socket.

// `impl Future` return types in trait methods keep the futures `Send`
#![allow(clippy::manual_async_fn)]

use std::future::Future;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};

use asupersync::io::{AsyncRead, AsyncWrite, ReadBuf};
use mysqlwire_core::error::{TransportError, TransportErrorKind};
use mysqlwire_core::{Error, Result};

use crate::config::MySqlConfig;
use crate::tls::tls_error;

#[cfg(feature = "tls")]
use crate::tls::TlsStream;

/// A blocking byte stream.
pub trait Transport {
    /// Read at least one byte into `buf`. `Ok(0)` means the peer closed.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    fn write_all(&mut self, buf: &[u8]) -> Result<()>;

    fn flush(&mut self) -> Result<()>;

    /// Whether bytes on this stream are encrypted.
    fn is_secure(&self) -> bool;

    /// Replace the plain stream with a TLS session over the same socket.
    fn upgrade_tls(&mut self, config: &MySqlConfig) -> Result<()>;
}

/// A non-blocking byte stream driven by the asupersync runtime.
pub trait AsyncTransport: Send {
    fn read(&mut self, buf: &mut [u8]) -> impl Future<Output = Result<usize>> + Send;

    fn write_all(&mut self, buf: &[u8]) -> impl Future<Output = Result<()>> + Send;

    fn flush(&mut self) -> impl Future<Output = Result<()>> + Send;

    fn is_secure(&self) -> bool;

    fn upgrade_tls(&mut self, config: &MySqlConfig) -> impl Future<Output = Result<()>> + Send;
}

pub(crate) fn transport_error(
    kind: TransportErrorKind,
    message: impl Into<String>,
    source: Option<std::io::Error>,
) -> Error {
    Error::Transport(TransportError {
        kind,
        message: message.into(),
        source: source.map(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>),
    })
}

/// Wrap an I/O failure with what the channel was doing.
pub(crate) fn io_error(context: &str, err: std::io::Error) -> Error {
    let kind = match err.kind() {
        std::io::ErrorKind::ConnectionRefused => TransportErrorKind::Refused,
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
            TransportErrorKind::Timeout
        }
        _ => TransportErrorKind::Disconnected,
    };
    transport_error(kind, format!("{context}: {err}"), Some(err))
}

fn closed_error() -> Error {
    transport_error(TransportErrorKind::Disconnected, "connection closed", None)
}

fn connect_error(config: &MySqlConfig, err: std::io::Error) -> Error {
    let kind = match err.kind() {
        std::io::ErrorKind::ConnectionRefused => TransportErrorKind::Refused,
        std::io::ErrorKind::TimedOut => TransportErrorKind::Timeout,
        _ => TransportErrorKind::Connect,
    };
    transport_error(
        kind,
        format!("failed to connect to {}: {err}", config.socket_addr()),
        Some(err),
    )
}

/// Resolve the configured host. Hostnames go through the system resolver.
fn resolve(config: &MySqlConfig) -> Result<Vec<SocketAddr>> {
    let addrs: Vec<SocketAddr> = (config.host.as_str(), config.port)
        .to_socket_addrs()
        .map_err(|e| {
            transport_error(
                TransportErrorKind::Connect,
                format!("failed to resolve {}: {e}", config.socket_addr()),
                Some(e),
            )
        })?
        .collect();
    if addrs.is_empty() {
        return Err(transport_error(
            TransportErrorKind::Connect,
            format!("no addresses for {}", config.socket_addr()),
            None,
        ));
    }
    Ok(addrs)
}

/// Blocking TCP stream, optionally upgraded to TLS.
#[derive(Debug)]
pub enum MySqlStream {
    Plain(TcpStream),
    #[cfg(feature = "tls")]
    Tls(Box<TlsStream<TcpStream>>),
    Closed,
}

impl MySqlStream {
    /// Open a TCP connection, trying each resolved address in turn.
    pub fn connect(config: &MySqlConfig) -> Result<Self> {
        let mut last_err = None;
        for addr in resolve(config)? {
            match TcpStream::connect_timeout(&addr, config.connect_timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true).ok();
                    tracing::debug!(%addr, "TCP connected");
                    return Ok(MySqlStream::Plain(stream));
                }
                Err(e) => {
                    tracing::debug!(%addr, error = %e, "TCP connect failed");
                    last_err = Some(e);
                }
            }
        }
        Err(match last_err {
            Some(e) => connect_error(config, e),
            None => closed_error(),
        })
    }
}

impl Transport for MySqlStream {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self {
            MySqlStream::Plain(s) => s.read(buf).map_err(|e| io_error("read failed", e)),
            #[cfg(feature = "tls")]
            MySqlStream::Tls(s) => s.read(buf).map_err(|e| io_error("TLS read failed", e)),
            MySqlStream::Closed => Err(closed_error()),
        }
    }

    fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        match self {
            MySqlStream::Plain(s) => s.write_all(buf).map_err(|e| io_error("write failed", e)),
            #[cfg(feature = "tls")]
            MySqlStream::Tls(s) => s
                .write_all(buf)
                .map_err(|e| io_error("TLS write failed", e)),
            MySqlStream::Closed => Err(closed_error()),
        }
    }

    fn flush(&mut self) -> Result<()> {
        match self {
            MySqlStream::Plain(s) => s.flush().map_err(|e| io_error("flush failed", e)),
            #[cfg(feature = "tls")]
            MySqlStream::Tls(s) => s.flush().map_err(|e| io_error("TLS flush failed", e)),
            MySqlStream::Closed => Err(closed_error()),
        }
    }

    fn is_secure(&self) -> bool {
        #[cfg(feature = "tls")]
        {
            matches!(self, MySqlStream::Tls(_))
        }
        #[cfg(not(feature = "tls"))]
        {
            false
        }
    }

    #[cfg(feature = "tls")]
    fn upgrade_tls(&mut self, config: &MySqlConfig) -> Result<()> {
        let plain = match std::mem::replace(self, MySqlStream::Closed) {
            MySqlStream::Plain(s) => s,
            other => {
                *self = other;
                return Err(tls_error("TLS upgrade requires a plain TCP stream"));
            }
        };
        let tls = TlsStream::new(plain, &config.tls, &config.host, config.ssl_mode)?;
        *self = MySqlStream::Tls(Box::new(tls));
        Ok(())
    }

    #[cfg(not(feature = "tls"))]
    fn upgrade_tls(&mut self, _config: &MySqlConfig) -> Result<()> {
        Err(tls_error(
            "TLS requested but mysqlwire was built without the 'tls' feature",
        ))
    }
}

/// Async TCP stream, optionally upgraded to TLS.
pub enum AsyncMySqlStream {
    Plain(asupersync::net::TcpStream),
    #[cfg(feature = "tls")]
    Tls(Box<AsyncTlsStream>),
    Closed,
}

impl std::fmt::Debug for AsyncMySqlStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AsyncMySqlStream::Plain(_) => "Plain",
            #[cfg(feature = "tls")]
            AsyncMySqlStream::Tls(_) => "Tls",
            AsyncMySqlStream::Closed => "Closed",
        };
        f.debug_tuple("AsyncMySqlStream").field(&name).finish()
    }
}

impl AsyncMySqlStream {
    /// Open a TCP connection, trying each resolved address in turn.
    ///
    /// Name resolution itself is blocking.
    pub async fn connect(config: &MySqlConfig) -> Result<Self> {
        let mut last_err = None;
        for addr in resolve(config)? {
            match asupersync::net::TcpStream::connect_timeout(addr, config.connect_timeout).await {
                Ok(stream) => {
                    stream.set_nodelay(true).ok();
                    tracing::debug!(%addr, "TCP connected");
                    return Ok(AsyncMySqlStream::Plain(stream));
                }
                Err(e) => {
                    tracing::debug!(%addr, error = %e, "TCP connect failed");
                    last_err = Some(e);
                }
            }
        }
        Err(match last_err {
            Some(e) => connect_error(config, e),
            None => closed_error(),
        })
    }
}

impl AsyncTransport for AsyncMySqlStream {
    fn read(&mut self, buf: &mut [u8]) -> impl Future<Output = Result<usize>> + Send {
        async move {
            match self {
                AsyncMySqlStream::Plain(s) => read_some_plain_async(s, buf)
                    .await
                    .map_err(|e| io_error("read failed", e)),
                #[cfg(feature = "tls")]
                AsyncMySqlStream::Tls(s) => s
                    .read_plain(buf)
                    .await
                    .map_err(|e| io_error("TLS read failed", e)),
                AsyncMySqlStream::Closed => Err(closed_error()),
            }
        }
    }

    fn write_all(&mut self, buf: &[u8]) -> impl Future<Output = Result<()>> + Send {
        async move {
            match self {
                AsyncMySqlStream::Plain(s) => write_all_plain_async(s, buf)
                    .await
                    .map_err(|e| io_error("write failed", e)),
                #[cfg(feature = "tls")]
                AsyncMySqlStream::Tls(s) => s
                    .write_all(buf)
                    .await
                    .map_err(|e| io_error("TLS write failed", e)),
                AsyncMySqlStream::Closed => Err(closed_error()),
            }
        }
    }

    fn flush(&mut self) -> impl Future<Output = Result<()>> + Send {
        async move {
            match self {
                AsyncMySqlStream::Plain(s) => flush_plain_async(s)
                    .await
                    .map_err(|e| io_error("flush failed", e)),
                #[cfg(feature = "tls")]
                AsyncMySqlStream::Tls(s) => {
                    s.flush().await.map_err(|e| io_error("TLS flush failed", e))
                }
                AsyncMySqlStream::Closed => Err(closed_error()),
            }
        }
    }

    fn is_secure(&self) -> bool {
        #[cfg(feature = "tls")]
        {
            matches!(self, AsyncMySqlStream::Tls(_))
        }
        #[cfg(not(feature = "tls"))]
        {
            false
        }
    }

    fn upgrade_tls(&mut self, config: &MySqlConfig) -> impl Future<Output = Result<()>> + Send {
        async move {
            #[cfg(feature = "tls")]
            {
                let plain = match std::mem::replace(self, AsyncMySqlStream::Closed) {
                    AsyncMySqlStream::Plain(s) => s,
                    other => {
                        *self = other;
                        return Err(tls_error("TLS upgrade requires a plain TCP stream"));
                    }
                };
                let tls = AsyncTlsStream::handshake(plain, config).await?;
                *self = AsyncMySqlStream::Tls(Box::new(tls));
                Ok(())
            }
            #[cfg(not(feature = "tls"))]
            {
                let _ = (&self, config);
                Err(tls_error(
                    "TLS requested but mysqlwire was built without the 'tls' feature",
                ))
            }
        }
    }
}

/// rustls session driven over an asupersync TCP stream.
#[cfg(feature = "tls")]
pub struct AsyncTlsStream {
    tcp: asupersync::net::TcpStream,
    tls: rustls::ClientConnection,
}

#[cfg(feature = "tls")]
impl AsyncTlsStream {
    async fn handshake(mut tcp: asupersync::net::TcpStream, config: &MySqlConfig) -> Result<Self> {
        let mut tls = crate::tls::client_connection(&config.tls, config.ssl_mode, &config.host)?;

        while tls.is_handshaking() {
            while tls.wants_write() {
                let mut out = Vec::new();
                tls.write_tls(&mut out)
                    .map_err(|e| tls_error(format!("TLS handshake write_tls error: {e}")))?;
                if !out.is_empty() {
                    write_all_plain_async(&mut tcp, &out)
                        .await
                        .map_err(|e| io_error("TLS handshake write error", e))?;
                }
            }

            if tls.wants_read() {
                let mut buf = [0u8; 8192];
                let n = read_some_plain_async(&mut tcp, &mut buf)
                    .await
                    .map_err(|e| io_error("TLS handshake read error", e))?;
                if n == 0 {
                    return Err(tls_error("connection closed during TLS handshake"));
                }
                let mut cursor = std::io::Cursor::new(&buf[..n]);
                tls.read_tls(&mut cursor)
                    .map_err(|e| tls_error(format!("TLS handshake read_tls error: {e}")))?;
                tls.process_new_packets()
                    .map_err(|e| tls_error(format!("TLS handshake error: {e}")))?;
            }
        }

        tracing::debug!(version = ?tls.protocol_version(), "TLS established");
        Ok(Self { tcp, tls })
    }

    async fn read_plain(&mut self, out: &mut [u8]) -> std::io::Result<usize> {
        loop {
            match self.tls.reader().read(out) {
                Ok(n) if n > 0 => return Ok(n),
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e),
            }

            if !self.tls.wants_read() {
                return Ok(0);
            }

            let mut enc = [0u8; 8192];
            let n = read_some_plain_async(&mut self.tcp, &mut enc).await?;
            if n == 0 {
                return Ok(0);
            }

            let mut cursor = std::io::Cursor::new(&enc[..n]);
            self.tls.read_tls(&mut cursor)?;
            self.tls
                .process_new_packets()
                .map_err(|e| std::io::Error::other(format!("TLS error: {e}")))?;
        }
    }

    async fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        let mut written = 0;
        while written < buf.len() {
            let n = self.tls.writer().write(&buf[written..])?;
            if n == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "TLS write zero",
                ));
            }
            written += n;
            self.flush().await?;
        }
        Ok(())
    }

    async fn flush(&mut self) -> std::io::Result<()> {
        self.tls.writer().flush()?;
        while self.tls.wants_write() {
            let mut out = Vec::new();
            self.tls.write_tls(&mut out)?;
            if !out.is_empty() {
                write_all_plain_async(&mut self.tcp, &out).await?;
            }
        }
        flush_plain_async(&mut self.tcp).await
    }
}

async fn read_some_plain_async(
    stream: &mut asupersync::net::TcpStream,
    buf: &mut [u8],
) -> std::io::Result<usize> {
    let mut read_buf = ReadBuf::new(buf);
    std::future::poll_fn(|cx| std::pin::Pin::new(&mut *stream).poll_read(cx, &mut read_buf))
        .await?;
    Ok(read_buf.filled().len())
}

async fn write_all_plain_async(
    stream: &mut asupersync::net::TcpStream,
    buf: &[u8],
) -> std::io::Result<()> {
    let mut written = 0;
    while written < buf.len() {
        let n = std::future::poll_fn(|cx| {
            std::pin::Pin::new(&mut *stream).poll_write(cx, &buf[written..])
        })
        .await?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "connection closed",
            ));
        }
        written += n;
    }
    Ok(())
}

async fn flush_plain_async(stream: &mut asupersync::net::TcpStream) -> std::io::Result<()> {
    std::future::poll_fn(|cx| std::pin::Pin::new(&mut *stream).poll_flush(cx)).await
}

/// A scripted in-memory server for tests.
#[cfg(test)]
pub(crate) mod mock {
    use std::collections::VecDeque;

    use super::*;
    use crate::protocol::{MAX_PACKET_SIZE, PacketHeader};

    /// Replays queued server bytes and records everything the client writes.
    #[derive(Debug, Default)]
    pub struct MockTransport {
        incoming: VecDeque<u8>,
        written: Vec<u8>,
        secure: bool,
        tls_available: bool,
        /// Upper bound on bytes returned per read, to exercise partial reads
        read_chunk: Option<usize>,
        /// Async reads on an empty queue stay pending instead of hitting EOF
        stall_when_empty: bool,
        pub tls_upgrades: usize,
        pub flushes: usize,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self {
                tls_available: true,
                ..Self::default()
            }
        }

        pub fn without_tls(mut self) -> Self {
            self.tls_available = false;
            self
        }

        /// Start out on an encrypted stream.
        pub fn secure(mut self) -> Self {
            self.secure = true;
            self
        }

        pub fn read_chunk(mut self, n: usize) -> Self {
            self.read_chunk = Some(n.max(1));
            self
        }

        /// Behave like a server that has not answered yet.
        pub fn stall_when_empty(mut self) -> Self {
            self.stall_when_empty = true;
            self
        }

        /// Queue one server message starting at sequence `seq`.
        #[allow(clippy::cast_possible_truncation)]
        pub fn push(&mut self, seq: u8, payload: &[u8]) -> &mut Self {
            let mut seq = seq;
            let mut chunks = payload.chunks(MAX_PACKET_SIZE).peekable();
            if chunks.peek().is_none() {
                self.push_frame(seq, &[]);
                return self;
            }
            let mut last_len = 0;
            for chunk in chunks {
                self.push_frame(seq, chunk);
                seq = seq.wrapping_add(1);
                last_len = chunk.len();
            }
            if last_len == MAX_PACKET_SIZE {
                self.push_frame(seq, &[]);
            }
            self
        }

        #[allow(clippy::cast_possible_truncation)]
        fn push_frame(&mut self, seq: u8, chunk: &[u8]) {
            let header = PacketHeader {
                payload_length: chunk.len() as u32,
                sequence_id: seq,
            };
            self.incoming.extend(header.to_bytes());
            self.incoming.extend(chunk);
        }

        /// Queue raw bytes, e.g. a truncated frame.
        pub fn push_raw(&mut self, bytes: &[u8]) -> &mut Self {
            self.incoming.extend(bytes);
            self
        }

        pub fn remaining(&self) -> usize {
            self.incoming.len()
        }

        pub fn written(&self) -> &[u8] {
            &self.written
        }

        /// Split everything written so far into `(sequence, payload)` frames.
        pub fn written_frames(&self) -> Vec<(u8, Vec<u8>)> {
            let mut frames = Vec::new();
            let mut rest = self.written.as_slice();
            while rest.len() >= PacketHeader::SIZE {
                let mut raw = [0u8; PacketHeader::SIZE];
                raw.copy_from_slice(&rest[..PacketHeader::SIZE]);
                let header = PacketHeader::from_bytes(&raw);
                let end = PacketHeader::SIZE + header.payload_length as usize;
                frames.push((header.sequence_id, rest[PacketHeader::SIZE..end].to_vec()));
                rest = &rest[end..];
            }
            frames
        }

        pub fn clear_written(&mut self) {
            self.written.clear();
        }

        fn read_into(&mut self, buf: &mut [u8]) -> usize {
            let limit = self.read_chunk.unwrap_or(usize::MAX);
            let n = buf.len().min(limit).min(self.incoming.len());
            for (slot, byte) in buf.iter_mut().zip(self.incoming.drain(..n)) {
                *slot = byte;
            }
            n
        }

        fn upgrade(&mut self) -> Result<()> {
            if !self.tls_available {
                return Err(tls_error("TLS not available"));
            }
            if self.secure {
                return Err(tls_error("TLS upgrade requires a plain TCP stream"));
            }
            self.secure = true;
            self.tls_upgrades += 1;
            Ok(())
        }
    }

    impl Transport for MockTransport {
        fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
            Ok(self.read_into(buf))
        }

        fn write_all(&mut self, buf: &[u8]) -> Result<()> {
            self.written.extend_from_slice(buf);
            Ok(())
        }

        fn flush(&mut self) -> Result<()> {
            self.flushes += 1;
            Ok(())
        }

        fn is_secure(&self) -> bool {
            self.secure
        }

        fn upgrade_tls(&mut self, _config: &MySqlConfig) -> Result<()> {
            self.upgrade()
        }
    }

    impl AsyncTransport for MockTransport {
        fn read(&mut self, buf: &mut [u8]) -> impl Future<Output = Result<usize>> + Send {
            let stall = self.stall_when_empty && self.incoming.is_empty();
            let n = self.read_into(buf);
            async move {
                if stall {
                    std::future::pending::<()>().await;
                }
                Ok(n)
            }
        }

        fn write_all(&mut self, buf: &[u8]) -> impl Future<Output = Result<()>> + Send {
            self.written.extend_from_slice(buf);
            async { Ok(()) }
        }

        fn flush(&mut self) -> impl Future<Output = Result<()>> + Send {
            self.flushes += 1;
            async { Ok(()) }
        }

        fn is_secure(&self) -> bool {
            self.secure
        }

        fn upgrade_tls(&mut self, _config: &MySqlConfig) -> impl Future<Output = Result<()>> + Send {
            let result = self.upgrade();
            async move { result }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockTransport;
    use super::*;

    #[test]
    fn test_io_error_kinds() {
        let err = io_error(
            "read failed",
            std::io::Error::from(std::io::ErrorKind::ConnectionReset),
        );
        match err {
            Error::Transport(e) => {
                assert_eq!(e.kind, TransportErrorKind::Disconnected);
                assert!(e.message.starts_with("read failed"));
                assert!(e.source.is_some());
            }
            other => panic!("expected transport error, got {other:?}"),
        }

        let err = io_error("read failed", std::io::Error::from(std::io::ErrorKind::TimedOut));
        assert!(matches!(
            err,
            Error::Transport(TransportError {
                kind: TransportErrorKind::Timeout,
                ..
            })
        ));
    }

    #[test]
    fn test_connect_refused() {
        // Bind then drop to get a port nothing listens on.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let config = MySqlConfig::new().host("127.0.0.1").port(port);
        match MySqlStream::connect(&config) {
            Err(Error::Transport(e)) => {
                assert!(matches!(
                    e.kind,
                    TransportErrorKind::Refused | TransportErrorKind::Connect
                ));
                assert!(e.message.contains(&config.socket_addr()));
            }
            other => panic!("expected transport error, got {other:?}"),
        }
    }

    #[test]
    fn test_closed_stream() {
        let mut stream = MySqlStream::Closed;
        assert!(Transport::read(&mut stream, &mut [0u8; 4]).is_err());
        assert!(Transport::write_all(&mut stream, b"x").is_err());
        assert!(!Transport::is_secure(&stream));
    }

    #[cfg(not(feature = "tls"))]
    #[test]
    fn test_upgrade_without_tls_feature() {
        let mut stream = MySqlStream::Closed;
        let err = stream.upgrade_tls(&MySqlConfig::new()).unwrap_err();
        assert!(matches!(
            err,
            Error::Transport(TransportError {
                kind: TransportErrorKind::Tls,
                ..
            })
        ));
    }

    #[test]
    fn test_mock_partial_reads_and_frames() {
        let mut mock = MockTransport::new().read_chunk(3);
        mock.push(0, &[0x0e]);
        let mut buf = [0u8; 16];
        assert_eq!(Transport::read(&mut mock, &mut buf).unwrap(), 3);
        assert_eq!(Transport::read(&mut mock, &mut buf).unwrap(), 2);
        assert_eq!(Transport::read(&mut mock, &mut buf).unwrap(), 0);

        Transport::write_all(&mut mock, &[0x01, 0x00, 0x00, 0x00, 0x0e]).unwrap();
        assert_eq!(mock.written_frames(), vec![(0, vec![0x0e])]);
    }

    #[test]
    fn test_mock_upgrade() {
        let config = MySqlConfig::new();
        let mut mock = MockTransport::new();
        assert!(!Transport::is_secure(&mock));
        Transport::upgrade_tls(&mut mock, &config).unwrap();
        assert!(Transport::is_secure(&mock));
        assert!(Transport::upgrade_tls(&mut mock, &config).is_err());

        let mut mock = MockTransport::new().without_tls();
        assert!(Transport::upgrade_tls(&mut mock, &config).is_err());
    }
}
