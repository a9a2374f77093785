//! Asynchronous TLS stream over a tokio `AsyncRead + AsyncWrite` transport.

use std::sync::Arc;
use std::task::Poll;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::TlsConfig;
use crate::connection::ClientConnection;
use crate::session::SessionRegistry;
use crate::{AsyncTlsConnection, CipherSuite, TlsError, TlsVersion};

/// An asynchronous TLS client stream.
pub struct AsyncTlsStream<S: AsyncRead + AsyncWrite + Unpin> {
    stream: S,
    conn: ClientConnection,
}

impl<S: AsyncRead + AsyncWrite + Unpin> AsyncTlsStream<S> {
    pub fn new(
        stream: S,
        config: Arc<TlsConfig>,
        registry: &SessionRegistry,
        server_name: &str,
    ) -> Result<Self, TlsError> {
        Ok(Self {
            stream,
            conn: ClientConnection::new(config, registry, server_name)?,
        })
    }

    pub fn connection(&self) -> &ClientConnection {
        &self.conn
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    async fn flush_tls(&mut self) -> Result<(), TlsError> {
        flush_tls_body!(is_async, self)
    }

    async fn read_tls(&mut self) -> Result<usize, TlsError> {
        read_tls_body!(is_async, self)
    }

    async fn drive_handshake(&mut self) -> Result<(), TlsError> {
        drive_handshake_body!(is_async, self)
    }

    /// Yield to the executor once so other tasks (another connection of the
    /// same session, a validation worker's reporter) can make progress.
    async fn wait(&mut self) {
        let mut yielded = false;
        std::future::poll_fn(|cx| {
            if yielded {
                Poll::Ready(())
            } else {
                yielded = true;
                cx.waker().wake_by_ref();
                Poll::Pending
            }
        })
        .await
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> AsyncTlsConnection for AsyncTlsStream<S> {
    async fn handshake(&mut self) -> Result<(), TlsError> {
        self.drive_handshake().await
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TlsError> {
        tls_read_body!(is_async, self, buf)
    }

    async fn write(&mut self, buf: &[u8]) -> Result<usize, TlsError> {
        tls_write_body!(is_async, self, buf)
    }

    async fn shutdown(&mut self) -> Result<(), TlsError> {
        tls_shutdown_body!(is_async, self)
    }

    fn version(&self) -> Option<TlsVersion> {
        self.conn.version()
    }

    fn cipher_suite(&self) -> Option<CipherSuite> {
        self.conn.cipher_suite()
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> std::fmt::Debug for AsyncTlsStream<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncTlsStream")
            .field("conn", &self.conn)
            .finish_non_exhaustive()
    }
}
