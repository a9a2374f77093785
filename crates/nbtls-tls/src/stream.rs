//! Blocking TLS stream over any `Read + Write` transport.

use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::Duration;

use crate::config::TlsConfig;
use crate::connection::ClientConnection;
use crate::session::SessionRegistry;
use crate::{CipherSuite, TlsConnection, TlsError, TlsVersion};

/// How long to sleep while negotiation waits on a validation or on another
/// connection of the same session.
const WAIT_INTERVAL: Duration = Duration::from_millis(1);

/// A blocking TLS client stream.
///
/// The handshake runs on first use (`handshake`, `read` or `write`), and
/// again whenever the server asks to renegotiate.
pub struct TlsStream<S: Read + Write> {
    stream: S,
    conn: ClientConnection,
}

impl<S: Read + Write> TlsStream<S> {
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

    /// The underlying sans-IO connection.
    pub fn connection(&self) -> &ClientConnection {
        &self.conn
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Give up the transport. The connection is dropped without sending
    /// close_notify.
    pub fn into_inner(self) -> S {
        self.stream
    }

    fn flush_tls(&mut self) -> Result<(), TlsError> {
        flush_tls_body!(sync, self)
    }

    fn read_tls(&mut self) -> Result<usize, TlsError> {
        read_tls_body!(sync, self)
    }

    fn drive_handshake(&mut self) -> Result<(), TlsError> {
        drive_handshake_body!(sync, self)
    }

    fn wait(&mut self) {
        std::thread::sleep(WAIT_INTERVAL);
    }
}

impl<S: Read + Write> TlsConnection for TlsStream<S> {
    fn handshake(&mut self) -> Result<(), TlsError> {
        self.drive_handshake()
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TlsError> {
        tls_read_body!(sync, self, buf)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, TlsError> {
        tls_write_body!(sync, self, buf)
    }

    fn shutdown(&mut self) -> Result<(), TlsError> {
        tls_shutdown_body!(sync, self)
    }

    fn version(&self) -> Option<TlsVersion> {
        self.conn.version()
    }

    fn cipher_suite(&self) -> Option<CipherSuite> {
        self.conn.cipher_suite()
    }
}

fn to_io_error(e: TlsError) -> io::Error {
    match e {
        TlsError::IoError(e) => e,
        TlsError::ConnectionClosed => io::Error::new(io::ErrorKind::UnexpectedEof, e),
        e => io::Error::other(e),
    }
}

impl<S: Read + Write> Read for TlsStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        TlsConnection::read(self, buf).map_err(to_io_error)
    }
}

impl<S: Read + Write> Write for TlsStream<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        TlsConnection::write(self, buf).map_err(to_io_error)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl<S: Read + Write> std::fmt::Debug for TlsStream<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsStream")
            .field("conn", &self.conn)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::scripted::{config_for, Loopback, ScriptedServer, SERVER_NAME};
    use crate::handshake::signing::private_key_spki;
    use crate::testutil::server_rsa_key;
    use crate::validator::{BackgroundValidator, ValidatedCertificate};
    use crate::ErrorKind;

    fn stream_for(server: ScriptedServer, registry: &SessionRegistry) -> TlsStream<Loopback> {
        let config = Arc::new(config_for(&server.key).build());
        TlsStream::new(Loopback::new(server), config, registry, SERVER_NAME).unwrap()
    }

    #[test]
    fn test_blocking_handshake_and_echo() {
        let server = ScriptedServer::rsa(
            TlsVersion::Tls12,
            CipherSuite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
        );
        let registry = SessionRegistry::new();
        let mut tls = stream_for(server, &registry);
        assert!(tls.version().is_none());

        tls.handshake().unwrap();
        assert_eq!(tls.version(), Some(TlsVersion::Tls12));
        assert_eq!(
            tls.cipher_suite(),
            Some(CipherSuite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256)
        );
        assert!(tls.get_ref().server.client_finished_ok);
        assert!(tls.get_ref().flushes > 0);

        assert_eq!(TlsConnection::write(&mut tls, b"ping").unwrap(), 4);
        assert_eq!(tls.get_ref().server.app_data, b"ping");

        tls.get_mut().server.send_app_data(b"pong");
        let mut buf = [0u8; 16];
        let n = TlsConnection::read(&mut tls, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"pong");
    }

    #[test]
    fn test_write_runs_handshake_first() {
        let server = ScriptedServer::rsa(
            TlsVersion::Tls11,
            CipherSuite::TLS_DHE_RSA_WITH_AES_256_CBC_SHA,
        );
        let registry = SessionRegistry::new();
        let mut tls = stream_for(server, &registry);
        tls.write_all(b"GET / HTTP/1.0\r\n\r\n").unwrap();
        assert_eq!(tls.version(), Some(TlsVersion::Tls11));
        assert_eq!(tls.get_ref().server.app_data, b"GET / HTTP/1.0\r\n\r\n");
    }

    #[test]
    fn test_read_in_small_transport_chunks() {
        let server = ScriptedServer::rsa(
            TlsVersion::Tls12,
            CipherSuite::TLS_RSA_WITH_AES_128_CBC_SHA256,
        );
        let registry = SessionRegistry::new();
        let mut tls = stream_for(server, &registry);
        tls.get_mut().chunk = 7;
        tls.handshake().unwrap();

        let payload: Vec<u8> = (0..3000u32).map(|i| i as u8).collect();
        tls.get_mut().server.send_app_data(&payload);
        let mut received = Vec::new();
        let mut buf = [0u8; 512];
        while received.len() < payload.len() {
            let n = Read::read(&mut tls, &mut buf).unwrap();
            received.extend_from_slice(&buf[..n]);
        }
        assert_eq!(received, payload);
    }

    #[test]
    fn test_close_notify_ends_stream() {
        let server = ScriptedServer::rsa(
            TlsVersion::Tls12,
            CipherSuite::TLS_RSA_WITH_AES_256_GCM_SHA384,
        );
        let registry = SessionRegistry::new();
        let mut tls = stream_for(server, &registry);
        tls.handshake().unwrap();

        tls.get_mut().server.send_app_data(b"last words");
        tls.get_mut().server.send_alert(1, 0);
        let mut out = Vec::new();
        tls.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"last words");
        assert!(tls.connection().is_peer_closed());
    }

    #[test]
    fn test_eof_without_close_notify_is_an_error() {
        let server = ScriptedServer::rsa(
            TlsVersion::Tls12,
            CipherSuite::TLS_RSA_WITH_AES_128_GCM_SHA256,
        );
        let registry = SessionRegistry::new();
        let mut tls = stream_for(server, &registry);
        tls.handshake().unwrap();

        let mut buf = [0u8; 16];
        let err = TlsConnection::read(&mut tls, &mut buf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Closed);
        assert!(tls.connection().is_closed());

        let err = Read::read(&mut tls, &mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_handshake_failure_is_reported() {
        let server = ScriptedServer::rsa(
            TlsVersion::Tls11,
            CipherSuite::TLS_RSA_WITH_AES_128_CBC_SHA,
        );
        let registry = SessionRegistry::new();
        let config = Arc::new(
            config_for(&server.key)
                .min_version(TlsVersion::Tls12)
                .build(),
        );
        let mut tls =
            TlsStream::new(Loopback::new(server), config, &registry, SERVER_NAME).unwrap();
        let err = tls.handshake().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
        assert_eq!(tls.handshake().unwrap_err().kind(), ErrorKind::Unsupported);
    }

    #[test]
    fn test_renegotiation_during_read() {
        let server = ScriptedServer::rsa(
            TlsVersion::Tls12,
            CipherSuite::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
        );
        let registry = SessionRegistry::new();
        let mut tls = stream_for(server, &registry);
        tls.handshake().unwrap();

        tls.get_mut().server.send_hello_request();
        tls.get_mut().server.send_app_data(b"after");
        // Data queued behind the HelloRequest is delivered while the new
        // negotiation is still in progress.
        let mut buf = [0u8; 16];
        let n = TlsConnection::read(&mut tls, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"after");
        assert!(!tls.connection().is_ready());

        tls.handshake().unwrap();
        assert_eq!(tls.get_ref().server.handshakes, 2);
        assert!(tls.connection().is_ready());
    }

    #[test]
    fn test_shutdown_sends_close_notify_once() {
        let server = ScriptedServer::rsa(
            TlsVersion::Tls12,
            CipherSuite::TLS_RSA_WITH_AES_128_GCM_SHA256,
        );
        let registry = SessionRegistry::new();
        let mut tls = stream_for(server, &registry);
        tls.handshake().unwrap();
        tls.shutdown().unwrap();
        tls.shutdown().unwrap();
        assert_eq!(tls.get_ref().server.alerts, vec![vec![1, 0]]);
        assert!(tls.connection().is_closed());
        assert_eq!(
            TlsConnection::write(&mut tls, b"late").unwrap_err().kind(),
            ErrorKind::Closed
        );
    }

    #[test]
    fn test_resumption_through_streams() {
        let key = server_rsa_key();
        let registry = SessionRegistry::new();
        let config = Arc::new(config_for(&key).build());

        let server = ScriptedServer::new(
            TlsVersion::Tls12,
            CipherSuite::TLS_RSA_WITH_AES_128_GCM_SHA256,
            key.clone(),
        );
        let mut first =
            TlsStream::new(Loopback::new(server), Arc::clone(&config), &registry, SERVER_NAME)
                .unwrap();
        first.handshake().unwrap();
        let cache = first.get_ref().server.resumable();

        let mut server = ScriptedServer::new(
            TlsVersion::Tls12,
            CipherSuite::TLS_RSA_WITH_AES_128_GCM_SHA256,
            key,
        );
        server.cache = Some(cache);
        let mut second =
            TlsStream::new(Loopback::new(server), config, &registry, SERVER_NAME).unwrap();
        second.handshake().unwrap();
        assert!(second.connection().is_resumed());
        assert!(second.get_ref().server.resumed);
    }

    #[test]
    fn test_background_validation_is_waited_for() {
        let server = ScriptedServer::rsa(
            TlsVersion::Tls12,
            CipherSuite::TLS_DHE_RSA_WITH_AES_128_GCM_SHA256,
        );
        let spki = private_key_spki(&server.key).unwrap();
        let validator = BackgroundValidator::new(move |_, _| {
            std::thread::sleep(Duration::from_millis(20));
            Ok(ValidatedCertificate {
                spki_der: spki.clone(),
                names: vec![SERVER_NAME.to_string()],
            })
        });
        let config = Arc::new(
            TlsConfig::builder()
                .server_name(SERVER_NAME)
                .validator(Arc::new(validator))
                .build(),
        );
        let registry = SessionRegistry::new();
        let mut tls =
            TlsStream::new(Loopback::new(server), config, &registry, SERVER_NAME).unwrap();
        tls.handshake().unwrap();
        assert!(tls.connection().is_ready());
        assert!(tls.get_ref().server.client_finished_ok);
    }
}
