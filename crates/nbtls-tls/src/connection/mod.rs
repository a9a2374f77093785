//! Sans-IO TLS client connection.
//!
//! [`ClientConnection`] owns everything one TLS connection needs (handshake
//! state, record layer, reassembly buffers) but never touches a socket. The
//! caller moves bytes:
//!
//! - `deliver_ciphertext` with whatever the transport received,
//! - `tx_step` whenever the transport can accept data, then
//!   `take_ciphertext` to collect what should be written,
//! - `poll_validation` while a certificate validation is running,
//! - `write_plaintext` / `read_plaintext` for application data.
//!
//! Any error closes the connection; the error is kept as the close reason
//! and returned again by every later call.

use std::collections::VecDeque;
use std::sync::Arc;
use std::task::Poll;

use log::{debug, trace, warn};

use crate::alert::{Alert, AlertLevel};
use crate::config::TlsConfig;
use crate::connection_info::ConnectionInfo;
use crate::handshake::client::{ClientHandshake, HandshakeEvent, ServerFlight};
use crate::handshake::codec::{split_handshake_message, CHANGE_CIPHER_SPEC_PAYLOAD};
use crate::handshake::{HandshakeMessage, HandshakeState, HandshakeType};
use crate::record::reassembly::{RawRecord, RecordReader};
use crate::record::{ContentType, RecordLayer, MAX_PLAINTEXT_LENGTH};
use crate::session::{MemberId, Session, SessionRegistry};
use crate::validator::{JobProgress, ValidationJob};
use crate::{CipherSuite, TlsVersion};
use nbtls_types::TlsError;

// Pending transmissions, sent strictly in this order.
const TX_CLIENT_HELLO: u8 = 0x01;
const TX_CERTIFICATE: u8 = 0x02;
const TX_CLIENT_KEY_EXCHANGE: u8 = 0x04;
const TX_CERTIFICATE_VERIFY: u8 = 0x08;
const TX_CHANGE_CIPHER: u8 = 0x10;
const TX_FINISHED: u8 = 0x20;

/// A TLS client connection, independent of any transport.
pub struct ClientConnection {
    id: MemberId,
    config: Arc<TlsConfig>,
    server_name: String,
    session: Arc<Session>,
    handshake: ClientHandshake,
    record: RecordLayer,
    reader: RecordReader,
    /// Handshake bytes not yet forming a complete message.
    handshake_buf: Vec<u8>,
    tx_pending: u8,
    /// Until the client Finished is sent.
    client_negotiation: bool,
    /// Until the server Finished verifies.
    server_negotiation: bool,
    /// Some negotiation has completed on this connection.
    established: bool,
    /// A renegotiation is under way. Application data protected by the
    /// previous negotiation may still arrive until it completes.
    renegotiating: bool,
    validation: Option<Box<dyn ValidationJob>>,
    ciphertext_out: Vec<u8>,
    plaintext_in: VecDeque<u8>,
    peer_closed: bool,
    close_reason: Option<TlsError>,
}

impl ClientConnection {
    /// Create a connection to `server_name` and queue its ClientHello.
    ///
    /// The connection joins the session shared by every connection with the
    /// same server name, trust root and client key.
    pub fn new(
        config: Arc<TlsConfig>,
        registry: &SessionRegistry,
        server_name: &str,
    ) -> Result<Self, TlsError> {
        let session = registry.session(
            server_name,
            &config.trust_root,
            config.private_key.as_ref(),
        );
        let id = session.join();
        let record = RecordLayer::new(config.max_version.wire(), Arc::clone(&config.random));
        let handshake = ClientHandshake::new(Arc::clone(&config), server_name);
        let mut conn = Self {
            id,
            config,
            server_name: server_name.to_string(),
            session,
            handshake,
            record,
            reader: RecordReader::new(),
            handshake_buf: Vec::new(),
            tx_pending: 0,
            client_negotiation: false,
            server_negotiation: false,
            established: false,
            renegotiating: false,
            validation: None,
            ciphertext_out: Vec::new(),
            plaintext_in: VecDeque::new(),
            peer_closed: false,
            close_reason: None,
        };
        debug!("TLS {}: opening connection to {}", id, server_name);
        conn.restart()?;
        Ok(conn)
    }

    /// (Re)start negotiation: queue a ClientHello and block application
    /// data until both sides have finished.
    ///
    /// Renegotiating a connection whose server never acknowledged
    /// renegotiation_info fails and closes the connection.
    pub fn restart(&mut self) -> Result<(), TlsError> {
        self.check_open()?;
        let renegotiation = self.established;
        if renegotiation && !self.handshake.secure_renegotiation() {
            let err = TlsError::AuthFailed(
                "renegotiation requested without secure renegotiation".into(),
            );
            self.close(err.clone());
            return Err(err);
        }
        let result = self.handshake.restart();
        self.guard(result)?;
        if renegotiation {
            debug!("TLS {}: renegotiating", self.id);
        }
        self.renegotiating = renegotiation;
        self.tx_pending |= TX_CLIENT_HELLO;
        self.client_negotiation = true;
        self.server_negotiation = true;
        self.session.set_server_pending(self.id, true);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------

    /// Ready for application data: no negotiation or validation pending.
    pub fn is_ready(&self) -> bool {
        self.close_reason.is_none()
            && !self.client_negotiation
            && !self.server_negotiation
            && self.validation.is_none()
    }

    pub fn is_closed(&self) -> bool {
        self.close_reason.is_some()
    }

    pub fn close_reason(&self) -> Option<&TlsError> {
        self.close_reason.as_ref()
    }

    /// The peer sent close_notify; no more application data will arrive.
    pub fn is_peer_closed(&self) -> bool {
        self.peer_closed
    }

    pub fn state(&self) -> HandshakeState {
        if self.is_closed() {
            return HandshakeState::Closed;
        }
        if self.is_ready() {
            return HandshakeState::Established;
        }
        if self.tx_pending & TX_CLIENT_HELLO != 0 {
            return HandshakeState::ClientHelloPending;
        }
        if self.validation.is_some() {
            return HandshakeState::ValidatingCertificate;
        }
        if self.tx_pending & (TX_CERTIFICATE | TX_CLIENT_KEY_EXCHANGE | TX_CERTIFICATE_VERIFY) != 0 {
            return HandshakeState::KeyExchangePending;
        }
        if self.tx_pending & TX_CHANGE_CIPHER != 0 {
            return HandshakeState::ChangeCipherPending;
        }
        match self.handshake.flight() {
            ServerFlight::WaitServerHello
            | ServerFlight::WaitCertificate
            | ServerFlight::WaitServerKeyExchange
            | ServerFlight::WaitServerHelloDone => HandshakeState::WaitServerHello,
            ServerFlight::Validating => HandshakeState::ValidatingCertificate,
            ServerFlight::WaitChangeCipherSpec => HandshakeState::ChangeCipherPending,
            ServerFlight::WaitFinished | ServerFlight::Complete => HandshakeState::FinishedPending,
        }
    }

    /// Progress of the running certificate validation, if any.
    pub fn progress(&self) -> Option<JobProgress> {
        self.validation.as_ref().and_then(|job| job.progress())
    }

    pub fn version(&self) -> Option<TlsVersion> {
        self.handshake.version()
    }

    pub fn cipher_suite(&self) -> Option<CipherSuite> {
        self.handshake.cipher_suite()
    }

    pub fn is_resumed(&self) -> bool {
        self.handshake.is_resumed()
    }

    pub fn peer_certificates(&self) -> &[Vec<u8>] {
        self.handshake.server_certificates()
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Negotiated parameters, once a ServerHello has been accepted.
    pub fn connection_info(&self) -> Option<ConnectionInfo> {
        let version = self.handshake.version()?;
        let cipher_suite = self.handshake.cipher_suite()?;
        Some(ConnectionInfo {
            state: self.state(),
            version,
            cipher_suite,
            peer_certificates: self.handshake.server_certificates().to_vec(),
            server_name: self.server_name.clone(),
            session_id: self.handshake.session_id().to_vec(),
            session_resumed: self.handshake.is_resumed(),
            secure_renegotiation: self.handshake.secure_renegotiation(),
            max_fragment_size: self.record.max_fragment_size(),
            peer_verify_data: self
                .handshake
                .server_verify_data()
                .map(|v| v.to_vec())
                .unwrap_or_default(),
            local_verify_data: self
                .handshake
                .client_verify_data()
                .map(|v| v.to_vec())
                .unwrap_or_default(),
        })
    }

    // ------------------------------------------------------------------
    // Flow control
    // ------------------------------------------------------------------

    /// Plaintext the application may write: nothing until ready, then
    /// whatever the transport accepts.
    pub fn plaintext_window(&self, transport_window: usize) -> usize {
        if self.is_ready() {
            transport_window
        } else {
            0
        }
    }

    /// Ciphertext the transport may deliver: unlimited while negotiating,
    /// then whatever the application consumer accepts.
    pub fn ciphertext_window(&self, consumer_window: usize) -> usize {
        if self.is_ready() {
            consumer_window
        } else {
            usize::MAX
        }
    }

    // ------------------------------------------------------------------
    // Transmit
    // ------------------------------------------------------------------

    /// Whether `tx_step` has work it can do now.
    pub fn wants_tx_step(&self) -> bool {
        if self.is_closed() || self.tx_pending == 0 {
            return false;
        }
        self.tx_pending != TX_CLIENT_HELLO || self.session.may_send_client_hello(self.id)
    }

    /// Whether negotiation is stalled on something other than the peer: a
    /// running certificate validation, or an earlier session member whose
    /// negotiation must finish before our ClientHello may go out.
    pub fn is_waiting(&self) -> bool {
        if self.is_closed() {
            return false;
        }
        self.validation.is_some()
            || (self.tx_pending & TX_CLIENT_HELLO != 0
                && !self.session.may_send_client_hello(self.id))
    }

    /// Send at most one pending handshake transmission.
    ///
    /// Does nothing when the transport has no room or the session still
    /// has an earlier connection negotiating. Returns whether anything was
    /// queued for `take_ciphertext`.
    pub fn tx_step(&mut self, transport_window: usize) -> Result<bool, TlsError> {
        self.check_open()?;
        if transport_window == 0 {
            return Ok(false);
        }
        let result = self.tx_step_inner();
        self.guard(result)
    }

    fn tx_step_inner(&mut self) -> Result<bool, TlsError> {
        if self.tx_pending & TX_CLIENT_HELLO != 0 {
            if !self.session.may_send_client_hello(self.id) {
                trace!("TLS {}: ClientHello waits for session", self.id);
                return Ok(false);
            }
            let msg = self.handshake.build_client_hello(&self.session.cached())?;
            self.send_handshake(&msg)?;
            self.tx_pending &= !TX_CLIENT_HELLO;
        } else if self.tx_pending & TX_CERTIFICATE != 0 {
            let msg = self.handshake.build_certificate()?;
            self.send_handshake(&msg)?;
            self.tx_pending &= !TX_CERTIFICATE;
        } else if self.tx_pending & TX_CLIENT_KEY_EXCHANGE != 0 {
            let msg = self.handshake.build_client_key_exchange()?;
            self.send_handshake(&msg)?;
            let (tx, rx) = self.handshake.cipher_states()?;
            self.record.set_pending(tx, rx);
            self.tx_pending &= !TX_CLIENT_KEY_EXCHANGE;
        } else if self.tx_pending & TX_CERTIFICATE_VERIFY != 0 {
            let msg = self.handshake.build_certificate_verify()?;
            self.send_handshake(&msg)?;
            self.tx_pending &= !TX_CERTIFICATE_VERIFY;
        } else if self.tx_pending & TX_CHANGE_CIPHER != 0 {
            let record = self
                .record
                .seal(ContentType::ChangeCipherSpec, &CHANGE_CIPHER_SPEC_PAYLOAD)?;
            self.ciphertext_out.extend_from_slice(&record);
            self.record.activate_tx()?;
            self.tx_pending &= !TX_CHANGE_CIPHER;
        } else if self.tx_pending & TX_FINISHED != 0 {
            let msg = self.handshake.build_finished()?;
            self.send_handshake(&msg)?;
            self.tx_pending &= !TX_FINISHED;
            self.client_negotiation = false;
            if !self.server_negotiation {
                self.negotiation_complete();
            }
        } else {
            return Ok(false);
        }
        Ok(true)
    }

    fn send_handshake(&mut self, msg: &[u8]) -> Result<(), TlsError> {
        if let Some(ty) = msg.first().copied().and_then(HandshakeType::from_u8) {
            trace!("TLS {}: sending {:?} ({} bytes)", self.id, ty, msg.len());
        }
        let records = self.record.seal(ContentType::Handshake, msg)?;
        self.ciphertext_out.extend_from_slice(&records);
        Ok(())
    }

    /// Collect ciphertext queued for the transport.
    pub fn take_ciphertext(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.ciphertext_out)
    }

    pub fn has_ciphertext(&self) -> bool {
        !self.ciphertext_out.is_empty()
    }

    /// Protect application data as one or more records.
    pub fn write_plaintext(&mut self, data: &[u8]) -> Result<usize, TlsError> {
        self.check_open()?;
        if !self.is_ready() {
            return Err(TlsError::NotConnected);
        }
        let result = self.record.seal(ContentType::ApplicationData, data);
        let records = self.guard(result)?;
        self.ciphertext_out.extend_from_slice(&records);
        Ok(data.len())
    }

    /// Queue a close_notify alert and close the connection.
    pub fn send_close_notify(&mut self) -> Result<(), TlsError> {
        self.check_open()?;
        let result = self.record.seal(ContentType::Alert, &Alert::close_notify().encode());
        let record = self.guard(result)?;
        self.ciphertext_out.extend_from_slice(&record);
        self.close(TlsError::ConnectionClosed);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Receive
    // ------------------------------------------------------------------

    /// Feed ciphertext from the transport, in any fragmentation.
    pub fn deliver_ciphertext(&mut self, data: &[u8]) -> Result<(), TlsError> {
        self.check_open()?;
        let result = self.deliver_inner(data);
        self.guard(result)
    }

    fn deliver_inner(&mut self, data: &[u8]) -> Result<(), TlsError> {
        for record in self.reader.push(data)? {
            self.process_record(record)?;
            if self.is_closed() {
                break;
            }
        }
        Ok(())
    }

    fn process_record(&mut self, raw: RawRecord) -> Result<(), TlsError> {
        let plaintext = self.record.open(&raw.header, &raw.body)?;
        trace!(
            "TLS {}: received record type {} ({} bytes)",
            self.id,
            raw.header.content_type,
            plaintext.len()
        );
        match ContentType::from_u8(raw.header.content_type) {
            Some(ContentType::ChangeCipherSpec) => self.process_change_cipher_spec(&plaintext),
            Some(ContentType::Alert) => self.process_alert(&plaintext),
            Some(ContentType::Handshake) => self.process_handshake_data(&plaintext),
            Some(ContentType::ApplicationData) => {
                if !self.is_ready() && !self.renegotiating {
                    return Err(TlsError::NotConnected);
                }
                self.plaintext_in.extend(plaintext);
                Ok(())
            }
            None => Err(TlsError::InvalidMessage(format!(
                "unknown record type {}",
                raw.header.content_type
            ))),
        }
    }

    fn process_change_cipher_spec(&mut self, payload: &[u8]) -> Result<(), TlsError> {
        if payload != CHANGE_CIPHER_SPEC_PAYLOAD {
            return Err(TlsError::InvalidMessage(format!(
                "ChangeCipherSpec payload of {} bytes",
                payload.len()
            )));
        }
        if !self.handshake_buf.is_empty() {
            return Err(TlsError::ProtocolViolation(
                "ChangeCipherSpec inside a handshake message".into(),
            ));
        }
        self.handshake.process_change_cipher_spec()?;
        self.record.activate_rx()
    }

    fn process_alert(&mut self, payload: &[u8]) -> Result<(), TlsError> {
        let alert = Alert::parse(payload)?;
        match alert.level {
            AlertLevel::Warning if alert.is_close_notify() => {
                debug!("TLS {}: peer sent close_notify", self.id);
                self.peer_closed = true;
                Ok(())
            }
            AlertLevel::Warning => {
                warn!("TLS {}: ignoring warning alert {}", self.id, alert.describe());
                Ok(())
            }
            AlertLevel::Fatal => Err(TlsError::AlertReceived(alert.describe())),
        }
    }

    fn process_handshake_data(&mut self, data: &[u8]) -> Result<(), TlsError> {
        self.handshake_buf.extend_from_slice(data);
        while let Some((msg, consumed)) = split_handshake_message(&self.handshake_buf)? {
            self.handshake_buf.drain(..consumed);
            self.process_handshake_message(&msg)?;
            if self.is_closed() {
                break;
            }
        }
        Ok(())
    }

    fn process_handshake_message(&mut self, msg: &HandshakeMessage) -> Result<(), TlsError> {
        if msg.handshake_type() == Some(HandshakeType::HelloRequest) {
            return self.process_hello_request();
        }
        trace!(
            "TLS {}: received handshake type {} ({} bytes)",
            self.id,
            msg.msg_type,
            msg.body.len()
        );
        match self.handshake.handle_message(msg)? {
            HandshakeEvent::None => Ok(()),
            HandshakeEvent::ServerHello { resumed } => {
                if let Some(version) = self.handshake.version() {
                    self.record.set_version(version.wire());
                }
                self.record.set_max_fragment_size(
                    self.handshake.max_fragment_size().unwrap_or(MAX_PLAINTEXT_LENGTH),
                );
                if resumed {
                    let (tx, rx) = self.handshake.cipher_states()?;
                    self.record.set_pending(tx, rx);
                }
                Ok(())
            }
            HandshakeEvent::StartValidation => self.start_validation(),
            HandshakeEvent::ServerFinished => {
                self.server_finished();
                Ok(())
            }
        }
    }

    fn process_hello_request(&mut self) -> Result<(), TlsError> {
        if !self.is_ready() {
            debug!("TLS {}: ignoring HelloRequest during negotiation", self.id);
            return Ok(());
        }
        self.restart()
    }

    fn negotiation_complete(&mut self) {
        self.established = true;
        self.renegotiating = false;
        debug!("TLS {}: ready", self.id);
    }

    fn server_finished(&mut self) {
        self.server_negotiation = false;
        let ticket = self.handshake.take_new_ticket();
        if let Some(ms) = self.handshake.master_secret() {
            self.session
                .record(self.id, self.handshake.session_id(), ticket, ms);
        }
        self.session.set_server_pending(self.id, false);
        if self.client_negotiation {
            // Abbreviated handshake: the client flight follows the server's.
            self.tx_pending |= TX_CHANGE_CIPHER | TX_FINISHED;
        } else {
            self.negotiation_complete();
        }
    }

    // ------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------

    fn start_validation(&mut self) -> Result<(), TlsError> {
        let validator = self
            .config
            .validator
            .clone()
            .ok_or_else(|| TlsError::CertVerifyFailed("no certificate validator".into()))?;
        debug!(
            "TLS {}: validating chain of {} certificates",
            self.id,
            self.handshake.server_certificates().len()
        );
        let job = validator.start(self.handshake.server_certificates(), &self.config.trust_root)?;
        self.validation = Some(job);
        self.poll_validation_inner()
    }

    /// Check whether the running validation has finished. On success the
    /// client key exchange flight is scheduled.
    pub fn poll_validation(&mut self) -> Result<(), TlsError> {
        self.check_open()?;
        let result = self.poll_validation_inner();
        self.guard(result)
    }

    fn poll_validation_inner(&mut self) -> Result<(), TlsError> {
        let Some(job) = self.validation.as_mut() else {
            return Ok(());
        };
        let validated = match job.poll() {
            Poll::Pending => return Ok(()),
            Poll::Ready(result) => {
                self.validation = None;
                result?
            }
        };
        self.handshake.validation_complete(&validated)?;
        self.tx_pending |= TX_CLIENT_KEY_EXCHANGE | TX_CHANGE_CIPHER | TX_FINISHED;
        if self.handshake.client_auth_requested() {
            self.tx_pending |= TX_CERTIFICATE | TX_CERTIFICATE_VERIFY;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Application data
    // ------------------------------------------------------------------

    /// Copy received application data into `buf`.
    ///
    /// Returns 0 when nothing is buffered; check [`is_peer_closed`] to tell
    /// end-of-stream apart from "no data yet".
    ///
    /// [`is_peer_closed`]: Self::is_peer_closed
    pub fn read_plaintext(&mut self, buf: &mut [u8]) -> Result<usize, TlsError> {
        if self.plaintext_in.is_empty() {
            if let Some(reason) = &self.close_reason {
                if !self.peer_closed {
                    return Err(reason.clone());
                }
            }
            return Ok(0);
        }
        let n = buf.len().min(self.plaintext_in.len());
        for (dst, src) in buf.iter_mut().zip(self.plaintext_in.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }

    pub fn plaintext_available(&self) -> usize {
        self.plaintext_in.len()
    }

    // ------------------------------------------------------------------
    // Closing
    // ------------------------------------------------------------------

    /// Close the connection with `reason`. Releases every pending
    /// negotiation, aborts validation and leaves the session. Closing an
    /// already closed connection keeps the first reason.
    pub fn close(&mut self, reason: TlsError) {
        if self.close_reason.is_some() {
            return;
        }
        match &reason {
            TlsError::ConnectionClosed => debug!("TLS {}: closed", self.id),
            other => debug!("TLS {}: closed: {}", self.id, other),
        }
        if let Some(mut job) = self.validation.take() {
            job.abort();
        }
        self.tx_pending = 0;
        self.client_negotiation = false;
        self.server_negotiation = false;
        self.handshake_buf.clear();
        self.session.leave(self.id);
        self.close_reason = Some(reason);
    }

    fn check_open(&self) -> Result<(), TlsError> {
        match &self.close_reason {
            Some(reason) => Err(reason.clone()),
            None => Ok(()),
        }
    }

    fn guard<T>(&mut self, result: Result<T, TlsError>) -> Result<T, TlsError> {
        if let Err(e) = &result {
            self.close(e.clone());
        }
        result
    }
}

impl Drop for ClientConnection {
    fn drop(&mut self) {
        if let Some(mut job) = self.validation.take() {
            job.abort();
        }
        self.session.leave(self.id);
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("server_name", &self.server_name)
            .field("state", &self.state())
            .field("version", &self.version())
            .field("cipher_suite", &self.cipher_suite())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod scripted;
