//! TLS 1.1/1.2 client handshake state machine.
//!
//! Tracks one negotiation from ClientHello to the server's Finished: what
//! was offered, what the server chose, the transcript, and the secrets. It
//! neither reads nor writes records; the connection feeds it complete
//! handshake messages and asks it to build the client's flight.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, trace};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::config::TlsConfig;
use crate::crypt::key_schedule::{
    compute_verify_data, derive_key_block, derive_master_secret, verify_data_matches,
    MasterSecret, VERIFY_DATA_LEN,
};
use crate::crypt::transcript::TranscriptHash;
use crate::crypt::{keylog, AuthAlg, CipherSuiteParams, KeyExchangeAlg, SignatureAlgorithm};
use crate::extensions::{find_extension, ExtensionType, MaxFragmentLength};
use crate::handshake::codec::{
    decode_certificate, decode_empty, decode_finished, decode_new_session_ticket,
    decode_server_hello, encode_certificate, encode_client_hello, encode_finished, ClientHello,
    ServerHello,
};
use crate::handshake::codec12::{
    decode_certificate_request, decode_server_key_exchange, encode_certificate_verify,
    encode_client_key_exchange, ske_signed_data, CertificateRequest, DigitallySigned,
    ServerKeyExchange, ServerKeyParams,
};
use crate::handshake::extensions_codec::{
    build_max_fragment_length, build_renegotiation_info, build_server_name, build_session_ticket,
    build_signature_algorithms, build_supported_groups, parse_max_fragment_length,
    parse_renegotiation_info, parse_session_ticket_sh,
};
use crate::handshake::key_exchange::{
    dhe_client_key_exchange, ecdhe_client_key_exchange, rsa_client_key_exchange,
};
use crate::handshake::signing::{
    legacy_signature_hash, private_key_algorithm, private_key_spki, select_certificate_verify_scheme,
    sign_digest, verify_server_key_exchange, PeerPublicKey,
};
use crate::handshake::{HandshakeMessage, HandshakeType};
use crate::record::cipher_state::CipherState;
use crate::session::CachedSession;
use crate::validator::{check_name, ValidatedCertificate};
use crate::{CipherSuite, TlsVersion};
use nbtls_types::TlsError;

/// Position within the server's side of the negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerFlight {
    WaitServerHello,
    WaitCertificate,
    WaitServerKeyExchange,
    WaitServerHelloDone,
    /// ServerHelloDone received; the chain is with the validator.
    Validating,
    WaitChangeCipherSpec,
    WaitFinished,
    Complete,
}

/// What the connection must do after a handshake message was accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeEvent {
    None,
    /// ServerHello accepted. On resumption the pending cipher states can be
    /// installed immediately.
    ServerHello { resumed: bool },
    /// ServerHelloDone: start validating the server chain.
    StartValidation,
    /// The server Finished verified.
    ServerFinished,
}

/// Client side of one (re)negotiation.
pub struct ClientHandshake {
    config: Arc<TlsConfig>,
    server_name: String,
    flight: ServerFlight,
    client_random: [u8; 32],
    server_random: [u8; 32],
    offered_version: TlsVersion,
    offered_suites: Vec<CipherSuite>,
    version: Option<TlsVersion>,
    params: Option<CipherSuiteParams>,
    session_id: Vec<u8>,
    cached_master_secret: Option<MasterSecret>,
    resumed: bool,
    transcript: TranscriptHash,
    server_certs: Vec<Vec<u8>>,
    server_key_exchange: Option<ServerKeyExchange>,
    peer_key: Option<PeerPublicKey>,
    certificate_request: Option<CertificateRequest>,
    client_chain: Option<Vec<Vec<u8>>>,
    master_secret: Option<MasterSecret>,
    client_finished_sent: bool,
    client_verify: Option<[u8; VERIFY_DATA_LEN]>,
    server_verify: Option<[u8; VERIFY_DATA_LEN]>,
    secure_renegotiation: bool,
    max_fragment_size: Option<usize>,
    new_ticket: Option<Vec<u8>>,
}

impl ClientHandshake {
    pub fn new(config: Arc<TlsConfig>, server_name: &str) -> Self {
        let offered_version = config.max_version;
        Self {
            config,
            server_name: server_name.to_string(),
            flight: ServerFlight::WaitServerHello,
            client_random: [0u8; 32],
            server_random: [0u8; 32],
            offered_version,
            offered_suites: Vec::new(),
            version: None,
            params: None,
            session_id: Vec::new(),
            cached_master_secret: None,
            resumed: false,
            transcript: TranscriptHash::new(),
            server_certs: Vec::new(),
            server_key_exchange: None,
            peer_key: None,
            certificate_request: None,
            client_chain: None,
            master_secret: None,
            client_finished_sent: false,
            client_verify: None,
            server_verify: None,
            secure_renegotiation: false,
            max_fragment_size: None,
            new_ticket: None,
        }
    }

    /// Begin a new negotiation with a fresh client random.
    ///
    /// The negotiated version, suite and verify data of the previous
    /// negotiation survive: a renegotiation offers the version in use and
    /// proves continuity with the previous Finished messages.
    pub fn restart(&mut self) -> Result<(), TlsError> {
        let gmt_unix_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);
        self.client_random[..4].copy_from_slice(&gmt_unix_time.to_be_bytes());
        self.config.random.fill(&mut self.client_random[4..])?;

        self.flight = ServerFlight::WaitServerHello;
        self.offered_version = self.version.unwrap_or(self.config.max_version);
        self.transcript.reset();
        self.cached_master_secret = None;
        self.resumed = false;
        self.server_certs.clear();
        self.server_key_exchange = None;
        self.peer_key = None;
        self.certificate_request = None;
        self.client_chain = None;
        self.master_secret = None;
        self.client_finished_sent = false;
        self.new_ticket = None;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn flight(&self) -> ServerFlight {
        self.flight
    }

    pub fn version(&self) -> Option<TlsVersion> {
        self.version
    }

    pub fn offered_version(&self) -> TlsVersion {
        self.offered_version
    }

    pub fn params(&self) -> Option<&CipherSuiteParams> {
        self.params.as_ref()
    }

    pub fn cipher_suite(&self) -> Option<CipherSuite> {
        self.params.map(|p| p.suite)
    }

    pub fn is_resumed(&self) -> bool {
        self.resumed
    }

    pub fn session_id(&self) -> &[u8] {
        &self.session_id
    }

    pub fn client_random(&self) -> &[u8; 32] {
        &self.client_random
    }

    pub fn server_random(&self) -> &[u8; 32] {
        &self.server_random
    }

    pub fn master_secret(&self) -> Option<&MasterSecret> {
        self.master_secret.as_ref()
    }

    pub fn server_certificates(&self) -> &[Vec<u8>] {
        &self.server_certs
    }

    pub fn client_verify_data(&self) -> Option<&[u8; VERIFY_DATA_LEN]> {
        self.client_verify.as_ref()
    }

    pub fn server_verify_data(&self) -> Option<&[u8; VERIFY_DATA_LEN]> {
        self.server_verify.as_ref()
    }

    pub fn secure_renegotiation(&self) -> bool {
        self.secure_renegotiation
    }

    /// Plaintext fragment limit agreed via max_fragment_length, if any.
    pub fn max_fragment_size(&self) -> Option<usize> {
        self.max_fragment_size
    }

    /// Whether the server asked for a client certificate we can supply.
    pub fn client_auth_requested(&self) -> bool {
        self.client_chain.is_some()
    }

    /// Ticket received in NewSessionTicket during this negotiation.
    pub fn take_new_ticket(&mut self) -> Option<Vec<u8>> {
        self.new_ticket.take()
    }

    fn negotiated(&self) -> Result<(TlsVersion, CipherSuiteParams), TlsError> {
        match (self.version, self.params) {
            (Some(v), Some(p)) => Ok((v, p)),
            _ => Err(TlsError::ProtocolViolation(
                "no cipher suite negotiated".into(),
            )),
        }
    }

    fn require_master_secret(&self) -> Result<&MasterSecret, TlsError> {
        self.master_secret
            .as_ref()
            .ok_or_else(|| TlsError::ProtocolViolation("master secret not established".into()))
    }

    // ------------------------------------------------------------------
    // ClientHello
    // ------------------------------------------------------------------

    /// Build the ClientHello and add it to the transcript.
    ///
    /// With a resumable cached session the cached id is offered and its
    /// master secret preloaded; otherwise the client random doubles as the
    /// session id, so a ticket-only resumption still has an id to echo.
    pub fn build_client_hello(&mut self, cached: &CachedSession) -> Result<Vec<u8>, TlsError> {
        self.offered_suites = self.config.offered_suites();
        if self.offered_suites.is_empty() {
            return Err(TlsError::Unsupported("no cipher suites to offer".into()));
        }

        if cached.is_resumable() {
            self.session_id = cached.id.clone();
            self.cached_master_secret = cached.master_secret.clone();
        } else {
            self.session_id = self.client_random.to_vec();
            self.cached_master_secret = None;
        }

        let mut extensions = vec![build_server_name(&self.server_name)];
        if self.config.request_max_fragment_length {
            extensions.push(build_max_fragment_length(MaxFragmentLength::Bits12));
        }
        extensions.push(build_signature_algorithms(&self.config.signature_algorithms));
        let previous_verify = match (self.secure_renegotiation, &self.client_verify) {
            (true, Some(v)) => &v[..],
            _ => &[][..],
        };
        extensions.push(build_renegotiation_info(previous_verify));
        extensions.push(build_session_ticket(&cached.ticket));
        if !self.config.supported_groups.is_empty() {
            extensions.push(build_supported_groups(&self.config.supported_groups));
        }

        let msg = encode_client_hello(&ClientHello {
            version: self.offered_version.wire(),
            random: self.client_random,
            session_id: self.session_id.clone(),
            cipher_suites: self.offered_suites.clone(),
            extensions,
        });
        self.transcript.update(&msg);
        debug!(
            "ClientHello to {}: {:?}, {} suites, {} session id",
            self.server_name,
            self.offered_version,
            self.offered_suites.len(),
            if self.cached_master_secret.is_some() { "cached" } else { "fresh" }
        );
        Ok(msg)
    }

    // ------------------------------------------------------------------
    // Server messages
    // ------------------------------------------------------------------

    /// Process one complete handshake message from the server, then add it
    /// to the transcript. HelloRequest is never digested.
    pub fn handle_message(&mut self, msg: &HandshakeMessage) -> Result<HandshakeEvent, TlsError> {
        let event = match msg.handshake_type() {
            Some(HandshakeType::HelloRequest) => return Ok(HandshakeEvent::None),
            Some(HandshakeType::ServerHello) => self.process_server_hello(&msg.body)?,
            Some(HandshakeType::Certificate) => self.process_certificate(&msg.body)?,
            Some(HandshakeType::ServerKeyExchange) => self.process_server_key_exchange(&msg.body)?,
            Some(HandshakeType::CertificateRequest) => self.process_certificate_request(&msg.body)?,
            Some(HandshakeType::ServerHelloDone) => self.process_server_hello_done(&msg.body)?,
            Some(HandshakeType::NewSessionTicket) => self.process_new_session_ticket(&msg.body)?,
            Some(HandshakeType::Finished) => self.process_finished(&msg.body)?,
            Some(other) => {
                return Err(TlsError::ProtocolViolation(format!(
                    "unexpected {other:?} from server"
                )))
            }
            None => {
                debug!("ignoring unknown handshake type {}", msg.msg_type);
                HandshakeEvent::None
            }
        };
        self.transcript.update(&msg.raw);
        Ok(event)
    }

    fn expect_flight(&self, expected: ServerFlight, what: &str) -> Result<(), TlsError> {
        if self.flight != expected {
            return Err(TlsError::ProtocolViolation(format!(
                "unexpected {what} in state {:?}",
                self.flight
            )));
        }
        Ok(())
    }

    fn process_server_hello(&mut self, body: &[u8]) -> Result<HandshakeEvent, TlsError> {
        self.expect_flight(ServerFlight::WaitServerHello, "ServerHello")?;
        let sh = decode_server_hello(body)?;

        if sh.version < self.config.min_version.wire() {
            return Err(TlsError::Unsupported(format!(
                "server version 0x{:04x} below minimum",
                sh.version
            )));
        }
        if sh.version > self.offered_version.wire() {
            return Err(TlsError::ProtocolViolation(format!(
                "server version 0x{:04x} above offered version",
                sh.version
            )));
        }
        let version = TlsVersion::from_wire(sh.version).ok_or_else(|| {
            TlsError::Unsupported(format!("server version 0x{:04x}", sh.version))
        })?;

        if !self.offered_suites.contains(&sh.cipher_suite) {
            return Err(TlsError::Unsupported(format!(
                "cipher suite 0x{:04x} was not offered",
                sh.cipher_suite.0
            )));
        }
        let params = CipherSuiteParams::from_suite(sh.cipher_suite)?;
        if !params.usable_with(version) {
            return Err(TlsError::Unsupported(format!(
                "cipher suite 0x{:04x} requires TLS 1.2",
                sh.cipher_suite.0
            )));
        }
        if sh.compression_method != 0 {
            return Err(TlsError::Unsupported(format!(
                "compression method {}",
                sh.compression_method
            )));
        }

        self.process_server_extensions(&sh)?;

        self.version = Some(version);
        self.params = Some(params);
        self.server_random = sh.random;
        self.transcript.select(params.handshake_hash(version));

        self.resumed = self.cached_master_secret.is_some()
            && !sh.session_id.is_empty()
            && sh.session_id == self.session_id;
        if self.resumed {
            self.master_secret = self.cached_master_secret.take();
            if let Some(ms) = &self.master_secret {
                keylog::log_master_secret(&self.config, &self.client_random, ms.as_bytes());
            }
            self.flight = ServerFlight::WaitChangeCipherSpec;
        } else {
            if !sh.session_id.is_empty() {
                self.session_id = sh.session_id.clone();
            }
            self.cached_master_secret = None;
            self.flight = ServerFlight::WaitCertificate;
        }
        debug!(
            "ServerHello: {:?}, suite 0x{:04x}, session id {} bytes{}",
            version,
            params.suite.0,
            self.session_id.len(),
            if self.resumed { ", resumed" } else { "" }
        );
        Ok(HandshakeEvent::ServerHello {
            resumed: self.resumed,
        })
    }

    fn process_server_extensions(&mut self, sh: &ServerHello) -> Result<(), TlsError> {
        let exts = sh.extensions.as_deref().unwrap_or_default();

        let reneg = find_extension(exts, ExtensionType::RENEGOTIATION_INFO);
        if self.secure_renegotiation {
            let (Some(ext), Some(client), Some(server)) =
                (reneg, &self.client_verify, &self.server_verify)
            else {
                return Err(TlsError::AuthFailed(
                    "missing secure renegotiation echo".into(),
                ));
            };
            let echoed = parse_renegotiation_info(&ext.data)?;
            let mut expected = Zeroizing::new(Vec::with_capacity(2 * VERIFY_DATA_LEN));
            expected.extend_from_slice(client);
            expected.extend_from_slice(server);
            if echoed.len() != expected.len() || !bool::from(echoed.ct_eq(expected.as_slice())) {
                return Err(TlsError::AuthFailed(
                    "secure renegotiation verification failed".into(),
                ));
            }
        } else if let Some(ext) = reneg {
            if !parse_renegotiation_info(&ext.data)?.is_empty() {
                return Err(TlsError::AuthFailed(
                    "non-empty renegotiation_info on initial negotiation".into(),
                ));
            }
            self.secure_renegotiation = true;
        }

        self.max_fragment_size = None;
        if let Some(ext) = find_extension(exts, ExtensionType::MAX_FRAGMENT_LENGTH) {
            let mfl = parse_max_fragment_length(&ext.data)?;
            if !self.config.request_max_fragment_length || mfl != MaxFragmentLength::Bits12 {
                return Err(TlsError::ProtocolViolation(format!(
                    "max_fragment_length {mfl:?} was not requested"
                )));
            }
            self.max_fragment_size = Some(mfl.to_size());
        }

        if let Some(ext) = find_extension(exts, ExtensionType::SESSION_TICKET) {
            parse_session_ticket_sh(&ext.data)?;
        }
        Ok(())
    }

    fn process_certificate(&mut self, body: &[u8]) -> Result<HandshakeEvent, TlsError> {
        self.expect_flight(ServerFlight::WaitCertificate, "Certificate")?;
        let (_, params) = self.negotiated()?;
        let chain = decode_certificate(body)?;
        if chain.is_empty() {
            return Err(TlsError::CertVerifyFailed("empty server certificate chain".into()));
        }
        trace!("server certificate chain of {} entries", chain.len());
        self.server_certs = chain;
        self.flight = if params.kx_alg.requires_server_key_exchange() {
            ServerFlight::WaitServerKeyExchange
        } else {
            ServerFlight::WaitServerHelloDone
        };
        Ok(HandshakeEvent::None)
    }

    fn process_server_key_exchange(&mut self, body: &[u8]) -> Result<HandshakeEvent, TlsError> {
        self.expect_flight(ServerFlight::WaitServerKeyExchange, "ServerKeyExchange")?;
        let (version, params) = self.negotiated()?;
        let ske = decode_server_key_exchange(body, params.kx_alg, version)?;
        if let ServerKeyParams::Ecdhe { group, .. } = &ske.params {
            if !self.config.supported_groups.contains(group) {
                return Err(TlsError::Unsupported(format!(
                    "named curve {} was not offered",
                    group.0
                )));
            }
        }
        self.server_key_exchange = Some(ske);
        self.flight = ServerFlight::WaitServerHelloDone;
        Ok(HandshakeEvent::None)
    }

    fn process_certificate_request(&mut self, body: &[u8]) -> Result<HandshakeEvent, TlsError> {
        self.expect_flight(ServerFlight::WaitServerHelloDone, "CertificateRequest")?;
        let (version, _) = self.negotiated()?;
        let request = decode_certificate_request(body, version)?;

        let key = self.config.private_key.as_ref().ok_or_else(|| {
            TlsError::AuthFailed("server requested a certificate but no client key is set".into())
        })?;
        let spki = private_key_spki(key)?;
        let chain = self
            .config
            .certificate_store
            .find_chain(&spki)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| {
                TlsError::AuthFailed("no certificate found for the client key".into())
            })?;
        debug!("client certificate requested; chain of {} entries", chain.len());
        self.certificate_request = Some(request);
        self.client_chain = Some(chain);
        Ok(HandshakeEvent::None)
    }

    fn process_server_hello_done(&mut self, body: &[u8]) -> Result<HandshakeEvent, TlsError> {
        self.expect_flight(ServerFlight::WaitServerHelloDone, "ServerHelloDone")?;
        decode_empty(body, "ServerHelloDone")?;
        self.flight = ServerFlight::Validating;
        Ok(HandshakeEvent::StartValidation)
    }

    fn process_new_session_ticket(&mut self, body: &[u8]) -> Result<HandshakeEvent, TlsError> {
        self.expect_flight(ServerFlight::WaitChangeCipherSpec, "NewSessionTicket")?;
        let nst = decode_new_session_ticket(body)?;
        trace!(
            "session ticket of {} bytes, lifetime {}s",
            nst.ticket.len(),
            nst.lifetime_hint
        );
        self.new_ticket = Some(nst.ticket);
        Ok(HandshakeEvent::None)
    }

    /// The server's ChangeCipherSpec. Legal once the master secret exists
    /// and, on a full handshake, after the client Finished went out.
    pub fn process_change_cipher_spec(&mut self) -> Result<(), TlsError> {
        self.expect_flight(ServerFlight::WaitChangeCipherSpec, "ChangeCipherSpec")?;
        self.require_master_secret()?;
        if !self.resumed && !self.client_finished_sent {
            return Err(TlsError::ProtocolViolation(
                "ChangeCipherSpec before client Finished".into(),
            ));
        }
        self.flight = ServerFlight::WaitFinished;
        Ok(())
    }

    fn process_finished(&mut self, body: &[u8]) -> Result<HandshakeEvent, TlsError> {
        self.expect_flight(ServerFlight::WaitFinished, "Finished")?;
        let (version, params) = self.negotiated()?;
        let received = decode_finished(body)?;
        let expected = compute_verify_data(
            params.prf_algorithm(version),
            self.require_master_secret()?,
            "server finished",
            &self.transcript.current_hash()?,
        )?;
        if !verify_data_matches(&expected, &received) {
            return Err(TlsError::AuthFailed("server Finished verification failed".into()));
        }
        self.server_verify = Some(expected);
        self.flight = ServerFlight::Complete;
        debug!("server Finished verified");
        Ok(HandshakeEvent::ServerFinished)
    }

    // ------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------

    /// Consume a successful validation: check the certified name, adopt the
    /// leaf key and verify the ServerKeyExchange signature with it.
    pub fn validation_complete(&mut self, validated: &ValidatedCertificate) -> Result<(), TlsError> {
        self.expect_flight(ServerFlight::Validating, "validation result")?;
        let (_, params) = self.negotiated()?;

        if !check_name(&validated.names, &self.server_name) {
            return Err(TlsError::CertVerifyFailed(format!(
                "certificate is not valid for {}",
                self.server_name
            )));
        }
        let key = PeerPublicKey::from_spki_der(&validated.spki_der)?;
        let expected_alg = match params.auth_alg {
            AuthAlg::Rsa => SignatureAlgorithm::Rsa,
            AuthAlg::Ecdsa => SignatureAlgorithm::Ecdsa,
            AuthAlg::Null => {
                return Err(TlsError::Unsupported("anonymous cipher suite".into()));
            }
        };
        if key.algorithm() != expected_alg {
            return Err(TlsError::AuthFailed(format!(
                "server key is {:?}, cipher suite needs {:?}",
                key.algorithm(),
                expected_alg
            )));
        }

        if let Some(ske) = &self.server_key_exchange {
            let signed_data = ske_signed_data(&self.client_random, &self.server_random, &ske.params_raw);
            verify_server_key_exchange(
                &key,
                &ske.signed,
                &self.config.signature_algorithms,
                &signed_data,
            )?;
            trace!("ServerKeyExchange signature verified");
        }
        debug!("server certificate accepted for {}", self.server_name);
        self.peer_key = Some(key);
        self.flight = ServerFlight::WaitChangeCipherSpec;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Client flight
    // ------------------------------------------------------------------

    /// Certificate carrying the client chain.
    pub fn build_certificate(&mut self) -> Result<Vec<u8>, TlsError> {
        let chain = self
            .client_chain
            .as_ref()
            .ok_or_else(|| TlsError::ProtocolViolation("no client certificate requested".into()))?;
        let msg = encode_certificate(chain);
        self.transcript.update(&msg);
        Ok(msg)
    }

    /// ClientKeyExchange for the negotiated exchange. Derives the master
    /// secret as a side effect.
    pub fn build_client_key_exchange(&mut self) -> Result<Vec<u8>, TlsError> {
        let (version, params) = self.negotiated()?;
        if self.peer_key.is_none() {
            return Err(TlsError::ProtocolViolation(
                "server certificate not yet validated".into(),
            ));
        }
        let random = &*self.config.random;
        let output = match (params.kx_alg, &self.server_key_exchange) {
            (KeyExchangeAlg::Rsa, _) => match &self.peer_key {
                Some(PeerPublicKey::Rsa(key)) => {
                    rsa_client_key_exchange(key, self.offered_version, random)?
                }
                _ => return Err(TlsError::AuthFailed("no trusted RSA server key".into())),
            },
            (KeyExchangeAlg::Dhe, Some(ske)) => match &ske.params {
                ServerKeyParams::Dhe { p, g, ys } => dhe_client_key_exchange(p, g, ys, random)?,
                _ => return Err(TlsError::ProtocolViolation("DH parameters expected".into())),
            },
            (KeyExchangeAlg::Ecdhe, Some(ske)) => match &ske.params {
                ServerKeyParams::Ecdhe { group, public } => {
                    ecdhe_client_key_exchange(*group, public)?
                }
                _ => return Err(TlsError::ProtocolViolation("EC parameters expected".into())),
            },
            (KeyExchangeAlg::Dhe | KeyExchangeAlg::Ecdhe, None) => {
                return Err(TlsError::ProtocolViolation("missing ServerKeyExchange".into()))
            }
            (KeyExchangeAlg::Null, _) => {
                return Err(TlsError::Unsupported("null key exchange".into()))
            }
        };
        let master_secret = derive_master_secret(
            params.prf_algorithm(version),
            &output.pre_master_secret,
            &self.client_random,
            &self.server_random,
        )?;
        keylog::log_master_secret(&self.config, &self.client_random, master_secret.as_bytes());
        self.master_secret = Some(master_secret);

        let msg = encode_client_key_exchange(&output.message);
        self.transcript.update(&msg);
        Ok(msg)
    }

    /// CertificateVerify signing the transcript so far with the client key.
    pub fn build_certificate_verify(&mut self) -> Result<Vec<u8>, TlsError> {
        let (version, params) = self.negotiated()?;
        let key = self
            .config
            .private_key
            .clone()
            .ok_or_else(|| TlsError::AuthFailed("no client key".into()))?;
        let key_alg = private_key_algorithm(&key);

        let (scheme, hash) = if version >= TlsVersion::Tls12 {
            let server_schemes = self
                .certificate_request
                .as_ref()
                .map(|r| r.sig_hash_algs.as_slice())
                .unwrap_or_default();
            let scheme =
                select_certificate_verify_scheme(key_alg, params.handshake_hash(version), server_schemes)?;
            let (_, hash) = scheme.parts()?;
            (Some(scheme), hash)
        } else {
            (None, legacy_signature_hash(key_alg))
        };
        let hashed = self.transcript.hash_with(hash)?;
        let signature = sign_digest(&key, hash, &hashed)?;
        let msg = encode_certificate_verify(&DigitallySigned { scheme, signature });
        self.transcript.update(&msg);
        Ok(msg)
    }

    /// Pending (transmit, receive) cipher states from the master secret.
    pub fn cipher_states(&self) -> Result<(CipherState, CipherState), TlsError> {
        let (version, params) = self.negotiated()?;
        let kb = derive_key_block(
            params.prf_algorithm(version),
            self.require_master_secret()?,
            &self.server_random,
            &self.client_random,
            &params,
        )?;
        let tx = CipherState::new(
            &params,
            &kb.client_write_key,
            &kb.client_write_mac_key,
            &kb.client_write_iv,
        )?;
        let rx = CipherState::new(
            &params,
            &kb.server_write_key,
            &kb.server_write_mac_key,
            &kb.server_write_iv,
        )?;
        Ok((tx, rx))
    }

    /// The client Finished over the transcript so far.
    pub fn build_finished(&mut self) -> Result<Vec<u8>, TlsError> {
        let (version, params) = self.negotiated()?;
        let verify_data = compute_verify_data(
            params.prf_algorithm(version),
            self.require_master_secret()?,
            "client finished",
            &self.transcript.current_hash()?,
        )?;
        let msg = encode_finished(&verify_data);
        self.transcript.update(&msg);
        self.client_verify = Some(verify_data);
        self.client_finished_sent = true;
        Ok(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaticCertificateStore;
    use crate::crypt::NamedGroup;
    use crate::extensions::Extension;
    use crate::handshake::codec::{
        decode_client_hello, encode_new_session_ticket, encode_server_hello,
        encode_server_hello_done, split_handshake_message, NewSessionTicket,
    };
    use crate::handshake::codec12::encode_certificate_request;
    use crate::testutil::client_rsa_key;
    use nbtls_types::ErrorKind;

    fn msg(raw: Vec<u8>) -> HandshakeMessage {
        split_handshake_message(&raw).unwrap().unwrap().0
    }

    fn config() -> TlsConfig {
        TlsConfig::builder().server_name("boot.example").build()
    }

    fn started(config: TlsConfig) -> ClientHandshake {
        let mut hs = ClientHandshake::new(Arc::new(config), "boot.example");
        hs.restart().unwrap();
        hs
    }

    fn server_hello(version: u16, suite: CipherSuite, session_id: &[u8]) -> ServerHello {
        ServerHello {
            version,
            random: [0x55; 32],
            session_id: session_id.to_vec(),
            cipher_suite: suite,
            compression_method: 0,
            extensions: Some(vec![build_renegotiation_info(&[])]),
        }
    }

    fn hello(hs: &mut ClientHandshake, sh: &ServerHello) -> Result<HandshakeEvent, TlsError> {
        hs.build_client_hello(&CachedSession::default()).unwrap();
        hs.handle_message(&msg(encode_server_hello(sh)))
    }

    #[test]
    fn test_client_hello_layout() {
        let mut hs = started(config());
        let raw = hs.build_client_hello(&CachedSession::default()).unwrap();
        let ch = decode_client_hello(&msg(raw).body).unwrap();
        assert_eq!(ch.version, 0x0303);
        assert_eq!(&ch.random, hs.client_random());
        // Without a cached session the client random is the offered id.
        assert_eq!(ch.session_id, hs.client_random().to_vec());
        assert!(!ch.cipher_suites.is_empty());
        let types: Vec<ExtensionType> = ch.extensions.iter().map(|e| e.extension_type).collect();
        assert_eq!(
            types,
            vec![
                ExtensionType::SERVER_NAME,
                ExtensionType::MAX_FRAGMENT_LENGTH,
                ExtensionType::SIGNATURE_ALGORITHMS,
                ExtensionType::RENEGOTIATION_INFO,
                ExtensionType::SESSION_TICKET,
                ExtensionType::SUPPORTED_GROUPS,
            ]
        );
        let reneg = find_extension(&ch.extensions, ExtensionType::RENEGOTIATION_INFO).unwrap();
        assert_eq!(reneg.data, vec![0]);
    }

    #[test]
    fn test_client_hello_without_groups_or_mfl() {
        let cfg = TlsConfig::builder()
            .server_name("boot.example")
            .supported_groups(&[])
            .request_max_fragment_length(false)
            .build();
        let mut hs = started(cfg);
        let raw = hs.build_client_hello(&CachedSession::default()).unwrap();
        let ch = decode_client_hello(&msg(raw).body).unwrap();
        assert!(find_extension(&ch.extensions, ExtensionType::SUPPORTED_GROUPS).is_none());
        assert!(find_extension(&ch.extensions, ExtensionType::MAX_FRAGMENT_LENGTH).is_none());
    }

    #[test]
    fn test_client_random_starts_with_time() {
        let hs = started(config());
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as u32;
        let stamped = u32::from_be_bytes(hs.client_random()[..4].try_into().unwrap());
        assert!(now.abs_diff(stamped) < 60);
    }

    #[test]
    fn test_client_hello_offers_cached_session() {
        let mut hs = started(config());
        let cached = CachedSession {
            id: vec![0xAB; 16],
            ticket: vec![1, 2, 3],
            master_secret: Some(MasterSecret::from_bytes(&[7; 48]).unwrap()),
        };
        let raw = hs.build_client_hello(&cached).unwrap();
        let ch = decode_client_hello(&msg(raw).body).unwrap();
        assert_eq!(ch.session_id, vec![0xAB; 16]);
        let ticket = find_extension(&ch.extensions, ExtensionType::SESSION_TICKET).unwrap();
        assert_eq!(ticket.data, vec![1, 2, 3]);
    }

    #[test]
    fn test_server_hello_full_handshake() {
        let mut hs = started(config());
        let sh = server_hello(0x0303, CipherSuite::TLS_RSA_WITH_AES_128_GCM_SHA256, &[9; 32]);
        let ev = hello(&mut hs, &sh).unwrap();
        assert_eq!(ev, HandshakeEvent::ServerHello { resumed: false });
        assert_eq!(hs.version(), Some(TlsVersion::Tls12));
        assert_eq!(hs.cipher_suite(), Some(CipherSuite::TLS_RSA_WITH_AES_128_GCM_SHA256));
        assert_eq!(hs.session_id(), &[9; 32]);
        assert_eq!(hs.flight(), ServerFlight::WaitCertificate);
        assert!(hs.secure_renegotiation());
        assert_eq!(hs.max_fragment_size(), None);
    }

    #[test]
    fn test_server_hello_empty_id_keeps_offered_id() {
        let mut hs = started(config());
        let sh = server_hello(0x0303, CipherSuite::TLS_RSA_WITH_AES_128_CBC_SHA, &[]);
        hello(&mut hs, &sh).unwrap();
        assert_eq!(hs.session_id(), hs.client_random().as_slice());
    }

    #[test]
    fn test_server_hello_resumes_matching_id() {
        let mut hs = started(config());
        let cached = CachedSession {
            id: vec![0xAB; 32],
            ticket: Vec::new(),
            master_secret: Some(MasterSecret::from_bytes(&[7; 48]).unwrap()),
        };
        hs.build_client_hello(&cached).unwrap();
        let sh = server_hello(0x0303, CipherSuite::TLS_RSA_WITH_AES_128_CBC_SHA256, &[0xAB; 32]);
        let ev = hs.handle_message(&msg(encode_server_hello(&sh))).unwrap();
        assert_eq!(ev, HandshakeEvent::ServerHello { resumed: true });
        assert!(hs.is_resumed());
        assert_eq!(hs.master_secret().unwrap().as_bytes(), &[7; 48]);
        assert_eq!(hs.flight(), ServerFlight::WaitChangeCipherSpec);
        assert!(hs.cipher_states().is_ok());
        // The server may send its CCS right away on resumption.
        hs.process_change_cipher_spec().unwrap();
        assert_eq!(hs.flight(), ServerFlight::WaitFinished);
    }

    #[test]
    fn test_server_hello_new_id_declines_resumption() {
        let mut hs = started(config());
        let cached = CachedSession {
            id: vec![0xAB; 32],
            ticket: Vec::new(),
            master_secret: Some(MasterSecret::from_bytes(&[7; 48]).unwrap()),
        };
        hs.build_client_hello(&cached).unwrap();
        let sh = server_hello(0x0303, CipherSuite::TLS_RSA_WITH_AES_128_CBC_SHA256, &[0xCD; 32]);
        let ev = hs.handle_message(&msg(encode_server_hello(&sh))).unwrap();
        assert_eq!(ev, HandshakeEvent::ServerHello { resumed: false });
        assert!(hs.master_secret().is_none());
        assert_eq!(hs.session_id(), &[0xCD; 32]);
    }

    #[test]
    fn test_server_hello_version_rules() {
        let cfg = TlsConfig::builder()
            .server_name("boot.example")
            .min_version(TlsVersion::Tls12)
            .build();
        let mut hs = started(cfg);
        let sh = server_hello(0x0302, CipherSuite::TLS_RSA_WITH_AES_128_CBC_SHA, &[]);
        assert_eq!(hello(&mut hs, &sh).unwrap_err().kind(), ErrorKind::Unsupported);

        let mut hs = started(config());
        let sh = server_hello(0x0304, CipherSuite::TLS_RSA_WITH_AES_128_CBC_SHA, &[]);
        assert_eq!(hello(&mut hs, &sh).unwrap_err().kind(), ErrorKind::Protocol);

        let cfg = TlsConfig::builder()
            .server_name("boot.example")
            .max_version(TlsVersion::Tls11)
            .build();
        let mut hs = started(cfg);
        let sh = server_hello(0x0303, CipherSuite::TLS_RSA_WITH_AES_128_CBC_SHA, &[]);
        assert_eq!(hello(&mut hs, &sh).unwrap_err().kind(), ErrorKind::Protocol);

        let mut hs = started(config());
        let sh = server_hello(0x0302, CipherSuite::TLS_RSA_WITH_AES_128_CBC_SHA, &[]);
        hello(&mut hs, &sh).unwrap();
        assert_eq!(hs.version(), Some(TlsVersion::Tls11));
    }

    #[test]
    fn test_server_hello_suite_rules() {
        let mut hs = started(config());
        let sh = server_hello(0x0303, CipherSuite(0x0005), &[]);
        assert_eq!(hello(&mut hs, &sh).unwrap_err().kind(), ErrorKind::Unsupported);

        let cfg = TlsConfig::builder()
            .server_name("boot.example")
            .cipher_suites(&[CipherSuite::TLS_RSA_WITH_AES_128_CBC_SHA])
            .build();
        let mut hs = started(cfg);
        let sh = server_hello(0x0303, CipherSuite::TLS_RSA_WITH_AES_256_CBC_SHA, &[]);
        assert_eq!(hello(&mut hs, &sh).unwrap_err().kind(), ErrorKind::Unsupported);

        // GCM offered at TLS 1.2 but selected with TLS 1.1.
        let mut hs = started(config());
        let sh = server_hello(0x0302, CipherSuite::TLS_RSA_WITH_AES_128_GCM_SHA256, &[]);
        assert_eq!(hello(&mut hs, &sh).unwrap_err().kind(), ErrorKind::Unsupported);

        let mut hs = started(config());
        let mut sh = server_hello(0x0303, CipherSuite::TLS_RSA_WITH_AES_128_CBC_SHA, &[]);
        sh.compression_method = 1;
        assert_eq!(hello(&mut hs, &sh).unwrap_err().kind(), ErrorKind::Unsupported);
    }

    #[test]
    fn test_server_hello_extension_checks() {
        let mut hs = started(config());
        let mut sh = server_hello(0x0303, CipherSuite::TLS_RSA_WITH_AES_128_CBC_SHA, &[]);
        sh.extensions = Some(vec![build_renegotiation_info(&[1; 24])]);
        assert_eq!(hello(&mut hs, &sh).unwrap_err().kind(), ErrorKind::Authentication);

        let mut hs = started(config());
        sh.extensions = Some(vec![build_max_fragment_length(MaxFragmentLength::Bits9)]);
        assert_eq!(hello(&mut hs, &sh).unwrap_err().kind(), ErrorKind::Protocol);

        let mut hs = started(config());
        sh.extensions = Some(vec![
            build_max_fragment_length(MaxFragmentLength::Bits12),
            Extension::new(ExtensionType::SESSION_TICKET, Vec::new()),
            Extension::new(ExtensionType(0x1234), vec![1, 2, 3]),
        ]);
        hello(&mut hs, &sh).unwrap();
        assert_eq!(hs.max_fragment_size(), Some(4096));
        assert!(!hs.secure_renegotiation());

        let mut hs = started(config());
        sh.extensions = Some(vec![Extension::new(ExtensionType::SESSION_TICKET, vec![0])]);
        assert_eq!(hello(&mut hs, &sh).unwrap_err().kind(), ErrorKind::Malformed);

        let mut hs = started(config());
        sh.extensions = None;
        hello(&mut hs, &sh).unwrap();
    }

    #[test]
    fn test_message_ordering() {
        let mut hs = started(config());
        hs.build_client_hello(&CachedSession::default()).unwrap();
        let err = hs.handle_message(&msg(encode_server_hello_done())).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);

        let mut hs = started(config());
        let sh = server_hello(0x0303, CipherSuite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256, &[]);
        hello(&mut hs, &sh).unwrap();
        hs.handle_message(&msg(encode_certificate(&[vec![0x30, 0x00]]))).unwrap();
        assert_eq!(hs.flight(), ServerFlight::WaitServerKeyExchange);
        // ServerKeyExchange is mandatory for ECDHE.
        let err = hs.handle_message(&msg(encode_server_hello_done())).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);

        let mut hs = started(config());
        let sh = server_hello(0x0303, CipherSuite::TLS_RSA_WITH_AES_128_GCM_SHA256, &[]);
        hello(&mut hs, &sh).unwrap();
        hs.handle_message(&msg(encode_certificate(&[vec![0x30, 0x00]]))).unwrap();
        let ev = hs.handle_message(&msg(encode_server_hello_done())).unwrap();
        assert_eq!(ev, HandshakeEvent::StartValidation);
        assert_eq!(hs.flight(), ServerFlight::Validating);
        assert_eq!(hs.server_certificates().len(), 1);
        assert!(hs.process_change_cipher_spec().is_err());
    }

    #[test]
    fn test_empty_certificate_chain_fails() {
        let mut hs = started(config());
        let sh = server_hello(0x0303, CipherSuite::TLS_RSA_WITH_AES_128_GCM_SHA256, &[]);
        hello(&mut hs, &sh).unwrap();
        let err = hs.handle_message(&msg(encode_certificate(&[]))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authentication);
    }

    #[test]
    fn test_unknown_and_client_only_messages() {
        let mut hs = started(config());
        hs.build_client_hello(&CachedSession::default()).unwrap();
        let unknown = msg(vec![99, 0, 0, 1, 0]);
        assert_eq!(hs.handle_message(&unknown).unwrap(), HandshakeEvent::None);
        let hello_request = msg(vec![0, 0, 0, 0]);
        assert_eq!(hs.handle_message(&hello_request).unwrap(), HandshakeEvent::None);
        let client_kx = msg(vec![16, 0, 0, 0]);
        assert_eq!(hs.handle_message(&client_kx).unwrap_err().kind(), ErrorKind::Protocol);
    }

    #[test]
    fn test_certificate_request_needs_key_and_chain() {
        let request = CertificateRequest {
            cert_types: vec![1],
            sig_hash_algs: vec![crate::crypt::SignatureScheme::RSA_PKCS1_SHA256],
            ca_names: Vec::new(),
        };
        let raw = encode_certificate_request(&request, TlsVersion::Tls12);

        let run = |cfg: TlsConfig| {
            let mut hs = started(cfg);
            let sh = server_hello(0x0303, CipherSuite::TLS_RSA_WITH_AES_128_GCM_SHA256, &[]);
            hello(&mut hs, &sh).unwrap();
            hs.handle_message(&msg(encode_certificate(&[vec![0x30, 0x00]]))).unwrap();
            let res = hs.handle_message(&msg(raw.clone()));
            (hs, res)
        };

        let (_, res) = run(config());
        assert_eq!(res.unwrap_err().kind(), ErrorKind::Authentication);

        let key = Arc::new(client_rsa_key());
        let (_, res) = run(
            TlsConfig::builder()
                .server_name("boot.example")
                .private_key(Arc::clone(&key))
                .build(),
        );
        assert_eq!(res.unwrap_err().kind(), ErrorKind::Authentication);

        let spki = private_key_spki(&key).unwrap();
        let store = StaticCertificateStore::new().add(spki, vec![vec![0x30, 0x01]]);
        let (hs, res) = run(
            TlsConfig::builder()
                .server_name("boot.example")
                .private_key(key)
                .certificate_store(Arc::new(store))
                .build(),
        );
        res.unwrap();
        assert!(hs.client_auth_requested());
    }

    #[test]
    fn test_new_session_ticket_only_after_client_flight() {
        let mut hs = started(config());
        let sh = server_hello(0x0303, CipherSuite::TLS_RSA_WITH_AES_128_GCM_SHA256, &[]);
        hello(&mut hs, &sh).unwrap();
        let nst = encode_new_session_ticket(&NewSessionTicket {
            lifetime_hint: 300,
            ticket: vec![5; 8],
        });
        assert_eq!(hs.handle_message(&msg(nst)).unwrap_err().kind(), ErrorKind::Protocol);
    }

    #[test]
    fn test_restart_keeps_negotiated_version() {
        let mut hs = started(config());
        let sh = server_hello(0x0302, CipherSuite::TLS_RSA_WITH_AES_128_CBC_SHA, &[]);
        hello(&mut hs, &sh).unwrap();
        let first_random = *hs.client_random();
        hs.restart().unwrap();
        assert_eq!(hs.offered_version(), TlsVersion::Tls11);
        assert_ne!(hs.client_random(), &first_random);
        assert_eq!(hs.flight(), ServerFlight::WaitServerHello);
    }

    #[test]
    fn test_unoffered_curve_rejected() {
        let cfg = TlsConfig::builder()
            .server_name("boot.example")
            .supported_groups(&[NamedGroup::X25519])
            .build();
        let mut hs = started(cfg);
        let sh = server_hello(0x0303, CipherSuite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256, &[]);
        hello(&mut hs, &sh).unwrap();
        hs.handle_message(&msg(encode_certificate(&[vec![0x30, 0x00]]))).unwrap();
        let ske = crate::handshake::codec12::encode_server_key_exchange(
            &ServerKeyParams::Ecdhe {
                group: NamedGroup::SECP256R1,
                public: vec![4; 65],
            },
            &DigitallySigned {
                scheme: Some(crate::crypt::SignatureScheme::RSA_PKCS1_SHA256),
                signature: vec![0; 128],
            },
        );
        let err = hs.handle_message(&msg(ske)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
    }
}
