//! In-process TLS server for exercising the client end to end.

use std::collections::VecDeque;
use std::sync::Arc;

use rsa::Pkcs1v15Encrypt;

use crate::config::{OsRandom, PrivateKey, RandomSource, TlsConfig, TlsConfigBuilder};
use crate::crypt::key_schedule::{
    compute_verify_data, derive_key_block, derive_master_secret, verify_data_matches, MasterSecret,
    VERIFY_DATA_LEN,
};
use crate::crypt::provider::digest;
use crate::crypt::transcript::TranscriptHash;
use crate::crypt::{CipherSuiteParams, KeyExchangeAlg, NamedGroup, SignatureAlgorithm, SignatureScheme};
use crate::extensions::{find_extension, Extension, ExtensionType, MaxFragmentLength};
use crate::handshake::codec::{
    decode_certificate, decode_client_hello, decode_finished, encode_certificate, encode_finished,
    encode_hello_request, encode_new_session_ticket, encode_server_hello,
    encode_server_hello_done, split_handshake_message, ClientHello, NewSessionTicket, ServerHello,
    CHANGE_CIPHER_SPEC_PAYLOAD,
};
use crate::handshake::codec12::{
    decode_certificate_verify, decode_client_key_exchange, encode_certificate_request,
    encode_server_key_exchange, ske_signed_data, CertificateRequest, ClientKeyExchange,
    DigitallySigned, ServerKeyParams, CERT_TYPE_RSA_SIGN,
};
use crate::handshake::extensions_codec::{
    build_max_fragment_length, build_renegotiation_info, parse_renegotiation_info,
};
use crate::handshake::key_exchange::{DhKeyPair, EcdhKeyPair};
use crate::handshake::signing::{
    legacy_signature_hash, private_key_algorithm, private_key_spki, rsa_private_key, sign_digest,
    PeerPublicKey,
};
use crate::handshake::{HandshakeMessage, HandshakeType};
use crate::record::cipher_state::CipherState;
use crate::record::reassembly::RecordReader;
use crate::record::{ContentType, RecordLayer};
use crate::testutil::{client_rsa_key, from_hex, server_rsa_key, DH_P_1024};
use crate::validator::{InlineValidator, ValidatedCertificate};
use crate::{CipherSuite, TlsVersion};
use nbtls_types::EccCurveId;

pub(crate) const SERVER_NAME: &str = "boot.example";
pub(crate) const SERVER_CERT: &[u8] = b"scripted server certificate";
pub(crate) const CLIENT_CERT: &[u8] = b"scripted client certificate";

// ---------------------------------------------------------------------------
// Scripted server
// ---------------------------------------------------------------------------

/// Minimal TLS server built from the crate's own codec, record layer and key
/// schedule. It answers whatever the client sends and records what it saw.
pub(crate) struct ScriptedServer {
    pub(crate) version: TlsVersion,
    pub(crate) params: CipherSuiteParams,
    pub(crate) key: PrivateKey,
    pub(crate) group: NamedGroup,
    pub(crate) secure_renegotiation: bool,
    pub(crate) grant_max_fragment: bool,
    pub(crate) ticket: Option<Vec<u8>>,
    pub(crate) request_client_cert: bool,
    /// Session the server agrees to resume.
    pub(crate) cache: Option<(Vec<u8>, MasterSecret)>,

    pub(crate) record: RecordLayer,
    pub(crate) reader: RecordReader,
    pub(crate) hs_buf: Vec<u8>,
    pub(crate) transcript: TranscriptHash,
    pub(crate) client_random: [u8; 32],
    pub(crate) server_random: [u8; 32],
    pub(crate) session_id: Vec<u8>,
    pub(crate) master_secret: Option<MasterSecret>,
    pub(crate) resumed: bool,
    pub(crate) dh: Option<DhKeyPair>,
    pub(crate) ecdh: Option<EcdhKeyPair>,
    pub(crate) client_verify: Option<[u8; VERIFY_DATA_LEN]>,
    pub(crate) server_verify: Option<[u8; VERIFY_DATA_LEN]>,

    pub(crate) client_hello: Option<ClientHello>,
    pub(crate) client_certs: Vec<Vec<u8>>,
    pub(crate) cert_verify_ok: bool,
    pub(crate) client_finished_ok: bool,
    pub(crate) handshakes: usize,
    pub(crate) app_data: Vec<u8>,
    pub(crate) app_records: usize,
    pub(crate) alerts: Vec<Vec<u8>>,
    pub(crate) out: Vec<u8>,
}

impl ScriptedServer {
    pub(crate) fn new(version: TlsVersion, suite: CipherSuite, key: PrivateKey) -> Self {
        Self {
            version,
            params: CipherSuiteParams::from_suite(suite).unwrap(),
            key,
            group: NamedGroup::SECP256R1,
            secure_renegotiation: true,
            grant_max_fragment: false,
            ticket: None,
            request_client_cert: false,
            cache: None,
            record: RecordLayer::new(version.wire(), Arc::new(OsRandom)),
            reader: RecordReader::new(),
            hs_buf: Vec::new(),
            transcript: TranscriptHash::new(),
            client_random: [0; 32],
            server_random: [0; 32],
            session_id: Vec::new(),
            master_secret: None,
            resumed: false,
            dh: None,
            ecdh: None,
            client_verify: None,
            server_verify: None,
            client_hello: None,
            client_certs: Vec::new(),
            cert_verify_ok: false,
            client_finished_ok: false,
            handshakes: 0,
            app_data: Vec::new(),
            app_records: 0,
            alerts: Vec::new(),
            out: Vec::new(),
        }
    }

    pub(crate) fn rsa(version: TlsVersion, suite: CipherSuite) -> Self {
        Self::new(version, suite, server_rsa_key())
    }

    /// The session this server would resume.
    pub(crate) fn resumable(&self) -> (Vec<u8>, MasterSecret) {
        (self.session_id.clone(), self.master_secret.clone().unwrap())
    }

    pub(crate) fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.out)
    }

    pub(crate) fn receive(&mut self, wire: &[u8]) {
        for rec in self.reader.push(wire).unwrap() {
            let plaintext = self.record.open(&rec.header, &rec.body).unwrap();
            match ContentType::from_u8(rec.header.content_type).unwrap() {
                ContentType::ChangeCipherSpec => {
                    assert_eq!(plaintext, CHANGE_CIPHER_SPEC_PAYLOAD);
                    self.record.activate_rx().unwrap();
                }
                ContentType::Alert => self.alerts.push(plaintext),
                ContentType::Handshake => {
                    self.hs_buf.extend_from_slice(&plaintext);
                    while let Some((msg, used)) = split_handshake_message(&self.hs_buf).unwrap() {
                        self.hs_buf.drain(..used);
                        self.handle(&msg);
                    }
                }
                ContentType::ApplicationData => {
                    self.app_records += 1;
                    self.app_data.extend_from_slice(&plaintext);
                }
            }
        }
    }

    pub(crate) fn handle(&mut self, msg: &HandshakeMessage) {
        match msg.handshake_type().unwrap() {
            HandshakeType::ClientHello => self.on_client_hello(msg),
            HandshakeType::Certificate => {
                self.client_certs = decode_certificate(&msg.body).unwrap();
                self.transcript.update(&msg.raw);
            }
            HandshakeType::ClientKeyExchange => self.on_client_key_exchange(msg),
            HandshakeType::CertificateVerify => self.on_certificate_verify(msg),
            HandshakeType::Finished => self.on_finished(msg),
            other => panic!("client sent {other:?}"),
        }
    }

    pub(crate) fn on_client_hello(&mut self, msg: &HandshakeMessage) {
        let ch = decode_client_hello(&msg.body).unwrap();
        assert!(ch.cipher_suites.contains(&self.params.suite));
        assert!(ch.version >= self.version.wire());

        if let Some(ext) = find_extension(&ch.extensions, ExtensionType::RENEGOTIATION_INFO) {
            let previous = self.client_verify.map(|v| v.to_vec()).unwrap_or_default();
            assert_eq!(parse_renegotiation_info(&ext.data).unwrap(), previous);
        }

        self.transcript.reset();
        self.transcript.update(&msg.raw);
        self.transcript
            .select(self.params.handshake_hash(self.version));
        self.client_random = ch.random;
        OsRandom.fill(&mut self.server_random).unwrap();
        self.resumed = false;
        self.master_secret = None;

        let mut extensions = Vec::new();
        if self.secure_renegotiation {
            let mut echo = Vec::new();
            if let (Some(c), Some(s)) = (&self.client_verify, &self.server_verify) {
                echo.extend_from_slice(c);
                echo.extend_from_slice(s);
            }
            extensions.push(build_renegotiation_info(&echo));
        }
        if self.grant_max_fragment
            && find_extension(&ch.extensions, ExtensionType::MAX_FRAGMENT_LENGTH).is_some()
        {
            extensions.push(build_max_fragment_length(MaxFragmentLength::Bits12));
        }
        if self.ticket.is_some()
            && find_extension(&ch.extensions, ExtensionType::SESSION_TICKET).is_some()
        {
            extensions.push(Extension::new(
                ExtensionType::SESSION_TICKET,
                Vec::new(),
            ));
        }

        let resume = self
            .cache
            .as_ref()
            .filter(|(id, _)| !id.is_empty() && *id == ch.session_id)
            .map(|(id, ms)| (id.clone(), ms.clone()));
        if let Some((id, _)) = &resume {
            self.session_id = id.clone();
        } else {
            self.session_id = vec![0; 32];
            OsRandom.fill(&mut self.session_id).unwrap();
        }
        self.client_hello = Some(ch);

        self.send_handshake(&encode_server_hello(&ServerHello {
            version: self.version.wire(),
            random: self.server_random,
            session_id: self.session_id.clone(),
            cipher_suite: self.params.suite,
            compression_method: 0,
            extensions: Some(extensions),
        }));
        self.record.set_version(self.version.wire());

        if let Some((_, ms)) = resume {
            self.resumed = true;
            self.master_secret = Some(ms);
            self.install_keys();
            self.send_change_cipher_spec();
            self.send_finished();
            return;
        }

        self.send_handshake(&encode_certificate(&[SERVER_CERT.to_vec()]));
        match self.params.kx_alg {
            KeyExchangeAlg::Dhe => {
                let p = from_hex(DH_P_1024);
                let pair = DhKeyPair::generate(&p, &[2], &OsRandom).unwrap();
                let params = ServerKeyParams::Dhe {
                    p,
                    g: vec![2],
                    ys: pair.public_key_bytes().to_vec(),
                };
                self.dh = Some(pair);
                self.send_server_key_exchange(&params);
            }
            KeyExchangeAlg::Ecdhe => {
                let pair = EcdhKeyPair::generate(self.group).unwrap();
                let params = ServerKeyParams::Ecdhe {
                    group: self.group,
                    public: pair.public_key_bytes().to_vec(),
                };
                self.ecdh = Some(pair);
                self.send_server_key_exchange(&params);
            }
            _ => {}
        }
        if self.request_client_cert {
            self.send_handshake(&encode_certificate_request(
                &CertificateRequest {
                    cert_types: vec![CERT_TYPE_RSA_SIGN],
                    sig_hash_algs: vec![SignatureScheme::RSA_PKCS1_SHA256],
                    ca_names: Vec::new(),
                },
                self.version,
            ));
        }
        self.send_handshake(&encode_server_hello_done());
    }

    pub(crate) fn send_server_key_exchange(&mut self, params: &ServerKeyParams) {
        let data = ske_signed_data(&self.client_random, &self.server_random, &params.encode());
        let alg = private_key_algorithm(&self.key);
        let (scheme, hash) = if self.version == TlsVersion::Tls12 {
            let scheme = match (&self.key, alg) {
                (_, SignatureAlgorithm::Rsa) => SignatureScheme::RSA_PKCS1_SHA256,
                (
                    PrivateKey::Ecdsa {
                        curve_id: EccCurveId::NistP384,
                        ..
                    },
                    _,
                ) => SignatureScheme::ECDSA_SECP384R1_SHA384,
                _ => SignatureScheme::ECDSA_SECP256R1_SHA256,
            };
            (Some(scheme), scheme.parts().unwrap().1)
        } else {
            (None, legacy_signature_hash(alg))
        };
        let hashed = digest(hash, &data).unwrap();
        let signature = sign_digest(&self.key, hash, &hashed).unwrap();
        self.send_handshake(&encode_server_key_exchange(
            params,
            &DigitallySigned { scheme, signature },
        ));
    }

    pub(crate) fn on_client_key_exchange(&mut self, msg: &HandshakeMessage) {
        let pms = match decode_client_key_exchange(&msg.body, self.params.kx_alg).unwrap() {
            ClientKeyExchange::Rsa(encrypted) => {
                let PrivateKey::Rsa { n, d, e, p, q } = &self.key else {
                    panic!("RSA key exchange needs an RSA key");
                };
                let key = rsa_private_key(n, e, d, p, q).unwrap();
                let pms = key.decrypt(Pkcs1v15Encrypt, &encrypted).unwrap();
                let offered = self.client_hello.as_ref().unwrap().version;
                assert_eq!(&pms[..2], &offered.to_be_bytes());
                pms
            }
            ClientKeyExchange::Dhe(yc) => {
                self.dh.take().unwrap().compute_shared_secret(&yc).unwrap().to_vec()
            }
            ClientKeyExchange::Ecdhe(point) => {
                self.ecdh.take().unwrap().compute_shared_secret(&point).unwrap().to_vec()
            }
        };
        self.master_secret = Some(
            derive_master_secret(
                self.params.prf_algorithm(self.version),
                &pms,
                &self.client_random,
                &self.server_random,
            )
            .unwrap(),
        );
        self.install_keys();
        self.transcript.update(&msg.raw);
    }

    pub(crate) fn on_certificate_verify(&mut self, msg: &HandshakeMessage) {
        let signed = decode_certificate_verify(&msg.body, self.version).unwrap();
        let peer = PeerPublicKey::from_spki_der(&private_key_spki(&client_rsa_key()).unwrap()).unwrap();
        let hash = match signed.scheme {
            Some(scheme) => scheme.parts().unwrap().1,
            None => legacy_signature_hash(peer.algorithm()),
        };
        let hashed = self.transcript.hash_with(hash).unwrap();
        self.cert_verify_ok = peer.verify_digest(hash, &hashed, &signed.signature).is_ok();
        self.transcript.update(&msg.raw);
    }

    pub(crate) fn on_finished(&mut self, msg: &HandshakeMessage) {
        let received = decode_finished(&msg.body).unwrap();
        let expected = compute_verify_data(
            self.params.prf_algorithm(self.version),
            self.master_secret.as_ref().unwrap(),
            "client finished",
            &self.transcript.current_hash().unwrap(),
        )
        .unwrap();
        self.client_finished_ok = verify_data_matches(&expected, &received);
        self.client_verify = Some(expected);
        self.transcript.update(&msg.raw);
        self.handshakes += 1;
        if !self.resumed {
            if let Some(ticket) = self.ticket.clone() {
                self.send_handshake(&encode_new_session_ticket(&NewSessionTicket {
                    lifetime_hint: 300,
                    ticket,
                }));
            }
            self.send_change_cipher_spec();
            self.send_finished();
        }
    }

    pub(crate) fn install_keys(&mut self) {
        let kb = derive_key_block(
            self.params.prf_algorithm(self.version),
            self.master_secret.as_ref().unwrap(),
            &self.server_random,
            &self.client_random,
            &self.params,
        )
        .unwrap();
        let tx = CipherState::new(
            &self.params,
            &kb.server_write_key,
            &kb.server_write_mac_key,
            &kb.server_write_iv,
        )
        .unwrap();
        let rx = CipherState::new(
            &self.params,
            &kb.client_write_key,
            &kb.client_write_mac_key,
            &kb.client_write_iv,
        )
        .unwrap();
        self.record.set_pending(tx, rx);
    }

    pub(crate) fn send_handshake(&mut self, msg: &[u8]) {
        self.transcript.update(msg);
        let wire = self.record.seal(ContentType::Handshake, msg).unwrap();
        self.out.extend_from_slice(&wire);
    }

    pub(crate) fn send_change_cipher_spec(&mut self) {
        let wire = self
            .record
            .seal(ContentType::ChangeCipherSpec, &CHANGE_CIPHER_SPEC_PAYLOAD)
            .unwrap();
        self.out.extend_from_slice(&wire);
        self.record.activate_tx().unwrap();
    }

    pub(crate) fn send_finished(&mut self) {
        let verify = compute_verify_data(
            self.params.prf_algorithm(self.version),
            self.master_secret.as_ref().unwrap(),
            "server finished",
            &self.transcript.current_hash().unwrap(),
        )
        .unwrap();
        self.server_verify = Some(verify);
        self.send_handshake(&encode_finished(&verify));
    }

    pub(crate) fn send_hello_request(&mut self) {
        let wire = self
            .record
            .seal(ContentType::Handshake, &encode_hello_request())
            .unwrap();
        self.out.extend_from_slice(&wire);
    }

    pub(crate) fn send_app_data(&mut self, data: &[u8]) {
        let wire = self.record.seal(ContentType::ApplicationData, data).unwrap();
        self.out.extend_from_slice(&wire);
    }

    pub(crate) fn send_alert(&mut self, level: u8, description: u8) {
        let wire = self.record.seal(ContentType::Alert, &[level, description]).unwrap();
        self.out.extend_from_slice(&wire);
    }
}

/// Client configuration whose validator accepts `server_key` for
/// `boot.example`.
pub(crate) fn config_for(server_key: &PrivateKey) -> TlsConfigBuilder {
    let spki = private_key_spki(server_key).unwrap();
    TlsConfig::builder()
        .server_name(SERVER_NAME)
        .validator(Arc::new(InlineValidator::new(move |chain, _root| {
            assert_eq!(chain[0], SERVER_CERT);
            Ok(ValidatedCertificate {
                spki_der: spki.clone(),
                names: vec![SERVER_NAME.to_string()],
            })
        })))
}

/// Byte-stream transport whose far end is a [`ScriptedServer`].
///
/// Writes are handed to the server immediately. Reads return whatever the
/// server has produced, at most `chunk` bytes at a time, and report end of
/// stream once nothing is queued.
pub(crate) struct Loopback {
    pub(crate) server: ScriptedServer,
    pub(crate) inbound: VecDeque<u8>,
    pub(crate) chunk: usize,
    pub(crate) flushes: usize,
}

impl Loopback {
    pub(crate) fn new(server: ScriptedServer) -> Self {
        Self {
            server,
            inbound: VecDeque::new(),
            chunk: usize::MAX,
            flushes: 0,
        }
    }

    fn fill(&mut self, buf: &mut [u8]) -> usize {
        self.inbound.extend(self.server.take());
        let n = buf.len().min(self.chunk).min(self.inbound.len());
        for (dst, src) in buf.iter_mut().zip(self.inbound.drain(..n)) {
            *dst = src;
        }
        n
    }
}

impl std::io::Read for Loopback {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        Ok(self.fill(buf))
    }
}

impl std::io::Write for Loopback {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.server.receive(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.flushes += 1;
        Ok(())
    }
}

