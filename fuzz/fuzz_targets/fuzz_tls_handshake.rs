#![no_main]
use libfuzzer_sys::fuzz_target;
use nbtls_tls::crypt::KeyExchangeAlg;
use nbtls_tls::handshake::{codec, codec12, extensions_codec};
use nbtls_tls::TlsVersion;

fuzz_target!(|data: &[u8]| {
    let _ = codec::split_handshake_message(data);
    // Also try the individual decoders on the message body
    if data.len() >= 4 {
        let body = &data[4..];
        let _ = codec::decode_server_hello(body);
        let _ = codec::decode_certificate(body);
        let _ = codec::decode_new_session_ticket(body);
        let _ = codec::decode_finished(body);
        let _ = extensions_codec::parse_extensions(body);
        for version in [TlsVersion::Tls11, TlsVersion::Tls12] {
            let _ = codec12::decode_certificate_request(body, version);
            for kx in [KeyExchangeAlg::Dhe, KeyExchangeAlg::Ecdhe] {
                let _ = codec12::decode_server_key_exchange(body, kx, version);
            }
        }
    }
});
