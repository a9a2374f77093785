//! Shared helpers for unit tests: hex codecs and fixed test keys.

use crate::config::PrivateKey;
use nbtls_types::EccCurveId;
use rand_core::OsRng;

pub(crate) fn from_hex(s: &str) -> Vec<u8> {
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
        .collect()
}

pub(crate) fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

const SERVER_RSA_N: &str = "a46cdcc3cb3a60b80e7673c48b7a453d03771d6e6aad46331c24696216be22a9432fc47ae80a6434d23fc0bb45f2772de7184f16a41ef9f1f441a1507d76bc242b2213f1ed63f23e44943d6349164bc9fa0b8f0da295891b956d5de4f07951e8399eef5afdb19103fe32fca0a44c72aa345194f4b426b7091d23ba2ac4eb4f21";
const SERVER_RSA_D: &str = "167e01d112cae0922d004d23d4c49c16159444c566f85f02fcd58a48edbd82b64ec789041b1bd8cb54fb7d9ce09ba36bf711df37c4a9ac1d4a017454b364fba56ab5cb6cf6ccbd701de66c14798bd3c7d6db1252ab463d118c669c8b79115dc1061b67588343b9714b8c7656c7618d2347794a7624c47db26324b10012a24e55";
const SERVER_RSA_P: &str = "dac92e7fed9299b148609eb2a8fb01c4664da561f283b02248f9194063bc6811cee829990f49ad1a883ee8d42e123223663047e5059fa186e4376e79a0106caf";
const SERVER_RSA_Q: &str = "c06499a32a586816c8c94eeff8e0833a5ba951b4aa6b1a2c0e91e1b960b5c047370b7bd46af546e27e53bdcfab0468fe9b48f7693259aae2cd359f408813152f";

const CLIENT_RSA_N: &str = "dfa4ed8a647f269e926a7f1cdab69fc4978bc8619bf3d278a8d1cf3a84ce014accc582539d5cf22222129c4ccefacae953babda848a292fe0c2aca58f559fce0132e3dc20349d1217f3603fe037817b224563bda98cbad51c4523de2875039bba5a561965e1a2a7ac181cb48a9285008be4d428fb7e3f6ffe43a5834cf269aa5";
const CLIENT_RSA_D: &str = "d32092f33c2e6119ffe533bcdca8dd292d5bd3be7a0872e05f973a47e749c724832dcdfbfba9dc17e70ca4ab4a16ae6a191648a74e72d3cbab56d611a705ddd733b09abf5a4eb43d3b9ccb08b34233bd09e30841f2ae3c5a7a6c0a0c507e0de0c0e73933d875a4c85595a482852771480faf32b803bf9646d986d1455c73af7d";
const CLIENT_RSA_P: &str = "f611e98ae2825763f530f447a03d4cfd946753bf6b73a07a2a73f87dcaec5bc3a378edf48612b04f0ab2d43c163d770308d1e066ff3dbb176614883a98d04ce3";
const CLIENT_RSA_Q: &str = "e8ab5750911d8c1aa5e119f7cbddb999488f7a00034c9bec6a3c762072ada23fc3369e25c62a16b60e10e22f8f679116d199e9076a1649fbab03d5769d9858d7";

/// 1024-bit safe prime with generator 2, for DHE tests.
pub(crate) const DH_P_1024: &str = "feefdc9ba54440e3bed1a50b8f34fec0e1c20c211fd258c52641101124785b31ac50c4da509fbe78b81afd574e5e49517f9b82500b25578d504287d655f8365840fd9ecbd58aba0720aa1f7a5c833a2b9d94665dff9f7b5223b2f80f04300e117d5c484590213db4596080ab8cd4a5762ceeb5155ef38193574e703a85d0ebb7";

fn rsa_key(n: &str, d: &str, p: &str, q: &str) -> PrivateKey {
    PrivateKey::Rsa {
        n: from_hex(n),
        d: from_hex(d),
        e: vec![0x01, 0x00, 0x01],
        p: from_hex(p),
        q: from_hex(q),
    }
}

/// 1024-bit RSA key used by scripted servers.
pub(crate) fn server_rsa_key() -> PrivateKey {
    rsa_key(SERVER_RSA_N, SERVER_RSA_D, SERVER_RSA_P, SERVER_RSA_Q)
}

/// 1024-bit RSA key used for client authentication.
pub(crate) fn client_rsa_key() -> PrivateKey {
    rsa_key(CLIENT_RSA_N, CLIENT_RSA_D, CLIENT_RSA_P, CLIENT_RSA_Q)
}

/// Fresh ECDSA key on `curve_id`.
pub(crate) fn ecdsa_key(curve_id: EccCurveId) -> PrivateKey {
    let private_key = match curve_id {
        EccCurveId::NistP256 => p256::ecdsa::SigningKey::random(&mut OsRng).to_bytes().to_vec(),
        EccCurveId::NistP384 => p384::ecdsa::SigningKey::random(&mut OsRng).to_bytes().to_vec(),
    };
    PrivateKey::Ecdsa {
        curve_id,
        private_key,
    }
}
