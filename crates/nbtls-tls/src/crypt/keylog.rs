//! Key log output in the NSS format read by packet analyzers.
//!
//! TLS 1.1/1.2 only needs one line per negotiation:
//! `CLIENT_RANDOM <client random> <master secret>`, both in lowercase hex.

use std::fmt::Write;

use crate::config::TlsConfig;

const LABEL: &str = "CLIENT_RANDOM";

fn key_log_line(client_random: &[u8; 32], master_secret: &[u8]) -> String {
    let mut line = String::with_capacity(LABEL.len() + 2 + 2 * (32 + master_secret.len()));
    line.push_str(LABEL);
    for (i, b) in client_random.iter().chain(master_secret).enumerate() {
        if i == 0 || i == client_random.len() {
            line.push(' ');
        }
        // Writing to a String cannot fail.
        let _ = write!(line, "{b:02x}");
    }
    line
}

/// Hand the master secret to the configured key-log callback, if any.
pub fn log_master_secret(config: &TlsConfig, client_random: &[u8; 32], master_secret: &[u8]) {
    if let Some(callback) = &config.key_log_callback {
        callback(&key_log_line(client_random, master_secret));
    }
}
