//! TLS alert protocol.

use nbtls_types::TlsError;

/// Alert severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AlertLevel {
    Warning = 1,
    Fatal = 2,
}

/// Alert description codes used by TLS 1.1 and 1.2 (RFC 5246 Section 7.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AlertDescription {
    CloseNotify = 0,
    UnexpectedMessage = 10,
    BadRecordMac = 20,
    /// Deprecated; replaced by BadRecordMac.
    DecryptionFailed = 21,
    RecordOverflow = 22,
    DecompressionFailure = 30,
    HandshakeFailure = 40,
    BadCertificate = 42,
    UnsupportedCertificate = 43,
    CertificateRevoked = 44,
    CertificateExpired = 45,
    CertificateUnknown = 46,
    IllegalParameter = 47,
    UnknownCa = 48,
    AccessDenied = 49,
    DecodeError = 50,
    DecryptError = 51,
    ProtocolVersion = 70,
    InsufficientSecurity = 71,
    InternalError = 80,
    UserCanceled = 90,
    NoRenegotiation = 100,
    UnsupportedExtension = 110,
    UnrecognizedName = 112,
}

impl AlertLevel {
    pub fn from_u8(v: u8) -> Result<Self, u8> {
        match v {
            1 => Ok(AlertLevel::Warning),
            2 => Ok(AlertLevel::Fatal),
            _ => Err(v),
        }
    }
}

impl AlertDescription {
    pub fn from_u8(v: u8) -> Result<Self, u8> {
        use AlertDescription::*;
        Ok(match v {
            0 => CloseNotify,
            10 => UnexpectedMessage,
            20 => BadRecordMac,
            21 => DecryptionFailed,
            22 => RecordOverflow,
            30 => DecompressionFailure,
            40 => HandshakeFailure,
            42 => BadCertificate,
            43 => UnsupportedCertificate,
            44 => CertificateRevoked,
            45 => CertificateExpired,
            46 => CertificateUnknown,
            47 => IllegalParameter,
            48 => UnknownCa,
            49 => AccessDenied,
            50 => DecodeError,
            51 => DecryptError,
            70 => ProtocolVersion,
            71 => InsufficientSecurity,
            80 => InternalError,
            90 => UserCanceled,
            100 => NoRenegotiation,
            110 => UnsupportedExtension,
            112 => UnrecognizedName,
            _ => return Err(v),
        })
    }
}

/// A TLS alert. Unknown description codes are kept raw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Alert {
    pub level: AlertLevel,
    pub description: u8,
}

impl Alert {
    pub fn close_notify() -> Self {
        Self {
            level: AlertLevel::Warning,
            description: AlertDescription::CloseNotify as u8,
        }
    }

    /// Parse an alert record payload, which must be exactly two bytes.
    pub fn parse(data: &[u8]) -> Result<Self, TlsError> {
        let [level, description] = data else {
            return Err(TlsError::InvalidMessage(format!(
                "alert payload of {} bytes",
                data.len()
            )));
        };
        let level = AlertLevel::from_u8(*level).map_err(|v| {
            TlsError::ProtocolViolation(format!("unknown alert level {v}"))
        })?;
        Ok(Self {
            level,
            description: *description,
        })
    }

    pub fn encode(&self) -> [u8; 2] {
        [self.level as u8, self.description]
    }

    pub fn is_close_notify(&self) -> bool {
        self.description == AlertDescription::CloseNotify as u8
    }

    /// Human-readable description for logs and close reasons.
    pub fn describe(&self) -> String {
        match AlertDescription::from_u8(self.description) {
            Ok(d) => format!("{d:?}"),
            Err(v) => format!("alert {v}"),
        }
    }
}
