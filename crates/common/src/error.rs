use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::io;

/// Sanctioned error type used across workspace
#[derive(Debug)]
pub enum AppError {
    /// Error containing a message
    General(String),
    /// Error with a message and an [`Error`] object
    GenWithMsgAndErr(String, Box<dyn Error + Send + Sync + 'static>),
    /// IO error
    Io(io::Error),
    /// TLS-related error
    Tls(rustls::Error),
    /// A bounded operation (network fetch, responder query) exceeded its timeout
    Timeout(String),
    /// Signature over a revocation artifact did not verify against the issuer key
    SignatureVerification(String),
}

impl AppError {
    /// Whether error represents an exceeded timeout
    ///
    /// # Returns
    ///
    /// True for [`AppError::Timeout`] errors.
    ///
    pub fn is_timeout(&self) -> bool {
        matches!(self, AppError::Timeout(_))
    }

    /// Whether error represents an integrity (signature) failure. These must never be
    /// overridden by a fail-open policy.
    ///
    /// # Returns
    ///
    /// True for [`AppError::SignatureVerification`] errors.
    ///
    pub fn is_signature_failure(&self) -> bool {
        matches!(self, AppError::SignatureVerification(_))
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            AppError::General(ref msg) => msg.fmt(f),
            AppError::GenWithMsgAndErr(ref msg, ref err) => {
                write!(f, "Error: msg={}, err={:?}", msg, err)
            }
            AppError::Io(ref err) => err.fmt(f),
            AppError::Tls(ref err) => err.fmt(f),
            AppError::Timeout(ref msg) => write!(f, "Timeout Error: msg={}", msg),
            AppError::SignatureVerification(ref msg) => {
                write!(f, "Signature Verification Error: msg={}", msg)
            }
        }
    }
}

impl Error for AppError {}

impl From<io::Error> for AppError {
    fn from(err: io::Error) -> AppError {
        AppError::Io(err)
    }
}
impl From<rustls::Error> for AppError {
    fn from(err: rustls::Error) -> AppError {
        AppError::Tls(err)
    }
}
