use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;

use serde_derive::{Deserialize, Serialize};
use ::time::{Duration, OffsetDateTime, PrimitiveDateTime};

pub const DEFAULT_FAILURE_MODE: FailureMode = FailureMode::FailClosed;
pub const DEFAULT_CRL_TIMEOUT_MSECS: u64 = 10_000;
pub const DEFAULT_CRL_CACHE_TTL_MSECS: u64 = 86_400_000;
pub const DEFAULT_CRL_GRACE_PERIOD_MSECS: u64 = 86_400_000;
pub const DEFAULT_OCSP_TIMEOUT_MSECS: u64 = 5_000;
pub const DEFAULT_OCSP_CACHE_TTL_MSECS: u64 = 3_600_000;
pub const DEFAULT_OCSP_ERROR_CACHE_TTL_MSECS: u64 = 300_000;
/// Upper bound accepted for configured durations (one year)
pub const MAX_DURATION_MSECS: u64 = 31_536_000_000;

/// Configured milliseconds as a [`Duration`], saturating at [`MAX_DURATION_MSECS`]
pub fn millis_to_duration(millis: u64) -> Duration {
    Duration::milliseconds(millis.min(MAX_DURATION_MSECS) as i64)
}

/// `datetime + duration`, saturating at the latest representable datetime
pub fn saturating_add(datetime: OffsetDateTime, duration: Duration) -> OffsetDateTime {
    datetime
        .checked_add(duration)
        .unwrap_or_else(|| PrimitiveDateTime::MAX.assume_utc())
}

/// Policy applied when revocation status cannot be determined
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum FailureMode {
    /// Allow the connection
    FailOpen,
    /// Reject the connection
    #[default]
    FailClosed,
}

impl FromStr for FailureMode {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "fail-open" => Ok(FailureMode::FailOpen),
            "fail-closed" => Ok(FailureMode::FailClosed),
            _ => Err(()),
        }
    }
}

impl Display for FailureMode {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            FailureMode::FailOpen => write!(f, "fail-open"),
            FailureMode::FailClosed => write!(f, "fail-closed"),
        }
    }
}

/// CRL checking configuration (durations in milliseconds)
#[derive(Clone, Debug, PartialEq)]
pub struct CrlConfig {
    pub enabled: bool,
    pub timeout: u64,
    pub cache_ttl: u64,
    pub failure_mode: FailureMode,
    pub grace_period: u64,
}

impl CrlConfig {
    /// Defaulted CRL configuration inheriting given failure mode
    pub fn with_failure_mode(failure_mode: FailureMode) -> Self {
        Self {
            enabled: true,
            timeout: DEFAULT_CRL_TIMEOUT_MSECS,
            cache_ttl: DEFAULT_CRL_CACHE_TTL_MSECS,
            failure_mode,
            grace_period: DEFAULT_CRL_GRACE_PERIOD_MSECS,
        }
    }
}

impl Default for CrlConfig {
    fn default() -> Self {
        Self::with_failure_mode(DEFAULT_FAILURE_MODE)
    }
}

/// OCSP checking configuration (durations in milliseconds)
#[derive(Clone, Debug, PartialEq)]
pub struct OcspConfig {
    pub enabled: bool,
    pub timeout: u64,
    pub cache_ttl: u64,
    pub error_cache_ttl: u64,
    pub failure_mode: FailureMode,
}

impl OcspConfig {
    /// Defaulted OCSP configuration inheriting given failure mode
    pub fn with_failure_mode(failure_mode: FailureMode) -> Self {
        Self {
            enabled: true,
            timeout: DEFAULT_OCSP_TIMEOUT_MSECS,
            cache_ttl: DEFAULT_OCSP_CACHE_TTL_MSECS,
            error_cache_ttl: DEFAULT_OCSP_ERROR_CACHE_TTL_MSECS,
            failure_mode,
        }
    }
}

impl Default for OcspConfig {
    fn default() -> Self {
        Self::with_failure_mode(DEFAULT_FAILURE_MODE)
    }
}

/// Resolved (enabled) certificate verification configuration
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VerificationConfig {
    pub failure_mode: FailureMode,
    pub crl: CrlConfig,
    pub ocsp: OcspConfig,
}

/// Revocation checking method
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VerificationMethod {
    Crl,
    Ocsp,
    Disabled,
}

impl Display for VerificationMethod {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            VerificationMethod::Crl => write!(f, "crl"),
            VerificationMethod::Ocsp => write!(f, "ocsp"),
            VerificationMethod::Disabled => write!(f, "disabled"),
        }
    }
}

/// Revocation status of a single certificate (as stored in the cache)
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RevocationStatus {
    Good,
    Revoked,
    Unknown,
}

/// Status reported in a [`VerificationResult`]
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum VerificationStatus {
    Good,
    Revoked,
    Unknown,
    Disabled,
    NoCrlDistributionPoints,
    NoOcspUrls,
    NoIssuerCert,
    Error,
    ErrorAllowed,
    NoVerificationAvailable,
    VerificationUnavailableAllowed,
    CrlSignatureInvalid,
}

impl From<RevocationStatus> for VerificationStatus {
    fn from(status: RevocationStatus) -> Self {
        match status {
            RevocationStatus::Good => VerificationStatus::Good,
            RevocationStatus::Revoked => VerificationStatus::Revoked,
            RevocationStatus::Unknown => VerificationStatus::Unknown,
        }
    }
}

/// Outcome of a verification, consumed to accept/reject a TLS handshake
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    pub valid: bool,
    pub status: VerificationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<VerificationMethod>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl VerificationResult {
    /// Create result with no optional fields set
    pub fn new(valid: bool, status: VerificationStatus) -> Self {
        Self {
            valid,
            status,
            method: None,
            cached: None,
            error: None,
            reason: None,
        }
    }

    pub fn with_method(mut self, method: VerificationMethod) -> Self {
        self.method = Some(method);
        self
    }

    pub fn with_cached(mut self, cached: bool) -> Self {
        self.cached = Some(cached);
        self
    }

    pub fn with_error(mut self, error: &str) -> Self {
        self.error = Some(error.to_string());
        self
    }

    pub fn with_reason(mut self, reason: Option<String>) -> Self {
        self.reason = reason;
        self
    }
}

/// Per-certificate cached revocation status
#[derive(Clone, Debug, PartialEq)]
pub struct CertificateCacheEntry {
    /// Method-tagged cache key
    pub certificate_id: String,
    pub status: RevocationStatus,
    pub reason: Option<String>,
    pub checked_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
    pub method: VerificationMethod,
    /// Distribution point or responder which produced the status
    pub source: Option<String>,
}

/// Downloaded and signature-validated CRL, keyed by distribution point
#[derive(Clone, Debug, PartialEq)]
pub struct CrlCacheEntry {
    pub distribution_point: String,
    pub issuer_dn: String,
    pub crl_blob: Vec<u8>,
    pub this_update: OffsetDateTime,
    pub next_update: OffsetDateTime,
    pub signature_valid: bool,
    pub expires_at: OffsetDateTime,
}

/// Revoked serial ingested from a CRL
#[derive(Clone, Debug, PartialEq)]
pub struct RevokedCertificateEntry {
    /// `issuerKeyId:serialNumber`
    pub composite_id: String,
    pub serial_number: String,
    pub issuer_key_id: String,
    pub revocation_date: OffsetDateTime,
    pub revocation_reason: Option<String>,
    /// Distribution point of the owning CRL
    pub crl_source: String,
    pub crl_next_update: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}

/// Peer certificate as presented by the TLS layer, with its issuer back-reference
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PeerCertificate {
    /// DER bytes
    pub raw: Option<Vec<u8>>,
    pub issuer_certificate: Option<Arc<PeerCertificate>>,
}

impl PeerCertificate {
    pub fn new(raw: Vec<u8>, issuer_certificate: Option<Arc<PeerCertificate>>) -> Self {
        Self {
            raw: Some(raw),
            issuer_certificate,
        }
    }

    /// Build linked peer certificate from DER chain (leaf first)
    pub fn from_chain(chain: &[Vec<u8>]) -> Option<Self> {
        let mut issuer: Option<Arc<PeerCertificate>> = None;
        for der in chain.iter().skip(1).rev() {
            issuer = Some(Arc::new(PeerCertificate::new(der.clone(), issuer)));
        }
        chain
            .first()
            .map(|leaf_der| PeerCertificate::new(leaf_der.clone(), issuer))
    }
}

/// Certificate (DER) paired with its issuer (DER), derived per call
#[derive(Clone, Debug, PartialEq)]
pub struct CertificateChainEntry {
    pub cert: Vec<u8>,
    pub issuer: Option<Vec<u8>>,
}

/// Cache population request. Carries everything needed to recompute a cache miss.
#[derive(Clone, Debug)]
pub enum CacheRequest {
    Crl {
        cert_der: Vec<u8>,
        issuer_der: Vec<u8>,
        config: CrlConfig,
        crl_urls: Vec<String>,
    },
    Ocsp {
        cert_der: Vec<u8>,
        issuer_der: Vec<u8>,
        config: OcspConfig,
        ocsp_urls: Vec<String>,
    },
}

impl CacheRequest {
    pub fn method(&self) -> VerificationMethod {
        match self {
            CacheRequest::Crl { .. } => VerificationMethod::Crl,
            CacheRequest::Ocsp { .. } => VerificationMethod::Ocsp,
        }
    }
}
