use std::sync::Arc;

use crate::cache::CertificateCache;
use crate::cert_utils;
use crate::config::{ConfigResolver, MtlsSettings};
use crate::crl::CrlVerifier;
use crate::http::HttpFetch;
use crate::model::{
    CertificateChainEntry, FailureMode, PeerCertificate, VerificationMethod, VerificationResult,
    VerificationStatus,
};
use crate::ocsp::OcspVerifier;
use crate::repository::Tables;
use certcheck_common::logging::{debug, info, warn};
use certcheck_common::target;

/// Top-level revocation decision for a TLS client certificate: CRL first, OCSP as fallback,
/// then the global failure mode.
pub struct CertificateVerifier {
    config_resolver: ConfigResolver,
    crl_verifier: CrlVerifier,
    ocsp_verifier: OcspVerifier,
}

impl CertificateVerifier {
    /// CertificateVerifier constructor
    ///
    /// # Arguments
    ///
    /// * `tables` - Certificate cache, CRL cache and revoked certificate tables
    /// * `http` - HTTP client for CRL downloads and OCSP requests
    ///
    /// # Returns
    ///
    /// A newly constructed [`CertificateVerifier`] object.
    ///
    pub fn new(tables: &Tables, http: Arc<dyn HttpFetch>) -> Self {
        let cache = Arc::new(CertificateCache::new(tables.certificate_cache.clone()));
        Self {
            config_resolver: ConfigResolver::new(),
            crl_verifier: CrlVerifier::new(tables, cache.clone(), http.clone()),
            ocsp_verifier: OcspVerifier::new(cache, http),
        }
    }

    /// Decide whether a peer certificate may be accepted
    ///
    /// # Arguments
    ///
    /// * `peer_certificate` - Leaf certificate with its issuer back-references
    /// * `mtls` - mTLS settings (containing the `certificateVerification` configuration)
    ///
    /// # Returns
    ///
    /// The verification result. This never fails, all errors are mapped to a result.
    ///
    pub fn verify_certificate(
        &self,
        peer_certificate: &PeerCertificate,
        mtls: &MtlsSettings,
    ) -> VerificationResult {
        let config = match self.config_resolver.resolve(mtls) {
            Some(config) => config,
            None => {
                return VerificationResult::new(true, VerificationStatus::Disabled)
                    .with_method(VerificationMethod::Disabled)
            }
        };

        let chain = cert_utils::extract_certificate_chain(peer_certificate);
        let (cert_der, issuer_der) = match chain.first() {
            Some(CertificateChainEntry {
                cert,
                issuer: Some(issuer),
            }) if chain.len() >= 2 => (cert, issuer),
            _ => {
                debug(
                    &target!(),
                    &format!("No usable issuer chain: len={}", chain.len()),
                );
                return VerificationResult::new(true, VerificationStatus::NoIssuerCert)
                    .with_method(VerificationMethod::Disabled);
            }
        };

        let urls = cert_utils::extract_revocation_urls(cert_der);

        if config.crl.enabled && !urls.crl_urls.is_empty() {
            match self.crl_verifier.verify_crl(
                cert_der,
                issuer_der,
                &config.crl,
                Some(&urls.crl_urls),
            ) {
                Ok(result)
                    if matches!(
                        result.status,
                        VerificationStatus::Good | VerificationStatus::Revoked
                    ) =>
                {
                    if !result.valid {
                        info(
                            &target!(),
                            &format!("Certificate revoked (CRL): reason={:?}", &result.reason),
                        );
                    }
                    return result;
                }
                Ok(result) => debug(
                    &target!(),
                    &format!(
                        "CRL inconclusive, continuing: status={:?}, reason={:?}",
                        &result.status, &result.reason
                    ),
                ),
                Err(err) if err.is_signature_failure() => {
                    warn(
                        &target!(),
                        &format!("Rejecting certificate, invalid CRL signature: err={:?}", &err),
                    );
                    return VerificationResult::new(false, VerificationStatus::CrlSignatureInvalid)
                        .with_method(VerificationMethod::Crl)
                        .with_error(&err.to_string());
                }
                Err(err) => warn(
                    &target!(),
                    &format!("CRL check failed, continuing: err={:?}", &err),
                ),
            }
        }

        if config.ocsp.enabled && !urls.ocsp_urls.is_empty() {
            let result = self.ocsp_verifier.verify_ocsp(
                cert_der,
                issuer_der,
                &config.ocsp,
                Some(&urls.ocsp_urls),
            );
            if !result.valid {
                info(
                    &target!(),
                    &format!(
                        "Certificate rejected (OCSP): status={:?}, reason={:?}",
                        &result.status, &result.reason
                    ),
                );
            }
            return result;
        }

        match config.failure_mode {
            FailureMode::FailClosed => {
                info(&target!(), "Certificate rejected, no verification available");
                VerificationResult::new(false, VerificationStatus::NoVerificationAvailable)
            }
            FailureMode::FailOpen => {
                VerificationResult::new(true, VerificationStatus::VerificationUnavailableAllowed)
            }
        }
    }

    /// Block until background revoked list ingestions have finished
    pub fn wait_for_ingestions(&self) {
        self.crl_verifier.wait_for_ingestions();
    }
}
