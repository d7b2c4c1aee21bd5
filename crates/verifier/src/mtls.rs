use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

use pki_types::{CertificateDer, UnixTime};
use rustls::client::danger::HandshakeSignatureValid;
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::{
    CertificateError, DigitallySignedStruct, DistinguishedName, Error as RustlsError,
    SignatureScheme,
};

use crate::config::MtlsSettings;
use crate::model::{PeerCertificate, VerificationStatus};
use crate::verifier::CertificateVerifier;
use certcheck_common::crypto::x509;
use certcheck_common::logging::{debug, warn};
use certcheck_common::target;

/// rustls client certificate verifier adding revocation checking to a wrapped verifier (which
/// performs path validation and handshake signature checks)
pub struct RevocationClientCertVerifier {
    inner: Arc<dyn ClientCertVerifier>,
    certificate_verifier: Arc<CertificateVerifier>,
    mtls: MtlsSettings,
    trust_anchors: Vec<Vec<u8>>,
}

impl RevocationClientCertVerifier {
    /// RevocationClientCertVerifier constructor
    ///
    /// # Arguments
    ///
    /// * `inner` - Wrapped verifier (typically `WebPkiClientVerifier`)
    /// * `certificate_verifier` - Revocation verifier
    /// * `mtls` - mTLS settings (`certificateVerification` configuration)
    /// * `trust_anchors` - CA certificates, used to complete client chains lacking their root
    ///
    /// # Returns
    ///
    /// A newly constructed [`RevocationClientCertVerifier`] object.
    ///
    pub fn new(
        inner: Arc<dyn ClientCertVerifier>,
        certificate_verifier: Arc<CertificateVerifier>,
        mtls: MtlsSettings,
        trust_anchors: &[CertificateDer<'_>],
    ) -> Self {
        Self {
            inner,
            certificate_verifier,
            mtls,
            trust_anchors: trust_anchors
                .iter()
                .map(|anchor| anchor.as_ref().to_vec())
                .collect(),
        }
    }

    /// Leaf first, followed by intermediates and the trust anchor issuing the last of them
    fn build_peer_certificate(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
    ) -> Option<PeerCertificate> {
        let mut chain: Vec<Vec<u8>> = Vec::with_capacity(intermediates.len() + 2);
        chain.push(end_entity.as_ref().to_vec());
        chain.extend(
            intermediates
                .iter()
                .map(|intermediate| intermediate.as_ref().to_vec()),
        );

        if let Some(anchor) = chain.last().and_then(|last| self.find_issuing_anchor(last)) {
            chain.push(anchor);
        }

        PeerCertificate::from_chain(&chain)
    }

    fn find_issuing_anchor(&self, cert_der: &[u8]) -> Option<Vec<u8>> {
        let cert = x509::parse_der_certificate(cert_der).ok()?;
        if cert.issuer().as_raw() == cert.subject().as_raw() {
            return None;
        }

        self.trust_anchors
            .iter()
            .find(|anchor_der| {
                x509::parse_der_certificate(anchor_der)
                    .map(|anchor| anchor.subject().as_raw() == cert.issuer().as_raw())
                    .unwrap_or(false)
            })
            .cloned()
    }
}

impl Debug for RevocationClientCertVerifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("RevocationClientCertVerifier")
            .field("inner", &self.inner)
            .field("mtls", &self.mtls)
            .field("trust_anchors", &self.trust_anchors.len())
            .finish()
    }
}

impl ClientCertVerifier for RevocationClientCertVerifier {
    fn offer_client_auth(&self) -> bool {
        self.inner.offer_client_auth()
    }

    fn client_auth_mandatory(&self) -> bool {
        self.inner.client_auth_mandatory()
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        self.inner.root_hint_subjects()
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> Result<ClientCertVerified, RustlsError> {
        self.inner
            .verify_client_cert(end_entity, intermediates, now)?;

        let peer_certificate = match self.build_peer_certificate(end_entity, intermediates) {
            Some(peer_certificate) => peer_certificate,
            None => return Ok(ClientCertVerified::assertion()),
        };

        let result = self
            .certificate_verifier
            .verify_certificate(&peer_certificate, &self.mtls);
        debug(
            &target!(),
            &format!("Client certificate revocation check: result={:?}", &result),
        );

        match (result.valid, result.status) {
            (true, _) => Ok(ClientCertVerified::assertion()),
            (false, VerificationStatus::Revoked) => {
                warn(&target!(), "Rejecting revoked client certificate");
                Err(RustlsError::InvalidCertificate(CertificateError::Revoked))
            }
            (false, status) => {
                warn(
                    &target!(),
                    &format!("Rejecting client certificate: status={:?}", status),
                );
                Err(RustlsError::InvalidCertificate(
                    CertificateError::ApplicationVerificationFailure,
                ))
            }
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, RustlsError> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, RustlsError> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}
