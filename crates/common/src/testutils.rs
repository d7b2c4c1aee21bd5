use rcgen::{
    BasicConstraints, CertificateParams, CertificateRevocationListParams, CrlDistributionPoint,
    CustomExtension, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa, KeyIdMethod,
    KeyPair, KeyUsagePurpose, RevocationReason, RevokedCertParams, SerialNumber,
};
use ring::rand::SystemRandom;
use ring::signature::{EcdsaKeyPair, ECDSA_P256_SHA256_ASN1_SIGNING};
use ::time::{Duration, OffsetDateTime};

use crate::crypto::ocsp::{CertId, CertStatus, SingleResponse};
use crate::crypto::{asn, ocsp, x509};

/// `id-pe-authorityInfoAccess`
const OID_ARCS_AUTHORITY_INFO_ACCESS: [u64; 9] = [1, 3, 6, 1, 5, 5, 7, 1, 1];
/// `id-ad-ocsp`
const OID_ACCESS_METHOD_OCSP: &str = "1.3.6.1.5.5.7.48.1";

/// Status to place in a generated OCSP response
#[derive(Clone, Debug)]
pub enum TestOcspStatus {
    Good,
    Revoked(OffsetDateTime, Option<u8>),
    Unknown,
}

/// Key which signs a generated OCSP response
pub enum TestOcspSigner<'a> {
    /// The issuing CA itself
    Issuer,
    /// An OCSP responder certificate (included in response)
    Delegated(&'a TestResponder),
    /// An unrelated CA (signature will not verify against the issuer)
    Foreign(&'a TestCa),
}

/// Delegated OCSP responder certificate/key
pub struct TestResponder {
    pub der: Vec<u8>,
    pub key_pair: KeyPair,
}

/// Self-signed certificate authority used to mint leaf certificates, CRLs and OCSP responses
pub struct TestCa {
    pub cert: rcgen::Certificate,
    pub key_pair: KeyPair,
}

impl TestCa {
    /// Create a new (ECDSA P-256) self-signed CA
    pub fn new(common_name: &str) -> Self {
        let key_pair = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        params.distinguished_name = distinguished_name(common_name);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let cert = params.self_signed(&key_pair).unwrap();
        Self { cert, key_pair }
    }

    /// CA certificate DER
    pub fn der(&self) -> Vec<u8> {
        self.cert.der().to_vec()
    }

    /// CA certificate PEM
    pub fn pem(&self) -> String {
        self.cert.pem()
    }

    /// Issue a leaf certificate
    ///
    /// # Arguments
    ///
    /// * `common_name` - Subject CN
    /// * `serial_number` - Big-endian serial number
    /// * `crl_urls` - CRL distribution point URIs
    /// * `ocsp_urls` - OCSP responder URIs (authority information access)
    ///
    /// # Returns
    ///
    /// The leaf certificate DER.
    ///
    pub fn issue_leaf(
        &self,
        common_name: &str,
        serial_number: &[u8],
        crl_urls: &[&str],
        ocsp_urls: &[&str],
    ) -> Vec<u8> {
        self.issue_leaf_with_params(
            self.leaf_params(common_name, serial_number),
            crl_urls,
            ocsp_urls,
        )
    }

    /// Issue a leaf certificate lacking the authority key identifier extension
    pub fn issue_leaf_without_authority_key_id(
        &self,
        common_name: &str,
        serial_number: &[u8],
        crl_urls: &[&str],
    ) -> Vec<u8> {
        let mut params = self.leaf_params(common_name, serial_number);
        params.use_authority_key_identifier_extension = false;
        self.issue_leaf_with_params(params, crl_urls, &[])
    }

    fn issue_leaf_with_params(
        &self,
        mut params: CertificateParams,
        crl_urls: &[&str],
        ocsp_urls: &[&str],
    ) -> Vec<u8> {
        let key_pair = KeyPair::generate().unwrap();
        if !crl_urls.is_empty() {
            params.crl_distribution_points = vec![CrlDistributionPoint {
                uris: crl_urls.iter().map(|url| url.to_string()).collect(),
            }];
        }
        if !ocsp_urls.is_empty() {
            params.custom_extensions = vec![CustomExtension::from_oid_content(
                &OID_ARCS_AUTHORITY_INFO_ACCESS,
                authority_info_access(ocsp_urls),
            )];
        }
        params
            .signed_by(&key_pair, &self.cert, &self.key_pair)
            .unwrap()
            .der()
            .to_vec()
    }

    /// Issue a delegated OCSP responder certificate (OCSPSigning extended key usage)
    pub fn issue_ocsp_responder(&self, common_name: &str) -> TestResponder {
        let key_pair = KeyPair::generate().unwrap();
        let mut params = self.leaf_params(common_name, &[0x7e, 0x01]);
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::OcspSigning];
        let der = params
            .signed_by(&key_pair, &self.cert, &self.key_pair)
            .unwrap()
            .der()
            .to_vec();
        TestResponder { der, key_pair }
    }

    /// Sign a CRL revoking the given (serial number, revocation time) entries
    pub fn sign_crl(
        &self,
        revoked: &[(&[u8], OffsetDateTime)],
        this_update: OffsetDateTime,
        next_update: OffsetDateTime,
    ) -> Vec<u8> {
        let crl_params = CertificateRevocationListParams {
            this_update,
            next_update,
            crl_number: SerialNumber::from_slice(&[0x01]),
            issuing_distribution_point: None,
            revoked_certs: revoked
                .iter()
                .map(|(serial_number, revocation_time)| RevokedCertParams {
                    serial_number: SerialNumber::from_slice(serial_number),
                    revocation_time: *revocation_time,
                    reason_code: Some(RevocationReason::KeyCompromise),
                    invalidity_date: None,
                })
                .collect(),
            key_identifier_method: KeyIdMethod::Sha256,
        };
        crl_params
            .signed_by(&self.cert, &self.key_pair)
            .unwrap()
            .der()
            .to_vec()
    }

    /// Sign an OCSP response (issuer-signed, valid for one hour) for the given leaf
    pub fn sign_ocsp_response(&self, leaf_der: &[u8], status: &TestOcspStatus) -> Vec<u8> {
        self.sign_ocsp_response_full(
            leaf_der,
            status,
            Some(OffsetDateTime::now_utc() + Duration::hours(1)),
            TestOcspSigner::Issuer,
        )
    }

    /// Sign an OCSP response for the given leaf
    ///
    /// # Arguments
    ///
    /// * `leaf_der` - Leaf certificate (issued by this CA)
    /// * `status` - Status to report
    /// * `next_update` - Response `nextUpdate` (if any)
    /// * `signer` - Key signing the response
    ///
    /// # Returns
    ///
    /// The DER `OCSPResponse`.
    ///
    pub fn sign_ocsp_response_full(
        &self,
        leaf_der: &[u8],
        status: &TestOcspStatus,
        next_update: Option<OffsetDateTime>,
        signer: TestOcspSigner<'_>,
    ) -> Vec<u8> {
        let ca_der = self.der();
        let issuer = x509::parse_der_certificate(&ca_der).unwrap();
        let leaf = x509::parse_der_certificate(leaf_der).unwrap();
        let now = OffsetDateTime::now_utc().replace_nanosecond(0).unwrap();

        let cert_status = match status {
            TestOcspStatus::Good => CertStatus::Good,
            TestOcspStatus::Revoked(revocation_time, reason) => CertStatus::Revoked {
                revocation_time: *revocation_time,
                reason: *reason,
            },
            TestOcspStatus::Unknown => CertStatus::Unknown,
        };
        let single_response = SingleResponse {
            cert_id: CertId::new(&leaf, &issuer),
            cert_status,
            this_update: now - Duration::minutes(1),
            next_update,
        };

        let (signer_der, signer_key, certs) = match signer {
            TestOcspSigner::Issuer => (ca_der.clone(), &self.key_pair, vec![]),
            TestOcspSigner::Delegated(responder) => (
                responder.der.clone(),
                &responder.key_pair,
                vec![responder.der.clone()],
            ),
            TestOcspSigner::Foreign(other_ca) => (other_ca.der(), &other_ca.key_pair, vec![]),
        };
        let signer_cert = x509::parse_der_certificate(&signer_der).unwrap();
        let responder_key_hash = ring::digest::digest(
            &ring::digest::SHA1_FOR_LEGACY_USE_ONLY,
            &signer_cert.public_key().subject_public_key.data,
        );

        let tbs_response_data =
            ocsp::encode_response_data(responder_key_hash.as_ref(), &now, &[single_response])
                .unwrap();
        let signature = ecdsa_sign(signer_key, &tbs_response_data);

        ocsp::encode_basic_response(
            &tbs_response_data,
            x509::OID_SIG_ECDSA_WITH_SHA256,
            &signature,
            &certs,
        )
        .unwrap()
    }

    fn leaf_params(&self, common_name: &str, serial_number: &[u8]) -> CertificateParams {
        let now = OffsetDateTime::now_utc();
        let mut params = CertificateParams::new(vec![common_name.to_string()]).unwrap();
        params.distinguished_name = distinguished_name(common_name);
        params.serial_number = Some(SerialNumber::from_slice(serial_number));
        params.not_before = now - Duration::days(1);
        params.not_after = now + Duration::days(30);
        params.use_authority_key_identifier_extension = true;
        params
    }
}

fn distinguished_name(common_name: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name);
    dn.push(DnType::OrganizationName, "Certcheck Test");
    dn
}

fn authority_info_access(ocsp_urls: &[&str]) -> Vec<u8> {
    let access_descriptions: Vec<Vec<u8>> = ocsp_urls
        .iter()
        .map(|url| {
            asn::encode_sequence(&[
                asn::encode_oid(OID_ACCESS_METHOD_OCSP).unwrap(),
                asn::encode_tlv(0x86, url.as_bytes()),
            ])
        })
        .collect();
    asn::encode_sequence(&access_descriptions)
}

fn ecdsa_sign(key_pair: &KeyPair, message: &[u8]) -> Vec<u8> {
    let rng = SystemRandom::new();
    let signing_key =
        EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, &key_pair.serialize_der(), &rng)
            .unwrap();
    signing_key.sign(&rng, message).unwrap().as_ref().to_vec()
}
