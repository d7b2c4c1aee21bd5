//! Stateless certificate helpers: PEM/DER conversion, revocation URL extraction and
//! identifier derivation.

use pki_types::pem::PemObject;
use pki_types::CertificateDer;
use ring::digest;
use serde_json::json;
use x509_parser::prelude::*;
use x509_parser::revocation_list::CertificateRevocationList;

use crate::model::{CertificateChainEntry, PeerCertificate};
use certcheck_common::crypto::x509;
use certcheck_common::error::AppError;
use certcheck_common::logging::warn;
use certcheck_common::target;

const PEM_TAG_CERTIFICATE: &str = "CERTIFICATE";

const OID_ACCESS_METHOD_OCSP: &str = "1.3.6.1.5.5.7.48.1";

/// Revocation URLs found in a certificate
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RevocationUrls {
    pub crl_urls: Vec<String>,
    pub ocsp_urls: Vec<String>,
}

/// Convert DER certificate to PEM (64 character lines)
pub fn buffer_to_pem(der: &[u8]) -> String {
    ::pem::encode_config(
        &::pem::Pem::new(PEM_TAG_CERTIFICATE, der.to_vec()),
        ::pem::EncodeConfig::new().set_line_ending(::pem::LineEnding::LF),
    )
}

/// Convert PEM to DER. Invalid input yields an empty buffer.
pub fn pem_to_buffer(pem: &str) -> Vec<u8> {
    CertificateDer::from_pem_slice(pem.as_bytes())
        .map(|cert| cert.to_vec())
        .unwrap_or_default()
}

/// Split a PEM bundle into DER certificates (bundle order). A malformed bundle yields no
/// certificates.
pub fn pem_bundle_to_buffers(pem_bundle: &str) -> Vec<Vec<u8>> {
    match CertificateDer::pem_slice_iter(pem_bundle.as_bytes())
        .collect::<Result<Vec<CertificateDer<'static>>, _>>()
    {
        Ok(certs) => certs.iter().map(|cert| cert.to_vec()).collect(),
        Err(err) => {
            warn(
                &target!(),
                &format!("Invalid PEM certificate bundle: err={:?}", &err),
            );
            Vec::new()
        }
    }
}

/// Walk the peer certificate's issuer back-references
///
/// # Arguments
///
/// * `peer_certificate` - Leaf certificate as presented by the TLS layer
///
/// # Returns
///
/// Ordered `{cert, issuer}` entries, leaf first. Stops at a self-referencing certificate or at a
/// certificate without raw bytes.
///
pub fn extract_certificate_chain(peer_certificate: &PeerCertificate) -> Vec<CertificateChainEntry> {
    let mut chain = Vec::new();
    let mut current = peer_certificate;

    while let Some(cert) = current.raw.as_ref() {
        let issuer = current.issuer_certificate.as_deref();
        let issuer_raw = issuer.and_then(|issuer| issuer.raw.clone());
        chain.push(CertificateChainEntry {
            cert: cert.clone(),
            issuer: issuer_raw.clone(),
        });

        match issuer {
            Some(issuer) if issuer_raw.as_ref() != Some(cert) => current = issuer,
            _ => break,
        }
    }

    chain
}

/// Extract `http(s)` URIs from the CRL distribution points extension
pub fn extract_crl_distribution_points(cert_der: &[u8]) -> Vec<String> {
    extract_revocation_urls(cert_der).crl_urls
}

/// Extract `http(s)` OCSP responder URIs from the authority information access extension
pub fn extract_ocsp_urls(cert_der: &[u8]) -> Vec<String> {
    extract_revocation_urls(cert_der).ocsp_urls
}

/// Extract both CRL and OCSP URLs in a single parse. Parse failures are logged and yield
/// empty results.
pub fn extract_revocation_urls(cert_der: &[u8]) -> RevocationUrls {
    let mut urls = RevocationUrls::default();

    let cert = match x509::parse_der_certificate(cert_der) {
        Ok(cert) => cert,
        Err(err) => {
            warn(
                &target!(),
                &format!("Unable to extract revocation URLs: err={:?}", &err),
            );
            return urls;
        }
    };

    for extension in cert.extensions() {
        match extension.parsed_extension() {
            ParsedExtension::CRLDistributionPoints(distribution_points) => {
                for point in distribution_points.points.iter() {
                    if let Some(DistributionPointName::FullName(names)) = &point.distribution_point
                    {
                        urls.crl_urls.extend(http_uris(names.iter()));
                    }
                }
            }
            ParsedExtension::AuthorityInfoAccess(aia) => {
                let ocsp_locations = aia
                    .accessdescs
                    .iter()
                    .filter(|desc| desc.access_method.to_id_string() == OID_ACCESS_METHOD_OCSP)
                    .map(|desc| &desc.access_location);
                urls.ocsp_urls.extend(http_uris(ocsp_locations));
            }
            ParsedExtension::ParseError { error } => {
                warn(
                    &target!(),
                    &format!(
                        "Malformed certificate extension: oid={}, err={:?}",
                        extension.oid.to_id_string(),
                        error
                    ),
                );
            }
            _ => {}
        }
    }

    urls
}

fn http_uris<'a, 'b: 'a>(names: impl Iterator<Item = &'a GeneralName<'b>>) -> Vec<String> {
    names
        .filter_map(|name| match name {
            GeneralName::URI(uri) => Some(uri.to_string()),
            _ => None,
        })
        .filter(|uri| uri.starts_with("http://") || uri.starts_with("https://"))
        .collect()
}

/// Normalize raw serial bytes: lowercase hex, leading zero octets removed
pub fn normalize_serial(raw_serial: &[u8]) -> String {
    let first_non_zero = raw_serial
        .iter()
        .position(|b| *b != 0)
        .unwrap_or(raw_serial.len().saturating_sub(1));
    hex::encode(&raw_serial[first_non_zero..])
}

/// Extract the certificate serial number (normalized hex)
///
/// # Arguments
///
/// * `cert_der` - DER certificate
///
/// # Returns
///
/// A [`Result`] containing the serial. Unparseable certificates are an error.
///
pub fn extract_serial_number(cert_der: &[u8]) -> Result<String, AppError> {
    let cert = x509::parse_der_certificate(cert_der)?;
    Ok(normalize_serial(cert.raw_serial()))
}

/// Extract the issuer key identifier: the authority key identifier (hex) when present,
/// otherwise the SHA-256 (hex) of the issuer distinguished name.
///
/// # Arguments
///
/// * `cert_der` - DER certificate
///
/// # Returns
///
/// A [`Result`] containing the issuer key id. Unparseable certificates are an error.
///
pub fn extract_issuer_key_id(cert_der: &[u8]) -> Result<String, AppError> {
    let cert = x509::parse_der_certificate(cert_der)?;
    Ok(issuer_key_id(cert.extensions(), cert.issuer().as_raw()))
}

/// CRL counterpart of [`extract_issuer_key_id`]
pub fn extract_crl_issuer_key_id(crl: &CertificateRevocationList<'_>) -> String {
    issuer_key_id(crl.extensions(), crl.issuer().as_raw())
}

/// Every issuer key id a certificate issued by the CRL's issuer may carry: the CRL authority
/// key identifier, the issuer certificate's subject key identifier and the SHA-256 of the CRL
/// issuer DN. Revoked entries are indexed under each, so that certificates with and without
/// the authority key identifier extension resolve to an indexed row.
///
/// # Arguments
///
/// * `crl` - Parsed CRL
/// * `issuer` - Parsed issuer certificate (when available)
///
/// # Returns
///
/// The distinct key ids (hex).
///
pub fn extract_crl_issuer_key_ids(
    crl: &CertificateRevocationList<'_>,
    issuer: Option<&X509Certificate<'_>>,
) -> Vec<String> {
    let subject_key_id = issuer.and_then(|issuer| {
        issuer
            .extensions()
            .iter()
            .find_map(|extension| match extension.parsed_extension() {
                ParsedExtension::SubjectKeyIdentifier(key_id) => Some(hex::encode(key_id.0)),
                _ => None,
            })
    });

    let mut key_ids: Vec<String> = Vec::with_capacity(3);
    for key_id in [
        authority_key_id(crl.extensions()),
        subject_key_id,
        Some(issuer_dn_hash(crl.issuer().as_raw())),
    ]
    .into_iter()
    .flatten()
    {
        if !key_ids.contains(&key_id) {
            key_ids.push(key_id);
        }
    }
    key_ids
}

fn issuer_key_id(extensions: &[X509Extension<'_>], issuer_dn_raw: &[u8]) -> String {
    authority_key_id(extensions).unwrap_or_else(|| issuer_dn_hash(issuer_dn_raw))
}

fn authority_key_id(extensions: &[X509Extension<'_>]) -> Option<String> {
    extensions
        .iter()
        .find_map(|extension| match extension.parsed_extension() {
            ParsedExtension::AuthorityKeyIdentifier(aki) => {
                aki.key_identifier.as_ref().map(|key_id| hex::encode(key_id.0))
            }
            _ => None,
        })
}

fn issuer_dn_hash(issuer_dn_raw: &[u8]) -> String {
    hex::encode(digest::digest(&digest::SHA256, issuer_dn_raw).as_ref())
}

/// Revocation reason (RFC 5280 `CRLReason`) name
pub fn revocation_reason_name(reason_code: u8) -> String {
    match reason_code {
        0 => "unspecified",
        1 => "keyCompromise",
        2 => "cACompromise",
        3 => "affiliationChanged",
        4 => "superseded",
        5 => "cessationOfOperation",
        6 => "certificateHold",
        8 => "removeFromCRL",
        9 => "privilegeWithdrawn",
        10 => "aACompromise",
        _ => return format!("reason-{}", reason_code),
    }
    .to_string()
}

/// Create the deterministic, method-tagged cache key for a certificate/issuer pair
///
/// # Arguments
///
/// * `cert_pem` - Certificate PEM
/// * `issuer_pem` - Issuer certificate PEM
/// * `method` - Verification method name
/// * `extra` - Optional additional key material
///
/// # Returns
///
/// `method:` followed by the SHA-256 hex of a canonical JSON object.
///
pub fn create_cache_key(
    cert_pem: &str,
    issuer_pem: &str,
    method: &str,
    extra: Option<&serde_json::Value>,
) -> String {
    // serde_json maps are ordered by key, giving a canonical encoding
    let canonical = json!({
        "certPem": cert_pem,
        "issuerPem": issuer_pem,
        "method": method,
        "extra": extra.cloned().unwrap_or(serde_json::Value::Null),
    })
    .to_string();
    let hash = digest::digest(&digest::SHA256, canonical.as_bytes());
    format!("{}:{}", method, hex::encode(hash.as_ref()))
}

/// Create the revoked certificate composite ID
pub fn create_revoked_certificate_id(issuer_key_id: &str, serial_number: &str) -> String {
    format!("{}:{}", issuer_key_id, serial_number)
}
