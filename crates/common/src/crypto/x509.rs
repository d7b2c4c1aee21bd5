use ring::signature;
use x509_parser::prelude::*;

use crate::error::AppError;

pub const OID_SIG_ECDSA_WITH_SHA256: &str = "1.2.840.10045.4.3.2";
pub const OID_SIG_ECDSA_WITH_SHA384: &str = "1.2.840.10045.4.3.3";
pub const OID_SIG_SHA256_WITH_RSA: &str = "1.2.840.113549.1.1.11";
pub const OID_SIG_SHA384_WITH_RSA: &str = "1.2.840.113549.1.1.12";
pub const OID_SIG_SHA512_WITH_RSA: &str = "1.2.840.113549.1.1.13";
pub const OID_SIG_ED25519: &str = "1.3.101.112";

/// DER content octets of the named-curve OIDs (SPKI algorithm parameters)
const CURVE_P256_OID_CONTENT: &[u8] = &[0x2a, 0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07];
const CURVE_P384_OID_CONTENT: &[u8] = &[0x2b, 0x81, 0x04, 0x00, 0x22];

/// Parse a DER certificate
///
/// # Arguments
///
/// * `der_cert_bytes` - DER-encoded X.509 certificate
///
/// # Returns
///
/// A [`Result`] containing the parsed [`X509Certificate`].
///
pub fn parse_der_certificate(der_cert_bytes: &[u8]) -> Result<X509Certificate<'_>, AppError> {
    parse_x509_certificate(der_cert_bytes)
        .map(|(_, cert)| cert)
        .map_err(|err| AppError::General(format!("Failed parsing certificate: err={:?}", &err)))
}

/// Verify a signature made over `message` using the given public key
///
/// # Arguments
///
/// * `public_key` - Signer's public key info
/// * `signature_algorithm_oid` - Dotted signature algorithm OID
/// * `message` - Signed data
/// * `signature_value` - Signature bytes
///
/// # Returns
///
/// A [`Result`] which is a [`AppError::SignatureVerification`] error when signature is invalid
/// or the algorithm/key combination is unsupported.
///
pub fn verify_signed_data(
    public_key: &SubjectPublicKeyInfo<'_>,
    signature_algorithm_oid: &str,
    message: &[u8],
    signature_value: &[u8],
) -> Result<(), AppError> {
    let curve_params: Option<&[u8]> = public_key
        .algorithm
        .parameters
        .as_ref()
        .map(|params| params.data);

    let algorithm: &'static dyn signature::VerificationAlgorithm =
        match (signature_algorithm_oid, curve_params) {
            (OID_SIG_ECDSA_WITH_SHA256, Some(CURVE_P256_OID_CONTENT)) => {
                &signature::ECDSA_P256_SHA256_ASN1
            }
            (OID_SIG_ECDSA_WITH_SHA256, Some(CURVE_P384_OID_CONTENT)) => {
                &signature::ECDSA_P384_SHA256_ASN1
            }
            (OID_SIG_ECDSA_WITH_SHA384, Some(CURVE_P256_OID_CONTENT)) => {
                &signature::ECDSA_P256_SHA384_ASN1
            }
            (OID_SIG_ECDSA_WITH_SHA384, Some(CURVE_P384_OID_CONTENT)) => {
                &signature::ECDSA_P384_SHA384_ASN1
            }
            (OID_SIG_SHA256_WITH_RSA, _) => &signature::RSA_PKCS1_2048_8192_SHA256,
            (OID_SIG_SHA384_WITH_RSA, _) => &signature::RSA_PKCS1_2048_8192_SHA384,
            (OID_SIG_SHA512_WITH_RSA, _) => &signature::RSA_PKCS1_2048_8192_SHA512,
            (OID_SIG_ED25519, _) => &signature::ED25519,
            _ => {
                return Err(AppError::SignatureVerification(format!(
                    "Unsupported signature algorithm: alg={}",
                    signature_algorithm_oid
                )))
            }
        };

    signature::UnparsedPublicKey::new(algorithm, &*public_key.subject_public_key.data)
        .verify(message, signature_value)
        .map_err(|_| {
            AppError::SignatureVerification(format!(
                "Invalid signature: alg={}",
                signature_algorithm_oid
            ))
        })
}
