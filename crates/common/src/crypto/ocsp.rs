//! OCSP (RFC 6960) wire codec.
//!
//! Covers the subset needed for single-certificate status queries: unsigned requests holding
//! one SHA-1 `CertID`, and `id-pkix-ocsp-basic` responses. Signature checking of responses is
//! left to the caller, which knows the issuer.

use ring::digest;
use ::time::OffsetDateTime;
use x509_parser::der_parser::asn1_rs::Tag;
use x509_parser::prelude::*;

use crate::crypto::asn;
use crate::error::AppError;

pub const OID_HASH_SHA1: &str = "1.3.14.3.2.26";
pub const OID_PKIX_OCSP_BASIC: &str = "1.3.6.1.5.5.7.48.1.1";

pub const CONTENT_TYPE_OCSP_REQUEST: &str = "application/ocsp-request";
pub const CONTENT_TYPE_OCSP_RESPONSE: &str = "application/ocsp-response";

/// OCSP response status (RFC 6960 section 4.2.1)
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum OcspResponseStatus {
    Successful,
    MalformedRequest,
    InternalError,
    TryLater,
    SigRequired,
    Unauthorized,
    Unrecognized(u8),
}

impl From<u8> for OcspResponseStatus {
    fn from(value: u8) -> Self {
        match value {
            0 => OcspResponseStatus::Successful,
            1 => OcspResponseStatus::MalformedRequest,
            2 => OcspResponseStatus::InternalError,
            3 => OcspResponseStatus::TryLater,
            5 => OcspResponseStatus::SigRequired,
            6 => OcspResponseStatus::Unauthorized,
            other => OcspResponseStatus::Unrecognized(other),
        }
    }
}

impl From<OcspResponseStatus> for u8 {
    fn from(status: OcspResponseStatus) -> Self {
        match status {
            OcspResponseStatus::Successful => 0,
            OcspResponseStatus::MalformedRequest => 1,
            OcspResponseStatus::InternalError => 2,
            OcspResponseStatus::TryLater => 3,
            OcspResponseStatus::SigRequired => 5,
            OcspResponseStatus::Unauthorized => 6,
            OcspResponseStatus::Unrecognized(other) => other,
        }
    }
}

/// Responder's answer for a single certificate
#[derive(Clone, Debug, PartialEq)]
pub enum CertStatus {
    Good,
    Revoked {
        revocation_time: OffsetDateTime,
        reason: Option<u8>,
    },
    Unknown,
}

/// Identifies a certificate in OCSP requests/responses
#[derive(Clone, Debug, PartialEq)]
pub struct CertId {
    /// Digest algorithm OID used for the hashes
    pub hash_algorithm: String,
    /// Hash of the issuer's DER distinguished name
    pub issuer_name_hash: Vec<u8>,
    /// Hash of the issuer's public key bits
    pub issuer_key_hash: Vec<u8>,
    /// Certificate serial number (big-endian)
    pub serial_number: Vec<u8>,
}

impl CertId {
    /// Build the (SHA-1) certificate ID for a certificate and its issuer
    ///
    /// # Arguments
    ///
    /// * `cert` - Subject certificate
    /// * `issuer` - Issuer certificate
    ///
    /// # Returns
    ///
    /// A newly constructed [`CertId`] object.
    ///
    pub fn new(cert: &X509Certificate<'_>, issuer: &X509Certificate<'_>) -> Self {
        let issuer_name_hash = digest::digest(
            &digest::SHA1_FOR_LEGACY_USE_ONLY,
            issuer.subject().as_raw(),
        );
        let issuer_key_hash = digest::digest(
            &digest::SHA1_FOR_LEGACY_USE_ONLY,
            &issuer.public_key().subject_public_key.data,
        );
        Self {
            hash_algorithm: OID_HASH_SHA1.to_string(),
            issuer_name_hash: issuer_name_hash.as_ref().to_vec(),
            issuer_key_hash: issuer_key_hash.as_ref().to_vec(),
            serial_number: cert.raw_serial().to_vec(),
        }
    }

    /// Whether IDs designate the same certificate (serial leading zero octets are ignored)
    pub fn matches(&self, other: &CertId) -> bool {
        (self.hash_algorithm == other.hash_algorithm)
            && (self.issuer_name_hash == other.issuer_name_hash)
            && (self.issuer_key_hash == other.issuer_key_hash)
            && strip_leading_zeros(&self.serial_number)
                == strip_leading_zeros(&other.serial_number)
    }

    /// DER encoding of `CertID`
    pub fn to_der(&self) -> Result<Vec<u8>, AppError> {
        Ok(asn::encode_sequence(&[
            asn::encode_sequence(&[asn::encode_oid(&self.hash_algorithm)?, asn::encode_null()]),
            asn::encode_octet_string(&self.issuer_name_hash),
            asn::encode_octet_string(&self.issuer_key_hash),
            asn::encode_integer(&self.serial_number),
        ]))
    }

    fn from_der_content(content: &[u8]) -> Result<Self, AppError> {
        let (hash_alg, rest) = asn::expect_element(content, Tag::Sequence, "hashAlgorithm")?;
        let (hash_alg_oid, _) = asn::expect_element(hash_alg.content(), Tag::Oid, "hashOid")?;
        let (name_hash, rest) = asn::expect_element(rest, Tag::OctetString, "issuerNameHash")?;
        let (key_hash, rest) = asn::expect_element(rest, Tag::OctetString, "issuerKeyHash")?;
        let (serial, _) = asn::expect_element(rest, Tag::Integer, "serialNumber")?;
        Ok(Self {
            hash_algorithm: asn::decode_oid(&hash_alg_oid)?,
            issuer_name_hash: name_hash.content().to_vec(),
            issuer_key_hash: key_hash.content().to_vec(),
            serial_number: serial.content().to_vec(),
        })
    }
}

/// Per-certificate entry of a basic OCSP response
#[derive(Clone, Debug, PartialEq)]
pub struct SingleResponse {
    pub cert_id: CertId,
    pub cert_status: CertStatus,
    pub this_update: OffsetDateTime,
    pub next_update: Option<OffsetDateTime>,
}

impl SingleResponse {
    /// DER encoding of `SingleResponse`
    pub fn to_der(&self) -> Result<Vec<u8>, AppError> {
        let cert_status = match &self.cert_status {
            CertStatus::Good => asn::encode_tlv(0x80, &[]),
            CertStatus::Revoked {
                revocation_time,
                reason,
            } => {
                let mut revoked_info = asn::encode_generalized_time(revocation_time);
                if let Some(reason) = reason {
                    revoked_info.extend(asn::encode_tlv(0xa0, &asn::encode_enumerated(*reason)));
                }
                asn::encode_tlv(0xa1, &revoked_info)
            }
            CertStatus::Unknown => asn::encode_tlv(0x82, &[]),
        };

        let mut items = vec![
            self.cert_id.to_der()?,
            cert_status,
            asn::encode_generalized_time(&self.this_update),
        ];
        if let Some(next_update) = &self.next_update {
            items.push(asn::encode_tlv(0xa0, &asn::encode_generalized_time(next_update)));
        }
        Ok(asn::encode_sequence(&items))
    }

    fn from_der_content(content: &[u8]) -> Result<Self, AppError> {
        let (cert_id, rest) = asn::expect_element(content, Tag::Sequence, "certID")?;
        let (status, rest) = asn::read_element(rest)?;
        let cert_status = if status.is_context(0) {
            CertStatus::Good
        } else if status.is_context(1) {
            let (revocation_time, rest) =
                asn::expect_element(status.content(), Tag::GeneralizedTime, "revocationTime")?;
            let mut reason = None;
            if !rest.is_empty() {
                let (reason_wrapper, _) = asn::read_element(rest)?;
                if reason_wrapper.is_context(0) {
                    let (reason_code, _) = asn::expect_element(
                        reason_wrapper.content(),
                        Tag::Enumerated,
                        "revocationReason",
                    )?;
                    reason = reason_code.content().last().cloned();
                }
            }
            CertStatus::Revoked {
                revocation_time: asn::decode_generalized_time(&revocation_time)?,
                reason,
            }
        } else if status.is_context(2) {
            CertStatus::Unknown
        } else {
            return Err(AppError::General(
                "Invalid OCSP certStatus choice".to_string(),
            ));
        };
        let (this_update, rest) = asn::expect_element(rest, Tag::GeneralizedTime, "thisUpdate")?;

        let mut next_update = None;
        for element in asn::read_elements(rest)? {
            if element.is_context(0) {
                let (next_update_time, _) =
                    asn::expect_element(element.content(), Tag::GeneralizedTime, "nextUpdate")?;
                next_update = Some(asn::decode_generalized_time(&next_update_time)?);
            }
        }

        Ok(Self {
            cert_id: CertId::from_der_content(cert_id.content())?,
            cert_status,
            this_update: asn::decode_generalized_time(&this_update)?,
            next_update,
        })
    }
}

/// Decoded `BasicOCSPResponse`
pub struct BasicResponse<'a> {
    /// Raw `tbsResponseData` (the signed bytes)
    pub tbs_response_data: &'a [u8],
    pub produced_at: OffsetDateTime,
    pub responses: Vec<SingleResponse>,
    /// Dotted signature algorithm OID
    pub signature_algorithm: String,
    pub signature: &'a [u8],
    /// DER certificates supplied by the responder (delegated signer)
    pub certs: Vec<&'a [u8]>,
}

impl<'a> BasicResponse<'a> {
    /// Find the response pertaining to the given certificate ID
    pub fn find_response(&self, cert_id: &CertId) -> Option<&SingleResponse> {
        self.responses
            .iter()
            .find(|response| response.cert_id.matches(cert_id))
    }
}

/// Decoded `OCSPResponse`
pub struct OcspResponse<'a> {
    pub status: OcspResponseStatus,
    /// Present only for successful responses
    pub basic: Option<BasicResponse<'a>>,
}

/// Encode an (unsigned) OCSP request for a single certificate
///
/// # Arguments
///
/// * `cert_id` - Certificate to query
///
/// # Returns
///
/// A [`Result`] containing the DER `OCSPRequest`.
///
pub fn encode_request(cert_id: &CertId) -> Result<Vec<u8>, AppError> {
    let request = asn::encode_sequence(&[cert_id.to_der()?]);
    let request_list = asn::encode_sequence(&[request]);
    let tbs_request = asn::encode_sequence(&[request_list]);
    Ok(asn::encode_sequence(&[tbs_request]))
}

/// Encode `ResponseData` (responder identified by key hash)
pub fn encode_response_data(
    responder_key_hash: &[u8],
    produced_at: &OffsetDateTime,
    responses: &[SingleResponse],
) -> Result<Vec<u8>, AppError> {
    let encoded_responses = responses
        .iter()
        .map(|response| response.to_der())
        .collect::<Result<Vec<Vec<u8>>, AppError>>()?;
    Ok(asn::encode_sequence(&[
        asn::encode_tlv(0xa2, &asn::encode_octet_string(responder_key_hash)),
        asn::encode_generalized_time(produced_at),
        asn::encode_sequence(&encoded_responses),
    ]))
}

/// Encode a successful `OCSPResponse` wrapping a signed `BasicOCSPResponse`
pub fn encode_basic_response(
    tbs_response_data: &[u8],
    signature_algorithm: &str,
    signature: &[u8],
    certs: &[Vec<u8>],
) -> Result<Vec<u8>, AppError> {
    let mut basic_items = vec![
        tbs_response_data.to_vec(),
        asn::encode_sequence(&[asn::encode_oid(signature_algorithm)?]),
        asn::encode_bit_string(signature),
    ];
    if !certs.is_empty() {
        basic_items.push(asn::encode_tlv(0xa0, &asn::encode_sequence(certs)));
    }
    let basic = asn::encode_sequence(&basic_items);

    let response_bytes = asn::encode_sequence(&[
        asn::encode_oid(OID_PKIX_OCSP_BASIC)?,
        asn::encode_octet_string(&basic),
    ]);
    Ok(asn::encode_sequence(&[
        asn::encode_enumerated(OcspResponseStatus::Successful.into()),
        asn::encode_tlv(0xa0, &response_bytes),
    ]))
}

/// Encode an unsuccessful `OCSPResponse` (status only)
pub fn encode_error_response(status: OcspResponseStatus) -> Vec<u8> {
    asn::encode_sequence(&[asn::encode_enumerated(status.into())])
}

/// Decode an `OCSPResponse`
///
/// # Arguments
///
/// * `der` - DER-encoded response body from the responder
///
/// # Returns
///
/// A [`Result`] containing the decoded [`OcspResponse`]. Signature is NOT verified.
///
pub fn parse_response(der: &[u8]) -> Result<OcspResponse<'_>, AppError> {
    let (response, _) = asn::expect_element(der, Tag::Sequence, "OCSPResponse")?;
    let (status, rest) =
        asn::expect_element(response.content(), Tag::Enumerated, "responseStatus")?;
    let status = OcspResponseStatus::from(status.content().last().cloned().unwrap_or(0xff));

    if (status != OcspResponseStatus::Successful) || rest.is_empty() {
        return Ok(OcspResponse {
            status,
            basic: None,
        });
    }

    let (response_bytes_wrapper, _) = asn::read_element(rest)?;
    if !response_bytes_wrapper.is_context(0) {
        return Err(AppError::General(
            "Missing OCSP responseBytes".to_string(),
        ));
    }
    let (response_bytes, _) =
        asn::expect_element(response_bytes_wrapper.content(), Tag::Sequence, "responseBytes")?;
    let (response_type, rest) =
        asn::expect_element(response_bytes.content(), Tag::Oid, "responseType")?;
    let response_type = asn::decode_oid(&response_type)?;
    if response_type != OID_PKIX_OCSP_BASIC {
        return Err(AppError::General(format!(
            "Unsupported OCSP response type: type={}",
            response_type
        )));
    }
    let (basic_octets, _) = asn::expect_element(rest, Tag::OctetString, "response")?;

    Ok(OcspResponse {
        status,
        basic: Some(parse_basic_response(basic_octets.content())?),
    })
}

fn parse_basic_response(der: &[u8]) -> Result<BasicResponse<'_>, AppError> {
    let (basic, _) = asn::expect_element(der, Tag::Sequence, "BasicOCSPResponse")?;
    let (tbs, rest) = asn::expect_element(basic.content(), Tag::Sequence, "tbsResponseData")?;
    let (signature_algorithm, rest) =
        asn::expect_element(rest, Tag::Sequence, "signatureAlgorithm")?;
    let (signature_algorithm, _) =
        asn::expect_element(signature_algorithm.content(), Tag::Oid, "signatureOid")?;
    let (signature, rest) = asn::expect_element(rest, Tag::BitString, "signature")?;
    if signature.content().is_empty() {
        return Err(AppError::General("Empty OCSP signature".to_string()));
    }

    let mut certs = Vec::new();
    if !rest.is_empty() {
        let (certs_wrapper, _) = asn::read_element(rest)?;
        if certs_wrapper.is_context(0) {
            let (cert_list, _) =
                asn::expect_element(certs_wrapper.content(), Tag::Sequence, "certs")?;
            for cert in asn::read_elements(cert_list.content())? {
                certs.push(cert.raw);
            }
        }
    }

    // ResponseData: [0] version?, responderID, producedAt, responses, [1] extensions?
    let mut tbs_elements = asn::read_elements(tbs.content())?.into_iter().peekable();
    if tbs_elements
        .peek()
        .map(|element| element.is_context(0))
        .unwrap_or(false)
    {
        tbs_elements.next();
    }
    match tbs_elements.next() {
        Some(responder_id) if responder_id.is_context(1) || responder_id.is_context(2) => {}
        _ => return Err(AppError::General("Invalid OCSP responderID".to_string())),
    }
    let produced_at = match tbs_elements.next() {
        Some(element) if element.is_universal(Tag::GeneralizedTime) => {
            asn::decode_generalized_time(&element)?
        }
        _ => return Err(AppError::General("Invalid OCSP producedAt".to_string())),
    };
    let responses = match tbs_elements.next() {
        Some(element) if element.is_universal(Tag::Sequence) => asn::read_elements(
            element.content(),
        )?
        .iter()
        .map(|single| {
            if !single.is_universal(Tag::Sequence) {
                return Err(AppError::General(
                    "Invalid OCSP SingleResponse".to_string(),
                ));
            }
            SingleResponse::from_der_content(single.content())
        })
        .collect::<Result<Vec<SingleResponse>, AppError>>()?,
        _ => return Err(AppError::General("Invalid OCSP responses".to_string())),
    };

    Ok(BasicResponse {
        tbs_response_data: tbs.raw,
        produced_at,
        responses,
        signature_algorithm: asn::decode_oid(&signature_algorithm)?,
        signature: &signature.content()[1..],
        certs,
    })
}

fn strip_leading_zeros(value: &[u8]) -> &[u8] {
    let first_non_zero = value.iter().position(|b| *b != 0).unwrap_or(value.len());
    &value[first_non_zero..]
}
