use std::str::FromStr;

use ::time::{OffsetDateTime, UtcOffset};
use x509_parser::der_parser::asn1_rs::{Any, Class, FromDer, GeneralizedTime, Oid, Tag};

use crate::error::AppError;

pub const TAG_INTEGER: u8 = 0x02;
pub const TAG_BIT_STRING: u8 = 0x03;
pub const TAG_OCTET_STRING: u8 = 0x04;
pub const TAG_NULL: u8 = 0x05;
pub const TAG_OID: u8 = 0x06;
pub const TAG_ENUMERATED: u8 = 0x0a;
pub const TAG_GENERALIZED_TIME: u8 = 0x18;
pub const TAG_SEQUENCE: u8 = 0x30;

/// A parsed DER element, alongside its complete (header + content) encoding
pub struct DerElement<'a> {
    /// Parsed element
    pub any: Any<'a>,
    /// Raw DER bytes for element
    pub raw: &'a [u8],
}

impl<'a> DerElement<'a> {
    /// Element content octets
    pub fn content(&self) -> &'a [u8] {
        self.any.data
    }

    /// Whether element is a universal element with given tag
    pub fn is_universal(&self, tag: Tag) -> bool {
        (self.any.header.class() == Class::Universal) && (self.any.header.tag() == tag)
    }

    /// Whether element is a context-specific element with given tag number
    pub fn is_context(&self, tag_number: u32) -> bool {
        (self.any.header.class() == Class::ContextSpecific)
            && (self.any.header.tag().0 == tag_number)
    }
}

/// Read the next DER element from input
///
/// # Arguments
///
/// * `input` - DER bytes, starting at an element header
///
/// # Returns
///
/// A [`Result`] containing the parsed element and the remaining (unparsed) input.
///
pub fn read_element(input: &[u8]) -> Result<(DerElement<'_>, &[u8]), AppError> {
    let (rest, any) = Any::from_der(input).map_err(|err| {
        AppError::General(format!("Failed parsing DER element: err={:?}", &err))
    })?;
    let raw = &input[..input.len() - rest.len()];
    Ok((DerElement { any, raw }, rest))
}

/// Read all DER elements contained in the given (constructed element) content
///
/// # Arguments
///
/// * `content` - Concatenated DER elements
///
/// # Returns
///
/// A [`Result`] containing the list of parsed elements.
///
pub fn read_elements(content: &[u8]) -> Result<Vec<DerElement<'_>>, AppError> {
    let mut elements = Vec::new();
    let mut remaining = content;
    while !remaining.is_empty() {
        let (element, rest) = read_element(remaining)?;
        elements.push(element);
        remaining = rest;
    }
    Ok(elements)
}

/// Read a universal-tagged element, failing when tag differs
pub fn expect_element<'a>(
    input: &'a [u8],
    tag: Tag,
    name: &str,
) -> Result<(DerElement<'a>, &'a [u8]), AppError> {
    let (element, rest) = read_element(input)?;
    if !element.is_universal(tag) {
        return Err(AppError::General(format!(
            "Unexpected DER element: name={}, expected={:?}, actual={:?}",
            name,
            tag,
            element.any.header.tag()
        )));
    }
    Ok((element, rest))
}

/// Encode DER length octets
pub fn encode_length(len: usize) -> Vec<u8> {
    if len < 0x80 {
        return vec![len as u8];
    }
    let len_bytes: Vec<u8> = len
        .to_be_bytes()
        .iter()
        .skip_while(|b| **b == 0)
        .cloned()
        .collect();
    let mut encoded = vec![0x80 | len_bytes.len() as u8];
    encoded.extend(len_bytes);
    encoded
}

/// Encode a complete TLV
pub fn encode_tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut encoded = vec![tag];
    encoded.extend(encode_length(content.len()));
    encoded.extend_from_slice(content);
    encoded
}

/// Encode SEQUENCE of already-encoded items
pub fn encode_sequence(items: &[Vec<u8>]) -> Vec<u8> {
    encode_tlv(TAG_SEQUENCE, &items.concat())
}

/// Encode (non-negative, big-endian) INTEGER
pub fn encode_integer(value: &[u8]) -> Vec<u8> {
    let mut content: Vec<u8> = value.iter().skip_while(|b| **b == 0).cloned().collect();
    if content.is_empty() || (content[0] & 0x80) != 0 {
        content.insert(0, 0);
    }
    encode_tlv(TAG_INTEGER, &content)
}

/// Encode OCTET STRING
pub fn encode_octet_string(value: &[u8]) -> Vec<u8> {
    encode_tlv(TAG_OCTET_STRING, value)
}

/// Encode BIT STRING (no unused bits)
pub fn encode_bit_string(value: &[u8]) -> Vec<u8> {
    let mut content = vec![0u8];
    content.extend_from_slice(value);
    encode_tlv(TAG_BIT_STRING, &content)
}

/// Encode NULL
pub fn encode_null() -> Vec<u8> {
    vec![TAG_NULL, 0]
}

/// Encode ENUMERATED (single octet value)
pub fn encode_enumerated(value: u8) -> Vec<u8> {
    encode_tlv(TAG_ENUMERATED, &[value])
}

/// Encode a dotted-decimal object identifier
///
/// # Arguments
///
/// * `oid` - Dotted OID string (for instance `1.3.6.1.5.5.7.48.1`)
///
/// # Returns
///
/// A [`Result`] containing the complete OID TLV.
///
pub fn encode_oid(oid: &str) -> Result<Vec<u8>, AppError> {
    let parsed_oid = Oid::from_str(oid)
        .map_err(|err| AppError::General(format!("Invalid OID: oid={}, err={:?}", oid, &err)))?;
    Ok(encode_tlv(TAG_OID, parsed_oid.as_bytes()))
}

/// Decode an OBJECT IDENTIFIER element into dotted-decimal form
pub fn decode_oid(element: &DerElement<'_>) -> Result<String, AppError> {
    Oid::try_from(element.any.clone())
        .map(|oid| oid.to_id_string())
        .map_err(|err| AppError::General(format!("Invalid OID: err={:?}", &err)))
}

/// Encode a GeneralizedTime (`YYYYMMDDHHMMSSZ`)
pub fn encode_generalized_time(datetime: &OffsetDateTime) -> Vec<u8> {
    let utc = datetime.to_offset(UtcOffset::UTC);
    let text = format!(
        "{:04}{:02}{:02}{:02}{:02}{:02}Z",
        utc.year(),
        utc.month() as u8,
        utc.day(),
        utc.hour(),
        utc.minute(),
        utc.second()
    );
    encode_tlv(TAG_GENERALIZED_TIME, text.as_bytes())
}

/// Decode a GeneralizedTime element. Fractional seconds are accepted and truncated.
pub fn decode_generalized_time(element: &DerElement<'_>) -> Result<OffsetDateTime, AppError> {
    let invalid_fn = |err: &dyn std::fmt::Debug| {
        AppError::General(format!(
            "Invalid GeneralizedTime: val={}, err={:?}",
            String::from_utf8_lossy(element.content()),
            err
        ))
    };

    GeneralizedTime::try_from(element.any.clone())
        .map_err(|err| invalid_fn(&err))?
        .utc_datetime()
        .map_err(|err| invalid_fn(&err))?
        .replace_nanosecond(0)
        .map_err(|err| invalid_fn(&err))
}
