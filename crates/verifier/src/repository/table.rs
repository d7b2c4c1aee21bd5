use ::time::OffsetDateTime;

use crate::model::{CertificateCacheEntry, CrlCacheEntry, RevokedCertificateEntry};
use certcheck_common::error::AppError;

pub const ATTR_CRL_SOURCE: &str = "crl_source";
pub const ATTR_ISSUER_KEY_ID: &str = "issuer_key_id";

/// A storable row: declares its primary key, indexed secondary attributes and expiry timestamp
pub trait Record: Clone + Send + Sync + 'static {
    /// Names of the indexed secondary attributes
    fn indexed_attributes() -> &'static [&'static str];

    /// Primary key value
    fn primary_key(&self) -> String;

    /// Value of an indexed attribute (`None` when attribute is not indexed or unset)
    fn attribute_value(&self, attribute: &str) -> Option<String>;

    /// Auto-expiring timestamp. Rows are invisible once this has passed.
    fn expires_at(&self) -> OffsetDateTime;

    /// Whether row has expired, relative to the given datetime
    fn is_expired(&self, now: &OffsetDateTime) -> bool {
        self.expires_at() <= *now
    }
}

/// Keyed storage table trait
pub trait Table<R: Record>: Sync + Send {
    /// Creates/replaces a row.
    ///
    /// Returns the previous row (if any), otherwise it returns an error.
    fn put(&self, record: R) -> Result<Option<R>, AppError>;

    /// Gets a (non-expired) row.
    ///
    /// Returns row or None on success, otherwise it returns an error.
    fn get(&self, primary_key: &str) -> Result<Option<R>, AppError>;

    /// Deletes a row.
    ///
    /// Returns previous row or None on success, otherwise it returns an error.
    fn delete(&self, primary_key: &str) -> Result<Option<R>, AppError>;

    /// Searches (non-expired) rows by an indexed attribute.
    ///
    /// Returns matching rows on success, otherwise it returns an error.
    fn search_by(&self, attribute: &str, value: &str) -> Result<Vec<R>, AppError>;

    /// Removes expired rows.
    ///
    /// Returns number of purged rows on success, otherwise it returns an error.
    fn purge_expired(&self) -> Result<usize, AppError>;
}

impl Record for CertificateCacheEntry {
    fn indexed_attributes() -> &'static [&'static str] {
        &[]
    }

    fn primary_key(&self) -> String {
        self.certificate_id.clone()
    }

    fn attribute_value(&self, _attribute: &str) -> Option<String> {
        None
    }

    fn expires_at(&self) -> OffsetDateTime {
        self.expires_at
    }
}

impl Record for CrlCacheEntry {
    fn indexed_attributes() -> &'static [&'static str] {
        &[]
    }

    fn primary_key(&self) -> String {
        self.distribution_point.clone()
    }

    fn attribute_value(&self, _attribute: &str) -> Option<String> {
        None
    }

    fn expires_at(&self) -> OffsetDateTime {
        self.expires_at
    }
}

impl Record for RevokedCertificateEntry {
    fn indexed_attributes() -> &'static [&'static str] {
        &[ATTR_CRL_SOURCE, ATTR_ISSUER_KEY_ID]
    }

    fn primary_key(&self) -> String {
        self.composite_id.clone()
    }

    fn attribute_value(&self, attribute: &str) -> Option<String> {
        match attribute {
            ATTR_CRL_SOURCE => Some(self.crl_source.clone()),
            ATTR_ISSUER_KEY_ID => Some(self.issuer_key_id.clone()),
            _ => None,
        }
    }

    fn expires_at(&self) -> OffsetDateTime {
        self.expires_at
    }
}
