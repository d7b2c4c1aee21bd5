pub mod in_memory_table;
pub mod table;

use std::sync::Arc;

use crate::model::{CertificateCacheEntry, CrlCacheEntry, RevokedCertificateEntry};
use in_memory_table::InMemTable;
use table::Table;

/// Persistent state used by the verifiers
#[derive(Clone)]
pub struct Tables {
    /// Per-certificate status cache (method-tagged hash key)
    pub certificate_cache: Arc<dyn Table<CertificateCacheEntry>>,
    /// Validated CRLs (distribution point key)
    pub crl_cache: Arc<dyn Table<CrlCacheEntry>>,
    /// Revoked certificate index (`issuerKeyId:serial` key)
    pub revoked_certificates: Arc<dyn Table<RevokedCertificateEntry>>,
}

impl Tables {
    /// Tables backed by [`InMemTable`]
    pub fn in_memory() -> Self {
        Self {
            certificate_cache: Arc::new(InMemTable::new("certificate_cache")),
            crl_cache: Arc::new(InMemTable::new("crl_cache")),
            revoked_certificates: Arc::new(InMemTable::new("revoked_certificates")),
        }
    }
}
