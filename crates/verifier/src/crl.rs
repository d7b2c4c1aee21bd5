//! CRL revocation checking: download and signature validation of CRLs, the revoked-certificate
//! index, and the freshness/grace-period decision.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration as StdDuration;

use ::time::{Duration, OffsetDateTime};
use pki_types::pem::PemObject;
use pki_types::CertificateRevocationListDer;
use x509_parser::prelude::*;
use x509_parser::revocation_list::CertificateRevocationList;

use crate::cache::{CertificateCache, Population, PopulationSource};
use crate::cert_utils;
use crate::http::HttpFetch;
use crate::model::{
    millis_to_duration, saturating_add, CacheRequest, CertificateCacheEntry, CrlCacheEntry,
    CrlConfig, FailureMode, RevocationStatus, RevokedCertificateEntry, VerificationMethod,
    VerificationResult, VerificationStatus,
};
use crate::repository::table::{Table, ATTR_CRL_SOURCE};
use crate::repository::Tables;
use certcheck_common::crypto::x509;
use certcheck_common::error::AppError;
use certcheck_common::logging::{debug, error, info, warn};
use certcheck_common::target;

/// Validity window assumed for CRLs lacking `nextUpdate`
const DEFAULT_CRL_VALIDITY: Duration = Duration::days(7);

pub const REASON_CRL_EXPIRED: &str = "crl-expired";
pub const REASON_CRL_UNAVAILABLE: &str = "crl-unavailable";

/// Outcome of a per-certificate CRL decision
#[derive(Clone, Debug, PartialEq)]
pub struct CrlCheckResult {
    pub status: RevocationStatus,
    pub reason: Option<String>,
    /// Distribution point backing the status
    pub source: Option<String>,
    /// `nextUpdate` of the CRL backing the status
    pub next_update: Option<OffsetDateTime>,
}

impl CrlCheckResult {
    fn unknown(reason: &str) -> Self {
        Self {
            status: RevocationStatus::Unknown,
            reason: Some(reason.to_string()),
            source: None,
            next_update: None,
        }
    }

    /// Decision backed by a fresh CRL listing
    fn from_listing(
        revoked_serials: &HashMap<String, Option<String>>,
        serial_number: &str,
        crl_url: &str,
        next_update: OffsetDateTime,
    ) -> Self {
        let (status, reason) = match revoked_serials.get(serial_number) {
            Some(reason) => (RevocationStatus::Revoked, reason.clone()),
            None => (RevocationStatus::Good, None),
        };
        Self {
            status,
            reason,
            source: Some(crl_url.to_string()),
            next_update: Some(next_update),
        }
    }
}

/// A downloaded, signature-validated CRL
pub struct DownloadedCrl {
    pub entry: CrlCacheEntry,
    /// Revoked serials (normalized hex) and reason names
    pub revoked_serials: HashMap<String, Option<String>>,
}

/// CRL based verifier
pub struct CrlVerifier {
    cache: Arc<CertificateCache>,
    crl_cache: Arc<dyn Table<CrlCacheEntry>>,
    revoked_certificates: Arc<dyn Table<RevokedCertificateEntry>>,
    http: Arc<dyn HttpFetch>,
    ingestion_order: Arc<IngestionOrder>,
    ingestions: Mutex<Vec<JoinHandle<()>>>,
}

impl CrlVerifier {
    /// CrlVerifier constructor
    ///
    /// # Arguments
    ///
    /// * `tables` - CRL cache and revoked certificate tables
    /// * `cache` - Shared certificate status cache
    /// * `http` - HTTP client used to download CRLs
    ///
    /// # Returns
    ///
    /// A newly constructed [`CrlVerifier`] object.
    ///
    pub fn new(tables: &Tables, cache: Arc<CertificateCache>, http: Arc<dyn HttpFetch>) -> Self {
        Self {
            cache,
            crl_cache: tables.crl_cache.clone(),
            revoked_certificates: tables.revoked_certificates.clone(),
            http,
            ingestion_order: Arc::new(IngestionOrder::default()),
            ingestions: Mutex::new(Vec::new()),
        }
    }

    /// Verify certificate revocation status via CRL
    ///
    /// # Arguments
    ///
    /// * `cert_der` - Certificate to check
    /// * `issuer_der` - Issuer of certificate
    /// * `config` - CRL configuration
    /// * `crl_urls` - Distribution points (extracted from certificate when not supplied)
    ///
    /// # Returns
    ///
    /// A [`Result`] containing the verification result. The only error is a
    /// [`AppError::SignatureVerification`] for a CRL failing signature validation, other failures
    /// are mapped according to the failure mode.
    ///
    pub fn verify_crl(
        &self,
        cert_der: &[u8],
        issuer_der: &[u8],
        config: &CrlConfig,
        crl_urls: Option<&[String]>,
    ) -> Result<VerificationResult, AppError> {
        if !config.enabled {
            return Ok(VerificationResult::new(true, VerificationStatus::Disabled));
        }

        let crl_urls = match crl_urls {
            Some(crl_urls) => crl_urls.to_vec(),
            None => cert_utils::extract_crl_distribution_points(cert_der),
        };
        if crl_urls.is_empty() {
            return Ok(VerificationResult::new(
                true,
                VerificationStatus::NoCrlDistributionPoints,
            ));
        }

        let cache_key = cert_utils::create_cache_key(
            &cert_utils::buffer_to_pem(cert_der),
            &cert_utils::buffer_to_pem(issuer_der),
            &VerificationMethod::Crl.to_string(),
            None,
        );
        let request = CacheRequest::Crl {
            cert_der: cert_der.to_vec(),
            issuer_der: issuer_der.to_vec(),
            config: config.clone(),
            crl_urls,
        };

        match self.cache.get(&cache_key, &request, self) {
            Ok(lookup) => Ok(VerificationResult::new(
                lookup.entry.status == RevocationStatus::Good,
                lookup.entry.status.into(),
            )
            .with_method(VerificationMethod::Crl)
            .with_cached(lookup.cached)
            .with_reason(lookup.entry.reason)),
            Err(err) if err.is_signature_failure() => {
                error(
                    &target!(),
                    &format!("CRL signature verification failed: err={:?}", &err),
                );
                Err(err)
            }
            Err(err) => {
                warn(
                    &target!(),
                    &format!(
                        "CRL verification error: mode={}, err={:?}",
                        &config.failure_mode, &err
                    ),
                );
                let result = match config.failure_mode {
                    FailureMode::FailClosed => {
                        VerificationResult::new(false, VerificationStatus::Error)
                    }
                    FailureMode::FailOpen => {
                        VerificationResult::new(true, VerificationStatus::ErrorAllowed)
                    }
                };
                Ok(result
                    .with_method(VerificationMethod::Crl)
                    .with_error(&err.to_string()))
            }
        }
    }

    /// Decide a certificate's revocation status from the revoked index and CRL freshness
    ///
    /// # Arguments
    ///
    /// * `cert_der` - Certificate to check
    /// * `issuer_der` - Issuer of certificate
    /// * `config` - CRL configuration
    /// * `crl_urls` - Distribution points to establish freshness with
    ///
    /// # Returns
    ///
    /// A [`Result`] containing the decision. Identity extraction and signature failures are
    /// errors.
    ///
    pub fn perform_crl_check(
        &self,
        cert_der: &[u8],
        issuer_der: &[u8],
        config: &CrlConfig,
        crl_urls: &[String],
    ) -> Result<CrlCheckResult, AppError> {
        let serial_number = cert_utils::extract_serial_number(cert_der)?;
        let issuer_key_id = cert_utils::extract_issuer_key_id(cert_der)?;
        let composite_id = cert_utils::create_revoked_certificate_id(&issuer_key_id, &serial_number);
        let now = OffsetDateTime::now_utc();

        if let Some(revoked) = self.revoked_certificates.get(&composite_id)? {
            let grace_period = millis_to_duration(config.grace_period);
            let mut result = CrlCheckResult {
                status: RevocationStatus::Revoked,
                reason: revoked.revocation_reason.clone(),
                source: Some(revoked.crl_source.clone()),
                next_update: Some(revoked.crl_next_update),
            };

            if now < revoked.crl_next_update {
                return Ok(result);
            } else if now < saturating_add(revoked.crl_next_update, grace_period) {
                warn(
                    &target!(),
                    &format!(
                        "Using stale CRL within grace period: id={}, src={}, next_update={}",
                        &composite_id, &revoked.crl_source, &revoked.crl_next_update
                    ),
                );
                return Ok(result);
            }

            result.status = RevocationStatus::Unknown;
            result.reason = Some(REASON_CRL_EXPIRED.to_string());
            return Ok(result);
        }

        // Positively confirm freshness for a distribution point before reporting good
        for crl_url in crl_urls {
            if let Some(cached_crl) = self.crl_cache.get(crl_url)? {
                if cached_crl.signature_valid && (now < cached_crl.next_update) {
                    // The cached listing itself decides, the index may lag behind ingestion
                    match parse_x509_crl(&cached_crl.crl_blob) {
                        Ok((_, crl)) => {
                            return Ok(CrlCheckResult::from_listing(
                                &revoked_serials(&crl),
                                &serial_number,
                                crl_url,
                                cached_crl.next_update,
                            ))
                        }
                        Err(err) => warn(
                            &target!(),
                            &format!(
                                "Discarding unparseable cached CRL: url={}, err={:?}",
                                crl_url, &err
                            ),
                        ),
                    }
                }
            }

            match self.download_and_parse_crl(crl_url, issuer_der, config) {
                Ok(downloaded) => {
                    return Ok(CrlCheckResult::from_listing(
                        &downloaded.revoked_serials,
                        &serial_number,
                        crl_url,
                        downloaded.entry.next_update,
                    ));
                }
                Err(err) if err.is_signature_failure() => return Err(err),
                Err(err) => warn(
                    &target!(),
                    &format!("Unable to refresh CRL: url={}, err={:?}", crl_url, &err),
                ),
            }
        }

        Ok(CrlCheckResult::unknown(REASON_CRL_UNAVAILABLE))
    }

    /// Download, validate and store a CRL, then ingest its revoked list in the background
    ///
    /// # Arguments
    ///
    /// * `crl_url` - Distribution point
    /// * `issuer_der` - Expected CRL signer
    /// * `config` - CRL configuration
    ///
    /// # Returns
    ///
    /// A [`Result`] containing the validated CRL. An invalid signature yields an
    /// [`AppError::SignatureVerification`] error.
    ///
    pub fn download_and_parse_crl(
        &self,
        crl_url: &str,
        issuer_der: &[u8],
        config: &CrlConfig,
    ) -> Result<DownloadedCrl, AppError> {
        let body = self
            .http
            .get(crl_url, StdDuration::from_millis(config.timeout))?;
        let crl_der = decode_crl_body(body);

        let (_, crl) = parse_x509_crl(&crl_der).map_err(|err| {
            AppError::General(format!("Failed parsing CRL: url={}, err={:?}", crl_url, &err))
        })?;
        let issuer = x509::parse_der_certificate(issuer_der)?;
        crl.verify_signature(issuer.public_key()).map_err(|err| {
            AppError::SignatureVerification(format!(
                "Invalid CRL signature: url={}, err={:?}",
                crl_url, &err
            ))
        })?;

        let now = OffsetDateTime::now_utc();
        let this_update = crl.last_update().to_datetime();
        let next_update = crl
            .next_update()
            .map(|next_update| next_update.to_datetime())
            .unwrap_or_else(|| saturating_add(this_update, DEFAULT_CRL_VALIDITY));
        let cache_ttl = millis_to_duration(config.cache_ttl);
        let revoked_serials = revoked_serials(&crl);

        let entry = CrlCacheEntry {
            distribution_point: crl_url.to_string(),
            issuer_dn: crl.issuer().to_string(),
            crl_blob: crl_der.clone(),
            this_update,
            next_update,
            signature_valid: true,
            expires_at: next_update.min(saturating_add(now, cache_ttl)),
        };
        if let Err(err) = self.crl_cache.put(entry.clone()) {
            warn(
                &target!(),
                &format!("Failed to store CRL: url={}, err={:?}", crl_url, &err),
            );
        }
        info(
            &target!(),
            &format!(
                "Downloaded CRL: url={}, revoked={}, next_update={}",
                crl_url,
                revoked_serials.len(),
                &next_update
            ),
        );

        self.spawn_revoked_certificates_ingestion(
            crl_der,
            issuer_der,
            crl_url,
            this_update,
            next_update,
            millis_to_duration(config.grace_period),
        );

        Ok(DownloadedCrl {
            entry,
            revoked_serials,
        })
    }

    /// Block until all background revoked list ingestions have finished
    pub fn wait_for_ingestions(&self) {
        let handles: Vec<JoinHandle<()>> = match self.ingestions.lock() {
            Ok(mut ingestions) => ingestions.drain(..).collect(),
            Err(_) => return,
        };
        for handle in handles {
            if handle.join().is_err() {
                error(&target!(), "Revoked certificates ingestion panicked");
            }
        }
    }

    fn spawn_revoked_certificates_ingestion(
        &self,
        crl_der: Vec<u8>,
        issuer_der: &[u8],
        crl_url: &str,
        this_update: OffsetDateTime,
        next_update: OffsetDateTime,
        grace_period: Duration,
    ) {
        let revoked_certificates = self.revoked_certificates.clone();
        let ingestion_order = self.ingestion_order.clone();
        let issuer_der = issuer_der.to_vec();
        let crl_url = crl_url.to_string();

        let handle = thread::spawn(move || {
            match ingestion_order.ingest(
                revoked_certificates.as_ref(),
                &crl_der,
                &issuer_der,
                &crl_url,
                this_update,
                next_update,
                grace_period,
            ) {
                Ok(Some(count)) => debug(
                    &target!(),
                    &format!("Ingested revoked certificates: url={}, count={}", &crl_url, count),
                ),
                Ok(None) => debug(
                    &target!(),
                    &format!(
                        "Skipped ingestion of superseded CRL: url={}, this_update={}",
                        &crl_url, &this_update
                    ),
                ),
                Err(err) => error(
                    &target!(),
                    &format!(
                        "Failed ingesting revoked certificates: url={}, err={:?}",
                        &crl_url, &err
                    ),
                ),
            }
        });

        if let Ok(mut ingestions) = self.ingestions.lock() {
            ingestions.retain(|ingestion| !ingestion.is_finished());
            ingestions.push(handle);
        }
    }
}

impl PopulationSource for CrlVerifier {
    fn populate(&self, request: &CacheRequest) -> Result<Population, AppError> {
        let (cert_der, issuer_der, config, crl_urls) = match request {
            CacheRequest::Crl {
                cert_der,
                issuer_der,
                config,
                crl_urls,
            } => (cert_der, issuer_der, config, crl_urls),
            CacheRequest::Ocsp { .. } => {
                return Err(AppError::General(
                    "CRL verifier received OCSP request".to_string(),
                ))
            }
        };

        let check = self.perform_crl_check(cert_der, issuer_der, config, crl_urls)?;
        let now = OffsetDateTime::now_utc();
        let ttl_expiry = saturating_add(now, millis_to_duration(config.cache_ttl));
        let expires_at = match (check.status, check.next_update) {
            (RevocationStatus::Good, Some(next_update)) => next_update.min(ttl_expiry),
            _ => ttl_expiry,
        };

        Ok(Population {
            entry: CertificateCacheEntry {
                certificate_id: String::new(),
                status: check.status,
                reason: check.reason,
                checked_at: now,
                expires_at,
                method: VerificationMethod::Crl,
                source: check.source,
            },
            // Unknown is retried on the next handshake
            cacheable: check.status != RevocationStatus::Unknown,
        })
    }
}

/// Serializes revoked index refreshes per distribution point, remembering the `thisUpdate` of
/// the newest CRL applied to each
#[derive(Default)]
struct IngestionOrder {
    applied: Mutex<HashMap<String, Arc<Mutex<Option<OffsetDateTime>>>>>,
}

impl IngestionOrder {
    /// Ingest a CRL unless a later issued CRL was already applied for its distribution point
    ///
    /// # Returns
    ///
    /// A [`Result`] containing the number of inserted rows, or `None` when the CRL was superseded.
    ///
    #[allow(clippy::too_many_arguments)]
    fn ingest(
        &self,
        revoked_certificates: &dyn Table<RevokedCertificateEntry>,
        crl_der: &[u8],
        issuer_der: &[u8],
        crl_source: &str,
        this_update: OffsetDateTime,
        next_update: OffsetDateTime,
        grace_period: Duration,
    ) -> Result<Option<usize>, AppError> {
        let source_lock = self
            .applied
            .lock()
            .map_err(|err| {
                AppError::General(format!("Failed to acquire ingestion lock: err={:?}", &err))
            })?
            .entry(crl_source.to_string())
            .or_default()
            .clone();
        let mut applied_this_update = source_lock.lock().map_err(|err| {
            AppError::General(format!(
                "Failed to acquire ingestion lock: url={}, err={:?}",
                crl_source, &err
            ))
        })?;

        if matches!(*applied_this_update, Some(applied) if applied > this_update) {
            return Ok(None);
        }

        let inserted = process_revoked_certificates(
            revoked_certificates,
            crl_der,
            issuer_der,
            crl_source,
            next_update,
            grace_period,
        )?;
        *applied_this_update = Some(this_update);
        Ok(Some(inserted))
    }
}

/// Replace the revoked index rows of a distribution point with the CRL's revoked list
///
/// # Arguments
///
/// * `revoked_certificates` - Revoked certificate index
/// * `crl_der` - Validated CRL
/// * `issuer_der` - CRL issuer certificate
/// * `crl_source` - Distribution point of CRL
/// * `next_update` - CRL `nextUpdate`
/// * `grace_period` - Stale CRL grace period
///
/// # Returns
///
/// A [`Result`] containing the number of inserted rows. Each revoked serial is indexed under
/// every issuer key id of the CRL issuer. Per-entry failures are logged and skipped.
///
pub fn process_revoked_certificates(
    revoked_certificates: &dyn Table<RevokedCertificateEntry>,
    crl_der: &[u8],
    issuer_der: &[u8],
    crl_source: &str,
    next_update: OffsetDateTime,
    grace_period: Duration,
) -> Result<usize, AppError> {
    let (_, crl) = parse_x509_crl(crl_der).map_err(|err| {
        AppError::General(format!(
            "Failed parsing CRL: url={}, err={:?}",
            crl_source, &err
        ))
    })?;
    let issuer = x509::parse_der_certificate(issuer_der).ok();
    let issuer_key_ids = cert_utils::extract_crl_issuer_key_ids(&crl, issuer.as_ref());

    match revoked_certificates.purge_expired() {
        Ok(purged) if purged > 0 => debug(
            &target!(),
            &format!("Purged expired revoked certificates: count={}", purged),
        ),
        Ok(_) => {}
        Err(err) => warn(
            &target!(),
            &format!("Failed purging revoked certificates: err={:?}", &err),
        ),
    }
    for stale in revoked_certificates.search_by(ATTR_CRL_SOURCE, crl_source)? {
        revoked_certificates.delete(&stale.composite_id)?;
    }

    let expires_at = saturating_add(next_update, grace_period);
    let mut inserted = 0;
    for revoked in crl.iter_revoked_certificates() {
        let serial_number = cert_utils::normalize_serial(revoked.raw_serial());
        let revocation_reason = revoked
            .reason_code()
            .map(|(_, reason_code)| cert_utils::revocation_reason_name(reason_code.0));

        for issuer_key_id in issuer_key_ids.iter() {
            let entry = RevokedCertificateEntry {
                composite_id: cert_utils::create_revoked_certificate_id(
                    issuer_key_id,
                    &serial_number,
                ),
                serial_number: serial_number.clone(),
                issuer_key_id: issuer_key_id.clone(),
                revocation_date: revoked.revocation_date.to_datetime(),
                revocation_reason: revocation_reason.clone(),
                crl_source: crl_source.to_string(),
                crl_next_update: next_update,
                expires_at,
            };

            match revoked_certificates.put(entry) {
                Ok(_) => inserted += 1,
                Err(err) => warn(
                    &target!(),
                    &format!(
                        "Skipping revoked certificate: url={}, serial={}, err={:?}",
                        crl_source, &serial_number, &err
                    ),
                ),
            }
        }
    }

    Ok(inserted)
}

/// Revoked serials (normalized hex) and reason names listed by a CRL
fn revoked_serials(crl: &CertificateRevocationList<'_>) -> HashMap<String, Option<String>> {
    crl.iter_revoked_certificates()
        .map(|revoked| {
            (
                cert_utils::normalize_serial(revoked.raw_serial()),
                revoked
                    .reason_code()
                    .map(|(_, reason_code)| cert_utils::revocation_reason_name(reason_code.0)),
            )
        })
        .collect()
}

/// Accept DER or PEM (`X509 CRL`) bodies
fn decode_crl_body(body: Vec<u8>) -> Vec<u8> {
    match CertificateRevocationListDer::from_pem_slice(&body) {
        Ok(crl) => crl.to_vec(),
        Err(_) => body,
    }
}

/// Unit tests
#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::tests::MockHttpFetcher;
    use crate::repository::in_memory_table::InMemTable;
    use crate::repository::table::tests::MockRevokedCertTable;
    use certcheck_common::testutils::TestCa;
    use mockall::predicate;
    use std::collections::BTreeSet;

    const CRL_URL0: &str = "http://crl0.example/ca.crl";
    const CRL_URL1: &str = "http://crl1.example/ca.crl";

    // utils
    // =====

    struct Fixture {
        ca: TestCa,
        leaf_der: Vec<u8>,
        tables: Tables,
    }

    impl Fixture {
        fn new(serial_number: &[u8]) -> Self {
            let ca = TestCa::new("Test CA 0");
            let leaf_der = ca.issue_leaf("client0", serial_number, &[CRL_URL0], &[]);
            Self {
                ca,
                leaf_der,
                tables: Tables::in_memory(),
            }
        }

        fn verifier(&self, http: MockHttpFetcher) -> CrlVerifier {
            CrlVerifier::new(
                &self.tables,
                Arc::new(CertificateCache::new(self.tables.certificate_cache.clone())),
                Arc::new(http),
            )
        }

        fn crl(&self, revoked: &[&[u8]]) -> Vec<u8> {
            let now = OffsetDateTime::now_utc();
            let revoked: Vec<(&[u8], OffsetDateTime)> = revoked
                .iter()
                .map(|serial| (*serial, now - Duration::days(1)))
                .collect();
            self.ca
                .sign_crl(&revoked, now - Duration::hours(1), now + Duration::days(1))
        }

        fn revoked_entry(
            &self,
            crl_next_update: OffsetDateTime,
            expires_at: OffsetDateTime,
        ) -> RevokedCertificateEntry {
            let serial_number = cert_utils::extract_serial_number(&self.leaf_der).unwrap();
            let issuer_key_id = cert_utils::extract_issuer_key_id(&self.leaf_der).unwrap();
            RevokedCertificateEntry {
                composite_id: cert_utils::create_revoked_certificate_id(
                    &issuer_key_id,
                    &serial_number,
                ),
                serial_number,
                issuer_key_id,
                revocation_date: OffsetDateTime::now_utc() - Duration::days(2),
                revocation_reason: Some("keyCompromise".to_string()),
                crl_source: CRL_URL0.to_string(),
                crl_next_update,
                expires_at,
            }
        }
    }

    fn indexed_serials(table: &dyn Table<RevokedCertificateEntry>) -> BTreeSet<String> {
        table
            .search_by(ATTR_CRL_SOURCE, CRL_URL0)
            .unwrap()
            .into_iter()
            .map(|entry| entry.serial_number)
            .collect()
    }

    fn http_serving(url: &'static str, body: Vec<u8>, times: usize) -> MockHttpFetcher {
        let mut http = MockHttpFetcher::new();
        http.expect_get()
            .with(predicate::eq(url), predicate::always())
            .times(times)
            .returning(move |_, _| Ok(body.clone()));
        http
    }

    fn failing_http(times: usize) -> MockHttpFetcher {
        let mut http = MockHttpFetcher::new();
        http.expect_get()
            .times(times)
            .returning(|url, _| Err(AppError::Timeout(format!("url={}", url))));
        http
    }

    // tests
    // =====

    #[test]
    fn crlverifier_verify_crl_when_disabled() {
        let fixture = Fixture::new(&[0x01]);
        let mut http = MockHttpFetcher::new();
        http.expect_get().never();
        let config = CrlConfig {
            enabled: false,
            ..CrlConfig::default()
        };

        let result = fixture
            .verifier(http)
            .verify_crl(&fixture.leaf_der, &fixture.ca.der(), &config, None)
            .unwrap();

        assert_eq!(
            result,
            VerificationResult::new(true, VerificationStatus::Disabled)
        );
    }

    #[test]
    fn crlverifier_verify_crl_when_no_distribution_points() {
        let fixture = Fixture::new(&[0x01]);
        let leaf_der = fixture.ca.issue_leaf("client1", &[0x02], &[], &[]);
        let mut http = MockHttpFetcher::new();
        http.expect_get().never();

        let result = fixture
            .verifier(http)
            .verify_crl(&leaf_der, &fixture.ca.der(), &CrlConfig::default(), None)
            .unwrap();

        assert_eq!(
            result,
            VerificationResult::new(true, VerificationStatus::NoCrlDistributionPoints)
        );
    }

    #[test]
    fn crlverifier_verify_crl_when_good_then_cached() {
        let fixture = Fixture::new(&[0x01]);
        let crl_der = fixture.crl(&[&[0x05]]);
        let verifier = fixture.verifier(http_serving(CRL_URL0, crl_der, 1));
        let ca_der = fixture.ca.der();

        let result0 = verifier
            .verify_crl(&fixture.leaf_der, &ca_der, &CrlConfig::default(), None)
            .unwrap();
        let result1 = verifier
            .verify_crl(&fixture.leaf_der, &ca_der, &CrlConfig::default(), None)
            .unwrap();

        assert!(result0.valid);
        assert_eq!(result0.status, VerificationStatus::Good);
        assert_eq!(result0.method, Some(VerificationMethod::Crl));
        assert_eq!(result0.cached, Some(false));
        assert_eq!(result1.status, VerificationStatus::Good);
        assert_eq!(result1.cached, Some(true));
        verifier.wait_for_ingestions();
    }

    #[test]
    fn crlverifier_verify_crl_when_revoked_in_fresh_download() {
        let fixture = Fixture::new(&[0x0a]);
        let crl_der = fixture.crl(&[&[0x0a]]);
        let verifier = fixture.verifier(http_serving(CRL_URL0, crl_der, 1));

        let result = verifier
            .verify_crl(&fixture.leaf_der, &fixture.ca.der(), &CrlConfig::default(), None)
            .unwrap();

        assert!(!result.valid);
        assert_eq!(result.status, VerificationStatus::Revoked);
        assert_eq!(result.reason, Some("keyCompromise".to_string()));
        verifier.wait_for_ingestions();
    }

    #[test]
    fn crlverifier_verify_crl_when_pem_encoded_crl() {
        let fixture = Fixture::new(&[0x0a]);
        let crl_der = fixture.crl(&[&[0x0a]]);
        let crl_pem = ::pem::encode(&::pem::Pem::new("X509 CRL", crl_der));
        let verifier = fixture.verifier(http_serving(CRL_URL0, crl_pem.into_bytes(), 1));

        let result = verifier
            .verify_crl(&fixture.leaf_der, &fixture.ca.der(), &CrlConfig::default(), None)
            .unwrap();

        assert_eq!(result.status, VerificationStatus::Revoked);
        verifier.wait_for_ingestions();
    }

    #[test]
    fn crlverifier_verify_crl_when_invalid_signature_and_fail_open() {
        let fixture = Fixture::new(&[0x01]);
        let forged_crl_der = TestCa::new("Test CA 0").sign_crl(
            &[],
            OffsetDateTime::now_utc(),
            OffsetDateTime::now_utc() + Duration::days(1),
        );
        let verifier = fixture.verifier(http_serving(CRL_URL0, forged_crl_der, 1));
        let config = CrlConfig::with_failure_mode(FailureMode::FailOpen);

        match verifier.verify_crl(&fixture.leaf_der, &fixture.ca.der(), &config, None) {
            Err(err) => assert!(err.is_signature_failure()),
            Ok(result) => panic!("Unexpected result: val={:?}", &result),
        }
        assert!(fixture.tables.crl_cache.get(CRL_URL0).unwrap().is_none());
    }

    #[test]
    fn crlverifier_verify_crl_when_unavailable_then_not_cached() {
        let fixture = Fixture::new(&[0x01]);
        let verifier = fixture.verifier(failing_http(2));
        let ca_der = fixture.ca.der();

        let result0 = verifier
            .verify_crl(&fixture.leaf_der, &ca_der, &CrlConfig::default(), None)
            .unwrap();
        let result1 = verifier
            .verify_crl(&fixture.leaf_der, &ca_der, &CrlConfig::default(), None)
            .unwrap();

        assert!(!result0.valid);
        assert_eq!(result0.status, VerificationStatus::Unknown);
        assert_eq!(result0.reason, Some(REASON_CRL_UNAVAILABLE.to_string()));
        assert_eq!(result1.cached, Some(false));
    }

    #[test]
    fn crlverifier_verify_crl_when_error_and_failure_modes() {
        let fixture = Fixture::new(&[0x01]);
        let crl_urls = vec![CRL_URL0.to_string()];
        let ca_der = fixture.ca.der();

        let mut http = MockHttpFetcher::new();
        http.expect_get().never();
        let verifier = fixture.verifier(http);

        let closed = verifier
            .verify_crl(
                &[1, 2, 3],
                &ca_der,
                &CrlConfig::with_failure_mode(FailureMode::FailClosed),
                Some(&crl_urls),
            )
            .unwrap();
        let open = verifier
            .verify_crl(
                &[1, 2, 3],
                &ca_der,
                &CrlConfig::with_failure_mode(FailureMode::FailOpen),
                Some(&crl_urls),
            )
            .unwrap();

        assert!(!closed.valid);
        assert_eq!(closed.status, VerificationStatus::Error);
        assert!(closed.error.is_some());
        assert!(open.valid);
        assert_eq!(open.status, VerificationStatus::ErrorAllowed);
    }

    #[test]
    fn crlverifier_perform_crl_check_when_cached_crl_fresh() {
        let fixture = Fixture::new(&[0x01]);
        let crl_der = fixture.crl(&[]);
        let verifier = fixture.verifier(http_serving(CRL_URL0, crl_der, 1));
        let ca_der = fixture.ca.der();
        let other_leaf_der = fixture.ca.issue_leaf("client1", &[0x02], &[CRL_URL0], &[]);
        let crl_urls = vec![CRL_URL0.to_string()];

        let check0 = verifier
            .perform_crl_check(&fixture.leaf_der, &ca_der, &CrlConfig::default(), &crl_urls)
            .unwrap();
        let check1 = verifier
            .perform_crl_check(&other_leaf_der, &ca_der, &CrlConfig::default(), &crl_urls)
            .unwrap();

        assert_eq!(check0.status, RevocationStatus::Good);
        assert_eq!(check1.status, RevocationStatus::Good);
        assert_eq!(check1.source, Some(CRL_URL0.to_string()));
        verifier.wait_for_ingestions();
    }

    #[test]
    fn crlverifier_perform_crl_check_when_second_point_fresh() {
        let fixture = Fixture::new(&[0x01]);
        let crl_der = fixture.crl(&[]);
        let mut http = MockHttpFetcher::new();
        http.expect_get()
            .with(predicate::eq(CRL_URL0), predicate::always())
            .times(1)
            .returning(|_, _| Err(AppError::General("refused".to_string())));
        http.expect_get()
            .with(predicate::eq(CRL_URL1), predicate::always())
            .times(1)
            .returning(move |_, _| Ok(crl_der.clone()));
        let verifier = fixture.verifier(http);

        let check = verifier
            .perform_crl_check(
                &fixture.leaf_der,
                &fixture.ca.der(),
                &CrlConfig::default(),
                &[CRL_URL0.to_string(), CRL_URL1.to_string()],
            )
            .unwrap();

        assert_eq!(check.status, RevocationStatus::Good);
        assert_eq!(check.source, Some(CRL_URL1.to_string()));
        verifier.wait_for_ingestions();
    }

    #[test]
    fn crlverifier_perform_crl_check_when_revoked_within_and_past_grace_period() {
        let fixture = Fixture::new(&[0x0b]);
        let verifier = fixture.verifier(failing_http(0));
        let ca_der = fixture.ca.der();
        let crl_urls = vec![CRL_URL0.to_string()];
        let config = CrlConfig {
            grace_period: 3_600_000,
            ..CrlConfig::default()
        };
        let now = OffsetDateTime::now_utc();
        let expires_at = now + Duration::days(1);

        fixture
            .tables
            .revoked_certificates
            .put(fixture.revoked_entry(now + Duration::hours(1), expires_at))
            .unwrap();
        let current = verifier
            .perform_crl_check(&fixture.leaf_der, &ca_der, &config, &crl_urls)
            .unwrap();
        assert_eq!(current.status, RevocationStatus::Revoked);
        assert_eq!(current.source, Some(CRL_URL0.to_string()));

        fixture
            .tables
            .revoked_certificates
            .put(fixture.revoked_entry(now - Duration::minutes(30), expires_at))
            .unwrap();
        let within_grace = verifier
            .perform_crl_check(&fixture.leaf_der, &ca_der, &config, &crl_urls)
            .unwrap();
        assert_eq!(within_grace.status, RevocationStatus::Revoked);
        assert_eq!(within_grace.reason, Some("keyCompromise".to_string()));

        fixture
            .tables
            .revoked_certificates
            .put(fixture.revoked_entry(now - Duration::hours(2), expires_at))
            .unwrap();
        let past_grace = verifier
            .perform_crl_check(&fixture.leaf_der, &ca_der, &config, &crl_urls)
            .unwrap();
        assert_eq!(past_grace.status, RevocationStatus::Unknown);
        assert_eq!(past_grace.reason, Some(REASON_CRL_EXPIRED.to_string()));
    }

    #[test]
    fn crlverifier_perform_crl_check_when_identity_unparseable() {
        let fixture = Fixture::new(&[0x01]);
        let verifier = fixture.verifier(failing_http(0));

        assert!(verifier
            .perform_crl_check(
                &[0x30, 0x00],
                &fixture.ca.der(),
                &CrlConfig::default(),
                &[CRL_URL0.to_string()]
            )
            .is_err());
    }

    #[test]
    fn crlverifier_download_and_parse_crl_when_valid() {
        let fixture = Fixture::new(&[0x01]);
        let crl_der = fixture.crl(&[&[0x0c], &[0x0d]]);
        let verifier = fixture.verifier(http_serving(CRL_URL0, crl_der.clone(), 1));
        let config = CrlConfig {
            cache_ttl: 60_000,
            ..CrlConfig::default()
        };

        let downloaded = verifier
            .download_and_parse_crl(CRL_URL0, &fixture.ca.der(), &config)
            .unwrap();
        verifier.wait_for_ingestions();

        assert_eq!(downloaded.entry.crl_blob, crl_der);
        assert!(downloaded.entry.signature_valid);
        assert!(downloaded.entry.expires_at <= OffsetDateTime::now_utc() + Duration::minutes(1));
        assert!(downloaded.revoked_serials.contains_key("0c"));
        assert!(downloaded.revoked_serials.contains_key("0d"));
        assert_eq!(
            fixture.tables.crl_cache.get(CRL_URL0).unwrap(),
            Some(downloaded.entry)
        );
        assert_eq!(
            indexed_serials(fixture.tables.revoked_certificates.as_ref()),
            BTreeSet::from(["0c".to_string(), "0d".to_string()])
        );
    }

    #[test]
    fn crlverifier_download_and_parse_crl_when_garbage() {
        let fixture = Fixture::new(&[0x01]);
        let verifier = fixture.verifier(http_serving(CRL_URL0, vec![1, 2, 3], 1));

        match verifier.download_and_parse_crl(CRL_URL0, &fixture.ca.der(), &CrlConfig::default())
        {
            Err(err) => assert!(!err.is_signature_failure()),
            Ok(_) => panic!("Unexpected successful result"),
        }
    }

    #[test]
    fn crl_process_revoked_certificates_when_reingested_evicts_stale() {
        let fixture = Fixture::new(&[0x01]);
        let ca_der = fixture.ca.der();
        let table: InMemTable<RevokedCertificateEntry> = InMemTable::new("revoked");
        let next_update = OffsetDateTime::now_utc() + Duration::days(1);
        let crl_v1 = fixture.crl(&[&[0x0a], &[0x0b]]);
        let crl_v2 = fixture.crl(&[&[0x0b]]);

        let inserted_v1 = process_revoked_certificates(
            &table,
            &crl_v1,
            &ca_der,
            CRL_URL0,
            next_update,
            Duration::ZERO,
        )
        .unwrap();
        let inserted_v2 = process_revoked_certificates(
            &table,
            &crl_v2,
            &ca_der,
            CRL_URL0,
            next_update,
            Duration::ZERO,
        )
        .unwrap();

        assert_eq!(inserted_v1, 2 * inserted_v2);
        assert_eq!(table.row_count().unwrap(), inserted_v2);
        assert_eq!(
            indexed_serials(&table),
            BTreeSet::from(["0b".to_string()])
        );
    }

    #[test]
    fn crl_process_revoked_certificates_when_expired_rows_then_purged() {
        let fixture = Fixture::new(&[0x01]);
        let ca_der = fixture.ca.der();
        let table: InMemTable<RevokedCertificateEntry> = InMemTable::new("revoked");
        let crl_der = fixture.crl(&[&[0x0a], &[0x0b]]);
        let now = OffsetDateTime::now_utc();

        let expired = process_revoked_certificates(
            &table,
            &crl_der,
            &ca_der,
            "http://crl9.example/old.crl",
            now - Duration::days(2),
            Duration::days(1),
        )
        .unwrap();
        assert_eq!(table.row_count().unwrap(), expired);

        let inserted = process_revoked_certificates(
            &table,
            &crl_der,
            &ca_der,
            CRL_URL0,
            now + Duration::days(1),
            Duration::ZERO,
        )
        .unwrap();

        assert_eq!(table.row_count().unwrap(), inserted);
    }

    #[test]
    fn crl_process_revoked_certificates_when_huge_grace_period() {
        let fixture = Fixture::new(&[0x01]);
        let table: InMemTable<RevokedCertificateEntry> = InMemTable::new("revoked");
        let crl_der = fixture.crl(&[&[0x0a]]);

        let inserted = process_revoked_certificates(
            &table,
            &crl_der,
            &fixture.ca.der(),
            CRL_URL0,
            OffsetDateTime::now_utc() + Duration::days(1),
            Duration::MAX,
        )
        .unwrap();

        assert!(inserted > 0);
        assert_eq!(indexed_serials(&table), BTreeSet::from(["0a".to_string()]));
    }

    #[test]
    fn crl_process_revoked_certificates_when_entry_put_fails() {
        let fixture = Fixture::new(&[0x01]);
        let ca_der = fixture.ca.der();
        let crl_der = fixture.crl(&[&[0x0a], &[0x0b]]);
        let (_, crl) = parse_x509_crl(&crl_der).unwrap();
        let issuer = x509::parse_der_certificate(&ca_der).unwrap();
        let rows_per_serial = cert_utils::extract_crl_issuer_key_ids(&crl, Some(&issuer)).len();
        let mut table = MockRevokedCertTable::new();
        table.expect_purge_expired().return_once(|| Ok(0));
        table.expect_search_by().return_once(|_, _| Ok(vec![]));
        let mut put_count = 0;
        table
            .expect_put()
            .times(2 * rows_per_serial)
            .returning(move |_| {
                put_count += 1;
                match put_count {
                    1 => Err(AppError::General("write failed".to_string())),
                    _ => Ok(None),
                }
            });

        let inserted = process_revoked_certificates(
            &table,
            &crl_der,
            &ca_der,
            CRL_URL0,
            OffsetDateTime::now_utc() + Duration::days(1),
            Duration::ZERO,
        )
        .unwrap();

        assert_eq!(inserted, 2 * rows_per_serial - 1);
    }

    #[test]
    fn crl_ingestion_order_when_superseded_crl_arrives_late() {
        let fixture = Fixture::new(&[0x01]);
        let ca_der = fixture.ca.der();
        let table: InMemTable<RevokedCertificateEntry> = InMemTable::new("revoked");
        let ingestion_order = IngestionOrder::default();
        let now = OffsetDateTime::now_utc();
        let crl_v1 = fixture.crl(&[&[0x0a], &[0x0b]]);
        let crl_v2 = fixture.crl(&[&[0x0b]]);
        let next_update = now + Duration::days(1);

        let applied_v2 = ingestion_order
            .ingest(
                &table,
                &crl_v2,
                &ca_der,
                CRL_URL0,
                now,
                next_update,
                Duration::ZERO,
            )
            .unwrap();
        let applied_v1 = ingestion_order
            .ingest(
                &table,
                &crl_v1,
                &ca_der,
                CRL_URL0,
                now - Duration::hours(1),
                next_update,
                Duration::ZERO,
            )
            .unwrap();
        let reapplied_v2 = ingestion_order
            .ingest(
                &table,
                &crl_v2,
                &ca_der,
                CRL_URL0,
                now,
                next_update,
                Duration::ZERO,
            )
            .unwrap();

        assert!(applied_v2.is_some());
        assert!(applied_v1.is_none());
        assert_eq!(reapplied_v2, applied_v2);
        assert_eq!(indexed_serials(&table), BTreeSet::from(["0b".to_string()]));
    }

    #[test]
    fn crl_ingestion_order_when_concurrent_refreshes() {
        let fixture = Fixture::new(&[0x01]);
        let ca_der = fixture.ca.der();
        let table: Arc<InMemTable<RevokedCertificateEntry>> = Arc::new(InMemTable::new("revoked"));
        let ingestion_order = Arc::new(IngestionOrder::default());
        let now = OffsetDateTime::now_utc();
        let next_update = now + Duration::days(1);
        let crls = vec![
            (fixture.crl(&[&[0x0a], &[0x0b], &[0x0c]]), now - Duration::hours(2)),
            (fixture.crl(&[&[0x0b], &[0x0c]]), now - Duration::hours(1)),
            (fixture.crl(&[&[0x0c]]), now),
        ];

        let handles: Vec<_> = crls
            .into_iter()
            .rev()
            .map(|(crl_der, this_update)| {
                let table = table.clone();
                let ingestion_order = ingestion_order.clone();
                let ca_der = ca_der.clone();
                thread::spawn(move || {
                    ingestion_order
                        .ingest(
                            table.as_ref(),
                            &crl_der,
                            &ca_der,
                            CRL_URL0,
                            this_update,
                            next_update,
                            Duration::ZERO,
                        )
                        .unwrap()
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(
            indexed_serials(table.as_ref()),
            BTreeSet::from(["0c".to_string()])
        );
    }

    #[test]
    fn crlverifier_perform_crl_check_when_leaves_lack_authority_key_id() {
        let fixture = Fixture::new(&[0x01]);
        let ca_der = fixture.ca.der();
        let leaf0_der =
            fixture
                .ca
                .issue_leaf_without_authority_key_id("client0", &[0x0a], &[CRL_URL0]);
        let leaf1_der =
            fixture
                .ca
                .issue_leaf_without_authority_key_id("client1", &[0x0b], &[CRL_URL0]);
        let crl_der = fixture.crl(&[&[0x0a], &[0x0b]]);
        let crl_urls = vec![CRL_URL0.to_string()];
        let verifier = fixture.verifier(http_serving(CRL_URL0, crl_der, 1));

        let result0 = verifier
            .verify_crl(&leaf0_der, &ca_der, &CrlConfig::default(), None)
            .unwrap();
        verifier.wait_for_ingestions();
        let result1 = verifier
            .verify_crl(&leaf1_der, &ca_der, &CrlConfig::default(), None)
            .unwrap();

        assert_eq!(result0.status, VerificationStatus::Revoked);
        assert!(!result1.valid);
        assert_eq!(result1.status, VerificationStatus::Revoked);

        // Index alone answers once the cached CRL is gone
        fixture.tables.crl_cache.delete(CRL_URL0).unwrap();
        let verifier = fixture.verifier(failing_http(0));
        let check = verifier
            .perform_crl_check(&leaf1_der, &ca_der, &CrlConfig::default(), &crl_urls)
            .unwrap();
        assert_eq!(check.status, RevocationStatus::Revoked);
    }

    #[test]
    fn crlverifier_perform_crl_check_when_cached_crl_lists_serial_but_not_indexed() {
        let fixture = Fixture::new(&[0x0e]);
        let ca_der = fixture.ca.der();
        let crl_der = fixture.crl(&[&[0x0e]]);
        let now = OffsetDateTime::now_utc();
        fixture
            .tables
            .crl_cache
            .put(CrlCacheEntry {
                distribution_point: CRL_URL0.to_string(),
                issuer_dn: "CN=Test CA 0".to_string(),
                crl_blob: crl_der,
                this_update: now - Duration::hours(1),
                next_update: now + Duration::days(1),
                signature_valid: true,
                expires_at: now + Duration::days(1),
            })
            .unwrap();
        let verifier = fixture.verifier(failing_http(0));

        let check = verifier
            .perform_crl_check(
                &fixture.leaf_der,
                &ca_der,
                &CrlConfig::default(),
                &[CRL_URL0.to_string()],
            )
            .unwrap();

        assert_eq!(check.status, RevocationStatus::Revoked);
        assert_eq!(check.reason, Some("keyCompromise".to_string()));
        assert_eq!(check.source, Some(CRL_URL0.to_string()));
    }

    #[test]
    fn crlverifier_verify_crl_when_huge_durations_configured() {
        let fixture = Fixture::new(&[0x01]);
        let crl_der = fixture.crl(&[&[0x05]]);
        let verifier = fixture.verifier(http_serving(CRL_URL0, crl_der, 1));
        let config = CrlConfig {
            cache_ttl: u64::MAX,
            grace_period: u64::MAX,
            ..CrlConfig::default()
        };

        let result = verifier
            .verify_crl(&fixture.leaf_der, &fixture.ca.der(), &config, None)
            .unwrap();
        verifier.wait_for_ingestions();

        assert_eq!(result.status, VerificationStatus::Good);
    }

    #[test]
    fn crl_scenario_revoked_then_dropped_from_refreshed_crl() {
        let fixture = Fixture::new(&[0xaa]);
        let ca_der = fixture.ca.der();
        let crl_urls = vec![CRL_URL0.to_string()];
        let crl_v1 = fixture.crl(&[&[0xaa]]);
        let crl_v2 = fixture.crl(&[]);

        let verifier = fixture.verifier(http_serving(CRL_URL0, crl_v1, 1));
        let check_v1 = verifier
            .perform_crl_check(&fixture.leaf_der, &ca_der, &CrlConfig::default(), &crl_urls)
            .unwrap();
        verifier.wait_for_ingestions();
        assert_eq!(check_v1.status, RevocationStatus::Revoked);
        assert_eq!(check_v1.source, Some(CRL_URL0.to_string()));

        // Indexed revocation answers without network
        let verifier = fixture.verifier(failing_http(0));
        let check_indexed = verifier
            .perform_crl_check(&fixture.leaf_der, &ca_der, &CrlConfig::default(), &crl_urls)
            .unwrap();
        assert_eq!(check_indexed.status, RevocationStatus::Revoked);

        // Refresh (v2 no longer lists serial)
        fixture.tables.crl_cache.delete(CRL_URL0).unwrap();
        let verifier = fixture.verifier(http_serving(CRL_URL0, crl_v2.clone(), 1));
        verifier
            .download_and_parse_crl(CRL_URL0, &ca_der, &CrlConfig::default())
            .unwrap();
        verifier.wait_for_ingestions();
        let check_v2 = verifier
            .perform_crl_check(&fixture.leaf_der, &ca_der, &CrlConfig::default(), &crl_urls)
            .unwrap();
        assert_eq!(check_v2.status, RevocationStatus::Good);

        // Freshness cannot be established
        fixture.tables.crl_cache.delete(CRL_URL0).unwrap();
        let verifier = fixture.verifier(failing_http(1));
        let check_unavailable = verifier
            .perform_crl_check(&fixture.leaf_der, &ca_der, &CrlConfig::default(), &crl_urls)
            .unwrap();
        assert_eq!(check_unavailable.status, RevocationStatus::Unknown);
    }
}
