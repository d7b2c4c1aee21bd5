//! OCSP revocation checking against the responders listed in a certificate's AIA extension.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use ::time::OffsetDateTime;
use x509_parser::prelude::*;

use crate::cache::{CertificateCache, Population, PopulationSource};
use crate::cert_utils;
use crate::http::HttpFetch;
use crate::model::{
    millis_to_duration, saturating_add, CacheRequest, CertificateCacheEntry, FailureMode, OcspConfig, RevocationStatus,
    VerificationMethod, VerificationResult, VerificationStatus,
};
use certcheck_common::crypto::ocsp::{self, BasicResponse, CertId, CertStatus, OcspResponseStatus};
use certcheck_common::crypto::x509;
use certcheck_common::error::AppError;
use certcheck_common::logging::{debug, warn};
use certcheck_common::target;

pub const REASON_TIMEOUT: &str = "timeout";
pub const REASON_OCSP_ERROR: &str = "ocsp-error";
pub const REASON_NO_OCSP_URL: &str = "no-ocsp-url";

/// Outcome of a single OCSP exchange
#[derive(Clone, Debug, PartialEq)]
pub struct OcspCheckResult {
    pub status: RevocationStatus,
    pub reason: Option<String>,
    /// Responder answering the request
    pub source: Option<String>,
    /// Response `nextUpdate`
    pub next_update: Option<OffsetDateTime>,
}

impl OcspCheckResult {
    fn operational_unknown(reason: &str, source: Option<&str>) -> Self {
        Self {
            status: RevocationStatus::Unknown,
            reason: Some(reason.to_string()),
            source: source.map(|source| source.to_string()),
            next_update: None,
        }
    }

    /// Unknown due to a transport/responder problem rather than a responder answer
    pub fn is_operational_failure(&self) -> bool {
        is_operational_failure(self.status, self.reason.as_deref())
    }
}

fn is_operational_failure(status: RevocationStatus, reason: Option<&str>) -> bool {
    (status == RevocationStatus::Unknown)
        && matches!(
            reason,
            Some(REASON_TIMEOUT) | Some(REASON_OCSP_ERROR) | Some(REASON_NO_OCSP_URL)
        )
}

/// OCSP based verifier
pub struct OcspVerifier {
    cache: Arc<CertificateCache>,
    http: Arc<dyn HttpFetch>,
}

impl OcspVerifier {
    /// OcspVerifier constructor
    ///
    /// # Arguments
    ///
    /// * `cache` - Shared certificate status cache
    /// * `http` - HTTP client used to reach responders
    ///
    /// # Returns
    ///
    /// A newly constructed [`OcspVerifier`] object.
    ///
    pub fn new(cache: Arc<CertificateCache>, http: Arc<dyn HttpFetch>) -> Self {
        Self { cache, http }
    }

    /// Verify certificate revocation status via OCSP
    ///
    /// # Arguments
    ///
    /// * `cert_der` - Certificate to check
    /// * `issuer_der` - Issuer of certificate
    /// * `config` - OCSP configuration
    /// * `ocsp_urls` - Responder URLs (extracted from certificate when not supplied)
    ///
    /// # Returns
    ///
    /// The verification result. Failures are mapped according to the failure mode.
    ///
    pub fn verify_ocsp(
        &self,
        cert_der: &[u8],
        issuer_der: &[u8],
        config: &OcspConfig,
        ocsp_urls: Option<&[String]>,
    ) -> VerificationResult {
        if !config.enabled {
            return VerificationResult::new(true, VerificationStatus::Disabled);
        }

        let ocsp_urls = match ocsp_urls {
            Some(ocsp_urls) => ocsp_urls.to_vec(),
            None => cert_utils::extract_ocsp_urls(cert_der),
        };
        if ocsp_urls.is_empty() {
            return VerificationResult::new(true, VerificationStatus::NoOcspUrls);
        }

        let cache_key = cert_utils::create_cache_key(
            &cert_utils::buffer_to_pem(cert_der),
            &cert_utils::buffer_to_pem(issuer_der),
            &VerificationMethod::Ocsp.to_string(),
            None,
        );
        let request = CacheRequest::Ocsp {
            cert_der: cert_der.to_vec(),
            issuer_der: issuer_der.to_vec(),
            config: config.clone(),
            ocsp_urls,
        };

        match self.cache.get(&cache_key, &request, self) {
            Ok(lookup) => {
                let entry = lookup.entry;
                if (config.failure_mode == FailureMode::FailOpen)
                    && is_operational_failure(entry.status, entry.reason.as_deref())
                {
                    return VerificationResult::new(true, VerificationStatus::ErrorAllowed)
                        .with_method(VerificationMethod::Ocsp)
                        .with_cached(lookup.cached)
                        .with_reason(entry.reason);
                }
                VerificationResult::new(entry.status == RevocationStatus::Good, entry.status.into())
                    .with_method(VerificationMethod::Ocsp)
                    .with_cached(lookup.cached)
                    .with_reason(entry.reason)
            }
            Err(err) => {
                warn(
                    &target!(),
                    &format!(
                        "OCSP verification error: mode={}, err={:?}",
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
                result
                    .with_method(VerificationMethod::Ocsp)
                    .with_error(&err.to_string())
            }
        }
    }

    /// Query responders (in order) until one returns a usable answer
    ///
    /// # Arguments
    ///
    /// * `cert_der` - Certificate to check
    /// * `issuer_der` - Issuer of certificate
    /// * `config` - OCSP configuration
    /// * `ocsp_urls` - Responder URLs
    ///
    /// # Returns
    ///
    /// A [`Result`] containing the check result. Responder and transport problems resolve to an
    /// `unknown` status, only unparseable certificates are errors.
    ///
    pub fn perform_ocsp_check(
        &self,
        cert_der: &[u8],
        issuer_der: &[u8],
        config: &OcspConfig,
        ocsp_urls: &[String],
    ) -> Result<OcspCheckResult, AppError> {
        let cert = x509::parse_der_certificate(cert_der)?;
        let issuer = x509::parse_der_certificate(issuer_der)?;
        let cert_id = CertId::new(&cert, &issuer);
        let request = ocsp::encode_request(&cert_id)?;

        let mut result = OcspCheckResult::operational_unknown(REASON_NO_OCSP_URL, None);

        for ocsp_url in ocsp_urls {
            let response_der = match self.http.post(
                ocsp_url,
                ocsp::CONTENT_TYPE_OCSP_REQUEST,
                request.clone(),
                StdDuration::from_millis(config.timeout),
            ) {
                Ok(response_der) => response_der,
                Err(err) => {
                    warn(
                        &target!(),
                        &format!("OCSP request failed: url={}, err={:?}", ocsp_url, &err),
                    );
                    let reason = match err.is_timeout() {
                        true => REASON_TIMEOUT,
                        false => REASON_OCSP_ERROR,
                    };
                    result = OcspCheckResult::operational_unknown(reason, Some(ocsp_url));
                    continue;
                }
            };

            match Self::evaluate_response(&response_der, &cert_id, &issuer) {
                Ok((status, reason, next_update)) => {
                    debug(
                        &target!(),
                        &format!("OCSP response: url={}, status={:?}", ocsp_url, &status),
                    );
                    return Ok(OcspCheckResult {
                        status,
                        reason,
                        source: Some(ocsp_url.clone()),
                        next_update,
                    });
                }
                Err(err) => {
                    warn(
                        &target!(),
                        &format!("Invalid OCSP response: url={}, err={:?}", ocsp_url, &err),
                    );
                    result = OcspCheckResult::operational_unknown(REASON_OCSP_ERROR, Some(ocsp_url));
                }
            }
        }

        Ok(result)
    }

    fn evaluate_response(
        response_der: &[u8],
        cert_id: &CertId,
        issuer: &X509Certificate<'_>,
    ) -> Result<(RevocationStatus, Option<String>, Option<OffsetDateTime>), AppError> {
        let response = ocsp::parse_response(response_der)?;
        let basic = match (response.status, response.basic) {
            (OcspResponseStatus::Successful, Some(basic)) => basic,
            (status, _) => {
                return Err(AppError::General(format!(
                    "Unsuccessful OCSP response: status={:?}",
                    status
                )))
            }
        };

        Self::verify_response_signature(&basic, issuer)?;

        let single_response = basic.find_response(cert_id).ok_or(AppError::General(
            "OCSP response does not cover certificate".to_string(),
        ))?;
        if let Some(next_update) = single_response.next_update {
            if next_update <= OffsetDateTime::now_utc() {
                return Err(AppError::General(format!(
                    "Stale OCSP response: next_update={}",
                    &next_update
                )));
            }
        }

        let (status, reason) = match &single_response.cert_status {
            CertStatus::Good => (RevocationStatus::Good, None),
            CertStatus::Revoked { reason, .. } => (
                RevocationStatus::Revoked,
                reason.map(cert_utils::revocation_reason_name),
            ),
            CertStatus::Unknown => (RevocationStatus::Unknown, None),
        };
        Ok((status, reason, single_response.next_update))
    }

    /// Responder must be the issuer or a certificate issued by it for OCSP signing
    fn verify_response_signature(
        basic: &BasicResponse<'_>,
        issuer: &X509Certificate<'_>,
    ) -> Result<(), AppError> {
        let verify_fn = |public_key: &SubjectPublicKeyInfo<'_>| {
            x509::verify_signed_data(
                public_key,
                &basic.signature_algorithm,
                basic.tbs_response_data,
                basic.signature,
            )
        };

        if verify_fn(issuer.public_key()).is_ok() {
            return Ok(());
        }

        for responder_der in &basic.certs {
            let responder = match x509::parse_der_certificate(responder_der) {
                Ok(responder) => responder,
                Err(_) => continue,
            };
            let ocsp_signing = matches!(
                responder.extended_key_usage(),
                Ok(Some(eku)) if eku.value.ocsp_signing
            );
            if ocsp_signing
                && responder.issuer().as_raw() == issuer.subject().as_raw()
                && responder.verify_signature(Some(issuer.public_key())).is_ok()
                && verify_fn(responder.public_key()).is_ok()
            {
                return Ok(());
            }
        }

        Err(AppError::SignatureVerification(
            "OCSP response not signed by issuer or authorized responder".to_string(),
        ))
    }
}

impl PopulationSource for OcspVerifier {
    fn populate(&self, request: &CacheRequest) -> Result<Population, AppError> {
        let (cert_der, issuer_der, config, ocsp_urls) = match request {
            CacheRequest::Ocsp {
                cert_der,
                issuer_der,
                config,
                ocsp_urls,
            } => (cert_der, issuer_der, config, ocsp_urls),
            CacheRequest::Crl { .. } => {
                return Err(AppError::General(
                    "OCSP verifier received CRL request".to_string(),
                ))
            }
        };

        let check = self.perform_ocsp_check(cert_der, issuer_der, config, ocsp_urls)?;
        let now = OffsetDateTime::now_utc();

        let (expires_at, cacheable) = match check.is_operational_failure() {
            true => (
                saturating_add(now, millis_to_duration(config.error_cache_ttl)),
                config.failure_mode == FailureMode::FailClosed,
            ),
            false => {
                let ttl_expiry = saturating_add(now, millis_to_duration(config.cache_ttl));
                let expires_at = match check.next_update {
                    Some(next_update) => next_update.min(ttl_expiry),
                    None => ttl_expiry,
                };
                (expires_at, true)
            }
        };

        Ok(Population {
            entry: CertificateCacheEntry {
                certificate_id: String::new(),
                status: check.status,
                reason: check.reason,
                checked_at: now,
                expires_at,
                method: VerificationMethod::Ocsp,
                source: check.source,
            },
            cacheable,
        })
    }
}

/// Unit tests
#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::tests::MockHttpFetcher;
    use crate::repository::table::Table;
    use crate::repository::Tables;
    use ::time::Duration;
    use certcheck_common::testutils::{TestCa, TestOcspSigner, TestOcspStatus};
    use mockall::predicate;

    const OCSP_URL0: &str = "http://ocsp0.example";
    const OCSP_URL1: &str = "http://ocsp1.example";

    // utils
    // =====

    struct Fixture {
        ca: TestCa,
        leaf_der: Vec<u8>,
        tables: Tables,
    }

    impl Fixture {
        fn new() -> Self {
            let ca = TestCa::new("Test CA 0");
            let leaf_der = ca.issue_leaf("client0", &[0x2a], &[], &[OCSP_URL0]);
            Self {
                ca,
                leaf_der,
                tables: Tables::in_memory(),
            }
        }

        fn verifier(&self, http: MockHttpFetcher) -> OcspVerifier {
            OcspVerifier::new(
                Arc::new(CertificateCache::new(self.tables.certificate_cache.clone())),
                Arc::new(http),
            )
        }
    }

    fn http_responding(response: Vec<u8>, times: usize) -> MockHttpFetcher {
        let mut http = MockHttpFetcher::new();
        http.expect_post()
            .with(
                predicate::eq(OCSP_URL0),
                predicate::eq(ocsp::CONTENT_TYPE_OCSP_REQUEST),
                predicate::always(),
                predicate::always(),
            )
            .times(times)
            .returning(move |_, _, _, _| Ok(response.clone()));
        http
    }

    fn http_timing_out(times: usize) -> MockHttpFetcher {
        let mut http = MockHttpFetcher::new();
        http.expect_post()
            .times(times)
            .returning(|url, _, _, _| Err(AppError::Timeout(format!("url={}", url))));
        http
    }

    // tests
    // =====

    #[test]
    fn ocspverifier_verify_ocsp_when_disabled() {
        let fixture = Fixture::new();
        let mut http = MockHttpFetcher::new();
        http.expect_post().never();
        let config = OcspConfig {
            enabled: false,
            ..OcspConfig::default()
        };

        let result =
            fixture
                .verifier(http)
                .verify_ocsp(&fixture.leaf_der, &fixture.ca.der(), &config, None);

        assert_eq!(
            result,
            VerificationResult::new(true, VerificationStatus::Disabled)
        );
    }

    #[test]
    fn ocspverifier_verify_ocsp_when_no_urls() {
        let fixture = Fixture::new();
        let leaf_der = fixture.ca.issue_leaf("client1", &[0x01], &[], &[]);
        let mut http = MockHttpFetcher::new();
        http.expect_post().never();

        let result = fixture.verifier(http).verify_ocsp(
            &leaf_der,
            &fixture.ca.der(),
            &OcspConfig::default(),
            None,
        );

        assert_eq!(
            result,
            VerificationResult::new(true, VerificationStatus::NoOcspUrls)
        );
    }

    #[test]
    fn ocspverifier_verify_ocsp_when_good_then_cached() {
        let fixture = Fixture::new();
        let response = fixture
            .ca
            .sign_ocsp_response(&fixture.leaf_der, &TestOcspStatus::Good);
        let verifier = fixture.verifier(http_responding(response, 1));
        let ca_der = fixture.ca.der();

        let result0 = verifier.verify_ocsp(&fixture.leaf_der, &ca_der, &OcspConfig::default(), None);
        let result1 = verifier.verify_ocsp(&fixture.leaf_der, &ca_der, &OcspConfig::default(), None);

        assert_eq!(
            result0,
            VerificationResult::new(true, VerificationStatus::Good)
                .with_method(VerificationMethod::Ocsp)
                .with_cached(false)
        );
        assert_eq!(
            result1,
            VerificationResult::new(true, VerificationStatus::Good)
                .with_method(VerificationMethod::Ocsp)
                .with_cached(true)
        );
    }

    #[test]
    fn ocspverifier_verify_ocsp_when_revoked() {
        let fixture = Fixture::new();
        let response = fixture.ca.sign_ocsp_response(
            &fixture.leaf_der,
            &TestOcspStatus::Revoked(
                OffsetDateTime::now_utc().replace_nanosecond(0).unwrap() - Duration::days(1),
                Some(1),
            ),
        );
        let verifier = fixture.verifier(http_responding(response, 1));

        let result = verifier.verify_ocsp(
            &fixture.leaf_der,
            &fixture.ca.der(),
            &OcspConfig::with_failure_mode(FailureMode::FailOpen),
            None,
        );

        assert!(!result.valid);
        assert_eq!(result.status, VerificationStatus::Revoked);
        assert_eq!(result.reason, Some("keyCompromise".to_string()));
    }

    #[test]
    fn ocspverifier_verify_ocsp_when_delegated_responder() {
        let fixture = Fixture::new();
        let responder = fixture.ca.issue_ocsp_responder("OCSP Responder 0");
        let response = fixture.ca.sign_ocsp_response_full(
            &fixture.leaf_der,
            &TestOcspStatus::Good,
            None,
            TestOcspSigner::Delegated(&responder),
        );
        let verifier = fixture.verifier(http_responding(response, 1));

        let result = verifier.verify_ocsp(
            &fixture.leaf_der,
            &fixture.ca.der(),
            &OcspConfig::default(),
            None,
        );

        assert!(result.valid);
        assert_eq!(result.status, VerificationStatus::Good);
    }

    #[test]
    fn ocspverifier_verify_ocsp_when_foreign_signer_and_fail_closed() {
        let fixture = Fixture::new();
        let foreign_ca = TestCa::new("Test CA 1");
        let response = fixture.ca.sign_ocsp_response_full(
            &fixture.leaf_der,
            &TestOcspStatus::Good,
            None,
            TestOcspSigner::Foreign(&foreign_ca),
        );
        let verifier = fixture.verifier(http_responding(response, 1));
        let ca_der = fixture.ca.der();
        let config = OcspConfig::with_failure_mode(FailureMode::FailClosed);

        let result0 = verifier.verify_ocsp(&fixture.leaf_der, &ca_der, &config, None);
        let result1 = verifier.verify_ocsp(&fixture.leaf_der, &ca_der, &config, None);

        assert!(!result0.valid);
        assert_eq!(result0.status, VerificationStatus::Unknown);
        assert_eq!(result0.reason, Some(REASON_OCSP_ERROR.to_string()));
        assert_eq!(result1.cached, Some(true));
    }

    #[test]
    fn ocspverifier_verify_ocsp_when_responder_unknown() {
        let fixture = Fixture::new();
        let response = fixture
            .ca
            .sign_ocsp_response(&fixture.leaf_der, &TestOcspStatus::Unknown);
        let verifier = fixture.verifier(http_responding(response, 1));

        let result = verifier.verify_ocsp(
            &fixture.leaf_der,
            &fixture.ca.der(),
            &OcspConfig::with_failure_mode(FailureMode::FailOpen),
            None,
        );

        assert!(!result.valid);
        assert_eq!(result.status, VerificationStatus::Unknown);
        assert_eq!(result.reason, None);
    }

    #[test]
    fn ocspverifier_verify_ocsp_when_timeout_and_fail_open() {
        let fixture = Fixture::new();
        let verifier = fixture.verifier(http_timing_out(2));
        let ca_der = fixture.ca.der();
        let config = OcspConfig::with_failure_mode(FailureMode::FailOpen);

        let result0 = verifier.verify_ocsp(&fixture.leaf_der, &ca_der, &config, None);
        let result1 = verifier.verify_ocsp(&fixture.leaf_der, &ca_der, &config, None);

        assert_eq!(
            result0,
            VerificationResult::new(true, VerificationStatus::ErrorAllowed)
                .with_method(VerificationMethod::Ocsp)
                .with_cached(false)
                .with_reason(Some(REASON_TIMEOUT.to_string()))
        );
        assert_eq!(result1.cached, Some(false));
    }

    #[test]
    fn ocspverifier_verify_ocsp_when_timeout_and_fail_closed() {
        let fixture = Fixture::new();
        let verifier = fixture.verifier(http_timing_out(1));
        let ca_der = fixture.ca.der();
        let config = OcspConfig::with_failure_mode(FailureMode::FailClosed);
        let cache_key = cert_utils::create_cache_key(
            &cert_utils::buffer_to_pem(&fixture.leaf_der),
            &cert_utils::buffer_to_pem(&ca_der),
            &VerificationMethod::Ocsp.to_string(),
            None,
        );

        let checked_from = OffsetDateTime::now_utc();
        let result0 = verifier.verify_ocsp(&fixture.leaf_der, &ca_der, &config, None);
        let checked_to = OffsetDateTime::now_utc();
        let result1 = verifier.verify_ocsp(&fixture.leaf_der, &ca_der, &config, None);

        assert!(!result0.valid);
        assert_eq!(result0.status, VerificationStatus::Unknown);
        assert_eq!(result0.reason, Some(REASON_TIMEOUT.to_string()));
        assert_eq!(result1.cached, Some(true));
        assert_eq!(result1.reason, Some(REASON_TIMEOUT.to_string()));

        match fixture.tables.certificate_cache.get(&cache_key) {
            Ok(Some(entry)) => {
                let error_cache_ttl = Duration::milliseconds(config.error_cache_ttl as i64);
                assert!(config.error_cache_ttl < config.cache_ttl);
                assert!(entry.expires_at >= checked_from + error_cache_ttl);
                assert!(entry.expires_at <= checked_to + error_cache_ttl);
                assert_eq!(entry.status, RevocationStatus::Unknown);
            }
            result => panic!("Unexpected result: result={:?}", &result),
        }
    }

    #[test]
    fn ocspverifier_verify_ocsp_when_unparseable_certificate() {
        let fixture = Fixture::new();
        let mut http = MockHttpFetcher::new();
        http.expect_post().never();
        let verifier = fixture.verifier(http);
        let ocsp_urls = vec![OCSP_URL0.to_string()];

        let closed = verifier.verify_ocsp(
            &[1, 2, 3],
            &fixture.ca.der(),
            &OcspConfig::with_failure_mode(FailureMode::FailClosed),
            Some(&ocsp_urls),
        );
        let open = verifier.verify_ocsp(
            &[1, 2, 3],
            &fixture.ca.der(),
            &OcspConfig::with_failure_mode(FailureMode::FailOpen),
            Some(&ocsp_urls),
        );

        assert!(!closed.valid);
        assert_eq!(closed.status, VerificationStatus::Error);
        assert!(closed.error.is_some());
        assert!(open.valid);
        assert_eq!(open.status, VerificationStatus::ErrorAllowed);
    }

    #[test]
    fn ocspverifier_perform_ocsp_check_when_request_encoded() {
        let fixture = Fixture::new();
        let ca_der = fixture.ca.der();
        let expected_request = {
            let cert = x509::parse_der_certificate(&fixture.leaf_der).unwrap();
            let issuer = x509::parse_der_certificate(&ca_der).unwrap();
            ocsp::encode_request(&CertId::new(&cert, &issuer)).unwrap()
        };
        let response = fixture
            .ca
            .sign_ocsp_response(&fixture.leaf_der, &TestOcspStatus::Good);
        let mut http = MockHttpFetcher::new();
        http.expect_post()
            .with(
                predicate::eq(OCSP_URL0),
                predicate::eq(ocsp::CONTENT_TYPE_OCSP_REQUEST),
                predicate::eq(expected_request),
                predicate::eq(StdDuration::from_millis(2000)),
            )
            .times(1)
            .returning(move |_, _, _, _| Ok(response.clone()));
        let config = OcspConfig {
            timeout: 2000,
            ..OcspConfig::default()
        };

        let check = fixture
            .verifier(http)
            .perform_ocsp_check(&fixture.leaf_der, &ca_der, &config, &[OCSP_URL0.to_string()])
            .unwrap();

        assert_eq!(check.status, RevocationStatus::Good);
        assert_eq!(check.source, Some(OCSP_URL0.to_string()));
        assert!(check.next_update.is_some());
    }

    #[test]
    fn ocspverifier_perform_ocsp_check_when_first_responder_fails() {
        let fixture = Fixture::new();
        let response = fixture
            .ca
            .sign_ocsp_response(&fixture.leaf_der, &TestOcspStatus::Good);
        let mut http = MockHttpFetcher::new();
        http.expect_post()
            .with(
                predicate::eq(OCSP_URL0),
                predicate::always(),
                predicate::always(),
                predicate::always(),
            )
            .times(1)
            .returning(|_, _, _, _| Ok(ocsp::encode_error_response(OcspResponseStatus::TryLater)));
        http.expect_post()
            .with(
                predicate::eq(OCSP_URL1),
                predicate::always(),
                predicate::always(),
                predicate::always(),
            )
            .times(1)
            .returning(move |_, _, _, _| Ok(response.clone()));

        let check = fixture
            .verifier(http)
            .perform_ocsp_check(
                &fixture.leaf_der,
                &fixture.ca.der(),
                &OcspConfig::default(),
                &[OCSP_URL0.to_string(), OCSP_URL1.to_string()],
            )
            .unwrap();

        assert_eq!(check.status, RevocationStatus::Good);
        assert_eq!(check.source, Some(OCSP_URL1.to_string()));
    }

    #[test]
    fn ocspverifier_perform_ocsp_check_when_error_response() {
        let fixture = Fixture::new();
        let verifier = fixture.verifier(http_responding(
            ocsp::encode_error_response(OcspResponseStatus::Unauthorized),
            1,
        ));

        let check = verifier
            .perform_ocsp_check(
                &fixture.leaf_der,
                &fixture.ca.der(),
                &OcspConfig::default(),
                &[OCSP_URL0.to_string()],
            )
            .unwrap();

        assert_eq!(check.status, RevocationStatus::Unknown);
        assert_eq!(check.reason, Some(REASON_OCSP_ERROR.to_string()));
        assert!(check.is_operational_failure());
    }

    #[test]
    fn ocspverifier_perform_ocsp_check_when_stale_response() {
        let fixture = Fixture::new();
        let response = fixture.ca.sign_ocsp_response_full(
            &fixture.leaf_der,
            &TestOcspStatus::Good,
            Some(OffsetDateTime::now_utc().replace_nanosecond(0).unwrap() - Duration::minutes(5)),
            TestOcspSigner::Issuer,
        );
        let verifier = fixture.verifier(http_responding(response, 1));

        let check = verifier
            .perform_ocsp_check(
                &fixture.leaf_der,
                &fixture.ca.der(),
                &OcspConfig::default(),
                &[OCSP_URL0.to_string()],
            )
            .unwrap();

        assert_eq!(check.status, RevocationStatus::Unknown);
        assert_eq!(check.reason, Some(REASON_OCSP_ERROR.to_string()));
    }

    #[test]
    fn ocspverifier_perform_ocsp_check_when_response_for_other_certificate() {
        let fixture = Fixture::new();
        let other_leaf_der = fixture.ca.issue_leaf("client1", &[0x2b], &[], &[OCSP_URL0]);
        let response = fixture
            .ca
            .sign_ocsp_response(&other_leaf_der, &TestOcspStatus::Good);
        let verifier = fixture.verifier(http_responding(response, 1));

        let check = verifier
            .perform_ocsp_check(
                &fixture.leaf_der,
                &fixture.ca.der(),
                &OcspConfig::default(),
                &[OCSP_URL0.to_string()],
            )
            .unwrap();

        assert_eq!(check.status, RevocationStatus::Unknown);
        assert_eq!(check.reason, Some(REASON_OCSP_ERROR.to_string()));
    }
}
