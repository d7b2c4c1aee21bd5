//! Certificate verification configuration: strict (startup) validation and the lenient,
//! cached per-handshake resolver.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex, Weak};

use serde_json::{Map, Value};

use crate::model::{
    CrlConfig, FailureMode, OcspConfig, VerificationConfig, DEFAULT_FAILURE_MODE,
    MAX_DURATION_MSECS,
};
use certcheck_common::error::AppError;
use certcheck_common::logging::warn;
use certcheck_common::target;

pub const KEY_CERTIFICATE_VERIFICATION: &str = "certificateVerification";

const MIN_TIMEOUT_MSECS: u64 = 1_000;
const MIN_CACHE_TTL_MSECS: u64 = 1_000;
const MIN_GRACE_PERIOD_MSECS: u64 = 0;

const ROOT_KEYS: [&str; 3] = ["failureMode", "crl", "ocsp"];
const CRL_KEYS: [&str; 5] = ["enabled", "timeout", "cacheTtl", "failureMode", "gracePeriod"];
const OCSP_KEYS: [&str; 5] = [
    "enabled",
    "timeout",
    "cacheTtl",
    "errorCacheTtl",
    "failureMode",
];

/// `mtls` server setting as supplied per handshake
#[derive(Clone, Debug)]
pub enum MtlsSettings {
    /// Setting absent (`null`/`undefined`)
    Unset,
    Flag(bool),
    /// mTLS settings object (holding optional `certificateVerification`)
    Object(Arc<Value>),
}

impl From<Option<Arc<Value>>> for MtlsSettings {
    fn from(value: Option<Arc<Value>>) -> Self {
        match value {
            None => MtlsSettings::Unset,
            Some(value) => match value.as_ref() {
                Value::Null => MtlsSettings::Unset,
                Value::Bool(flag) => MtlsSettings::Flag(*flag),
                _ => MtlsSettings::Object(value),
            },
        }
    }
}

/// Validate a `certificateVerification` setting, failing on any violation
///
/// # Arguments
///
/// * `value` - Boolean or object setting value
///
/// # Returns
///
/// A [`Result`] containing the parsed configuration (`None` when verification is disabled). All
/// violations are joined into a single error.
///
pub fn validate_certificate_verification(
    value: &Value,
) -> Result<Option<VerificationConfig>, AppError> {
    let mut violations = Vec::new();
    let config = parse_certificate_verification(value, &mut violations);

    if !violations.is_empty() {
        return Err(AppError::General(format!(
            "Invalid {} configuration: errs={}",
            KEY_CERTIFICATE_VERIFICATION,
            violations.join(", ")
        )));
    }

    Ok(config)
}

/// Parse `certificateVerification`, recording violations. Invalid values fall back to defaults.
fn parse_certificate_verification(
    value: &Value,
    violations: &mut Vec<String>,
) -> Option<VerificationConfig> {
    let path = KEY_CERTIFICATE_VERIFICATION;
    let settings = match value {
        Value::Bool(false) => return None,
        Value::Bool(true) => return Some(VerificationConfig::default()),
        Value::Object(settings) => settings,
        _ => {
            violations.push(format!("{} must be a boolean or an object", path));
            return None;
        }
    };

    check_unknown_keys(settings, path, &ROOT_KEYS, violations);
    let failure_mode =
        read_failure_mode(settings, path, violations).unwrap_or(DEFAULT_FAILURE_MODE);

    let crl = match settings.get("crl") {
        None => CrlConfig::with_failure_mode(failure_mode),
        Some(crl) => parse_crl(crl, failure_mode, violations),
    };
    let ocsp = match settings.get("ocsp") {
        None => OcspConfig::with_failure_mode(failure_mode),
        Some(ocsp) => parse_ocsp(ocsp, failure_mode, violations),
    };

    Some(VerificationConfig {
        failure_mode,
        crl,
        ocsp,
    })
}

fn parse_crl(value: &Value, failure_mode: FailureMode, violations: &mut Vec<String>) -> CrlConfig {
    let path = format!("{}.crl", KEY_CERTIFICATE_VERIFICATION);
    let mut config = CrlConfig::with_failure_mode(failure_mode);
    let settings = match value {
        Value::Bool(enabled) => {
            config.enabled = *enabled;
            return config;
        }
        Value::Object(settings) => settings,
        _ => {
            violations.push(format!("{} must be a boolean or an object", &path));
            return config;
        }
    };

    check_unknown_keys(settings, &path, &CRL_KEYS, violations);
    if let Some(enabled) = read_bool(settings, &path, "enabled", violations) {
        config.enabled = enabled;
    }
    if let Some(timeout) = read_millis(settings, &path, "timeout", MIN_TIMEOUT_MSECS, violations) {
        config.timeout = timeout;
    }
    if let Some(cache_ttl) =
        read_millis(settings, &path, "cacheTtl", MIN_CACHE_TTL_MSECS, violations)
    {
        config.cache_ttl = cache_ttl;
    }
    if let Some(grace_period) = read_millis(
        settings,
        &path,
        "gracePeriod",
        MIN_GRACE_PERIOD_MSECS,
        violations,
    ) {
        config.grace_period = grace_period;
    }
    if let Some(failure_mode) = read_failure_mode(settings, &path, violations) {
        config.failure_mode = failure_mode;
    }
    config
}

fn parse_ocsp(
    value: &Value,
    failure_mode: FailureMode,
    violations: &mut Vec<String>,
) -> OcspConfig {
    let path = format!("{}.ocsp", KEY_CERTIFICATE_VERIFICATION);
    let mut config = OcspConfig::with_failure_mode(failure_mode);
    let settings = match value {
        Value::Bool(enabled) => {
            config.enabled = *enabled;
            return config;
        }
        Value::Object(settings) => settings,
        _ => {
            violations.push(format!("{} must be a boolean or an object", &path));
            return config;
        }
    };

    check_unknown_keys(settings, &path, &OCSP_KEYS, violations);
    if let Some(enabled) = read_bool(settings, &path, "enabled", violations) {
        config.enabled = enabled;
    }
    if let Some(timeout) = read_millis(settings, &path, "timeout", MIN_TIMEOUT_MSECS, violations) {
        config.timeout = timeout;
    }
    if let Some(cache_ttl) =
        read_millis(settings, &path, "cacheTtl", MIN_CACHE_TTL_MSECS, violations)
    {
        config.cache_ttl = cache_ttl;
    }
    if let Some(error_cache_ttl) = read_millis(
        settings,
        &path,
        "errorCacheTtl",
        MIN_CACHE_TTL_MSECS,
        violations,
    ) {
        config.error_cache_ttl = error_cache_ttl;
    }
    if let Some(failure_mode) = read_failure_mode(settings, &path, violations) {
        config.failure_mode = failure_mode;
    }
    config
}

fn check_unknown_keys(
    settings: &Map<String, Value>,
    path: &str,
    allowed_keys: &[&str],
    violations: &mut Vec<String>,
) {
    for key in settings.keys() {
        if !allowed_keys.contains(&key.as_str()) {
            violations.push(format!("{}.{} is not allowed", path, key));
        }
    }
}

fn read_bool(
    settings: &Map<String, Value>,
    path: &str,
    key: &str,
    violations: &mut Vec<String>,
) -> Option<bool> {
    match settings.get(key) {
        None => None,
        Some(Value::Bool(flag)) => Some(*flag),
        Some(_) => {
            violations.push(format!("{}.{} must be a boolean", path, key));
            None
        }
    }
}

fn read_millis(
    settings: &Map<String, Value>,
    path: &str,
    key: &str,
    minimum: u64,
    violations: &mut Vec<String>,
) -> Option<u64> {
    let value = settings.get(key)?;
    match value.as_u64() {
        Some(millis) if millis > MAX_DURATION_MSECS => {
            violations.push(format!(
                "{}.{} must be <= {}",
                path, key, MAX_DURATION_MSECS
            ));
            None
        }
        Some(millis) if millis >= minimum => Some(millis),
        Some(_) => {
            violations.push(format!("{}.{} must be >= {}", path, key, minimum));
            None
        }
        None if value.as_i64().is_some() => {
            violations.push(format!("{}.{} must be >= {}", path, key, minimum));
            None
        }
        None => {
            violations.push(format!("{}.{} must be an integer", path, key));
            None
        }
    }
}

fn read_failure_mode(
    settings: &Map<String, Value>,
    path: &str,
    violations: &mut Vec<String>,
) -> Option<FailureMode> {
    let value = settings.get("failureMode")?;
    match value.as_str().map(FailureMode::from_str) {
        Some(Ok(failure_mode)) => Some(failure_mode),
        _ => {
            violations.push(format!(
                "{}.failureMode must be one of: fail-open, fail-closed (value={})",
                path, value
            ));
            None
        }
    }
}

/// Resolve an `mtls` settings object without failing: problems are logged and corrected
fn resolve_mtls_object(mtls: &Value) -> Option<VerificationConfig> {
    let certificate_verification = match mtls {
        Value::Object(settings) => settings.get(KEY_CERTIFICATE_VERIFICATION),
        Value::Bool(true) => return Some(VerificationConfig::default()),
        _ => None,
    };

    let certificate_verification = match certificate_verification {
        None | Some(Value::Null) => return None,
        Some(certificate_verification) => certificate_verification,
    };

    let mut violations = Vec::new();
    let config = parse_certificate_verification(certificate_verification, &mut violations);
    if let Some(msg) = correction_message(config.as_ref(), &violations) {
        warn(&target!(), &msg);
    }
    config
}

/// Describe how invalid settings were corrected (`None` when there were no violations)
fn correction_message(
    config: Option<&VerificationConfig>,
    violations: &[String],
) -> Option<String> {
    if violations.is_empty() {
        return None;
    }
    Some(match config {
        Some(_) => format!(
            "Corrected invalid {} settings to defaults: errs={}",
            KEY_CERTIFICATE_VERIFICATION,
            violations.join(", ")
        ),
        None => format!(
            "Disabled certificate verification, invalid {} setting: errs={}",
            KEY_CERTIFICATE_VERIFICATION,
            violations.join(", ")
        ),
    })
}

struct ObjectCacheEntry {
    settings: Weak<Value>,
    config: Option<Arc<VerificationConfig>>,
}

/// Lenient, cached configuration resolver. Cached entries are an optimization only and may be
/// evicted at any time.
pub struct ConfigResolver {
    /// Keyed by settings object address; weak references do not keep inputs alive
    object_cache: Mutex<HashMap<usize, ObjectCacheEntry>>,
    /// Last resolved primitive input
    primitive_cache: Mutex<Option<(Option<bool>, Option<Arc<VerificationConfig>>)>>,
}

impl ConfigResolver {
    /// ConfigResolver constructor
    pub fn new() -> Self {
        Self {
            object_cache: Mutex::new(HashMap::new()),
            primitive_cache: Mutex::new(None),
        }
    }

    /// Resolve verification configuration. Never fails.
    ///
    /// # Arguments
    ///
    /// * `mtls` - mTLS settings supplied for the connection
    ///
    /// # Returns
    ///
    /// The resolved configuration, or `None` when verification is disabled.
    ///
    pub fn resolve(&self, mtls: &MtlsSettings) -> Option<Arc<VerificationConfig>> {
        match mtls {
            MtlsSettings::Unset => self.resolve_primitive(None),
            MtlsSettings::Flag(flag) => self.resolve_primitive(Some(*flag)),
            MtlsSettings::Object(settings) => self.resolve_object(settings),
        }
    }

    /// Drop all cached resolutions
    pub fn clear(&self) {
        if let Ok(mut object_cache) = self.object_cache.lock() {
            object_cache.clear();
        }
        if let Ok(mut primitive_cache) = self.primitive_cache.lock() {
            *primitive_cache = None;
        }
    }

    fn resolve_primitive(&self, flag: Option<bool>) -> Option<Arc<VerificationConfig>> {
        let mut primitive_cache = match self.primitive_cache.lock() {
            Ok(primitive_cache) => primitive_cache,
            Err(_) => return Self::resolve_flag(flag),
        };

        if let Some((cached_flag, config)) = primitive_cache.as_ref() {
            if *cached_flag == flag {
                return config.clone();
            }
        }

        let config = Self::resolve_flag(flag);
        *primitive_cache = Some((flag, config.clone()));
        config
    }

    fn resolve_flag(flag: Option<bool>) -> Option<Arc<VerificationConfig>> {
        match flag {
            Some(true) => Some(Arc::new(VerificationConfig::default())),
            _ => None,
        }
    }

    fn resolve_object(&self, settings: &Arc<Value>) -> Option<Arc<VerificationConfig>> {
        let mut object_cache = match self.object_cache.lock() {
            Ok(object_cache) => object_cache,
            Err(_) => return resolve_mtls_object(settings).map(Arc::new),
        };

        let address = Arc::as_ptr(settings) as usize;
        if let Some(entry) = object_cache.get(&address) {
            if let Some(cached_settings) = entry.settings.upgrade() {
                if Arc::ptr_eq(&cached_settings, settings) {
                    return entry.config.clone();
                }
            }
        }

        let config = resolve_mtls_object(settings).map(Arc::new);
        object_cache.retain(|_, entry| entry.settings.strong_count() > 0);
        object_cache.insert(
            address,
            ObjectCacheEntry {
                settings: Arc::downgrade(settings),
                config: config.clone(),
            },
        );
        config
    }

    #[cfg(test)]
    fn cached_object_count(&self) -> usize {
        self.object_cache.lock().unwrap().len()
    }
}

impl Default for ConfigResolver {
    fn default() -> Self {
        Self::new()
    }
}
