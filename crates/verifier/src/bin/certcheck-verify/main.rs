mod config;

use std::io::{stdout, Write};
use std::process;
use std::sync::Arc;

use anyhow::Result;

use certcheck_common::crypto::setup_crypto_provider;
use certcheck_common::error::AppError;
use certcheck_common::logging::{error, LogLevel, LOG};
use certcheck_common::target;
use certcheck_verifier::http::{HttpFetch, ReqwestHttpFetch};
use certcheck_verifier::repository::Tables;
use certcheck_verifier::verifier::CertificateVerifier;

use crate::config::AppConfig;

/// Run main process
///
/// # Arguments
///
/// * `app_config` - Application configuration object
/// * `http` - HTTP client for CRL/OCSP retrieval
/// * `writer` - Destination for the JSON verification result
///
/// # Returns
///
/// A [`Result`] containing whether the certificate was accepted.
///
fn process_runner(
    app_config: &AppConfig,
    http: Arc<dyn HttpFetch>,
    writer: &mut dyn Write,
) -> Result<bool, AppError> {
    let verifier = CertificateVerifier::new(&Tables::in_memory(), http);

    let result = verifier.verify_certificate(&app_config.peer_certificate, &app_config.mtls);

    let result_json = serde_json::to_string_pretty(&result).map_err(|err| {
        AppError::GenWithMsgAndErr(
            "Failed serializing verification result".to_string(),
            Box::new(err),
        )
    })?;
    writeln!(writer, "{}", result_json)?;

    Ok(result.valid)
}

/// Main execution function
///
pub fn main() -> Result<()> {
    let app_config = match AppConfig::new() {
        Ok(app_config) => app_config,
        Err(err) => {
            eprintln!("{}", err);
            process::exit(2);
        }
    };

    if let Ok(mut logger) = LOG.lock() {
        let _ = logger.configure(
            if app_config.verbose_logging {
                LogLevel::DEBUG
            } else {
                LogLevel::WARN
            },
            None,
        );
    }
    setup_crypto_provider();

    let outcome = ReqwestHttpFetch::new().and_then(|http| {
        process_runner(&app_config, Arc::new(http), &mut stdout())
    });

    match outcome {
        Ok(true) => process::exit(0),
        Ok(false) => process::exit(1),
        Err(err) => {
            error(&target!(), &format!("Verification failed: err={:?}", &err));
            eprintln!("{:?}", err);
            process::exit(2);
        }
    }
}
