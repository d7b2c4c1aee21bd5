use std::fs;
use std::sync::Arc;

use clap::Parser;
use serde_json::{json, Value};

use certcheck_common::error::AppError;
use certcheck_verifier::cert_utils;
use certcheck_verifier::config::{self, MtlsSettings, KEY_CERTIFICATE_VERIFICATION};
use certcheck_verifier::model::PeerCertificate;

/// Checks the revocation status (CRL, then OCSP) of a client certificate chain
#[derive(Parser, Debug)]
#[command(author, version, long_about)]
pub struct AppConfigArgs {
    /// PEM file holding the certificate chain (leaf certificate first, followed by its issuers)
    #[arg(required = true, short = 'c', long = "cert-file", env)]
    pub cert_file: String,

    /// JSON file holding the `certificateVerification` setting (boolean or object)
    /// Default verification settings are used when not supplied
    #[arg(
        required = false,
        long = "config-file",
        env = "VERIFICATION_CONFIG_FILE",
        verbatim_doc_comment
    )]
    pub config_file: Option<String>,

    /// Enable verbose logging
    #[arg(required = false, long = "verbose", env)]
    pub verbose: bool,
}

pub struct AppConfig {
    pub peer_certificate: PeerCertificate,
    pub mtls: MtlsSettings,
    pub verbose_logging: bool,
}

impl AppConfig {
    /// Load config
    pub fn new() -> Result<Self, AppError> {
        // Populate environment w/.env file (if present)
        dotenvy::dotenv().ok();

        // Parse process arguments
        let config_args = Self::parse_config();

        let peer_certificate = Self::load_certificate_chain(&config_args.cert_file)?;
        let mtls = match &config_args.config_file {
            Some(config_file) => Self::load_verification_settings(config_file)?,
            None => MtlsSettings::Flag(true),
        };

        Ok(AppConfig {
            peer_certificate,
            mtls,
            verbose_logging: config_args.verbose,
        })
    }

    fn load_certificate_chain(cert_file: &str) -> Result<PeerCertificate, AppError> {
        let pem_bundle = fs::read_to_string(cert_file).map_err(|err| {
            AppError::GenWithMsgAndErr(
                format!("Failed reading certificate file: file={}", cert_file),
                Box::new(err),
            )
        })?;

        PeerCertificate::from_chain(&cert_utils::pem_bundle_to_buffers(&pem_bundle)).ok_or_else(
            || AppError::General(format!("No certificates found in file: file={}", cert_file)),
        )
    }

    fn load_verification_settings(config_file: &str) -> Result<MtlsSettings, AppError> {
        let settings_json = fs::read_to_string(config_file).map_err(|err| {
            AppError::GenWithMsgAndErr(
                format!("Failed reading verification config file: file={}", config_file),
                Box::new(err),
            )
        })?;
        let settings: Value = serde_json::from_str(&settings_json).map_err(|err| {
            AppError::GenWithMsgAndErr(
                format!("Invalid verification config JSON: file={}", config_file),
                Box::new(err),
            )
        })?;

        // Accept either the bare setting or an object wrapping it
        let settings = match settings {
            Value::Object(mut wrapper) if wrapper.contains_key(KEY_CERTIFICATE_VERIFICATION) => {
                wrapper
                    .remove(KEY_CERTIFICATE_VERIFICATION)
                    .unwrap_or(Value::Bool(true))
            }
            settings => settings,
        };

        config::validate_certificate_verification(&settings)?;

        Ok(MtlsSettings::Object(Arc::new(
            json!({ KEY_CERTIFICATE_VERIFICATION: settings }),
        )))
    }

    #[cfg(not(test))]
    #[inline(always)]
    fn parse_config() -> AppConfigArgs {
        AppConfigArgs::parse()
    }

    #[cfg(test)]
    #[inline(always)]
    fn parse_config() -> AppConfigArgs {
        AppConfigArgs::parse_from::<Vec<_>, String>(vec![])
    }
}
