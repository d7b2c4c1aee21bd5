pub mod cache;
pub mod cert_utils;
pub mod config;
pub mod crl;
pub mod http;
pub mod model;
pub mod mtls;
pub mod ocsp;
pub mod repository;
pub mod verifier;
