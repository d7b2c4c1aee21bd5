pub mod crypto;
pub mod error;
pub mod logging;
pub mod testutils;
