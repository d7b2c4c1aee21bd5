use std::sync::Mutex;

use log::{debug, error, info, log_enabled, trace, warn, Level, LevelFilter};
use log4rs::append::console::ConsoleAppender;
use log4rs::config::{Appender, Root};
use log4rs::encode::json::JsonEncoder;
use log4rs::Handle;
use once_cell::sync::Lazy;

use crate::error::AppError;

/// Logger singleton. Until [`Logger::configure`] is invoked, all logging calls are no-ops.
pub static LOG: Lazy<Mutex<Logger>> = Lazy::new(|| {
    Mutex::new(Logger {
        handle: None,
        visitor: None,
    })
});

/// Logger trace log function
pub fn trace(target: &str, msg: &str) {
    if let Ok(logger) = LOG.lock() {
        logger.trace(target, msg);
    }
}

/// Logger debug log function
pub fn debug(target: &str, msg: &str) {
    if let Ok(logger) = LOG.lock() {
        logger.debug(target, msg);
    }
}

/// Logger info log function
pub fn info(target: &str, msg: &str) {
    if let Ok(logger) = LOG.lock() {
        logger.info(target, msg);
    }
}

/// Logger warn log function
pub fn warn(target: &str, msg: &str) {
    if let Ok(logger) = LOG.lock() {
        logger.warn(target, msg);
    }
}

/// Logger error log function
pub fn error(target: &str, msg: &str) {
    if let Ok(logger) = LOG.lock() {
        logger.error(target, msg);
    }
}

/// Simplify code location macro usage for log target
#[macro_export]
macro_rules! target {
    () => {{
        format!("{}:{}:{}", file!(), line!(), column!())
    }};
}

pub use target;

/// Construct logging implementation
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum LogLevel {
    TRACE,
    DEBUG,
    INFO,
    WARN,
    ERROR,
}

pub struct Logger {
    handle: Option<Handle>,
    visitor: Option<fn(LogLevel, &str)>,
}

impl Logger {
    /// configure logger (JSON console appender)
    ///
    /// # Arguments
    ///
    /// * `level_filter` - Minimum level to emit
    /// * `visitor` - Optional callback invoked for every emitted message
    ///
    /// # Returns
    ///
    /// A [`Result`] indicating success/failure of the logger installation.
    ///
    pub fn configure(
        &mut self,
        level_filter: LogLevel,
        visitor: Option<fn(LogLevel, &str)>,
    ) -> Result<(), AppError> {
        let level_filter = match level_filter {
            LogLevel::TRACE => LevelFilter::Trace,
            LogLevel::DEBUG => LevelFilter::Debug,
            LogLevel::INFO => LevelFilter::Info,
            LogLevel::WARN => LevelFilter::Warn,
            LogLevel::ERROR => LevelFilter::Error,
        };

        let stdout: ConsoleAppender = ConsoleAppender::builder()
            .encoder(Box::new(JsonEncoder::new()))
            .build();
        let log_config = log4rs::config::Config::builder()
            .appender(Appender::builder().build("stdout", Box::new(stdout)))
            .build(Root::builder().appender("stdout").build(level_filter))
            .map_err(|err| {
                AppError::GenWithMsgAndErr("Invalid logger config".to_string(), Box::new(err))
            })?;

        match &self.handle {
            Some(handle) => handle.set_config(log_config),
            None => {
                self.handle = Some(log4rs::init_config(log_config).map_err(|err| {
                    AppError::GenWithMsgAndErr(
                        "Failed to install logger".to_string(),
                        Box::new(err),
                    )
                })?)
            }
        }
        self.visitor = visitor;
        Ok(())
    }

    fn visit(&self, level: LogLevel, msg: &str) {
        if let Some(visitor) = self.visitor {
            visitor(level, msg);
        }
    }

    /// trace-level logging
    pub fn trace(&self, target: &str, msg: &str) {
        if log_enabled!(Level::Trace) {
            trace!(target: target, "{}", msg);
            self.visit(LogLevel::TRACE, msg);
        }
    }

    /// debug-level logging
    pub fn debug(&self, target: &str, msg: &str) {
        if log_enabled!(Level::Debug) {
            debug!(target: target, "{}", msg);
            self.visit(LogLevel::DEBUG, msg);
        }
    }

    /// info-level logging
    pub fn info(&self, target: &str, msg: &str) {
        if log_enabled!(Level::Info) {
            info!(target: target, "{}", msg);
            self.visit(LogLevel::INFO, msg);
        }
    }

    /// warn-level logging
    pub fn warn(&self, target: &str, msg: &str) {
        if log_enabled!(Level::Warn) {
            warn!(target: target, "{}", msg);
            self.visit(LogLevel::WARN, msg);
        }
    }

    /// error-level logging
    pub fn error(&self, target: &str, msg: &str) {
        if log_enabled!(Level::Error) {
            error!(target: target, "{}", msg);
            self.visit(LogLevel::ERROR, msg);
        }
    }
}
