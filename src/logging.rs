//! Structured logging for verification runs.
//!
//! Every record carries a category naming the phase it belongs to
//! (`session`, `navigate`, `readiness`, ...) and an optional JSON payload.
//! Records go to an external callback when one is installed, otherwise to
//! the `log` facade so the binary's `env_logger` decides how they render.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Verbosity;

pub const CATEGORY_SESSION: &str = "session";
pub const CATEGORY_NAVIGATE: &str = "navigate";
pub const CATEGORY_READINESS: &str = "readiness";
pub const CATEGORY_INTERACTION: &str = "interaction";
pub const CATEGORY_ASSERTION: &str = "assertion";
pub const CATEGORY_CAPTURE: &str = "capture";
pub const CATEGORY_RUN: &str = "run";

/// Convenience alias for external logging callbacks.
pub type LogCallback = Arc<dyn Fn(&HarnessLogRecord) + Send + Sync + 'static>;

/// Logging configuration shared by every component of a run.
#[derive(Clone)]
pub struct LogConfig {
    pub verbose: Verbosity,
    pub external_logger: Option<LogCallback>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            verbose: Verbosity::Medium,
            external_logger: None,
        }
    }
}

impl LogConfig {
    pub fn new(verbose: Verbosity) -> Self {
        Self {
            verbose,
            ..Default::default()
        }
    }

    pub fn should_log(&self, level: LogLevel) -> bool {
        level == LogLevel::Error || level.as_u8() <= self.verbose.as_u8()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error = 0,
    Info = 1,
    Debug = 2,
}

impl LogLevel {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn label(self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        }
    }

    fn as_log_level(self) -> log::Level {
        match self {
            LogLevel::Error => log::Level::Error,
            LogLevel::Info => log::Level::Info,
            LogLevel::Debug => log::Level::Debug,
        }
    }
}

/// Structured log entry shared with external callbacks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HarnessLogRecord {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub level: LogLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auxiliary: Option<Value>,
}

impl HarnessLogRecord {
    pub fn new(
        message: impl Into<String>,
        level: LogLevel,
        category: Option<String>,
        auxiliary: Option<Value>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            message: message.into(),
            level,
            category,
            auxiliary,
        }
    }
}

/// Default handler: forward to the `log` facade under the `ui_verify` target.
pub fn default_log_handler(record: &HarnessLogRecord) {
    let level = record.level.as_log_level();
    let category = record.category.as_deref().unwrap_or("-");
    match &record.auxiliary {
        Some(aux) if !aux.is_null() => {
            log::log!(target: "ui_verify", level, "[{category}] {} {aux}", record.message)
        }
        _ => log::log!(target: "ui_verify", level, "[{category}] {}", record.message),
    }
}

pub struct HarnessLogger {
    config: LogConfig,
    default_handler: LogCallback,
}

impl fmt::Debug for HarnessLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HarnessLogger")
            .field("verbosity", &self.config.verbose)
            .field("external_logger", &self.config.external_logger.is_some())
            .finish()
    }
}

impl Default for HarnessLogger {
    fn default() -> Self {
        Self::with_config(LogConfig::default())
    }
}

impl HarnessLogger {
    pub fn with_config(config: LogConfig) -> Self {
        Self {
            config,
            default_handler: Arc::new(default_log_handler),
        }
    }

    pub fn new(verbose: Verbosity) -> Self {
        Self::with_config(LogConfig::new(verbose))
    }

    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    pub fn set_verbose(&mut self, verbose: Verbosity) {
        self.config.verbose = verbose;
    }

    pub fn set_external_logger(&mut self, logger: Option<LogCallback>) {
        self.config.external_logger = logger;
    }

    pub fn log(
        &self,
        message: impl Into<String>,
        level: LogLevel,
        category: Option<&str>,
        auxiliary: Option<Value>,
    ) {
        if !self.config.should_log(level) {
            return;
        }

        let record =
            HarnessLogRecord::new(message, level, category.map(|c| c.to_string()), auxiliary);

        if let Some(callback) = &self.config.external_logger {
            callback(&record);
        } else {
            (self.default_handler)(&record);
        }
    }

    pub fn error(&self, message: impl Into<String>, category: Option<&str>, auxiliary: Option<Value>) {
        self.log(message, LogLevel::Error, category, auxiliary);
    }

    pub fn info(&self, message: impl Into<String>, category: Option<&str>, auxiliary: Option<Value>) {
        self.log(message, LogLevel::Info, category, auxiliary);
    }

    pub fn debug(&self, message: impl Into<String>, category: Option<&str>, auxiliary: Option<Value>) {
        self.log(message, LogLevel::Debug, category, auxiliary);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Logger that records every emitted entry at detailed verbosity.
    pub(crate) fn recording_logger() -> (HarnessLogger, Arc<Mutex<Vec<HarnessLogRecord>>>) {
        let records = Arc::new(Mutex::new(Vec::new()));
        let capture = Arc::clone(&records);
        let callback: LogCallback = Arc::new(move |record| {
            capture.lock().unwrap().push(record.clone());
        });
        let mut logger = HarnessLogger::new(Verbosity::Detailed);
        logger.set_external_logger(Some(callback));
        (logger, records)
    }

    #[test]
    fn respects_verbosity() {
        let logger = HarnessLogger::new(Verbosity::Minimal);
        assert!(logger.config.should_log(LogLevel::Error));
        assert!(!logger.config.should_log(LogLevel::Info));
        assert!(!logger.config.should_log(LogLevel::Debug));

        let logger = HarnessLogger::new(Verbosity::Medium);
        assert!(logger.config.should_log(LogLevel::Info));
        assert!(!logger.config.should_log(LogLevel::Debug));
    }

    #[test]
    fn external_logger_is_invoked() {
        let (logger, records) = recording_logger();

        logger.info("page ready", Some(CATEGORY_READINESS), Some(serde_json::json!({"waitedMs": 40})));
        logger.debug("probe", Some(CATEGORY_INTERACTION), None);

        let values = records.lock().unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values[0].message, "page ready");
        assert_eq!(values[0].category.as_deref(), Some("readiness"));
        assert_eq!(values[0].level, LogLevel::Info);
        assert_eq!(values[0].auxiliary, Some(serde_json::json!({"waitedMs": 40})));
        assert_eq!(values[1].level, LogLevel::Debug);
    }

    #[test]
    fn filtered_records_never_reach_callback() {
        let (mut logger, records) = recording_logger();
        logger.set_verbose(Verbosity::Minimal);
        logger.info("hidden", Some(CATEGORY_RUN), None);
        logger.error("shown", Some(CATEGORY_RUN), None);
        let values = records.lock().unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].message, "shown");
    }
}
