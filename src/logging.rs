/// Structured logging for the gauge pipeline
///
/// Installs a `tracing` subscriber (console, plus an optional append-mode
/// log file) and provides source-tagged failure logging. Every upstream
/// failure is classified as expected, unexpected, or unknown so that an
/// offline gauge does not page anyone while a parse failure does.

use std::fmt;
use std::fs::OpenOptions;
use std::sync::Arc;

use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::model::SourceError;

// ---------------------------------------------------------------------------
// Data Source Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    Usgs,
    Ahps,
    Nwm,
    System,
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSource::Usgs => write!(f, "USGS"),
            DataSource::Ahps => write!(f, "AHPS"),
            DataSource::Nwm => write!(f, "NWM"),
            DataSource::System => write!(f, "SYS"),
        }
    }
}

// ---------------------------------------------------------------------------
// Failure Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureType {
    /// Expected failure - the upstream simply has nothing for this request
    Expected,
    /// Unexpected failure - upstream format changed or the service is degraded
    Unexpected,
    /// Unknown - cannot determine if this is expected or not
    Unknown,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureType::Expected => write!(f, "EXPECTED"),
            FailureType::Unexpected => write!(f, "UNEXPECTED"),
            FailureType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Classify a source failure.
///
/// A 404 means the gauge or COMID has no product; that is routine for the
/// forecast service. Server errors and malformed documents mean something
/// changed upstream. Transport errors could be either.
pub fn classify_failure(err: &SourceError) -> FailureType {
    match err {
        SourceError::Http(404) => FailureType::Expected,
        SourceError::Http(code) if *code >= 500 => FailureType::Unexpected,
        SourceError::Http(_) => FailureType::Unknown,
        SourceError::Unreachable(_) => FailureType::Unknown,
        SourceError::InvalidDocument(_) | SourceError::InvalidTimestamp(_) => FailureType::Unexpected,
        SourceError::UnknownZone(_) | SourceError::InvalidRequest(_) => FailureType::Expected,
    }
}

// ---------------------------------------------------------------------------
// Structured Failure Logging
// ---------------------------------------------------------------------------

/// Log a data source failure with automatic classification
pub fn log_source_failure(source: DataSource, site_id: &str, operation: &str, err: &SourceError) {
    let failure_type = classify_failure(err);
    let source = source.to_string();

    match failure_type {
        FailureType::Expected => {
            debug!(source = %source, site = site_id, failure = %failure_type, "{} failed: {}", operation, err)
        }
        FailureType::Unexpected => {
            error!(source = %source, site = site_id, failure = %failure_type, "{} failed: {}", operation, err)
        }
        FailureType::Unknown => {
            warn!(source = %source, site = site_id, failure = %failure_type, "{} failed: {}", operation, err)
        }
    }
}

/// Log the outcome of one parse pass over an upstream document.
pub fn log_parse_summary(source: DataSource, site_id: &str, kept: usize, skipped: usize) {
    let source = source.to_string();
    if skipped == 0 {
        debug!(source = %source, site = site_id, kept, "parsed upstream document");
    } else if kept == 0 {
        warn!(source = %source, site = site_id, skipped, "every record in upstream document was skipped");
    } else {
        info!(source = %source, site = site_id, kept, skipped, "parsed upstream document with skipped records");
    }
}

// ---------------------------------------------------------------------------
// Subscriber setup
// ---------------------------------------------------------------------------

/// Builds the level filter: `RUST_LOG` wins, then the configured level.
pub fn build_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
}

/// Initialize the global tracing subscriber.
///
/// With a `file` configured, output goes to that file in append mode
/// (no ANSI colours); otherwise to stderr. Calling this twice is harmless:
/// the second install is ignored.
pub fn init_logging(config: &LoggingConfig) -> std::io::Result<()> {
    let filter = build_filter(config);

    match &config.file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Arc::new(file))
                .try_init();
        }
        None => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .try_init();
        }
    }

    Ok(())
}
