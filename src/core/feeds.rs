//! Incident feeds: where a request's incident snapshot comes from.
//!
//! A feed distinguishes a failed fetch (`Err`) from a legitimately empty
//! snapshot (`Ok` with no records).

use std::path::{Path, PathBuf};

use thiserror::Error;

use super::loaders::{load_crash_alerts, load_incident_csv, AlertLogOptions, IncidentSet, LoaderError};
use crate::config::{FeedConfig, FeedFormat};

/// Errors that can occur while fetching a feed.
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("incident feed {path} is unavailable: {source}")]
    Unavailable {
        path: PathBuf,
        #[source]
        source: LoaderError,
    },
}

/// Result type for feed operations.
pub type Result<T> = std::result::Result<T, FeedError>;

/// A source of incident snapshots.
pub trait IncidentFeed {
    /// Take one snapshot of the current incidents.
    fn fetch(&self) -> Result<IncidentSet>;

    /// Short human-readable description for logs.
    fn describe(&self) -> String;
}

/// Incidents read from a CSV file on every fetch.
#[derive(Debug, Clone)]
pub struct CsvIncidentFeed {
    path: PathBuf,
}

impl CsvIncidentFeed {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl IncidentFeed for CsvIncidentFeed {
    fn fetch(&self) -> Result<IncidentSet> {
        load_incident_csv(&self.path).map_err(|e| FeedError::Unavailable {
            path: self.path.clone(),
            source: e,
        })
    }

    fn describe(&self) -> String {
        format!("csv:{}", self.path.display())
    }
}

/// Crash alerts read from a V2V packet log on every fetch.
#[derive(Debug, Clone)]
pub struct CrashLogFeed {
    path: PathBuf,
    options: AlertLogOptions,
}

impl CrashLogFeed {
    pub fn new<P: AsRef<Path>>(path: P, options: AlertLogOptions) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            options,
        }
    }
}

impl IncidentFeed for CrashLogFeed {
    fn fetch(&self) -> Result<IncidentSet> {
        load_crash_alerts(&self.path, self.options).map_err(|e| FeedError::Unavailable {
            path: self.path.clone(),
            source: e,
        })
    }

    fn describe(&self) -> String {
        format!("crash-log:{}", self.path.display())
    }
}

/// A fixed in-memory snapshot.
#[derive(Debug, Clone, Default)]
pub struct StaticIncidentFeed {
    incidents: IncidentSet,
}

impl StaticIncidentFeed {
    pub fn new(incidents: IncidentSet) -> Self {
        Self { incidents }
    }
}

impl IncidentFeed for StaticIncidentFeed {
    fn fetch(&self) -> Result<IncidentSet> {
        Ok(self.incidents.clone())
    }

    fn describe(&self) -> String {
        format!("static:{} incidents", self.incidents.len())
    }
}

/// Build the feed for `path` in the configured format.
pub fn feed_from_config<P: AsRef<Path>>(path: P, config: &FeedConfig) -> Box<dyn IncidentFeed> {
    match config.format {
        FeedFormat::Csv => Box::new(CsvIncidentFeed::new(path)),
        FeedFormat::CrashLog => Box::new(CrashLogFeed::new(path, config.alert_log_options())),
    }
}
