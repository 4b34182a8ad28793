//! Time-series snapshots behind the traffic reports.
//!
//! Every source is described by a [`SourceConfig`] naming its file and the
//! columns holding the step and the value, so the simulator's intersection
//! log (`step`/`speed_mps`) and the congestion log (`Step`/`Speed`) load
//! into the same [`TimeSeriesSnapshot`] shape.

use std::collections::BTreeMap;
use std::path::PathBuf;

use thiserror::Error;

use crate::config::{ReportConfig, SourceConfig};
use crate::core::loaders::{load_table, LoaderError, Table};

/// Header used for every column of a sample table.
pub const BLANK_HEADER: &str = " ";

/// Errors that can occur while loading report sources.
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("unknown report source '{0}'")]
    UnknownSource(String),

    #[error("source '{source_id}' ({path}) has no column '{column}'")]
    MissingColumn {
        source_id: String,
        path: PathBuf,
        column: String,
    },

    #[error("failed to load source '{source_id}': {source}")]
    Load {
        source_id: String,
        #[source]
        source: LoaderError,
    },
}

/// Result type for report operations.
pub type Result<T> = std::result::Result<T, ReportError>;

/// One read of a time-series source.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeriesSnapshot {
    pub source_id: String,
    pub title: String,
    /// False when the source file is missing or has no rows.
    pub present: bool,
    /// Headers of the sample table, all blank.
    pub sample_headers: Vec<String>,
    /// Leading rows with the index column dropped.
    pub sample_rows: Vec<Vec<String>>,
    /// `(step, value)` pairs for charting.
    pub series: Vec<(f64, f64)>,
}

impl TimeSeriesSnapshot {
    /// Snapshot of a source that has no data.
    pub fn absent(source_id: &str, title: &str) -> Self {
        Self {
            source_id: source_id.to_string(),
            title: title.to_string(),
            present: false,
            sample_headers: Vec::new(),
            sample_rows: Vec::new(),
            series: Vec::new(),
        }
    }
}

/// Loads time-series snapshots from the configured sources.
#[derive(Debug, Clone)]
pub struct ReportAggregator {
    sources: BTreeMap<String, SourceConfig>,
    sample_rows: usize,
}

impl ReportAggregator {
    pub fn new(config: &ReportConfig) -> Self {
        Self {
            sources: config.sources.clone(),
            sample_rows: config.sample_rows,
        }
    }

    /// Configured source ids, in order.
    pub fn source_ids(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }

    /// Load one source.
    ///
    /// A missing or empty file gives a snapshot with `present == false`;
    /// that is an expected state, not an error.
    ///
    /// # Errors
    ///
    /// Fails for an unknown `source_id`, for a present file that cannot be
    /// read, or for one lacking the configured step/value columns.
    pub fn load_snapshot(&self, source_id: &str) -> Result<TimeSeriesSnapshot> {
        let source = self
            .sources
            .get(source_id)
            .ok_or_else(|| ReportError::UnknownSource(source_id.to_string()))?;

        let table = load_table(&source.path).map_err(|e| ReportError::Load {
            source_id: source_id.to_string(),
            source: e,
        })?;

        let table = match table {
            Some(t) if !t.is_empty() => t,
            _ => {
                log::info!(
                    "source '{}' has no data at {}",
                    source_id,
                    source.path.display()
                );
                return Ok(TimeSeriesSnapshot::absent(source_id, &source.title));
            }
        };

        let step_idx = require_column(source_id, source, &table, &source.step_column)?;
        let value_idx = require_column(source_id, source, &table, &source.value_column)?;

        let sample_rows: Vec<Vec<String>> = table
            .rows
            .iter()
            .take(self.sample_rows)
            .map(|row| row.iter().skip(1).cloned().collect())
            .collect();
        let sample_headers = vec![BLANK_HEADER.to_string(); table.headers.len().saturating_sub(1)];

        let mut skipped = 0usize;
        let series: Vec<(f64, f64)> = table
            .rows
            .iter()
            .filter_map(|row| {
                let step = row.get(step_idx).and_then(|s| s.trim().parse::<f64>().ok());
                let value = row.get(value_idx).and_then(|s| s.trim().parse::<f64>().ok());
                match (step, value) {
                    (Some(x), Some(y)) => Some((x, y)),
                    _ => {
                        skipped += 1;
                        None
                    }
                }
            })
            .collect();

        if skipped > 0 {
            log::warn!(
                "source '{}': skipped {} rows with non-numeric {}/{}",
                source_id,
                skipped,
                source.step_column,
                source.value_column
            );
        }

        Ok(TimeSeriesSnapshot {
            source_id: source_id.to_string(),
            title: source.title.clone(),
            present: true,
            sample_headers,
            sample_rows,
            series,
        })
    }

    /// Load every configured source, in id order.
    pub fn load_all(&self) -> Result<Vec<TimeSeriesSnapshot>> {
        self.source_ids().map(|id| self.load_snapshot(id)).collect()
    }
}

fn require_column(
    source_id: &str,
    source: &SourceConfig,
    table: &Table,
    column: &str,
) -> Result<usize> {
    table.column(column).ok_or_else(|| ReportError::MissingColumn {
        source_id: source_id.to_string(),
        path: source.path.clone(),
        column: column.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    fn config_in(dir: &Path) -> ReportConfig {
        let mut config = ReportConfig::default();
        for source in config.sources.values_mut() {
            source.path = dir.join(&source.path);
        }
        config
    }

    #[test]
    fn test_absent_source_is_not_an_error() {
        let dir = tempdir().unwrap();
        let aggregator = ReportAggregator::new(&config_in(dir.path()));

        let snapshot = aggregator.load_snapshot("intersection").unwrap();

        assert!(!snapshot.present);
        assert!(snapshot.sample_rows.is_empty());
        assert!(snapshot.series.is_empty());
        assert_eq!(snapshot.title, "Intersection Speeds");
    }

    #[test]
    fn test_header_only_source_is_absent() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("traffic_log.csv"), ",Step,Speed\n").unwrap();
        let aggregator = ReportAggregator::new(&config_in(dir.path()));

        let snapshot = aggregator.load_snapshot("congestion").unwrap();
        assert!(!snapshot.present);
    }

    #[test]
    fn test_intersection_snapshot() {
        let dir = tempdir().unwrap();
        let mut csv = String::from("vehicle,step,speed_mps\n");
        for i in 0..15 {
            csv.push_str(&format!("veh{},{},{}\n", i, i, 10.0 + i as f64 * 0.5));
        }
        fs::write(dir.path().join("traffic_data.csv"), csv).unwrap();
        let aggregator = ReportAggregator::new(&config_in(dir.path()));

        let snapshot = aggregator.load_snapshot("intersection").unwrap();

        assert!(snapshot.present);
        assert_eq!(snapshot.sample_rows.len(), 10);
        assert_eq!(snapshot.sample_rows[0], vec!["0", "10"]);
        assert_eq!(snapshot.sample_headers, vec![" ", " "]);
        assert_eq!(snapshot.series.len(), 15);
        assert_eq!(snapshot.series[14], (14.0, 17.0));
    }

    #[test]
    fn test_congestion_snapshot_uses_capitalized_columns() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("traffic_log.csv"),
            ",Step,Speed\n0,1,3.5\n1,2,oops\n2,3,4.0\n",
        )
        .unwrap();
        let aggregator = ReportAggregator::new(&config_in(dir.path()));

        let snapshot = aggregator.load_snapshot("congestion").unwrap();

        assert!(snapshot.present);
        assert_eq!(snapshot.sample_rows.len(), 3);
        assert_eq!(snapshot.sample_rows[1], vec!["2", "oops"]);
        assert_eq!(snapshot.series, vec![(1.0, 3.5), (3.0, 4.0)]);
    }

    #[test]
    fn test_missing_column() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("traffic_log.csv"), ",step,speed\n0,1,3.5\n").unwrap();
        let aggregator = ReportAggregator::new(&config_in(dir.path()));

        match aggregator.load_snapshot("congestion") {
            Err(ReportError::MissingColumn { column, .. }) => assert_eq!(column, "Step"),
            other => panic!("expected MissingColumn, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_source() {
        let aggregator = ReportAggregator::new(&ReportConfig::default());
        assert!(matches!(
            aggregator.load_snapshot("weather"),
            Err(ReportError::UnknownSource(_))
        ));
    }

    #[test]
    fn test_load_all_in_id_order() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("traffic_log.csv"), ",Step,Speed\n0,1,3.5\n").unwrap();
        let aggregator = ReportAggregator::new(&config_in(dir.path()));

        let snapshots = aggregator.load_all().unwrap();

        let ids: Vec<&str> = snapshots.iter().map(|s| s.source_id.as_str()).collect();
        assert_eq!(ids, vec!["congestion", "intersection"]);
        assert!(snapshots[0].present);
        assert!(!snapshots[1].present);
    }
}
