//! CSV writers for clustering results.
//!
//! - Labeled incidents (`id,lat,lon,cluster`), one row per incident
//! - Cluster summaries (`cluster,members,centroid_lat,centroid_lon`)

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use thiserror::Error;

use super::loaders::IncidentSet;
use crate::processors::aggregation::ClusterSummary;
use crate::processors::clustering::ClusterAssignment;

/// Errors that can occur during write operations.
#[derive(Error, Debug)]
pub enum WriteError {
    /// Failed to create parent directories.
    #[error("failed to create parent directories for '{path}': {source}")]
    CreateDirectory {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to create or open file for writing.
    #[error("failed to create file '{path}': {source}")]
    CreateFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to flush data to file.
    #[error("failed to write to file '{path}': {source}")]
    WriteFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// CSV writing error.
    #[error("CSV write error for '{path}': {source}")]
    CsvError {
        path: String,
        #[source]
        source: csv::Error,
    },

    /// Mismatched lengths.
    #[error("length mismatch: {incidents_len} incidents, {labels_len} labels")]
    LengthMismatch { incidents_len: usize, labels_len: usize },
}

/// Result type for write operations.
pub type Result<T> = std::result::Result<T, WriteError>;

/// Creates parent directories for a file path if they don't exist.
fn ensure_parent_dirs(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| WriteError::CreateDirectory {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
    }
    Ok(())
}

fn create_csv_writer(path: &Path) -> Result<csv::Writer<BufWriter<File>>> {
    ensure_parent_dirs(path)?;
    let file = File::create(path).map_err(|e| WriteError::CreateFile {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(csv::Writer::from_writer(BufWriter::new(file)))
}

fn finish<W: Write>(mut writer: csv::Writer<W>, path: &Path) -> Result<()> {
    writer.flush().map_err(|e| WriteError::WriteFile {
        path: path.display().to_string(),
        source: e,
    })
}

/// Write incidents with their cluster labels.
///
/// Noise rows carry the label `-1`; incidents without an id get `N/A`.
///
/// # Errors
///
/// Returns an error if the label count differs from the incident count or
/// the file cannot be written.
pub fn write_labels_csv(
    path: &Path,
    incidents: &IncidentSet,
    assignment: &ClusterAssignment,
) -> Result<()> {
    if incidents.len() != assignment.len() {
        return Err(WriteError::LengthMismatch {
            incidents_len: incidents.len(),
            labels_len: assignment.len(),
        });
    }

    let mut csv_writer = create_csv_writer(path)?;
    let csv_err = |e: csv::Error| WriteError::CsvError {
        path: path.display().to_string(),
        source: e,
    };

    csv_writer
        .write_record(["id", "lat", "lon", "cluster"])
        .map_err(csv_err)?;

    for (incident, label) in incidents.iter().zip(assignment.labels()) {
        csv_writer
            .write_record(&[
                incident.display_id().to_string(),
                incident.lat.to_string(),
                incident.lon.to_string(),
                label.to_string(),
            ])
            .map_err(csv_err)?;
    }

    finish(csv_writer, path)
}

/// Write one row per cluster summary, ordered by cluster id.
pub fn write_summary_csv(path: &Path, summaries: &BTreeMap<i32, ClusterSummary>) -> Result<()> {
    let mut csv_writer = create_csv_writer(path)?;
    let csv_err = |e: csv::Error| WriteError::CsvError {
        path: path.display().to_string(),
        source: e,
    };

    csv_writer
        .write_record(["cluster", "members", "centroid_lat", "centroid_lon"])
        .map_err(csv_err)?;

    for summary in summaries.values() {
        csv_writer
            .write_record(&[
                summary.cluster_id.to_string(),
                summary.member_count.to_string(),
                format!("{:.6}", summary.centroid.lat),
                format!("{:.6}", summary.centroid.lon),
            ])
            .map_err(csv_err)?;
    }

    finish(csv_writer, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::loaders::{GeoPoint, IncidentRecord};
    use crate::processors::aggregation::summarize;
    use crate::processors::clustering::dbscan;
    use std::fs;
    use tempfile::tempdir;

    fn create_test_incidents() -> IncidentSet {
        IncidentSet::from_records(vec![
            IncidentRecord::new(Some("a".to_string()), 0.0, 0.0),
            IncidentRecord::new(None, 0.0, 0.25),
            IncidentRecord::new(Some("c".to_string()), 8.0, 8.0),
        ])
    }

    #[test]
    fn test_write_labels_csv() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("labels.csv");
        let incidents = create_test_incidents();
        let assignment = dbscan(&incidents.points(), 0.5, 2).unwrap();

        write_labels_csv(&path, &incidents, &assignment).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();

        assert_eq!(lines[0], "id,lat,lon,cluster");
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[1], "a,0,0,0");
        assert_eq!(lines[2], "N/A,0,0.25,0");
        assert_eq!(lines[3], "c,8,8,-1");
    }

    #[test]
    fn test_write_labels_csv_length_mismatch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("labels.csv");
        let incidents = create_test_incidents();
        let assignment = dbscan(&[GeoPoint::new(0.0, 0.0)], 0.5, 2).unwrap();

        let result = write_labels_csv(&path, &incidents, &assignment);

        match result.unwrap_err() {
            WriteError::LengthMismatch {
                incidents_len,
                labels_len,
            } => {
                assert_eq!(incidents_len, 3);
                assert_eq!(labels_len, 1);
            }
            _ => panic!("Expected LengthMismatch error"),
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_write_summary_csv_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out").join("nested").join("summary.csv");
        let incidents = create_test_incidents();
        let points = incidents.points();
        let assignment = dbscan(&points, 0.5, 2).unwrap();
        let summaries = summarize(&points, &assignment).unwrap();

        write_summary_csv(&path, &summaries).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "cluster,members,centroid_lat,centroid_lon");
        assert_eq!(lines[1], "0,2,0.000000,0.125000");
        assert_eq!(lines.len(), 2);
    }
}
