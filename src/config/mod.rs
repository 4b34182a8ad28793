//! Configuration types for the traffic pipeline.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::core::loaders::AlertLogOptions;

/// On-disk layout of an incident feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedFormat {
    /// CSV with id/lat/lon columns.
    #[default]
    Csv,
    /// V2V packet log with one JSON crash alert per line.
    CrashLog,
}

/// Configuration for incident feeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    #[serde(default)]
    pub format: FeedFormat,

    /// Collapse identical repeated alerts from the same vehicle
    #[serde(default = "default_true")]
    pub dedupe_repeats: bool,

    /// Drop alerts reported at (0, 0) before a GPS fix
    #[serde(default = "default_true")]
    pub drop_null_island: bool,
}

fn default_true() -> bool {
    true
}

impl FeedConfig {
    pub fn alert_log_options(&self) -> AlertLogOptions {
        AlertLogOptions {
            dedupe_repeats: self.dedupe_repeats,
            drop_null_island: self.drop_null_island,
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            format: FeedFormat::default(),
            dedupe_repeats: true,
            drop_null_island: true,
        }
    }
}

/// Configuration for DBSCAN clustering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusteringConfig {
    /// Neighborhood radius, in coordinate units
    #[serde(default = "default_eps")]
    pub eps: f64,

    /// Minimum neighborhood size (point included) for a core point
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
}

fn default_eps() -> f64 {
    0.5
}

fn default_min_samples() -> usize {
    2
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            eps: default_eps(),
            min_samples: default_min_samples(),
        }
    }
}

/// Configuration for the incident and heat maps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapConfig {
    /// Number of incidents shown as markers on the incident map
    #[serde(default = "default_marker_limit")]
    pub marker_limit: usize,

    /// Marker circle radius in pixels
    #[serde(default = "default_marker_radius")]
    pub marker_radius: u32,

    /// Heat point radius in pixels
    #[serde(default = "default_heat_radius")]
    pub heat_radius: u32,

    /// Initial zoom level for the incident map
    #[serde(default = "default_incident_zoom")]
    pub incident_zoom: u8,

    /// Initial zoom level for the heat map
    #[serde(default = "default_heat_zoom")]
    pub heat_zoom: u8,

    /// Image size for PNG output
    #[serde(default = "default_image_width")]
    pub image_width: u32,

    #[serde(default = "default_image_height")]
    pub image_height: u32,
}

fn default_marker_limit() -> usize {
    5
}

fn default_marker_radius() -> u32 {
    6
}

fn default_heat_radius() -> u32 {
    20
}

fn default_incident_zoom() -> u8 {
    12
}

fn default_heat_zoom() -> u8 {
    10
}

fn default_image_width() -> u32 {
    1280
}

fn default_image_height() -> u32 {
    960
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            marker_limit: default_marker_limit(),
            marker_radius: default_marker_radius(),
            heat_radius: default_heat_radius(),
            incident_zoom: default_incident_zoom(),
            heat_zoom: default_heat_zoom(),
            image_width: default_image_width(),
            image_height: default_image_height(),
        }
    }
}

/// A time-series source and the columns holding its series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// CSV file backing the source
    pub path: PathBuf,

    /// Column used for the x axis
    pub step_column: String,

    /// Column used for the y axis
    pub value_column: String,

    /// Chart title
    #[serde(default)]
    pub title: String,
}

/// Configuration for the traffic reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Number of leading rows shown as a sample table
    #[serde(default = "default_sample_rows")]
    pub sample_rows: usize,

    /// Sources keyed by id
    #[serde(default = "default_sources")]
    pub sources: BTreeMap<String, SourceConfig>,
}

fn default_sample_rows() -> usize {
    10
}

fn default_sources() -> BTreeMap<String, SourceConfig> {
    let mut sources = BTreeMap::new();
    sources.insert(
        "intersection".to_string(),
        SourceConfig {
            path: PathBuf::from("traffic_data.csv"),
            step_column: "step".to_string(),
            value_column: "speed_mps".to_string(),
            title: "Intersection Speeds".to_string(),
        },
    );
    sources.insert(
        "congestion".to_string(),
        SourceConfig {
            path: PathBuf::from("traffic_log.csv"),
            step_column: "Step".to_string(),
            value_column: "Speed".to_string(),
            title: "Congestion Speeds".to_string(),
        },
    );
    sources
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            sample_rows: default_sample_rows(),
            sources: default_sources(),
        }
    }
}

/// Main pipeline configuration combining all sub-configs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub feed: FeedConfig,

    #[serde(default)]
    pub clustering: ClusteringConfig,

    #[serde(default)]
    pub map: MapConfig,

    #[serde(default)]
    pub report: ReportConfig,
}

impl PipelineConfig {
    /// Load configuration from a YAML file.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a YAML file.
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
