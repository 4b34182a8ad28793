//! Traffic incident clustering, heat maps and speed reports.
//!
//! This crate provides tools for:
//! - Loading incident snapshots from CSV files or V2V crash-alert logs
//! - DBSCAN clustering of incident coordinates (parallel neighbor queries)
//! - Cluster summaries with member counts and centroids
//! - Intersection and congestion speed time-series reports
//! - Rendering incident markers and heat layers as PNG or GeoJSON
//!
//! # Example
//!
//! ```no_run
//! use traffic_heat::{core::loaders::load_incident_csv, processors::clustering::dbscan};
//!
//! let incidents = load_incident_csv("incidents.csv").unwrap();
//! let assignment = dbscan(&incidents.points(), 0.5, 2).unwrap();
//! println!("{} clusters", assignment.cluster_count());
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod processors;
pub mod views;
pub mod visualization;

pub use config::{ClusteringConfig, FeedConfig, MapConfig, PipelineConfig, ReportConfig};
pub use core::loaders::{GeoPoint, IncidentRecord, IncidentSet};
pub use processors::clustering::{dbscan, ClusterAssignment, NOISE};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
