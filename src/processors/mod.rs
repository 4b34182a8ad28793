//! Data processing modules.

pub mod aggregation;
pub mod clustering;
pub mod report;

// Re-export key types for convenience
pub use aggregation::{centroid_of_set, clustered_points, summarize, AggregationError, ClusterSummary};
pub use clustering::{cluster_incidents, dbscan, ClusterAssignment, ClusteringError, NOISE};
pub use report::{ReportAggregator, ReportError, TimeSeriesSnapshot};
