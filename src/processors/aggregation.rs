//! Per-cluster summaries and centroid computation for map rendering.

use std::collections::BTreeMap;

use thiserror::Error;

use super::clustering::{ClusterAssignment, NOISE};
use crate::core::loaders::GeoPoint;

/// Errors that can occur during aggregation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AggregationError {
    #[error("cannot compute a centroid of zero points")]
    EmptyInput,

    #[error("assignment has {labels_len} labels for {points_len} points")]
    LengthMismatch { points_len: usize, labels_len: usize },
}

/// Result type for aggregation operations.
pub type Result<T> = std::result::Result<T, AggregationError>;

/// Aggregate of one cluster's members.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterSummary {
    pub cluster_id: i32,
    pub member_count: usize,
    /// Mean latitude and mean longitude of the members.
    pub centroid: GeoPoint,
}

#[derive(Default)]
struct Accumulator {
    count: usize,
    lat_sum: f64,
    lon_sum: f64,
}

impl Accumulator {
    fn add(&mut self, p: &GeoPoint) {
        self.count += 1;
        self.lat_sum += p.lat;
        self.lon_sum += p.lon;
    }

    fn mean(&self) -> GeoPoint {
        let n = self.count as f64;
        GeoPoint::new(self.lat_sum / n, self.lon_sum / n)
    }
}

/// Unweighted centroid of a point set.
///
/// # Errors
///
/// Returns [`AggregationError::EmptyInput`] if `points` is empty.
pub fn centroid_of_set(points: &[GeoPoint]) -> Result<GeoPoint> {
    if points.is_empty() {
        return Err(AggregationError::EmptyInput);
    }

    let mut acc = Accumulator::default();
    points.iter().for_each(|p| acc.add(p));
    Ok(acc.mean())
}

/// Summarize every cluster in `assignment`, keyed by cluster id.
///
/// Noise points are left out entirely.
pub fn summarize(
    points: &[GeoPoint],
    assignment: &ClusterAssignment,
) -> Result<BTreeMap<i32, ClusterSummary>> {
    if points.len() != assignment.len() {
        return Err(AggregationError::LengthMismatch {
            points_len: points.len(),
            labels_len: assignment.len(),
        });
    }

    let mut accumulators: BTreeMap<i32, Accumulator> = BTreeMap::new();
    for (point, &label) in points.iter().zip(assignment.labels()) {
        if label == NOISE {
            continue;
        }
        accumulators.entry(label).or_default().add(point);
    }

    Ok(accumulators
        .into_iter()
        .map(|(cluster_id, acc)| {
            (
                cluster_id,
                ClusterSummary {
                    cluster_id,
                    member_count: acc.count,
                    centroid: acc.mean(),
                },
            )
        })
        .collect())
}

/// Points that belong to some cluster, in input order.
pub fn clustered_points(points: &[GeoPoint], assignment: &ClusterAssignment) -> Vec<GeoPoint> {
    points
        .iter()
        .zip(assignment.labels())
        .filter(|(_, &label)| label != NOISE)
        .map(|(p, _)| *p)
        .collect()
}
