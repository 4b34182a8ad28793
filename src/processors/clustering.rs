//! Density-based clustering (DBSCAN) of incident coordinates.
//!
//! Neighborhoods are found with a `kiddo` KD-tree and queried in parallel
//! with `rayon`; cluster expansion then runs sequentially in input order so
//! the labels are reproducible for identical input.
//!
//! # Example
//!
//! ```
//! use traffic_heat::core::loaders::GeoPoint;
//! use traffic_heat::processors::clustering::{dbscan, NOISE};
//!
//! let points = vec![
//!     GeoPoint::new(0.0, 0.0),
//!     GeoPoint::new(0.0, 0.001),
//!     GeoPoint::new(10.0, 10.0),
//! ];
//! let assignment = dbscan(&points, 0.01, 2).unwrap();
//! assert_eq!(assignment.labels(), &[0, 0, NOISE]);
//! ```

use std::collections::{BTreeMap, HashMap, VecDeque};

use kiddo::{ImmutableKdTree, SquaredEuclidean};
use rayon::prelude::*;
use thiserror::Error;

use crate::config::ClusteringConfig;
use crate::core::loaders::{GeoPoint, IncidentSet};

/// Label given to points that belong to no cluster.
pub const NOISE: i32 = -1;

/// Relative widening of the KD-tree query radius; results are re-checked
/// against the exact radius so points lying on it are always included.
const RADIUS_SLACK: f64 = 1e-9;

/// Errors that can occur during clustering.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClusteringError {
    #[error("invalid parameter {name} = {value}: {reason}")]
    InvalidParameter {
        name: &'static str,
        value: String,
        reason: &'static str,
    },
}

/// Result type for clustering operations.
pub type Result<T> = std::result::Result<T, ClusteringError>;

/// Cluster label for each input point, by position.
///
/// Labels are either a cluster id (`0..cluster_count()`, numbered in the
/// order clusters were discovered) or [`NOISE`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ClusterAssignment {
    labels: Vec<i32>,
}

impl ClusterAssignment {
    pub fn labels(&self) -> &[i32] {
        &self.labels
    }

    #[inline]
    pub fn label(&self, index: usize) -> Option<i32> {
        self.labels.get(index).copied()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    #[inline]
    pub fn is_noise(&self, index: usize) -> bool {
        self.label(index) == Some(NOISE)
    }

    /// Number of distinct clusters.
    pub fn cluster_count(&self) -> usize {
        self.labels
            .iter()
            .copied()
            .max()
            .map_or(0, |max| (max + 1).max(0) as usize)
    }

    pub fn noise_count(&self) -> usize {
        self.labels.iter().filter(|&&l| l == NOISE).count()
    }

    /// Input positions belonging to `cluster_id`, ascending.
    pub fn members(&self, cluster_id: i32) -> Vec<usize> {
        self.labels
            .iter()
            .enumerate()
            .filter(|(_, &l)| l == cluster_id)
            .map(|(i, _)| i)
            .collect()
    }

    /// Number of points per label, noise included.
    pub fn label_counts(&self) -> BTreeMap<i32, usize> {
        let mut counts = BTreeMap::new();
        for &label in &self.labels {
            *counts.entry(label).or_insert(0) += 1;
        }
        counts
    }

    pub fn into_labels(self) -> Vec<i32> {
        self.labels
    }
}

/// Check clustering parameters.
///
/// `eps` must be a finite, strictly positive distance and `min_samples`
/// at least one.
pub fn validate_params(eps: f64, min_samples: usize) -> Result<()> {
    if !eps.is_finite() || eps <= 0.0 {
        return Err(ClusteringError::InvalidParameter {
            name: "eps",
            value: eps.to_string(),
            reason: "must be a finite number greater than 0",
        });
    }
    if min_samples < 1 {
        return Err(ClusteringError::InvalidParameter {
            name: "min_samples",
            value: min_samples.to_string(),
            reason: "must be at least 1",
        });
    }
    Ok(())
}

/// Most distinct locations allowed to share one coordinate value before
/// neighborhoods are searched on a grid instead of the KD-tree. The tree's
/// leaf buckets cannot be split between equal values on the split axis,
/// so many incidents along one street at the same latitude overflow them.
const MAX_SHARED_AXIS_VALUE: usize = 8;

#[inline]
fn squared_distance(a: &[f64; 2], b: &[f64; 2]) -> f64 {
    let d_lat = a[0] - b[0];
    let d_lon = a[1] - b[1];
    d_lat * d_lat + d_lon * d_lon
}

/// True if any single latitude or longitude is shared by more than
/// [`MAX_SHARED_AXIS_VALUE`] locations.
fn has_crowded_axis(locations: &[[f64; 2]]) -> bool {
    (0..2).any(|axis| {
        let mut counts: HashMap<u64, usize> = HashMap::new();
        locations.iter().any(|loc| {
            let count = counts.entry((loc[axis] + 0.0).to_bits()).or_insert(0);
            *count += 1;
            *count > MAX_SHARED_AXIS_VALUE
        })
    })
}

/// Neighbor slots of every location using a KD-tree.
fn tree_neighbors(locations: &[[f64; 2]], eps: f64) -> Vec<Vec<usize>> {
    let tree: ImmutableKdTree<f64, 2> = ImmutableKdTree::new_from_slice(locations);
    let eps_sq = eps * eps;
    let query_radius = eps_sq * (1.0 + RADIUS_SLACK);

    locations
        .par_iter()
        .map(|location| {
            tree.within::<SquaredEuclidean>(location, query_radius)
                .iter()
                .map(|nn| nn.item as usize)
                .filter(|&slot| squared_distance(location, &locations[slot]) <= eps_sq)
                .collect()
        })
        .collect()
}

/// Neighbor slots of every location using a uniform grid.
///
/// Cells are `2 * eps` wide, so any two locations within `eps` of each
/// other sit in the same or adjacent cells even after rounding.
fn grid_neighbors(locations: &[[f64; 2]], eps: f64) -> Vec<Vec<usize>> {
    let width = 2.0 * eps;
    let cell_of =
        |loc: &[f64; 2]| ((loc[0] / width).floor() as i64, (loc[1] / width).floor() as i64);

    let mut cells: HashMap<(i64, i64), Vec<usize>> = HashMap::new();
    for (slot, location) in locations.iter().enumerate() {
        cells.entry(cell_of(location)).or_default().push(slot);
    }

    let eps_sq = eps * eps;
    locations
        .par_iter()
        .map(|location| {
            let (row, col) = cell_of(location);
            let mut found = Vec::new();
            for d_row in -1i64..=1 {
                for d_col in -1i64..=1 {
                    let cell = (row.saturating_add(d_row), col.saturating_add(d_col));
                    if let Some(slots) = cells.get(&cell) {
                        found.extend(slots.iter().copied().filter(|&slot| {
                            squared_distance(location, &locations[slot]) <= eps_sq
                        }));
                    }
                }
            }
            found
        })
        .collect()
}

/// Compute the `eps`-neighborhood of every point.
///
/// Each list holds input positions in ascending order and includes the
/// point itself. Points with non-finite coordinates get an empty list and
/// never appear in anyone else's.
///
/// Identical coordinates share one search entry, so repeated reports of
/// the same location cost a single query. Inputs where many locations line
/// up on one latitude or longitude are searched on a grid; both searches
/// apply the same inclusive distance test and give the same result.
pub fn neighborhoods(points: &[GeoPoint], eps: f64) -> Vec<Vec<usize>> {
    // Distinct finite locations, in first-seen order, with their positions.
    let mut slot_of: HashMap<(u64, u64), usize> = HashMap::new();
    let mut locations: Vec<[f64; 2]> = Vec::new();
    let mut occupants: Vec<Vec<usize>> = Vec::new();
    let mut slot_per_point: Vec<Option<usize>> = Vec::with_capacity(points.len());

    for (i, p) in points.iter().enumerate() {
        if !p.is_finite() {
            slot_per_point.push(None);
            continue;
        }
        // Fold -0.0 into 0.0 so both land in the same slot.
        let key = ((p.lat + 0.0).to_bits(), (p.lon + 0.0).to_bits());
        let slot = *slot_of.entry(key).or_insert_with(|| {
            locations.push(p.to_array());
            occupants.push(Vec::new());
            locations.len() - 1
        });
        occupants[slot].push(i);
        slot_per_point.push(Some(slot));
    }

    if locations.is_empty() {
        return vec![Vec::new(); points.len()];
    }

    let neighbor_slots = if has_crowded_axis(&locations) {
        log::debug!(
            "{} locations share an axis value, searching neighborhoods on a grid",
            locations.len()
        );
        grid_neighbors(&locations, eps)
    } else {
        tree_neighbors(&locations, eps)
    };

    let per_slot: Vec<Vec<usize>> = neighbor_slots
        .par_iter()
        .map(|slots| {
            let mut members: Vec<usize> = slots
                .iter()
                .flat_map(|&slot| occupants[slot].iter().copied())
                .collect();
            members.sort_unstable();
            members.dedup();
            members
        })
        .collect();

    slot_per_point
        .into_iter()
        .map(|slot| slot.map_or_else(Vec::new, |s| per_slot[s].clone()))
        .collect()
}

/// Grow clusters over precomputed neighborhoods, visiting seeds in input
/// order.
fn expand_clusters(neighbors: &[Vec<usize>], min_samples: usize) -> Vec<i32> {
    let n = neighbors.len();
    let is_core: Vec<bool> = neighbors
        .par_iter()
        .map(|neigh| neigh.len() >= min_samples)
        .collect();

    let mut labels = vec![NOISE; n];
    let mut next_cluster_id: i32 = 0;
    let mut queue = VecDeque::new();

    for seed in 0..n {
        if !is_core[seed] || labels[seed] != NOISE {
            continue;
        }

        let cluster_id = next_cluster_id;
        next_cluster_id += 1;
        labels[seed] = cluster_id;
        queue.push_back(seed);

        while let Some(p) = queue.pop_front() {
            for &q in &neighbors[p] {
                if labels[q] != NOISE {
                    continue;
                }
                labels[q] = cluster_id;
                if is_core[q] {
                    queue.push_back(q);
                }
            }
        }
    }

    labels
}

/// DBSCAN clustering over planar coordinates.
///
/// A point is a core point if its `eps`-neighborhood (itself included)
/// holds at least `min_samples` points. Points are visited in input order;
/// each unlabeled core point opens the next cluster id, which then grows
/// breadth-first through the neighborhoods of its core members. A border
/// point keeps the first cluster that reaches it. Points never reached are
/// labeled [`NOISE`].
///
/// # Errors
///
/// Returns [`ClusteringError::InvalidParameter`] before looking at the
/// input if `eps` is not a positive finite number or `min_samples` is 0.
pub fn dbscan(points: &[GeoPoint], eps: f64, min_samples: usize) -> Result<ClusterAssignment> {
    validate_params(eps, min_samples)?;

    if points.is_empty() {
        return Ok(ClusterAssignment::default());
    }

    let labels = expand_clusters(&neighborhoods(points, eps), min_samples);
    let assignment = ClusterAssignment { labels };

    log::debug!(
        "dbscan: {} points, {} clusters, eps={}, min_samples={}",
        points.len(),
        assignment.cluster_count(),
        eps,
        min_samples
    );

    Ok(assignment)
}

/// Cluster the coordinates of an incident snapshot.
pub fn cluster_incidents(
    incidents: &IncidentSet,
    config: &ClusteringConfig,
) -> Result<ClusterAssignment> {
    let points = incidents.points();
    let assignment = dbscan(&points, config.eps, config.min_samples)?;

    log::info!(
        "clustered {} incidents: {} clusters, {} noise, label counts {:?}",
        assignment.len(),
        assignment.cluster_count(),
        assignment.noise_count(),
        assignment.label_counts()
    );

    Ok(assignment)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pts(coords: &[(f64, f64)]) -> Vec<GeoPoint> {
        coords.iter().copied().map(GeoPoint::from).collect()
    }

    /// Every pair checked directly, with the same inclusive distance test.
    fn brute_force_neighborhoods(points: &[GeoPoint], eps: f64) -> Vec<Vec<usize>> {
        let eps_sq = eps * eps;
        points
            .iter()
            .map(|p| {
                if !p.is_finite() {
                    return Vec::new();
                }
                points
                    .iter()
                    .enumerate()
                    .filter(|(_, q)| {
                        q.is_finite() && squared_distance(&p.to_array(), &q.to_array()) <= eps_sq
                    })
                    .map(|(j, _)| j)
                    .collect()
            })
            .collect()
    }

    fn assert_matches_brute_force(points: &[GeoPoint], eps: f64, min_samples: usize) {
        let expected = brute_force_neighborhoods(points, eps);
        assert_eq!(neighborhoods(points, eps), expected);

        let assignment = dbscan(points, eps, min_samples).unwrap();
        assert_eq!(assignment.labels(), expand_clusters(&expected, min_samples).as_slice());
    }

    #[test]
    fn test_dbscan_reference_scenario() {
        let points = pts(&[(0.0, 0.0), (0.0, 0.001), (0.0, 0.002), (10.0, 10.0)]);

        let assignment = dbscan(&points, 0.01, 2).unwrap();

        assert_eq!(assignment.labels(), &[0, 0, 0, NOISE]);
        assert_eq!(assignment.cluster_count(), 1);
        assert_eq!(assignment.noise_count(), 1);
        assert_eq!(assignment.members(0), vec![0, 1, 2]);
    }

    #[test]
    fn test_dbscan_two_clusters_in_discovery_order() {
        let points = pts(&[
            (100.0, 100.0),
            (0.0, 0.0),
            (100.5, 100.0),
            (0.5, 0.0),
            (0.0, 0.5),
            (50.0, 50.0),
        ]);

        let assignment = dbscan(&points, 1.0, 2).unwrap();

        assert_eq!(assignment.labels(), &[0, 1, 0, 1, 1, NOISE]);
    }

    #[test]
    fn test_dbscan_chains_through_core_points() {
        // Each point only reaches its direct neighbours, yet all are connected.
        let points: Vec<GeoPoint> = (0..10).map(|i| GeoPoint::new(0.0, i as f64)).collect();

        let assignment = dbscan(&points, 1.0, 3).unwrap();

        assert!(assignment.labels().iter().all(|&l| l == 0));
    }

    #[test]
    fn test_dbscan_border_point_is_not_core() {
        // Point 3 sits within eps of point 2 only: border, not core.
        let points = pts(&[(0.0, 0.0), (0.0, 1.0), (0.0, 2.0), (0.0, 3.0)]);

        let assignment = dbscan(&points, 1.0, 3).unwrap();

        assert_eq!(assignment.labels(), &[0, 0, 0, 0]);

        let neighbors = neighborhoods(&points, 1.0);
        assert_eq!(neighbors[3], vec![2, 3]);
    }

    #[test]
    fn test_dbscan_border_point_goes_to_first_cluster() {
        // Point 3 is a border point within reach of both core points 0 and 4.
        let points = pts(&[
            (0.0, 0.0),
            (0.0, -0.2),
            (0.0, -0.4),
            (0.0, 1.0),
            (0.0, 2.0),
            (0.0, 2.2),
            (0.0, 2.4),
        ]);

        let assignment = dbscan(&points, 1.0, 4).unwrap();

        assert_eq!(assignment.labels(), &[0, 0, 0, 0, 1, 1, 1]);
    }

    #[test]
    fn test_dbscan_eps_boundary_is_inclusive() {
        let points = pts(&[(0.0, 0.0), (0.0, 0.5)]);

        let assignment = dbscan(&points, 0.5, 2).unwrap();

        assert_eq!(assignment.labels(), &[0, 0]);
    }

    #[test]
    fn test_dbscan_min_samples_one_has_no_noise() {
        let points = pts(&[(0.0, 0.0), (5.0, 5.0), (5.0, 5.1), (-3.0, 8.0)]);

        let assignment = dbscan(&points, 0.5, 1).unwrap();

        assert_eq!(assignment.noise_count(), 0);
        assert_eq!(assignment.labels(), &[0, 1, 1, 2]);
    }

    #[test]
    fn test_dbscan_empty() {
        let assignment = dbscan(&[], 0.5, 2).unwrap();
        assert!(assignment.is_empty());
        assert_eq!(assignment.cluster_count(), 0);
    }

    #[test]
    fn test_dbscan_single_point() {
        let points = pts(&[(1.0, 1.0)]);

        let noise = dbscan(&points, 0.5, 2).unwrap();
        assert_eq!(noise.labels(), &[NOISE]);

        let huge_eps = dbscan(&points, 1.0e6, 2).unwrap();
        assert_eq!(huge_eps.labels(), &[NOISE]);

        let alone = dbscan(&points, 1.0e6, 1).unwrap();
        assert_eq!(alone.labels(), &[0]);
    }

    #[test]
    fn test_dbscan_duplicate_locations() {
        let mut points = vec![GeoPoint::new(1.0, 1.0); 50];
        points.push(GeoPoint::new(-0.0, 0.0));
        points.push(GeoPoint::new(0.0, -0.0));

        let assignment = dbscan(&points, 0.1, 2).unwrap();

        assert!(assignment.labels()[..50].iter().all(|&l| l == 0));
        assert_eq!(assignment.labels()[50], 1);
        assert_eq!(assignment.labels()[51], 1);
    }

    #[test]
    fn test_dbscan_ignores_non_finite_points() {
        let points = pts(&[
            (0.0, 0.0),
            (f64::NAN, 0.0),
            (0.0, 0.1),
            (f64::INFINITY, f64::INFINITY),
        ]);

        let assignment = dbscan(&points, 1.0, 2).unwrap();

        assert_eq!(assignment.labels(), &[0, NOISE, 0, NOISE]);
        let neighbors = neighborhoods(&points, 1.0);
        assert!(neighbors[1].is_empty());
        assert_eq!(neighbors[0], vec![0, 2]);
    }

    #[test]
    fn test_dbscan_is_deterministic() {
        let points: Vec<GeoPoint> = (0..500)
            .map(|i| {
                let t = i as f64;
                GeoPoint::new((t * 0.37).sin() * 3.0, (t * 0.11).cos() * 3.0)
            })
            .collect();

        let first = dbscan(&points, 0.2, 4).unwrap();
        let second = dbscan(&points, 0.2, 4).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.len(), 500);
    }

    #[test]
    fn test_dbscan_rejects_invalid_parameters() {
        let points = pts(&[(0.0, 0.0)]);

        for eps in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            match dbscan(&points, eps, 2) {
                Err(ClusteringError::InvalidParameter { name, .. }) => assert_eq!(name, "eps"),
                other => panic!("expected InvalidParameter for eps={eps}, got {other:?}"),
            }
        }

        match dbscan(&points, 0.5, 0) {
            Err(ClusteringError::InvalidParameter { name, .. }) => assert_eq!(name, "min_samples"),
            other => panic!("expected InvalidParameter, got {other:?}"),
        }

        // Validation happens even when there is nothing to cluster.
        assert!(dbscan(&[], 0.0, 2).is_err());
    }

    #[test]
    fn test_label_counts() {
        let points = pts(&[(0.0, 0.0), (0.0, 0.1), (9.0, 9.0)]);
        let assignment = dbscan(&points, 0.5, 2).unwrap();

        let counts = assignment.label_counts();
        assert_eq!(counts.get(&0), Some(&2));
        assert_eq!(counts.get(&NOISE), Some(&1));
    }

    #[test]
    fn test_cluster_incidents_uses_config() {
        use crate::core::loaders::IncidentRecord;

        let incidents: IncidentSet = [(0.0, 0.0), (0.0, 0.3), (4.0, 4.0)]
            .iter()
            .map(|&(lat, lon)| IncidentRecord::new(None, lat, lon))
            .collect();

        let config = ClusteringConfig {
            eps: 0.5,
            min_samples: 2,
        };
        let assignment = cluster_incidents(&incidents, &config).unwrap();
        assert_eq!(assignment.labels(), &[0, 0, NOISE]);
    }

    #[test]
    fn test_dbscan_many_incidents_on_one_latitude() {
        let points: Vec<GeoPoint> = (0..40)
            .map(|i| GeoPoint::new(12.9716, 77.59 + i as f64 * 1e-4))
            .collect();

        let assignment = dbscan(&points, 0.5, 2).unwrap();

        assert_eq!(assignment.cluster_count(), 1);
        assert_eq!(assignment.noise_count(), 0);
        assert_matches_brute_force(&points, 0.5, 2);
    }

    #[test]
    fn test_long_street_matches_brute_force() {
        for n in [33, 100, 129, 200] {
            let points: Vec<GeoPoint> =
                (0..n).map(|i| GeoPoint::new(0.0, i as f64 * 0.1)).collect();

            assert_matches_brute_force(&points, 0.25, 2);
            assert_matches_brute_force(&points, 0.25, 6);
        }
    }

    #[test]
    fn test_street_grid_matches_brute_force() {
        let mut points: Vec<GeoPoint> = (0..20)
            .flat_map(|row| {
                (0..20).map(move |col| GeoPoint::new(row as f64 * 0.1, col as f64 * 0.1))
            })
            .collect();
        // A few off-grid incidents and one on a grid node.
        points.push(GeoPoint::new(5.0, 5.0));
        points.push(GeoPoint::new(0.95, 0.95));
        points.push(GeoPoint::new(0.5, 0.5));

        assert_matches_brute_force(&points, 0.15, 5);
        assert_matches_brute_force(&points, 0.1, 3);
        assert_matches_brute_force(&points, 0.05, 2);
    }

    #[test]
    fn test_tree_and_grid_searches_agree() {
        let locations: Vec<[f64; 2]> = (0..300)
            .map(|i| {
                let t = i as f64;
                [(t * 0.37).sin() * 2.0, (t * 0.11).cos() * 2.0]
            })
            .collect();
        assert!(!has_crowded_axis(&locations));

        let sorted = |mut lists: Vec<Vec<usize>>| {
            lists.iter_mut().for_each(|l| l.sort_unstable());
            lists
        };
        assert_eq!(
            sorted(tree_neighbors(&locations, 0.3)),
            sorted(grid_neighbors(&locations, 0.3))
        );

        let points: Vec<GeoPoint> = locations
            .iter()
            .map(|&[lat, lon]| GeoPoint::new(lat, lon))
            .collect();
        assert_matches_brute_force(&points, 0.3, 4);
    }

    #[test]
    fn test_has_crowded_axis() {
        let row = |n: usize| -> Vec<[f64; 2]> { (0..n).map(|i| [1.5, i as f64]).collect() };

        assert!(!has_crowded_axis(&row(MAX_SHARED_AXIS_VALUE)));
        assert!(has_crowded_axis(&row(MAX_SHARED_AXIS_VALUE + 1)));

        let column: Vec<[f64; 2]> = (0..=MAX_SHARED_AXIS_VALUE)
            .map(|i| [i as f64, -0.0])
            .collect();
        assert!(has_crowded_axis(&column));
    }
}
