//! Request-level views: the incident map and the heat analysis.
//!
//! Each call takes a fresh snapshot from its feed, computes everything from
//! that snapshot and hands the result to a renderer. Nothing is kept
//! between calls.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::config::{ClusteringConfig, MapConfig};
use crate::core::feeds::IncidentFeed;
use crate::core::loaders::{GeoPoint, IncidentSet};
use crate::processors::aggregation::{centroid_of_set, summarize, AggregationError, ClusterSummary};
use crate::processors::clustering::{dbscan, validate_params, ClusterAssignment, ClusteringError, NOISE};
use crate::visualization::{HeatPoint, MapLayer, MapRenderer, MapScene, Marker, RenderError};

/// Errors that abort a view request.
#[derive(Error, Debug)]
pub enum ViewError {
    #[error(transparent)]
    InvalidParameter(#[from] ClusteringError),

    #[error(transparent)]
    Aggregation(#[from] AggregationError),

    #[error("map rendering failed: {0}")]
    Render(#[from] RenderError),
}

/// Result type for view operations.
pub type Result<T> = std::result::Result<T, ViewError>;

/// Outcome of fetching the feed for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedStatus {
    Fetched,
    /// The fetch failed; the view was built from an empty snapshot.
    Unavailable(String),
}

/// Heat analysis parameters supplied by the caller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeatRequest {
    pub eps: f64,
    pub min_samples: usize,
    /// Heat point radius forwarded to the renderer.
    pub radius: u32,
}

impl HeatRequest {
    pub fn new(clustering: &ClusteringConfig, map: &MapConfig) -> Self {
        Self {
            eps: clustering.eps,
            min_samples: clustering.min_samples,
            radius: map.heat_radius,
        }
    }
}

impl Default for HeatRequest {
    fn default() -> Self {
        Self::new(&ClusteringConfig::default(), &MapConfig::default())
    }
}

/// The unclustered incident map.
#[derive(Debug, Clone)]
pub struct IncidentMapView<A> {
    pub feed_status: FeedStatus,
    pub incidents: IncidentSet,
    /// Mean position of all incidents; `None` when there are none.
    pub center: Option<GeoPoint>,
    pub markers: Vec<Marker>,
    /// Rendered map; `None` when there was nothing to show.
    pub map: Option<A>,
}

/// The clustered heat map with its per-cluster summaries.
#[derive(Debug, Clone)]
pub struct HeatView<A> {
    pub feed_status: FeedStatus,
    pub request: HeatRequest,
    pub incidents: IncidentSet,
    pub assignment: ClusterAssignment,
    pub summaries: BTreeMap<i32, ClusterSummary>,
    pub center: Option<GeoPoint>,
    /// Clustered incidents only; noise never reaches the heat layer.
    pub heat_points: Vec<HeatPoint>,
    pub map: Option<A>,
}

fn fetch_snapshot(feed: &dyn IncidentFeed) -> (IncidentSet, FeedStatus) {
    match feed.fetch() {
        Ok(set) => {
            log::info!("{}: fetched {} incidents", feed.describe(), set.len());
            (set, FeedStatus::Fetched)
        }
        Err(e) => {
            log::warn!("{}: {}", feed.describe(), e);
            (IncidentSet::new(), FeedStatus::Unavailable(e.to_string()))
        }
    }
}

/// Map center over the finite coordinates, or `None` if there are none.
fn map_center(points: &[GeoPoint]) -> Result<Option<GeoPoint>> {
    let finite: Vec<GeoPoint> = points.iter().copied().filter(GeoPoint::is_finite).collect();
    match centroid_of_set(&finite) {
        Ok(center) => Ok(Some(center)),
        Err(AggregationError::EmptyInput) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Build the incident map: the first `marker_limit` incidents as markers,
/// centered on the mean of all incidents.
///
/// An empty or unavailable feed yields a view without a map.
pub fn incident_map<R: MapRenderer>(
    feed: &dyn IncidentFeed,
    renderer: &R,
    config: &MapConfig,
) -> Result<IncidentMapView<R::Artifact>> {
    let (incidents, feed_status) = fetch_snapshot(feed);

    let Some(center) = map_center(&incidents.points())? else {
        return Ok(IncidentMapView {
            feed_status,
            incidents,
            center: None,
            markers: Vec::new(),
            map: None,
        });
    };

    let markers: Vec<Marker> = incidents
        .iter()
        .take(config.marker_limit)
        .map(|incident| Marker {
            label: format!("Incident ID: {}", incident.display_id()),
            position: incident.point(),
            radius: config.marker_radius,
        })
        .collect();

    let scene = MapScene {
        center,
        zoom: config.incident_zoom,
        layer: MapLayer::Markers(markers.clone()),
    };
    let map = renderer.render(&scene)?;

    Ok(IncidentMapView {
        feed_status,
        incidents,
        center: Some(center),
        markers,
        map: Some(map),
    })
}

/// Build the heat analysis: cluster the snapshot with the request's
/// parameters, summarize each cluster and render the clustered incidents.
///
/// # Errors
///
/// Invalid parameters are rejected before the feed is fetched. An empty
/// or unavailable feed is not an error; the view then has no map.
pub fn heat_analysis<R: MapRenderer>(
    feed: &dyn IncidentFeed,
    renderer: &R,
    request: &HeatRequest,
    config: &MapConfig,
) -> Result<HeatView<R::Artifact>> {
    validate_params(request.eps, request.min_samples)?;

    let (incidents, feed_status) = fetch_snapshot(feed);
    let points = incidents.points();

    let assignment = dbscan(&points, request.eps, request.min_samples)?;
    let summaries = summarize(&points, &assignment)?;

    let heat_points: Vec<HeatPoint> = points
        .iter()
        .zip(assignment.labels())
        .filter(|(_, &label)| label != NOISE)
        .map(|(&position, &cluster_id)| HeatPoint {
            position,
            cluster_id,
        })
        .collect();

    log::info!(
        "heat analysis: {} incidents, {} clusters, {} noise (eps={}, min_samples={})",
        incidents.len(),
        assignment.cluster_count(),
        assignment.noise_count(),
        request.eps,
        request.min_samples
    );

    let center = map_center(&points)?;
    let map = match center {
        Some(center) => {
            let scene = MapScene {
                center,
                zoom: config.heat_zoom,
                layer: MapLayer::Heat {
                    points: heat_points.clone(),
                    radius: request.radius,
                },
            };
            Some(renderer.render(&scene)?)
        }
        None => None,
    };

    Ok(HeatView {
        feed_status,
        request: *request,
        incidents,
        assignment,
        summaries,
        center,
        heat_points,
        map,
    })
}
