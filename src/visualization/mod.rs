//! Map and chart rendering.
//!
//! The pipeline hands a [`MapScene`] (center, zoom and one layer of
//! markers or heat points) to a [`MapRenderer`]. Two renderers ship with
//! the crate: a PNG scatter map drawn with plotters and a GeoJSON
//! `FeatureCollection` for web map front-ends. Report series are drawn as
//! PNG bar charts by [`plot_time_series`].

use std::path::{Path, PathBuf};

use plotters::prelude::*;
use plotters_bitmap::BitMapBackend;
use serde_json::{json, Value};
use thiserror::Error;

use crate::core::loaders::GeoPoint;
use crate::processors::report::TimeSeriesSnapshot;

/// Errors that can occur during rendering.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Plotting error: {0}")]
    PlottingError(String),

    #[error("Empty series for source '{0}'")]
    EmptySeries(String),
}

/// Result type for rendering operations.
pub type Result<T> = std::result::Result<T, RenderError>;

/// Bar colour used for report charts.
const BAR_COLOR: RGBColor = RGBColor(0x22, 0x53, 0xa3);

/// Incident marker colour.
const MARKER_COLOR: RGBColor = RGBColor(220, 20, 20);

/// Color palette for clusters on the heat map.
const CLUSTER_COLORS: &[(u8, u8, u8)] = &[
    (228, 26, 28),
    (255, 127, 0),
    (255, 215, 0),
    (152, 78, 163),
    (55, 126, 184),
    (77, 175, 74),
    (247, 129, 191),
    (166, 86, 40),
];

/// Opacity of heat points; overlapping points build up intensity.
const HEAT_ALPHA: f64 = 0.35;

/// A labeled incident marker.
#[derive(Debug, Clone, PartialEq)]
pub struct Marker {
    pub label: String,
    pub position: GeoPoint,
    /// Circle radius in pixels.
    pub radius: u32,
}

/// A clustered point on the heat map.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeatPoint {
    pub position: GeoPoint,
    pub cluster_id: i32,
}

/// What to draw on top of the base map.
#[derive(Debug, Clone, PartialEq)]
pub enum MapLayer {
    Markers(Vec<Marker>),
    Heat { points: Vec<HeatPoint>, radius: u32 },
}

impl MapLayer {
    /// Number of drawable items in the layer.
    pub fn len(&self) -> usize {
        match self {
            MapLayer::Markers(markers) => markers.len(),
            MapLayer::Heat { points, .. } => points.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn positions(&self) -> Vec<GeoPoint> {
        match self {
            MapLayer::Markers(markers) => markers.iter().map(|m| m.position).collect(),
            MapLayer::Heat { points, .. } => points.iter().map(|p| p.position).collect(),
        }
    }
}

/// Everything a renderer needs for one map.
#[derive(Debug, Clone, PartialEq)]
pub struct MapScene {
    pub center: GeoPoint,
    pub zoom: u8,
    pub layer: MapLayer,
}

/// Turns a map scene into an embeddable artifact.
pub trait MapRenderer {
    type Artifact;

    fn render(&self, scene: &MapScene) -> Result<Self::Artifact>;
}

/// Renders scenes as GeoJSON `FeatureCollection` strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeoJsonRenderer;

impl GeoJsonRenderer {
    fn to_value(scene: &MapScene) -> Value {
        let point = |p: &GeoPoint| json!({ "type": "Point", "coordinates": [p.lon, p.lat] });

        let (kind, radius, features): (&str, Option<u32>, Vec<Value>) = match &scene.layer {
            MapLayer::Markers(markers) => (
                "markers",
                None,
                markers
                    .iter()
                    .map(|m| {
                        json!({
                            "type": "Feature",
                            "geometry": point(&m.position),
                            "properties": { "label": m.label, "radius": m.radius },
                        })
                    })
                    .collect(),
            ),
            MapLayer::Heat { points, radius } => (
                "heat",
                Some(*radius),
                points
                    .iter()
                    .map(|p| {
                        json!({
                            "type": "Feature",
                            "geometry": point(&p.position),
                            "properties": { "cluster": p.cluster_id },
                        })
                    })
                    .collect(),
            ),
        };

        json!({
            "type": "FeatureCollection",
            "properties": {
                "center": [scene.center.lon, scene.center.lat],
                "zoom": scene.zoom,
                "layer": kind,
                "radius": radius,
            },
            "features": features,
        })
    }
}

impl MapRenderer for GeoJsonRenderer {
    type Artifact = String;

    fn render(&self, scene: &MapScene) -> Result<String> {
        Ok(Self::to_value(scene).to_string())
    }
}

/// Renders scenes as PNG images with longitude on x and latitude on y.
#[derive(Debug, Clone)]
pub struct PngMapRenderer {
    output_path: PathBuf,
    width: u32,
    height: u32,
}

impl PngMapRenderer {
    pub fn new<P: AsRef<Path>>(output_path: P, width: u32, height: u32) -> Self {
        Self {
            output_path: output_path.as_ref().to_path_buf(),
            width,
            height,
        }
    }
}

impl MapRenderer for PngMapRenderer {
    type Artifact = PathBuf;

    fn render(&self, scene: &MapScene) -> Result<PathBuf> {
        let (x_range, y_range) = map_extent(scene);
        ensure_parent_dir(&self.output_path)?;

        let root = BitMapBackend::new(&self.output_path, (self.width, self.height))
            .into_drawing_area();
        root.fill(&WHITE).map_err(plot_err)?;

        let mut chart = ChartBuilder::on(&root)
            .margin(10)
            .build_cartesian_2d(x_range, y_range)
            .map_err(plot_err)?;

        chart
            .configure_mesh()
            .disable_x_mesh()
            .disable_y_mesh()
            .draw()
            .map_err(plot_err)?;

        match &scene.layer {
            MapLayer::Markers(markers) => {
                chart
                    .draw_series(markers.iter().map(|m| {
                        Circle::new(
                            (m.position.lon, m.position.lat),
                            pixel_radius(m.radius),
                            MARKER_COLOR.filled(),
                        )
                    }))
                    .map_err(plot_err)?;
            }
            MapLayer::Heat { points, radius } => {
                chart
                    .draw_series(points.iter().map(|p| {
                        Circle::new(
                            (p.position.lon, p.position.lat),
                            pixel_radius(*radius),
                            cluster_color(p.cluster_id).filled(),
                        )
                    }))
                    .map_err(plot_err)?;
            }
        }

        chart
            .draw_series(std::iter::once(Cross::new(
                (scene.center.lon, scene.center.lat),
                4,
                BLACK.stroke_width(2),
            )))
            .map_err(plot_err)?;

        root.present().map_err(plot_err)?;
        log::info!("map -> {}", self.output_path.display());

        Ok(self.output_path.clone())
    }
}

/// Plot a snapshot's series as a bar chart PNG.
pub fn plot_time_series(
    output_path: &Path,
    snapshot: &TimeSeriesSnapshot,
    width: u32,
    height: u32,
) -> Result<()> {
    if snapshot.series.is_empty() {
        return Err(RenderError::EmptySeries(snapshot.source_id.clone()));
    }

    let (x_min, x_max, y_min, y_max) = series_bounds(&snapshot.series);
    ensure_parent_dir(output_path)?;

    let root = BitMapBackend::new(output_path, (width, height)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(chart_title(snapshot), ("sans-serif", 28))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(x_min..x_max, y_min..y_max)
        .map_err(plot_err)?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .draw()
        .map_err(plot_err)?;

    let half_width = bar_half_width(&snapshot.series);
    chart
        .draw_series(snapshot.series.iter().map(|&(x, y)| {
            Rectangle::new([(x - half_width, 0.0), (x + half_width, y)], BAR_COLOR.filled())
        }))
        .map_err(plot_err)?;

    root.present().map_err(plot_err)?;

    Ok(())
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => Ok(std::fs::create_dir_all(parent)?),
        _ => Ok(()),
    }
}

/// Chart caption: the source title, or its id when no title is configured.
fn chart_title(snapshot: &TimeSeriesSnapshot) -> &str {
    if snapshot.title.trim().is_empty() {
        &snapshot.source_id
    } else {
        &snapshot.title
    }
}

/// Radius in backend pixels, saturating instead of wrapping.
fn pixel_radius(radius: u32) -> i32 {
    i32::try_from(radius).unwrap_or(i32::MAX)
}

fn plot_err<E: std::fmt::Display>(e: E) -> RenderError {
    RenderError::PlottingError(e.to_string())
}

fn cluster_color(cluster_id: i32) -> RGBAColor {
    let (r, g, b) = CLUSTER_COLORS[cluster_id.unsigned_abs() as usize % CLUSTER_COLORS.len()];
    RGBAColor(r, g, b, HEAT_ALPHA)
}

/// Visible lon/lat ranges: a zoom-sized window around the center, widened
/// to cover every point of the layer.
fn map_extent(scene: &MapScene) -> (std::ops::Range<f64>, std::ops::Range<f64>) {
    let half_span = 180.0 / 2f64.powi(i32::from(scene.zoom));
    let mut lon_min = scene.center.lon - half_span;
    let mut lon_max = scene.center.lon + half_span;
    let mut lat_min = scene.center.lat - half_span;
    let mut lat_max = scene.center.lat + half_span;

    for p in scene.layer.positions().iter().filter(|p| p.is_finite()) {
        lon_min = lon_min.min(p.lon);
        lon_max = lon_max.max(p.lon);
        lat_min = lat_min.min(p.lat);
        lat_max = lat_max.max(p.lat);
    }

    let lon_pad = (lon_max - lon_min) * 0.05;
    let lat_pad = (lat_max - lat_min) * 0.05;
    (
        (lon_min - lon_pad)..(lon_max + lon_pad),
        (lat_min - lat_pad)..(lat_max + lat_pad),
    )
}

fn series_bounds(series: &[(f64, f64)]) -> (f64, f64, f64, f64) {
    let mut x_min = f64::MAX;
    let mut x_max = f64::MIN;
    let mut y_min = 0.0f64;
    let mut y_max = 0.0f64;

    for &(x, y) in series {
        x_min = x_min.min(x);
        x_max = x_max.max(x);
        y_min = y_min.min(y);
        y_max = y_max.max(y);
    }

    if (y_max - y_min).abs() < f64::EPSILON {
        y_max += 1.0;
    }

    (x_min - 1.0, x_max + 1.0, y_min * 1.05, y_max * 1.05)
}

/// Half the smallest gap between consecutive steps, capped at 0.4.
fn bar_half_width(series: &[(f64, f64)]) -> f64 {
    let mut xs: Vec<f64> = series.iter().map(|&(x, _)| x).collect();
    xs.sort_by(|a, b| a.total_cmp(b));
    xs.windows(2)
        .map(|w| w[1] - w[0])
        .filter(|gap| *gap > 0.0)
        .fold(0.8, f64::min)
        / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heat_scene() -> MapScene {
        MapScene {
            center: GeoPoint::new(12.9, 77.6),
            zoom: 10,
            layer: MapLayer::Heat {
                points: vec![
                    HeatPoint {
                        position: GeoPoint::new(12.8, 77.5),
                        cluster_id: 0,
                    },
                    HeatPoint {
                        position: GeoPoint::new(13.0, 77.7),
                        cluster_id: 1,
                    },
                ],
                radius: 20,
            },
        }
    }

    #[test]
    fn test_geojson_heat_layer() {
        let rendered = GeoJsonRenderer.render(&heat_scene()).unwrap();
        let value: Value = serde_json::from_str(&rendered).unwrap();

        assert_eq!(value["type"], "FeatureCollection");
        assert_eq!(value["properties"]["layer"], "heat");
        assert_eq!(value["properties"]["radius"], 20);
        assert_eq!(value["properties"]["center"], json!([77.6, 12.9]));

        let features = value["features"].as_array().unwrap();
        assert_eq!(features.len(), 2);
        assert_eq!(features[0]["geometry"]["coordinates"], json!([77.5, 12.8]));
        assert_eq!(features[1]["properties"]["cluster"], 1);
    }

    #[test]
    fn test_geojson_marker_layer() {
        let scene = MapScene {
            center: GeoPoint::new(1.0, 2.0),
            zoom: 12,
            layer: MapLayer::Markers(vec![Marker {
                label: "Incident ID: 7".to_string(),
                position: GeoPoint::new(1.0, 2.0),
                radius: 6,
            }]),
        };

        let value: Value = serde_json::from_str(&GeoJsonRenderer.render(&scene).unwrap()).unwrap();

        assert_eq!(value["properties"]["layer"], "markers");
        assert!(value["properties"]["radius"].is_null());
        assert_eq!(value["features"][0]["properties"]["label"], "Incident ID: 7");
        assert_eq!(value["features"][0]["properties"]["radius"], 6);
    }

    #[test]
    fn test_map_extent_covers_points() {
        let (x, y) = map_extent(&heat_scene());

        assert!(x.start < 77.5 && x.end > 77.7);
        assert!(y.start < 12.8 && y.end > 13.0);
    }

    #[test]
    fn test_map_extent_single_point_uses_zoom() {
        let scene = MapScene {
            center: GeoPoint::new(0.0, 0.0),
            zoom: 1,
            layer: MapLayer::Markers(Vec::new()),
        };
        let (x, _) = map_extent(&scene);
        assert!(x.start <= -90.0 && x.end >= 90.0);
    }

    #[test]
    fn test_series_bounds_and_bar_width() {
        let series = vec![(0.0, 2.0), (1.0, 5.0), (2.0, 3.0)];
        let (x_min, x_max, y_min, y_max) = series_bounds(&series);

        assert_eq!((x_min, x_max), (-1.0, 3.0));
        assert_eq!(y_min, 0.0);
        assert!(y_max > 5.0);
        assert!((bar_half_width(&series) - 0.4).abs() < 1e-12);
        assert!((bar_half_width(&[(0.0, 1.0), (0.5, 1.0)]) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_plot_time_series_rejects_empty_series() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = TimeSeriesSnapshot::absent("congestion", "Congestion Speeds");

        let result = plot_time_series(&dir.path().join("c.png"), &snapshot, 640, 480);
        assert!(matches!(result, Err(RenderError::EmptySeries(_))));
    }

    #[test]
    fn test_chart_title() {
        let titled = TimeSeriesSnapshot::absent("intersection", "Intersection Speeds");
        assert_eq!(chart_title(&titled), "Intersection Speeds");

        let untitled = TimeSeriesSnapshot::absent("congestion", "");
        assert_eq!(chart_title(&untitled), "congestion");
    }

    #[test]
    fn test_pixel_radius_saturates() {
        assert_eq!(pixel_radius(6), 6);
        assert_eq!(pixel_radius(20), 20);
        assert_eq!(pixel_radius(i32::MAX as u32), i32::MAX);
        assert_eq!(pixel_radius(u32::MAX), i32::MAX);
    }
}
