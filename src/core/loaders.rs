//! Data loaders for incident snapshots and time-series tables.
//!
//! This module provides parsers for:
//! - Incident CSV files (id, latitude, longitude plus free-form columns)
//! - V2V crash alert logs (one JSON packet per line, as broadcast by vehicles)
//! - Generic header-keyed CSV tables used by the traffic reports

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use csv::ReaderBuilder;
use serde::Deserialize;
use thiserror::Error;

/// Errors that can occur during file loading.
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Missing required columns in {path}: {columns}")]
    MissingColumns { path: PathBuf, columns: String },
}

/// Result type for loader operations.
pub type Result<T> = std::result::Result<T, LoaderError>;

/// Column names accepted for latitude, matched case-insensitively.
const LAT_COLUMNS: &[&str] = &["lat", "latitude"];

/// Column names accepted for longitude, matched case-insensitively.
const LON_COLUMNS: &[&str] = &["lon", "lng", "longitude"];

/// Placeholder shown for incidents without an identifier.
pub const UNKNOWN_ID: &str = "N/A";

/// A geographic coordinate pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    #[inline]
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Returns true if both components are finite numbers.
    #[inline]
    pub fn is_finite(&self) -> bool {
        self.lat.is_finite() && self.lon.is_finite()
    }

    /// Coordinates as a `[lat, lon]` array for KD-tree queries.
    #[inline]
    pub fn to_array(self) -> [f64; 2] {
        [self.lat, self.lon]
    }
}

impl From<(f64, f64)> for GeoPoint {
    fn from((lat, lon): (f64, f64)) -> Self {
        Self { lat, lon }
    }
}

/// A single geolocated incident.
#[derive(Debug, Clone, PartialEq)]
pub struct IncidentRecord {
    /// Incident or vehicle identifier, if the source provided one.
    pub id: Option<String>,
    pub lat: f64,
    pub lon: f64,
    /// Descriptive fields that play no part in clustering.
    pub extra: BTreeMap<String, String>,
}

impl IncidentRecord {
    /// Creates a record with no extra fields.
    pub fn new(id: Option<String>, lat: f64, lon: f64) -> Self {
        Self {
            id,
            lat,
            lon,
            extra: BTreeMap::new(),
        }
    }

    #[inline]
    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lon)
    }

    /// Identifier for display, falling back to [`UNKNOWN_ID`].
    pub fn display_id(&self) -> &str {
        self.id.as_deref().unwrap_or(UNKNOWN_ID)
    }
}

/// An ordered snapshot of incidents for one request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IncidentSet {
    records: Vec<IncidentRecord>,
}

impl IncidentSet {
    /// Creates an empty incident set.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: Vec<IncidentRecord>) -> Self {
        Self { records }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn push(&mut self, record: IncidentRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[IncidentRecord] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, IncidentRecord> {
        self.records.iter()
    }

    /// Coordinates of every record, in input order.
    pub fn points(&self) -> Vec<GeoPoint> {
        self.records.iter().map(IncidentRecord::point).collect()
    }
}

impl FromIterator<IncidentRecord> for IncidentSet {
    fn from_iter<I: IntoIterator<Item = IncidentRecord>>(iter: I) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a IncidentSet {
    type Item = &'a IncidentRecord;
    type IntoIter = std::slice::Iter<'a, IncidentRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

fn find_column(col_map: &HashMap<String, usize>, candidates: &[&str]) -> Option<usize> {
    candidates.iter().find_map(|name| col_map.get(*name).copied())
}

fn parse_coordinate(raw: Option<&str>) -> Option<f64> {
    raw.and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

/// Load an incident snapshot from a CSV file.
///
/// Columns are located by header name (case-insensitive): `lat`/`latitude`,
/// `lon`/`lng`/`longitude` and an optional `id`. Every other column is kept
/// in [`IncidentRecord::extra`]. Rows without parseable, finite coordinates
/// are dropped.
///
/// # Errors
///
/// Returns an error if the file cannot be read or has no coordinate columns.
/// A file with headers but no rows yields an empty set.
pub fn load_incident_csv<P: AsRef<Path>>(path: P) -> Result<IncidentSet> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(BufReader::new(file));

    let headers = reader.headers()?.clone();
    let col_map: HashMap<String, usize> = headers
        .iter()
        .enumerate()
        .map(|(i, name)| (name.to_lowercase(), i))
        .collect();

    let lat_idx = find_column(&col_map, LAT_COLUMNS);
    let lon_idx = find_column(&col_map, LON_COLUMNS);
    let (lat_idx, lon_idx) = match (lat_idx, lon_idx) {
        (Some(lat), Some(lon)) => (lat, lon),
        _ => {
            return Err(LoaderError::MissingColumns {
                path: path.to_path_buf(),
                columns: "lat, lon".to_string(),
            })
        }
    };
    let id_idx = col_map.get("id").copied();

    let mut set = IncidentSet::new();
    let mut skipped = 0usize;

    for result in reader.records() {
        let record = result?;

        let (lat, lon) = match (
            parse_coordinate(record.get(lat_idx)),
            parse_coordinate(record.get(lon_idx)),
        ) {
            (Some(lat), Some(lon)) => (lat, lon),
            _ => {
                skipped += 1;
                continue;
            }
        };

        let id = id_idx
            .and_then(|i| record.get(i))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        let extra = headers
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != lat_idx && *i != lon_idx && Some(*i) != id_idx)
            .filter_map(|(i, name)| record.get(i).map(|v| (name.to_string(), v.to_string())))
            .collect();

        set.push(IncidentRecord { id, lat, lon, extra });
    }

    if skipped > 0 {
        log::warn!(
            "{}: skipped {} rows without usable coordinates",
            path.display(),
            skipped
        );
    }

    Ok(set)
}

/// Packet broadcast by a vehicle over the V2V radio link.
#[derive(Debug, Deserialize)]
struct V2vPacket {
    #[serde(rename = "type")]
    kind: String,
    from: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
    #[serde(flatten)]
    rest: BTreeMap<String, serde_json::Value>,
}

/// Packet type carrying a crash location.
const CRASH_ALERT: &str = "crash_alert";

/// Options for reading crash alert logs.
#[derive(Debug, Clone, Copy)]
pub struct AlertLogOptions {
    /// Keep only the first of identical repeated alerts from one vehicle.
    pub dedupe_repeats: bool,
    /// Drop alerts sent before the GPS had a fix (reported as 0, 0).
    pub drop_null_island: bool,
}

impl Default for AlertLogOptions {
    fn default() -> Self {
        Self {
            dedupe_repeats: true,
            drop_null_island: true,
        }
    }
}

/// Load crash alerts from a V2V packet log.
///
/// Each line holds one JSON packet, optionally preceded by a serial-console
/// prefix such as `Broadcasted Packet: `. Only `crash_alert` packets with
/// coordinates become incidents; acknowledgements, malformed lines and
/// bytes that are not UTF-8 are skipped.
pub fn load_crash_alerts<P: AsRef<Path>>(path: P, options: AlertLogOptions) -> Result<IncidentSet> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);

    let mut set = IncidentSet::new();
    let mut seen: HashSet<(Option<String>, u64, u64)> = HashSet::new();
    let mut malformed = 0usize;
    let mut buf = Vec::new();

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        // Serial consoles interleave raw bytes with the packets.
        let line = String::from_utf8_lossy(&buf);
        let Some(start) = line.find('{') else {
            continue;
        };

        let packet: V2vPacket = match serde_json::from_str(line[start..].trim_end()) {
            Ok(p) => p,
            Err(e) => {
                log::debug!("{}: unreadable packet: {}", path.display(), e);
                malformed += 1;
                continue;
            }
        };

        if packet.kind != CRASH_ALERT {
            continue;
        }

        let (lat, lon) = match (packet.lat, packet.lon) {
            (Some(lat), Some(lon)) if lat.is_finite() && lon.is_finite() => (lat, lon),
            _ => continue,
        };

        if options.drop_null_island && lat == 0.0 && lon == 0.0 {
            continue;
        }

        if options.dedupe_repeats
            && !seen.insert((packet.from.clone(), lat.to_bits(), lon.to_bits()))
        {
            continue;
        }

        let extra = packet
            .rest
            .into_iter()
            .map(|(k, v)| match v {
                serde_json::Value::String(s) => (k, s),
                other => (k, other.to_string()),
            })
            .collect();

        set.push(IncidentRecord {
            id: packet.from,
            lat,
            lon,
            extra,
        });
    }

    if malformed > 0 {
        log::warn!("{}: skipped {} malformed packets", path.display(), malformed);
    }

    Ok(set)
}

/// A header-keyed CSV table held as strings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    /// Index of a column by exact header name.
    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Load a CSV file into a [`Table`].
///
/// Returns `Ok(None)` if the file does not exist, so callers can treat a
/// missing source as an expected state rather than an error.
pub fn load_table<P: AsRef<Path>>(path: P) -> Result<Option<Table>> {
    let path = path.as_ref();
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(BufReader::new(file));

    let headers = reader.headers()?.iter().map(str::to_string).collect();
    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result?;
        rows.push(record.iter().map(str::to_string).collect());
    }

    Ok(Some(Table { headers, rows }))
}
