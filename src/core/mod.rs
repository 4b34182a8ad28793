//! Core data types, feeds and I/O operations.

pub mod feeds;
pub mod loaders;
pub mod writers;

pub use feeds::{feed_from_config, CrashLogFeed, CsvIncidentFeed, FeedError, IncidentFeed, StaticIncidentFeed};
pub use loaders::{GeoPoint, IncidentRecord, IncidentSet, LoaderError};
pub use writers::{write_labels_csv, write_summary_csv, WriteError};
