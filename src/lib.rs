//! # bhulan
//!
//! GPS telemetry ingestion core: heterogeneous vendor payloads are mapped and validated into
//! canonical [`TrackPoint`](track_point::TrackPoint)s, stored idempotently by content hash
//! with one tracked job per batch, and optionally speed-smoothed.
//!
//! ## Layers
//! -----------------
//! * [`mapping`] + [`validation`] + [`normalize`] – declarative vendor mapping, validation and
//!   per-record fault isolation.
//! * [`storage`] + [`jobs`] – dedup point store and ingestion job registry.
//! * [`smoothing`] – Kalman and Savitzky–Golay speed smoothers.
//! * [`ingest`] + [`files`] – the end-to-end pipeline for payloads and bulk files.
pub mod bhulan_errors;
pub mod constants;
pub mod files;
pub mod ingest;
pub mod jobs;
pub mod logging;
pub mod mapping;
pub mod normalize;
pub mod record;
pub mod settings;
pub mod smoothing;
pub mod storage;
pub mod track_point;
pub mod validation;

pub use bhulan_errors::BhulanError;
pub use ingest::Ingestor;
pub use mapping::MappingPlan;
pub use normalize::{normalize_batch, normalize_record, NormalizationResult};
pub use settings::Settings;
pub use smoothing::{SmootherConfig, SpeedSmoother};
pub use storage::{JobRegistry, MemoryStore, SqliteStore, TrackPointRepository};
pub use track_point::TrackPoint;
