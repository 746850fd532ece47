//! Click analytics: classification, recording and read views.
//!
//! The redirect path classifies each realized hit and hands it to the
//! recorder actor. The recorder keeps the in-memory `ClickIndex` current and
//! persists hourly buckets; the aggregator answers queries from the index.

pub mod aggregator;
pub mod classifier;
pub mod geoip;
pub mod ip_extractor;
pub mod models;
pub mod recorder;
pub mod view;

pub use aggregator::{
    AnalyticsAggregator, AnalyticsScope, BreakdownEntry, DateRange, Dimension, HeatmapCell,
    Overview, TimeseriesPoint,
};
pub use classifier::ClickClassifier;
pub use geoip::GeoIpService;
pub use ip_extractor::extract_client_ip;
pub use models::{BucketKey, ClickDimensions, ClickEvent, RequestMeta, Utm};
pub use recorder::ClickRecorder;
pub use view::{ClickIndex, ScopeFilter};
