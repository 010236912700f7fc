//! Runtime observability.

mod metrics;

pub use metrics::MetricsCollector;
