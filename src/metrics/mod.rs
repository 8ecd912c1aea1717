pub mod buffer;
pub mod percentiles;
pub mod record;
pub mod stream;

pub use buffer::{MetricsBuffer, Subscription, WindowSummary, DEFAULT_WINDOW};
pub use percentiles::{RouteSummary, DistBucket};
pub use record::{DbTimingsSummary, MetricRecord};
