// GitHub access — the REST client, its response types, and the metrics
// collector that turns raw responses into per-depth repository metrics.

pub mod client;
pub mod metrics;
pub mod traits;
pub mod types;
