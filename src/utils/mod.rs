pub mod diagnostics;
pub mod metrics;
pub mod metrics_export;
