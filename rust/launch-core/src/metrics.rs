// rust/launch-core/src/metrics.rs

//! Metrics sink interface.
//!
//! Training loops log scalars through a [`MetricsSink`]. When no tracker is
//! configured they get [`NoopMetrics`], which accepts the same calls and
//! drops them, so call sites never branch on "is tracking enabled".

/// Destination for scalar training metrics.
pub trait MetricsSink: Send {
    /// Records named values, optionally at a step.
    fn log(&mut self, step: Option<u64>, values: &[(&str, f64)]);

    /// Flushes and closes the sink. Later calls to `log` are ignored.
    fn finish(&mut self);
}

/// A sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl NoopMetrics {
    pub fn new() -> Self {
        Self
    }
}

impl MetricsSink for NoopMetrics {
    fn log(&mut self, _step: Option<u64>, _values: &[(&str, f64)]) {}

    fn finish(&mut self) {}
}
