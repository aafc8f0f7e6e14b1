//! Shared state handed to every task at construction.

use std::{sync::Arc, time::Duration};

use crate::clock::Clock;
use crate::component_a::shared_buffer::SharedSnapshot;
use crate::component_b::{health::PipelineHealth, link::LinkStateTracker};
use crate::utils::diagnostics::{DiagnosticKind, Diagnostics};
use crate::utils::metrics::{SharedMetrics, new_shared_metrics};

#[derive(Clone)]
pub struct Pipeline {
    pub snapshot: Arc<SharedSnapshot>,
    pub link_state: Arc<LinkStateTracker>,
    pub health: Arc<PipelineHealth>,
    pub clock: Arc<dyn Clock>,
    pub metrics: SharedMetrics,
    pub diagnostics: Arc<Diagnostics>,
}

impl Pipeline {
    pub fn new(clock: Arc<dyn Clock>, guard_wait: Duration, diagnostics_capacity: usize) -> Self {
        let now = clock.now_ms();
        Self {
            snapshot: Arc::new(SharedSnapshot::new(guard_wait)),
            link_state: Arc::new(LinkStateTracker::new(now)),
            health: Arc::new(PipelineHealth::new(now)),
            clock,
            metrics: new_shared_metrics(),
            diagnostics: Arc::new(Diagnostics::new(diagnostics_capacity)),
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Pushes a diagnostic event stamped with the current uptime.
    pub fn diag(&self, kind: DiagnosticKind) {
        self.diagnostics.record(self.clock.now_ms(), kind);
    }
}
