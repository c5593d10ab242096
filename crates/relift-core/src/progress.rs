//! Progress reporting: a monotonically non-decreasing `(stage, fraction)`
//! stream consumed by a caller-supplied sink.
//!
//! Stage boundaries across a run: fetching configs owns 0–0.1 (emitted by
//! the caller around its source provider), translate + dockerfile fan-out
//! advances 0.3→0.7 proportionally to apps completed, infrastructure
//! generation advances to 0.9, and finalization closes at 1.0. Because
//! per-app pipelines complete out of phase with each other, raw fractions
//! can regress; the reporter clamps them so consumers always observe a
//! non-decreasing signal.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// One progress event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub stage: String,
    /// Fraction of the overall run completed, in `[0, 1]`.
    pub fraction: f64,
}

/// Fraction reached once source configs are fetched.
pub const FETCHED: f64 = 0.1;
/// Fraction at which per-app processing begins.
pub const PROCESSING: f64 = 0.3;
/// Fraction reached once every dockerfile is generated.
pub const DOCKERFILES_DONE: f64 = 0.7;
/// Fraction reached once every infrastructure pair is terminal.
pub const INFRA_DONE: f64 = 0.9;

/// Clamping sender half of the progress stream. Cheap to clone; clones
/// share the same monotonic high-water mark.
#[derive(Clone)]
pub struct ProgressReporter {
    sink: mpsc::UnboundedSender<ProgressUpdate>,
    high_water: Arc<Mutex<f64>>,
}

impl ProgressReporter {
    /// Build a reporter and the receiving end of its stream.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressUpdate>) {
        let (sink, stream) = mpsc::unbounded_channel();
        (
            Self {
                sink,
                high_water: Arc::new(Mutex::new(0.0)),
            },
            stream,
        )
    }

    /// Emit a progress event. The fraction is clamped into `[0, 1]` and
    /// never below a previously emitted value. A dropped receiver is not an
    /// error; progress is advisory.
    pub fn emit(&self, stage: impl Into<String>, fraction: f64) {
        let fraction = {
            let mut high_water = self
                .high_water
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            *high_water = high_water.max(fraction.clamp(0.0, 1.0));
            *high_water
        };
        let _ = self.sink.send(ProgressUpdate {
            stage: stage.into(),
            fraction,
        });
    }

    /// Fraction for `completed` of `total` apps across the span
    /// `[start, end]`.
    pub fn span_fraction(start: f64, end: f64, completed: usize, total: usize) -> f64 {
        if total == 0 {
            return end;
        }
        start + (end - start) * completed as f64 / total as f64
    }
}
