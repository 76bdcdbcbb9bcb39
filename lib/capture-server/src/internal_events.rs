//! Named telemetry call sites, one unit struct per event, each with a single `emit`
//! method that pairs a `tracing` emission with the `metrics` update it implies.
//!
//! Grouping things this way keeps call sites in `coordinator.rs`/`session.rs` to one
//! line (`CaptureArmed.emit()`) and keeps the metric and its accompanying log message
//! defined next to each other instead of scattered across the module they describe.

use crate::coordinator::CaptureState;

pub struct CaptureArmed;

impl CaptureArmed {
    pub fn emit(self) {
        tracing::info!(message = "capture armed.");
        metrics::counter!("capture_arm_total").increment(1);
    }
}

pub struct CaptureStarted;

impl CaptureStarted {
    pub fn emit(self) {
        tracing::info!(message = "capture started.");
    }
}

pub struct CaptureEnded {
    pub lost_bytes: u64,
}

impl CaptureEnded {
    pub fn emit(self) {
        tracing::info!(message = "capture ended.", lost_bytes = self.lost_bytes);
        metrics::gauge!("capture_lost_bytes").set(self.lost_bytes as f64);
    }
}

pub struct CaptureDisarmed;

impl CaptureDisarmed {
    pub fn emit(self) {
        tracing::info!(message = "capture disarmed.");
    }
}

pub struct CaptureReset;

impl CaptureReset {
    pub fn emit(self) {
        tracing::info!(message = "capture reset.");
        metrics::counter!("capture_reset_total").increment(1);
    }
}

pub struct AdmissionRejected {
    pub state: CaptureState,
}

impl AdmissionRejected {
    pub fn emit(self) {
        tracing::warn!(message = "arm rejected, capture busy.", state = ?self.state);
        metrics::counter!("capture_arm_rejected_total").increment(1);
    }
}

pub struct SessionStarted;

impl SessionStarted {
    pub fn emit(self) {
        tracing::debug!(message = "data session started.");
        metrics::gauge!("capture_sessions_active").increment(1.0);
    }
}

pub struct SessionEnded {
    pub outcome: &'static str,
}

impl SessionEnded {
    pub fn emit(self) {
        tracing::debug!(message = "data session ended.", outcome = self.outcome);
        metrics::gauge!("capture_sessions_active").decrement(1.0);
    }
}

pub struct LutCompileFailed {
    pub input: String,
    pub status: lut_compiler::LutStatus,
}

impl LutCompileFailed {
    pub fn emit(self) {
        tracing::debug!(
            message = "LUT expression failed to compile.",
            input = %self.input,
            status = ?self.status,
        );
        metrics::counter!("lut_compile_error_total").increment(1);
    }
}
