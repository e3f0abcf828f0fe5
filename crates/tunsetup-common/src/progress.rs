//! Line-oriented progress reporting.
//!
//! Setup phases, every executed action and its outcome, and soft-skip
//! warnings are written to a [`ProgressLog`]. The host application decides
//! where those lines go; [`TracingLog`] forwards them to `tracing`.

/// Sink for human-readable setup progress.
pub trait ProgressLog {
    /// Records one status line.
    fn line(&mut self, text: &str);

    /// Records a warning about a skipped, non-fatal step.
    fn note(&mut self, text: &str) {
        self.line(&format!("NOTE: {}", text));
    }
}

/// Forwards progress to `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLog;

impl ProgressLog for TracingLog {
    fn line(&mut self, text: &str) {
        tracing::info!(target: "tunsetup::progress", "{}", text);
    }

    fn note(&mut self, text: &str) {
        tracing::warn!(target: "tunsetup::progress", "NOTE: {}", text);
    }
}

/// Collects lines in memory.
impl ProgressLog for Vec<String> {
    fn line(&mut self, text: &str) {
        self.push(text.to_string());
    }
}
