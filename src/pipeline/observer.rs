use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Mutex;
use std::time::Duration;

use super::StageKind;
use crate::error::StageError;

/// Hooks the runner calls around each stage. All methods default to no-ops.
pub trait RunObserver: Send + Sync {
    fn stage_started(&self, _kind: StageKind) {}

    fn stage_finished(&self, _kind: StageKind, _elapsed: Duration) {}

    fn stage_failed(&self, _kind: StageKind, _error: &StageError) {}

    fn run_finished(&self, _elapsed: Duration) {}
}

/// Reports stage boundaries through `tracing`
#[derive(Debug, Default)]
pub struct LogObserver;

impl RunObserver for LogObserver {
    fn stage_started(&self, kind: StageKind) {
        tracing::info!(stage = %kind, "Stage started");
    }

    fn stage_finished(&self, kind: StageKind, elapsed: Duration) {
        tracing::info!(stage = %kind, elapsed_ms = elapsed.as_millis() as u64, "Stage finished");
    }

    fn stage_failed(&self, kind: StageKind, error: &StageError) {
        if error.is_fatal() {
            tracing::error!(stage = %kind, %error, "Stage failed");
        } else {
            tracing::warn!(stage = %kind, %error, "Stage finished with errors");
        }
    }

    fn run_finished(&self, elapsed: Duration) {
        tracing::info!(elapsed_ms = elapsed.as_millis() as u64, "Run finished");
    }
}

/// Terminal spinner showing the running stage
pub struct SpinnerObserver {
    current: Mutex<Option<ProgressBar>>,
}

impl SpinnerObserver {
    pub fn new() -> Self {
        Self {
            current: Mutex::new(None),
        }
    }

    fn take(&self) -> Option<ProgressBar> {
        self.current.lock().ok().and_then(|mut slot| slot.take())
    }
}

impl Default for SpinnerObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl RunObserver for SpinnerObserver {
    fn stage_started(&self, kind: StageKind) {
        let progress = ProgressBar::new_spinner();
        progress.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        progress.enable_steady_tick(Duration::from_millis(120));
        progress.set_message(format!("Running {} stage...", kind));

        if let Ok(mut slot) = self.current.lock() {
            if let Some(previous) = slot.replace(progress) {
                previous.finish_and_clear();
            }
        }
    }

    fn stage_finished(&self, kind: StageKind, _elapsed: Duration) {
        if let Some(progress) = self.take() {
            progress.finish_with_message(format!("{} complete", kind));
        }
    }

    fn stage_failed(&self, kind: StageKind, _error: &StageError) {
        if let Some(progress) = self.take() {
            progress.abandon_with_message(format!("{} failed", kind));
        }
    }
}
