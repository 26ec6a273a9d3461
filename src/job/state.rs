//! Job progress reporter exposed to the caller.

use std::sync::{Arc, Mutex};

use image::DynamicImage;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
struct JobInner {
    job: String,
    active: bool,
    job_count: usize,
    job_no: usize,
    textinfo: String,
    current_image: Option<DynamicImage>,
    skipped: bool,
    cancel: CancellationToken,
}

/// Snapshot of the job state suitable for assertions and UI polling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSnapshot {
    pub job: String,
    pub active: bool,
    pub job_count: usize,
    pub job_no: usize,
    pub textinfo: String,
    pub has_preview: bool,
    pub interrupted: bool,
    pub skipped: bool,
}

/// Shared handle to the state of the running job.
///
/// Interruption is cooperative: [`JobState::interrupt`] only flags the current
/// job and the orchestrator polls the flag between items, so an item that is
/// already being generated always runs to completion.
#[derive(Clone, Default)]
pub struct JobState {
    state: Arc<Mutex<JobInner>>,
}

impl JobState {
    fn with<R>(&self, f: impl FnOnce(&mut JobInner) -> R) -> R {
        let mut state = self.state.lock().expect("job state mutex poisoned");
        f(&mut state)
    }

    /// Starts a new job, clearing counters and any previous interruption.
    pub fn begin(&self, job: &str) {
        self.with(|state| {
            state.job = job.to_string();
            state.active = true;
            state.job_count = 0;
            state.job_no = 0;
            state.textinfo.clear();
            state.skipped = false;
            state.cancel = CancellationToken::new();
        });
    }

    pub fn end(&self) {
        self.with(|state| {
            state.active = false;
            state.job.clear();
            state.textinfo.clear();
        });
    }

    pub fn next_job(&self) {
        self.with(|state| {
            state.job_no = state.job_no.saturating_add(1);
            state.skipped = false;
        });
    }

    pub fn set_job_count(&self, count: usize) {
        self.with(|state| state.job_count = count);
    }

    pub fn set_textinfo(&self, text: impl Into<String>) {
        let text = text.into();
        self.with(|state| state.textinfo = text);
    }

    pub fn assign_current_image(&self, image: DynamicImage) {
        self.with(|state| state.current_image = Some(image));
    }

    pub fn current_image(&self) -> Option<DynamicImage> {
        self.with(|state| state.current_image.clone())
    }

    pub fn set_skipped(&self, skipped: bool) {
        self.with(|state| state.skipped = skipped);
    }

    /// Requests the running job to stop at the next item boundary.
    pub fn interrupt(&self) {
        self.with(|state| state.cancel.cancel());
    }

    pub fn is_interrupted(&self) -> bool {
        self.with(|state| state.cancel.is_cancelled())
    }

    pub fn snapshot(&self) -> JobSnapshot {
        self.with(|state| JobSnapshot {
            job: state.job.clone(),
            active: state.active,
            job_count: state.job_count,
            job_no: state.job_no,
            textinfo: state.textinfo.clone(),
            has_preview: state.current_image.is_some(),
            interrupted: state.cancel.is_cancelled(),
            skipped: state.skipped,
        })
    }
}
