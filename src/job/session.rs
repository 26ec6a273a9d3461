//! Context carried from one batch to the hires-fix stage.

use std::sync::Arc;

use crate::args::GenerationArgs;

/// Holds the parameters of the most recent completed batch.
///
/// The orchestrator is the only writer; the hires-fix stage reads the stored
/// value and derives copies from it, so the recorded arguments never change
/// until the next batch replaces them.
#[derive(Debug, Clone, Default)]
pub struct Session {
    last: Option<Arc<GenerationArgs>>,
}

impl Session {
    pub fn record(&mut self, args: GenerationArgs) {
        self.last = Some(Arc::new(args));
    }

    pub fn last_args(&self) -> Option<&Arc<GenerationArgs>> {
        self.last.as_ref()
    }

    /// Seed of the last batch, or -1 when nothing ran yet.
    pub fn last_used_seed(&self) -> i64 {
        self.last
            .as_ref()
            .map(|args| args.seed as i64)
            .unwrap_or(-1)
    }
}
