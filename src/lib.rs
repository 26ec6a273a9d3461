//! Core library for the Maskforge pipeline.
//!
//! The crate detects a prompt-selected region in each input image, picks one
//! of the candidate masks, inpaints it and optionally runs a second
//! high-resolution fix pass. Single images, image lists, directories and
//! video files all flow through the same batch orchestrator.

pub mod args;
pub mod backends;
pub mod config;
pub mod job;
pub mod pipeline;
pub mod video;

use std::fmt::Display;

use image::DynamicImage;
use thiserror::Error;
use tracing::{info, instrument};

use crate::{
    job::{JobState, Session},
    pipeline::{BatchReport, Pipeline},
};

/// Errors returned by pipeline stages and their collaborators.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ForgeError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("detection failure: {0}")]
    Detection(String),
    #[error("inpaint engine failure: {0}")]
    Engine(String),
    #[error("masked content cleaner failure: {0}")]
    Cleaner(String),
    #[error("no batch has been generated yet")]
    NoPriorBatch,
    #[error("hires fix is not supported for batch: {0}")]
    UnsupportedBatchShape(String),
    #[error("decode failure: {0}")]
    Decode(String),
    #[error("video failure: {0}")]
    Video(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("I/O failure: {0}")]
    Io(String),
    #[error("task join failure: {0}")]
    Join(String),
}

impl ForgeError {
    /// True for errors raised by hires-fix preconditions rather than by a pass itself.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            ForgeError::NoPriorBatch | ForgeError::UnsupportedBatchShape(_)
        )
    }
}

impl From<tokio::task::JoinError> for ForgeError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Join(err.to_string())
    }
}

impl From<std::io::Error> for ForgeError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Result alias used across the crate.
pub type ForgeResult<T> = Result<T, ForgeError>;

/// Images plus the three text panes produced by a generation call.
#[derive(Debug, Clone, Default)]
pub struct GenerationOutput {
    pub images: Vec<DynamicImage>,
    /// Machine readable generation metadata (JSON).
    pub metadata: String,
    pub info: String,
    pub comments: String,
    /// Per-batch accounting; absent for hires-fix runs.
    pub report: Option<BatchReport>,
}

impl GenerationOutput {
    /// Empty output carrying the error text in the info pane.
    pub fn rejected(error: &ForgeError) -> Self {
        Self {
            info: error.to_string(),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

impl Display for GenerationOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "GenerationOutput(images={}", self.images.len())?;
        if let Some(report) = &self.report {
            write!(
                f,
                ", processed={}, failed={}, interrupted={}",
                report.processed, report.failed, report.interrupted
            )?;
        }
        write!(f, ")")
    }
}

/// Runs one batch from the CLI configuration and, when requested, the hires fix over it.
#[instrument(skip_all)]
pub async fn run(config: config::AppConfig) -> ForgeResult<()> {
    let job = JobState::default();
    let interrupt = job.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.interrupt();
        }
    });

    let pipeline = Pipeline::with_defaults(config.settings.clone(), job);
    let mut session = Session::default();

    let request = config.batch_request()?;
    let output = pipeline.generate(&mut session, request).await?;
    info!(result = %output, "batch finished");

    if let Some(hires) = config.hires_fix_request() {
        let fixed = pipeline.apply_hires_fix(&session, hires).await?;
        if fixed.is_empty() && !fixed.info.is_empty() {
            tracing::warn!(reason = %fixed.info, "hires fix skipped");
        } else {
            info!(result = %fixed, "hires fix finished");
        }
    }

    Ok(())
}
