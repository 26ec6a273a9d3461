//! Seams to the external collaborators the pipeline drives.
//!
//! Each collaborator is a trait with an in-process implementation that keeps
//! the binary usable for dry runs when no model server is attached.

pub mod cleaner;
pub mod engine;
pub mod mux;
pub mod oracle;
pub mod sink;

pub use cleaner::MaskedContentCleaner;
pub use engine::{InpaintRequest, InpaintingEngine, PassthroughEngine, Processed};
pub use mux::{FfmpegMuxer, MediaMuxer, MuxRequest, MuxStatus};
pub use oracle::{
    DetectionRequest, FullFrameOracle, MaskCandidate, ModelCache, NoopModelCache,
    SegmentationOracle,
};
pub use sink::{FsImageSink, ImageSink, SaveRequest};
