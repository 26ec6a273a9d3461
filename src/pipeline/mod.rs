//! Pipeline orchestration: source enumeration, mask selection, inpainting and hires fix.

use std::sync::Arc;

use crate::{
    ForgeError,
    args::{ExtraInclude, InpaintingFill},
    backends::{
        cleaner::MaskedContentCleaner,
        engine::{InpaintingEngine, PassthroughEngine},
        mux::{FfmpegMuxer, MediaMuxer, MuxStatus},
        oracle::{FullFrameOracle, ModelCache, NoopModelCache, SegmentationOracle},
        sink::{FsImageSink, ImageSink},
    },
    config::Settings,
    job::{JobState, ResourceGuard},
    video::{VideoBracket, reader::VideoOpener},
};

pub mod batch;
pub mod hires;
pub mod inpaint;
pub mod mask;
pub mod single;
pub mod source;

pub use hires::HiresFixRequest;
pub use inpaint::{Inpainter, SaveTarget};
pub use mask::{MaskSelector, SelectedMask};
pub use source::{BatchEntry, ImageSequence, SourceMode, SourceRequest};

/// Job name reported while a batch runs.
pub const JOB_NAME: &str = "maskforge";
/// Job name reported while the hires fix runs.
pub const HIRES_JOB_NAME: &str = "maskforge_hf";

/// Prompt set of a batch request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Prompts {
    pub detection: String,
    pub avoidance: String,
    pub positive: String,
    pub negative: String,
}

/// Full parameter set of one batch-generation call.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub source: SourceRequest,
    pub prompts: Prompts,
    pub upscaler_for_img2img: Option<String>,
    /// -1 picks a random seed when the batch starts.
    pub seed: i64,
    pub sampler: String,
    pub steps: u32,
    pub box_threshold: f32,
    pub mask_expand: i32,
    pub mask_blur: u32,
    pub max_resolution_on_detection: u32,
    pub sam_model: String,
    pub detection_model: String,
    pub cfg_scale: f32,
    pub denoising_strength: f32,
    pub inpaint_padding: u32,
    pub inpainting_fill: InpaintingFill,
    pub width: u32,
    pub height: u32,
    pub batch_count: u32,
    pub batch_size: u32,
    pub inpainting_mask_invert: bool,
    pub save_grid: bool,
    pub extra_includes: Vec<ExtraInclude>,
}

impl BatchRequest {
    /// Request for `source` with the default sampling and detection parameters.
    pub fn new(source: SourceRequest) -> Self {
        Self {
            source,
            prompts: Prompts::default(),
            upscaler_for_img2img: None,
            seed: -1,
            sampler: "DPM++ 2M SDE".to_string(),
            steps: 20,
            box_threshold: 0.3,
            mask_expand: 35,
            mask_blur: 4,
            max_resolution_on_detection: 1280,
            sam_model: "sam_hq_vit_l.pth".to_string(),
            detection_model: "GroundingDINO_SwinT_OGC (694MB)".to_string(),
            cfg_scale: 5.5,
            denoising_strength: 1.0,
            inpaint_padding: 40,
            inpainting_fill: InpaintingFill::Fill,
            width: 512,
            height: 512,
            batch_count: 1,
            batch_size: 1,
            inpainting_mask_invert: false,
            save_grid: false,
            extra_includes: Vec::new(),
        }
    }
}

/// One item that failed inside a multi-item batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    /// 1-based position in the enumerated sequence.
    pub position: usize,
    pub error: ForgeError,
}

/// Accounting for one batch run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub seed: u64,
    /// Item count known before iteration.
    pub declared: usize,
    /// Items the source actually yielded.
    pub enumerated: usize,
    pub processed: usize,
    pub failed: usize,
    pub failures: Vec<ItemFailure>,
    /// Mask candidate index chosen for each processed item, in order.
    pub mask_indices: Vec<usize>,
    pub interrupted: bool,
    /// Outcome of the video reassembly, video mode only.
    pub mux: Option<Result<MuxStatus, ForgeError>>,
}

impl BatchReport {
    /// Files that were listed but never yielded, e.g. undecodable directory entries.
    pub fn skipped(&self) -> usize {
        if self.interrupted {
            0
        } else {
            self.declared.saturating_sub(self.enumerated)
        }
    }
}

/// The batch orchestrator with its collaborators.
#[derive(Clone)]
pub struct Pipeline {
    settings: Settings,
    job: JobState,
    selector: MaskSelector,
    inpainter: Inpainter,
    guard: ResourceGuard,
    video: VideoBracket,
}

impl Pipeline {
    pub fn builder(settings: Settings, job: JobState) -> PipelineBuilder {
        PipelineBuilder {
            settings,
            job,
            oracle: Arc::new(FullFrameOracle),
            engine: Arc::new(PassthroughEngine),
            cleaner: None,
            sink: None,
            cache: Arc::new(NoopModelCache),
            opener: None,
            muxer: Arc::new(FfmpegMuxer),
        }
    }

    /// Pipeline wired to the in-process dry-run collaborators.
    pub fn with_defaults(settings: Settings, job: JobState) -> Self {
        Self::builder(settings, job).build()
    }

    pub fn job(&self) -> &JobState {
        &self.job
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }
}

/// Collects collaborators for a [`Pipeline`], defaulting any left unset.
pub struct PipelineBuilder {
    settings: Settings,
    job: JobState,
    oracle: Arc<dyn SegmentationOracle>,
    engine: Arc<dyn InpaintingEngine>,
    cleaner: Option<Arc<dyn MaskedContentCleaner>>,
    sink: Option<Arc<dyn ImageSink>>,
    cache: Arc<dyn ModelCache>,
    opener: Option<Arc<dyn VideoOpener>>,
    muxer: Arc<dyn MediaMuxer>,
}

impl PipelineBuilder {
    pub fn oracle<O: SegmentationOracle + 'static>(mut self, oracle: O) -> Self {
        self.oracle = Arc::new(oracle);
        self
    }

    pub fn engine<E: InpaintingEngine + 'static>(mut self, engine: E) -> Self {
        self.engine = Arc::new(engine);
        self
    }

    pub fn cleaner<C: MaskedContentCleaner + 'static>(mut self, cleaner: C) -> Self {
        self.cleaner = Some(Arc::new(cleaner));
        self
    }

    pub fn sink<S: ImageSink + 'static>(mut self, sink: S) -> Self {
        self.sink = Some(Arc::new(sink));
        self
    }

    pub fn model_cache<M: ModelCache + 'static>(mut self, cache: M) -> Self {
        self.cache = Arc::new(cache);
        self
    }

    pub fn video_opener<V: VideoOpener + 'static>(mut self, opener: V) -> Self {
        self.opener = Some(Arc::new(opener));
        self
    }

    pub fn muxer<M: MediaMuxer + 'static>(mut self, muxer: M) -> Self {
        self.muxer = Arc::new(muxer);
        self
    }

    pub fn build(self) -> Pipeline {
        let settings = self.settings;
        let sink = self
            .sink
            .unwrap_or_else(|| Arc::new(FsImageSink::new(settings.output.save_txt)));
        let opener = self
            .opener
            .unwrap_or_else(crate::video::reader::default_opener);
        let inpainter = Inpainter::new(
            self.engine,
            self.cleaner,
            settings.cleaner.upscaler.clone(),
            sink,
            settings.output.samples_format.clone(),
            settings.behavior.do_not_show_images,
        );
        Pipeline {
            selector: MaskSelector::new(self.oracle),
            inpainter,
            guard: ResourceGuard::new(self.cache, settings.behavior.auto_unload_models),
            video: VideoBracket::new(
                opener,
                self.muxer,
                settings.video.clone(),
                settings.output.samples_format.clone(),
            ),
            job: self.job,
            settings,
        }
    }
}
