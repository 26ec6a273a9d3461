#![allow(dead_code)]

use std::{
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage};
use maskforge::{
    ForgeError, ForgeResult,
    backends::{
        DetectionRequest, InpaintRequest, InpaintingEngine, MaskCandidate, MaskedContentCleaner,
        MediaMuxer, ModelCache, MuxRequest, MuxStatus, PassthroughEngine, Processed,
        SaveRequest, SegmentationOracle,
        sink::ImageSink,
    },
    config::Settings,
    job::JobState,
    video::{VideoOpener, VideoReader},
};

pub fn image(width: u32, height: u32) -> DynamicImage {
    DynamicImage::new_rgba8(width, height)
}

/// Mask value the stub oracle writes for candidate `index`.
pub fn candidate_value(index: usize) -> u8 {
    10 * (index as u8 + 1)
}

/// Oracle returning `count` candidates whose masks are filled with [`candidate_value`].
#[derive(Clone, Default)]
pub struct StubOracle {
    pub count: usize,
    pub calls: Arc<AtomicUsize>,
}

impl StubOracle {
    pub fn new(count: usize) -> Self {
        Self {
            count,
            calls: Arc::default(),
        }
    }
}

#[async_trait]
impl SegmentationOracle for StubOracle {
    async fn detect(&self, request: DetectionRequest<'_>) -> ForgeResult<Vec<MaskCandidate>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (width, height) = (request.image.width(), request.image.height());
        Ok((0..self.count)
            .map(|index| MaskCandidate {
                mask: GrayImage::from_pixel(width, height, Luma([candidate_value(index)])),
                preview: DynamicImage::new_rgb8(width, height),
                cutout: DynamicImage::new_rgba8(width, height),
                boxed: DynamicImage::new_rgb16(width, height),
            })
            .collect())
    }
}

/// Engine delegating to [`PassthroughEngine`] that records requests and fails on chosen calls.
#[derive(Clone, Default)]
pub struct RecordingEngine {
    /// 1-based call numbers that fail.
    pub fail_on: Vec<usize>,
    pub requests: Arc<Mutex<Vec<InpaintRequest>>>,
    /// Interrupts this job on the first call.
    pub interrupt: Option<JobState>,
}

impl RecordingEngine {
    pub fn failing_on(calls: &[usize]) -> Self {
        Self {
            fail_on: calls.to_vec(),
            ..Self::default()
        }
    }

    pub fn requests(&self) -> Vec<InpaintRequest> {
        self.requests.lock().expect("engine mutex poisoned").clone()
    }
}

#[async_trait]
impl InpaintingEngine for RecordingEngine {
    async fn run(&self, request: InpaintRequest) -> ForgeResult<Processed> {
        let call = {
            let mut requests = self.requests.lock().expect("engine mutex poisoned");
            requests.push(request.clone());
            requests.len()
        };
        if let Some(job) = &self.interrupt {
            job.interrupt();
        }
        if self.fail_on.contains(&call) {
            return Err(ForgeError::Engine(format!("call {call} failed")));
        }
        PassthroughEngine.run(request).await
    }
}

#[derive(Clone, Default)]
pub struct CountingCache {
    pub unloads: Arc<AtomicUsize>,
}

impl CountingCache {
    pub fn count(&self) -> usize {
        self.unloads.load(Ordering::SeqCst)
    }
}

impl ModelCache for CountingCache {
    fn unload(&self) {
        self.unloads.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Clone, Default)]
pub struct CountingCleaner {
    pub calls: Arc<AtomicUsize>,
}

#[async_trait]
impl MaskedContentCleaner for CountingCleaner {
    async fn clean(
        &self,
        image: &DynamicImage,
        _mask: &GrayImage,
        _invert: bool,
        _upscaler: Option<&str>,
    ) -> ForgeResult<DynamicImage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(image.clone())
    }
}

/// Cleaner that always fails.
#[derive(Clone, Default)]
pub struct FailingCleaner {
    pub calls: Arc<AtomicUsize>,
}

#[async_trait]
impl MaskedContentCleaner for FailingCleaner {
    async fn clean(
        &self,
        _image: &DynamicImage,
        _mask: &GrayImage,
        _invert: bool,
        _upscaler: Option<&str>,
    ) -> ForgeResult<DynamicImage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ForgeError::Cleaner("upscaler unavailable".into()))
    }
}

/// Sink keeping save requests in memory.
#[derive(Clone, Default)]
pub struct RecordingSink {
    pub saved: Arc<Mutex<Vec<SaveRequest>>>,
}

impl RecordingSink {
    pub fn saved(&self) -> Vec<SaveRequest> {
        self.saved.lock().expect("sink mutex poisoned").clone()
    }
}

#[async_trait]
impl ImageSink for RecordingSink {
    async fn save(&self, _image: &DynamicImage, request: &SaveRequest) -> ForgeResult<PathBuf> {
        let mut saved = self.saved.lock().expect("sink mutex poisoned");
        saved.push(request.clone());
        Ok(request
            .directory
            .join(format!("{:05}-{}{}.png", saved.len() - 1, request.seed, request.suffix)))
    }
}

/// Opener yielding `frames` solid frames at `native_fps` for any path.
#[derive(Clone, Copy)]
pub struct StubVideoOpener {
    pub native_fps: f64,
    pub frames: u64,
}

impl VideoOpener for StubVideoOpener {
    fn open(&self, _path: &Path) -> ForgeResult<Box<dyn VideoReader>> {
        Ok(Box::new(StubVideoReader {
            native_fps: self.native_fps,
            remaining: self.frames,
            position: 0,
        }))
    }
}

struct StubVideoReader {
    native_fps: f64,
    remaining: u64,
    position: u64,
}

impl VideoReader for StubVideoReader {
    fn frame_rate(&self) -> f64 {
        self.native_fps
    }

    fn grab(&mut self) -> ForgeResult<bool> {
        if self.remaining == 0 {
            return Ok(false);
        }
        self.remaining -= 1;
        self.position += 1;
        Ok(true)
    }

    fn retrieve(&mut self) -> ForgeResult<RgbImage> {
        let shade = (self.position * 20) as u8;
        Ok(RgbImage::from_pixel(8, 6, Rgb([shade, shade, shade])))
    }
}

/// Muxer recording requests and answering with a fixed outcome.
#[derive(Clone)]
pub struct RecordingMuxer {
    pub requests: Arc<Mutex<Vec<MuxRequest>>>,
    pub outcome: Result<MuxStatus, ForgeError>,
}

impl Default for RecordingMuxer {
    fn default() -> Self {
        Self {
            requests: Arc::default(),
            outcome: Ok(MuxStatus {
                success: true,
                exit_code: Some(0),
            }),
        }
    }
}

impl RecordingMuxer {
    pub fn requests(&self) -> Vec<MuxRequest> {
        self.requests.lock().expect("muxer mutex poisoned").clone()
    }
}

#[async_trait]
impl MediaMuxer for RecordingMuxer {
    async fn mux(&self, request: &MuxRequest) -> ForgeResult<MuxStatus> {
        self.requests
            .lock()
            .expect("muxer mutex poisoned")
            .push(request.clone());
        self.outcome.clone()
    }
}

/// Settings with the save directory moved under `root`.
pub fn settings_in(root: &Path) -> Settings {
    let mut settings = Settings::default();
    settings.output.save_dir = root.join("saved");
    settings
}
