//! Video bracket: frame extraction before a batch and reassembly after it.

#[cfg(feature = "ffmpeg")]
pub mod libav;
pub mod reader;
pub mod schedule;

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use image::{DynamicImage, ImageFormat};
use tokio::fs;
use tracing::{debug, info, instrument};

use crate::{
    ForgeError, ForgeResult,
    backends::mux::{MediaMuxer, MuxRequest, MuxStatus},
    config::VideoSettings,
};

pub use reader::{VideoOpener, VideoReader};
pub use schedule::FrameSchedule;

/// Frames extracted from one input video.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedVideo {
    pub source: PathBuf,
    pub frames_dir: PathBuf,
    pub native_fps: f64,
    pub target_fps: f64,
    pub frame_count: u64,
}

/// Extracts frames into a scratch directory and muxes generated frames back.
#[derive(Clone)]
pub struct VideoBracket {
    opener: Arc<dyn VideoOpener>,
    muxer: Arc<dyn MediaMuxer>,
    settings: VideoSettings,
    frames_format: String,
}

impl VideoBracket {
    /// `frames_format` is the extension generated frames are saved with.
    pub fn new(
        opener: Arc<dyn VideoOpener>,
        muxer: Arc<dyn MediaMuxer>,
        settings: VideoSettings,
        frames_format: impl Into<String>,
    ) -> Self {
        Self {
            opener,
            muxer,
            settings,
            frames_format: frames_format.into(),
        }
    }

    /// Scratch directory used for the frames of `video`.
    pub fn frames_dir(&self, video: &Path) -> PathBuf {
        video
            .parent()
            .unwrap_or_else(|| Path::new(""))
            .join(&self.settings.temp_dir_name)
    }

    /// Samples `video` at `target_fps` into the scratch directory next to it.
    ///
    /// Files left in the directory by a previous run are removed first.
    #[instrument(skip_all, fields(video = %video.display(), target_fps = target_fps))]
    pub async fn extract(&self, video: &Path, target_fps: f64) -> ForgeResult<ExtractedVideo> {
        if !fs::try_exists(video).await? {
            return Err(ForgeError::Video(format!(
                "{}: no such video file",
                video.display()
            )));
        }

        let frames_dir = self.frames_dir(video);
        clear_files(&frames_dir).await?;
        fs::create_dir_all(&frames_dir).await?;

        let opener = Arc::clone(&self.opener);
        let source = video.to_path_buf();
        let dir = frames_dir.clone();
        let (native_fps, frame_count) = tokio::task::spawn_blocking(move || {
            let mut reader = opener.open(&source)?;
            let native_fps = reader.frame_rate();
            let count = extract_frames(reader.as_mut(), target_fps, &dir)?;
            Ok::<_, ForgeError>((native_fps, count))
        })
        .await??;

        info!(native_fps, target_fps, frame_count, "extracted video frames");
        Ok(ExtractedVideo {
            source: video.to_path_buf(),
            frames_dir,
            native_fps,
            target_fps,
            frame_count,
        })
    }

    /// Builds the mux request for frames saved in `output_dir` under `seed`.
    pub fn mux_request(
        &self,
        extracted: &ExtractedVideo,
        output_dir: &Path,
        seed: u64,
    ) -> MuxRequest {
        let name = extracted
            .source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        MuxRequest {
            frames_pattern: output_dir.join(format!("%5d-{seed}.{}", self.frames_format)),
            frames_fps: extracted.target_fps,
            original_video: extracted.source.clone(),
            output_fps: extracted.native_fps,
            output: output_dir.join(format!("output_{name}_{seed}.mp4")),
            video_codec: self.settings.video_codec.clone(),
            audio_codec: self.settings.audio_codec.clone(),
        }
    }

    /// Muxes the generated frames with the audio of the source video.
    ///
    /// The result carries the process status; a non-zero exit is not an error.
    #[instrument(skip_all, fields(seed = seed))]
    pub async fn reassemble(
        &self,
        extracted: &ExtractedVideo,
        output_dir: &Path,
        seed: u64,
    ) -> ForgeResult<MuxStatus> {
        let request = self.mux_request(extracted, output_dir, seed);
        debug!(output = %request.output.display(), "reassembling video");
        self.muxer.mux(&request).await
    }
}

/// Reads every frame of `reader`, writing the scheduled ones as `frame_NNNNNN.jpg`.
///
/// Returns the number of frames written.
pub fn extract_frames(
    reader: &mut dyn VideoReader,
    target_fps: f64,
    dir: &Path,
) -> ForgeResult<u64> {
    let mut schedule = FrameSchedule::new(reader.frame_rate(), target_fps)?;
    let mut native_index = 0u64;
    while reader.grab()? {
        if let Some(ordinal) = schedule.admit(native_index) {
            let frame = reader.retrieve()?;
            let path = dir.join(format!("frame_{ordinal:06}.jpg"));
            DynamicImage::ImageRgb8(frame)
                .save_with_format(&path, ImageFormat::Jpeg)
                .map_err(|err| ForgeError::Video(format!("{}: {err}", path.display())))?;
        }
        native_index += 1;
    }
    Ok(schedule.emitted())
}

async fn clear_files(dir: &Path) -> ForgeResult<()> {
    if !fs::try_exists(dir).await? {
        return Ok(());
    }
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            fs::remove_file(entry.path()).await?;
        }
    }
    Ok(())
}
