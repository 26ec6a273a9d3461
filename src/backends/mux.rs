//! FFmpeg invocation muxing generated frames with the source audio.

use std::{
    path::{Path, PathBuf},
    process::Stdio,
};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::{ForgeError, ForgeResult};

/// Inputs for reassembling a video from generated frames.
#[derive(Debug, Clone, PartialEq)]
pub struct MuxRequest {
    /// printf-style frame pattern, e.g. `out/%5d-42.png`.
    pub frames_pattern: PathBuf,
    pub frames_fps: f64,
    pub original_video: PathBuf,
    pub output_fps: f64,
    pub output: PathBuf,
    pub video_codec: String,
    pub audio_codec: String,
}

/// Exit status of the mux process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MuxStatus {
    pub success: bool,
    pub exit_code: Option<i32>,
}

/// Trait implemented by video reassembly backends.
#[async_trait]
pub trait MediaMuxer: Send + Sync {
    async fn mux(&self, request: &MuxRequest) -> ForgeResult<MuxStatus>;
}

/// Builder for FFmpeg commands with several inputs.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    inputs: Vec<(Vec<String>, PathBuf)>,
    output_args: Vec<String>,
    output: PathBuf,
    overwrite: bool,
}

impl FfmpegCommand {
    pub fn new(output: impl AsRef<Path>) -> Self {
        Self {
            inputs: Vec::new(),
            output_args: Vec::new(),
            output: output.as_ref().to_path_buf(),
            overwrite: true,
        }
    }

    /// Adds an input preceded by its input options.
    pub fn input<I, S>(mut self, args: I, path: impl AsRef<Path>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs.push((
            args.into_iter().map(Into::into).collect(),
            path.as_ref().to_path_buf(),
        ));
        self
    }

    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    pub fn map(self, stream: impl Into<String>) -> Self {
        self.output_arg("-map").output_arg(stream)
    }

    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    pub fn audio_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:a").output_arg(codec)
    }

    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-vf").output_arg(filter)
    }

    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        for (input_args, path) in &self.inputs {
            args.extend(input_args.iter().cloned());
            args.push("-i".to_string());
            args.push(path.to_string_lossy().to_string());
        }
        args.extend(self.output_args.iter().cloned());
        if self.overwrite {
            args.push("-y".to_string());
        }
        args.push(self.output.to_string_lossy().to_string());
        args
    }
}

impl From<&MuxRequest> for FfmpegCommand {
    fn from(request: &MuxRequest) -> Self {
        let frames_fps = request.frames_fps.to_string();
        FfmpegCommand::new(&request.output)
            .input(["-framerate", frames_fps.as_str()], &request.frames_pattern)
            .input(["-r", frames_fps.as_str()], &request.original_video)
            .map("0:v:0")
            .map("1:a:0")
            .video_codec(request.video_codec.as_str())
            .audio_codec(request.audio_codec.as_str())
            .video_filter(format!("fps={}", request.output_fps))
            .output_arg("-shortest")
    }
}

/// Muxer spawning the `ffmpeg` binary found on `PATH`.
#[derive(Debug, Default, Clone, Copy)]
pub struct FfmpegMuxer;

#[async_trait]
impl MediaMuxer for FfmpegMuxer {
    async fn mux(&self, request: &MuxRequest) -> ForgeResult<MuxStatus> {
        let ffmpeg = which::which("ffmpeg")
            .map_err(|_| ForgeError::Video("ffmpeg not found in PATH".to_string()))?;
        let args = FfmpegCommand::from(request).build_args();
        debug!("running ffmpeg {}", args.join(" "));

        let status = Command::new(ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|err| ForgeError::Video(format!("spawn ffmpeg: {err}")))?;
        info!(output = %request.output.display(), code = ?status.code(), "video mux finished");
        Ok(MuxStatus {
            success: status.success(),
            exit_code: status.code(),
        })
    }
}
