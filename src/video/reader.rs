//! Frame-by-frame video readers.

use std::{
    ffi::OsString,
    io::{BufReader, ErrorKind, Read},
    path::Path,
    process::{Child, ChildStdout, Command, Stdio},
    sync::Arc,
};

use image::RgbImage;
use serde::Deserialize;
use tracing::debug;

use crate::{ForgeError, ForgeResult};

/// Blocking sequential reader over the frames of one video.
///
/// `grab` advances to the next frame; `retrieve` decodes the grabbed frame.
/// Frames that are grabbed but never retrieved are skipped cheaply where the
/// backend allows it.
pub trait VideoReader: Send {
    fn frame_rate(&self) -> f64;
    fn grab(&mut self) -> ForgeResult<bool>;
    fn retrieve(&mut self) -> ForgeResult<RgbImage>;
}

/// Opens [`VideoReader`]s for video files.
pub trait VideoOpener: Send + Sync {
    fn open(&self, path: &Path) -> ForgeResult<Box<dyn VideoReader>>;
}

/// Opener used when none is configured explicitly.
pub fn default_opener() -> Arc<dyn VideoOpener> {
    #[cfg(feature = "ffmpeg")]
    {
        Arc::new(super::libav::LibavOpener)
    }
    #[cfg(not(feature = "ffmpeg"))]
    {
        Arc::new(FfmpegPipeOpener)
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: String,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
}

/// Parses an ffprobe rate such as `30000/1001` or `25`.
pub fn parse_frame_rate(raw: &str) -> Option<f64> {
    if let Some((num, den)) = raw.split_once('/') {
        let num: f64 = num.trim().parse().ok()?;
        let den: f64 = den.trim().parse().ok()?;
        return (den > 0.0 && num > 0.0).then(|| num / den);
    }
    raw.trim().parse().ok().filter(|rate: &f64| *rate > 0.0)
}

/// Arguments for decoding `path` to raw RGB24 frames on stdout.
///
/// Autorotation stays off so frames keep the stored dimensions ffprobe reports.
pub fn decode_args(path: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-v", "error", "-noautorotate", "-i"]
        .into_iter()
        .map(OsString::from)
        .collect();
    args.push(path.as_os_str().to_os_string());
    args.extend(
        ["-f", "rawvideo", "-pix_fmt", "rgb24", "-vsync", "passthrough", "-"]
            .into_iter()
            .map(OsString::from),
    );
    args
}

/// Reader that probes with `ffprobe` and decodes through an `ffmpeg` rawvideo pipe.
#[derive(Debug, Default, Clone, Copy)]
pub struct FfmpegPipeOpener;

impl VideoOpener for FfmpegPipeOpener {
    fn open(&self, path: &Path) -> ForgeResult<Box<dyn VideoReader>> {
        let ffprobe = which::which("ffprobe")
            .map_err(|_| ForgeError::Video("ffprobe not found in PATH".to_string()))?;
        let ffmpeg = which::which("ffmpeg")
            .map_err(|_| ForgeError::Video("ffmpeg not found in PATH".to_string()))?;

        let output = Command::new(ffprobe)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_streams",
                "-select_streams",
                "v:0",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .map_err(|err| ForgeError::Video(format!("spawn ffprobe: {err}")))?;
        if !output.status.success() {
            return Err(ForgeError::Video(format!(
                "ffprobe failed for {}: {}",
                path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let probe: ProbeOutput = serde_json::from_slice(&output.stdout)
            .map_err(|err| ForgeError::Video(format!("ffprobe output: {err}")))?;
        let stream = probe
            .streams
            .into_iter()
            .find(|stream| stream.codec_type == "video")
            .ok_or_else(|| ForgeError::Video(format!("{}: no video stream", path.display())))?;
        let (width, height) = match (stream.width, stream.height) {
            (Some(width), Some(height)) if width > 0 && height > 0 => (width, height),
            _ => {
                return Err(ForgeError::Video(format!(
                    "{}: video stream has no dimensions",
                    path.display()
                )));
            }
        };
        let frame_rate = stream
            .avg_frame_rate
            .as_deref()
            .and_then(parse_frame_rate)
            .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_frame_rate))
            .ok_or_else(|| {
                ForgeError::Video(format!("{}: unknown frame rate", path.display()))
            })?;
        debug!(width, height, frame_rate, "probed video");

        let mut child = Command::new(ffmpeg)
            .args(decode_args(path))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|err| ForgeError::Video(format!("spawn ffmpeg: {err}")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ForgeError::Video("ffmpeg stdout unavailable".to_string()))?;

        Ok(Box::new(FfmpegPipeReader {
            child,
            stdout: BufReader::new(stdout),
            width,
            height,
            frame_rate,
            buffer: vec![0; width as usize * height as usize * 3],
            grabbed: false,
        }))
    }
}

pub struct FfmpegPipeReader {
    child: Child,
    stdout: BufReader<ChildStdout>,
    width: u32,
    height: u32,
    frame_rate: f64,
    buffer: Vec<u8>,
    grabbed: bool,
}

impl VideoReader for FfmpegPipeReader {
    fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    fn grab(&mut self) -> ForgeResult<bool> {
        match self.stdout.read_exact(&mut self.buffer) {
            Ok(()) => {
                self.grabbed = true;
                Ok(true)
            }
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => {
                self.grabbed = false;
                Ok(false)
            }
            Err(err) => Err(ForgeError::Video(format!("read frame: {err}"))),
        }
    }

    fn retrieve(&mut self) -> ForgeResult<RgbImage> {
        if !self.grabbed {
            return Err(ForgeError::Video("no frame grabbed".to_string()));
        }
        RgbImage::from_raw(self.width, self.height, self.buffer.clone())
            .ok_or_else(|| ForgeError::Video("frame buffer size mismatch".to_string()))
    }
}

impl Drop for FfmpegPipeReader {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
