//! Source enumeration for the four input modes.

use std::path::{Path, PathBuf};

use clap::ValueEnum;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use crate::{
    ForgeError, ForgeResult,
    video::{ExtractedVideo, VideoBracket},
};

/// Input mode selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SourceMode {
    Single,
    Batch,
    Directory,
    Video,
}

impl SourceMode {
    /// Modes that read from and write to directories on disk.
    pub fn is_file_batch(self) -> bool {
        matches!(self, Self::Directory | Self::Video)
    }
}

/// One element of a batch list.
#[derive(Debug, Clone)]
pub enum BatchEntry {
    Decoded(DynamicImage),
    Path(PathBuf),
}

/// Mode-specific source parameters of a batch request.
#[derive(Debug, Clone)]
pub enum SourceRequest {
    Single(Option<DynamicImage>),
    Batch(Vec<BatchEntry>),
    Directory {
        input: Option<PathBuf>,
        output: PathBuf,
        show_results: bool,
    },
    Video {
        path: Option<PathBuf>,
        fps: Option<f64>,
        output: PathBuf,
        show_results: bool,
    },
}

impl SourceRequest {
    pub fn mode(&self) -> SourceMode {
        match self {
            Self::Single(_) => SourceMode::Single,
            Self::Batch(_) => SourceMode::Batch,
            Self::Directory { .. } => SourceMode::Directory,
            Self::Video { .. } => SourceMode::Video,
        }
    }

    /// Output directory for directory and video modes.
    pub fn output_dir(&self) -> Option<&Path> {
        match self {
            Self::Directory { output, .. } | Self::Video { output, .. } => Some(output),
            Self::Single(_) | Self::Batch(_) => None,
        }
    }

    /// Whether generated images are returned to the caller.
    pub fn show_results(&self) -> bool {
        match self {
            Self::Directory { show_results, .. } | Self::Video { show_results, .. } => {
                *show_results
            }
            Self::Single(_) | Self::Batch(_) => true,
        }
    }
}

/// Re-iterable, lazily decoded image sequence with a declared item count.
///
/// For [`ImageSequence::Files`] the declared count is the number of listed
/// files, while iteration silently skips files that fail to decode. Callers
/// compare the two to detect the mismatch.
#[derive(Debug, Clone)]
pub enum ImageSequence {
    Single(DynamicImage),
    Batch(Vec<BatchEntry>),
    Files {
        directory: PathBuf,
        files: Vec<PathBuf>,
    },
}

impl ImageSequence {
    /// Lists the files of `directory` in file-name order, following symlinks.
    pub fn from_directory(directory: &Path) -> ForgeResult<Self> {
        let entries = std::fs::read_dir(directory)
            .map_err(|err| ForgeError::Configuration(format!("{}: {err}", directory.display())))?;
        let mut files = Vec::new();
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if path.is_file() {
                files.push(path);
            }
        }
        files.sort();
        Ok(Self::Files {
            directory: directory.to_path_buf(),
            files,
        })
    }

    pub fn declared_count(&self) -> usize {
        match self {
            Self::Single(_) => 1,
            Self::Batch(entries) => entries.len(),
            Self::Files { files, .. } => files.len(),
        }
    }

    /// Starts a fresh pass over the sequence, decoding images on demand.
    pub fn iter(&self) -> Box<dyn Iterator<Item = ForgeResult<DynamicImage>> + Send + '_> {
        match self {
            Self::Single(image) => Box::new(std::iter::once(Ok(image.clone()))),
            Self::Batch(entries) => Box::new(entries.iter().map(|entry| match entry {
                BatchEntry::Decoded(image) => Ok(image.clone()),
                BatchEntry::Path(path) => decode_rgba(path),
            })),
            Self::Files { files, .. } => Box::new(files.iter().filter_map(|path| {
                match decode_rgba(path) {
                    Ok(image) => Some(Ok(image)),
                    Err(error) => {
                        warn!(path = %path.display(), error = %error, "skipping undecodable file");
                        None
                    }
                }
            })),
        }
    }
}

fn decode_rgba(path: &Path) -> ForgeResult<DynamicImage> {
    let image = image::open(path)
        .map_err(|err| ForgeError::Decode(format!("{}: {err}", path.display())))?;
    Ok(DynamicImage::ImageRgba8(image.to_rgba8()))
}

/// Result of enumerating a source.
#[derive(Debug)]
pub struct Enumerated {
    pub sequence: ImageSequence,
    /// Extraction details, present in video mode.
    pub video: Option<ExtractedVideo>,
}

/// Turns a source request into an image sequence.
///
/// Video mode extracts frames first, so its count reflects the extracted
/// frame files rather than any estimate taken from the container.
#[instrument(skip_all, fields(mode = ?request.mode()))]
pub async fn enumerate(
    request: SourceRequest,
    hide_dir_config: bool,
    video: &VideoBracket,
) -> ForgeResult<Enumerated> {
    match request {
        SourceRequest::Single(image) => {
            let image = image.ok_or_else(|| {
                ForgeError::Configuration("input image not selected".to_string())
            })?;
            Ok(Enumerated {
                sequence: ImageSequence::Single(image),
                video: None,
            })
        }
        SourceRequest::Batch(entries) => Ok(Enumerated {
            sequence: ImageSequence::Batch(entries),
            video: None,
        }),
        SourceRequest::Directory { input, .. } => {
            if hide_dir_config {
                return Err(ForgeError::Configuration(
                    "directory input is disabled by the hide_dir_config option".to_string(),
                ));
            }
            let input = input
                .filter(|dir| !dir.as_os_str().is_empty())
                .ok_or_else(|| {
                    ForgeError::Configuration("input directory not selected".to_string())
                })?;
            Ok(Enumerated {
                sequence: ImageSequence::from_directory(&input)?,
                video: None,
            })
        }
        SourceRequest::Video { path, fps, .. } => {
            let path = path
                .filter(|path| !path.as_os_str().is_empty())
                .ok_or_else(|| ForgeError::Configuration("video not selected".to_string()))?;
            let fps = fps
                .filter(|fps| *fps > 0.0)
                .ok_or_else(|| ForgeError::Configuration("fps not specified".to_string()))?;
            let extracted = video.extract(&path, fps).await?;
            let sequence = ImageSequence::from_directory(&extracted.frames_dir)?;
            Ok(Enumerated {
                sequence,
                video: Some(extracted),
            })
        }
    }
}
