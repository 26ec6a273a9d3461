//! Persistence of generated images.

use std::{
    io::Cursor,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat};
use tokio::fs;
use tracing::debug;

use crate::{ForgeError, ForgeResult};

/// Where and how one image is saved.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveRequest {
    pub directory: PathBuf,
    pub seed: u64,
    pub prompt: String,
    /// File extension of the encoded image, e.g. `png`.
    pub format: String,
    pub info: String,
    pub suffix: String,
    /// Place the file into a dated sub-directory of `directory`.
    pub use_subdirs: bool,
}

/// Trait implemented by image persistence backends.
#[async_trait]
pub trait ImageSink: Send + Sync {
    /// Persists `image`, returning the written path.
    async fn save(&self, image: &DynamicImage, request: &SaveRequest) -> ForgeResult<PathBuf>;
}

/// Writes numbered files (`00042-<seed><suffix>.<ext>`) to the local filesystem.
#[derive(Debug, Default, Clone)]
pub struct FsImageSink {
    save_txt: bool,
}

impl FsImageSink {
    pub fn new(save_txt: bool) -> Self {
        Self { save_txt }
    }
}

#[async_trait]
impl ImageSink for FsImageSink {
    async fn save(&self, image: &DynamicImage, request: &SaveRequest) -> ForgeResult<PathBuf> {
        let directory = if request.use_subdirs {
            request
                .directory
                .join(chrono::Local::now().format("%Y-%m-%d").to_string())
        } else {
            request.directory.clone()
        };
        fs::create_dir_all(&directory)
            .await
            .map_err(|err| persistence_error(&directory, err))?;

        let format = ImageFormat::from_extension(&request.format).ok_or_else(|| {
            ForgeError::Persistence(format!("unsupported sample format '{}'", request.format))
        })?;
        let index = next_sequence_number(&directory).await?;
        let stem = format!("{index:05}-{}{}", request.seed, request.suffix);
        let path = directory.join(format!("{stem}.{}", request.format));

        let encoded = encode(image, format)?;
        fs::write(&path, encoded)
            .await
            .map_err(|err| persistence_error(&path, err))?;
        if self.save_txt && !request.info.is_empty() {
            let txt = directory.join(format!("{stem}.txt"));
            fs::write(&txt, request.info.as_bytes())
                .await
                .map_err(|err| persistence_error(&txt, err))?;
        }
        debug!(path = %path.display(), "saved image");
        Ok(path)
    }
}

fn encode(image: &DynamicImage, format: ImageFormat) -> ForgeResult<Vec<u8>> {
    // JPEG has no alpha channel.
    let image = if format == ImageFormat::Jpeg && image.color().has_alpha() {
        DynamicImage::ImageRgb8(image.to_rgb8())
    } else {
        image.clone()
    };
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), format)
        .map_err(|err| ForgeError::Persistence(format!("encode failed: {err}")))?;
    Ok(bytes)
}

/// Returns one past the highest numeric file prefix in `directory`.
async fn next_sequence_number(directory: &Path) -> ForgeResult<u32> {
    let mut entries = fs::read_dir(directory)
        .await
        .map_err(|err| persistence_error(directory, err))?;
    let mut next = 0;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|err| persistence_error(directory, err))?
    {
        let name = entry.file_name();
        let prefix: String = name
            .to_string_lossy()
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        if let Some(after) = prefix.parse::<u32>().ok().and_then(|n| n.checked_add(1)) {
            next = next.max(after);
        }
    }
    Ok(next)
}

fn persistence_error(path: &Path, err: std::io::Error) -> ForgeError {
    ForgeError::Persistence(format!("{}: {err}", path.display()))
}
