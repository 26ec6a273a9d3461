//! Optional masked-content cleaner run before inpainting.

use async_trait::async_trait;
use image::{DynamicImage, GrayImage};

use crate::ForgeResult;

/// Removes the masked object so the engine can start from clean pixels.
///
/// Failures are never fatal to the caller: the inpaint wrapper logs them and
/// continues with the original image.
#[async_trait]
pub trait MaskedContentCleaner: Send + Sync {
    async fn clean(
        &self,
        image: &DynamicImage,
        mask: &GrayImage,
        invert: bool,
        upscaler: Option<&str>,
    ) -> ForgeResult<DynamicImage>;
}
