//! Text-prompted segmentation oracle producing candidate masks.

use async_trait::async_trait;
use image::{DynamicImage, GrayImage, Luma};

use crate::ForgeResult;

/// One detection candidate. The four images always describe the same region.
#[derive(Debug, Clone)]
pub struct MaskCandidate {
    pub mask: GrayImage,
    pub preview: DynamicImage,
    /// Source pixels cut out by the mask.
    pub cutout: DynamicImage,
    /// Source image with the detection bounding box drawn.
    pub boxed: DynamicImage,
}

/// Inputs for a single detection call.
#[derive(Debug, Clone, Copy)]
pub struct DetectionRequest<'a> {
    pub image: &'a DynamicImage,
    pub detection_prompt: &'a str,
    pub avoidance_prompt: &'a str,
    pub sam_model: &'a str,
    pub detection_model: &'a str,
    pub box_threshold: f32,
    pub mask_expand: i32,
    pub max_resolution: u32,
}

/// Trait implemented by segmentation backends.
#[async_trait]
pub trait SegmentationOracle: Send + Sync {
    /// Returns every candidate for the prompt pair, possibly none.
    async fn detect(&self, request: DetectionRequest<'_>) -> ForgeResult<Vec<MaskCandidate>>;
}

/// Process-wide cache of loaded detection and segmentation models.
pub trait ModelCache: Send + Sync {
    /// Drops cached models. Must tolerate being called when already empty.
    fn unload(&self);
}

/// Cache used when the oracle keeps no model state.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopModelCache;

impl ModelCache for NoopModelCache {
    fn unload(&self) {}
}

/// Oracle returning a single candidate that covers the whole image.
#[derive(Debug, Default, Clone, Copy)]
pub struct FullFrameOracle;

#[async_trait]
impl SegmentationOracle for FullFrameOracle {
    async fn detect(&self, request: DetectionRequest<'_>) -> ForgeResult<Vec<MaskCandidate>> {
        let image = request.image;
        let mask = GrayImage::from_pixel(image.width(), image.height(), Luma([255]));
        Ok(vec![MaskCandidate {
            mask,
            preview: image.clone(),
            cutout: image.clone(),
            boxed: image.clone(),
        }])
    }
}
