//! Generation parameters shared by every item of a batch.

use std::sync::Arc;

use clap::ValueEnum;
use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::pipeline::source::ImageSequence;

/// How the masked area is seeded before denoising.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum InpaintingFill {
    Fill,
    Original,
    LatentNoise,
    LatentNothing,
    /// Run the external masked-content cleaner first, then inpaint as [`InpaintingFill::Original`].
    Cleaner,
}

impl InpaintingFill {
    /// Maps the numeric selector used by the UI (0..=4).
    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(Self::Fill),
            1 => Some(Self::Original),
            2 => Some(Self::LatentNoise),
            3 => Some(Self::LatentNothing),
            4 => Some(Self::Cleaner),
            _ => None,
        }
    }

    pub fn index(self) -> u8 {
        match self {
            Self::Fill => 0,
            Self::Original => 1,
            Self::LatentNoise => 2,
            Self::LatentNothing => 3,
            Self::Cleaner => 4,
        }
    }

    pub fn delegates_to_cleaner(self) -> bool {
        matches!(self, Self::Cleaner)
    }

    /// The policy the inpainting engine actually receives.
    pub fn for_engine(self) -> Self {
        match self {
            Self::Cleaner => Self::Original,
            other => other,
        }
    }
}

/// Auxiliary detection images that may be appended to an item's results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ExtraInclude {
    Mask,
    Box,
    Cutout,
    Preview,
}

impl ExtraInclude {
    /// Order in which extras are appended, independent of request order.
    pub const ORDER: [ExtraInclude; 4] = [Self::Mask, Self::Box, Self::Cutout, Self::Preview];
}

/// Parameters for one batch invocation.
///
/// Values are treated as immutable once built: the orchestrator keeps the last
/// instance behind an [`Arc`] and later stages derive modified copies through
/// [`GenerationArgs::derive`]. Copies share the image sequence and mask by reference.
#[derive(Debug, Clone)]
pub struct GenerationArgs {
    pub positive_prompt: String,
    pub negative_prompt: String,
    pub detection_prompt: String,
    pub avoidance_prompt: String,
    /// Mask selected for the most recent item.
    pub mask: Option<Arc<GrayImage>>,
    pub upscaler_for_img2img: Option<String>,
    pub seed: u64,
    pub sam_model: String,
    pub detection_model: String,
    pub box_threshold: f32,
    pub mask_expand: i32,
    pub max_resolution_on_detection: u32,
    pub steps: u32,
    pub sampler_name: String,
    pub mask_blur: u32,
    pub inpainting_fill: InpaintingFill,
    pub n_iter: u32,
    pub batch_size: u32,
    pub cfg_scale: f32,
    pub denoising_strength: f32,
    pub width: u32,
    pub height: u32,
    pub inpaint_full_res_padding: u32,
    pub img2img_fix_steps: bool,
    pub inpainting_mask_invert: bool,
    pub images: Arc<ImageSequence>,
    pub item_count: usize,
    pub save_grid: bool,
}

impl GenerationArgs {
    pub fn derive(&self) -> ArgsBuilder {
        ArgsBuilder {
            args: self.clone(),
        }
    }

    pub fn is_batch(&self) -> bool {
        self.n_iter > 1 || self.batch_size > 1
    }
}

/// Builder producing an independent copy of [`GenerationArgs`] with overrides applied.
#[derive(Debug, Clone)]
pub struct ArgsBuilder {
    args: GenerationArgs,
}

impl ArgsBuilder {
    pub fn positive_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.args.positive_prompt = prompt.into();
        self
    }

    pub fn mask(mut self, mask: Arc<GrayImage>) -> Self {
        self.args.mask = Some(mask);
        self
    }

    pub fn upscaler(mut self, upscaler: Option<String>) -> Self {
        self.args.upscaler_for_img2img = upscaler.filter(|name| !name.is_empty());
        self
    }

    pub fn sampler(mut self, sampler: impl Into<String>) -> Self {
        self.args.sampler_name = sampler.into();
        self
    }

    pub fn steps(mut self, steps: u32) -> Self {
        self.args.steps = steps;
        self
    }

    pub fn cfg_scale(mut self, cfg_scale: f32) -> Self {
        self.args.cfg_scale = cfg_scale;
        self
    }

    pub fn denoising_strength(mut self, strength: f32) -> Self {
        self.args.denoising_strength = strength;
        self
    }

    pub fn inpainting_fill(mut self, fill: InpaintingFill) -> Self {
        self.args.inpainting_fill = fill;
        self
    }

    pub fn fix_steps(mut self, enabled: bool) -> Self {
        self.args.img2img_fix_steps = enabled;
        self
    }

    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.args.width = width;
        self.args.height = height;
        self
    }

    pub fn build(self) -> GenerationArgs {
        self.args
    }
}
