//! Inpainting engine boundary.

use std::sync::Arc;

use async_trait::async_trait;
use image::{DynamicImage, GrayImage};
use serde::Serialize;

use crate::{
    ForgeResult,
    args::{GenerationArgs, InpaintingFill},
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptParams {
    pub positive: String,
    pub negative: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SamplingParams {
    pub sampler: String,
    pub steps: u32,
    pub cfg_scale: f32,
    pub denoising_strength: f32,
    pub seed: u64,
    pub batch_size: u32,
    pub n_iter: u32,
    /// Set when more than one output is requested.
    pub is_batch: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Geometry {
    pub width: u32,
    pub height: u32,
    pub padding: u32,
    pub mask_blur: u32,
    pub mask_invert: bool,
}

/// Host settings overridden for one engine call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EngineOverrides {
    pub upscaler_for_img2img: Option<String>,
    pub img2img_fix_steps: bool,
}

/// Everything the engine needs for one inpainting call.
#[derive(Debug, Clone)]
pub struct InpaintRequest {
    pub image: DynamicImage,
    pub mask: Option<Arc<GrayImage>>,
    pub prompt: PromptParams,
    pub sampling: SamplingParams,
    pub geometry: Geometry,
    pub fill: InpaintingFill,
    pub overrides: EngineOverrides,
    /// Extra key/value pairs recorded in the generation info.
    pub extra_params: Vec<(String, String)>,
    pub save_grid: bool,
}

impl InpaintRequest {
    /// Builds a request passing every numeric parameter of `args` through unchanged.
    pub fn from_args(image: DynamicImage, args: &GenerationArgs, fill: InpaintingFill) -> Self {
        Self {
            image,
            mask: args.mask.clone(),
            prompt: PromptParams {
                positive: args.positive_prompt.clone(),
                negative: args.negative_prompt.clone(),
            },
            sampling: SamplingParams {
                sampler: args.sampler_name.clone(),
                steps: args.steps,
                cfg_scale: args.cfg_scale,
                denoising_strength: args.denoising_strength,
                seed: args.seed,
                batch_size: args.batch_size,
                n_iter: args.n_iter,
                is_batch: args.is_batch(),
            },
            geometry: Geometry {
                width: args.width,
                height: args.height,
                padding: args.inpaint_full_res_padding,
                mask_blur: args.mask_blur,
                mask_invert: args.inpainting_mask_invert,
            },
            fill,
            overrides: EngineOverrides {
                upscaler_for_img2img: args.upscaler_for_img2img.clone(),
                img2img_fix_steps: args.img2img_fix_steps,
            },
            extra_params: vec![
                ("Mask blur".to_string(), args.mask_blur.to_string()),
                ("Detection prompt".to_string(), args.detection_prompt.clone()),
            ],
            save_grid: args.save_grid,
        }
    }
}

/// Output of one engine call.
#[derive(Debug, Clone, Default)]
pub struct Processed {
    pub images: Vec<DynamicImage>,
    pub metadata: String,
    pub info: String,
    pub comments: String,
}

/// Trait implemented by inpainting backends.
#[async_trait]
pub trait InpaintingEngine: Send + Sync {
    async fn run(&self, request: InpaintRequest) -> ForgeResult<Processed>;
}

/// Engine returning the input image once per requested output.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughEngine;

#[async_trait]
impl InpaintingEngine for PassthroughEngine {
    async fn run(&self, request: InpaintRequest) -> ForgeResult<Processed> {
        let outputs = (request.sampling.batch_size.max(1) * request.sampling.n_iter.max(1)) as usize;
        let metadata = serde_json::json!({
            "prompt": request.prompt.positive,
            "negative_prompt": request.prompt.negative,
            "seed": request.sampling.seed,
            "sampler_name": request.sampling.sampler,
            "steps": request.sampling.steps,
            "cfg_scale": request.sampling.cfg_scale,
            "denoising_strength": request.sampling.denoising_strength,
            "width": request.geometry.width,
            "height": request.geometry.height,
            "inpainting_fill": request.fill.index(),
            "is_batch": request.sampling.is_batch,
            "extra_generation_params": request
                .extra_params
                .iter()
                .cloned()
                .collect::<std::collections::BTreeMap<_, _>>(),
        });
        let info = format!(
            "{}\nNegative prompt: {}\nSteps: {}, Sampler: {}, CFG scale: {}, Seed: {}, Size: {}x{}, Denoising strength: {}",
            request.prompt.positive,
            request.prompt.negative,
            request.sampling.steps,
            request.sampling.sampler,
            request.sampling.cfg_scale,
            request.sampling.seed,
            request.geometry.width,
            request.geometry.height,
            request.sampling.denoising_strength,
        );
        Ok(Processed {
            images: vec![request.image; outputs],
            metadata: metadata.to_string(),
            info,
            comments: String::new(),
        })
    }
}

