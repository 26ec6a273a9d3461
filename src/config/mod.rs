//! Configuration loading and validation utilities.

use std::path::PathBuf;

use clap::{Args, Parser};
use image::ImageFormat;
use serde::Deserialize;
use tokio::fs;
use tracing::instrument;

use crate::{
    ForgeError, ForgeResult,
    args::{ExtraInclude, InpaintingFill},
    pipeline::{
        BatchRequest, Prompts,
        hires::HiresFixRequest,
        source::{BatchEntry, SourceMode, SourceRequest},
    },
};

/// Command-line arguments used to bootstrap a run.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Maskforge prompt-driven inpainting pipeline")]
pub struct CliArgs {
    /// Location of the settings document.
    #[arg(long, value_name = "PATH", env = "MASKFORGE_CONFIG", default_value = "maskforge.toml")]
    pub config: PathBuf,
    /// Which input source feeds the batch.
    #[arg(long, value_enum, env = "MASKFORGE_MODE", default_value = "single")]
    pub mode: SourceMode,
    /// Image used in single mode.
    #[arg(long, value_name = "PATH")]
    pub image: Option<PathBuf>,
    /// Images used in batch mode.
    #[arg(long = "batch", value_name = "PATH", num_args = 1..)]
    pub batch: Vec<PathBuf>,
    /// Directory read in directory mode.
    #[arg(long, value_name = "DIR", env = "MASKFORGE_INPUT_DIR")]
    pub input_dir: Option<PathBuf>,
    /// Directory receiving results in directory and video modes.
    #[arg(long, value_name = "DIR", env = "MASKFORGE_OUTPUT_DIR", default_value = "outputs")]
    pub output_dir: PathBuf,
    /// Keep directory and video results in the returned image list.
    #[arg(long)]
    pub show_batch_results: bool,
    /// Video file read in video mode.
    #[arg(long, value_name = "PATH", env = "MASKFORGE_VIDEO")]
    pub video: Option<PathBuf>,
    /// Frame rate frames are extracted at in video mode.
    #[arg(long, value_name = "FPS")]
    pub video_fps: Option<f64>,
    #[arg(long, default_value = "")]
    pub detection_prompt: String,
    #[arg(long, default_value = "")]
    pub avoidance_prompt: String,
    #[arg(long, default_value = "")]
    pub positive_prompt: String,
    #[arg(long, default_value = "")]
    pub negative_prompt: String,
    #[arg(long, value_name = "NAME")]
    pub upscaler: Option<String>,
    /// Generation seed, -1 picks a random one.
    #[arg(
        long,
        env = "MASKFORGE_SEED",
        default_value_t = -1,
        allow_negative_numbers = true
    )]
    pub seed: i64,
    #[arg(long, default_value = "DPM++ 2M SDE")]
    pub sampler: String,
    #[arg(long, default_value_t = 20)]
    pub steps: u32,
    #[arg(long, default_value_t = 0.3)]
    pub box_threshold: f32,
    #[arg(long, default_value_t = 35, allow_negative_numbers = true)]
    pub mask_expand: i32,
    #[arg(long, default_value_t = 4)]
    pub mask_blur: u32,
    #[arg(long, default_value_t = 1280)]
    pub max_resolution_on_detection: u32,
    #[arg(long, default_value = "sam_hq_vit_l.pth")]
    pub sam_model: String,
    #[arg(long, default_value = "GroundingDINO_SwinT_OGC (694MB)")]
    pub detection_model: String,
    #[arg(long, default_value_t = 5.5)]
    pub cfg_scale: f32,
    #[arg(long, default_value_t = 1.0)]
    pub denoise: f32,
    #[arg(long, default_value_t = 40)]
    pub inpaint_padding: u32,
    #[arg(long, value_enum, default_value = "fill")]
    pub inpainting_fill: InpaintingFill,
    #[arg(long, default_value_t = 512)]
    pub width: u32,
    #[arg(long, default_value_t = 512)]
    pub height: u32,
    #[arg(long, default_value_t = 1)]
    pub batch_count: u32,
    #[arg(long, default_value_t = 1)]
    pub batch_size: u32,
    #[arg(long)]
    pub inpainting_mask_invert: bool,
    #[arg(long)]
    pub save_grid: bool,
    /// Detection images appended to each item's results.
    #[arg(long = "include", value_enum)]
    pub extra_includes: Vec<ExtraInclude>,
    #[command(flatten)]
    pub hires: HiresFixArgs,
}

/// Hires-fix pass options.
#[derive(Args, Debug, Clone)]
pub struct HiresFixArgs {
    /// Run the hires fix over the batch result.
    #[arg(long)]
    pub hires_fix: bool,
    #[arg(long, value_name = "NAME", default_value = "ESRGAN_4x")]
    pub hf_upscaler: String,
    /// Fix-pass steps, 0 keeps the batch value.
    #[arg(long, default_value_t = 4)]
    pub hf_steps: u32,
    /// Fix-pass sampler, omitted keeps the batch sampler.
    #[arg(long)]
    pub hf_sampler: Option<String>,
    #[arg(long, default_value_t = 0.35)]
    pub hf_denoise: f32,
    #[arg(long, default_value_t = 1.0)]
    pub hf_cfg_scale: f32,
    #[arg(long, default_value = "")]
    pub hf_prompt_suffix: String,
    #[arg(long)]
    pub hf_size_limit: Option<u32>,
    #[arg(long)]
    pub hf_above_limit_upscaler: Option<String>,
    #[arg(long)]
    pub hf_unload_detection_models: bool,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputSettings {
    pub save_dir: PathBuf,
    pub samples_format: String,
    /// Write the generation info next to every saved image.
    pub save_txt: bool,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            save_dir: PathBuf::from("outputs/maskforge"),
            samples_format: "png".to_string(),
            save_txt: false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BehaviorSettings {
    pub do_not_show_images: bool,
    /// Release cached detection models on interruption and item failure.
    pub auto_unload_models: bool,
    /// Directory browsing is administratively disabled.
    pub hide_dir_config: bool,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PromptSettings {
    pub detection_examples: Vec<String>,
    pub positive_examples: Vec<String>,
    pub negative_examples: Vec<String>,
    pub hires_suffix_examples: Vec<String>,
    pub use_first_positive_example: bool,
    pub use_first_negative_example: bool,
}

impl Default for PromptSettings {
    fn default() -> Self {
        Self {
            detection_examples: vec!["background".to_string()],
            positive_examples: vec!["waterfall".to_string()],
            negative_examples: vec!["blurry, low quality".to_string()],
            hires_suffix_examples: vec!["high quality, detailed".to_string()],
            use_first_positive_example: true,
            use_first_negative_example: true,
        }
    }
}

impl PromptSettings {
    /// Fills empty prompts from the example lists and trims detection prompts.
    pub fn resolve(&self, prompts: Prompts) -> Prompts {
        let mut detection = prompts.detection;
        if detection.is_empty() {
            detection = first_or_empty(&self.detection_examples);
        }
        let mut positive = prompts.positive;
        if positive.is_empty() && self.use_first_positive_example {
            positive = first_or_empty(&self.positive_examples);
        }
        let mut negative = prompts.negative;
        if negative.is_empty() && self.use_first_negative_example {
            negative = first_or_empty(&self.negative_examples);
        }
        Prompts {
            detection: detection.trim().to_string(),
            avoidance: prompts.avoidance.trim().to_string(),
            positive,
            negative,
        }
    }

    pub fn hires_suffix(&self, suffix: &str) -> String {
        if suffix.is_empty() {
            first_or_empty(&self.hires_suffix_examples)
        } else {
            suffix.to_string()
        }
    }
}

fn first_or_empty(examples: &[String]) -> String {
    examples.first().cloned().unwrap_or_default()
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HiresFixSettings {
    pub size_limit: u32,
    pub above_limit_upscaler: String,
}

impl Default for HiresFixSettings {
    fn default() -> Self {
        Self {
            size_limit: 1800,
            above_limit_upscaler: "Lanczos".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VideoSettings {
    /// Name of the frame directory created next to the input video.
    pub temp_dir_name: String,
    pub video_codec: String,
    pub audio_codec: String,
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            temp_dir_name: "temp".to_string(),
            video_codec: "libx264".to_string(),
            audio_codec: "aac".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CleanerSettings {
    pub upscaler: Option<String>,
}

/// Process-wide options read from the settings document.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub output: OutputSettings,
    pub behavior: BehaviorSettings,
    pub prompts: PromptSettings,
    pub hires_fix: HiresFixSettings,
    pub video: VideoSettings,
    pub cleaner: CleanerSettings,
}

impl Settings {
    pub fn from_toml_str(raw: &str) -> ForgeResult<Self> {
        let settings: Settings = toml::from_str(raw).map_err(|err| {
            ForgeError::Configuration(format!("invalid settings document: {err}"))
        })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> ForgeResult<()> {
        if ImageFormat::from_extension(&self.output.samples_format).is_none() {
            return Err(ForgeError::Configuration(format!(
                "unknown samples format '{}'",
                self.output.samples_format
            )));
        }
        if self.prompts.detection_examples.is_empty() {
            return Err(ForgeError::Configuration(
                "at least one detection prompt example is required".to_string(),
            ));
        }
        if self.hires_fix.size_limit == 0 {
            return Err(ForgeError::Configuration(
                "hires fix size limit must be positive".to_string(),
            ));
        }
        if self.video.temp_dir_name.is_empty() {
            return Err(ForgeError::Configuration(
                "video temp directory name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Fully merged configuration set.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub cli: CliArgs,
    pub settings: Settings,
}

impl AppConfig {
    #[instrument(skip_all, fields(path = %cli.config.display()))]
    pub async fn load(cli: CliArgs) -> ForgeResult<Self> {
        let raw = fs::read_to_string(&cli.config)
            .await
            .map_err(|err| ForgeError::Configuration(format!("failed to read settings: {err}")))?;
        let settings = Settings::from_toml_str(&raw)?;

        if cli.batch_count == 0 || cli.batch_size == 0 {
            return Err(ForgeError::Configuration(
                "batch count and batch size must be positive".to_string(),
            ));
        }
        if cli.hires.hf_size_limit == Some(0) {
            return Err(ForgeError::Configuration(
                "hires fix size limit must be positive".to_string(),
            ));
        }

        Ok(Self { cli, settings })
    }

    /// Translates the CLI source selection and parameters into a batch request.
    pub fn batch_request(&self) -> ForgeResult<BatchRequest> {
        let cli = &self.cli;
        let source = match cli.mode {
            SourceMode::Single => {
                let image = match &cli.image {
                    Some(path) => Some(image::open(path).map_err(|err| {
                        ForgeError::Decode(format!("{}: {err}", path.display()))
                    })?),
                    None => None,
                };
                SourceRequest::Single(image)
            }
            SourceMode::Batch => {
                SourceRequest::Batch(cli.batch.iter().cloned().map(BatchEntry::Path).collect())
            }
            SourceMode::Directory => SourceRequest::Directory {
                input: cli.input_dir.clone(),
                output: cli.output_dir.clone(),
                show_results: cli.show_batch_results,
            },
            SourceMode::Video => SourceRequest::Video {
                path: cli.video.clone(),
                fps: cli.video_fps,
                output: cli.output_dir.clone(),
                show_results: cli.show_batch_results,
            },
        };

        Ok(BatchRequest {
            source,
            prompts: Prompts {
                detection: cli.detection_prompt.clone(),
                avoidance: cli.avoidance_prompt.clone(),
                positive: cli.positive_prompt.clone(),
                negative: cli.negative_prompt.clone(),
            },
            upscaler_for_img2img: cli.upscaler.clone(),
            seed: cli.seed,
            sampler: cli.sampler.clone(),
            steps: cli.steps,
            box_threshold: cli.box_threshold,
            mask_expand: cli.mask_expand,
            mask_blur: cli.mask_blur,
            max_resolution_on_detection: cli.max_resolution_on_detection,
            sam_model: cli.sam_model.clone(),
            detection_model: cli.detection_model.clone(),
            cfg_scale: cli.cfg_scale,
            denoising_strength: cli.denoise,
            inpaint_padding: cli.inpaint_padding,
            inpainting_fill: cli.inpainting_fill,
            width: cli.width,
            height: cli.height,
            batch_count: cli.batch_count,
            batch_size: cli.batch_size,
            inpainting_mask_invert: cli.inpainting_mask_invert,
            save_grid: cli.save_grid,
            extra_includes: cli.extra_includes.clone(),
        })
    }

    /// Hires-fix request when `--hires-fix` was given.
    pub fn hires_fix_request(&self) -> Option<HiresFixRequest> {
        let hires = &self.cli.hires;
        if !hires.hires_fix {
            return None;
        }
        let defaults = &self.settings.hires_fix;
        Some(HiresFixRequest {
            upscaler: Some(hires.hf_upscaler.clone()),
            steps: hires.hf_steps,
            sampler: hires.hf_sampler.clone(),
            denoise: hires.hf_denoise,
            cfg_scale: hires.hf_cfg_scale,
            prompt_suffix: hires.hf_prompt_suffix.clone(),
            size_limit: hires.hf_size_limit.unwrap_or(defaults.size_limit),
            above_limit_upscaler: Some(
                hires
                    .hf_above_limit_upscaler
                    .clone()
                    .unwrap_or_else(|| defaults.above_limit_upscaler.clone()),
            ),
            unload_detection_models: hires.hf_unload_detection_models,
        })
    }
}
