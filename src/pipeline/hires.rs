//! Hires fix: an upscaling inpaint followed by a low-denoise refinement pass.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::{
    ForgeError, ForgeResult, GenerationOutput,
    args::{GenerationArgs, InpaintingFill},
    job::{Session, guard::ReleaseReason},
};

use super::{HIRES_JOB_NAME, Pipeline, SaveTarget};

/// Suffix appended to the file names of refined images.
pub const HIRES_SUFFIX: &str = "-hires-fix";

/// Options of one hires-fix invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct HiresFixRequest {
    /// Upscaler used by the first pass.
    pub upscaler: Option<String>,
    /// Refinement steps, 0 keeps the batch value.
    pub steps: u32,
    /// Refinement sampler, `None` keeps the batch sampler.
    pub sampler: Option<String>,
    pub denoise: f32,
    pub cfg_scale: f32,
    /// Appended to the positive prompt; empty picks the first configured example.
    pub prompt_suffix: String,
    pub size_limit: u32,
    /// Upscaler used when the geometry had to be clamped.
    pub above_limit_upscaler: Option<String>,
    pub unload_detection_models: bool,
}

impl Default for HiresFixRequest {
    fn default() -> Self {
        Self {
            upscaler: Some("ESRGAN_4x".to_string()),
            steps: 4,
            sampler: None,
            denoise: 0.35,
            cfg_scale: 1.0,
            prompt_suffix: String::new(),
            size_limit: 1800,
            above_limit_upscaler: Some("Lanczos".to_string()),
            unload_detection_models: false,
        }
    }
}

/// Refinement geometry after applying the size limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClampedGeometry {
    pub width: u32,
    pub height: u32,
    /// Either side exceeded the limit.
    pub above_limit: bool,
}

/// Clamps each side of `width`x`height` to `limit` independently.
pub fn clamp_geometry(width: u32, height: u32, limit: u32) -> ClampedGeometry {
    ClampedGeometry {
        width: width.min(limit),
        height: height.min(limit),
        above_limit: width > limit || height > limit,
    }
}

fn check_shape(args: &GenerationArgs) -> ForgeResult<()> {
    if args.item_count > 1 || args.batch_size > 1 || args.n_iter > 1 {
        return Err(ForgeError::UnsupportedBatchShape(format!(
            "items={}, batch_size={}, batch_count={}",
            args.item_count, args.batch_size, args.n_iter
        )));
    }
    Ok(())
}

impl Pipeline {
    /// Re-runs the last batch through an upscaling pass and a refinement pass.
    ///
    /// Precondition failures (no prior batch, multi-item or multi-output
    /// batches) do not raise: they come back as an empty output whose info
    /// pane carries the reason.
    #[instrument(skip_all, fields(limit = request.size_limit))]
    pub async fn apply_hires_fix(
        &self,
        session: &Session,
        request: HiresFixRequest,
    ) -> ForgeResult<GenerationOutput> {
        self.job.begin(HIRES_JOB_NAME);
        self.job.set_job_count(2);
        let result = self.run_hires_fix(session, request).await;
        self.job.end();

        match result {
            Err(error) if error.is_precondition() => {
                warn!(error = %error, "hires fix rejected");
                Ok(GenerationOutput::rejected(&error))
            }
            other => other,
        }
    }

    async fn run_hires_fix(
        &self,
        session: &Session,
        request: HiresFixRequest,
    ) -> ForgeResult<GenerationOutput> {
        let last = session.last_args().ok_or(ForgeError::NoPriorBatch)?;
        check_shape(last)?;

        let suffix = self.settings.prompts.hires_suffix(&request.prompt_suffix);
        let upscale_args = last.derive().upscaler(request.upscaler.clone()).build();

        let mut refine = last
            .derive()
            .cfg_scale(request.cfg_scale)
            .denoising_strength(request.denoise)
            .positive_prompt(format!("{} {}", last.positive_prompt, suffix))
            .inpainting_fill(InpaintingFill::Original)
            .fix_steps(true);
        if let Some(sampler) = &request.sampler {
            refine = refine.sampler(sampler.clone());
        }
        if request.steps != 0 {
            refine = refine.steps(request.steps);
        }
        let refine_base = refine.build();

        if request.unload_detection_models {
            self.guard.release(ReleaseReason::Requested);
        }

        let save = SaveTarget {
            directory: self.settings.output.save_dir.clone(),
            suffix: HIRES_SUFFIX.to_string(),
            use_subdirs: true,
        };

        let mut output = GenerationOutput::default();
        let sequence = Arc::clone(&last.images);
        for item in sequence.iter() {
            let image = item?;
            let geometry = clamp_geometry(image.width(), image.height(), request.size_limit);
            let mut builder = refine_base.derive().size(geometry.width, geometry.height);
            if geometry.above_limit {
                info!(
                    width = geometry.width,
                    height = geometry.height,
                    "hires geometry clamped, switching upscaler"
                );
                builder = builder.upscaler(request.above_limit_upscaler.clone());
            }
            let refine_args = builder.build();

            self.job.set_textinfo("inpaint with upscaler");
            let upscaled = self.inpainter.render(image, &upscale_args, None).await?;
            self.job.next_job();
            if upscaled.images.len() > 1 {
                info!(
                    count = upscaled.images.len(),
                    "hires fix refining several outputs for one image"
                );
            }

            for generated in upscaled.images {
                self.job.set_textinfo("hiresfix");
                let refined = self
                    .inpainter
                    .inpaint(generated, &refine_args, Some(&save))
                    .await?;
                output.images.extend(refined.images);
                output.metadata = refined.metadata;
                output.info = refined.info;
                output.comments = refined.comments;
            }
            self.job.next_job();
        }

        Ok(output)
    }
}
