//! Batch orchestrator driving every enumerated item through mask selection and inpainting.

use std::sync::Arc;

use rand::Rng;
use tracing::{info, instrument, warn};

use crate::{
    ForgeResult, GenerationOutput,
    args::GenerationArgs,
    job::{Session, guard::ReleaseReason},
};

use super::{
    BatchReport, BatchRequest, ItemFailure, JOB_NAME, Pipeline, SaveTarget, source,
};

/// Upper bound (exclusive) for randomly drawn seeds.
const RANDOM_SEED_BOUND: u64 = 4_294_967_294;

/// Resolves `-1` (or any negative seed) to a random one.
pub fn resolve_seed(seed: i64) -> u64 {
    if seed < 0 {
        rand::rng().random_range(0..RANDOM_SEED_BOUND)
    } else {
        seed as u64
    }
}

impl Pipeline {
    /// Runs one batch and records its parameters in `session` for the hires fix.
    ///
    /// A failing item aborts the call only when the batch holds exactly one
    /// item; otherwise it is logged, counted in the report and skipped.
    #[instrument(skip_all, fields(mode = ?request.source.mode()))]
    pub async fn generate(
        &self,
        session: &mut Session,
        request: BatchRequest,
    ) -> ForgeResult<GenerationOutput> {
        self.job.begin(JOB_NAME);
        let result = self.run_batch(session, request).await;
        self.job.end();
        result
    }

    async fn run_batch(
        &self,
        session: &mut Session,
        request: BatchRequest,
    ) -> ForgeResult<GenerationOutput> {
        let BatchRequest {
            source: source_request,
            prompts,
            upscaler_for_img2img,
            seed,
            sampler,
            steps,
            box_threshold,
            mask_expand,
            mask_blur,
            max_resolution_on_detection,
            sam_model,
            detection_model,
            cfg_scale,
            denoising_strength,
            inpaint_padding,
            inpainting_fill,
            width,
            height,
            batch_count,
            batch_size,
            inpainting_mask_invert,
            save_grid,
            extra_includes,
        } = request;
        let prompts = self.settings.prompts.resolve(prompts);
        let seed = resolve_seed(seed);
        let mode = source_request.mode();
        let show_results = source_request.show_results();
        let output_dir = source_request.output_dir().map(|dir| dir.to_path_buf());

        let enumerated = source::enumerate(
            source_request,
            self.settings.behavior.hide_dir_config,
            &self.video,
        )
        .await?;
        let declared = enumerated.sequence.declared_count();
        self.job.set_job_count(declared * batch_count.max(1) as usize);

        let save = match output_dir {
            Some(dir) if mode.is_file_batch() => {
                let directory = if enumerated.video.is_some() {
                    let mut name = dir.into_os_string();
                    name.push(format!("_{seed}"));
                    name.into()
                } else {
                    dir
                };
                SaveTarget {
                    directory,
                    suffix: String::new(),
                    use_subdirs: false,
                }
            }
            _ => SaveTarget {
                directory: self.settings.output.save_dir.clone(),
                suffix: String::new(),
                use_subdirs: true,
            },
        };

        let mut args = GenerationArgs {
            positive_prompt: prompts.positive,
            negative_prompt: prompts.negative,
            detection_prompt: prompts.detection,
            avoidance_prompt: prompts.avoidance,
            mask: None,
            upscaler_for_img2img: upscaler_for_img2img.filter(|name| !name.is_empty()),
            seed,
            sam_model,
            detection_model,
            box_threshold,
            mask_expand,
            max_resolution_on_detection,
            steps,
            sampler_name: sampler,
            mask_blur,
            inpainting_fill,
            n_iter: batch_count,
            batch_size,
            cfg_scale,
            denoising_strength,
            width,
            height,
            inpaint_full_res_padding: inpaint_padding,
            img2img_fix_steps: false,
            inpainting_mask_invert,
            images: Arc::new(enumerated.sequence),
            item_count: declared,
            save_grid,
        };

        let mut output = GenerationOutput::default();
        let mut report = BatchReport {
            seed,
            declared,
            ..BatchReport::default()
        };

        let sequence = Arc::clone(&args.images);
        for (offset, item) in sequence.iter().enumerate() {
            let position = offset + 1;
            if self.job.is_interrupted() {
                self.guard.release_if_enabled(ReleaseReason::Interrupted);
                report.interrupted = true;
                info!(position, "batch interrupted");
                break;
            }
            report.enumerated += 1;

            let mut progress = "Generate mask".to_string();
            if declared > 1 {
                info!("processing {position}/{declared}");
                progress.push_str(&format!(" {position}/{declared}"));
            }
            self.job.set_textinfo(progress);
            self.job.set_skipped(false);

            let outcome = match item {
                Ok(image) => {
                    self.generate_single(image, &args, Some(&save), &extra_includes)
                        .await
                }
                Err(error) => Err(error),
            };

            match outcome {
                Ok(item) => {
                    report.processed += 1;
                    report.mask_indices.push(item.mask_index);
                    args = args.derive().mask(item.mask).build();
                    let processed = item.processed;
                    output.metadata = processed.metadata;
                    output.info = processed.info;
                    output.comments = processed.comments;
                    if show_results {
                        output.images.extend(processed.images);
                    }
                }
                Err(error) => {
                    warn!(position, error = %error, "item failed");
                    self.guard.release_if_enabled(ReleaseReason::ItemFailed);
                    if declared == 1 {
                        return Err(error);
                    }
                    if !output.comments.is_empty() {
                        output.comments.push('\n');
                    }
                    output
                        .comments
                        .push_str(&format!("item {position}/{declared} failed: {error}"));
                    report.failed += 1;
                    report.failures.push(ItemFailure { position, error });
                }
            }
            self.job.next_job();
        }

        if report.skipped() > 0 {
            warn!(
                declared = report.declared,
                enumerated = report.enumerated,
                "source yielded fewer images than it listed"
            );
        }

        if let Some(extracted) = &enumerated.video {
            let mux = self
                .video
                .reassemble(extracted, &save.directory, seed)
                .await;
            match &mux {
                Ok(status) if !status.success => {
                    warn!(code = ?status.exit_code, "video reassembly exited unsuccessfully")
                }
                Err(error) => warn!(error = %error, "video reassembly failed"),
                Ok(_) => {}
            }
            report.mux = Some(mux);
        }

        session.record(args);
        output.report = Some(report);
        Ok(output)
    }
}
