//! Generation for a single enumerated image.

use std::sync::Arc;

use image::{DynamicImage, GrayImage};
use tracing::instrument;

use crate::{
    ForgeResult,
    args::{ExtraInclude, GenerationArgs},
    backends::{engine::Processed, oracle::DetectionRequest},
};

use super::{Pipeline, SaveTarget};

/// Output of one item plus the mask that was selected for it.
#[derive(Debug, Clone)]
pub struct ItemOutput {
    pub processed: Processed,
    pub mask: Arc<GrayImage>,
    pub mask_index: usize,
}

impl Pipeline {
    /// Detects, selects a mask and inpaints one image.
    ///
    /// Requested extras are appended after the engine outputs in the fixed
    /// order mask, box, cutout, preview.
    #[instrument(skip_all, fields(seed = args.seed))]
    pub async fn generate_single(
        &self,
        image: DynamicImage,
        args: &GenerationArgs,
        save: Option<&SaveTarget>,
        extra_includes: &[ExtraInclude],
    ) -> ForgeResult<ItemOutput> {
        let request = DetectionRequest {
            image: &image,
            detection_prompt: &args.detection_prompt,
            avoidance_prompt: &args.avoidance_prompt,
            sam_model: &args.sam_model,
            detection_model: &args.detection_model,
            box_threshold: args.box_threshold,
            mask_expand: args.mask_expand,
            max_resolution: args.max_resolution_on_detection,
        };
        let selected = self.selector.select(request, args.seed).await?;
        let item_args = args.derive().mask(Arc::clone(&selected.mask)).build();

        self.job.assign_current_image(selected.preview.clone());
        self.job.set_textinfo("inpaint");

        let mut processed = self.inpainter.inpaint(image, &item_args, save).await?;

        for extra in ExtraInclude::ORDER {
            if !extra_includes.contains(&extra) {
                continue;
            }
            let appended = match extra {
                ExtraInclude::Mask => DynamicImage::ImageLuma8((*selected.mask).clone()),
                ExtraInclude::Box => selected.boxed.clone(),
                ExtraInclude::Cutout => selected.cutout.clone(),
                ExtraInclude::Preview => selected.preview.clone(),
            };
            processed.images.push(appended);
        }

        Ok(ItemOutput {
            processed,
            mask: selected.mask,
            mask_index: selected.index,
        })
    }
}
