//! Seed-driven choice among the oracle's candidate masks.

use std::sync::Arc;

use image::{DynamicImage, GrayImage};
use tracing::{debug, instrument};

use crate::{
    ForgeError, ForgeResult,
    backends::oracle::{DetectionRequest, SegmentationOracle},
};

/// The candidate picked for one image.
#[derive(Debug, Clone)]
pub struct SelectedMask {
    pub index: usize,
    pub candidate_count: usize,
    pub mask: Arc<GrayImage>,
    pub preview: DynamicImage,
    pub cutout: DynamicImage,
    pub boxed: DynamicImage,
}

/// Index of the candidate used for `seed`: `seed mod count`.
pub fn select_index(seed: u64, count: usize) -> ForgeResult<usize> {
    if count == 0 {
        return Err(ForgeError::Detection(
            "segmentation returned no mask candidates".to_string(),
        ));
    }
    Ok((seed % count as u64) as usize)
}

/// Queries the oracle once per image and deterministically picks a candidate.
#[derive(Clone)]
pub struct MaskSelector {
    oracle: Arc<dyn SegmentationOracle>,
}

impl MaskSelector {
    pub fn new(oracle: Arc<dyn SegmentationOracle>) -> Self {
        Self { oracle }
    }

    #[instrument(skip_all, fields(prompt = request.detection_prompt, seed = seed))]
    pub async fn select(
        &self,
        request: DetectionRequest<'_>,
        seed: u64,
    ) -> ForgeResult<SelectedMask> {
        let mut candidates = self.oracle.detect(request).await?;
        let candidate_count = candidates.len();
        let index = select_index(seed, candidate_count)?;
        debug!(index, candidate_count, "selected mask candidate");

        let chosen = candidates.swap_remove(index);
        Ok(SelectedMask {
            index,
            candidate_count,
            mask: Arc::new(chosen.mask),
            preview: chosen.preview,
            cutout: chosen.cutout,
            boxed: chosen.boxed,
        })
    }
}
