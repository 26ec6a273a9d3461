//! Inpainting invocation wrapping the engine with cleanup, persistence and display policy.

use std::{path::PathBuf, sync::Arc};

use image::DynamicImage;
use tracing::{instrument, warn};

use crate::{
    ForgeResult,
    args::GenerationArgs,
    backends::{
        cleaner::MaskedContentCleaner,
        engine::{InpaintRequest, InpaintingEngine, Processed},
        sink::{ImageSink, SaveRequest},
    },
};

/// Where the outputs of one inpaint call are persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveTarget {
    pub directory: PathBuf,
    pub suffix: String,
    pub use_subdirs: bool,
}

#[derive(Clone)]
pub struct Inpainter {
    engine: Arc<dyn InpaintingEngine>,
    cleaner: Option<Arc<dyn MaskedContentCleaner>>,
    cleaner_upscaler: Option<String>,
    sink: Arc<dyn ImageSink>,
    samples_format: String,
    do_not_show_images: bool,
}

impl Inpainter {
    pub fn new(
        engine: Arc<dyn InpaintingEngine>,
        cleaner: Option<Arc<dyn MaskedContentCleaner>>,
        cleaner_upscaler: Option<String>,
        sink: Arc<dyn ImageSink>,
        samples_format: String,
        do_not_show_images: bool,
    ) -> Self {
        Self {
            engine,
            cleaner,
            cleaner_upscaler,
            sink,
            samples_format,
            do_not_show_images,
        }
    }

    /// Runs the engine for `image` with `args`, saving outputs when `save` is set.
    ///
    /// With the cleaner fill policy the image is cleaned first and the engine
    /// sees the `original` policy. When images are hidden by configuration the
    /// returned list is empty but the text panes are kept.
    #[instrument(skip_all, fields(seed = args.seed, fill = ?args.inpainting_fill))]
    pub async fn inpaint(
        &self,
        image: DynamicImage,
        args: &GenerationArgs,
        save: Option<&SaveTarget>,
    ) -> ForgeResult<Processed> {
        let mut processed = self.render(image, args, save).await?;
        if self.do_not_show_images {
            processed.images.clear();
        }
        Ok(processed)
    }

    /// Like [`Inpainter::inpaint`] but always returns the generated images.
    ///
    /// Used for intermediate passes whose outputs feed another pass.
    pub async fn render(
        &self,
        image: DynamicImage,
        args: &GenerationArgs,
        save: Option<&SaveTarget>,
    ) -> ForgeResult<Processed> {
        let image = if args.inpainting_fill.delegates_to_cleaner() {
            self.clean(image, args).await
        } else {
            image
        };

        let request = InpaintRequest::from_args(image, args, args.inpainting_fill.for_engine());
        let processed = self.engine.run(request).await?;

        if let Some(target) = save {
            let save_request = SaveRequest {
                directory: target.directory.clone(),
                seed: args.seed,
                prompt: args.positive_prompt.clone(),
                format: self.samples_format.clone(),
                info: processed.info.clone(),
                suffix: target.suffix.clone(),
                use_subdirs: target.use_subdirs,
            };
            for output in &processed.images {
                self.sink.save(output, &save_request).await?;
            }
        }
        Ok(processed)
    }

    async fn clean(&self, image: DynamicImage, args: &GenerationArgs) -> DynamicImage {
        let Some(cleaner) = &self.cleaner else {
            warn!("masked content cleaner requested but none is installed");
            return image;
        };
        let Some(mask) = &args.mask else {
            warn!("masked content cleaner requested without a selected mask");
            return image;
        };
        match cleaner
            .clean(
                &image,
                mask,
                args.inpainting_mask_invert,
                self.cleaner_upscaler.as_deref(),
            )
            .await
        {
            Ok(cleaned) => cleaned,
            Err(error) => {
                warn!(error = %error, "masked content cleaner failed, using original image");
                image
            }
        }
    }
}
