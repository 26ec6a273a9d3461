mod common;

use std::{fs, sync::atomic::Ordering};

use common::{
    CountingCache, CountingCleaner, FailingCleaner, RecordingEngine, RecordingSink, StubOracle,
    candidate_value, image, settings_in,
};
use image::{DynamicImage, Rgba, RgbaImage};
use maskforge::{
    ForgeError,
    args::{ExtraInclude, InpaintingFill},
    job::{JobState, Session},
    pipeline::{BatchEntry, BatchRequest, Pipeline, SourceRequest},
};

fn batch_of(count: usize) -> SourceRequest {
    SourceRequest::Batch(
        (0..count)
            .map(|_| BatchEntry::Decoded(image(8, 8)))
            .collect(),
    )
}

fn request(source: SourceRequest, seed: i64) -> BatchRequest {
    let mut request = BatchRequest::new(source);
    request.seed = seed;
    request
}

#[tokio::test]
async fn single_item_failure_propagates() {
    let dir = tempfile::tempdir().expect("tempdir");
    let pipeline = Pipeline::builder(settings_in(dir.path()), JobState::default())
        .oracle(StubOracle::new(1))
        .engine(RecordingEngine::failing_on(&[1]))
        .sink(RecordingSink::default())
        .build();
    let mut session = Session::default();

    let err = pipeline
        .generate(
            &mut session,
            request(SourceRequest::Single(Some(image(8, 8))), 1),
        )
        .await
        .expect_err("single failure should surface");

    assert!(matches!(err, ForgeError::Engine(_)));
    assert!(session.last_args().is_none());
}

#[tokio::test]
async fn failing_item_in_batch_is_skipped() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cache = CountingCache::default();
    let mut settings = settings_in(dir.path());
    settings.behavior.auto_unload_models = true;
    let pipeline = Pipeline::builder(settings, JobState::default())
        .oracle(StubOracle::new(2))
        .engine(RecordingEngine::failing_on(&[2]))
        .sink(RecordingSink::default())
        .model_cache(cache.clone())
        .build();
    let mut session = Session::default();

    let output = pipeline
        .generate(&mut session, request(batch_of(3), 5))
        .await
        .expect("batch continues past a failure");

    let report = output.report.expect("batch report");
    assert_eq!(report.declared, 3);
    assert_eq!(report.processed, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.failures[0].position, 2);
    assert_eq!(output.images.len(), 2);
    assert_eq!(cache.count(), 1);
    assert_eq!(pipeline.job().snapshot().job_no, 3);
    assert_eq!(session.last_used_seed(), 5);
}

#[tokio::test]
async fn seed_selects_candidate_modulo_count() {
    let dir = tempfile::tempdir().expect("tempdir");
    let engine = RecordingEngine::default();
    let pipeline = Pipeline::builder(settings_in(dir.path()), JobState::default())
        .oracle(StubOracle::new(3))
        .engine(engine.clone())
        .sink(RecordingSink::default())
        .build();
    let mut session = Session::default();

    let output = pipeline
        .generate(&mut session, request(batch_of(2), 43))
        .await
        .expect("batch");

    let report = output.report.expect("batch report");
    assert_eq!(report.mask_indices, vec![1, 1]);
    for request in engine.requests() {
        let mask = request.mask.expect("mask forwarded to engine");
        assert_eq!(mask.get_pixel(0, 0).0[0], candidate_value(1));
        assert_eq!(request.sampling.seed, 43);
    }
    let last = session.last_args().expect("recorded args");
    assert_eq!(last.mask.as_ref().map(|m| m.get_pixel(0, 0).0[0]), Some(candidate_value(1)));
}

#[tokio::test]
async fn zero_candidates_is_a_detection_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let pipeline = Pipeline::builder(settings_in(dir.path()), JobState::default())
        .oracle(StubOracle::new(0))
        .engine(RecordingEngine::default())
        .sink(RecordingSink::default())
        .build();

    let err = pipeline
        .generate(
            &mut Session::default(),
            request(SourceRequest::Single(Some(image(8, 8))), 3),
        )
        .await
        .expect_err("no candidates");
    assert!(matches!(err, ForgeError::Detection(_)));
}

#[tokio::test]
async fn negative_seed_is_randomised_and_recorded() {
    let dir = tempfile::tempdir().expect("tempdir");
    let pipeline = Pipeline::builder(settings_in(dir.path()), JobState::default())
        .sink(RecordingSink::default())
        .build();
    let mut session = Session::default();
    assert_eq!(session.last_used_seed(), -1);

    let output = pipeline
        .generate(
            &mut session,
            request(SourceRequest::Single(Some(image(4, 4))), -1),
        )
        .await
        .expect("batch");

    let seed = output.report.expect("report").seed;
    assert!(seed < 4_294_967_294);
    assert_eq!(session.last_used_seed(), seed as i64);
}

#[tokio::test]
async fn extras_follow_fixed_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    let pipeline = Pipeline::builder(settings_in(dir.path()), JobState::default())
        .oracle(StubOracle::new(1))
        .sink(RecordingSink::default())
        .build();
    let mut batch = request(SourceRequest::Single(Some(image(8, 8))), 0);
    batch.extra_includes = vec![ExtraInclude::Preview, ExtraInclude::Mask, ExtraInclude::Box];

    let output = pipeline
        .generate(&mut Session::default(), batch)
        .await
        .expect("batch");

    assert_eq!(output.images.len(), 4);
    assert!(matches!(output.images[0], DynamicImage::ImageRgba8(_)));
    assert!(matches!(output.images[1], DynamicImage::ImageLuma8(_)));
    assert!(matches!(output.images[2], DynamicImage::ImageRgb16(_)));
    assert!(matches!(output.images[3], DynamicImage::ImageRgb8(_)));
}

#[tokio::test]
async fn directory_mode_saves_without_returning_images() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("input");
    fs::create_dir_all(&input).expect("input dir");
    image(6, 6).save(input.join("a.png")).expect("write a");
    image(6, 6).save(input.join("b.png")).expect("write b");
    fs::write(input.join("notes.txt"), "not an image").expect("write notes");
    let output_dir = dir.path().join("out");

    let sink = RecordingSink::default();
    let pipeline = Pipeline::builder(settings_in(dir.path()), JobState::default())
        .sink(sink.clone())
        .build();
    let source = SourceRequest::Directory {
        input: Some(input),
        output: output_dir.clone(),
        show_results: false,
    };

    let output = pipeline
        .generate(&mut Session::default(), request(source, 9))
        .await
        .expect("directory batch");

    assert!(output.images.is_empty());
    let report = output.report.expect("report");
    assert_eq!(report.declared, 3);
    assert_eq!(report.enumerated, 2);
    assert_eq!(report.skipped(), 1);

    let saved = sink.saved();
    assert_eq!(saved.len(), 2);
    assert!(saved.iter().all(|req| req.directory == output_dir && !req.use_subdirs));
}

#[tokio::test]
async fn directory_mode_respects_hidden_dir_config() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut settings = settings_in(dir.path());
    settings.behavior.hide_dir_config = true;
    let pipeline = Pipeline::builder(settings, JobState::default()).build();
    let source = SourceRequest::Directory {
        input: Some(dir.path().to_path_buf()),
        output: dir.path().join("out"),
        show_results: true,
    };

    let err = pipeline
        .generate(&mut Session::default(), request(source, 1))
        .await
        .expect_err("directory disabled");
    assert!(matches!(err, ForgeError::Configuration(_)));
}

#[tokio::test]
async fn interrupt_stops_batch_and_releases_models() {
    let dir = tempfile::tempdir().expect("tempdir");
    let job = JobState::default();
    let cache = CountingCache::default();
    let mut settings = settings_in(dir.path());
    settings.behavior.auto_unload_models = true;
    let engine = RecordingEngine {
        interrupt: Some(job.clone()),
        ..RecordingEngine::default()
    };
    let pipeline = Pipeline::builder(settings, job.clone())
        .engine(engine.clone())
        .sink(RecordingSink::default())
        .model_cache(cache.clone())
        .build();

    let output = pipeline
        .generate(&mut Session::default(), request(batch_of(3), 2))
        .await
        .expect("interrupted batch still returns");

    let report = output.report.expect("report");
    assert!(report.interrupted);
    assert_eq!(report.processed, 1);
    assert_eq!(report.skipped(), 0);
    assert_eq!(engine.requests().len(), 1);
    assert_eq!(cache.count(), 1);
    assert!(!job.snapshot().active);
}

#[tokio::test]
async fn cleaner_fill_reaches_engine_as_original() {
    let dir = tempfile::tempdir().expect("tempdir");
    let engine = RecordingEngine::default();
    let cleaner = CountingCleaner::default();
    let pipeline = Pipeline::builder(settings_in(dir.path()), JobState::default())
        .engine(engine.clone())
        .cleaner(cleaner.clone())
        .sink(RecordingSink::default())
        .build();
    let mut batch = request(SourceRequest::Single(Some(image(8, 8))), 0);
    batch.inpainting_fill = InpaintingFill::Cleaner;

    pipeline
        .generate(&mut Session::default(), batch)
        .await
        .expect("batch");

    assert_eq!(cleaner.calls.load(Ordering::SeqCst), 1);
    assert_eq!(engine.requests()[0].fill, InpaintingFill::Original);
}

#[tokio::test]
async fn hidden_images_keep_text_panes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut settings = settings_in(dir.path());
    settings.behavior.do_not_show_images = true;
    let sink = RecordingSink::default();
    let pipeline = Pipeline::builder(settings, JobState::default())
        .sink(sink.clone())
        .build();
    let mut batch = request(SourceRequest::Single(Some(image(8, 8))), 11);
    batch.prompts.positive = "a lighthouse".into();

    let output = pipeline
        .generate(&mut Session::default(), batch)
        .await
        .expect("batch");

    assert!(output.images.is_empty());
    assert!(output.info.contains("a lighthouse"));
    let saved = sink.saved();
    assert_eq!(saved.len(), 1);
    assert!(saved[0].use_subdirs);
    assert_eq!(saved[0].directory, dir.path().join("saved"));
}

fn tinted(width: u32) -> DynamicImage {
    DynamicImage::ImageRgba8(RgbaImage::from_pixel(width, 6, Rgba([12, 34, 56, 255])))
}

#[tokio::test]
async fn repeated_seed_reproduces_masks_and_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut runs = Vec::new();
    for _ in 0..2 {
        let engine = RecordingEngine::default();
        let pipeline = Pipeline::builder(settings_in(dir.path()), JobState::default())
            .oracle(StubOracle::new(4))
            .engine(engine.clone())
            .sink(RecordingSink::default())
            .build();
        let source = SourceRequest::Batch(
            [4, 5, 6]
                .into_iter()
                .map(|width| BatchEntry::Decoded(image(width, 6)))
                .collect(),
        );

        let output = pipeline
            .generate(&mut Session::default(), request(source, 42))
            .await
            .expect("batch");

        let calls: Vec<(u64, u8, u32)> = engine
            .requests()
            .iter()
            .map(|req| {
                let mask = req.mask.as_ref().expect("mask forwarded");
                (req.sampling.seed, mask.get_pixel(0, 0).0[0], req.image.width())
            })
            .collect();
        let widths: Vec<u32> = output.images.iter().map(|img| img.width()).collect();
        runs.push((output.report.expect("report").mask_indices, calls, widths));
    }

    assert_eq!(runs[0], runs[1]);
    assert_eq!(runs[0].0, vec![2, 2, 2]);
    assert_eq!(runs[0].2, vec![4, 5, 6]);
    assert!(runs[0].1.iter().all(|(seed, value, _)| *seed == 42 && *value == candidate_value(2)));
}

#[tokio::test]
async fn failing_cleaner_falls_back_to_original_image() {
    let dir = tempfile::tempdir().expect("tempdir");
    let engine = RecordingEngine::default();
    let cleaner = FailingCleaner::default();
    let pipeline = Pipeline::builder(settings_in(dir.path()), JobState::default())
        .oracle(StubOracle::new(1))
        .engine(engine.clone())
        .cleaner(cleaner.clone())
        .sink(RecordingSink::default())
        .build();
    let source = tinted(8);
    let mut batch = request(SourceRequest::Single(Some(source.clone())), 0);
    batch.inpainting_fill = InpaintingFill::Cleaner;

    let output = pipeline
        .generate(&mut Session::default(), batch)
        .await
        .expect("cleaner failure is not fatal");

    assert_eq!(cleaner.calls.load(Ordering::SeqCst), 1);
    let requests = engine.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].fill, InpaintingFill::Original);
    assert_eq!(requests[0].image.as_bytes(), source.as_bytes());
    assert_eq!(output.images.len(), 1);
}

#[tokio::test]
async fn missing_cleaner_falls_back_to_original_image() {
    let dir = tempfile::tempdir().expect("tempdir");
    let engine = RecordingEngine::default();
    let pipeline = Pipeline::builder(settings_in(dir.path()), JobState::default())
        .oracle(StubOracle::new(1))
        .engine(engine.clone())
        .sink(RecordingSink::default())
        .build();
    let source = tinted(8);
    let mut batch = request(SourceRequest::Single(Some(source.clone())), 0);
    batch.inpainting_fill = InpaintingFill::Cleaner;

    pipeline
        .generate(&mut Session::default(), batch)
        .await
        .expect("batch without cleaner");

    let requests = engine.requests();
    assert_eq!(requests[0].fill, InpaintingFill::Original);
    assert_eq!(requests[0].image.as_bytes(), source.as_bytes());
}

#[tokio::test]
async fn batch_flag_reaches_engine() {
    let dir = tempfile::tempdir().expect("tempdir");
    let engine = RecordingEngine::default();
    let pipeline = Pipeline::builder(settings_in(dir.path()), JobState::default())
        .oracle(StubOracle::new(1))
        .engine(engine.clone())
        .sink(RecordingSink::default())
        .build();
    let mut batch = request(SourceRequest::Single(Some(image(8, 8))), 1);
    batch.batch_size = 2;

    let output = pipeline
        .generate(&mut Session::default(), batch)
        .await
        .expect("batch");

    assert!(engine.requests()[0].sampling.is_batch);
    let metadata: serde_json::Value =
        serde_json::from_str(&output.metadata).expect("json metadata");
    assert_eq!(metadata["is_batch"], serde_json::Value::Bool(true));
}

#[cfg(unix)]
#[tokio::test]
async fn directory_mode_follows_symlinked_images() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("input");
    fs::create_dir_all(&input).expect("input dir");
    image(6, 6).save(input.join("a.png")).expect("write a");
    let elsewhere = dir.path().join("library.png");
    image(6, 6).save(&elsewhere).expect("write target");
    std::os::unix::fs::symlink(&elsewhere, input.join("b.png")).expect("symlink");

    let sink = RecordingSink::default();
    let pipeline = Pipeline::builder(settings_in(dir.path()), JobState::default())
        .sink(sink.clone())
        .build();
    let source = SourceRequest::Directory {
        input: Some(input),
        output: dir.path().join("out"),
        show_results: false,
    };

    let output = pipeline
        .generate(&mut Session::default(), request(source, 4))
        .await
        .expect("directory batch");

    let report = output.report.expect("report");
    assert_eq!(report.declared, 2);
    assert_eq!(report.enumerated, 2);
    assert_eq!(sink.saved().len(), 2);
}
