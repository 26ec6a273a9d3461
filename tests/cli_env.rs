//! Kept in its own binary: it mutates process environment variables.

use std::path::Path;

use clap::Parser;
use maskforge::{config::CliArgs, pipeline::SourceMode};

#[test]
fn batch_flags_fall_back_to_environment() {
    // SAFETY: this binary holds a single test, so no other thread reads the environment.
    unsafe {
        std::env::set_var("MASKFORGE_MODE", "directory");
        std::env::set_var("MASKFORGE_SEED", "-7");
        std::env::set_var("MASKFORGE_INPUT_DIR", "frames");
        std::env::set_var("MASKFORGE_OUTPUT_DIR", "rendered");
        std::env::set_var("MASKFORGE_VIDEO", "clip.mp4");
    }

    let from_env = CliArgs::try_parse_from(["maskforge"]).expect("cli parses");
    assert_eq!(from_env.mode, SourceMode::Directory);
    assert_eq!(from_env.seed, -7);
    assert_eq!(from_env.input_dir.as_deref(), Some(Path::new("frames")));
    assert_eq!(from_env.output_dir, Path::new("rendered"));
    assert_eq!(from_env.video.as_deref(), Some(Path::new("clip.mp4")));

    let flags_win = CliArgs::try_parse_from(["maskforge", "--seed", "3", "--mode", "single"])
        .expect("cli parses");
    assert_eq!(flags_win.seed, 3);
    assert_eq!(flags_win.mode, SourceMode::Single);
    assert_eq!(flags_win.output_dir, Path::new("rendered"));
}
