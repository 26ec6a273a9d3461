//! Rate conversion between the native frame rate and the extraction rate.

use crate::{ForgeError, ForgeResult};

/// Output ordinal a native frame falls on: `floor(index / native * target)`.
pub fn due_index(native_index: u64, native_fps: f64, target_fps: f64) -> u64 {
    (native_index as f64 * target_fps / native_fps).floor() as u64
}

/// Decides which native frames are kept when sampling at the target rate.
///
/// A frame is kept when its due ordinal is ahead of the last emitted one.
/// At most one frame is kept per native frame, so a target rate above the
/// native rate keeps every frame without duplicating any.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSchedule {
    native_fps: f64,
    target_fps: f64,
    last_emitted: Option<u64>,
}

impl FrameSchedule {
    pub fn new(native_fps: f64, target_fps: f64) -> ForgeResult<Self> {
        if !(native_fps.is_finite() && native_fps > 0.0) {
            return Err(ForgeError::Video(format!(
                "video reports an invalid frame rate {native_fps}"
            )));
        }
        if !(target_fps.is_finite() && target_fps > 0.0) {
            return Err(ForgeError::Configuration(format!(
                "invalid extraction frame rate {target_fps}"
            )));
        }
        Ok(Self {
            native_fps,
            target_fps,
            last_emitted: None,
        })
    }

    /// Returns the output ordinal to store `native_index` under, or `None` to drop it.
    ///
    /// Native indices must be passed in increasing order.
    pub fn admit(&mut self, native_index: u64) -> Option<u64> {
        let due = due_index(native_index, self.native_fps, self.target_fps);
        let next = match self.last_emitted {
            None => 0,
            Some(last) if due > last => last + 1,
            Some(_) => return None,
        };
        self.last_emitted = Some(next);
        Some(next)
    }

    pub fn emitted(&self) -> u64 {
        self.last_emitted.map_or(0, |last| last + 1)
    }
}
