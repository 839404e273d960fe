//! Duration estimation for synthesized clips.
//!
//! Durations always come from decoding the actual audio. Text length is never
//! used as a proxy.

use serde_json::json;

use crate::ui::prelude::*;

use super::audio::{AudioUtils, ClipFile};
use super::error::DubResult;

pub async fn measure(utils: &AudioUtils, clip: &ClipFile) -> DubResult<f64> {
    utils.measure_duration(clip.path()).await
}

/// Like [`measure`], but falls back to `fallback` with a warning when the clip
/// cannot be measured.
pub async fn measure_or(utils: &AudioUtils, clip: &ClipFile, fallback: f64) -> f64 {
    match measure(utils, clip).await {
        Ok(duration) => duration,
        Err(err) => {
            emit(
                Level::Warn,
                "dub.duration.fallback",
                &format!("Could not measure clip duration ({err}); using {fallback:.3}s"),
                Some(json!({ "clip": clip.path().display().to_string() })),
            );
            fallback
        }
    }
}

/// Ratio of produced speech to the time available for it.
pub fn speed_factor(clip_duration: f64, segment_duration: f64) -> f64 {
    if segment_duration <= 0.0 {
        return f64::INFINITY;
    }
    clip_duration / segment_duration
}
