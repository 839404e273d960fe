//! Voice cloning from the source recording.
//!
//! Every segment of a speaker is cut out with a little padding and the pieces
//! are joined into one sample. Short samples are repeated so the cloning
//! service gets enough material.

use serde_json::json;
use std::collections::BTreeMap;
use std::path::Path;

use crate::ui::prelude::*;

use super::types::VoiceCloner;
use crate::dub::audio::{AudioUtils, ClipFile};
use crate::dub::duration;
use crate::dub::error::{DubError, DubResult};
use crate::dub::segment::{Segment, SpeakerId};

/// Extra audio kept on both sides of each segment
pub const SAMPLE_PADDING_SECONDS: f64 = 0.2;
/// Samples shorter than this are repeated
pub const MIN_SAMPLE_SECONDS: f64 = 90.0;
pub const SAMPLE_REPEATS: usize = 3;
/// Longest sample the cloning service accepts
pub const MAX_SAMPLE_SECONDS: f64 = 44.0 * 60.0;

/// Builds the cloning sample for `speaker` from `source`, encoded as mp3.
pub async fn speaker_sample(
    utils: &AudioUtils,
    source: &Path,
    segments: &[Segment],
    speaker: SpeakerId,
) -> DubResult<ClipFile> {
    let mut pieces = Vec::new();
    let mut collected = 0.0;
    for segment in segments.iter().filter(|s| s.speaker == speaker) {
        let remaining = MAX_SAMPLE_SECONDS - collected;
        if remaining < SAMPLE_PADDING_SECONDS {
            break;
        }
        let begin = (segment.begin - SAMPLE_PADDING_SECONDS).max(0.0);
        let end = (segment.end + SAMPLE_PADDING_SECONDS).min(begin + remaining);
        pieces.push(utils.cut_range(source, begin, end).await?);
        collected += end - begin;
    }
    if pieces.is_empty() {
        return Err(DubError::InvalidInput(format!(
            "speaker {speaker} has no segments to clone a voice from"
        )));
    }

    let sample = utils.concatenate(pieces).await?;
    let length = duration::measure_or(utils, &sample, collected).await;

    let mut parts = vec![sample];
    if length < MIN_SAMPLE_SECONDS {
        for _ in 1..SAMPLE_REPEATS {
            let copy = utils.import_file(parts[0].path()).await?;
            parts.push(copy);
        }
    }

    emit(
        Level::Debug,
        "dub.speech.clone_sample",
        &format!(
            "Voice sample for speaker {speaker}: {length:.1}s x{}",
            parts.len()
        ),
        Some(json!({ "speaker": speaker, "seconds": length, "repeats": parts.len() })),
    );
    utils.concatenate_as(parts, "mp3").await
}

/// Clones one voice per speaker, one speaker at a time.
pub async fn clone_voices(
    cloner: &dyn VoiceCloner,
    utils: &AudioUtils,
    source: &Path,
    segments: &[Segment],
    speakers: &[SpeakerId],
) -> DubResult<BTreeMap<SpeakerId, String>> {
    let mut voices = BTreeMap::new();
    for &speaker in speakers {
        let sample = speaker_sample(utils, source, segments, speaker).await?;
        let label = format!("speaker-{speaker}");
        let voice_id = cloner.clone_voice(&label, sample.path()).await?;
        emit(
            Level::Info,
            "dub.speech.cloned",
            &format!("Cloned the voice of speaker {speaker}"),
            Some(json!({ "speaker": speaker, "voice_id": voice_id })),
        );
        voices.insert(speaker, voice_id);
    }
    Ok(voices)
}
