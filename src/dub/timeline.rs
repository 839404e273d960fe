//! Lays adjusted clips out on the source timeline.
//!
//! Each speaker gets its own track of silence and speech pieces anchored on
//! the segments' begin times. Tracks are then mixed into one file.

use serde_json::json;
use std::collections::BTreeMap;

use crate::ui::prelude::*;

use super::audio::{AudioUtils, ClipFile};
use super::error::DubResult;
use super::segment::{AdjustedClip, SpeakerId};

pub struct TimelineAssembler<'a> {
    utils: &'a AudioUtils,
    silence_epsilon: f64,
}

impl<'a> TimelineAssembler<'a> {
    pub fn new(utils: &'a AudioUtils, silence_epsilon: f64) -> Self {
        Self {
            utils,
            silence_epsilon,
        }
    }

    /// Builds one track per speaker (ascending speaker id) and overlays them.
    ///
    /// With no clips at all the result is an empty output file.
    pub async fn assemble(&self, clips: Vec<AdjustedClip>) -> DubResult<ClipFile> {
        let mut by_speaker: BTreeMap<SpeakerId, Vec<AdjustedClip>> = BTreeMap::new();
        for clip in clips {
            by_speaker.entry(clip.speaker).or_default().push(clip);
        }

        let speakers = by_speaker.len();
        let mut tracks = Vec::with_capacity(speakers);
        for (speaker, clips) in by_speaker {
            tracks.push(self.speaker_track(speaker, clips).await?);
        }

        if speakers > 1 {
            emit(
                Level::Debug,
                "dub.timeline.overlay",
                &format!("Mixing {speakers} speaker tracks"),
                None,
            );
        }
        self.utils.overlay(tracks).await
    }

    /// Concatenates one speaker's clips, filling gaps with generated silence.
    ///
    /// The end of each clip is taken as `begin + final_duration`, so a clip
    /// that overruns its slot pushes the following silence shorter and never
    /// overlaps the next clip.
    pub async fn speaker_track(
        &self,
        speaker: SpeakerId,
        mut clips: Vec<AdjustedClip>,
    ) -> DubResult<ClipFile> {
        clips.sort_by(|a, b| a.begin.total_cmp(&b.begin));

        let mut pieces = Vec::with_capacity(clips.len() * 2);
        let mut previous_end = 0.0;
        for clip in clips {
            let gap = round4(clip.begin - previous_end);
            if gap > self.silence_epsilon {
                pieces.push(self.utils.generate_silence(gap).await?);
            }
            previous_end = clip.timeline_end();
            pieces.push(clip.clip);
        }

        emit(
            Level::Debug,
            "dub.timeline.track",
            &format!("Speaker {speaker} track has {} pieces", pieces.len()),
            Some(json!({ "speaker": speaker, "end": previous_end })),
        );
        self.utils.concatenate(pieces).await
    }
}

fn round4(seconds: f64) -> f64 {
    (seconds * 10_000.0).round() / 10_000.0
}
