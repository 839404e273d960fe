//! Data model shared by the formatter, the adaptation loop and the timeline assembler.

use serde::{Deserialize, Serialize};

use super::audio::ClipFile;

pub type SpeakerId = u32;

/// A single transcribed word with its timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Word {
    #[serde(alias = "word")]
    pub text: String,
    pub start: f64,
    pub end: f64,
    #[serde(default)]
    pub confidence: f64,
}

/// Raw transcription unit as returned by the transcription service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Utterance {
    pub text: String,
    pub start: f64,
    pub end: f64,
    #[serde(default)]
    pub speaker: SpeakerId,
    #[serde(default)]
    pub channel: u32,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub words: Vec<Word>,
}

/// A bounded span of one speaker's speech on the source timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub index: usize,
    pub speaker: SpeakerId,
    pub begin: f64,
    pub end: f64,
    pub text: String,
    /// Text before translation, filled in by the translator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_text: Option<String>,
    /// Words annotated with the silence that follows them, e.g. `Hello<0.250s>world`.
    pub words_with_silence: String,
    pub confidence: f64,
    pub language: String,
}

impl Segment {
    /// Always derived from begin/end so it can never go stale after a mutation.
    pub fn duration(&self) -> f64 {
        self.end - self.begin
    }

    /// Silence between the end of this segment and the start of `next`.
    pub fn gap_to(&self, next: &Segment) -> f64 {
        next.begin - self.end
    }
}

/// One synthesized audio file tied to a segment by index.
#[derive(Debug)]
pub struct SpeechClip {
    pub index: usize,
    pub speaker: SpeakerId,
    /// Measured from the decoded audio, never estimated.
    pub duration: f64,
    pub request_id: String,
    pub clip: ClipFile,
}

/// A speech clip after timing adaptation; the unit consumed by the timeline assembler.
#[derive(Debug)]
pub struct AdjustedClip {
    pub index: usize,
    pub speaker: SpeakerId,
    pub begin: f64,
    pub end: f64,
    pub final_duration: f64,
    pub text: String,
    pub raw_speed_factor: f64,
    pub applied_speed_factor: f64,
    pub reformulation_rounds: u32,
    pub fine_corrected: bool,
    /// Synthesis request that produced the kept take
    pub request_id: String,
    pub clip: ClipFile,
}

impl AdjustedClip {
    pub fn segment_duration(&self) -> f64 {
        self.end - self.begin
    }

    /// Where this clip stops on the assembled timeline.
    pub fn timeline_end(&self) -> f64 {
        self.begin + self.final_duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utterance_accepts_transcription_service_field_names() {
        let json = r#"{
            "text": "Hello there",
            "start": 1.0,
            "end": 2.5,
            "speaker": 1,
            "confidence": 0.9,
            "language": "en",
            "words": [
                {"word": "Hello", "start": 1.0, "end": 1.4, "confidence": 0.95},
                {"word": " there", "start": 1.5, "end": 2.5, "confidence": 0.85}
            ]
        }"#;
        let utterance: Utterance = serde_json::from_str(json).expect("parse utterance");
        assert_eq!(utterance.words.len(), 2);
        assert_eq!(utterance.words[1].text, " there");
        assert_eq!(utterance.channel, 0);
    }

    #[test]
    fn duration_follows_begin_and_end() {
        let mut segment = Segment {
            index: 0,
            speaker: 0,
            begin: 10.0,
            end: 12.0,
            text: "a".into(),
            original_text: None,
            words_with_silence: "a".into(),
            confidence: 1.0,
            language: "en".into(),
        };
        assert_eq!(segment.duration(), 2.0);
        segment.end = 13.5;
        assert_eq!(segment.duration(), 3.5);
    }
}
