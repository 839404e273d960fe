//! Speech-to-text: the service seam, the Gladia client and transcript files.

mod gladia;

pub use gladia::GladiaTranscriber;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::error::{DubError, DubResult};
use super::segment::Utterance;

/// Utterances of a recording plus what the service detected about it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    #[serde(default)]
    pub language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub utterances: Vec<Utterance>,
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: &Path) -> DubResult<Transcript>;

    fn name(&self) -> &'static str;
}

/// Reads a transcript from disk.
///
/// Accepts a saved Gladia job response, a serialized [`Transcript`] or a bare
/// array of utterances.
pub fn load_transcript(path: &Path) -> DubResult<Transcript> {
    let contents = std::fs::read_to_string(path)?;
    let value: serde_json::Value = serde_json::from_str(&contents).map_err(|err| {
        DubError::InvalidInput(format!("{} is not valid JSON: {err}", path.display()))
    })?;
    transcript_from_value(value)
}

pub fn transcript_from_value(value: serde_json::Value) -> DubResult<Transcript> {
    if value.get("result").is_some() {
        return gladia::parse_result(&value);
    }
    let transcript = if value.is_array() {
        serde_json::from_value(value).map(|utterances| Transcript {
            utterances,
            ..Transcript::default()
        })
    } else {
        serde_json::from_value(value)
    };
    transcript.map_err(|err| DubError::InvalidInput(format!("unrecognized transcript: {err}")))
}
