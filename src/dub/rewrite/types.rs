use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::dub::error::DubResult;
use crate::dub::segment::SpeakerId;

/// How a speech engine expects pauses to be written into its input text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseStyle {
    /// `<break time="1.2s" />` tags, punctuation only for pauses under 0.8s
    #[default]
    BreakTags,
    /// `--` markers of roughly 0.6s each
    Dashes,
}

/// Neighbouring text given to the rewrite service for context only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Neighbour {
    pub speaker: SpeakerId,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RewriteKind {
    Translate {
        source_language: String,
        previous: Option<Neighbour>,
        next: Option<Neighbour>,
        speaker: SpeakerId,
    },
    Shorten {
        target_seconds: f64,
        actual_seconds: f64,
    },
    Lengthen {
        target_seconds: f64,
        actual_seconds: f64,
        allow_word_changes: bool,
        pause_style: PauseStyle,
    },
}

impl RewriteKind {
    pub fn label(&self) -> &'static str {
        match self {
            RewriteKind::Translate { .. } => "translate",
            RewriteKind::Shorten { .. } => "shorten",
            RewriteKind::Lengthen { .. } => "lengthen",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RewriteRequest {
    pub kind: RewriteKind,
    /// Text to translate or adapt
    pub text: String,
    /// Untranslated source text, when known
    pub original_text: Option<String>,
    /// Per-word silence annotation of the source segment
    pub words_with_silence: String,
    pub target_language: String,
    /// Short description of the whole recording
    pub summary: Option<String>,
}

/// Translation and timing-driven text adaptation service.
#[async_trait]
pub trait Rewriter: Send + Sync {
    async fn rewrite(&self, request: &RewriteRequest) -> DubResult<String>;

    fn name(&self) -> &'static str;
}
