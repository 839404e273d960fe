use async_trait::async_trait;
use rand::Rng;
use reqwest::Client;
use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};
use serde_json::json;
use std::path::Path;

use crate::dub::config::ElevenLabsConfig;
use crate::dub::error::{DubError, DubResult};
use crate::dub::rewrite::PauseStyle;
use crate::ui::prelude::{Level, emit};

use super::types::{SpeechRequest, SpeechSynthesizer, SynthesizedSpeech, VoiceCloner};

/// ElevenLabs text-to-speech client.
pub struct ElevenLabsSynthesizer {
    client: Client,
    api_key: String,
    base_url: String,
    model_id: String,
    output_format: String,
    stability: f64,
    similarity_boost: f64,
    pause_style: PauseStyle,
}

impl ElevenLabsSynthesizer {
    pub fn new(config: &ElevenLabsConfig, api_key: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model_id: config.model_id.clone(),
            output_format: config.output_format.clone(),
            stability: config.stability,
            similarity_boost: config.similarity_boost,
            pause_style: config.pause_style,
        }
    }

    fn body(&self, request: &SpeechRequest) -> serde_json::Value {
        let mut voice_settings = json!({
            "stability": self.stability,
            "similarity_boost": self.similarity_boost,
            "use_speaker_boost": true,
        });
        if let Some(speed) = request.speed {
            voice_settings["speed"] = json!(round_to(speed, 2));
        }

        let mut body = json!({
            "text": request.text,
            "model_id": self.model_id,
            "voice_settings": voice_settings,
        });
        if let Some(previous) = &request.context.previous_text {
            body["previous_text"] = json!(format!("{previous} "));
        }
        if let Some(next) = &request.context.next_text {
            body["next_text"] = json!(format!(" {next}"));
        }
        body
    }

    /// Raw pcm/ulaw formats carry no container and are not supported here.
    fn extension(&self) -> &'static str {
        if self.output_format.starts_with("opus") {
            "opus"
        } else {
            "mp3"
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for ElevenLabsSynthesizer {
    async fn synthesize(&self, request: &SpeechRequest) -> DubResult<SynthesizedSpeech> {
        let url = format!(
            "{}/text-to-speech/{}?output_format={}",
            self.base_url, request.voice_id, self.output_format
        );

        let resp = self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .json(&self.body(request))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, &request.voice_id, text));
        }

        let request_id = resp
            .headers()
            .get("request-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(generated_request_id);
        let audio = resp.bytes().await?;

        emit(
            Level::Debug,
            "dub.speech.generated",
            &format!("Synthesized {} bytes of speech", audio.len()),
            Some(json!({ "request_id": request_id, "voice_id": request.voice_id })),
        );

        Ok(SynthesizedSpeech {
            audio,
            extension: self.extension(),
            request_id,
        })
    }

    fn pause_style(&self) -> PauseStyle {
        self.pause_style
    }

    fn name(&self) -> &'static str {
        "elevenlabs"
    }
}

#[async_trait]
impl VoiceCloner for ElevenLabsSynthesizer {
    async fn clone_voice(&self, label: &str, sample: &Path) -> DubResult<String> {
        let bytes = tokio::fs::read(sample).await?;
        let file_name = sample
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{label}.mp3"));
        let form = Form::new()
            .text("name", format!("smartdub-{label}-{}", short_id()))
            .text("description", label.to_string())
            .part(
                "files",
                Part::bytes(bytes).file_name(file_name).mime_str("audio/mpeg")?,
            );

        emit(
            Level::Info,
            "dub.speech.clone_upload",
            &format!("Uploading a voice sample for {label}..."),
            None,
        );

        let resp = self
            .client
            .post(format!("{}/voices/add", self.base_url))
            .header("xi-api-key", &self.api_key)
            .multipart(form)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(status_error(status, "voice cloning", text));
        }

        let json: serde_json::Value = resp.json().await?;
        cloned_voice_id(&json)
    }
}

fn cloned_voice_id(json: &serde_json::Value) -> DubResult<String> {
    json["voice_id"]
        .as_str()
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| DubError::Rejected(format!("voice cloning returned no voice_id: {json}")))
}

fn classify_status(status: StatusCode, voice_id: &str, body: String) -> DubError {
    if status == StatusCode::UNAUTHORIZED {
        DubError::ProtectedVoice {
            voice_id: voice_id.to_string(),
        }
    } else {
        status_error(status, "speech service", body)
    }
}

/// Timeouts, rate limits and server errors are worth retrying; any other
/// client error will fail the same way again.
fn status_error(status: StatusCode, service: &str, body: String) -> DubError {
    let retryable = status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || !status.is_client_error();
    if retryable {
        DubError::Transient(format!("{service} returned {status}: {body}"))
    } else {
        DubError::Rejected(format!("{service} returned {status}: {body}"))
    }
}

fn short_id() -> String {
    let mut rng = rand::thread_rng();
    format!("{:06x}", rng.r#gen::<u32>() & 0x00ff_ffff)
}

fn generated_request_id() -> String {
    let mut rng = rand::thread_rng();
    format!("local-{:016x}", rng.r#gen::<u64>())
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dub::speech::SpeechContext;

    fn synthesizer() -> ElevenLabsSynthesizer {
        ElevenLabsSynthesizer::new(&ElevenLabsConfig::default(), "key".into())
    }

    #[test]
    fn body_carries_context_and_speed_hint() {
        let request = SpeechRequest::new(
            "Bonjour",
            "voice-1",
            SpeechContext {
                previous_text: Some("Salut".into()),
                next_text: None,
            },
        )
        .with_speed(1.1234);

        let body = synthesizer().body(&request);
        assert_eq!(body["previous_text"], "Salut ");
        assert!(body.get("next_text").is_none());
        assert_eq!(body["voice_settings"]["speed"], 1.12);
        assert_eq!(body["voice_settings"]["similarity_boost"], 0.85);
        assert_eq!(body["model_id"], "eleven_multilingual_v2");
    }

    #[test]
    fn unauthorized_means_protected_voice() {
        let err = classify_status(StatusCode::UNAUTHORIZED, "v9", String::new());
        assert!(matches!(err, DubError::ProtectedVoice { ref voice_id } if voice_id == "v9"));
        assert!(!err.is_retryable());

        let err = classify_status(StatusCode::TOO_MANY_REQUESTS, "v9", "slow down".into());
        assert!(err.is_retryable());
    }

    #[test]
    fn client_errors_are_not_retried() {
        for status in [
            StatusCode::BAD_REQUEST,
            StatusCode::NOT_FOUND,
            StatusCode::UNPROCESSABLE_ENTITY,
        ] {
            let err = classify_status(status, "v9", "voice_not_found".into());
            assert!(matches!(err, DubError::Rejected(_)), "{status} gave {err}");
        }
        for status in [
            StatusCode::REQUEST_TIMEOUT,
            StatusCode::INTERNAL_SERVER_ERROR,
            StatusCode::BAD_GATEWAY,
        ] {
            assert!(classify_status(status, "v9", String::new()).is_retryable());
        }
    }

    #[test]
    fn cloned_voice_id_is_required() {
        let id = cloned_voice_id(&json!({ "voice_id": "abc123", "requires_verification": false }));
        assert_eq!(id.unwrap(), "abc123");
        assert!(matches!(
            cloned_voice_id(&json!({ "detail": "corrupted" })),
            Err(DubError::Rejected(_))
        ));
    }

    #[test]
    fn generated_request_ids_are_unique() {
        assert_ne!(generated_request_id(), generated_request_id());
    }
}
