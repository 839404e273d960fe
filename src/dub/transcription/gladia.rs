use async_trait::async_trait;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde_json::json;
use std::path::Path;
use std::time::Duration;

use crate::dub::config::GladiaConfig;
use crate::dub::error::{DubError, DubResult};
use crate::dub::segment::Utterance;
use crate::dub::support::poll::{PollPolicy, PollStatus, poll_until};
use crate::ui::prelude::{Level, emit};

use super::{Transcriber, Transcript};

/// Gladia v2 pre-recorded transcription client.
pub struct GladiaTranscriber {
    client: Client,
    api_key: String,
    base_url: String,
    poll: PollPolicy,
    speakers: Option<u32>,
}

impl GladiaTranscriber {
    pub fn new(config: &GladiaConfig, api_key: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            poll: PollPolicy::new(
                Duration::from_millis(config.poll_interval_ms),
                config.max_polls,
            ),
            speakers: None,
        }
    }

    /// Pins diarization to a known number of speakers.
    pub fn with_speakers(mut self, speakers: Option<u32>) -> Self {
        self.speakers = speakers.filter(|n| *n > 0);
        self
    }

    async fn upload(&self, audio: &Path) -> DubResult<String> {
        let bytes = tokio::fs::read(audio).await?;
        let file_name = audio
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio".to_string());
        let form = Form::new().part("audio", Part::bytes(bytes).file_name(file_name));

        emit(
            Level::Info,
            "dub.transcribe.upload",
            &format!("Uploading {} to Gladia...", audio.display()),
            None,
        );

        let resp = self
            .client
            .post(format!("{}/upload", self.base_url))
            .header("x-gladia-key", &self.api_key)
            .multipart(form)
            .send()
            .await?;
        let json = checked_json(resp).await?;
        json["audio_url"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| DubError::TranscriptionFailed("upload response has no audio_url".into()))
    }

    async fn start(&self, audio_url: &str) -> DubResult<String> {
        let resp = self
            .client
            .post(format!("{}/pre-recorded", self.base_url))
            .header("x-gladia-key", &self.api_key)
            .json(&self.job_body(audio_url))
            .send()
            .await?;
        let json = checked_json(resp).await?;
        json["id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| DubError::TranscriptionFailed("job response has no id".into()))
    }

    fn job_body(&self, audio_url: &str) -> serde_json::Value {
        let mut body = json!({
            "audio_url": audio_url,
            "detect_language": true,
            "diarization": true,
            "sentences": true,
            "punctuation_enhanced": true,
            "summarization": true,
        });
        if let Some(speakers) = self.speakers {
            body["diarization_config"] = json!({
                "number_of_speakers": speakers,
                "max_speakers": speakers,
            });
        }
        body
    }

    async fn check(&self, id: &str, attempt: u32) -> DubResult<PollStatus<serde_json::Value>> {
        let resp = self
            .client
            .get(format!("{}/pre-recorded/{id}", self.base_url))
            .header("x-gladia-key", &self.api_key)
            .send()
            .await?;
        let json = checked_json(resp).await?;

        match json["status"].as_str().unwrap_or("unknown") {
            "done" => Ok(PollStatus::Done(json)),
            "error" => Err(DubError::TranscriptionFailed(format!(
                "job {id} failed: {}",
                json["error_code"]
            ))),
            status => {
                if attempt % 30 == 0 {
                    emit(
                        Level::Info,
                        "dub.transcribe.status",
                        &format!("Transcription status: {status}"),
                        None,
                    );
                }
                Ok(PollStatus::Pending)
            }
        }
    }
}

#[async_trait]
impl Transcriber for GladiaTranscriber {
    async fn transcribe(&self, audio: &Path) -> DubResult<Transcript> {
        let audio_url = self.upload(audio).await?;
        let id = self.start(&audio_url).await?;
        emit(
            Level::Info,
            "dub.transcribe.started",
            &format!("Transcription job started with id {id}"),
            None,
        );

        let job = format!("transcription {id}");
        let id = id.as_str();
        let result = poll_until(&job, self.poll, move |attempt| self.check(id, attempt)).await?;
        parse_result(&result)
    }

    fn name(&self) -> &'static str {
        "gladia"
    }
}

async fn checked_json(resp: reqwest::Response) -> DubResult<serde_json::Value> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp.json().await?);
    }
    let text = resp.text().await.unwrap_or_default();
    Err(if status.as_u16() == 429 || status.is_server_error() {
        DubError::Transient(format!("transcription service returned {status}: {text}"))
    } else {
        DubError::TranscriptionFailed(format!("{status}: {text}"))
    })
}

/// Extracts utterances, language and summary from a finished job.
pub(super) fn parse_result(job: &serde_json::Value) -> DubResult<Transcript> {
    let transcription = &job["result"]["transcription"];
    let utterances: Vec<Utterance> =
        serde_json::from_value(transcription["utterances"].clone()).map_err(|err| {
            DubError::TranscriptionFailed(format!("unexpected utterance format: {err}"))
        })?;

    let language = transcription["languages"][0]
        .as_str()
        .or_else(|| utterances.first().map(|u| u.language.as_str()))
        .unwrap_or_default()
        .to_string();
    let summary = job["result"]["summarization"]["results"]
        .as_str()
        .map(str::to_string);

    Ok(Transcript {
        language,
        summary,
        utterances,
    })
}
