use anyhow::{Context, Result};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::common::paths;
use crate::ui::prelude::*;

use super::audio::FfmpegBackend;
use super::cli::{AssembleArgs, ConfigCommands, DubArgs, DubCommands, FormatArgs};
use super::config::DubConfig;
use super::formatter::SegmentFormatter;
use super::pipeline::{self, DubOptions, ManifestEntry, Services};
use super::rewrite::OpenAiRewriter;
use super::speech::{ElevenLabsSynthesizer, VoiceCloner};
use super::transcription::{self, GladiaTranscriber, Transcriber};

pub async fn handle_dub_command(command: DubCommands, config_path: Option<PathBuf>) -> Result<()> {
    match command {
        DubCommands::Dub(args) => handle_dub(args, load_config(config_path.as_deref())?).await,
        DubCommands::Format(args) => handle_format(args, load_config(config_path.as_deref())?),
        DubCommands::Assemble(args) => {
            handle_assemble(args, load_config(config_path.as_deref())?).await
        }
        DubCommands::Config { command } => handle_config(command, config_path),
    }
}

fn load_config(path: Option<&Path>) -> Result<DubConfig> {
    match path {
        Some(path) => DubConfig::load_from_path(path),
        None => DubConfig::load(),
    }
}

async fn handle_dub(args: DubArgs, mut config: DubConfig) -> Result<()> {
    if args.transcript.is_none() && !args.input.exists() {
        anyhow::bail!("Input file not found: {}", args.input.display());
    }
    if let Some(voice) = &args.voice {
        config.default_voice = Some(voice.clone());
    }
    if args.no_clone {
        config.elevenlabs.clone_voices = false;
    }
    let target_language = args
        .target_language
        .clone()
        .unwrap_or_else(|| config.target_language.clone());

    let output = args
        .out_file
        .clone()
        .unwrap_or_else(|| default_output_path(&args.input, &target_language));
    if output.exists() && !args.force {
        anyhow::bail!(
            "{} already exists. Use --force to overwrite",
            output.display()
        );
    }

    let elevenlabs_key = api_key(args.elevenlabs_key.as_ref(), &config.elevenlabs.api_key)
        .context("An ElevenLabs API key is required (--elevenlabs-key or [elevenlabs] api_key)")?;
    let openai_key = api_key(args.openai_key.as_ref(), &config.openai.api_key)
        .context("An OpenAI API key is required (--openai-key or [openai] api_key)")?;

    let transcriber: Option<Box<dyn Transcriber>> = if args.transcript.is_some() {
        None
    } else {
        let key = api_key(args.gladia_key.as_ref(), &config.gladia.api_key).context(
            "A Gladia API key is required to transcribe (--gladia-key, [gladia] api_key or --transcript)",
        )?;
        Some(Box::new(
            GladiaTranscriber::new(&config.gladia, key).with_speakers(args.speakers),
        ))
    };

    let services = Services {
        backend: Arc::new(FfmpegBackend::discover()?),
        transcriber,
        rewriter: Box::new(OpenAiRewriter::new(&config.openai, openai_key)),
        synthesizer: Box::new(ElevenLabsSynthesizer::new(
            &config.elevenlabs,
            elevenlabs_key.clone(),
        )),
        cloner: config.elevenlabs.clone_voices.then(|| {
            Box::new(ElevenLabsSynthesizer::new(&config.elevenlabs, elevenlabs_key))
                as Box<dyn VoiceCloner>
        }),
    };
    let options = DubOptions {
        input: args.input,
        output,
        transcript: args.transcript,
        source_language: args.source_language,
        target_language,
        summary: args.summary,
        skip_translation: args.no_translate,
        report: args.report,
    };

    let report = pipeline::run(&config, &services, &options).await?;

    let out_of_band = report.out_of_band(&config);
    if out_of_band > 0 {
        emit(
            Level::Warn,
            "dub.report.out_of_band",
            &format!("{out_of_band} segments are still outside the timing tolerance"),
            None,
        );
    }
    emit(
        Level::Success,
        "dub.done",
        &format!(
            "Dubbed {} segments into {}",
            report.segments.len(),
            report.output.display()
        ),
        Some(json!({
            "output": report.output.display().to_string(),
            "segments": report.segments.len(),
            "duration": report.duration,
        })),
    );
    Ok(())
}

fn handle_format(args: FormatArgs, config: DubConfig) -> Result<()> {
    let transcript = transcription::load_transcript(&args.transcript)
        .with_context(|| format!("loading transcript {}", args.transcript.display()))?;
    let language = args.language.unwrap_or(transcript.language);

    let segments = SegmentFormatter::new(config.formatter).format(&transcript.utterances, &language)?;
    let json = serde_json::to_string_pretty(&segments).context("serializing segments")?;

    match args.out_file {
        Some(path) => {
            std::fs::write(&path, json)
                .with_context(|| format!("writing segments to {}", path.display()))?;
            emit(
                Level::Success,
                "dub.format.written",
                &format!("Wrote {} segments to {}", segments.len(), path.display()),
                Some(json!({ "segments": segments.len() })),
            );
        }
        None => println!("{json}"),
    }
    Ok(())
}

async fn handle_assemble(args: AssembleArgs, config: DubConfig) -> Result<()> {
    let contents = std::fs::read_to_string(&args.manifest)
        .with_context(|| format!("reading manifest {}", args.manifest.display()))?;
    let mut entries: Vec<ManifestEntry> =
        serde_json::from_str(&contents).context("parsing manifest")?;

    // Clip paths are relative to the manifest
    let base = args.manifest.parent().map(Path::to_path_buf).unwrap_or_default();
    for entry in &mut entries {
        if entry.path.is_relative() {
            entry.path = base.join(&entry.path);
        }
    }

    let backend = Arc::new(FfmpegBackend::discover()?);
    let duration = pipeline::assemble_manifest(&config, backend, &entries, &args.out_file).await?;
    emit(
        Level::Success,
        "dub.assemble.done",
        &format!(
            "Assembled {} clips ({duration:.2}s) into {}",
            entries.len(),
            args.out_file.display()
        ),
        None,
    );
    Ok(())
}

fn handle_config(command: ConfigCommands, config_path: Option<PathBuf>) -> Result<()> {
    let path = match config_path {
        Some(path) => path,
        None => paths::default_config_path()?,
    };
    match command {
        ConfigCommands::Path => {
            emit(
                Level::Info,
                "dub.config.path",
                &path.display().to_string(),
                Some(json!({ "path": path.display().to_string() })),
            );
        }
        ConfigCommands::Show => {
            let config = DubConfig::load_from_path(&path)?;
            let toml = toml::to_string_pretty(&config).context("serializing config")?;
            println!("{toml}");
        }
    }
    Ok(())
}

fn api_key(flag: Option<&String>, configured: &Option<String>) -> Option<String> {
    flag.or(configured.as_ref())
        .map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty())
}

fn default_output_path(input: &Path, target_language: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let suffix: String = target_language
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .collect::<String>()
        .to_lowercase();
    input.with_file_name(format!("{stem}.dub-{suffix}.wav"))
}
