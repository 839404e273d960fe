use clap::{Args, Subcommand, ValueHint};
use std::path::PathBuf;

#[derive(Subcommand, Debug, Clone)]
pub enum DubCommands {
    /// Dub an audio or video file into another language
    Dub(DubArgs),
    /// Turn a transcript JSON file into timed segments
    Format(FormatArgs),
    /// Place existing audio clips on a timeline from a JSON manifest
    Assemble(AssembleArgs),
    /// Inspect or initialize the configuration file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Args, Debug, Clone)]
pub struct DubArgs {
    /// Source audio or video file
    #[arg(value_hint = ValueHint::FilePath)]
    pub input: PathBuf,

    /// Output audio file; the extension selects the encoding
    #[arg(short = 'o', long = "out-file", value_hint = ValueHint::FilePath)]
    pub out_file: Option<PathBuf>,

    /// Language to dub into (defaults to target_language from the config)
    #[arg(short = 't', long = "target")]
    pub target_language: Option<String>,

    /// Language spoken in the source, overrides detection
    #[arg(long = "source")]
    pub source_language: Option<String>,

    /// Use an existing transcript instead of transcribing the input
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub transcript: Option<PathBuf>,

    /// Number of speakers, when known
    #[arg(long)]
    pub speakers: Option<u32>,

    /// Short description of the recording given to the translator
    #[arg(long)]
    pub summary: Option<String>,

    /// The transcript is already in the target language
    #[arg(long)]
    pub no_translate: bool,

    /// Write a JSON report of every segment's timing
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub report: Option<PathBuf>,

    /// Voice for speakers without an entry under [voices]
    #[arg(long)]
    pub voice: Option<String>,

    /// Fail instead of cloning voices for speakers without a configured voice
    #[arg(long)]
    pub no_clone: bool,

    /// ElevenLabs API key, overrides the config
    #[arg(long)]
    pub elevenlabs_key: Option<String>,

    /// OpenAI API key, overrides the config
    #[arg(long)]
    pub openai_key: Option<String>,

    /// Gladia API key, overrides the config
    #[arg(long)]
    pub gladia_key: Option<String>,

    /// Overwrite the output file if it exists
    #[arg(long)]
    pub force: bool,
}

#[derive(Args, Debug, Clone)]
pub struct FormatArgs {
    /// Transcript JSON (Gladia response, transcript or utterance array)
    #[arg(value_hint = ValueHint::FilePath)]
    pub transcript: PathBuf,

    /// Language of the transcript, overrides the detected one
    #[arg(long)]
    pub language: Option<String>,

    /// Write segments here instead of stdout
    #[arg(short = 'o', long = "out-file", value_hint = ValueHint::FilePath)]
    pub out_file: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct AssembleArgs {
    /// JSON array of {path, begin, end, speaker}
    #[arg(value_hint = ValueHint::FilePath)]
    pub manifest: PathBuf,

    /// Output audio file
    #[arg(short = 'o', long = "out-file", value_hint = ValueHint::FilePath)]
    pub out_file: PathBuf,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommands {
    /// Print the config file location
    Path,
    /// Print the effective configuration
    Show,
}
