mod common;
mod dub;
mod ui;

use clap::Parser;
use std::path::PathBuf;

use crate::dub::cli::DubCommands;
use crate::ui::prelude::*;
use crate::ui::{OutputFormat, Renderer};

/// Dub recordings into another language while keeping the original timing
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Activate debug mode
    #[arg(short, long, global = true)]
    debug: bool,

    /// Output format for messages
    #[arg(long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    output: OutputFormat,

    /// Use this config file instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: DubCommands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    ui::init(Renderer {
        format: cli.output,
        color: cli.output == OutputFormat::Text,
        debug: cli.debug,
    });

    if let Err(err) = dub::commands::handle_dub_command(cli.command, cli.config).await {
        emit(Level::Error, "dub.error", &format!("{err:#}"), None);
        std::process::exit(1);
    }
}
