pub mod adaptation;
pub mod audio;
pub mod cli;
pub mod commands;
pub mod config;
pub mod duration;
pub mod error;
pub mod formatter;
pub mod language;
pub mod pipeline;
pub mod rewrite;
pub mod segment;
pub mod speech;
pub mod support;
pub mod timeline;
pub mod transcription;

#[cfg(test)]
pub(crate) mod test_support;
