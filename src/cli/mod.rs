use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use crate::pipeline::{RunMode, StageKind};

#[derive(Parser, Debug)]
#[command(
    name = "video2note",
    about = "Turn videos into structured notes: download, transcribe, summarize and publish",
    version,
    long_about = "Runs the download, transcribe, summarize and publish stages against the source in the \
                  configuration file. Parts already on disk are not downloaded again, so an interrupted \
                  run can simply be started again."
)]
pub struct Cli {
    /// Configuration file (defaults to ./config.yaml, then the user config directory)
    #[arg(short, long, value_name = "FILE", env = "VIDEO2NOTE_CONFIG")]
    pub config: Option<PathBuf>,

    /// First stage to run
    #[arg(long, value_enum, default_value = "download")]
    pub from: StageArg,

    /// Last stage to run
    #[arg(long, value_enum, default_value = "publish")]
    pub to: StageArg,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub log_json: bool,
}

impl Cli {
    pub fn run_mode(&self) -> RunMode {
        RunMode::new(self.from.into(), self.to.into())
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum StageArg {
    Download,
    Transcribe,
    Summarize,
    Publish,
}

impl From<StageArg> for StageKind {
    fn from(arg: StageArg) -> Self {
        match arg {
            StageArg::Download => StageKind::Download,
            StageArg::Transcribe => StageKind::Transcribe,
            StageArg::Summarize => StageKind::Summarize,
            StageArg::Publish => StageKind::Publish,
        }
    }
}

impl std::fmt::Display for StageArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        StageKind::from(*self).fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_every_stage() {
        let cli = Cli::parse_from(["video2note"]);
        assert_eq!(cli.run_mode(), RunMode::full());
        assert!(!cli.log_json);
    }

    #[test]
    fn test_stage_range_flags() {
        let cli = Cli::parse_from(["video2note", "--from", "summarize", "--to", "summarize", "--log-json"]);
        assert_eq!(cli.run_mode(), RunMode::only(StageKind::Summarize));
        assert!(cli.log_json);
    }

    #[test]
    fn test_unknown_stage_is_rejected() {
        assert!(Cli::try_parse_from(["video2note", "--from", "upload"]).is_err());
    }
}
