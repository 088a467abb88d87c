//! Command-line surface of the controller.

use clap::Parser;

/// Sentinel path selecting the controller's own standard streams.
pub const STD_STREAM: &str = "--";

const HELP_TAIL: &str = "\
Supported audio APIs:
  dsound (DirectSound)
Supported audio formats:
  wav (RIFF WAVE)
  pcm (raw PCM)
Sampling information (frequency, bit depth, channels) depend on the output of the target application.";

/// Records audio output from another application.
#[derive(Debug, Parser)]
#[command(name = "recc", about = "Records audio output from another application.", after_help = HELP_TAIL)]
pub struct Cli {
    /// Process ID of the target application.
    #[arg(short, long, value_name = "number")]
    pub pid: Option<u32>,

    /// Window title (or part of it) of a target application. Overrides --pid.
    #[arg(short, long, value_name = "text")]
    pub window: Option<String>,

    /// The audio API to hook inside the target.
    #[arg(short, long, value_name = "text", default_value = "dsound")]
    pub api: String,

    /// Output wave file. Use -- for stdout.
    #[arg(
        short,
        long,
        value_name = "path",
        default_value = "./rec.wav",
        allow_hyphen_values = true
    )]
    pub output: String,

    /// Output log file. Use -- for stderr.
    #[arg(
        short,
        long,
        value_name = "path",
        default_value = "--",
        allow_hyphen_values = true
    )]
    pub log: String,

    /// Output format.
    #[arg(short, long, value_name = "text", default_value = "wav")]
    pub format: String,
}

impl Cli {
    /// Whether a target was named at all; without one the controller
    /// prints help and exits cleanly.
    pub fn has_target(&self) -> bool {
        self.pid.is_some() || self.window.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_surface() {
        let cli = Cli::try_parse_from(["recc"]).expect("parse");
        assert!(!cli.has_target());
        assert_eq!(cli.api, "dsound");
        assert_eq!(cli.output, "./rec.wav");
        assert_eq!(cli.log, STD_STREAM);
        assert_eq!(cli.format, "wav");
    }

    #[test]
    fn window_and_pid_select_a_target() {
        let cli = Cli::try_parse_from(["recc", "-w", "foo"]).expect("parse");
        assert!(cli.has_target());
        assert_eq!(cli.window.as_deref(), Some("foo"));

        let cli = Cli::try_parse_from(["recc", "--pid", "4242"]).expect("parse");
        assert_eq!(cli.pid, Some(4242));
    }

    #[test]
    fn double_dash_is_a_legal_stream_value() {
        let cli = Cli::try_parse_from(["recc", "-p", "1", "--output", "--", "-f", "pcm"])
            .expect("parse");
        assert_eq!(cli.output, STD_STREAM);
        assert_eq!(cli.format, "pcm");
    }
}
