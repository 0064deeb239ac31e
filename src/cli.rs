//! Command-line interface for Mic Monitor
//!
//! Handles argument parsing and logging configuration.

use clap::Parser;
use log::LevelFilter;
use std::path::PathBuf;
use std::time::Duration;

/// Mic Monitor - hear your microphone through your headphones
#[derive(Parser, Debug)]
#[command(name = "mic-monitor")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Increase logging verbosity
    /// -v = info, -vv = debug, -vvv = trace (includes every pactl call)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    pub quiet: bool,

    /// Config file (default: ~/.config/mic-monitor.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Interval between activity/mute polls, in milliseconds
    #[arg(long, default_value_t = 250, value_parser = clap::value_parser!(u64).range(50..=5000))]
    pub poll_interval_ms: u64,

    /// Write render models to stdout as JSON lines
    #[arg(long)]
    pub json: bool,

    /// Start with left-click toggling enabled
    #[arg(long)]
    pub left_click_toggle: bool,
}

impl Args {
    /// Get the log level filter based on verbosity flags
    pub fn log_level(&self) -> LevelFilter {
        if self.quiet {
            LevelFilter::Error
        } else {
            match self.verbose {
                0 => LevelFilter::Warn,
                1 => LevelFilter::Info,
                2 => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            }
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Initialize the logging system based on CLI arguments
pub fn init_logging(args: &Args) {
    let mut builder = env_logger::Builder::new();

    // Base level for all modules - keep at warn to suppress noisy deps
    builder.filter_level(LevelFilter::Warn);

    builder.filter_module("mic_monitor", args.log_level());

    // Logs go to stderr so stdout stays free for JSON output
    builder.target(env_logger::Target::Stderr);

    builder.format_timestamp_millis().init();
}
