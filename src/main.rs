//! Mic Monitor - hear your own microphone through your headphones
//!
//! This is the main entry point for the Mic Monitor tray utility.

mod cli;
mod gateway;
mod monitor;
mod poller;
mod presenter;
mod registry;
mod render;
mod routes;
mod settings;

use anyhow::Context;
use clap::Parser;
use gateway::PactlGateway;
use log::info;
use monitor::{Monitor, MonitorOptions, Presenter};
use presenter::{JsonPresenter, LogPresenter};
use settings::Config;

fn main() -> anyhow::Result<()> {
    // Parse command-line arguments and initialize logging
    let args = cli::Args::parse();
    cli::init_logging(&args);

    info!("Starting Mic Monitor");

    let config_path = args.config.clone().unwrap_or_else(Config::default_path);
    let config = Config::load_or_create(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let options = MonitorOptions {
        poll_interval: args.poll_interval(),
        left_click_toggle: args.left_click_toggle,
    };

    let mut presenter: Box<dyn Presenter> = if args.json {
        Box::new(JsonPresenter::stdout())
    } else {
        Box::new(LogPresenter)
    };

    let mut monitor = Monitor::new(PactlGateway::new(), config, options);
    monitor
        .start(presenter.as_mut())
        .context("Audio server not reachable, is PipeWire or PulseAudio running?")?;

    let (tx, rx) = crossbeam_channel::unbounded();
    presenter::spawn_stdin_reader(tx);

    monitor.run(rx, presenter.as_mut());
    info!("Mic Monitor stopped");
    Ok(())
}
