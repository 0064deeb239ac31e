//! Presentation adapters
//!
//! The tray widget itself runs out of process. It receives render models as
//! JSON lines on stdout (or reads them from the log) and sends intents as
//! text commands on stdin.

use crate::monitor::{Intent, Presenter};
use crate::render::RenderModel;
use crossbeam_channel::Sender;
use log::{debug, info, warn};
use serde::Serialize;
use std::io::{self, BufRead, Write};
use std::thread;

/// Logs every render model change
#[derive(Default)]
pub struct LogPresenter;

impl Presenter for LogPresenter {
    fn render(&mut self, model: &RenderModel) {
        info!(
            "{} | icon active={} loopback={} muted={}{}",
            model.tooltip,
            model.icon.active,
            model.icon.loopback_on,
            model.icon.muted,
            if model.stale { " (stale)" } else { "" }
        );
        for entry in &model.entries {
            debug!(
                "  [{}] {} ({})",
                if entry.is_monitored { "x" } else { " " },
                entry.display_name,
                entry.source_id
            );
        }
    }

    fn notice(&mut self, message: &str) {
        warn!("{}", message);
    }
}

/// Line-delimited JSON messages written to stdout
#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Message<'a> {
    Render(&'a RenderModel),
    Notice { message: &'a str },
}

/// Writes every render model change as one JSON line
pub struct JsonPresenter<W: Write> {
    out: W,
}

impl JsonPresenter<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> JsonPresenter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    fn emit(&mut self, message: &Message<'_>) {
        let result = serde_json::to_string(message)
            .map_err(io::Error::from)
            .and_then(|line| writeln!(self.out, "{}", line))
            .and_then(|_| self.out.flush());
        if let Err(e) = result {
            warn!("Failed to write to presentation layer: {}", e);
        }
    }
}

impl<W: Write> Presenter for JsonPresenter<W> {
    fn render(&mut self, model: &RenderModel) {
        self.emit(&Message::Render(model));
    }

    fn notice(&mut self, message: &str) {
        self.emit(&Message::Notice { message });
    }
}

/// Parse one text command into an intent
pub fn parse_command(line: &str) -> Result<Intent, String> {
    let mut words = line.split_whitespace();
    let command = words.next().unwrap_or_default().to_ascii_lowercase();
    let argument = words.next();

    let intent = match (command.as_str(), argument) {
        ("toggle", Some(source_id)) => Intent::ToggleSource(source_id.to_string()),
        ("toggle", None) => return Err("toggle needs a source id".to_string()),
        ("refresh", _) => Intent::RefreshSources,
        ("default", Some("on")) => Intent::SetDefaultMonitoring(true),
        ("default", Some("off")) => Intent::SetDefaultMonitoring(false),
        ("default", _) => return Err("usage: default on|off".to_string()),
        ("click", _) => Intent::Activate,
        ("left-click", _) => Intent::ToggleLeftClick,
        ("quit", _) | ("exit", _) => Intent::Quit,
        (other, _) => return Err(format!("unknown command {:?}", other)),
    };
    Ok(intent)
}

/// Forward commands read from stdin until EOF or until the loop is gone
pub fn spawn_stdin_reader(tx: Sender<Intent>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else {
                break;
            };
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            match parse_command(trimmed) {
                Ok(intent) => {
                    if tx.send(intent).is_err() {
                        break;
                    }
                }
                Err(e) => warn!("Invalid command: {}", e),
            }
        }
        debug!("Stdin reader thread exiting");
    })
}
