//! Reconciliation loop
//!
//! Serializes every command against the audio server: the startup sweep,
//! user intents and the periodic poll all run on the thread that owns the
//! `Monitor`.

use crate::gateway::AudioGateway;
use crate::poller::{ActivityPoller, AudioState, Poll};
use crate::registry::SourceRegistry;
use crate::render::{self, IconState, RenderModel};
use crate::routes::RouteManager;
use crate::settings::Config;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::{debug, info, warn};
use std::time::{Duration, Instant};

/// Discrete requests from the presentation layer
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Intent {
    ToggleSource(String),
    RefreshSources,
    SetDefaultMonitoring(bool),
    /// Tray icon left-click
    Activate,
    /// Flip the left-click toggle setting
    ToggleLeftClick,
    Quit,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    Starting,
    Idle,
    Refreshing,
    ShuttingDown,
}

/// Whether the loop should keep running after an intent
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// Receives render models and transient notices
pub trait Presenter {
    fn render(&mut self, model: &RenderModel);

    /// A failure the user should briefly see
    fn notice(&mut self, message: &str);
}

/// Runtime options for the loop
#[derive(Clone, Debug)]
pub struct MonitorOptions {
    pub poll_interval: Duration,
    pub left_click_toggle: bool,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            left_click_toggle: false,
        }
    }
}

pub struct Monitor<G: AudioGateway> {
    gateway: G,
    state: LoopState,
    registry: SourceRegistry,
    routes: RouteManager,
    poller: ActivityPoller,
    config: Config,
    options: MonitorOptions,
    audio: AudioState,
    /// Cleared while the server is unreachable, so the notice is sent once
    server_reachable: bool,
    /// Default source id the sources were last reconciled against
    last_default: Option<String>,
    last_model: Option<RenderModel>,
}

impl<G: AudioGateway> Monitor<G> {
    pub fn new(gateway: G, config: Config, options: MonitorOptions) -> Self {
        Self {
            gateway,
            state: LoopState::Starting,
            registry: SourceRegistry::new(),
            routes: RouteManager::new(config.latency_ms),
            poller: ActivityPoller::new(config.threshold as f32),
            config,
            options,
            audio: AudioState::default(),
            server_reachable: true,
            last_default: None,
            last_model: None,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> LoopState {
        self.state
    }

    #[cfg(test)]
    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    #[cfg(test)]
    pub fn routes(&self) -> &RouteManager {
        &self.routes
    }

    /// Sweep orphaned routes, then take the first source snapshot.
    ///
    /// An unreachable server is fatal here: nothing else may talk to the
    /// server before the sweep completes. Unparseable output is logged and
    /// startup continues with whatever could be read.
    pub fn start(&mut self, presenter: &mut dyn Presenter) -> anyhow::Result<()> {
        use anyhow::Context;

        self.state = LoopState::Starting;
        match self.routes.crash_recovery_sweep(&self.gateway) {
            Ok(_) => {}
            Err(e) if e.is_parse() => warn!("Skipping crash recovery sweep: {}", e),
            Err(e) => return Err(e).context("crash recovery sweep failed"),
        }
        match self.registry.refresh(&self.gateway) {
            Ok(snapshot) => {
                self.last_default = snapshot.default_source().map(|s| s.id.clone());
            }
            Err(e) if e.is_parse() => warn!("Starting without a source list: {}", e),
            Err(e) => return Err(e).context("could not list audio sources"),
        }

        self.state = LoopState::Idle;
        info!(
            "Ready with {} source(s)",
            self.registry.snapshot().sources.len()
        );
        self.tick(presenter);
        Ok(())
    }

    /// Dispatch intents and poll until `Quit` arrives
    pub fn run(&mut self, intents: Receiver<Intent>, presenter: &mut dyn Presenter) {
        let mut intents = intents;
        let mut next_tick = Instant::now() + self.options.poll_interval;

        loop {
            let wait = next_tick.saturating_duration_since(Instant::now());
            match intents.recv_timeout(wait) {
                Ok(intent) => {
                    if self.handle(intent, presenter) == Flow::Exit {
                        return;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    self.tick(presenter);
                    next_tick = Instant::now() + self.options.poll_interval;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    debug!("Intent source closed, polling only");
                    intents = crossbeam_channel::never();
                }
            }
        }
    }

    /// Apply one user intent
    pub fn handle(&mut self, intent: Intent, presenter: &mut dyn Presenter) -> Flow {
        if self.state == LoopState::ShuttingDown {
            return Flow::Exit;
        }
        debug!("Handling {:?}", intent);

        match intent {
            Intent::ToggleSource(source_id) => self.toggle(&source_id, presenter),
            Intent::RefreshSources => self.refresh(presenter),
            Intent::SetDefaultMonitoring(on) => self.set_default_monitoring(on, presenter),
            Intent::Activate => self.activate(presenter),
            Intent::ToggleLeftClick => {
                self.options.left_click_toggle = !self.options.left_click_toggle;
            }
            Intent::Quit => {
                self.shutdown(presenter);
                return Flow::Exit;
            }
        }

        self.present(presenter);
        Flow::Continue
    }

    /// Poll level and mute of the default source
    pub fn tick(&mut self, presenter: &mut dyn Presenter) {
        self.state = LoopState::Refreshing;

        match self.poller.poll(&self.gateway) {
            Ok(Poll::Sample { source_id, state }) => {
                self.mark_reachable();
                self.audio = state;
                if self.last_default.as_deref() != Some(source_id.as_str()) {
                    info!("Default source changed to {}", source_id);
                    if self.reconcile_sources(presenter) {
                        self.last_default = Some(source_id);
                    }
                }
            }
            Ok(Poll::NoData) => self.mark_reachable(),
            Err(e) => self.mark_unreachable(&e.to_string(), presenter),
        }

        self.state = LoopState::Idle;
        self.present(presenter);
    }

    /// Disable every route and stop
    pub fn shutdown(&mut self, presenter: &mut dyn Presenter) {
        self.state = LoopState::ShuttingDown;
        let report = self.routes.disable_all(&self.gateway);
        info!(
            "Shutting down: removed {} loopback(s), {} failed",
            report.removed,
            report.failed.len()
        );
        self.present(presenter);
    }

    pub fn render_model(&self) -> RenderModel {
        let snapshot = self.registry.snapshot();
        let monitored_count = self.routes.count();
        let icon = IconState {
            active: self.audio.is_active(self.poller.threshold()),
            loopback_on: monitored_count > 0,
            muted: self.audio.is_muted,
        };
        RenderModel {
            entries: render::menu_entries(snapshot, &self.routes),
            icon,
            icon_style: icon.style(&self.config.colors),
            tooltip: render::tooltip(monitored_count),
            monitored_count,
            left_click_toggle: self.options.left_click_toggle,
            stale: snapshot.stale,
        }
    }

    fn present(&mut self, presenter: &mut dyn Presenter) {
        let model = self.render_model();
        if self.last_model.as_ref() != Some(&model) {
            presenter.render(&model);
            self.last_model = Some(model);
        }
    }

    fn refresh(&mut self, presenter: &mut dyn Presenter) {
        self.state = LoopState::Refreshing;
        self.reconcile_sources(presenter);
        self.state = LoopState::Idle;
    }

    /// Re-list sources and drop routes whose source went away.
    ///
    /// Returns `false` if the listing failed and the old snapshot was kept.
    fn reconcile_sources(&mut self, presenter: &mut dyn Presenter) -> bool {
        match self.registry.refresh(&self.gateway) {
            Ok(_) => {
                self.mark_reachable();
                let registry = &self.registry;
                self.routes
                    .retain_present(&self.gateway, |id| registry.snapshot().contains(id));
                true
            }
            Err(e) if e.is_unavailable() => {
                self.mark_unreachable(&e.to_string(), presenter);
                false
            }
            Err(e) => {
                debug!("Keeping previous sources: {}", e);
                false
            }
        }
    }

    fn toggle(&mut self, source_id: &str, presenter: &mut dyn Presenter) {
        if self.routes.is_enabled(source_id) {
            if let Err(e) = self.routes.disable(&self.gateway, source_id) {
                presenter.notice(&format!("Loopback for {} may still be active: {}", source_id, e));
            }
            return;
        }

        if !self.registry.snapshot().contains(source_id) {
            debug!("Ignoring toggle for unknown source {}", source_id);
            return;
        }
        if let Err(e) = self.routes.enable(&self.gateway, source_id) {
            warn!("{}", e);
            presenter.notice(&e.to_string());
        }
    }

    fn default_source_id(&self) -> Option<String> {
        match self.gateway.default_source_id() {
            Ok(id) => Some(id),
            Err(e) => {
                debug!("Falling back to cached default source: {}", e);
                self.registry.snapshot().default_source().map(|s| s.id.clone())
            }
        }
    }

    fn set_default_monitoring(&mut self, on: bool, presenter: &mut dyn Presenter) {
        let Some(default_id) = self.default_source_id() else {
            presenter.notice("No default input source");
            return;
        };

        if on {
            if !self.registry.snapshot().contains(&default_id) {
                self.reconcile_sources(presenter);
            }
            if !self.registry.snapshot().contains(&default_id) {
                warn!("Default source {} is not a listed input", default_id);
                presenter.notice(&format!("{} is not an input that can be monitored", default_id));
                return;
            }
            if let Err(e) = self.routes.enable(&self.gateway, &default_id) {
                warn!("{}", e);
                presenter.notice(&e.to_string());
            }
        } else if let Err(e) = self.routes.disable(&self.gateway, &default_id) {
            presenter.notice(&format!("Loopback for {} may still be active: {}", default_id, e));
        }
    }

    /// Left-click: turn everything off if anything is on, else monitor the default
    fn activate(&mut self, presenter: &mut dyn Presenter) {
        if !self.options.left_click_toggle {
            return;
        }
        if self.routes.count() > 0 {
            let report = self.routes.disable_all(&self.gateway);
            if !report.failed.is_empty() {
                presenter.notice(&format!(
                    "{} loopback(s) may still be active",
                    report.failed.len()
                ));
            }
        } else {
            self.set_default_monitoring(true, presenter);
        }
    }

    fn mark_reachable(&mut self) {
        if !self.server_reachable {
            info!("Audio server reachable again");
            self.server_reachable = true;
        }
    }

    fn mark_unreachable(&mut self, reason: &str, presenter: &mut dyn Presenter) {
        if self.server_reachable {
            warn!("Audio server unreachable: {}", reason);
            presenter.notice("Audio server unavailable");
            self.server_reachable = false;
        }
    }
}
