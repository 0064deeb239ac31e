//! Render model handed to the presentation layer

use crate::registry::Snapshot;
use crate::routes::RouteManager;
use crate::settings::{Colors, Rgba};
use serde::Serialize;

/// Label of the pinned entry that follows the system default source
pub const DEFAULT_ENTRY_LABEL: &str = "Default (System Default)";

/// One toggleable menu entry
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MenuEntry {
    pub source_id: String,
    pub display_name: String,
    pub is_monitored: bool,
    /// The pinned entry for the current default source
    pub is_default_entry: bool,
}

/// Icon state: activity x loopback x mute
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct IconState {
    /// Audio above threshold on an unmuted default source
    pub active: bool,
    pub loopback_on: bool,
    pub muted: bool,
}

/// How the tray icon should be drawn
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct IconStyle {
    pub mic: Rgba,
    /// Diagonal slash through the mic body
    pub slash: Option<Rgba>,
    /// Dot badge in the top-right corner
    pub badge: Option<Rgba>,
}

impl IconState {
    pub fn style(&self, colors: &Colors) -> IconStyle {
        IconStyle {
            mic: if self.active && !self.muted {
                colors.active
            } else {
                colors.inactive
            },
            slash: self.muted.then_some(colors.accent),
            badge: self.loopback_on.then_some(colors.accent),
        }
    }
}

/// Everything the presentation layer needs to draw the tray
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RenderModel {
    pub entries: Vec<MenuEntry>,
    pub icon: IconState,
    pub icon_style: IconStyle,
    pub tooltip: String,
    pub monitored_count: usize,
    pub left_click_toggle: bool,
    /// The source list could not be refreshed and may be outdated
    pub stale: bool,
}

pub fn tooltip(monitored_count: usize) -> String {
    if monitored_count > 0 {
        format!("Mic Monitor: ON ({} active)", monitored_count)
    } else {
        "Mic Monitor: OFF".to_string()
    }
}

/// Menu entries: the pinned default first, then every other source
pub fn menu_entries(snapshot: &Snapshot, routes: &RouteManager) -> Vec<MenuEntry> {
    let mut entries = Vec::with_capacity(snapshot.sources.len() + 1);

    if let Some(default) = snapshot.default_source() {
        entries.push(MenuEntry {
            source_id: default.id.clone(),
            display_name: DEFAULT_ENTRY_LABEL.to_string(),
            is_monitored: routes.is_enabled(&default.id),
            is_default_entry: true,
        });
    }

    entries.extend(snapshot.sources.iter().filter(|s| !s.is_default).map(|s| MenuEntry {
        source_id: s.id.clone(),
        display_name: s.display_name.clone(),
        is_monitored: routes.is_enabled(&s.id),
        is_default_entry: false,
    }));

    entries
}
