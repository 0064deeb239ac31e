//! Source registry
//!
//! Holds the latest snapshot of input sources with stable, unique labels.

use crate::gateway::{AudioGateway, GatewayError, Source};
use log::{debug, warn};
use std::collections::HashMap;

/// Result of the latest refresh
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Snapshot {
    pub sources: Vec<Source>,
    /// Set when the last refresh failed and `sources` is from an earlier one
    pub stale: bool,
}

impl Snapshot {
    pub fn contains(&self, source_id: &str) -> bool {
        self.sources.iter().any(|s| s.id == source_id)
    }

    pub fn default_source(&self) -> Option<&Source> {
        self.sources.iter().find(|s| s.is_default)
    }
}

/// Registry of known input sources
#[derive(Debug, Default)]
pub struct SourceRegistry {
    snapshot: Snapshot,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Replace the snapshot with the server's current source list.
    ///
    /// On failure the previous snapshot is kept and marked stale; the error
    /// is returned so the caller can decide whether it matters.
    pub fn refresh(&mut self, gateway: &dyn AudioGateway) -> Result<&Snapshot, GatewayError> {
        match gateway.list_sources() {
            Ok(mut sources) => {
                dedupe_display_names(&mut sources);
                debug!("Registry refreshed: {} sources", sources.len());
                self.snapshot = Snapshot {
                    sources,
                    stale: false,
                };
                Ok(&self.snapshot)
            }
            Err(e) => {
                warn!("Source refresh failed, keeping last snapshot: {}", e);
                self.snapshot.stale = true;
                Err(e)
            }
        }
    }
}

/// Short stable tag derived from a source id (FNV-1a, 16 bits)
fn disambiguator(id: &str) -> String {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in id.bytes() {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    format!("{:04x}", (hash ^ (hash >> 16)) & 0xffff)
}

/// Suffix every label shared by two or more sources with a tag derived from
/// its id. Falls back to the full id if the tags collide.
pub fn dedupe_display_names(sources: &mut [Source]) {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for source in sources.iter() {
        *counts.entry(source.display_name.clone()).or_default() += 1;
    }

    let mut taken: HashMap<String, usize> = HashMap::new();
    for source in sources.iter_mut() {
        if counts.get(&source.display_name).copied().unwrap_or(0) < 2 {
            continue;
        }
        let label = format!("{} ({})", source.display_name, disambiguator(&source.id));
        *taken.entry(label.clone()).or_default() += 1;
        source.display_name = label;
    }

    for source in sources.iter_mut() {
        if taken.get(&source.display_name).copied().unwrap_or(0) > 1 {
            if let Some((base, _)) = source.display_name.rsplit_once(" (") {
                source.display_name = format!("{} ({})", base, source.id);
            }
        }
    }
}
