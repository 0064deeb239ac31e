//! Audio control gateway
//!
//! This module provides:
//! - The `AudioGateway` trait every other component talks to
//! - A `pactl`/`parecord` backed implementation for PipeWire and PulseAudio
//! - Parsers for the textual output of the control interface

mod level;
mod pactl;
mod parse;

#[cfg(test)]
pub mod fake;

pub use pactl::PactlGateway;

use serde::Serialize;

/// Tag embedded into every loopback module this application loads.
///
/// The crash recovery sweep only ever unloads modules carrying it.
pub const LOOPBACK_TAG: &str = "application.id=mic-monitor.loopback";

/// A discoverable audio input endpoint as reported by the audio server
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Source {
    /// Stable identifier assigned by the server (the source name)
    pub id: String,
    /// Human-readable label, deduplicated by the registry
    pub display_name: String,
    /// Whether this is the current system default input
    pub is_default: bool,
}

/// Opaque handle returned by the server when a loopback route is created
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ModuleHandle(pub u32);

impl std::fmt::Display for ModuleHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Successful outcome of tearing a loopback route down
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Teardown {
    Removed,
    /// The server no longer knew the module; still a clean removal
    NotFound,
}

/// Failures of the external control interface
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The control tool could not be run or the daemon is not reachable.
    #[error("audio server unavailable: {0}")]
    Unavailable(String),

    /// The control tool produced output we could not make sense of.
    #[error("unexpected output from {command}: {detail}")]
    Parse { command: String, detail: String },

    /// The control tool ran but rejected the request.
    #[error("{command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },
}

impl GatewayError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, GatewayError::Unavailable(_))
    }

    pub fn is_parse(&self) -> bool {
        matches!(self, GatewayError::Parse { .. })
    }
}

/// Contract with the external audio server.
///
/// Every call blocks the calling thread until the server answers or the
/// call times out.
pub trait AudioGateway {
    /// All input sources, in server order. Sink monitors are excluded.
    fn list_sources(&self) -> Result<Vec<Source>, GatewayError>;

    /// Identifier of the current default input source.
    fn default_source_id(&self) -> Result<String, GatewayError>;

    /// Load a tagged loopback from `source_id` to the default output.
    fn create_loopback(
        &self,
        source_id: &str,
        latency_ms: u32,
    ) -> Result<ModuleHandle, GatewayError>;

    /// Unload a loopback previously created with `create_loopback`.
    fn destroy_loopback(&self, handle: ModuleHandle) -> Result<Teardown, GatewayError>;

    /// Handles of every live loopback module carrying [`LOOPBACK_TAG`].
    fn tagged_loopbacks(&self) -> Result<Vec<ModuleHandle>, GatewayError>;

    fn is_muted(&self, source_id: &str) -> Result<bool, GatewayError>;

    /// RMS level of a short recent sample, on the 0-32768 scale.
    fn level(&self, source_id: &str) -> Result<f32, GatewayError>;
}
