//! Activity and mute poller
//!
//! Samples the default source's level and mute flag once per tick. Each tick
//! is independent of the last; there is no smoothing.

use crate::gateway::{AudioGateway, GatewayError};
use log::{trace, warn};
use serde::Serialize;

/// Audio state of the default source for one tick
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct AudioState {
    pub level: f32,
    pub is_muted: bool,
}

impl AudioState {
    /// Whether this state should be displayed as active
    pub fn is_active(&self, threshold: f32) -> bool {
        is_active(self.level, self.is_muted, threshold)
    }
}

/// Level at or above `threshold` is active, unless muted
pub fn is_active(level: f32, muted: bool, threshold: f32) -> bool {
    !muted && level >= threshold
}

/// Outcome of one poll
#[derive(Debug)]
pub enum Poll {
    /// Fresh state for the given source
    Sample { source_id: String, state: AudioState },
    /// Nothing usable this tick, keep the previous state
    NoData,
}

pub struct ActivityPoller {
    threshold: f32,
}

impl ActivityPoller {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Sample the current default source.
    ///
    /// Parse errors are logged and reported as `NoData`; an unreachable
    /// server is returned to the caller.
    pub fn poll(&self, gateway: &dyn AudioGateway) -> Result<Poll, GatewayError> {
        match self.sample(gateway) {
            Ok(poll) => Ok(poll),
            Err(e) if e.is_unavailable() => Err(e),
            Err(e) => {
                warn!("Ignoring poll this tick: {}", e);
                Ok(Poll::NoData)
            }
        }
    }

    fn sample(&self, gateway: &dyn AudioGateway) -> Result<Poll, GatewayError> {
        let source_id = gateway.default_source_id()?;
        let is_muted = gateway.is_muted(&source_id)?;
        let level = gateway.level(&source_id)?;
        trace!("{}: level {:.0}, muted {}", source_id, level, is_muted);
        Ok(Poll::Sample {
            source_id,
            state: AudioState { level, is_muted },
        })
    }
}
