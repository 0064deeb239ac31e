//! Loopback route manager
//!
//! Sole owner of the module handles this process creates. At most one
//! route exists per source id.

use crate::gateway::{AudioGateway, GatewayError, ModuleHandle, Teardown};
use log::{info, warn};
use serde::Serialize;
use std::collections::BTreeMap;

/// A live audio path from a source to the default output
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LoopbackRoute {
    pub source_id: String,
    pub module_handle: ModuleHandle,
    pub latency_ms: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("could not enable monitoring for {source_id}: {cause}")]
    Enable {
        source_id: String,
        #[source]
        cause: GatewayError,
    },
}

/// Outcome of a best-effort bulk teardown
#[derive(Debug, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub removed: usize,
    /// Routes whose destroy call failed; they are forgotten regardless
    pub failed: Vec<(String, ModuleHandle)>,
}

/// Owns the `source_id -> route` map
#[derive(Debug)]
pub struct RouteManager {
    routes: BTreeMap<String, LoopbackRoute>,
    latency_ms: u32,
}

impl RouteManager {
    pub fn new(latency_ms: u32) -> Self {
        Self {
            routes: BTreeMap::new(),
            latency_ms,
        }
    }

    pub fn is_enabled(&self, source_id: &str) -> bool {
        self.routes.contains_key(source_id)
    }

    pub fn count(&self) -> usize {
        self.routes.len()
    }

    /// Consistent copy of the current routes, ordered by source id
    #[cfg(test)]
    pub fn snapshot(&self) -> Vec<LoopbackRoute> {
        self.routes.values().cloned().collect()
    }

    /// Start monitoring `source_id`. Returns `true` if a route was created.
    pub fn enable(
        &mut self,
        gateway: &dyn AudioGateway,
        source_id: &str,
    ) -> Result<bool, RouteError> {
        if self.routes.contains_key(source_id) {
            return Ok(false);
        }

        let module_handle = gateway
            .create_loopback(source_id, self.latency_ms)
            .map_err(|cause| RouteError::Enable {
                source_id: source_id.to_string(),
                cause,
            })?;

        info!("Monitoring {} via loopback {}", source_id, module_handle);
        self.routes.insert(
            source_id.to_string(),
            LoopbackRoute {
                source_id: source_id.to_string(),
                module_handle,
                latency_ms: self.latency_ms,
            },
        );
        Ok(true)
    }

    /// Stop monitoring `source_id`. Returns `true` if a route was removed.
    ///
    /// The mapping is dropped even if the destroy call fails; the error is
    /// still returned so it can be reported.
    pub fn disable(
        &mut self,
        gateway: &dyn AudioGateway,
        source_id: &str,
    ) -> Result<bool, GatewayError> {
        let Some(route) = self.routes.remove(source_id) else {
            return Ok(false);
        };

        match gateway.destroy_loopback(route.module_handle)? {
            Teardown::Removed => {
                info!("Stopped monitoring {} ({})", source_id, route.module_handle)
            }
            Teardown::NotFound => info!(
                "Loopback {} for {} was already gone",
                route.module_handle, source_id
            ),
        }
        Ok(true)
    }

    /// Disable every route, continuing past individual failures
    pub fn disable_all(&mut self, gateway: &dyn AudioGateway) -> TeardownReport {
        let mut report = TeardownReport::default();
        for (source_id, route) in std::mem::take(&mut self.routes) {
            match gateway.destroy_loopback(route.module_handle) {
                Ok(_) => report.removed += 1,
                Err(e) => {
                    warn!(
                        "Failed to remove loopback {} for {}: {}",
                        route.module_handle, source_id, e
                    );
                    report.failed.push((source_id, route.module_handle));
                }
            }
        }
        report
    }

    /// Disable routes whose source is not in `present`; returns the dropped ids
    pub fn retain_present<F>(&mut self, gateway: &dyn AudioGateway, present: F) -> Vec<String>
    where
        F: Fn(&str) -> bool,
    {
        let vanished: Vec<String> = self
            .routes
            .keys()
            .filter(|id| !present(id.as_str()))
            .cloned()
            .collect();

        for source_id in &vanished {
            info!("Source {} disappeared, dropping its loopback", source_id);
            if let Err(e) = self.disable(gateway, source_id) {
                warn!("Failed to remove loopback for vanished {}: {}", source_id, e);
            }
        }
        vanished
    }

    /// Unload every tagged loopback left on the server.
    ///
    /// Runs once at startup before anything else touches the server. Returns
    /// the number of routes destroyed.
    pub fn crash_recovery_sweep(
        &mut self,
        gateway: &dyn AudioGateway,
    ) -> Result<usize, GatewayError> {
        let orphans = gateway.tagged_loopbacks()?;
        let mut destroyed = 0;
        for handle in orphans {
            match gateway.destroy_loopback(handle) {
                Ok(Teardown::Removed) => destroyed += 1,
                Ok(Teardown::NotFound) => {}
                Err(e) if e.is_unavailable() => return Err(e),
                Err(e) => warn!("Failed to remove orphaned loopback {}: {}", handle, e),
            }
        }
        if destroyed > 0 {
            info!("Removed {} orphaned loopback(s) from a previous run", destroyed);
        }
        self.routes.clear();
        Ok(destroyed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::fake::FakeGateway;

    fn setup() -> (FakeGateway, RouteManager) {
        (
            FakeGateway::with_sources(&[("mic_a", "Mic A"), ("mic_b", "Mic B")]),
            RouteManager::new(1),
        )
    }

    #[test]
    fn test_enable_twice_creates_one_route() {
        let (gateway, mut routes) = setup();
        assert!(routes.enable(&gateway, "mic_a").unwrap());
        assert!(!routes.enable(&gateway, "mic_a").unwrap());
        assert_eq!(gateway.creates.get(), 1);
        assert_eq!(gateway.loopbacks_for("mic_a"), 1);
        assert_eq!(routes.count(), 1);
    }

    #[test]
    fn test_disable_when_disabled_makes_no_calls() {
        let (gateway, mut routes) = setup();
        assert!(!routes.disable(&gateway, "mic_a").unwrap());
        assert_eq!(gateway.calls.get(), 0);
    }

    #[test]
    fn test_disable_removes_route() {
        let (gateway, mut routes) = setup();
        routes.enable(&gateway, "mic_a").unwrap();
        assert!(routes.disable(&gateway, "mic_a").unwrap());
        assert!(!routes.is_enabled("mic_a"));
        assert_eq!(gateway.loopbacks_for("mic_a"), 0);
    }

    #[test]
    fn test_disable_treats_not_found_as_success() {
        let (gateway, mut routes) = setup();
        routes.enable(&gateway, "mic_a").unwrap();
        gateway.modules.borrow_mut().clear();
        assert!(routes.disable(&gateway, "mic_a").unwrap());
        assert!(!routes.is_enabled("mic_a"));
    }

    #[test]
    fn test_disable_forgets_route_even_on_error() {
        let (gateway, mut routes) = setup();
        routes.enable(&gateway, "mic_a").unwrap();
        let handle = routes.snapshot()[0].module_handle;
        gateway.fail_destroy.borrow_mut().insert(handle.0);
        assert!(routes.disable(&gateway, "mic_a").is_err());
        assert!(!routes.is_enabled("mic_a"));
    }

    #[test]
    fn test_enable_failure_leaves_source_disabled() {
        let (gateway, mut routes) = setup();
        gateway.reject_create.set(true);
        assert!(routes.enable(&gateway, "mic_a").is_err());
        assert!(!routes.is_enabled("mic_a"));
        assert_eq!(routes.count(), 0);
    }

    #[test]
    fn test_disable_all_is_best_effort() {
        let (gateway, mut routes) = setup();
        routes.enable(&gateway, "mic_a").unwrap();
        routes.enable(&gateway, "mic_b").unwrap();
        let handle_a = routes.snapshot()[0].module_handle;
        gateway.fail_destroy.borrow_mut().insert(handle_a.0);

        let report = routes.disable_all(&gateway);
        assert_eq!(report.removed, 1);
        assert_eq!(report.failed, vec![("mic_a".to_string(), handle_a)]);
        assert_eq!(routes.count(), 0);
        assert_eq!(gateway.loopbacks_for("mic_b"), 0);
    }

    #[test]
    fn test_sweep_removes_only_tagged_routes() {
        let (gateway, mut routes) = setup();
        for _ in 0..3 {
            gateway.preload("mic_a", true);
        }
        gateway.preload("mic_b", false);
        gateway.preload("mic_b", false);

        assert_eq!(routes.crash_recovery_sweep(&gateway).unwrap(), 3);
        let remaining = gateway.modules.borrow();
        assert_eq!(remaining.len(), 2);
        assert!(remaining.values().all(|m| !m.tagged));
    }

    #[test]
    fn test_sweep_skips_garbled_module_lines() {
        let (gateway, mut routes) = setup();
        gateway.preload("mic_a", true);
        gateway.preload("mic_b", false);
        gateway.garbled_modules.set(true);

        assert_eq!(routes.crash_recovery_sweep(&gateway).unwrap(), 1);
        assert_eq!(gateway.loopbacks_for("mic_a"), 0);
        assert_eq!(gateway.loopbacks_for("mic_b"), 1);
    }

    #[test]
    fn test_sweep_fails_when_server_down() {
        let (gateway, mut routes) = setup();
        gateway.down.set(true);
        assert!(routes.crash_recovery_sweep(&gateway).unwrap_err().is_unavailable());
    }

    #[test]
    fn test_retain_present_drops_vanished() {
        let (gateway, mut routes) = setup();
        routes.enable(&gateway, "mic_a").unwrap();
        routes.enable(&gateway, "mic_b").unwrap();
        let dropped = routes.retain_present(&gateway, |id| id == "mic_a");
        assert_eq!(dropped, vec!["mic_b".to_string()]);
        assert!(routes.is_enabled("mic_a"));
        assert_eq!(gateway.loopbacks_for("mic_b"), 0);
    }
}
