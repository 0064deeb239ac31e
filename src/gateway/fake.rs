//! In-memory gateway for tests

use super::{parse, AudioGateway, GatewayError, ModuleHandle, Source, Teardown, LOOPBACK_TAG};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};

/// A live module on the fake server
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FakeModule {
    pub source_id: String,
    pub tagged: bool,
}

/// Scriptable audio server that records every call it receives
#[derive(Default)]
pub struct FakeGateway {
    pub sources: RefCell<Vec<Source>>,
    pub default_id: RefCell<String>,
    pub modules: RefCell<BTreeMap<u32, FakeModule>>,
    pub muted: RefCell<BTreeSet<String>>,
    pub levels: RefCell<BTreeMap<String, f32>>,
    pub next_index: Cell<u32>,
    pub creates: Cell<usize>,
    pub destroys: Cell<usize>,
    pub calls: Cell<usize>,
    /// Every call fails with `Unavailable` while set
    pub down: Cell<bool>,
    /// `create_loopback` is rejected while set
    pub reject_create: Cell<bool>,
    /// `destroy_loopback` fails for these handles
    pub fail_destroy: RefCell<BTreeSet<u32>>,
    /// `is_muted` returns a parse error while set
    pub garbled_mute: Cell<bool>,
    /// `list_sources` returns a parse error while set
    pub garbled_sources: Cell<bool>,
    /// The module listing carries an unparseable line while set
    pub garbled_modules: Cell<bool>,
}

impl FakeGateway {
    /// Fake server with the given `(id, description)` sources; the first one is default
    pub fn with_sources(sources: &[(&str, &str)]) -> Self {
        let gateway = FakeGateway {
            next_index: Cell::new(100),
            ..Default::default()
        };
        if let Some((first, _)) = sources.first() {
            *gateway.default_id.borrow_mut() = first.to_string();
        }
        for (id, description) in sources {
            gateway.add_source(id, description);
        }
        gateway
    }

    pub fn add_source(&self, id: &str, description: &str) {
        let is_default = *self.default_id.borrow() == id;
        self.sources.borrow_mut().push(Source {
            id: id.to_string(),
            display_name: description.to_string(),
            is_default,
        });
    }

    pub fn remove_source(&self, id: &str) {
        self.sources.borrow_mut().retain(|s| s.id != id);
    }

    /// Load a module directly, as another process would
    pub fn preload(&self, source_id: &str, tagged: bool) -> u32 {
        let index = self.next_index.get();
        self.next_index.set(index + 1);
        self.modules.borrow_mut().insert(
            index,
            FakeModule {
                source_id: source_id.to_string(),
                tagged,
            },
        );
        index
    }

    pub fn loopbacks_for(&self, source_id: &str) -> usize {
        self.modules
            .borrow()
            .values()
            .filter(|m| m.source_id == source_id)
            .count()
    }

    fn enter(&self) -> Result<(), GatewayError> {
        self.calls.set(self.calls.get() + 1);
        if self.down.get() {
            return Err(GatewayError::Unavailable("fake server down".to_string()));
        }
        Ok(())
    }
}

impl AudioGateway for FakeGateway {
    fn list_sources(&self) -> Result<Vec<Source>, GatewayError> {
        self.enter()?;
        if self.garbled_sources.get() {
            return Err(GatewayError::Parse {
                command: "list sources".to_string(),
                detail: "source block 0 has no Name field".to_string(),
            });
        }
        let default_id = self.default_id.borrow().clone();
        Ok(self
            .sources
            .borrow()
            .iter()
            .map(|s| Source {
                is_default: s.id == default_id,
                ..s.clone()
            })
            .collect())
    }

    fn default_source_id(&self) -> Result<String, GatewayError> {
        self.enter()?;
        Ok(self.default_id.borrow().clone())
    }

    fn create_loopback(
        &self,
        source_id: &str,
        _latency_ms: u32,
    ) -> Result<ModuleHandle, GatewayError> {
        self.enter()?;
        self.creates.set(self.creates.get() + 1);
        if self.reject_create.get() {
            return Err(GatewayError::CommandFailed {
                command: "load-module".to_string(),
                stderr: "Failure: Module initialization failed".to_string(),
            });
        }
        Ok(ModuleHandle(self.preload(source_id, true)))
    }

    fn destroy_loopback(&self, handle: ModuleHandle) -> Result<Teardown, GatewayError> {
        self.enter()?;
        self.destroys.set(self.destroys.get() + 1);
        if self.fail_destroy.borrow().contains(&handle.0) {
            return Err(GatewayError::CommandFailed {
                command: "unload-module".to_string(),
                stderr: "Failure: Access denied".to_string(),
            });
        }
        match self.modules.borrow_mut().remove(&handle.0) {
            Some(_) => Ok(Teardown::Removed),
            None => Ok(Teardown::NotFound),
        }
    }

    fn tagged_loopbacks(&self) -> Result<Vec<ModuleHandle>, GatewayError> {
        self.enter()?;
        let mut listing = String::new();
        if self.garbled_modules.get() {
            listing.push_str("garbage-line\n");
        }
        for (index, module) in self.modules.borrow().iter() {
            listing.push_str(&format!(
                "{}\tmodule-loopback\tsource={} latency_msec=1",
                index, module.source_id
            ));
            if module.tagged {
                listing.push_str(&format!(" sink_input_properties={}", LOOPBACK_TAG));
            }
            listing.push('\n');
        }
        Ok(parse::parse_tagged_loopbacks(&listing))
    }

    fn is_muted(&self, source_id: &str) -> Result<bool, GatewayError> {
        self.enter()?;
        if self.garbled_mute.get() {
            return Err(GatewayError::Parse {
                command: "get-source-mute".to_string(),
                detail: "garbled".to_string(),
            });
        }
        Ok(self.muted.borrow().contains(source_id))
    }

    fn level(&self, source_id: &str) -> Result<f32, GatewayError> {
        self.enter()?;
        Ok(self.levels.borrow().get(source_id).copied().unwrap_or(0.0))
    }
}
