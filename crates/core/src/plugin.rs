//! Plugin lifecycle.
//!
//! ```text
//! Uninitialized ──register──▶ Initialized ──start──▶ Started ──stop──▶ Stopped
//! ```
//!
//! Every batch operation walks plugins in registration order and stops at the
//! first failure. Plugins already transitioned stay where they are.

use std::sync::Arc;

use serde::Serialize;

use crate::adapter::AdapterRegistry;
use crate::container::Container;
use crate::error::{KernelError, KernelResult, LifecyclePhase};
use crate::registry::Registry;

/// What a plugin may touch while registering.
pub struct PluginContext<'a> {
    pub registry: &'a mut Registry,
    pub container: &'a Container,
    pub adapters: &'a AdapterRegistry,
}

pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    /// Contribute controllers, modules, services or adapters.
    fn register(&self, cx: &mut PluginContext<'_>) -> anyhow::Result<()>;

    fn start(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginState {
    Uninitialized,
    Initialized,
    Started,
    Stopped,
}

struct Slot {
    plugin: Arc<dyn Plugin>,
    state: PluginState,
}

#[derive(Default)]
pub struct PluginManager {
    slots: Vec<Slot>,
}

impl PluginManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_plugin(&mut self, plugin: Arc<dyn Plugin>) -> KernelResult<()> {
        if self.slot(plugin.name()).is_some() {
            return Err(KernelError::duplicate("plugin", plugin.name()));
        }
        tracing::debug!(plugin = plugin.name(), version = plugin.version(), "plugin registered");
        self.slots.push(Slot {
            plugin,
            state: PluginState::Uninitialized,
        });
        Ok(())
    }

    pub fn get_plugin(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.slot(name).map(|s| s.plugin.clone())
    }

    pub fn state(&self, name: &str) -> Option<PluginState> {
        self.slot(name).map(|s| s.state)
    }

    /// `(name, version, state)` for every plugin, in registration order.
    pub fn plugins(&self) -> Vec<(String, String, PluginState)> {
        self.slots
            .iter()
            .map(|s| (s.plugin.name().to_string(), s.plugin.version().to_string(), s.state))
            .collect()
    }

    /// Run `register` on every plugin not yet initialized.
    pub fn initialize_all(&mut self, cx: &mut PluginContext<'_>) -> KernelResult<()> {
        for slot in &mut self.slots {
            if slot.state != PluginState::Uninitialized {
                continue;
            }
            slot.plugin
                .register(cx)
                .map_err(|e| KernelError::lifecycle(slot.plugin.name(), LifecyclePhase::Register, e))?;
            slot.state = PluginState::Initialized;
            tracing::info!(plugin = slot.plugin.name(), "plugin initialized");
        }
        Ok(())
    }

    /// Start every initialized plugin. Already started plugins are skipped;
    /// any other state is an invalid transition.
    pub fn start_all(&mut self) -> KernelResult<()> {
        for slot in &mut self.slots {
            match slot.state {
                PluginState::Started => continue,
                PluginState::Initialized => {}
                other => {
                    return Err(KernelError::lifecycle(
                        slot.plugin.name(),
                        LifecyclePhase::Start,
                        anyhow::anyhow!("cannot start a plugin in state {other:?}"),
                    ));
                }
            }
            slot.plugin
                .start()
                .map_err(|e| KernelError::lifecycle(slot.plugin.name(), LifecyclePhase::Start, e))?;
            slot.state = PluginState::Started;
            tracing::info!(plugin = slot.plugin.name(), "plugin started");
        }
        Ok(())
    }

    /// Stop every started plugin; plugins in any other state are left alone.
    pub fn stop_all(&mut self) -> KernelResult<()> {
        for slot in &mut self.slots {
            if slot.state != PluginState::Started {
                continue;
            }
            slot.plugin
                .stop()
                .map_err(|e| KernelError::lifecycle(slot.plugin.name(), LifecyclePhase::Stop, e))?;
            slot.state = PluginState::Stopped;
            tracing::info!(plugin = slot.plugin.name(), "plugin stopped");
        }
        Ok(())
    }

    fn slot(&self, name: &str) -> Option<&Slot> {
        self.slots.iter().find(|s| s.plugin.name() == name)
    }
}
