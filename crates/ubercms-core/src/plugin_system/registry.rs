//! Copy-on-write registry of live plugin instances.
//!
//! Readers take an `Arc<RegistrySnapshot>` and never block. Writers build a
//! new snapshot under a single writer lock and swap it in, so in-flight
//! requests keep the snapshot they started with.
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use tokio_util::sync::CancellationToken;

use crate::plugin_system::descriptor::{PluginDescriptor, PluginId, PluginState};
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::handler_info::{HandlerInfo, Hook};
use crate::plugin_system::loader::PluginLoader;
use crate::plugin_system::traits::Plugin;
use crate::storage::store::PluginStore;

/// One live plugin with the persisted data the runtime routes on.
#[derive(Clone)]
pub struct RegisteredPlugin {
    pub descriptor: PluginDescriptor,
    pub handlers: HandlerInfo,
    /// Lower-cased URL modules routed to this plugin.
    pub routes: Vec<String>,
    pub instance: Arc<dyn Plugin>,
    arrival: u64,
}

impl RegisteredPlugin {
    pub fn new(
        descriptor: PluginDescriptor,
        handlers: HandlerInfo,
        routes: Vec<String>,
        instance: Arc<dyn Plugin>,
    ) -> Self {
        Self {
            descriptor,
            handlers,
            routes,
            instance,
            arrival: 0,
        }
    }

    pub fn id(&self) -> PluginId {
        self.descriptor.id()
    }

    pub fn priority(&self) -> i32 {
        self.descriptor.priority
    }

    pub fn handles(&self, hook: Hook) -> bool {
        self.handlers.handles(hook)
    }

    /// Position in registration order; breaks priority ties.
    pub fn arrival(&self) -> u64 {
        self.arrival
    }
}

impl fmt::Debug for RegisteredPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredPlugin")
            .field("id", &self.id())
            .field("name", &self.instance.name())
            .field("priority", &self.priority())
            .field("arrival", &self.arrival)
            .field("routes", &self.routes)
            .finish()
    }
}

/// Immutable view of the registry at one point in time.
#[derive(Debug, Default)]
pub struct RegistrySnapshot {
    /// Priority descending, arrival ascending.
    ordered: Vec<RegisteredPlugin>,
    index: HashMap<PluginId, usize>,
    routes: HashMap<String, usize>,
    generation: u64,
}

impl RegistrySnapshot {
    /// Build from entries with their arrival already assigned.
    ///
    /// # Panics
    ///
    /// Two entries with the same id is a bug in the runtime, not in a plugin.
    pub(crate) fn build(entries: Vec<RegisteredPlugin>, generation: u64) -> Self {
        let mut ordered: Vec<RegisteredPlugin> = Vec::with_capacity(entries.len());
        for entry in entries {
            assert!(
                !ordered.iter().any(|e| e.id() == entry.id()),
                "plugin {} registered twice in one registry snapshot",
                entry.id()
            );
            insert_sorted(&mut ordered, entry);
        }

        let index = ordered.iter().enumerate().map(|(i, e)| (e.id(), i)).collect();

        // Earliest arrival keeps a contested module.
        let mut by_arrival: Vec<usize> = (0..ordered.len()).collect();
        by_arrival.sort_by_key(|&i| ordered[i].arrival);
        let mut routes = HashMap::new();
        for i in by_arrival {
            for module in &ordered[i].routes {
                if let Some(&owner) = routes.get(module) {
                    let owner: &RegisteredPlugin = &ordered[owner];
                    log::warn!(
                        "Module '{}' is claimed by both {} and {}; keeping {}",
                        module,
                        owner.id(),
                        ordered[i].id(),
                        owner.id()
                    );
                    continue;
                }
                routes.insert(module.clone(), i);
            }
        }

        Self {
            ordered,
            index,
            routes,
            generation,
        }
    }

    pub fn get(&self, id: PluginId) -> Option<&RegisteredPlugin> {
        self.index.get(&id).map(|&i| &self.ordered[i])
    }

    pub fn contains(&self, id: PluginId) -> bool {
        self.index.contains_key(&id)
    }

    /// Every registered plugin, priority descending.
    pub fn all(&self) -> impl Iterator<Item = &RegisteredPlugin> {
        self.ordered.iter()
    }

    /// Registered plugins flagged for `hook`, priority descending.
    pub fn with_hook(&self, hook: Hook) -> impl Iterator<Item = &RegisteredPlugin> {
        self.ordered.iter().filter(move |e| e.handles(hook))
    }

    /// The plugin claiming `module` (exact, already normalized).
    pub fn route(&self, module: &str) -> Option<&RegisteredPlugin> {
        self.routes.get(module).map(|&i| &self.ordered[i])
    }

    pub fn ids(&self) -> Vec<PluginId> {
        self.ordered.iter().map(RegisteredPlugin::id).collect()
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    /// Bumped by every swap.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Stable insertion: after every entry that sorts before or equal to it.
fn insert_sorted(ordered: &mut Vec<RegisteredPlugin>, entry: RegisteredPlugin) {
    let position = ordered
        .iter()
        .position(|e| {
            e.priority() < entry.priority() || (e.priority() == entry.priority() && e.arrival > entry.arrival)
        })
        .unwrap_or(ordered.len());
    ordered.insert(position, entry);
}

/// A plugin that could not be brought into the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedPlugin {
    pub plugin_id: PluginId,
    pub title: String,
    pub reason: String,
}

/// Result of [`PluginRegistry::rebuild_handler_cache`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebuildReport {
    /// Loaded plugins, priority descending.
    pub loaded: Vec<PluginId>,
    pub skipped: Vec<SkippedPlugin>,
    pub generation: u64,
}

/// Registry of live plugin instances; holds exactly the enabled plugins.
pub struct PluginRegistry {
    current: ArcSwap<RegistrySnapshot>,
    writer: Mutex<()>,
    next_arrival: AtomicU64,
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("PluginRegistry")
            .field("generation", &snapshot.generation())
            .field("plugins", &snapshot.ids())
            .finish()
    }
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(RegistrySnapshot::default()),
            writer: Mutex::new(()),
            next_arrival: AtomicU64::new(0),
        }
    }

    /// The current snapshot. Never blocks.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.current.load_full()
    }

    fn modify<F>(&self, edit: F)
    where
        F: FnOnce(&mut Vec<RegisteredPlugin>),
    {
        let _writer = self.writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let current = self.current.load_full();
        let mut entries: Vec<RegisteredPlugin> = current.ordered.clone();
        edit(&mut entries);
        self.current
            .store(Arc::new(RegistrySnapshot::build(entries, current.generation + 1)));
    }

    /// Insert, or replace an entry with the same id in its original arrival slot.
    pub fn register(&self, mut entry: RegisteredPlugin) {
        let id = entry.id();
        self.modify(|entries| match entries.iter_mut().find(|e| e.id() == id) {
            Some(existing) => {
                entry.arrival = existing.arrival;
                *existing = entry;
            }
            None => {
                entry.arrival = self.next_arrival.fetch_add(1, Ordering::SeqCst);
                entries.push(entry);
            }
        });
        log::debug!("Registered plugin {}", id);
    }

    /// Drop `id` from every index. Lifecycle hooks are not called.
    pub fn unregister(&self, id: PluginId) -> Option<Arc<dyn Plugin>> {
        let mut removed = None;
        self.modify(|entries| {
            if let Some(pos) = entries.iter().position(|e| e.id() == id) {
                removed = Some(entries.remove(pos).instance);
            }
        });
        if removed.is_some() {
            log::debug!("Unregistered plugin {}", id);
        }
        removed
    }

    pub fn get(&self, id: PluginId) -> Option<Arc<dyn Plugin>> {
        self.snapshot().get(id).map(|e| e.instance.clone())
    }

    pub fn contains(&self, id: PluginId) -> bool {
        self.snapshot().contains(id)
    }

    /// Instances in priority order.
    pub fn all(&self) -> Vec<Arc<dyn Plugin>> {
        self.snapshot().all().map(|e| e.instance.clone()).collect()
    }

    /// Recompute the registry from the persisted descriptors, handler info
    /// and routes, then swap it in as one step.
    ///
    /// Store order is arrival order. A live instance is reused when its class
    /// path is unchanged; plugins that fail to load are skipped and reported.
    pub fn rebuild_handler_cache(
        &self,
        store: &dyn PluginStore,
        loader: &PluginLoader,
        cancel: &CancellationToken,
    ) -> Result<RebuildReport, PluginSystemError> {
        let cancelled = || PluginSystemError::Cancelled {
            operation: "rebuild_handler_cache".to_string(),
        };

        let _writer = self.writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let current = self.current.load_full();
        let tables = store.tables()?;

        let mut entries = Vec::new();
        let mut skipped = Vec::new();
        for (arrival, descriptor) in tables.plugins.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(cancelled());
            }
            if descriptor.state != PluginState::Enabled {
                continue;
            }
            let id = descriptor.id();

            let reusable = current
                .get(id)
                .filter(|e| e.descriptor.class_path == descriptor.class_path)
                .map(|e| e.instance.clone());
            let instance = match reusable {
                Some(instance) => instance,
                None => match loader.load(descriptor) {
                    Ok(instance) => instance,
                    Err(e) => {
                        log::error!("Skipping plugin '{}' ({}): {}", descriptor.title, id, e);
                        skipped.push(SkippedPlugin {
                            plugin_id: id,
                            title: descriptor.title.clone(),
                            reason: e.to_string(),
                        });
                        continue;
                    }
                },
            };

            let routes = tables
                .routes
                .iter()
                .filter(|r| r.plugin_id == id)
                .map(|r| r.module.clone())
                .collect();
            let handlers = tables.handlers.get(&id).copied().unwrap_or_default();
            let mut entry = RegisteredPlugin::new(descriptor.clone(), handlers, routes, instance);
            entry.arrival = arrival as u64;
            entries.push(entry);
        }

        if cancel.is_cancelled() {
            return Err(cancelled());
        }

        let snapshot = RegistrySnapshot::build(entries, current.generation + 1);
        let report = RebuildReport {
            loaded: snapshot.ids(),
            skipped,
            generation: snapshot.generation(),
        };
        self.next_arrival
            .fetch_max(tables.plugins.len() as u64, Ordering::SeqCst);
        self.current.store(Arc::new(snapshot));

        log::info!(
            "Handler cache rebuilt: {} loaded, {} skipped",
            report.loaded.len(),
            report.skipped.len()
        );
        Ok(report)
    }
}
