//! # UberCMS Cycle Scheduler
//!
//! Runs each enabled plugin's `on_cycle` hook at its declared interval, on a
//! task of its own, away from request dispatch. A plugin whose previous
//! cycle is still running is skipped for that tick, never queued.
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::kernel::component::KernelComponent;
use crate::kernel::error::Result;
use crate::plugin_system::descriptor::PluginId;
use crate::plugin_system::handler_info::Hook;
use crate::plugin_system::invoke::guarded;
use crate::plugin_system::registry::PluginRegistry;
use crate::storage::store::PluginStore;

/// Handed to `Plugin::on_cycle`.
#[derive(Debug, Clone)]
pub struct CycleContext {
    pub plugin_id: PluginId,
    pub store: Arc<dyn PluginStore>,
    /// Fires when the scheduler stops.
    pub cancel: CancellationToken,
    /// When this cycle became due.
    pub due: Instant,
}

#[derive(Debug)]
struct CycleSlot {
    interval: Duration,
    next_due: Instant,
    running: Arc<AtomicBool>,
}

/// Which plugins one tick started or skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub started: Vec<PluginId>,
    /// Due, but the previous cycle was still running.
    pub skipped: Vec<PluginId>,
}

struct SchedulerInner {
    registry: Arc<PluginRegistry>,
    store: Arc<dyn PluginStore>,
    slots: Mutex<HashMap<PluginId, CycleSlot>>,
    shutdown: CancellationToken,
}

pub struct CycleScheduler {
    name: &'static str,
    tick: Duration,
    inner: Arc<SchedulerInner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for CycleScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CycleScheduler")
            .field("name", &self.name)
            .field("tick", &self.tick)
            .finish_non_exhaustive()
    }
}

impl CycleScheduler {
    pub fn new(registry: Arc<PluginRegistry>, store: Arc<dyn PluginStore>, tick: Duration) -> Self {
        Self {
            name: "CycleScheduler",
            tick,
            inner: Arc::new(SchedulerInner {
                registry,
                store,
                slots: Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
            }),
            task: Mutex::new(None),
        }
    }

    /// Start every cycle due at `now`. A plugin seen for the first time is
    /// due immediately.
    pub fn tick_at(&self, now: Instant) -> TickReport {
        self.inner.tick_at(now)
    }

    /// True while a cycle of `id` is in flight.
    pub fn is_running(&self, id: PluginId) -> bool {
        self.inner
            .slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&id)
            .is_some_and(|slot| slot.running.load(Ordering::SeqCst))
    }
}

impl SchedulerInner {
    fn tick_at(&self, now: Instant) -> TickReport {
        let snapshot = self.registry.snapshot();
        let mut report = TickReport::default();
        let mut slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        // Plugins disabled or no longer cycling lose their slot once their
        // last cycle has finished.
        slots.retain(|id, slot| {
            slot.running.load(Ordering::SeqCst) || snapshot.get(*id).is_some_and(|e| e.handles(Hook::Cycle))
        });

        for entry in snapshot.with_hook(Hook::Cycle) {
            let Some(interval) = entry.handlers.cycle_interval() else {
                continue;
            };
            let id = entry.id();
            let slot = slots.entry(id).or_insert_with(|| CycleSlot {
                interval,
                next_due: now,
                running: Arc::new(AtomicBool::new(false)),
            });
            if slot.interval != interval {
                slot.interval = interval;
                slot.next_due = now;
            }
            if now < slot.next_due {
                continue;
            }

            let due = slot.next_due;
            slot.next_due = now + interval;
            if slot.running.swap(true, Ordering::SeqCst) {
                log::debug!("Cycle of '{}' still running, skipping", entry.descriptor.title);
                report.skipped.push(id);
                continue;
            }

            let running = slot.running.clone();
            let instance = entry.instance.clone();
            let title = entry.descriptor.title.clone();
            let ctx = CycleContext {
                plugin_id: id,
                store: self.store.clone(),
                cancel: self.shutdown.child_token(),
                due,
            };
            tokio::spawn(async move {
                let cancel = ctx.cancel.clone();
                if let Err(e) = guarded(instance.on_cycle(&ctx), Some(&cancel), None).await {
                    log::warn!("Cycle of '{}' failed: {}", title, e);
                }
                running.store(false, Ordering::SeqCst);
            });
            report.started.push(id);
        }

        report
    }
}

#[async_trait]
impl KernelComponent for CycleScheduler {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        let inner = self.inner.clone();
        let tick = self.tick;
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = inner.shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        inner.tick_at(Instant::now());
                    }
                }
            }
            log::debug!("Cycle scheduler loop stopped");
        });
        *self.task.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(handle);
        log::info!("Cycle scheduler ticking every {:?}", self.tick);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.inner.shutdown.cancel();
        let handle = self.task.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                log::warn!("Cycle scheduler task ended abnormally: {}", e);
            }
        }
        Ok(())
    }
}
