//! Brings the plugin table in line with the manifests on disk.
use std::collections::HashSet;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::plugin_system::cascade::CascadeRule;
use crate::plugin_system::descriptor::{PluginId, PluginState};
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::manifest::PluginManifest;
use crate::plugin_system::registry::RebuildReport;
use crate::plugin_system::version::ApiVersion;
use crate::storage::store::{Change, ChangeSet, PluginStore};

/// What a reload changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadReport {
    pub added: Vec<PluginId>,
    pub updated: Vec<PluginId>,
    /// Uninstalled plugins whose manifest is gone.
    pub purged: Vec<PluginId>,
    /// Manifests ignored, with the reason.
    pub ignored: Vec<(String, String)>,
    pub rebuild: RebuildReport,
}

/// Stage the reconciliation of `manifests` against the stored descriptors
/// and commit it as one change set.
///
/// Two phases inside that change set: every `NotInstalled` row is flagged
/// stale, each manifest found clears its row's flag (or inserts a new row),
/// then rows still flagged are purged. Installed plugins are never purged.
/// A purged plugin goes through `cascade` like a removed one: every rule's
/// cleanup runs first, and its row deletions join the same change set.
pub(crate) async fn reconcile(
    store: &dyn PluginStore,
    manifests: &[PluginManifest],
    api_version: &ApiVersion,
    cascade: &[Arc<dyn CascadeRule>],
    cancel: &CancellationToken,
) -> Result<ReloadReport, PluginSystemError> {
    let existing = store.descriptors()?;
    let mut report = ReloadReport::default();
    let mut changes = ChangeSet::new();
    changes.push(Change::MarkUninstalledStale);

    let mut seen = HashSet::new();
    for manifest in manifests {
        let label = manifest.plugin_base_dir.display().to_string();
        if !manifest.supports_api(api_version) {
            log::warn!("Ignoring {}: incompatible with API {}", label, api_version);
            report
                .ignored
                .push((label, format!("incompatible with API {}", api_version)));
            continue;
        }
        if !seen.insert(manifest.id) {
            log::warn!("Ignoring {}: plugin id {} already seen", label, manifest.id);
            report
                .ignored
                .push((label, format!("duplicate plugin id {}", manifest.id)));
            continue;
        }

        match existing.iter().find(|d| d.id() == manifest.id) {
            Some(stored) => {
                let mut baseline = stored.clone();
                baseline.stale = stored.stale || stored.state == PluginState::NotInstalled;
                let mut found = manifest.to_descriptor();
                found.state = stored.state;
                let fields = found.changes_since(&baseline);
                if fields.is_empty() {
                    continue;
                }
                if fields.iter().any(|f| f.column() != "stale") {
                    report.updated.push(manifest.id);
                }
                changes.push(Change::UpdateDescriptor { id: manifest.id, fields });
            }
            None => {
                report.added.push(manifest.id);
                changes.push(Change::InsertDescriptor(manifest.to_descriptor()));
            }
        }
    }

    let purged: Vec<_> = existing
        .iter()
        .filter(|d| d.state == PluginState::NotInstalled && !seen.contains(&d.id()))
        .collect();
    for descriptor in &purged {
        for rule in cascade {
            if cancel.is_cancelled() {
                return Err(PluginSystemError::Cancelled {
                    operation: "reload_plugins".to_string(),
                });
            }
            rule.cleanup(descriptor)
                .await
                .map_err(|message| PluginSystemError::CleanupFailed {
                    plugin_id: descriptor.id(),
                    rule: rule.name(),
                    message,
                })?;
            rule.stage(descriptor, &mut changes);
        }
    }
    report.purged = purged.iter().map(|d| d.id()).collect();
    changes.push(Change::PurgeStale);

    if cancel.is_cancelled() {
        return Err(PluginSystemError::Cancelled {
            operation: "reload_plugins".to_string(),
        });
    }
    store.commit(changes)?;

    log::info!(
        "Plugin directories reconciled: {} added, {} updated, {} purged",
        report.added.len(),
        report.updated.len(),
        report.purged.len()
    );
    Ok(report)
}
