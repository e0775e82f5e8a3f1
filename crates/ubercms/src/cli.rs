//! Plain-text rendering of runtime reports for the terminal.
use std::fmt::Write;

use ubercms_core::dispatch::{DispatchOutcome, DispatchStatus, RequestContext};
use ubercms_core::plugin_system::{PluginDescriptor, RebuildReport, ReloadReport, TransitionReport};

pub fn descriptors(descriptors: &[PluginDescriptor]) -> String {
    if descriptors.is_empty() {
        return "  No plugins registered.\n".to_string();
    }
    let mut out = String::new();
    for d in descriptors {
        let _ = writeln!(
            out,
            "  - {} [{}] v{} priority {}: {}",
            d.title,
            d.id(),
            d.version,
            d.priority,
            d.state
        );
    }
    out
}

pub fn transition(report: &TransitionReport) -> String {
    let mut out = String::new();
    for message in &report.messages {
        let _ = writeln!(out, "  {}", message);
    }
    out
}

pub fn rebuild(report: &RebuildReport) -> String {
    let mut out = format!(
        "Handler cache generation {}: {} plugins loaded\n",
        report.generation,
        report.loaded.len()
    );
    for skipped in &report.skipped {
        let _ = writeln!(out, "  skipped {} ({}): {}", skipped.title, skipped.plugin_id, skipped.reason);
    }
    out
}

pub fn reload(report: &ReloadReport) -> String {
    let mut out = format!(
        "Plugins reloaded: {} added, {} updated, {} purged\n",
        report.added.len(),
        report.updated.len(),
        report.purged.len()
    );
    for (dir, reason) in &report.ignored {
        let _ = writeln!(out, "  ignored {}: {}", dir, reason);
    }
    out.push_str(&rebuild(&report.rebuild));
    out
}

pub fn dispatch(request: &RequestContext, outcome: &DispatchOutcome) -> String {
    let handled_by = match outcome.status {
        DispatchStatus::Handled(id) => format!("handled by {}", id),
        DispatchStatus::NotFoundHandled(id) => format!("not-found page from {}", id),
        DispatchStatus::ErrorHandled(id) => format!("error page from {}", id),
        DispatchStatus::GenericNotFound => "generic not-found page".to_string(),
        DispatchStatus::GenericError => "generic error page".to_string(),
    };
    let mut out = format!(
        "{} {} -> {} {} ({})\n",
        request.method,
        request.path(),
        request.response.status,
        request.response.content_type,
        handled_by
    );
    if let Some(error) = &outcome.error {
        let _ = writeln!(out, "error: {}", error);
    }
    out.push('\n');
    out.push_str(&request.response.body);
    if !request.response.body.ends_with('\n') {
        out.push('\n');
    }
    out
}
