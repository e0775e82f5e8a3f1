use std::fmt;
use std::sync::Arc;

use crate::dispatch::context::{RequestContext, Response};
use crate::dispatch::error::{DispatchError, DispatchStage};
use crate::plugin_system::descriptor::PluginId;
use crate::plugin_system::handler_info::Hook;
use crate::plugin_system::invoke::guarded;
use crate::plugin_system::registry::{PluginRegistry, RegisteredPlugin, RegistrySnapshot};

/// Which handler hook a trace entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceHook {
    RequestStart,
    HandleRequest,
    PageNotFound,
    PageError,
    RequestEnd,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceResult {
    Claimed,
    Declined,
    /// Observer hook returned normally.
    Completed,
    Failed(String),
}

/// One hook invocation made while dispatching a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEntry {
    pub plugin_id: PluginId,
    pub hook: TraceHook,
    pub result: TraceResult,
}

/// Who produced the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchStatus {
    Handled(PluginId),
    NotFoundHandled(PluginId),
    ErrorHandled(PluginId),
    GenericNotFound,
    GenericError,
}

/// Result of dispatching one request.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub status: DispatchStatus,
    /// Every hook invoked, in order.
    pub trace: Vec<TraceEntry>,
    /// The failure routed to error handling, if any.
    pub error: Option<DispatchError>,
}

impl DispatchOutcome {
    /// Plugins invoked for `hook`, in order.
    pub fn invoked(&self, hook: TraceHook) -> Vec<PluginId> {
        self.trace
            .iter()
            .filter(|t| t.hook == hook)
            .map(|t| t.plugin_id)
            .collect()
    }
}

pub const GENERIC_NOT_FOUND_BODY: &str = "404 Not Found";
pub const GENERIC_ERROR_BODY: &str = "500 Internal Server Error";

/// Routes requests through the enabled plugins.
///
/// Each call works on the registry snapshot current when it started and
/// holds no lock while handlers run.
pub struct RequestDispatcher {
    registry: Arc<PluginRegistry>,
}

impl fmt::Debug for RequestDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestDispatcher")
            .field("registry", &self.registry)
            .finish()
    }
}

impl RequestDispatcher {
    pub fn new(registry: Arc<PluginRegistry>) -> Self {
        Self { registry }
    }

    pub async fn dispatch(&self, request: &mut RequestContext) -> DispatchOutcome {
        let snapshot = self.registry.snapshot();
        let mut trace = Vec::new();

        for entry in snapshot.with_hook(Hook::RequestStart) {
            let result = guarded(entry.instance.on_request_start(request), None, None).await;
            trace.push(observer_entry(entry, TraceHook::RequestStart, result, request.path()));
        }

        let (status, error) = self.route(&snapshot, request, &mut trace).await;

        for entry in snapshot.with_hook(Hook::RequestEnd) {
            let result = guarded(entry.instance.on_request_end(request), None, None).await;
            trace.push(observer_entry(entry, TraceHook::RequestEnd, result, request.path()));
        }

        DispatchOutcome { status, trace, error }
    }

    async fn route(
        &self,
        snapshot: &RegistrySnapshot,
        request: &mut RequestContext,
        trace: &mut Vec<TraceEntry>,
    ) -> (DispatchStatus, Option<DispatchError>) {
        let Some(entry) = snapshot.route(request.module()) else {
            log::debug!("No plugin routes module '{}'", request.module());
            return self.not_found(snapshot, request, trace).await;
        };

        match guarded(entry.instance.handle_request(request), None, None).await {
            Ok(true) => {
                trace.push(handler_entry(entry, TraceHook::HandleRequest, TraceResult::Claimed));
                (DispatchStatus::Handled(entry.id()), None)
            }
            Ok(false) => {
                trace.push(handler_entry(entry, TraceHook::HandleRequest, TraceResult::Declined));
                self.not_found(snapshot, request, trace).await
            }
            Err(source) => {
                trace.push(handler_entry(
                    entry,
                    TraceHook::HandleRequest,
                    TraceResult::Failed(source.message()),
                ));
                let error = DispatchError {
                    path: request.path().to_string(),
                    plugin_id: entry.id(),
                    stage: DispatchStage::HandlerInvocation,
                    source,
                };
                self.error(snapshot, request, trace, error).await
            }
        }
    }

    async fn not_found(
        &self,
        snapshot: &RegistrySnapshot,
        request: &mut RequestContext,
        trace: &mut Vec<TraceEntry>,
    ) -> (DispatchStatus, Option<DispatchError>) {
        request.response = Response::with_status(404);

        for entry in snapshot.with_hook(Hook::PageNotFound) {
            match guarded(entry.instance.handle_page_not_found(request), None, None).await {
                Ok(true) => {
                    trace.push(handler_entry(entry, TraceHook::PageNotFound, TraceResult::Claimed));
                    return (DispatchStatus::NotFoundHandled(entry.id()), None);
                }
                Ok(false) => {
                    trace.push(handler_entry(entry, TraceHook::PageNotFound, TraceResult::Declined));
                }
                Err(source) => {
                    trace.push(handler_entry(
                        entry,
                        TraceHook::PageNotFound,
                        TraceResult::Failed(source.message()),
                    ));
                    let error = DispatchError {
                        path: request.path().to_string(),
                        plugin_id: entry.id(),
                        stage: DispatchStage::NotFoundHandling,
                        source,
                    };
                    return self.error(snapshot, request, trace, error).await;
                }
            }
        }

        log::warn!(
            "404 for {} {}: no handler claimed it (chain: {})",
            request.method,
            request.path(),
            chain(trace)
        );
        request.response.set(404, "text/plain; charset=utf-8", GENERIC_NOT_FOUND_BODY);
        (DispatchStatus::GenericNotFound, None)
    }

    async fn error(
        &self,
        snapshot: &RegistrySnapshot,
        request: &mut RequestContext,
        trace: &mut Vec<TraceEntry>,
        error: DispatchError,
    ) -> (DispatchStatus, Option<DispatchError>) {
        request.response = Response::with_status(500);

        for entry in snapshot.with_hook(Hook::PageError) {
            match guarded(entry.instance.handle_page_error(request, &error), None, None).await {
                Ok(true) => {
                    trace.push(handler_entry(entry, TraceHook::PageError, TraceResult::Claimed));
                    log::warn!("{} (handled by '{}')", error, entry.descriptor.title);
                    return (DispatchStatus::ErrorHandled(entry.id()), Some(error));
                }
                Ok(false) => {
                    trace.push(handler_entry(entry, TraceHook::PageError, TraceResult::Declined));
                }
                Err(e) => {
                    log::error!(
                        "Error handler '{}' failed while handling '{}': {}",
                        entry.descriptor.title,
                        request.path(),
                        e
                    );
                    trace.push(handler_entry(entry, TraceHook::PageError, TraceResult::Failed(e.message())));
                }
            }
        }

        log::error!(
            "500 for {} {}: {:?} (chain: {})",
            request.method,
            request.path(),
            error,
            chain(trace)
        );
        request.response.set(500, "text/plain; charset=utf-8", GENERIC_ERROR_BODY);
        (DispatchStatus::GenericError, Some(error))
    }
}

fn handler_entry(entry: &RegisteredPlugin, hook: TraceHook, result: TraceResult) -> TraceEntry {
    TraceEntry {
        plugin_id: entry.id(),
        hook,
        result,
    }
}

/// Observer hooks never change the outcome; failures are only logged.
fn observer_entry(
    entry: &RegisteredPlugin,
    hook: TraceHook,
    result: Result<(), crate::plugin_system::error::HookError>,
    path: &str,
) -> TraceEntry {
    let result = match result {
        Ok(()) => TraceResult::Completed,
        Err(e) => {
            log::warn!("{:?} hook of '{}' failed for '{}': {}", hook, entry.descriptor.title, path, e);
            TraceResult::Failed(e.message())
        }
    };
    handler_entry(entry, hook, result)
}

fn chain(trace: &[TraceEntry]) -> String {
    let attempted: Vec<String> = trace
        .iter()
        .filter(|t| !matches!(t.hook, TraceHook::RequestStart | TraceHook::RequestEnd))
        .map(|t| format!("{}:{:?}", t.plugin_id, t.hook))
        .collect();
    if attempted.is_empty() {
        "none".to_string()
    } else {
        attempted.join(" -> ")
    }
}
