//! # UberCMS Request Dispatch
//!
//! Routes each inbound request through the enabled plugins:
//! request-start observers, the plugin claiming the request's module, the
//! not-found and error fallback chains, then request-end observers.
pub mod context;
pub mod dispatcher;
pub mod error;

pub use context::{RequestContext, Response};
pub use dispatcher::{DispatchOutcome, DispatchStatus, RequestDispatcher, TraceEntry, TraceHook, TraceResult};
pub use error::{DispatchError, DispatchStage};
