//! Runs plugin hooks behind the panic, timeout and cancellation boundary.
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::plugin_system::error::{HookError, panic_message};

/// Await `hook`, converting a panic, an elapsed `timeout` or a fired
/// `cancel` token into a [`HookError`].
pub async fn guarded<T, F>(hook: F, cancel: Option<&CancellationToken>, timeout: Option<Duration>) -> Result<T, HookError>
where
    F: Future<Output = Result<T, HookError>>,
{
    let caught = async {
        match AssertUnwindSafe(hook).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => Err(HookError::Panicked {
                message: panic_message(payload.as_ref()),
            }),
        }
    };

    let bounded = async {
        match timeout {
            Some(limit) => match tokio::time::timeout(limit, caught).await {
                Ok(result) => result,
                Err(_) => Err(HookError::TimedOut {
                    timeout_ms: limit.as_millis() as u64,
                }),
            },
            None => caught.await,
        }
    };

    match cancel {
        Some(token) => {
            if token.is_cancelled() {
                return Err(HookError::Cancelled);
            }
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(HookError::Cancelled),
                result = bounded => result,
            }
        }
        None => bounded.await,
    }
}
