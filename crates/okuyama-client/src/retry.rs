//! Single-retry policy for client operations

use std::future::Future;

use tracing::warn;

use crate::error::{Result, Stage};

/// Which transient failures an operation may be repeated after
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryMode {
    /// Any transport failure; for reads and writes whose repetition leaves
    /// the store in the same state
    Always,
    /// Only failures before the request was written; for writes whose
    /// outcome would differ the second time
    RequestStage,
}

impl RetryMode {
    fn permits(self, stage: Option<Stage>) -> bool {
        match self {
            Self::Always => stage.is_some(),
            Self::RequestStage => stage == Some(Stage::Request),
        }
    }
}

/// Run `attempt`, repeating it once after a permitted transient failure
///
/// Each invocation of `attempt` is expected to take a fresh connection.
/// The error of the second attempt is returned unchanged.
pub async fn retry_once<F, Fut, T>(operation: &'static str, mode: RetryMode, mut attempt: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match attempt().await {
        Err(e) if e.is_transient() && mode.permits(e.stage()) => {
            warn!(operation, error = %e, "attempt failed, retrying once");
            attempt().await
        }
        result => result,
    }
}
