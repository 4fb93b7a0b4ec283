use std::future::Future;

use tracing::{debug, info, warn};

use crate::errors::{Result, XilingError};
use crate::models::{PollOptions, TaskSnapshot, TaskStatus};

/// Number of queries allowed by `opts`: `ceil(timeout / interval)`, at least one.
pub(crate) fn max_polls(opts: &PollOptions) -> Result<u64> {
    if opts.interval.is_zero() {
        return Err(XilingError::InvalidArgument(
            "poll interval must be non-zero".into(),
        ));
    }
    let polls = opts
        .timeout
        .as_nanos()
        .div_ceil(opts.interval.as_nanos())
        .max(1);
    Ok(u64::try_from(polls).unwrap_or(u64::MAX))
}

/// Call `query` until the task succeeds, fails, or the polling budget runs out.
///
/// Returns the first [`TaskStatus::Success`] snapshot. A
/// [`TaskStatus::Failed`] snapshot ends polling with
/// [`XilingError::TaskFailed`]; a task still running after
/// `ceil(timeout / interval)` queries ends it with [`XilingError::Timeout`].
/// Errors from `query` are returned as-is.
pub async fn poll_until<F, Fut>(task_id: &str, opts: &PollOptions, mut query: F) -> Result<TaskSnapshot>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<TaskSnapshot>>,
{
    let budget = max_polls(opts)?;
    let mut attempt: u64 = 0;

    loop {
        attempt += 1;
        let snapshot = query().await?;

        if let Some(ref cb) = opts.on_progress {
            cb(&snapshot);
        }

        match snapshot.status {
            TaskStatus::Success => {
                info!(task_id = %task_id, polls = attempt, "Task succeeded");
                return Ok(snapshot);
            }
            TaskStatus::Failed => {
                warn!(task_id = %task_id, polls = attempt, "Task failed");
                return Err(XilingError::TaskFailed {
                    task_id: task_id.to_string(),
                    detail: snapshot.raw,
                });
            }
            TaskStatus::Running => {}
        }

        if attempt >= budget {
            warn!(task_id = %task_id, polls = attempt, timeout = ?opts.timeout, "Task timed out");
            return Err(XilingError::Timeout {
                task_id: task_id.to_string(),
                timeout: opts.timeout,
            });
        }

        debug!(task_id = %task_id, attempt, "Task still running");
        tokio::time::sleep(opts.interval).await;
    }
}
