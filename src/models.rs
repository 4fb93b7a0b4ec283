use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Refresh when the token expires within this window.
pub(crate) const REFRESH_MARGIN_SECS: i64 = 60;

/// A client-credentials access token and when it stops working.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    /// Usable at `now`: more than 60s of lifetime left.
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        now.checked_add_signed(chrono::TimeDelta::seconds(REFRESH_MARGIN_SECS))
            .is_some_and(|deadline| deadline < self.expires_at)
    }

    pub fn is_fresh(&self) -> bool {
        self.is_fresh_at(Utc::now())
    }
}

/// Vendor-side state of an asynchronous task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Running,
    Success,
    Failed,
}

impl TaskStatus {
    /// Map a vendor status string. Unknown or missing values count as running.
    pub fn from_vendor(status: &str) -> Self {
        match status.to_ascii_lowercase().as_str() {
            "success" => TaskStatus::Success,
            "failed" | "failure" | "fail" => TaskStatus::Failed,
            _ => TaskStatus::Running,
        }
    }

    /// `Success` or `Failed`.
    pub fn is_terminal(self) -> bool {
        !matches!(self, TaskStatus::Running)
    }
}

/// Returned by the `create_*_task` calls.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    pub task_id: String,
    /// Full submit response JSON.
    pub raw: serde_json::Value,
}

/// One observation of a task's state.
#[derive(Debug, Clone)]
pub struct TaskSnapshot {
    pub task_id: String,
    pub status: TaskStatus,
    /// The query response JSON (for TTS, the matching `tasks_info` entry).
    pub raw: serde_json::Value,
}

impl TaskSnapshot {
    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Success
    }

    pub fn is_failed(&self) -> bool {
        self.status == TaskStatus::Failed
    }
}

/// Polling config for the `wait_for_*` calls and [`poll_until`](crate::poll_until).
pub struct PollOptions {
    /// Default: 3s. Must be non-zero.
    pub interval: Duration,
    /// Default: 30s.
    pub timeout: Duration,
    /// Called with every snapshot, terminal ones included.
    #[allow(clippy::type_complexity)]
    pub on_progress: Option<Box<dyn Fn(&TaskSnapshot) + Send + Sync>>,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            timeout: Duration::from_secs(30),
            on_progress: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Internal deserialization helpers (not part of the public API surface)
// ---------------------------------------------------------------------------

/// POST /oauth/2.0/token response.
#[derive(Deserialize)]
pub(crate) struct TokenResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

/// Pull a string out of a JSON value, or `""` if missing.
pub(crate) fn json_str(val: &serde_json::Value, key: &str) -> String {
    val.get(key)
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

/// Task id from a submit response: `result.task_id`, else top-level `task_id`.
pub(crate) fn task_id_from_value(val: &serde_json::Value) -> Option<String> {
    val.get("result")
        .and_then(|r| r.get("task_id"))
        .or_else(|| val.get("task_id"))
        .and_then(id_string)
}

/// A task id as text; the vendor sends ids as strings or numbers.
fn id_string(val: &serde_json::Value) -> Option<String> {
    match val {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Status from a synthesis query response: top-level `task_status`, else
/// `result.task_status`.
pub(crate) fn synthesis_status(val: &serde_json::Value) -> TaskStatus {
    let top = json_str(val, "task_status");
    let status = if top.is_empty() {
        val.get("result")
            .map(|r| json_str(r, "task_status"))
            .unwrap_or_default()
    } else {
        top
    };
    TaskStatus::from_vendor(&status)
}

/// The `tasks_info` entry for `task_id` in a TTS query response.
pub(crate) fn tts_task_info(val: &serde_json::Value, task_id: &str) -> Option<serde_json::Value> {
    val.get("tasks_info")?
        .as_array()?
        .iter()
        .find(|info| info.get("task_id").and_then(id_string).as_deref() == Some(task_id))
        .cloned()
}

/// Vendor error envelope in a response body, as `(code, message)`.
///
/// Recognises OAuth style `error`/`error_description` and RPC style
/// `error_code`/`error_msg` (code 0 means success).
pub(crate) fn vendor_error(val: &serde_json::Value) -> Option<(String, String)> {
    if let Some(code) = val.get("error").filter(|v| is_set(v)) {
        let code = code
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| code.to_string());
        let message = val
            .get("error_description")
            .and_then(|v| v.as_str())
            .unwrap_or("Unknown error")
            .to_string();
        return Some((code, message));
    }

    let code = val.get("error_code").filter(|v| is_set(v))?;
    if code.as_i64() == Some(0) || code.as_str() == Some("0") {
        return None;
    }
    let code = code
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| code.to_string());
    let message = val
        .get("error_msg")
        .and_then(|v| v.as_str())
        .unwrap_or("Unknown error")
        .to_string();
    Some((code, message))
}

fn is_set(val: &serde_json::Value) -> bool {
    match val {
        serde_json::Value::Null => false,
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::String(s) => !s.is_empty(),
        _ => true,
    }
}
