use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;

use crate::error::BatchError;

/// Request priority. Lower numeric value = served first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Bypasses batching almost entirely.
    Critical = 0,
    High = 1,
    Normal = 2,
    Low = 3,
    /// Tolerates unbounded delay under sustained higher-priority load.
    Background = 4,
}

impl Priority {
    /// All levels, most urgent first.
    pub const ALL: [Priority; 5] = [
        Priority::Critical,
        Priority::High,
        Priority::Normal,
        Priority::Low,
        Priority::Background,
    ];

    /// Ordinal used for ordering and counter indexing.
    pub fn ordinal(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
            Priority::Background => "background",
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "critical" => Ok(Priority::Critical),
            "high" => Ok(Priority::High),
            "normal" => Ok(Priority::Normal),
            "low" => Ok(Priority::Low),
            "background" => Ok(Priority::Background),
            other => Err(format!("unknown priority '{other}'")),
        }
    }
}

/// Outcome delivered to a submitter.
pub type Outcome = Result<Value, BatchError>;

/// Single-assignment result handle.
///
/// The sender is taken on first completion, so a second `complete` can
/// neither panic nor overwrite the first value.
#[derive(Debug)]
pub struct ResultSlot {
    tx: Option<oneshot::Sender<Outcome>>,
}

impl ResultSlot {
    /// Create a slot and the receiver its submitter awaits.
    pub fn new() -> (Self, oneshot::Receiver<Outcome>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Set the outcome. Returns `false` if the slot was already completed.
    ///
    /// A submitter that already gave up (timed out) has dropped its
    /// receiver; delivery then silently goes nowhere.
    pub fn complete(&mut self, outcome: Outcome) -> bool {
        match self.tx.take() {
            Some(tx) => {
                if tx.send(outcome).is_err() {
                    debug!("result receiver already dropped, discarding outcome");
                }
                true
            }
            None => false,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.tx.is_none()
    }
}

/// One caller-submitted unit of pending work.
#[derive(Debug)]
pub struct WorkItem {
    pub id: Uuid,
    pub priority: Priority,
    pub enqueued_at: Instant,
    /// Submission sequence; breaks ties between identical `enqueued_at`.
    pub(crate) seq: u64,
    pub payload: Value,
    result: ResultSlot,
}

impl WorkItem {
    /// Create a work item stamped with the current instant.
    pub fn new(payload: Value, priority: Priority, seq: u64) -> (Self, oneshot::Receiver<Outcome>) {
        let (result, rx) = ResultSlot::new();
        let item = Self {
            id: Uuid::new_v4(),
            priority,
            enqueued_at: Instant::now(),
            seq,
            payload,
            result,
        };
        (item, rx)
    }

    /// Complete this item's result handle; no-op if already completed.
    pub fn complete(&mut self, outcome: Outcome) -> bool {
        self.result.complete(outcome)
    }

    pub fn is_completed(&self) -> bool {
        self.result.is_completed()
    }
}

/// Scheduler lifecycle: `Created → Running → Stopping → Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum LifecycleState {
    Created = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

impl LifecycleState {
    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            0 => LifecycleState::Created,
            1 => LifecycleState::Running,
            2 => LifecycleState::Stopping,
            _ => LifecycleState::Stopped,
        }
    }
}
