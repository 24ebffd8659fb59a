//! Status Frame: the snapshot pushed to a job's reply channel.

use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameStatus {
    Processing,
    Succeeded,
    Failed,
}

/// Output carried by a frame: absent, a single value (scalar mode), or an
/// append-only sequence (generator mode).
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum FrameOutput {
    Null,
    Single(Value),
    Stream(Vec<Value>),
}

impl Default for FrameOutput {
    fn default() -> Self {
        Self::Null
    }
}

/// A complete snapshot of a job's observable state, appended to the job's
/// reply channel. Consumers need only ever read the most recent frame;
/// `logs` and, in generator mode, `output` are always a prefix of the next
/// frame's value for the same job.
#[derive(Debug, Clone, Serialize)]
pub struct StatusFrame {
    pub status: FrameStatus,
    pub output: FrameOutput,
    pub logs: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusFrame {
    pub fn processing(output: FrameOutput, logs: Vec<String>) -> Self {
        Self { status: FrameStatus::Processing, output, logs, error: None }
    }

    pub fn succeeded(output: FrameOutput, logs: Vec<String>) -> Self {
        Self { status: FrameStatus::Succeeded, output, logs, error: None }
    }

    pub fn failed(logs: Vec<String>, error: String) -> Self {
        Self { status: FrameStatus::Failed, output: FrameOutput::Null, logs, error: Some(error) }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, FrameStatus::Succeeded | FrameStatus::Failed)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("StatusFrame always serializes")
    }
}

/// A single `{duration}` record appended to a timing stream.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TimingRecord {
    pub duration: f64,
}
