//! The Predictor capability set: the seam between the queue worker and
//! whatever actually computes a result.
//!
//! Out of scope here: the Predictor may be backed by a subprocess, an
//! in-process model, or (in tests) a scripted fake. The Driver only ever
//! calls through these operations and never assumes anything about what is
//! on the other side.

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;

/// A prediction output value before encoding: ordinary JSON, or a (possibly
/// nested) binary handle awaiting upload by the Output Encoder.
#[derive(Debug, Clone)]
pub enum OutputValue {
    Json(Value),
    Binary(BinaryHandle),
    Array(Vec<OutputValue>),
    Object(Vec<(String, OutputValue)>),
}

impl From<Value> for OutputValue {
    fn from(value: Value) -> Self {
        OutputValue::Json(value)
    }
}

/// A binary output the Predictor has materialized to a local file.
#[derive(Debug, Clone)]
pub struct BinaryHandle {
    pub path: PathBuf,
    pub content_type: Option<String>,
}

/// The nine operations the Driver uses to run one prediction and observe its
/// progress, plus schema discovery for the Input Decoder.
#[async_trait]
pub trait Predictor: Send + Sync {
    /// The Predictor's declared input schema (OpenAPI-shaped), used by the
    /// Input Decoder to validate and coerce job inputs.
    fn input_schema(&self) -> Value;

    /// Load the model. Called exactly once, at worker startup.
    async fn setup(&self) -> Result<(), PredictorError>;

    /// Start a prediction for `input`. Returns once the prediction has been
    /// kicked off; completion is observed through the polling operations
    /// below, not through this call's return.
    async fn run(&self, input: Value) -> Result<(), PredictorError>;

    fn is_processing(&self) -> bool;
    fn has_logs_waiting(&self) -> bool;
    fn read_logs(&self) -> Vec<String>;
    fn has_output_waiting(&self) -> bool;
    fn read_output(&self) -> Vec<OutputValue>;
    fn is_output_generator(&self) -> bool;
    fn error(&self) -> Option<String>;
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum PredictorError {
    #[error("setup failed: {0}")]
    SetupFailed(String),
    #[error("failed to start prediction: {0}")]
    RunFailed(String),
}
