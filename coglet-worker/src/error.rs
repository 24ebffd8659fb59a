//! Error kinds for the prediction queue worker, one typed enum per the error
//! kinds a job can surface.

use thiserror::Error;

/// Errors from validating and coercing a job's input payload.
///
/// Display messages are the literal `error` string pushed to a job's reply
/// channel — no `kind:` tag. The error *kind* (`input_invalid`,
/// `input_fetch_failed`, ...) lives in the variant name and in log fields,
/// never in the human-readable text a caller sees.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("{0}")]
    InputInvalid(String),

    #[error("failed to fetch file input: {0}")]
    FetchFailed(String),
}

/// Errors from encoding a prediction output value, including file uploads.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("failed to upload output: {0}")]
    UploadFailed(String),
}

/// Errors from driving one prediction to completion.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("{0}")]
    Predictor(String),

    #[error("predictor yielded {0} values in scalar mode, expected exactly 1")]
    ScalarOutputInvariant(usize),

    #[error("Prediction timed out")]
    TimedOut,

    #[error(transparent)]
    Encode(#[from] EncodeError),
}

/// A malformed job message: not JSON, or missing `response_queue`. This is
/// the one error kind that is logged but never acked — there is no reply
/// channel known to report it to.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("message_malformed: payload is not valid JSON: {0}")]
    NotJson(#[from] serde_json::Error),

    #[error("message_malformed: payload is missing response_queue")]
    MissingResponseQueue,
}

/// Errors surfaced by the stream client against the queue service.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("stream_transient: {0}")]
    Transient(#[from] redis::RedisError),
}
