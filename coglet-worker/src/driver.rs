//! Prediction Driver: drives one Predictor invocation end-to-end, assembling
//! the ordered sequence of Status Frames pushed to the job's reply channel.

use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::encode::OutputEncoder;
use crate::error::DriverError;
use crate::frame::{FrameOutput, StatusFrame};
use crate::predictor::Predictor;

/// A sink for the frames produced during a single job. Concrete
/// implementations push onto the job's reply channel; push failures are
/// swallowed and logged here, not propagated, since a failed push does not
/// change whether the job itself succeeded or failed.
#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn push(&mut self, frame: &StatusFrame);
}

/// Opens a [`ReplySink`] for a given job's reply channel. Exists so the
/// Worker Loop doesn't need to know how reply channels are backed.
#[async_trait]
pub trait ReplyChannel: Send + Sync {
    async fn open(&self, response_queue: &str) -> Box<dyn ReplySink>;
}

const POLL_INTERVAL: Duration = Duration::from_millis(20);

pub struct PredictionDriver<'a> {
    encoder: &'a OutputEncoder,
}

impl<'a> PredictionDriver<'a> {
    pub fn new(encoder: &'a OutputEncoder) -> Self {
        Self { encoder }
    }

    /// Drive `predictor` on `input` to completion, pushing frames to `reply`.
    /// `deadline`, if set, is a wall-clock instant after which the
    /// prediction is abandoned and reported `timed_out`. Exactly one
    /// terminal frame (`succeeded` or `failed`) is pushed before this
    /// returns, on every path.
    pub async fn drive(
        &self,
        predictor: &dyn Predictor,
        input: serde_json::Value,
        reply: &mut dyn ReplySink,
        deadline: Option<Instant>,
    ) -> Result<(), DriverError> {
        if Self::deadline_expired(deadline) {
            tracing::debug!("deadline already expired at drive entry");
            reply.push(&StatusFrame::failed(Vec::new(), DriverError::TimedOut.to_string())).await;
            return Err(DriverError::TimedOut);
        }

        if let Err(e) = predictor.run(input).await {
            reply.push(&StatusFrame::failed(Vec::new(), e.to_string())).await;
            return Err(DriverError::Predictor(e.to_string()));
        }

        let generator = predictor.is_output_generator();
        tracing::debug!(generator, "prediction started");

        if generator {
            self.drive_generator(predictor, reply, deadline).await
        } else {
            self.drive_scalar(predictor, reply, deadline).await
        }
    }

    fn deadline_expired(deadline: Option<Instant>) -> bool {
        deadline.is_some_and(|d| Instant::now() >= d)
    }

    async fn fail_timed_out(reply: &mut dyn ReplySink, logs: Vec<String>) -> DriverError {
        reply.push(&StatusFrame::failed(logs, DriverError::TimedOut.to_string())).await;
        DriverError::TimedOut
    }

    async fn fail_predictor_error(reply: &mut dyn ReplySink, logs: Vec<String>, error: String) -> DriverError {
        reply.push(&StatusFrame::failed(logs, error.clone())).await;
        DriverError::Predictor(error)
    }

    async fn encode_or_fail(
        &self,
        reply: &mut dyn ReplySink,
        logs: &[String],
        value: crate::predictor::OutputValue,
    ) -> Result<serde_json::Value, DriverError> {
        match self.encoder.encode(value).await {
            Ok(v) => Ok(v),
            Err(e) => {
                reply.push(&StatusFrame::failed(logs.to_vec(), e.to_string())).await;
                Err(DriverError::Encode(e))
            }
        }
    }

    async fn drive_scalar(
        &self,
        predictor: &dyn Predictor,
        reply: &mut dyn ReplySink,
        deadline: Option<Instant>,
    ) -> Result<(), DriverError> {
        let mut logs = Vec::new();

        while predictor.is_processing() {
            if Self::deadline_expired(deadline) {
                tracing::debug!("deadline expired while scalar prediction still processing");
                return Err(Self::fail_timed_out(reply, logs).await);
            }

            if predictor.has_logs_waiting() {
                logs.extend(predictor.read_logs());
                tracing::trace!(log_count = logs.len(), "pushing scalar processing frame");
                reply.push(&StatusFrame::processing(FrameOutput::Null, logs.clone())).await;
            } else {
                tracing::trace!("no logs waiting, sleeping before next poll");
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        }

        if let Some(error) = predictor.error() {
            logs.extend(predictor.read_logs());
            tracing::debug!(%error, "scalar prediction reported an error");
            return Err(Self::fail_predictor_error(reply, logs, error).await);
        }

        let raw = predictor.read_output();
        if raw.len() != 1 {
            let err = DriverError::ScalarOutputInvariant(raw.len());
            tracing::debug!(got = raw.len(), "scalar output invariant violated");
            reply.push(&StatusFrame::failed(logs.clone(), err.to_string())).await;
            return Err(err);
        }

        let value = raw.into_iter().next().unwrap();
        let output = self.encode_or_fail(reply, &logs, value).await?;
        logs.extend(predictor.read_logs());

        tracing::debug!("scalar prediction succeeded, pushing terminal frame");
        reply.push(&StatusFrame::succeeded(FrameOutput::Single(output), logs)).await;
        Ok(())
    }

    async fn drive_generator(
        &self,
        predictor: &dyn Predictor,
        reply: &mut dyn ReplySink,
        deadline: Option<Instant>,
    ) -> Result<(), DriverError> {
        let mut logs = Vec::new();
        let mut outputs = Vec::new();

        // Pre-output phase: logs only, until the predictor starts producing output.
        while predictor.is_processing() && !predictor.has_output_waiting() {
            if Self::deadline_expired(deadline) {
                tracing::debug!("deadline expired during generator pre-output phase");
                return Err(Self::fail_timed_out(reply, logs).await);
            }
            if predictor.has_logs_waiting() {
                logs.extend(predictor.read_logs());
                tracing::trace!(log_count = logs.len(), "pushing generator pre-output processing frame");
                reply.push(&StatusFrame::processing(FrameOutput::Stream(outputs.clone()), logs.clone())).await;
            } else {
                tracing::trace!("no logs or output waiting, sleeping before next poll");
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        }

        if let Some(error) = predictor.error() {
            logs.extend(predictor.read_logs());
            tracing::debug!(%error, "generator prediction reported an error before streaming");
            return Err(Self::fail_predictor_error(reply, logs, error).await);
        }

        // Streaming phase: drain output and logs together while processing continues.
        while predictor.is_processing() {
            if Self::deadline_expired(deadline) {
                tracing::debug!("deadline expired during generator streaming phase");
                return Err(Self::fail_timed_out(reply, logs).await);
            }

            if !predictor.has_output_waiting() && !predictor.has_logs_waiting() {
                tracing::trace!("no logs or output waiting, sleeping before next poll");
                tokio::time::sleep(POLL_INTERVAL).await;
                continue;
            }

            let raw = predictor.read_output();
            let new_logs = predictor.read_logs();

            // Spurious wakeup: has_output_waiting() was true but both reads
            // came back empty. Nothing changed; skip the frame.
            if raw.is_empty() && new_logs.is_empty() {
                tracing::trace!("spurious wakeup, no new output or logs");
                continue;
            }

            for value in raw {
                let encoded = self.encode_or_fail(reply, &logs, value).await?;
                outputs.push(encoded);
            }
            logs.extend(new_logs);

            tracing::trace!(output_count = outputs.len(), log_count = logs.len(), "pushing generator streaming frame");
            reply.push(&StatusFrame::processing(FrameOutput::Stream(outputs.clone()), logs.clone())).await;
        }

        if let Some(error) = predictor.error() {
            logs.extend(predictor.read_logs());
            tracing::debug!(%error, "generator prediction reported an error after streaming");
            return Err(Self::fail_predictor_error(reply, logs, error).await);
        }

        // Final drain: the predictor may have produced a last batch between
        // the last poll and is_processing() turning false.
        for value in predictor.read_output() {
            let encoded = self.encode_or_fail(reply, &logs, value).await?;
            outputs.push(encoded);
        }
        logs.extend(predictor.read_logs());

        tracing::debug!(output_count = outputs.len(), "generator prediction succeeded, pushing terminal frame");
        reply.push(&StatusFrame::succeeded(FrameOutput::Stream(outputs), logs)).await;
        Ok(())
    }
}
