//! Worker Loop: the lifecycle that ties the other components together —
//! setup, claim/read, decode, drive, ack, repeat, until a shutdown signal is
//! observed.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::config::WorkerConfig;
use crate::decode::InputDecoder;
use crate::driver::{PredictionDriver, ReplyChannel, ReplySink};
use crate::encode::OutputEncoder;
use crate::error::{DecodeError, MessageError};
use crate::frame::StatusFrame;
use crate::predictor::Predictor;
use crate::stream::{RawMessage, StreamClient};
use crate::timing;

const READ_BLOCK: Duration = Duration::from_secs(1);

pub struct Worker<S: StreamClient, R: ReplyChannel> {
    config: WorkerConfig,
    stream: S,
    reply_channel: R,
    predictor: Arc<dyn Predictor>,
    decoder: InputDecoder,
    encoder: OutputEncoder,
}

impl<S: StreamClient, R: ReplyChannel> Worker<S, R> {
    pub fn new(config: WorkerConfig, predictor: Arc<dyn Predictor>, stream: S, reply_channel: R) -> Result<Self, DecodeError> {
        let decoder = InputDecoder::new(&predictor.input_schema())?;
        let encoder = OutputEncoder::new(config.upload_url.clone());
        Ok(Self { config, stream, reply_channel, predictor, decoder, encoder })
    }

    /// Run setup, then the claim/read/decode/drive/ack loop until a shutdown
    /// signal is observed. Returns after the in-flight job (if any) finishes.
    pub async fn run(mut self) -> anyhow::Result<()> {
        let should_exit = install_shutdown_handler();

        let setup_start = Instant::now();
        self.predictor.setup().await.map_err(|e| anyhow::anyhow!("setup failed: {e}"))?;
        let setup_time = setup_start.elapsed();
        if let Err(e) = timing::record_setup(&mut self.stream, &self.config.input_queue, setup_time).await {
            tracing::warn!(error = %e, "failed to record setup time");
        }

        tracing::info!(input_queue = %self.config.input_queue, "Waiting for message");

        while !should_exit.load(Ordering::Relaxed) {
            let message = match self.next_message().await {
                Ok(Some(m)) => m,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(error = %e, "stream_transient: failed to receive message");
                    continue;
                }
            };

            self.handle_message(message).await;
        }

        tracing::info!("Graceful shutdown complete");
        Ok(())
    }

    async fn next_message(&mut self) -> Result<Option<RawMessage>, crate::error::StreamError> {
        if let Some(m) = self.stream.reclaim_one(self.config.reclaim_after).await? {
            return Ok(Some(m));
        }
        self.stream.read_one(READ_BLOCK).await
    }

    async fn handle_message(&mut self, message: RawMessage) {
        let (id, raw) = message;

        let (response_queue, input) = match parse_message(&raw) {
            Ok(parsed) => parsed,
            Err(e) => {
                // message_malformed: there is no known reply channel, so
                // this is logged and left unacked for the stream's own
                // reclaim/retention policy to handle.
                tracing::warn!(%id, error = %e, "message_malformed");
                return;
            }
        };

        tracing::info!(%id, "Received message");

        let deadline = self.config.predict_timeout.map(|t| Instant::now() + t);
        let mut reply = self.reply_channel.open(&response_queue).await;

        let run_start = Instant::now();
        self.process_job(input, deadline, reply.as_mut()).await;
        let run_time = run_start.elapsed();

        if let Err(e) = self.stream.ack_and_delete(&id).await {
            tracing::warn!(%id, error = %e, "stream_transient: ack/delete failed");
        }

        if let Err(e) = timing::record_run(&mut self.stream, &self.config.input_queue, run_time).await {
            tracing::warn!(error = %e, "failed to record run time");
        }
    }

    /// Decode the input and, if that succeeds, drive the prediction. Both
    /// paths push exactly one terminal frame before returning: decode
    /// failures push it here (the Driver never started), Driver failures
    /// and successes push it internally.
    async fn process_job(&mut self, input: Value, deadline: Option<Instant>, reply: &mut dyn ReplySink) {
        match self.decoder.decode(input).await {
            Ok(decoded) => {
                let driver = PredictionDriver::new(&self.encoder);
                if let Err(e) = driver.drive(self.predictor.as_ref(), decoded.value, reply, deadline).await {
                    tracing::error!(error = %e, "prediction failed");
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "input decode failed");
                reply.push(&StatusFrame::failed(Vec::new(), e.to_string())).await;
            }
        }
    }
}

#[derive(Debug, serde::Deserialize)]
struct JobMessageFields {
    response_queue: Option<String>,
    #[serde(default)]
    input: Value,
}

fn parse_message(raw: &str) -> Result<(String, Value), MessageError> {
    let value: Value = serde_json::from_str(raw)?;
    let fields: JobMessageFields = serde_json::from_value(value)?;
    let response_queue = fields.response_queue.ok_or(MessageError::MissingResponseQueue)?;
    Ok((response_queue, fields.input))
}

fn install_shutdown_handler() -> Arc<AtomicBool> {
    let should_exit = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&should_exit);
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            let mut term = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to install SIGTERM handler");
                    return;
                }
            };
            term.recv().await;
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        tracing::info!("Caught termination signal, finishing current job before exit");
        flag.store(true, Ordering::Relaxed);
    });
    should_exit
}
