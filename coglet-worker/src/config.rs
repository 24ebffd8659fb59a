//! Worker configuration: the fixed constructor parameters plus an
//! environment-driven fallback for process bootstrap.

use std::time::Duration;

/// Horizon after which a pending entry is considered abandoned and eligible
/// for reclaim by another consumer. Named `max_processing_time` in the
/// original worker.
const DEFAULT_RECLAIM_AFTER: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub redis_host: String,
    pub redis_port: u16,
    pub redis_db: i64,
    pub input_queue: String,
    pub upload_url: String,
    pub consumer_id: String,
    pub model_id: Option<String>,
    /// Accepted and stored, never read — reserved for future use, matching
    /// the original worker.
    pub log_queue: Option<String>,
    pub predict_timeout: Option<Duration>,
    pub reclaim_after: Duration,
}

impl WorkerConfig {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        redis_host: String,
        redis_port: u16,
        input_queue: String,
        upload_url: String,
        consumer_id: String,
        model_id: Option<String>,
        log_queue: Option<String>,
        predict_timeout: Option<f64>,
        redis_db: i64,
    ) -> Self {
        Self {
            redis_host,
            redis_port,
            redis_db,
            input_queue,
            upload_url,
            consumer_id,
            model_id,
            log_queue,
            predict_timeout: predict_timeout.map(Duration::from_secs_f64),
            reclaim_after: DEFAULT_RECLAIM_AFTER,
        }
    }

    /// Build from environment variables, for process bootstrap.
    pub fn from_env() -> Result<Self, anyhow::Error> {
        use std::env;

        let redis_host = env::var("REDIS_HOST").unwrap_or_else(|_| "localhost".to_string());
        let redis_port = env::var("REDIS_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(6379);
        let redis_db = env::var("REDIS_DB").ok().and_then(|v| v.parse().ok()).unwrap_or(0);
        let input_queue = env::var("INPUT_QUEUE").map_err(|_| anyhow::anyhow!("INPUT_QUEUE is required"))?;
        let upload_url = env::var("UPLOAD_URL").map_err(|_| anyhow::anyhow!("UPLOAD_URL is required"))?;
        let consumer_id = env::var("CONSUMER_ID").map_err(|_| anyhow::anyhow!("CONSUMER_ID is required"))?;
        let model_id = env::var("MODEL_ID").ok();
        let log_queue = env::var("LOG_QUEUE").ok();
        let predict_timeout = env::var("PREDICT_TIMEOUT").ok().and_then(|v| v.parse::<f64>().ok());

        Ok(Self::new(
            redis_host,
            redis_port,
            input_queue,
            upload_url,
            consumer_id,
            model_id,
            log_queue,
            predict_timeout,
            redis_db,
        ))
    }
}
