//! Timing Stats Sink: bounded-length append of setup/run durations to a
//! pair of sibling streams named after the input queue.

use std::time::Duration;

use crate::error::StreamError;
use crate::stream::StreamClient;

pub const STATS_QUEUE_LENGTH: usize = 100;

pub async fn record_setup(client: &mut dyn StreamClient, input_queue: &str, duration: Duration) -> Result<(), StreamError> {
    tracing::info!(duration_secs = duration.as_secs_f64(), "Setup time");
    append(client, &format!("{input_queue}-setup-time"), duration).await
}

pub async fn record_run(client: &mut dyn StreamClient, input_queue: &str, duration: Duration) -> Result<(), StreamError> {
    tracing::info!(duration_secs = duration.as_secs_f64(), "Run time");
    append(client, &format!("{input_queue}-run-time"), duration).await
}

async fn append(client: &mut dyn StreamClient, stream: &str, duration: Duration) -> Result<(), StreamError> {
    let fields = [("duration", duration.as_secs_f64().to_string())];
    client.append(stream, &fields, STATS_QUEUE_LENGTH).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::fake::FakeStreamClient;

    #[tokio::test]
    async fn record_setup_appends_to_setup_time_stream() {
        let mut client = FakeStreamClient::new();
        record_setup(&mut client, "predictions", Duration::from_secs_f64(1.5)).await.unwrap();

        assert_eq!(client.appended.len(), 1);
        let (stream, fields) = &client.appended[0];
        assert_eq!(stream, "predictions-setup-time");
        assert_eq!(fields, &vec![("duration".to_string(), "1.5".to_string())]);
    }

    #[tokio::test]
    async fn record_run_appends_to_run_time_stream() {
        let mut client = FakeStreamClient::new();
        record_run(&mut client, "predictions", Duration::from_secs_f64(0.25)).await.unwrap();

        let (stream, _) = &client.appended[0];
        assert_eq!(stream, "predictions-run-time");
    }
}
