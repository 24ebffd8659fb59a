//! Stream Client: thin adapter over the queue service's consumer-group
//! operations, plus the reply-channel plumbing the Worker Loop pushes
//! Status Frames through.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use redis::streams::{StreamAutoClaimOptions, StreamAutoClaimReply, StreamId, StreamReadOptions, StreamReadReply};

use crate::driver::{ReplyChannel, ReplySink};
use crate::error::StreamError;
use crate::frame::StatusFrame;

/// A single raw stream entry: (message id assigned by the queue service, raw
/// JSON payload string).
pub type RawMessage = (String, String);

#[async_trait]
pub trait StreamClient: Send + Sync {
    /// Claim at most one pending entry idle for at least `idle`. `None` if no
    /// entry qualifies.
    async fn reclaim_one(&mut self, idle: Duration) -> Result<Option<RawMessage>, StreamError>;

    /// Block up to `block` for a new entry not yet delivered to this group.
    /// `None` on timeout.
    async fn read_one(&mut self, block: Duration) -> Result<Option<RawMessage>, StreamError>;

    /// Acknowledge `id` and remove it from the stream. Best-effort: ack
    /// failures are surfaced, delete failures are not (the entry is already
    /// acked and will not be reclaimed again).
    async fn ack_and_delete(&mut self, id: &str) -> Result<(), StreamError>;

    /// Append a fields mapping to `stream`, capping its approximate length
    /// at `maxlen`.
    async fn append(&mut self, stream: &str, fields: &[(&str, String)], maxlen: usize) -> Result<(), StreamError>;
}

/// Redis Streams implementation of [`StreamClient`].
///
/// `input_queue` doubles as both the stream key and the consumer group name:
/// one group per input queue, matching the original worker's convention.
pub struct RedisStreamClient {
    conn: ConnectionManager,
    input_queue: String,
    consumer_id: String,
}

impl RedisStreamClient {
    pub async fn connect(
        host: &str,
        port: u16,
        db: i64,
        input_queue: String,
        consumer_id: String,
    ) -> Result<Self, StreamError> {
        let url = format!("redis://{host}:{port}/{db}");
        let client = redis::Client::open(url).map_err(StreamError::Transient)?;
        // ConnectionManager reconnects with bounded exponential backoff under
        // the hood, so transient connection drops don't need handling here.
        let mut conn = client.get_connection_manager().await.map_err(StreamError::Transient)?;

        let created: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&input_queue)
            .arg(&input_queue)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;
        if let Err(e) = created
            && !e.to_string().contains("BUSYGROUP")
        {
            return Err(e.into());
        }

        tracing::info!(%host, port, db, "Connected to queue");

        Ok(Self { conn, input_queue, consumer_id })
    }

    /// A cloned connection for building reply channels. Cloning a
    /// `ConnectionManager` is cheap; it's a handle to the same managed
    /// connection.
    pub fn connection(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

fn stream_value(entry: &StreamId) -> Option<String> {
    match entry.map.get("value")? {
        redis::Value::BulkString(b) => Some(String::from_utf8_lossy(b).into_owned()),
        redis::Value::SimpleString(s) => Some(s.clone()),
        _ => None,
    }
}

#[async_trait]
impl StreamClient for RedisStreamClient {
    async fn reclaim_one(&mut self, idle: Duration) -> Result<Option<RawMessage>, StreamError> {
        let opts = StreamAutoClaimOptions::default().count(1);
        let reply: StreamAutoClaimReply = self
            .conn
            .xautoclaim_options(
                &self.input_queue,
                &self.input_queue,
                &self.consumer_id,
                idle.as_millis() as u64,
                "0-0",
                opts,
            )
            .await?;

        match reply.claimed.into_iter().next() {
            Some(entry) => Ok(stream_value(&entry).map(|v| (entry.id, v))),
            None => Ok(None),
        }
    }

    async fn read_one(&mut self, block: Duration) -> Result<Option<RawMessage>, StreamError> {
        let opts = StreamReadOptions::default()
            .group(&self.input_queue, &self.consumer_id)
            .count(1)
            .block(block.as_millis() as usize);

        let reply: StreamReadReply = self.conn.xread_options(&[&self.input_queue], &[">"], &opts).await?;

        let Some(stream_key) = reply.keys.into_iter().next() else {
            return Ok(None);
        };
        let Some(entry) = stream_key.ids.into_iter().next() else {
            return Ok(None);
        };
        Ok(stream_value(&entry).map(|v| (entry.id, v)))
    }

    async fn ack_and_delete(&mut self, id: &str) -> Result<(), StreamError> {
        let _: i64 = self.conn.xack(&self.input_queue, &self.input_queue, &[id]).await?;
        if let Err(e) = self.conn.xdel::<_, _, i64>(&self.input_queue, &[id]).await {
            tracing::warn!(%id, error = %e, "xdel failed after ack (best-effort)");
        }
        Ok(())
    }

    async fn append(&mut self, stream: &str, fields: &[(&str, String)], maxlen: usize) -> Result<(), StreamError> {
        let mut cmd = redis::cmd("XADD");
        cmd.arg(stream).arg("MAXLEN").arg("~").arg(maxlen).arg("*");
        for (k, v) in fields {
            cmd.arg(*k).arg(v);
        }
        cmd.query_async::<()>(&mut self.conn).await?;
        Ok(())
    }
}

/// Pushes Status Frames onto a job's reply list via `RPUSH`.
pub struct RedisReplySink {
    conn: ConnectionManager,
    response_queue: String,
}

#[async_trait]
impl ReplySink for RedisReplySink {
    async fn push(&mut self, frame: &StatusFrame) {
        let payload = frame.to_json();
        if let Err(e) = self.conn.rpush::<_, _, i64>(&self.response_queue, payload).await {
            tracing::error!(response_queue = %self.response_queue, error = %e, "failed to push status frame to reply channel");
        }
    }
}

/// Opens a [`RedisReplySink`] per job, sharing one managed connection.
pub struct RedisReplyChannel {
    conn: ConnectionManager,
}

impl RedisReplyChannel {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl ReplyChannel for RedisReplyChannel {
    async fn open(&self, response_queue: &str) -> Box<dyn ReplySink> {
        Box::new(RedisReplySink { conn: self.conn.clone(), response_queue: response_queue.to_string() })
    }
}

#[cfg(test)]
pub mod fake {
    //! An in-memory [`StreamClient`] for Worker Loop tests: no real Redis
    //! instance, just two VecDeques modeling the pending-entries list and
    //! the unclaimed tail of the stream.

    use std::collections::VecDeque;

    use super::*;

    pub struct FakeStreamClient {
        pub pending: VecDeque<RawMessage>,
        pub unclaimed: VecDeque<RawMessage>,
        pub acked: Vec<String>,
        pub appended: Vec<(String, Vec<(String, String)>)>,
        next_id: u64,
    }

    impl FakeStreamClient {
        pub fn new() -> Self {
            Self { pending: VecDeque::new(), unclaimed: VecDeque::new(), acked: Vec::new(), appended: Vec::new(), next_id: 1 }
        }

        pub fn enqueue(&mut self, payload: impl Into<String>) -> String {
            let id = format!("{}-0", self.next_id);
            self.next_id += 1;
            self.unclaimed.push_back((id.clone(), payload.into()));
            id
        }
    }

    #[async_trait]
    impl StreamClient for FakeStreamClient {
        async fn reclaim_one(&mut self, _idle: Duration) -> Result<Option<RawMessage>, StreamError> {
            Ok(self.pending.pop_front())
        }

        async fn read_one(&mut self, _block: Duration) -> Result<Option<RawMessage>, StreamError> {
            Ok(self.unclaimed.pop_front())
        }

        async fn ack_and_delete(&mut self, id: &str) -> Result<(), StreamError> {
            self.acked.push(id.to_string());
            Ok(())
        }

        async fn append(&mut self, stream: &str, fields: &[(&str, String)], _maxlen: usize) -> Result<(), StreamError> {
            self.appended.push((stream.to_string(), fields.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()));
            Ok(())
        }
    }

    // `ReplyChannel::open` returns an owned `Box<dyn ReplySink>`, so the fake
    // can't hand back something borrowing the channel directly the way a real
    // client holding a connection handle would. Route frames through an
    // `mpsc` channel instead: `open` hands back a sink backed by a sender,
    // and the test reads frames off the receiver side after the job completes.
    pub struct ChannelReplyChannel {
        pub tx: tokio::sync::mpsc::UnboundedSender<(String, StatusFrame)>,
    }

    struct ChannelReplySink {
        response_queue: String,
        tx: tokio::sync::mpsc::UnboundedSender<(String, StatusFrame)>,
    }

    #[async_trait]
    impl ReplySink for ChannelReplySink {
        async fn push(&mut self, frame: &StatusFrame) {
            let _ = self.tx.send((self.response_queue.clone(), frame.clone()));
        }
    }

    #[async_trait]
    impl ReplyChannel for ChannelReplyChannel {
        async fn open(&self, response_queue: &str) -> Box<dyn ReplySink> {
            Box::new(ChannelReplySink { response_queue: response_queue.to_string(), tx: self.tx.clone() })
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[tokio::test]
        async fn reclaim_one_takes_priority_over_read_one() {
            let mut client = FakeStreamClient::new();
            client.enqueue("fresh");
            client.pending.push_back(("99-0".to_string(), "reclaimed".to_string()));

            let (id, payload) = client.reclaim_one(Duration::from_secs(1)).await.unwrap().unwrap();
            assert_eq!(id, "99-0");
            assert_eq!(payload, "reclaimed");

            let (_, payload) = client.read_one(Duration::from_secs(1)).await.unwrap().unwrap();
            assert_eq!(payload, "fresh");
        }

        #[tokio::test]
        async fn ack_and_delete_records_id() {
            let mut client = FakeStreamClient::new();
            client.ack_and_delete("1-0").await.unwrap();
            assert_eq!(client.acked, vec!["1-0".to_string()]);
        }
    }
}
