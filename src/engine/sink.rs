//! Record sinks
//!
//! The engine hands every message to a [`RecordSink`]. Sinks are shared by
//! all partitions of a run and must tolerate concurrent calls.

use super::types::Message;
use crate::error::Result;
use crate::types::ChangeRecord;
use async_trait::async_trait;
use std::io::Write;
use tokio::sync::Mutex;

/// Receiver of records, statuses and watermarks
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Accept one message
    ///
    /// An error aborts the stream partition that produced the message.
    async fn emit(&self, message: Message) -> Result<()>;
}

/// Keeps every message in memory
#[derive(Debug, Default)]
pub struct CollectingSink {
    messages: Mutex<Vec<Message>>,
}

impl CollectingSink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the messages received so far
    pub async fn messages(&self) -> Vec<Message> {
        self.messages.lock().await.clone()
    }

    /// Records received so far, in emission order
    pub async fn records(&self) -> Vec<ChangeRecord> {
        self.messages
            .lock()
            .await
            .iter()
            .filter_map(|m| match m {
                Message::Record { record, .. } => Some(record.clone()),
                _ => None,
            })
            .collect()
    }

    /// Records of one stream partition
    pub async fn records_for(&self, stream: &str, partition: &str) -> Vec<ChangeRecord> {
        self.messages
            .lock()
            .await
            .iter()
            .filter_map(|m| match m {
                Message::Record {
                    stream: s,
                    partition: p,
                    record,
                } if s == stream && p.as_str() == partition => Some(record.clone()),
                _ => None,
            })
            .collect()
    }

    /// Drain the messages
    pub async fn take(&self) -> Vec<Message> {
        std::mem::take(&mut *self.messages.lock().await)
    }
}

#[async_trait]
impl RecordSink for CollectingSink {
    async fn emit(&self, message: Message) -> Result<()> {
        self.messages.lock().await.push(message);
        Ok(())
    }
}

/// Writes one JSON document per message
pub struct JsonLinesSink<W> {
    writer: Mutex<W>,
    include_logs: bool,
}

impl<W: Write + Send> JsonLinesSink<W> {
    /// Write to `writer`, skipping log messages
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
            include_logs: false,
        }
    }

    /// Also write log messages
    #[must_use]
    pub fn with_logs(mut self, include: bool) -> Self {
        self.include_logs = include;
        self
    }

    /// Recover the writer
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

#[async_trait]
impl<W: Write + Send> RecordSink for JsonLinesSink<W> {
    async fn emit(&self, message: Message) -> Result<()> {
        if message.is_log() && !self.include_logs {
            return Ok(());
        }
        let line = serde_json::to_string(&message)?;
        let mut writer = self.writer.lock().await;
        writeln!(writer, "{line}")?;
        writer.flush()?;
        Ok(())
    }
}
