//! Outbound transports.

use crate::error::{NodeError, Result};
use crate::protocol::Message;
use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Sends messages out of the node.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send(&self, message: Message) -> Result<()>;
}

/// Writes one JSON line per message to a sink.
///
/// All lines go through a single writer task, so concurrent senders never
/// interleave partial lines.
pub struct StdioTransport {
    lines: mpsc::UnboundedSender<String>,
}

impl StdioTransport {
    /// Write to the process's stdout. Must be called from within a Tokio runtime.
    pub fn stdout() -> Self {
        Self::with_writer(tokio::io::stdout())
    }

    /// Write to any async sink. Must be called from within a Tokio runtime.
    pub fn with_writer<W>(writer: W) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (lines, queue) = mpsc::unbounded_channel();
        tokio::spawn(write_lines(writer, queue));
        Self { lines }
    }
}

async fn write_lines<W>(mut writer: W, mut queue: mpsc::UnboundedReceiver<String>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(mut line) = queue.recv().await {
        line.push('\n');
        let written = async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        };
        if let Err(err) = written.await {
            warn!(error = %err, "output closed; writer stopping");
            return;
        }
    }
    debug!("all senders dropped; writer stopping");
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send(&self, message: Message) -> Result<()> {
        let line = message.to_line()?;
        debug!(dest = %message.dest, kind = message.kind(), "send");
        self.lines.send(line).map_err(|_| NodeError::Closed)
    }
}

/// In-memory transport for testing.
///
/// Every sent message is pushed onto the channel returned by
/// [`MemoryTransport::new`].
pub struct MemoryTransport {
    sent: mpsc::UnboundedSender<Message>,
}

impl MemoryTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (sent, outbox) = mpsc::unbounded_channel();
        (Self { sent }, outbox)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, message: Message) -> Result<()> {
        self.sent.send(message).map_err(|_| NodeError::Closed)
    }
}
