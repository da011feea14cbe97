//! A single framed TCP connection.
//!
//! Frames are a u32 big-endian length prefix followed by one encoded
//! [`WireMessage`]. Each connection runs a reader task (frames → the
//! transport's event channel) and a writer task (queued messages → frames),
//! so sends never block the transport loop.

use mesh_core::WireMessage;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Maximum frame size (8 MiB). Payloads are opaque, but a frame this large is
/// either a protocol violation or garbage on the port.
pub const MAX_FRAME_SIZE: usize = 8 * 1024 * 1024;

/// Event emitted by a connection's reader task.
#[derive(Debug)]
pub enum ConnEvent {
    /// A well-formed message arrived.
    Frame { conn_id: u64, msg: WireMessage },
    /// The connection ended: EOF, I/O error, or a malformed frame.
    Closed { conn_id: u64 },
}

/// One live connection, either direction.
pub struct Connection {
    pub conn_id: u64,
    outbox: mpsc::UnboundedSender<WireMessage>,
    reader_task: Option<JoinHandle<()>>,
    writer_task: Option<JoinHandle<()>>,
}

impl Connection {
    /// Take ownership of a stream and spawn its reader and writer tasks.
    pub fn spawn(
        conn_id: u64,
        stream: TcpStream,
        event_tx: mpsc::UnboundedSender<ConnEvent>,
    ) -> Self {
        let (read_half, write_half) = stream.into_split();
        let (outbox, outbox_rx) = mpsc::unbounded_channel();

        let reader_task = tokio::spawn(async move {
            Self::read_loop(conn_id, read_half, event_tx).await;
        });
        let writer_task = tokio::spawn(async move {
            Self::write_loop(conn_id, write_half, outbox_rx).await;
        });

        Self {
            conn_id,
            outbox,
            reader_task: Some(reader_task),
            writer_task: Some(writer_task),
        }
    }

    /// Queue a message for sending. Returns false if the writer is gone.
    pub fn send(&self, msg: WireMessage) -> bool {
        self.outbox.send(msg).is_ok()
    }

    async fn read_loop(
        conn_id: u64,
        mut read: OwnedReadHalf,
        event_tx: mpsc::UnboundedSender<ConnEvent>,
    ) {
        loop {
            let mut len_buf = [0u8; 4];
            if read.read_exact(&mut len_buf).await.is_err() {
                debug!(conn_id, "connection stream ended");
                break;
            }
            let len = u32::from_be_bytes(len_buf) as usize;
            if len > MAX_FRAME_SIZE {
                warn!(conn_id, len, "oversized frame, dropping connection");
                break;
            }

            let mut frame = vec![0u8; len];
            if read.read_exact(&mut frame).await.is_err() {
                debug!(conn_id, "connection closed mid-frame");
                break;
            }

            match WireMessage::decode(&frame) {
                Ok(msg) => {
                    if event_tx.send(ConnEvent::Frame { conn_id, msg }).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(conn_id, error = %e, "malformed frame, dropping connection");
                    break;
                }
            }
        }

        let _ = event_tx.send(ConnEvent::Closed { conn_id });
    }

    async fn write_loop(
        conn_id: u64,
        mut write: OwnedWriteHalf,
        mut outbox_rx: mpsc::UnboundedReceiver<WireMessage>,
    ) {
        while let Some(msg) = outbox_rx.recv().await {
            let body = msg.encode();
            let len = (body.len() as u32).to_be_bytes();
            if write.write_all(&len).await.is_err() || write.write_all(&body).await.is_err() {
                // The reader will observe the broken stream and report Closed
                warn!(conn_id, kind = msg.kind(), "write failed");
                break;
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        if let Some(task) = self.writer_task.take() {
            task.abort();
        }
    }
}
