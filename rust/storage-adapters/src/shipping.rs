//! Forwards this process's log lines to a telemetry adapter.
//!
//! [`LogShipper`] is a `MakeWriter`: each formatted event becomes one line
//! queued on a bounded channel, and a background task writes the queue
//! through [`TelemetryClient::write`]. Formatting never waits on the network;
//! when the queue is full the line is dropped and counted.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;
use tracing_subscriber::fmt::MakeWriter;

use crate::client::TelemetryClient;

#[derive(Debug, Clone)]
pub struct LogShipper {
    tx: mpsc::Sender<String>,
    dropped: Arc<AtomicU64>,
}

impl LogShipper {
    /// Start forwarding through `client`. The task ends once every shipper
    /// clone is gone and the queue is drained.
    pub fn spawn(client: TelemetryClient, buffer: usize) -> (Self, JoinHandle<()>) {
        let (shipper, rx) = Self::channel(buffer);
        let handle = tokio::spawn(forward(client, rx));
        (shipper, handle)
    }

    pub(crate) fn channel(buffer: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let shipper = Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (shipper, rx)
    }

    /// Lines discarded because the queue was full or closed.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

// Failures here are logged under this module's target, which the shipping
// layer filters out.
async fn forward(mut client: TelemetryClient, mut rx: mpsc::Receiver<String>) {
    while let Some(line) = rx.recv().await {
        if let Err(e) = client.write(&line).await {
            warn!("log line not shipped: {}", e);
        }
    }
}

impl<'a> MakeWriter<'a> for LogShipper {
    type Writer = ShippedLine;

    fn make_writer(&'a self) -> Self::Writer {
        ShippedLine {
            buf: Vec::new(),
            tx: self.tx.clone(),
            dropped: Arc::clone(&self.dropped),
        }
    }
}

/// One event's bytes; queued as a line when dropped.
#[derive(Debug)]
pub struct ShippedLine {
    buf: Vec<u8>,
    tx: mpsc::Sender<String>,
    dropped: Arc<AtomicU64>,
}

impl io::Write for ShippedLine {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(bytes);
        Ok(bytes.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for ShippedLine {
    fn drop(&mut self) {
        let text = String::from_utf8_lossy(&self.buf);
        let line = text.trim_end();
        if line.is_empty() {
            return;
        }
        if self.tx.try_send(line.to_string()).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_each_writer_queues_one_trimmed_line() {
        let (shipper, mut rx) = LogShipper::channel(4);
        {
            let mut line = shipper.make_writer();
            line.write_all(b"{\"msg\":").unwrap();
            line.write_all(b"\"hello\"}\n").unwrap();
        }
        // Empty events are not shipped
        drop(shipper.make_writer());

        assert_eq!(rx.try_recv().unwrap(), "{\"msg\":\"hello\"}");
        assert!(rx.try_recv().is_err());
        assert_eq!(shipper.dropped(), 0);
    }

    #[test]
    fn test_full_queue_drops_and_counts() {
        let (shipper, mut rx) = LogShipper::channel(1);
        for n in 0..3 {
            write!(shipper.make_writer(), "line {n}").unwrap();
        }
        assert_eq!(rx.try_recv().unwrap(), "line 0");
        assert_eq!(shipper.dropped(), 2);

        drop(rx);
        write!(shipper.make_writer(), "late").unwrap();
        assert_eq!(shipper.dropped(), 3);
    }
}
