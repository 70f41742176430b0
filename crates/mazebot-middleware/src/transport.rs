//! Outbound byte sinks for the [`ChannelRouter`][crate::router::ChannelRouter].
//!
//! The router never writes to a socket or UART itself.  It hands finished
//! `[channel id][payload]` frames to a [`Transport`], which forwards them to
//! the outside world.
//!
//! - [`ChannelTransport`] – queues frames for a writer task, dropping them
//!   while the queue is full.
//! - [`InMemoryTransport`] – keeps frames for inspection.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use mazebot_types::MazeError;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::warn;

/// Every outbound link must implement this trait.
pub trait Transport: Send + Sync {
    /// Forward one `[channel id][payload]` frame.
    fn send_bytes(&self, frame: &[u8]) -> Result<(), MazeError>;

    /// Human-readable transport name for logging.
    fn name(&self) -> &'static str;
}

/// Queues frames on a bounded channel; the receiving end owns the I/O.
///
/// A stalled writer never blocks the control loop: frames that find the
/// queue full are dropped and counted, and a warning is logged once per
/// congestion episode.
#[derive(Clone, Debug)]
pub struct ChannelTransport {
    tx: mpsc::Sender<Vec<u8>>,
    dropped: Arc<AtomicU64>,
    congested: Arc<AtomicBool>,
}

impl ChannelTransport {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let transport = Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
            congested: Arc::new(AtomicBool::new(false)),
        };
        (transport, rx)
    }

    /// Frames dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Transport for ChannelTransport {
    fn send_bytes(&self, frame: &[u8]) -> Result<(), MazeError> {
        match self.tx.try_send(frame.to_vec()) {
            Ok(()) => {
                self.congested.store(false, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if !self.congested.swap(true, Ordering::Relaxed) {
                    warn!(dropped = total, "outbound queue full, dropping frames");
                }
                Ok(())
            }
            Err(TrySendError::Closed(_)) => {
                Err(MazeError::Transport("writer task has shut down".to_string()))
            }
        }
    }

    fn name(&self) -> &'static str {
        "channel"
    }
}

/// Stores every frame in memory.
#[derive(Clone, Default, Debug)]
pub struct InMemoryTransport {
    frames: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return every frame sent so far.
    pub fn take(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut *self.frames.lock())
    }

    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Transport for InMemoryTransport {
    fn send_bytes(&self, frame: &[u8]) -> Result<(), MazeError> {
        self.frames.lock().push(frame.to_vec());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "in_memory"
    }
}
