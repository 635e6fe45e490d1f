use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio::sync::broadcast;

use crate::config::{PinConfig, PinMode, Pull};
use crate::error::AppError;

/// Electrical edge observed on a watched input line.
#[derive(Debug, Clone, Serialize)]
pub struct EdgeEvent {
    pub pin_id: u8,
    /// Level after the edge: 1 for rising, 0 for falling.
    pub level: u8,
    pub timestamp_ms: u64,
}

/// Fan-out point for asynchronous edge notifications. Dispatch never
/// blocks; slow subscribers lag and lose the oldest events.
pub struct EdgeDispatcher {
    tx: broadcast::Sender<EdgeEvent>,
}

impl EdgeDispatcher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn dispatch(&self, event: EdgeEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EdgeEvent> {
        self.tx.subscribe()
    }
}

pub type EdgeHandler = Arc<EdgeDispatcher>;

/// One physical I/O line, exclusively owned by its pin record.
pub trait PinLine: Send + Sync {
    fn set_mode(&self, mode: PinMode) -> Result<(), AppError>;
    /// Input bias. Providers may ignore this for lines in output mode.
    fn set_pull(&self, pull: Pull) -> Result<(), AppError>;
    fn read(&self) -> Result<u8, AppError>;
    /// Writes an electrical level. Must be accepted while the line is
    /// still in input mode so a boot value can be asserted before the
    /// switch to drive mode.
    fn write(&self, level: u8) -> Result<(), AppError>;
    fn watch_edges(&self, handler: EdgeHandler) -> Result<(), AppError>;
}

/// Factory for line capabilities, injected wherever pins are bound so
/// tests can run against an in-memory provider.
pub trait LineProvider: Send + Sync {
    fn bind(&self, pin: &PinConfig) -> Result<Box<dyn PinLine>, AppError>;
}

pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
