use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use crate::config::{PinConfig, PinMode, Pull};
use crate::error::AppError;
use crate::line::{EdgeEvent, EdgeHandler, LineProvider, PinLine, epoch_millis};

/// In-memory line provider. Levels live in shared state so tests can
/// inject external changes and inspect what the registry drove.
#[derive(Default, Clone)]
pub struct MockLineProvider {
    inner: Arc<MockInner>,
}

#[derive(Default)]
struct MockInner {
    pins: RwLock<HashMap<u8, Mutex<MockLineState>>>,
    ops: Mutex<Vec<String>>,
}

struct MockLineState {
    mode: PinMode,
    pull: Pull,
    level: u8,
    handler: Option<EdgeHandler>,
    fail_writes: bool,
    fail_reads: bool,
}

impl Default for MockLineState {
    fn default() -> Self {
        Self {
            mode: PinMode::Input,
            pull: Pull::None,
            level: 0,
            handler: None,
            fail_writes: false,
            fail_reads: false,
        }
    }
}

impl MockLineProvider {
    /// Current electrical level of a pin, if bound.
    pub fn level(&self, pin_id: u8) -> Option<u8> {
        let pins = self.inner.pins.read().ok()?;
        let pin = pins.get(&pin_id)?.lock().ok()?;
        Some(pin.level)
    }

    /// Simulates an external drive of the line. Fires an edge event when
    /// the level actually changes and the pin is being watched.
    pub fn set_level(&self, pin_id: u8, level: u8) {
        let Ok(pins) = self.inner.pins.read() else {
            return;
        };
        let Some(pin_lock) = pins.get(&pin_id) else {
            return;
        };
        let Ok(mut pin) = pin_lock.lock() else {
            return;
        };

        let old = pin.level;
        pin.level = level;
        if old != level {
            if let Some(handler) = &pin.handler {
                handler.dispatch(EdgeEvent {
                    pin_id,
                    level,
                    timestamp_ms: epoch_millis(),
                });
            }
        }
    }

    /// Makes every subsequent write on the pin fail, for error-path tests.
    pub fn fail_writes(&self, pin_id: u8, fail: bool) {
        if let Ok(pins) = self.inner.pins.read() {
            if let Some(pin_lock) = pins.get(&pin_id) {
                if let Ok(mut pin) = pin_lock.lock() {
                    pin.fail_writes = fail;
                }
            }
        }
    }

    /// Makes every subsequent read on the pin fail, for error-path tests.
    pub fn fail_reads(&self, pin_id: u8, fail: bool) {
        if let Ok(pins) = self.inner.pins.read() {
            if let Some(pin_lock) = pins.get(&pin_id) {
                if let Ok(mut pin) = pin_lock.lock() {
                    pin.fail_reads = fail;
                }
            }
        }
    }

    /// Chronological log of mode/pull/write calls across all pins.
    pub fn ops(&self) -> Vec<String> {
        self.inner
            .ops
            .lock()
            .map(|ops| ops.clone())
            .unwrap_or_default()
    }
}

impl MockInner {
    fn record(&self, op: String) {
        if let Ok(mut ops) = self.ops.lock() {
            ops.push(op);
        }
    }

    fn with_pin<T>(
        &self,
        pin_id: u8,
        f: impl FnOnce(&mut MockLineState) -> Result<T, AppError>,
    ) -> Result<T, AppError> {
        let pins = self
            .pins
            .read()
            .map_err(|e| AppError::Gpio(format!("lock poisoned: {e}")))?;
        let pin_lock = pins
            .get(&pin_id)
            .ok_or_else(|| AppError::Gpio(format!("pin {pin_id} not bound")))?;
        let mut pin = pin_lock
            .lock()
            .map_err(|e| AppError::Gpio(format!("lock poisoned: {e}")))?;
        f(&mut pin)
    }
}

impl LineProvider for MockLineProvider {
    fn bind(&self, pin: &PinConfig) -> Result<Box<dyn PinLine>, AppError> {
        let mut pins = self
            .inner
            .pins
            .write()
            .map_err(|e| AppError::Gpio(format!("lock poisoned: {e}")))?;
        pins.insert(pin.id, Mutex::new(MockLineState::default()));
        Ok(Box::new(MockPinLine {
            pin_id: pin.id,
            inner: self.inner.clone(),
        }))
    }
}

struct MockPinLine {
    pin_id: u8,
    inner: Arc<MockInner>,
}

impl PinLine for MockPinLine {
    fn set_mode(&self, mode: PinMode) -> Result<(), AppError> {
        self.inner.record(format!("mode {} {mode}", self.pin_id));
        self.inner.with_pin(self.pin_id, |pin| {
            pin.mode = mode;
            Ok(())
        })
    }

    fn set_pull(&self, pull: Pull) -> Result<(), AppError> {
        self.inner.record(format!("pull {} {pull}", self.pin_id));
        self.inner.with_pin(self.pin_id, |pin| {
            pin.pull = pull;
            // An undriven input idles at its bias level.
            match pull {
                Pull::High => pin.level = 1,
                Pull::Low => pin.level = 0,
                Pull::None => {}
            }
            Ok(())
        })
    }

    fn read(&self) -> Result<u8, AppError> {
        self.inner.with_pin(self.pin_id, |pin| {
            if pin.fail_reads {
                return Err(AppError::Gpio(format!(
                    "injected read failure on pin {}",
                    self.pin_id
                )));
            }
            Ok(pin.level)
        })
    }

    fn write(&self, level: u8) -> Result<(), AppError> {
        self.inner.record(format!("write {} {level}", self.pin_id));
        self.inner.with_pin(self.pin_id, |pin| {
            if pin.fail_writes {
                return Err(AppError::Gpio(format!(
                    "injected write failure on pin {}",
                    self.pin_id
                )));
            }
            pin.level = level;
            Ok(())
        })
    }

    fn watch_edges(&self, handler: EdgeHandler) -> Result<(), AppError> {
        self.inner.record(format!("watch {}", self.pin_id));
        self.inner.with_pin(self.pin_id, |pin| {
            pin.handler = Some(handler);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BootState, Logic};
    use crate::line::EdgeDispatcher;

    fn pin(id: u8) -> PinConfig {
        PinConfig {
            id,
            mode: PinMode::Input,
            logic: Logic::Normal,
            pull: Pull::None,
            boot: BootState::Off,
            hname: format!("GPIO{id}"),
            uname: format!("GPIO{id}"),
            udesc: "---".into(),
        }
    }

    #[test]
    fn external_level_change_fires_edge_event() {
        let provider = MockLineProvider::default();
        let line = provider.bind(&pin(4)).unwrap();

        let dispatcher = Arc::new(EdgeDispatcher::new(8));
        let mut rx = dispatcher.subscribe();
        line.watch_edges(dispatcher).unwrap();

        provider.set_level(4, 1);
        let event = rx.try_recv().unwrap();
        assert_eq!(event.pin_id, 4);
        assert_eq!(event.level, 1);

        // No event when the level does not change.
        provider.set_level(4, 1);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn pull_high_biases_idle_level() {
        let provider = MockLineProvider::default();
        let line = provider.bind(&pin(2)).unwrap();
        line.set_pull(Pull::High).unwrap();
        assert_eq!(line.read().unwrap(), 1);
    }
}
