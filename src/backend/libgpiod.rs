use log::warn;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{JoinHandle, yield_now};
use std::time::Duration;

use libgpiod::{chip::Chip, line, line::EventClock, request};
use parking_lot::{FairMutex, Mutex};

use crate::config::{PinConfig, PinMode, Pull};
use crate::error::AppError;
use crate::line::{EdgeEvent, EdgeHandler, LineProvider, PinLine};

const EVENT_BUFFER_CAPACITY: usize = 64;
const EVENT_WAIT_TIMEOUT: Duration = Duration::from_millis(10);

/// Binds pins as lines of one gpiochip character device.
pub struct LibgpiodProvider {
    chip_path: String,
}

impl LibgpiodProvider {
    pub fn new(chip_path: impl Into<String>) -> Self {
        Self {
            chip_path: chip_path.into(),
        }
    }
}

impl LineProvider for LibgpiodProvider {
    fn bind(&self, pin: &PinConfig) -> Result<Box<dyn PinLine>, AppError> {
        Ok(Box::new(LibgpiodLine::open(&self.chip_path, pin.id)?))
    }
}

struct GpiodHandle {
    request: request::Request,
}

impl GpiodHandle {
    fn new(chip: &str, line_cfg: &line::Config) -> Result<Self, AppError> {
        let chip = Self::open_chip(chip)?;
        let request = Self::request_lines(&chip, line_cfg)?;
        Ok(Self { request })
    }

    fn open_chip(path: &str) -> Result<Chip, AppError> {
        let p = PathBuf::from(path);
        Chip::open(&p).map_err(|e| AppError::Gpio(format!("open chip {path}: {e}")))
    }

    fn request_lines(chip: &Chip, line_cfg: &line::Config) -> Result<request::Request, AppError> {
        let mut req_cfg =
            request::Config::new().map_err(|e| AppError::Gpio(format!("request config: {e}")))?;
        req_cfg
            .set_consumer(env!("CARGO_PKG_NAME"))
            .map_err(|e| AppError::Gpio(format!("request consumer: {e}")))?;
        chip.request_lines(Some(&req_cfg), line_cfg)
            .map_err(|e| AppError::Gpio(format!("request lines: {e}")))
    }
}

struct Desired {
    mode: PinMode,
    pull: Pull,
    level: u8,
    handler: Option<EdgeHandler>,
}

pub struct LibgpiodLine {
    pin_id: u8,
    offset: u32,
    handle: Arc<FairMutex<GpiodHandle>>,
    desired: Mutex<Desired>,
    listener: Mutex<Option<EdgeListener>>,
}

impl LibgpiodLine {
    fn open(chip_path: &str, pin_id: u8) -> Result<Self, AppError> {
        let desired = Desired {
            mode: PinMode::Input,
            pull: Pull::None,
            level: 0,
            handler: None,
        };
        let offset = u32::from(pin_id);
        let line_cfg = Self::make_line_config(offset, Self::make_line_settings(&desired)?)?;
        let handle = Arc::new(FairMutex::new(GpiodHandle::new(chip_path, &line_cfg)?));

        Ok(Self {
            pin_id,
            offset,
            handle,
            desired: Mutex::new(desired),
            listener: Mutex::new(None),
        })
    }

    fn make_line_settings(desired: &Desired) -> Result<line::Settings, AppError> {
        let mut ls =
            line::Settings::new().map_err(|e| AppError::Gpio(format!("libgpiod settings: {e}")))?;

        match desired.mode {
            PinMode::Output => {
                ls.set_direction(line::Direction::Output)
                    .map_err(|e| AppError::Gpio(format!("set direction: {e}")))?;
                ls.set_drive(line::Drive::PushPull)
                    .map_err(|e| AppError::Gpio(format!("set drive: {e}")))?;
                ls.set_output_value(level_to_value(desired.level))
                    .map_err(|e| AppError::Gpio(format!("set output value: {e}")))?;
            }
            PinMode::Input => {
                ls.set_direction(line::Direction::Input)
                    .map_err(|e| AppError::Gpio(format!("set direction: {e}")))?;
                let bias = match desired.pull {
                    Pull::None => None,
                    Pull::Low => Some(line::Bias::PullDown),
                    Pull::High => Some(line::Bias::PullUp),
                };
                ls.set_bias(bias)
                    .map_err(|e| AppError::Gpio(format!("set bias: {e}")))?;

                if desired.handler.is_some() {
                    ls.set_edge_detection(Some(line::Edge::Both))
                        .map_err(|e| AppError::Gpio(format!("set edge detection: {e}")))?;
                    ls.set_event_clock(EventClock::Realtime)
                        .map_err(|e| AppError::Gpio(format!("set event clock: {e}")))?;
                }
            }
        }

        Ok(ls)
    }

    fn make_line_config(offset: u32, settings: line::Settings) -> Result<line::Config, AppError> {
        let mut cfg =
            line::Config::new().map_err(|e| AppError::Gpio(format!("line config: {e}")))?;
        cfg.add_line_settings(&[offset], settings)
            .map_err(|e| AppError::Gpio(format!("line config add settings: {e}")))?;
        Ok(cfg)
    }

    fn reconfigure(&self, desired: &Desired) -> Result<(), AppError> {
        let line_cfg = Self::make_line_config(self.offset, Self::make_line_settings(desired)?)?;
        self.handle
            .lock()
            .request
            .reconfigure_lines(&line_cfg)
            .map_err(|e| AppError::Gpio(format!("reconfigure lines: {e}")))
    }

    fn set_value(&self, level: u8) -> Result<(), AppError> {
        self.handle
            .lock()
            .request
            .set_value(self.offset, level_to_value(level))
            .map_err(|e| AppError::Gpio(format!("set value: {e}")))
    }
}

impl PinLine for LibgpiodLine {
    fn set_mode(&self, mode: PinMode) -> Result<(), AppError> {
        let mut desired = self.desired.lock();
        desired.mode = mode;
        self.reconfigure(&desired)?;
        // Reconfiguring may reset the driven level, so re-assert it.
        if mode == PinMode::Output {
            self.set_value(desired.level)?;
        }
        Ok(())
    }

    fn set_pull(&self, pull: Pull) -> Result<(), AppError> {
        let mut desired = self.desired.lock();
        desired.pull = pull;
        if desired.mode == PinMode::Input {
            self.reconfigure(&desired)?;
        }
        Ok(())
    }

    fn read(&self) -> Result<u8, AppError> {
        let value = self
            .handle
            .lock()
            .request
            .value(self.offset)
            .map_err(|e| AppError::Gpio(format!("get value: {e}")))?;
        Ok(match value {
            line::Value::InActive => 0,
            line::Value::Active => 1,
        })
    }

    fn write(&self, level: u8) -> Result<(), AppError> {
        let mut desired = self.desired.lock();
        desired.level = level;
        // While still in input mode the level is only latched, to be
        // driven when the line switches to output.
        if desired.mode == PinMode::Output {
            self.set_value(level)?;
        }
        Ok(())
    }

    fn watch_edges(&self, handler: EdgeHandler) -> Result<(), AppError> {
        let mut desired = self.desired.lock();
        desired.handler = Some(handler.clone());
        self.reconfigure(&desired)?;

        let mut listener = self.listener.lock();
        if listener.is_none() {
            *listener = Some(EdgeListener::new(self.pin_id, self.handle.clone(), handler)?);
        }
        Ok(())
    }
}

struct EdgeListener {
    cancel: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl EdgeListener {
    fn new(
        pin_id: u8,
        gpiod_handle: Arc<FairMutex<GpiodHandle>>,
        handler: EdgeHandler,
    ) -> Result<Self, AppError> {
        let cancel = Arc::new(AtomicBool::new(false));
        let cancel_flag = cancel.clone();
        let mut buffer = request::Buffer::new(EVENT_BUFFER_CAPACITY)
            .map_err(|e| AppError::Gpio(format!("event buffer: {e}")))?;

        let handle = std::thread::spawn(move || {
            while !cancel_flag.load(Ordering::Relaxed) {
                let hdl = gpiod_handle.lock();
                let req = &hdl.request;

                let has_event = match req.wait_edge_events(Some(EVENT_WAIT_TIMEOUT)) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!("wait edge events error for pin {pin_id}: {e}");
                        yield_now();
                        continue;
                    }
                };
                if !has_event {
                    continue;
                }

                let events = match req.read_edge_events(&mut buffer) {
                    Ok(evts) => evts,
                    Err(e) => {
                        warn!("read edge events error for pin {pin_id}: {e}");
                        yield_now();
                        continue;
                    }
                };
                for evt in events {
                    let evt = match evt {
                        Ok(e) => e,
                        Err(_) => continue,
                    };
                    let level = match evt.event_type() {
                        Ok(line::EdgeKind::Rising) => 1,
                        Ok(line::EdgeKind::Falling) => 0,
                        Err(_) => continue,
                    };

                    handler.dispatch(EdgeEvent {
                        pin_id,
                        level,
                        timestamp_ms: evt.timestamp().as_millis() as u64,
                    });
                }
            }
        });

        Ok(Self {
            cancel,
            handle: Some(handle),
        })
    }
}

impl Drop for EdgeListener {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn level_to_value(level: u8) -> line::Value {
    match level {
        0 => line::Value::InActive,
        _ => line::Value::Active,
    }
}
