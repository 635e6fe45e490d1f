use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::{Label, Logic, PinMode};
use crate::error::AppError;
use crate::registry::PinRegistry;
use crate::snapshot::{PublicSnapshot, build_snapshot};

/// Success sentinel; callers compare against it with plain equality.
pub const NO_ERROR: &str = "No error.";

pub const COMMANDS: &[&str] = &[
    "ListCommands",
    "GetGPIOInfo",
    "SetGPIOInfo",
    "ToggleGPIO",
    "SetGPIO",
    "CycleGPIO",
    "ReadGPIO",
    "SetUName",
    "SetUDesc",
];

pub const DEFAULT_CYCLE_MS: u64 = 6000;

/// Wire envelope, identical in both directions.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Message {
    #[serde(rename = "Type", default)]
    pub msg_type: String,
    #[serde(rename = "Arg1", default, skip_serializing_if = "Option::is_none")]
    pub arg1: Option<String>,
    #[serde(rename = "Arg2", default, skip_serializing_if = "Option::is_none")]
    pub arg2: Option<String>,
    #[serde(rename = "Arg3", default, skip_serializing_if = "Option::is_none")]
    pub arg3: Option<String>,
    #[serde(rename = "State", default, skip_serializing_if = "Option::is_none")]
    pub state: Option<serde_json::Value>,
    #[serde(rename = "Error", default)]
    pub error: String,
}

impl Message {
    pub fn request(msg_type: impl Into<String>) -> Self {
        Self {
            msg_type: msg_type.into(),
            ..Default::default()
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error == NO_ERROR
    }
}

/// Translates one request into reads/writes against the registry. All
/// hardware mutation happens under the registry lock; only CycleGPIO's
/// delay runs with the lock released, so unrelated commands proceed.
pub struct CommandEngine {
    registry: Arc<Mutex<PinRegistry>>,
    sys_name: String,
}

impl CommandEngine {
    pub fn new(registry: Arc<Mutex<PinRegistry>>, sys_name: impl Into<String>) -> Self {
        Self {
            registry,
            sys_name: sys_name.into(),
        }
    }

    pub fn registry(&self) -> Arc<Mutex<PinRegistry>> {
        self.registry.clone()
    }

    /// Fresh snapshot of the authoritative state, live values included.
    pub fn snapshot(&self) -> PublicSnapshot {
        let mut registry = self.registry.lock();
        registry.refresh_values();
        build_snapshot(&registry, &self.sys_name)
    }

    /// Executes one request. Every response carries a fresh snapshot in
    /// `State` (except ListCommands, whose `State` is the command list),
    /// so callers never infer state incrementally.
    pub async fn execute(&self, req: Message) -> Message {
        let mut resp = Message {
            msg_type: req.msg_type.clone(),
            ..Default::default()
        };
        let outcome = self.dispatch(&req, &mut resp).await;
        resp.error = match outcome {
            Ok(()) => NO_ERROR.to_string(),
            Err(e) => e.to_string(),
        };
        if resp.state.is_none() {
            resp.state = serde_json::to_value(self.snapshot()).ok();
        }
        resp
    }

    async fn dispatch(&self, req: &Message, resp: &mut Message) -> Result<(), AppError> {
        match req.msg_type.as_str() {
            "ListCommands" => {
                resp.state = serde_json::to_value(COMMANDS).ok();
                Ok(())
            }
            "GetGPIOInfo" => Ok(()),
            "ReadGPIO" => {
                let id = required_pin_id(&req.arg1)?;
                let label = self.registry.lock().read_label(id)?;
                resp.arg2 = Some(label.to_string());
                Ok(())
            }
            "ToggleGPIO" => {
                let id = required_pin_id(&req.arg1)?;
                let label = self.registry.lock().toggle(id)?;
                resp.arg2 = Some(label.to_string());
                Ok(())
            }
            "SetGPIO" => {
                let id = required_pin_id(&req.arg1)?;
                let raw = required_arg(&req.arg2, "set value")?;
                let mut registry = self.registry.lock();
                let pin = registry.pin(id)?;
                if pin.cfg.mode != PinMode::Output {
                    return Err(AppError::NotOutput(id));
                }
                let level = parse_set_level(raw, pin.cfg.logic)?;
                let label = registry.drive_level(id, level)?;
                resp.arg2 = Some(label.to_string());
                Ok(())
            }
            "CycleGPIO" => {
                let id = required_pin_id(&req.arg1)?;
                let wait_ms = match req.arg2.as_deref().map(str::trim) {
                    None | Some("") => DEFAULT_CYCLE_MS,
                    Some(raw) => raw.parse::<u64>().map_err(|_| {
                        AppError::InvalidValue(format!("cycle delay {raw:?}"))
                    })?,
                };
                // A failed Off phase skips the On phase entirely.
                self.registry.lock().drive_label(id, Label::Off)?;
                tokio::time::sleep(Duration::from_millis(wait_ms)).await;
                self.registry.lock().drive_label(id, Label::On)?;
                Ok(())
            }
            "SetUName" => {
                let id = required_pin_id(&req.arg1)?;
                let name = required_arg(&req.arg2, "name")?;
                self.registry.lock().set_uname(id, name)
            }
            "SetUDesc" => {
                let id = required_pin_id(&req.arg1)?;
                let desc = required_arg(&req.arg2, "description")?;
                self.registry.lock().set_udesc(id, desc)
            }
            "SetGPIOInfo" => {
                let state = req
                    .state
                    .clone()
                    .ok_or_else(|| AppError::InvalidValue("missing State payload".into()))?;
                let snapshot: PublicSnapshot = serde_json::from_value(state)
                    .map_err(|e| AppError::InvalidValue(format!("invalid State payload: {e}")))?;
                let updates: Vec<(u8, Option<String>, Option<String>)> = snapshot
                    .pins
                    .iter()
                    .map(|p| (p.id, non_empty(&p.uname), non_empty(&p.udesc)))
                    .collect();
                self.registry.lock().apply_renames(&updates)
            }
            other => Err(AppError::UnknownRequest(other.to_string())),
        }
    }
}

/// Dual interpretation of set values: `high`/`low` (and `1`/`0`) name
/// absolute electrical levels, `on`/`off` name polarity-relative user
/// states. Anything else is rejected without touching hardware.
fn parse_set_level(raw: &str, logic: Logic) -> Result<u8, AppError> {
    let value = raw.trim();
    if value.eq_ignore_ascii_case("high") || value == "1" {
        Ok(1)
    } else if value.eq_ignore_ascii_case("low") || value == "0" {
        Ok(0)
    } else if value.eq_ignore_ascii_case("on") {
        Ok(logic.level_for(Label::On))
    } else if value.eq_ignore_ascii_case("off") {
        Ok(logic.level_for(Label::Off))
    } else {
        Err(AppError::UnknownSetValue(value.to_string()))
    }
}

fn required_pin_id(arg: &Option<String>) -> Result<u8, AppError> {
    let raw = arg
        .as_deref()
        .ok_or_else(|| AppError::InvalidValue("missing pin id".into()))?;
    raw.trim()
        .parse()
        .map_err(|_| AppError::InvalidValue(format!("pin id {raw:?}")))
}

fn required_arg<'a>(arg: &'a Option<String>, what: &str) -> Result<&'a str, AppError> {
    arg.as_deref()
        .ok_or_else(|| AppError::InvalidValue(format!("missing {what}")))
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}
