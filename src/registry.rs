use std::path::PathBuf;

use log::warn;
use rustc_hash::FxHashMap;

use crate::config::{GlobalConfig, Label, PinConfig, PinMode};
use crate::error::AppError;
use crate::line::{EdgeHandler, LineProvider, PinLine};

pub struct BoundPin {
    pub cfg: PinConfig,
    line: Box<dyn PinLine>,
    /// Last sampled user-facing state; None until first sampled.
    pub value: Option<Label>,
}

/// Owns the validated configuration and one bound line per pin.
pub struct PinRegistry {
    config_path: PathBuf,
    allow_rename: bool,
    valid: bool,
    pins: FxHashMap<u8, BoundPin>,
}

impl PinRegistry {
    /// Binds one line per configured pin and initializes it.
    ///
    /// Output pins get their boot level asserted before the switch to
    /// drive mode and re-asserted after it, so the line never floats
    /// through an undefined intermediate state. Input pins get their
    /// bias applied and are watched for edge changes.
    pub fn bind(
        config: GlobalConfig,
        provider: &dyn LineProvider,
        edges: EdgeHandler,
        config_path: impl Into<PathBuf>,
    ) -> Result<Self, AppError> {
        let mut pins = FxHashMap::default();
        for id in config.sorted_ids() {
            let cfg = config.pins[&id].clone();
            let line = provider.bind(&cfg)?;
            match cfg.mode {
                PinMode::Input => {
                    line.set_pull(cfg.pull)?;
                    line.set_mode(PinMode::Input)?;
                    line.watch_edges(edges.clone())?;
                }
                PinMode::Output => {
                    let boot_level = cfg.logic.level_for(cfg.boot.label());
                    line.write(boot_level)?;
                    line.set_mode(PinMode::Output)?;
                    line.write(boot_level)?;
                }
            }
            pins.insert(id, BoundPin {
                cfg,
                line,
                value: None,
            });
        }

        Ok(Self {
            config_path: config_path.into(),
            allow_rename: config.allow_rename,
            valid: config.valid,
            pins,
        })
    }

    pub fn allow_rename(&self) -> bool {
        self.allow_rename
    }

    pub fn valid(&self) -> bool {
        self.valid
    }

    pub fn pin(&self, id: u8) -> Result<&BoundPin, AppError> {
        self.pins
            .get(&id)
            .ok_or_else(|| AppError::NotFoundPin(id.to_string()))
    }

    fn pin_mut(&mut self, id: u8) -> Result<&mut BoundPin, AppError> {
        self.pins
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFoundPin(id.to_string()))
    }

    fn output_pin_mut(&mut self, id: u8) -> Result<&mut BoundPin, AppError> {
        let pin = self.pin_mut(id)?;
        if pin.cfg.mode != PinMode::Output {
            return Err(AppError::NotOutput(id));
        }
        Ok(pin)
    }

    pub fn sorted_ids(&self) -> Vec<u8> {
        let mut ids: Vec<u8> = self.pins.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn sorted_pins(&self) -> Vec<&BoundPin> {
        let mut pins: Vec<&BoundPin> = self.pins.values().collect();
        pins.sort_unstable_by_key(|p| p.cfg.id);
        pins
    }

    /// Re-samples every line and stores the polarity-mapped label.
    /// A read failure leaves that pin unsampled rather than stale.
    pub fn refresh_values(&mut self) {
        for pin in self.pins.values_mut() {
            pin.value = match pin.line.read() {
                Ok(level) => Some(pin.cfg.logic.label_for(level)),
                Err(e) => {
                    warn!("refresh of pin {} failed: {e}", pin.cfg.id);
                    None
                }
            };
        }
    }

    pub fn read_label(&mut self, id: u8) -> Result<Label, AppError> {
        let pin = self.pin_mut(id)?;
        let label = pin.cfg.logic.label_for(pin.line.read()?);
        pin.value = Some(label);
        Ok(label)
    }

    /// Read-modify-write flip of an output pin's electrical level. The
    /// caller must hold the registry lock for the whole call.
    pub fn toggle(&mut self, id: u8) -> Result<Label, AppError> {
        let pin = self.output_pin_mut(id)?;
        let flipped = if pin.line.read()? == 0 { 1 } else { 0 };
        pin.line.write(flipped)?;
        let label = pin.cfg.logic.label_for(flipped);
        pin.value = Some(label);
        Ok(label)
    }

    pub fn drive_level(&mut self, id: u8, level: u8) -> Result<Label, AppError> {
        let pin = self.output_pin_mut(id)?;
        pin.line.write(level)?;
        let label = pin.cfg.logic.label_for(level);
        pin.value = Some(label);
        Ok(label)
    }

    pub fn drive_label(&mut self, id: u8, label: Label) -> Result<Label, AppError> {
        let level = self.pin(id)?.cfg.logic.level_for(label);
        self.drive_level(id, level)
    }

    pub fn set_uname(&mut self, id: u8, name: &str) -> Result<(), AppError> {
        self.persist_renames(&[(id, Some(name.to_string()), None)], false)
    }

    pub fn set_udesc(&mut self, id: u8, desc: &str) -> Result<(), AppError> {
        self.persist_renames(&[(id, None, Some(desc.to_string()))], false)
    }

    /// Bulk rename for every pin present in `updates`; pins not in the
    /// configuration are skipped.
    pub fn apply_renames(
        &mut self,
        updates: &[(u8, Option<String>, Option<String>)],
    ) -> Result<(), AppError> {
        self.persist_renames(updates, true)
    }

    /// Writes the updated configuration text back to disk first and
    /// commits to memory only on success, so a persistence failure
    /// leaves the registry untouched.
    fn persist_renames(
        &mut self,
        updates: &[(u8, Option<String>, Option<String>)],
        skip_unknown: bool,
    ) -> Result<(), AppError> {
        if !self.allow_rename {
            return Err(AppError::RenameDisallowed);
        }

        let mut config = self.to_config();
        let mut applied: Vec<(u8, Option<String>, Option<String>)> = Vec::new();
        for (id, uname, udesc) in updates {
            let Some(pin) = config.pins.get_mut(id) else {
                if skip_unknown {
                    continue;
                }
                return Err(AppError::NotFoundPin(id.to_string()));
            };
            if let Some(uname) = uname {
                pin.uname = uname.clone();
            }
            if let Some(udesc) = udesc {
                pin.udesc = udesc.clone();
            }
            applied.push((*id, uname.clone(), udesc.clone()));
        }

        config.save_to_file(&self.config_path)?;

        for (id, uname, udesc) in applied {
            if let Some(pin) = self.pins.get_mut(&id) {
                if let Some(uname) = uname {
                    pin.cfg.uname = uname;
                }
                if let Some(udesc) = udesc {
                    pin.cfg.udesc = udesc;
                }
            }
        }
        Ok(())
    }

    pub fn to_config(&self) -> GlobalConfig {
        GlobalConfig {
            allow_rename: self.allow_rename,
            valid: self.valid,
            pins: self
                .pins
                .iter()
                .map(|(id, pin)| (*id, pin.cfg.clone()))
                .collect(),
        }
    }
}
