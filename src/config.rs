use std::fmt;
use std::fs;
use std::path::Path;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

pub const MAX_PIN_ID: u8 = 31;

/// Closed keyword enums share one canonicalization rule: candidates are
/// matched case-insensitively, and the first candidate is the default when
/// the field is absent or empty.
pub trait Keyword: Sized + Copy + 'static {
    const FIELD: &'static str;
    const CANDIDATES: &'static [(&'static str, Self)];

    fn canonicalize(raw: &str, pin_id: u8) -> Result<Self, AppError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(Self::CANDIDATES[0].1);
        }
        Self::CANDIDATES
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(raw))
            .map(|(_, v)| *v)
            .ok_or_else(|| {
                AppError::Config(format!(
                    "GPIO {pin_id}: unrecognized {} value {raw:?}",
                    Self::FIELD
                ))
            })
    }

    fn first_candidate() -> Self {
        Self::CANDIDATES[0].1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PinMode {
    Input,
    Output,
}

impl Keyword for PinMode {
    const FIELD: &'static str = "Mode";
    const CANDIDATES: &'static [(&'static str, Self)] =
        &[("Input", PinMode::Input), ("Output", PinMode::Output)];
}

impl Default for PinMode {
    fn default() -> Self {
        Self::first_candidate()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Logic {
    Normal,
    Invert,
}

impl Keyword for Logic {
    const FIELD: &'static str = "Logic";
    const CANDIDATES: &'static [(&'static str, Self)] =
        &[("Normal", Logic::Normal), ("Invert", Logic::Invert)];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Pull {
    None,
    Low,
    High,
}

impl Keyword for Pull {
    const FIELD: &'static str = "Pull";
    const CANDIDATES: &'static [(&'static str, Self)] =
        &[("None", Pull::None), ("Low", Pull::Low), ("High", Pull::High)];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BootState {
    Off,
    On,
}

impl Keyword for BootState {
    const FIELD: &'static str = "Boot";
    const CANDIDATES: &'static [(&'static str, Self)] =
        &[("Off", BootState::Off), ("On", BootState::On)];
}

impl BootState {
    pub fn label(self) -> Label {
        match self {
            BootState::Off => Label::Off,
            BootState::On => Label::On,
        }
    }
}

/// User-facing state of a line, independent of wiring polarity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Label {
    On,
    Off,
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Label::On => "On",
            Label::Off => "Off",
        })
    }
}

impl Logic {
    /// Electrical level -> user label. Any non-zero level counts as high.
    pub fn label_for(self, level: u8) -> Label {
        match (self, level) {
            (Logic::Normal, 0) => Label::Off,
            (Logic::Normal, _) => Label::On,
            (Logic::Invert, 0) => Label::On,
            (Logic::Invert, _) => Label::Off,
        }
    }

    /// User label -> electrical level. Inverse of [`Logic::label_for`].
    pub fn level_for(self, label: Label) -> u8 {
        match (self, label) {
            (Logic::Normal, Label::On) | (Logic::Invert, Label::Off) => 1,
            (Logic::Normal, Label::Off) | (Logic::Invert, Label::On) => 0,
        }
    }
}

macro_rules! keyword_display {
    ($($ty:ty),+) => {$(
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let name = <$ty as Keyword>::CANDIDATES
                    .iter()
                    .find(|(_, v)| v == self)
                    .map(|(name, _)| *name)
                    .unwrap_or("?");
                f.write_str(name)
            }
        }
    )+};
}

keyword_display!(PinMode, Logic, Pull, BootState);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinConfig {
    pub id: u8,
    pub mode: PinMode,
    pub logic: Logic,
    /// Input bias; never consulted for Output pins.
    pub pull: Pull,
    /// User-facing state driven at bind time on Output pins.
    pub boot: BootState,
    /// Hardware label, immutable after load.
    pub hname: String,
    pub uname: String,
    pub udesc: String,
}

/// How a second `GPIO <id>` block with an already-seen id is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePins {
    /// Last block wins, the historical behavior.
    #[default]
    Overwrite,
    Reject,
}

#[derive(Debug, Clone)]
pub struct GlobalConfig {
    pub allow_rename: bool,
    /// False only for the degraded not-configured state (unreadable file).
    pub valid: bool,
    pub pins: FxHashMap<u8, PinConfig>,
}

struct PinBuilder {
    id: u8,
    mode: Option<PinMode>,
    logic: Option<Logic>,
    pull: Option<Pull>,
    boot: Option<BootState>,
    hname: Option<String>,
    uname: Option<String>,
    udesc: Option<String>,
}

impl PinBuilder {
    fn new(id: u8) -> Self {
        Self {
            id,
            mode: None,
            logic: None,
            pull: None,
            boot: None,
            hname: None,
            uname: None,
            udesc: None,
        }
    }

    fn set_field(&mut self, key: &str, value: &str) -> Result<(), AppError> {
        let id = self.id;
        if key.eq_ignore_ascii_case("Mode") {
            self.mode = Some(PinMode::canonicalize(value, id)?);
        } else if key.eq_ignore_ascii_case("Logic") {
            self.logic = Some(Logic::canonicalize(value, id)?);
        } else if key.eq_ignore_ascii_case("Pull") {
            self.pull = Some(Pull::canonicalize(value, id)?);
        } else if key.eq_ignore_ascii_case("Boot") {
            self.boot = Some(BootState::canonicalize(value, id)?);
        } else if key.eq_ignore_ascii_case("HName") {
            self.hname = Some(unquote(value));
        } else if key.eq_ignore_ascii_case("UName") {
            self.uname = Some(unquote(value));
        } else if key.eq_ignore_ascii_case("UDesc") {
            self.udesc = Some(unquote(value));
        } else {
            return Err(AppError::Config(format!(
                "GPIO {id}: unknown field {key:?}"
            )));
        }
        Ok(())
    }

    fn finish(self) -> PinConfig {
        let fallback_name = format!("GPIO{}", self.id);
        PinConfig {
            id: self.id,
            mode: self.mode.unwrap_or_else(PinMode::first_candidate),
            logic: self.logic.unwrap_or_else(Logic::first_candidate),
            pull: self.pull.unwrap_or_else(Pull::first_candidate),
            boot: self.boot.unwrap_or_else(BootState::first_candidate),
            hname: self.hname.filter(|s| !s.is_empty()).unwrap_or_else(|| fallback_name.clone()),
            uname: self.uname.filter(|s| !s.is_empty()).unwrap_or(fallback_name),
            udesc: self.udesc.filter(|s| !s.is_empty()).unwrap_or_else(|| "---".to_string()),
        }
    }
}

impl GlobalConfig {
    /// Degraded state for an unreadable config file: the server still
    /// starts and answers with an empty pin list.
    pub fn not_configured() -> Self {
        Self {
            allow_rename: true,
            valid: false,
            pins: FxHashMap::default(),
        }
    }

    pub fn load_from_file<P: AsRef<Path>>(
        path: P,
        duplicates: DuplicatePins,
    ) -> Result<Self, AppError> {
        match fs::read_to_string(&path) {
            Ok(text) => Self::parse(&text, duplicates),
            Err(_) => Ok(Self::not_configured()),
        }
    }

    pub fn parse(text: &str, duplicates: DuplicatePins) -> Result<Self, AppError> {
        let mut cfg = Self {
            allow_rename: true,
            valid: true,
            pins: FxHashMap::default(),
        };
        let mut current: Option<PinBuilder> = None;

        for (lineno, raw_line) in text.lines().enumerate() {
            let line = strip_comment(raw_line).trim().to_string();
            if line.is_empty() {
                continue;
            }

            if let Some(rest) = keyword_arg(&line, "AllowRename") {
                cfg.allow_rename = parse_yes_no(rest)?;
                continue;
            }

            if let Some(rest) = keyword_arg(&line, "GPIO") {
                if let Some(done) = current.take() {
                    cfg.insert_pin(done.finish(), duplicates)?;
                }
                current = Some(PinBuilder::new(parse_pin_id(rest)?));
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                let builder = current.as_mut().ok_or_else(|| {
                    AppError::Config(format!(
                        "line {}: field {:?} outside any GPIO block",
                        lineno + 1,
                        key.trim()
                    ))
                })?;
                builder.set_field(key.trim(), value.trim())?;
                continue;
            }

            return Err(AppError::Config(format!(
                "line {}: unrecognized directive {line:?}",
                lineno + 1
            )));
        }

        if let Some(done) = current.take() {
            cfg.insert_pin(done.finish(), duplicates)?;
        }
        Ok(cfg)
    }

    fn insert_pin(&mut self, pin: PinConfig, duplicates: DuplicatePins) -> Result<(), AppError> {
        if duplicates == DuplicatePins::Reject && self.pins.contains_key(&pin.id) {
            return Err(AppError::Config(format!("duplicate GPIO {} block", pin.id)));
        }
        self.pins.insert(pin.id, pin);
        Ok(())
    }

    pub fn sorted_ids(&self) -> Vec<u8> {
        let mut ids: Vec<u8> = self.pins.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Renders back to the declarative text format, pins sorted by id.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "AllowRename {}\n",
            if self.allow_rename { "Yes" } else { "No" }
        ));
        for id in self.sorted_ids() {
            let pin = &self.pins[&id];
            out.push('\n');
            out.push_str(&format!("GPIO {id}\n"));
            out.push_str(&format!("    Mode={}\n", pin.mode));
            out.push_str(&format!("    Logic={}\n", pin.logic));
            out.push_str(&format!("    Pull={}\n", pin.pull));
            out.push_str(&format!("    Boot={}\n", pin.boot));
            out.push_str(&format!("    HName=\"{}\"\n", pin.hname));
            out.push_str(&format!("    UName=\"{}\"\n", pin.uname));
            out.push_str(&format!("    UDesc=\"{}\"\n", pin.udesc));
        }
        out
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), AppError> {
        fs::write(&path, self.render())
            .map_err(|e| AppError::Persist(format!("write config: {e}")))
    }
}

fn parse_pin_id(raw: &str) -> Result<u8, AppError> {
    let id: u8 = raw
        .trim()
        .parse()
        .map_err(|_| AppError::Config(format!("invalid pin id {raw:?}")))?;
    if id > MAX_PIN_ID {
        return Err(AppError::Config(format!(
            "pin id {id} out of range 0..={MAX_PIN_ID}"
        )));
    }
    Ok(id)
}

fn parse_yes_no(raw: &str) -> Result<bool, AppError> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("Yes") {
        Ok(true)
    } else if raw.eq_ignore_ascii_case("No") {
        Ok(false)
    } else {
        Err(AppError::Config(format!(
            "AllowRename must be Yes or No, got {raw:?}"
        )))
    }
}

/// Matches `<keyword> <rest>` case-insensitively, returning the rest.
fn keyword_arg<'a>(line: &'a str, keyword: &str) -> Option<&'a str> {
    let (head, rest) = line.split_once(char::is_whitespace)?;
    if head.eq_ignore_ascii_case(keyword) {
        Some(rest.trim())
    } else {
        None
    }
}

/// Drops everything from the first `#` that is not inside a quoted string.
fn strip_comment(line: &str) -> &str {
    let mut in_quotes = false;
    for (idx, ch) in line.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            '#' if !in_quotes => return &line[..idx],
            _ => {}
        }
    }
    line
}

fn unquote(raw: &str) -> String {
    let raw = raw.trim();
    if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
        raw[1..raw.len() - 1].to_string()
    } else {
        raw.to_string()
    }
}
