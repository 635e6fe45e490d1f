use serde::{Deserialize, Serialize};

use crate::config::{Label, PinMode};
use crate::registry::PinRegistry;

/// Client-facing view of one pin. Hardware capabilities and internal
/// validation state never appear here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PinView {
    #[serde(rename = "ID")]
    pub id: u8,
    #[serde(rename = "HName", default)]
    pub hname: String,
    #[serde(rename = "UName", default)]
    pub uname: String,
    #[serde(rename = "UDesc", default)]
    pub udesc: String,
    #[serde(rename = "Mode", default)]
    pub mode: PinMode,
    /// Absent until the live level has been sampled at least once.
    #[serde(rename = "Value", default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Label>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicSnapshot {
    #[serde(rename = "SysName", default)]
    pub sys_name: String,
    #[serde(rename = "AllowRename", default)]
    pub allow_rename: bool,
    #[serde(rename = "Pins", default)]
    pub pins: Vec<PinView>,
}

/// Pure projection, pins sorted ascending by id.
pub fn build_snapshot(registry: &PinRegistry, sys_name: &str) -> PublicSnapshot {
    PublicSnapshot {
        sys_name: sys_name.to_string(),
        allow_rename: registry.allow_rename(),
        pins: registry
            .sorted_pins()
            .into_iter()
            .map(|pin| PinView {
                id: pin.cfg.id,
                hname: pin.cfg.hname.clone(),
                uname: pin.cfg.uname.clone(),
                udesc: pin.cfg.udesc.clone(),
                mode: pin.cfg.mode,
                value: pin.value,
            })
            .collect(),
    }
}
