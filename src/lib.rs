mod backend;
mod config;
mod engine;
mod error;
mod line;
mod registry;
mod routes;
mod snapshot;

pub use config::{
    BootState, DuplicatePins, GlobalConfig, Keyword, Label, Logic, MAX_PIN_ID, PinConfig, PinMode,
    Pull,
};
pub use engine::{COMMANDS, CommandEngine, DEFAULT_CYCLE_MS, Message, NO_ERROR};
pub use error::AppError;
pub use line::{EdgeDispatcher, EdgeEvent, EdgeHandler, LineProvider, PinLine};
pub use registry::{BoundPin, PinRegistry};
pub use routes::{AppState, api_scope, spawn_edge_monitor};
pub use snapshot::{PinView, PublicSnapshot, build_snapshot};

#[cfg(feature = "hardware-gpio")]
pub use backend::LibgpiodProvider;
pub use backend::MockLineProvider;
