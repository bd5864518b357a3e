//! Configuration merge system
//!
//! Three layers, later wins:
//! 1. Built-in defaults
//! 2. TOML file (`--config`)
//! 3. CLI flags

mod defaults;
mod effective;
mod merge;
mod replay;

pub use defaults::BuiltinDefaults;
pub use effective::{ConfigError, ConfigOrigin, ConfigSource, EffectiveConfig, EFFECTIVE_CONFIG_NAME};
pub use merge::{deep_merge, merge_layers};
pub use replay::{DirectoriesConfig, DispatchConfig, FailurePolicy, ListenerConfig, ReplayConfig};
