pub mod load;
pub mod resolve;
pub mod settings;
pub mod user;

pub use load::{
    PROJECT_CONFIG_FILE, SettingsEvent, SettingsEventKind, SettingsLoadOutcome, load_settings,
};
pub use resolve::{BackendCommand, Configuration, ShellCommand, resolve_command_path};
pub use settings::{
    DEFAULT_EXTERNAL_PORT, ExternalServer, Settings, SettingsLayer, ShellOverride, TransportKind,
};
pub use user::{UserConfigError, UserConfigResult, load_user_config, user_config_path};
