use super::settings::{Settings, SettingsLayer};
use super::user::load_user_config;
use serde_json::Value;
use std::fs;
use std::path::Path;

/// Project config file looked up in the workspace root.
pub const PROJECT_CONFIG_FILE: &str = ".solargraph-bridge.toml";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SettingsEventKind {
    Info,
    Warning,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SettingsEvent {
    pub kind: SettingsEventKind,
    pub message: String,
}

impl SettingsEvent {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            kind: SettingsEventKind::Info,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            kind: SettingsEventKind::Warning,
            message: message.into(),
        }
    }
}

#[derive(Default, Debug)]
pub struct SettingsLoadOutcome {
    pub settings: Settings,
    pub events: Vec<SettingsEvent>,
}

/// Load settings from every layer.
///
/// Precedence (lowest first): programmed defaults < user config <
/// project config < JSON override from the editor. A layer that fails to
/// load is skipped with a warning event instead of failing the whole load.
pub fn load_settings(root_path: Option<&Path>, override_settings: Option<Value>) -> SettingsLoadOutcome {
    let mut events = Vec::new();
    let mut settings = Settings::default();

    if let Some(layer) = load_user_layer(&mut events) {
        settings.apply(layer);
    }
    if let Some(layer) = load_project_layer(root_path, &mut events) {
        settings.apply(layer);
    }
    if let Some(layer) = override_settings.and_then(|value| parse_override_settings(value, &mut events)) {
        settings.apply(layer);
    }

    SettingsLoadOutcome { settings, events }
}

fn load_user_layer(events: &mut Vec<SettingsEvent>) -> Option<SettingsLayer> {
    match load_user_config() {
        Ok(Some(layer)) => {
            events.push(SettingsEvent::info("Loaded user config"));
            Some(layer)
        }
        Ok(None) => None,
        Err(err) => {
            events.push(SettingsEvent::warning(format!(
                "Failed to load user config: {}",
                err
            )));
            None
        }
    }
}

fn load_project_layer(root_path: Option<&Path>, events: &mut Vec<SettingsEvent>) -> Option<SettingsLayer> {
    let root = root_path?;
    let config_path = root.join(PROJECT_CONFIG_FILE);
    if !config_path.exists() {
        return None;
    }

    events.push(SettingsEvent::info(format!(
        "Found config file: {}",
        config_path.display()
    )));

    match fs::read_to_string(&config_path) {
        Ok(contents) => match toml::from_str::<SettingsLayer>(&contents) {
            Ok(layer) => {
                events.push(SettingsEvent::info(format!(
                    "Successfully loaded {}",
                    PROJECT_CONFIG_FILE
                )));
                Some(layer)
            }
            Err(err) => {
                events.push(SettingsEvent::warning(format!(
                    "Failed to parse {}: {}",
                    PROJECT_CONFIG_FILE, err
                )));
                None
            }
        },
        Err(err) => {
            events.push(SettingsEvent::warning(format!(
                "Failed to read {}: {}",
                PROJECT_CONFIG_FILE, err
            )));
            None
        }
    }
}

fn parse_override_settings(value: Value, events: &mut Vec<SettingsEvent>) -> Option<SettingsLayer> {
    // Editors nest the section under "solargraph"; accept both shapes.
    let value = match value {
        Value::Object(mut map) if map.contains_key("solargraph") => {
            map.remove("solargraph").unwrap_or(Value::Null)
        }
        other => other,
    };
    if value.is_null() {
        return None;
    }

    match serde_json::from_value::<SettingsLayer>(value) {
        Ok(layer) => {
            events.push(SettingsEvent::info("Parsed override settings"));
            Some(layer)
        }
        Err(err) => {
            events.push(SettingsEvent::warning(format!(
                "Failed to parse override settings: {}",
                err
            )));
            None
        }
    }
}
