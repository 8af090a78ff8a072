//! Go-to-definition.
//!
//! The backend reports locations as `path:line:column` strings.

use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;

use super::super::ProtocolBridge;
use super::super::protocol::{self, PositionParams, parse_suggestions};
use crate::error::{BridgeError, BridgeResult};

static LOCATION_PATTERN: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^(.+):(\d+):(\d+)$"));

/// A definition site in a source file. `line` and `column` are zero-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefinitionLocation {
    pub file: PathBuf,
    pub line: u32,
    pub column: u32,
}

impl DefinitionLocation {
    /// Parse `path:line:column`. The path may itself contain colons.
    pub fn parse(location: &str) -> Option<Self> {
        let pattern = match LOCATION_PATTERN.as_ref() {
            Ok(pattern) => pattern,
            Err(err) => {
                log::error!(
                    target: "solargraph_bridge::bridge",
                    "Location pattern failed to compile: {}",
                    err
                );
                return None;
            }
        };
        let caps = pattern.captures(location.trim())?;
        Some(Self {
            file: PathBuf::from(&caps[1]),
            line: caps[2].parse().ok()?,
            column: caps[3].parse().ok()?,
        })
    }

    /// `file://` URL of the definition's file.
    pub fn url(&self) -> Option<url::Url> {
        url::Url::from_file_path(&self.file).ok()
    }
}

impl std::fmt::Display for DefinitionLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.file.display(), self.line, self.column)
    }
}

impl ProtocolBridge {
    /// Definition sites of the symbol at the cursor.
    ///
    /// Suggestions without a parseable location are skipped.
    pub async fn definition(&self, params: &PositionParams) -> BridgeResult<Vec<DefinitionLocation>> {
        let result = self.request(protocol::DEFINE, params.to_value()).await?;
        let suggestions = parse_suggestions(&result)
            .map_err(|message| BridgeError::request_failed(protocol::DEFINE, message))?;

        Ok(suggestions
            .iter()
            .filter_map(|suggestion| suggestion.location.as_deref())
            .filter_map(DefinitionLocation::parse)
            .collect())
    }
}
