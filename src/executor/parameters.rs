//! Parameter changes applied to a unit's tunables
//!
//! Units read their tunables from an override file in their working
//! directory. The changer merges new values into that file and reports
//! which files it touched so the change tracker can mirror them.

use std::path::{Path, PathBuf};

use super::HandlerError;
use crate::config::defaults::OVERRIDES_FILE;

/// One tunable and its new value
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterChange {
    pub key: &'static str,
    pub value: serde_json::Value,
}

impl ParameterChange {
    pub fn new(key: &'static str, value: serde_json::Value) -> Self {
        Self { key, value }
    }
}

pub trait ParameterChanger: Send + Sync {
    /// Apply `changes` for a unit; returns the files written
    fn apply(&self, unit: &str, directory: &Path, changes: &[ParameterChange]) -> Result<Vec<PathBuf>, HandlerError>;
}

/// Writes `warden_overrides.toml` in the unit directory
#[derive(Debug, Clone, Copy, Default)]
pub struct OverrideFileChanger;

impl OverrideFileChanger {
    fn read_table(path: &Path) -> Result<toml::Table, HandlerError> {
        if !path.exists() {
            return Ok(toml::Table::new());
        }
        let contents = std::fs::read_to_string(path).map_err(|source| HandlerError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        contents
            .parse::<toml::Table>()
            .map_err(|e| HandlerError::Parameter(format!("unreadable {}: {e}", path.display())))
    }
}

impl ParameterChanger for OverrideFileChanger {
    fn apply(&self, unit: &str, directory: &Path, changes: &[ParameterChange]) -> Result<Vec<PathBuf>, HandlerError> {
        if directory.as_os_str().is_empty() {
            return Err(HandlerError::NoDirectory(unit.to_string()));
        }
        let path = directory.join(OVERRIDES_FILE);
        let mut table = Self::read_table(&path)?;

        for change in changes {
            let value = toml::Value::try_from(&change.value).map_err(|e| {
                HandlerError::Parameter(format!("{} cannot be stored: {e}", change.key))
            })?;
            table.insert(change.key.to_string(), value);
        }

        let rendered = toml::to_string_pretty(&table)
            .map_err(|e| HandlerError::Parameter(format!("cannot render overrides: {e}")))?;
        std::fs::write(&path, rendered).map_err(|source| HandlerError::Io {
            path: path.clone(),
            source,
        })?;

        tracing::info!(unit = %unit, file = %path.display(), changes = changes.len(), "Parameter overrides written");
        Ok(vec![path])
    }
}
