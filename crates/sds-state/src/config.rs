use serde::{Deserialize, Serialize};

use sds_store::SQLITE_CACHE_SIZE;

use crate::error::{StateError, StateResult};

/// Settings of the SQL dirstate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Skip copying the database file for backups. The database
    /// transaction is the only undo mechanism when set.
    pub skip_backups: bool,
    /// Write the parents-only shadow `dirstate` file after each commit.
    pub emit_shadow_file: bool,
    /// Value passed to `PRAGMA cache_size`.
    pub cache_size: i64,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            skip_backups: true,
            emit_shadow_file: true,
            cache_size: SQLITE_CACHE_SIZE,
        }
    }
}

#[derive(Deserialize)]
struct Document {
    sqldirstate: Option<StateConfig>,
}

impl StateConfig {
    /// Parse settings from TOML.
    ///
    /// Accepts either a document whose keys are the settings themselves or
    /// one that nests them under a `[sqldirstate]` table. Missing keys keep
    /// their defaults.
    pub fn from_toml_str(input: &str) -> StateResult<Self> {
        let value: toml::Table =
            toml::from_str(input).map_err(|e| StateError::Config(e.to_string()))?;
        if value.contains_key("sqldirstate") {
            let doc: Document =
                toml::from_str(input).map_err(|e| StateError::Config(e.to_string()))?;
            return Ok(doc.sqldirstate.unwrap_or_default());
        }
        toml::from_str(input).map_err(|e| StateError::Config(e.to_string()))
    }

    /// Keep backup copies of the database file.
    pub fn with_backups(mut self) -> Self {
        self.skip_backups = false;
        self
    }
}
