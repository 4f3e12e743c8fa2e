//! Blame settings and their live-reload plumbing.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Configuration section name used by clients.
pub const SETTINGS_SECTION: &str = "gitblame";

/// Default number of blames allowed to run at the same time.
pub const DEFAULT_PARALLEL_BLAMES: i64 = 2;

/// Settings that influence how files are blamed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BlameSettings {
    /// Maximum number of concurrent `git blame` processes (clamped to 1).
    pub parallel_blames: i64,

    /// Pass `-w` to git blame.
    pub ignore_whitespace: bool,

    /// Candidate revision files relative to the repository root; the first
    /// one that exists is passed with `-S`.
    pub revs_file: Vec<String>,

    /// Git executable to launch.
    pub git_command: String,
}

impl Default for BlameSettings {
    fn default() -> Self {
        Self {
            parallel_blames: DEFAULT_PARALLEL_BLAMES,
            ignore_whitespace: false,
            revs_file: Vec::new(),
            git_command: "git".to_string(),
        }
    }
}

impl BlameSettings {
    /// Overlay the keys present in a client payload onto these settings.
    ///
    /// Accepts either `{ "gitblame": { ... } }` or the bare section object.
    /// Keys missing from the payload keep their current value.
    pub fn apply(&mut self, payload: &Value) -> Result<(), serde_json::Error> {
        let section = match payload.get(SETTINGS_SECTION) {
            Some(section) => section,
            None => payload,
        };

        let Value::Object(incoming) = section else {
            return Ok(());
        };

        let mut merged = serde_json::to_value(&*self)?;
        if let Value::Object(current) = &mut merged {
            for (key, value) in incoming {
                current.insert(key.clone(), value.clone());
            }
        }

        *self = serde_json::from_value(merged)?;
        Ok(())
    }
}

/// Settings shared between the server and the git layer.
pub type SharedSettings = Arc<RwLock<BlameSettings>>;
