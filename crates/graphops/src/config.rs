//! Plugin configuration loaded from `graphops.toml`.
//!
//! # Resolution Algorithm
//!
//! 1. The path in the `GRAPHOPS_CONFIG` environment variable
//! 2. `graphops.toml` in the current directory
//! 3. `graphops.toml` in each parent directory, walking up to the root
//! 4. Built-in defaults
//!
//! Every section and field is optional; missing values fall back to the
//! defaults documented on each field.
//!
//! ```toml
//! [graph]
//! endpoint = "https://graph.microsoft.com/v1.0"
//!
//! [upload]
//! threshold_bytes = 4194304
//! slice_bytes = 3145728
//! max_retry_attempts = 3
//! conflict_behavior = "rename"
//!
//! [trigger]
//! interval_secs = 60
//! ```

use std::{
    fs,
    path::{Path, PathBuf},
};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Environment variable holding an explicit config path.
pub const CONFIG_ENV_VAR: &str = "GRAPHOPS_CONFIG";

/// File name searched for in the current directory and its parents.
pub const CONFIG_FILE_NAME: &str = "graphops.toml";

pub const DEFAULT_GRAPH_ENDPOINT: &str = "https://graph.microsoft.com/v1.0";
pub const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com";

const MIB: u64 = 1024 * 1024;

/// Errors that can occur while loading configuration.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

/// What the remote API should do when an item with the same name already
/// exists in the target folder.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum ConflictBehavior {
    /// Keep both; the new item gets a unique name.
    #[default]
    Rename,
    /// Overwrite the existing item.
    Replace,
    /// Fail the request.
    Fail,
}

impl ConflictBehavior {
    /// Value sent as `@microsoft.graph.conflictBehavior`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rename => "rename",
            Self::Replace => "replace",
            Self::Fail => "fail",
        }
    }
}

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PluginConfig {
    pub graph: GraphSettings,
    pub upload: UploadSettings,
    pub trigger: TriggerSettings,
}

/// `[graph]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GraphSettings {
    /// Graph base URL. A credential's `endpoint` takes precedence.
    pub endpoint: String,
    /// Identity platform authority used for token acquisition.
    pub authority: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_GRAPH_ENDPOINT.to_string(),
            authority: DEFAULT_AUTHORITY.to_string(),
            timeout_secs: 60,
        }
    }
}

/// `[upload]` section: defaults for the upload task, overridable per call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UploadSettings {
    /// Content at or above this size goes through an upload session.
    pub threshold_bytes: u64,
    /// Size of each upload-session slice except the last.
    pub slice_bytes: u64,
    /// Every non-final slice must be a multiple of this.
    pub slice_alignment_bytes: u64,
    /// Retries per slice after the first attempt.
    pub max_retry_attempts: usize,
    /// First retry delay; later delays grow exponentially.
    pub retry_base_delay_ms: u64,
    pub conflict_behavior: ConflictBehavior,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            threshold_bytes: 4 * MIB,
            slice_bytes: 3 * MIB,
            slice_alignment_bytes: 64 * 1024,
            max_retry_attempts: 3,
            retry_base_delay_ms: 500,
            conflict_behavior: ConflictBehavior::Rename,
        }
    }
}

/// `[trigger]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TriggerSettings {
    /// Polling interval advertised to the host when a trigger input does not
    /// set one.
    pub interval_secs: u64,
}

impl Default for TriggerSettings {
    fn default() -> Self {
        Self { interval_secs: 60 }
    }
}

impl PluginConfig {
    /// Resolves the configuration using the algorithm described in the module
    /// docs. A missing file is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file is found but cannot be read or
    /// parsed.
    pub fn resolve() -> Result<Self, ConfigError> {
        if let Some(path) = std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from)
            && path.exists()
        {
            return Self::load(&path);
        }

        let current = std::env::current_dir().map_err(|source| ConfigError::Io {
            path: PathBuf::from("."),
            source,
        })?;
        match find_config_file(&current) {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    /// Loads configuration from an explicit path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid TOML or contains unknown
    /// keys.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }
}

/// Walks from `start` up to the filesystem root looking for
/// [`CONFIG_FILE_NAME`].
fn find_config_file(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(CONFIG_FILE_NAME))
        .find(|candidate| candidate.is_file())
}
