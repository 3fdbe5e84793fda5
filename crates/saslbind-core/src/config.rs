//! Loader configuration.
//!
//! Settings come from a `[sasl]` table in a TOML file and from environment
//! variables, with the environment taking precedence:
//!
//! ```toml
//! [sasl]
//! candidates = ["/opt/sasl/lib/libsasl2.so.3"]
//! log_failures = true
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::candidates::default_candidates;
use crate::error::{LoaderError, Result};

/// Environment variable names.
pub mod env_vars {
    /// Comma-separated candidate names, replacing the platform list.
    pub const LIBRARY: &str = "SASLBIND_LIBRARY";
    /// `true` to report load failures at warn level.
    pub const LOG_FAILURES: &str = "SASLBIND_LOG_FAILURES";
}

/// How the SASL library is looked up.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Candidate names tried in order. Empty means the platform default.
    pub candidates: Vec<String>,

    /// Report a failed load at warn level instead of debug.
    pub log_failures: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    sasl: LoaderConfig,
}

impl LoaderConfig {
    /// Parse the `[sasl]` table of a TOML document. A missing table yields
    /// the defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(content)
            .map_err(|e| LoaderError::Config(format!("Invalid TOML: {}", e)))?;
        Ok(file.sasl)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            LoaderError::Config(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Defaults overridden by the process environment.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Apply environment overrides on top of `self`.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(list) = lookup(env_vars::LIBRARY) {
            let candidates = parse_list(&list);
            if !candidates.is_empty() {
                self.candidates = candidates;
            }
        }

        if let Some(flag) = lookup(env_vars::LOG_FAILURES) {
            match flag.trim().parse() {
                Ok(value) => self.log_failures = value,
                Err(_) => tracing::warn!(
                    variable = env_vars::LOG_FAILURES,
                    value = %flag,
                    "ignoring non-boolean value"
                ),
            }
        }

        self
    }

    /// Effective candidate list: the configured names, or the platform
    /// default when none are set.
    pub fn candidates(&self) -> Vec<&str> {
        if self.candidates.is_empty() {
            default_candidates().to_vec()
        } else {
            self.candidates.iter().map(String::as_str).collect()
        }
    }
}

fn parse_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}
