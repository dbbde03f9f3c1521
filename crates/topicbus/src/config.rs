//! Bus configuration.
//!
//! Read from the `[bus]` table of a TOML file. Other tables in the same file
//! are ignored, so the bus section can live next to logging settings.
//!
//! ```toml
//! [bus]
//! reply_timeout_ms = 250
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConfigError, ConfigResult};

/// Default deadline for [`EventBus::request`](crate::EventBus::request).
pub const DEFAULT_REPLY_TIMEOUT_MS: u64 = 1000;

/// Runtime settings for an [`EventBus`](crate::EventBus).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusConfig {
    /// Reply deadline used when the caller does not give one.
    #[serde(default = "default_reply_timeout_ms")]
    pub reply_timeout_ms: u64,
}

fn default_reply_timeout_ms() -> u64 {
    DEFAULT_REPLY_TIMEOUT_MS
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            reply_timeout_ms: default_reply_timeout_ms(),
        }
    }
}

#[derive(Deserialize)]
struct ConfigFile {
    #[serde(default)]
    bus: BusConfig,
}

impl BusConfig {
    /// Set the default reply deadline.
    #[must_use]
    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// The default reply deadline.
    #[must_use]
    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }

    /// Parse a config from TOML text.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the text is not valid TOML for this
    /// schema or fails validation.
    pub fn from_toml_str(text: &str) -> ConfigResult<Self> {
        Self::parse(text, "<inline>")
    }

    /// Load a config from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the file cannot be read or parsed, or
    /// fails validation.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::parse(&text, &path.display().to_string())?;
        debug!(path = %path.display(), "loaded bus config");
        Ok(config)
    }

    fn parse(text: &str, origin: &str) -> ConfigResult<Self> {
        let file: ConfigFile = toml::from_str(text).map_err(|source| ConfigError::ParseError {
            path: origin.to_owned(),
            source,
        })?;
        file.bus.validate()?;
        Ok(file.bus)
    }

    /// Check the config for unusable values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the reply timeout is zero.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.reply_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "bus.reply_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
