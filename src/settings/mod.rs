//! Loading and validation of settings.
//!
//! Values defined in the configuration file can be overridden by environment variables prefixed
//! with `FEDCONN_`, nested keys being separated by `__`. An example configuration file can be found
//! in the `configs/` directory located in the repository root.

#[cfg(test)]
mod tests;

use std::{fmt, path::Path, path::PathBuf, time::Duration};

use config::{Config, ConfigError, Environment};
use serde::{
    de::{self, Deserializer, Visitor},
    Deserialize,
};
use thiserror::Error;
use tracing_subscriber::filter::EnvFilter;
use validator::{Validate, ValidationError, ValidationErrors};

#[derive(Error, Debug)]
/// An error related to loading and validation of settings.
pub enum SettingsError {
    #[error("configuration loading failed: {0}")]
    Loading(#[from] ConfigError),
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationErrors),
}

#[derive(Debug, Validate, Deserialize)]
/// The combined settings.
///
/// Each section in the configuration file corresponds to the identically named settings field.
pub struct Settings {
    #[validate]
    #[serde(default)]
    pub round: RoundSettings,
    pub parameters: ParametersSettings,
    pub sites: SitesSettings,
    pub log: LoggingSettings,
}

impl Settings {
    /// Loads and validates the settings via a configuration file.
    ///
    /// # Errors
    /// Fails when the loading of the configuration file or its validation failed.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let settings: Settings = Self::load(path)?;
        settings.validate()?;
        Ok(settings)
    }

    fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                Environment::with_prefix("fedconn")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

#[derive(Debug, Validate, Deserialize, Clone, Copy, PartialEq)]
#[validate(schema(function = "validate_round"))]
#[serde(default)]
/// The round settings.
pub struct RoundSettings {
    /// The minimal number of sites whose results are required to close a phase.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [round]
    /// min_clients = 2
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// FEDCONN_ROUND__MIN_CLIENTS=2
    /// ```
    #[validate(range(min = 1))]
    pub min_clients: usize,

    /// The time in seconds a phase keeps accepting results once the quorum is reached.
    pub wait_time_after_min_received: u64,

    /// The time in seconds after which a phase closes, regardless of the quorum. `0` disables the
    /// timeout.
    pub timeout: u64,

    /// The time in milliseconds between two checks of the closing conditions of a phase.
    pub poll_interval: u64,

    /// Whether a failed site task only excludes the site (`true`) or fails the round (`false`).
    pub ignore_result_error: bool,
}

impl Default for RoundSettings {
    fn default() -> Self {
        Self {
            min_clients: 2,
            wait_time_after_min_received: 10,
            timeout: 0,
            poll_interval: 500,
            ignore_result_error: false,
        }
    }
}

impl RoundSettings {
    /// Checks the round settings.
    fn validate_round(&self) -> Result<(), ValidationError> {
        if self.poll_interval == 0 {
            return Err(ValidationError::new("poll interval must be positive"));
        }
        if self.timeout != 0 && self.timeout.saturating_mul(1_000) < self.poll_interval {
            return Err(ValidationError::new("timeout shorter than the poll interval"));
        }
        Ok(())
    }

    /// Gets the grace period after the quorum is reached.
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.wait_time_after_min_received)
    }

    /// Gets the phase timeout, if any.
    pub fn timeout(&self) -> Option<Duration> {
        if self.timeout == 0 {
            None
        } else {
            Some(Duration::from_secs(self.timeout))
        }
    }

    /// Gets the poll interval.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval)
    }
}

/// A wrapper for validate derive.
fn validate_round(s: &RoundSettings) -> Result<(), ValidationError> {
    s.validate_round()
}

#[derive(Debug, Deserialize, Clone)]
/// The shared parameters settings.
pub struct ParametersSettings {
    /// The path of the JSON file holding the privacy parameters of the round.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [parameters]
    /// path = "configs/parameters.json"
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// FEDCONN_PARAMETERS__PATH=configs/parameters.json
    /// ```
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
/// The settings of the local sites.
pub struct SitesSettings {
    /// The directory containing one sub-directory with a `data.json` file per site.
    pub data_dir: PathBuf,
    /// The directory under which every site writes its results into a sub-directory of its own.
    pub results_dir: PathBuf,
    /// The names of the sites. If absent, every sub-directory of `data_dir` is a site.
    #[serde(default)]
    pub names: Option<Vec<String>>,
    /// Seeds the noise of the sites. If absent, the noise is seeded from the OS.
    #[serde(default)]
    pub seed: Option<u64>,
}

#[derive(Debug, Deserialize)]
/// Logging settings.
pub struct LoggingSettings {
    /// A comma-separated list of logging directives. More information about logging directives
    /// can be found [here].
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [log]
    /// filter = "info"
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// FEDCONN_LOG__FILTER=info
    /// ```
    ///
    /// [here]: https://docs.rs/tracing-subscriber/0.3.16/tracing_subscriber/filter/struct.EnvFilter.html#directives
    #[serde(deserialize_with = "deserialize_env_filter")]
    pub filter: EnvFilter,
}

fn deserialize_env_filter<'de, D>(deserializer: D) -> Result<EnvFilter, D::Error>
where
    D: Deserializer<'de>,
{
    struct EnvFilterVisitor;

    impl<'de> Visitor<'de> for EnvFilterVisitor {
        type Value = EnvFilter;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            write!(formatter, "a valid tracing filter directive: https://docs.rs/tracing-subscriber/0.3.16/tracing_subscriber/filter/struct.EnvFilter.html#directives")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            EnvFilter::try_new(value)
                .map_err(|_| de::Error::invalid_value(serde::de::Unexpected::Str(value), &self))
        }
    }

    deserializer.deserialize_str(EnvFilterVisitor)
}
