//! Tune the engine and load its settings from hierarchical configuration sources.
//!
//! [`EngineConfig`] holds the knobs, [`ConfigLoader`] assembles them out of YAML files and
//! environment variables.
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::de::DeserializeOwned;

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
/// The settings shared by all the endpoints of an [`Application`](crate::Application).
pub struct EngineConfig {
    /// The maximum amount of time a single teardown step is allowed to take.
    ///
    /// A teardown step that runs out of time is abandoned and reported as a cancellation.
    /// Outer scopes are still torn down.
    ///
    /// # Default
    ///
    /// No limit.
    #[serde(with = "humantime_serde", default)]
    pub teardown_timeout: Option<Duration>,
    /// The maximum amount of time resolution and the endpoint handler are allowed to take,
    /// together.
    ///
    /// Running out of time is reported as a cancellation. Teardown is not included.
    ///
    /// # Default
    ///
    /// No limit.
    #[serde(with = "humantime_serde", default)]
    pub resolution_timeout: Option<Duration>,
    /// Run background tasks even if the outcome was [suppressed](crate::Outcome::Suppressed).
    ///
    /// # Default
    ///
    /// `false`: background tasks only run for successful outcomes.
    #[serde(default)]
    pub run_background_tasks_on_suppressed: bool,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_teardown_timeout(mut self, timeout: Duration) -> Self {
        self.teardown_timeout = Some(timeout);
        self
    }

    pub fn with_resolution_timeout(mut self, timeout: Duration) -> Self {
        self.resolution_timeout = Some(timeout);
        self
    }

    pub fn with_background_tasks_on_suppressed(mut self, enabled: bool) -> Self {
        self.run_background_tasks_on_suppressed = enabled;
        self
    }
}

static PROFILE_ENV_VAR: &str = "SCOPEFLOW_PROFILE";
static ENV_PREFIX: &str = "SCOPEFLOW_";

#[derive(Clone, Debug, Default)]
/// A utility to load hierarchical configuration.
///
/// Sources are merged in this order, later ones taking precedence:
///
/// 1. `{configuration_dir}/base.yml`;
/// 2. `{configuration_dir}/{profile}.yml`;
/// 3. environment variables starting with `SCOPEFLOW_`, using `__` to separate
///    nesting levels (e.g. `SCOPEFLOW_TEARDOWN_TIMEOUT=5s`).
///
/// Missing files are skipped.
/// The profile is read from the `SCOPEFLOW_PROFILE` environment variable,
/// unless you set it explicitly via [`ConfigLoader::profile`].
/// `configuration_dir` defaults to `configuration`.
pub struct ConfigLoader {
    configuration_dir: Option<PathBuf>,
    profile: Option<String>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    pub fn configuration_dir<Dir>(mut self, dir: Dir) -> Self
    where
        Dir: Into<PathBuf>,
    {
        self.configuration_dir = Some(dir.into());
        self
    }

    /// Load the configuration.
    ///
    /// `Config` is usually [`EngineConfig`], but it can be any type that embeds it.
    pub fn load<Config>(self) -> Result<Config, errors::ConfigLoadError>
    where
        Config: DeserializeOwned,
    {
        let profile = match self.profile {
            Some(profile) => profile,
            None => load_profile().map_err(errors::ConfigLoadError)?,
        };
        let configuration_dir = self
            .configuration_dir
            .unwrap_or_else(|| PathBuf::from("configuration"));
        let span = tracing::info_span!(
            "Loading configuration",
            configuration.directory = %configuration_dir.display(),
            configuration.profile = %profile,
        );
        let _guard = span.enter();
        let base_filepath = configuration_dir.join("base.yml");
        let profile_filepath = configuration_dir.join(format!("{profile}.yml"));

        let env_source = Env::prefixed(ENV_PREFIX)
            .split("__")
            .ignore(&["PROFILE"]);
        let figment = Figment::new()
            .merge(Yaml::file(base_filepath))
            .merge(Yaml::file(profile_filepath))
            .merge(env_source);

        figment
            .extract()
            .context("Failed to load hierarchical configuration")
            .map_err(errors::ConfigLoadError)
    }
}

fn load_profile() -> Result<String, anyhow::Error> {
    std::env::var(PROFILE_ENV_VAR).with_context(|| {
        format!(
            "Failed to load the configuration profile: the environment variable `{PROFILE_ENV_VAR}` \
            is either not set or set to a value that contains invalid UTF-8"
        )
    })
}

pub mod errors {
    #[derive(Debug, thiserror::Error)]
    #[error("Failed to load configuration")]
    /// The error returned by [`ConfigLoader::load`](super::ConfigLoader::load).
    pub struct ConfigLoadError(#[source] pub(super) anyhow::Error);
}
