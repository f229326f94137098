//! Environment-driven switches for test suites.

use serde::{
    de::value::{Error as ValueError, MapDeserializer},
    Deserialize, Deserializer,
};
use std::{env, time::Duration};

/// Prefix of all environment variables read into [Settings].
pub const ENV_VAR_PREFIX: &str = "SAKERHET_";

/// When set to a non-empty value, integration tests run and unit tests may be skipped.
pub const RUN_INTEGRATION_TESTS_ENV_VAR: &str = "SAKERHET_RUN_INTEGRATION_TESTS";

/// Overall timeout for integration tests in seconds.
pub const INTEGRATION_TEST_TIMEOUT_ENV_VAR: &str = "SAKERHET_INTEGRATION_TEST_TIMEOUT";

/// Fallback for [integration_test_timeout].
pub const DEFAULT_INTEGRATION_TEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Test suite settings, deserialized from `SAKERHET_`-prefixed environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Settings {
    #[serde(default, deserialize_with = "deserialize_switch")]
    pub run_integration_tests: bool,

    #[serde(
        default = "default_integration_test_timeout",
        deserialize_with = "deserialize_timeout"
    )]
    pub integration_test_timeout: Duration,
}

impl Settings {
    /// Read the settings from the environment of this process.
    pub fn from_env() -> Self {
        let vars = env::vars_os()
            .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)));
        Self::from_vars(vars).unwrap_or_default()
    }

    /// Read the settings from the given variables; variables without [ENV_VAR_PREFIX] are
    /// ignored.
    pub fn from_vars<I>(vars: I) -> Result<Self, ValueError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars = vars.into_iter().filter_map(|(key, value)| {
            key.strip_prefix(ENV_VAR_PREFIX)
                .map(|key| (key.to_string(), value))
        });

        Self::deserialize(MapDeserializer::<_, ValueError>::new(vars))
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            run_integration_tests: false,
            integration_test_timeout: DEFAULT_INTEGRATION_TEST_TIMEOUT,
        }
    }
}

/// Whether integration tests should run, see [RUN_INTEGRATION_TESTS_ENV_VAR].
pub fn integration_tests_enabled() -> bool {
    Settings::from_env().run_integration_tests
}

/// Whether unit tests should run, i.e. the opposite of [integration_tests_enabled].
pub fn unit_tests_enabled() -> bool {
    !integration_tests_enabled()
}

/// The overall timeout for integration tests, see [INTEGRATION_TEST_TIMEOUT_ENV_VAR]. Falls back to
/// [DEFAULT_INTEGRATION_TEST_TIMEOUT] if unset or not a number of seconds.
pub fn integration_test_timeout() -> Duration {
    Settings::from_env().integration_test_timeout
}

fn default_integration_test_timeout() -> Duration {
    DEFAULT_INTEGRATION_TEST_TIMEOUT
}

fn deserialize_switch<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    String::deserialize(deserializer).map(|value| is_set(Some(&value)))
}

fn deserialize_timeout<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    String::deserialize(deserializer).map(|value| parse_timeout(Some(&value)))
}

fn is_set(value: Option<&str>) -> bool {
    value.is_some_and(|value| !value.is_empty())
}

fn parse_timeout(value: Option<&str>) -> Duration {
    value
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_INTEGRATION_TEST_TIMEOUT)
}
