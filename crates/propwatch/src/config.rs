#![forbid(unsafe_code)]

//! Dispatch configuration.
//!
//! [`ObserveConfig`] controls what happens when a listener panics and whether
//! writes of an unchanged value are dispatched at all. It can be built in code
//! or read from the environment:
//!
//! | Variable | Values | Default |
//! |----------|--------|---------|
//! | `PROPWATCH_LISTENER_FAILURE` | `propagate`, `isolate` | `propagate` |
//! | `PROPWATCH_SKIP_UNCHANGED` | `1`, `true`, `yes`, `on` (anything else is off) | off |

use std::env;

use crate::error::ObserveError;

/// Environment variable selecting the [`ListenerFailurePolicy`].
pub const ENV_LISTENER_FAILURE: &str = "PROPWATCH_LISTENER_FAILURE";
/// Environment variable enabling [`ObserveConfig::skip_unchanged`].
pub const ENV_SKIP_UNCHANGED: &str = "PROPWATCH_SKIP_UNCHANGED";

/// What a write does when one of its listeners panics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListenerFailurePolicy {
    /// The panic unwinds out of `set`: remaining listeners are skipped and
    /// the pending write never happens.
    #[default]
    Propagate,
    /// Each listener runs under `catch_unwind`. A panic is logged and counted,
    /// the remaining listeners still run and the write still happens.
    Isolate,
}

impl ListenerFailurePolicy {
    /// Parse a policy name (case-insensitive, surrounding whitespace ignored).
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "propagate" | "abort" => Some(Self::Propagate),
            "isolate" | "continue" => Some(Self::Isolate),
            _ => None,
        }
    }
}

/// Configuration shared by an [`Observer`](crate::Observer) and the
/// observables it creates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObserveConfig {
    /// Listener panic handling.
    pub failure_policy: ListenerFailurePolicy,
    /// Treat a write of a value equal to the current one as a no-op
    /// (no dispatch, no version bump).
    pub skip_unchanged: bool,
}

/// Configuration plus any diagnostics produced while reading it.
#[derive(Debug, Clone)]
pub struct ObserveConfigParse {
    pub config: ObserveConfig,
    pub errors: Vec<ObserveError>,
}

impl ObserveConfig {
    /// Default configuration: propagate panics, dispatch every write.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the listener failure policy.
    #[must_use]
    pub fn with_failure_policy(mut self, policy: ListenerFailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Set whether unchanged writes are skipped.
    #[must_use]
    pub fn with_skip_unchanged(mut self, enabled: bool) -> Self {
        self.skip_unchanged = enabled;
        self
    }

    /// Read configuration from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_env_with_diagnostics().config
    }

    /// Read configuration from the process environment and return diagnostics.
    #[must_use]
    pub fn from_env_with_diagnostics() -> ObserveConfigParse {
        from_env_with(|key| env::var(key).ok())
    }
}

/// Read configuration through a custom environment lookup.
///
/// Unparseable values keep the default and are reported in
/// [`ObserveConfigParse::errors`].
pub fn from_env_with<F>(get_env: F) -> ObserveConfigParse
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = ObserveConfig::default();
    let mut errors = Vec::new();

    if let Some(value) = get_env(ENV_LISTENER_FAILURE) {
        match ListenerFailurePolicy::parse(&value) {
            Some(policy) => config.failure_policy = policy,
            None => {
                tracing::warn!(key = ENV_LISTENER_FAILURE, %value, "ignoring invalid config value");
                errors.push(ObserveError::ConfigInvalid {
                    key: ENV_LISTENER_FAILURE,
                    value,
                });
            }
        }
    }

    if let Some(value) = get_env(ENV_SKIP_UNCHANGED) {
        config.skip_unchanged = env_flag(&value);
    }

    ObserveConfigParse { config, errors }
}

#[inline]
fn env_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
