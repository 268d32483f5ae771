//! Caller deadlines.

use std::time::Duration;

/// Default caller deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(45);

/// Selects the caller deadline of an inbound call.
#[derive(Debug, Clone)]
pub struct TimeoutTable {
    default: Duration,
    /// Ordered: the first matching payload marker wins.
    overrides: Vec<(String, Duration)>,
}

impl Default for TimeoutTable {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl TimeoutTable {
    /// Creates a table without overrides.
    pub fn new(default: Duration) -> Self {
        Self { default, overrides: Vec::new() }
    }

    /// Adds an override for calls whose context is `key`, or whose payload
    /// contains `key`.
    pub fn with_override(mut self, key: impl Into<String>, timeout: Duration) -> Self {
        self.overrides.push((key.into(), timeout));
        self
    }

    /// The deadline of calls no override matches.
    pub fn default_timeout(&self) -> Duration {
        self.default
    }

    /// The deadline for a call: an override keyed by the context (with or
    /// without its leading `/`), else the first override whose key occurs in
    /// the payload, else the default.
    pub fn for_call(&self, context: &str, payload: &str) -> Duration {
        let bare = context.trim_start_matches('/');

        self.overrides
            .iter()
            .find(|(key, _)| key == context || key.trim_start_matches('/') == bare)
            .or_else(|| {
                self.overrides
                    .iter()
                    .find(|(key, _)| !key.is_empty() && payload.contains(key.as_str()))
            })
            .map_or(self.default, |(_, timeout)| *timeout)
    }
}
