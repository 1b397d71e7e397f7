use std::{collections::HashMap, fmt::Display, str::FromStr, time::Duration};

use anyhow::{Context, anyhow};

/// Source of configuration variables.
///
/// The process environment in production; a fixed map in tests so that
/// loading is deterministic and does not mutate global state.
pub(crate) struct EnvSource {
    fixed: Option<HashMap<String, String>>,
}

impl EnvSource {
    pub(crate) fn process() -> Self {
        EnvSource { fixed: None }
    }

    #[cfg(test)]
    pub(crate) fn fixed<'a>(vars: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        EnvSource {
            fixed: Some(
                vars.into_iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
        }
    }

    #[cfg(test)]
    pub(crate) fn set(&mut self, name: &str, value: &str) {
        if let Some(vars) = &mut self.fixed {
            vars.insert(name.to_string(), value.to_string());
        }
    }

    pub(crate) fn get(&self, name: &str) -> Option<String> {
        match &self.fixed {
            Some(vars) => vars.get(name).cloned(),
            None => std::env::var(name).ok().filter(|value| !value.is_empty()),
        }
    }

    pub(crate) fn require(&self, name: &str) -> anyhow::Result<String> {
        self.get(name)
            .ok_or_else(|| anyhow!("required environment variable {name} is not set"))
    }

    pub(crate) fn parse<T>(&self, name: &str, default: T) -> anyhow::Result<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.get(name) {
            Some(raw) => raw
                .parse()
                .map_err(|e| anyhow!("{e}"))
                .with_context(|| format!("invalid value for {name}")),
            None => Ok(default),
        }
    }

    /// Parse a millisecond-valued variable into a `Duration`.
    pub(crate) fn parse_millis(&self, name: &str, default_ms: u64) -> anyhow::Result<Duration> {
        Ok(Duration::from_millis(self.parse(name, default_ms)?))
    }

    pub(crate) fn parse_bool(&self, name: &str, default: bool) -> anyhow::Result<bool> {
        match self.get(name).as_deref() {
            None => Ok(default),
            Some("true") | Some("1") | Some("yes") => Ok(true),
            Some("false") | Some("0") | Some("no") => Ok(false),
            Some(other) => Err(anyhow!("invalid boolean value for {name}: {other}")),
        }
    }
}
