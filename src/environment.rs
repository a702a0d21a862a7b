// Secret Sync - Environment Module
//
// Holds the variables exported at boot. They are written into the process
// environment and recorded in a registry that is filled exactly once; every
// later stage only reads.

use indexmap::IndexMap;
use std::sync::OnceLock;

/// Global registry of injected variables
static INJECTED: OnceLock<IndexMap<String, String>> = OnceLock::new();

/// Variables produced by the injector, in the order they were set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentBinding {
    vars: IndexMap<String, String>,
    origins: IndexMap<String, String>,
}

impl EnvironmentBinding {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key` from `record`, returning the record that previously provided it.
    pub fn set(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
        record: &str,
    ) -> Option<String> {
        let key = key.into();
        self.vars.insert(key.clone(), value.into());
        self.origins.insert(key, record.to_string())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Record that provided `key`.
    pub fn origin(&self, key: &str) -> Option<&str> {
        self.origins.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.vars.keys().map(String::as_str)
    }

    /// Pairs in the order they were first set.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Export into the process environment and freeze the registry.
    ///
    /// Must run before any other thread reads the environment. Returns `false`
    /// (and changes nothing) if variables were already installed.
    pub fn install(self) -> bool {
        if INJECTED.get().is_some() {
            tracing::warn!("environment already installed, ignoring second install");
            return false;
        }

        for (key, value) in &self.vars {
            if !is_exportable(key, value) {
                tracing::warn!(
                    key = %key.escape_debug(),
                    "skipping variable that cannot be exported"
                );
                continue;
            }
            std::env::set_var(key, value);
        }

        let count = self.vars.len();
        if INJECTED.set(self.vars).is_err() {
            return false;
        }
        tracing::info!(variables = count, "environment installed");
        true
    }
}

/// Whether the OS accepts `key`/`value` as an environment variable.
///
/// Keys must be non-empty without `=` or NUL; values must not contain NUL.
pub fn is_exportable(key: &str, value: &str) -> bool {
    !key.is_empty() && !key.contains(&['=', '\0'][..]) && !value.contains('\0')
}

/// Look up an injected variable.
pub fn injected(key: &str) -> Option<&'static str> {
    INJECTED.get()?.get(key).map(String::as_str)
}

/// Whether the boot sequence has installed injected variables.
pub fn is_installed() -> bool {
    INJECTED.get().is_some()
}
