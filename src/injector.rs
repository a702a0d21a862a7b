//! Boot-time secret injection.
//!
//! Discovers every record of an application namespace, parses each payload
//! as a flat JSON object and collects the pairs into an
//! [`EnvironmentBinding`]. Records are processed in the order the store lists
//! them; when two records define the same key the later one wins.
//!
//! # Failure model
//!
//! - Listing failure: fatal ([`SyncError::StoreUnreachable`]).
//! - Fetch or parse failure of a single record: logged, record skipped.
//!
//! # Example
//!
//! ```no_run
//! use secret_sync::injector::RuntimeInjector;
//! use secret_sync::store::{AppIdentity, AwsSecretStore};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let app = AppIdentity::new("myapp")?;
//! let store = AwsSecretStore::connect(None).await;
//! let report = RuntimeInjector::new(&app, &store).load().await?;
//! report.binding.install();
//! # Ok(())
//! # }
//! ```

use crate::environment::{is_exportable, EnvironmentBinding};
use crate::error::SyncError;
use crate::source::unquote;
use crate::store::{decode_payload, AppIdentity, SecretStore};

/// Outcome of one injection pass.
#[derive(Debug, Default)]
pub struct InjectionReport {
    /// Variables ready to be installed
    pub binding: EnvironmentBinding,
    /// Records whose pairs were loaded, in processing order
    pub loaded: Vec<String>,
    /// Records that were skipped, with the reason
    pub skipped: Vec<(String, String)>,
}

/// Loads an application's secret records from a store.
pub struct RuntimeInjector<'a> {
    app: &'a AppIdentity,
    store: &'a dyn SecretStore,
}

impl<'a> RuntimeInjector<'a> {
    pub fn new(app: &'a AppIdentity, store: &'a dyn SecretStore) -> Self {
        Self { app, store }
    }

    /// Fetch and parse every record of the namespace.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::StoreUnreachable`] if the records cannot be listed.
    pub async fn load(&self) -> Result<InjectionReport, SyncError> {
        let prefix = self.app.prefix();
        let names = self
            .store
            .list_names(&prefix)
            .await
            .map_err(|e| SyncError::StoreUnreachable(e.to_string()))?;

        let mut report = InjectionReport::default();
        let matched: Vec<String> = names
            .into_iter()
            .filter(|name| {
                let owned = self.app.owns(name);
                if !owned {
                    tracing::debug!(record = %name, "ignoring record outside namespace");
                }
                owned
            })
            .collect();

        tracing::info!(app = %self.app, records = matched.len(), "loading secret records");

        for name in matched {
            match self.load_record(&name, &mut report.binding).await {
                Ok(keys) => {
                    tracing::info!(record = %name, keys, "secret record loaded");
                    report.loaded.push(name);
                }
                Err(e) => {
                    tracing::warn!(record = %name, error = %e, "skipping secret record");
                    report.skipped.push((name, e.to_string()));
                }
            }
        }

        Ok(report)
    }

    async fn load_record(
        &self,
        name: &str,
        binding: &mut EnvironmentBinding,
    ) -> Result<usize, SyncError> {
        let payload = self.store.get(name).await?;
        // Parse fully before touching the binding so a bad record adds nothing.
        let values = decode_payload(name, &payload)?;

        let mut pairs = Vec::with_capacity(values.len());
        for (key, value) in &values {
            let (key, value) = (unquote(key), unquote(value));
            if key.is_empty() {
                tracing::warn!(record = %name, "ignoring empty key");
                continue;
            }
            if !is_exportable(key, value) {
                return Err(SyncError::RemotePayloadParse {
                    name: name.to_string(),
                    message: format!(
                        "key '{}' or its value cannot be exported (contains '=' or NUL)",
                        key.escape_debug()
                    ),
                });
            }
            pairs.push((key, value));
        }

        let mut count = 0;
        for (key, value) in pairs {
            if let Some(previous) = binding.set(key, value, name) {
                if previous != name {
                    tracing::warn!(
                        key,
                        previous = %previous,
                        record = %name,
                        "key defined by more than one record, later record wins"
                    );
                }
            }
            count += 1;
        }

        Ok(count)
    }
}

/// Resolve the application identity from a raw environment value.
///
/// # Errors
///
/// Returns [`SyncError::Configuration`] when the value is missing or blank.
pub fn require_identity(raw: Option<String>, var: &str) -> Result<AppIdentity, SyncError> {
    let raw = raw.ok_or_else(|| {
        SyncError::Configuration(format!("{} environment variable is not set", var))
    })?;
    AppIdentity::new(raw)
        .map_err(|_| SyncError::Configuration(format!("{} environment variable is empty", var)))
}
