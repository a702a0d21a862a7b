//! Remote secret store access.
//!
//! Records are addressed by name only. One record holds one secret file as a
//! flat JSON object, and its name is `{app}_{file stem}`.
//!
//! # Backends
//!
//! - AWS Secrets Manager ([`aws::AwsSecretStore`])
//! - In-memory ([`memory::MemoryStore`]) for tests and local checks

pub mod aws;
pub mod memory;

use crate::error::SyncError;
use crate::source::SecretValues;
use async_trait::async_trait;
use indexmap::IndexMap;
use std::fmt;

pub use aws::AwsSecretStore;
pub use memory::MemoryStore;

/// Namespace that prefixes every record owned by one application.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AppIdentity(String);

impl AppIdentity {
    /// Validate and wrap an application name.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Configuration`] if the name is blank.
    pub fn new(name: impl Into<String>) -> Result<Self, SyncError> {
        let name = name.into().trim().to_string();
        if name.is_empty() {
            return Err(SyncError::Configuration(
                "application name cannot be empty".to_string(),
            ));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Record name for a secret file stem.
    pub fn record_name(&self, stem: &str) -> String {
        format!("{}_{}", self.0, stem)
    }

    /// Prefix shared by every record of this application, delimiter included.
    pub fn prefix(&self) -> String {
        format!("{}_", self.0)
    }

    /// Whether `record` belongs to this namespace.
    ///
    /// `myapp` owns `myapp_django` but not `myapp2_django`.
    pub fn owns(&self, record: &str) -> bool {
        record
            .strip_prefix(self.0.as_str())
            .and_then(|rest| rest.strip_prefix('_'))
            .is_some_and(|rest| !rest.is_empty())
    }
}

impl fmt::Display for AppIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Typed list/get/create/update operations on a secret store.
///
/// Calls are issued one at a time by the pusher and the injector, so
/// implementations need no internal ordering guarantees.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Whether a record with this name exists.
    async fn exists(&self, name: &str) -> Result<bool, SyncError>;

    /// Create a record. Returns the store's identifier for it, if any.
    async fn create(
        &self,
        name: &str,
        description: &str,
        payload: &str,
    ) -> Result<Option<String>, SyncError>;

    /// Replace the payload of an existing record.
    async fn update(&self, name: &str, payload: &str) -> Result<Option<String>, SyncError>;

    /// Names of all records whose name starts with `prefix`, in store order.
    async fn list_names(&self, prefix: &str) -> Result<Vec<String>, SyncError>;

    /// Current payload of a record.
    async fn get(&self, name: &str) -> Result<String, SyncError>;

    /// One cheap authenticated call, to fail fast on credentials or network.
    async fn check_access(&self) -> Result<(), SyncError> {
        self.list_names("").await.map(|_| ())
    }
}

/// Serialise pairs to the record payload: a compact JSON object in file order.
///
/// Equal input always yields byte-identical output.
pub fn encode_payload(values: &SecretValues) -> serde_json::Result<String> {
    serde_json::to_string(values)
}

/// Parse a record payload into ordered pairs.
///
/// # Errors
///
/// Returns [`SyncError::RemotePayloadParse`] when the payload is not JSON, not
/// an object, or holds a non-string value.
pub fn decode_payload(name: &str, payload: &str) -> Result<SecretValues, SyncError> {
    let parse_error = |message: String| SyncError::RemotePayloadParse {
        name: name.to_string(),
        message,
    };

    // IndexMap keeps document order; serde_json::Map would sort keys.
    let object: IndexMap<String, serde_json::Value> =
        serde_json::from_str(payload).map_err(|e| parse_error(e.to_string()))?;

    let mut values = SecretValues::with_capacity(object.len());
    for (key, value) in object {
        let serde_json::Value::String(value) = value else {
            return Err(parse_error(format!(
                "value for key '{}' must be a string, found: {}",
                key, value
            )));
        };
        values.insert(key, value);
    }

    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_name() {
        let app = AppIdentity::new("myapp").unwrap();
        assert_eq!(app.record_name("django"), "myapp_django");
        assert_eq!(app.prefix(), "myapp_");
    }

    #[test]
    fn test_blank_identity_rejected() {
        assert!(matches!(
            AppIdentity::new("  "),
            Err(SyncError::Configuration(_))
        ));
    }

    #[test]
    fn test_owns_requires_delimiter() {
        let app = AppIdentity::new("myapp").unwrap();
        assert!(app.owns("myapp_django"));
        assert!(app.owns("myapp_api_keys"));
        assert!(!app.owns("myapp2_django"));
        assert!(!app.owns("myappdjango"));
        assert!(!app.owns("myapp_"));
        assert!(!app.owns("other_myapp_django"));
    }

    #[test]
    fn test_encode_payload_is_compact_and_ordered() {
        let mut values = SecretValues::new();
        values.insert("DJANGO_SECRET_KEY".to_string(), "abc123".to_string());
        values.insert("DJANGO_SUPERUSER_PASSWORD".to_string(), "pw1".to_string());

        assert_eq!(
            encode_payload(&values).unwrap(),
            r#"{"DJANGO_SECRET_KEY":"abc123","DJANGO_SUPERUSER_PASSWORD":"pw1"}"#
        );
    }

    #[test]
    fn test_encoded_payload_decodes_to_same_pairs() {
        let mut values = SecretValues::new();
        values.insert("QUOTED".to_string(), "say \"hi\"\nbye".to_string());
        values.insert("UNICODE".to_string(), "pässwörd".to_string());

        let payload = encode_payload(&values).unwrap();

        assert_eq!(decode_payload("myapp_x", &payload).unwrap(), values);
    }

    #[test]
    fn test_decode_payload_rejects_non_strings() {
        assert!(decode_payload("x", r#"{"A":"1","B":2}"#).is_err());
        assert!(decode_payload("x", r#"["A"]"#).is_err());
        assert!(decode_payload("x", "not json").is_err());
    }

    #[test]
    fn test_decode_payload_keeps_order() {
        let values = decode_payload("x", r#"{"Z":"1","A":"2"}"#).unwrap();
        let keys: Vec<&str> = values.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["Z", "A"]);
    }
}
