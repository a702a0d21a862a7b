//! In-memory secret store.
//!
//! Keeps records in insertion order (which doubles as listing order) and
//! records every call it receives. Individual operations can be made to fail
//! for a given record name, and the whole store can be made unreachable.

use super::SecretStore;
use crate::error::SyncError;
use async_trait::async_trait;
use indexmap::IndexMap;
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

/// A call received by [`MemoryStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    Exists(String),
    Create(String),
    Update(String),
    List(String),
    Get(String),
}

impl StoreCall {
    /// Whether this call changes store state.
    pub fn is_mutation(&self) -> bool {
        matches!(self, Self::Create(_) | Self::Update(_))
    }
}

#[derive(Debug, Default)]
struct State {
    records: IndexMap<String, String>,
    descriptions: IndexMap<String, String>,
    calls: Vec<StoreCall>,
    failures: HashSet<(&'static str, String)>,
    unreachable: bool,
}

/// [`SecretStore`] held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record.
    pub fn with_record(self, name: impl Into<String>, payload: impl Into<String>) -> Self {
        self.lock().records.insert(name.into(), payload.into());
        self
    }

    /// Make `operation` (`exists`, `create`, `update`, `get`) fail for `name`.
    pub fn fail_on(self, operation: &'static str, name: impl Into<String>) -> Self {
        self.lock().failures.insert((operation, name.into()));
        self
    }

    /// Make every call fail as if the store could not be reached.
    pub fn unreachable(self) -> Self {
        self.lock().unreachable = true;
        self
    }

    /// Current payload of a record.
    pub fn payload(&self, name: &str) -> Option<String> {
        self.lock().records.get(name).cloned()
    }

    /// Description given when the record was created.
    pub fn description(&self, name: &str) -> Option<String> {
        self.lock().descriptions.get(name).cloned()
    }

    /// Record names in listing order.
    pub fn names(&self) -> Vec<String> {
        self.lock().records.keys().cloned().collect()
    }

    /// Every call received so far.
    pub fn calls(&self) -> Vec<StoreCall> {
        self.lock().calls.clone()
    }

    pub fn mutation_count(&self) -> usize {
        self.lock().calls.iter().filter(|c| c.is_mutation()).count()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A poisoned lock only means a test panicked mid-call; the data is still usable.
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn enter(
        &self,
        call: StoreCall,
        operation: &'static str,
        name: &str,
    ) -> Result<MutexGuard<'_, State>, SyncError> {
        let mut state = self.lock();
        state.calls.push(call);

        if state.unreachable {
            return Err(SyncError::RemoteOperation {
                operation,
                name: name.to_string(),
                message: "connection refused".to_string(),
            });
        }
        if state.failures.contains(&(operation, name.to_string())) {
            return Err(SyncError::RemoteOperation {
                operation,
                name: name.to_string(),
                message: "injected failure".to_string(),
            });
        }
        Ok(state)
    }
}

#[async_trait]
impl SecretStore for MemoryStore {
    async fn exists(&self, name: &str) -> Result<bool, SyncError> {
        let state = self.enter(StoreCall::Exists(name.to_string()), "exists", name)?;
        Ok(state.records.contains_key(name))
    }

    async fn create(
        &self,
        name: &str,
        description: &str,
        payload: &str,
    ) -> Result<Option<String>, SyncError> {
        let mut state = self.enter(StoreCall::Create(name.to_string()), "create", name)?;
        if state.records.contains_key(name) {
            return Err(SyncError::RemoteOperation {
                operation: "create",
                name: name.to_string(),
                message: "record already exists".to_string(),
            });
        }
        state.records.insert(name.to_string(), payload.to_string());
        state
            .descriptions
            .insert(name.to_string(), description.to_string());
        Ok(Some(format!("memory:{}", name)))
    }

    async fn update(&self, name: &str, payload: &str) -> Result<Option<String>, SyncError> {
        let mut state = self.enter(StoreCall::Update(name.to_string()), "update", name)?;
        match state.records.get_mut(name) {
            Some(existing) => {
                *existing = payload.to_string();
                Ok(Some(format!("memory:{}", name)))
            }
            None => Err(SyncError::RemoteOperation {
                operation: "update",
                name: name.to_string(),
                message: "record not found".to_string(),
            }),
        }
    }

    async fn list_names(&self, prefix: &str) -> Result<Vec<String>, SyncError> {
        let state = self.enter(StoreCall::List(prefix.to_string()), "list", prefix)?;
        Ok(state
            .records
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn get(&self, name: &str) -> Result<String, SyncError> {
        let state = self.enter(StoreCall::Get(name.to_string()), "get", name)?;
        state
            .records
            .get(name)
            .cloned()
            .ok_or_else(|| SyncError::RemoteOperation {
                operation: "get",
                name: name.to_string(),
                message: "record not found".to_string(),
            })
    }
}
