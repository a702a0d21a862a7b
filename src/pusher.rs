//! Push local secret files to a [`SecretStore`].
//!
//! Every file becomes one record named `{app}_{stem}`. Files are processed in
//! discovery order, one remote call at a time. A failure on one file is
//! recorded in its [`FileReport`] and the next file is still processed.
//!
//! Existing records are overwritten unconditionally with the full local
//! content, so the remote payload always mirrors the file.

use crate::error::SyncError;
use crate::source::{ParseWarning, SecretFile, SecretSource};
use crate::store::{encode_payload, AppIdentity, SecretStore};
use std::collections::HashMap;
use std::fmt;

/// Whether remote calls are issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushMode {
    Normal,
    /// Local validation only, no remote calls.
    DryRun,
}

/// Result for one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Created,
    Updated,
    /// Dry-run validation passed.
    Validated,
    /// Nothing to push (no valid pairs).
    Skipped,
    Failed,
}

impl Outcome {
    pub fn is_failure(self) -> bool {
        self == Self::Failed
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Validated => "validated",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Per-file push result.
#[derive(Debug, Clone)]
pub struct FileReport {
    /// Local file name
    pub file: String,
    /// Remote record name
    pub target: String,
    pub outcome: Outcome,
    /// Human-readable detail (store identifier, error message, ...)
    pub detail: String,
    /// Keys that were (or would be) pushed, in file order
    pub keys: Vec<String>,
    /// Parse warnings carried over from the source file
    pub warnings: Vec<ParseWarning>,
}

/// Results for a whole push, in processing order.
#[derive(Debug, Clone, Default)]
pub struct PushReport {
    files: Vec<FileReport>,
}

impl PushReport {
    pub fn files(&self) -> &[FileReport] {
        &self.files
    }

    /// True when no file failed.
    pub fn is_success(&self) -> bool {
        !self.files.iter().any(|f| f.outcome.is_failure())
    }

    pub fn count(&self, outcome: Outcome) -> usize {
        self.files.iter().filter(|f| f.outcome == outcome).count()
    }

    pub fn warning_count(&self) -> usize {
        self.files.iter().map(|f| f.warnings.len()).sum()
    }

    /// Find the report for a local file.
    pub fn get(&self, file: &str) -> Option<&FileReport> {
        self.files.iter().find(|f| f.file == file)
    }
}

/// Pushes the files of a [`SecretSource`] under one application namespace.
pub struct Pusher<'a> {
    app: &'a AppIdentity,
    store: &'a dyn SecretStore,
}

impl<'a> Pusher<'a> {
    pub fn new(app: &'a AppIdentity, store: &'a dyn SecretStore) -> Self {
        Self { app, store }
    }

    /// Verify the store accepts requests before any file is pushed.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::StoreUnreachable`] when the access check fails.
    pub async fn preflight(&self) -> Result<(), SyncError> {
        self.store.check_access().await.map_err(|e| {
            tracing::error!(app = %self.app, error = %e, "secret store rejected access check");
            SyncError::StoreUnreachable(e.to_string())
        })
    }

    /// Push every file of `source`.
    ///
    /// In [`PushMode::DryRun`] this is [`validate`] and the store is never called.
    pub async fn push(&self, source: &SecretSource, mode: PushMode) -> PushReport {
        if mode == PushMode::DryRun {
            return validate(self.app, source);
        }

        tracing::info!(
            app = %self.app,
            dir = %source.dir().display(),
            files = source.files().len(),
            "pushing secrets"
        );

        let mut claimed = HashMap::new();
        let mut report = PushReport::default();

        for file in source.files() {
            let entry = match precheck(self.app, file, &mut claimed) {
                Ok(entry) => self.push_file(file, entry).await,
                Err(entry) => entry,
            };
            log_report(&entry);
            report.files.push(entry);
        }

        report
    }

    async fn push_file(&self, file: &SecretFile, mut entry: FileReport) -> FileReport {
        let payload = match encode_payload(&file.values) {
            Ok(payload) => payload,
            Err(e) => return entry.fail(e.to_string()),
        };

        let exists = match self.store.exists(&entry.target).await {
            Ok(exists) => exists,
            Err(e) => return entry.fail(e.to_string()),
        };

        let result = if exists {
            self.store
                .update(&entry.target, &payload)
                .await
                .map(|id| (Outcome::Updated, id))
        } else {
            let description = format!("Secrets for {} - {}", self.app, file.name);
            self.store
                .create(&entry.target, &description, &payload)
                .await
                .map(|id| (Outcome::Created, id))
        };

        match result {
            Ok((outcome, id)) => {
                entry.outcome = outcome;
                entry.detail = match id {
                    Some(id) => format!("{} key(s), {}", entry.keys.len(), id),
                    None => format!("{} key(s)", entry.keys.len()),
                };
                entry
            }
            Err(e) => entry.fail(e.to_string()),
        }
    }
}

impl FileReport {
    fn fail(mut self, detail: String) -> Self {
        self.outcome = Outcome::Failed;
        self.detail = detail;
        self
    }
}

/// Validate `source` locally, as a dry run does.
///
/// Malformed-line warnings are advisory; only unreadable files and record name
/// collisions fail validation.
pub fn validate(app: &AppIdentity, source: &SecretSource) -> PushReport {
    let mut claimed = HashMap::new();
    let mut report = PushReport::default();

    for file in source.files() {
        let entry = match precheck(app, file, &mut claimed) {
            Ok(mut entry) => {
                entry.outcome = Outcome::Validated;
                entry.detail = format!("would push {} key(s)", entry.keys.len());
                entry
            }
            Err(entry) => entry,
        };
        log_report(&entry);
        report.files.push(entry);
    }

    report
}

/// Local checks shared by both modes.
///
/// `Ok` carries a report ready for the remote step; `Err` carries a final
/// report (failed or skipped) for a file that must not reach the store.
fn precheck(
    app: &AppIdentity,
    file: &SecretFile,
    claimed: &mut HashMap<String, String>,
) -> Result<FileReport, FileReport> {
    let target = app.record_name(file.stem());
    let entry = FileReport {
        file: file.name.clone(),
        target: target.clone(),
        outcome: Outcome::Failed,
        detail: String::new(),
        keys: file.values.keys().cloned().collect(),
        warnings: file.warnings.clone(),
    };

    if let Some(error) = &file.read_error {
        return Err(entry.fail(format!("cannot read file: {}", error)));
    }

    if let Some(first) = claimed.get(&target) {
        let detail = format!("record name '{}' already used by '{}'", target, first);
        return Err(entry.fail(detail));
    }
    claimed.insert(target, file.name.clone());

    if file.values.is_empty() {
        return Err(FileReport {
            outcome: Outcome::Skipped,
            detail: "no valid key-value pairs".to_string(),
            ..entry
        });
    }

    Ok(entry)
}

fn log_report(entry: &FileReport) {
    for warning in &entry.warnings {
        tracing::warn!(file = %entry.file, "{}", warning);
    }
    match entry.outcome {
        Outcome::Failed => tracing::error!(
            file = %entry.file,
            target = %entry.target,
            detail = %entry.detail,
            "secret file failed"
        ),
        Outcome::Skipped => tracing::warn!(
            file = %entry.file,
            target = %entry.target,
            detail = %entry.detail,
            "secret file skipped"
        ),
        outcome => tracing::info!(
            file = %entry.file,
            target = %entry.target,
            keys = entry.keys.len(),
            %outcome,
            "secret file processed"
        ),
    }
}
