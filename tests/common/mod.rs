//! Common testing utilities for Secret Sync integration tests.

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use tempfile::TempDir;

/// Test context that manages a temporary project directory.
pub struct TestContext {
    /// Path to temporary directory
    pub temp_path: PathBuf,
    /// The temporary directory (kept to prevent early deletion)
    _temp_dir: TempDir,
}

impl TestContext {
    /// Create a new test context with a temporary directory.
    pub fn new() -> anyhow::Result<Self> {
        let temp_dir = TempDir::new()?;
        let temp_path = temp_dir.path().to_path_buf();

        Ok(Self {
            temp_path,
            _temp_dir: temp_dir,
        })
    }

    /// Create a file with content, relative to the project root.
    pub fn create_file(&self, name: &str, content: &str) -> anyhow::Result<PathBuf> {
        let file_path = self.temp_path.join(name);
        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::File::create(&file_path)?;
        file.write_all(content.as_bytes())?;
        Ok(file_path)
    }

    /// Create a secret file in `.secrets/` from key-value pairs.
    #[allow(dead_code)]
    pub fn create_secret_file(
        &self,
        name: &str,
        secrets: &[(impl AsRef<str>, impl AsRef<str>)],
    ) -> anyhow::Result<PathBuf> {
        let content = secrets
            .iter()
            .map(|(k, v)| format!("{}={}", k.as_ref(), v.as_ref()))
            .collect::<Vec<_>>()
            .join("\n");

        self.create_file(&format!(".secrets/{}", name), &content)
    }

    /// Path of the `.secrets/` directory.
    #[allow(dead_code)]
    pub fn secrets_dir(&self) -> PathBuf {
        self.temp_path.join(".secrets")
    }

    /// Get the path to a file in the temp directory.
    #[allow(dead_code)]
    pub fn path(&self, name: &str) -> PathBuf {
        self.temp_path.join(name)
    }
}

/// Compact JSON object in the given key order, as the store holds it.
#[allow(dead_code)]
pub fn payload(pairs: &[(&str, &str)]) -> String {
    let body = pairs
        .iter()
        .map(|(k, v)| format!("{}:{}", serde_json::json!(k), serde_json::json!(v)))
        .collect::<Vec<_>>()
        .join(",");
    format!("{{{}}}", body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_helper() {
        assert_eq!(
            payload(&[("B", "2"), ("A", "1")]),
            r#"{"B":"2","A":"1"}"#
        );
    }

    #[test]
    fn test_test_context_create_secret_file() {
        let ctx = TestContext::new().unwrap();
        let file_path = ctx
            .create_secret_file("django", &[("KEY", "value")])
            .unwrap();

        assert!(file_path.starts_with(ctx.secrets_dir()));
        assert_eq!(fs::read_to_string(&file_path).unwrap(), "KEY=value");
    }
}
