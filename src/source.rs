//! Local secret files.
//!
//! A secrets directory holds one plaintext file per logical group of secrets.
//! Each file is read into an ordered key-value map; nothing here touches the
//! network or mutates the directory.
//!
//! # File format
//!
//! ```text
//! # comment
//! DJANGO_SECRET_KEY=abc123
//! DJANGO_SUPERUSER_PASSWORD="pw1"
//! ```
//!
//! Lines without `=` are skipped and reported as [`ParseWarning`]s.

use anyhow::{Context, Result};
use indexmap::IndexMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Ordered key-value pairs of one secret file.
pub type SecretValues = IndexMap<String, String>;

/// Non-fatal problem found while parsing a secret file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseWarning {
    /// Line has no `=` delimiter, or an empty key.
    MalformedLine {
        /// 1-based line number
        line: usize,
    },
    /// Key was already defined earlier in the file; the later value wins.
    DuplicateKey {
        /// 1-based line number of the redefinition
        line: usize,
        /// The repeated key
        key: String,
    },
}

impl fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedLine { line } => {
                write!(f, "line {} does not contain a 'KEY=VALUE' pair", line)
            }
            Self::DuplicateKey { line, key } => {
                write!(f, "line {} redefines '{}'", line, key)
            }
        }
    }
}

/// One secret file read from disk.
#[derive(Debug, Clone)]
pub struct SecretFile {
    /// File name as found in the directory (e.g. `django.env`)
    pub name: String,
    /// Parsed pairs in file order
    pub values: SecretValues,
    /// Warnings collected while parsing
    pub warnings: Vec<ParseWarning>,
    /// Set when the file could not be read at all
    pub read_error: Option<String>,
}

impl SecretFile {
    /// Parse file content that has already been read into memory.
    pub fn from_content(name: impl Into<String>, content: &str) -> Self {
        let (values, warnings) = parse_lines(content);
        Self {
            name: name.into(),
            values,
            warnings,
            read_error: None,
        }
    }

    fn unreadable(name: String, error: String) -> Self {
        Self {
            name,
            values: SecretValues::new(),
            warnings: Vec::new(),
            read_error: Some(error),
        }
    }

    /// Name of the file without its last extension.
    pub fn stem(&self) -> &str {
        Path::new(&self.name)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or(&self.name)
    }
}

/// A secrets directory and the files discovered in it.
#[derive(Debug, Clone)]
pub struct SecretSource {
    dir: PathBuf,
    files: Vec<SecretFile>,
}

impl SecretSource {
    /// Build a source from files already in memory.
    pub fn new(dir: impl Into<PathBuf>, files: Vec<SecretFile>) -> Self {
        Self {
            dir: dir.into(),
            files,
        }
    }

    /// Read every secret file in `dir`.
    ///
    /// Hidden files and sub-directories are ignored. Files are returned sorted
    /// by name. A file that cannot be read is kept with its `read_error` set so
    /// the caller can report it next to its siblings.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory itself cannot be listed.
    pub fn load(dir: &Path) -> Result<Self> {
        let entries = fs::read_dir(dir)
            .with_context(|| format!("Failed to read secrets directory: {}", dir.display()))?;

        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry
                .with_context(|| format!("Failed to read entry in {}", dir.display()))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            let path = entry.path();
            if path.is_file() {
                paths.push((name, path));
            }
        }
        paths.sort_by(|a, b| a.0.cmp(&b.0));

        let files = paths
            .into_iter()
            .map(|(name, path)| match fs::read_to_string(&path) {
                Ok(content) => SecretFile::from_content(name, &content),
                Err(e) => SecretFile::unreadable(name, e.to_string()),
            })
            .collect();

        Ok(Self {
            dir: dir.to_path_buf(),
            files,
        })
    }

    /// Directory the files were read from.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Files in discovery order.
    pub fn files(&self) -> &[SecretFile] {
        &self.files
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Total number of parse warnings across all files.
    pub fn warning_count(&self) -> usize {
        self.files.iter().map(|f| f.warnings.len()).sum()
    }
}

/// Parse `KEY=VALUE` lines.
fn parse_lines(content: &str) -> (SecretValues, Vec<ParseWarning>) {
    let mut values = SecretValues::new();
    let mut warnings = Vec::new();

    for (index, raw) in content.lines().enumerate() {
        let line_no = index + 1;
        let line = raw.trim();

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            warnings.push(ParseWarning::MalformedLine { line: line_no });
            continue;
        };

        let key = unquote(key);
        if key.is_empty() {
            warnings.push(ParseWarning::MalformedLine { line: line_no });
            continue;
        }

        let value = unquote(value);
        if values.insert(key.to_string(), value.to_string()).is_some() {
            warnings.push(ParseWarning::DuplicateKey {
                line: line_no,
                key: key.to_string(),
            });
        }
    }

    (values, warnings)
}

/// Trim whitespace and one pair of matching surrounding quotes.
pub fn unquote(raw: &str) -> &str {
    let trimmed = raw.trim();
    let bytes = trimmed.as_bytes();
    if bytes.len() >= 2
        && ((bytes[0] == b'"' && bytes[bytes.len() - 1] == b'"')
            || (bytes[0] == b'\'' && bytes[bytes.len() - 1] == b'\''))
    {
        trimmed[1..trimmed.len() - 1].trim()
    } else {
        trimmed
    }
}

/// Render a secret value for display, keeping only its first and last character.
pub fn mask_value(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 2 {
        return "***".to_string();
    }
    format!("{}****{}", chars[0], chars[chars.len() - 1])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic_pairs() {
        let file = SecretFile::from_content(
            "django",
            "DJANGO_SECRET_KEY=abc123\nDJANGO_SUPERUSER_PASSWORD=pw1\n",
        );

        assert_eq!(file.values.len(), 2);
        assert_eq!(file.values["DJANGO_SECRET_KEY"], "abc123");
        assert_eq!(file.values["DJANGO_SUPERUSER_PASSWORD"], "pw1");
        assert!(file.warnings.is_empty());
    }

    #[test]
    fn test_comments_and_blank_lines_are_ignored() {
        let file = SecretFile::from_content("db", "# header\n\n  \nDB_USER=admin\n# DB_OLD=x\n");

        assert_eq!(file.values.len(), 1);
        assert!(file.warnings.is_empty());
    }

    #[test]
    fn test_malformed_line_is_skipped() {
        let file = SecretFile::from_content("mixed", "A=1\nnot a pair\nB=2\n");

        assert_eq!(file.values.len(), 2);
        assert_eq!(file.warnings, vec![ParseWarning::MalformedLine { line: 2 }]);
    }

    #[test]
    fn test_split_on_first_equals() {
        let file =
            SecretFile::from_content("db", "DATABASE_URL=postgres://u:p@h/db?sslmode=require\n");

        assert_eq!(
            file.values["DATABASE_URL"],
            "postgres://u:p@h/db?sslmode=require"
        );
    }

    #[test]
    fn test_quotes_are_stripped() {
        let content = "A=\"quoted value\"\nB='single'\nC=\"unbalanced\n";
        let file = SecretFile::from_content("q", content);

        assert_eq!(file.values["A"], "quoted value");
        assert_eq!(file.values["B"], "single");
        assert_eq!(file.values["C"], "\"unbalanced");
    }

    #[test]
    fn test_empty_key_is_malformed() {
        let file = SecretFile::from_content("x", "=value\n");

        assert!(file.values.is_empty());
        assert_eq!(file.warnings, vec![ParseWarning::MalformedLine { line: 1 }]);
    }

    #[test]
    fn test_duplicate_key_keeps_first_position_and_last_value() {
        let file = SecretFile::from_content("dup", "A=1\nB=2\nA=3\n");

        let keys: Vec<&str> = file.values.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["A", "B"]);
        assert_eq!(file.values["A"], "3");
        assert_eq!(
            file.warnings,
            vec![ParseWarning::DuplicateKey {
                line: 3,
                key: "A".to_string()
            }]
        );
    }

    #[test]
    fn test_stem_drops_last_extension() {
        assert_eq!(SecretFile::from_content("django.env", "").stem(), "django");
        assert_eq!(SecretFile::from_content("apiKeys", "").stem(), "apiKeys");
    }

    #[test]
    fn test_mask_value() {
        assert_eq!(mask_value("first"), "f****t");
        assert_eq!(mask_value("ab"), "***");
        assert_eq!(mask_value(""), "***");
    }
}
