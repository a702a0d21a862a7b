// Secret Sync Configuration Module
//
// This module handles the project configuration: the application name from
// APPCONFIG.env, the secrets directory path and the optional boot settings in
// secret-sync.yaml

use crate::store::AppIdentity;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default boot configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "secret-sync.yaml";

/// Project file that may define `APP_NAME`
pub const APPCONFIG_FILE: &str = "APPCONFIG.env";

/// Default directory holding local secret files
pub const DEFAULT_SECRETS_DIR: &str = ".secrets";

/// Environment variable holding the application identity at boot
pub const APP_NAME_VAR: &str = "APP_NAME";

/// Environment variable selecting development mode
pub const DEBUG_VAR: &str = "DEBUG";

/// Dependency wait settings
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct DependencyConfig {
    /// Environment variable naming the dependency host
    pub host_env: String,

    /// Environment variable naming the dependency port
    pub port_env: String,

    /// Port used when the port variable is unset
    pub default_port: u16,

    /// Seconds between attempts
    pub interval_secs: u64,

    /// Attempts before giving up
    pub max_attempts: u32,
}

impl Default for DependencyConfig {
    fn default() -> Self {
        Self {
            host_env: "DB_HOST".to_string(),
            port_env: "DB_PORT".to_string(),
            default_port: 5432,
            interval_secs: 2,
            max_attempts: 30,
        }
    }
}

impl DependencyConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Boot sequence configuration - the external commands of each stage
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct BootConfig {
    pub dependency: DependencyConfig,

    /// Schema migration command (e.g. ["python", "manage.py", "migrate", "--noinput"])
    pub migrate: Option<Vec<String>>,

    /// Command making sure the privileged account exists
    pub ensure_admin: Option<Vec<String>>,

    /// Static asset preparation, production only
    pub static_assets: Option<Vec<String>>,

    /// Long-running service command
    pub serve: Option<Vec<String>>,
}

impl BootConfig {
    /// Configured stage commands with their names.
    pub fn commands(&self) -> Vec<(&'static str, &[String])> {
        [
            ("migrate", &self.migrate),
            ("ensure_admin", &self.ensure_admin),
            ("static_assets", &self.static_assets),
            ("serve", &self.serve),
        ]
        .into_iter()
        .filter_map(|(name, argv)| argv.as_deref().map(|argv| (name, argv)))
        .collect()
    }
}

/// Main configuration structure
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub boot: BootConfig,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path.as_ref()))?;

        Ok(config)
    }

    /// Load configuration, falling back to defaults when the file does not exist
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::from_file(path)
        } else {
            tracing::debug!(path = ?path.as_ref(), "no config file, using defaults");
            Ok(Self::default())
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let dependency = &self.boot.dependency;
        if dependency.max_attempts == 0 {
            anyhow::bail!("boot.dependency.max_attempts must be at least 1");
        }
        if dependency.host_env.is_empty() || dependency.port_env.is_empty() {
            anyhow::bail!("boot.dependency host_env and port_env cannot be empty");
        }

        for (stage, argv) in self.boot.commands() {
            if argv.first().map_or(true, |program| program.trim().is_empty()) {
                anyhow::bail!("Command for stage '{}' cannot be empty", stage);
            }
        }

        Ok(())
    }
}

/// Deployment mode, selected by the `DEBUG` variable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Production,
    Development,
}

impl Mode {
    /// Truthy `DEBUG` (1, true, yes, on) selects development; anything else is production.
    pub fn from_debug_flag(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()) {
            Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Self::Development,
            _ => Self::Production,
        }
    }

    pub fn from_env() -> Self {
        Self::from_debug_flag(std::env::var(DEBUG_VAR).ok().as_deref())
    }

    pub fn is_production(self) -> bool {
        self == Self::Production
    }
}

/// Read `APP_NAME` from `APPCONFIG.env` in `project_root`.
///
/// Returns `Ok(None)` when the file or the key is absent.
pub fn app_name_from_appconfig(project_root: &Path) -> Result<Option<String>> {
    let path = project_root.join(APPCONFIG_FILE);
    if !path.exists() {
        return Ok(None);
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(value) = line.strip_prefix("APP_NAME=") {
            let value = crate::source::unquote(value);
            if !value.is_empty() {
                return Ok(Some(value.to_string()));
            }
        }
    }

    Ok(None)
}

/// Resolve the application name: explicit flag first, then `APPCONFIG.env`.
pub fn resolve_app_name(flag: Option<String>, project_root: &Path) -> Result<AppIdentity> {
    let name = match flag {
        Some(name) => name,
        None => app_name_from_appconfig(project_root)?.ok_or_else(|| {
            crate::error::SyncError::Configuration(format!(
                "--app-name is required and APP_NAME was not found in {}",
                APPCONFIG_FILE
            ))
        })?,
    };

    Ok(AppIdentity::new(name)?)
}

/// Expand a leading `~` and make the path absolute against the current directory.
pub fn expand_path(raw: &str) -> Result<PathBuf> {
    let path = Path::new(raw);
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }

    if let Some(rest) = raw.strip_prefix('~') {
        let home = dirs::home_dir().context("Failed to determine home directory")?;
        let rest = rest.trim_start_matches(&['/', '\\'][..]);
        return Ok(home.join(rest));
    }

    std::env::current_dir()
        .map(|dir| dir.join(raw))
        .with_context(|| "Failed to get current directory")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_dependency_settings() {
        let config = Config::default();
        assert_eq!(config.boot.dependency.interval(), Duration::from_secs(2));
        assert_eq!(config.boot.dependency.max_attempts, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_boot_section() {
        let yaml = r#"
boot:
  dependency:
    max_attempts: 5
  migrate: ["python", "manage.py", "migrate", "--noinput"]
  serve: ["uvicorn", "config.asgi:application"]
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.boot.dependency.max_attempts, 5);
        assert_eq!(config.boot.dependency.host_env, "DB_HOST");
        assert_eq!(config.boot.commands().len(), 2);
        assert!(config.boot.ensure_admin.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_zero_attempts() {
        let mut config = Config::default();
        config.boot.dependency.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_empty_command() {
        let mut config = Config::default();
        config.boot.migrate = Some(vec![]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_mode_from_debug_flag() {
        assert_eq!(Mode::from_debug_flag(None), Mode::Production);
        assert_eq!(Mode::from_debug_flag(Some("False")), Mode::Production);
        assert_eq!(Mode::from_debug_flag(Some("0")), Mode::Production);
        assert_eq!(Mode::from_debug_flag(Some("True")), Mode::Development);
        assert_eq!(Mode::from_debug_flag(Some(" 1 ")), Mode::Development);
    }

    #[test]
    fn test_app_name_from_appconfig() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(APPCONFIG_FILE),
            "# project settings\nREGION=eu-west-1\nAPP_NAME=myapp\nAPP_NAME=ignored\n",
        )
        .unwrap();

        assert_eq!(
            app_name_from_appconfig(dir.path()).unwrap().as_deref(),
            Some("myapp")
        );
    }

    #[test]
    fn test_resolve_app_name_prefers_flag() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(APPCONFIG_FILE), "APP_NAME=fromfile\n").unwrap();

        let app = resolve_app_name(Some("fromflag".into()), dir.path()).unwrap();
        assert_eq!(app.as_str(), "fromflag");

        let app = resolve_app_name(None, dir.path()).unwrap();
        assert_eq!(app.as_str(), "fromfile");
    }

    #[test]
    fn test_resolve_app_name_missing_everywhere() {
        let dir = TempDir::new().unwrap();
        let err = resolve_app_name(None, dir.path()).unwrap_err();
        assert_eq!(crate::error::exit_code_for(&err), 2);
    }
}
