//! Service boot sequence.
//!
//! ```text
//! WAIT_FOR_DEPENDENCY -> [production] LOAD_SECRETS -> APPLY_SCHEMA_MIGRATIONS
//!   -> ENSURE_PRIVILEGED_ACCOUNT -> [production] PREPARE_STATIC_ASSETS -> SERVE
//! ```
//!
//! Every stage before `SERVE` either completes or aborts the boot. Failures
//! inside `LOAD_SECRETS` are per record and never abort; failing to list the
//! store at all does. `SERVE` is handed back to the caller through
//! [`BootOutcome::serve`] and run with [`serve`].
//!
//! Loaded variables reach stage commands through their spawn environment
//! only. The sequence never writes the process environment; the caller
//! installs [`BootOutcome::binding`] once no other thread is running.

use crate::config::{BootConfig, DependencyConfig, Mode};
use crate::environment::EnvironmentBinding;
use crate::error::SyncError;
use crate::injector::{require_identity, RuntimeInjector};
use crate::store::SecretStore;
use anyhow::Context;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tokio::net::TcpStream;

/// Boot stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    WaitForDependency,
    LoadSecrets,
    ApplySchemaMigrations,
    EnsurePrivilegedAccount,
    PrepareStaticAssets,
    Serve,
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Self::WaitForDependency => "WAIT_FOR_DEPENDENCY",
            Self::LoadSecrets => "LOAD_SECRETS",
            Self::ApplySchemaMigrations => "APPLY_SCHEMA_MIGRATIONS",
            Self::EnsurePrivilegedAccount => "ENSURE_PRIVILEGED_ACCOUNT",
            Self::PrepareStaticAssets => "PREPARE_STATIC_ASSETS",
            Self::Serve => "SERVE",
        }
    }

    /// Stages that apply in `mode`.
    pub fn plan(mode: Mode) -> Vec<Stage> {
        let production = mode.is_production();
        [
            (Self::WaitForDependency, true),
            (Self::LoadSecrets, production),
            (Self::ApplySchemaMigrations, true),
            (Self::EnsurePrivilegedAccount, true),
            (Self::PrepareStaticAssets, production),
            (Self::Serve, true),
        ]
        .into_iter()
        .filter_map(|(stage, applies)| applies.then_some(stage))
        .collect()
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Readiness check for the dependency polled before anything else runs.
#[async_trait]
pub trait DependencyProbe: Send + Sync {
    /// Human-readable address, used in logs and errors.
    fn target(&self) -> String;

    /// One attempt. `true` when the dependency is ready.
    async fn probe(&self) -> bool;
}

/// Probe that succeeds once a TCP connection can be opened.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    host: String,
    port: u16,
    connect_timeout: Duration,
}

impl TcpProbe {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: Duration::from_secs(2),
        }
    }

    /// Build from the host/port variables named in `config`.
    ///
    /// Returns `Ok(None)` when the host variable is unset, meaning there is
    /// nothing to wait for.
    pub fn from_env(config: &DependencyConfig) -> Result<Option<Self>, SyncError> {
        let host = match std::env::var(&config.host_env) {
            Ok(host) if !host.trim().is_empty() => host.trim().to_string(),
            _ => return Ok(None),
        };

        let port = match std::env::var(&config.port_env) {
            Ok(raw) => raw.trim().parse::<u16>().map_err(|_| {
                SyncError::Configuration(format!(
                    "{} must be a port number, got '{}'",
                    config.port_env, raw
                ))
            })?,
            Err(_) => config.default_port,
        };

        Ok(Some(Self::new(host, port)))
    }
}

#[async_trait]
impl DependencyProbe for TcpProbe {
    fn target(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    async fn probe(&self) -> bool {
        let connect = TcpStream::connect((self.host.as_str(), self.port));
        matches!(
            tokio::time::timeout(self.connect_timeout, connect).await,
            Ok(Ok(_))
        )
    }
}

/// Poll `probe` up to `max_attempts` times, sleeping `interval` between attempts.
///
/// Returns the attempt number that succeeded.
///
/// # Errors
///
/// Returns [`SyncError::DependencyUnavailable`] once every attempt failed.
pub async fn wait_for_dependency(
    probe: &dyn DependencyProbe,
    interval: Duration,
    max_attempts: u32,
) -> Result<u32, SyncError> {
    let target = probe.target();

    for attempt in 1..=max_attempts {
        if probe.probe().await {
            tracing::info!(%target, attempt, "dependency is ready");
            return Ok(attempt);
        }

        tracing::warn!(%target, attempt, max_attempts, "dependency not ready");
        if attempt < max_attempts {
            tokio::time::sleep(interval).await;
        }
    }

    Err(SyncError::DependencyUnavailable {
        target,
        attempts: max_attempts,
    })
}

/// Runs the external command of a stage.
#[async_trait]
pub trait StageRunner: Send + Sync {
    /// Run `argv` to completion with `env` added to the inherited environment.
    async fn run(
        &self,
        stage: Stage,
        argv: &[String],
        env: &EnvironmentBinding,
    ) -> Result<(), SyncError>;
}

/// [`StageRunner`] that spawns child processes with inherited stdio.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

#[async_trait]
impl StageRunner for ProcessRunner {
    async fn run(
        &self,
        stage: Stage,
        argv: &[String],
        env: &EnvironmentBinding,
    ) -> Result<(), SyncError> {
        let Some((program, args)) = argv.split_first() else {
            return Err(SyncError::Configuration(format!(
                "no command configured for {}",
                stage
            )));
        };

        let program = which::which(program).map_err(|e| {
            tracing::error!(%stage, program = %program, error = %e, "command not found");
            SyncError::StageFailed {
                stage: stage.name(),
                code: 127,
            }
        })?;

        let status = tokio::process::Command::new(&program)
            .args(args)
            .envs(env.iter())
            .status()
            .await
            .map_err(|e| {
                tracing::error!(
                    %stage,
                    program = %program.display(),
                    error = %e,
                    "failed to spawn"
                );
                SyncError::StageFailed {
                    stage: stage.name(),
                    code: 126,
                }
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(SyncError::StageFailed {
                stage: stage.name(),
                code: status.code().unwrap_or(1),
            })
        }
    }
}

/// What a completed boot hands over to the service stage.
#[derive(Debug)]
pub struct BootOutcome {
    /// Stages that ran, in order (skipped stages are absent)
    pub stages: Vec<Stage>,
    /// Variables loaded from the secret store, not yet installed
    pub binding: EnvironmentBinding,
    /// Service command for `SERVE`
    pub serve: Vec<String>,
}

/// Drives the boot stages up to, but not including, `SERVE`.
pub struct BootSequence<'a> {
    config: &'a BootConfig,
    mode: Mode,
    app_name: Option<String>,
    serve: Option<Vec<String>>,
    store: Option<&'a dyn SecretStore>,
    probe: Option<&'a dyn DependencyProbe>,
    runner: &'a dyn StageRunner,
}

impl<'a> BootSequence<'a> {
    pub fn new(config: &'a BootConfig, mode: Mode, runner: &'a dyn StageRunner) -> Self {
        Self {
            config,
            mode,
            app_name: None,
            serve: config.serve.clone(),
            store: None,
            probe: None,
            runner,
        }
    }

    /// Raw value of the application identity variable.
    pub fn app_name(mut self, app_name: Option<String>) -> Self {
        self.app_name = app_name;
        self
    }

    /// Store to load secrets from in production.
    pub fn store(mut self, store: &'a dyn SecretStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Dependency to wait for. Without one the wait stage is skipped.
    pub fn probe(mut self, probe: &'a dyn DependencyProbe) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Override the configured service command.
    pub fn serve_command(mut self, argv: Vec<String>) -> Self {
        if !argv.is_empty() {
            self.serve = Some(argv);
        }
        self
    }

    /// Run every stage before `SERVE`.
    ///
    /// # Errors
    ///
    /// Any fatal stage error, see [`SyncError::exit_code`].
    pub async fn run(self) -> Result<BootOutcome, SyncError> {
        // Configuration is checked before any stage runs so a bad setup
        // leaves no partial state behind.
        let serve = self
            .serve
            .clone()
            .filter(|argv| !argv.is_empty())
            .ok_or_else(|| SyncError::Configuration("no serve command configured".to_string()))?;

        let identity = if self.mode.is_production() {
            let identity = require_identity(self.app_name.clone(), crate::config::APP_NAME_VAR)?;
            if self.store.is_none() {
                return Err(SyncError::Configuration(
                    "no secret store available in production mode".to_string(),
                ));
            }
            Some(identity)
        } else {
            None
        };

        tracing::info!(mode = ?self.mode, "boot sequence starting");
        let mut ran = Vec::new();
        let mut binding = EnvironmentBinding::new();

        for stage in Stage::plan(self.mode) {
            match stage {
                Stage::WaitForDependency => {
                    let Some(probe) = self.probe else {
                        tracing::info!(%stage, "no dependency configured, skipping");
                        continue;
                    };
                    tracing::info!(%stage, target = %probe.target(), "entering stage");
                    let dependency = &self.config.dependency;
                    wait_for_dependency(probe, dependency.interval(), dependency.max_attempts)
                        .await?;
                }
                Stage::LoadSecrets => {
                    let (Some(identity), Some(store)) = (&identity, self.store) else {
                        continue;
                    };
                    tracing::info!(%stage, app = %identity, "entering stage");
                    let report = RuntimeInjector::new(identity, store).load().await?;
                    if !report.skipped.is_empty() {
                        tracing::warn!(
                            skipped = report.skipped.len(),
                            loaded = report.loaded.len(),
                            "some secret records were skipped"
                        );
                    }
                    binding = report.binding;
                }
                Stage::ApplySchemaMigrations => {
                    self.run_command(stage, self.config.migrate.as_deref(), &binding)
                        .await?;
                }
                Stage::EnsurePrivilegedAccount => {
                    self.run_command(stage, self.config.ensure_admin.as_deref(), &binding)
                        .await?;
                }
                Stage::PrepareStaticAssets => {
                    self.run_command(stage, self.config.static_assets.as_deref(), &binding)
                        .await?;
                }
                Stage::Serve => {
                    tracing::info!(%stage, command = %serve.join(" "), "handing over to service");
                    ran.push(stage);
                    break;
                }
            }
            ran.push(stage);
        }

        Ok(BootOutcome {
            stages: ran,
            binding,
            serve,
        })
    }

    async fn run_command(
        &self,
        stage: Stage,
        argv: Option<&[String]>,
        binding: &EnvironmentBinding,
    ) -> Result<(), SyncError> {
        match argv {
            Some(argv) => {
                tracing::info!(%stage, command = %argv.join(" "), "entering stage");
                self.runner.run(stage, argv, binding).await
            }
            None => {
                tracing::info!(%stage, "no command configured, skipping");
                Ok(())
            }
        }
    }
}

/// Run the service command.
///
/// On Unix the current process is replaced, so this only returns on failure.
/// Elsewhere the command runs as a child and its exit status is returned.
pub fn serve(argv: &[String]) -> anyhow::Result<i32> {
    let (program, args) = argv
        .split_first()
        .context("Service command cannot be empty")?;
    let mut command = std::process::Command::new(program);
    command.args(args);
    hand_over(command, program)
}

#[cfg(unix)]
fn hand_over(mut command: std::process::Command, program: &str) -> anyhow::Result<i32> {
    use std::os::unix::process::CommandExt;

    let err = command.exec();
    Err(err).with_context(|| format!("Failed to exec service command '{}'", program))
}

#[cfg(not(unix))]
fn hand_over(mut command: std::process::Command, program: &str) -> anyhow::Result<i32> {
    let status = command
        .status()
        .with_context(|| format!("Failed to start service command '{}'", program))?;
    Ok(status.code().unwrap_or(1))
}
