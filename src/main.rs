// Secret Sync - push secret files to AWS Secrets Manager and load them at boot
//
// This is the main entry point for the application.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dialoguer::{theme::ColorfulTheme, Confirm};
use secret_sync::boot::{self, BootOutcome, BootSequence, ProcessRunner, TcpProbe};
use secret_sync::config::{self, Config, Mode, APP_NAME_VAR, DEFAULT_CONFIG_FILE};
use secret_sync::error::exit_code_for;
use secret_sync::injector::require_identity;
use secret_sync::pusher::{self, Outcome, PushMode, PushReport, Pusher};
use secret_sync::source::{mask_value, SecretSource};
use secret_sync::store::AwsSecretStore;
use secret_sync::SyncError;
use std::io::IsTerminal;

/// Secret Sync - distribute secret files and inject them at boot
#[derive(Parser, Debug)]
#[command(name = "secret-sync")]
#[command(version)]
#[command(about = "Push secret files to AWS Secrets Manager and inject them at service boot", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Push every file of the secrets directory to AWS Secrets Manager
    Push {
        /// Application name (default: APP_NAME from APPCONFIG.env)
        #[arg(long)]
        app_name: Option<String>,

        /// Directory containing secret files
        #[arg(long, default_value = config::DEFAULT_SECRETS_DIR)]
        secrets_dir: String,

        /// AWS region (default: AWS configuration chain)
        #[arg(long)]
        region: Option<String>,

        /// Validate secrets without pushing to AWS
        #[arg(long, default_value = "false")]
        dry_run: bool,

        /// Don't ask for confirmation
        #[arg(short, long, default_value = "false")]
        yes: bool,
    },

    /// Run the boot sequence, then exec the service
    Boot {
        /// Path to the configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        config: String,

        /// AWS region (default: AWS configuration chain)
        #[arg(long)]
        region: Option<String>,

        /// Service command, overrides boot.serve from the configuration
        #[arg(last = true)]
        serve: Vec<String>,
    },

    /// Check prerequisites and project configuration
    Doctor {
        /// Application name (default: APP_NAME from APPCONFIG.env)
        #[arg(long)]
        app_name: Option<String>,

        /// Directory containing secret files
        #[arg(long, default_value = config::DEFAULT_SECRETS_DIR)]
        secrets_dir: String,

        /// Path to the configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        config: String,
    },
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().context("Failed to start async runtime")
}

fn run_push(
    app_name: Option<String>,
    secrets_dir: &str,
    region: Option<String>,
    dry_run: bool,
    yes: bool,
) -> Result<bool> {
    let project_root = std::env::current_dir().context("Failed to get current directory")?;
    let app = config::resolve_app_name(app_name, &project_root)?;
    let dir = config::expand_path(secrets_dir)?;

    println!("🚀 Secret Sync Push");
    println!(
        "Pushing secrets for app '{}' from directory '{}'\n",
        app,
        dir.display()
    );

    if !dir.exists() {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create secrets directory: {}", dir.display()))?;
        println!("📁 Created directory {}", dir.display());
        println!("Add secret files with key=value format:");
        println!("Example - {}:", dir.join("database").display());
        println!("DB_USER=admin");
        println!("DB_PASSWORD=securepassword");
        return Ok(true);
    }

    let source = SecretSource::load(&dir)?;
    if source.is_empty() {
        println!("⚠️  No secret files found in {}", dir.display());
        println!("Create files with key=value pairs on each line");
        return Ok(true);
    }

    let names: Vec<&str> = source.files().iter().map(|f| f.name.as_str()).collect();
    println!(
        "📖 Found {} secret file(s): {}",
        names.len(),
        names.join(", ")
    );

    if dry_run {
        println!("\n🏃 DRY RUN MODE - Validating secrets without pushing to AWS");
        let report = pusher::validate(&app, &source);
        print_dry_run(&source, &report);
        print_summary(&report);
        println!("\nDry run completed. No changes were made to AWS.");
        return Ok(report.is_success());
    }

    if !yes && std::io::stdin().is_terminal() {
        let theme = ColorfulTheme::default();
        let prompt = format!(
            "\n❓ Create or overwrite {} secret(s) for '{}'?",
            source.files().len(),
            app
        );
        if !Confirm::with_theme(&theme)
            .with_prompt(prompt)
            .default(false)
            .interact()?
        {
            println!("❌ Cancelled by user");
            return Ok(true);
        }
    }

    let report = runtime()?.block_on(async {
        let store = AwsSecretStore::connect(region).await;
        let pusher = Pusher::new(&app, &store);
        pusher.preflight().await?;
        Ok::<_, SyncError>(pusher.push(&source, PushMode::Normal).await)
    })?;

    println!("\n🎯 Results per file:");
    for entry in report.files() {
        let icon = if entry.outcome.is_failure() { "✗" } else { "✓" };
        println!(
            "   {} {:<9} {} ({}) - {}",
            icon,
            entry.outcome.to_string(),
            entry.target,
            entry.file,
            entry.detail
        );
        print_warnings(&entry.warnings);
    }
    print_summary(&report);

    if report.is_success() {
        println!("\n✅ These secrets will be accessible during deployment.");
    }
    Ok(report.is_success())
}

fn print_dry_run(source: &SecretSource, report: &PushReport) {
    for (file, entry) in source.files().iter().zip(report.files()) {
        println!("\n  Secret: {}", entry.target);
        println!("  File: {}", entry.file);
        print_warnings(&entry.warnings);

        match entry.outcome {
            Outcome::Validated => {
                let keys: Vec<String> = file
                    .values
                    .iter()
                    .map(|(k, v)| format!("{} ({})", k, mask_value(v)))
                    .collect();
                println!("  Keys: {}", keys.join(", "));
                println!(
                    "  Would create/update AWS secret with {} key-value pair(s)",
                    file.values.len()
                );
            }
            Outcome::Skipped => {
                println!("  ⚠️  {} contains no valid key-value pairs", entry.file)
            }
            _ => println!("  ✗ {}", entry.detail),
        }
    }
}

fn print_warnings(warnings: &[secret_sync::source::ParseWarning]) {
    for warning in warnings {
        println!("      ⚠️  WARNING: {}", warning);
    }
}

fn print_summary(report: &PushReport) {
    println!("\n📊 Results:");
    for outcome in [
        Outcome::Created,
        Outcome::Updated,
        Outcome::Validated,
        Outcome::Skipped,
        Outcome::Failed,
    ] {
        let count = report.count(outcome);
        if count > 0 {
            println!("   {}: {}", outcome, count);
        }
    }
    println!("   warnings: {}", report.warning_count());
    println!(
        "   {}/{} file(s) succeeded",
        report.files().len() - report.count(Outcome::Failed),
        report.files().len()
    );
}

fn run_boot(config_path: &str, region: Option<String>, serve: Vec<String>) -> Result<i32> {
    let config = Config::load_or_default(config_path)
        .and_then(|config| config.validate().map(|_| config))
        .map_err(|e| {
            SyncError::Configuration(format!("invalid config {}: {:#}", config_path, e))
        })?;

    let mode = Mode::from_env();
    let app_name = std::env::var(APP_NAME_VAR).ok();

    // Single-threaded, and dropped before the binding is installed.
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    let outcome = rt.block_on(async {
        let store = if mode.is_production() {
            // Fail on a missing identity before touching the network.
            require_identity(app_name.clone(), APP_NAME_VAR)?;
            Some(AwsSecretStore::connect(region).await)
        } else {
            tracing::info!("development mode, remote secret injection disabled");
            None
        };
        let probe = TcpProbe::from_env(&config.boot.dependency)?;
        let runner = ProcessRunner;

        let mut sequence = BootSequence::new(&config.boot, mode, &runner)
            .app_name(app_name)
            .serve_command(serve);
        if let Some(store) = &store {
            sequence = sequence.store(store);
        }
        if let Some(probe) = &probe {
            sequence = sequence.probe(probe);
        }
        sequence.run().await
    })?;
    drop(rt);

    let BootOutcome { binding, serve, .. } = outcome;
    binding.install();
    boot::serve(&serve)
}

fn run_doctor(app_name: Option<String>, secrets_dir: &str, config_path: &str) -> Result<()> {
    println!("🔍 Secret Sync Doctor");
    println!("Checking prerequisites...\n");

    let mut all_checks_passed = true;

    // Check 1: application name
    print!("1. Resolving application name... ");
    let project_root = std::env::current_dir().context("Failed to get current directory")?;
    match config::resolve_app_name(app_name, &project_root) {
        Ok(app) => println!("✓ ({})", app),
        Err(e) => {
            println!("✗");
            println!("   ❌ {}", e);
            println!("   💡 Pass --app-name or add APP_NAME=<name> to APPCONFIG.env");
            all_checks_passed = false;
        }
    }

    // Check 2: secrets directory
    print!("2. Checking secrets directory... ");
    let dir = config::expand_path(secrets_dir)?;
    match SecretSource::load(&dir) {
        Ok(source) if source.is_empty() => {
            println!("⊘");
            println!("   ⚠️  {} contains no secret files", dir.display());
        }
        Ok(source) => {
            println!(
                "✓ ({} file(s), {} warning(s))",
                source.files().len(),
                source.warning_count()
            );
        }
        Err(_) => {
            println!("✗");
            println!("   ❌ Directory not found: {}", dir.display());
            println!("   💡 Run 'secret-sync push --dry-run' to create it");
            all_checks_passed = false;
        }
    }

    // Check 3: AWS credentials
    print!("3. Checking AWS credentials... ");
    if check_aws_credentials() {
        println!("✓");
    } else {
        println!("✗");
        println!("   ❌ No AWS credentials found in environment or ~/.aws/credentials");
        println!("   💡 Run 'aws configure' or export AWS_ACCESS_KEY_ID / AWS_SECRET_ACCESS_KEY");
        all_checks_passed = false;
    }

    // Check 4: AWS region
    print!("4. Checking AWS region... ");
    if check_aws_region() {
        println!("✓");
    } else {
        println!("⊘");
        println!("   ⚠️  No region configured, pass --region when pushing");
    }

    // Check 5: boot configuration
    print!("5. Checking boot configuration... ");
    match Config::load_or_default(config_path).and_then(|c| c.validate().map(|_| c)) {
        Ok(config) => {
            let missing: Vec<String> = config
                .boot
                .commands()
                .into_iter()
                .filter_map(|(stage, argv)| {
                    let program = argv.first()?;
                    which::which(program)
                        .is_err()
                        .then(|| format!("{} ({})", program, stage))
                })
                .collect();

            if missing.is_empty() {
                println!("✓");
            } else {
                println!("✗");
                println!("   ❌ Commands not found in PATH: {}", missing.join(", "));
                all_checks_passed = false;
            }
        }
        Err(e) => {
            println!("✗");
            println!("   ❌ {:#}", e);
            all_checks_passed = false;
        }
    }

    println!();
    if all_checks_passed {
        println!("✅ All checks passed! Your system is ready.");
        Ok(())
    } else {
        println!("❌ Some checks failed. Please fix the issues above.");
        Err(anyhow::anyhow!("Doctor checks failed"))
    }
}

fn check_aws_credentials() -> bool {
    let env_keys = std::env::var("AWS_ACCESS_KEY_ID").is_ok()
        && std::env::var("AWS_SECRET_ACCESS_KEY").is_ok();
    let profile = std::env::var("AWS_PROFILE").is_ok();
    let shared_file = dirs::home_dir()
        .map(|home| home.join(".aws").join("credentials"))
        .is_some_and(|path| path.exists());
    env_keys || profile || shared_file
}

fn check_aws_region() -> bool {
    std::env::var("AWS_REGION").is_ok()
        || std::env::var("AWS_DEFAULT_REGION").is_ok()
        || dirs::home_dir()
            .map(|home| home.join(".aws").join("config"))
            .is_some_and(|path| path.exists())
}

fn main() {
    let cli = Cli::parse();
    secret_sync::logging::init(cli.verbose);

    let code = match cli.command {
        Commands::Push {
            app_name,
            secrets_dir,
            region,
            dry_run,
            yes,
        } => match run_push(app_name, &secrets_dir, region, dry_run, yes) {
            Ok(true) => 0,
            Ok(false) => {
                eprintln!("\n❌ Some secrets failed to push.");
                1
            }
            Err(e) => {
                eprintln!("\nError: {:#}", e);
                eprintln!("💡 Run 'secret-sync doctor' to check your configuration.");
                exit_code_for(&e)
            }
        },
        Commands::Boot {
            config,
            region,
            serve,
        } => match run_boot(&config, region, serve) {
            Ok(code) => code,
            Err(e) => {
                tracing::error!(error = %format!("{:#}", e), "boot aborted");
                eprintln!("\nError: {:#}", e);
                exit_code_for(&e)
            }
        },
        Commands::Doctor {
            app_name,
            secrets_dir,
            config,
        } => match run_doctor(app_name, &secrets_dir, &config) {
            Ok(()) => 0,
            Err(e) => {
                eprintln!("\nError: {}", e);
                1
            }
        },
    };

    std::process::exit(code);
}
