//! Integration tests for boot-time injection against an in-memory store.

mod common;

use async_trait::async_trait;
use common::{payload, TestContext};
use secret_sync::boot::{BootSequence, Stage, StageRunner};
use secret_sync::config::{BootConfig, Mode};
use secret_sync::environment::EnvironmentBinding;
use secret_sync::injector::RuntimeInjector;
use secret_sync::pusher::{PushMode, Pusher};
use secret_sync::source::SecretSource;
use secret_sync::store::memory::StoreCall;
use secret_sync::store::{AppIdentity, MemoryStore};
use secret_sync::SyncError;
use std::sync::Mutex;

/// Records each stage with the variables it was given.
#[derive(Default)]
struct CapturingRunner {
    seen: Mutex<Vec<(Stage, Vec<(String, String)>)>>,
}

#[async_trait]
impl StageRunner for CapturingRunner {
    async fn run(
        &self,
        stage: Stage,
        _argv: &[String],
        env: &EnvironmentBinding,
    ) -> Result<(), SyncError> {
        let vars = env
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.seen.lock().unwrap().push((stage, vars));
        Ok(())
    }
}

fn argv(parts: &[&str]) -> Option<Vec<String>> {
    Some(parts.iter().map(|s| s.to_string()).collect())
}

fn full_config() -> BootConfig {
    BootConfig {
        migrate: argv(&["manage", "migrate"]),
        ensure_admin: argv(&["manage", "ensure-admin"]),
        static_assets: argv(&["manage", "collectstatic"]),
        serve: argv(&["server", "--port", "8000"]),
        ..BootConfig::default()
    }
}

#[tokio::test]
async fn test_production_boot_injects_before_migrations() {
    let store = MemoryStore::new()
        .with_record("myapp_django", payload(&[("DJANGO_SECRET_KEY", "abc123")]))
        .with_record("myapp_db", payload(&[("DB_PASSWORD", "pw")]));
    let runner = CapturingRunner::default();
    let config = full_config();

    let outcome = BootSequence::new(&config, Mode::Production, &runner)
        .app_name(Some("myapp".to_string()))
        .store(&store)
        .run()
        .await
        .unwrap();

    assert_eq!(outcome.binding.get("DJANGO_SECRET_KEY"), Some("abc123"));
    assert_eq!(outcome.binding.get("DB_PASSWORD"), Some("pw"));
    assert_eq!(outcome.serve, vec!["server", "--port", "8000"]);

    let seen = runner.seen.lock().unwrap();
    let stages: Vec<Stage> = seen.iter().map(|(stage, _)| *stage).collect();
    assert_eq!(
        stages,
        vec![
            Stage::ApplySchemaMigrations,
            Stage::EnsurePrivilegedAccount,
            Stage::PrepareStaticAssets,
        ]
    );
    for (_, vars) in seen.iter() {
        assert!(vars.contains(&("DJANGO_SECRET_KEY".to_string(), "abc123".to_string())));
    }
}

#[tokio::test]
async fn test_production_boot_without_identity_has_no_side_effects() {
    let store = MemoryStore::new().with_record("myapp_django", payload(&[("K", "v")]));
    let runner = CapturingRunner::default();
    let config = full_config();

    let err = BootSequence::new(&config, Mode::Production, &runner)
        .store(&store)
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Configuration(_)));
    assert_eq!(err.exit_code(), 2);
    assert!(store.calls().is_empty());
    assert!(runner.seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_bad_record_does_not_block_good_one() {
    let store = MemoryStore::new()
        .with_record("myapp_good", payload(&[("GOOD", "yes")]))
        .with_record("myapp_bad", "not-json");
    let runner = CapturingRunner::default();
    let config = full_config();

    let outcome = BootSequence::new(&config, Mode::Production, &runner)
        .app_name(Some("myapp".to_string()))
        .store(&store)
        .run()
        .await
        .unwrap();

    assert_eq!(outcome.binding.get("GOOD"), Some("yes"));
    assert_eq!(outcome.binding.len(), 1);
    assert_eq!(runner.seen.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn test_development_boot_never_touches_store() {
    let store = MemoryStore::new().with_record("myapp_django", payload(&[("K", "v")]));
    let runner = CapturingRunner::default();
    let config = full_config();

    let outcome = BootSequence::new(&config, Mode::Development, &runner)
        .store(&store)
        .run()
        .await
        .unwrap();

    assert!(outcome.binding.is_empty());
    assert!(store.calls().is_empty());
    assert!(!outcome.stages.contains(&Stage::LoadSecrets));
    assert!(!outcome.stages.contains(&Stage::PrepareStaticAssets));
}

#[tokio::test]
async fn test_pushed_files_are_injected_back() {
    let ctx = TestContext::new().unwrap();
    ctx.create_secret_file("django", &[("DJANGO_SECRET_KEY", "abc123"), ("DEBUG_TOOLBAR", "off")])
        .unwrap();
    ctx.create_secret_file("email", &[("SMTP_PASSWORD", "mail-pw")])
        .unwrap();

    let app = AppIdentity::new("myapp").unwrap();
    let store = MemoryStore::new().with_record("myapp2_other", payload(&[("LEAK", "x")]));

    let source = SecretSource::load(&ctx.secrets_dir()).unwrap();
    let pushed = Pusher::new(&app, &store)
        .push(&source, PushMode::Normal)
        .await;
    assert!(pushed.is_success());

    let report = RuntimeInjector::new(&app, &store).load().await.unwrap();

    assert_eq!(report.loaded, vec!["myapp_django", "myapp_email"]);
    assert_eq!(report.binding.len(), 3);
    assert_eq!(report.binding.get("SMTP_PASSWORD"), Some("mail-pw"));
    assert_eq!(report.binding.origin("SMTP_PASSWORD"), Some("myapp_email"));
    assert_eq!(report.binding.get("LEAK"), None);
    assert!(!store
        .calls()
        .contains(&StoreCall::Get("myapp2_other".to_string())));
}
