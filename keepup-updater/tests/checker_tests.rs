use async_trait::async_trait;
use keepup_core::{
    Asset, ErrorKind, FileConfig, Update, UpdateAction, UpdateError, UpdateOptions,
    UpdatePromptOptions, UpdatePromptResponse,
};
use keepup_updater::download::file_digest;
use keepup_updater::{
    Context, NoopApplier, PlatformApplier, UpdateChecker, UpdateSource, UpdateUi, Updater,
};
use reqwest::Url;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Notify;

const TICK: Duration = Duration::from_secs(60);

struct CountingSource {
    fail: bool,
    calls: AtomicUsize,
}

#[async_trait]
impl UpdateSource for CountingSource {
    fn description(&self) -> &str {
        "Counting"
    }

    async fn find_update(&self, _options: &UpdateOptions) -> anyhow::Result<Option<Update>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("offline");
        }
        Ok(None)
    }
}

struct NeverPrompt;

#[async_trait]
impl UpdateUi for NeverPrompt {
    async fn update_prompt(
        &self,
        _update: &Update,
        _options: &UpdateOptions,
        _prompt_options: UpdatePromptOptions,
    ) -> anyhow::Result<UpdatePromptResponse> {
        anyhow::bail!("no prompt expected")
    }
}

#[derive(Default)]
struct QuietContext {
    errors: AtomicUsize,
}

#[async_trait]
impl Context for QuietContext {
    async fn update_options(&self) -> UpdateOptions {
        UpdateOptions::default()
    }

    fn update_ui(&self) -> &dyn UpdateUi {
        &NeverPrompt
    }

    async fn verify(&self, _update: &Update) -> anyhow::Result<()> {
        Ok(())
    }

    async fn before_apply(&self, _update: &Update) -> anyhow::Result<()> {
        Ok(())
    }

    async fn after_apply(&self, _update: &Update) -> anyhow::Result<()> {
        Ok(())
    }

    async fn restart(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn report_error(&self, _err: &UpdateError, _update: Option<&Update>, _options: &UpdateOptions) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }

    async fn report_action(&self, _action: UpdateAction, _update: &Update, _options: &UpdateOptions) {}

    async fn report_success(&self, _update: &Update, _options: &UpdateOptions) {}
}

fn checker(fail: bool) -> (UpdateChecker, Arc<CountingSource>, Arc<QuietContext>) {
    let source = Arc::new(CountingSource {
        fail,
        calls: AtomicUsize::new(0),
    });
    let updater = Updater::new(
        source.clone(),
        Arc::new(FileConfig::new("/nonexistent/updater.json")),
        Arc::new(NoopApplier),
    )
    .unwrap();
    let ctx = Arc::new(QuietContext::default());
    let checker = UpdateChecker::with_tick(Arc::new(updater), ctx.clone(), TICK);
    (checker, source, ctx)
}

#[tokio::test(start_paused = true)]
async fn test_checks_on_every_tick() {
    let (checker, source, _ctx) = checker(false);
    assert!(checker.start());
    assert!(!checker.start());
    assert!(checker.is_running());

    // nothing happens before the first full interval
    tokio::time::sleep(TICK / 2).await;
    assert_eq!(checker.count(), 0);

    tokio::time::sleep(TICK * 3).await;
    assert_eq!(checker.count(), 3);
    assert_eq!(source.calls.load(Ordering::SeqCst), 3);

    checker.stop();
    assert!(!checker.is_running());
    tokio::time::sleep(TICK * 5).await;
    assert_eq!(checker.count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_restart_after_stop() {
    let (checker, _source, _ctx) = checker(false);
    assert!(checker.start());
    checker.stop();
    assert!(checker.start());
    tokio::time::sleep(TICK + TICK / 2).await;
    assert_eq!(checker.count(), 1);
}

#[tokio::test]
async fn test_check_counts_failures() {
    let (checker, _source, ctx) = checker(true);
    let err = checker.check().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Find);
    checker.check().await.unwrap_err();
    assert_eq!(checker.count(), 2);
    assert_eq!(ctx.errors.load(Ordering::SeqCst), 2);
    assert!(!checker.is_running());
}

struct FixedSource(Update);

#[async_trait]
impl UpdateSource for FixedSource {
    fn description(&self) -> &str {
        "Fixed"
    }

    async fn find_update(&self, _options: &UpdateOptions) -> anyhow::Result<Option<Update>> {
        Ok(Some(self.0.clone()))
    }
}

#[derive(Default)]
struct SlowApplier {
    started: Notify,
    finished: AtomicBool,
}

#[async_trait]
impl PlatformApplier for SlowApplier {
    fn name(&self) -> &str {
        "slow"
    }

    async fn apply(&self, _update: &Update, _options: &UpdateOptions) -> anyhow::Result<()> {
        self.started.notify_one();
        tokio::time::sleep(Duration::from_millis(300)).await;
        self.finished.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn test_shutdown_waits_for_update_in_progress() {
    let dir = TempDir::new().unwrap();
    let asset_path = dir.path().join("App-2.0.0.zip");
    std::fs::write(&asset_path, b"new build").unwrap();
    let config_path = dir.path().join("updater.json");
    std::fs::write(&config_path, r#"{"auto":true,"autoSet":true}"#).unwrap();

    let mut asset = Asset::new(
        "App-2.0.0.zip",
        Url::from_file_path(&asset_path).unwrap().to_string(),
    );
    asset.digest = file_digest(&asset_path).await.unwrap();
    let update = Update {
        version: "2.0.0".to_string(),
        asset: Some(asset),
        ..Default::default()
    };

    let applier = Arc::new(SlowApplier::default());
    let updater = Updater::new(
        Arc::new(FixedSource(update)),
        Arc::new(FileConfig::load(config_path).await.unwrap()),
        applier.clone(),
    )
    .unwrap()
    .with_download_dir(dir.path().join("downloads"));
    let checker = UpdateChecker::with_tick(
        Arc::new(updater),
        Arc::new(QuietContext::default()),
        Duration::from_millis(50),
    );

    assert!(checker.start());
    applier.started.notified().await;
    checker.shutdown().await;

    assert!(applier.finished.load(Ordering::SeqCst));
    assert!(!checker.is_running());
}

#[tokio::test]
async fn test_shutdown_when_not_started() {
    let (checker, _source, _ctx) = checker(false);
    checker.shutdown().await;
    assert!(!checker.is_running());
    assert_eq!(checker.count(), 0);
}
