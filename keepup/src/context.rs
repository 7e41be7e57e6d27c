use async_trait::async_trait;
use chrono::TimeDelta;
use keepup_core::{
    FileConfig, ProcessEnumerator, Update, UpdateAction, UpdateError, UpdateOptions,
    UpdaterConfig, exec,
};
use keepup_supervisor::{DEFAULT_KILL_DELAY, Matcher, terminate_all};
use keepup_updater::{SignatureVerifier, UpdateUi};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cli::UpdateArgs;
use crate::prompt::{CommandPromptUi, SilentUi};
use crate::report::Reporter;

fn command_timeout() -> TimeDelta {
    TimeDelta::seconds(10)
}

/// Context the service and `check` run updates in.
pub struct ServiceContext {
    args: UpdateArgs,
    config: Arc<FileConfig>,
    ui: Box<dyn UpdateUi>,
    verifier: SignatureVerifier,
    reporter: Reporter,
    enumerator: Arc<dyn ProcessEnumerator>,
}

impl ServiceContext {
    pub fn new(
        args: UpdateArgs,
        app_name: &str,
        config: Arc<FileConfig>,
        enumerator: Arc<dyn ProcessEnumerator>,
    ) -> anyhow::Result<Self> {
        let ui: Box<dyn UpdateUi> = match (&args.prompt, args.silent) {
            (Some(program), false) => Box::new(CommandPromptUi::new(program, app_name)),
            (None, false) => {
                warn!("No prompt program configured, updates are applied silently");
                Box::new(SilentUi)
            }
            (_, true) => Box::new(SilentUi),
        };
        let verifier = SignatureVerifier::new(&args.signing_keys)?;
        if verifier.is_empty() {
            warn!("No signing keys configured, every update will fail verification");
        }
        let reporter = Reporter::new(args.report_url.clone())?;
        Ok(Self {
            args,
            config,
            ui,
            verifier,
            reporter,
            enumerator,
        })
    }

    /// Where updates are installed: `--destination`, else the app's directory.
    pub fn destination(&self) -> Option<PathBuf> {
        self.args.destination.clone().or_else(|| {
            self.args
                .path_to_app
                .as_deref()
                .and_then(Path::parent)
                .map(Path::to_path_buf)
        })
    }

    async fn app_version(&self) -> String {
        if let Some(version) = &self.args.app_version {
            return version.clone();
        }
        let Some(app) = &self.args.path_to_app else {
            return String::new();
        };
        match exec(app, ["--version"], command_timeout()).await {
            Ok(result) => {
                let output = result.stdout_lossy();
                let version = output.split_whitespace().last().unwrap_or_default().to_string();
                debug!("{} reports version {:?}", app.display(), version);
                version
            }
            Err(e) => {
                warn!("Unable to get version of {}: {}", app.display(), e);
                String::new()
            }
        }
    }
}

#[async_trait]
impl keepup_updater::Context for ServiceContext {
    async fn update_options(&self) -> UpdateOptions {
        UpdateOptions {
            version: self.app_version().await,
            platform: self.args.platform.clone(),
            arch: std::env::consts::ARCH.to_string(),
            destination_path: self.destination().unwrap_or_default(),
            source: self.args.source.as_str().to_string(),
            url: String::new(),
            channel: self.args.channel.clone(),
            env: self.args.env.clone(),
            install_id: self.config.get_install_id(),
            force: self.args.force,
            signature_path: self.args.signature_path.clone(),
            os_version: sysinfo::System::long_os_version().unwrap_or_default(),
            updater_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    fn update_ui(&self) -> &dyn UpdateUi {
        self.ui.as_ref()
    }

    async fn verify(&self, update: &Update) -> anyhow::Result<()> {
        let asset = update
            .asset
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("No asset"))?;
        let path = asset
            .local_path()
            .ok_or_else(|| anyhow::anyhow!("Asset {} was not downloaded", asset.name))?;
        self.verifier
            .verify_file(path, &asset.signature)
            .await
            .map_err(|e| anyhow::anyhow!("Error verifying signature: {}", e))
    }

    async fn before_apply(&self, update: &Update) -> anyhow::Result<()> {
        debug!("Before apply {}", update);
        Ok(())
    }

    async fn after_apply(&self, _update: &Update) -> anyhow::Result<()> {
        let Some(app) = &self.args.path_to_app else {
            return Ok(());
        };
        match exec(app, ["update", "notify", "after-apply"], command_timeout()).await {
            Ok(_) => Ok(()),
            Err(e) => {
                let output = e
                    .command_result()
                    .map(|r| r.combined_output())
                    .unwrap_or_default();
                anyhow::bail!("Error in after apply: {} ({})", e, output)
            }
        }
    }

    async fn restart(&self) -> anyhow::Result<()> {
        let Some(destination) = self.destination() else {
            info!("No destination, nothing to restart");
            return Ok(());
        };
        let matcher = Matcher::path_prefix(&destination).except_pid(std::process::id());
        let pids = terminate_all(self.enumerator.as_ref(), &matcher, DEFAULT_KILL_DELAY).await;
        info!("Restarted {} process(es) under {}", pids.len(), destination.display());
        Ok(())
    }

    async fn report_error(&self, err: &UpdateError, update: Option<&Update>, options: &UpdateOptions) {
        self.reporter.report_error(err, update, options).await;
    }

    async fn report_action(&self, action: UpdateAction, update: &Update, options: &UpdateOptions) {
        let (auto, _) = self.config.get_update_auto();
        self.reporter.report_action(action, auto, update, options).await;
    }

    async fn report_success(&self, update: &Update, options: &UpdateOptions) {
        self.reporter.report_success(update, options).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use keepup_core::ProcessInfo;
    use keepup_updater::Context;

    struct NoProcesses;

    #[async_trait]
    impl ProcessEnumerator for NoProcesses {
        async fn processes(&self) -> keepup_core::Result<Vec<ProcessInfo>> {
            Ok(Vec::new())
        }
    }

    fn context(extra: &[&str]) -> ServiceContext {
        let mut argv = vec!["keepup", "check"];
        argv.extend_from_slice(extra);
        let cli = crate::cli::Cli::try_parse_from(argv).unwrap();
        let crate::cli::Command::Check(args) = cli.command else {
            panic!("expected check");
        };
        ServiceContext::new(
            args,
            "Keepup",
            Arc::new(FileConfig::new("/nonexistent/updater.json")),
            Arc::new(NoProcesses),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_update_options() {
        let ctx = context(&[
            "--path-to-app",
            "/opt/app/bin/app",
            "--app-version",
            "1.2.3",
            "--channel",
            "beta",
            "--platform",
            "linux",
        ]);
        let options = ctx.update_options().await;
        assert_eq!(options.version, "1.2.3");
        assert_eq!(options.channel, "beta");
        assert_eq!(options.platform, "linux");
        assert_eq!(options.source, "remote");
        assert_eq!(options.destination_path, PathBuf::from("/opt/app/bin"));
        assert_eq!(options.updater_version, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_destination_override() {
        let ctx = context(&["--path-to-app", "/opt/app/bin/app", "--destination", "/opt/app"]);
        assert_eq!(ctx.destination(), Some(PathBuf::from("/opt/app")));
        assert_eq!(context(&[]).destination(), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_version_from_app() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::TempDir::new().unwrap();
        let app = dir.path().join("app");
        std::fs::write(&app, "#!/bin/sh\necho \"app version 4.5.6\"\n").unwrap();
        std::fs::set_permissions(&app, std::fs::Permissions::from_mode(0o755)).unwrap();

        let ctx = context(&["--path-to-app", app.to_str().unwrap()]);
        assert_eq!(ctx.update_options().await.version, "4.5.6");
    }

    #[tokio::test]
    async fn test_verify_requires_download() {
        let ctx = context(&[]);
        let update = Update {
            version: "1.0.0".to_string(),
            asset: Some(keepup_core::Asset::new("a.zip", "https://example.com/a.zip")),
            ..Default::default()
        };
        assert!(ctx.verify(&update).await.is_err());
    }

    #[tokio::test]
    async fn test_restart_without_destination() {
        context(&[]).restart().await.unwrap();
    }
}
