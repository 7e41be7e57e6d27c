use async_trait::async_trait;
use chrono::TimeDelta;
use keepup_core::{
    Update, UpdateAction, UpdateOptions, UpdatePromptOptions, UpdatePromptResponse, exec_for_json,
};
use keepup_updater::UpdateUi;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

const DEFAULT_DESCRIPTION: &str = "Please see the release notes for more information.";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptInput {
    pub title: String,
    pub message: String,
    pub description: String,
    pub auto_update: bool,
}

impl PromptInput {
    pub fn new(
        app_name: &str,
        update: &Update,
        options: &UpdateOptions,
        prompt_options: UpdatePromptOptions,
    ) -> Self {
        let description = if update.description.is_empty() {
            DEFAULT_DESCRIPTION.to_string()
        } else {
            update.description.clone()
        };
        Self {
            title: format!("{} Update: Version {}", app_name, update.version),
            message: format!(
                "The version you are currently running ({}) is outdated.",
                options.version
            ),
            description,
            auto_update: prompt_options.auto_update,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptOutput {
    #[serde(default)]
    action: String,
    #[serde(default)]
    auto_update: bool,
}

impl PromptOutput {
    fn into_response(self) -> UpdatePromptResponse {
        match self.action.as_str() {
            "apply" => UpdatePromptResponse::new(UpdateAction::Apply, self.auto_update),
            "snooze" => UpdatePromptResponse::new(UpdateAction::Snooze, false),
            _ => UpdatePromptResponse::new(UpdateAction::Cancel, false),
        }
    }
}

/// Shows the prompt by running an external program with the prompt as a
/// JSON argument and reading the answer from its stdout.
pub struct CommandPromptUi {
    program: PathBuf,
    app_name: String,
    timeout: TimeDelta,
}

impl CommandPromptUi {
    pub fn new(program: impl Into<PathBuf>, app_name: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            app_name: app_name.into(),
            timeout: TimeDelta::hours(1),
        }
    }
}

#[async_trait]
impl UpdateUi for CommandPromptUi {
    async fn update_prompt(
        &self,
        update: &Update,
        options: &UpdateOptions,
        prompt_options: UpdatePromptOptions,
    ) -> anyhow::Result<UpdatePromptResponse> {
        let input = PromptInput::new(&self.app_name, update, options, prompt_options);
        let input = serde_json::to_string(&input)?;
        info!("Prompting with {}", self.program.display());
        let output: PromptOutput = exec_for_json(&self.program, [input], self.timeout)
            .await
            .map_err(|e| anyhow::anyhow!("Error running command: {}", e))?;
        Ok(output.into_response())
    }
}

/// Applies every update without asking.
pub struct SilentUi;

#[async_trait]
impl UpdateUi for SilentUi {
    async fn update_prompt(
        &self,
        update: &Update,
        _options: &UpdateOptions,
        _prompt_options: UpdatePromptOptions,
    ) -> anyhow::Result<UpdatePromptResponse> {
        info!("Silently applying {}", update);
        Ok(UpdatePromptResponse::new(UpdateAction::Apply, false))
    }
}
