use keepup_core::{Update, UpdateAction, UpdateError, UpdateOptions};
use std::time::Duration;
use tracing::{info, warn};

const REPORT_TIMEOUT: Duration = Duration::from_secs(60);

/// Posts update outcomes to a reporting endpoint. Without an endpoint the
/// reports are only logged.
pub struct Reporter {
    base_url: Option<String>,
    client: reqwest::Client,
}

impl Reporter {
    pub fn new(base_url: Option<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(REPORT_TIMEOUT).build()?;
        Ok(Self {
            base_url: base_url.map(|url| url.trim_end_matches('/').to_string()),
            client,
        })
    }

    pub async fn report_error(&self, err: &UpdateError, update: Option<&Update>, options: &UpdateOptions) {
        let mut data = common_fields(options);
        if let Some(update) = update {
            data.push(("upd_target", update.version.clone()));
        }
        data.push(("error_type", err.kind().to_string()));
        data.push(("description", err.message()));
        self.send("error", data).await;
    }

    pub async fn report_action(&self, action: UpdateAction, auto_update: bool, update: &Update, options: &UpdateOptions) {
        let mut data = common_fields(options);
        data.push(("upd_target", update.version.clone()));
        data.push(("action", action.to_string()));
        data.push(("auto_update", bool_value(auto_update)));
        self.send("action", data).await;
    }

    pub async fn report_success(&self, update: &Update, options: &UpdateOptions) {
        let mut data = common_fields(options);
        data.push(("upd_target", update.version.clone()));
        self.send("success", data).await;
    }

    async fn send(&self, kind: &str, data: Vec<(&'static str, String)>) {
        let Some(base) = &self.base_url else {
            info!("Report ({}): {:?}", kind, data);
            return;
        };
        let url = format!("{}/{}", base, kind);
        info!("Reporting {}: {} {:?}", kind, url, data);
        match self.client.post(&url).form(&data).send().await {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => warn!("Report to {} returned bad HTTP status {}", url, response.status()),
            Err(e) => warn!("Error reporting {}: {}", kind, e),
        }
    }
}

fn common_fields(options: &UpdateOptions) -> Vec<(&'static str, String)> {
    vec![
        ("install_id", options.install_id.clone()),
        ("version", options.version.clone()),
        ("upd_version", options.updater_version.clone()),
    ]
}

fn bool_value(b: bool) -> String {
    if b { "1" } else { "0" }.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use keepup_core::ErrorKind;

    #[tokio::test]
    async fn test_unreachable_endpoint_is_not_fatal() {
        // port 9 is discard; nothing listens there in test environments
        let reporter = Reporter::new(Some("http://127.0.0.1:9/".to_string())).unwrap();
        let err = UpdateError::new(ErrorKind::Download, anyhow::anyhow!("boom"));
        reporter.report_error(&err, None, &UpdateOptions::default()).await;
    }

    #[tokio::test]
    async fn test_log_only_without_endpoint() {
        let reporter = Reporter::new(None).unwrap();
        let update = Update {
            version: "2.0.0".to_string(),
            ..Default::default()
        };
        reporter.report_success(&update, &UpdateOptions::default()).await;
        reporter
            .report_action(UpdateAction::Snooze, false, &update, &UpdateOptions::default())
            .await;
    }

    #[test]
    fn test_common_fields() {
        let options = UpdateOptions {
            install_id: "abc".to_string(),
            version: "1.0.0".to_string(),
            updater_version: "0.1.0".to_string(),
            ..Default::default()
        };
        let fields = common_fields(&options);
        assert_eq!(fields[0], ("install_id", "abc".to_string()));
        assert_eq!(bool_value(true), "1");
    }
}
