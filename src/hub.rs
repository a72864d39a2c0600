//! Fetches the pre-trained CleanRL humanoid agent from the Hugging Face hub

use std::path::{Path, PathBuf};

use reqwest::Client as HttpClient;

use crate::Result;

/// Repository holding the PPO continuous-action humanoid run
pub const CLEANRL_HUMANOID_URL: &str =
    "https://huggingface.co/cleanrl/Humanoid-v4-ppo_continuous_action-seed1/resolve/main/";

/// Files published with the run; the last one is the checkpoint we convert
pub const CLEANRL_HUMANOID_FILES: [&str; 3] = [
    "agent.pt",
    "ppo_continuous_action.py",
    "ppo_continuous_action.cleanrl_model",
];

pub fn file_url(base_url: &str, file_name: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), file_name)
}

/// Result of one file download
#[derive(Debug)]
pub struct DownloadOutcome {
    pub file_name: String,
    pub result: Result<PathBuf>,
}

impl DownloadOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Download one file into `output_dir`.
///
/// The body lands in `<name>.part` first and is renamed once complete, so an
/// interrupted download never leaves a truncated checkpoint behind.
pub async fn download_file(
    client: &HttpClient,
    base_url: &str,
    file_name: &str,
    output_dir: &Path,
) -> Result<PathBuf> {
    let url = file_url(base_url, file_name);
    log::info!("📥 Downloading {}", url);

    let response = client.get(&url).send().await?.error_for_status()?;
    let bytes = response.bytes().await?;

    tokio::fs::create_dir_all(output_dir).await?;
    let target = output_dir.join(file_name);
    let partial = output_dir.join(format!("{}.part", file_name));
    if let Err(err) = tokio::fs::write(&partial, &bytes).await {
        let _ = tokio::fs::remove_file(&partial).await;
        return Err(err.into());
    }
    tokio::fs::rename(&partial, &target).await?;

    log::info!("✅ {} ({:.2} MB)", target.display(), bytes.len() as f64 / (1024.0 * 1024.0));
    Ok(target)
}

/// Download every file concurrently; one failure does not cancel the others
pub async fn download_all(
    base_url: &str,
    files: &[&str],
    output_dir: &Path,
) -> Result<Vec<DownloadOutcome>> {
    let client = HttpClient::builder().build()?;

    let downloads = files.iter().map(|file_name| {
        let client = &client;
        async move {
            let result = download_file(client, base_url, file_name, output_dir).await;
            if let Err(err) = &result {
                log::warn!("⚠️ Failed to download {}: {}", file_name, err);
            }
            DownloadOutcome {
                file_name: file_name.to_string(),
                result,
            }
        }
    });

    Ok(futures::future::join_all(downloads).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ExportError;
    use assert_matches::assert_matches;
    use tempfile::tempdir;

    #[test]
    fn test_file_url_joins_with_single_slash() {
        assert_eq!(
            file_url(CLEANRL_HUMANOID_URL, "agent.pt"),
            "https://huggingface.co/cleanrl/Humanoid-v4-ppo_continuous_action-seed1/resolve/main/agent.pt"
        );
        assert_eq!(file_url("http://host/models", "a.pt"), "http://host/models/a.pt");
    }

    #[test]
    fn test_checkpoint_is_published() {
        assert!(CLEANRL_HUMANOID_FILES.contains(&"ppo_continuous_action.cleanrl_model"));
    }

    #[tokio::test]
    async fn test_unreachable_host_reports_every_file() -> std::io::Result<()> {
        let dir = tempdir()?;
        let outcomes = download_all("http://127.0.0.1:9/", &["a.pt", "b.pt"], dir.path())
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].file_name, "a.pt");
        for outcome in &outcomes {
            assert!(!outcome.is_ok());
            assert_matches!(outcome.result, Err(ExportError::Download(_)));
        }
        assert!(!dir.path().join("a.pt").exists());
        Ok(())
    }
}
