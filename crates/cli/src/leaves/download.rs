use super::{run_command, substitute, Workspace};
use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use waverun_core::{Action, Effect};

const DOWNLOAD_PARALLELISM: usize = 4;
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(120);

fn client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("waverun/", env!("CARGO_PKG_VERSION")))
        .timeout(DOWNLOAD_TIMEOUT)
        .build()
        .context("Failed to create HTTP client")
}

/// Stream the response body for `url` into `output`
async fn fetch(client: &reqwest::Client, url: &str, output: &Path) -> Result<u64> {
    let mut response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("request for {} failed", url))?
        .error_for_status()
        .with_context(|| format!("download of {} failed", url))?;

    let mut file = tokio::fs::File::create(output)
        .await
        .with_context(|| format!("failed to create {}", output.display()))?;
    let mut written = 0u64;
    while let Some(chunk) = response
        .chunk()
        .await
        .with_context(|| format!("failed to read body of {}", url))?
    {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(written)
}

async fn download(workspace: Arc<Workspace>, client: reqwest::Client, file: String) -> Result<Effect> {
    let url = format!(
        "{}/{}",
        workspace.manifest.trading_view.domain.trim_end_matches('/'),
        file
    );
    let output = workspace.layout.trading_view().join(&file);
    if let Some(parent) = output.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    match &workspace.manifest.commands.download {
        Some(template) => {
            let line = substitute(
                template,
                &[("url", url), ("output", output.display().to_string())],
            );
            run_command(workspace.layout.root(), &line).await?;
        }
        None => {
            let bytes = fetch(&client, &url, &output).await?;
            tracing::debug!("Fetched {} bytes from {}", bytes, url);
        }
    }

    tracing::info!("Download \"{}\" done", file);
    Ok(Effect::new(file))
}

/// Fetch the trading view assets, one effect per file
pub fn load_trading_view() -> Action {
    Action::stream(|ctx| {
        let prepared = Workspace::from_context(&ctx)
            .and_then(|workspace| client().map(|client| (workspace, client)));
        match prepared {
            Ok((workspace, client)) => {
                let files = workspace.manifest.trading_view.files.clone();
                stream::iter(files)
                    .map(move |file| download(workspace.clone(), client.clone(), file))
                    .buffer_unordered(DOWNLOAD_PARALLELISM)
                    .boxed()
            }
            Err(error) => stream::once(async move { Err::<Effect, _>(error) }).boxed(),
        }
    })
}
