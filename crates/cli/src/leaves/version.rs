use super::{run_command, substitute, write_file, Workspace};
use anyhow::{Context, Result};
use waverun_core::{Action, TaskContext};

async fn bump_versions(ctx: TaskContext) -> Result<()> {
    let workspace = Workspace::from_context(&ctx)?;
    let version = &workspace.manifest.package.version;
    tracing::info!("New version: {}", version);

    for file in &workspace.manifest.version_files {
        let path = workspace.layout.path(file);
        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let mut json: serde_json::Value = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        let object = json
            .as_object_mut()
            .with_context(|| format!("{} is not a JSON object", path.display()))?;
        object.insert(
            "version".to_string(),
            serde_json::Value::String(version.clone()),
        );
        write_file(&path, serde_json::to_string_pretty(&json)?).await?;
    }

    let line = substitute(
        &workspace.manifest.commands.commit,
        &[("message", format!("{} for other json files", version))],
    );
    run_command(workspace.layout.root(), &line).await
}

/// Stamp the package version into the listed JSON files and commit them
pub fn up_version_json() -> Action {
    Action::deferred(bump_versions)
}
