use super::{write_file, Variant, Workspace};
use anyhow::{Context, Result};
use waverun_core::{Action, TaskContext};

/// Fill the placeholders of `src/index.html` for one variant
pub fn render_index(template: &str, workspace: &Workspace, variant: &Variant) -> Result<String> {
    let config = workspace
        .manifest
        .configurations
        .get(&variant.config)
        .with_context(|| format!("unknown configuration '{}'", variant.config))?;

    let scripts = format!(
        "<script src=\"js/{}\"></script>",
        variant.bundle_name(workspace)
    );
    let styles = format!(
        "<link rel=\"stylesheet\" href=\"css/{}\">",
        workspace.manifest.css_name()
    );

    Ok(template
        .replace("{{scripts}}", &scripts)
        .replace("{{styles}}", &styles)
        .replace("{{connection}}", &variant.config)
        .replace("{{build}}", &variant.build)
        .replace("{{version}}", &workspace.manifest.package.version)
        .replace("{{config}}", &serde_json::to_string(config)?))
}

async fn html_variant(ctx: TaskContext, variant: Variant) -> Result<()> {
    let workspace = Workspace::from_context(&ctx)?;
    let index = workspace.layout.src().join("index.html");
    let template = tokio::fs::read_to_string(&index)
        .await
        .with_context(|| format!("failed to read {}", index.display()))?;
    let html = render_index(&template, &workspace, &variant)?;
    write_file(&variant.target(&workspace).join("index.html"), html).await?;
    tracing::debug!("Rendered index.html for {}", variant);
    Ok(())
}

pub fn html(variant: Variant) -> Action {
    Action::deferred(move |ctx| html_variant(ctx, variant.clone()))
}
