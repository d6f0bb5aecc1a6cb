use super::{files_with_extension, write_file, Variant, Workspace};
use crate::manifest::Layout;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use waverun_core::{Action, TaskContext};

/// Concatenate `inputs` into `output`, separated by newlines
pub async fn concat_files(inputs: &[PathBuf], output: &Path) -> Result<usize> {
    let mut parts = Vec::with_capacity(inputs.len());
    for input in inputs {
        let content = tokio::fs::read_to_string(input)
            .await
            .with_context(|| format!("failed to read {}", input.display()))?;
        parts.push(content);
    }
    write_file(output, parts.join("\n")).await?;
    Ok(inputs.len())
}

async fn concat_sources(ctx: TaskContext) -> Result<()> {
    let workspace = Workspace::from_context(&ctx)?;
    let src = workspace.layout.src();
    let sources = tokio::task::spawn_blocking(move || files_with_extension(&src, &["js"]))
        .await
        .context("source listing was interrupted")?;
    let output = workspace.layout.tmp_js().join(Layout::BUNDLE);
    let count = concat_files(&sources, &output).await?;
    tracing::debug!("Bundled {} sources into {}", count, output.display());
    Ok(())
}

async fn concat_vendors(ctx: TaskContext) -> Result<()> {
    let workspace = Workspace::from_context(&ctx)?;
    let vendors: Vec<PathBuf> = workspace
        .manifest
        .vendors
        .iter()
        .map(|path| workspace.layout.path(path))
        .collect();
    concat_files(&vendors, &workspace.layout.tmp_js().join(Layout::VENDORS)).await?;
    Ok(())
}

async fn concat_style(ctx: TaskContext) -> Result<()> {
    let workspace = Workspace::from_context(&ctx)?;
    let mut inputs: Vec<PathBuf> = workspace
        .manifest
        .stylesheets
        .iter()
        .map(|path| workspace.layout.path(path))
        .collect();
    inputs.push(workspace.layout.tmp_css().join("style.css"));
    let output = workspace.layout.tmp_css().join(workspace.manifest.css_name());
    concat_files(&inputs, &output).await?;
    Ok(())
}

async fn concat_variant(ctx: TaskContext, variant: Variant) -> Result<()> {
    let workspace = Workspace::from_context(&ctx)?;
    let tmp = workspace.layout.tmp_js();
    let inputs = [
        tmp.join(Layout::VENDORS),
        tmp.join(variant.optimization.file_name(Layout::BUNDLE)),
        tmp.join(variant.optimization.file_name(Layout::TEMPLATES)),
    ];
    let output = variant
        .target(&workspace)
        .join("js")
        .join(variant.bundle_name(&workspace));
    concat_files(&inputs, &output).await?;

    if variant.is_desktop() {
        let bundle = tokio::fs::read_to_string(&output)
            .await
            .with_context(|| format!("failed to read {}", output.display()))?;
        write_file(&output, wrap_desktop(&bundle)).await?;
    }
    Ok(())
}

/// Hide the CommonJS `module` global from browser bundles run under Electron
pub fn wrap_desktop(bundle: &str) -> String {
    format!("(function () {{\nvar module = undefined;\n{}}})();", bundle)
}

pub fn concat_develop_sources() -> Action {
    Action::deferred(concat_sources)
}

pub fn concat_develop_vendors() -> Action {
    Action::deferred(concat_vendors)
}

pub fn concat_stylesheets() -> Action {
    Action::deferred(concat_style)
}

pub fn concat(variant: Variant) -> Action {
    Action::deferred(move |ctx| concat_variant(ctx, variant.clone()))
}
