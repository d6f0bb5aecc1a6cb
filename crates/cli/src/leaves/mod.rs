//! Leaf actions of the asset pipeline.
//!
//! Every leaf fetches the [`Workspace`] from the task's resources, so the
//! same action values work against any project root.

mod assets;
mod command;
mod concat;
mod download;
mod html;
mod templates;
mod upload;
mod version;

pub use assets::{copy, copy_path, copy_variant};
pub use command::{babel, command, package, run_command, script, shell_quote, substitute, uglify};
pub use concat::{
    concat, concat_develop_sources, concat_develop_vendors, concat_files, concat_stylesheets,
    wrap_desktop,
};
pub use download::load_trading_view;
pub use html::{html, render_index};
pub use templates::{collapse_whitespace, template_cache, templates, TEMPLATES_MODULE};
pub use upload::{upload, BucketOpener, Buckets, S3Buckets};
pub use version::up_version_json;

use crate::manifest::{BuildManifest, Layout, Optimization};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;
use waverun_core::TaskContext;

/// Project collaborators handed to leaves through [`waverun_core::Resources`]
#[derive(Debug, Clone)]
pub struct Workspace {
    pub manifest: Arc<BuildManifest>,
    pub layout: Layout,
}

impl Workspace {
    pub fn new(manifest: BuildManifest, root: impl Into<PathBuf>) -> Self {
        Self {
            manifest: Arc::new(manifest),
            layout: Layout::new(root),
        }
    }

    fn from_context(ctx: &TaskContext) -> Result<Arc<Self>> {
        ctx.resources().require::<Self>()
    }
}

/// One build variant: `<build>-<config>-<optimization>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    pub build: String,
    pub config: String,
    pub optimization: Optimization,
}

impl Variant {
    pub fn new(build: impl Into<String>, config: impl Into<String>, optimization: Optimization) -> Self {
        Self {
            build: build.into(),
            config: config.into(),
            optimization,
        }
    }

    pub fn is_desktop(&self) -> bool {
        BuildManifest::is_desktop(&self.build)
    }

    fn target(&self, workspace: &Workspace) -> PathBuf {
        workspace
            .layout
            .target(&self.build, &self.config, self.optimization)
    }

    fn bundle_name(&self, workspace: &Workspace) -> String {
        workspace
            .manifest
            .bundle_name(&self.build, &self.config, self.optimization)
    }
}

impl std::fmt::Display for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}-{}", self.build, self.config, self.optimization)
    }
}

async fn write_file(path: &Path, content: impl AsRef<[u8]>) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    tokio::fs::write(path, content)
        .await
        .with_context(|| format!("failed to write {}", path.display()))
}

/// Every file below `dir`, sorted
fn files_under(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    files
}

/// Files below `dir` with one of `extensions`, in a stable order
fn files_with_extension(dir: &Path, extensions: &[&str]) -> Vec<PathBuf> {
    files_under(dir)
        .into_iter()
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| extensions.contains(&ext))
                .unwrap_or(false)
        })
        .collect()
}

/// `/`-joined form of a relative path, independent of the platform separator
fn slash_path(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use waverun_core::{Action, Registry, Resources, RunOptions, RunReport, Runner};

    pub const MANIFEST: &str = r#"
stylesheets = ["vendor/base.css"]
vendors = ["vendor/angular.js"]

[package]
name = "wallet"
version = "1.2.0"

[configurations.mainnet]
node = "https://nodes.example.com"

[trading_view]
domain = "https://tv.example.com/"
files = ["charts/a.js", "b.css"]

[upload.buckets]
mainnet = "wallet.example.com"

[commands]
commit = "true {message}"
"#;

    pub fn workspace(root: &Path) -> Workspace {
        let manifest: BuildManifest = toml::from_str(MANIFEST).unwrap();
        Workspace::new(manifest, root)
    }

    pub fn edit(workspace: &mut Workspace, change: impl FnOnce(&mut BuildManifest)) {
        let mut manifest = (*workspace.manifest).clone();
        change(&mut manifest);
        workspace.manifest = Arc::new(manifest);
    }

    pub fn write(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    pub async fn run_with(resources: Resources, action: Action) -> RunReport {
        let mut registry = Registry::new();
        registry.register("leaf", Vec::<String>::new(), action).unwrap();
        Runner::new(registry)
            .with_resources(resources)
            .run(&["leaf"], RunOptions::default().with_concurrency(1))
            .await
            .unwrap()
    }

    pub async fn run_leaf(workspace: Workspace, action: Action) -> RunReport {
        run_with(Resources::new().with(workspace), action).await
    }
}
