use super::{files_with_extension, slash_path, Variant, Workspace};
use anyhow::{Context, Result};
use std::path::Path;
use walkdir::WalkDir;
use waverun_core::Action;

/// Copy a file or a directory tree, returning the number of files copied
pub fn copy_path(from: &Path, to: &Path) -> Result<usize> {
    let metadata = std::fs::metadata(from)
        .with_context(|| format!("cannot copy missing {}", from.display()))?;

    if metadata.is_file() {
        if let Some(parent) = to.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(from, to)
            .with_context(|| format!("failed to copy {} to {}", from.display(), to.display()))?;
        return Ok(1);
    }

    let mut copied = 0;
    for entry in WalkDir::new(from) {
        let entry = entry?;
        let relative = entry.path().strip_prefix(from)?;
        let destination = to.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&destination)?;
        } else {
            std::fs::copy(entry.path(), &destination).with_context(|| {
                format!("failed to copy {}", entry.path().display())
            })?;
            copied += 1;
        }
    }
    Ok(copied)
}

/// Image paths relative to the build output, e.g. `/img/logo.svg`
fn image_list(src: &Path) -> Vec<String> {
    files_with_extension(&src.join("img"), &["png", "svg", "jpg"])
        .iter()
        .filter_map(|path| path.strip_prefix(src).ok())
        .map(|relative| format!("/{}", slash_path(relative)))
        .collect()
}

pub fn copy_variant(workspace: &Workspace, variant: &Variant) -> Result<usize> {
    let layout = &workspace.layout;
    let src = layout.src();
    let target = variant.target(workspace);
    let css_name = workspace.manifest.css_name();
    let mut copied = 0;

    for json in files_with_extension(&src, &["json"]) {
        let relative = json.strip_prefix(&src)?;
        copied += copy_path(&json, &target.join(relative))?;
    }

    let mut pairs = vec![
        (src.join("fonts"), target.join("fonts")),
        (src.join("img"), target.join("img")),
        (layout.tmp_css().join(&css_name), target.join("css").join(&css_name)),
        (layout.path("LICENSE"), target.join("LICENSE")),
    ];
    for module in &workspace.manifest.copy_node_modules {
        pairs.push((layout.path(module), target.join(module)));
    }
    if variant.is_desktop() {
        pairs.push((layout.path("electron/main.js"), target.join("main.js")));
        pairs.push((layout.path("electron/package.json"), target.join("package.json")));
        pairs.push((layout.path("electron/icons/icon.png"), target.join("img/icon.png")));
        pairs.push((layout.trading_view(), target.join("trading-view")));
    }

    for (from, to) in &pairs {
        copied += copy_path(from, to)?;
    }

    let images = serde_json::to_string(&image_list(&src))?;
    std::fs::create_dir_all(target.join("img"))?;
    std::fs::write(target.join("img/images-list.json"), images)?;

    Ok(copied)
}

pub fn copy(variant: Variant) -> Action {
    Action::sync(move |ctx| {
        let workspace = Workspace::from_context(ctx)?;
        let copied = copy_variant(&workspace, &variant)?;
        tracing::debug!("Copied {} files for {}", copied, variant);
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::*;
    use super::*;
    use crate::manifest::Optimization;
    use waverun_core::TaskState;

    fn web_sources(root: &Path) {
        write(root, "src/locales/en.json", "{}");
        write(root, "src/fonts/roboto.woff", "font");
        write(root, "src/img/logo.svg", "<svg/>");
        write(root, "src/img/icons/a.png", "png");
        write(root, "dist/tmp/css/wallet-styles-1.2.0.css", "body{}");
        write(root, "LICENSE", "MIT");
    }

    #[tokio::test]
    async fn test_copy_web_variant() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        web_sources(root);

        let variant = Variant::new("web", "mainnet", Optimization::Normal);
        let report = run_leaf(workspace(root), copy(variant)).await;
        assert!(report.is_success(), "{:?}", report.error("leaf"));

        let target = root.join("dist/web/mainnet/normal");
        assert!(target.join("locales/en.json").is_file());
        assert!(target.join("fonts/roboto.woff").is_file());
        assert!(target.join("css/wallet-styles-1.2.0.css").is_file());
        assert!(target.join("LICENSE").is_file());
        let images: Vec<String> = serde_json::from_str(
            &std::fs::read_to_string(target.join("img/images-list.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(images, vec!["/img/icons/a.png", "/img/logo.svg"]);
    }

    #[tokio::test]
    async fn test_copy_desktop_needs_electron_files() {
        let dir = tempfile::tempdir().unwrap();
        web_sources(dir.path());

        let variant = Variant::new("desktop", "mainnet", Optimization::Min);
        let report = run_leaf(workspace(dir.path()), copy(variant)).await;
        assert_eq!(report.status("leaf"), Some(TaskState::Failed));
        let message = report.error("leaf").unwrap().to_string();
        assert!(message.contains("electron"), "{message}");
    }
}
