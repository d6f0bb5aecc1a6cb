use super::{files_with_extension, slash_path, Workspace};
use crate::manifest::Layout;
use anyhow::{Context, Result};
use std::path::Path;
use waverun_core::Action;

/// Module name used for the generated template cache
pub const TEMPLATES_MODULE: &str = "app.templates";

/// Collapse whitespace runs and drop whitespace between tags
pub fn collapse_whitespace(html: &str) -> String {
    html.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace("> <", "><")
}

fn js_string(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('\'', "\\'")
        .replace('\r', "\\r")
        .replace('\n', "\\n")
}

/// Build the angular template cache from every HTML file in a
/// subdirectory of `src`
pub fn template_cache(src: &Path) -> Result<String> {
    let mut puts = Vec::new();
    for path in files_with_extension(src, &["html"]) {
        let relative = path.strip_prefix(src).unwrap_or(&path);
        if relative.components().count() < 2 {
            continue;
        }
        let html = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        puts.push(format!(
            "$templateCache.put('{}','{}');",
            js_string(&slash_path(relative)),
            js_string(&collapse_whitespace(&html))
        ));
    }

    Ok(format!(
        "angular.module('{}').run(['$templateCache', function($templateCache) {{{}}}]);",
        TEMPLATES_MODULE,
        puts.join("")
    ))
}

pub fn templates() -> Action {
    Action::sync(|ctx| {
        let workspace = Workspace::from_context(ctx)?;
        let cache = template_cache(&workspace.layout.src())?;
        let output = workspace.layout.tmp_js().join(Layout::TEMPLATES);
        std::fs::create_dir_all(workspace.layout.tmp_js())?;
        std::fs::write(&output, cache)
            .with_context(|| format!("failed to write {}", output.display()))
    })
}
