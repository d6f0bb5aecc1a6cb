use super::Workspace;
use crate::manifest::{Commands, Layout, Optimization};
use anyhow::{Context, Result};
use std::borrow::Cow;
use std::path::Path;
use waverun_core::{Action, Completion};

/// Quote a value for `sh` unless it only has safe characters
pub fn shell_quote(value: &str) -> Cow<'_, str> {
    let safe = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@,+%".contains(c));
    if safe {
        Cow::Borrowed(value)
    } else {
        Cow::Owned(format!("'{}'", value.replace('\'', r"'\''")))
    }
}

/// Replace `{name}` placeholders with shell-quoted values
pub fn substitute(template: &str, vars: &[(&str, String)]) -> String {
    vars.iter().fold(template.to_string(), |line, (name, value)| {
        line.replace(&format!("{{{}}}", name), &shell_quote(value))
    })
}

/// Run a command line through `sh -c` from `root`
pub async fn run_command(root: &Path, line: &str) -> Result<()> {
    tracing::debug!("$ {}", line);
    let output = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(line)
        .current_dir(root)
        .kill_on_drop(true)
        .output()
        .await
        .with_context(|| format!("failed to spawn `{}`", line))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("`{}` exited with {}: {}", line, output.status, stderr.trim());
    }
    Ok(())
}

/// External command leaf. `render` produces the command lines, which run
/// concurrently; the completion handle is signalled once all have exited.
pub fn command<F>(render: F) -> Action
where
    F: Fn(&Workspace) -> Result<Vec<String>> + Send + Sync + 'static,
{
    Action::callback(move |ctx, done| {
        let prepared = Workspace::from_context(&ctx)
            .and_then(|workspace| render(&workspace).map(|lines| (workspace, lines)));
        let (workspace, lines) = match prepared {
            Ok(prepared) => prepared,
            Err(error) => return Completion::Ready(Err(error)),
        };

        tokio::spawn(async move {
            let root = workspace.layout.root();
            let runs = lines.iter().map(|line| run_command(root, line));
            let result = futures::future::try_join_all(runs).await;
            done.finish(result.err());
        });
        Completion::Pending
    })
}

/// Leaf running one of the configured commands without placeholders
pub fn script(select: fn(&Commands) -> &str) -> Action {
    command(move |workspace| Ok(vec![select(&workspace.manifest.commands).to_string()]))
}

pub fn babel() -> Action {
    command(|workspace| {
        let bundle = workspace.layout.tmp_js().join(Layout::BUNDLE);
        let bundle = bundle.display().to_string();
        Ok(vec![substitute(
            &workspace.manifest.commands.babel,
            &[("input", bundle.clone()), ("output", bundle)],
        )])
    })
}

/// Minify the bundle and the template cache side by side
pub fn uglify() -> Action {
    command(|workspace| {
        let tmp = workspace.layout.tmp_js();
        Ok([Layout::BUNDLE, Layout::TEMPLATES]
            .iter()
            .map(|name| {
                substitute(
                    &workspace.manifest.commands.uglify,
                    &[
                        ("input", tmp.join(name).display().to_string()),
                        (
                            "output",
                            tmp.join(Optimization::Min.file_name(name))
                                .display()
                                .to_string(),
                        ),
                    ],
                )
            })
            .collect())
    })
}

/// Archive the minified mainnet output of a build
pub fn package(build: String) -> Action {
    command(move |workspace| {
        let source = workspace.layout.target(&build, "mainnet", Optimization::Min);
        let output = workspace
            .layout
            .dist()
            .join(workspace.manifest.archive_name(&build));
        Ok(vec![substitute(
            &workspace.manifest.commands.package,
            &[
                ("source", source.display().to_string()),
                ("output", output.display().to_string()),
            ],
        )])
    })
}
