//! Builds the task registry for a manifest.
//!
//! Every build × configuration × optimization combination is enumerated up
//! front, so the registry is complete before anything runs.

use crate::leaves::{self, Variant};
use crate::manifest::{BuildManifest, Optimization};
use waverun_core::{Action, Overwrite, Registry, Result, Task};

/// Task requested when none is named on the command line
pub const DEFAULT_TASK: &str = "all";

/// Substring selecting the variants grouped under `build-main`
const BUILD_MAIN_FILTER: &str = "build";

#[derive(Default)]
struct Groups {
    concat: Vec<String>,
    copy: Vec<String>,
    html: Vec<String>,
    zip: Vec<String>,
}

struct Builder {
    registry: Registry,
    dry_run: bool,
}

impl Builder {
    fn add(&mut self, name: &str, deps: &[&str], action: Action, description: &str) -> Result<()> {
        self.add_owned(
            name,
            deps.iter().map(|dep| dep.to_string()).collect(),
            action,
            description,
        )
    }

    fn add_owned(
        &mut self,
        name: &str,
        deps: Vec<String>,
        action: Action,
        description: &str,
    ) -> Result<()> {
        let action = if self.dry_run && !action.is_noop() {
            dry_run(action.style())
        } else {
            action
        };
        let task = Task::new(name, deps, action)?.with_description(description);
        self.registry.register_task(task, Overwrite::Deny)
    }
}

/// Logs what would run instead of touching the file system
fn dry_run(style: &'static str) -> Action {
    Action::sync(move |ctx| {
        tracing::info!("Would run '{}' ({} action)", ctx.task(), style);
        Ok(())
    })
}

/// Register every task the manifest describes.
///
/// With `dry_run` set, leaves are replaced by logging no-ops while the
/// graph stays identical.
pub fn build_registry(manifest: &BuildManifest, dry_run: bool) -> Result<Registry> {
    let mut b = Builder {
        registry: Registry::new(),
        dry_run,
    };
    let mut groups = Groups::default();

    b.add("clean", &[], leaves::script(|c| c.clean.as_str()), "Remove previous build output")?;
    b.add("eslint", &[], leaves::script(|c| c.eslint.as_str()), "Lint the sources")?;
    b.add("less", &[], leaves::script(|c| c.less.as_str()), "Compile stylesheets")?;
    b.add("templates", &[], leaves::templates(), "Build the angular template cache")?;
    b.add(
        "concat-style",
        &["less"],
        leaves::concat_stylesheets(),
        "Bundle the stylesheets",
    )?;
    b.add(
        "concat-develop-sources",
        &[],
        leaves::concat_develop_sources(),
        "Bundle the application sources",
    )?;
    b.add(
        "concat-develop-vendors",
        &[],
        leaves::concat_develop_vendors(),
        "Bundle the vendor scripts",
    )?;
    b.add(
        "concat-develop",
        &["concat-develop-sources", "concat-develop-vendors"],
        Action::Noop,
        "Development bundles",
    )?;
    b.add("babel", &["concat-develop"], leaves::babel(), "Transpile the bundle")?;
    b.add(
        "uglify",
        &["babel", "templates"],
        leaves::uglify(),
        "Minify the bundle and templates",
    )?;
    b.add(
        "load-trading-view",
        &[],
        leaves::load_trading_view(),
        "Download the trading view assets",
    )?;

    for build in &manifest.builds {
        for config in manifest.configurations.keys() {
            for &optimization in &manifest.optimizations {
                let variant = Variant::new(build, config, optimization);
                let concat = format!("concat-{}", variant);
                let copy = format!("copy-{}", variant);
                let html = format!("html-{}", variant);

                let compile = match optimization {
                    Optimization::Min => "uglify",
                    Optimization::Normal => "babel",
                };
                b.add(&concat, &[compile], leaves::concat(variant.clone()), "Assemble the bundle")?;

                let mut copy_deps = vec!["concat-style"];
                if variant.is_desktop() {
                    copy_deps.push("load-trading-view");
                }
                b.add(&copy, &copy_deps, leaves::copy(variant.clone()), "Copy static assets")?;

                b.add_owned(
                    &html,
                    vec![concat.clone(), copy.clone()],
                    leaves::html(variant),
                    "Render index.html",
                )?;

                groups.concat.push(concat);
                groups.copy.push(copy);
                groups.html.push(html);
            }
        }

        if manifest.configurations.contains_key("mainnet")
            && manifest
                .optimizations
                .contains(&Optimization::Min)
        {
            let suffix = format!("{}-mainnet-min", build);
            let zip = format!("zip-{}", build);
            b.add_owned(
                &zip,
                vec![
                    format!("concat-{}", suffix),
                    format!("html-{}", suffix),
                    format!("copy-{}", suffix),
                ],
                leaves::package(build.clone()),
                "Archive the mainnet release",
            )?;
            groups.zip.push(zip);
        }
    }

    b.add(
        "up-version-json",
        &[],
        leaves::up_version_json(),
        "Stamp the package version into JSON files and commit",
    )?;

    let mut uploads = Vec::new();
    for config in manifest.upload.buckets.keys() {
        let name = format!("s3-{}", config);
        b.add(&name, &[], leaves::upload(config.clone()), "Upload to the bucket")?;
        uploads.push(name);
    }
    b.add_owned("s3", uploads, Action::Noop, "Upload every configuration")?;

    let build_main: Vec<String> = groups
        .concat
        .iter()
        .chain(&groups.copy)
        .chain(&groups.html)
        .filter(|name| name.contains(BUILD_MAIN_FILTER))
        .cloned()
        .collect();
    b.add_owned("build-main", build_main, Action::Noop, "Variants matching 'build'")?;

    let mut concat = groups.concat;
    concat.push("concat-develop".to_string());
    b.add_owned("concat", concat, Action::Noop, "Every bundle")?;
    b.add_owned("copy", groups.copy, Action::Noop, "Every asset copy")?;
    b.add_owned("html", groups.html, Action::Noop, "Every index.html")?;
    b.add_owned("zip", groups.zip, Action::Noop, "Every release archive")?;
    b.add(
        DEFAULT_TASK,
        &["clean", "templates", "concat", "copy", "html", "zip"],
        Action::Noop,
        "Full build",
    )?;

    tracing::debug!("Registered {} tasks", b.registry.len());
    Ok(b.registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use waverun_core::{resolve, Resources, RunOptions, Runner, TaskName, TaskState};

    const MANIFEST: &str = r#"
[package]
name = "wallet"
version = "1.2.0"

[configurations.mainnet]
node = "https://nodes.example.com"

[configurations.testnet]
node = "https://testnet.example.com"

[upload.buckets]
mainnet = "wallet.example.com"
testnet = "testnet.wallet.example.com"
"#;

    fn manifest() -> BuildManifest {
        toml::from_str(MANIFEST).unwrap()
    }

    fn deps(registry: &Registry, name: &str) -> Vec<String> {
        registry
            .get(name)
            .unwrap()
            .dependencies
            .iter()
            .map(TaskName::to_string)
            .collect()
    }

    #[test]
    fn test_variant_tasks() {
        let registry = build_registry(&manifest(), false).unwrap();

        assert_eq!(deps(&registry, "concat-web-mainnet-min"), vec!["uglify"]);
        assert_eq!(deps(&registry, "concat-web-testnet-normal"), vec!["babel"]);
        assert_eq!(deps(&registry, "copy-web-mainnet-min"), vec!["concat-style"]);
        assert_eq!(
            deps(&registry, "copy-desktop-testnet-normal"),
            vec!["concat-style", "load-trading-view"]
        );
        assert_eq!(
            deps(&registry, "html-desktop-mainnet-min"),
            vec!["concat-desktop-mainnet-min", "copy-desktop-mainnet-min"]
        );
        assert_eq!(
            deps(&registry, "zip-web"),
            vec!["concat-web-mainnet-min", "html-web-mainnet-min", "copy-web-mainnet-min"]
        );
        assert_eq!(deps(&registry, "s3"), vec!["s3-mainnet", "s3-testnet"]);
        assert_eq!(deps(&registry, "html").len(), 8);
        assert!(deps(&registry, "concat").contains(&"concat-develop".to_string()));
        assert!(deps(&registry, "build-main").is_empty());
    }

    #[test]
    fn test_no_zip_without_mainnet() {
        let mut manifest = manifest();
        manifest.configurations.remove("mainnet");
        manifest.upload.buckets.clear();

        let registry = build_registry(&manifest, false).unwrap();
        assert!(!registry.contains("zip-web"));
        assert!(deps(&registry, "zip").is_empty());
        assert!(registry.contains("html-web-testnet-min"));
    }

    #[test]
    fn test_all_resolves_in_dependency_order() {
        let registry = build_registry(&manifest(), false).unwrap();
        let plan = resolve(&registry, &[DEFAULT_TASK]).unwrap();

        let wave = |name: &str| plan.wave_of(name).unwrap();
        assert!(wave("less") < wave("concat-style"));
        assert!(wave("concat-develop") < wave("babel"));
        assert!(wave("uglify") < wave("concat-web-mainnet-min"));
        assert!(wave("html-web-mainnet-min") < wave("zip-web"));
        assert_eq!(wave("all"), plan.waves().len() - 1);
        // `all` does not reach uploads or version bumps
        assert!(!plan.contains("s3"));
        assert!(!plan.contains("up-version-json"));
        assert!(!plan.contains("eslint"));
    }

    #[test]
    fn test_dry_run_keeps_graph() {
        let manifest = manifest();
        let real = build_registry(&manifest, false).unwrap();
        let dry = build_registry(&manifest, true).unwrap();

        let real_names: Vec<_> = real.list().cloned().collect();
        let dry_names: Vec<_> = dry.list().cloned().collect();
        assert_eq!(real_names, dry_names);
        assert!(dry.get("concat").unwrap().action.is_noop());
        assert_eq!(dry.get("babel").unwrap().action.style(), "sync");
        assert_eq!(real.get("babel").unwrap().action.style(), "callback");
    }

    #[tokio::test]
    async fn test_dry_run_all() {
        let registry = build_registry(&manifest(), true).unwrap();
        let total = resolve(&registry, &[DEFAULT_TASK]).unwrap().len();

        // Dry-run leaves never touch the workspace
        let runner = Runner::new(registry).with_resources(Resources::new());
        let report = runner
            .run(&[DEFAULT_TASK], RunOptions::default().with_concurrency(4))
            .await
            .unwrap();

        assert!(report.is_success());
        assert_eq!(report.summary().succeeded, total);
        assert_eq!(report.status("zip-desktop"), Some(TaskState::Succeeded));
    }
}
