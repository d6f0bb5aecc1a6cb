use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const DEFAULT_MANIFEST: &str = "waverun.toml";

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("failed to read manifest {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse manifest {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid manifest: {0}")]
    Invalid(String),
}

/// Build description loaded from `waverun.toml`.
///
/// Immutable once loaded; the pipeline builder derives every task from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildManifest {
    pub package: PackageInfo,

    #[serde(default = "default_builds")]
    pub builds: Vec<String>,

    #[serde(default = "default_optimizations")]
    pub optimizations: Vec<Optimization>,

    /// Per-network settings, keyed by configuration name
    #[serde(default)]
    pub configurations: BTreeMap<String, toml::Table>,

    #[serde(default)]
    pub vendors: Vec<String>,

    #[serde(default)]
    pub stylesheets: Vec<String>,

    #[serde(default)]
    pub copy_node_modules: Vec<String>,

    /// Files rewritten with the package version by `up-version-json`
    #[serde(default = "default_version_files")]
    pub version_files: Vec<String>,

    #[serde(default)]
    pub trading_view: TradingView,

    #[serde(default)]
    pub commands: Commands,

    #[serde(default)]
    pub upload: UploadConfig,

    #[serde(default)]
    pub runner: RunnerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Optimization {
    Normal,
    Min,
}

impl Optimization {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Min => "min",
        }
    }

    /// `bundle.js` becomes `bundle.min.js` for minified builds
    pub fn file_name(&self, name: &str) -> String {
        let stem = name.strip_suffix(".js").unwrap_or(name);
        match self {
            Self::Normal => format!("{stem}.js"),
            Self::Min => format!("{stem}.min.js"),
        }
    }
}

impl std::fmt::Display for Optimization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TradingView {
    #[serde(default)]
    pub domain: String,

    #[serde(default)]
    pub files: Vec<String>,
}

/// External command lines, run through `sh -c` from the project root.
///
/// `{name}` placeholders are substituted before the command runs. Downloads
/// and uploads go over HTTP and the object store unless a command is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commands {
    #[serde(default = "default_clean")]
    pub clean: String,

    #[serde(default = "default_less")]
    pub less: String,

    #[serde(default = "default_eslint")]
    pub eslint: String,

    #[serde(default = "default_babel")]
    pub babel: String,

    #[serde(default = "default_uglify")]
    pub uglify: String,

    /// Replaces the HTTP client, e.g. `curl -fsSL -o {output} {url}`
    #[serde(default)]
    pub download: Option<String>,

    #[serde(default = "default_package")]
    pub package: String,

    /// Replaces the object store client, e.g. `aws s3 sync {source} s3://{bucket}`
    #[serde(default)]
    pub upload: Option<String>,

    #[serde(default = "default_commit")]
    pub commit: String,
}

fn default_builds() -> Vec<String> {
    vec!["web".to_string(), "desktop".to_string()]
}

fn default_optimizations() -> Vec<Optimization> {
    vec![Optimization::Normal, Optimization::Min]
}

fn default_version_files() -> Vec<String> {
    vec!["src/desktop/package.json".to_string()]
}

fn default_clean() -> String {
    "sh scripts/clean.sh".to_string()
}

fn default_less() -> String {
    "sh scripts/less.sh".to_string()
}

fn default_eslint() -> String {
    "sh scripts/eslint.sh".to_string()
}

fn default_babel() -> String {
    "./node_modules/.bin/babel {input} -o {output}".to_string()
}

fn default_uglify() -> String {
    "./node_modules/.bin/uglifyjs {input} -o {output}".to_string()
}

fn default_package() -> String {
    "cd {source} && zip -qr {output} .".to_string()
}

fn default_commit() -> String {
    "git add . && git commit -m {message}".to_string()
}

impl Default for Commands {
    fn default() -> Self {
        Self {
            clean: default_clean(),
            less: default_less(),
            eslint: default_eslint(),
            babel: default_babel(),
            uglify: default_uglify(),
            download: None,
            package: default_package(),
            upload: None,
            commit: default_commit(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Target bucket per configuration name
    #[serde(default)]
    pub buckets: BTreeMap<String, String>,

    #[serde(default)]
    pub region: Option<String>,

    /// S3 compatible endpoint, e.g. a MinIO server
    #[serde(default)]
    pub endpoint: Option<String>,
}

/// Defaults for the run, overridable from the command line
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunnerConfig {
    #[serde(default)]
    pub concurrency: Option<usize>,

    #[serde(default)]
    pub fail_fast: Option<bool>,

    #[serde(default)]
    pub task_timeout_secs: Option<u64>,
}

impl BuildManifest {
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let manifest: Self = toml::from_str(&content).map_err(|source| ManifestError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        manifest.validate()?;

        tracing::debug!(
            "Loaded manifest for {} {} ({} configurations)",
            manifest.package.name,
            manifest.package.version,
            manifest.configurations.len()
        );
        Ok(manifest)
    }

    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.package.name.trim().is_empty() {
            return Err(ManifestError::Invalid("package name is empty".to_string()));
        }
        if self.package.version.trim().is_empty() {
            return Err(ManifestError::Invalid("package version is empty".to_string()));
        }
        if self.builds.is_empty() {
            return Err(ManifestError::Invalid("no builds listed".to_string()));
        }
        if self.optimizations.is_empty() {
            return Err(ManifestError::Invalid("no optimizations listed".to_string()));
        }
        if self.configurations.is_empty() {
            return Err(ManifestError::Invalid("no configurations defined".to_string()));
        }
        for bucket in self.upload.buckets.keys() {
            if !self.configurations.contains_key(bucket) {
                return Err(ManifestError::Invalid(format!(
                    "upload bucket '{}' has no matching configuration",
                    bucket
                )));
            }
        }
        Ok(())
    }

    /// `<pkg>-styles-<version>.css`
    pub fn css_name(&self) -> String {
        format!("{}-styles-{}.css", self.package.name, self.package.version)
    }

    /// `<pkg>-<build>-<config>-<version>[.min].js`
    pub fn bundle_name(&self, build: &str, config: &str, optimization: Optimization) -> String {
        optimization.file_name(&format!(
            "{}-{}-{}-{}.js",
            self.package.name, build, config, self.package.version
        ))
    }

    /// `<pkg>-<build>-v<version>.zip`
    pub fn archive_name(&self, build: &str) -> String {
        format!("{}-{}-v{}.zip", self.package.name, build, self.package.version)
    }

    pub fn is_desktop(build: &str) -> bool {
        build == "desktop"
    }
}

/// File system locations of a build, relative to the project root
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub const VENDORS: &'static str = "vendors.js";
    pub const BUNDLE: &'static str = "bundle.js";
    pub const TEMPLATES: &'static str = "templates.js";

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.root.join(relative)
    }

    pub fn src(&self) -> PathBuf {
        self.root.join("src")
    }

    pub fn dist(&self) -> PathBuf {
        self.root.join("dist")
    }

    pub fn tmp_js(&self) -> PathBuf {
        self.root.join("dist/tmp/js")
    }

    pub fn tmp_css(&self) -> PathBuf {
        self.root.join("dist/tmp/css")
    }

    pub fn trading_view(&self) -> PathBuf {
        self.root.join("dist/tmp/trading-view")
    }

    /// `dist/<build>/<config>/<optimization>`
    pub fn target(&self, build: &str, config: &str, optimization: Optimization) -> PathBuf {
        self.dist().join(build).join(config).join(optimization.as_str())
    }
}
