//! Layered configuration.
//!
//! Values are merged from lowest to highest precedence:
//!
//! 1. built-in defaults ([`Config::default`])
//! 2. the user config `dllpack/dllpack.toml` in the platform config directory
//! 3. the project `dllpack.toml` (nearest ancestor of the working directory) or an
//!    explicit `--config` file
//! 4. `DLLPACK_*` environment variables
//! 5. command line flags, applied by the binary
//!
//! Each pipeline then receives an immutable record built from the merged values.

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, bail};
use etcetera::{BaseStrategy, choose_base_strategy};
use log::debug;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{
    error::{BuildError, BuildResult},
    transform::{JsxOptions, Pipeline, Style},
};

pub const CONFIG_FILE: &str = "dllpack.toml";
pub const ENV_LIBRARY: &str = "DLLPACK_LIBRARY";
pub const ENV_MANIFEST: &str = "DLLPACK_MANIFEST";
pub const ENV_OUTPUT_DIR: &str = "DLLPACK_OUTPUT_DIR";

/// Transform applied to files matched by a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Loader {
    /// JSX and ES2015 down-levelling
    Babel,
    /// Style sheet injection
    Style,
}

impl Loader {
    pub fn pipeline(self, jsx: &JsxOptions) -> Pipeline {
        match self {
            Self::Babel => Pipeline::babel(jsx),
            Self::Style => Pipeline::new().with(Style),
        }
    }
}

/// A rule as written in configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleSpec {
    pub test: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude: Option<String>,
    #[serde(rename = "use")]
    pub loader: Loader,
}

impl RuleSpec {
    pub fn new(test: &str, exclude: Option<&str>, loader: Loader) -> Self {
        Self {
            test: test.to_owned(),
            exclude: exclude.map(str::to_owned),
            loader,
        }
    }

    pub fn compile(&self) -> BuildResult<Rule> {
        let compile = |pattern: &str| {
            Regex::new(pattern)
                .map_err(|e| BuildError::config(format!("invalid rule pattern '{pattern}': {e}")))
        };
        Ok(Rule {
            test: compile(&self.test)?,
            exclude: self.exclude.as_deref().map(compile).transpose()?,
            loader: self.loader,
        })
    }
}

/// A compiled rule: files whose path matches `test` and not `exclude` go through `loader`
#[derive(Debug, Clone)]
pub struct Rule {
    pub test: Regex,
    pub exclude: Option<Regex>,
    pub loader: Loader,
}

impl Rule {
    /// `path` is matched with forward slashes
    pub fn matches(&self, path: &str) -> bool {
        self.test.is_match(path) && !self.exclude.as_ref().is_some_and(|ex| ex.is_match(path))
    }
}

/// Merged configuration for all commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Base directory for module keys and package lookup
    pub context: PathBuf,
    pub output_dir: PathBuf,
    pub manifest: PathBuf,

    pub vendor: Vec<String>,
    pub library: String,
    pub vendor_filename: String,
    pub vendor_rules: Vec<RuleSpec>,

    pub entry: PathBuf,
    pub bundle_filename: String,
    pub rules: Vec<RuleSpec>,
    /// Delegate manifest symbols to the vendor bundle
    pub use_manifest: bool,

    pub watch_dir: PathBuf,
    pub watch_out: PathBuf,
    pub watch_pattern: String,
    pub poll_interval: Duration,

    pub jsx: JsxOptions,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            context: PathBuf::from("."),
            output_dir: PathBuf::from("public"),
            manifest: PathBuf::from("manifest.json"),
            vendor: Vec::new(),
            library: "lib".to_owned(),
            vendor_filename: "[name].js".to_owned(),
            vendor_rules: Vec::new(),
            entry: PathBuf::from("app/main.js"),
            bundle_filename: "bundle.js".to_owned(),
            rules: vec![
                RuleSpec::new(r"\.jsx?$", Some("node_modules"), Loader::Babel),
                RuleSpec::new(r"\.css$", None, Loader::Style),
            ],
            use_manifest: true,
            watch_dir: PathBuf::from("js"),
            watch_out: PathBuf::from("js/min"),
            watch_pattern: "*.js".to_owned(),
            poll_interval: Duration::from_millis(250),
            jsx: JsxOptions::default(),
        }
    }
}

/// `dllpack.toml` as written on disk; every field is optional
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    context: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    manifest: Option<PathBuf>,
    #[serde(default)]
    vendor: RawVendor,
    #[serde(default)]
    build: RawBuild,
    #[serde(default)]
    watch: RawWatch,
    jsx: Option<RawJsx>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawVendor {
    packages: Option<Vec<String>>,
    library: Option<String>,
    filename: Option<String>,
    rules: Option<Vec<RuleSpec>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawBuild {
    entry: Option<PathBuf>,
    filename: Option<String>,
    rules: Option<Vec<RuleSpec>>,
    use_manifest: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawWatch {
    dir: Option<PathBuf>,
    out: Option<PathBuf>,
    pattern: Option<String>,
    interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawJsx {
    pragma: Option<String>,
    fragment: Option<String>,
}

impl Config {
    /// Merge defaults, config files and environment.
    ///
    /// `explicit` replaces the project config lookup and must exist.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(user) = user_config_path() {
            if user.is_file() {
                config.apply_file(&user)?;
            }
        }

        let project = match explicit {
            Some(path) => {
                if !path.is_file() {
                    bail!("config file not found: {}", path.display());
                }
                Some(path.to_path_buf())
            }
            None => {
                let cwd = std::env::current_dir().context("cannot read working directory")?;
                find_project_config(&cwd)
            }
        };
        if let Some(project) = project {
            config.apply_file(&project)?;
        }

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply one TOML file; relative paths in it are taken from the file's directory
    pub fn apply_file(&mut self, path: &Path) -> Result<()> {
        debug!("Loading configuration from {}", path.display());
        let text = fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        let raw: RawConfig = toml::from_str(&text)
            .with_context(|| format!("invalid config file {}", path.display()))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        self.apply_raw(raw, base);
        Ok(())
    }

    fn apply_raw(&mut self, raw: RawConfig, base: &Path) {
        let at = |path: PathBuf| base.join(path);

        if let Some(context) = raw.context {
            self.context = at(context);
        }
        if let Some(output_dir) = raw.output_dir {
            self.output_dir = at(output_dir);
        }
        if let Some(manifest) = raw.manifest {
            self.manifest = at(manifest);
        }

        let RawVendor {
            packages,
            library,
            filename,
            rules,
        } = raw.vendor;
        if let Some(packages) = packages {
            self.vendor = packages;
        }
        if let Some(library) = library {
            self.library = library;
        }
        if let Some(filename) = filename {
            self.vendor_filename = filename;
        }
        if let Some(rules) = rules {
            self.vendor_rules = rules;
        }

        if let Some(entry) = raw.build.entry {
            self.entry = at(entry);
        }
        if let Some(filename) = raw.build.filename {
            self.bundle_filename = filename;
        }
        if let Some(rules) = raw.build.rules {
            self.rules = rules;
        }
        if let Some(use_manifest) = raw.build.use_manifest {
            self.use_manifest = use_manifest;
        }

        if let Some(dir) = raw.watch.dir {
            self.watch_dir = at(dir);
        }
        if let Some(out) = raw.watch.out {
            self.watch_out = at(out);
        }
        if let Some(pattern) = raw.watch.pattern {
            self.watch_pattern = pattern;
        }
        if let Some(interval) = raw.watch.interval_ms {
            self.poll_interval = Duration::from_millis(interval);
        }

        if let Some(jsx) = raw.jsx {
            if let Some(pragma) = jsx.pragma {
                self.jsx.pragma = pragma;
            }
            if let Some(fragment) = jsx.fragment {
                self.jsx.fragment = fragment;
            }
        }
    }

    /// Apply `DLLPACK_*` variables read through `lookup`
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.is_empty());

        if let Some(library) = non_empty(ENV_LIBRARY) {
            debug!("{ENV_LIBRARY} overrides library name: {library}");
            self.library = library;
        }
        if let Some(manifest) = non_empty(ENV_MANIFEST) {
            debug!("{ENV_MANIFEST} overrides manifest path: {manifest}");
            self.manifest = PathBuf::from(manifest);
        }
        if let Some(output_dir) = non_empty(ENV_OUTPUT_DIR) {
            debug!("{ENV_OUTPUT_DIR} overrides output directory: {output_dir}");
            self.output_dir = PathBuf::from(output_dir);
        }
    }

    pub fn vendor_config(&self) -> BuildResult<VendorConfig> {
        Ok(VendorConfig {
            context: self.context.clone(),
            packages: self.vendor.clone(),
            library: self.library.clone(),
            output_dir: self.output_dir.clone(),
            filename: self.vendor_filename.clone(),
            manifest: self.manifest.clone(),
            rules: compile_rules(&self.vendor_rules)?,
            jsx: self.jsx.clone(),
        })
    }

    pub fn build_config(&self) -> BuildResult<BuildConfig> {
        Ok(BuildConfig {
            context: self.context.clone(),
            entry: self.entry.clone(),
            output_dir: self.output_dir.clone(),
            filename: self.bundle_filename.clone(),
            manifest: self.use_manifest.then(|| self.manifest.clone()),
            rules: compile_rules(&self.rules)?,
            jsx: self.jsx.clone(),
        })
    }

    pub fn watch_config(&self) -> WatchConfig {
        WatchConfig {
            dir: self.watch_dir.clone(),
            out_dir: self.watch_out.clone(),
            pattern: self.watch_pattern.clone(),
            interval: self.poll_interval,
            jsx: self.jsx.clone(),
        }
    }
}

fn compile_rules(rules: &[RuleSpec]) -> BuildResult<Vec<Rule>> {
    rules.iter().map(RuleSpec::compile).collect()
}

/// `dllpack/dllpack.toml` under the platform config directory
pub fn user_config_path() -> Option<PathBuf> {
    choose_base_strategy()
        .ok()
        .map(|strategy| strategy.config_dir().join("dllpack").join(CONFIG_FILE))
}

/// Nearest `dllpack.toml` in `start` or one of its ancestors
pub fn find_project_config(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(CONFIG_FILE))
        .find(|candidate| candidate.is_file())
}

/// Inputs of the vendor pipeline
#[derive(Debug, Clone)]
pub struct VendorConfig {
    pub context: PathBuf,
    pub packages: Vec<String>,
    pub library: String,
    pub output_dir: PathBuf,
    /// Template supporting `[name]` and `[hash]`
    pub filename: String,
    pub manifest: PathBuf,
    pub rules: Vec<Rule>,
    pub jsx: JsxOptions,
}

/// Inputs of the application build
#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub context: PathBuf,
    pub entry: PathBuf,
    pub output_dir: PathBuf,
    pub filename: String,
    /// Vendor manifest to delegate to, if any
    pub manifest: Option<PathBuf>,
    pub rules: Vec<Rule>,
    pub jsx: JsxOptions,
}

/// Inputs of the watch loop
#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub dir: PathBuf,
    pub out_dir: PathBuf,
    /// Glob matched against paths relative to `dir`
    pub pattern: String,
    pub interval: Duration,
    pub jsx: JsxOptions,
}
