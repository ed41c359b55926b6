//! Application bundling.
//!
//! Starting from the entry file, every static import and literal `require` is
//! resolved. Requests that the vendor manifest knows about become small delegating
//! modules (`module.exports = lib("lib.3")`); everything else is read, run through
//! the matching loader rules and linked into the bundle.

use std::{
    collections::VecDeque,
    fs,
    path::{Path, PathBuf},
};

use cow_utils::CowUtils;
use indexmap::IndexMap;
use log::{debug, info, trace, warn};

use crate::{
    config::{BuildConfig, Loader, Rule},
    error::{BuildError, BuildResult},
    graph::{ModuleGraph, ModuleId},
    linker::{collect_requests, link_module},
    manifest::Manifest,
    output::{expand_filename, write_atomic},
    resolver::{ModuleResolver, Resolution},
    runtime::{BundleModule, delegated_body, render_application},
    transform::{JsxOptions, Transform, style::json_module},
};

/// Name substituted for `[name]` in the application bundle filename
pub const APPLICATION_NAME: &str = "main";

/// Result of an application build
#[derive(Debug, Clone)]
pub struct BuildOutput {
    pub bundle_path: PathBuf,
    /// Modules compiled into the bundle
    pub local_modules: usize,
    /// Modules forwarded to the vendor bundle
    pub delegated_modules: usize,
}

/// A module source after loader rules, ready for linking
#[derive(Debug)]
pub(crate) struct LoadedSource {
    pub(crate) code: String,
    pub(crate) uses_style: bool,
}

/// Read `path` and apply every matching rule in order. JSON files become modules
/// exporting their value.
pub(crate) fn load_source(
    path: &Path,
    rules: &[Rule],
    jsx: &JsxOptions,
) -> BuildResult<LoadedSource> {
    let text = fs::read_to_string(path).map_err(|e| BuildError::io(path, e))?;
    let path_key = path.to_string_lossy();
    let path_key = path_key.cow_replace('\\', "/");

    if path_key.ends_with(".json") {
        let code = json_module(&text).map_err(|e| BuildError::transform(path, e))?;
        return Ok(LoadedSource {
            code,
            uses_style: false,
        });
    }

    let mut code = text;
    let mut uses_style = false;
    for rule in rules.iter().filter(|rule| rule.matches(&path_key)) {
        trace!("Applying {:?} loader to {path_key}", rule.loader);
        uses_style |= rule.loader == Loader::Style;
        code = rule
            .loader
            .pipeline(jsx)
            .apply(&code)
            .map_err(|e| BuildError::transform(path, e))?;
    }
    Ok(LoadedSource { code, uses_style })
}

/// Log every import cycle of `graph`
pub(crate) fn warn_cycles(graph: &ModuleGraph) {
    for cycle in graph.cycles() {
        let members: Vec<&str> = cycle.iter().filter_map(|&id| graph.key_of(id)).collect();
        warn!("Circular dependency between modules: {}", members.join(" -> "));
    }
}

#[derive(Debug)]
enum Pending {
    Local(PathBuf),
    Delegated { library: String, id: String },
}

/// Bundle the application described by `config` and write it to disk
pub fn build_application(config: &BuildConfig) -> BuildResult<BuildOutput> {
    let manifest = config
        .manifest
        .as_deref()
        .map(Manifest::load)
        .transpose()?;
    if !config.entry.is_file() {
        return Err(BuildError::config(format!(
            "entry file not found: {}",
            config.entry.display()
        )));
    }

    let mut resolver = ModuleResolver::new(&config.context);
    let entry = resolver.absolute(&config.entry);
    info!("Building {}", entry.display());

    let mut graph = ModuleGraph::new();
    let mut queue = VecDeque::new();
    let (entry_id, _) = graph.add_module(&resolver.context_relative(&entry));
    queue.push_back((entry_id, Pending::Local(entry)));

    let mut modules = Vec::new();
    let mut uses_style = false;
    let mut delegated_modules = 0;

    while let Some((id, pending)) = queue.pop_front() {
        let label = graph.key_of(id).unwrap_or_default().to_owned();
        let body = match pending {
            Pending::Delegated { library, id } => {
                delegated_modules += 1;
                delegated_body(&library, &id)
            }
            Pending::Local(path) => {
                let loaded = load_source(&path, &config.rules, &config.jsx)?;
                uses_style |= loaded.uses_style;

                let requests =
                    collect_requests(&loaded.code).map_err(|e| BuildError::transform(&path, e))?;
                let mut ids = IndexMap::new();
                for request in requests {
                    let resolution = resolver.resolve(&request, &path, manifest.as_ref())?;
                    let dependency = match resolution {
                        Resolution::External {
                            library,
                            id: vendor_id,
                        } => {
                            let key = format!("{library}(\"{vendor_id}\")");
                            enqueue(&mut graph, &mut queue, &key, || Pending::Delegated {
                                library,
                                id: vendor_id,
                            })
                        }
                        Resolution::Local { path } => {
                            let key = resolver.context_relative(&path);
                            enqueue(&mut graph, &mut queue, &key, || Pending::Local(path))
                        }
                    };
                    graph.add_dependency(id, dependency);
                    ids.insert(request, dependency.to_string());
                }

                link_module(&loaded.code, &ids).map_err(|e| BuildError::transform(&path, e))?
            }
        };
        debug!("Bundled module {id}: {label}");
        modules.push(BundleModule {
            id: id.to_string(),
            label,
            body,
        });
    }

    warn_cycles(&graph);

    let bundle = render_application(&modules, &entry_id.to_string(), uses_style);
    let filename = expand_filename(&config.filename, APPLICATION_NAME, &bundle);
    let bundle_path = config.output_dir.join(filename);
    write_atomic(&bundle_path, &bundle)?;

    let output = BuildOutput {
        bundle_path,
        local_modules: modules.len() - delegated_modules,
        delegated_modules,
    };
    info!(
        "Wrote {} ({} modules, {} delegated)",
        output.bundle_path.display(),
        output.local_modules,
        output.delegated_modules
    );
    Ok(output)
}

fn enqueue(
    graph: &mut ModuleGraph,
    queue: &mut VecDeque<(ModuleId, Pending)>,
    key: &str,
    pending: impl FnOnce() -> Pending,
) -> ModuleId {
    let (id, is_new) = graph.add_module(key);
    if is_new {
        queue.push_back((id, pending()));
    }
    id
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::config::{Loader, RuleSpec};

    fn create_test_file(path: &Path, content: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(path, content).expect("write file");
    }

    fn build_config(root: &Path, manifest: Option<PathBuf>) -> BuildConfig {
        BuildConfig {
            context: root.to_path_buf(),
            entry: root.join("app/main.js"),
            output_dir: root.join("public"),
            filename: "bundle.js".to_owned(),
            manifest,
            rules: vec![
                RuleSpec::new(r"\.jsx?$", Some("node_modules"), Loader::Babel)
                    .compile()
                    .expect("rule"),
                RuleSpec::new(r"\.css$", None, Loader::Style)
                    .compile()
                    .expect("rule"),
            ],
            jsx: JsxOptions::default(),
        }
    }

    #[test]
    fn test_bundle_links_local_modules_in_discovery_order() {
        let temp_dir = TempDir::new().expect("temp dir");
        let root = temp_dir.path();
        create_test_file(
            &root.join("app/main.js"),
            "import greet from './greet';\nimport './site.css';\nconst data = require('./data.json');\ngreet(data.name);\n",
        );
        create_test_file(
            &root.join("app/greet.js"),
            "export default (name) => `hi ${name}`;\n",
        );
        create_test_file(&root.join("app/site.css"), "body { margin: 0; }");
        create_test_file(&root.join("app/data.json"), "{\"name\": \"dll\"}");

        let output = build_application(&build_config(root, None)).expect("build");
        assert_eq!(output.local_modules, 4);
        assert_eq!(output.delegated_modules, 0);

        let bundle = fs::read_to_string(&output.bundle_path).expect("read bundle");
        assert!(bundle.contains("/* ./app/main.js */\n0: function"));
        assert!(bundle.contains("/* ./app/greet.js */\n1: function"));
        assert!(bundle.contains("/* ./app/site.css */\n2: function"));
        assert!(bundle.contains("/* ./app/data.json */\n3: function"));
        assert!(bundle.contains("var greet = __dllpack_require__.interop(__dllpack_require__(1));"));
        assert!(bundle.contains("var data = __dllpack_require__(3);"));
        assert!(bundle.contains("exports[\"default\"] = function (name) { return (\"hi \" + (name)); };"));
        assert!(bundle.contains("__dllpack_require__.style(\"body { margin: 0; }\")"));
        assert!(bundle.contains("__dllpack_require__.style = function (css)"));
        assert!(bundle.contains("module.exports = {\"name\": \"dll\"};"));
    }

    #[test]
    fn test_cycles_are_bundled() {
        let temp_dir = TempDir::new().expect("temp dir");
        let root = temp_dir.path();
        create_test_file(&root.join("app/main.js"), "require('./a');\n");
        create_test_file(&root.join("app/a.js"), "exports.b = require('./b');\n");
        create_test_file(&root.join("app/b.js"), "exports.a = require('./a');\n");

        let output = build_application(&build_config(root, None)).expect("build");
        assert_eq!(output.local_modules, 3);
    }

    #[test]
    fn test_unresolved_import_aborts_without_output() {
        let temp_dir = TempDir::new().expect("temp dir");
        let root = temp_dir.path();
        create_test_file(&root.join("app/main.js"), "import x from 'missing-pkg';\n");

        let err = build_application(&build_config(root, None)).expect_err("unresolved");
        assert!(err.is_resolution());
        assert!(!root.join("public/bundle.js").exists());
    }

    #[test]
    fn test_transform_error_names_file() {
        let temp_dir = TempDir::new().expect("temp dir");
        let root = temp_dir.path();
        create_test_file(&root.join("app/main.js"), "var s = 'unterminated;\n");

        let err = build_application(&build_config(root, None)).expect_err("syntax error");
        assert!(matches!(err, BuildError::Transform { .. }));
        assert!(err.to_string().contains("main.js"), "{err}");
    }

    #[test]
    fn test_missing_entry_is_config_error() {
        let temp_dir = TempDir::new().expect("temp dir");
        let err = build_application(&build_config(temp_dir.path(), None)).expect_err("no entry");
        assert!(err.is_config());
    }
}
