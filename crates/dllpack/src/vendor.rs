//! Vendor (DLL) bundle builder.
//!
//! Compiles a fixed list of packages and everything they pull in into one library
//! bundle, and records the id of each package and module file in the manifest that
//! application builds delegate to.

use std::{collections::VecDeque, path::PathBuf};

use indexmap::{IndexMap, IndexSet};
use log::{debug, info};

use crate::{
    bundler::{load_source, warn_cycles},
    config::VendorConfig,
    error::{BuildError, BuildResult},
    graph::{ModuleGraph, ModuleId},
    js::{is_identifier_name, is_keyword},
    linker::{collect_requests, link_module},
    manifest::Manifest,
    output::{expand_filename, write_atomic},
    resolver::ModuleResolver,
    runtime::{BundleModule, render_library},
};

/// Result of a vendor build
#[derive(Debug, Clone)]
pub struct VendorOutput {
    pub bundle_path: PathBuf,
    pub manifest_path: PathBuf,
    pub manifest: Manifest,
}

/// Id of a vendor module as written in the manifest: `lib.3`
fn vendor_id(library: &str, id: ModuleId) -> String {
    format!("{library}.{id}")
}

fn validate(config: &VendorConfig) -> BuildResult<()> {
    if config.packages.is_empty() {
        return Err(BuildError::config("vendor package list is empty"));
    }
    let mut seen = IndexSet::new();
    for package in &config.packages {
        if !seen.insert(package.as_str()) {
            return Err(BuildError::config(format!(
                "vendor package '{package}' is listed twice"
            )));
        }
    }
    if !is_identifier_name(&config.library) || is_keyword(&config.library) {
        return Err(BuildError::config(format!(
            "library name '{}' is not a valid JavaScript identifier",
            config.library
        )));
    }
    Ok(())
}

/// Build the vendor bundle and its manifest. Nothing is written unless every package
/// and every module they require resolves and compiles.
pub fn build_vendor(config: &VendorConfig) -> BuildResult<VendorOutput> {
    validate(config)?;
    let library = config.library.as_str();
    let mut resolver = ModuleResolver::new(&config.context);

    let mut entries = Vec::with_capacity(config.packages.len());
    for package in &config.packages {
        let path = resolver
            .resolve_from_context(package)
            .ok_or_else(|| BuildError::Resolution {
                specifier: package.clone(),
                importer: resolver.context().to_path_buf(),
            })?;
        entries.push(path);
    }
    info!(
        "Building vendor bundle '{library}' from {} packages",
        entries.len()
    );

    let mut graph = ModuleGraph::new();
    let mut queue = VecDeque::new();
    let mut package_ids = Vec::with_capacity(entries.len());
    for path in entries {
        let (id, is_new) = graph.add_module(&resolver.context_relative(&path));
        if is_new {
            queue.push_back((id, path));
        }
        package_ids.push(id);
    }

    let mut modules = Vec::new();
    let mut uses_style = false;
    while let Some((id, path)) = queue.pop_front() {
        let loaded = load_source(&path, &config.rules, &config.jsx)?;
        uses_style |= loaded.uses_style;

        let requests =
            collect_requests(&loaded.code).map_err(|e| BuildError::transform(&path, e))?;
        let mut ids = IndexMap::new();
        for request in requests {
            let resolved =
                resolver
                    .resolve_path(&request, &path)
                    .ok_or_else(|| BuildError::Resolution {
                        specifier: request.clone(),
                        importer: path.clone(),
                    })?;
            let (dependency, is_new) = graph.add_module(&resolver.context_relative(&resolved));
            if is_new {
                queue.push_back((dependency, resolved));
            }
            graph.add_dependency(id, dependency);
            ids.insert(
                request,
                serde_json::Value::from(vendor_id(library, dependency)).to_string(),
            );
        }

        let body =
            link_module(&loaded.code, &ids).map_err(|e| BuildError::transform(&path, e))?;
        let label = graph.key_of(id).unwrap_or_default().to_owned();
        debug!("Vendored module {}: {label}", vendor_id(library, id));
        modules.push(BundleModule {
            id: serde_json::Value::from(vendor_id(library, id)).to_string(),
            label,
            body,
        });
    }

    warn_cycles(&graph);

    let mut manifest = Manifest::new(library);
    for (package, id) in config.packages.iter().zip(&package_ids) {
        manifest.insert(package.as_str(), vendor_id(library, *id));
    }
    for (id, key) in graph.modules() {
        manifest.insert(key, vendor_id(library, id));
    }

    let bundle = render_library(library, &modules, uses_style);
    let filename = expand_filename(&config.filename, library, &bundle);
    let bundle_path = config.output_dir.join(filename);
    write_atomic(&bundle_path, &bundle)?;
    manifest.save(&config.manifest)?;

    info!(
        "Wrote {} and {} ({} modules)",
        bundle_path.display(),
        config.manifest.display(),
        modules.len()
    );
    Ok(VendorOutput {
        bundle_path,
        manifest_path: config.manifest.clone(),
        manifest,
    })
}

#[cfg(test)]
mod tests {
    use std::{fs, path::Path};

    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;
    use crate::transform::JsxOptions;

    fn create_test_file(path: &Path, content: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(path, content).expect("write file");
    }

    fn vendor_config(root: &Path, packages: &[&str]) -> VendorConfig {
        VendorConfig {
            context: root.to_path_buf(),
            packages: packages.iter().map(|p| (*p).to_owned()).collect(),
            library: "lib".to_owned(),
            output_dir: root.join("public"),
            filename: "[name].js".to_owned(),
            manifest: root.join("manifest.json"),
            rules: Vec::new(),
            jsx: JsxOptions::default(),
        }
    }

    #[test]
    fn test_packages_take_first_ids() {
        let temp_dir = TempDir::new().expect("temp dir");
        let root = temp_dir.path();
        create_test_file(
            &root.join("node_modules/libA/index.js"),
            "module.exports = require('./util');\n",
        );
        create_test_file(&root.join("node_modules/libA/util.js"), "module.exports = 1;\n");
        create_test_file(&root.join("node_modules/libB/index.js"), "module.exports = 2;\n");

        let output = build_vendor(&vendor_config(root, &["libA", "libB"])).expect("vendor");

        let ids: Vec<(&str, &str)> = output
            .manifest
            .content
            .iter()
            .map(|(symbol, entry)| (symbol.as_str(), entry.id.as_str()))
            .collect();
        assert_eq!(
            ids,
            vec![
                ("libA", "lib.0"),
                ("libB", "lib.1"),
                ("./node_modules/libA/index.js", "lib.0"),
                ("./node_modules/libB/index.js", "lib.1"),
                ("./node_modules/libA/util.js", "lib.2"),
            ]
        );

        let bundle = fs::read_to_string(&output.bundle_path).expect("read bundle");
        assert_eq!(output.bundle_path, root.join("public/lib.js"));
        assert!(bundle.starts_with("var lib = (function (modules) {"));
        assert!(bundle.contains("module.exports = __dllpack_require__(\"lib.2\");"));
        assert_eq!(
            Manifest::load(&root.join("manifest.json")).expect("manifest"),
            output.manifest
        );
    }

    #[test]
    fn test_empty_and_duplicate_lists_are_rejected() {
        let temp_dir = TempDir::new().expect("temp dir");
        let root = temp_dir.path();

        let err = build_vendor(&vendor_config(root, &[])).expect_err("empty");
        assert!(err.is_config());

        let err = build_vendor(&vendor_config(root, &["a", "a"])).expect_err("duplicate");
        assert!(err.is_config());
        assert!(err.to_string().contains("listed twice"));
    }

    #[test]
    fn test_invalid_library_name() {
        let temp_dir = TempDir::new().expect("temp dir");
        let mut config = vendor_config(temp_dir.path(), &["a"]);
        config.library = "my-lib".to_owned();
        assert!(build_vendor(&config).expect_err("bad name").is_config());
    }

    #[test]
    fn test_unresolved_package_writes_nothing() {
        let temp_dir = TempDir::new().expect("temp dir");
        let root = temp_dir.path();
        create_test_file(&root.join("node_modules/libA/index.js"), "");

        let err = build_vendor(&vendor_config(root, &["libA", "ghost"])).expect_err("ghost");
        assert!(err.is_resolution());
        assert!(err.to_string().contains("ghost"));
        assert!(!root.join("manifest.json").exists());
        assert!(!root.join("public").exists());
    }

    #[test]
    fn test_hashed_filename() {
        let temp_dir = TempDir::new().expect("temp dir");
        let root = temp_dir.path();
        create_test_file(&root.join("node_modules/libA/index.js"), "module.exports = 1;\n");
        let mut config = vendor_config(root, &["libA"]);
        config.filename = "[name].[hash].js".to_owned();

        let output = build_vendor(&config).expect("vendor");
        let name = output
            .bundle_path
            .file_name()
            .and_then(|n| n.to_str())
            .expect("file name")
            .to_owned();
        let bundle = fs::read_to_string(&output.bundle_path).expect("read bundle");
        assert_eq!(
            name,
            format!("lib.{}.js", crate::output::content_hash(&bundle))
        );
    }
}
