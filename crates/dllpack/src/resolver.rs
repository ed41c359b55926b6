//! Module request resolution.
//!
//! A request is either served by the vendor bundle (its specifier or resolved path
//! is a manifest symbol) or resolved to a file: relative paths against the importer,
//! bare names through the nearest `node_modules` and the package's `package.json`.

use std::{
    fs,
    path::{Component, Path, PathBuf},
};

use cow_utils::CowUtils;
use log::{debug, trace, warn};
use rustc_hash::FxHashMap;

use crate::{
    error::{BuildError, BuildResult},
    manifest::Manifest,
};

/// Suffixes tried, in order, when a request names a file
const EXTENSIONS: &[&str] = &["", ".js", ".jsx", ".json", ".css"];

/// package.json fields naming the entry file, in priority order
const ENTRY_FIELDS: &[&str] = &["module", "main"];

/// Where a module request ends up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Served by a vendor bundle: `library(id)`
    External { library: String, id: String },
    /// A file that is bundled directly
    Local { path: PathBuf },
}

#[derive(Debug)]
pub struct ModuleResolver {
    /// Build context; module keys are relative to it
    context: PathBuf,
    /// Cache of resolved paths keyed by (base directory, request)
    module_cache: FxHashMap<(PathBuf, String), Option<PathBuf>>,
}

impl ModuleResolver {
    pub fn new(context: impl Into<PathBuf>) -> Self {
        let context = context.into();
        let context = std::path::absolute(&context).unwrap_or(context);
        Self {
            context: normalize(&context),
            module_cache: FxHashMap::default(),
        }
    }

    pub fn context(&self) -> &Path {
        &self.context
    }

    /// Absolute, lexically normalized form of `path` (relative to the working directory)
    pub fn absolute(&self, path: &Path) -> PathBuf {
        normalize(&std::path::absolute(path).unwrap_or_else(|_| self.context.join(path)))
    }

    /// Resolve `specifier` requested by the file `importer`.
    ///
    /// A manifest symbol wins over the file system; a file whose context-relative path is
    /// a manifest symbol is external as well.
    pub fn resolve(
        &mut self,
        specifier: &str,
        importer: &Path,
        manifest: Option<&Manifest>,
    ) -> BuildResult<Resolution> {
        if let Some(manifest) = manifest {
            if let Some(id) = manifest.lookup(specifier) {
                trace!("'{specifier}' is vendor symbol {id}");
                return Ok(Resolution::External {
                    library: manifest.name.clone(),
                    id: id.to_owned(),
                });
            }
        }

        let path = self
            .resolve_path(specifier, importer)
            .ok_or_else(|| BuildError::Resolution {
                specifier: specifier.to_owned(),
                importer: importer.to_path_buf(),
            })?;

        if let Some(manifest) = manifest {
            let key = self.context_relative(&path);
            if let Some(id) = manifest.lookup(&key) {
                trace!("'{specifier}' resolved to vendor module {key} ({id})");
                return Ok(Resolution::External {
                    library: manifest.name.clone(),
                    id: id.to_owned(),
                });
            }
        }

        Ok(Resolution::Local { path })
    }

    /// Resolve a request relative to the file `importer`
    pub fn resolve_path(&mut self, specifier: &str, importer: &Path) -> Option<PathBuf> {
        let base = importer.parent().unwrap_or(&self.context).to_path_buf();
        self.resolve_in(specifier, &base)
    }

    /// Resolve a request as if it were made from the build context itself
    pub fn resolve_from_context(&mut self, specifier: &str) -> Option<PathBuf> {
        let base = self.context.clone();
        self.resolve_in(specifier, &base)
    }

    fn resolve_in(&mut self, specifier: &str, base: &Path) -> Option<PathBuf> {
        let key = (base.to_path_buf(), specifier.to_owned());
        if let Some(cached) = self.module_cache.get(&key) {
            return cached.clone();
        }

        let resolved = if is_relative(specifier) {
            find_file(&normalize(&base.join(specifier)))
        } else if Path::new(specifier).is_absolute() {
            find_file(&normalize(Path::new(specifier)))
        } else {
            self.resolve_package(specifier, base)
        };

        match &resolved {
            Some(path) => debug!("Resolved '{specifier}' to {}", path.display()),
            None => debug!("Cannot resolve '{specifier}' from {}", base.display()),
        }
        self.module_cache.insert(key, resolved.clone());
        resolved
    }

    /// Look for `node_modules/<package>` in `start` and each of its ancestors
    fn resolve_package(&self, specifier: &str, start: &Path) -> Option<PathBuf> {
        let (package, subpath) = parse_package_specifier(specifier);

        for dir in start.ancestors() {
            let package_dir = dir.join("node_modules").join(package);
            if !package_dir.is_dir() {
                continue;
            }
            return match subpath {
                Some(subpath) => find_file(&normalize(&package_dir.join(subpath))),
                None => package_entry(&package_dir),
            };
        }
        None
    }

    /// Key of `path` in a manifest: `./` plus the path relative to the context, with
    /// forward slashes. Paths outside the context keep their absolute form.
    pub fn context_relative(&self, path: &Path) -> String {
        match path.strip_prefix(&self.context) {
            Ok(relative) => {
                let relative = relative.to_string_lossy();
                format!("./{}", relative.cow_replace('\\', "/"))
            }
            Err(_) => path.to_string_lossy().cow_replace('\\', "/").into_owned(),
        }
    }
}

fn is_relative(specifier: &str) -> bool {
    specifier == "."
        || specifier == ".."
        || specifier.starts_with("./")
        || specifier.starts_with("../")
}

/// Split a bare request into package name and subpath
///
/// - `"react"` → `("react", None)`
/// - `"react/lib/React"` → `("react", Some("lib/React"))`
/// - `"@scope/pkg/x"` → `("@scope/pkg", Some("x"))`
fn parse_package_specifier(specifier: &str) -> (&str, Option<&str>) {
    let name_segments = if specifier.starts_with('@') { 2 } else { 1 };
    match specifier
        .match_indices('/')
        .nth(name_segments - 1)
        .map(|(i, _)| i)
    {
        Some(i) => (&specifier[..i], Some(&specifier[i + 1..])),
        None => (specifier, None),
    }
}

/// Entry file of a package directory: `module`, then `main`, then `index.js`
fn package_entry(package_dir: &Path) -> Option<PathBuf> {
    let manifest_path = package_dir.join("package.json");
    if let Ok(text) = fs::read_to_string(&manifest_path) {
        match serde_json::from_str::<serde_json::Value>(&text) {
            Ok(package) => {
                for field in ENTRY_FIELDS {
                    let Some(entry) = package.get(field).and_then(|v| v.as_str()) else {
                        continue;
                    };
                    if let Some(path) = find_file(&normalize(&package_dir.join(entry))) {
                        return Some(path);
                    }
                    warn!(
                        "{} points '{field}' at missing file {entry}",
                        manifest_path.display()
                    );
                }
            }
            Err(e) => warn!("Ignoring malformed {}: {e}", manifest_path.display()),
        }
    }
    find_file(&package_dir.join("index.js"))
}

/// Try `target` with each extension, then as a directory with `index.js`
fn find_file(target: &Path) -> Option<PathBuf> {
    for extension in EXTENSIONS {
        let candidate = if extension.is_empty() {
            target.to_path_buf()
        } else {
            let mut name = target.as_os_str().to_os_string();
            name.push(extension);
            PathBuf::from(name)
        };
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    let index = target.join("index.js");
    index.is_file().then_some(index)
}

/// Lexically remove `.` and `..` components
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;

    fn create_test_file(path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }

    fn resolver_for(temp_dir: &TempDir) -> (ModuleResolver, PathBuf) {
        let resolver = ModuleResolver::new(temp_dir.path());
        let root = resolver.context().to_path_buf();
        (resolver, root)
    }

    #[test]
    fn test_relative_extension_probing() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let (mut resolver, root) = resolver_for(&temp_dir);
        create_test_file(&root.join("src/index.js"), "")?;
        create_test_file(&root.join("src/App.jsx"), "")?;
        create_test_file(&root.join("src/data.json"), "{}")?;
        create_test_file(&root.join("src/widgets/index.js"), "")?;
        let importer = root.join("src/index.js");

        assert_eq!(
            resolver.resolve_path("./App", &importer),
            Some(root.join("src/App.jsx"))
        );
        assert_eq!(
            resolver.resolve_path("./data.json", &importer),
            Some(root.join("src/data.json"))
        );
        assert_eq!(
            resolver.resolve_path("./widgets", &importer),
            Some(root.join("src/widgets/index.js"))
        );
        assert_eq!(
            resolver.resolve_path("../src/./App", &importer),
            Some(root.join("src/App.jsx"))
        );
        assert_eq!(resolver.resolve_path("./missing", &importer), None);
        Ok(())
    }

    #[test]
    fn test_package_entry_fields() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let (mut resolver, root) = resolver_for(&temp_dir);
        create_test_file(
            &root.join("node_modules/both/package.json"),
            r#"{"main": "main.js", "module": "esm/index.js"}"#,
        )?;
        create_test_file(&root.join("node_modules/both/main.js"), "")?;
        create_test_file(&root.join("node_modules/both/esm/index.js"), "")?;
        create_test_file(
            &root.join("node_modules/plain/package.json"),
            r#"{"main": "./lib/plain"}"#,
        )?;
        create_test_file(&root.join("node_modules/plain/lib/plain.js"), "")?;
        create_test_file(&root.join("node_modules/bare/index.js"), "")?;

        let importer = root.join("src/deep/file.js");
        assert_eq!(
            resolver.resolve_path("both", &importer),
            Some(root.join("node_modules/both/esm/index.js"))
        );
        assert_eq!(
            resolver.resolve_path("plain", &importer),
            Some(root.join("node_modules/plain/lib/plain.js"))
        );
        assert_eq!(
            resolver.resolve_path("bare", &importer),
            Some(root.join("node_modules/bare/index.js"))
        );
        Ok(())
    }

    #[test]
    fn test_scoped_package_subpath() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let (mut resolver, root) = resolver_for(&temp_dir);
        create_test_file(&root.join("node_modules/@scope/pkg/util/x.js"), "")?;

        assert_eq!(
            resolver.resolve_from_context("@scope/pkg/util/x"),
            Some(root.join("node_modules/@scope/pkg/util/x.js"))
        );
        Ok(())
    }

    #[test]
    fn test_manifest_symbols_are_external() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let (mut resolver, root) = resolver_for(&temp_dir);
        create_test_file(&root.join("node_modules/libA/index.js"), "")?;
        create_test_file(&root.join("node_modules/libA/util.js"), "")?;
        create_test_file(&root.join("src/own.js"), "")?;
        let importer = root.join("src/index.js");

        let mut manifest = Manifest::new("lib");
        manifest.insert("libA", "lib.0");
        manifest.insert("./node_modules/libA/index.js", "lib.0");
        manifest.insert("./node_modules/libA/util.js", "lib.1");

        let external = |id: &str| Resolution::External {
            library: "lib".to_owned(),
            id: id.to_owned(),
        };
        assert_eq!(
            resolver.resolve("libA", &importer, Some(&manifest))?,
            external("lib.0")
        );
        assert_eq!(
            resolver.resolve("libA/util", &importer, Some(&manifest))?,
            external("lib.1")
        );
        assert_eq!(
            resolver.resolve("./own", &importer, Some(&manifest))?,
            Resolution::Local {
                path: root.join("src/own.js")
            }
        );
        Ok(())
    }

    #[test]
    fn test_unresolved_request_names_importer() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let (mut resolver, root) = resolver_for(&temp_dir);
        let importer = root.join("src/index.js");

        let err = resolver
            .resolve("left-pad", &importer, None)
            .expect_err("left-pad is not installed");
        assert!(err.is_resolution());
        let message = err.to_string();
        assert!(message.contains("left-pad"), "{message}");
        assert!(message.contains("index.js"), "{message}");
        Ok(())
    }

    #[test]
    fn test_context_relative() {
        let resolver = ModuleResolver::new("/work/app");
        assert_eq!(
            resolver.context_relative(Path::new("/work/app/node_modules/react/index.js")),
            "./node_modules/react/index.js"
        );
        assert_eq!(
            resolver.context_relative(Path::new("/elsewhere/x.js")),
            "/elsewhere/x.js"
        );
    }

    #[test]
    fn test_parse_package_specifier() {
        assert_eq!(parse_package_specifier("react"), ("react", None));
        assert_eq!(
            parse_package_specifier("react/lib/React"),
            ("react", Some("lib/React"))
        );
        assert_eq!(parse_package_specifier("@types/node"), ("@types/node", None));
        assert_eq!(
            parse_package_specifier("@types/node/fs"),
            ("@types/node", Some("fs"))
        );
    }
}
