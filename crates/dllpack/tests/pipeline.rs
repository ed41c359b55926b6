use std::{
    collections::VecDeque,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use dllpack::{
    bundler::build_application,
    config::{BuildConfig, Config, VendorConfig, WatchConfig},
    manifest::Manifest,
    transform::JsxOptions,
    vendor::build_vendor,
    watch::{ChangeSource, WatchLoop, WatchState},
};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

fn create_test_file(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent");
    }
    fs::write(path, content).expect("write file");
}

/// Two vendor packages and an application that imports both
fn create_project(root: &Path) {
    create_test_file(
        &root.join("node_modules/libA/package.json"),
        r#"{"name": "libA", "main": "lib/a.js"}"#,
    );
    create_test_file(
        &root.join("node_modules/libA/lib/a.js"),
        "var LIB_A_SOURCE = 1;\nmodule.exports = function a() { return LIB_A_SOURCE; };\n",
    );
    create_test_file(
        &root.join("node_modules/libB/index.js"),
        "exports.b = 'LIB_B_SOURCE';\n",
    );
    create_test_file(
        &root.join("app/main.js"),
        "import a from 'libA';\nimport { b } from 'libB';\nimport { twice } from './util';\nconsole.log(twice(a()), b);\n",
    );
    create_test_file(
        &root.join("app/util.js"),
        "export const twice = (n) => n * 2;\n",
    );
}

fn load_config(root: &Path) -> Config {
    create_test_file(
        &root.join("dllpack.toml"),
        r#"
context = "."
output_dir = "public"
manifest = "manifest.json"

[vendor]
packages = ["libA", "libB"]
library = "lib"

[build]
entry = "app/main.js"
filename = "bundle.js"
"#,
    );
    let mut config = Config::default();
    config
        .apply_file(&root.join("dllpack.toml"))
        .expect("apply config");
    config
}

fn vendor_config(root: &Path) -> VendorConfig {
    load_config(root).vendor_config().expect("vendor config")
}

fn build_config(root: &Path) -> BuildConfig {
    load_config(root).build_config().expect("build config")
}

#[test]
fn test_application_delegates_vendor_packages() {
    let temp_dir = TempDir::new().expect("temp dir");
    let root = temp_dir.path();
    create_project(root);

    let vendor = build_vendor(&vendor_config(root)).expect("vendor build");
    assert_eq!(vendor.manifest.lookup("libA"), Some("lib.0"));
    assert_eq!(vendor.manifest.lookup("libB"), Some("lib.1"));
    let library = fs::read_to_string(&vendor.bundle_path).expect("read library");
    assert!(library.contains("LIB_A_SOURCE"));

    let output = build_application(&build_config(root)).expect("application build");
    assert_eq!(output.delegated_modules, 2);
    assert_eq!(output.local_modules, 2);

    let bundle = fs::read_to_string(&output.bundle_path).expect("read bundle");
    assert!(bundle.contains("module.exports = lib(\"lib.0\");"), "{bundle}");
    assert!(bundle.contains("module.exports = lib(\"lib.1\");"), "{bundle}");
    assert!(!bundle.contains("LIB_A_SOURCE"));
    assert!(!bundle.contains("LIB_B_SOURCE"));
    assert!(bundle.contains("exports.twice = twice;"));
    assert!(!bundle.contains("=>"));
}

#[test]
fn test_without_manifest_everything_is_local() {
    let temp_dir = TempDir::new().expect("temp dir");
    let root = temp_dir.path();
    create_project(root);

    let mut config = build_config(root);
    config.manifest = None;
    let output = build_application(&config).expect("application build");
    assert_eq!(output.delegated_modules, 0);
    assert_eq!(output.local_modules, 4);

    let bundle = fs::read_to_string(&output.bundle_path).expect("read bundle");
    assert!(bundle.contains("LIB_A_SOURCE"));
    assert!(bundle.contains("LIB_B_SOURCE"));
}

#[test]
fn test_rebuild_is_byte_identical() {
    let temp_dir = TempDir::new().expect("temp dir");
    let root = temp_dir.path();
    create_project(root);

    let vendor = build_vendor(&vendor_config(root)).expect("first vendor build");
    let first_library = fs::read(&vendor.bundle_path).expect("read library");
    let first_manifest = fs::read(&vendor.manifest_path).expect("read manifest");
    let output = build_application(&build_config(root)).expect("first build");
    let first_bundle = fs::read(&output.bundle_path).expect("read bundle");

    build_vendor(&vendor_config(root)).expect("second vendor build");
    build_application(&build_config(root)).expect("second build");

    assert_eq!(fs::read(&vendor.bundle_path).expect("library"), first_library);
    assert_eq!(fs::read(&vendor.manifest_path).expect("manifest"), first_manifest);
    assert_eq!(fs::read(&output.bundle_path).expect("bundle"), first_bundle);
}

#[test]
fn test_missing_manifest_fails_before_writing() {
    let temp_dir = TempDir::new().expect("temp dir");
    let root = temp_dir.path();
    create_project(root);

    let err = build_application(&build_config(root)).expect_err("no manifest yet");
    assert!(err.is_config(), "{err}");
    assert!(err.to_string().contains("manifest"));
    assert!(!root.join("public/bundle.js").exists());
}

#[test]
fn test_corrupt_manifest_fails_before_writing() {
    let temp_dir = TempDir::new().expect("temp dir");
    let root = temp_dir.path();
    create_project(root);
    create_test_file(&root.join("manifest.json"), "{\"name\": \"lib\", \"content\": [");

    let err = build_application(&build_config(root)).expect_err("corrupt manifest");
    assert!(err.is_config(), "{err}");
    assert!(!root.join("public/bundle.js").exists());
}

#[test]
fn test_manifest_matches_what_was_written() {
    let temp_dir = TempDir::new().expect("temp dir");
    let root = temp_dir.path();
    create_project(root);

    let vendor = build_vendor(&vendor_config(root)).expect("vendor build");
    let loaded = Manifest::load(&root.join("manifest.json")).expect("load manifest");
    assert_eq!(loaded, vendor.manifest);
    assert_eq!(
        loaded.lookup("./node_modules/libA/lib/a.js"),
        loaded.lookup("libA")
    );
}

const INPUT_COMPONENT: &str = r#"import React from 'react';

class Input extends React.Component {
  constructor(props) {
    super(props);
    this.state = { value: '' };
    this.handleChange = this.handleChange.bind(this);
  }

  handleChange(event) {
    const value = event.target.value;
    this.setState({ value: value });
  }

  render() {
    const label = `Value: ${this.state.value}`;
    const items = this.props.items.map((item) => <li>{item}</li>);
    return (
      <div className="field">
        <input type="text" value={this.state.value} onChange={this.handleChange} />
        <p>{label}</p>
        <ul>{items}</ul>
      </div>
    );
  }
}

export default Input;
"#;

struct Events(VecDeque<PathBuf>);

impl ChangeSource for Events {
    fn next_change_event(&mut self) -> Option<PathBuf> {
        self.0.pop_front()
    }
}

fn watch_config(root: &Path) -> WatchConfig {
    WatchConfig {
        dir: root.join("js"),
        out_dir: root.join("js/min"),
        pattern: "**/*.js".to_owned(),
        interval: Duration::from_millis(10),
        jsx: JsxOptions::default(),
    }
}

#[test]
fn test_watch_compiles_component_to_es5() {
    let temp_dir = TempDir::new().expect("temp dir");
    let root = temp_dir.path();
    create_test_file(&root.join("js/input.js"), INPUT_COMPONENT);

    let mut watch = WatchLoop::new(&watch_config(root)).expect("watch loop");
    watch.run(&mut Events(VecDeque::from([PathBuf::from("input.js")])));
    assert_eq!(watch.state(), &WatchState::Idle);

    let report = watch.into_report();
    assert!(report.failures.is_empty(), "{:?}", report.failures);
    assert_eq!(report.compiled, vec![root.join("js/min/input.js")]);

    let output = fs::read_to_string(root.join("js/min/input.js")).expect("read output");
    for construct in [
        "class ", "const ", "let ", "=>", "`", "<div", "<input", "</", "import ", "export ",
    ] {
        assert!(!output.contains(construct), "found {construct:?} in:\n{output}");
    }
    assert!(output.contains("_super.call(this, props);"));
    assert!(output.contains("Input.prototype.handleChange = function (event) {"));
    assert!(output.contains("React.createElement(\"input\", {type: \"text\""));
    assert!(output.contains("\"Value: \" + "));
    assert!(output.contains("var React = __dllpack_interop(require(\"react\"));"));
    assert!(output.contains("var Input = (function (_super) {"));
    assert!(output.ends_with("exports[\"default\"] = Input;\n"), "{output}");
}

const COMPONENT_WITHOUT_SEMICOLONS: &str = r#"import React from 'react'
class App extends React.Component {
  render() {
    return <h1>{this.props.title}</h1>
  }
}
export default App
"#;

#[test]
fn test_watch_declares_class_in_code_without_semicolons() {
    let temp_dir = TempDir::new().expect("temp dir");
    let root = temp_dir.path();
    create_test_file(&root.join("js/app.js"), COMPONENT_WITHOUT_SEMICOLONS);

    let mut watch = WatchLoop::new(&watch_config(root)).expect("watch loop");
    watch.run(&mut Events(VecDeque::from([PathBuf::from("app.js")])));

    let report = watch.into_report();
    assert!(report.failures.is_empty(), "{:?}", report.failures);
    let output = fs::read_to_string(root.join("js/min/app.js")).expect("read output");
    assert!(
        output.contains("var React = __dllpack_interop(require(\"react\"));\nvar App = (function (_super) {"),
        "{output}"
    );
    assert!(output.contains("})(React.Component);\n"), "{output}");
    assert!(output.contains("exports[\"default\"] = App"), "{output}");
}

#[test]
fn test_watch_rejects_block_bindings_that_change_meaning_as_var() {
    let temp_dir = TempDir::new().expect("temp dir");
    let root = temp_dir.path();
    create_test_file(
        &root.join("js/shadow.js"),
        "let x = 1;\n{\n  let x = 2;\n}\nconsole.log(x);\n",
    );
    create_test_file(
        &root.join("js/loop.js"),
        "var fns = [];\nfor (let i = 0; i < 3; i++) {\n  fns.push(() => i);\n}\n",
    );

    let mut watch = WatchLoop::new(&watch_config(root)).expect("watch loop");
    watch.run(&mut Events(VecDeque::from([
        PathBuf::from("shadow.js"),
        PathBuf::from("loop.js"),
    ])));

    let report = watch.into_report();
    assert!(report.compiled.is_empty(), "{:?}", report.compiled);
    let messages: Vec<String> = report.failures.iter().map(|f| f.message.clone()).collect();
    assert_eq!(messages.len(), 2);
    assert!(messages[0].contains("unsupported shadowed block binding at line 3"), "{messages:?}");
    assert!(messages[1].contains("unsupported closure over a loop binding at line 2"), "{messages:?}");
    assert!(!root.join("js/min/shadow.js").exists());
}

#[test]
fn test_watch_keeps_going_after_a_bad_file() {
    let temp_dir = TempDir::new().expect("temp dir");
    let root = temp_dir.path();
    create_test_file(&root.join("js/broken.js"), "var s = <div>;\n");
    create_test_file(&root.join("js/ok.js"), "let ok = () => 1;\n");
    create_test_file(&root.join("js/notes.txt"), "not javascript");

    let mut watch = WatchLoop::new(&watch_config(root)).expect("watch loop");
    watch.run(&mut Events(VecDeque::from([
        root.join("js/broken.js"),
        root.join("js/notes.txt"),
        root.join("js/ok.js"),
    ])));

    let report = watch.into_report();
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].path, root.join("js/broken.js"));
    assert_eq!(report.compiled, vec![root.join("js/min/ok.js")]);
    assert_eq!(
        fs::read_to_string(root.join("js/min/ok.js")).expect("read output"),
        "var ok = function () { return 1; };\n"
    );
    assert!(!root.join("js/min/broken.js").exists());
}
