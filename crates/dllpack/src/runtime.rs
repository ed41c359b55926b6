//! Bundle runtime: the module registry prologue and the rendering of bundle files.

use crate::linker::REQUIRE;

/// One module as it is written into a bundle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleModule {
    /// JavaScript expression of the module id (`3` or `"lib.3"`)
    pub id: String,
    /// Human readable origin, emitted as a comment above the module
    pub label: String,
    /// Linked module body
    pub body: String,
}

const PROLOGUE: &str = r#"(function (modules) {
  var installedModules = {};
  function __dllpack_require__(moduleId) {
    if (installedModules[moduleId]) {
      return installedModules[moduleId].exports;
    }
    var module = installedModules[moduleId] = { exports: {} };
    modules[moduleId].call(module.exports, module, module.exports, __dllpack_require__);
    return module.exports;
  }
  __dllpack_require__.interop = function (module) {
    return module && module.__esModule ? module["default"] : module;
  };
  __dllpack_require__.reexport = function (exports, module) {
    Object.keys(module).forEach(function (key) {
      if (key !== "default" && key !== "__esModule" && !Object.prototype.hasOwnProperty.call(exports, key)) {
        exports[key] = module[key];
      }
    });
  };
"#;

const STYLE_HELPER: &str = r#"  __dllpack_require__.style = function (css) {
    if (typeof document !== "undefined") {
      var style = document.createElement("style");
      style.appendChild(document.createTextNode(css));
      document.head.appendChild(style);
    }
    return css;
  };
"#;

/// Render an application bundle that runs `entry` as soon as it is loaded
pub fn render_application(modules: &[BundleModule], entry: &str, with_style: bool) -> String {
    let epilogue = format!("  return {REQUIRE}({entry});\n");
    format!("{};\n", render(modules, with_style, &epilogue))
}

/// Render a library bundle exposing its registry as the global `library`
pub fn render_library(library: &str, modules: &[BundleModule], with_style: bool) -> String {
    let epilogue = format!("  return {REQUIRE};\n");
    format!("var {library} = {};\n", render(modules, with_style, &epilogue))
}

/// Body of a module that forwards to a module of another bundle
pub fn delegated_body(library: &str, id: &str) -> String {
    format!(
        "module.exports = {library}({});\n",
        serde_json::Value::from(id)
    )
}

fn render(modules: &[BundleModule], with_style: bool, epilogue: &str) -> String {
    let mut out = String::from(PROLOGUE);
    if with_style {
        out.push_str(STYLE_HELPER);
    }
    out.push_str(epilogue);
    out.push_str("})({\n");
    for (i, module) in modules.iter().enumerate() {
        if i > 0 {
            out.push_str(",\n");
        }
        out.push_str(&format!(
            "/* {} */\n{}: function (module, exports, {REQUIRE}) {{\n",
            module.label.replace("*/", "*\\/"),
            module.id
        ));
        out.push_str(&module.body);
        if !module.body.ends_with('\n') {
            out.push('\n');
        }
        out.push('}');
    }
    out.push_str("\n})");
    out
}
