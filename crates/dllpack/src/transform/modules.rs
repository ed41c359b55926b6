//! ES module syntax to CommonJS for files compiled outside a bundle.

use super::Transform;
use crate::{error::TransformError, linker::to_commonjs};

/// Rewrites `import`/`export` into `require` calls and `exports` assignments
#[derive(Debug, Clone, Copy, Default)]
pub struct CommonJs;

impl Transform for CommonJs {
    fn name(&self) -> &'static str {
        "commonjs"
    }

    fn apply(&self, source: &str) -> Result<String, TransformError> {
        to_commonjs(source)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_imports_become_require_calls() {
        let output = CommonJs
            .apply("import React from 'react';\nimport { render } from 'react-dom';\nrender(React);\n")
            .expect("apply");
        assert_eq!(
            output,
            "function __dllpack_interop(module) { return module && module.__esModule ? module[\"default\"] : module; }\n\
var React = __dllpack_interop(require(\"react\"));\n\
var __dllpack_m1 = require(\"react-dom\"); var render = __dllpack_m1.render;\n\
render(React);\n"
        );
    }

    #[test]
    fn test_exports_and_reexports() {
        let output = CommonJs
            .apply("var Input = 1;\nexport * from './base';\nexport default Input;\n")
            .expect("apply");
        assert!(output.starts_with("Object.defineProperty(exports, \"__esModule\", { value: true });\nfunction __dllpack_reexport(exports, module) {"), "{output}");
        assert!(output.contains("__dllpack_reexport(exports, require(\"./base\"));"), "{output}");
        assert!(output.ends_with("exports[\"default\"] = Input;\n"), "{output}");
    }

    #[test]
    fn test_require_calls_are_kept() {
        let source = "var $ = require('jquery');\nmodule.exports = $;\n";
        assert_eq!(CommonJs.apply(source).expect("apply"), source);
    }
}
