//! Non-script module bodies: style sheets and JSON documents become small CommonJS
//! modules so they can sit in the bundle next to script modules.

use crate::error::TransformError;

use super::{Transform, jsx::string_literal};

/// Name of the runtime helper that injects a `<style>` element
pub const STYLE_HELPER: &str = "__dllpack_require__.style";

/// Turns a style sheet into a module that injects it
#[derive(Debug, Clone, Copy, Default)]
pub struct Style;

impl Transform for Style {
    fn name(&self) -> &'static str {
        "style"
    }

    fn apply(&self, source: &str) -> Result<String, TransformError> {
        Ok(style_module(source))
    }
}

/// Wrap style-sheet text in a module that injects it into the document at load time
pub fn style_module(css: &str) -> String {
    format!("module.exports = {STYLE_HELPER}({});\n", string_literal(css))
}

/// Wrap a JSON document as a module exporting the parsed value
pub fn json_module(json: &str) -> Result<String, TransformError> {
    if let Err(err) = serde_json::from_str::<serde_json::Value>(json) {
        return Err(TransformError::syntax(
            err.line(),
            err.column(),
            format!("invalid JSON: {err}"),
        ));
    }
    let body = json
        .trim()
        .replace('\u{2028}', "\\u2028")
        .replace('\u{2029}', "\\u2029");
    Ok(format!("module.exports = {body};\n"))
}
