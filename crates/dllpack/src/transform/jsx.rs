//! JSX to `React.createElement` compilation.

use serde::{Deserialize, Serialize};

use super::Transform;
use crate::{
    error::TransformError,
    js::{JsxAttrValue, JsxAttribute, JsxChild, JsxElement, TokenKind, is_identifier_name, tokenize},
};

/// Names used for the element factory and for fragments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsxOptions {
    pub pragma: String,
    pub fragment: String,
}

impl Default for JsxOptions {
    fn default() -> Self {
        Self {
            pragma: "React.createElement".to_owned(),
            fragment: "React.Fragment".to_owned(),
        }
    }
}

/// Replaces every JSX element with a call to the configured pragma
#[derive(Debug, Clone, Default)]
pub struct Jsx {
    options: JsxOptions,
}

impl Jsx {
    pub fn new(options: JsxOptions) -> Self {
        Self { options }
    }

    fn element(&self, element: &JsxElement) -> Result<String, TransformError> {
        let tag = match &element.name {
            None => self.options.fragment.clone(),
            Some(name) if is_intrinsic(name) => string_literal(name),
            Some(name) => name.clone(),
        };

        let mut out = format!(
            "{}({}, {}",
            self.options.pragma,
            tag,
            self.props(&element.attributes)?
        );
        for child in &element.children {
            if let Some(child) = self.child(child)? {
                out.push_str(", ");
                out.push_str(&child);
            }
        }
        out.push(')');
        Ok(out)
    }

    fn props(&self, attributes: &[JsxAttribute]) -> Result<String, TransformError> {
        if attributes.is_empty() {
            return Ok("null".to_owned());
        }

        // Consecutive named attributes form one object literal; spreads sit between
        let mut segments: Vec<String> = Vec::new();
        let mut pending: Vec<String> = Vec::new();
        let mut has_spread = false;
        for attribute in attributes {
            match attribute {
                JsxAttribute::Named { name, value } => {
                    let key = if is_identifier_name(name) {
                        name.clone()
                    } else {
                        string_literal(name)
                    };
                    pending.push(format!("{key}: {}", self.attr_value(value)?));
                }
                JsxAttribute::Spread(expression) => {
                    has_spread = true;
                    if !pending.is_empty() {
                        segments.push(format!("{{{}}}", pending.join(", ")));
                        pending.clear();
                    }
                    segments.push(self.apply(expression)?.trim().to_owned());
                }
            }
        }
        if !pending.is_empty() {
            segments.push(format!("{{{}}}", pending.join(", ")));
        }

        if has_spread {
            Ok(format!("Object.assign({{}}, {})", segments.join(", ")))
        } else {
            Ok(segments.concat())
        }
    }

    fn attr_value(&self, value: &JsxAttrValue) -> Result<String, TransformError> {
        match value {
            JsxAttrValue::True => Ok("true".to_owned()),
            JsxAttrValue::Str(text) => Ok(string_literal(text)),
            JsxAttrValue::Expr(expression) => Ok(self.apply(expression)?.trim().to_owned()),
            JsxAttrValue::Element(element) => self.element(element),
        }
    }

    fn child(&self, child: &JsxChild) -> Result<Option<String>, TransformError> {
        match child {
            JsxChild::Text(text) => Ok(clean_jsx_text(text).map(|text| string_literal(&text))),
            JsxChild::Expr(expression) => {
                // `{/* comment */}` produces no child
                let only_trivia = tokenize(expression)?.iter().all(|t| t.is_trivia());
                if only_trivia {
                    Ok(None)
                } else {
                    Ok(Some(self.apply(expression)?.trim().to_owned()))
                }
            }
            JsxChild::Element(element) => self.element(element).map(Some),
        }
    }
}

impl Transform for Jsx {
    fn name(&self) -> &'static str {
        "jsx"
    }

    fn apply(&self, source: &str) -> Result<String, TransformError> {
        let tokens = tokenize(source)?;
        let mut out = String::with_capacity(source.len());
        for token in &tokens {
            match &token.kind {
                TokenKind::Jsx(element) => out.push_str(&self.element(element)?),
                _ => out.push_str(&token.text),
            }
        }
        Ok(out)
    }
}

/// Lower-case names without a member access are host elements (`"div"`)
fn is_intrinsic(name: &str) -> bool {
    name.contains(':')
        || (!name.contains('.') && name.chars().next().is_some_and(char::is_lowercase))
}

/// Quote `text` as a double-quoted JavaScript string literal
pub(crate) fn string_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Collapse JSX text the way React does: lines are trimmed, blank lines dropped and
/// the remaining lines joined by a single space.
fn clean_jsx_text(text: &str) -> Option<String> {
    let lines: Vec<&str> = text.split('\n').collect();
    let last_non_empty = lines
        .iter()
        .rposition(|line| line.chars().any(|c| c != ' ' && c != '\t' && c != '\r'))?;

    let mut out = String::new();
    for (i, line) in lines.iter().enumerate() {
        let mut trimmed = line.replace(['\t', '\r'], " ");
        if i != 0 {
            trimmed = trimmed.trim_start_matches(' ').to_owned();
        }
        if i != lines.len() - 1 {
            trimmed = trimmed.trim_end_matches(' ').to_owned();
        }
        if trimmed.is_empty() {
            continue;
        }
        out.push_str(&trimmed);
        if i != last_non_empty {
            out.push(' ');
        }
    }
    (!out.is_empty()).then_some(out)
}
