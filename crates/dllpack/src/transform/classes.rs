//! Class compilation.
//!
//! ```text
//! class A extends B { constructor(p) { super(p); } m() {} static s() {} }
//! ```
//! becomes
//! ```text
//! var A = (function (_super) {
//!   function A(p) { _super.call(this, p); }
//!   A.prototype = Object.create(_super.prototype);
//!   A.prototype.constructor = A;
//!   A.prototype.m = function () {};
//!   A.s = function () {};
//!   return A;
//! })(B);
//! ```

use log::debug;

use super::{
    es2015::{check_params, downlevel},
    jsx::string_literal,
};
use crate::{
    error::TransformError,
    js::{
        Token, TokenKind, is_identifier_name, is_keyword, matching_close, next_significant,
        prev_significant, source_of, tokenize,
    },
};

/// Name given to the constructor of an anonymous class expression
const ANONYMOUS_CLASS: &str = "_class";

#[derive(Debug)]
struct Method {
    /// Property key as it appears after the target (`.m`, `["m-n"]`, `[0]`)
    key: String,
    is_static: bool,
    params: String,
    body: String,
}

#[derive(Debug)]
struct ClassParts {
    name: Option<String>,
    heritage: Option<String>,
    constructor: Option<(String, String)>,
    methods: Vec<Method>,
}

/// Compile the class starting at the `class` keyword at `class_index`.
///
/// Returns the generated code and the index just past the class body. `declaration`
/// forces declaration form; by default it is inferred from the preceding token.
pub(crate) fn compile_class(
    tokens: &[Token],
    class_index: usize,
    declaration: Option<bool>,
) -> Result<(String, usize), TransformError> {
    let line = tokens[class_index].line;
    let is_declaration =
        declaration.unwrap_or_else(|| in_statement_position(tokens, class_index));

    let mut cursor = next_significant(tokens, class_index + 1)
        .ok_or_else(|| unexpected_end(&tokens[class_index]))?;

    let mut name = None;
    if tokens[cursor].is_binding_name() && tokens[cursor].text != "extends" {
        name = Some(tokens[cursor].text.clone());
        cursor = next_significant(tokens, cursor + 1)
            .ok_or_else(|| unexpected_end(&tokens[class_index]))?;
    }

    let mut heritage = None;
    if tokens[cursor].is_ident("extends") {
        let start = next_significant(tokens, cursor + 1)
            .ok_or_else(|| unexpected_end(&tokens[cursor]))?;
        let body_open = heritage_end(tokens, start)
            .ok_or_else(|| unexpected_end(&tokens[cursor]))?;
        heritage = Some(downlevel(source_of(tokens, start, body_open).trim())?);
        cursor = body_open;
    }

    if !tokens[cursor].is_punct("{") {
        return Err(TransformError::syntax(
            tokens[cursor].line,
            tokens[cursor].column,
            "expected '{' to open the class body",
        ));
    }
    if is_declaration && name.is_none() {
        return Err(TransformError::syntax(
            line,
            tokens[class_index].column,
            "class declaration requires a name",
        ));
    }

    let body_close = matching_close(tokens, cursor).ok_or_else(|| {
        TransformError::syntax(
            tokens[cursor].line,
            tokens[cursor].column,
            "unterminated class body",
        )
    })?;

    let mut parts = ClassParts {
        name,
        heritage,
        constructor: None,
        methods: Vec::new(),
    };
    parse_members(tokens, cursor + 1, body_close, &mut parts)?;
    debug!(
        "Compiled class {} with {} methods at line {line}",
        parts.name.as_deref().unwrap_or(ANONYMOUS_CLASS),
        parts.methods.len()
    );

    Ok((render(&parts, is_declaration), body_close + 1))
}

fn unexpected_end(token: &Token) -> TransformError {
    TransformError::syntax(token.line, token.column, "unexpected end of class")
}

/// A class is a declaration at the start of a statement or after `export`.
///
/// A line break after a token that can end an expression starts a new statement
/// (automatic semicolon insertion), so `foo()\nclass A {}` declares `A`.
fn in_statement_position(tokens: &[Token], index: usize) -> bool {
    let Some(p) = prev_significant(tokens, index) else {
        return true;
    };
    let prev = &tokens[p];
    if prev.is_punct(";") || prev.is_punct("}") || prev.is_punct("{") || prev.is_ident("export") {
        return true;
    }
    let line_break = tokens[p + 1..index].iter().any(Token::contains_newline);
    line_break && ends_expression(prev)
}

fn ends_expression(token: &Token) -> bool {
    match &token.kind {
        TokenKind::Ident => {
            !is_keyword(&token.text)
                || matches!(token.text.as_str(), "this" | "super" | "null" | "true" | "false")
        }
        TokenKind::Number
        | TokenKind::String
        | TokenKind::Regex
        | TokenKind::Template(_)
        | TokenKind::Jsx(_) => true,
        TokenKind::Punct => matches!(token.text.as_str(), ")" | "]" | "++" | "--"),
        TokenKind::Whitespace | TokenKind::Comment => false,
    }
}

/// Index of the `{` opening the class body after an `extends` clause
fn heritage_end(tokens: &[Token], start: usize) -> Option<usize> {
    let mut i = start;
    while i < tokens.len() {
        let token = &tokens[i];
        if token.is_punct("{") {
            return Some(i);
        }
        if token.is_punct("(") || token.is_punct("[") {
            i = matching_close(tokens, i)?;
        }
        i += 1;
    }
    None
}

fn parse_members(
    tokens: &[Token],
    start: usize,
    end: usize,
    parts: &mut ClassParts,
) -> Result<(), TransformError> {
    let has_super = parts.heritage.is_some();
    let mut i = start;
    while let Some(member) = next_significant(tokens, i).filter(|&m| m < end) {
        let token = &tokens[member];
        if token.is_punct(";") {
            i = member + 1;
            continue;
        }

        let mut key_index = member;
        let mut is_static = false;
        if token.is_ident("static") {
            let next = next_significant(tokens, member + 1).filter(|&n| n < end);
            if let Some(next) = next.filter(|&n| !tokens[n].is_punct("(")) {
                is_static = true;
                key_index = next;
            }
        }

        let key_token = &tokens[key_index];
        let after_key = next_significant(tokens, key_index + 1).filter(|&n| n < end);
        let key = member_key(tokens, key_index, after_key)?;

        let params_open = match after_key {
            Some(n) if tokens[n].is_punct("(") => n,
            Some(n) if tokens[n].is_punct("=") || tokens[n].is_punct(";") => {
                return Err(TransformError::Unsupported {
                    construct: "class field",
                    line: key_token.line,
                });
            }
            _ => {
                return Err(TransformError::syntax(
                    key_token.line,
                    key_token.column,
                    format!("expected '(' after class member '{}'", key_token.text),
                ));
            }
        };
        let params_close = matching_close(tokens, params_open)
            .filter(|&c| c < end)
            .ok_or_else(|| unexpected_end(key_token))?;
        let body_open = next_significant(tokens, params_close + 1)
            .filter(|&b| b < end && tokens[b].is_punct("{"))
            .ok_or_else(|| {
                TransformError::syntax(
                    key_token.line,
                    key_token.column,
                    format!("expected method body for '{}'", key_token.text),
                )
            })?;
        let body_close = matching_close(tokens, body_open)
            .filter(|&c| c < end)
            .ok_or_else(|| unexpected_end(key_token))?;

        check_params(tokens, params_open, params_close)?;
        let params = downlevel(&source_of(tokens, params_open + 1, params_close))?;
        let body = rewrite_super(&source_of(tokens, body_open + 1, body_close), has_super)?;
        let body = downlevel(&body)?;

        let is_constructor =
            !is_static && key_token.kind == TokenKind::Ident && key_token.text == "constructor";
        if is_constructor {
            if parts.constructor.is_some() {
                return Err(TransformError::syntax(
                    key_token.line,
                    key_token.column,
                    "a class may only have one constructor",
                ));
            }
            parts.constructor = Some((params, body));
        } else {
            parts.methods.push(Method {
                key: property_accessor(key_token, &key),
                is_static,
                params,
                body,
            });
        }
        i = body_close + 1;
    }
    Ok(())
}

/// Text of a method key, rejecting members that are not plain methods
fn member_key(
    tokens: &[Token],
    key_index: usize,
    after_key: Option<usize>,
) -> Result<String, TransformError> {
    let key_token = &tokens[key_index];
    let unsupported = |construct| TransformError::Unsupported {
        construct,
        line: key_token.line,
    };
    Ok(match key_token.kind {
        TokenKind::Ident => {
            let followed_by_paren = after_key.is_some_and(|n| tokens[n].is_punct("("));
            match key_token.text.as_str() {
                "get" | "set" if !followed_by_paren => return Err(unsupported("class accessor")),
                "async" if !followed_by_paren => return Err(unsupported("async method")),
                _ => key_token.text.clone(),
            }
        }
        TokenKind::String | TokenKind::Number => key_token.text.clone(),
        TokenKind::Punct if key_token.text == "[" => {
            return Err(unsupported("computed class member"));
        }
        TokenKind::Punct if key_token.text == "*" => {
            return Err(unsupported("generator method"));
        }
        _ => {
            return Err(TransformError::syntax(
                key_token.line,
                key_token.column,
                format!("unexpected '{}' in class body", key_token.text),
            ));
        }
    })
}

/// `.name` for identifier keys, `["name"]` / `[0]` otherwise
fn property_accessor(token: &Token, key: &str) -> String {
    match token.kind {
        TokenKind::Ident if is_identifier_name(key) => format!(".{key}"),
        TokenKind::String => format!("[{}]", string_literal(&crate::js::unquote(key))),
        _ => format!("[{key}]"),
    }
}

/// Rewrite `super(...)` and `super.m(...)` inside a method body
fn rewrite_super(body: &str, has_super: bool) -> Result<String, TransformError> {
    let tokens = tokenize(body)?;
    let mut out = String::with_capacity(body.len());
    let mut i = 0;
    while i < tokens.len() {
        let token = &tokens[i];
        if !token.is_ident("super") {
            out.push_str(&token.text);
            i += 1;
            continue;
        }
        if !has_super {
            return Err(TransformError::syntax(
                token.line,
                token.column,
                "'super' used in a class without 'extends'",
            ));
        }

        let next = next_significant(&tokens, i + 1);
        match next.map(|n| &tokens[n]) {
            Some(paren) if paren.is_punct("(") => {
                let n = next.unwrap_or(i + 1);
                out.push_str("_super.call(this");
                out.push_str(call_separator(&tokens, n));
                i = n + 1;
            }
            Some(dot) if dot.is_punct(".") => {
                let n = next.unwrap_or(i + 1);
                let member = next_significant(&tokens, n + 1)
                    .filter(|&m| tokens[m].kind == TokenKind::Ident)
                    .ok_or_else(|| {
                        TransformError::syntax(token.line, token.column, "expected a name after 'super.'")
                    })?;
                out.push_str("_super.prototype.");
                out.push_str(&tokens[member].text);
                match next_significant(&tokens, member + 1) {
                    Some(call) if tokens[call].is_punct("(") => {
                        out.push_str(".call(this");
                        out.push_str(call_separator(&tokens, call));
                        i = call + 1;
                    }
                    _ => i = member + 1,
                }
            }
            Some(bracket) if bracket.is_punct("[") => {
                return Err(TransformError::Unsupported {
                    construct: "computed super access",
                    line: token.line,
                });
            }
            _ => {
                return Err(TransformError::syntax(
                    token.line,
                    token.column,
                    "unexpected 'super'",
                ));
            }
        }
    }
    Ok(out)
}

/// `, ` when the call at `open` has arguments, nothing for an empty call
fn call_separator(tokens: &[Token], open: usize) -> &'static str {
    match next_significant(tokens, open + 1) {
        Some(n) if tokens[n].is_punct(")") => "",
        _ => ", ",
    }
}

fn render(parts: &ClassParts, is_declaration: bool) -> String {
    let name = parts.name.as_deref().unwrap_or(ANONYMOUS_CLASS);
    let mut out = String::new();
    if is_declaration {
        out.push_str(&format!("var {name} = "));
    }
    let param = if parts.heritage.is_some() { "_super" } else { "" };
    out.push_str(&format!("(function ({param}) {{\n"));

    match (&parts.constructor, &parts.heritage) {
        (Some((params, body)), _) => {
            out.push_str(&format!("  function {name}({params}) {{{body}}}\n"));
        }
        (None, Some(_)) => {
            out.push_str(&format!(
                "  function {name}() {{ _super.apply(this, arguments); }}\n"
            ));
        }
        (None, None) => out.push_str(&format!("  function {name}() {{}}\n")),
    }

    if parts.heritage.is_some() {
        out.push_str(&format!(
            "  {name}.prototype = Object.create(_super.prototype);\n"
        ));
        out.push_str(&format!("  {name}.prototype.constructor = {name};\n"));
    }

    for method in &parts.methods {
        let target = if method.is_static {
            name.to_owned()
        } else {
            format!("{name}.prototype")
        };
        out.push_str(&format!(
            "  {target}{} = function ({}) {{{}}};\n",
            method.key, method.params, method.body
        ));
    }

    out.push_str(&format!(
        "  return {name};\n}})({})",
        parts.heritage.as_deref().unwrap_or_default()
    ));
    if is_declaration {
        out.push(';');
    }
    out
}
