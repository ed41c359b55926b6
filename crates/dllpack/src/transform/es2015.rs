//! ES2015 down-levelling: block-scoped declarations, arrow functions, template
//! literals, shorthand properties and classes are rewritten into ES5 constructs.
//!
//! Syntax with no rewrite here (destructuring, spread and rest, default parameters,
//! `for...of`, computed keys, generators) is rejected rather than passed through.
//! Module syntax is left for the linker or the CommonJS pass.

use log::trace;

use super::{Transform, bindings, classes};
use crate::{
    error::TransformError,
    js::{
        TemplateLiteral, Token, TokenKind, expression_end, is_property_access, matching_close,
        next_significant, prev_significant, source_of, token::is_expression_keyword, tokenize,
    },
};

/// Rewrites ES2015 syntax into broadly compatible ES5
#[derive(Debug, Clone, Copy, Default)]
pub struct Es2015;

impl Transform for Es2015 {
    fn name(&self) -> &'static str {
        "es2015"
    }

    fn apply(&self, source: &str) -> Result<String, TransformError> {
        let tokens = tokenize(source)?;
        bindings::check_block_bindings(&tokens)?;
        Downleveler::new(&tokens).run()
    }
}

/// Down-level a fragment of source. Used recursively for nested bodies.
pub(crate) fn downlevel(source: &str) -> Result<String, TransformError> {
    let tokens = tokenize(source)?;
    Downleveler::new(&tokens).run()
}

/// Reject parameter lists that need more than a plain list of names
pub(crate) fn check_params(tokens: &[Token], open: usize, close: usize) -> Result<(), TransformError> {
    let mut depth = 0usize;
    for token in &tokens[open + 1..close.min(tokens.len())] {
        if depth == 0 && token.is_punct("=") {
            return Err(TransformError::unsupported("default parameter", token.line));
        }
        if depth == 0 && (token.is_punct("{") || token.is_punct("[")) {
            return Err(TransformError::unsupported("destructuring parameter", token.line));
        }
        if token.is_open() {
            depth += 1;
        } else if token.is_close() {
            depth = depth.saturating_sub(1);
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bracket {
    Object,
    Other,
}

struct Downleveler<'t> {
    tokens: &'t [Token],
    pos: usize,
    out: String,
    /// Brackets opened and not yet closed
    brackets: Vec<Bracket>,
    /// The next significant token starts an object literal member
    member_start: bool,
}

impl<'t> Downleveler<'t> {
    fn new(tokens: &'t [Token]) -> Self {
        Self {
            tokens,
            pos: 0,
            out: String::new(),
            brackets: Vec::new(),
            member_start: false,
        }
    }

    fn run(mut self) -> Result<String, TransformError> {
        let tokens = self.tokens;
        while self.pos < tokens.len() {
            let token = &tokens[self.pos];
            if token.is_trivia() {
                self.emit_current();
                continue;
            }
            if std::mem::take(&mut self.member_start) && self.object_member()? {
                continue;
            }
            match &token.kind {
                TokenKind::Template(template) => {
                    if self.is_tagged_template() {
                        return Err(TransformError::unsupported("tagged template", token.line));
                    }
                    self.out.push_str(&template_to_concatenation(template)?);
                    self.pos += 1;
                }
                TokenKind::Ident if is_property_access(tokens, self.pos) => {
                    self.emit_current();
                }
                TokenKind::Ident
                    if matches!(token.text.as_str(), "let" | "const") && self.starts_declaration() =>
                {
                    self.reject_pattern_declaration()?;
                    self.out.push_str("var");
                    self.pos += 1;
                }
                TokenKind::Ident if token.text == "var" => {
                    self.reject_pattern_declaration()?;
                    self.emit_current();
                }
                TokenKind::Ident if token.text == "for" => {
                    self.reject_for_of()?;
                    self.emit_current();
                }
                TokenKind::Ident if token.text == "function" => {
                    self.check_function()?;
                    self.emit_current();
                }
                TokenKind::Ident if token.text == "export" => self.export()?,
                TokenKind::Ident if token.text == "class" => {
                    let (code, end) = classes::compile_class(tokens, self.pos, None)?;
                    self.out.push_str(&code);
                    self.pos = end;
                }
                TokenKind::Ident if token.is_binding_name() && self.arrow_follows(self.pos) => {
                    let params = token.text.clone();
                    let arrow = self.arrow_index(self.pos);
                    self.arrow(&params, arrow)?;
                }
                TokenKind::Punct if token.text == "..." => {
                    return Err(TransformError::unsupported("spread or rest element", token.line));
                }
                TokenKind::Punct if token.text == "(" => {
                    let close = matching_close(tokens, self.pos);
                    match close {
                        Some(close) if self.arrow_follows(close) => {
                            check_params(tokens, self.pos, close)?;
                            let params = downlevel(&source_of(tokens, self.pos + 1, close))?;
                            let arrow = self.arrow_index(close);
                            self.arrow(&params, arrow)?;
                        }
                        _ => self.emit_current(),
                    }
                }
                TokenKind::Punct
                    if (token.text == "{" || token.text == "[") && self.is_assignment_pattern() =>
                {
                    return Err(TransformError::unsupported("destructuring assignment", token.line));
                }
                _ => self.emit_current(),
            }
        }
        Ok(self.out)
    }

    fn emit_current(&mut self) {
        let token = &self.tokens[self.pos];
        if token.kind == TokenKind::Punct {
            match token.text.as_str() {
                "{" if opens_object_literal(self.tokens, self.pos) => {
                    self.brackets.push(Bracket::Object);
                    self.member_start = true;
                }
                "(" | "[" | "{" => self.brackets.push(Bracket::Other),
                ")" | "]" | "}" => {
                    self.brackets.pop();
                }
                "," => self.member_start = self.brackets.last() == Some(&Bracket::Object),
                _ => {}
            }
        }
        self.out.push_str(&token.text);
        self.pos += 1;
    }

    /// Rewrite a shorthand property (`{a}`) or method (`{m() {}}`) at the start of an
    /// object literal member. Returns whether the member was consumed.
    fn object_member(&mut self) -> Result<bool, TransformError> {
        let key = &self.tokens[self.pos];
        if key.is_punct("[") {
            return Err(TransformError::unsupported("computed property", key.line));
        }
        if key.is_punct("*") {
            return Err(TransformError::unsupported("generator method", key.line));
        }
        if !matches!(key.kind, TokenKind::Ident | TokenKind::String | TokenKind::Number) {
            return Ok(false);
        }
        let Some(next) = next_significant(self.tokens, self.pos + 1) else {
            return Ok(false);
        };
        let after = &self.tokens[next];

        if key.is_binding_name() && (after.is_punct(",") || after.is_punct("}")) {
            self.out.push_str(&format!("{0}: {0}", key.text));
            self.pos += 1;
            return Ok(true);
        }
        if after.is_punct("(") {
            let close = matching_close(self.tokens, next).ok_or_else(|| {
                TransformError::syntax(after.line, after.column, "unterminated parameter list")
            })?;
            check_params(self.tokens, next, close)?;
            self.out.push_str(&key.text);
            self.out.push_str(": function ");
            self.pos = next;
            return Ok(true);
        }
        if key.is_ident("async") && after.kind == TokenKind::Ident {
            return Err(TransformError::unsupported("async method", key.line));
        }
        Ok(false)
    }

    /// `let`/`const` followed by a binding name or a destructuring pattern
    fn starts_declaration(&self) -> bool {
        next_significant(self.tokens, self.pos + 1).is_some_and(|n| {
            let next = &self.tokens[n];
            (next.kind == TokenKind::Ident && !matches!(next.text.as_str(), "in" | "instanceof" | "of"))
                || next.is_punct("{")
                || next.is_punct("[")
        })
    }

    fn reject_pattern_declaration(&self) -> Result<(), TransformError> {
        match next_significant(self.tokens, self.pos + 1).map(|n| &self.tokens[n]) {
            Some(next) if next.is_punct("{") || next.is_punct("[") => Err(
                TransformError::unsupported("destructuring declaration", next.line),
            ),
            _ => Ok(()),
        }
    }

    /// `[a, b] = ...` or `({a} = ...)`; indexing such as `a[i] = v` is not a pattern
    fn is_assignment_pattern(&self) -> bool {
        let tokens = self.tokens;
        if tokens[self.pos].is_punct("[")
            && prev_significant(tokens, self.pos).is_some_and(|p| ends_operand(&tokens[p]))
        {
            return false;
        }
        matching_close(tokens, self.pos)
            .and_then(|close| next_significant(tokens, close + 1))
            .is_some_and(|n| tokens[n].is_punct("="))
    }

    fn reject_for_of(&self) -> Result<(), TransformError> {
        let tokens = self.tokens;
        let Some(open) = next_significant(tokens, self.pos + 1).filter(|&o| tokens[o].is_punct("("))
        else {
            return Ok(());
        };
        let Some(close) = matching_close(tokens, open) else {
            return Ok(());
        };
        let mut depth = 0usize;
        for i in open + 1..close {
            let token = &tokens[i];
            if token.is_open() {
                depth += 1;
            } else if token.is_close() {
                depth = depth.saturating_sub(1);
            } else if depth == 0
                && token.is_ident("of")
                && prev_significant(tokens, i).is_some_and(|p| {
                    tokens[p].is_binding_name() || tokens[p].is_punct("]") || tokens[p].is_punct("}")
                })
            {
                return Err(TransformError::unsupported("for...of loop", token.line));
            }
        }
        Ok(())
    }

    /// Check the `function` keyword at the cursor: no generators, plain parameters
    fn check_function(&self) -> Result<(), TransformError> {
        let tokens = self.tokens;
        let mut cursor = next_significant(tokens, self.pos + 1);
        if let Some(star) = cursor.filter(|&c| tokens[c].is_punct("*")) {
            return Err(TransformError::unsupported("generator function", tokens[star].line));
        }
        if let Some(name) = cursor.filter(|&c| tokens[c].kind == TokenKind::Ident) {
            cursor = next_significant(tokens, name + 1);
        }
        if let Some(open) = cursor.filter(|&c| tokens[c].is_punct("(")) {
            if let Some(close) = matching_close(tokens, open) {
                check_params(tokens, open, close)?;
            }
        }
        Ok(())
    }

    fn arrow_follows(&self, index: usize) -> bool {
        next_significant(self.tokens, index + 1).is_some_and(|n| self.tokens[n].is_punct("=>"))
    }

    fn arrow_index(&self, index: usize) -> usize {
        next_significant(self.tokens, index + 1).unwrap_or(index + 1)
    }

    fn is_tagged_template(&self) -> bool {
        prev_significant(self.tokens, self.pos).is_some_and(|p| {
            let prev = &self.tokens[p];
            prev.is_binding_name() || prev.is_punct(")") || prev.is_punct("]")
        })
    }

    /// Rewrite an arrow function whose `=>` sits at `arrow`
    fn arrow(&mut self, params: &str, arrow: usize) -> Result<(), TransformError> {
        let line = self.tokens[arrow].line;
        let Some(body_start) = next_significant(self.tokens, arrow + 1) else {
            return Err(TransformError::syntax(
                line,
                self.tokens[arrow].column,
                "arrow function without a body",
            ));
        };

        let (mut code, end) = if self.tokens[body_start].is_punct("{") {
            let Some(close) = matching_close(self.tokens, body_start) else {
                return Err(TransformError::syntax(
                    line,
                    self.tokens[body_start].column,
                    "unterminated arrow function body",
                ));
            };
            let body = downlevel(&source_of(self.tokens, body_start + 1, close))?;
            (format!("function ({params}) {{{body}}}"), close + 1)
        } else {
            let end = expression_end(self.tokens, body_start);
            let body = downlevel(&source_of(self.tokens, body_start, end))?;
            (format!("function ({params}) {{ return {body}; }}"), end)
        };

        if mentions_this(&code)? {
            code.push_str(".bind(this)");
        }
        trace!("Rewrote arrow function at line {line}");
        self.out.push_str(&code);
        self.pos = end;
        Ok(())
    }

    /// `export default class Name {}` becomes a declaration plus `export default Name;`
    /// so the binding stays visible to the rest of the module.
    fn export(&mut self) -> Result<(), TransformError> {
        let default = next_significant(self.tokens, self.pos + 1)
            .filter(|&i| self.tokens[i].is_ident("default"));
        let class = default
            .and_then(|i| next_significant(self.tokens, i + 1))
            .filter(|&i| self.tokens[i].is_ident("class"));
        let name = class
            .and_then(|i| next_significant(self.tokens, i + 1))
            .filter(|&i| self.tokens[i].is_binding_name() && self.tokens[i].text != "extends");

        match (class, name) {
            (Some(class), Some(name)) => {
                let name = self.tokens[name].text.clone();
                let (code, end) = classes::compile_class(self.tokens, class, Some(true))?;
                self.out.push_str(&code);
                self.out.push_str(&format!("\nexport default {name};"));
                self.pos = end;
            }
            _ => self.emit_current(),
        }
        Ok(())
    }
}

/// A token after which `[` indexes rather than opens an array literal
fn ends_operand(token: &Token) -> bool {
    match token.kind {
        TokenKind::Ident => {
            token.is_binding_name() || token.is_ident("this") || token.is_ident("super")
        }
        TokenKind::Punct => token.is_punct(")") || token.is_punct("]"),
        TokenKind::Number | TokenKind::String | TokenKind::Template(_) => true,
        _ => false,
    }
}

/// Check if the `{` at `index` opens an object literal rather than a block
fn opens_object_literal(tokens: &[Token], index: usize) -> bool {
    let Some(p) = prev_significant(tokens, index) else {
        return false;
    };
    let prev = &tokens[p];
    match prev.kind {
        TokenKind::Punct => match prev.text.as_str() {
            ")" | "]" | "}" | ";" | "{" | "=>" => false,
            ":" => !colon_ends_label(tokens, p),
            _ => true,
        },
        TokenKind::Ident if prev.text == "default" => {
            prev_significant(tokens, p).is_some_and(|e| tokens[e].is_ident("export"))
        }
        TokenKind::Ident => {
            is_expression_keyword(&prev.text) && !matches!(prev.text.as_str(), "do" | "else")
        }
        _ => false,
    }
}

/// Check if the `:` at `colon` ends a `case`, `default` or statement label
fn colon_ends_label(tokens: &[Token], colon: usize) -> bool {
    let mut depth = 0usize;
    let mut cursor = colon;
    while let Some(p) = prev_significant(tokens, cursor) {
        let token = &tokens[p];
        if token.is_close() {
            depth += 1;
        } else if token.is_open() {
            let Some(outer) = depth.checked_sub(1) else {
                return false;
            };
            depth = outer;
        } else if depth == 0 {
            if token.is_ident("case") || token.is_ident("default") || token.is_punct(";") {
                return true;
            }
            if token.is_punct("?") || token.is_punct(",") {
                return false;
            }
        }
        cursor = p;
    }
    true
}

fn mentions_this(code: &str) -> Result<bool, TransformError> {
    Ok(tokenize(code)?.iter().any(|t| t.is_ident("this")))
}

/// `` `a${b}c` `` → `("a" + (b) + "c")`
fn template_to_concatenation(template: &TemplateLiteral) -> Result<String, TransformError> {
    let mut out = quasi_literal(&template.quasis[0]);
    for (expression, quasi) in template.expressions.iter().zip(&template.quasis[1..]) {
        let expression = downlevel(expression)?;
        out.push_str(" + (");
        out.push_str(expression.trim());
        out.push(')');
        if !quasi.is_empty() {
            out.push_str(" + ");
            out.push_str(&quasi_literal(quasi));
        }
    }
    if template.expressions.is_empty() {
        Ok(out)
    } else {
        Ok(format!("({out})"))
    }
}

/// Turn the raw text of a template chunk into a double-quoted string literal.
/// Escape sequences are copied through; a backslash-newline stays a line continuation.
fn quasi_literal(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 2);
    out.push('"');
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                out.push('\\');
                if let Some(escaped) = chars.next() {
                    out.push(escaped);
                }
            }
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}
