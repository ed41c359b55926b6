//! Minimal JavaScript front end: a lossless tokenizer plus the token-walking helpers
//! the transform passes and the module linker share.

pub mod lexer;
pub mod token;

pub use lexer::{Lexer, tokenize};
pub use token::{
    JsxAttrValue, JsxAttribute, JsxChild, JsxElement, TemplateLiteral, Token, TokenKind,
    is_identifier_name, is_keyword,
};

use token::is_statement_keyword;

/// Index of the first significant token at or after `from`
pub fn next_significant(tokens: &[Token], from: usize) -> Option<usize> {
    (from..tokens.len()).find(|&i| !tokens[i].is_trivia())
}

/// Index of the last significant token strictly before `before`
pub fn prev_significant(tokens: &[Token], before: usize) -> Option<usize> {
    (0..before.min(tokens.len()))
        .rev()
        .find(|&i| !tokens[i].is_trivia())
}

/// Index of the bracket closing the one at `open`
pub fn matching_close(tokens: &[Token], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, token) in tokens.iter().enumerate().skip(open) {
        if token.is_open() {
            depth += 1;
        } else if token.is_close() {
            depth = depth.checked_sub(1)?;
            if depth == 0 {
                return Some(i);
            }
        }
    }
    None
}

/// Concatenated source text of `tokens[start..end]`
pub fn source_of(tokens: &[Token], start: usize, end: usize) -> String {
    tokens[start..end.min(tokens.len())]
        .iter()
        .map(|t| t.text.as_str())
        .collect()
}

/// Check if the token at `index` is preceded by a `.` (a property name, not a keyword)
pub fn is_property_access(tokens: &[Token], index: usize) -> bool {
    prev_significant(tokens, index).is_some_and(|p| tokens[p].is_punct(".") || tokens[p].is_punct("?."))
}

/// Check if a trivia token at `index` ends an unterminated statement: it contains a
/// newline and the next significant token is a statement keyword
pub fn newline_ends_statement(tokens: &[Token], index: usize) -> bool {
    tokens[index].contains_newline()
        && next_significant(tokens, index + 1).is_some_and(|n| {
            tokens[n].kind == TokenKind::Ident && is_statement_keyword(&tokens[n].text)
        })
}

/// End (exclusive) of the expression starting at `start`.
///
/// The expression stops before a `,`, `;`, unmatched closing bracket or a `:` that
/// closes an enclosing conditional at depth zero, or before a line break followed by a
/// statement keyword. Trailing trivia is not part of the expression.
pub fn expression_end(tokens: &[Token], start: usize) -> usize {
    let mut depth = 0usize;
    let mut conditionals = 0usize;
    let mut end = start;
    let mut i = start;
    while i < tokens.len() {
        let token = &tokens[i];
        if token.is_trivia() {
            if depth == 0 && newline_ends_statement(tokens, i) {
                break;
            }
            i += 1;
            continue;
        }
        if token.is_open() {
            depth += 1;
        } else if token.is_close() {
            if depth == 0 {
                break;
            }
            depth -= 1;
        } else if depth == 0 && (token.is_punct(",") || token.is_punct(";")) {
            break;
        } else if depth == 0 && token.is_punct("?") {
            conditionals += 1;
        } else if depth == 0 && token.is_punct(":") {
            let Some(open) = conditionals.checked_sub(1) else {
                break;
            };
            conditionals = open;
        }
        i += 1;
        end = i;
    }
    end
}

/// Strip the quotes from a string literal token's text
pub fn unquote(literal: &str) -> String {
    let inner = literal
        .get(1..literal.len().saturating_sub(1))
        .unwrap_or_default();
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(escaped) = chars.next() {
                out.push(escaped);
            }
        } else {
            out.push(c);
        }
    }
    out
}
