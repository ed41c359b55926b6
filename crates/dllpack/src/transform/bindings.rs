//! Block-scoping checks for `let` and `const`.
//!
//! The ES2015 pass turns block-scoped declarations into `var`. That keeps the meaning
//! of the program only while no block-scoped binding shadows another declaration of
//! the same name and no closure created inside a loop captures a binding that is
//! fresh on every iteration. Sources relying on either are rejected.

use log::trace;

use crate::{
    error::TransformError,
    js::{
        Token, TokenKind, expression_end, is_property_access, matching_close, next_significant,
        prev_significant,
    },
};

/// Inclusive range of token indices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    start: usize,
    end: usize,
}

impl Span {
    fn contains(self, other: Self) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    fn contains_index(self, index: usize) -> bool {
        self.start <= index && index <= self.end
    }

    fn len(self) -> usize {
        self.end - self.start
    }
}

#[derive(Debug)]
struct Declaration<'t> {
    name: &'t str,
    line: usize,
    /// Region the binding is visible in
    scope: Span,
    /// `let`/`const` whose scope is narrower than its function
    block_scoped: bool,
    /// Function body (or the whole source) the declaration belongs to
    function: Span,
}

#[derive(Debug)]
struct Scopes {
    program: Span,
    /// Function bodies, including expression-bodied arrows
    functions: Vec<Span>,
    /// Brace blocks that are not function bodies
    blocks: Vec<Span>,
    /// Whole `for`/`while`/`do` statements
    loops: Vec<Span>,
    /// Parenthesised `for` heads with the loop they belong to
    heads: Vec<(Span, Span)>,
}

/// Reject block-scoped bindings whose meaning would change as `var`
pub(crate) fn check_block_bindings(tokens: &[Token]) -> Result<(), TransformError> {
    let scopes = Scopes::collect(tokens);
    let declarations = scopes.declarations(tokens);

    for declaration in declarations.iter().filter(|d| d.block_scoped) {
        let shadows = declarations.iter().any(|other| {
            other.name == declaration.name
                && other.scope != declaration.scope
                && other.scope.contains(declaration.scope)
        });
        if shadows {
            return Err(TransformError::unsupported("shadowed block binding", declaration.line));
        }
        if scopes.captured_in_loop(tokens, declaration) {
            return Err(TransformError::unsupported(
                "closure over a loop binding",
                declaration.line,
            ));
        }
    }
    trace!("Checked {} declarations for block scoping", declarations.len());
    Ok(())
}

impl Scopes {
    fn collect(tokens: &[Token]) -> Self {
        let mut scopes = Self {
            program: Span {
                start: 0,
                end: tokens.len(),
            },
            functions: Vec::new(),
            blocks: Vec::new(),
            loops: Vec::new(),
            heads: Vec::new(),
        };

        for (i, token) in tokens.iter().enumerate() {
            if token.is_punct("{") {
                let Some(close) = matching_close(tokens, i) else {
                    continue;
                };
                let span = Span { start: i, end: close };
                if is_function_body(tokens, i) {
                    scopes.functions.push(span);
                } else {
                    scopes.blocks.push(span);
                }
            } else if token.is_punct("=>") {
                let body = next_significant(tokens, i + 1).filter(|&b| !tokens[b].is_punct("{"));
                if let Some(body) = body {
                    let end = expression_end(tokens, body);
                    scopes.functions.push(Span { start: i, end });
                }
            } else if token.kind == TokenKind::Ident && !is_property_access(tokens, i) {
                scopes.collect_loop(tokens, i);
            }
        }
        scopes
    }

    fn collect_loop(&mut self, tokens: &[Token], keyword: usize) {
        let token = &tokens[keyword];
        if token.text == "do" {
            let body = next_significant(tokens, keyword + 1).filter(|&b| tokens[b].is_punct("{"));
            if let Some(close) = body.and_then(|b| matching_close(tokens, b)) {
                self.loops.push(Span {
                    start: keyword,
                    end: close,
                });
            }
            return;
        }
        if token.text != "for" && token.text != "while" {
            return;
        }
        let Some(open) = next_significant(tokens, keyword + 1).filter(|&o| tokens[o].is_punct("("))
        else {
            return;
        };
        let Some(close) = matching_close(tokens, open) else {
            return;
        };
        let end = match next_significant(tokens, close + 1) {
            Some(body) if tokens[body].is_punct("{") => matching_close(tokens, body).unwrap_or(body),
            Some(body) => expression_end(tokens, body),
            None => close,
        };
        let span = Span {
            start: keyword,
            end,
        };
        self.loops.push(span);
        if token.text == "for" {
            self.heads.push((
                Span {
                    start: open,
                    end: close,
                },
                span,
            ));
        }
    }

    /// Innermost function containing `index`
    fn function_of(&self, index: usize) -> Span {
        self.functions
            .iter()
            .copied()
            .filter(|f| f.contains_index(index))
            .min_by_key(|f| f.len())
            .unwrap_or(self.program)
    }

    /// Innermost block or function containing `index`
    fn block_of(&self, index: usize) -> Span {
        if let Some(&(_, body)) = self.heads.iter().find(|(head, _)| head.contains_index(index)) {
            return body;
        }
        self.blocks
            .iter()
            .chain(&self.functions)
            .copied()
            .filter(|s| s.contains_index(index))
            .min_by_key(|s| s.len())
            .unwrap_or(self.program)
    }

    fn declarations<'t>(&self, tokens: &'t [Token]) -> Vec<Declaration<'t>> {
        let mut declarations = Vec::new();
        for (i, token) in tokens.iter().enumerate() {
            if token.kind != TokenKind::Ident || is_property_access(tokens, i) {
                continue;
            }
            let function = self.function_of(i);
            let (scope, block_scoped) = match token.text.as_str() {
                "let" | "const" => {
                    let scope = self.block_of(i);
                    let is_function_level = scope == function && !self.loops.contains(&scope);
                    (scope, !is_function_level)
                }
                "var" | "function" => (function, false),
                _ => continue,
            };
            for name in declarator_names(tokens, i) {
                declarations.push(Declaration {
                    name: &name.text,
                    line: name.line,
                    scope,
                    block_scoped,
                    function,
                });
            }
        }
        declarations
    }

    /// A closure inside the loop around `declaration` refers to it
    fn captured_in_loop(&self, tokens: &[Token], declaration: &Declaration<'_>) -> bool {
        let in_loop = self.loops.iter().any(|l| {
            l.contains(declaration.scope) && self.function_of(l.start) == declaration.function
        });
        in_loop
            && self
                .functions
                .iter()
                .filter(|f| declaration.scope.contains(**f))
                .any(|f| {
                    (f.start..=f.end.min(tokens.len().saturating_sub(1))).any(|i| {
                        tokens[i].is_ident(declaration.name) && !is_property_access(tokens, i)
                    })
                })
    }
}

/// Check if the `{` at `open` starts a function body rather than a block
fn is_function_body(tokens: &[Token], open: usize) -> bool {
    let Some(p) = prev_significant(tokens, open) else {
        return false;
    };
    if tokens[p].is_punct("=>") {
        return true;
    }
    if !tokens[p].is_punct(")") {
        return false;
    }
    let Some(paren) = matching_open(tokens, p) else {
        return false;
    };
    !prev_significant(tokens, paren).is_some_and(|k| {
        tokens[k].kind == TokenKind::Ident
            && matches!(
                tokens[k].text.as_str(),
                "if" | "for" | "while" | "switch" | "catch" | "with"
            )
    })
}

/// Index of the bracket opening the one that closes at `close`
fn matching_open(tokens: &[Token], close: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, token) in tokens[..=close].iter().enumerate().rev() {
        if token.is_close() {
            depth += 1;
        } else if token.is_open() {
            depth = depth.checked_sub(1)?;
            if depth == 0 {
                return Some(i);
            }
        }
    }
    None
}

/// Names bound by the declaration whose keyword sits at `keyword`
fn declarator_names(tokens: &[Token], keyword: usize) -> Vec<&Token> {
    let mut names = Vec::new();
    let mut cursor = next_significant(tokens, keyword + 1);
    while let Some(name) = cursor.filter(|&n| {
        tokens[n].is_binding_name() && !matches!(tokens[n].text.as_str(), "in" | "of")
    }) {
        names.push(&tokens[name]);
        if tokens[keyword].text == "function" {
            break;
        }
        let mut after = next_significant(tokens, name + 1);
        if let Some(assign) = after.filter(|&a| tokens[a].is_punct("=")) {
            after = next_significant(tokens, assign + 1)
                .map(|value| expression_end(tokens, value))
                .and_then(|end| next_significant(tokens, end));
        }
        cursor = after
            .filter(|&a| tokens[a].is_punct(","))
            .and_then(|comma| next_significant(tokens, comma + 1));
    }
    names
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::js::tokenize;

    fn check(source: &str) -> Result<(), TransformError> {
        check_block_bindings(&tokenize(source).expect("tokenize"))
    }

    #[test]
    fn test_shadowing_block_binding_is_rejected() {
        assert_eq!(
            check("let x = 1;\n{ let x = 2; }\nconsole.log(x);"),
            Err(TransformError::unsupported("shadowed block binding", 2))
        );
    }

    #[test]
    fn test_loop_binding_shadowing_outer_var_is_rejected() {
        assert_eq!(
            check("var i = 10;\nfor (let i = 0; i < 3; i++) {}\nuse(i);"),
            Err(TransformError::unsupported("shadowed block binding", 2))
        );
    }

    #[test]
    fn test_closure_over_loop_binding_is_rejected() {
        let source = "var fns = [];\nfor (let i = 0; i < 3; i++) {\n  fns.push(() => i);\n}";
        assert_eq!(
            check(source),
            Err(TransformError::unsupported("closure over a loop binding", 2))
        );
    }

    #[test]
    fn test_closure_over_binding_declared_in_loop_body_is_rejected() {
        let source = "while (next()) {\n  const item = current();\n  later(function () { return item; });\n}";
        assert_eq!(
            check(source),
            Err(TransformError::unsupported("closure over a loop binding", 2))
        );
    }

    #[test]
    fn test_sibling_blocks_may_reuse_names() {
        let source = "for (let i = 0; i < 3; i++) { total += i; }\nfor (let i = 0; i < 3; i++) { total -= i; }\nif (a) { const v = 1; } else { const v = 2; }";
        assert_eq!(check(source), Ok(()));
    }

    #[test]
    fn test_functions_have_their_own_scope() {
        let source = "const x = 1;\nfunction f() { let x = 2; return x; }\nvar g = function () { const x = 3; };\nclass A { m() { let x = 4; } }";
        assert_eq!(check(source), Ok(()));
    }

    #[test]
    fn test_closure_in_loop_over_function_level_binding_is_allowed() {
        let source = "const base = 1;\nfor (var i = 0; i < 3; i++) { fns.push(() => base + i); }\nitems.map((item) => { let n = item * 2; return n; });";
        assert_eq!(check(source), Ok(()));
    }

    #[test]
    fn test_loop_binding_without_closure_is_allowed() {
        assert_eq!(
            check("for (let i = 0, n = xs.length; i < n; i++) { out.push(xs[i]); }"),
            Ok(())
        );
    }
}
