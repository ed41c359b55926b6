//! Module linking.
//!
//! Turns a module's source into the body of a bundle module function: static
//! `import`/`export` declarations become CommonJS assignments and every `require`
//! call with a literal argument is pointed at the id the bundler assigned to that
//! request. Bindings are copied at import time rather than kept live.
//!
//! [`to_commonjs`] performs the same declaration rewrite for a file that is not part
//! of a bundle: requests stay `require("...")` calls and the helpers are inlined.

use indexmap::{IndexMap, IndexSet};
use log::trace;

use crate::{
    error::TransformError,
    js::{
        Token, TokenKind, is_identifier_name, is_keyword, is_property_access, matching_close,
        newline_ends_statement, next_significant, tokenize, unquote,
    },
};

/// Name of the module-local require function inside bundles
pub const REQUIRE: &str = "__dllpack_require__";

const INTEROP_HELPER: &str = "function __dllpack_interop(module) { return module && module.__esModule ? module[\"default\"] : module; }\n";

const REEXPORT_HELPER: &str = "function __dllpack_reexport(exports, module) { Object.keys(module).forEach(function (key) { if (key !== \"default\" && key !== \"__esModule\" && !Object.prototype.hasOwnProperty.call(exports, key)) { exports[key] = module[key]; } }); }\n";

/// Where module requests point after linking
#[derive(Debug, Clone, Copy)]
enum Target<'a> {
    /// Bundle module ids, looked up by request
    Bundle(&'a IndexMap<String, String>),
    /// Plain `require` calls in a standalone file
    CommonJs,
}

/// All module requests of `source` in first-appearance order
pub fn collect_requests(source: &str) -> Result<Vec<String>, TransformError> {
    let tokens = tokenize(source)?;
    let mut requests = IndexSet::new();
    let mut depth = 0usize;

    for (i, token) in tokens.iter().enumerate() {
        if token.is_open() {
            depth += 1;
        } else if token.is_close() {
            depth = depth.saturating_sub(1);
        }
        if token.kind != TokenKind::Ident || is_property_access(&tokens, i) {
            continue;
        }
        match token.text.as_str() {
            "import" if depth == 0 => {
                if let Some(import) = parse_import(&tokens, i)? {
                    requests.insert(import.request);
                }
            }
            "export" if depth == 0 => match parse_export(&tokens, i)? {
                Export::From { request, .. } | Export::Star { request, .. } => {
                    requests.insert(request);
                }
                _ => {}
            },
            "require" => {
                if let Some((request, _)) = require_call(&tokens, i) {
                    requests.insert(request);
                }
            }
            _ => {}
        }
    }

    Ok(requests.into_iter().collect())
}

/// Rewrite `source` so that every request resolves through `ids`.
///
/// `ids` maps each request (as written in the source) to the JavaScript expression of
/// the module id, e.g. `3` or `"lib.0"`.
pub fn link_module(source: &str, ids: &IndexMap<String, String>) -> Result<String, TransformError> {
    link(source, Target::Bundle(ids))
}

/// Rewrite `import`/`export` declarations of a standalone file into CommonJS
pub fn to_commonjs(source: &str) -> Result<String, TransformError> {
    link(source, Target::CommonJs)
}

fn link(source: &str, target: Target<'_>) -> Result<String, TransformError> {
    let tokens = tokenize(source)?;
    let mut linker = Linker {
        tokens: &tokens,
        target,
        out: String::with_capacity(source.len()),
        exports: Vec::new(),
        is_es_module: false,
        temp_counter: 0,
        uses_interop: false,
        uses_reexport: false,
    };
    linker.run()?;
    Ok(linker.finish())
}

#[derive(Debug, Default)]
struct Import {
    default: Option<String>,
    namespace: Option<String>,
    /// (imported, local)
    named: Vec<(String, String)>,
    request: String,
    /// Index just past the declaration, including a trailing `;`
    end: usize,
}

#[derive(Debug)]
enum Export {
    /// `export default <expr>`; the expression starts at `expression`
    DefaultExpression { expression: usize },
    /// `export default function f() {}` / `export default class C {}`
    DefaultDeclaration { declaration: usize, name: String },
    /// `export var a, b` / `export function f` / `export class C`
    Declaration {
        declaration: usize,
        names: Vec<String>,
    },
    /// `export { a, b as c }`, pairs of (local, exported)
    List {
        specifiers: Vec<(String, String)>,
        end: usize,
    },
    /// `export { a as b } from "m"`, pairs of (imported, exported)
    From {
        specifiers: Vec<(String, String)>,
        request: String,
        end: usize,
    },
    /// `export * from "m"` / `export * as ns from "m"`
    Star {
        namespace: Option<String>,
        request: String,
        end: usize,
    },
}

struct Linker<'a> {
    tokens: &'a [Token],
    target: Target<'a>,
    out: String,
    /// (exported, local) pairs assigned at the end of the module
    exports: Vec<(String, String)>,
    is_es_module: bool,
    temp_counter: usize,
    /// Standalone output needs the inlined helpers
    uses_interop: bool,
    uses_reexport: bool,
}

impl Linker<'_> {
    fn run(&mut self) -> Result<(), TransformError> {
        let tokens = self.tokens;
        let mut depth = 0usize;
        let mut i = 0;
        while i < tokens.len() {
            let token = &tokens[i];
            if token.kind == TokenKind::Ident && !is_property_access(tokens, i) {
                match token.text.as_str() {
                    "import" if depth == 0 => {
                        if let Some(import) = parse_import(tokens, i)? {
                            self.import(&import)?;
                            i = import.end;
                            continue;
                        }
                    }
                    "export" if depth == 0 => {
                        i = self.export(i)?;
                        continue;
                    }
                    "require" if matches!(self.target, Target::Bundle(_)) => {
                        if let Some((request, close)) = require_call(tokens, i) {
                            let module = self.module(&request)?;
                            self.out.push_str(&module);
                            i = close + 1;
                            continue;
                        }
                    }
                    _ => {}
                }
            }
            if token.is_open() {
                depth += 1;
            } else if token.is_close() {
                depth = depth.saturating_sub(1);
            }
            self.out.push_str(&token.text);
            i += 1;
        }
        Ok(())
    }

    fn module(&self, request: &str) -> Result<String, TransformError> {
        let Target::Bundle(ids) = self.target else {
            return Ok(format!("require({})", serde_json::Value::from(request)));
        };
        let id = ids
            .get(request)
            .ok_or_else(|| TransformError::UnknownRequest(request.to_owned()))?;
        trace!("Linking request '{request}' to module {id}");
        Ok(format!("{REQUIRE}({id})"))
    }

    /// The default export of `module`, or the module itself when it is not an ES module
    fn interop(&mut self, module: &str) -> String {
        match self.target {
            Target::Bundle(_) => format!("{REQUIRE}.interop({module})"),
            Target::CommonJs => {
                self.uses_interop = true;
                format!("__dllpack_interop({module})")
            }
        }
    }

    fn reexport(&mut self, module: &str) -> String {
        match self.target {
            Target::Bundle(_) => format!("{REQUIRE}.reexport(exports, {module});"),
            Target::CommonJs => {
                self.uses_reexport = true;
                format!("__dllpack_reexport(exports, {module});")
            }
        }
    }

    fn imported_value(&mut self, module: &str, imported: &str) -> String {
        if imported == "default" {
            self.interop(module)
        } else {
            format!("{module}{}", member(imported))
        }
    }

    fn temp(&mut self) -> String {
        self.temp_counter += 1;
        format!("__dllpack_m{}", self.temp_counter)
    }

    fn import(&mut self, import: &Import) -> Result<(), TransformError> {
        let module = self.module(&import.request)?;

        let code = match (&import.default, &import.namespace, import.named.is_empty()) {
            (None, None, true) => format!("{module};"),
            (None, Some(namespace), true) => format!("var {namespace} = {module};"),
            (Some(default), None, true) => format!("var {default} = {};", self.interop(&module)),
            _ => {
                let temp = self.temp();
                let mut parts = vec![format!("var {temp} = {module};")];
                if let Some(default) = &import.default {
                    parts.push(format!("var {default} = {};", self.interop(&temp)));
                }
                if let Some(namespace) = &import.namespace {
                    parts.push(format!("var {namespace} = {temp};"));
                }
                for (imported, local) in &import.named {
                    parts.push(format!("var {local} = {};", self.imported_value(&temp, imported)));
                }
                parts.join(" ")
            }
        };
        self.out.push_str(&code);
        Ok(())
    }

    /// Handle the `export` at `index`; returns where scanning resumes
    fn export(&mut self, index: usize) -> Result<usize, TransformError> {
        self.is_es_module = true;
        match parse_export(self.tokens, index)? {
            Export::DefaultExpression { expression } => {
                self.out.push_str("exports[\"default\"] =");
                Ok(expression)
            }
            Export::DefaultDeclaration { declaration, name } => {
                self.exports.push(("default".to_owned(), name));
                Ok(declaration)
            }
            Export::Declaration { declaration, names } => {
                self.exports
                    .extend(names.into_iter().map(|name| (name.clone(), name)));
                Ok(declaration)
            }
            Export::List { specifiers, end } => {
                self.exports.extend(
                    specifiers
                        .into_iter()
                        .map(|(local, exported)| (exported, local)),
                );
                Ok(end)
            }
            Export::From {
                specifiers,
                request,
                end,
            } => {
                let module = self.module(&request)?;
                let temp = self.temp();
                let mut code = format!("var {temp} = {module};");
                for (imported, exported) in &specifiers {
                    let value = self.imported_value(&temp, imported);
                    code.push_str(&format!(" exports{} = {value};", member(exported)));
                }
                self.out.push_str(&code);
                Ok(end)
            }
            Export::Star {
                namespace,
                request,
                end,
            } => {
                let module = self.module(&request)?;
                match namespace {
                    Some(namespace) => self
                        .out
                        .push_str(&format!("exports{} = {module};", member(&namespace))),
                    None => {
                        let code = self.reexport(&module);
                        self.out.push_str(&code);
                    }
                }
                Ok(end)
            }
        }
    }

    fn finish(self) -> String {
        let mut code = String::with_capacity(self.out.len() + 64);
        if self.is_es_module {
            code.push_str("Object.defineProperty(exports, \"__esModule\", { value: true });\n");
        }
        if self.uses_interop {
            code.push_str(INTEROP_HELPER);
        }
        if self.uses_reexport {
            code.push_str(REEXPORT_HELPER);
        }
        code.push_str(&self.out);
        if !self.exports.is_empty() {
            if !code.ends_with('\n') {
                code.push('\n');
            }
            for (exported, local) in &self.exports {
                code.push_str(&format!("exports{} = {local};\n", member(exported)));
            }
        }
        code
    }
}

/// `.name`, or `["name"]` for reserved words and non-identifiers
fn member(name: &str) -> String {
    if is_identifier_name(name) && !is_keyword(name) {
        format!(".{name}")
    } else {
        format!("[\"{name}\"]")
    }
}

fn syntax_error(token: &Token, message: &str) -> TransformError {
    TransformError::syntax(token.line, token.column, message)
}

fn expect_next(tokens: &[Token], index: usize) -> Result<usize, TransformError> {
    next_significant(tokens, index + 1)
        .ok_or_else(|| syntax_error(&tokens[index], "unexpected end of input"))
}

/// Index past an optional `;` that follows `from`
fn statement_tail(tokens: &[Token], from: usize) -> usize {
    match next_significant(tokens, from) {
        Some(n) if tokens[n].is_punct(";") => n + 1,
        _ => from,
    }
}

fn expect_request(tokens: &[Token], from_keyword: usize) -> Result<(String, usize), TransformError> {
    if !tokens[from_keyword].is_ident("from") {
        return Err(syntax_error(&tokens[from_keyword], "expected 'from'"));
    }
    let literal = expect_next(tokens, from_keyword)?;
    if tokens[literal].kind != TokenKind::String {
        return Err(syntax_error(&tokens[literal], "expected a module string"));
    }
    Ok((unquote(&tokens[literal].text), statement_tail(tokens, literal + 1)))
}

fn parse_import(tokens: &[Token], index: usize) -> Result<Option<Import>, TransformError> {
    let mut cursor = expect_next(tokens, index)?;
    let first = &tokens[cursor];
    if first.is_punct("(") {
        return Err(TransformError::Unsupported {
            construct: "dynamic import",
            line: first.line,
        });
    }
    if first.is_punct(".") {
        return Err(TransformError::Unsupported {
            construct: "import.meta",
            line: first.line,
        });
    }

    let mut import = Import::default();
    if first.kind == TokenKind::String {
        import.request = unquote(&first.text);
        import.end = statement_tail(tokens, cursor + 1);
        return Ok(Some(import));
    }

    if tokens[cursor].is_binding_name() {
        import.default = Some(tokens[cursor].text.clone());
        cursor = expect_next(tokens, cursor)?;
        if tokens[cursor].is_punct(",") {
            cursor = expect_next(tokens, cursor)?;
        }
    }

    if tokens[cursor].is_punct("*") {
        let as_keyword = expect_next(tokens, cursor)?;
        if !tokens[as_keyword].is_ident("as") {
            return Err(syntax_error(&tokens[as_keyword], "expected 'as'"));
        }
        let name = expect_next(tokens, as_keyword)?;
        if !tokens[name].is_binding_name() {
            return Err(syntax_error(&tokens[name], "expected a namespace name"));
        }
        import.namespace = Some(tokens[name].text.clone());
        cursor = expect_next(tokens, name)?;
    } else if tokens[cursor].is_punct("{") {
        let close = matching_close(tokens, cursor)
            .ok_or_else(|| syntax_error(&tokens[cursor], "unterminated import list"))?;
        import.named = parse_specifiers(tokens, cursor + 1, close)?;
        cursor = expect_next(tokens, close)?;
    }

    let (request, end) = expect_request(tokens, cursor)?;
    import.request = request;
    import.end = end;
    Ok(Some(import))
}

fn parse_export(tokens: &[Token], index: usize) -> Result<Export, TransformError> {
    let cursor = expect_next(tokens, index)?;
    let token = &tokens[cursor];

    if token.is_ident("default") {
        let declaration = expect_next(tokens, cursor)?;
        if let Some(name) = declared_name(tokens, declaration) {
            return Ok(Export::DefaultDeclaration { declaration, name });
        }
        return Ok(Export::DefaultExpression {
            expression: cursor + 1,
        });
    }

    if matches!(token.text.as_str(), "var" | "let" | "const") && token.kind == TokenKind::Ident {
        return Ok(Export::Declaration {
            declaration: cursor,
            names: declarator_names(tokens, cursor)?,
        });
    }

    if token.is_ident("function") || token.is_ident("class") {
        let name = declared_name(tokens, cursor)
            .ok_or_else(|| syntax_error(token, "exported declaration requires a name"))?;
        return Ok(Export::Declaration {
            declaration: cursor,
            names: vec![name],
        });
    }

    if token.is_punct("{") {
        let close = matching_close(tokens, cursor)
            .ok_or_else(|| syntax_error(token, "unterminated export list"))?;
        let specifiers = parse_specifiers(tokens, cursor + 1, close)?;
        return match next_significant(tokens, close + 1) {
            Some(from) if tokens[from].is_ident("from") => {
                let (request, end) = expect_request(tokens, from)?;
                Ok(Export::From {
                    specifiers,
                    request,
                    end,
                })
            }
            _ => Ok(Export::List {
                specifiers,
                end: statement_tail(tokens, close + 1),
            }),
        };
    }

    if token.is_punct("*") {
        let mut next = expect_next(tokens, cursor)?;
        let mut namespace = None;
        if tokens[next].is_ident("as") {
            let name = expect_next(tokens, next)?;
            namespace = Some(tokens[name].text.clone());
            next = expect_next(tokens, name)?;
        }
        let (request, end) = expect_request(tokens, next)?;
        return Ok(Export::Star {
            namespace,
            request,
            end,
        });
    }

    Err(syntax_error(token, "unexpected token after 'export'"))
}

/// Name of the `function`/`class` declaration starting at `index`, if it has one
fn declared_name(tokens: &[Token], index: usize) -> Option<String> {
    let keyword = &tokens[index];
    if !(keyword.is_ident("function") || keyword.is_ident("class")) {
        return None;
    }
    let mut name = next_significant(tokens, index + 1)?;
    if tokens[name].is_punct("*") {
        name = next_significant(tokens, name + 1)?;
    }
    let token = &tokens[name];
    (token.is_binding_name() && token.text != "extends").then(|| token.text.clone())
}

/// Names bound by the `var`/`let`/`const` declaration starting at `keyword`
fn declarator_names(tokens: &[Token], keyword: usize) -> Result<Vec<String>, TransformError> {
    let mut names = Vec::new();
    let mut expect_name = true;
    let mut depth = 0usize;

    for i in keyword + 1..tokens.len() {
        let token = &tokens[i];
        if token.is_trivia() {
            if depth == 0 && !expect_name && newline_ends_statement(tokens, i) {
                break;
            }
            continue;
        }
        if expect_name {
            if token.is_binding_name() {
                names.push(token.text.clone());
                expect_name = false;
                continue;
            }
            if token.is_punct("{") || token.is_punct("[") {
                return Err(TransformError::Unsupported {
                    construct: "destructuring export",
                    line: token.line,
                });
            }
            return Err(syntax_error(token, "expected a variable name"));
        }
        if token.is_open() {
            depth += 1;
        } else if token.is_close() {
            if depth == 0 {
                break;
            }
            depth -= 1;
        } else if depth == 0 && token.is_punct(",") {
            expect_name = true;
        } else if depth == 0 && token.is_punct(";") {
            break;
        }
    }
    Ok(names)
}

/// Parse `a, b as c, "d" as e` between braces into (name, alias) pairs
fn parse_specifiers(
    tokens: &[Token],
    start: usize,
    end: usize,
) -> Result<Vec<(String, String)>, TransformError> {
    let mut specifiers = Vec::new();
    let mut group: Vec<&Token> = Vec::new();

    let significant = tokens[start..end].iter().filter(|t| !t.is_trivia());
    for token in significant.chain(std::iter::once(&tokens[end])) {
        if !(token.is_punct(",") || token.is_punct("}")) {
            group.push(token);
            continue;
        }
        let name_of = |t: &Token| {
            if t.kind == TokenKind::String {
                unquote(&t.text)
            } else {
                t.text.clone()
            }
        };
        match group.as_slice() {
            [] => {}
            [name] => specifiers.push((name_of(*name), name_of(*name))),
            [name, as_keyword, alias] if as_keyword.is_ident("as") => {
                specifiers.push((name_of(*name), name_of(*alias)));
            }
            [first, ..] => return Err(syntax_error(first, "malformed import/export specifier")),
        }
        group.clear();
    }
    Ok(specifiers)
}

/// `require("x")` at `index`: returns the request and the index of the closing paren
fn require_call(tokens: &[Token], index: usize) -> Option<(String, usize)> {
    let open = next_significant(tokens, index + 1).filter(|&i| tokens[i].is_punct("("))?;
    let literal =
        next_significant(tokens, open + 1).filter(|&i| tokens[i].kind == TokenKind::String)?;
    let close = next_significant(tokens, literal + 1).filter(|&i| tokens[i].is_punct(")"))?;
    Some((unquote(&tokens[literal].text), close))
}
