/// A template literal split into its string chunks and `${}` substitutions.
///
/// `quasis` always has exactly one more element than `expressions`. Quasis hold the
/// raw text between the backticks (escapes untouched); expressions hold the raw
/// source of each substitution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateLiteral {
    pub quasis: Vec<String>,
    pub expressions: Vec<String>,
}

/// A parsed JSX element or fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsxElement {
    /// Tag name, `None` for a fragment (`<>...</>`)
    pub name: Option<String>,
    pub attributes: Vec<JsxAttribute>,
    pub children: Vec<JsxChild>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JsxAttribute {
    Named { name: String, value: JsxAttrValue },
    /// `{...expr}`, holding the raw source of `expr`
    Spread(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JsxAttrValue {
    /// Bare attribute (`<input disabled />`)
    True,
    /// Quoted string, contents without the quotes
    Str(String),
    /// `{expr}`, raw source of `expr`
    Expr(String),
    Element(Box<JsxElement>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JsxChild {
    Text(String),
    Expr(String),
    Element(JsxElement),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Whitespace,
    Comment,
    /// Identifiers and keywords alike; keywords are recognised by text
    Ident,
    Number,
    String,
    Regex,
    Punct,
    Template(TemplateLiteral),
    Jsx(Box<JsxElement>),
}

/// One lexeme together with the exact source text it was read from.
///
/// Concatenating the `text` of every token reproduces the input byte for byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    /// 1-based line of the first character
    pub line: usize,
    /// 1-based column of the first character
    pub column: usize,
}

impl Token {
    /// Whitespace and comments
    pub fn is_trivia(&self) -> bool {
        matches!(self.kind, TokenKind::Whitespace | TokenKind::Comment)
    }

    pub fn is_punct(&self, punct: &str) -> bool {
        self.kind == TokenKind::Punct && self.text == punct
    }

    pub fn is_ident(&self, name: &str) -> bool {
        self.kind == TokenKind::Ident && self.text == name
    }

    /// An identifier that is not a reserved word
    pub fn is_binding_name(&self) -> bool {
        self.kind == TokenKind::Ident && !is_keyword(&self.text)
    }

    pub fn contains_newline(&self) -> bool {
        self.text.contains('\n')
    }

    /// Opening bracket of any kind
    pub fn is_open(&self) -> bool {
        self.kind == TokenKind::Punct && matches!(self.text.as_str(), "(" | "[" | "{")
    }

    /// Closing bracket of any kind
    pub fn is_close(&self) -> bool {
        self.kind == TokenKind::Punct && matches!(self.text.as_str(), ")" | "]" | "}")
    }
}

const KEYWORDS: &[&str] = &[
    "await",
    "break",
    "case",
    "catch",
    "class",
    "const",
    "continue",
    "debugger",
    "default",
    "delete",
    "do",
    "else",
    "export",
    "extends",
    "false",
    "finally",
    "for",
    "function",
    "if",
    "import",
    "in",
    "instanceof",
    "let",
    "new",
    "null",
    "return",
    "super",
    "switch",
    "this",
    "throw",
    "true",
    "try",
    "typeof",
    "var",
    "void",
    "while",
    "with",
    "yield",
];

/// Keywords after which an expression (and therefore a regex or JSX) may start
const EXPRESSION_KEYWORDS: &[&str] = &[
    "return",
    "typeof",
    "instanceof",
    "in",
    "of",
    "new",
    "delete",
    "void",
    "throw",
    "case",
    "do",
    "else",
    "yield",
    "await",
    "extends",
];

/// Keywords that begin a statement. A newline followed by one of these ends an
/// expression that has no terminating semicolon.
const STATEMENT_KEYWORDS: &[&str] = &[
    "var", "let", "const", "function", "class", "if", "for", "while", "do", "return", "import",
    "export", "switch", "try", "throw", "break", "continue",
];

pub fn is_keyword(word: &str) -> bool {
    KEYWORDS.contains(&word)
}

pub(crate) fn is_expression_keyword(word: &str) -> bool {
    EXPRESSION_KEYWORDS.contains(&word)
}

pub(crate) fn is_statement_keyword(word: &str) -> bool {
    STATEMENT_KEYWORDS.contains(&word)
}

/// Check if `name` can be written as a bare identifier (property key, variable)
pub fn is_identifier_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}
